use rustc_hash::FxHashMap;
use tracing::trace;

use crate::prelude::*;

/// Composes the map reaching result `output` of `node` with the node's transfer rule for
/// the operand at `position`.
pub fn compute_operand_indexing(
    computation: &Computation,
    node: NodeIndex,
    output: u8,
    position: usize,
    downstream: &IndexingMap,
    arena: &mut ExprArena,
) -> Result<Option<IndexingMap>> {
    match output_to_operand_indexing(computation, node, output, position, arena)? {
        Some(rule) => Ok(Some(downstream.compose(&rule, arena)?)),
        None => Ok(None),
    }
}

/// Every distinct map from the launch space to each value of a computation.
#[derive(Debug, Clone, Default)]
pub struct IndexingPropagation {
    maps: FxHashMap<ValueRef, Vec<IndexingMap>>,
}

impl IndexingPropagation {
    /// Walks the computation from its outputs towards its parameters. `seeds` gives the map
    /// of each output value.
    pub fn new(
        computation: &Computation,
        seeds: impl IntoIterator<Item = (ValueRef, IndexingMap)>,
        arena: &mut ExprArena,
    ) -> Result<Self> {
        let mut propagation = Self::default();
        for (value, map) in seeds {
            propagation.insert(value, map);
        }
        for node in computation.post_order()?.into_iter().rev() {
            let num_outputs = computation.node(node)?.num_outputs();
            let operands = computation.operands(node);
            for output in 0..num_outputs as u8 {
                let maps = propagation.maps(ValueRef::new(node, output)).to_vec();
                for map in &maps {
                    for (position, (source, dependency)) in operands.iter().enumerate() {
                        let Some(operand_map) = compute_operand_indexing(
                            computation,
                            node,
                            output,
                            position,
                            map,
                            arena,
                        )?
                        else {
                            continue;
                        };
                        let value = ValueRef::new(*source, dependency.output_order);
                        if propagation.insert(value, operand_map) {
                            trace!(
                                "New indexing for {}#{}",
                                computation.node(*source)?.name,
                                dependency.output_order
                            );
                        }
                    }
                }
            }
        }
        Ok(propagation)
    }

    pub fn maps(&self, value: ValueRef) -> &[IndexingMap] {
        self.maps.get(&value).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct maps over all results of a node, in result order.
    pub fn node_maps(&self, node: NodeIndex, num_outputs: usize) -> Vec<&IndexingMap> {
        let mut maps: Vec<&IndexingMap> = vec![];
        for output in 0..num_outputs as u8 {
            for map in self.maps(ValueRef::new(node, output)) {
                if !maps.contains(&map) {
                    maps.push(map);
                }
            }
        }
        maps
    }

    /// Whether any output reads this node.
    pub fn is_reachable(&self, node: NodeIndex) -> bool {
        self.maps.keys().any(|value| value.node == node)
    }

    /// Returns false when the value already had an equal map.
    fn insert(&mut self, value: ValueRef, map: IndexingMap) -> bool {
        let maps = self.maps.entry(value).or_default();
        if maps.contains(&map) {
            return false;
        }
        maps.push(map);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_indexing_eq;

    #[test]
    fn test_rules_through_a_chain() {
        let mut cx = Computation::new("fused");
        let p = cx.parameter("p", Shape::new(PrimitiveType::F32, &[6, 4]));
        let t = cx.transpose("t", p, &[1, 0]);
        let r = cx.reverse("r", t, &[0]);
        let s = cx.slice("s", r, &[1, 0], &[4, 6], &[2, 3]);
        cx.set_root(s);

        let mut arena = ExprArena::new();
        let seed = IndexingMap::identity(&mut arena, &[2, 2]);
        let propagation =
            IndexingPropagation::new(&cx, [(ValueRef::from(s), seed)], &mut arena).unwrap();
        let maps = propagation.maps(ValueRef::from(p));
        assert_eq!(maps.len(), 1);
        assert_indexing_eq(
            &maps[0].format(&arena, &IndexingMapPrinter::default()),
            "(d0, d1) -> (d1 * 3, -d0 * 2 + 2)
             domain:
             d0 in [0, 1]
             d1 in [0, 1]",
        );
    }

    #[test]
    fn test_reshape_and_reduce_rules() {
        let mut cx = Computation::new("fused");
        let p = cx.parameter("p", Shape::new(PrimitiveType::F32, &[4, 6]));
        let r = cx.reshape("r", p, &[2, 2, 6]);
        let mut arena = ExprArena::new();
        let map = output_to_operand_indexing(&cx, r, 0, 0, &mut arena)
            .unwrap()
            .unwrap();
        assert_indexing_eq(
            &map.format(&arena, &IndexingMapPrinter::default()),
            "(d0, d1, d2) -> (d0 * 2 + d1, d2)
             domain:
             d0 in [0, 1]
             d1 in [0, 1]
             d2 in [0, 5]",
        );

        let mut sum = Computation::new("sum");
        let a = sum.parameter("a", Shape::scalar(PrimitiveType::F32));
        let b = sum.parameter("b", Shape::scalar(PrimitiveType::F32));
        let add = sum.elementwise("add", ElementwiseKind::Add, &[a, b]);
        sum.set_root(add);
        let mut fusion = Fusion::new("fused");
        let reducer = fusion.add_computation(sum);
        let cx = fusion.fused_mut();
        let p = cx.parameter("p", Shape::new(PrimitiveType::F32, &[3, 5, 7]));
        let zero = cx.constant("zero", 0.0, PrimitiveType::F32);
        let reduce = cx.reduce("reduce", &[p], &[zero], &[0, 2], reducer);
        let input = output_to_operand_indexing(cx, reduce, 0, 0, &mut arena)
            .unwrap()
            .unwrap();
        assert_indexing_eq(
            &input.format(&arena, &IndexingMapPrinter::default()),
            "(d0)[s0, s1] -> (s0, d0, s1)
             domain:
             d0 in [0, 4]
             s0 in [0, 2]
             s1 in [0, 6]",
        );
        let init = output_to_operand_indexing(cx, reduce, 0, 1, &mut arena)
            .unwrap()
            .unwrap();
        assert_eq!(init.result_count(), 0);
        assert!(matches!(
            output_to_operand_indexing(cx, reduce, 0, 2, &mut arena),
            Err(Error::UnreachableOperand { index: 2, count: 2, .. })
        ));
    }

    #[test]
    fn test_distinct_maps_per_value() {
        let mut cx = Computation::new("fused");
        let p = cx.parameter("p", Shape::new(PrimitiveType::F32, &[8]));
        let r = cx.reverse("r", p, &[0]);
        let add = cx.elementwise("add", ElementwiseKind::Add, &[p, r]);
        let mul = cx.elementwise("mul", ElementwiseKind::Multiply, &[add, p]);
        cx.set_root(mul);

        let mut arena = ExprArena::new();
        let seed = IndexingMap::identity(&mut arena, &[8]);
        let propagation =
            IndexingPropagation::new(&cx, [(ValueRef::from(mul), seed)], &mut arena).unwrap();
        // p is read directly twice with the same map and once reversed
        assert_eq!(propagation.maps(ValueRef::from(p)).len(), 2);
        assert_eq!(propagation.node_maps(add, 1).len(), 1);
        assert!(propagation.is_reachable(r));
    }

    #[test]
    fn test_tuple_selects_its_operand() {
        let mut cx = Computation::new("fused");
        let shape = Shape::new(PrimitiveType::F32, &[4]);
        let a = cx.parameter("a", shape.clone());
        let b = cx.parameter("b", shape);
        let t = cx.tuple("t", &[a.into(), b.into()]);
        let mut arena = ExprArena::new();
        assert!(output_to_operand_indexing(&cx, t, 1, 1, &mut arena)
            .unwrap()
            .is_some());
        assert!(output_to_operand_indexing(&cx, t, 1, 0, &mut arena)
            .unwrap()
            .is_none());
    }
}
