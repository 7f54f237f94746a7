use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::prelude::*;

/// A connected part of the fused computation emitted as one function. The function takes
/// the root's coordinates and returns every result of the root.
#[derive(Clone, Debug, PartialEq)]
pub struct Subgraph {
    pub root: NodeIndex,
    /// Root first, then the other members from consumers to producers.
    pub nodes: Vec<NodeIndex>,
    pub function_name: String,
}

/// Splits a fused computation into functions.
///
/// A node gets its own function when it is an output, when its consumers index it through
/// different maps, or when its consumers live in different functions. Otherwise it is
/// inlined into its consumers' function. Parameters and constants never get a function.
#[derive(Clone, Debug, Default)]
pub struct Partition {
    subgraphs: Vec<Subgraph>,
    owners: FxHashMap<NodeIndex, usize>,
}

impl Partition {
    pub fn new(
        computation: &Computation,
        entry_name: &str,
        propagation: &IndexingPropagation,
        arena: &mut ExprArena,
    ) -> Result<Self> {
        let roots = computation.roots()?;
        let root_tuple = computation.root()?;
        let mut partition = Partition::default();
        // Map from the owning subgraph root's coordinates to each member's coordinates.
        let mut relative: FxHashMap<NodeIndex, IndexingMap> = FxHashMap::default();
        let mut names = FxHashSet::default();

        for node_id in computation.post_order()?.into_iter().rev() {
            let node = computation.node(node_id)?;
            if matches!(node.op, Op::Parameter(_) | Op::Constant(_))
                || !propagation.is_reachable(node_id)
            {
                continue;
            }
            if matches!(node.op, Op::Tuple) {
                if node_id == root_tuple {
                    continue;
                }
                return Err(Error::Unsupported(format!(
                    "tuple `{}` inside a fusion",
                    node.name
                )));
            }
            let joined = if roots.contains(&node_id) {
                None
            } else {
                partition.shared_consumer_map(computation, node_id, &relative, arena)?
            };
            match joined {
                Some((owner, map)) => {
                    partition.subgraphs[owner].nodes.push(node_id);
                    partition.owners.insert(node_id, owner);
                    relative.insert(node_id, map);
                }
                None => {
                    let name = unique_name(&mut names, entry_name, &node.name);
                    partition.owners.insert(node_id, partition.subgraphs.len());
                    partition.subgraphs.push(Subgraph {
                        root: node_id,
                        nodes: vec![node_id],
                        function_name: name,
                    });
                    let identity = IndexingMap::identity(arena, node.shape(0)?.dims());
                    relative.insert(node_id, identity);
                }
            }
        }
        debug!(
            "Partitioned `{}` into {} functions",
            computation.name(),
            partition.subgraphs.len()
        );
        Ok(partition)
    }

    /// The consumers' function and the one map through which they all read `node_id`, if
    /// such a function and map exist.
    fn shared_consumer_map(
        &self,
        computation: &Computation,
        node_id: NodeIndex,
        relative: &FxHashMap<NodeIndex, IndexingMap>,
        arena: &mut ExprArena,
    ) -> Result<Option<(usize, IndexingMap)>> {
        let mut owner = None;
        let mut shared: Option<IndexingMap> = None;
        for (user, dependency) in computation.user_edges(node_id) {
            let (Some(&user_owner), Some(user_map)) =
                (self.owners.get(&user), relative.get(&user))
            else {
                // Consumers nobody reads don't constrain placement.
                continue;
            };
            if owner.is_some_and(|o| o != user_owner) {
                return Ok(None);
            }
            owner = Some(user_owner);
            let Some(map) = compute_operand_indexing(
                computation,
                user,
                0,
                dependency.input_order as usize,
                user_map,
                arena,
            )?
            else {
                return Ok(None);
            };
            match &shared {
                Some(existing) if *existing != map => return Ok(None),
                Some(_) => {}
                None => shared = Some(map),
            }
        }
        Ok(owner.zip(shared))
    }

    pub fn subgraphs(&self) -> &[Subgraph] {
        &self.subgraphs
    }

    /// Index of the subgraph emitting `node`.
    pub fn owner(&self, node: NodeIndex) -> Option<usize> {
        self.owners.get(&node).copied()
    }

    /// The subgraph whose function computes `node`, when `node` is its root.
    pub fn rooted_at(&self, node: NodeIndex) -> Option<&Subgraph> {
        self.owner(node)
            .map(|i| &self.subgraphs[i])
            .filter(|s| s.root == node)
    }
}

fn unique_name(taken: &mut FxHashSet<String>, entry_name: &str, node_name: &str) -> String {
    let base = format!("{entry_name}_{}", sanitize(node_name));
    let mut name = base.clone();
    let mut suffix = 1;
    while !taken.insert(name.clone()) {
        name = format!("{base}_{suffix}");
        suffix += 1;
    }
    name
}

/// Function names can't hold `.` or `-`.
pub(crate) fn sanitize(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(computation: &Computation, arena: &mut ExprArena) -> Partition {
        let seeds = computation
            .outputs()
            .unwrap()
            .into_iter()
            .map(|value| {
                let shape = computation.value_shape(value).unwrap().clone();
                (value, IndexingMap::identity(arena, shape.dims()))
            })
            .collect::<Vec<_>>();
        let propagation = IndexingPropagation::new(computation, seeds, arena).unwrap();
        Partition::new(computation, "fused", &propagation, arena).unwrap()
    }

    #[test]
    fn test_shared_maps_stay_inline() {
        let mut cx = Computation::new("fused");
        let shape = Shape::new(PrimitiveType::F32, &[16]);
        let p = cx.parameter("p0", shape);
        let exp = cx.elementwise("exp.1", ElementwiseKind::Exp, &[p]);
        let neg = cx.elementwise("neg", ElementwiseKind::Negate, &[exp]);
        let mul = cx.elementwise("mul", ElementwiseKind::Multiply, &[exp, neg]);
        cx.set_root(mul);

        let mut arena = ExprArena::new();
        let partition = partition(&cx, &mut arena);
        assert_eq!(partition.subgraphs().len(), 1);
        let subgraph = &partition.subgraphs()[0];
        assert_eq!(subgraph.function_name, "fused_mul");
        assert_eq!(subgraph.nodes, vec![mul, neg, exp]);
        assert_eq!(partition.owner(p), None);
    }

    #[test]
    fn test_differing_maps_split() {
        let mut cx = Computation::new("fused");
        let p = cx.parameter("p0", Shape::new(PrimitiveType::F32, &[8]));
        let exp = cx.elementwise("exp.1", ElementwiseKind::Exp, &[p]);
        let rev = cx.reverse("rev", exp, &[0]);
        let add = cx.elementwise("add", ElementwiseKind::Add, &[exp, rev]);
        let t = cx.tuple("t", &[add.into(), exp.into()]);
        cx.set_root(t);

        let mut arena = ExprArena::new();
        let partition = partition(&cx, &mut arena);
        let names = partition
            .subgraphs()
            .iter()
            .map(|s| s.function_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["fused_add", "fused_exp_1"]);
        assert!(partition.rooted_at(exp).is_some());
        assert_eq!(partition.owner(rev), partition.owner(add));
        assert!(partition.rooted_at(rev).is_none());
    }

    #[test]
    fn test_unique_names() {
        let mut taken = FxHashSet::default();
        assert_eq!(unique_name(&mut taken, "f", "a.b"), "f_a_b");
        assert_eq!(unique_name(&mut taken, "f", "a-b"), "f_a_b_1");
    }
}
