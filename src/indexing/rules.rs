use itertools::Itertools;

use super::map::extents;
use crate::prelude::*;

/// Maps coordinates of result `output` of `node` to the coordinates of its operand at
/// `position` that the element reads.
///
/// Returns `None` when that result doesn't read the operand at all, which only happens for
/// tuples.
pub fn output_to_operand_indexing(
    computation: &Computation,
    node_id: NodeIndex,
    output: u8,
    position: usize,
    arena: &mut ExprArena,
) -> Result<Option<IndexingMap>> {
    let node = computation.node(node_id)?;
    let operands = computation.operands(node_id);
    let Some(&(source, dependency)) = operands.get(position) else {
        return Err(Error::UnreachableOperand {
            node: node.name.clone(),
            index: position,
            count: operands.len(),
        });
    };
    let out_shape = node.shape(output)?;
    let in_shape = computation.value_shape(ValueRef::new(source, dependency.output_order))?;
    let out_dims = out_shape.dims();
    let in_dims = in_shape.dims();

    let map = match &node.op {
        Op::Parameter(_) | Op::Constant(_) | Op::Iota { .. } => {
            return Err(Error::MalformedGraph(format!(
                "`{}` is a {} and can't have operands",
                node.name,
                node.op.name()
            )))
        }
        Op::Elementwise(_) | Op::Copy | Op::GetTupleElement { .. } => {
            identity_indexing(node, out_dims, in_dims, arena)?
        }
        Op::Bitcast if out_dims == in_dims => identity_indexing(node, out_dims, in_dims, arena)?,
        Op::Bitcast if out_shape.num_elements() == in_shape.num_elements() => {
            reshape_indexing(node, out_dims, in_dims, arena)?
        }
        Op::Bitcast => {
            return Err(Error::Unsupported(format!(
                "bitcast `{}` from {in_shape} to {out_shape} changes the element count",
                node.name
            )))
        }
        Op::Broadcast { dimensions } => {
            broadcast_indexing(node, out_dims, in_dims, dimensions, arena)?
        }
        Op::Reshape => reshape_indexing(node, out_dims, in_dims, arena)?,
        Op::Reverse { dimensions } => {
            check_same_dims(node, out_dims, in_dims)?;
            let results = (0..out_dims.len())
                .map(|i| {
                    let d = arena.dim(i);
                    if dimensions.contains(&i) {
                        arena.linear([(d, -1)], out_dims[i] - 1)
                    } else {
                        d
                    }
                })
                .collect();
            IndexingMap::new(extents(out_dims), vec![], results, vec![])
        }
        Op::Transpose { permutation } => {
            transpose_indexing(node, out_dims, in_dims, permutation, arena)?
        }
        Op::Slice {
            starts,
            limits,
            strides,
        } => slice_indexing(node, out_dims, in_dims, starts, limits, strides, arena)?,
        Op::Reduce { dimensions, .. } if position < node.num_outputs() => {
            reduce_indexing(node, out_dims, in_dims, dimensions, arena)?
        }
        // Initial values are scalars read once per output element.
        Op::Reduce { .. } => IndexingMap::new(extents(out_dims), vec![], vec![], vec![]),
        Op::Tuple if position == output as usize => {
            identity_indexing(node, out_dims, in_dims, arena)?
        }
        Op::Tuple => return Ok(None),
        Op::CustomCall { target } => {
            return Err(Error::Unsupported(format!(
                "no indexing rule for custom call `{}` targeting `{target}`",
                node.name
            )))
        }
    };
    Ok(Some(map.simplify(arena)))
}

fn check_same_dims(node: &Node, out_dims: &[i64], in_dims: &[i64]) -> Result<()> {
    if out_dims != in_dims {
        return Err(Error::MalformedGraph(format!(
            "`{}` maps [{}] to [{}] but needs equal shapes",
            node.name,
            in_dims.iter().join(","),
            out_dims.iter().join(",")
        )));
    }
    Ok(())
}

fn identity_indexing(
    node: &Node,
    out_dims: &[i64],
    in_dims: &[i64],
    arena: &mut ExprArena,
) -> Result<IndexingMap> {
    check_same_dims(node, out_dims, in_dims)?;
    let results = (0..out_dims.len()).map(|i| arena.dim(i)).collect();
    Ok(IndexingMap::new(extents(out_dims), vec![], results, vec![]))
}

fn broadcast_indexing(
    node: &Node,
    out_dims: &[i64],
    in_dims: &[i64],
    dimensions: &[usize],
    arena: &mut ExprArena,
) -> Result<IndexingMap> {
    let valid = dimensions.len() == in_dims.len()
        && dimensions
            .iter()
            .zip(in_dims)
            .all(|(d, size)| out_dims.get(*d) == Some(size));
    if !valid {
        return Err(Error::MalformedGraph(format!(
            "broadcast `{}` of [{}] into [{}] along {{{}}}",
            node.name,
            in_dims.iter().join(","),
            out_dims.iter().join(","),
            dimensions.iter().join(",")
        )));
    }
    let results = dimensions.iter().map(|d| arena.dim(*d)).collect();
    Ok(IndexingMap::new(extents(out_dims), vec![], results, vec![]))
}

/// Linearizes the output coordinates row-major, then splits the linear index along the
/// operand's dimensions.
fn reshape_indexing(
    node: &Node,
    out_dims: &[i64],
    in_dims: &[i64],
    arena: &mut ExprArena,
) -> Result<IndexingMap> {
    let out_count: i64 = out_dims.iter().product();
    let in_count: i64 = in_dims.iter().product();
    if out_count != in_count {
        return Err(Error::MalformedGraph(format!(
            "`{}` reshapes {in_count} elements into {out_count}",
            node.name
        )));
    }
    let out_strides = row_major_strides(out_dims);
    let terms = out_strides
        .iter()
        .enumerate()
        .map(|(i, stride)| (arena.dim(i), *stride))
        .collect_vec();
    let linear = arena.linear(terms, 0);
    let results = row_major_strides(in_dims)
        .into_iter()
        .zip(in_dims)
        .map(|(stride, size)| {
            let major = arena.floor_div(linear, stride)?;
            arena.modulo(major, *size)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(IndexingMap::new(extents(out_dims), vec![], results, vec![]))
}

fn transpose_indexing(
    node: &Node,
    out_dims: &[i64],
    in_dims: &[i64],
    permutation: &[usize],
    arena: &mut ExprArena,
) -> Result<IndexingMap> {
    let is_permutation = permutation.iter().copied().sorted().eq(0..in_dims.len());
    if !is_permutation
        || out_dims.len() != in_dims.len()
        || permutation
            .iter()
            .enumerate()
            .any(|(i, p)| out_dims[i] != in_dims[*p])
    {
        return Err(Error::MalformedGraph(format!(
            "`{}` is not a valid transpose by {{{}}}",
            node.name,
            permutation.iter().join(",")
        )));
    }
    let mut results = vec![arena.constant(0); in_dims.len()];
    for (i, p) in permutation.iter().enumerate() {
        results[*p] = arena.dim(i);
    }
    Ok(IndexingMap::new(extents(out_dims), vec![], results, vec![]))
}

fn slice_indexing(
    node: &Node,
    out_dims: &[i64],
    in_dims: &[i64],
    starts: &[i64],
    limits: &[i64],
    strides: &[i64],
    arena: &mut ExprArena,
) -> Result<IndexingMap> {
    let rank = in_dims.len();
    if [out_dims.len(), starts.len(), limits.len(), strides.len()]
        .iter()
        .any(|len| *len != rank)
        || strides.iter().any(|s| *s < 1)
    {
        return Err(Error::MalformedGraph(format!(
            "slice `{}` doesn't match its operand of rank {rank}",
            node.name
        )));
    }
    let mut results = Vec::with_capacity(rank);
    let mut constraints = Vec::with_capacity(rank);
    for i in 0..rank {
        let d = arena.dim(i);
        let result = arena.linear([(d, strides[i])], starts[i]);
        results.push(result);
        constraints.push((result, Interval::new(starts[i], limits[i] - 1)));
    }
    Ok(IndexingMap::new(extents(out_dims), vec![], results, constraints))
}

/// Kept dimensions read the matching output dimension; every reduced dimension becomes a
/// parameter, numbered in ascending dimension order.
fn reduce_indexing(
    node: &Node,
    out_dims: &[i64],
    in_dims: &[i64],
    dimensions: &[usize],
    arena: &mut ExprArena,
) -> Result<IndexingMap> {
    let kept = (0..in_dims.len())
        .filter(|d| !dimensions.contains(d))
        .map(|d| in_dims[d])
        .collect_vec();
    if kept != out_dims || dimensions.iter().any(|d| *d >= in_dims.len()) {
        return Err(Error::MalformedGraph(format!(
            "reduce `{}` of [{}] over {{{}}} can't produce [{}]",
            node.name,
            in_dims.iter().join(","),
            dimensions.iter().join(","),
            out_dims.iter().join(",")
        )));
    }
    let mut param_ranges = vec![];
    let mut results = Vec::with_capacity(in_dims.len());
    let mut next_dim = 0;
    for (d, size) in in_dims.iter().enumerate() {
        if dimensions.contains(&d) {
            results.push(arena.param(param_ranges.len()));
            param_ranges.push(Interval::extent(*size));
        } else {
            results.push(arena.dim(next_dim));
            next_dim += 1;
        }
    }
    Ok(IndexingMap::new(
        extents(out_dims),
        param_ranges,
        results,
        vec![],
    ))
}

fn row_major_strides(dims: &[i64]) -> Vec<i64> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}
