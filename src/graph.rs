use itertools::Itertools;
use petgraph::{stable_graph::StableGraph, visit::EdgeRef, Direction};

use crate::prelude::*;

/// A data dependency: the consumer's `input_order`-th operand is the producer's
/// `output_order`-th result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub input_order: u8,
    pub output_order: u8,
}

/// One result of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef {
    pub node: NodeIndex,
    pub output: u8,
}

impl ValueRef {
    pub fn new(node: NodeIndex, output: u8) -> Self {
        Self { node, output }
    }
}

impl From<NodeIndex> for ValueRef {
    fn from(node: NodeIndex) -> Self {
        Self::new(node, 0)
    }
}

pub type ComputationGraph = StableGraph<Node, Dependency>;

/// A dataflow graph of tensor operations with ordered parameters and a single root.
#[derive(Debug, Clone)]
pub struct Computation {
    name: String,
    graph: ComputationGraph,
    parameters: Vec<NodeIndex>,
    root: Option<NodeIndex>,
}

impl Computation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: StableGraph::default(),
            parameters: vec![],
            root: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &ComputationGraph {
        &self.graph
    }

    pub fn parameters(&self) -> &[NodeIndex] {
        &self.parameters
    }

    /// Add op on the graph, and get back a NewOp to wire its operands
    ///
    /// ```rust
    /// use luminal_loop_fusion::prelude::*;
    /// let mut cx = Computation::new("fused_computation");
    /// let a = cx.parameter("p0", Shape::new(PrimitiveType::F32, &[20]));
    /// let b = cx
    ///     .add_op("neg", Op::Elementwise(ElementwiseKind::Negate), Shape::new(PrimitiveType::F32, &[20]))
    ///     .input(a)
    ///     .finish();
    /// cx.set_root(b);
    /// ```
    pub fn add_op(&mut self, name: impl Into<String>, op: Op, shape: Shape) -> NewOp<'_> {
        self.add_multi_output_op(name, op, vec![shape])
    }

    pub fn add_multi_output_op(
        &mut self,
        name: impl Into<String>,
        op: Op,
        shapes: Vec<Shape>,
    ) -> NewOp<'_> {
        NewOp {
            new_op_id: self.graph.add_node(Node {
                name: name.into(),
                op,
                shapes,
            }),
            computation: self,
            num_srcs: 0,
        }
    }

    pub fn set_root(&mut self, node: NodeIndex) {
        self.root = Some(node);
    }

    pub fn root(&self) -> Result<NodeIndex> {
        self.root
            .ok_or_else(|| Error::MalformedGraph(format!("computation `{}` has no root", self.name)))
    }

    pub fn node(&self, id: NodeIndex) -> Result<&Node> {
        self.graph.node_weight(id).ok_or_else(|| {
            Error::MalformedGraph(format!("computation `{}` has no node {id:?}", self.name))
        })
    }

    pub fn value_shape(&self, value: ValueRef) -> Result<&Shape> {
        self.node(value.node)?.shape(value.output)
    }

    /// Incoming edges of a node ordered by operand position.
    pub fn operands(&self, id: NodeIndex) -> Vec<(NodeIndex, Dependency)> {
        self.graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .sorted_by_key(|(_, d)| d.input_order)
            .collect()
    }

    /// Outgoing edges of a node: each consumer with the dependency it reads through.
    pub fn user_edges(&self, id: NodeIndex) -> Vec<(NodeIndex, Dependency)> {
        self.graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .sorted_by_key(|(n, d)| (*n, d.input_order))
            .collect()
    }

    pub fn users(&self, id: NodeIndex) -> Vec<NodeIndex> {
        self.user_edges(id)
            .into_iter()
            .map(|(n, _)| n)
            .dedup()
            .collect()
    }

    /// The values the computation produces. A tuple root produces its operands.
    pub fn outputs(&self) -> Result<Vec<ValueRef>> {
        let root = self.root()?;
        let node = self.node(root)?;
        Ok(match node.op {
            Op::Tuple => self
                .operands(root)
                .into_iter()
                .map(|(src, dep)| ValueRef::new(src, dep.output_order))
                .collect(),
            _ => (0..node.num_outputs() as u8)
                .map(|output| ValueRef::new(root, output))
                .collect(),
        })
    }

    /// Distinct nodes producing the outputs, in output order.
    pub fn roots(&self) -> Result<Vec<NodeIndex>> {
        Ok(self.outputs()?.into_iter().map(|v| v.node).unique().collect())
    }

    /// Nodes with every producer before its consumers.
    pub fn post_order(&self) -> Result<Vec<NodeIndex>> {
        petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            Error::MalformedGraph(format!(
                "computation `{}` has a cycle through {:?}",
                self.name,
                cycle.node_id()
            ))
        })
    }

    fn output_shape(&self, id: NodeIndex, output: u8) -> Shape {
        self.graph[id].shapes[output as usize].clone()
    }

    pub fn parameter(&mut self, name: impl Into<String>, shape: Shape) -> NodeIndex {
        let index = self.parameters.len();
        let id = self.add_op(name, Op::Parameter(index), shape).finish();
        self.parameters.push(id);
        id
    }

    pub fn constant(&mut self, name: impl Into<String>, value: f64, ty: PrimitiveType) -> NodeIndex {
        self.add_op(name, Op::Constant(value), Shape::scalar(ty))
            .finish()
    }

    pub fn iota(&mut self, name: impl Into<String>, shape: Shape, dimension: usize) -> NodeIndex {
        self.add_op(name, Op::Iota { dimension }, shape).finish()
    }

    /// Pointwise op; the result takes the shape of the first operand.
    pub fn elementwise(
        &mut self,
        name: impl Into<String>,
        kind: ElementwiseKind,
        operands: &[NodeIndex],
    ) -> NodeIndex {
        let shape = self.output_shape(operands[0], 0);
        let mut op = self.add_op(name, Op::Elementwise(kind), shape);
        for operand in operands {
            op = op.input(*operand);
        }
        op.finish()
    }

    pub fn copy(&mut self, name: impl Into<String>, operand: NodeIndex) -> NodeIndex {
        let shape = self.output_shape(operand, 0);
        self.add_op(name, Op::Copy, shape).input(operand).finish()
    }

    pub fn bitcast(&mut self, name: impl Into<String>, operand: NodeIndex, shape: Shape) -> NodeIndex {
        self.add_op(name, Op::Bitcast, shape).input(operand).finish()
    }

    pub fn broadcast(
        &mut self,
        name: impl Into<String>,
        operand: NodeIndex,
        shape: Shape,
        dimensions: &[usize],
    ) -> NodeIndex {
        let op = Op::Broadcast {
            dimensions: dimensions.to_vec(),
        };
        self.add_op(name, op, shape).input(operand).finish()
    }

    pub fn reshape(&mut self, name: impl Into<String>, operand: NodeIndex, dims: &[i64]) -> NodeIndex {
        let shape = Shape::new(self.output_shape(operand, 0).element_type(), dims);
        self.add_op(name, Op::Reshape, shape).input(operand).finish()
    }

    pub fn reverse(
        &mut self,
        name: impl Into<String>,
        operand: NodeIndex,
        dimensions: &[usize],
    ) -> NodeIndex {
        let shape = self.output_shape(operand, 0);
        let op = Op::Reverse {
            dimensions: dimensions.to_vec(),
        };
        self.add_op(name, op, shape).input(operand).finish()
    }

    pub fn transpose(
        &mut self,
        name: impl Into<String>,
        operand: NodeIndex,
        permutation: &[usize],
    ) -> NodeIndex {
        let source = self.output_shape(operand, 0);
        let dims = permutation.iter().map(|p| source.dims()[*p]).collect_vec();
        let shape = Shape::new(source.element_type(), &dims);
        let op = Op::Transpose {
            permutation: permutation.to_vec(),
        };
        self.add_op(name, op, shape).input(operand).finish()
    }

    pub fn slice(
        &mut self,
        name: impl Into<String>,
        operand: NodeIndex,
        starts: &[i64],
        limits: &[i64],
        strides: &[i64],
    ) -> NodeIndex {
        let source = self.output_shape(operand, 0);
        let dims = starts
            .iter()
            .zip(limits)
            .zip(strides)
            .map(|((s, l), st)| (l - s + st - 1) / st)
            .collect_vec();
        let op = Op::Slice {
            starts: starts.to_vec(),
            limits: limits.to_vec(),
            strides: strides.to_vec(),
        };
        self.add_op(name, op, Shape::new(source.element_type(), &dims))
            .input(operand)
            .finish()
    }

    /// Reduction over `dimensions`, one result per input.
    pub fn reduce(
        &mut self,
        name: impl Into<String>,
        inputs: &[NodeIndex],
        inits: &[NodeIndex],
        dimensions: &[usize],
        reducer: ComputationId,
    ) -> NodeIndex {
        let shapes = inputs
            .iter()
            .map(|input| {
                let source = self.output_shape(*input, 0);
                let dims = (0..source.rank())
                    .filter(|d| !dimensions.contains(d))
                    .map(|d| source.dims()[d])
                    .collect_vec();
                Shape::new(source.element_type(), &dims)
            })
            .collect_vec();
        let op = Op::Reduce {
            dimensions: dimensions.to_vec(),
            reducer,
        };
        let mut new_op = self.add_multi_output_op(name, op, shapes);
        for operand in inputs.iter().chain(inits) {
            new_op = new_op.input(*operand);
        }
        new_op.finish()
    }

    pub fn tuple(&mut self, name: impl Into<String>, values: &[ValueRef]) -> NodeIndex {
        let shapes = values
            .iter()
            .map(|v| self.output_shape(v.node, v.output))
            .collect_vec();
        let mut op = self.add_multi_output_op(name, Op::Tuple, shapes);
        for value in values {
            op = op.input_output(value.node, value.output);
        }
        op.finish()
    }

    pub fn get_tuple_element(
        &mut self,
        name: impl Into<String>,
        operand: NodeIndex,
        index: usize,
    ) -> NodeIndex {
        let shape = self.output_shape(operand, index as u8);
        self.add_op(name, Op::GetTupleElement { index }, shape)
            .input_output(operand, index as u8)
            .finish()
    }

    pub fn custom_call(
        &mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        operands: &[NodeIndex],
        shape: Shape,
    ) -> NodeIndex {
        let op = Op::CustomCall {
            target: target.into(),
        };
        let mut new_op = self.add_op(name, op, shape);
        for operand in operands {
            new_op = new_op.input(*operand);
        }
        new_op.finish()
    }
}

pub struct NewOp<'a> {
    new_op_id: NodeIndex,
    computation: &'a mut Computation,
    num_srcs: u8,
}

impl<'a> NewOp<'a> {
    pub fn finish(self) -> NodeIndex {
        self.new_op_id
    }

    /// Use the first result of `id` as the next operand.
    pub fn input(self, id: NodeIndex) -> Self {
        self.input_output(id, 0)
    }

    pub fn input_output(mut self, id: NodeIndex, from_output: u8) -> Self {
        self.computation.graph.add_edge(
            id,
            self.new_op_id,
            Dependency {
                input_order: self.num_srcs,
                output_order: from_output,
            },
        );
        self.num_srcs += 1;
        self
    }
}

/// Handle to a computation owned by a [`Fusion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId(usize);

/// A fused computation together with the scalar computations its reductions apply.
#[derive(Debug, Clone)]
pub struct Fusion {
    computations: Vec<Computation>,
}

impl Fusion {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            computations: vec![Computation::new(name)],
        }
    }

    pub fn fused(&self) -> &Computation {
        &self.computations[0]
    }

    pub fn fused_mut(&mut self) -> &mut Computation {
        &mut self.computations[0]
    }

    pub fn add_computation(&mut self, computation: Computation) -> ComputationId {
        self.computations.push(computation);
        ComputationId(self.computations.len() - 1)
    }

    pub fn computation(&self, id: ComputationId) -> Result<&Computation> {
        self.computations
            .get(id.0)
            .ok_or_else(|| Error::MalformedGraph(format!("no computation {id:?}")))
    }

    pub fn name(&self) -> &str {
        self.fused().name()
    }

    pub fn outputs(&self) -> Result<Vec<ValueRef>> {
        self.fused().outputs()
    }

    pub fn roots(&self) -> Result<Vec<NodeIndex>> {
        self.fused().roots()
    }

    pub fn parameters(&self) -> &[NodeIndex] {
        self.fused().parameters()
    }
}
