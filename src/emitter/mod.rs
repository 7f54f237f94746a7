//! Lowers a partitioned loop fusion to an IR module.
//!
//! Every value is emitted at most once per distinct indexing map in each function: the
//! [`EmissionCache`] is consulted before anything is built, so a producer read through equal
//! maps by several consumers is computed once and shared.

mod cache;
mod ir;
mod partition;

pub use cache::*;
pub use ir::*;
pub use partition::*;

use itertools::Itertools;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::prelude::*;

/// Builds the instructions of one function.
struct FunctionBuilder {
    next_value: u32,
    current: Region,
    enclosing: Vec<Region>,
    bindings: FxHashMap<Symbol, ValueId>,
    cache: EmissionCache,
}

impl FunctionBuilder {
    fn new() -> Self {
        Self {
            next_value: 0,
            current: Region::default(),
            enclosing: vec![],
            bindings: FxHashMap::default(),
            cache: EmissionCache::new(),
        }
    }

    fn fresh(&mut self) -> ValueId {
        self.next_value += 1;
        ValueId(self.next_value - 1)
    }

    fn push(&mut self, kind: InstKind, num_results: usize) -> Vec<ValueId> {
        let results = (0..num_results).map(|_| self.fresh()).collect_vec();
        self.current.insts.push(Inst {
            results: results.clone(),
            kind,
        });
        results
    }

    fn push_one(&mut self, kind: InstKind) -> ValueId {
        let result = self.fresh();
        self.current.insts.push(Inst {
            results: vec![result],
            kind,
        });
        result
    }

    /// Opens a nested region. Cache entries made inside it are dropped by [`Self::leave`].
    fn enter(&mut self, args: Vec<ValueId>) {
        let outer = std::mem::replace(
            &mut self.current,
            Region {
                args,
                ..Region::default()
            },
        );
        self.enclosing.push(outer);
        self.cache.push_scope();
    }

    fn leave(&mut self, yields: Vec<ValueId>) -> Region {
        self.cache.pop_scope();
        let outer = self.enclosing.pop().unwrap_or_default();
        let mut region = std::mem::replace(&mut self.current, outer);
        region.yields = yields;
        region
    }

    fn finish(
        mut self,
        name: String,
        params: Vec<(ValueId, Type)>,
        result_types: Vec<Type>,
        returns: Vec<ValueId>,
    ) -> Function {
        self.current.yields = returns;
        Function {
            name,
            params,
            result_types,
            body: self.current,
        }
    }
}

/// Where a function reads fusion parameters from.
enum Inputs {
    /// Whole tensors, indexed per element.
    Tensors(Vec<ValueId>),
    /// One scalar argument per parameter.
    Scalars(Vec<ValueId>),
}

/// Emits the module of one loop fusion: the entry function, one function per partition
/// subgraph and one per reducer computation.
pub struct ModuleEmitter<'a> {
    fusion: &'a Fusion,
    arena: &'a mut ExprArena,
    partition: &'a Partition,
    entry_name: String,
    reducers: Vec<Function>,
    reducer_names: FxHashMap<ComputationId, String>,
}

impl<'a> ModuleEmitter<'a> {
    pub fn new(
        fusion: &'a Fusion,
        arena: &'a mut ExprArena,
        partition: &'a Partition,
        entry_name: impl Into<String>,
    ) -> Self {
        Self {
            fusion,
            arena,
            partition,
            entry_name: entry_name.into(),
            reducers: vec![],
            reducer_names: FxHashMap::default(),
        }
    }

    pub fn emit(mut self, grid: &LaunchGrid) -> Result<Module> {
        let mut functions = vec![self.emit_entry(grid)?];
        for index in 0..self.partition.subgraphs().len() {
            functions.push(self.emit_subgraph(index)?);
        }
        functions.append(&mut self.reducers);
        debug!(
            "Emitted `{}` with {} functions",
            self.entry_name,
            functions.len()
        );
        Ok(Module { functions })
    }

    fn input_params(&self, builder: &mut FunctionBuilder) -> Result<Vec<(ValueId, Type)>> {
        let fused = self.fusion.fused();
        fused
            .parameters()
            .iter()
            .map(|p| {
                let shape = fused.node(*p)?.shape(0)?.clone();
                Ok((builder.fresh(), Type::Tensor(shape)))
            })
            .collect()
    }

    /// Reads launch coordinates, then for every in-bounds element calls each root's function
    /// and inserts the results into the output tensors.
    fn emit_entry(&mut self, grid: &LaunchGrid) -> Result<Function> {
        let fused = self.fusion.fused();
        let outputs = fused.outputs()?;
        let mut builder = FunctionBuilder::new();
        let mut params = self.input_params(&mut builder)?;
        let inputs = params.iter().map(|(v, _)| *v).collect_vec();
        let mut result_types = vec![];
        let mut tensors = vec![];
        for output in &outputs {
            let ty = Type::Tensor(fused.value_shape(*output)?.clone());
            let tensor = builder.fresh();
            params.push((tensor, ty.clone()));
            result_types.push(ty);
            tensors.push(tensor);
        }

        let dimensions = grid.dimensions();
        for (axis, (threads, blocks)) in [Axis::X, Axis::Y, Axis::Z].into_iter().zip(
            dimensions
                .thread_counts
                .iter()
                .zip(&dimensions.block_counts),
        ) {
            let index = axis as usize;
            if *threads > 1 {
                let id = builder.push_one(InstKind::ThreadId(axis));
                builder.bindings.insert(Symbol::Dim(index), id);
            }
            if *blocks > 1 {
                let id = builder.push_one(InstKind::BlockId(axis));
                builder.bindings.insert(Symbol::Dim(3 + index), id);
            }
        }

        // Chunk and unroll ids with more than one value become loop induction variables.
        let loop_params = grid
            .param_ranges()
            .into_iter()
            .enumerate()
            .filter(|(_, range)| range.size() > 1)
            .collect_vec();
        let carried = if loop_params.is_empty() {
            None
        } else {
            let ivs = loop_params.iter().map(|_| builder.fresh()).collect_vec();
            let args = tensors.iter().map(|_| builder.fresh()).collect_vec();
            for ((param, _), iv) in loop_params.iter().zip(&ivs) {
                builder.bindings.insert(Symbol::Param(*param), *iv);
            }
            builder.enter(ivs.into_iter().chain(args.iter().copied()).collect());
            Some(std::mem::replace(&mut tensors, args))
        };

        let root_maps = outputs
            .iter()
            .map(|output| {
                let shape = fused.value_shape(*output)?;
                grid.thread_id_to_output_indexing(shape, self.arena)
            })
            .collect::<Result<Vec<_>>>()?;
        let constraints = root_maps
            .first()
            .map(|m| m.constraints().to_vec())
            .unwrap_or_default();

        let mut function = FunctionEmitter {
            emitter: self,
            computation: fused,
            builder,
            inputs: Inputs::Tensors(inputs),
            subgraph: None,
        };
        let written = if constraints.is_empty() {
            function.write_outputs(&outputs, &root_maps, tensors)?
        } else {
            let condition = function.emit_domain_check(&constraints)?;
            function.builder.enter(vec![]);
            let updated = function.write_outputs(&outputs, &root_maps, tensors.clone())?;
            let then_region = function.builder.leave(updated);
            function.builder.enter(vec![]);
            let else_region = function.builder.leave(tensors);
            function.builder.push(
                InstKind::If {
                    condition,
                    then_region,
                    else_region,
                },
                outputs.len(),
            )
        };
        let mut builder = function.builder;
        let returns = match carried {
            Some(inits) => {
                let body = builder.leave(written);
                let ranges = loop_params.iter().map(|(_, range)| *range).collect();
                builder.push(
                    InstKind::Loop {
                        ranges,
                        inits,
                        body,
                    },
                    outputs.len(),
                )
            }
            None => written,
        };
        Ok(builder.finish(self.entry_name.clone(), params, result_types, returns))
    }

    /// Function of partition subgraph `index`: fusion inputs then root coordinates in, every
    /// result of the root out.
    fn emit_subgraph(&mut self, index: usize) -> Result<Function> {
        let subgraph = &self.partition.subgraphs()[index];
        let fused = self.fusion.fused();
        let root = fused.node(subgraph.root)?;
        let mut builder = FunctionBuilder::new();
        let mut params = self.input_params(&mut builder)?;
        let inputs = params.iter().map(|(v, _)| *v).collect_vec();
        let dims = root.shape(0)?.dims().to_vec();
        for i in 0..dims.len() {
            let coordinate = builder.fresh();
            builder.bindings.insert(Symbol::Dim(i), coordinate);
            params.push((coordinate, Type::Index));
        }
        let map = IndexingMap::identity(self.arena, &dims);
        let result_types = root
            .shapes
            .iter()
            .map(|s| Type::Scalar(s.element_type()))
            .collect_vec();
        let name = subgraph.function_name.clone();

        let mut function = FunctionEmitter {
            emitter: self,
            computation: fused,
            builder,
            inputs: Inputs::Tensors(inputs),
            subgraph: Some(index),
        };
        let returns = (0..root.num_outputs() as u8)
            .map(|output| function.emit_value(ValueRef::new(subgraph.root, output), &map))
            .collect::<Result<Vec<_>>>()?;
        Ok(function.builder.finish(name, params, result_types, returns))
    }

    /// Name of the function applying reducer `id`, emitting it on first use.
    fn reducer_function(&mut self, id: ComputationId) -> Result<String> {
        if let Some(name) = self.reducer_names.get(&id) {
            return Ok(name.clone());
        }
        let computation = self.fusion.computation(id)?;
        let root = computation.node(computation.root()?)?;
        let name = format!("{}_{}", computation.name(), sanitize(&root.name));
        self.reducer_names.insert(id, name.clone());

        let mut builder = FunctionBuilder::new();
        let mut params = vec![];
        for p in computation.parameters() {
            let ty = computation.node(*p)?.shape(0)?.element_type();
            params.push((builder.fresh(), Type::Scalar(ty)));
        }
        let outputs = computation.outputs()?;
        let result_types = outputs
            .iter()
            .map(|o| Ok(Type::Scalar(computation.value_shape(*o)?.element_type())))
            .collect::<Result<Vec<_>>>()?;
        let scalars = params.iter().map(|(v, _)| *v).collect_vec();
        let mut function = FunctionEmitter {
            emitter: self,
            computation,
            builder,
            inputs: Inputs::Scalars(scalars),
            subgraph: None,
        };
        let map = IndexingMap::scalar();
        let returns = outputs
            .iter()
            .map(|output| function.emit_value(*output, &map))
            .collect::<Result<Vec<_>>>()?;
        let reducer = function
            .builder
            .finish(name.clone(), params, result_types, returns);
        self.reducers.push(reducer);
        Ok(name)
    }
}

/// Emission state of the function being built.
struct FunctionEmitter<'e, 'a> {
    emitter: &'e mut ModuleEmitter<'a>,
    computation: &'a Computation,
    builder: FunctionBuilder,
    inputs: Inputs,
    /// Partition subgraph whose function this is.
    subgraph: Option<usize>,
}

impl<'e, 'a> FunctionEmitter<'e, 'a> {
    fn binding(&self, symbol: Symbol) -> Result<ValueId> {
        self.builder.bindings.get(&symbol).copied().ok_or_else(|| {
            Error::MalformedExpression(format!(
                "{symbol:?} has no value in `{}`",
                self.computation.name()
            ))
        })
    }

    /// Materializes an index expression over the bound launch or function coordinates.
    fn emit_index(&mut self, expr: ExprId) -> Result<ValueId> {
        if let Some(id) = self.builder.cache.index(expr) {
            return Ok(id);
        }
        let arena = &*self.emitter.arena;
        if let Some(symbol) = arena.as_symbol(expr) {
            return self.binding(symbol);
        }
        let symbols = arena.symbols(expr).into_iter().collect_vec();
        let operands = symbols
            .iter()
            .map(|s| self.binding(*s))
            .collect::<Result<Vec<_>>>()?;
        let map = format!(
            "{} -> ({})",
            symbol_list(symbols.len()),
            arena.render(expr, &|s| local_name(&symbols, s))
        );
        let id = self.builder.push_one(InstKind::Apply { map, operands });
        self.builder.cache.insert_index(expr, id);
        Ok(id)
    }

    /// A boolean telling whether the bound launch coordinates satisfy `constraints`.
    fn emit_domain_check(&mut self, constraints: &[(ExprId, Interval)]) -> Result<ValueId> {
        let arena = &*self.emitter.arena;
        let symbols = constraints
            .iter()
            .flat_map(|(expr, _)| arena.symbols(*expr))
            .sorted()
            .dedup()
            .collect_vec();
        let operands = symbols
            .iter()
            .map(|s| self.binding(*s))
            .collect::<Result<Vec<_>>>()?;
        let constraints = format!(
            "{} : ({})",
            symbol_list(symbols.len()),
            constraints
                .iter()
                .map(|(expr, range)| format!(
                    "{} in {range}",
                    arena.render(*expr, &|s| local_name(&symbols, s))
                ))
                .join(", ")
        );
        Ok(self.builder.push_one(InstKind::CheckDomain {
            constraints,
            operands,
        }))
    }

    /// Calls each root's function at the element's output coordinates and inserts the
    /// results into `tensors`, returning the updated tensors.
    fn write_outputs(
        &mut self,
        outputs: &[ValueRef],
        root_maps: &[IndexingMap],
        mut tensors: Vec<ValueId>,
    ) -> Result<Vec<ValueId>> {
        for (slot, (output, map)) in outputs.iter().zip(root_maps).enumerate() {
            let scalar = self.emit_value(*output, map)?;
            let indices = map
                .results()
                .iter()
                .map(|r| self.emit_index(*r))
                .collect::<Result<Vec<_>>>()?;
            tensors[slot] = self.builder.push_one(InstKind::Insert {
                scalar,
                tensor: tensors[slot],
                indices,
            });
        }
        Ok(tensors)
    }

    /// Element `map` of `value`, reusing an earlier emission of the same value and map.
    fn emit_value(&mut self, value: ValueRef, map: &IndexingMap) -> Result<ValueId> {
        if let Some(id) = self.builder.cache.value(value, map) {
            return Ok(id);
        }
        let results = match self.callee(value.node) {
            Some(callee) => self.emit_call(value.node, callee, map)?,
            None => self.emit_node(value, map)?,
        };
        for (output, id) in &results {
            self.builder
                .cache
                .insert_value(ValueRef::new(value.node, *output), map.clone(), *id);
        }
        results
            .iter()
            .find(|(output, _)| *output == value.output)
            .map(|(_, id)| *id)
            .ok_or_else(|| {
                Error::MalformedGraph(format!(
                    "no result {} for node {:?} in `{}`",
                    value.output,
                    value.node,
                    self.computation.name()
                ))
            })
    }

    /// The function to call for `node`, when another partition subgraph computes it.
    fn callee(&self, node: NodeIndex) -> Option<String> {
        let subgraph = self.emitter.partition.rooted_at(node)?;
        if matches!(self.inputs, Inputs::Scalars(_))
            || self.emitter.partition.owner(node) == self.subgraph
        {
            return None;
        }
        Some(subgraph.function_name.clone())
    }

    fn emit_call(
        &mut self,
        node_id: NodeIndex,
        callee: String,
        map: &IndexingMap,
    ) -> Result<Vec<(u8, ValueId)>> {
        let num_outputs = self.computation.node(node_id)?.num_outputs();
        let mut args = match &self.inputs {
            Inputs::Tensors(tensors) => tensors.clone(),
            Inputs::Scalars(_) => vec![],
        };
        for result in map.results() {
            args.push(self.emit_index(*result)?);
        }
        let results = self
            .builder
            .push(InstKind::Call { callee, args }, num_outputs);
        Ok((0..num_outputs as u8).zip(results).collect())
    }

    /// Operand `position` of `node_id`, read at the operand coordinates of element `map`.
    fn emit_operand(
        &mut self,
        node_id: NodeIndex,
        output: u8,
        position: usize,
        map: &IndexingMap,
    ) -> Result<ValueId> {
        let operands = self.computation.operands(node_id);
        let Some(&(source, dependency)) = operands.get(position) else {
            return Err(Error::UnreachableOperand {
                node: self.computation.node(node_id)?.name.clone(),
                index: position,
                count: operands.len(),
            });
        };
        let operand_map = compute_operand_indexing(
            self.computation,
            node_id,
            output,
            position,
            map,
            self.emitter.arena,
        )?
        .ok_or_else(|| {
            Error::MalformedGraph(format!(
                "result {output} of {node_id:?} doesn't read operand {position}"
            ))
        })?;
        self.emit_value(ValueRef::new(source, dependency.output_order), &operand_map)
    }

    fn emit_node(&mut self, value: ValueRef, map: &IndexingMap) -> Result<Vec<(u8, ValueId)>> {
        let node = self.computation.node(value.node)?;
        let element_type = node.shape(value.output)?.element_type();
        let id = match &node.op {
            Op::Parameter(index) => self.emit_parameter(*index, map)?,
            Op::Constant(constant) => self.builder.push_one(InstKind::Constant {
                value: *constant,
                ty: element_type,
            }),
            Op::Iota { dimension } => {
                let coordinate = map.results().get(*dimension).copied().ok_or_else(|| {
                    Error::MalformedGraph(format!(
                        "iota `{}` has no dimension {dimension}",
                        node.name
                    ))
                })?;
                let index = self.emit_index(coordinate)?;
                self.builder.push_one(InstKind::IndexCast {
                    value: index,
                    ty: element_type,
                })
            }
            Op::Elementwise(kind) => {
                let operands = (0..kind.arity())
                    .map(|position| self.emit_operand(value.node, 0, position, map))
                    .collect::<Result<Vec<_>>>()?;
                self.builder.push_one(InstKind::Elementwise {
                    kind: *kind,
                    ty: element_type,
                    operands,
                })
            }
            Op::Bitcast => {
                let operand = self.emit_operand(value.node, 0, 0, map)?;
                let (source, dependency) = self.computation.operands(value.node)[0];
                let source_type = self
                    .computation
                    .value_shape(ValueRef::new(source, dependency.output_order))?
                    .element_type();
                if source_type == element_type {
                    operand
                } else {
                    self.builder.push_one(InstKind::Bitcast {
                        value: operand,
                        ty: element_type,
                    })
                }
            }
            Op::Copy
            | Op::Broadcast { .. }
            | Op::Reshape
            | Op::Reverse { .. }
            | Op::Transpose { .. }
            | Op::Slice { .. }
            | Op::GetTupleElement { .. } => self.emit_operand(value.node, value.output, 0, map)?,
            Op::Tuple => {
                let position = value.output as usize;
                self.emit_operand(value.node, value.output, position, map)?
            }
            Op::Reduce { reducer, .. } => return self.emit_reduce(value.node, *reducer, map),
            Op::CustomCall { target } => {
                return Err(Error::Unsupported(format!(
                    "can't emit custom call `{}` targeting `{target}`",
                    node.name
                )))
            }
        };
        Ok(vec![(value.output, id)])
    }

    fn emit_parameter(&mut self, index: usize, map: &IndexingMap) -> Result<ValueId> {
        let (values, is_tensor) = match &self.inputs {
            Inputs::Tensors(tensors) => (tensors, true),
            Inputs::Scalars(scalars) => (scalars, false),
        };
        let value = values
            .get(index)
            .copied()
            .ok_or(Error::UnreachableParameter {
                index,
                count: values.len(),
            })?;
        if !is_tensor {
            return Ok(value);
        }
        let indices = map
            .results()
            .iter()
            .map(|r| self.emit_index(*r))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.builder.push_one(InstKind::Extract {
            tensor: value,
            indices,
        }))
    }

    /// Loops over the reduced dimensions, folding every input into the accumulators with the
    /// reducer. Accumulators come before inputs in the reducer's arguments.
    fn emit_reduce(
        &mut self,
        node_id: NodeIndex,
        reducer: ComputationId,
        map: &IndexingMap,
    ) -> Result<Vec<(u8, ValueId)>> {
        let num_outputs = self.computation.node(node_id)?.num_outputs();
        let operands = self.computation.operands(node_id);
        let inits = (0..num_outputs)
            .map(|k| self.emit_operand(node_id, 0, num_outputs + k, map))
            .collect::<Result<Vec<_>>>()?;
        let input_maps = (0..num_outputs)
            .map(|k| {
                compute_operand_indexing(self.computation, node_id, 0, k, map, self.emitter.arena)?
                    .ok_or_else(|| {
                        Error::MalformedGraph(format!("{node_id:?} doesn't read input {k}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let ranges = input_maps
            .first()
            .map(|m| m.param_ranges()[map.param_count()..].to_vec())
            .unwrap_or_default();
        let callee = self.emitter.reducer_function(reducer)?;

        let ivs = ranges.iter().map(|_| self.builder.fresh()).collect_vec();
        let accumulators = if ranges.is_empty() {
            inits.clone()
        } else {
            let carried = inits.iter().map(|_| self.builder.fresh()).collect_vec();
            self.builder
                .enter(ivs.iter().chain(&carried).copied().collect());
            for (q, iv) in ivs.iter().enumerate() {
                self.builder
                    .bindings
                    .insert(Symbol::Param(map.param_count() + q), *iv);
            }
            carried
        };
        let mut args = accumulators;
        for (input_map, (source, dependency)) in input_maps.iter().zip(&operands) {
            args.push(self.emit_value(ValueRef::new(*source, dependency.output_order), input_map)?);
        }
        let folded = self.builder.push(InstKind::Call { callee, args }, num_outputs);
        let results = if ranges.is_empty() {
            folded
        } else {
            let body = self.builder.leave(folded);
            for q in 0..ivs.len() {
                self.builder
                    .bindings
                    .remove(&Symbol::Param(map.param_count() + q));
            }
            self.builder.push(
                InstKind::Loop {
                    ranges,
                    inits,
                    body,
                },
                num_outputs,
            )
        };
        Ok((0..num_outputs as u8).zip(results).collect())
    }
}

fn symbol_list(count: usize) -> String {
    format!("()[{}]", (0..count).map(|i| format!("s{i}")).join(", "))
}

fn local_name(symbols: &[Symbol], symbol: Symbol) -> String {
    match symbols.iter().position(|s| *s == symbol) {
        Some(i) => format!("s{i}"),
        None => format!("{symbol:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(fusion: &Fusion, entry: &str) -> Module {
        let mut arena = ExprArena::new();
        LoopFusion::new(fusion, &DeviceInfo::default())
            .unwrap()
            .create_module(entry, &mut arena)
            .unwrap()
    }

    #[test]
    fn test_shared_value_is_emitted_once() {
        let mut fusion = Fusion::new("fused");
        let cx = fusion.fused_mut();
        let p = cx.parameter("p0", Shape::new(PrimitiveType::F32, &[100]));
        let exp = cx.elementwise("exp", ElementwiseKind::Exp, &[p]);
        let mul = cx.elementwise("mul", ElementwiseKind::Multiply, &[exp, exp]);
        cx.set_root(mul);

        let module = emit(&fusion, "fused");
        assert_eq!(module.count("math.exp"), 1);
        assert_eq!(module.count("tensor.extract"), 1);
        assert_eq!(module.function_names(), vec!["fused", "fused_mul"]);
        let body = module.function("fused_mul").unwrap();
        assert_eq!(
            body.mnemonics(),
            vec!["tensor.extract", "math.exp", "arith.mulf"]
        );
    }

    #[test]
    fn test_entry_guards_partial_blocks() {
        let mut fusion = Fusion::new("fused");
        let cx = fusion.fused_mut();
        let p = cx.parameter("p0", Shape::new(PrimitiveType::F32, &[300]));
        let neg = cx.elementwise("neg", ElementwiseKind::Negate, &[p]);
        cx.set_root(neg);

        let module = emit(&fusion, "fused");
        let entry = module.function("fused").unwrap();
        assert_eq!(
            entry.mnemonics(),
            vec![
                "gpu.thread_id",
                "gpu.block_id",
                "indexing.check_domain",
                "scf.if",
                "affine.apply",
                "func.call",
                "tensor.insert",
            ]
        );
        let text = module.to_string();
        assert!(text.contains("affine_set<()[s0, s1] : (s0 + s1 * 128 in [0, 299])>"));
        assert!(text.contains("func.func @fused_neg(%0: tensor<300xf32>, %1: index) -> (f32) {"));
    }

    #[test]
    fn test_scalar_broadcast_reads_once() {
        let mut fusion = Fusion::new("fused");
        let cx = fusion.fused_mut();
        let p = cx.parameter("p0", Shape::new(PrimitiveType::F32, &[4, 8]));
        let c = cx.constant("c", 2.0, PrimitiveType::F32);
        let b = cx.broadcast("b", c, Shape::new(PrimitiveType::F32, &[4, 8]), &[]);
        let mul = cx.elementwise("mul", ElementwiseKind::Multiply, &[p, b]);
        cx.set_root(mul);

        let module = emit(&fusion, "fused");
        assert_eq!(module.count("arith.constant"), 1);
        let body = module.function("fused_mul").unwrap().to_string();
        assert!(body.contains("arith.constant 2.0 : f32"));
        assert!(body.contains("tensor.extract %0[%1, %2]"));
    }
}
