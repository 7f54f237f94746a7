use tracing::debug;

use crate::prelude::*;

/// Lowers one loop fusion: every thread of a one dimensional grid computes one element of
/// each fusion output.
#[derive(Debug)]
pub struct LoopFusion<'a> {
    fusion: &'a Fusion,
    device: DeviceInfo,
    config: LaunchConfig,
    grid: LaunchGrid,
}

impl<'a> LoopFusion<'a> {
    /// Picks the launch configuration from the fusion's contents and size.
    pub fn new(fusion: &'a Fusion, device: &DeviceInfo) -> Result<Self> {
        let config = launch_config(fusion, device)?;
        Self::with_config(fusion, device, config)
    }

    pub fn with_config(
        fusion: &'a Fusion,
        device: &DeviceInfo,
        config: LaunchConfig,
    ) -> Result<Self> {
        let num_elements = output_elements(fusion)?;
        let grid = LaunchGrid::new(num_elements, &config, device)?;
        Ok(Self {
            fusion,
            device: device.clone(),
            config,
            grid,
        })
    }

    pub fn fusion(&self) -> &Fusion {
        self.fusion
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn launch_grid(&self) -> &LaunchGrid {
        &self.grid
    }

    pub fn launch_dimensions(&self) -> &LaunchDimensions {
        self.grid.dimensions()
    }

    fn output(&self, root_index: usize) -> Result<ValueRef> {
        let outputs = self.fusion.outputs()?;
        outputs
            .get(root_index)
            .copied()
            .ok_or(Error::UnreachableRoot {
                index: root_index,
                count: outputs.len(),
            })
    }

    /// Launch coordinates to the coordinates of output `root_index`.
    pub fn compute_thread_id_to_output_indexing(
        &self,
        root_index: usize,
        arena: &mut ExprArena,
    ) -> Result<IndexingMap> {
        let output = self.output(root_index)?;
        let shape = self.fusion.fused().value_shape(output)?;
        self.grid.thread_id_to_output_indexing(shape, arena)
    }

    /// Launch coordinates to the coordinates of operand `operand_index` of the node
    /// producing output `root_index`.
    pub fn compute_thread_id_to_input_indexing(
        &self,
        root_index: usize,
        operand_index: usize,
        arena: &mut ExprArena,
    ) -> Result<IndexingMap> {
        let output = self.output(root_index)?;
        let fused = self.fusion.fused();
        let operand_count = fused.operands(output.node).len();
        if operand_index >= operand_count {
            return Err(Error::UnreachableOperand {
                node: fused.node(output.node)?.name.clone(),
                index: operand_index,
                count: operand_count,
            });
        }
        let output_map = self.compute_thread_id_to_output_indexing(root_index, arena)?;
        compute_operand_indexing(
            fused,
            output.node,
            output.output,
            operand_index,
            &output_map,
            arena,
        )?
        .ok_or_else(|| {
            Error::Unsupported(format!(
                "output {root_index} doesn't read operand {operand_index}"
            ))
        })
    }

    /// Every distinct launch map of every value in the fused computation.
    pub fn propagate(&self, arena: &mut ExprArena) -> Result<IndexingPropagation> {
        let fused = self.fusion.fused();
        let seeds = fused
            .outputs()?
            .into_iter()
            .map(|output| {
                let shape = fused.value_shape(output)?;
                Ok((output, self.grid.thread_id_to_output_indexing(shape, arena)?))
            })
            .collect::<Result<Vec<_>>>()?;
        IndexingPropagation::new(fused, seeds, arena)
    }

    /// The distinct launch maps through which the fusion reads parameter `index`.
    pub fn compute_thread_id_to_parameter_indexing(
        &self,
        index: usize,
        arena: &mut ExprArena,
    ) -> Result<Vec<IndexingMap>> {
        let parameters = self.fusion.parameters();
        let parameter = parameters
            .get(index)
            .copied()
            .ok_or(Error::UnreachableParameter {
                index,
                count: parameters.len(),
            })?;
        Ok(self
            .propagate(arena)?
            .maps(ValueRef::from(parameter))
            .to_vec())
    }

    /// Builds the module computing the fusion, with `entry_name` as its entry function.
    pub fn create_module(&self, entry_name: &str, arena: &mut ExprArena) -> Result<Module> {
        let fused = self.fusion.fused();
        let propagation = self.propagate(arena)?;
        let partition = Partition::new(fused, entry_name, &propagation, arena)?;
        debug!(
            "Emitting `{}` as `{entry_name}`: {} blocks x {} threads",
            self.fusion.name(),
            self.grid.dimensions().num_blocks(),
            self.grid.dimensions().num_threads_per_block()
        );
        ModuleEmitter::new(self.fusion, arena, &partition, entry_name).emit(&self.grid)
    }
}

/// All outputs of a loop fusion must have the same number of elements.
fn output_elements(fusion: &Fusion) -> Result<i64> {
    let fused = fusion.fused();
    let outputs = fusion.outputs()?;
    let mut counts = vec![];
    for output in &outputs {
        counts.push(fused.value_shape(*output)?.num_elements());
    }
    match counts.first() {
        None => Err(Error::Unsupported(format!(
            "fusion `{}` has no outputs",
            fusion.name()
        ))),
        Some(first) if counts.iter().any(|c| c != first) => Err(Error::Unsupported(format!(
            "outputs of `{}` have different element counts {counts:?}",
            fusion.name()
        ))),
        Some(first) => Ok(*first),
    }
}

/// Unrolls large fusions without reductions, and caps the grid at one wave of resident
/// threads when every element costs about the same.
fn launch_config(fusion: &Fusion, device: &DeviceInfo) -> Result<LaunchConfig> {
    let fused = fusion.fused();
    let num_elements = output_elements(fusion)?;
    let graph = fused.graph();
    let mut has_reduction = false;
    let mut uniform_cost = true;
    for id in graph.node_indices() {
        let node = fused.node(id)?;
        match &node.op {
            Op::Reduce { .. } | Op::CustomCall { .. } => {
                has_reduction = true;
                uniform_cost = false;
            }
            Op::Parameter(_)
            | Op::Constant(_)
            | Op::Elementwise(_)
            | Op::Copy
            | Op::Bitcast
            | Op::Tuple => {}
            Op::Broadcast { .. } => {
                let scalar_operand = fused
                    .operands(id)
                    .iter()
                    .all(|(src, dep)| {
                        fused
                            .value_shape(ValueRef::new(*src, dep.output_order))
                            .map(|s| s.is_scalar())
                            .unwrap_or(false)
                    });
                uniform_cost &= scalar_operand;
            }
            _ => uniform_cost = false,
        }
    }
    let unroll_factor = if !has_reduction && num_elements >= device.resident_threads() {
        [4, 2]
            .into_iter()
            .find(|factor| num_elements % factor == 0)
            .unwrap_or(1)
    } else {
        1
    };
    Ok(LaunchConfig::default()
        .with_unroll_factor(unroll_factor)
        .with_few_waves(uniform_cost))
}
