//! The GPU launch grid of a loop fusion and the map from launch coordinates to output
//! elements.

use tracing::debug;

use crate::indexing::extents;
use crate::prelude::*;

pub const THREAD_X: Symbol = Symbol::Dim(0);
pub const THREAD_Y: Symbol = Symbol::Dim(1);
pub const THREAD_Z: Symbol = Symbol::Dim(2);
pub const BLOCK_X: Symbol = Symbol::Dim(3);
pub const BLOCK_Y: Symbol = Symbol::Dim(4);
pub const BLOCK_Z: Symbol = Symbol::Dim(5);
pub const CHUNK_ID: Symbol = Symbol::Param(0);
pub const UNROLL_ID: Symbol = Symbol::Param(1);

pub const LAUNCH_DIM_NAMES: [&str; 6] = ["th_x", "th_y", "th_z", "bl_x", "bl_y", "bl_z"];
pub const LAUNCH_PARAM_NAMES: [&str; 2] = ["chunk_id", "unroll_id"];

/// Limits of the device a kernel launches on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub core_count: i64,
    pub threads_per_block_limit: i64,
    pub threads_per_core_limit: i64,
    pub block_dim_limit: [i64; 3],
}

impl DeviceInfo {
    pub fn rtx_a6000() -> Self {
        Self {
            name: "NVIDIA RTX A6000".to_string(),
            core_count: 84,
            threads_per_block_limit: 1024,
            threads_per_core_limit: 1536,
            block_dim_limit: [2_147_483_647, 65535, 65535],
        }
    }

    /// Threads the whole device keeps resident at once.
    pub fn resident_threads(&self) -> i64 {
        self.core_count * self.threads_per_core_limit
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::rtx_a6000()
    }
}

/// Launch heuristics chosen for a fusion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Consecutive elements each thread handles per chunk.
    pub unroll_factor: i64,
    /// Cap the grid at what the device keeps resident and loop over chunks instead.
    pub few_waves: bool,
    pub threads_per_block: i64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            unroll_factor: 1,
            few_waves: false,
            threads_per_block: 128,
        }
    }
}

impl LaunchConfig {
    pub fn with_unroll_factor(mut self, unroll_factor: i64) -> Self {
        self.unroll_factor = unroll_factor;
        self
    }

    pub fn with_few_waves(mut self, few_waves: bool) -> Self {
        self.few_waves = few_waves;
        self
    }

    pub fn with_threads_per_block(mut self, threads_per_block: i64) -> Self {
        self.threads_per_block = threads_per_block;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDimensions {
    pub block_counts: [i64; 3],
    pub thread_counts: [i64; 3],
}

impl LaunchDimensions {
    pub fn num_blocks(&self) -> i64 {
        self.block_counts.iter().product()
    }

    pub fn num_threads_per_block(&self) -> i64 {
        self.thread_counts.iter().product()
    }
}

/// A one dimensional grid covering `num_elements` elements. Each thread handles
/// `unroll_factor` consecutive elements in each of `chunk_count` chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchGrid {
    dimensions: LaunchDimensions,
    chunk_count: i64,
    unroll_factor: i64,
    num_elements: i64,
}

impl LaunchGrid {
    pub fn new(num_elements: i64, config: &LaunchConfig, device: &DeviceInfo) -> Result<Self> {
        if num_elements < 0 {
            return Err(Error::InvalidLaunchConfig(format!(
                "can't launch over {num_elements} elements"
            )));
        }
        if config.unroll_factor < 1 {
            return Err(Error::InvalidLaunchConfig(format!(
                "unroll factor must be positive, got {}",
                config.unroll_factor
            )));
        }
        if config.threads_per_block < 1 || device.threads_per_block_limit < 1 {
            return Err(Error::InvalidLaunchConfig(format!(
                "{} threads per block on {} (limit {})",
                config.threads_per_block, device.name, device.threads_per_block_limit
            )));
        }
        let unroll_factor = config.unroll_factor;
        let threads_needed = ceil_div(num_elements.max(1), unroll_factor);
        let threads_per_block = config
            .threads_per_block
            .min(device.threads_per_block_limit)
            .min(threads_needed);
        let scheduled_threads = if config.few_waves {
            threads_needed.min(device.resident_threads().max(threads_per_block))
        } else {
            threads_needed
        };
        let block_count = ceil_div(scheduled_threads, threads_per_block)
            .min(device.block_dim_limit[0])
            .max(1);
        let chunk_count = ceil_div(threads_needed, threads_per_block * block_count);
        debug!(
            "Launch grid for {num_elements} elements: {block_count} blocks x {threads_per_block} threads, {chunk_count} chunks, unroll {unroll_factor}"
        );
        Ok(Self {
            dimensions: LaunchDimensions {
                block_counts: [block_count, 1, 1],
                thread_counts: [threads_per_block, 1, 1],
            },
            chunk_count,
            unroll_factor,
            num_elements,
        })
    }

    pub fn dimensions(&self) -> &LaunchDimensions {
        &self.dimensions
    }

    pub fn chunk_count(&self) -> i64 {
        self.chunk_count
    }

    pub fn unroll_factor(&self) -> i64 {
        self.unroll_factor
    }

    pub fn num_elements(&self) -> i64 {
        self.num_elements
    }

    /// `th_x, th_y, th_z, bl_x, bl_y, bl_z`
    pub fn dim_ranges(&self) -> Vec<Interval> {
        let counts = self
            .dimensions
            .thread_counts
            .iter()
            .chain(&self.dimensions.block_counts)
            .copied()
            .collect::<Vec<_>>();
        extents(&counts)
    }

    /// `chunk_id, unroll_id`
    pub fn param_ranges(&self) -> Vec<Interval> {
        extents(&[self.chunk_count, self.unroll_factor])
    }

    /// The element a thread handles:
    /// `th_x * u + bl_x * tpb * u + chunk_id * blocks * tpb * u + unroll_id`.
    pub fn linear_index(&self, arena: &mut ExprArena) -> ExprId {
        let threads = self.dimensions.thread_counts[0];
        let blocks = self.dimensions.block_counts[0];
        let unroll = self.unroll_factor;
        let mut terms = vec![];
        for (symbol, extent, stride) in [
            (THREAD_X, threads, unroll),
            (BLOCK_X, blocks, threads * unroll),
            (CHUNK_ID, self.chunk_count, blocks * threads * unroll),
            (UNROLL_ID, unroll, 1),
        ] {
            if extent > 1 {
                terms.push((arena.symbol(symbol), stride));
            }
        }
        arena.linear(terms, 0)
    }

    /// Decomposes the linear index into coordinates of `shape`, walking its layout from the
    /// most minor dimension. Threads past the last element are cut off by a constraint.
    pub fn thread_id_to_output_indexing(
        &self,
        shape: &Shape,
        arena: &mut ExprArena,
    ) -> Result<IndexingMap> {
        shape.validate()?;
        if shape.num_elements() != self.num_elements {
            return Err(Error::MalformedGraph(format!(
                "launch grid covers {} elements but {shape} has {}",
                self.num_elements,
                shape.num_elements()
            )));
        }
        let linear = self.linear_index(arena);
        let mut results = vec![arena.constant(0); shape.rank()];
        let mut stride = 1;
        for dim in shape.minor_to_major() {
            let size = shape.dims()[*dim].max(1);
            let major = arena.floor_div(linear, stride)?;
            results[*dim] = arena.modulo(major, size)?;
            stride *= size;
        }
        let constraints = vec![(linear, Interval::extent(self.num_elements))];
        Ok(IndexingMap::new(
            self.dim_ranges(),
            self.param_ranges(),
            results,
            constraints,
        )
        .simplify(arena))
    }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_grid() {
        let grid = LaunchGrid::new(20, &LaunchConfig::default(), &DeviceInfo::default()).unwrap();
        assert_eq!(grid.dimensions().thread_counts, [20, 1, 1]);
        assert_eq!(grid.dimensions().block_counts, [1, 1, 1]);
        assert_eq!(grid.chunk_count(), 1);
    }

    #[test]
    fn test_few_waves_caps_blocks() {
        let config = LaunchConfig::default()
            .with_few_waves(true)
            .with_unroll_factor(4);
        let grid = LaunchGrid::new(6_000_000, &config, &DeviceInfo::default()).unwrap();
        assert_eq!(grid.dimensions().num_blocks(), 1008);
        assert_eq!(grid.dimensions().num_threads_per_block(), 128);
        assert_eq!(grid.chunk_count(), 12);

        let uncapped = LaunchGrid::new(
            6_000_000,
            &config.with_few_waves(false),
            &DeviceInfo::default(),
        )
        .unwrap();
        assert_eq!(uncapped.dimensions().num_blocks(), 11719);
        assert_eq!(uncapped.chunk_count(), 1);
    }

    #[test]
    fn test_invalid_config() {
        let device = DeviceInfo::default();
        let config = LaunchConfig::default().with_unroll_factor(0);
        assert!(matches!(
            LaunchGrid::new(10, &config, &device),
            Err(Error::InvalidLaunchConfig(_))
        ));
        assert!(matches!(
            LaunchGrid::new(-1, &LaunchConfig::default(), &device),
            Err(Error::InvalidLaunchConfig(_))
        ));
    }

    #[test]
    fn test_column_major_output() {
        let mut arena = ExprArena::new();
        let shape = Shape::new(PrimitiveType::F32, &[4, 8]).with_layout(&[0, 1]);
        let grid = LaunchGrid::new(32, &LaunchConfig::default(), &DeviceInfo::default()).unwrap();
        let map = grid.thread_id_to_output_indexing(&shape, &mut arena).unwrap();
        assert_eq!(map.evaluate(&arena, &[0, 0, 0, 0, 0, 0], &[0, 0]), vec![0, 0]);
        assert_eq!(map.evaluate(&arena, &[1, 0, 0, 0, 0, 0], &[0, 0]), vec![1, 0]);
        assert_eq!(map.evaluate(&arena, &[5, 0, 0, 0, 0, 0], &[0, 0]), vec![1, 1]);
        assert!(map.constraints().is_empty());
    }
}
