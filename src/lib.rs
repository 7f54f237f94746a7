//! Indexing maps and code emission for GPU loop fusions.
//!
//! A fusion is lowered onto a one dimensional launch grid: the [`launch`] module maps
//! thread, block, chunk and unroll ids to output elements, [`indexing`] pushes those maps
//! backwards through the fused operations, and [`emitter`] builds a module in which every
//! value read through equal maps is computed once.

pub mod emitter;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod indexing;
pub mod launch;
pub mod op;
pub mod shape;
pub mod symbolic;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::emitter::*;
    pub use crate::error::*;
    pub use crate::fusion::*;
    pub use crate::graph::*;
    pub use crate::indexing::*;
    pub use crate::launch::*;
    pub use crate::op::*;
    pub use crate::shape::*;
    pub use crate::symbolic::*;
    pub use petgraph::graph::NodeIndex;
}
