//! Indexing maps from launch coordinates to tensor coordinates, and their propagation
//! through a fused computation.

mod map;
mod printer;
mod propagation;
mod rules;

pub use map::*;
pub use printer::*;
pub use propagation::*;
pub use rules::*;
