//! Semi-affine integer expressions: sums of scaled symbols, floor division and modulo.

mod expression;
mod interval;
mod simplify;

pub use expression::*;
pub use interval::*;
pub use simplify::*;

#[cfg(test)]
mod tests;
