/// Everything that can go wrong while deriving indexing maps or emitting a fusion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An operation or construct with no index-transfer rule or emission strategy.
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    /// A non-positive divisor, or a symbol count mismatch during composition.
    #[error("malformed expression: {0}")]
    MalformedExpression(String),
    #[error("root index {index} is out of range for a fusion with {count} roots")]
    UnreachableRoot { index: usize, count: usize },
    #[error("operand index {index} is out of range for `{node}` with {count} operands")]
    UnreachableOperand {
        node: String,
        index: usize,
        count: usize,
    },
    #[error("parameter index {index} is out of range for a fusion with {count} parameters")]
    UnreachableParameter { index: usize, count: usize },
    /// The operation graph does not describe a well formed computation.
    #[error("malformed graph: {0}")]
    MalformedGraph(String),
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
