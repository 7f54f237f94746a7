use crate::prelude::*;

/// Scalar operations applied pointwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum ElementwiseKind {
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Subtract,
    #[strum(serialize = "mul")]
    Multiply,
    #[strum(serialize = "div")]
    Divide,
    #[strum(serialize = "maximum")]
    Maximum,
    #[strum(serialize = "minimum")]
    Minimum,
    #[strum(serialize = "atan2")]
    Atan2,
    #[strum(serialize = "neg")]
    Negate,
    #[strum(serialize = "exp")]
    Exp,
    #[strum(serialize = "log")]
    Log,
    #[strum(serialize = "sin")]
    Sin,
    #[strum(serialize = "cos")]
    Cos,
    #[strum(serialize = "tanh")]
    Tanh,
    #[strum(serialize = "sqrt")]
    Sqrt,
    #[strum(serialize = "abs")]
    Abs,
}

impl ElementwiseKind {
    pub fn arity(&self) -> usize {
        match self {
            ElementwiseKind::Add
            | ElementwiseKind::Subtract
            | ElementwiseKind::Multiply
            | ElementwiseKind::Divide
            | ElementwiseKind::Maximum
            | ElementwiseKind::Minimum
            | ElementwiseKind::Atan2 => 2,
            _ => 1,
        }
    }

    /// Instruction name in the emitted IR, e.g. `arith.addf` or `math.atan2`.
    pub fn mnemonic(&self, element_type: PrimitiveType) -> String {
        let float = element_type.is_float();
        match self {
            ElementwiseKind::Add
            | ElementwiseKind::Subtract
            | ElementwiseKind::Multiply
            | ElementwiseKind::Negate => {
                format!("arith.{self}{}", if float { "f" } else { "i" })
            }
            ElementwiseKind::Divide if float => "arith.divf".to_string(),
            ElementwiseKind::Divide => "arith.divsi".to_string(),
            ElementwiseKind::Maximum | ElementwiseKind::Minimum if float => {
                format!("arith.{self}f")
            }
            ElementwiseKind::Maximum => "arith.maxsi".to_string(),
            ElementwiseKind::Minimum => "arith.minsi".to_string(),
            ElementwiseKind::Abs => format!("math.abs{}", if float { "f" } else { "i" }),
            _ => format!("math.{self}"),
        }
    }
}

/// A fused tensor operation. Operands are the node's incoming edges, ordered by
/// [`Dependency::input_order`].
#[derive(Clone, Debug, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Op {
    /// The n-th input of the enclosing computation.
    Parameter(usize),
    /// A scalar literal.
    Constant(f64),
    /// Each element holds its own coordinate along `dimension`.
    Iota { dimension: usize },
    Elementwise(ElementwiseKind),
    Copy,
    Bitcast,
    /// Operand dimension `i` becomes output dimension `dimensions[i]`.
    Broadcast { dimensions: Vec<usize> },
    Reshape,
    Reverse { dimensions: Vec<usize> },
    /// Output dimension `i` is operand dimension `permutation[i]`.
    Transpose { permutation: Vec<usize> },
    Slice {
        starts: Vec<i64>,
        limits: Vec<i64>,
        strides: Vec<i64>,
    },
    /// Reduces `dimensions` away. With `n` results the first `n` operands are inputs and the
    /// last `n` are their initial values; `reducer` combines accumulators then inputs.
    Reduce {
        dimensions: Vec<usize>,
        reducer: ComputationId,
    },
    Tuple,
    /// Reads the result selected by the incoming edge's output order.
    GetTupleElement { index: usize },
    /// Opaque call; no index transfer rule exists for it.
    CustomCall { target: String },
}

impl Op {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// An operation node of a [`Computation`]. A node with several results has one shape per result.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    pub op: Op,
    pub shapes: Vec<Shape>,
}

impl Node {
    pub fn shape(&self, output: u8) -> Result<&Shape> {
        self.shapes.get(output as usize).ok_or_else(|| {
            Error::MalformedGraph(format!(
                "`{}` has no result {output} ({} results)",
                self.name,
                self.shapes.len()
            ))
        })
    }

    pub fn num_outputs(&self) -> usize {
        self.shapes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mnemonics() {
        assert_eq!(
            ElementwiseKind::Add.mnemonic(PrimitiveType::F32),
            "arith.addf"
        );
        assert_eq!(
            ElementwiseKind::Add.mnemonic(PrimitiveType::S32),
            "arith.addi"
        );
        assert_eq!(
            ElementwiseKind::Atan2.mnemonic(PrimitiveType::F32),
            "math.atan2"
        );
        assert_eq!(
            ElementwiseKind::Negate.mnemonic(PrimitiveType::F64),
            "arith.negf"
        );
        for kind in ElementwiseKind::iter() {
            let mnemonic = kind.mnemonic(PrimitiveType::F32);
            assert!(mnemonic.starts_with("arith.") || mnemonic.starts_with("math."));
        }
    }

    #[test]
    fn test_op_names() {
        assert_eq!(Op::GetTupleElement { index: 0 }.name(), "get-tuple-element");
        assert_eq!(
            Op::CustomCall {
                target: "foo".into()
            }
            .name(),
            "custom-call"
        );
    }
}
