use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use crate::prelude::*;

/// An SSA value of the emitted module, printed as `%n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl Display for ValueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Index,
    Bool,
    Scalar(PrimitiveType),
    Tensor(Shape),
}

fn element_type_name(ty: PrimitiveType) -> &'static str {
    match ty {
        PrimitiveType::Pred => "i1",
        PrimitiveType::S8 => "i8",
        PrimitiveType::S32 => "i32",
        PrimitiveType::S64 => "i64",
        PrimitiveType::U32 => "ui32",
        PrimitiveType::F16 => "f16",
        PrimitiveType::Bf16 => "bf16",
        PrimitiveType::F32 => "f32",
        PrimitiveType::F64 => "f64",
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Type::Index => write!(f, "index"),
            Type::Bool => write!(f, "i1"),
            Type::Scalar(ty) => write!(f, "{}", element_type_name(*ty)),
            Type::Tensor(shape) => {
                write!(f, "tensor<")?;
                for d in shape.dims() {
                    write!(f, "{d}x")?;
                }
                write!(f, "{}>", element_type_name(shape.element_type()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstKind {
    ThreadId(Axis),
    BlockId(Axis),
    /// Evaluates `map`, an expression over `s0, s1, ...` bound to `operands`.
    Apply {
        map: String,
        operands: Vec<ValueId>,
    },
    /// True when the operands satisfy every constraint in `constraints`.
    CheckDomain {
        constraints: String,
        operands: Vec<ValueId>,
    },
    Constant {
        value: f64,
        ty: PrimitiveType,
    },
    IndexCast {
        value: ValueId,
        ty: PrimitiveType,
    },
    Bitcast {
        value: ValueId,
        ty: PrimitiveType,
    },
    Extract {
        tensor: ValueId,
        indices: Vec<ValueId>,
    },
    Insert {
        scalar: ValueId,
        tensor: ValueId,
        indices: Vec<ValueId>,
    },
    Elementwise {
        kind: ElementwiseKind,
        ty: PrimitiveType,
        operands: Vec<ValueId>,
    },
    Call {
        callee: String,
        args: Vec<ValueId>,
    },
    /// Nested loops over `ranges`. The body's arguments are the induction variables followed
    /// by the loop-carried values, which start at `inits`.
    Loop {
        ranges: Vec<Interval>,
        inits: Vec<ValueId>,
        body: Region,
    },
    If {
        condition: ValueId,
        then_region: Region,
        else_region: Region,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    pub results: Vec<ValueId>,
    pub kind: InstKind,
}

impl Inst {
    pub fn mnemonic(&self) -> String {
        match &self.kind {
            InstKind::ThreadId(_) => "gpu.thread_id".to_string(),
            InstKind::BlockId(_) => "gpu.block_id".to_string(),
            InstKind::Apply { .. } => "affine.apply".to_string(),
            InstKind::CheckDomain { .. } => "indexing.check_domain".to_string(),
            InstKind::Constant { .. } => "arith.constant".to_string(),
            InstKind::IndexCast { .. } => "arith.index_cast".to_string(),
            InstKind::Bitcast { .. } => "arith.bitcast".to_string(),
            InstKind::Extract { .. } => "tensor.extract".to_string(),
            InstKind::Insert { .. } => "tensor.insert".to_string(),
            InstKind::Elementwise { kind, ty, .. } => kind.mnemonic(*ty),
            InstKind::Call { .. } => "func.call".to_string(),
            InstKind::Loop { .. } => "scf.for".to_string(),
            InstKind::If { .. } => "scf.if".to_string(),
        }
    }

    pub fn regions(&self) -> Vec<&Region> {
        match &self.kind {
            InstKind::Loop { body, .. } => vec![body],
            InstKind::If {
                then_region,
                else_region,
                ..
            } => vec![then_region, else_region],
            _ => vec![],
        }
    }

    fn write(&self, f: &mut Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        write!(f, "{pad}")?;
        if !self.results.is_empty() {
            write!(f, "{} = ", self.results.iter().join(", "))?;
        }
        let mnemonic = self.mnemonic();
        match &self.kind {
            InstKind::ThreadId(axis) | InstKind::BlockId(axis) => writeln!(f, "{mnemonic} {axis}"),
            InstKind::Apply { map, operands } => writeln!(
                f,
                "{mnemonic} affine_map<{map}>[{}]",
                operands.iter().join(", ")
            ),
            InstKind::CheckDomain {
                constraints,
                operands,
            } => writeln!(
                f,
                "{mnemonic} affine_set<{constraints}>[{}]",
                operands.iter().join(", ")
            ),
            InstKind::Constant { value, ty } => {
                writeln!(f, "{mnemonic} {value:?} : {}", element_type_name(*ty))
            }
            InstKind::IndexCast { value, ty } | InstKind::Bitcast { value, ty } => {
                writeln!(f, "{mnemonic} {value} : {}", element_type_name(*ty))
            }
            InstKind::Extract { tensor, indices } => {
                writeln!(f, "{mnemonic} {tensor}[{}]", indices.iter().join(", "))
            }
            InstKind::Insert {
                scalar,
                tensor,
                indices,
            } => writeln!(
                f,
                "{mnemonic} {scalar} into {tensor}[{}]",
                indices.iter().join(", ")
            ),
            InstKind::Elementwise { ty, operands, .. } => writeln!(
                f,
                "{mnemonic} {} : {}",
                operands.iter().join(", "),
                element_type_name(*ty)
            ),
            InstKind::Call { callee, args } => {
                writeln!(f, "{mnemonic} @{callee}({})", args.iter().join(", "))
            }
            InstKind::Loop {
                ranges,
                inits,
                body,
            } => {
                let (ivs, carried) = body.args.split_at(ranges.len().min(body.args.len()));
                writeln!(
                    f,
                    "{mnemonic} ({}) in {} iter_args({}) {{",
                    ivs.iter().join(", "),
                    ranges.iter().join(" x "),
                    carried
                        .iter()
                        .zip(inits)
                        .map(|(arg, init)| format!("{arg} = {init}"))
                        .join(", ")
                )?;
                body.write(f, indent + 1)?;
                writeln!(f, "{pad}}}")
            }
            InstKind::If {
                condition,
                then_region,
                else_region,
            } => {
                writeln!(f, "{mnemonic} {condition} {{")?;
                then_region.write(f, indent + 1)?;
                writeln!(f, "{pad}}} else {{")?;
                else_region.write(f, indent + 1)?;
                writeln!(f, "{pad}}}")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Region {
    pub args: Vec<ValueId>,
    pub insts: Vec<Inst>,
    pub yields: Vec<ValueId>,
}

impl Region {
    /// Visits every instruction in program order, entering nested regions.
    pub fn walk<'r>(&'r self, visit: &mut dyn FnMut(&'r Inst)) {
        for inst in &self.insts {
            visit(inst);
            for region in inst.regions() {
                region.walk(visit);
            }
        }
    }

    fn write(&self, f: &mut Formatter<'_>, indent: usize) -> fmt::Result {
        for inst in &self.insts {
            inst.write(f, indent)?;
        }
        if !self.yields.is_empty() {
            writeln!(
                f,
                "{}scf.yield {}",
                "  ".repeat(indent),
                self.yields.iter().join(", ")
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<(ValueId, Type)>,
    pub result_types: Vec<Type>,
    /// The body's yields are the returned values.
    pub body: Region,
}

impl Function {
    pub fn walk<'f>(&'f self, visit: &mut dyn FnMut(&'f Inst)) {
        self.body.walk(visit);
    }

    /// Instruction names in program order.
    pub fn mnemonics(&self) -> Vec<String> {
        let mut names = vec![];
        self.walk(&mut |inst| names.push(inst.mnemonic()));
        names
    }

    /// Calls made anywhere in the body, with the callee name.
    pub fn calls(&self) -> Vec<(&str, &Inst)> {
        let mut calls = vec![];
        self.walk(&mut |inst| {
            if let InstKind::Call { callee, .. } = &inst.kind {
                calls.push((callee.as_str(), inst));
            }
        });
        calls
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "func.func @{}({}) -> ({}) {{",
            self.name,
            self.params
                .iter()
                .map(|(value, ty)| format!("{value}: {ty}"))
                .join(", "),
            self.result_types.iter().join(", ")
        )?;
        for inst in &self.body.insts {
            inst.write(f, 1)?;
        }
        writeln!(f, "  return {}", self.body.yields.iter().join(", "))?;
        writeln!(f, "}}")
    }
}

/// The emitted functions, entry first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    /// How many instructions named `mnemonic` the module holds.
    pub fn count(&self, mnemonic: &str) -> usize {
        let mut count = 0;
        for function in &self.functions {
            function.walk(&mut |inst| {
                if inst.mnemonic() == mnemonic {
                    count += 1;
                }
            });
        }
        count
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{function}")?;
        }
        Ok(())
    }
}
