use std::fmt::{Display, Formatter};

use itertools::Itertools;
use tinyvec::TinyVec;

use crate::error::{Error, Result};

/// Element types a fused value can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveType {
    Pred,
    S8,
    S32,
    S64,
    U32,
    F16,
    Bf16,
    F32,
    F64,
}

impl PrimitiveType {
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            PrimitiveType::F16 | PrimitiveType::Bf16 | PrimitiveType::F32 | PrimitiveType::F64
        )
    }
}

/// A statically known tensor shape with a physical layout.
///
/// The layout lists dimensions from the fastest varying to the slowest varying one, the same
/// convention as `{2,1,0}` in HLO text. New shapes are row-major.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    element_type: PrimitiveType,
    dims: TinyVec<[i64; 6]>,
    minor_to_major: TinyVec<[usize; 6]>,
}

impl Shape {
    pub fn new(element_type: PrimitiveType, dims: &[i64]) -> Self {
        Self {
            element_type,
            dims: dims.iter().copied().collect(),
            minor_to_major: (0..dims.len()).rev().collect(),
        }
    }

    pub fn scalar(element_type: PrimitiveType) -> Self {
        Self::new(element_type, &[])
    }

    pub fn with_layout(mut self, minor_to_major: &[usize]) -> Self {
        self.minor_to_major = minor_to_major.iter().copied().collect();
        self
    }

    pub fn element_type(&self) -> PrimitiveType {
        self.element_type
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn minor_to_major(&self) -> &[usize] {
        &self.minor_to_major
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn num_elements(&self) -> i64 {
        self.dims.iter().product()
    }

    /// Checks that dimensions are non-negative and the layout is a permutation of them.
    pub fn validate(&self) -> Result<()> {
        if self.dims.iter().any(|d| *d < 0) {
            return Err(Error::MalformedGraph(format!(
                "negative dimension in shape {self}"
            )));
        }
        let sorted = self.minor_to_major.iter().copied().sorted().collect_vec();
        if sorted != (0..self.rank()).collect_vec() {
            return Err(Error::MalformedGraph(format!(
                "layout of {self} is not a permutation of its dimensions"
            )));
        }
        Ok(())
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.element_type, self.dims.iter().join(","))?;
        if !self.is_scalar() {
            write!(f, "{{{}}}", self.minor_to_major.iter().join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let shape = Shape::new(PrimitiveType::F32, &[10, 20, 30]);
        assert_eq!(shape.num_elements(), 6000);
        assert_eq!(shape.minor_to_major(), &[2, 1, 0]);
        assert_eq!(shape.to_string(), "f32[10,20,30]{2,1,0}");
        assert_eq!(Shape::scalar(PrimitiveType::S32).to_string(), "s32[]");
        assert_eq!(Shape::scalar(PrimitiveType::F32).num_elements(), 1);
    }

    #[test]
    fn test_layout_validation() {
        let shape = Shape::new(PrimitiveType::F32, &[2, 3]).with_layout(&[0, 1]);
        assert!(shape.validate().is_ok());
        let broken = Shape::new(PrimitiveType::F32, &[2, 3]).with_layout(&[0, 0]);
        assert!(matches!(broken.validate(), Err(Error::MalformedGraph(_))));
    }
}
