use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use crate::bufferize::TensorKey;
use crate::spec::{Operand, ValueId, ValueType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandTypeError {
    ValueNotFound(u32),
    ValueNotTuple(u32),
    TupleIndexOutOfRange { value: u32, index: usize },
}

impl fmt::Display for OperandTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueNotFound(id) => write!(f, "value {id} not found in function"),
            Self::ValueNotTuple(id) => write!(f, "value {id} is not a tuple"),
            Self::TupleIndexOutOfRange { value, index } => {
                write!(f, "tuple index {index} out of range for value {value}")
            }
        }
    }
}

impl std::error::Error for OperandTypeError {}

/// Types of every value defined so far in a function and its regions.
#[derive(Debug, Clone, Default)]
pub struct ValueTypes {
    types: HashMap<ValueId, ValueType>,
}

impl ValueTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the type of `id`; returns `false` if the id was already defined.
    pub fn define(&mut self, id: ValueId, ty: ValueType) -> bool {
        match self.types.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ty);
                true
            }
        }
    }

    pub fn get(&self, id: ValueId) -> Option<&ValueType> {
        self.types.get(&id)
    }

    /// Resolves the type read by `operand`.
    pub fn operand_type(&self, operand: &Operand) -> Result<ValueType, OperandTypeError> {
        match operand {
            Operand::Value(id) => self
                .get(*id)
                .cloned()
                .ok_or(OperandTypeError::ValueNotFound(id.0)),
            Operand::TupleElement { tuple, index } => {
                let ty = self
                    .get(*tuple)
                    .ok_or(OperandTypeError::ValueNotFound(tuple.0))?;
                match ty {
                    ValueType::Tuple(elements) => elements.get(*index).cloned().ok_or(
                        OperandTypeError::TupleIndexOutOfRange {
                            value: tuple.0,
                            index: *index,
                        },
                    ),
                    ValueType::Tensor(_) => Err(OperandTypeError::ValueNotTuple(tuple.0)),
                }
            }
            Operand::Literal(literal) => Ok(ValueType::Tensor(literal.spec.clone())),
        }
    }

    /// Tensor keys read by `operand`; literals read none.
    pub fn operand_keys(&self, operand: &Operand) -> Result<Vec<TensorKey>, OperandTypeError> {
        let prefix = match operand {
            Operand::Literal(_) => return Ok(Vec::new()),
            Operand::Value(_) => Vec::new(),
            Operand::TupleElement { index, .. } => vec![*index],
        };
        let Some(value) = operand.value_id() else {
            return Ok(Vec::new());
        };
        let ty = self.operand_type(operand)?;
        Ok(leaf_keys(value, &prefix, &ty))
    }
}

/// Keys of every tensor leaf of `ty`, rooted at `value` with `prefix` prepended.
pub fn leaf_keys(value: ValueId, prefix: &[usize], ty: &ValueType) -> Vec<TensorKey> {
    ty.tensor_paths()
        .into_iter()
        .map(|path| {
            let mut full = prefix.to_vec();
            full.extend(path);
            TensorKey::with_path(value, full)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptir_utils::{tensor_literal_f32_zeros, tensor_type};
    use crate::spec::DType;

    #[test]
    fn tuple_operands_resolve_nested_leaves() {
        let mut types = ValueTypes::new();
        let pair = ValueType::Tuple(vec![
            tensor_type(DType::F32, &[2]),
            ValueType::Tuple(vec![
                tensor_type(DType::F32, &[2]),
                tensor_type(DType::Si32, &[]),
            ]),
        ]);
        assert!(types.define(ValueId(3), pair));
        assert!(!types.define(ValueId(3), tensor_type(DType::F32, &[1])));

        let keys = types
            .operand_keys(&Operand::TupleElement {
                tuple: ValueId(3),
                index: 1,
            })
            .expect("element keys");
        assert_eq!(
            keys,
            vec![
                TensorKey::with_path(ValueId(3), vec![1, 0]),
                TensorKey::with_path(ValueId(3), vec![1, 1]),
            ]
        );

        let err = types
            .operand_keys(&Operand::TupleElement {
                tuple: ValueId(3),
                index: 4,
            })
            .expect_err("index out of range");
        assert_eq!(
            err,
            OperandTypeError::TupleIndexOutOfRange { value: 3, index: 4 }
        );
        assert_eq!(
            types.operand_keys(&Operand::Value(ValueId(8))),
            Err(OperandTypeError::ValueNotFound(8))
        );
        assert!(types
            .operand_keys(&Operand::Literal(tensor_literal_f32_zeros(&[1])))
            .expect("literal")
            .is_empty());
    }
}
