//! Forward type inference over the instruction stream.
//!
//! Assigns each variable one of the six value kinds by propagating
//! constraints in program order until a fixpoint. `:=` between variables
//! unifies both sides. Conflicting constraints are an error; the inferer
//! never fabricates a default, and a variable no instruction constrains
//! simply stays untyped.

use crate::model::{Instruction, MethodReference, Program, ValueType, VarId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypeInferenceError {
    #[error("variable {var} used as both {first} and {second}")]
    Conflict {
        var: VarId,
        first: ValueType,
        second: ValueType,
    },

    #[error("malformed method descriptor `{0}`")]
    BadDescriptor(String),
}

pub struct TypeInferer {
    types: Vec<Option<ValueType>>,
}

impl TypeInferer {
    pub fn infer(program: &Program) -> Result<Self, TypeInferenceError> {
        let mut inferer = Self {
            types: vec![None; program.variable_count()],
        };
        let mut changed = true;
        while changed {
            changed = false;
            for block in &program.blocks {
                if let Some(var) = block.exception_variable {
                    changed |= inferer.constrain(var, ValueType::Reference)?;
                }
                for insn in &block.instructions {
                    changed |= inferer.visit(insn)?;
                }
            }
        }
        Ok(inferer)
    }

    /// The inferred type, or `None` when nothing constrained the variable.
    pub fn type_of(&self, var: VarId) -> Option<ValueType> {
        self.types.get(var.index()).copied().flatten()
    }

    fn visit(&mut self, insn: &Instruction) -> Result<bool, TypeInferenceError> {
        Ok(match insn {
            Instruction::ConstNull { receiver }
            | Instruction::ConstString { receiver, .. }
            | Instruction::ConstClass { receiver, .. }
            | Instruction::CastReference { receiver, .. }
            | Instruction::CreateArray { receiver, .. }
            | Instruction::Construct { receiver, .. }
            | Instruction::NullCheck { receiver, .. } => {
                self.constrain(*receiver, ValueType::Reference)?
            }
            Instruction::ConstInt { receiver, .. }
            | Instruction::ArrayLength { receiver, .. } => {
                self.constrain(*receiver, ValueType::Int)?
            }
            Instruction::ConstLong { receiver, .. } => {
                self.constrain(*receiver, ValueType::Long)?
            }
            Instruction::ConstFloat { receiver, .. } => {
                self.constrain(*receiver, ValueType::Float)?
            }
            Instruction::ConstDouble { receiver, .. } => {
                self.constrain(*receiver, ValueType::Double)?
            }
            Instruction::Assign { receiver, assignee } => self.unify(*receiver, *assignee)?,
            Instruction::Binary {
                receiver,
                op,
                operands,
                lhs,
                rhs,
            } => {
                let result = match op {
                    // `cmp` folds wide comparisons into an int.
                    crate::model::BinaryOp::Compare => ValueType::Int,
                    _ => operands.value_type(),
                };
                let mut changed = self.constrain(*receiver, result)?;
                changed |= self.constrain(*lhs, operands.value_type())?;
                changed |= self.constrain(*rhs, operands.value_type())?;
                changed
            }
            Instruction::Negate {
                receiver,
                operand,
                operands,
            } => {
                let mut changed = self.constrain(*receiver, operands.value_type())?;
                changed |= self.constrain(*operand, operands.value_type())?;
                changed
            }
            Instruction::CastPrimitive {
                receiver,
                value,
                from,
                to,
            } => {
                let mut changed = self.constrain(*receiver, to.value_type())?;
                changed |= self.constrain(*value, from.value_type())?;
                changed
            }
            Instruction::GetField {
                receiver,
                instance,
                field_type,
                ..
            } => {
                let mut changed = self.constrain(*receiver, *field_type)?;
                if let Some(instance) = instance {
                    changed |= self.constrain(*instance, ValueType::Reference)?;
                }
                changed
            }
            Instruction::PutField {
                instance,
                field_type,
                value,
                ..
            } => {
                let mut changed = self.constrain(*value, *field_type)?;
                if let Some(instance) = instance {
                    changed |= self.constrain(*instance, ValueType::Reference)?;
                }
                changed
            }
            Instruction::GetElement {
                receiver,
                array,
                index,
                element_type,
            } => {
                let mut changed = self.constrain(*receiver, *element_type)?;
                changed |= self.constrain(*array, ValueType::Reference)?;
                changed |= self.constrain(*index, ValueType::Int)?;
                changed
            }
            Instruction::PutElement { array, index, .. } => {
                let mut changed = self.constrain(*array, ValueType::Reference)?;
                changed |= self.constrain(*index, ValueType::Int)?;
                changed
            }
            Instruction::Invoke {
                receiver,
                instance,
                method,
                arguments,
            } => {
                let signature = MethodSignature::parse(method)?;
                if arguments.len() != signature.arguments.len() {
                    return Err(TypeInferenceError::BadDescriptor(method.descriptor.clone()));
                }
                let mut changed = false;
                for (&arg, &ty) in arguments.iter().zip(&signature.arguments) {
                    changed |= self.constrain(arg, ty)?;
                }
                if let Some(instance) = instance {
                    changed |= self.constrain(*instance, ValueType::Reference)?;
                }
                if let (Some(receiver), Some(return_type)) = (receiver, signature.return_type) {
                    changed |= self.constrain(*receiver, return_type)?;
                }
                changed
            }
            Instruction::Resume {
                receiver: Some(receiver),
            } => self.constrain(*receiver, ValueType::Reference)?,
            Instruction::MonitorEnter { object }
            | Instruction::MonitorExit { object }
            | Instruction::Throw { exception: object } => {
                self.constrain(*object, ValueType::Reference)?
            }
            _ => false,
        })
    }

    fn constrain(&mut self, var: VarId, ty: ValueType) -> Result<bool, TypeInferenceError> {
        match self.types[var.index()] {
            None => {
                self.types[var.index()] = Some(ty);
                Ok(true)
            }
            Some(existing) if existing == ty => Ok(false),
            Some(existing) => Err(TypeInferenceError::Conflict {
                var,
                first: existing,
                second: ty,
            }),
        }
    }

    fn unify(&mut self, a: VarId, b: VarId) -> Result<bool, TypeInferenceError> {
        match (self.types[a.index()], self.types[b.index()]) {
            (Some(ta), None) => self.constrain(b, ta),
            (None, Some(tb)) => self.constrain(a, tb),
            (Some(_), Some(tb)) => self.constrain(a, tb),
            (None, None) => Ok(false),
        }
    }
}

struct MethodSignature {
    arguments: Vec<ValueType>,
    /// `None` for void.
    return_type: Option<ValueType>,
}

impl MethodSignature {
    /// Parses a `(args)ret` descriptor. The instance of a virtual call is
    /// not part of the argument list.
    fn parse(method: &MethodReference) -> Result<Self, TypeInferenceError> {
        let bad = || TypeInferenceError::BadDescriptor(method.descriptor.clone());
        let rest = method.descriptor.strip_prefix('(').ok_or_else(bad)?;
        let (args, ret) = rest.split_once(')').ok_or_else(bad)?;

        let mut arguments = Vec::new();
        let mut bytes = args.as_bytes();
        while !bytes.is_empty() {
            let (ty, remaining) = take_type(bytes).ok_or_else(bad)?;
            arguments.push(ty);
            bytes = remaining;
        }

        let return_type = if ret == "V" {
            None
        } else {
            let (ty, remaining) = take_type(ret.as_bytes()).ok_or_else(bad)?;
            if !remaining.is_empty() {
                return Err(bad());
            }
            Some(ty)
        };
        Ok(Self {
            arguments,
            return_type,
        })
    }
}

fn take_type(bytes: &[u8]) -> Option<(ValueType, &[u8])> {
    match bytes.first()? {
        b'I' | b'S' | b'B' | b'C' | b'Z' => Some((ValueType::Int, &bytes[1..])),
        b'J' => Some((ValueType::Long, &bytes[1..])),
        b'F' => Some((ValueType::Float, &bytes[1..])),
        b'D' => Some((ValueType::Double, &bytes[1..])),
        b'L' => {
            let end = bytes.iter().position(|&b| b == b';')?;
            Some((ValueType::Reference, &bytes[end + 1..]))
        }
        b'[' => {
            let (_, rest) = take_type(&bytes[1..])?;
            Some((ValueType::Reference, rest))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BasicBlock, BinaryOp, NumericType, ProgramVariable};

    fn program(instructions: Vec<Instruction>) -> Program {
        let mut program = Program {
            blocks: vec![BasicBlock {
                instructions,
                ..Default::default()
            }],
            variables: Vec::new(),
        };
        program.variables = vec![ProgramVariable::default(); 8];
        program
    }

    #[test]
    fn assignment_unifies_both_ways() {
        let program = program(vec![
            Instruction::Assign {
                receiver: VarId(0),
                assignee: VarId(1),
            },
            Instruction::ConstInt {
                receiver: VarId(1),
                value: 3,
            },
            Instruction::Return { value: None },
        ]);
        let inferer = TypeInferer::infer(&program).unwrap();
        assert_eq!(inferer.type_of(VarId(0)), Some(ValueType::Int));
        assert_eq!(inferer.type_of(VarId(1)), Some(ValueType::Int));
    }

    #[test]
    fn conflict_is_fatal() {
        let program = program(vec![
            Instruction::ConstInt {
                receiver: VarId(0),
                value: 1,
            },
            Instruction::ConstLong {
                receiver: VarId(0),
                value: 1,
            },
            Instruction::Return { value: None },
        ]);
        assert!(matches!(
            TypeInferer::infer(&program),
            Err(TypeInferenceError::Conflict { .. }),
        ));
    }

    #[test]
    fn compare_produces_int() {
        let program = program(vec![
            Instruction::Binary {
                receiver: VarId(0),
                op: BinaryOp::Compare,
                lhs: VarId(1),
                rhs: VarId(2),
                operands: NumericType::Long,
            },
            Instruction::Return { value: None },
        ]);
        let inferer = TypeInferer::infer(&program).unwrap();
        assert_eq!(inferer.type_of(VarId(0)), Some(ValueType::Int));
        assert_eq!(inferer.type_of(VarId(1)), Some(ValueType::Long));
    }

    #[test]
    fn untyped_variables_stay_untyped() {
        let program = program(vec![Instruction::Return { value: None }]);
        let inferer = TypeInferer::infer(&program).unwrap();
        assert_eq!(inferer.type_of(VarId(5)), None);
    }
}
