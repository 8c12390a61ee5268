//! Per-instruction lowering into statements.
//!
//! Every instruction becomes at most one statement. Terminators translate
//! through [`PartDecompiler::generate_jump_statement`], which resolves a
//! target block either to nothing (fall-through to the next indexed
//! position), to `break` of the innermost open block ending at the target,
//! or to `continue` of the loop headed there.

use super::{InstructionLoweringError, PartDecompiler};
use crate::ast::{Expr, LabelId, Statement, SwitchClause};
use crate::model::{Instruction, VarId};

impl PartDecompiler<'_> {
    pub(super) fn lower_instruction(
        &mut self,
        insn: &Instruction,
        out: &mut Vec<Statement>,
    ) -> Result<(), InstructionLoweringError> {
        match insn {
            Instruction::Nop => {}

            Instruction::ConstNull { receiver } => push_assign(out, *receiver, Expr::ConstNull),
            Instruction::ConstInt { receiver, value } => {
                push_assign(out, *receiver, Expr::ConstInt(*value));
            }
            Instruction::ConstLong { receiver, value } => {
                push_assign(out, *receiver, Expr::ConstLong(*value));
            }
            Instruction::ConstFloat { receiver, value } => {
                push_assign(out, *receiver, Expr::ConstFloat(*value));
            }
            Instruction::ConstDouble { receiver, value } => {
                push_assign(out, *receiver, Expr::ConstDouble(*value));
            }
            Instruction::ConstString { receiver, value } => {
                push_assign(out, *receiver, Expr::ConstString(value.clone()));
            }
            Instruction::ConstClass { receiver, class } => {
                push_assign(out, *receiver, Expr::ConstClass(class.clone()));
            }

            Instruction::Assign { receiver, assignee } => {
                push_assign(out, *receiver, Expr::Variable(*assignee));
            }

            Instruction::Binary {
                receiver,
                op,
                lhs,
                rhs,
                operands,
            } => push_assign(
                out,
                *receiver,
                Expr::Binary {
                    op: *op,
                    operands: *operands,
                    lhs: Expr::var(*lhs),
                    rhs: Expr::var(*rhs),
                },
            ),
            Instruction::Negate {
                receiver,
                operand,
                operands,
            } => push_assign(
                out,
                *receiver,
                Expr::Negate {
                    operands: *operands,
                    operand: Expr::var(*operand),
                },
            ),
            Instruction::CastPrimitive {
                receiver,
                value,
                from,
                to,
            } => push_assign(
                out,
                *receiver,
                Expr::CastPrimitive {
                    from: *from,
                    to: *to,
                    value: Expr::var(*value),
                },
            ),
            Instruction::CastReference {
                receiver,
                value,
                class,
            } => push_assign(
                out,
                *receiver,
                Expr::CastReference {
                    class: class.clone(),
                    value: Expr::var(*value),
                },
            ),

            Instruction::GetField {
                receiver,
                instance,
                field,
                ..
            } => push_assign(
                out,
                *receiver,
                Expr::Field {
                    instance: instance.map(Expr::var),
                    field: field.clone(),
                },
            ),
            Instruction::PutField {
                instance,
                field,
                value,
                ..
            } => out.push(Statement::assign(
                Expr::Field {
                    instance: instance.map(Expr::var),
                    field: field.clone(),
                },
                Expr::Variable(*value),
            )),
            Instruction::GetElement {
                receiver,
                array,
                index,
                ..
            } => push_assign(
                out,
                *receiver,
                Expr::Element {
                    array: Expr::var(*array),
                    index: Expr::var(*index),
                },
            ),
            Instruction::PutElement {
                array,
                index,
                value,
            } => out.push(Statement::assign(
                Expr::Element {
                    array: Expr::var(*array),
                    index: Expr::var(*index),
                },
                Expr::Variable(*value),
            )),
            Instruction::ArrayLength { receiver, array } => push_assign(
                out,
                *receiver,
                Expr::ArrayLength {
                    array: Expr::var(*array),
                },
            ),
            Instruction::CreateArray {
                receiver,
                element_class,
                length,
            } => push_assign(
                out,
                *receiver,
                Expr::NewArray {
                    element_class: element_class.clone(),
                    length: Expr::var(*length),
                },
            ),
            Instruction::Construct { receiver, class } => push_assign(
                out,
                *receiver,
                Expr::NewObject {
                    class: class.clone(),
                },
            ),

            Instruction::Invoke {
                receiver,
                instance,
                method,
                arguments,
            } => {
                let call = Expr::Invocation {
                    method: method.clone(),
                    instance: instance.map(Expr::var),
                    arguments: arguments.iter().map(|&arg| Expr::Variable(arg)).collect(),
                };
                match receiver {
                    Some(receiver) => push_assign(out, *receiver, call),
                    None => out.push(Statement::effect(call)),
                }
            }
            Instruction::InitClass { class } => out.push(Statement::effect(Expr::InitClass {
                class: class.clone(),
            })),
            Instruction::NullCheck { receiver, value } => push_assign(
                out,
                *receiver,
                Expr::NullCheck {
                    value: Expr::var(*value),
                },
            ),
            Instruction::MonitorEnter { object } => {
                out.push(Statement::effect(Expr::MonitorEnter {
                    object: Expr::var(*object),
                }));
            }
            Instruction::MonitorExit { object } => {
                out.push(Statement::effect(Expr::MonitorExit {
                    object: Expr::var(*object),
                }));
            }
            Instruction::Resume { receiver } => match receiver {
                Some(receiver) => push_assign(out, *receiver, Expr::RestoreState),
                None => out.push(Statement::effect(Expr::RestoreState)),
            },

            Instruction::Jump { target } => {
                if let Some(statement) = self.generate_jump_statement(*target)? {
                    out.push(statement);
                }
            }
            Instruction::Branch {
                condition,
                operand,
                consequent,
                alternative,
            } => {
                let condition = Expr::UnaryCondition {
                    condition: *condition,
                    operand: Expr::var(*operand),
                };
                self.branch(condition, *consequent, *alternative, out)?;
            }
            Instruction::BinaryBranch {
                condition,
                lhs,
                rhs,
                consequent,
                alternative,
            } => {
                let condition = Expr::BinaryCondition {
                    condition: *condition,
                    lhs: Expr::var(*lhs),
                    rhs: Expr::var(*rhs),
                };
                self.branch(condition, *consequent, *alternative, out)?;
            }
            Instruction::Switch {
                condition,
                entries,
                default_target,
            } => {
                // One clause per distinct target, in first-occurrence
                // order, so equal arms share a body.
                let mut targets: Vec<usize> = Vec::new();
                let mut clauses: Vec<SwitchClause> = Vec::new();
                for entry in entries {
                    match targets.iter().position(|&target| target == entry.target) {
                        Some(index) => clauses[index].conditions.push(entry.condition),
                        None => {
                            targets.push(entry.target);
                            clauses.push(SwitchClause {
                                conditions: vec![entry.condition],
                                body: self.generate_jump_statement(entry.target)?
                                    .into_iter()
                                    .collect(),
                            });
                        }
                    }
                }
                let id = LabelId(self.next_label);
                self.next_label += 1;
                out.push(Statement::Switch {
                    id,
                    value: Expr::Variable(*condition),
                    clauses,
                    default_clause: self
                        .generate_jump_statement(*default_target)?
                        .into_iter()
                        .collect(),
                });
            }
            Instruction::Return { value } => out.push(Statement::Return {
                value: value.map(Expr::Variable),
            }),
            Instruction::Throw { exception } => out.push(Statement::Throw {
                exception: Expr::Variable(*exception),
            }),
        }
        Ok(())
    }

    fn branch(
        &mut self,
        condition: Expr,
        consequent: usize,
        alternative: usize,
        out: &mut Vec<Statement>,
    ) -> Result<(), InstructionLoweringError> {
        let consequent = self.generate_jump_statement(consequent)?;
        let alternative = self.generate_jump_statement(alternative)?;
        out.push(Statement::Conditional {
            condition,
            consequent: consequent.into_iter().collect(),
            alternative: alternative.into_iter().collect(),
        });
        Ok(())
    }

    /// Resolves a transfer to `target`: `None` for fall-through, `break`
    /// when the innermost covering block ends at the target, `continue`
    /// when it is the loop headed there.
    pub(super) fn generate_jump_statement(
        &self,
        target: usize,
    ) -> Result<Option<Statement>, InstructionLoweringError> {
        if self.next_block == Some(target) && self.block_map[target].is_none() {
            return Ok(None);
        }
        let block = self.block_map[target]
            .ok_or(InstructionLoweringError::UnresolvedJump { target })?;
        let block = &self.blocks[block];
        if self.indexer.node_at(block.end) == Some(target) {
            Ok(Some(Statement::Break {
                target: block.label,
            }))
        } else {
            Ok(Some(Statement::Continue {
                target: block.label,
            }))
        }
    }
}

fn push_assign(out: &mut Vec<Statement>, receiver: VarId, value: Expr) {
    out.push(Statement::assign(Expr::Variable(receiver), value));
}
