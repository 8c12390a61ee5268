use super::{FieldReference, MethodReference, ValueType, VarId};
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumericType {
    Int,
    Long,
    Float,
    Double,
}

impl NumericType {
    pub fn value_type(self) -> ValueType {
        match self {
            Self::Int => ValueType::Int,
            Self::Long => ValueType::Long,
            Self::Float => ValueType::Float,
            Self::Double => ValueType::Double,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
    ShiftRightUnsigned,
    Compare,
}

/// Single-operand branch: the operand is compared against zero (or null for
/// the reference conditions).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BranchCondition {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Null,
    NotNull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryBranchCondition {
    Equal,
    NotEqual,
    ReferenceEqual,
    ReferenceNotEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwitchTableEntry {
    pub condition: i32,
    pub target: usize,
}

/// The instruction variant the statement generator matches over. All
/// operands are variables; nested expressions only appear in the output
/// AST, never here.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    ConstNull {
        receiver: VarId,
    },
    ConstInt {
        receiver: VarId,
        value: i32,
    },
    ConstLong {
        receiver: VarId,
        value: i64,
    },
    ConstFloat {
        receiver: VarId,
        value: f32,
    },
    ConstDouble {
        receiver: VarId,
        value: f64,
    },
    ConstString {
        receiver: VarId,
        value: String,
    },
    ConstClass {
        receiver: VarId,
        class: String,
    },
    Assign {
        receiver: VarId,
        assignee: VarId,
    },
    Binary {
        receiver: VarId,
        op: BinaryOp,
        lhs: VarId,
        rhs: VarId,
        operands: NumericType,
    },
    Negate {
        receiver: VarId,
        operand: VarId,
        operands: NumericType,
    },
    CastPrimitive {
        receiver: VarId,
        value: VarId,
        from: NumericType,
        to: NumericType,
    },
    CastReference {
        receiver: VarId,
        value: VarId,
        class: String,
    },
    GetField {
        receiver: VarId,
        /// `None` for static fields.
        instance: Option<VarId>,
        field: FieldReference,
        field_type: ValueType,
    },
    PutField {
        instance: Option<VarId>,
        field: FieldReference,
        field_type: ValueType,
        value: VarId,
    },
    GetElement {
        receiver: VarId,
        array: VarId,
        index: VarId,
        element_type: ValueType,
    },
    PutElement {
        array: VarId,
        index: VarId,
        value: VarId,
    },
    ArrayLength {
        receiver: VarId,
        array: VarId,
    },
    CreateArray {
        receiver: VarId,
        element_class: String,
        length: VarId,
    },
    Construct {
        receiver: VarId,
        class: String,
    },
    Invoke {
        /// `None` when the callee returns void or the result is dropped.
        receiver: Option<VarId>,
        /// `None` for static calls.
        instance: Option<VarId>,
        method: MethodReference,
        arguments: Vec<VarId>,
    },
    InitClass {
        class: String,
    },
    NullCheck {
        receiver: VarId,
        value: VarId,
    },
    MonitorEnter {
        object: VarId,
    },
    MonitorExit {
        object: VarId,
    },
    /// Entry marker of a non-initial async part: restores the suspended
    /// frame. Lowered to an opaque statement.
    Resume {
        receiver: Option<VarId>,
    },
    Jump {
        target: usize,
    },
    Branch {
        condition: BranchCondition,
        operand: VarId,
        consequent: usize,
        alternative: usize,
    },
    BinaryBranch {
        condition: BinaryBranchCondition,
        lhs: VarId,
        rhs: VarId,
        consequent: usize,
        alternative: usize,
    },
    Switch {
        condition: VarId,
        entries: Vec<SwitchTableEntry>,
        default_target: usize,
    },
    Return {
        value: Option<VarId>,
    },
    Throw {
        exception: VarId,
    },
}

impl Instruction {
    /// The variable this instruction writes, if any.
    pub fn defined_var(&self) -> Option<VarId> {
        match *self {
            Self::ConstNull { receiver }
            | Self::ConstInt { receiver, .. }
            | Self::ConstLong { receiver, .. }
            | Self::ConstFloat { receiver, .. }
            | Self::ConstDouble { receiver, .. }
            | Self::ConstString { receiver, .. }
            | Self::ConstClass { receiver, .. }
            | Self::Assign { receiver, .. }
            | Self::Binary { receiver, .. }
            | Self::Negate { receiver, .. }
            | Self::CastPrimitive { receiver, .. }
            | Self::CastReference { receiver, .. }
            | Self::GetField { receiver, .. }
            | Self::GetElement { receiver, .. }
            | Self::ArrayLength { receiver, .. }
            | Self::CreateArray { receiver, .. }
            | Self::Construct { receiver, .. }
            | Self::NullCheck { receiver, .. } => Some(receiver),
            Self::Invoke { receiver, .. } | Self::Resume { receiver } => receiver,
            _ => None,
        }
    }

    /// Appends every variable this instruction reads.
    pub fn collect_used_vars(&self, out: &mut Vec<VarId>) {
        match self {
            Self::Nop
            | Self::ConstNull { .. }
            | Self::ConstInt { .. }
            | Self::ConstLong { .. }
            | Self::ConstFloat { .. }
            | Self::ConstDouble { .. }
            | Self::ConstString { .. }
            | Self::ConstClass { .. }
            | Self::Construct { .. }
            | Self::InitClass { .. }
            | Self::Resume { .. }
            | Self::Jump { .. }
            | Self::Return { value: None } => {}
            Self::Assign { assignee, .. } => out.push(*assignee),
            Self::Binary { lhs, rhs, .. } => out.extend([*lhs, *rhs]),
            Self::Negate { operand, .. } => out.push(*operand),
            Self::CastPrimitive { value, .. }
            | Self::CastReference { value, .. }
            | Self::NullCheck { value, .. } => out.push(*value),
            Self::GetField { instance, .. } => out.extend(*instance),
            Self::PutField {
                instance, value, ..
            } => {
                out.extend(*instance);
                out.push(*value);
            }
            Self::GetElement { array, index, .. } => out.extend([*array, *index]),
            Self::PutElement {
                array,
                index,
                value,
            } => out.extend([*array, *index, *value]),
            Self::ArrayLength { array, .. } => out.push(*array),
            Self::CreateArray { length, .. } => out.push(*length),
            Self::Invoke {
                instance,
                arguments,
                ..
            } => {
                out.extend(*instance);
                out.extend_from_slice(arguments);
            }
            Self::MonitorEnter { object } | Self::MonitorExit { object } => out.push(*object),
            Self::Branch { operand, .. } => out.push(*operand),
            Self::BinaryBranch { lhs, rhs, .. } => out.extend([*lhs, *rhs]),
            Self::Switch { condition, .. } => out.push(*condition),
            Self::Return { value: Some(value) } => out.push(*value),
            Self::Throw { exception } => out.push(*exception),
        }
    }

    /// Whether execution of this instruction can transfer to an active
    /// exception handler.
    pub fn can_throw(&self) -> bool {
        matches!(
            self,
            Self::Binary {
                op: BinaryOp::Divide | BinaryOp::Modulo,
                operands: NumericType::Int | NumericType::Long,
                ..
            } | Self::CastReference { .. }
                | Self::GetField { .. }
                | Self::PutField { .. }
                | Self::GetElement { .. }
                | Self::PutElement { .. }
                | Self::ArrayLength { .. }
                | Self::CreateArray { .. }
                | Self::Construct { .. }
                | Self::Invoke { .. }
                | Self::InitClass { .. }
                | Self::NullCheck { .. }
                | Self::MonitorEnter { .. }
                | Self::MonitorExit { .. }
                | Self::Throw { .. }
        )
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. }
                | Self::Branch { .. }
                | Self::BinaryBranch { .. }
                | Self::Switch { .. }
                | Self::Return { .. }
                | Self::Throw { .. }
        )
    }

    /// Successor blocks of a terminator, in branch order. Empty for
    /// non-terminators and for `return`/`throw`.
    pub fn successors(&self, out: &mut Vec<usize>) {
        match self {
            Self::Jump { target } => out.push(*target),
            Self::Branch {
                consequent,
                alternative,
                ..
            }
            | Self::BinaryBranch {
                consequent,
                alternative,
                ..
            } => out.extend([*consequent, *alternative]),
            Self::Switch {
                entries,
                default_target,
                ..
            } => {
                out.extend(entries.iter().map(|entry| entry.target));
                out.push(*default_target);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "nop"),
            Self::ConstNull { receiver } => write!(f, "{receiver} := null"),
            Self::ConstInt { receiver, value } => write!(f, "{receiver} := {value}"),
            Self::ConstLong { receiver, value } => write!(f, "{receiver} := {value}L"),
            Self::ConstFloat { receiver, value } => write!(f, "{receiver} := {value}f"),
            Self::ConstDouble { receiver, value } => write!(f, "{receiver} := {value}d"),
            Self::ConstString { receiver, value } => write!(f, "{receiver} := {value:?}"),
            Self::ConstClass { receiver, class } => write!(f, "{receiver} := {class}.class"),
            Self::Assign { receiver, assignee } => write!(f, "{receiver} := {assignee}"),
            Self::Binary {
                receiver,
                op,
                lhs,
                rhs,
                ..
            } => write!(f, "{receiver} := {lhs} {op:?} {rhs}"),
            Self::Negate {
                receiver, operand, ..
            } => write!(f, "{receiver} := -{operand}"),
            Self::CastPrimitive {
                receiver,
                value,
                from,
                to,
            } => write!(f, "{receiver} := cast {value} {from:?} -> {to:?}"),
            Self::CastReference {
                receiver,
                value,
                class,
            } => write!(f, "{receiver} := cast {value} to {class}"),
            Self::GetField {
                receiver,
                instance,
                field,
                ..
            } => match instance {
                Some(instance) => write!(f, "{receiver} := {instance}.{}", field.name),
                None => write!(f, "{receiver} := {field}"),
            },
            Self::PutField {
                instance,
                field,
                value,
                ..
            } => match instance {
                Some(instance) => write!(f, "{instance}.{} := {value}", field.name),
                None => write!(f, "{field} := {value}"),
            },
            Self::GetElement {
                receiver,
                array,
                index,
                ..
            } => write!(f, "{receiver} := {array}[{index}]"),
            Self::PutElement {
                array,
                index,
                value,
            } => write!(f, "{array}[{index}] := {value}"),
            Self::ArrayLength { receiver, array } => write!(f, "{receiver} := {array}.length"),
            Self::CreateArray {
                receiver,
                element_class,
                length,
            } => write!(f, "{receiver} := new {element_class}[{length}]"),
            Self::Construct { receiver, class } => write!(f, "{receiver} := new {class}"),
            Self::Invoke {
                receiver,
                instance,
                method,
                arguments,
            } => {
                if let Some(receiver) = receiver {
                    write!(f, "{receiver} := ")?;
                }
                match instance {
                    Some(instance) => write!(f, "{instance}.{}(", method.name)?,
                    None => write!(f, "{}.{}(", method.class, method.name)?,
                }
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::InitClass { class } => write!(f, "initclass {class}"),
            Self::NullCheck { receiver, value } => write!(f, "{receiver} := nullcheck {value}"),
            Self::MonitorEnter { object } => write!(f, "lock {object}"),
            Self::MonitorExit { object } => write!(f, "unlock {object}"),
            Self::Resume { receiver } => match receiver {
                Some(receiver) => write!(f, "{receiver} := resume"),
                None => write!(f, "resume"),
            },
            Self::Jump { target } => write!(f, "goto ${target}"),
            Self::Branch {
                condition,
                operand,
                consequent,
                alternative,
            } => write!(
                f,
                "if {operand} {condition:?} 0 goto ${consequent} else ${alternative}",
            ),
            Self::BinaryBranch {
                condition,
                lhs,
                rhs,
                consequent,
                alternative,
            } => write!(
                f,
                "if {lhs} {condition:?} {rhs} goto ${consequent} else ${alternative}",
            ),
            Self::Switch {
                condition,
                entries,
                default_target,
            } => {
                write!(f, "switch {condition} ")?;
                for entry in entries {
                    write!(f, "{} -> ${}; ", entry.condition, entry.target)?;
                }
                write!(f, "default -> ${default_target}")
            }
            Self::Return { value } => match value {
                Some(value) => write!(f, "return {value}"),
                None => write!(f, "return"),
            },
            Self::Throw { exception } => write!(f, "throw {exception}"),
        }
    }
}
