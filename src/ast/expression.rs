use crate::model::{
    BinaryBranchCondition, BinaryOp, BranchCondition, FieldReference, MethodReference,
    NumericType, VarId,
};
use core::fmt;

/// Expressions of the output tree. Unlike the input IR, these nest; the
/// statement generator only ever builds trees of depth one or two per
/// instruction, and the optimizer collaborator may inline further.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Variable(VarId),
    ConstNull,
    ConstInt(i32),
    ConstLong(i64),
    ConstFloat(f32),
    ConstDouble(f64),
    ConstString(String),
    ConstClass(String),
    Binary {
        op: BinaryOp,
        operands: NumericType,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Negate {
        operands: NumericType,
        operand: Box<Expr>,
    },
    CastPrimitive {
        from: NumericType,
        to: NumericType,
        value: Box<Expr>,
    },
    CastReference {
        class: String,
        value: Box<Expr>,
    },
    Field {
        /// `None` for static fields.
        instance: Option<Box<Expr>>,
        field: FieldReference,
    },
    Element {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayLength {
        array: Box<Expr>,
    },
    NewArray {
        element_class: String,
        length: Box<Expr>,
    },
    NewObject {
        class: String,
    },
    Invocation {
        method: MethodReference,
        /// `None` for static calls.
        instance: Option<Box<Expr>>,
        arguments: Vec<Expr>,
    },
    InitClass {
        class: String,
    },
    NullCheck {
        value: Box<Expr>,
    },
    /// The operand compared against zero (or null for reference kinds).
    UnaryCondition {
        condition: BranchCondition,
        operand: Box<Expr>,
    },
    BinaryCondition {
        condition: BinaryBranchCondition,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    MonitorEnter {
        object: Box<Expr>,
    },
    MonitorExit {
        object: Box<Expr>,
    },
    /// The exception bound on entry to a handler block.
    CaughtException,
    /// Opaque frame restore at the entry of a non-initial async part.
    RestoreState,
}

impl Expr {
    pub fn var(var: VarId) -> Box<Self> {
        Box::new(Self::Variable(var))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(var) => write!(f, "{var}"),
            Self::ConstNull => write!(f, "null"),
            Self::ConstInt(value) => write!(f, "{value}"),
            Self::ConstLong(value) => write!(f, "{value}L"),
            Self::ConstFloat(value) => write!(f, "{value}f"),
            Self::ConstDouble(value) => write!(f, "{value}d"),
            Self::ConstString(value) => write!(f, "{value:?}"),
            Self::ConstClass(class) => write!(f, "{class}.class"),
            Self::Binary { op, lhs, rhs, .. } => write!(f, "({lhs} {op:?} {rhs})"),
            Self::Negate { operand, .. } => write!(f, "-({operand})"),
            Self::CastPrimitive { to, value, .. } => write!(f, "({value} as {to:?})"),
            Self::CastReference { class, value } => write!(f, "({value} as {class})"),
            Self::Field { instance, field } => match instance {
                Some(instance) => write!(f, "({instance}).{}", field.name),
                None => write!(f, "{field}"),
            },
            Self::Element { array, index } => write!(f, "({array})[{index}]"),
            Self::ArrayLength { array } => write!(f, "({array}).length"),
            Self::NewArray {
                element_class,
                length,
            } => write!(f, "new {element_class}[{length}]"),
            Self::NewObject { class } => write!(f, "new {class}"),
            Self::Invocation {
                method,
                instance,
                arguments,
            } => {
                match instance {
                    Some(instance) => write!(f, "({instance}).{}(", method.name)?,
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
            Self::NullCheck { value } => write!(f, "nullcheck({value})"),
            Self::UnaryCondition { condition, operand } => {
                write!(f, "({operand} {condition:?} 0)")
            }
            Self::BinaryCondition {
                condition,
                lhs,
                rhs,
            } => write!(f, "({lhs} {condition:?} {rhs})"),
            Self::MonitorEnter { object } => write!(f, "lock({object})"),
            Self::MonitorExit { object } => write!(f, "unlock({object})"),
            Self::CaughtException => write!(f, "$exception"),
            Self::RestoreState => write!(f, "$restore"),
        }
    }
}
