use super::Expr;
use crate::model::VarId;
use core::fmt;
use displaydoc::Display;

// Label of a lexical block or loop, unique within one decompiled part.
// Labels are handed out in order of block creation, starting from 1.
/// block{0}
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchClause {
    pub conditions: Vec<i32>,
    pub body: Vec<Statement>,
}

/// The structured statement tree. The only control transfers are
/// `Break`/`Continue` to an enclosing label and `GotoPart` between async
/// parts; arbitrary gotos do not survive decompilation.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// `target = value`, or a bare expression evaluated for effect when
    /// `target` is `None`.
    Assignment {
        target: Option<Expr>,
        value: Expr,
    },
    Sequential {
        statements: Vec<Statement>,
    },
    Block {
        id: LabelId,
        body: Vec<Statement>,
    },
    /// `condition` is `None` for `while (true)`; the generator always
    /// emits `None` and leaves condition hoisting to the optimizer.
    While {
        id: LabelId,
        condition: Option<Expr>,
        body: Vec<Statement>,
    },
    Conditional {
        condition: Expr,
        consequent: Vec<Statement>,
        alternative: Vec<Statement>,
    },
    Switch {
        id: LabelId,
        value: Expr,
        clauses: Vec<SwitchClause>,
        default_clause: Vec<Statement>,
    },
    Break {
        target: LabelId,
    },
    Continue {
        target: LabelId,
    },
    Return {
        value: Option<Expr>,
    },
    Throw {
        exception: Expr,
    },
    TryCatch {
        protected_body: Vec<Statement>,
        exception_type: Option<String>,
        exception_variable: Option<VarId>,
        handler: Vec<Statement>,
    },
    GotoPart {
        part: usize,
    },
}

impl Statement {
    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::Assignment {
            target: Some(target),
            value,
        }
    }

    pub fn effect(value: Expr) -> Self {
        Self::Assignment {
            target: None,
            value,
        }
    }
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &[Statement]) -> fmt::Result {
    writeln!(f, "{{")?;
    for stmt in body {
        writeln!(f, "{stmt}")?;
    }
    write!(f, "}}")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assignment { target, value } => match target {
                Some(target) => write!(f, "{target} = {value};"),
                None => write!(f, "{value};"),
            },
            Self::Sequential { statements } => {
                for (i, stmt) in statements.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{stmt}")?;
                }
                Ok(())
            }
            Self::Block { id, body } => {
                write!(f, "{id}: ")?;
                write_body(f, body)
            }
            Self::While {
                id,
                condition,
                body,
            } => {
                match condition {
                    Some(condition) => write!(f, "{id}: while ({condition}) ")?,
                    None => write!(f, "{id}: while (true) ")?,
                }
                write_body(f, body)
            }
            Self::Conditional {
                condition,
                consequent,
                alternative,
            } => {
                write!(f, "if ({condition}) ")?;
                write_body(f, consequent)?;
                if !alternative.is_empty() {
                    write!(f, " else ")?;
                    write_body(f, alternative)?;
                }
                Ok(())
            }
            Self::Switch {
                id,
                value,
                clauses,
                default_clause,
            } => {
                writeln!(f, "{id}: switch ({value}) {{")?;
                for clause in clauses {
                    for condition in &clause.conditions {
                        writeln!(f, "case {condition}:")?;
                    }
                    for stmt in &clause.body {
                        writeln!(f, "{stmt}")?;
                    }
                }
                if !default_clause.is_empty() {
                    writeln!(f, "default:")?;
                    for stmt in default_clause {
                        writeln!(f, "{stmt}")?;
                    }
                }
                write!(f, "}}")
            }
            Self::Break { target } => write!(f, "break {target};"),
            Self::Continue { target } => write!(f, "continue {target};"),
            Self::Return { value } => match value {
                Some(value) => write!(f, "return {value};"),
                None => write!(f, "return;"),
            },
            Self::Throw { exception } => write!(f, "throw {exception};"),
            Self::TryCatch {
                protected_body,
                exception_type,
                exception_variable,
                handler,
            } => {
                write!(f, "try ")?;
                write_body(f, protected_body)?;
                match (exception_type, exception_variable) {
                    (Some(class), Some(var)) => write!(f, " catch ({class} {var}) ")?,
                    (Some(class), None) => write!(f, " catch ({class}) ")?,
                    (None, Some(var)) => write!(f, " catch ({var}) ")?,
                    (None, None) => write!(f, " catch ")?,
                }
                write_body(f, handler)
            }
            Self::GotoPart { part } => write!(f, "goto part {part};"),
        }
    }
}
