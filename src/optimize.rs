//! The post-decompilation optimizer contract.
//!
//! The heavy rewriting (expression inlining, condition hoisting, loop
//! shaping) lives with the backends; the core only guarantees the
//! collaborator seam and ships the label-hygiene subset every backend
//! wants: blocks whose label nothing jumps to are spliced into their
//! parent, and a loop ending in `continue` of itself loses the redundant
//! statement. Both rewrites reach a fixpoint in one application, so a
//! second pass is a no-op.

use crate::ast::{AsyncMethodNode, LabelId, RegularMethodNode, Statement};
use crate::model::Program;
use rustc_hash::FxHashSet;

pub trait Optimizer {
    fn optimize_regular(
        &self,
        node: &mut RegularMethodNode,
        program: &Program,
        friendly_to_debugger: bool,
    );

    fn optimize_async(
        &self,
        node: &mut AsyncMethodNode,
        program: &Program,
        friendly_to_debugger: bool,
    );
}

/// The default optimizer. Under `friendly_to_debugger` the tree is kept
/// exactly as generated, one statement per bytecode instruction.
pub struct LabelCleanup;

impl Optimizer for LabelCleanup {
    fn optimize_regular(
        &self,
        node: &mut RegularMethodNode,
        _program: &Program,
        friendly_to_debugger: bool,
    ) {
        if !friendly_to_debugger {
            cleanup(&mut node.body);
        }
    }

    fn optimize_async(
        &self,
        node: &mut AsyncMethodNode,
        _program: &Program,
        friendly_to_debugger: bool,
    ) {
        if !friendly_to_debugger {
            for part in &mut node.parts {
                cleanup(&mut part.statement);
            }
        }
    }
}

fn cleanup(statement: &mut Statement) {
    let mut referenced = FxHashSet::default();
    collect_referenced(statement, &mut referenced);
    let mut statements = vec![core::mem::replace(
        statement,
        Statement::Sequential {
            statements: Vec::new(),
        },
    )];
    splice_unreferenced(&mut statements, &referenced);
    trim_trailing_continues(&mut statements);
    *statement = if statements.len() == 1 {
        statements.pop().expect("checked length")
    } else {
        Statement::Sequential { statements }
    };
}

fn collect_referenced(statement: &Statement, referenced: &mut FxHashSet<LabelId>) {
    match statement {
        Statement::Break { target } | Statement::Continue { target } => {
            referenced.insert(*target);
        }
        _ => {}
    }
    for_each_child_list(statement, &mut |body| {
        for child in body {
            collect_referenced(child, referenced);
        }
    });
}

/// Replaces `block L { body }` by `body` wherever no jump names `L`.
fn splice_unreferenced(statements: &mut Vec<Statement>, referenced: &FxHashSet<LabelId>) {
    let mut index = 0;
    while index < statements.len() {
        for_each_child_list_mut(&mut statements[index], &mut |body| {
            splice_unreferenced(body, referenced);
        });
        match &mut statements[index] {
            Statement::Block { id, body } if !referenced.contains(id) => {
                let body = core::mem::take(body);
                statements.splice(index..=index, body);
            }
            _ => index += 1,
        }
    }
}

fn trim_trailing_continues(statements: &mut Vec<Statement>) {
    for statement in statements.iter_mut() {
        for_each_child_list_mut(statement, &mut trim_trailing_continues);
        if let Statement::While { id, body, .. } = statement {
            while matches!(body.last(), Some(Statement::Continue { target }) if target == id) {
                body.pop();
            }
        }
    }
}

fn for_each_child_list(statement: &Statement, visit: &mut impl FnMut(&Vec<Statement>)) {
    match statement {
        Statement::Sequential { statements } => visit(statements),
        Statement::Block { body, .. } | Statement::While { body, .. } => visit(body),
        Statement::Conditional {
            consequent,
            alternative,
            ..
        } => {
            visit(consequent);
            visit(alternative);
        }
        Statement::Switch {
            clauses,
            default_clause,
            ..
        } => {
            for clause in clauses {
                visit(&clause.body);
            }
            visit(default_clause);
        }
        Statement::TryCatch {
            protected_body,
            handler,
            ..
        } => {
            visit(protected_body);
            visit(handler);
        }
        _ => {}
    }
}

fn for_each_child_list_mut(statement: &mut Statement, visit: &mut impl FnMut(&mut Vec<Statement>)) {
    match statement {
        Statement::Sequential { statements } => visit(statements),
        Statement::Block { body, .. } | Statement::While { body, .. } => visit(body),
        Statement::Conditional {
            consequent,
            alternative,
            ..
        } => {
            visit(consequent);
            visit(alternative);
        }
        Statement::Switch {
            clauses,
            default_clause,
            ..
        } => {
            for clause in clauses {
                visit(&mut clause.body);
            }
            visit(default_clause);
        }
        Statement::TryCatch {
            protected_body,
            handler,
            ..
        } => {
            visit(protected_body);
            visit(handler);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn block(id: u32, body: Vec<Statement>) -> Statement {
        Statement::Block {
            id: LabelId(id),
            body,
        }
    }

    #[test]
    fn unreferenced_blocks_are_spliced() {
        let mut statement = Statement::Sequential {
            statements: vec![block(
                1,
                vec![
                    block(2, vec![Statement::Return { value: None }]),
                    Statement::Break {
                        target: LabelId(1),
                    },
                ],
            )],
        };
        cleanup(&mut statement);
        // Block 1 is referenced and survives; block 2 dissolves.
        let Statement::Block { id, body } = &statement else {
            panic!("expected the referenced block, got {statement}");
        };
        assert_eq!(*id, LabelId(1));
        assert!(matches!(body[0], Statement::Return { value: None }));
    }

    #[test]
    fn trailing_continue_of_a_loop_is_dropped() {
        let mut statement = Statement::While {
            id: LabelId(1),
            condition: None,
            body: vec![
                Statement::effect(Expr::ConstInt(1)),
                Statement::Continue {
                    target: LabelId(1),
                },
            ],
        };
        cleanup(&mut statement);
        let Statement::While { body, .. } = &statement else {
            panic!("loop survives cleanup");
        };
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut statement = Statement::While {
            id: LabelId(1),
            condition: None,
            body: vec![block(
                2,
                vec![
                    Statement::effect(Expr::ConstInt(7)),
                    Statement::Continue {
                        target: LabelId(1),
                    },
                ],
            )],
        };
        cleanup(&mut statement);
        let once = statement.clone();
        cleanup(&mut statement);
        assert_eq!(statement, once);
    }
}
