//! Quantified invariants over randomly generated structured programs.
//!
//! The generator only produces shapes a compiler for a structured language
//! could emit (sequences, two-way branches, top-tested loops), so every
//! generated CFG is reducible and decompilation must succeed. The checks
//! then hold the output to the structural contract: every emitted jump
//! names a lexically enclosing label, and register colours never collide
//! within a live set.

mod common;

use common::{method, program, var};
use proptest::prelude::*;
use rustc_hash::FxHashSet;
use unflat::ast::{LabelId, Statement};
use unflat::liveness::LivenessAnalyzer;
use unflat::model::{BasicBlock, BranchCondition, Instruction, NoClasses, Program};
use unflat::regalloc::{kind_class, RegisterAllocator};
use unflat::typing::TypeInferer;
use unflat::Decompiler;

#[derive(Clone, Debug)]
enum Shape {
    Simple,
    If(Vec<Shape>, Vec<Shape>),
    Loop(Vec<Shape>),
}

fn shapes() -> impl Strategy<Value = Vec<Shape>> {
    let node = Just(Shape::Simple).prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            2 => (
                prop::collection::vec(inner.clone(), 0..3),
                prop::collection::vec(inner.clone(), 0..3),
            )
                .prop_map(|(then_body, else_body)| Shape::If(then_body, else_body)),
            1 => prop::collection::vec(inner, 1..3).prop_map(Shape::Loop),
        ]
    });
    prop::collection::vec(node, 1..4)
}

struct Builder {
    blocks: Vec<BasicBlock>,
    counter: i32,
}

impl Builder {
    fn build(shapes: &[Shape]) -> Program {
        let mut builder = Builder {
            blocks: vec![BasicBlock::default()],
            counter: 0,
        };
        let last = builder.emit_sequence(0, shapes);
        builder.blocks[last]
            .instructions
            .push(Instruction::Return { value: None });
        let blocks = builder.blocks;
        program(blocks, 1)
    }

    fn fresh(&mut self) -> usize {
        self.blocks.push(BasicBlock::default());
        self.blocks.len() - 1
    }

    fn pad(&mut self, block: usize) {
        self.counter += 1;
        let value = self.counter;
        self.blocks[block].instructions.push(Instruction::ConstInt {
            receiver: var(0),
            value,
        });
    }

    /// Emits `shapes` starting in the open block `current`; returns the
    /// open block control ends up in.
    fn emit_sequence(&mut self, mut current: usize, shapes: &[Shape]) -> usize {
        for shape in shapes {
            current = self.emit_shape(current, shape);
        }
        current
    }

    fn emit_shape(&mut self, current: usize, shape: &Shape) -> usize {
        match shape {
            Shape::Simple => {
                self.pad(current);
                current
            }
            Shape::If(then_body, else_body) => {
                let then_entry = self.fresh();
                let else_entry = self.fresh();
                self.blocks[current].instructions.push(Instruction::Branch {
                    condition: BranchCondition::NotEqual,
                    operand: var(0),
                    consequent: then_entry,
                    alternative: else_entry,
                });
                let then_exit = self.emit_sequence(then_entry, then_body);
                let else_exit = self.emit_sequence(else_entry, else_body);
                let join = self.fresh();
                self.blocks[then_exit]
                    .instructions
                    .push(Instruction::Jump { target: join });
                self.blocks[else_exit]
                    .instructions
                    .push(Instruction::Jump { target: join });
                join
            }
            Shape::Loop(body) => {
                let header = self.fresh();
                self.blocks[current]
                    .instructions
                    .push(Instruction::Jump { target: header });
                let body_entry = self.fresh();
                let exit = self.fresh();
                self.blocks[header].instructions.push(Instruction::Branch {
                    condition: BranchCondition::NotEqual,
                    operand: var(0),
                    consequent: body_entry,
                    alternative: exit,
                });
                let body_exit = self.emit_sequence(body_entry, body);
                self.blocks[body_exit]
                    .instructions
                    .push(Instruction::Jump { target: header });
                exit
            }
        }
    }
}

/// Every `break`/`continue` must name a label of a lexically enclosing
/// statement at the point it appears.
fn check_enclosure(statements: &[Statement], open: &mut Vec<LabelId>) -> Result<(), String> {
    for statement in statements {
        match statement {
            Statement::Break { target } | Statement::Continue { target } => {
                if !open.contains(target) {
                    return Err(format!("jump to {target} outside its block"));
                }
            }
            Statement::Sequential { statements } => check_enclosure(statements, open)?,
            Statement::Block { id, body } | Statement::While { id, body, .. } => {
                open.push(*id);
                check_enclosure(body, open)?;
                open.pop();
            }
            Statement::Conditional {
                consequent,
                alternative,
                ..
            } => {
                check_enclosure(consequent, open)?;
                check_enclosure(alternative, open)?;
            }
            Statement::Switch {
                id,
                clauses,
                default_clause,
                ..
            } => {
                open.push(*id);
                for clause in clauses {
                    check_enclosure(&clause.body, open)?;
                }
                check_enclosure(default_clause, open)?;
                open.pop();
            }
            Statement::TryCatch {
                protected_body,
                handler,
                ..
            } => {
                check_enclosure(protected_body, open)?;
                check_enclosure(handler, open)?;
            }
            _ => {}
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn reducible_programs_decompile_with_enclosed_jumps(shapes in shapes()) {
        let p = Builder::build(&shapes);
        let node = Decompiler::new(&NoClasses, FxHashSet::default(), true)
            .decompile_regular(&method("generated"), &[], &p)
            .expect("structured programs always fold");
        let Statement::Sequential { statements } = &node.body else {
            panic!("sequential result");
        };
        let mut open = Vec::new();
        prop_assert!(check_enclosure(statements, &mut open).is_ok());
    }

    #[test]
    fn register_colors_never_collide_in_live_sets(shapes in shapes()) {
        let p = Builder::build(&shapes);
        let types = TypeInferer::infer(&p).expect("generated programs type-check");
        let liveness = LivenessAnalyzer::analyze(&p);
        let colors = RegisterAllocator::new(&p, &types)
            .allocate_with(&liveness);

        for (index, block) in p.blocks.iter().enumerate() {
            let live_outs = liveness.instruction_live_outs(&p, index);
            for (insn, live) in block.instructions.iter().zip(&live_outs) {
                let Some(def) = insn.defined_var() else { continue };
                for &other in live {
                    if other != def
                        && kind_class(types.type_of(other)) == kind_class(types.type_of(def))
                    {
                        prop_assert_ne!(colors[def.index()], colors[other.index()]);
                    }
                }
            }
        }
    }
}
