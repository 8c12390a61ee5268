//! Backward liveness dataflow over the original program.
//!
//! Runs on the pre-decompilation program, independent of the statement
//! tree. Exception edges are included conservatively: an instruction that
//! may throw treats every active handler's entry live-in as part of its
//! live-out, and the handler edge also joins the block-level sets. The
//! per-instruction sets this produces are what the register allocator
//! builds its interference graph from.

use crate::graph::build_control_flow_graph;
use crate::model::{Program, VarId};
use rustc_hash::FxHashSet;

pub type LiveSet = FxHashSet<VarId>;

pub struct LivenessAnalyzer {
    live_in: Vec<LiveSet>,
    live_out: Vec<LiveSet>,
}

impl LivenessAnalyzer {
    pub fn analyze(program: &Program) -> Self {
        let graph = build_control_flow_graph(program);
        let count = program.basic_block_count();
        let mut analyzer = Self {
            live_in: vec![LiveSet::default(); count],
            live_out: vec![LiveSet::default(); count],
        };

        let mut changed = true;
        while changed {
            changed = false;
            // Backward problem: iterating blocks in reverse converges in
            // few passes on reducible graphs.
            for block in (0..count).rev() {
                let mut out = LiveSet::default();
                for &successor in graph.outgoing_edges(block) {
                    out.extend(analyzer.live_in[successor].iter().copied());
                }
                let live_in = analyzer.block_live_in(program, block, &out);
                if out != analyzer.live_out[block] {
                    analyzer.live_out[block] = out;
                    changed = true;
                }
                if live_in != analyzer.live_in[block] {
                    analyzer.live_in[block] = live_in;
                    changed = true;
                }
            }
        }
        analyzer
    }

    pub fn live_in(&self, block: usize) -> &LiveSet {
        &self.live_in[block]
    }

    pub fn live_out(&self, block: usize) -> &LiveSet {
        &self.live_out[block]
    }

    /// Live sets immediately after each instruction of `block`, in
    /// instruction order. Index `i` is the set across the throw edges and
    /// fall-through of instruction `i`.
    pub fn instruction_live_outs(&self, program: &Program, block: usize) -> Vec<LiveSet> {
        let source = &program.blocks[block];
        let mut live = self.live_out[block].clone();
        let mut result = vec![LiveSet::default(); source.instructions.len()];
        let mut uses = Vec::new();
        for (index, insn) in source.instructions.iter().enumerate().rev() {
            if insn.can_throw() {
                for range in &source.try_catch {
                    live.extend(self.live_in[range.handler].iter().copied());
                }
            }
            result[index] = live.clone();
            if let Some(def) = insn.defined_var() {
                live.remove(&def);
            }
            uses.clear();
            insn.collect_used_vars(&mut uses);
            live.extend(uses.iter().copied());
        }
        result
    }

    fn block_live_in(&self, program: &Program, block: usize, out: &LiveSet) -> LiveSet {
        let source = &program.blocks[block];
        let mut live = out.clone();
        let mut uses = Vec::new();
        for insn in source.instructions.iter().rev() {
            if insn.can_throw() {
                for range in &source.try_catch {
                    live.extend(self.live_in[range.handler].iter().copied());
                }
            }
            if let Some(def) = insn.defined_var() {
                live.remove(&def);
            }
            uses.clear();
            insn.collect_used_vars(&mut uses);
            live.extend(uses.iter().copied());
        }
        // The handler entry binds its exception slot, so the slot is not
        // live above it.
        if let Some(var) = source.exception_variable {
            live.remove(&var);
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BasicBlock, BinaryOp, Instruction, NumericType, TryCatchRange};

    fn var(id: u32) -> VarId {
        VarId(id)
    }

    #[test]
    fn straight_line_liveness() {
        // $0: v0 := 1; v1 := v0 + v0; return v1
        let program = Program {
            blocks: vec![BasicBlock {
                instructions: vec![
                    Instruction::ConstInt {
                        receiver: var(0),
                        value: 1,
                    },
                    Instruction::Binary {
                        receiver: var(1),
                        op: BinaryOp::Add,
                        lhs: var(0),
                        rhs: var(0),
                        operands: NumericType::Int,
                    },
                    Instruction::Return {
                        value: Some(var(1)),
                    },
                ],
                ..Default::default()
            }],
            variables: Default::default(),
        };
        let liveness = LivenessAnalyzer::analyze(&program);
        assert!(liveness.live_in(0).is_empty());
        let per_insn = liveness.instruction_live_outs(&program, 0);
        assert!(per_insn[0].contains(&var(0)));
        assert!(per_insn[1].contains(&var(1)));
        assert!(!per_insn[1].contains(&var(0)));
    }

    #[test]
    fn handler_entry_is_live_at_throwing_instructions() {
        // $0 calls a method under a handler that reads v1; v1 is assigned
        // after the call, so only the exception edge keeps it live above.
        let call = Instruction::Invoke {
            receiver: None,
            instance: None,
            method: crate::model::MethodReference::new("C", "m", "()V"),
            arguments: Vec::new(),
        };
        let program = Program {
            blocks: vec![
                BasicBlock {
                    instructions: vec![
                        call,
                        Instruction::ConstInt {
                            receiver: var(1),
                            value: 5,
                        },
                        Instruction::Jump { target: 1 },
                    ],
                    try_catch: vec![TryCatchRange {
                        exception_type: None,
                        handler: 2,
                    }],
                    ..Default::default()
                },
                BasicBlock {
                    instructions: vec![Instruction::Return {
                        value: Some(var(1)),
                    }],
                    ..Default::default()
                },
                BasicBlock {
                    instructions: vec![Instruction::Return {
                        value: Some(var(1)),
                    }],
                    exception_variable: Some(var(9)),
                    ..Default::default()
                },
            ],
            variables: Default::default(),
        };
        let liveness = LivenessAnalyzer::analyze(&program);
        // Live across the call because the handler reads it.
        assert!(liveness.live_in(0).contains(&var(1)));
        let per_insn = liveness.instruction_live_outs(&program, 0);
        assert!(per_insn[0].contains(&var(1)));
        // The exception slot is defined by the handler entry.
        assert!(!liveness.live_in(2).contains(&var(9)));
    }
}
