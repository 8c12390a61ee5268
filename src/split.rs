//! The async-splitting collaborator contract.
//!
//! A splitter partitions a method that may suspend into ordered
//! sub-programs ("parts"), one per resume region; part 0 contains the
//! entry. The decompiler treats each part as an independent program and
//! only consumes the per-block transfer table. Inter-part dataflow is the
//! splitter's concern and never reaches the decompiler.

use crate::model::Program;

/// Failure surfaced by a splitter; propagated unchanged, the method is not
/// partially emitted.
pub type AsyncSplitError = Box<dyn core::error::Error + Send + Sync>;

/// One part of a split method.
#[derive(Debug)]
pub struct SubProgram {
    pub program: Program,
    /// For each block of `program`: the part execution transfers to after
    /// the block's statements, or `None` when control stays in this part.
    pub block_successors: Vec<Option<usize>>,
}

pub trait AsyncSplitter {
    fn split(&self, program: &Program) -> Result<Vec<SubProgram>, AsyncSplitError>;
}
