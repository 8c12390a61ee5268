//! The decompilation driver.
//!
//! One forward walk over the indexed positions does all the structural
//! work. At each position the driver closes every lexical block and
//! range-tree scope ending there, opens the blocks starting there, refreshes
//! the try/catch bookmark stack against the handlers active in the current
//! source block, lowers the block's instructions, and finally wraps the
//! bodies of blocks that just ended into their pending try/catch
//! statements. Jumps are resolved through a map from original block id to
//! the innermost open lexical block covering it, so every emitted transfer
//! is a `break` or `continue` of a block that is open at emit time.

mod generator;

use crate::ast::{
    AsyncMethodNode, Expr, LabelId, MethodModifier, MethodPart, RegularMethodNode, Statement,
    VariableNode,
};
use crate::graph::{Graph, build_control_flow_graph};
use crate::indexer::{GraphIndexer, IrreducibleControlFlow};
use crate::loops::LoopGraph;
use crate::model::{ClassSource, MethodReference, Program, TryCatchRange, VarId};
use crate::optimize::{LabelCleanup, Optimizer};
use crate::range_tree::RangeTree;
use crate::split::{AsyncSplitError, AsyncSplitter};
use crate::typing::{TypeInferenceError, TypeInferer};
use rustc_hash::FxHashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstructionLoweringError {
    #[error("jump to ${target} has no enclosing block")]
    UnresolvedJump { target: usize },

    #[error("block ${block} does not end with a terminator")]
    MissingTerminator { block: usize },
}

#[derive(Debug, Error)]
pub enum DecompileErrorKind {
    #[error(transparent)]
    IrreducibleControlFlow(#[from] IrreducibleControlFlow),

    #[error("malformed exception scope: {0}")]
    MalformedExceptionScope(String),

    #[error("while lowering an instruction: {0}")]
    InstructionLowering(#[from] InstructionLoweringError),

    #[error("while inferring types: {0}")]
    TypeInference(#[from] TypeInferenceError),

    #[error("while splitting the program: {0}")]
    AsyncSplit(#[source] AsyncSplitError),
}

/// A method rejected by the core, with the listing of the offending
/// (sub)program for diagnostics. The core never recovers partially;
/// callers decide whether to continue their batch.
#[derive(Debug, Error)]
#[error("error decompiling method `{method}`:\n{listing}")]
pub struct DecompileError {
    pub method: MethodReference,
    pub listing: String,
    #[source]
    pub kind: DecompileErrorKind,
}

pub struct Decompiler<'a> {
    class_source: &'a dyn ClassSource,
    split_methods: FxHashSet<MethodReference>,
    friendly_to_debugger: bool,
    optimizer: Box<dyn Optimizer + 'a>,
}

impl<'a> Decompiler<'a> {
    pub fn new(
        class_source: &'a dyn ClassSource,
        split_methods: FxHashSet<MethodReference>,
        friendly_to_debugger: bool,
    ) -> Self {
        Self {
            class_source,
            split_methods,
            friendly_to_debugger,
            optimizer: Box::new(LabelCleanup),
        }
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer + 'a>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Whether `method` contains calls that may suspend and therefore must
    /// go through [`Self::decompile_async`].
    pub fn is_split_method(&self, method: &MethodReference) -> bool {
        self.split_methods.contains(method)
    }

    pub fn decompile_regular(
        &self,
        method: &MethodReference,
        modifiers: &[MethodModifier],
        program: &Program,
    ) -> Result<RegularMethodNode, DecompileError> {
        let wrap = |kind: DecompileErrorKind| DecompileError {
            method: method.clone(),
            listing: program.listing(),
            kind,
        };
        let target_parts = vec![None; program.basic_block_count()];
        let body = self.part_statement(program, &target_parts).map_err(wrap)?;
        let variables = self.variables(program).map_err(wrap)?;
        let mut node = RegularMethodNode {
            method: method.clone(),
            body,
            variables,
            modifiers: modifiers.to_vec(),
        };
        self.optimizer
            .optimize_regular(&mut node, program, self.friendly_to_debugger);
        Ok(node)
    }

    pub fn decompile_async(
        &self,
        method: &MethodReference,
        modifiers: &[MethodModifier],
        program: &Program,
        splitter: &dyn AsyncSplitter,
    ) -> Result<AsyncMethodNode, DecompileError> {
        let sub_programs = splitter.split(program).map_err(|error| DecompileError {
            method: method.clone(),
            listing: program.listing(),
            kind: DecompileErrorKind::AsyncSplit(error),
        })?;
        let mut parts = Vec::with_capacity(sub_programs.len());
        for sub in &sub_programs {
            let statement = self
                .part_statement(&sub.program, &sub.block_successors)
                .map_err(|kind| DecompileError {
                    method: method.clone(),
                    listing: sub.program.listing(),
                    kind,
                })?;
            parts.push(MethodPart { statement });
        }
        // Variables and types always come from the original program; the
        // parts share its variable space.
        let variables = self.variables(program).map_err(|kind| DecompileError {
            method: method.clone(),
            listing: program.listing(),
            kind,
        })?;
        let mut node = AsyncMethodNode {
            method: method.clone(),
            parts,
            variables,
            modifiers: modifiers.to_vec(),
        };
        self.optimizer
            .optimize_async(&mut node, program, self.friendly_to_debugger);
        Ok(node)
    }

    fn variables(&self, program: &Program) -> Result<Vec<VariableNode>, DecompileErrorKind> {
        let inferer = TypeInferer::infer(program)?;
        Ok((0..program.variable_count())
            .map(|index| {
                let var = VarId(index as u32);
                VariableNode::new(
                    inferer.type_of(var),
                    program.variables[index].debug_name.clone(),
                )
            })
            .collect())
    }

    fn part_statement(
        &self,
        program: &Program,
        target_parts: &[Option<usize>],
    ) -> Result<Statement, DecompileErrorKind> {
        let cfg = build_control_flow_graph(program);
        let weights: Vec<u32> = program
            .blocks
            .iter()
            .map(|block| block.instructions.len() as u32)
            .collect();
        let priorities: Vec<u32> = target_parts
            .iter()
            .map(|target| u32::from(target.is_some()))
            .collect();
        let indexer = GraphIndexer::new(&cfg, &weights, &priorities)?;
        let unflat = unflat_code(indexer.graph());

        PartDecompiler {
            program,
            class_source: self.class_source,
            indexer: &indexer,
            loops: unflat.loops,
            loop_successors: unflat.loop_successors,
            target_parts,
            blocks: Vec::new(),
            stack: Vec::new(),
            block_map: vec![None; program.basic_block_count()],
            bookmarks: Vec::new(),
            active_bookmarks: Vec::new(),
            exception_handlers: fill_exception_handlers(program),
            next_block: None,
            next_label: 1,
        }
        .run(unflat.tree)
    }
}

fn fill_exception_handlers(program: &Program) -> Vec<bool> {
    let mut handlers = vec![false; program.basic_block_count()];
    for block in &program.blocks {
        for range in &block.try_catch {
            handlers[range.handler] = true;
        }
    }
    handlers
}

struct Unflat {
    /// Innermost loop header per indexed position, for positions strictly
    /// inside a loop body.
    loops: Vec<Option<usize>>,
    /// One past the last indexed member of the loop headed here;
    /// `size + 1` when the position is not a header.
    loop_successors: Vec<usize>,
    tree: RangeTree,
}

/// The range construction: loop extents and forward-jump spans become the
/// candidate lexical scopes.
fn unflat_code(graph: &Graph) -> Unflat {
    let loop_graph = LoopGraph::new(graph);
    let sz = graph.size();

    // Find where each loop ends.
    let mut loop_successors = vec![sz + 1; sz];
    for node in 0..sz {
        let mut current = loop_graph.loop_at(node);
        while let Some(id) = current {
            loop_successors[loop_graph.header(id)] = node + 1;
            current = loop_graph.parent(id);
        }
    }

    // For each node, the head of the innermost loop it belongs to. Inner
    // loops have higher heads and overwrite the outer entries.
    let mut loops = vec![None; sz];
    for head in 0..sz {
        let end = loop_successors[head];
        if end > sz {
            continue;
        }
        for slot in loops.iter_mut().take(end).skip(head + 1) {
            *slot = Some(head);
        }
    }

    let mut ranges = Vec::new();
    for node in 0..sz {
        if loop_successors[node] <= sz {
            ranges.push(node..loop_successors[node]);
        }
        let start = graph
            .incoming_edges(node)
            .iter()
            .copied()
            .min()
            .unwrap_or(sz);
        if start + 1 < node {
            ranges.push(start..node);
        }
    }
    for node in 0..sz {
        if is_single_block_loop(graph, node) {
            ranges.push(node..node + 1);
        }
    }

    Unflat {
        loops,
        loop_successors,
        tree: RangeTree::new(sz + 1, ranges),
    }
}

fn is_single_block_loop(graph: &Graph, index: usize) -> bool {
    graph.outgoing_edges(index).contains(&index)
}

/// An open lexical block. Blocks are arena-allocated; the stack and the
/// block map refer to them by index, which sidesteps the cyclic references
/// a pointer-based representation would need.
struct OpenBlock {
    label: LabelId,
    is_loop: bool,
    body: Vec<Statement>,
    /// Range-tree extent; `usize::MAX` for the root pseudo-block.
    start: usize,
    end: usize,
    /// Bookmarks owned by this block, in opening order.
    try_catches: Vec<usize>,
    /// Block-map slots this block occupies, with the previous occupants to
    /// restore on close.
    installed: Vec<(usize, Option<usize>)>,
}

/// An open try/catch scope: everything from `offset` in the owning block's
/// body is protected by `handler` until the bookmark closes.
struct Bookmark {
    block: usize,
    offset: usize,
    exception_type: Option<String>,
    exception_variable: Option<VarId>,
    handler: usize,
}

struct PartDecompiler<'a> {
    program: &'a Program,
    class_source: &'a dyn ClassSource,
    indexer: &'a GraphIndexer,
    loops: Vec<Option<usize>>,
    loop_successors: Vec<usize>,
    target_parts: &'a [Option<usize>],
    blocks: Vec<OpenBlock>,
    stack: Vec<usize>,
    /// Original block id -> innermost open block covering it.
    block_map: Vec<Option<usize>>,
    bookmarks: Vec<Bookmark>,
    /// Open bookmarks, outermost first.
    active_bookmarks: Vec<usize>,
    exception_handlers: Vec<bool>,
    /// Original id of the block at the next indexed position, for
    /// fall-through suppression.
    next_block: Option<usize>,
    next_label: u32,
}

impl PartDecompiler<'_> {
    fn run(mut self, tree: RangeTree) -> Result<Statement, DecompileErrorKind> {
        let root = self.push_block(LabelId(0), false, usize::MAX, usize::MAX);
        self.stack.push(root);

        let mut parent_node = tree.root();
        let mut current_node = tree.first_child(parent_node);
        let sz = self.indexer.size();

        for i in 0..sz {
            let current_block = self.indexer.node_at(i).expect("index in range");
            let mut next = i + 1;
            if let Some(head) = self.loops[i] {
                // At the last member of a loop, fall-through follows the
                // back edge to the header.
                if self.loop_successors[head] == next {
                    next = head;
                }
            }
            self.next_block = if next < sz {
                self.indexer.node_at(next)
            } else {
                None
            };

            while tree.end(parent_node) == i {
                current_node = tree.next(parent_node);
                parent_node = tree.parent(parent_node).expect("root covers all positions");
            }
            while let Some(node) = current_node.filter(|&node| tree.start(node) == i) {
                self.open_block(i, tree.end(node));
                parent_node = node;
                current_node = tree.first_child(node);
            }

            self.create_new_bookmarks(current_block);

            let mut statements = Vec::new();
            let source = &self.program.blocks[current_block];
            if let Some(var) = source.exception_variable {
                statements.push(Statement::assign(
                    Expr::Variable(var),
                    Expr::CaughtException,
                ));
            }
            let transfers_out = self.target_parts[current_block].is_some();
            if !transfers_out && !source.instructions.last().is_some_and(|i| i.is_terminator()) {
                return Err(InstructionLoweringError::MissingTerminator {
                    block: current_block,
                }
                .into());
            }
            for insn in &source.instructions {
                self.lower_instruction(insn, &mut statements)?;
            }
            if let Some(part) = self.target_parts[current_block] {
                statements.push(Statement::GotoPart { part });
            }
            let top = *self.stack.last().expect("root stays open");
            self.blocks[top].body.append(&mut statements);

            while self.top_block().end == i + 1 {
                self.close_top_block()?;
            }

            if let Some(next_block) = self.next_block {
                if !self.is_trivial_block(next_block) {
                    self.close_expired_bookmarks(next_block)?;
                }
            }
        }

        debug_assert!(self.stack.len() == 1, "only the root stays open");
        let root = self.stack[0];
        let body = core::mem::take(&mut self.blocks[root].body);
        Ok(Statement::Sequential { statements: body })
    }

    fn top_block(&self) -> &OpenBlock {
        &self.blocks[*self.stack.last().expect("root stays open")]
    }

    fn push_block(&mut self, label: LabelId, is_loop: bool, start: usize, end: usize) -> usize {
        self.blocks.push(OpenBlock {
            label,
            is_loop,
            body: Vec::new(),
            start,
            end,
            try_catches: Vec::new(),
            installed: Vec::new(),
        });
        self.blocks.len() - 1
    }

    /// Opens the lexical block for a range-tree node starting at `start`.
    /// Loops install themselves at their header as well, so a jump to the
    /// header becomes `continue` while a jump to the extent's end becomes
    /// `break`.
    fn open_block(&mut self, start: usize, end: usize) {
        let is_loop =
            self.loop_successors[start] == end || is_single_block_loop(self.indexer.graph(), start);
        let label = LabelId(self.next_label);
        self.next_label += 1;

        // A block's statement lives in the parent body from the moment the
        // block opens: bookmark offsets count it, and a bookmark closing
        // early may wrap it into a try/catch while the block is still
        // growing. The placeholder is replaced by the finished statement
        // when the block closes, wherever wrapping has moved it.
        let parent = *self.stack.last().expect("root stays open");
        self.blocks[parent].body.push(Statement::Block {
            id: label,
            body: Vec::new(),
        });

        let id = self.push_block(label, is_loop, start, end);

        if let Some(mapped) = self.indexer.node_at(end) {
            let occupied_by_loop =
                self.block_map[mapped].is_some_and(|existing| self.blocks[existing].is_loop);
            // A loop label keeps priority over a plain block sharing its
            // successor position.
            if !occupied_by_loop {
                self.install(id, mapped);
            }
        }
        if is_loop {
            let header = self.indexer.node_at(start).expect("loop header in range");
            self.install(id, header);
        }

        self.stack.push(id);
    }

    fn install(&mut self, block: usize, slot: usize) {
        self.blocks[block]
            .installed
            .push((slot, self.block_map[slot]));
        self.block_map[slot] = Some(block);
    }

    /// Pops the top block: wraps still-open bookmarks around its body,
    /// restores the block-map slots it occupied (re-pointing its header
    /// slot at the parent when the parent shares it), and substitutes the
    /// finished statement for the placeholder in the parent.
    fn close_top_block(&mut self) -> Result<(), DecompileErrorKind> {
        let old = self.stack.pop().expect("root stays open");
        let parent = *self.stack.last().expect("root stays open");

        if self.blocks[parent].start != usize::MAX {
            let mapped_start = self
                .indexer
                .node_at(self.blocks[parent].start)
                .expect("open block starts in range");
            if self.block_map[mapped_start] == Some(old) {
                self.block_map[mapped_start] = Some(parent);
            }
        }

        // Still-open bookmarks wrap this block's body; the innermost was
        // opened last, wraps first, and ends up deepest.
        let owned = core::mem::take(&mut self.blocks[old].try_catches);
        for &bookmark_id in owned.iter().rev() {
            let handler_jump = self.generate_jump_statement(self.bookmarks[bookmark_id].handler)?;
            let bookmark = &self.bookmarks[bookmark_id];
            let block = &mut self.blocks[old];
            let offset = bookmark.offset.min(block.body.len());
            let protected_body: Vec<Statement> = block.body.drain(offset..).collect();
            if !protected_body.is_empty() {
                block.body.push(Statement::TryCatch {
                    protected_body,
                    exception_type: bookmark.exception_type.clone(),
                    exception_variable: bookmark.exception_variable,
                    handler: handler_jump.into_iter().collect(),
                });
            }
        }
        self.active_bookmarks
            .truncate(self.active_bookmarks.len() - owned.len());

        for (slot, backup) in core::mem::take(&mut self.blocks[old].installed) {
            self.block_map[slot] = backup;
        }

        let old_block = &mut self.blocks[old];
        let body = core::mem::take(&mut old_block.body);
        let label = old_block.label;
        let statement = if old_block.is_loop {
            Statement::While {
                id: label,
                condition: None,
                body,
            }
        } else {
            Statement::Block { id: label, body }
        };
        let replaced = replace_placeholder(&mut self.blocks[parent].body, label, statement);
        debug_assert!(replaced, "placeholder for a closing block exists");
        Ok(())
    }

    /// Opens bookmarks for handlers that became active on entry to
    /// `block`. The bookmark list mirrors the handler list reversed, so it
    /// runs outermost first.
    fn create_new_bookmarks(&mut self, block: usize) {
        let ranges = &self.program.blocks[block].try_catch;
        for i in self.active_bookmarks.len()..ranges.len() {
            let range = &ranges[ranges.len() - 1 - i];
            let top = *self.stack.last().expect("root stays open");
            let bookmark_id = self.bookmarks.len();
            self.bookmarks.push(Bookmark {
                block: top,
                offset: self.blocks[top].body.len(),
                exception_type: self.resolve_exception_type(range),
                exception_variable: self.program.blocks[range.handler].exception_variable,
                handler: range.handler,
            });
            self.blocks[top].try_catches.push(bookmark_id);
            self.active_bookmarks.push(bookmark_id);
        }
    }

    /// A handler class the class source cannot resolve degrades to a
    /// catch-all.
    fn resolve_exception_type(&self, range: &TryCatchRange) -> Option<String> {
        range
            .exception_type
            .clone()
            .filter(|name| self.class_source.get(name).is_some())
    }

    /// Closes the bookmarks that are no longer active in `next_block`.
    /// The surviving prefix is the longest run of matching handlers,
    /// outermost first; the rest close innermost first.
    fn close_expired_bookmarks(&mut self, next_block: usize) -> Result<(), DecompileErrorKind> {
        let ranges = &self.program.blocks[next_block].try_catch;
        let keep = self
            .active_bookmarks
            .iter()
            .zip(ranges.iter().rev())
            .take_while(|&(&bookmark_id, range)| {
                let bookmark = &self.bookmarks[bookmark_id];
                bookmark.handler == range.handler
                    && bookmark.exception_type == self.resolve_exception_type(range)
            })
            .count();

        for bookmark_id in self.active_bookmarks.split_off(keep).into_iter().rev() {
            self.close_bookmark(bookmark_id)?;
        }
        Ok(())
    }

    /// Closes one bookmark: every block between the top of the stack and
    /// the owner gets its body wrapped except for the trailing statement
    /// (the implicit terminator jump, or the still-open child), then the
    /// owner's body is wrapped from the recorded offset onwards.
    fn close_bookmark(&mut self, bookmark_id: usize) -> Result<(), DecompileErrorKind> {
        let owner = self.bookmarks[bookmark_id].block;
        let position = self
            .stack
            .iter()
            .rposition(|&block| block == owner)
            .ok_or_else(|| {
                DecompileErrorKind::MalformedExceptionScope(format!(
                    "block owning the handler ${} is not on the open-block stack",
                    self.bookmarks[bookmark_id].handler,
                ))
            })?;

        for depth in (position + 1..self.stack.len()).rev() {
            let handler_jump = self.generate_jump_statement(self.bookmarks[bookmark_id].handler)?;
            let bookmark = &self.bookmarks[bookmark_id];
            let block = &mut self.blocks[self.stack[depth]];
            if block.body.len() > 1 {
                let kept = block.body.pop().expect("checked length");
                let protected_body = core::mem::take(&mut block.body);
                block.body.push(Statement::TryCatch {
                    protected_body,
                    exception_type: bookmark.exception_type.clone(),
                    exception_variable: bookmark.exception_variable,
                    handler: handler_jump.into_iter().collect(),
                });
                block.body.push(kept);
            }
        }

        let handler_jump = self.generate_jump_statement(self.bookmarks[bookmark_id].handler)?;
        let bookmark = &self.bookmarks[bookmark_id];
        let block = &mut self.blocks[owner];
        let offset = bookmark.offset.min(block.body.len());
        let protected_body: Vec<Statement> = block.body.drain(offset..).collect();
        if !protected_body.is_empty() {
            block.body.push(Statement::TryCatch {
                protected_body,
                exception_type: bookmark.exception_type.clone(),
                exception_variable: bookmark.exception_variable,
                handler: handler_jump.into_iter().collect(),
            });
        }
        let index = self.blocks[owner]
            .try_catches
            .iter()
            .rposition(|&id| id == bookmark_id)
            .expect("bookmark registered with its owner");
        self.blocks[owner].try_catches.remove(index);
        Ok(())
    }

    /// Whether `block` is glue that must not force bookmark closure: a
    /// single pure jump, not a handler entry.
    fn is_trivial_block(&self, block: usize) -> bool {
        use crate::model::Instruction;
        if self.exception_handlers[block] {
            return false;
        }
        let source = &self.program.blocks[block];
        if source.instructions.len() != 1 || source.exception_variable.is_some() {
            return false;
        }
        matches!(
            source.instructions.last(),
            Some(
                Instruction::Jump { .. }
                    | Instruction::Branch { .. }
                    | Instruction::BinaryBranch { .. }
            )
        )
    }
}

/// Replaces the placeholder of a closing block with its finished
/// statement. Bookmark wrapping may have moved the placeholder into the
/// protected body of a try/catch, so the search descends into those.
fn replace_placeholder(body: &mut [Statement], label: LabelId, statement: Statement) -> bool {
    let mut statement = Some(statement);
    replace_placeholder_impl(body, label, &mut statement)
}

fn replace_placeholder_impl(
    body: &mut [Statement],
    label: LabelId,
    statement: &mut Option<Statement>,
) -> bool {
    for slot in body.iter_mut().rev() {
        match slot {
            Statement::Block { id, body } if *id == label && body.is_empty() => {
                *slot = statement.take().expect("placeholder is unique");
                return true;
            }
            Statement::TryCatch {
                protected_body,
                handler,
                ..
            } => {
                if replace_placeholder_impl(protected_body, label, statement)
                    || replace_placeholder_impl(handler, label, statement)
                {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}
