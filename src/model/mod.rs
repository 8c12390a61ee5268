//! The input IR: per-method programs over basic blocks and
//! register-addressed instructions.
//!
//! This is the boundary contract with the instruction parser and the
//! optimiser passes that run before decompilation. Everything here is
//! semantic: variables are plain indices, blocks are positions in the
//! program's block list, and exception handlers are ordered descriptor
//! lists attached to the blocks they protect.

mod instructions;

pub use self::instructions::{
    BinaryBranchCondition, BinaryOp, BranchCondition, Instruction, NumericType, SwitchTableEntry,
};
use core::fmt;
use displaydoc::Display;

/// v{0}
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The type a variable holds, as far as the decompiler cares: the integer
/// kinds of the source VM plus references and return addresses. Wide kinds
/// (`i64`, `f64`) occupy two physical slots downstream, which is why the
/// register allocator keeps them in separate congruence classes.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// i32
    Int,
    /// i64
    Long,
    /// f32
    Float,
    /// f64
    Double,
    /// ref
    Reference,
    /// addr
    Address,
}

/// `class.name(descriptor)`, used for diagnostics and split-point lookup.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodReference {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodReference {
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}

/// Read-only lookup of class metadata, supplied by the class loader. The
/// core uses it only to resolve exception-handler class names; a name the
/// source cannot resolve degrades to a catch-all.
pub trait ClassSource {
    fn get(&self, name: &str) -> Option<ClassDescriptor>;
}

#[derive(Clone, Debug)]
pub struct ClassDescriptor {
    pub name: String,
    pub superclass: Option<String>,
}

/// A class source that resolves nothing; every handler type becomes a
/// catch-all.
pub struct NoClasses;

impl ClassSource for NoClasses {
    fn get(&self, _name: &str) -> Option<ClassDescriptor> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldReference {
    pub class: String,
    pub name: String,
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

/// One exception handler active during a block's body. The order of these
/// on a block is significant: earlier entries catch first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchRange {
    /// `None` catches everything.
    pub exception_type: Option<String>,
    /// Index of the handler's entry block.
    pub handler: usize,
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub instructions: Vec<Instruction>,
    /// Non-`None` iff this block is an exception handler's entry; the slot
    /// the caught exception is bound to.
    pub exception_variable: Option<VarId>,
    /// Handlers active during this block's body, outermost last.
    pub try_catch: Vec<TryCatchRange>,
}

#[derive(Clone, Debug, Default)]
pub struct ProgramVariable {
    pub debug_name: Option<String>,
}

/// A method body. Block 0 is the entry.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub blocks: Vec<BasicBlock>,
    pub variables: Vec<ProgramVariable>,
}

impl Program {
    pub fn basic_block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn basic_block(&self, index: usize) -> &BasicBlock {
        &self.blocks[index]
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Ensures a `ProgramVariable` exists for every id up to and including
    /// `var`, so builders can introduce variables on first mention.
    pub fn ensure_variable(&mut self, var: VarId) {
        if var.index() >= self.variables.len() {
            self.variables.resize_with(var.index() + 1, Default::default);
        }
    }

    /// Renders the listing bundled into fatal diagnostics: one paragraph
    /// per block with its handler table.
    pub fn listing(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, block) in self.blocks.iter().enumerate() {
            write!(f, "${index}")?;
            if let Some(var) = block.exception_variable {
                write!(f, " catch -> {var}")?;
            }
            writeln!(f, ":")?;
            for insn in &block.instructions {
                writeln!(f, "    {insn}")?;
            }
            for range in &block.try_catch {
                match &range.exception_type {
                    Some(class) => writeln!(f, "    handled by ${} for {class}", range.handler)?,
                    None => writeln!(f, "    handled by ${} for any", range.handler)?,
                }
            }
        }
        Ok(())
    }
}
