// Not every test binary uses every helper.
#![allow(dead_code)]

use unflat::model::{
    BasicBlock, ClassDescriptor, ClassSource, Instruction, MethodReference, Program,
    ProgramVariable, TryCatchRange, VarId,
};

pub fn var(id: u32) -> VarId {
    VarId(id)
}

pub fn method(name: &str) -> MethodReference {
    MethodReference::new("TestClass", name, "()V")
}

pub fn block(instructions: Vec<Instruction>) -> BasicBlock {
    BasicBlock {
        instructions,
        ..Default::default()
    }
}

pub fn handler_block(instructions: Vec<Instruction>, exception_variable: VarId) -> BasicBlock {
    BasicBlock {
        instructions,
        exception_variable: Some(exception_variable),
        ..Default::default()
    }
}

pub fn guarded(mut block: BasicBlock, exception_type: Option<&str>, handler: usize) -> BasicBlock {
    block.try_catch.push(TryCatchRange {
        exception_type: exception_type.map(str::to_owned),
        handler,
    });
    block
}

pub fn program(blocks: Vec<BasicBlock>, variable_count: usize) -> Program {
    Program {
        blocks,
        variables: vec![ProgramVariable::default(); variable_count],
    }
}

/// Resolves exactly the class names it was given.
pub struct KnownClasses(pub Vec<&'static str>);

impl ClassSource for KnownClasses {
    fn get(&self, name: &str) -> Option<ClassDescriptor> {
        self.0.contains(&name).then(|| ClassDescriptor {
            name: name.to_owned(),
            superclass: None,
        })
    }
}
