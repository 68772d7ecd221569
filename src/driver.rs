use crate::{
    codegen::{
        aarch64::{lower_program, A64Program},
        fixup::Fixup,
        gen::{AsmProgram, AsmType, Codegen},
    },
    emitter::{
        emit::Emit,
        util::{Arch, Target},
    },
    ir::gen::{emit_ir, IRProgram, IrContext},
    lexer::lex::{tokenize, Lexeme},
    parser::{ast::Program, recursive_descent::Parser},
    semantics::{
        loop_label::{LabelCounter, LoopLabel},
        resolver::{Resolve, ResolveContext},
        storage::{allocate, StorageLayout},
        typechecker::{SymbolTable, Typecheck, TypeContext},
    },
};
use anyhow::Result;
use log::debug;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub target: Target,
    pub arch: Arch,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            target: Target::host(),
            arch: Arch::host(),
        }
    }
}

pub fn lex(src: &str) -> Result<VecDeque<Lexeme>> {
    tokenize(src)
}

pub fn parse(src: &str) -> Result<Program> {
    Parser::new(tokenize(src)?).parse()
}

pub fn validate(src: &str) -> Result<(Program, SymbolTable)> {
    let mut program = parse(src)?;

    let mut ctx = TypeContext::new();
    program
        .resolve(&mut ResolveContext::new())?
        .loop_label("", &mut LabelCounter::default())?
        .typecheck(&mut ctx)?;

    Ok((program, ctx.symbols))
}

pub fn tacky(src: &str) -> Result<(IRProgram, SymbolTable)> {
    let (program, symbols) = validate(src)?;
    let layout: StorageLayout = allocate(&program)?;

    let mut ctx = IrContext::new(symbols, layout);
    let ir = emit_ir(&program, &mut ctx);

    Ok((ir, ctx.symbols))
}

pub fn codegen(src: &str) -> Result<AsmProgram> {
    let (ir, symbols) = tacky(src)?;
    let asm = ir.codegen(&symbols).replace_pseudo(&symbols).fixup();

    for func in &asm.functions {
        debug!("{}: {} bytes of stack", func.name, func.stack_space);
    }

    Ok(asm)
}

pub fn codegen_aarch64(src: &str, target: Target) -> Result<A64Program> {
    let (ir, symbols) = tacky(src)?;
    Ok(lower_program(&ir, &symbols, target))
}

pub fn compile(src: &str, options: &Options) -> Result<String> {
    let mut out = Vec::new();
    match options.arch {
        Arch::X86_64 => codegen(src)?.emit(&mut out, options.target, AsmType::Longword)?,
        Arch::Aarch64 => codegen_aarch64(src, options.target)?.emit(
            &mut out,
            options.target,
            AsmType::Quadword,
        )?,
    }

    Ok(String::from_utf8(out)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;

    fn class_of(src: &str) -> &'static str {
        let err = compile(src, &Options::default()).unwrap_err();
        err.downcast_ref::<CompileError>().unwrap().class()
    }

    #[test]
    fn errors_from_each_stage_keep_their_class() {
        assert_eq!(class_of("int main() { return 1 @ 2; }"), "LexError");
        assert_eq!(class_of("int main() { return 1 +; }"), "ParseError");
        assert_eq!(class_of("int main() { return x; }"), "StaticError");
        assert_eq!(class_of("int main() { break; }"), "StaticError");
        assert_eq!(class_of("int main() { 1 = 2; return 0; }"), "TypeError");
    }

    #[test]
    fn architecture_selects_the_backend() {
        let src = "int main() { return 3; }";
        let x86 = compile(
            src,
            &Options {
                target: Target::Linux,
                arch: Arch::X86_64,
            },
        )
        .unwrap();
        let arm = compile(
            src,
            &Options {
                target: Target::Linux,
                arch: Arch::Aarch64,
            },
        )
        .unwrap();
        assert!(x86.contains("\tpushq %rbp\n"));
        assert!(arm.contains("\tstp x29, x30, [sp, #-16]!\n"));
        assert!(arm.contains("\tmov x0, #3\n"));
    }

    #[test]
    fn each_compilation_starts_fresh() {
        let src = "int main() { int a = 1; return a; }";
        let first = compile(src, &Options::default()).unwrap();
        let second = compile(src, &Options::default()).unwrap();
        assert_eq!(first, second);
    }
}
