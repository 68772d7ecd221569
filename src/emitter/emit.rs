use crate::{
    codegen::gen::{
        AsmBinaryOp, AsmFunction, AsmInstruction, AsmOperand, AsmProgram, AsmRegister, AsmType,
        AsmUnaryOp, ConditionCode,
    },
    emitter::util::{escape, Target},
    semantics::storage::{GlobalLayout, StaticInit},
};
use anyhow::Result;
use log::debug;
use std::io::Write;

pub trait Emit {
    fn emit<W: Write>(&self, f: &mut W, target: Target, asm_type: AsmType) -> Result<()>;
}

impl Emit for AsmProgram {
    fn emit<W: Write>(&self, f: &mut W, target: Target, asm_type: AsmType) -> Result<()> {
        debug!(
            "emitting {} functions, {} globals, {} strings for {}",
            self.functions.len(),
            self.static_vars.len(),
            self.strings.len(),
            target
        );

        for func in &self.functions {
            func.emit(f, target, asm_type)?;
        }

        emit_data(f, target, &self.static_vars, &self.strings)
    }
}

/* Globals, string literals and the stack note are the same on every
 * architecture. */
pub fn emit_data<W: Write>(
    f: &mut W,
    target: Target,
    static_vars: &[GlobalLayout],
    strings: &[(String, String)],
) -> Result<()> {
    for static_var in static_vars {
        static_var.emit(f, target, AsmType::Quadword)?;
    }

    if !strings.is_empty() {
        writeln!(f)?;
        writeln!(f, "\t{}", target.string_section())?;
        for (label, value) in strings {
            writeln!(f, "{}:", target.local_label(label))?;
            writeln!(f, "\t.asciz \"{}\"", escape(value))?;
        }
    }

    if target == Target::Linux {
        writeln!(f, "\t.section .note.GNU-stack,\"\",@progbits")?;
    }

    Ok(())
}

impl Emit for GlobalLayout {
    fn emit<W: Write>(&self, f: &mut W, target: Target, _asm_type: AsmType) -> Result<()> {
        let name = target.symbol(&self.name);

        writeln!(f)?;
        if self.inits.is_empty() {
            writeln!(f, "\t.bss")?;
        } else {
            writeln!(f, "\t.data")?;
        }
        writeln!(f, "\t.globl {}", name)?;
        writeln!(f, "\t.balign {}", self.alignment)?;
        writeln!(f, "{}:", name)?;

        let mut cursor = 0;
        for (offset, init) in &self.inits {
            if *offset > cursor {
                writeln!(f, "\t.zero {}", offset - cursor)?;
            }
            match init {
                StaticInit::Char(c) => writeln!(f, "\t.byte {}", c)?,
                StaticInit::Int(n) => writeln!(f, "\t.long {}", n)?,
                StaticInit::Quad(n) => writeln!(f, "\t.quad {}", n)?,
                StaticInit::Address(symbol, 0) => {
                    writeln!(f, "\t.quad {}", target.data_symbol(symbol))?
                }
                StaticInit::Address(symbol, off) => {
                    writeln!(f, "\t.quad {}{:+}", target.data_symbol(symbol), off)?
                }
            }
            cursor = offset + init_size(init);
        }
        if self.size > cursor {
            writeln!(f, "\t.zero {}", self.size - cursor)?;
        }

        Ok(())
    }
}

fn init_size(init: &StaticInit) -> usize {
    match init {
        StaticInit::Char(_) => 1,
        StaticInit::Int(_) => 4,
        StaticInit::Quad(_) | StaticInit::Address(..) => 8,
    }
}

impl Emit for AsmFunction {
    fn emit<W: Write>(&self, f: &mut W, target: Target, asm_type: AsmType) -> Result<()> {
        let name = target.symbol(&self.name);

        writeln!(f)?;
        writeln!(f, "\t.text")?;
        writeln!(f, "\t.globl {}", name)?;
        writeln!(f, "{}:", name)?;

        writeln!(f, "\tpushq %rbp")?;
        writeln!(f, "\tmovq %rsp, %rbp")?;

        for instr in &self.instructions {
            instr.emit(f, target, asm_type)?;
        }

        Ok(())
    }
}

fn suffix(asm_type: AsmType) -> &'static str {
    match asm_type {
        AsmType::Byte => "b",
        AsmType::Longword => "l",
        AsmType::Quadword => "q",
    }
}

fn condition_suffix(condition: ConditionCode) -> &'static str {
    match condition {
        ConditionCode::E => "e",
        ConditionCode::NE => "ne",
        ConditionCode::L => "l",
        ConditionCode::LE => "le",
        ConditionCode::G => "g",
        ConditionCode::GE => "ge",
    }
}

impl Emit for AsmInstruction {
    fn emit<W: Write>(&self, f: &mut W, target: Target, _asm_type: AsmType) -> Result<()> {
        if !matches!(self, AsmInstruction::Label(_)) {
            write!(f, "\t")?;
        }

        match self {
            AsmInstruction::Mov { asm_type, src, dst } => {
                write!(f, "mov{} ", suffix(*asm_type))?;
                src.emit(f, target, *asm_type)?;
                write!(f, ", ")?;
                dst.emit(f, target, *asm_type)?;
                writeln!(f)?;
            }

            AsmInstruction::Movsx {
                src_type,
                src,
                dst_type,
                dst,
            } => {
                write!(f, "movs{}{} ", suffix(*src_type), suffix(*dst_type))?;
                src.emit(f, target, *src_type)?;
                write!(f, ", ")?;
                dst.emit(f, target, *dst_type)?;
                writeln!(f)?;
            }

            AsmInstruction::Unary {
                asm_type,
                op,
                operand,
            } => {
                let instr = match op {
                    AsmUnaryOp::Neg => "neg",
                    AsmUnaryOp::Not => "not",
                };
                write!(f, "{}{} ", instr, suffix(*asm_type))?;
                operand.emit(f, target, *asm_type)?;
                writeln!(f)?;
            }

            AsmInstruction::Binary {
                asm_type,
                op,
                lhs,
                rhs,
            } => {
                let instr = match op {
                    AsmBinaryOp::Add => "add",
                    AsmBinaryOp::Sub => "sub",
                    AsmBinaryOp::Mul => "imul",
                    AsmBinaryOp::And => "and",
                    AsmBinaryOp::Or => "or",
                    AsmBinaryOp::Xor => "xor",
                    AsmBinaryOp::Sal => "sal",
                    AsmBinaryOp::Sar => "sar",
                };
                write!(f, "{}{} ", instr, suffix(*asm_type))?;

                /* Shift counts held in a register are always read from %cl. */
                let lhs_type = match op {
                    AsmBinaryOp::Sal | AsmBinaryOp::Sar => AsmType::Byte,
                    _ => *asm_type,
                };
                lhs.emit(f, target, lhs_type)?;
                write!(f, ", ")?;
                rhs.emit(f, target, *asm_type)?;
                writeln!(f)?;
            }

            AsmInstruction::Cmp { asm_type, lhs, rhs } => {
                write!(f, "cmp{} ", suffix(*asm_type))?;
                lhs.emit(f, target, *asm_type)?;
                write!(f, ", ")?;
                rhs.emit(f, target, *asm_type)?;
                writeln!(f)?;
            }

            AsmInstruction::Idiv { asm_type, operand } => {
                write!(f, "idiv{} ", suffix(*asm_type))?;
                operand.emit(f, target, *asm_type)?;
                writeln!(f)?;
            }

            AsmInstruction::Cdq { asm_type } => match asm_type {
                AsmType::Quadword => writeln!(f, "cqto")?,
                _ => writeln!(f, "cltd")?,
            },

            AsmInstruction::Jmp { target: label } => {
                writeln!(f, "jmp {}", target.local_label(label))?;
            }

            AsmInstruction::JmpCC {
                condition,
                target: label,
            } => {
                writeln!(
                    f,
                    "j{} {}",
                    condition_suffix(*condition),
                    target.local_label(label)
                )?;
            }

            AsmInstruction::SetCC { condition, operand } => {
                write!(f, "set{} ", condition_suffix(*condition))?;
                operand.emit(f, target, AsmType::Byte)?;
                writeln!(f)?;
            }

            AsmInstruction::Lea { src, dst } => {
                write!(f, "leaq ")?;
                src.emit(f, target, AsmType::Quadword)?;
                write!(f, ", ")?;
                dst.emit(f, target, AsmType::Quadword)?;
                writeln!(f)?;
            }

            AsmInstruction::Push(operand) => {
                write!(f, "pushq ")?;
                operand.emit(f, target, AsmType::Quadword)?;
                writeln!(f)?;
            }

            AsmInstruction::Label(label) => {
                writeln!(f, "{}:", target.local_label(label))?;
            }

            AsmInstruction::Call {
                target: callee,
                external,
            } => {
                writeln!(f, "call {}", target.call_target(callee, *external))?;
            }

            AsmInstruction::Ret => {
                writeln!(f, "movq %rbp, %rsp")?;
                writeln!(f, "\tpopq %rbp")?;
                writeln!(f, "\tret")?;
            }
        }

        Ok(())
    }
}

impl Emit for AsmOperand {
    fn emit<W: Write>(&self, f: &mut W, target: Target, asm_type: AsmType) -> Result<()> {
        match self {
            AsmOperand::Imm(n) => write!(f, "${}", n)?,

            AsmOperand::Register(reg) => reg.emit(f, target, asm_type)?,

            AsmOperand::Memory(reg, 0) => {
                write!(f, "(")?;
                reg.emit(f, target, AsmType::Quadword)?;
                write!(f, ")")?;
            }

            AsmOperand::Memory(reg, n) => {
                write!(f, "{}(", n)?;
                reg.emit(f, target, AsmType::Quadword)?;
                write!(f, ")")?;
            }

            AsmOperand::Data(identifier, 0) => {
                write!(f, "{}(%rip)", target.data_symbol(identifier))?
            }

            AsmOperand::Data(identifier, offset) => {
                write!(f, "{}{:+}(%rip)", target.data_symbol(identifier), offset)?
            }

            AsmOperand::Indexed(base, index, scale) => {
                write!(f, "(")?;
                base.emit(f, target, AsmType::Quadword)?;
                write!(f, ", ")?;
                index.emit(f, target, AsmType::Quadword)?;
                write!(f, ", {})", scale)?;
            }

            /* Pseudo operands are gone after replace_pseudo. */
            AsmOperand::Pseudo(_) | AsmOperand::PseudoMem(..) => unreachable!(),
        }

        Ok(())
    }
}

impl Emit for AsmRegister {
    fn emit<W: Write>(&self, f: &mut W, _target: Target, asm_type: AsmType) -> Result<()> {
        use AsmRegister::*;
        use AsmType::*;

        let name = match (self, asm_type) {
            (Ax, Byte) => "%al",
            (Cx, Byte) => "%cl",
            (Dx, Byte) => "%dl",
            (Di, Byte) => "%dil",
            (Si, Byte) => "%sil",
            (R8, Byte) => "%r8b",
            (R9, Byte) => "%r9b",
            (R10, Byte) => "%r10b",
            (R11, Byte) => "%r11b",
            (Bp, Byte) => "%bpl",
            (Sp, Byte) => "%spl",

            (Ax, Longword) => "%eax",
            (Cx, Longword) => "%ecx",
            (Dx, Longword) => "%edx",
            (Di, Longword) => "%edi",
            (Si, Longword) => "%esi",
            (R8, Longword) => "%r8d",
            (R9, Longword) => "%r9d",
            (R10, Longword) => "%r10d",
            (R11, Longword) => "%r11d",
            (Bp, Longword) => "%ebp",
            (Sp, Longword) => "%esp",

            (Ax, Quadword) => "%rax",
            (Cx, Quadword) => "%rcx",
            (Dx, Quadword) => "%rdx",
            (Di, Quadword) => "%rdi",
            (Si, Quadword) => "%rsi",
            (R8, Quadword) => "%r8",
            (R9, Quadword) => "%r9",
            (R10, Quadword) => "%r10",
            (R11, Quadword) => "%r11",
            (Bp, Quadword) => "%rbp",
            (Sp, Quadword) => "%rsp",
        };
        write!(f, "{}", name)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantics::storage::FrameLayout;

    fn render<T: Emit>(node: &T, target: Target) -> String {
        let mut out = Vec::new();
        node.emit(&mut out, target, AsmType::Longword).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn instructions_use_sized_mnemonics_and_registers() {
        let mov = AsmInstruction::Mov {
            asm_type: AsmType::Byte,
            src: AsmOperand::Register(AsmRegister::R10),
            dst: AsmOperand::Memory(AsmRegister::Bp, -1),
        };
        assert_eq!(render(&mov, Target::Linux), "\tmovb %r10b, -1(%rbp)\n");

        let movsx = AsmInstruction::Movsx {
            src_type: AsmType::Longword,
            src: AsmOperand::Register(AsmRegister::Ax),
            dst_type: AsmType::Quadword,
            dst: AsmOperand::Register(AsmRegister::Dx),
        };
        assert_eq!(render(&movsx, Target::Linux), "\tmovslq %eax, %rdx\n");

        let shift = AsmInstruction::Binary {
            asm_type: AsmType::Longword,
            op: AsmBinaryOp::Sal,
            lhs: AsmOperand::Register(AsmRegister::Cx),
            rhs: AsmOperand::Register(AsmRegister::Ax),
        };
        assert_eq!(render(&shift, Target::Linux), "\tsall %cl, %eax\n");

        let lea = AsmInstruction::Lea {
            src: AsmOperand::Indexed(AsmRegister::Ax, AsmRegister::Dx, 4),
            dst: AsmOperand::Register(AsmRegister::R9),
        };
        assert_eq!(render(&lea, Target::Linux), "\tleaq (%rax, %rdx, 4), %r9\n");
    }

    #[test]
    fn labels_calls_and_data_follow_the_target() {
        let call = AsmInstruction::Call {
            target: "printf".into(),
            external: true,
        };
        assert_eq!(render(&call, Target::Linux), "\tcall printf@PLT\n");
        assert_eq!(render(&call, Target::MacOs), "\tcall _printf\n");

        let jump = AsmInstruction::JmpCC {
            condition: ConditionCode::LE,
            target: "if_else.2".into(),
        };
        assert_eq!(render(&jump, Target::Linux), "\tjle .Lif_else.2\n");
        assert_eq!(
            render(&AsmInstruction::Label("if_else.2".into()), Target::MacOs),
            "Lif_else.2:\n"
        );

        let data = AsmOperand::Data("memo".into(), 8);
        assert_eq!(render(&data, Target::Linux), "memo+8(%rip)");
        assert_eq!(render(&data, Target::MacOs), "_memo+8(%rip)");
    }

    #[test]
    fn globals_fill_gaps_with_zeros() {
        let global = GlobalLayout {
            name: "table".into(),
            size: 16,
            alignment: 16,
            inits: vec![(0, StaticInit::Int(1)), (8, StaticInit::Int(3))],
        };
        let text = render(&global, Target::Linux);
        assert!(text.contains("\t.data\n"));
        assert!(text.contains("\t.balign 16\n"));
        assert!(text.contains("table:\n\t.long 1\n\t.zero 4\n\t.long 3\n\t.zero 4\n"));

        let zeroed = GlobalLayout {
            name: "n".into(),
            size: 4,
            alignment: 4,
            inits: vec![],
        };
        let text = render(&zeroed, Target::MacOs);
        assert!(text.contains("\t.bss\n"));
        assert!(text.contains("_n:\n\t.zero 4\n"));
    }

    #[test]
    fn program_ends_with_strings_and_stack_note() {
        let program = AsmProgram {
            functions: vec![AsmFunction {
                name: "main".into(),
                instructions: vec![AsmInstruction::Ret],
                frame: FrameLayout::default(),
                stack_space: 0,
            }],
            static_vars: vec![],
            strings: vec![("str.0".into(), "%d\n".into())],
        };

        let linux = render(&program, Target::Linux);
        assert!(linux.contains("\t.globl main\nmain:\n\tpushq %rbp\n\tmovq %rsp, %rbp\n"));
        assert!(linux.contains("\tmovq %rbp, %rsp\n\tpopq %rbp\n\tret\n"));
        assert!(linux.contains("\t.section .rodata\n.Lstr.0:\n\t.asciz \"%d\\012\"\n"));
        assert!(linux.ends_with(".note.GNU-stack,\"\",@progbits\n"));

        let mac = render(&program, Target::MacOs);
        assert!(mac.contains("_main:\n"));
        assert!(mac.contains("__TEXT,__cstring,cstring_literals\nLstr.0:\n"));
        assert!(!mac.contains("GNU-stack"));
    }
}
