use crate::{
    codegen::{
        aarch64::{A64Address, A64BinaryOp, A64Function, A64Instruction, A64Program, A64Register},
        gen::{AsmType, ConditionCode},
    },
    emitter::{
        emit::{emit_data, Emit},
        util::Target,
    },
};
use anyhow::Result;
use log::debug;
use std::io::Write;

impl Emit for A64Program {
    fn emit<W: Write>(&self, f: &mut W, target: Target, asm_type: AsmType) -> Result<()> {
        debug!(
            "emitting {} aarch64 functions, {} globals, {} strings for {}",
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

impl Emit for A64Function {
    fn emit<W: Write>(&self, f: &mut W, target: Target, asm_type: AsmType) -> Result<()> {
        let name = target.symbol(&self.name);

        writeln!(f)?;
        writeln!(f, "\t.text")?;
        writeln!(f, "\t.globl {}", name)?;
        writeln!(f, "\t.p2align 2")?;
        writeln!(f, "{}:", name)?;

        writeln!(f, "\tstp x29, x30, [sp, #-16]!")?;
        writeln!(f, "\tmov x29, sp")?;
        if self.stack_space > 0 {
            A64Instruction::AddImm {
                dst: A64Register::Sp,
                src: A64Register::Sp,
                value: -(self.stack_space as i64),
            }
            .emit(f, target, asm_type)?;
        }

        for instr in &self.instructions {
            instr.emit(f, target, asm_type)?;
        }

        Ok(())
    }
}

impl A64Register {
    pub fn x(self) -> &'static str {
        use A64Register::*;

        match self {
            X0 => "x0",
            X1 => "x1",
            X2 => "x2",
            X3 => "x3",
            X4 => "x4",
            X5 => "x5",
            X6 => "x6",
            X7 => "x7",
            X9 => "x9",
            X10 => "x10",
            X11 => "x11",
            X16 => "x16",
            X17 => "x17",
            Fp => "x29",
            Sp => "sp",
            Zr => "xzr",
        }
    }

    pub fn w(self) -> &'static str {
        use A64Register::*;

        match self {
            X0 => "w0",
            X1 => "w1",
            X2 => "w2",
            X3 => "w3",
            X4 => "w4",
            X5 => "w5",
            X6 => "w6",
            X7 => "w7",
            X9 => "w9",
            X10 => "w10",
            X11 => "w11",
            X16 => "w16",
            X17 => "w17",
            Fp => "w29",
            Sp => "wsp",
            Zr => "wzr",
        }
    }
}

fn condition(condition: ConditionCode) -> &'static str {
    match condition {
        ConditionCode::E => "eq",
        ConditionCode::NE => "ne",
        ConditionCode::L => "lt",
        ConditionCode::LE => "le",
        ConditionCode::G => "gt",
        ConditionCode::GE => "ge",
    }
}

fn mov_imm<W: Write>(f: &mut W, reg: A64Register, value: i64) -> Result<()> {
    if (-65536..65536).contains(&value) {
        writeln!(f, "\tmov {}, #{}", reg.x(), value)?;
        return Ok(());
    }

    let bits = value as u64;
    writeln!(f, "\tmovz {}, #{}", reg.x(), bits & 0xffff)?;
    for shift in [16, 32, 48] {
        let chunk = (bits >> shift) & 0xffff;
        if chunk != 0 {
            writeln!(f, "\tmovk {}, #{}, lsl #{}", reg.x(), chunk, shift)?;
        }
    }

    Ok(())
}

/* Writes `[base, #offset]` when the offset fits a load or store, otherwise
 * moves it into x17 first and uses the register form. */
fn address<W: Write>(f: &mut W, addr: &A64Address, size: AsmType) -> Result<String> {
    let width = size.size() as isize;
    let offset = addr.offset;

    let fits = (-256..256).contains(&offset)
        || (offset >= 0 && offset % width == 0 && offset / width < 4096);

    Ok(match offset {
        0 => format!("[{}]", addr.base.x()),
        _ if fits => format!("[{}, #{}]", addr.base.x(), offset),
        _ => {
            mov_imm(f, A64Register::X17, offset as i64)?;
            format!("[{}, x17]", addr.base.x())
        }
    })
}

impl Emit for A64Instruction {
    fn emit<W: Write>(&self, f: &mut W, target: Target, _asm_type: AsmType) -> Result<()> {
        match self {
            A64Instruction::Ldr { size, reg, addr } => {
                let mnemonic = match size {
                    AsmType::Byte => "ldrsb",
                    AsmType::Longword => "ldrsw",
                    AsmType::Quadword => "ldr",
                };
                let addr = address(f, addr, *size)?;
                writeln!(f, "\t{} {}, {}", mnemonic, reg.x(), addr)?;
            }

            A64Instruction::Str { size, reg, addr } => {
                let (mnemonic, name) = match size {
                    AsmType::Byte => ("strb", reg.w()),
                    AsmType::Longword => ("str", reg.w()),
                    AsmType::Quadword => ("str", reg.x()),
                };
                let addr = address(f, addr, *size)?;
                writeln!(f, "\t{} {}, {}", mnemonic, name, addr)?;
            }

            A64Instruction::MovImm { reg, value } => mov_imm(f, *reg, *value)?,

            A64Instruction::Binary { op, dst, lhs, rhs } => {
                let mnemonic = match op {
                    A64BinaryOp::Add => "add",
                    A64BinaryOp::Sub => "sub",
                    A64BinaryOp::Mul => "mul",
                    A64BinaryOp::Sdiv => "sdiv",
                    A64BinaryOp::And => "and",
                    A64BinaryOp::Orr => "orr",
                    A64BinaryOp::Eor => "eor",
                    A64BinaryOp::Lsl => "lsl",
                    A64BinaryOp::Asr => "asr",
                };
                writeln!(f, "\t{} {}, {}, {}", mnemonic, dst.x(), lhs.x(), rhs.x())?;
            }

            A64Instruction::Msub { dst, lhs, rhs, acc } => writeln!(
                f,
                "\tmsub {}, {}, {}, {}",
                dst.x(),
                lhs.x(),
                rhs.x(),
                acc.x()
            )?,

            A64Instruction::Neg { dst, src } => writeln!(f, "\tneg {}, {}", dst.x(), src.x())?,

            A64Instruction::Mvn { dst, src } => writeln!(f, "\tmvn {}, {}", dst.x(), src.x())?,

            A64Instruction::AddImm { dst, src, value } => match *value {
                0..=4095 => writeln!(f, "\tadd {}, {}, #{}", dst.x(), src.x(), value)?,
                -4095..=-1 => writeln!(f, "\tsub {}, {}, #{}", dst.x(), src.x(), -value)?,
                _ => {
                    mov_imm(f, A64Register::X17, *value)?;
                    writeln!(f, "\tadd {}, {}, x17", dst.x(), src.x())?;
                }
            },

            A64Instruction::Cmp { lhs, rhs } => writeln!(f, "\tcmp {}, {}", lhs.x(), rhs.x())?,

            A64Instruction::Cset { dst, condition: cc } => {
                writeln!(f, "\tcset {}, {}", dst.x(), condition(*cc))?
            }

            A64Instruction::Adr { dst, symbol } => {
                let symbol = target.data_symbol(symbol);
                match target {
                    Target::Linux => {
                        writeln!(f, "\tadrp {}, {}", dst.x(), symbol)?;
                        writeln!(f, "\tadd {}, {}, :lo12:{}", dst.x(), dst.x(), symbol)?;
                    }
                    Target::MacOs => {
                        writeln!(f, "\tadrp {}, {}@PAGE", dst.x(), symbol)?;
                        writeln!(f, "\tadd {}, {}, {}@PAGEOFF", dst.x(), dst.x(), symbol)?;
                    }
                }
            }

            A64Instruction::B(label) => writeln!(f, "\tb {}", target.local_label(label))?,

            A64Instruction::BCond {
                condition: cc,
                target: label,
            } => writeln!(f, "\tb.{} {}", condition(*cc), target.local_label(label))?,

            A64Instruction::Cbz { reg, target: label } => {
                writeln!(f, "\tcbz {}, {}", reg.x(), target.local_label(label))?
            }

            A64Instruction::Cbnz { reg, target: label } => {
                writeln!(f, "\tcbnz {}, {}", reg.x(), target.local_label(label))?
            }

            A64Instruction::Bl(callee) => writeln!(f, "\tbl {}", target.symbol(callee))?,

            A64Instruction::Label(label) => writeln!(f, "{}:", target.local_label(label))?,

            A64Instruction::Ret => {
                writeln!(f, "\tmov sp, x29")?;
                writeln!(f, "\tldp x29, x30, [sp], #16")?;
                writeln!(f, "\tret")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<T: Emit>(node: &T, target: Target) -> String {
        let mut out = Vec::new();
        node.emit(&mut out, target, AsmType::Quadword).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn loads_and_stores_pick_width_and_addressing() {
        let load = A64Instruction::Ldr {
            size: AsmType::Byte,
            reg: A64Register::X9,
            addr: A64Address::new(A64Register::Fp, -1),
        };
        assert_eq!(render(&load, Target::Linux), "\tldrsb x9, [x29, #-1]\n");

        let store = A64Instruction::Str {
            size: AsmType::Longword,
            reg: A64Register::X0,
            addr: A64Address::new(A64Register::Fp, -4),
        };
        assert_eq!(render(&store, Target::Linux), "\tstr w0, [x29, #-4]\n");

        let far = A64Instruction::Ldr {
            size: AsmType::Longword,
            reg: A64Register::X10,
            addr: A64Address::new(A64Register::Fp, -4096),
        };
        assert_eq!(
            render(&far, Target::Linux),
            "\tmov x17, #-4096\n\tldrsw x10, [x29, x17]\n"
        );

        let pointer = A64Instruction::Ldr {
            size: AsmType::Quadword,
            reg: A64Register::X10,
            addr: A64Address::new(A64Register::X9, 0),
        };
        assert_eq!(render(&pointer, Target::Linux), "\tldr x10, [x9]\n");
    }

    #[test]
    fn wide_immediates_are_built_in_pieces() {
        let small = A64Instruction::MovImm {
            reg: A64Register::X9,
            value: -7,
        };
        assert_eq!(render(&small, Target::Linux), "\tmov x9, #-7\n");

        let wide = A64Instruction::MovImm {
            reg: A64Register::X9,
            value: 1836311903,
        };
        assert_eq!(
            render(&wide, Target::Linux),
            "\tmovz x9, #58719\n\tmovk x9, #28019, lsl #16\n"
        );

        let frame = A64Instruction::AddImm {
            dst: A64Register::Sp,
            src: A64Register::Sp,
            value: -32,
        };
        assert_eq!(render(&frame, Target::Linux), "\tsub sp, sp, #32\n");
    }

    #[test]
    fn symbols_follow_the_target() {
        let adr = A64Instruction::Adr {
            dst: A64Register::X16,
            symbol: "memo".into(),
        };
        assert_eq!(
            render(&adr, Target::Linux),
            "\tadrp x16, memo\n\tadd x16, x16, :lo12:memo\n"
        );
        assert_eq!(
            render(&adr, Target::MacOs),
            "\tadrp x16, _memo@PAGE\n\tadd x16, x16, _memo@PAGEOFF\n"
        );

        let string = A64Instruction::Adr {
            dst: A64Register::X9,
            symbol: "str.0".into(),
        };
        assert!(render(&string, Target::Linux).contains(":lo12:.Lstr.0\n"));

        assert_eq!(
            render(&A64Instruction::Bl("printf".into()), Target::Linux),
            "\tbl printf\n"
        );
        assert_eq!(
            render(&A64Instruction::Bl("printf".into()), Target::MacOs),
            "\tbl _printf\n"
        );

        let branch = A64Instruction::BCond {
            condition: ConditionCode::LE,
            target: "if_else.2".into(),
        };
        assert_eq!(render(&branch, Target::Linux), "\tb.le .Lif_else.2\n");
    }

    #[test]
    fn functions_set_up_and_tear_down_the_frame_record() {
        let program = A64Program {
            functions: vec![A64Function {
                name: "main".into(),
                instructions: vec![
                    A64Instruction::MovImm {
                        reg: A64Register::X0,
                        value: 0,
                    },
                    A64Instruction::Ret,
                ],
                stack_space: 16,
            }],
            static_vars: vec![],
            strings: vec![("str.0".into(), "%d\n".into())],
        };

        let linux = render(&program, Target::Linux);
        assert!(linux.contains(
            "main:\n\tstp x29, x30, [sp, #-16]!\n\tmov x29, sp\n\tsub sp, sp, #16\n\tmov x0, #0\n"
        ));
        assert!(linux.contains("\tmov sp, x29\n\tldp x29, x30, [sp], #16\n\tret\n"));
        assert!(linux.contains(".Lstr.0:\n\t.asciz \"%d\\012\"\n"));
        assert!(linux.ends_with(".note.GNU-stack,\"\",@progbits\n"));

        let mac = render(&program, Target::MacOs);
        assert!(mac.contains("\t.globl _main\n"));
        assert!(!mac.contains("GNU-stack"));
    }
}
