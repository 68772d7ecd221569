use crate::{
    codegen::{
        gen::{condition_code, get_asm_type, AsmOperand, AsmType, ConditionCode},
        replace_pseudo::PseudoMap,
    },
    emitter::util::Target,
    ir::gen::{BinaryOp, Const, IRFunction, IRInstruction, IRProgram, IRValue, UnaryOp},
    semantics::{
        storage::{FrameLayout, GlobalLayout, ARG_REGISTERS},
        typechecker::SymbolTable,
    },
};
use log::debug;

pub const A64_ARG_REGISTERS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct A64Program {
    pub functions: Vec<A64Function>,
    pub static_vars: Vec<GlobalLayout>,
    pub strings: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct A64Function {
    pub name: String,
    pub instructions: Vec<A64Instruction>,
    pub stack_space: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum A64Register {
    X0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X9,
    X10,
    X11,
    X16,
    X17,
    Fp,
    Sp,
    Zr,
}

pub const A64_ARG_REGS: [A64Register; A64_ARG_REGISTERS] = [
    A64Register::X0,
    A64Register::X1,
    A64Register::X2,
    A64Register::X3,
    A64Register::X4,
    A64Register::X5,
    A64Register::X6,
    A64Register::X7,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A64Address {
    pub base: A64Register,
    pub offset: isize,
}

impl A64Address {
    pub fn new(base: A64Register, offset: isize) -> A64Address {
        A64Address { base, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A64BinaryOp {
    Add,
    Sub,
    Mul,
    Sdiv,
    And,
    Orr,
    Eor,
    Lsl,
    Asr,
}

/* Values live in X registers, sign-extended from their memory size, and are
 * narrowed again by the store that writes them back. */
#[derive(Debug, Clone, PartialEq)]
pub enum A64Instruction {
    /* Sign-extending load of 1, 4 or 8 bytes. */
    Ldr {
        size: AsmType,
        reg: A64Register,
        addr: A64Address,
    },

    /* Stores the low 1, 4 or 8 bytes of the register. */
    Str {
        size: AsmType,
        reg: A64Register,
        addr: A64Address,
    },

    MovImm {
        reg: A64Register,
        value: i64,
    },

    Binary {
        op: A64BinaryOp,
        dst: A64Register,
        lhs: A64Register,
        rhs: A64Register,
    },

    /* `dst = acc - lhs * rhs` */
    Msub {
        dst: A64Register,
        lhs: A64Register,
        rhs: A64Register,
        acc: A64Register,
    },

    Neg {
        dst: A64Register,
        src: A64Register,
    },

    Mvn {
        dst: A64Register,
        src: A64Register,
    },

    AddImm {
        dst: A64Register,
        src: A64Register,
        value: i64,
    },

    Cmp {
        lhs: A64Register,
        rhs: A64Register,
    },

    Cset {
        dst: A64Register,
        condition: ConditionCode,
    },

    /* Page address of a symbol plus its low 12 bits. */
    Adr {
        dst: A64Register,
        symbol: String,
    },

    B(String),
    BCond {
        condition: ConditionCode,
        target: String,
    },
    Cbz {
        reg: A64Register,
        target: String,
    },
    Cbnz {
        reg: A64Register,
        target: String,
    },
    Bl(String),
    Label(String),
    Ret,
}

/* Variadic runtime functions and their count of named parameters. Apple's
 * arm64 ABI passes everything after those on the stack. */
const VARIADIC: [(&str, usize); 5] = [
    ("printf", 1),
    ("scanf", 1),
    ("sprintf", 2),
    ("fprintf", 2),
    ("snprintf", 3),
];

pub fn lower_program(program: &IRProgram, symbols: &SymbolTable, target: Target) -> A64Program {
    let functions: Vec<A64Function> = program
        .functions
        .iter()
        .map(|f| lower_function(f, symbols, target))
        .collect();

    debug!(
        "selected {} aarch64 instructions",
        functions.iter().map(|f| f.instructions.len()).sum::<usize>()
    );

    A64Program {
        functions,
        static_vars: program.static_vars.clone(),
        strings: program.strings.clone(),
    }
}

pub fn lower_function(func: &IRFunction, symbols: &SymbolTable, target: Target) -> A64Function {
    let frame = register_frame(func);
    let mut lowering = Lowering {
        map: PseudoMap::new(&frame, symbols),
        symbols,
        target,
        out: vec![],
    };

    for (param, reg) in func.params.iter().zip(A64_ARG_REGS) {
        lowering.store(reg, &IRValue::Var(param.clone()));
    }

    for instr in &func.body {
        lowering.instruction(instr);
    }

    A64Function {
        name: func.name.clone(),
        stack_space: lowering.map.stack_space().next_multiple_of(16),
        instructions: lowering.out,
    }
}

/* The planned frame reads parameters six and seven from the caller's stack.
 * Here they arrive in x6 and x7 and become ordinary temporaries, and the
 * remaining stack parameters start right above the frame record. */
fn register_frame(func: &IRFunction) -> FrameLayout {
    let mut frame = func.frame.clone();
    for (i, param) in func.params.iter().enumerate().skip(ARG_REGISTERS) {
        if i < A64_ARG_REGISTERS {
            frame.slots.remove(param);
        } else if let Some(slot) = frame.slots.get_mut(param) {
            *slot -= 8 * (A64_ARG_REGISTERS - ARG_REGISTERS) as isize;
        }
    }
    frame
}

struct Lowering<'a> {
    map: PseudoMap<'a>,
    symbols: &'a SymbolTable,
    target: Target,
    out: Vec<A64Instruction>,
}

impl<'a> Lowering<'a> {
    fn push(&mut self, instr: A64Instruction) {
        self.out.push(instr);
    }

    fn size(&self, value: &IRValue) -> AsmType {
        get_asm_type(value, self.symbols)
    }

    fn global_address(&mut self, symbol: String, offset: isize, reg: A64Register) {
        self.push(A64Instruction::Adr { dst: reg, symbol });
        if offset != 0 {
            self.push(A64Instruction::AddImm {
                dst: reg,
                src: reg,
                value: offset as i64,
            });
        }
    }

    /* Frame slots are addressed off x29; globals go through `scratch`. */
    fn locate(&mut self, name: &str, offset: isize, scratch: A64Register) -> A64Address {
        match self.map.lookup(name, offset) {
            AsmOperand::Memory(_, slot) => A64Address::new(A64Register::Fp, slot),
            AsmOperand::Data(symbol, offset) => {
                self.global_address(symbol, offset, scratch);
                A64Address::new(scratch, 0)
            }
            _ => unreachable!(),
        }
    }

    fn address_of(&mut self, name: &str, reg: A64Register) {
        match self.map.lookup(name, 0) {
            AsmOperand::Memory(_, slot) => self.push(A64Instruction::AddImm {
                dst: reg,
                src: A64Register::Fp,
                value: slot as i64,
            }),
            AsmOperand::Data(symbol, offset) => self.global_address(symbol, offset, reg),
            _ => unreachable!(),
        }
    }

    fn load(&mut self, value: &IRValue, reg: A64Register) {
        match value {
            IRValue::Constant(konst) => self.push(A64Instruction::MovImm {
                reg,
                value: const_value(konst),
            }),
            IRValue::Var(name) => {
                let size = self.size(value);
                let addr = self.locate(name, 0, A64Register::X16);
                self.push(A64Instruction::Ldr { size, reg, addr });
            }
        }
    }

    fn store(&mut self, reg: A64Register, value: &IRValue) {
        let IRValue::Var(name) = value else {
            unreachable!("stores always target a variable")
        };
        let size = self.size(value);
        let addr = self.locate(name, 0, A64Register::X16);
        self.push(A64Instruction::Str { size, reg, addr });
    }

    fn instruction(&mut self, instr: &IRInstruction) {
        use A64Register::*;

        match instr {
            IRInstruction::Unary { op, src, dst } => {
                self.load(src, X9);
                match op {
                    UnaryOp::Negate => self.push(A64Instruction::Neg { dst: X9, src: X9 }),
                    UnaryOp::Complement => self.push(A64Instruction::Mvn { dst: X9, src: X9 }),
                    UnaryOp::Not => {
                        self.push(A64Instruction::Cmp { lhs: X9, rhs: Zr });
                        self.push(A64Instruction::Cset {
                            dst: X9,
                            condition: ConditionCode::E,
                        });
                    }
                }
                self.store(X9, dst);
            }

            IRInstruction::Binary { op, lhs, rhs, dst } => {
                self.load(lhs, X9);
                self.load(rhs, X10);
                match op {
                    op if op.is_relational() => {
                        self.push(A64Instruction::Cmp { lhs: X9, rhs: X10 });
                        self.push(A64Instruction::Cset {
                            dst: X9,
                            condition: condition_code(*op),
                        });
                    }
                    BinaryOp::Rem => {
                        self.push(A64Instruction::Binary {
                            op: A64BinaryOp::Sdiv,
                            dst: X11,
                            lhs: X9,
                            rhs: X10,
                        });
                        self.push(A64Instruction::Msub {
                            dst: X9,
                            lhs: X11,
                            rhs: X10,
                            acc: X9,
                        });
                    }
                    op => self.push(A64Instruction::Binary {
                        op: binary_op(*op),
                        dst: X9,
                        lhs: X9,
                        rhs: X10,
                    }),
                }
                self.store(X9, dst);
            }

            IRInstruction::Copy { src, dst }
            | IRInstruction::SignExtend { src, dst }
            | IRInstruction::Truncate { src, dst } => {
                self.load(src, X9);
                self.store(X9, dst);
            }

            IRInstruction::GetAddress { src, dst } => {
                let IRValue::Var(name) = src else {
                    unreachable!("only variables have addresses")
                };
                self.address_of(name, X9);
                self.store(X9, dst);
            }

            IRInstruction::Load { src_ptr, dst } => {
                self.load(src_ptr, X9);
                let size = self.size(dst);
                self.push(A64Instruction::Ldr {
                    size,
                    reg: X10,
                    addr: A64Address::new(X9, 0),
                });
                self.store(X10, dst);
            }

            IRInstruction::Store { src, dst_ptr } => {
                self.load(dst_ptr, X9);
                self.load(src, X10);
                let size = self.size(src);
                self.push(A64Instruction::Str {
                    size,
                    reg: X10,
                    addr: A64Address::new(X9, 0),
                });
            }

            IRInstruction::Jump(target) => self.push(A64Instruction::B(target.clone())),

            IRInstruction::JumpIfZero { condition, target } => {
                self.load(condition, X9);
                self.push(A64Instruction::Cbz {
                    reg: X9,
                    target: target.clone(),
                });
            }

            IRInstruction::JumpIfNotZero { condition, target } => {
                self.load(condition, X9);
                self.push(A64Instruction::Cbnz {
                    reg: X9,
                    target: target.clone(),
                });
            }

            IRInstruction::CompareAndJump {
                op,
                lhs,
                rhs,
                target,
            } => {
                self.load(lhs, X9);
                self.load(rhs, X10);
                self.push(A64Instruction::Cmp { lhs: X9, rhs: X10 });
                self.push(A64Instruction::BCond {
                    condition: condition_code(*op),
                    target: target.clone(),
                });
            }

            IRInstruction::Label(label) => self.push(A64Instruction::Label(label.clone())),

            IRInstruction::Call { target, args, dst } => self.call(target, args, dst.as_ref()),

            IRInstruction::AddPtr {
                ptr,
                index,
                scale,
                dst,
            } => {
                self.load(ptr, X9);
                match index {
                    IRValue::Constant(konst) => self.push(A64Instruction::AddImm {
                        dst: X9,
                        src: X9,
                        value: const_value(konst) * *scale as i64,
                    }),
                    IRValue::Var(_) => {
                        self.load(index, X10);
                        self.push(A64Instruction::MovImm {
                            reg: X11,
                            value: *scale as i64,
                        });
                        self.push(A64Instruction::Binary {
                            op: A64BinaryOp::Mul,
                            dst: X10,
                            lhs: X10,
                            rhs: X11,
                        });
                        self.push(A64Instruction::Binary {
                            op: A64BinaryOp::Add,
                            dst: X9,
                            lhs: X9,
                            rhs: X10,
                        });
                    }
                }
                self.store(X9, dst);
            }

            IRInstruction::CopyToOffset { src, dst, offset } => {
                self.load(src, X9);
                let size = self.size(src);
                let addr = self.locate(dst, *offset as isize, X16);
                self.push(A64Instruction::Str {
                    size,
                    reg: X9,
                    addr,
                });
            }

            IRInstruction::Ret(value) => {
                if let Some(value) = value {
                    self.load(value, X0);
                }
                self.push(A64Instruction::Ret);
            }
        }
    }

    fn call(&mut self, callee: &str, args: &[IRValue], dst: Option<&IRValue>) {
        let named = match self.target {
            Target::MacOs => VARIADIC
                .iter()
                .find(|(name, _)| *name == callee)
                .map_or(usize::MAX, |(_, named)| *named),
            Target::Linux => usize::MAX,
        };

        let (register_args, stack_args) =
            args.split_at(args.len().min(A64_ARG_REGISTERS).min(named));

        // Each stack argument takes an 8-byte slot; sp stays 16-aligned.
        let area = (8 * stack_args.len()).next_multiple_of(16) as i64;
        if area != 0 {
            self.push(A64Instruction::AddImm {
                dst: A64Register::Sp,
                src: A64Register::Sp,
                value: -area,
            });
        }

        for (i, arg) in stack_args.iter().enumerate() {
            self.load(arg, A64Register::X9);
            self.push(A64Instruction::Str {
                size: AsmType::Quadword,
                reg: A64Register::X9,
                addr: A64Address::new(A64Register::Sp, 8 * i as isize),
            });
        }

        for (arg, reg) in register_args.iter().zip(A64_ARG_REGS) {
            self.load(arg, reg);
        }

        self.push(A64Instruction::Bl(callee.to_owned()));

        if area != 0 {
            self.push(A64Instruction::AddImm {
                dst: A64Register::Sp,
                src: A64Register::Sp,
                value: area,
            });
        }

        if let Some(dst) = dst {
            self.store(A64Register::X0, dst);
        }
    }
}

fn const_value(konst: &Const) -> i64 {
    match konst {
        Const::Char(n) => *n as i64,
        Const::Int(n) => *n as i64,
        Const::Long(n) => *n,
    }
}

fn binary_op(op: BinaryOp) -> A64BinaryOp {
    match op {
        BinaryOp::Add => A64BinaryOp::Add,
        BinaryOp::Sub => A64BinaryOp::Sub,
        BinaryOp::Mul => A64BinaryOp::Mul,
        BinaryOp::Div => A64BinaryOp::Sdiv,
        BinaryOp::BitAnd => A64BinaryOp::And,
        BinaryOp::BitOr => A64BinaryOp::Orr,
        BinaryOp::BitXor => A64BinaryOp::Eor,
        BinaryOp::ShiftLeft => A64BinaryOp::Lsl,
        BinaryOp::ShiftRight => A64BinaryOp::Asr,
        _ => unreachable!(),
    }
}
