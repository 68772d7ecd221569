use crate::{
    ir::gen::{BinaryOp, Const, IRFunction, IRInstruction, IRProgram, IRValue, UnaryOp},
    parser::ast::Type,
    semantics::{
        storage::{FrameLayout, GlobalLayout, ARG_REGISTERS},
        typechecker::{is_scalar, IdentifierAttrs, SymbolTable},
    },
};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct AsmProgram {
    pub functions: Vec<AsmFunction>,
    pub static_vars: Vec<GlobalLayout>,
    pub strings: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsmFunction {
    pub name: String,
    pub instructions: Vec<AsmInstruction>,
    pub frame: FrameLayout,
    pub stack_space: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsmInstruction {
    Mov {
        asm_type: AsmType,
        src: AsmOperand,
        dst: AsmOperand,
    },

    /* Move with sign extension. */
    Movsx {
        src_type: AsmType,
        src: AsmOperand,
        dst_type: AsmType,
        dst: AsmOperand,
    },

    Unary {
        asm_type: AsmType,
        op: AsmUnaryOp,
        operand: AsmOperand,
    },

    /* `rhs = rhs op lhs`, AT&T operand order. */
    Binary {
        asm_type: AsmType,
        op: AsmBinaryOp,
        lhs: AsmOperand,
        rhs: AsmOperand,
    },

    Cmp {
        asm_type: AsmType,
        lhs: AsmOperand,
        rhs: AsmOperand,
    },

    /* Signed division of DX:AX (EDX:EAX, RDX:RAX) by the operand; the
     * quotient lands in AX and the remainder in DX. */
    Idiv {
        asm_type: AsmType,
        operand: AsmOperand,
    },

    /* Sign-extends AX into DX ahead of a division. */
    Cdq {
        asm_type: AsmType,
    },

    Jmp {
        target: String,
    },

    JmpCC {
        condition: ConditionCode,
        target: String,
    },

    /* Sets a byte to 1 or 0 from the flags of the preceding comparison. */
    SetCC {
        condition: ConditionCode,
        operand: AsmOperand,
    },

    Lea {
        src: AsmOperand,
        dst: AsmOperand,
    },

    Push(AsmOperand),
    Label(String),
    Call {
        target: String,
        external: bool,
    },
    Ret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionCode {
    E,
    NE,
    L,
    LE,
    G,
    GE,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AsmOperand {
    Imm(i64),
    Pseudo(String),
    Memory(AsmRegister, isize),
    Register(AsmRegister),
    Data(String, isize),
    PseudoMem(String, isize),
    Indexed(AsmRegister, AsmRegister, isize),
}

impl AsmOperand {
    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            AsmOperand::Memory(..) | AsmOperand::Data(..) | AsmOperand::Indexed(..)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Hash, Eq, PartialOrd, Ord)]
pub enum AsmRegister {
    Ax,
    Cx,
    Dx,
    Di,
    Si,
    R8,
    R9,
    R10,
    R11,
    Bp,
    Sp,
}

pub const ARG_REGS: [AsmRegister; ARG_REGISTERS] = [
    AsmRegister::Di,
    AsmRegister::Si,
    AsmRegister::Dx,
    AsmRegister::Cx,
    AsmRegister::R8,
    AsmRegister::R9,
];

#[derive(Debug, Clone, PartialEq, Copy)]
pub enum AsmUnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Copy)]
pub enum AsmBinaryOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Sal,
    Sar,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum AsmType {
    Byte,
    Longword,
    Quadword,
}

impl AsmType {
    pub fn size(self) -> usize {
        match self {
            AsmType::Byte => 1,
            AsmType::Longword => 4,
            AsmType::Quadword => 8,
        }
    }
}

pub trait Codegen {
    type Output;

    fn codegen(&self, symbols: &SymbolTable) -> Self::Output;
}

impl Codegen for IRProgram {
    type Output = AsmProgram;

    fn codegen(&self, symbols: &SymbolTable) -> AsmProgram {
        let functions: Vec<AsmFunction> =
            self.functions.iter().map(|f| f.codegen(symbols)).collect();

        debug!(
            "selected {} instructions",
            functions.iter().map(|f| f.instructions.len()).sum::<usize>()
        );

        AsmProgram {
            functions,
            static_vars: self.static_vars.clone(),
            strings: self.strings.clone(),
        }
    }
}

impl Codegen for IRFunction {
    type Output = AsmFunction;

    fn codegen(&self, symbols: &SymbolTable) -> AsmFunction {
        let mut instructions = vec![];

        // Register parameters are spilled to their frame slots; stack
        // parameters are addressed in place above the return address.
        for (param, reg) in self.params.iter().zip(ARG_REGS) {
            let param = IRValue::Var(param.clone());
            instructions.push(AsmInstruction::Mov {
                asm_type: get_asm_type(&param, symbols),
                src: AsmOperand::Register(reg),
                dst: param.codegen(symbols),
            });
        }

        for instr in &self.body {
            instructions.extend(instr.codegen(symbols));
        }

        AsmFunction {
            name: self.name.clone(),
            instructions,
            frame: self.frame.clone(),
            stack_space: 0,
        }
    }
}

impl Codegen for IRValue {
    type Output = AsmOperand;

    fn codegen(&self, symbols: &SymbolTable) -> AsmOperand {
        match self {
            IRValue::Constant(Const::Char(n)) => AsmOperand::Imm(*n as i64),
            IRValue::Constant(Const::Int(n)) => AsmOperand::Imm(*n as i64),
            IRValue::Constant(Const::Long(n)) => AsmOperand::Imm(*n),
            IRValue::Var(name) => match symbols.get(name) {
                Some(symbol) if !is_scalar(&symbol._type) => AsmOperand::PseudoMem(name.clone(), 0),
                _ => AsmOperand::Pseudo(name.clone()),
            },
        }
    }
}

impl Codegen for IRInstruction {
    type Output = Vec<AsmInstruction>;

    fn codegen(&self, symbols: &SymbolTable) -> Vec<AsmInstruction> {
        let operand = |v: &IRValue| v.codegen(symbols);
        let asm_type = |v: &IRValue| get_asm_type(v, symbols);

        match self {
            IRInstruction::Unary {
                op: UnaryOp::Not,
                src,
                dst,
            } => vec![
                AsmInstruction::Cmp {
                    asm_type: asm_type(src),
                    lhs: AsmOperand::Imm(0),
                    rhs: operand(src),
                },
                AsmInstruction::Mov {
                    asm_type: asm_type(dst),
                    src: AsmOperand::Imm(0),
                    dst: operand(dst),
                },
                AsmInstruction::SetCC {
                    condition: ConditionCode::E,
                    operand: operand(dst),
                },
            ],

            IRInstruction::Unary { op, src, dst } => vec![
                AsmInstruction::Mov {
                    asm_type: asm_type(dst),
                    src: operand(src),
                    dst: operand(dst),
                },
                AsmInstruction::Unary {
                    asm_type: asm_type(dst),
                    op: match op {
                        UnaryOp::Negate => AsmUnaryOp::Neg,
                        UnaryOp::Complement => AsmUnaryOp::Not,
                        UnaryOp::Not => unreachable!(),
                    },
                    operand: operand(dst),
                },
            ],

            IRInstruction::Binary { op, lhs, rhs, dst } if op.is_relational() => vec![
                AsmInstruction::Cmp {
                    asm_type: asm_type(lhs),
                    lhs: operand(rhs),
                    rhs: operand(lhs),
                },
                AsmInstruction::Mov {
                    asm_type: asm_type(dst),
                    src: AsmOperand::Imm(0),
                    dst: operand(dst),
                },
                AsmInstruction::SetCC {
                    condition: condition_code(*op),
                    operand: operand(dst),
                },
            ],

            IRInstruction::Binary {
                op: op @ (BinaryOp::Div | BinaryOp::Rem),
                lhs,
                rhs,
                dst,
            } => {
                let t = asm_type(dst);
                let result = if *op == BinaryOp::Div {
                    AsmRegister::Ax
                } else {
                    AsmRegister::Dx
                };
                vec![
                    AsmInstruction::Mov {
                        asm_type: t,
                        src: operand(lhs),
                        dst: AsmOperand::Register(AsmRegister::Ax),
                    },
                    AsmInstruction::Cdq { asm_type: t },
                    AsmInstruction::Idiv {
                        asm_type: t,
                        operand: operand(rhs),
                    },
                    AsmInstruction::Mov {
                        asm_type: t,
                        src: AsmOperand::Register(result),
                        dst: operand(dst),
                    },
                ]
            }

            IRInstruction::Binary {
                op: op @ (BinaryOp::ShiftLeft | BinaryOp::ShiftRight),
                lhs,
                rhs,
                dst,
            } => {
                let t = asm_type(dst);
                let asm_op = if *op == BinaryOp::ShiftLeft {
                    AsmBinaryOp::Sal
                } else {
                    AsmBinaryOp::Sar
                };
                let mut instructions = vec![AsmInstruction::Mov {
                    asm_type: t,
                    src: operand(lhs),
                    dst: operand(dst),
                }];
                let count = match operand(rhs) {
                    imm @ AsmOperand::Imm(_) => imm,
                    other => {
                        instructions.push(AsmInstruction::Mov {
                            asm_type: asm_type(rhs),
                            src: other,
                            dst: AsmOperand::Register(AsmRegister::Cx),
                        });
                        AsmOperand::Register(AsmRegister::Cx)
                    }
                };
                instructions.push(AsmInstruction::Binary {
                    asm_type: t,
                    op: asm_op,
                    lhs: count,
                    rhs: operand(dst),
                });
                instructions
            }

            IRInstruction::Binary { op, lhs, rhs, dst } => vec![
                AsmInstruction::Mov {
                    asm_type: asm_type(dst),
                    src: operand(lhs),
                    dst: operand(dst),
                },
                AsmInstruction::Binary {
                    asm_type: asm_type(dst),
                    op: match op {
                        BinaryOp::Add => AsmBinaryOp::Add,
                        BinaryOp::Sub => AsmBinaryOp::Sub,
                        BinaryOp::Mul => AsmBinaryOp::Mul,
                        BinaryOp::BitAnd => AsmBinaryOp::And,
                        BinaryOp::BitOr => AsmBinaryOp::Or,
                        BinaryOp::BitXor => AsmBinaryOp::Xor,
                        _ => unreachable!(),
                    },
                    lhs: operand(rhs),
                    rhs: operand(dst),
                },
            ],

            IRInstruction::Copy { src, dst } => vec![AsmInstruction::Mov {
                asm_type: asm_type(dst),
                src: operand(src),
                dst: operand(dst),
            }],

            IRInstruction::GetAddress { src, dst } => vec![AsmInstruction::Lea {
                src: operand(src),
                dst: operand(dst),
            }],

            IRInstruction::Load { src_ptr, dst } => vec![
                AsmInstruction::Mov {
                    asm_type: AsmType::Quadword,
                    src: operand(src_ptr),
                    dst: AsmOperand::Register(AsmRegister::R9),
                },
                AsmInstruction::Mov {
                    asm_type: asm_type(dst),
                    src: AsmOperand::Memory(AsmRegister::R9, 0),
                    dst: operand(dst),
                },
            ],

            IRInstruction::Store { src, dst_ptr } => vec![
                AsmInstruction::Mov {
                    asm_type: AsmType::Quadword,
                    src: operand(dst_ptr),
                    dst: AsmOperand::Register(AsmRegister::R9),
                },
                AsmInstruction::Mov {
                    asm_type: asm_type(src),
                    src: operand(src),
                    dst: AsmOperand::Memory(AsmRegister::R9, 0),
                },
            ],

            IRInstruction::Jump(target) => vec![AsmInstruction::Jmp {
                target: target.clone(),
            }],

            IRInstruction::JumpIfZero { condition, target } => vec![
                AsmInstruction::Cmp {
                    asm_type: asm_type(condition),
                    lhs: AsmOperand::Imm(0),
                    rhs: operand(condition),
                },
                AsmInstruction::JmpCC {
                    condition: ConditionCode::E,
                    target: target.clone(),
                },
            ],

            IRInstruction::JumpIfNotZero { condition, target } => vec![
                AsmInstruction::Cmp {
                    asm_type: asm_type(condition),
                    lhs: AsmOperand::Imm(0),
                    rhs: operand(condition),
                },
                AsmInstruction::JmpCC {
                    condition: ConditionCode::NE,
                    target: target.clone(),
                },
            ],

            IRInstruction::CompareAndJump {
                op,
                lhs,
                rhs,
                target,
            } => vec![
                AsmInstruction::Cmp {
                    asm_type: asm_type(lhs),
                    lhs: operand(rhs),
                    rhs: operand(lhs),
                },
                AsmInstruction::JmpCC {
                    condition: condition_code(*op),
                    target: target.clone(),
                },
            ],

            IRInstruction::Label(label) => vec![AsmInstruction::Label(label.clone())],

            IRInstruction::Call { target, args, dst } => {
                let mut instructions = vec![];

                let (register_args, stack_args) = args.split_at(args.len().min(ARG_REGISTERS));

                let stack_padding = if stack_args.len() % 2 != 0 { 8 } else { 0 };
                if stack_padding != 0 {
                    instructions.push(AsmInstruction::Binary {
                        asm_type: AsmType::Quadword,
                        op: AsmBinaryOp::Sub,
                        lhs: AsmOperand::Imm(stack_padding),
                        rhs: AsmOperand::Register(AsmRegister::Sp),
                    });
                }

                for (arg, reg) in register_args.iter().zip(ARG_REGS) {
                    instructions.push(AsmInstruction::Mov {
                        asm_type: asm_type(arg),
                        src: operand(arg),
                        dst: AsmOperand::Register(reg),
                    });
                }

                for arg in stack_args.iter().rev() {
                    match (operand(arg), asm_type(arg)) {
                        (op @ AsmOperand::Imm(_), _) | (op, AsmType::Quadword) => {
                            instructions.push(AsmInstruction::Push(op))
                        }
                        (op, t) => instructions.extend([
                            AsmInstruction::Mov {
                                asm_type: t,
                                src: op,
                                dst: AsmOperand::Register(AsmRegister::Ax),
                            },
                            AsmInstruction::Push(AsmOperand::Register(AsmRegister::Ax)),
                        ]),
                    }
                }

                // Variadic callees read the vector register count from %al.
                instructions.push(AsmInstruction::Mov {
                    asm_type: AsmType::Longword,
                    src: AsmOperand::Imm(0),
                    dst: AsmOperand::Register(AsmRegister::Ax),
                });

                let external = !matches!(
                    symbols.get(target).map(|s| s.attrs),
                    Some(IdentifierAttrs::FuncAttr { defined: true })
                );
                instructions.push(AsmInstruction::Call {
                    target: target.clone(),
                    external,
                });

                let bytes_to_remove = 8 * stack_args.len() as i64 + stack_padding;
                if bytes_to_remove != 0 {
                    instructions.push(AsmInstruction::Binary {
                        asm_type: AsmType::Quadword,
                        op: AsmBinaryOp::Add,
                        lhs: AsmOperand::Imm(bytes_to_remove),
                        rhs: AsmOperand::Register(AsmRegister::Sp),
                    });
                }

                if let Some(dst) = dst {
                    instructions.push(AsmInstruction::Mov {
                        asm_type: asm_type(dst),
                        src: AsmOperand::Register(AsmRegister::Ax),
                        dst: operand(dst),
                    });
                }

                instructions
            }

            IRInstruction::SignExtend { src, dst } => vec![AsmInstruction::Movsx {
                src_type: asm_type(src),
                src: operand(src),
                dst_type: asm_type(dst),
                dst: operand(dst),
            }],

            IRInstruction::Truncate { src, dst } => vec![AsmInstruction::Mov {
                asm_type: asm_type(dst),
                src: operand(src),
                dst: operand(dst),
            }],

            IRInstruction::AddPtr {
                ptr,
                index: IRValue::Constant(konst),
                scale,
                dst,
            } => {
                let konst = match konst {
                    Const::Char(n) => *n as isize,
                    Const::Int(n) => *n as isize,
                    Const::Long(n) => *n as isize,
                };
                vec![
                    AsmInstruction::Mov {
                        asm_type: AsmType::Quadword,
                        src: operand(ptr),
                        dst: AsmOperand::Register(AsmRegister::R9),
                    },
                    AsmInstruction::Lea {
                        src: AsmOperand::Memory(AsmRegister::R9, konst * *scale as isize),
                        dst: operand(dst),
                    },
                ]
            }

            IRInstruction::AddPtr {
                ptr,
                index,
                scale,
                dst,
            } => {
                let mut instructions = vec![AsmInstruction::Mov {
                    asm_type: AsmType::Quadword,
                    src: operand(ptr),
                    dst: AsmOperand::Register(AsmRegister::Ax),
                }];

                match asm_type(index) {
                    AsmType::Quadword => instructions.push(AsmInstruction::Mov {
                        asm_type: AsmType::Quadword,
                        src: operand(index),
                        dst: AsmOperand::Register(AsmRegister::Dx),
                    }),
                    t => instructions.push(AsmInstruction::Movsx {
                        src_type: t,
                        src: operand(index),
                        dst_type: AsmType::Quadword,
                        dst: AsmOperand::Register(AsmRegister::Dx),
                    }),
                }

                let scale = match scale {
                    1 | 2 | 4 | 8 => *scale as isize,
                    _ => {
                        instructions.push(AsmInstruction::Binary {
                            asm_type: AsmType::Quadword,
                            op: AsmBinaryOp::Mul,
                            lhs: AsmOperand::Imm(*scale as i64),
                            rhs: AsmOperand::Register(AsmRegister::Dx),
                        });
                        1
                    }
                };

                instructions.push(AsmInstruction::Lea {
                    src: AsmOperand::Indexed(AsmRegister::Ax, AsmRegister::Dx, scale),
                    dst: operand(dst),
                });
                instructions
            }

            IRInstruction::CopyToOffset { src, dst, offset } => vec![AsmInstruction::Mov {
                asm_type: asm_type(src),
                src: operand(src),
                dst: AsmOperand::PseudoMem(dst.clone(), *offset as isize),
            }],

            IRInstruction::Ret(value) => {
                let mut instructions = vec![];
                if let Some(value) = value {
                    instructions.push(AsmInstruction::Mov {
                        asm_type: asm_type(value),
                        src: operand(value),
                        dst: AsmOperand::Register(AsmRegister::Ax),
                    });
                }
                instructions.push(AsmInstruction::Ret);
                instructions
            }
        }
    }
}

pub fn condition_code(op: BinaryOp) -> ConditionCode {
    match op {
        BinaryOp::Equal => ConditionCode::E,
        BinaryOp::NotEqual => ConditionCode::NE,
        BinaryOp::Less => ConditionCode::L,
        BinaryOp::LessEqual => ConditionCode::LE,
        BinaryOp::Greater => ConditionCode::G,
        BinaryOp::GreaterEqual => ConditionCode::GE,
        _ => unreachable!(),
    }
}

pub fn type_to_asm(t: &Type) -> AsmType {
    match t {
        Type::Char => AsmType::Byte,
        Type::Int => AsmType::Longword,
        _ => AsmType::Quadword,
    }
}

pub fn get_asm_type(value: &IRValue, symbols: &SymbolTable) -> AsmType {
    match value {
        IRValue::Constant(Const::Char(_)) => AsmType::Byte,
        IRValue::Constant(Const::Int(_)) => AsmType::Longword,
        IRValue::Constant(Const::Long(_)) => AsmType::Quadword,
        IRValue::Var(name) => symbols
            .get(name)
            .map(|symbol| type_to_asm(&symbol._type))
            .unwrap_or(AsmType::Quadword),
    }
}
