use crate::codegen::gen::{
    AsmBinaryOp, AsmFunction, AsmInstruction, AsmOperand, AsmProgram, AsmRegister, AsmType,
};

pub trait Fixup {
    fn fixup(&self) -> Self;
}

impl Fixup for AsmProgram {
    fn fixup(&self) -> AsmProgram {
        AsmProgram {
            functions: self.functions.iter().map(|f| f.fixup()).collect(),
            static_vars: self.static_vars.clone(),
            strings: self.strings.clone(),
        }
    }
}

impl Fixup for AsmFunction {
    fn fixup(&self) -> AsmFunction {
        let stack_space = self.stack_space.next_multiple_of(16);

        let mut instructions = vec![];
        if stack_space != 0 {
            instructions.push(AsmInstruction::Binary {
                asm_type: AsmType::Quadword,
                op: AsmBinaryOp::Sub,
                lhs: AsmOperand::Imm(stack_space as i64),
                rhs: AsmOperand::Register(AsmRegister::Sp),
            });
        }

        for instr in &self.instructions {
            instructions.extend(fixup_instruction(instr));
        }

        AsmFunction {
            name: self.name.clone(),
            instructions,
            frame: self.frame.clone(),
            stack_space,
        }
    }
}

fn fits_in_i32(n: i64) -> bool {
    i32::try_from(n).is_ok()
}

fn is_large_imm(op: &AsmOperand) -> bool {
    matches!(op, AsmOperand::Imm(n) if !fits_in_i32(*n))
}

fn r10() -> AsmOperand {
    AsmOperand::Register(AsmRegister::R10)
}

fn r11() -> AsmOperand {
    AsmOperand::Register(AsmRegister::R11)
}

// At most one memory operand, and immediates only where x86-64 allows them.
fn fixup_instruction(instr: &AsmInstruction) -> Vec<AsmInstruction> {
    match instr {
        AsmInstruction::Mov {
            asm_type,
            src: AsmOperand::Imm(n),
            dst,
        } => {
            let n = match asm_type {
                AsmType::Byte => *n as i8 as i64,
                AsmType::Longword => *n as i32 as i64,
                AsmType::Quadword => *n,
            };
            if dst.is_memory() && !fits_in_i32(n) {
                vec![
                    AsmInstruction::Mov {
                        asm_type: *asm_type,
                        src: AsmOperand::Imm(n),
                        dst: r10(),
                    },
                    AsmInstruction::Mov {
                        asm_type: *asm_type,
                        src: r10(),
                        dst: dst.clone(),
                    },
                ]
            } else {
                vec![AsmInstruction::Mov {
                    asm_type: *asm_type,
                    src: AsmOperand::Imm(n),
                    dst: dst.clone(),
                }]
            }
        }

        AsmInstruction::Mov { asm_type, src, dst } if src.is_memory() && dst.is_memory() => vec![
            AsmInstruction::Mov {
                asm_type: *asm_type,
                src: src.clone(),
                dst: r10(),
            },
            AsmInstruction::Mov {
                asm_type: *asm_type,
                src: r10(),
                dst: dst.clone(),
            },
        ],

        AsmInstruction::Movsx {
            src_type,
            src,
            dst_type,
            dst,
        } => {
            let mut instructions = vec![];
            let src = match src {
                AsmOperand::Imm(n) => {
                    instructions.push(AsmInstruction::Mov {
                        asm_type: *src_type,
                        src: AsmOperand::Imm(*n),
                        dst: r10(),
                    });
                    r10()
                }
                other => other.clone(),
            };
            if dst.is_memory() {
                instructions.push(AsmInstruction::Movsx {
                    src_type: *src_type,
                    src,
                    dst_type: *dst_type,
                    dst: r11(),
                });
                instructions.push(AsmInstruction::Mov {
                    asm_type: *dst_type,
                    src: r11(),
                    dst: dst.clone(),
                });
            } else {
                instructions.push(AsmInstruction::Movsx {
                    src_type: *src_type,
                    src,
                    dst_type: *dst_type,
                    dst: dst.clone(),
                });
            }
            instructions
        }

        AsmInstruction::Binary {
            asm_type,
            op: AsmBinaryOp::Mul,
            lhs,
            rhs,
        } if rhs.is_memory() => {
            let mut instructions = vec![];
            let lhs = if is_large_imm(lhs) {
                instructions.push(AsmInstruction::Mov {
                    asm_type: *asm_type,
                    src: lhs.clone(),
                    dst: r10(),
                });
                r10()
            } else {
                lhs.clone()
            };
            instructions.extend([
                AsmInstruction::Mov {
                    asm_type: *asm_type,
                    src: rhs.clone(),
                    dst: r11(),
                },
                AsmInstruction::Binary {
                    asm_type: *asm_type,
                    op: AsmBinaryOp::Mul,
                    lhs,
                    rhs: r11(),
                },
                AsmInstruction::Mov {
                    asm_type: *asm_type,
                    src: r11(),
                    dst: rhs.clone(),
                },
            ]);
            instructions
        }

        AsmInstruction::Binary {
            asm_type,
            op,
            lhs,
            rhs,
        } if (lhs.is_memory() && rhs.is_memory()) || is_large_imm(lhs) => vec![
            AsmInstruction::Mov {
                asm_type: *asm_type,
                src: lhs.clone(),
                dst: r10(),
            },
            AsmInstruction::Binary {
                asm_type: *asm_type,
                op: *op,
                lhs: r10(),
                rhs: rhs.clone(),
            },
        ],

        AsmInstruction::Idiv { asm_type, operand } if matches!(operand, AsmOperand::Imm(_)) => {
            vec![
                AsmInstruction::Mov {
                    asm_type: *asm_type,
                    src: operand.clone(),
                    dst: r10(),
                },
                AsmInstruction::Idiv {
                    asm_type: *asm_type,
                    operand: r10(),
                },
            ]
        }

        AsmInstruction::Cmp { asm_type, lhs, rhs } => {
            let mut instructions = vec![];
            let lhs = if (lhs.is_memory() && rhs.is_memory()) || is_large_imm(lhs) {
                instructions.push(AsmInstruction::Mov {
                    asm_type: *asm_type,
                    src: lhs.clone(),
                    dst: r10(),
                });
                r10()
            } else {
                lhs.clone()
            };
            let rhs = if let AsmOperand::Imm(_) = rhs {
                instructions.push(AsmInstruction::Mov {
                    asm_type: *asm_type,
                    src: rhs.clone(),
                    dst: r11(),
                });
                r11()
            } else {
                rhs.clone()
            };
            instructions.push(AsmInstruction::Cmp {
                asm_type: *asm_type,
                lhs,
                rhs,
            });
            instructions
        }

        AsmInstruction::Lea { src, dst } if dst.is_memory() => vec![
            AsmInstruction::Lea {
                src: src.clone(),
                dst: r11(),
            },
            AsmInstruction::Mov {
                asm_type: AsmType::Quadword,
                src: r11(),
                dst: dst.clone(),
            },
        ],

        AsmInstruction::Push(op) if is_large_imm(op) => vec![
            AsmInstruction::Mov {
                asm_type: AsmType::Quadword,
                src: op.clone(),
                dst: r10(),
            },
            AsmInstruction::Push(r10()),
        ],

        _ => vec![instr.clone()],
    }
}
