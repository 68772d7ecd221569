use crate::{
    parser::ast::{
        AddrOfExpression, AssignExpression, BinaryExpression, BinaryExpressionKind, BlockItem,
        BlockStatement, BreakStatement, CallExpression, CastExpression, CommaExpression,
        ConditionalExpression, ConstantExpression, Declaration, DerefExpression, Expression,
        ExpressionStatement, ForInit, ForStatement, FunctionDeclaration, IfStatement,
        Initializer, PostfixExpression, PostfixExpressionKind, Program, ReturnStatement,
        Statement, StringExpression, Type, UnaryExpression, UnaryExpressionKind,
        VariableDeclaration, VariableExpression, WhileStatement,
    },
    semantics::{
        storage::{flatten_initializer, FrameLayout, GlobalLayout, StorageLayout},
        typechecker::{get_size_of_type, get_type, IdentifierAttrs, Symbol, SymbolTable},
    },
};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Const {
    Char(i8),
    Int(i32),
    Long(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRProgram {
    pub functions: Vec<IRFunction>,
    pub static_vars: Vec<GlobalLayout>,
    pub strings: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<IRInstruction>,
    pub frame: FrameLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IRInstruction {
    Unary {
        op: UnaryOp,
        src: IRValue,
        dst: IRValue,
    },
    Binary {
        op: BinaryOp,
        lhs: IRValue,
        rhs: IRValue,
        dst: IRValue,
    },
    Copy {
        src: IRValue,
        dst: IRValue,
    },
    GetAddress {
        src: IRValue,
        dst: IRValue,
    },
    Load {
        src_ptr: IRValue,
        dst: IRValue,
    },
    Store {
        src: IRValue,
        dst_ptr: IRValue,
    },
    Jump(String),
    JumpIfZero {
        condition: IRValue,
        target: String,
    },
    JumpIfNotZero {
        condition: IRValue,
        target: String,
    },
    CompareAndJump {
        op: BinaryOp,
        lhs: IRValue,
        rhs: IRValue,
        target: String,
    },
    Label(String),
    Call {
        target: String,
        args: Vec<IRValue>,
        dst: Option<IRValue>,
    },
    SignExtend {
        src: IRValue,
        dst: IRValue,
    },
    Truncate {
        src: IRValue,
        dst: IRValue,
    },
    AddPtr {
        ptr: IRValue,
        index: IRValue,
        scale: usize,
        dst: IRValue,
    },
    CopyToOffset {
        src: IRValue,
        dst: String,
        offset: usize,
    },
    Ret(Option<IRValue>),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IRValue {
    Constant(Const),
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Copy, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Complement,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Less,
    Greater,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
}

impl BinaryOp {
    fn negate(self) -> BinaryOp {
        match self {
            BinaryOp::Less => BinaryOp::GreaterEqual,
            BinaryOp::Greater => BinaryOp::LessEqual,
            BinaryOp::Equal => BinaryOp::NotEqual,
            BinaryOp::NotEqual => BinaryOp::Equal,
            BinaryOp::LessEqual => BinaryOp::Greater,
            BinaryOp::GreaterEqual => BinaryOp::Less,
            _ => unreachable!(),
        }
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Less
                | BinaryOp::Greater
                | BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessEqual
                | BinaryOp::GreaterEqual
        )
    }
}

impl From<BinaryExpressionKind> for BinaryOp {
    fn from(kind: BinaryExpressionKind) -> BinaryOp {
        match kind {
            BinaryExpressionKind::Add => BinaryOp::Add,
            BinaryExpressionKind::Sub => BinaryOp::Sub,
            BinaryExpressionKind::Mul => BinaryOp::Mul,
            BinaryExpressionKind::Div => BinaryOp::Div,
            BinaryExpressionKind::Rem => BinaryOp::Rem,
            BinaryExpressionKind::BitAnd => BinaryOp::BitAnd,
            BinaryExpressionKind::BitOr => BinaryOp::BitOr,
            BinaryExpressionKind::BitXor => BinaryOp::BitXor,
            BinaryExpressionKind::ShiftLeft => BinaryOp::ShiftLeft,
            BinaryExpressionKind::ShiftRight => BinaryOp::ShiftRight,
            BinaryExpressionKind::Less => BinaryOp::Less,
            BinaryExpressionKind::Greater => BinaryOp::Greater,
            BinaryExpressionKind::Equal => BinaryOp::Equal,
            BinaryExpressionKind::NotEqual => BinaryOp::NotEqual,
            BinaryExpressionKind::LessEqual => BinaryOp::LessEqual,
            BinaryExpressionKind::GreaterEqual => BinaryOp::GreaterEqual,
            BinaryExpressionKind::And | BinaryExpressionKind::Or => unreachable!(),
        }
    }
}

#[derive(Debug)]
pub struct IrContext {
    pub symbols: SymbolTable,
    pub layout: StorageLayout,
    temps: usize,
    labels: usize,
}

impl IrContext {
    pub fn new(symbols: SymbolTable, layout: StorageLayout) -> IrContext {
        IrContext {
            symbols,
            layout,
            temps: 0,
            labels: 0,
        }
    }

    fn make_tacky_variable(&mut self, t: &Type) -> IRValue {
        self.temps += 1;
        let name = format!("tmp.{}", self.temps);
        self.symbols.insert(
            name.clone(),
            Symbol {
                _type: t.clone(),
                attrs: IdentifierAttrs::LocalAttr,
            },
        );
        IRValue::Var(name)
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        self.labels += 1;
        format!("{}.{}", prefix, self.labels)
    }

    fn string_label(&mut self, value: &str) -> String {
        let label = self.layout.intern_string(value);
        self.symbols.insert(
            label.clone(),
            Symbol {
                _type: Type::Array {
                    element: Type::Char.into(),
                    size: value.len() + 1,
                },
                attrs: IdentifierAttrs::StaticAttr,
            },
        );
        label
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExpResult {
    PlainOperand(IRValue),
    DereferencedPointer(IRValue),
}

fn constant(value: i64, t: &Type) -> IRValue {
    IRValue::Constant(match t {
        Type::Char => Const::Char(value as i8),
        Type::Int => Const::Int(value as i32),
        _ => Const::Long(value),
    })
}

fn emit_tacky_and_convert(
    e: &Expression,
    ctx: &mut IrContext,
    instructions: &mut Vec<IRInstruction>,
) -> IRValue {
    match emit_tacky(e, ctx, instructions) {
        ExpResult::PlainOperand(val) => val,
        ExpResult::DereferencedPointer(ptr) => {
            let dst = ctx.make_tacky_variable(get_type(e));
            instructions.push(IRInstruction::Load {
                src_ptr: ptr,
                dst: dst.clone(),
            });
            dst
        }
    }
}

fn emit_tacky(
    e: &Expression,
    ctx: &mut IrContext,
    instructions: &mut Vec<IRInstruction>,
) -> ExpResult {
    match e {
        Expression::Constant(ConstantExpression { value, _type, .. }) => {
            ExpResult::PlainOperand(constant(*value as i64, _type))
        }
        Expression::String(StringExpression { value, .. }) => {
            ExpResult::PlainOperand(IRValue::Var(ctx.string_label(value)))
        }
        Expression::Variable(VariableExpression { value, .. }) => {
            ExpResult::PlainOperand(IRValue::Var(value.clone()))
        }
        Expression::Unary(UnaryExpression {
            kind, expr, _type, ..
        }) => {
            let src = emit_tacky_and_convert(expr, ctx, instructions);
            let op = match kind {
                UnaryExpressionKind::Plus => return ExpResult::PlainOperand(src),
                UnaryExpressionKind::Negate => UnaryOp::Negate,
                UnaryExpressionKind::Complement => UnaryOp::Complement,
                UnaryExpressionKind::Not => UnaryOp::Not,
            };
            let dst = ctx.make_tacky_variable(_type);
            instructions.push(IRInstruction::Unary {
                op,
                src,
                dst: dst.clone(),
            });
            ExpResult::PlainOperand(dst)
        }
        Expression::Binary(BinaryExpression {
            kind: BinaryExpressionKind::And | BinaryExpressionKind::Or,
            ..
        }) => ExpResult::PlainOperand(emit_boolean(e, ctx, instructions)),
        Expression::Binary(BinaryExpression {
            kind,
            lhs,
            rhs,
            _type,
            ..
        }) => {
            let lhs_type = get_type(lhs).clone();
            let rhs_type = get_type(rhs).clone();
            match (kind, &lhs_type, &rhs_type) {
                (BinaryExpressionKind::Add, Type::Pointer(_), _) => {
                    let ptr = emit_tacky_and_convert(lhs, ctx, instructions);
                    let index = emit_tacky_and_convert(rhs, ctx, instructions);
                    ExpResult::PlainOperand(emit_ptr_addition(ptr, index, _type, ctx, instructions))
                }
                (BinaryExpressionKind::Add, _, Type::Pointer(_)) => {
                    let index = emit_tacky_and_convert(lhs, ctx, instructions);
                    let ptr = emit_tacky_and_convert(rhs, ctx, instructions);
                    ExpResult::PlainOperand(emit_ptr_addition(ptr, index, _type, ctx, instructions))
                }
                (BinaryExpressionKind::Sub, Type::Pointer(referenced), Type::Pointer(_)) => {
                    let lhs = emit_tacky_and_convert(lhs, ctx, instructions);
                    let rhs = emit_tacky_and_convert(rhs, ctx, instructions);
                    let diff = ctx.make_tacky_variable(&lhs_type);
                    instructions.push(IRInstruction::Binary {
                        op: BinaryOp::Sub,
                        lhs,
                        rhs,
                        dst: diff.clone(),
                    });
                    let count = ctx.make_tacky_variable(&lhs_type);
                    instructions.push(IRInstruction::Binary {
                        op: BinaryOp::Div,
                        lhs: diff,
                        rhs: IRValue::Constant(Const::Long(get_size_of_type(referenced) as i64)),
                        dst: count.clone(),
                    });
                    let dst = ctx.make_tacky_variable(_type);
                    instructions.push(IRInstruction::Truncate {
                        src: count,
                        dst: dst.clone(),
                    });
                    ExpResult::PlainOperand(dst)
                }
                (BinaryExpressionKind::Sub, Type::Pointer(_), _) => {
                    let ptr = emit_tacky_and_convert(lhs, ctx, instructions);
                    let index = emit_tacky_and_convert(rhs, ctx, instructions);
                    let negated = ctx.make_tacky_variable(&rhs_type);
                    instructions.push(IRInstruction::Unary {
                        op: UnaryOp::Negate,
                        src: index,
                        dst: negated.clone(),
                    });
                    ExpResult::PlainOperand(emit_ptr_addition(
                        ptr,
                        negated,
                        _type,
                        ctx,
                        instructions,
                    ))
                }
                _ => {
                    let lhs = emit_tacky_and_convert(lhs, ctx, instructions);
                    let rhs = emit_tacky_and_convert(rhs, ctx, instructions);
                    let dst = ctx.make_tacky_variable(_type);
                    instructions.push(IRInstruction::Binary {
                        op: (*kind).into(),
                        lhs,
                        rhs,
                        dst: dst.clone(),
                    });
                    ExpResult::PlainOperand(dst)
                }
            }
        }
        Expression::Assign(AssignExpression {
            op: None, lhs, rhs, ..
        }) => {
            let lval = emit_tacky(lhs, ctx, instructions);
            let rval = emit_tacky_and_convert(rhs, ctx, instructions);
            match lval {
                ExpResult::PlainOperand(obj) => {
                    instructions.push(IRInstruction::Copy {
                        src: rval,
                        dst: obj.clone(),
                    });
                    ExpResult::PlainOperand(obj)
                }
                ExpResult::DereferencedPointer(ptr) => {
                    instructions.push(IRInstruction::Store {
                        src: rval.clone(),
                        dst_ptr: ptr,
                    });
                    ExpResult::PlainOperand(rval)
                }
            }
        }
        Expression::Assign(AssignExpression {
            op: Some(op),
            lhs,
            rhs,
            _type,
            ..
        }) => {
            // The right operand, including any assignment it contains, is
            // complete before the target is read.
            let lval = emit_tacky(lhs, ctx, instructions);
            let rval = emit_tacky_and_convert(rhs, ctx, instructions);
            let current = read_lvalue(&lval, _type, ctx, instructions);

            let updated = match _type {
                Type::Pointer(_) => {
                    let index = if *op == BinaryExpressionKind::Sub {
                        let negated = ctx.make_tacky_variable(&Type::Int);
                        instructions.push(IRInstruction::Unary {
                            op: UnaryOp::Negate,
                            src: rval,
                            dst: negated.clone(),
                        });
                        negated
                    } else {
                        rval
                    };
                    emit_ptr_addition(current, index, _type, ctx, instructions)
                }
                _ => {
                    let widened = convert_value(current, _type, &Type::Int, ctx, instructions);
                    let result = ctx.make_tacky_variable(&Type::Int);
                    instructions.push(IRInstruction::Binary {
                        op: (*op).into(),
                        lhs: widened,
                        rhs: rval,
                        dst: result.clone(),
                    });
                    convert_value(result, &Type::Int, _type, ctx, instructions)
                }
            };

            write_lvalue(&lval, updated, instructions)
        }
        Expression::Postfix(PostfixExpression {
            kind, expr, _type, ..
        }) => {
            let lval = emit_tacky(expr, ctx, instructions);
            let current = read_lvalue(&lval, _type, ctx, instructions);
            let old = ctx.make_tacky_variable(_type);
            instructions.push(IRInstruction::Copy {
                src: current,
                dst: old.clone(),
            });

            let delta = match kind {
                PostfixExpressionKind::Increment => 1,
                PostfixExpressionKind::Decrement => -1,
            };
            let updated = match _type {
                Type::Pointer(_) => emit_ptr_addition(
                    old.clone(),
                    IRValue::Constant(Const::Long(delta)),
                    _type,
                    ctx,
                    instructions,
                ),
                _ => {
                    let widened = convert_value(old.clone(), _type, &Type::Int, ctx, instructions);
                    let result = ctx.make_tacky_variable(&Type::Int);
                    instructions.push(IRInstruction::Binary {
                        op: BinaryOp::Add,
                        lhs: widened,
                        rhs: IRValue::Constant(Const::Int(delta as i32)),
                        dst: result.clone(),
                    });
                    convert_value(result, &Type::Int, _type, ctx, instructions)
                }
            };

            write_lvalue(&lval, updated, instructions);
            ExpResult::PlainOperand(old)
        }
        Expression::Conditional(ConditionalExpression {
            condition,
            then_expr,
            else_expr,
            _type,
            ..
        }) => {
            let else_label = ctx.fresh_label("cond_else");
            let end_label = ctx.fresh_label("cond_end");
            let dst = ctx.make_tacky_variable(_type);

            emit_branch(condition, false, &else_label, ctx, instructions);
            let v1 = emit_tacky_and_convert(then_expr, ctx, instructions);
            instructions.push(IRInstruction::Copy {
                src: v1,
                dst: dst.clone(),
            });
            instructions.push(IRInstruction::Jump(end_label.clone()));
            instructions.push(IRInstruction::Label(else_label));
            let v2 = emit_tacky_and_convert(else_expr, ctx, instructions);
            instructions.push(IRInstruction::Copy {
                src: v2,
                dst: dst.clone(),
            });
            instructions.push(IRInstruction::Label(end_label));

            ExpResult::PlainOperand(dst)
        }
        Expression::Comma(CommaExpression { lhs, rhs, .. }) => {
            emit_tacky_and_convert(lhs, ctx, instructions);
            ExpResult::PlainOperand(emit_tacky_and_convert(rhs, ctx, instructions))
        }
        Expression::Call(CallExpression {
            name, args, _type, ..
        }) => {
            let args = args
                .iter()
                .map(|arg| emit_tacky_and_convert(arg, ctx, instructions))
                .collect();
            let dst = ctx.make_tacky_variable(_type);
            instructions.push(IRInstruction::Call {
                target: name.clone(),
                args,
                dst: Some(dst.clone()),
            });
            ExpResult::PlainOperand(dst)
        }
        Expression::Cast(CastExpression {
            target_type, expr, ..
        }) => {
            let src = emit_tacky_and_convert(expr, ctx, instructions);
            ExpResult::PlainOperand(convert_value(
                src,
                get_type(expr),
                target_type,
                ctx,
                instructions,
            ))
        }
        Expression::Deref(DerefExpression { expr, .. }) => {
            ExpResult::DereferencedPointer(emit_tacky_and_convert(expr, ctx, instructions))
        }
        Expression::AddrOf(AddrOfExpression { expr, _type, .. }) => {
            match emit_tacky(expr, ctx, instructions) {
                ExpResult::PlainOperand(obj) => {
                    let dst = ctx.make_tacky_variable(_type);
                    instructions.push(IRInstruction::GetAddress {
                        src: obj,
                        dst: dst.clone(),
                    });
                    ExpResult::PlainOperand(dst)
                }
                ExpResult::DereferencedPointer(ptr) => ExpResult::PlainOperand(ptr),
            }
        }
        Expression::Sizeof(_) | Expression::SizeofT(_) => unreachable!(),
    }
}

fn read_lvalue(
    lval: &ExpResult,
    t: &Type,
    ctx: &mut IrContext,
    instructions: &mut Vec<IRInstruction>,
) -> IRValue {
    match lval {
        ExpResult::PlainOperand(obj) => obj.clone(),
        ExpResult::DereferencedPointer(ptr) => {
            let dst = ctx.make_tacky_variable(t);
            instructions.push(IRInstruction::Load {
                src_ptr: ptr.clone(),
                dst: dst.clone(),
            });
            dst
        }
    }
}

fn write_lvalue(lval: &ExpResult, value: IRValue, instructions: &mut Vec<IRInstruction>) -> ExpResult {
    match lval {
        ExpResult::PlainOperand(obj) => {
            instructions.push(IRInstruction::Copy {
                src: value,
                dst: obj.clone(),
            });
            ExpResult::PlainOperand(obj.clone())
        }
        ExpResult::DereferencedPointer(ptr) => {
            instructions.push(IRInstruction::Store {
                src: value.clone(),
                dst_ptr: ptr.clone(),
            });
            ExpResult::PlainOperand(value)
        }
    }
}

fn emit_ptr_addition(
    ptr: IRValue,
    index: IRValue,
    ptr_type: &Type,
    ctx: &mut IrContext,
    instructions: &mut Vec<IRInstruction>,
) -> IRValue {
    let scale = match ptr_type {
        Type::Pointer(referenced) => get_size_of_type(referenced),
        _ => unreachable!(),
    };
    let dst = ctx.make_tacky_variable(ptr_type);
    instructions.push(IRInstruction::AddPtr {
        ptr,
        index,
        scale,
        dst: dst.clone(),
    });
    dst
}

fn convert_value(
    src: IRValue,
    from: &Type,
    to: &Type,
    ctx: &mut IrContext,
    instructions: &mut Vec<IRInstruction>,
) -> IRValue {
    if from == to {
        return src;
    }

    let from_size = get_size_of_type(from);
    let to_size = get_size_of_type(to);
    let dst = ctx.make_tacky_variable(to);

    let instr = if from_size == to_size {
        IRInstruction::Copy {
            src,
            dst: dst.clone(),
        }
    } else if from_size < to_size {
        IRInstruction::SignExtend {
            src,
            dst: dst.clone(),
        }
    } else {
        IRInstruction::Truncate {
            src,
            dst: dst.clone(),
        }
    };
    instructions.push(instr);
    dst
}

fn emit_boolean(
    e: &Expression,
    ctx: &mut IrContext,
    instructions: &mut Vec<IRInstruction>,
) -> IRValue {
    let false_label = ctx.fresh_label("bool_false");
    let end_label = ctx.fresh_label("bool_end");
    let dst = ctx.make_tacky_variable(&Type::Int);

    emit_branch(e, false, &false_label, ctx, instructions);
    instructions.push(IRInstruction::Copy {
        src: IRValue::Constant(Const::Int(1)),
        dst: dst.clone(),
    });
    instructions.push(IRInstruction::Jump(end_label.clone()));
    instructions.push(IRInstruction::Label(false_label));
    instructions.push(IRInstruction::Copy {
        src: IRValue::Constant(Const::Int(0)),
        dst: dst.clone(),
    });
    instructions.push(IRInstruction::Label(end_label));

    dst
}

// Jumps when the truth value of `e` equals `jump_if`.
fn emit_branch(
    e: &Expression,
    jump_if: bool,
    target: &str,
    ctx: &mut IrContext,
    instructions: &mut Vec<IRInstruction>,
) {
    match e {
        Expression::Binary(BinaryExpression {
            kind: BinaryExpressionKind::And,
            lhs,
            rhs,
            ..
        }) => {
            if jump_if {
                let skip = ctx.fresh_label("and_skip");
                emit_branch(lhs, false, &skip, ctx, instructions);
                emit_branch(rhs, true, target, ctx, instructions);
                instructions.push(IRInstruction::Label(skip));
            } else {
                emit_branch(lhs, false, target, ctx, instructions);
                emit_branch(rhs, false, target, ctx, instructions);
            }
        }
        Expression::Binary(BinaryExpression {
            kind: BinaryExpressionKind::Or,
            lhs,
            rhs,
            ..
        }) => {
            if jump_if {
                emit_branch(lhs, true, target, ctx, instructions);
                emit_branch(rhs, true, target, ctx, instructions);
            } else {
                let skip = ctx.fresh_label("or_skip");
                emit_branch(lhs, true, &skip, ctx, instructions);
                emit_branch(rhs, false, target, ctx, instructions);
                instructions.push(IRInstruction::Label(skip));
            }
        }
        Expression::Binary(BinaryExpression { kind, lhs, rhs, .. })
            if BinaryOp::from(*kind).is_relational() =>
        {
            let op = BinaryOp::from(*kind);
            let lhs = emit_tacky_and_convert(lhs, ctx, instructions);
            let rhs = emit_tacky_and_convert(rhs, ctx, instructions);
            instructions.push(IRInstruction::CompareAndJump {
                op: if jump_if { op } else { op.negate() },
                lhs,
                rhs,
                target: target.to_owned(),
            });
        }
        Expression::Unary(UnaryExpression {
            kind: UnaryExpressionKind::Not,
            expr,
            ..
        }) => emit_branch(expr, !jump_if, target, ctx, instructions),
        Expression::Constant(ConstantExpression { value, .. }) => {
            if (*value != 0) == jump_if {
                instructions.push(IRInstruction::Jump(target.to_owned()));
            }
        }
        _ => {
            let condition = emit_tacky_and_convert(e, ctx, instructions);
            let target = target.to_owned();
            instructions.push(if jump_if {
                IRInstruction::JumpIfNotZero { condition, target }
            } else {
                IRInstruction::JumpIfZero { condition, target }
            });
        }
    }
}

pub trait Irfy {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>);
}

impl Irfy for Statement {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        match self {
            Statement::Return(ret) => ret.irfy(ctx, instructions),
            Statement::Expression(expr) => expr.irfy(ctx, instructions),
            Statement::If(if_stmt) => if_stmt.irfy(ctx, instructions),
            Statement::Compound(block) => block.irfy(ctx, instructions),
            Statement::While(while_stmt) => while_stmt.irfy(ctx, instructions),
            Statement::For(for_stmt) => for_stmt.irfy(ctx, instructions),
            Statement::Break(break_stmt) => break_stmt.irfy(ctx, instructions),
            Statement::Null => {}
        }
    }
}

impl Irfy for BlockStatement {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        for item in &self.stmts {
            item.irfy(ctx, instructions);
        }
    }
}

impl Irfy for BlockItem {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        match self {
            BlockItem::Statement(stmt) => stmt.irfy(ctx, instructions),
            BlockItem::Declaration(Declaration::Variable(var_decl)) => {
                var_decl.irfy(ctx, instructions)
            }
            BlockItem::Declaration(Declaration::Function(_)) => {}
        }
    }
}

impl Irfy for IfStatement {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        let else_label = ctx.fresh_label("if_else");
        let end_label = ctx.fresh_label("if_end");

        match &self.else_branch {
            Some(else_branch) => {
                emit_branch(&self.condition, false, &else_label, ctx, instructions);
                self.then_branch.irfy(ctx, instructions);
                instructions.push(IRInstruction::Jump(end_label.clone()));
                instructions.push(IRInstruction::Label(else_label));
                else_branch.irfy(ctx, instructions);
            }
            None => {
                emit_branch(&self.condition, false, &end_label, ctx, instructions);
                self.then_branch.irfy(ctx, instructions);
            }
        }
        instructions.push(IRInstruction::Label(end_label));
    }
}

impl Irfy for WhileStatement {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        let start_label = format!("{}.start", self.label);
        let end_label = format!("{}.end", self.label);

        instructions.push(IRInstruction::Label(start_label.clone()));
        emit_branch(&self.condition, false, &end_label, ctx, instructions);
        self.body.irfy(ctx, instructions);
        instructions.push(IRInstruction::Jump(start_label));
        instructions.push(IRInstruction::Label(end_label));
    }
}

impl Irfy for ForStatement {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        let start_label = format!("{}.start", self.label);
        let end_label = format!("{}.end", self.label);

        match &self.init {
            ForInit::Declaration(decls) => {
                for decl in decls {
                    decl.irfy(ctx, instructions);
                }
            }
            ForInit::Expression(Some(expr)) => {
                emit_tacky_and_convert(expr, ctx, instructions);
            }
            ForInit::Expression(None) => {}
        }

        instructions.push(IRInstruction::Label(start_label.clone()));
        if let Some(condition) = &self.condition {
            emit_branch(condition, false, &end_label, ctx, instructions);
        }
        self.body.irfy(ctx, instructions);
        if let Some(post) = &self.post {
            emit_tacky_and_convert(post, ctx, instructions);
        }
        instructions.push(IRInstruction::Jump(start_label));
        instructions.push(IRInstruction::Label(end_label));
    }
}

impl Irfy for BreakStatement {
    fn irfy(&self, _ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        instructions.push(IRInstruction::Jump(format!("{}.end", self.label)));
    }
}

impl Irfy for ReturnStatement {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        let value = match &self.expr {
            Some(expr) => emit_tacky_and_convert(expr, ctx, instructions),
            None => IRValue::Constant(Const::Int(0)),
        };
        instructions.push(IRInstruction::Ret(Some(value)));
    }
}

impl Irfy for ExpressionStatement {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        emit_tacky_and_convert(&self.expr, ctx, instructions);
    }
}

impl Irfy for VariableDeclaration {
    fn irfy(&self, ctx: &mut IrContext, instructions: &mut Vec<IRInstruction>) {
        match (&self._type, &self.init) {
            (_, None) => {}
            (Type::Array { .. }, Some(init)) => {
                let mut flat = vec![];
                flatten_initializer(init, &self._type, 0, true, &mut flat);
                for (offset, expr) in flat {
                    let src = emit_tacky_and_convert(&expr, ctx, instructions);
                    instructions.push(IRInstruction::CopyToOffset {
                        src,
                        dst: self.name.clone(),
                        offset,
                    });
                }
            }
            (_, Some(Initializer::Single(expr))) => {
                let src = emit_tacky_and_convert(expr, ctx, instructions);
                instructions.push(IRInstruction::Copy {
                    src,
                    dst: IRValue::Var(self.name.clone()),
                });
            }
            (_, Some(Initializer::Compound(..))) => unreachable!(),
        }
    }
}

fn irfy_function(func_decl: &FunctionDeclaration, ctx: &mut IrContext) -> Option<IRFunction> {
    let body = func_decl.body.as_ref()?;

    let mut instructions = vec![];
    body.irfy(ctx, &mut instructions);

    let ret_type = match &func_decl._type {
        Type::Func { ret, .. } => ret.as_ref(),
        _ => unreachable!(),
    };
    instructions.push(IRInstruction::Ret(Some(constant(0, ret_type))));

    Some(IRFunction {
        name: func_decl.name.clone(),
        params: func_decl.params.clone(),
        body: instructions,
        frame: ctx.layout.frame(&func_decl.name).cloned().unwrap_or_default(),
    })
}

pub fn emit_ir(program: &Program, ctx: &mut IrContext) -> IRProgram {
    let functions: Vec<IRFunction> = program
        .declarations
        .iter()
        .filter_map(|decl| match decl {
            Declaration::Function(func_decl) => irfy_function(func_decl, ctx),
            Declaration::Variable(_) => None,
        })
        .collect();

    debug!(
        "generated IR for {} functions, {} temporaries",
        functions.len(),
        ctx.temps
    );

    IRProgram {
        functions,
        static_vars: ctx.layout.globals.clone(),
        strings: ctx.layout.strings.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lexer::lex::tokenize,
        parser::recursive_descent::Parser,
        semantics::{
            loop_label::{LabelCounter, LoopLabel},
            resolver::{Resolve, ResolveContext},
            storage::allocate,
            typechecker::{Typecheck, TypeContext},
        },
    };

    fn ir(src: &str) -> IRProgram {
        let mut program = Parser::new(tokenize(src).unwrap()).parse().unwrap();
        program.resolve(&mut ResolveContext::new()).unwrap();
        program
            .loop_label("", &mut LabelCounter::default())
            .unwrap();
        let mut type_ctx = TypeContext::new();
        program.typecheck(&mut type_ctx).unwrap();
        let layout = allocate(&program).unwrap();
        let mut ctx = IrContext::new(type_ctx.symbols, layout);
        emit_ir(&program, &mut ctx)
    }

    fn calls_in(body: &[IRInstruction]) -> Vec<&str> {
        body.iter()
            .filter_map(|instr| match instr {
                IRInstruction::Call { target, .. } => Some(target.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn short_circuit_skips_right_operand() {
        let program = ir("int f(); int g(); int h() { return f() || g(); }");
        let body = &program.functions[0].body;

        let first_call = body
            .iter()
            .position(|i| matches!(i, IRInstruction::Call { target, .. } if target == "f"))
            .unwrap();
        assert!(matches!(
            body[first_call + 1],
            IRInstruction::JumpIfNotZero { .. }
        ));
        assert_eq!(calls_in(body), vec!["f", "g"]);
    }

    #[test]
    fn conditions_fuse_comparisons_into_jumps() {
        let program = ir("int f(int x) { if (x < -100 || x < 100 && x % 10 == 0) return 1; return 0; }");
        let body = &program.functions[0].body;
        let compares = body
            .iter()
            .filter(|i| matches!(i, IRInstruction::CompareAndJump { .. }))
            .count();
        assert_eq!(compares, 3);
        assert!(!body
            .iter()
            .any(|i| matches!(i, IRInstruction::Binary { op, .. } if op.is_relational())));
    }

    #[test]
    fn loops_jump_to_their_labels() {
        let program = ir("int f() { int i; for (i = 0; ; i = i + 1) { if (i == 3) break; } return i; }");
        let body = &program.functions[0].body;
        assert!(body.contains(&IRInstruction::Label("For.1.start".into())));
        assert!(body.contains(&IRInstruction::Jump("For.1.end".into())));
        assert!(body.contains(&IRInstruction::Label("For.1.end".into())));
    }

    #[test]
    fn subscripts_scale_by_element_size() {
        let program = ir("int f() { int a[3][12]; return a[1][2]; }");
        let scales: Vec<usize> = program.functions[0]
            .body
            .iter()
            .filter_map(|i| match i {
                IRInstruction::AddPtr { scale, .. } => Some(*scale),
                _ => None,
            })
            .collect();
        assert_eq!(scales, vec![48, 4]);
    }

    #[test]
    fn compound_assignment_reads_target_after_right_operand() {
        let program = ir("int f() { int s; s = 299; s *= s %= 39; return s; }");
        let body = &program.functions[0].body;
        let ops: Vec<BinaryOp> = body
            .iter()
            .filter_map(|i| match i {
                IRInstruction::Binary { op, .. } => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec![BinaryOp::Rem, BinaryOp::Mul]);

        let Some(IRInstruction::Binary { lhs, rhs, .. }) = body
            .iter()
            .find(|i| matches!(i, IRInstruction::Binary { op: BinaryOp::Mul, .. }))
        else {
            panic!("missing multiplication")
        };
        assert!(matches!(lhs, IRValue::Var(name) if name.starts_with("var.s.")));
        assert!(matches!(rhs, IRValue::Var(name) if name.starts_with("var.s.")));
    }

    #[test]
    fn local_array_initializers_zero_fill() {
        let program = ir("int f() { int a[2][2] = {{1}, {}}; return a[0][0]; }");
        let offsets: Vec<usize> = program.functions[0]
            .body
            .iter()
            .filter_map(|i| match i {
                IRInstruction::CopyToOffset { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 4, 8, 12]);
    }

    #[test]
    fn strings_are_interned_once() {
        let program = ir("int f() { printf(\"hi\"); printf(\"hi\"); return 0; }");
        assert_eq!(program.strings, vec![("str.0".to_owned(), "hi".to_owned())]);
    }

    #[test]
    fn functions_end_with_a_default_return() {
        let program = ir("int f() { }");
        assert_eq!(
            program.functions[0].body.last(),
            Some(&IRInstruction::Ret(Some(IRValue::Constant(Const::Int(0)))))
        );
    }
}
