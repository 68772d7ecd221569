use crate::{
    error::CompileError,
    parser::ast::{
        AddrOfExpression, BinaryExpression, BinaryExpressionKind, CastExpression,
        ConditionalExpression, ConstantExpression, DerefExpression, Expression, Type,
        UnaryExpression, UnaryExpressionKind,
    },
    semantics::typechecker::{get_size_of_type, get_type},
};
use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticValue {
    Int(i64),
    Address(String, i64),
    String(String, i64),
}

pub fn eval(e: &Expression) -> Result<StaticValue> {
    match e {
        Expression::Constant(ConstantExpression { value, _type, .. }) => {
            Ok(StaticValue::Int(wrap(*value as i64, _type)))
        }
        Expression::Cast(CastExpression {
            target_type, expr, ..
        }) => match eval(expr)? {
            StaticValue::Int(v) => Ok(StaticValue::Int(wrap(v, target_type))),
            address if matches!(target_type, Type::Pointer(_)) => Ok(address),
            _ => bail!(not_constant(e)),
        },
        Expression::Unary(UnaryExpression { kind, expr, .. }) => {
            let v = eval_int(expr)?;
            let result = match kind {
                UnaryExpressionKind::Negate => (v as i32).wrapping_neg() as i64,
                UnaryExpressionKind::Complement => !(v as i32) as i64,
                UnaryExpressionKind::Not => (v == 0) as i64,
                UnaryExpressionKind::Plus => v,
            };
            Ok(StaticValue::Int(result))
        }
        Expression::Binary(binary) => eval_binary(binary, e),
        Expression::Conditional(ConditionalExpression {
            condition,
            then_expr,
            else_expr,
            ..
        }) => {
            if eval_int(condition)? != 0 {
                eval(then_expr)
            } else {
                eval(else_expr)
            }
        }
        Expression::AddrOf(AddrOfExpression { expr, .. }) => match &**expr {
            Expression::Variable(var) => Ok(StaticValue::Address(var.value.clone(), 0)),
            Expression::String(string) => Ok(StaticValue::String(string.value.clone(), 0)),
            Expression::Deref(DerefExpression { expr, .. }) => eval(expr),
            _ => bail!(not_constant(e)),
        },
        _ => bail!(not_constant(e)),
    }
}

fn eval_int(e: &Expression) -> Result<i64> {
    match eval(e)? {
        StaticValue::Int(v) => Ok(v),
        _ => bail!(not_constant(e)),
    }
}

fn eval_binary(binary: &BinaryExpression, e: &Expression) -> Result<StaticValue> {
    let BinaryExpression { kind, lhs, rhs, .. } = binary;

    match kind {
        BinaryExpressionKind::And => {
            return Ok(StaticValue::Int(
                (eval_int(lhs)? != 0 && eval_int(rhs)? != 0) as i64,
            ))
        }
        BinaryExpressionKind::Or => {
            return Ok(StaticValue::Int(
                (eval_int(lhs)? != 0 || eval_int(rhs)? != 0) as i64,
            ))
        }
        _ => {}
    }

    match (eval(lhs)?, eval(rhs)?) {
        (StaticValue::Int(l), StaticValue::Int(r)) => {
            let (l, r) = (l as i32, r as i32);
            let result = match kind {
                BinaryExpressionKind::Add => l.wrapping_add(r),
                BinaryExpressionKind::Sub => l.wrapping_sub(r),
                BinaryExpressionKind::Mul => l.wrapping_mul(r),
                BinaryExpressionKind::Div | BinaryExpressionKind::Rem if r == 0 => bail!(
                    CompileError::type_error("division by zero in constant expression", e.pos())
                ),
                BinaryExpressionKind::Div => l.wrapping_div(r),
                BinaryExpressionKind::Rem => l.wrapping_rem(r),
                BinaryExpressionKind::BitAnd => l & r,
                BinaryExpressionKind::BitOr => l | r,
                BinaryExpressionKind::BitXor => l ^ r,
                BinaryExpressionKind::ShiftLeft => l.wrapping_shl(r as u32),
                BinaryExpressionKind::ShiftRight => l.wrapping_shr(r as u32),
                BinaryExpressionKind::Equal => (l == r) as i32,
                BinaryExpressionKind::NotEqual => (l != r) as i32,
                BinaryExpressionKind::Less => (l < r) as i32,
                BinaryExpressionKind::Greater => (l > r) as i32,
                BinaryExpressionKind::LessEqual => (l <= r) as i32,
                BinaryExpressionKind::GreaterEqual => (l >= r) as i32,
                BinaryExpressionKind::And | BinaryExpressionKind::Or => unreachable!(),
            };
            Ok(StaticValue::Int(result as i64))
        }
        (address, StaticValue::Int(index)) => {
            let scale = pointee_size(get_type(lhs));
            match kind {
                BinaryExpressionKind::Add => Ok(offset_by(address, index * scale)),
                BinaryExpressionKind::Sub => Ok(offset_by(address, -index * scale)),
                _ => bail!(not_constant(e)),
            }
        }
        (StaticValue::Int(index), address) if *kind == BinaryExpressionKind::Add => {
            let scale = pointee_size(get_type(rhs));
            Ok(offset_by(address, index * scale))
        }
        _ => bail!(not_constant(e)),
    }
}

fn offset_by(address: StaticValue, delta: i64) -> StaticValue {
    match address {
        StaticValue::Address(name, offset) => StaticValue::Address(name, offset + delta),
        StaticValue::String(value, offset) => StaticValue::String(value, offset + delta),
        StaticValue::Int(v) => StaticValue::Int(v + delta),
    }
}

fn pointee_size(t: &Type) -> i64 {
    match t {
        Type::Pointer(referenced) => get_size_of_type(referenced) as i64,
        _ => 1,
    }
}

fn wrap(v: i64, t: &Type) -> i64 {
    match t {
        Type::Char => v as i8 as i64,
        Type::Int => v as i32 as i64,
        _ => v,
    }
}

fn not_constant(e: &Expression) -> CompileError {
    CompileError::type_error("initializer element is not a compile-time constant", e.pos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lexer::lex::tokenize,
        parser::{
            ast::{Declaration, Initializer, Program},
            recursive_descent::Parser,
        },
        semantics::{
            resolver::{Resolve, ResolveContext},
            typechecker::{Typecheck, TypeContext},
        },
    };

    fn init_of(src: &str, index: usize) -> Expression {
        let mut program: Program = Parser::new(tokenize(src).unwrap()).parse().unwrap();
        program.resolve(&mut ResolveContext::new()).unwrap();
        program.typecheck(&mut TypeContext::new()).unwrap();
        match &program.declarations[index] {
            Declaration::Variable(var) => match &var.init {
                Some(Initializer::Single(e)) => e.clone(),
                other => panic!("unexpected initializer {:?}", other),
            },
            _ => panic!("expected a variable"),
        }
    }

    #[test]
    fn folds_integer_arithmetic() {
        assert_eq!(
            eval(&init_of("int x = 3 * (29 / (13 - 2) + 3) - 2;", 0)).unwrap(),
            StaticValue::Int(13)
        );
        assert_eq!(
            eval(&init_of("int x = (-855 << 2) + (-855 >> 3);", 0)).unwrap(),
            StaticValue::Int(-3527)
        );
        assert_eq!(
            eval(&init_of("int x = 1 ? sizeof(int[3]) : 0 / 0;", 0)).unwrap(),
            StaticValue::Int(12)
        );
        assert_eq!(
            eval(&init_of("char c = 300;", 0)).unwrap(),
            StaticValue::Int(44)
        );
    }

    #[test]
    fn folds_addresses_of_globals() {
        assert_eq!(
            eval(&init_of("int a[4]; int *p = &a[2];", 1)).unwrap(),
            StaticValue::Address("a".into(), 8)
        );
        assert_eq!(
            eval(&init_of("int a[4]; int *p = a + 1;", 1)).unwrap(),
            StaticValue::Address("a".into(), 4)
        );
        assert_eq!(
            eval(&init_of("char *s = \"hi\";", 0)).unwrap(),
            StaticValue::String("hi".into(), 0)
        );
    }

    #[test]
    fn rejects_runtime_values() {
        let err = eval(&init_of("int a; int b = a + 1;", 1)).unwrap_err();
        assert_eq!(err.downcast_ref::<CompileError>().unwrap().class(), "TypeError");

        let err = eval(&init_of("int b = 1 / 0;", 0)).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }
}
