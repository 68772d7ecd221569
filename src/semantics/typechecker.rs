use crate::{
    error::CompileError,
    parser::ast::{
        AddrOfExpression, AssignExpression, BinaryExpression, BinaryExpressionKind, BlockItem,
        CallExpression, CastExpression, CommaExpression, ConditionalExpression,
        ConstantExpression, Declaration, DerefExpression, Expression, ForInit,
        FunctionDeclaration, Initializer, PostfixExpression, Program, SizeofExpression,
        SizeofTExpression, Statement, StringExpression, Type, UnaryExpression,
        UnaryExpressionKind, VariableDeclaration, VariableExpression,
    },
};
use anyhow::{bail, Result};
use log::debug;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub _type: Type,
    pub attrs: IdentifierAttrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierAttrs {
    FuncAttr { defined: bool },
    StaticAttr,
    LocalAttr,
}

pub type SymbolTable = HashMap<String, Symbol>;

#[derive(Debug, Default)]
pub struct TypeContext {
    pub symbols: SymbolTable,
    initialized: HashSet<String>,
    return_type: Option<Type>,
}

impl TypeContext {
    pub fn new() -> TypeContext {
        TypeContext::default()
    }
}

pub trait Typecheck {
    fn typecheck(&mut self, ctx: &mut TypeContext) -> Result<&mut Self>
    where
        Self: Sized;
}

impl Typecheck for Program {
    fn typecheck(&mut self, ctx: &mut TypeContext) -> Result<&mut Self> {
        for decl in &mut self.declarations {
            decl.typecheck(ctx)?;
        }
        merge_file_scope(&mut self.declarations);
        debug!("typechecked {} symbols", ctx.symbols.len());
        Ok(self)
    }
}

/* A name declared more than once at file scope keeps one definition: the last
 * function body, and the initialized (or else the last) global. */
fn merge_file_scope(declarations: &mut Vec<Declaration>) {
    let mut keep: HashMap<String, usize> = HashMap::new();
    for (i, decl) in declarations.iter().enumerate() {
        if let Declaration::Variable(var) = decl {
            let replace = match keep.get(&var.name) {
                Some(&j) => !matches!(
                    &declarations[j],
                    Declaration::Variable(VariableDeclaration { init: Some(_), .. })
                ),
                None => true,
            };
            if replace {
                keep.insert(var.name.clone(), i);
            }
        }
    }

    let mut bodies = HashSet::new();
    for decl in declarations.iter_mut().rev() {
        if let Declaration::Function(func) = decl {
            if func.body.is_some() && !bodies.insert(func.name.clone()) {
                debug!("dropping an earlier definition of `{}`", func.name);
                func.body = None;
            }
        }
    }

    let mut index = 0;
    declarations.retain(|decl| {
        let i = index;
        index += 1;
        match decl {
            Declaration::Variable(var) => keep.get(&var.name) == Some(&i),
            Declaration::Function(_) => true,
        }
    });
}

impl Typecheck for Declaration {
    fn typecheck(&mut self, ctx: &mut TypeContext) -> Result<&mut Self> {
        match self {
            Declaration::Variable(var_decl) => {
                var_decl.typecheck(ctx)?;
            }
            Declaration::Function(func_decl) => {
                func_decl.typecheck(ctx)?;
            }
        }
        Ok(self)
    }
}

impl Typecheck for BlockItem {
    fn typecheck(&mut self, ctx: &mut TypeContext) -> Result<&mut Self> {
        match self {
            BlockItem::Declaration(decl) => {
                decl.typecheck(ctx)?;
            }
            BlockItem::Statement(stmt) => {
                stmt.typecheck(ctx)?;
            }
        }
        Ok(self)
    }
}

impl Typecheck for VariableDeclaration {
    fn typecheck(&mut self, ctx: &mut TypeContext) -> Result<&mut Self> {
        if let Some(prev) = ctx.symbols.get(&self.name) {
            match prev.attrs {
                IdentifierAttrs::FuncAttr { .. } => bail!(CompileError::type_error(
                    format!("`{}` redeclared as a different kind of symbol", self.name),
                    self.pos
                )),
                IdentifierAttrs::StaticAttr if prev._type != self._type => {
                    bail!(CompileError::type_error(
                        format!("conflicting types for `{}`", self.name),
                        self.pos
                    ))
                }
                _ => {}
            }
        }

        if self.is_global && self.init.is_some() && !ctx.initialized.insert(self.name.clone()) {
            bail!(CompileError::static_error(
                format!("redefinition of `{}`", self.name),
                self.pos
            ));
        }

        let attrs = if self.is_global {
            IdentifierAttrs::StaticAttr
        } else {
            IdentifierAttrs::LocalAttr
        };
        ctx.symbols.insert(
            self.name.clone(),
            Symbol {
                _type: self._type.clone(),
                attrs,
            },
        );

        if let Some(init) = &self.init {
            self.init = Some(typecheck_init(&self._type, init, ctx)?);
        }

        Ok(self)
    }
}

impl Typecheck for FunctionDeclaration {
    fn typecheck(&mut self, ctx: &mut TypeContext) -> Result<&mut Self> {
        let (param_types, ret) = match &self._type {
            Type::Func { params, ret } => (params.clone(), *ret.clone()),
            _ => unreachable!(),
        };

        if !is_scalar(&ret) {
            bail!(CompileError::type_error(
                format!("function `{}` must return a scalar type", self.name),
                self.pos
            ));
        }

        let has_body = self.body.is_some();
        let mut defined = has_body;

        if let Some(prev) = ctx.symbols.get(&self.name) {
            match prev.attrs {
                IdentifierAttrs::FuncAttr {
                    defined: prev_defined,
                } => {
                    if prev._type != self._type {
                        bail!(CompileError::type_error(
                            format!("conflicting types for `{}`", self.name),
                            self.pos
                        ));
                    }
                    defined |= prev_defined;
                }
                _ => bail!(CompileError::type_error(
                    format!("`{}` redeclared as a different kind of symbol", self.name),
                    self.pos
                )),
            }
        }

        ctx.symbols.insert(
            self.name.clone(),
            Symbol {
                _type: self._type.clone(),
                attrs: IdentifierAttrs::FuncAttr { defined },
            },
        );

        if let Some(body) = &mut self.body {
            for (param, t) in self.params.iter().zip(param_types) {
                ctx.symbols.insert(
                    param.clone(),
                    Symbol {
                        _type: t,
                        attrs: IdentifierAttrs::LocalAttr,
                    },
                );
            }

            ctx.return_type = Some(ret);
            for item in &mut body.stmts {
                item.typecheck(ctx)?;
            }
            ctx.return_type = None;
        }

        Ok(self)
    }
}

impl Typecheck for Statement {
    fn typecheck(&mut self, ctx: &mut TypeContext) -> Result<&mut Self> {
        match self {
            Statement::Return(ret) => {
                if let Some(expr) = &ret.expr {
                    let target = ctx.return_type.clone().unwrap_or(Type::Int);
                    let typed = typecheck_and_convert(expr, ctx)?;
                    ret.expr = Some(convert_by_assignment(&typed, &target)?);
                }
            }
            Statement::Expression(stmt) => {
                stmt.expr = typecheck_and_convert(&stmt.expr, ctx)?;
            }
            Statement::If(if_stmt) => {
                if_stmt.condition = typecheck_condition(&if_stmt.condition, ctx)?;
                if_stmt.then_branch.typecheck(ctx)?;
                if let Some(else_branch) = &mut if_stmt.else_branch {
                    else_branch.typecheck(ctx)?;
                }
            }
            Statement::Compound(block) => {
                for item in &mut block.stmts {
                    item.typecheck(ctx)?;
                }
            }
            Statement::While(while_stmt) => {
                while_stmt.condition = typecheck_condition(&while_stmt.condition, ctx)?;
                while_stmt.body.typecheck(ctx)?;
            }
            Statement::For(for_stmt) => {
                match &mut for_stmt.init {
                    ForInit::Declaration(decls) => {
                        for decl in decls {
                            decl.typecheck(ctx)?;
                        }
                    }
                    ForInit::Expression(Some(expr)) => {
                        *expr = typecheck_and_convert(expr, ctx)?;
                    }
                    ForInit::Expression(None) => {}
                }
                if let Some(condition) = &for_stmt.condition {
                    for_stmt.condition = Some(typecheck_condition(condition, ctx)?);
                }
                if let Some(post) = &for_stmt.post {
                    for_stmt.post = Some(typecheck_and_convert(post, ctx)?);
                }
                for_stmt.body.typecheck(ctx)?;
            }
            Statement::Break(_) | Statement::Null => {}
        }
        Ok(self)
    }
}

fn typecheck_condition(e: &Expression, ctx: &mut TypeContext) -> Result<Expression> {
    let typed = typecheck_and_convert(e, ctx)?;
    if !is_scalar(get_type(&typed)) {
        bail!(CompileError::type_error(
            format!("condition has non-scalar type `{}`", get_type(&typed)),
            e.pos()
        ));
    }
    Ok(typed)
}

fn typecheck_init(target_type: &Type, init: &Initializer, ctx: &mut TypeContext) -> Result<Initializer> {
    match (target_type, init) {
        (Type::Array { element, size }, Initializer::Single(Expression::String(s)))
            if **element == Type::Char =>
        {
            if s.value.len() > *size {
                bail!(CompileError::type_error(
                    format!("initializer string is too long for `{}`", target_type),
                    s.pos
                ));
            }
            Ok(Initializer::Single(typecheck_expr(&Expression::String(s.clone()), ctx)?))
        }
        (Type::Array { .. }, Initializer::Single(expr)) => bail!(CompileError::type_error(
            format!("array of type `{}` must be initialized with a brace list", target_type),
            expr.pos()
        )),
        (Type::Array { element, size }, Initializer::Compound(pos, inits)) => {
            if inits.len() > *size {
                bail!(CompileError::type_error(
                    format!(
                        "too many elements in initializer for `{}`: {} given",
                        target_type,
                        inits.len()
                    ),
                    *pos
                ));
            }
            let typed_inits = inits
                .iter()
                .map(|init| typecheck_init(element, init, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Initializer::Compound(*pos, typed_inits))
        }
        (_, Initializer::Single(expr)) => {
            let typed = typecheck_and_convert(expr, ctx)?;
            Ok(Initializer::Single(convert_by_assignment(&typed, target_type)?))
        }
        (_, Initializer::Compound(_, inits)) if inits.len() == 1 => {
            typecheck_init(target_type, &inits[0], ctx)
        }
        (_, Initializer::Compound(pos, _)) => bail!(CompileError::type_error(
            format!("invalid brace initializer for scalar of type `{}`", target_type),
            *pos
        )),
    }
}

fn typecheck_expr(expr: &Expression, ctx: &mut TypeContext) -> Result<Expression> {
    match expr {
        Expression::Constant(ConstantExpression { value, pos, .. }) => {
            Ok(Expression::Constant(ConstantExpression {
                value: *value,
                _type: Type::Int,
                pos: *pos,
            }))
        }
        Expression::String(StringExpression { value, pos, .. }) => {
            Ok(Expression::String(StringExpression {
                value: value.clone(),
                _type: Type::Array {
                    element: Type::Char.into(),
                    size: value.len() + 1,
                },
                pos: *pos,
            }))
        }
        Expression::Variable(VariableExpression { value, pos, .. }) => {
            let symbol = ctx.symbols.get(value).ok_or_else(|| {
                CompileError::static_error(format!("use of undeclared identifier `{}`", value), *pos)
            })?;
            if let Type::Func { .. } = symbol._type {
                bail!(CompileError::type_error(
                    format!("function `{}` used as a variable", value),
                    *pos
                ));
            }
            Ok(Expression::Variable(VariableExpression {
                value: value.clone(),
                _type: symbol._type.clone(),
                pos: *pos,
            }))
        }
        Expression::Unary(UnaryExpression {
            kind, expr, pos, ..
        }) => {
            let typed = typecheck_and_convert(expr, ctx)?;
            let t = get_type(&typed).clone();
            match kind {
                UnaryExpressionKind::Not => {
                    if !is_scalar(&t) {
                        bail!(CompileError::type_error(
                            format!("invalid operand of type `{}` to `!`", t),
                            *pos
                        ));
                    }
                    Ok(Expression::Unary(UnaryExpression {
                        kind: *kind,
                        expr: typed.into(),
                        _type: Type::Int,
                        pos: *pos,
                    }))
                }
                _ => {
                    if !is_integer_type(&t) {
                        bail!(CompileError::type_error(
                            format!("invalid operand of type `{}` to unary operator", t),
                            *pos
                        ));
                    }
                    Ok(Expression::Unary(UnaryExpression {
                        kind: *kind,
                        expr: convert_to(&typed, &Type::Int).into(),
                        _type: Type::Int,
                        pos: *pos,
                    }))
                }
            }
        }
        Expression::Binary(BinaryExpression {
            kind,
            lhs,
            rhs,
            pos,
            ..
        }) => {
            let lhs = typecheck_and_convert(lhs, ctx)?;
            let rhs = typecheck_and_convert(rhs, ctx)?;
            typecheck_binary(*kind, lhs, rhs, *pos)
        }
        Expression::Assign(AssignExpression {
            op,
            lhs,
            rhs,
            pos,
            ..
        }) => {
            let typed_lhs = typecheck_lvalue(lhs, ctx)?;
            let lhs_type = get_type(&typed_lhs).clone();
            let typed_rhs = typecheck_and_convert(rhs, ctx)?;

            let converted_rhs = match op {
                None => convert_by_assignment(&typed_rhs, &lhs_type)?,
                Some(BinaryExpressionKind::Add | BinaryExpressionKind::Sub)
                    if is_pointer_type(&lhs_type) =>
                {
                    if !is_integer_type(get_type(&typed_rhs)) {
                        bail!(CompileError::type_error(
                            format!(
                                "invalid operands to compound assignment (`{}` and `{}`)",
                                lhs_type,
                                get_type(&typed_rhs)
                            ),
                            *pos
                        ));
                    }
                    convert_to(&typed_rhs, &Type::Int)
                }
                Some(_) => {
                    if !is_integer_type(&lhs_type) || !is_integer_type(get_type(&typed_rhs)) {
                        bail!(CompileError::type_error(
                            format!(
                                "invalid operands to compound assignment (`{}` and `{}`)",
                                lhs_type,
                                get_type(&typed_rhs)
                            ),
                            *pos
                        ));
                    }
                    convert_to(&typed_rhs, &Type::Int)
                }
            };

            Ok(Expression::Assign(AssignExpression {
                op: *op,
                lhs: typed_lhs.into(),
                rhs: converted_rhs.into(),
                _type: lhs_type,
                pos: *pos,
            }))
        }
        Expression::Postfix(PostfixExpression {
            kind, expr, pos, ..
        }) => {
            let typed = typecheck_lvalue(expr, ctx)?;
            let t = get_type(&typed).clone();
            if !is_scalar(&t) {
                bail!(CompileError::type_error(
                    format!("cannot increment or decrement a value of type `{}`", t),
                    *pos
                ));
            }
            Ok(Expression::Postfix(PostfixExpression {
                kind: *kind,
                expr: typed.into(),
                _type: t,
                pos: *pos,
            }))
        }
        Expression::Conditional(ConditionalExpression {
            condition,
            then_expr,
            else_expr,
            pos,
            ..
        }) => {
            let condition = typecheck_condition(condition, ctx)?;
            let then_expr = typecheck_and_convert(then_expr, ctx)?;
            let else_expr = typecheck_and_convert(else_expr, ctx)?;
            let t1 = get_type(&then_expr).clone();
            let t2 = get_type(&else_expr).clone();

            let common_type = if is_integer_type(&t1) && is_integer_type(&t2) {
                Type::Int
            } else if is_pointer_type(&t1) || is_pointer_type(&t2) {
                get_common_ptr_type(&then_expr, &else_expr, *pos)?
            } else {
                bail!(CompileError::type_error(
                    format!("incompatible operand types `{}` and `{}` in conditional", t1, t2),
                    *pos
                ));
            };

            Ok(Expression::Conditional(ConditionalExpression {
                condition: condition.into(),
                then_expr: convert_to(&then_expr, &common_type).into(),
                else_expr: convert_to(&else_expr, &common_type).into(),
                _type: common_type,
                pos: *pos,
            }))
        }
        Expression::Comma(CommaExpression { lhs, rhs, pos, .. }) => {
            let lhs = typecheck_and_convert(lhs, ctx)?;
            let rhs = typecheck_and_convert(rhs, ctx)?;
            let t = get_type(&rhs).clone();
            Ok(Expression::Comma(CommaExpression {
                lhs: lhs.into(),
                rhs: rhs.into(),
                _type: t,
                pos: *pos,
            }))
        }
        Expression::Call(CallExpression {
            name, args, pos, ..
        }) => typecheck_call(name, args, *pos, ctx),
        Expression::Cast(CastExpression {
            target_type,
            expr,
            pos,
            ..
        }) => {
            if !is_scalar(target_type) {
                bail!(CompileError::type_error(
                    format!("cannot cast to non-scalar type `{}`", target_type),
                    *pos
                ));
            }
            let typed = typecheck_and_convert(expr, ctx)?;
            if !is_scalar(get_type(&typed)) {
                bail!(CompileError::type_error(
                    format!("cannot cast a value of type `{}`", get_type(&typed)),
                    *pos
                ));
            }
            Ok(Expression::Cast(CastExpression {
                target_type: target_type.clone(),
                expr: typed.into(),
                _type: target_type.clone(),
                pos: *pos,
            }))
        }
        Expression::Deref(DerefExpression { expr, pos, .. }) => {
            let typed = typecheck_and_convert(expr, ctx)?;
            match get_type(&typed).clone() {
                Type::Pointer(referenced) => Ok(Expression::Deref(DerefExpression {
                    expr: typed.into(),
                    _type: *referenced,
                    pos: *pos,
                })),
                t => bail!(CompileError::type_error(
                    format!("cannot dereference a value of type `{}`", t),
                    *pos
                )),
            }
        }
        Expression::AddrOf(AddrOfExpression { expr, pos, .. }) => {
            if !is_lvalue(expr) && !matches!(**expr, Expression::String(_)) {
                bail!(CompileError::type_error(
                    "cannot take the address of an rvalue",
                    *pos
                ));
            }
            let typed = typecheck_expr(expr, ctx)?;
            let t = get_type(&typed).clone();
            Ok(Expression::AddrOf(AddrOfExpression {
                expr: typed.into(),
                _type: Type::Pointer(t.into()),
                pos: *pos,
            }))
        }
        Expression::Sizeof(SizeofExpression { expr, pos, .. }) => {
            let typed = typecheck_expr(expr, ctx)?;
            sizeof_constant(get_type(&typed), *pos)
        }
        Expression::SizeofT(SizeofTExpression { t, pos, .. }) => sizeof_constant(t, *pos),
    }
}

fn sizeof_constant(t: &Type, pos: usize) -> Result<Expression> {
    if let Type::Func { .. } | Type::Dummy = t {
        bail!(CompileError::type_error(
            format!("invalid application of `sizeof` to `{}`", t),
            pos
        ));
    }
    let size = i32::try_from(get_size_of_type(t)).map_err(|_| {
        CompileError::type_error(format!("size of `{}` does not fit in int", t), pos)
    })?;
    Ok(Expression::Constant(ConstantExpression {
        value: size,
        _type: Type::Int,
        pos,
    }))
}

// Undoes the resolver's `var.{name}.{n}` renaming for diagnostics.
fn source_name(name: &str) -> &str {
    name.strip_prefix("var.")
        .and_then(|rest| rest.rsplit_once('.'))
        .map_or(name, |(base, _)| base)
}

fn typecheck_call(
    name: &str,
    args: &[Expression],
    pos: usize,
    ctx: &mut TypeContext,
) -> Result<Expression> {
    let callee = ctx.symbols.get(name).cloned();

    match callee {
        Some(Symbol {
            _type: Type::Func { params, ret },
            ..
        }) => {
            if args.len() != params.len() {
                bail!(CompileError::type_error(
                    format!(
                        "function `{}` expects {} argument(s), {} given",
                        name,
                        params.len(),
                        args.len()
                    ),
                    pos
                ));
            }

            let mut converted_args = vec![];
            for (arg, param_type) in args.iter().zip(params.iter()) {
                let typed_arg = typecheck_and_convert(arg, ctx)?;
                converted_args.push(convert_by_assignment(&typed_arg, param_type)?);
            }

            Ok(Expression::Call(CallExpression {
                name: name.to_owned(),
                args: converted_args,
                _type: *ret,
                pos,
            }))
        }
        Some(_) => bail!(CompileError::type_error(
            format!("called object `{}` is not a function", source_name(name)),
            pos
        )),
        None => {
            // External runtime function returning int; char arguments are promoted.
            let mut converted_args = vec![];
            for arg in args {
                let typed_arg = typecheck_and_convert(arg, ctx)?;
                converted_args.push(promote(&typed_arg));
            }
            Ok(Expression::Call(CallExpression {
                name: name.to_owned(),
                args: converted_args,
                _type: Type::Int,
                pos,
            }))
        }
    }
}

fn typecheck_binary(
    kind: BinaryExpressionKind,
    lhs: Expression,
    rhs: Expression,
    pos: usize,
) -> Result<Expression> {
    let lhs_type = get_type(&lhs).clone();
    let rhs_type = get_type(&rhs).clone();

    let mismatch = || -> anyhow::Error {
        CompileError::type_error(
            format!(
                "invalid operands to binary operator (`{}` and `{}`)",
                lhs_type, rhs_type
            ),
            pos
        )
        .into()
    };

    let binary = |lhs: Expression, rhs: Expression, _type: Type| -> Result<Expression> {
        Ok(Expression::Binary(BinaryExpression {
            kind,
            lhs: lhs.into(),
            rhs: rhs.into(),
            _type,
            pos,
        }))
    };

    let both_integers = is_integer_type(&lhs_type) && is_integer_type(&rhs_type);

    match kind {
        BinaryExpressionKind::And | BinaryExpressionKind::Or => {
            if !is_scalar(&lhs_type) || !is_scalar(&rhs_type) {
                return Err(mismatch());
            }
            binary(lhs, rhs, Type::Int)
        }
        BinaryExpressionKind::Add => {
            if both_integers {
                binary(promote(&lhs), promote(&rhs), Type::Int)
            } else if is_pointer_type(&lhs_type) && is_integer_type(&rhs_type) {
                binary(lhs, promote(&rhs), lhs_type.clone())
            } else if is_integer_type(&lhs_type) && is_pointer_type(&rhs_type) {
                binary(promote(&lhs), rhs, rhs_type.clone())
            } else {
                Err(mismatch())
            }
        }
        BinaryExpressionKind::Sub => {
            if both_integers {
                binary(promote(&lhs), promote(&rhs), Type::Int)
            } else if is_pointer_type(&lhs_type) && is_integer_type(&rhs_type) {
                binary(lhs, promote(&rhs), lhs_type.clone())
            } else if is_pointer_type(&lhs_type) && lhs_type == rhs_type {
                binary(lhs, rhs, Type::Int)
            } else {
                Err(mismatch())
            }
        }
        BinaryExpressionKind::Mul
        | BinaryExpressionKind::Div
        | BinaryExpressionKind::Rem
        | BinaryExpressionKind::BitAnd
        | BinaryExpressionKind::BitOr
        | BinaryExpressionKind::BitXor
        | BinaryExpressionKind::ShiftLeft
        | BinaryExpressionKind::ShiftRight => {
            if !both_integers {
                return Err(mismatch());
            }
            binary(promote(&lhs), promote(&rhs), Type::Int)
        }
        BinaryExpressionKind::Equal | BinaryExpressionKind::NotEqual => {
            if both_integers {
                binary(promote(&lhs), promote(&rhs), Type::Int)
            } else if is_pointer_type(&lhs_type) || is_pointer_type(&rhs_type) {
                let common = get_common_ptr_type(&lhs, &rhs, pos)?;
                binary(convert_to(&lhs, &common), convert_to(&rhs, &common), Type::Int)
            } else {
                Err(mismatch())
            }
        }
        BinaryExpressionKind::Less
        | BinaryExpressionKind::Greater
        | BinaryExpressionKind::LessEqual
        | BinaryExpressionKind::GreaterEqual => {
            if both_integers {
                binary(promote(&lhs), promote(&rhs), Type::Int)
            } else if is_pointer_type(&lhs_type) && lhs_type == rhs_type {
                binary(lhs, rhs, Type::Int)
            } else {
                Err(mismatch())
            }
        }
    }
}

fn typecheck_lvalue(e: &Expression, ctx: &mut TypeContext) -> Result<Expression> {
    if !is_lvalue(e) {
        bail!(CompileError::type_error(
            "expression is not assignable",
            e.pos()
        ));
    }
    let typed = typecheck_expr(e, ctx)?;
    if let Type::Array { .. } = get_type(&typed) {
        bail!(CompileError::type_error(
            format!("array of type `{}` is not assignable", get_type(&typed)),
            e.pos()
        ));
    }
    Ok(typed)
}

fn is_lvalue(e: &Expression) -> bool {
    matches!(e, Expression::Variable(_) | Expression::Deref(_))
}

fn typecheck_and_convert(e: &Expression, ctx: &mut TypeContext) -> Result<Expression> {
    let typed_expr = typecheck_expr(e, ctx)?;
    let type_of_expr = get_type(&typed_expr).clone();
    match type_of_expr {
        Type::Array { element, .. } => Ok(Expression::AddrOf(AddrOfExpression {
            pos: typed_expr.pos(),
            expr: typed_expr.into(),
            _type: Type::Pointer(element),
        })),
        _ => Ok(typed_expr),
    }
}

fn convert_by_assignment(e: &Expression, target_type: &Type) -> Result<Expression> {
    let t = get_type(e);
    if t == target_type {
        Ok(e.clone())
    } else if (is_integer_type(t) && is_integer_type(target_type))
        || (is_null_ptr_constant(e) && is_pointer_type(target_type))
    {
        Ok(convert_to(e, target_type))
    } else {
        bail!(CompileError::type_error(
            format!("cannot convert `{}` to `{}`", t, target_type),
            e.pos()
        ))
    }
}

fn get_common_ptr_type(e1: &Expression, e2: &Expression, pos: usize) -> Result<Type> {
    let e1_t = get_type(e1);
    let e2_t = get_type(e2);

    if e1_t == e2_t {
        Ok(e1_t.clone())
    } else if is_null_ptr_constant(e1) && is_pointer_type(e2_t) {
        Ok(e2_t.clone())
    } else if is_null_ptr_constant(e2) && is_pointer_type(e1_t) {
        Ok(e1_t.clone())
    } else {
        bail!(CompileError::type_error(
            format!("incompatible pointer types `{}` and `{}`", e1_t, e2_t),
            pos
        ))
    }
}

fn is_null_ptr_constant(e: &Expression) -> bool {
    matches!(e, Expression::Constant(ConstantExpression { value: 0, .. }))
}

fn promote(e: &Expression) -> Expression {
    if is_char_type(get_type(e)) {
        convert_to(e, &Type::Int)
    } else {
        e.clone()
    }
}

fn convert_to(e: &Expression, _type: &Type) -> Expression {
    if get_type(e) == _type {
        return e.clone();
    }
    Expression::Cast(CastExpression {
        target_type: _type.clone(),
        expr: Box::new(e.clone()),
        _type: _type.clone(),
        pos: e.pos(),
    })
}

pub fn is_integer_type(t: &Type) -> bool {
    matches!(t, Type::Int | Type::Char)
}

pub fn is_char_type(t: &Type) -> bool {
    matches!(t, Type::Char)
}

pub fn is_pointer_type(t: &Type) -> bool {
    matches!(t, Type::Pointer(_))
}

pub fn is_scalar(t: &Type) -> bool {
    is_integer_type(t) || is_pointer_type(t)
}

pub fn get_size_of_type(t: &Type) -> usize {
    match t {
        Type::Int => 4,
        Type::Char => 1,
        Type::Pointer(_) => 8,
        Type::Array { element, size } => get_size_of_type(element) * size,
        Type::Func { .. } | Type::Dummy => unreachable!(),
    }
}

pub fn get_alignment(t: &Type) -> usize {
    match t {
        Type::Array { element, .. } => get_alignment(element),
        _ => get_size_of_type(t),
    }
}

pub fn get_type(e: &Expression) -> &Type {
    match e {
        Expression::Constant(constant) => &constant._type,
        Expression::String(string) => &string._type,
        Expression::Variable(variable) => &variable._type,
        Expression::Unary(unary) => &unary._type,
        Expression::Binary(binary) => &binary._type,
        Expression::Assign(assign) => &assign._type,
        Expression::Postfix(postfix) => &postfix._type,
        Expression::Conditional(conditional) => &conditional._type,
        Expression::Comma(comma) => &comma._type,
        Expression::Call(call) => &call._type,
        Expression::Cast(cast) => &cast._type,
        Expression::Deref(deref) => &deref._type,
        Expression::AddrOf(addr_of) => &addr_of._type,
        Expression::Sizeof(sizeof) => &sizeof._type,
        Expression::SizeofT(sizeof) => &sizeof._type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lexer::lex::tokenize,
        parser::recursive_descent::Parser,
        semantics::resolver::{Resolve, ResolveContext},
    };

    fn typecheck(src: &str) -> Result<(Program, TypeContext)> {
        let mut program = Parser::new(tokenize(src)?).parse()?;
        program.resolve(&mut ResolveContext::new())?;
        let mut ctx = TypeContext::new();
        program.typecheck(&mut ctx)?;
        Ok((program, ctx))
    }

    fn error_class(src: &str) -> &'static str {
        let err = typecheck(src).unwrap_err();
        err.downcast_ref::<CompileError>()
            .map(|e| e.class())
            .unwrap_or("other")
    }

    fn returned(program: &Program, function: usize) -> Expression {
        let Declaration::Function(FunctionDeclaration {
            body: Some(body), ..
        }) = &program.declarations[function]
        else {
            panic!("expected a function definition")
        };
        body.stmts
            .iter()
            .find_map(|item| match item {
                BlockItem::Statement(Statement::Return(ret)) => ret.expr.clone(),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn sizeof_folds_to_constants() {
        let cases = [
            ("int f() { return sizeof(sizeof(1)); }", 4),
            ("int f() { int *y; return sizeof(y); }", 8),
            ("int f() { int *y; return sizeof *y; }", 4),
            ("int f() { int a[3][12]; return sizeof a; }", 144),
            ("int f() { char c[3]; return sizeof(c[0]); }", 1),
            ("int f() { return sizeof(int[2][5]); }", 40),
            ("int f() { return sizeof \"abc\"; }", 4),
        ];
        for (src, expected) in cases {
            let (program, _) = typecheck(src).unwrap();
            match returned(&program, 0) {
                Expression::Constant(ConstantExpression { value, _type, .. }) => {
                    assert_eq!(value, expected, "{}", src);
                    assert_eq!(_type, Type::Int);
                }
                other => panic!("{} did not fold: {:?}", src, other),
            }
        }
    }

    #[test]
    fn arrays_decay_in_value_context() {
        let (program, _) = typecheck("int f() { int a[4]; return *(a + 1); }").unwrap();
        let Expression::Deref(deref) = returned(&program, 0) else {
            panic!("expected a dereference")
        };
        let Expression::Binary(add) = *deref.expr else {
            panic!("expected an addition")
        };
        assert_eq!(add._type, Type::Pointer(Type::Int.into()));
        assert!(matches!(*add.lhs, Expression::AddrOf(_)));
    }

    #[test]
    fn subscript_works_both_ways() {
        let (program, _) = typecheck("int f() { int a[4]; return 3[a] + a[3]; }").unwrap();
        assert_eq!(get_type(&returned(&program, 0)), &Type::Int);
    }

    #[test]
    fn chars_promote_to_int() {
        let (program, _) = typecheck("int f() { char x[3]; int y; return x[0] + y; }").unwrap();
        let Expression::Binary(add) = returned(&program, 0) else {
            panic!("expected an addition")
        };
        assert!(matches!(
            *add.lhs,
            Expression::Cast(CastExpression {
                target_type: Type::Int,
                ..
            })
        ));
    }

    #[test]
    fn pointer_difference_is_an_element_count() {
        let (program, _) = typecheck("int f() { int a[4]; return &a[3] - &a[0]; }").unwrap();
        assert_eq!(get_type(&returned(&program, 0)), &Type::Int);
    }

    #[test]
    fn operand_mismatches_are_type_errors() {
        assert_eq!(error_class("int f() { int *p; int *q; return p + q; }"), "TypeError");
        assert_eq!(error_class("int f() { int *p; return p * 2; }"), "TypeError");
        assert_eq!(error_class("int f() { int *p; char *q; return p == q; }"), "TypeError");
        assert_eq!(error_class("int f() { int *p; return p < 1; }"), "TypeError");
        assert_eq!(error_class("int f() { int x; return *x; }"), "TypeError");
        assert_eq!(error_class("int f() { int *p; p = 5; return 0; }"), "TypeError");
    }

    #[test]
    fn assignment_targets_must_be_lvalues() {
        assert_eq!(error_class("int f() { int a; a + 1 = 3; return a; }"), "TypeError");
        assert_eq!(error_class("int f() { int a[2]; int b[2]; a = b; return 0; }"), "TypeError");
        assert_eq!(error_class("int f() { return &3; }"), "TypeError");
        assert!(typecheck("int f() { int *p; p = 0; *p = 1; return 0; }").is_ok());
    }

    #[test]
    fn calls_are_checked_against_the_prototype() {
        assert_eq!(error_class("int g(int a); int f() { return g(1, 2); }"), "TypeError");
        assert_eq!(error_class("int f() { int x; return x(1); }"), "TypeError");
        assert_eq!(error_class("int g(int a); int g(char a);"), "TypeError");
        assert_eq!(
            error_class("int g(int a) { return a; } char g(int a) { return a; }"),
            "TypeError"
        );
        assert!(typecheck("int f() { return printf(\"%d\\n\", 3); }").is_ok());
    }

    #[test]
    fn call_diagnostics_use_the_source_name() {
        let err = typecheck("int f() { int count; return count(1); }").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>().map(|e| e.to_string()),
            Some("TypeError: called object `count` is not a function".to_owned())
        );
        assert_eq!(source_name("var.a.b.12"), "a.b");
        assert_eq!(source_name("g"), "g");
    }

    #[test]
    fn initializers_are_checked_against_the_array_shape() {
        assert!(typecheck("int a[3][3] = {{1, 2, 3}, {}, {17, 8}};").is_ok());
        assert!(typecheck("char s[4] = \"abc\";").is_ok());
        assert_eq!(error_class("int a[2] = {1, 2, 3};"), "TypeError");
        assert_eq!(error_class("int a[2][2] = {{1, 2, 3}};"), "TypeError");
        assert_eq!(error_class("char s[2] = \"abc\";"), "TypeError");
        assert_eq!(error_class("int a[2] = 5;"), "TypeError");
    }

    #[test]
    fn symbols_are_recorded() {
        let (_, ctx) = typecheck("int n; int f(int a) { int b; return a + b; }").unwrap();
        assert_eq!(ctx.symbols["n"].attrs, IdentifierAttrs::StaticAttr);
        assert_eq!(
            ctx.symbols["f"].attrs,
            IdentifierAttrs::FuncAttr { defined: true }
        );
        assert_eq!(
            ctx.symbols
                .values()
                .filter(|s| s.attrs == IdentifierAttrs::LocalAttr)
                .count(),
            2
        );
    }

    #[test]
    fn repeated_definitions_keep_the_last_body() {
        let (program, ctx) = typecheck(
            "int g(int a) { return a; } int f() { return g(1); } int g(int a) { return a + 1; }",
        )
        .unwrap();
        let bodies: Vec<usize> = program
            .declarations
            .iter()
            .enumerate()
            .filter(|(_, d)| matches!(d, Declaration::Function(f) if f.body.is_some() && f.name == "g"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(bodies, vec![2]);
        assert!(matches!(returned(&program, 2), Expression::Binary(_)));
        assert_eq!(
            ctx.symbols["g"].attrs,
            IdentifierAttrs::FuncAttr { defined: true }
        );
    }

    #[test]
    fn globals_may_be_declared_repeatedly() {
        let (program, _) = typecheck("int g; int g = 3; int g; int f() { return g; }").unwrap();
        let globals: Vec<&VariableDeclaration> = program
            .declarations
            .iter()
            .filter_map(|d| match d {
                Declaration::Variable(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(globals.len(), 1);
        assert!(globals[0].init.is_some());

        assert!(typecheck("int g; int g;").is_ok());
        assert_eq!(error_class("int g; char g;"), "TypeError");
        assert_eq!(error_class("int g = 1; int g = 2;"), "StaticError");
    }
}
