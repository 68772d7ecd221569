use anyhow::{bail, Result};
use log::debug;
use std::collections::BTreeMap;

use crate::{
    error::CompileError,
    parser::ast::{
        AddrOfExpression, AssignExpression, BinaryExpression, BlockItem, BlockStatement,
        CallExpression, CastExpression, CommaExpression, ConditionalExpression, Declaration,
        DerefExpression, Expression, ExpressionStatement, ForInit, ForStatement,
        FunctionDeclaration, IfStatement, Initializer, PostfixExpression, Program,
        ReturnStatement, SizeofExpression, Statement, UnaryExpression, VariableDeclaration,
        VariableExpression, WhileStatement,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    has_linkage: bool,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    names: BTreeMap<String, Variable>,
}

#[derive(Debug)]
pub struct ResolveContext {
    scopes: Vec<Scope>,
    current: usize,
    counter: usize,
}

impl Default for ResolveContext {
    fn default() -> Self {
        ResolveContext {
            scopes: vec![Scope::default()],
            current: 0,
            counter: 0,
        }
    }
}

impl ResolveContext {
    pub fn new() -> ResolveContext {
        ResolveContext::default()
    }

    fn enter_scope(&mut self) {
        self.scopes.push(Scope {
            parent: Some(self.current),
            names: BTreeMap::new(),
        });
        self.current = self.scopes.len() - 1;
    }

    fn exit_scope(&mut self) {
        self.current = self.scopes[self.current].parent.unwrap_or(0);
    }

    fn lookup(&self, name: &str) -> Option<&Variable> {
        let mut scope = Some(self.current);
        while let Some(index) = scope {
            if let Some(variable) = self.scopes[index].names.get(name) {
                return Some(variable);
            }
            scope = self.scopes[index].parent;
        }
        None
    }

    fn in_current_scope(&self, name: &str) -> Option<&Variable> {
        self.scopes[self.current].names.get(name)
    }

    fn unique_name(&mut self, name: &str) -> String {
        self.counter += 1;
        format!("var.{}.{}", name, self.counter)
    }

    fn declare_local(&mut self, name: &str, pos: usize) -> Result<String> {
        if self.in_current_scope(name).is_some() {
            bail!(CompileError::static_error(
                format!("redeclaration of `{}` in the same scope", name),
                pos
            ));
        }
        let unique_name = self.unique_name(name);
        self.scopes[self.current].names.insert(
            name.to_owned(),
            Variable {
                name: unique_name.clone(),
                has_linkage: false,
            },
        );
        Ok(unique_name)
    }

    /* Names with linkage may be declared repeatedly; the typechecker checks
     * that the declarations agree. */
    fn declare_linked(&mut self, name: &str, pos: usize) -> Result<()> {
        if let Some(prev) = self.in_current_scope(name) {
            if !prev.has_linkage {
                bail!(CompileError::static_error(
                    format!("redeclaration of `{}` in the same scope", name),
                    pos
                ));
            }
        }
        self.scopes[self.current].names.insert(
            name.to_owned(),
            Variable {
                name: name.to_owned(),
                has_linkage: true,
            },
        );
        Ok(())
    }
}

pub trait Resolve {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self>
    where
        Self: Sized;
}

impl Resolve for Program {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        for decl in &mut self.declarations {
            decl.resolve(ctx)?;
        }
        debug!("resolved {} names", ctx.counter);
        Ok(self)
    }
}

impl Resolve for Declaration {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        match self {
            Declaration::Variable(var_decl) => {
                var_decl.resolve(ctx)?;
            }
            Declaration::Function(func_decl) => {
                func_decl.resolve(ctx)?;
            }
        }
        Ok(self)
    }
}

impl Resolve for VariableDeclaration {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        if self.is_global {
            ctx.declare_linked(&self.name, self.pos)?;
        } else {
            self.name = ctx.declare_local(&self.name, self.pos)?;
        }
        // The declared name is in scope inside its own initializer.
        if let Some(init) = &mut self.init {
            resolve_init(init, ctx)?;
        }
        Ok(self)
    }
}

fn resolve_init(init: &mut Initializer, ctx: &mut ResolveContext) -> Result<()> {
    match init {
        Initializer::Single(expr) => resolve_exp(expr, ctx),
        Initializer::Compound(_, inits) => {
            for init in inits {
                resolve_init(init, ctx)?;
            }
            Ok(())
        }
    }
}

impl Resolve for FunctionDeclaration {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        ctx.declare_linked(&self.name, self.pos)?;

        // Parameters and the outermost block of the body share one scope.
        ctx.enter_scope();
        let mut new_params = vec![];
        for param in &self.params {
            new_params.push(ctx.declare_local(param, self.pos)?);
        }
        self.params = new_params;

        if let Some(body) = &mut self.body {
            for item in &mut body.stmts {
                item.resolve(ctx)?;
            }
        }
        ctx.exit_scope();

        Ok(self)
    }
}

impl Resolve for BlockItem {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        match self {
            BlockItem::Declaration(decl) => {
                decl.resolve(ctx)?;
            }
            BlockItem::Statement(stmt) => {
                stmt.resolve(ctx)?;
            }
        }
        Ok(self)
    }
}

impl Resolve for BlockStatement {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        ctx.enter_scope();
        for item in &mut self.stmts {
            item.resolve(ctx)?;
        }
        ctx.exit_scope();
        Ok(self)
    }
}

impl Resolve for Statement {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        match self {
            Statement::Expression(ExpressionStatement { expr }) => resolve_exp(expr, ctx)?,
            Statement::Return(ReturnStatement { expr, .. }) => {
                if let Some(expr) = expr {
                    resolve_exp(expr, ctx)?;
                }
            }
            Statement::If(IfStatement {
                condition,
                then_branch,
                else_branch,
            }) => {
                resolve_exp(condition, ctx)?;
                then_branch.resolve(ctx)?;
                if let Some(else_branch) = else_branch {
                    else_branch.resolve(ctx)?;
                }
            }
            Statement::Compound(block) => {
                block.resolve(ctx)?;
            }
            Statement::While(WhileStatement {
                condition, body, ..
            }) => {
                resolve_exp(condition, ctx)?;
                body.resolve(ctx)?;
            }
            Statement::For(for_stmt) => {
                for_stmt.resolve(ctx)?;
            }
            Statement::Break(_) | Statement::Null => {}
        }
        Ok(self)
    }
}

impl Resolve for ForStatement {
    fn resolve(&mut self, ctx: &mut ResolveContext) -> Result<&mut Self> {
        ctx.enter_scope();
        match &mut self.init {
            ForInit::Declaration(decls) => {
                for decl in decls {
                    decl.resolve(ctx)?;
                }
            }
            ForInit::Expression(Some(expr)) => resolve_exp(expr, ctx)?,
            ForInit::Expression(None) => {}
        }
        if let Some(condition) = &mut self.condition {
            resolve_exp(condition, ctx)?;
        }
        if let Some(post) = &mut self.post {
            resolve_exp(post, ctx)?;
        }
        self.body.resolve(ctx)?;
        ctx.exit_scope();
        Ok(self)
    }
}

fn resolve_exp(exp: &mut Expression, ctx: &mut ResolveContext) -> Result<()> {
    match exp {
        Expression::Variable(VariableExpression { value, pos, .. }) => {
            let variable = ctx.lookup(value).ok_or_else(|| {
                CompileError::static_error(format!("use of undeclared identifier `{}`", value), *pos)
            })?;
            *value = variable.name.clone();
        }
        Expression::Call(CallExpression { name, args, .. }) => {
            // Unknown callees are external runtime functions.
            if let Some(variable) = ctx.lookup(name) {
                *name = variable.name.clone();
            }
            for arg in args {
                resolve_exp(arg, ctx)?;
            }
        }
        Expression::Constant(_) | Expression::String(_) | Expression::SizeofT(_) => {}
        Expression::Unary(UnaryExpression { expr, .. })
        | Expression::Postfix(PostfixExpression { expr, .. })
        | Expression::Cast(CastExpression { expr, .. })
        | Expression::Deref(DerefExpression { expr, .. })
        | Expression::AddrOf(AddrOfExpression { expr, .. })
        | Expression::Sizeof(SizeofExpression { expr, .. }) => resolve_exp(expr, ctx)?,
        Expression::Binary(BinaryExpression { lhs, rhs, .. })
        | Expression::Assign(AssignExpression { lhs, rhs, .. })
        | Expression::Comma(CommaExpression { lhs, rhs, .. }) => {
            resolve_exp(lhs, ctx)?;
            resolve_exp(rhs, ctx)?;
        }
        Expression::Conditional(ConditionalExpression {
            condition,
            then_expr,
            else_expr,
            ..
        }) => {
            resolve_exp(condition, ctx)?;
            resolve_exp(then_expr, ctx)?;
            resolve_exp(else_expr, ctx)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::lex::tokenize, parser::recursive_descent::Parser};

    fn resolve(src: &str) -> Result<Program> {
        let mut program = Parser::new(tokenize(src)?).parse()?;
        program.resolve(&mut ResolveContext::new())?;
        Ok(program)
    }

    fn local_names(block: &BlockStatement, out: &mut Vec<String>) {
        for item in &block.stmts {
            match item {
                BlockItem::Declaration(Declaration::Variable(var)) => out.push(var.name.clone()),
                BlockItem::Statement(Statement::Compound(inner)) => local_names(inner, out),
                _ => {}
            }
        }
    }

    #[test]
    fn shadowing_gets_distinct_names() {
        let program =
            resolve("int main() { int a = 1; { int a = 2; } { int a = 3; } return a; }").unwrap();
        let Declaration::Function(FunctionDeclaration {
            body: Some(body), ..
        }) = &program.declarations[0]
        else {
            panic!("expected a function")
        };
        let mut names = vec![];
        local_names(body, &mut names);
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|name| name.starts_with("var.a.")));
        assert_ne!(names[0], names[1]);
        assert_ne!(names[1], names[2]);

        let Some(BlockItem::Statement(Statement::Return(ReturnStatement {
            expr: Some(Expression::Variable(var)),
            ..
        }))) = body.stmts.last()
        else {
            panic!("expected a return")
        };
        assert_eq!(var.value, names[0]);
    }

    #[test]
    fn redeclaration_in_same_scope_is_a_static_error() {
        let err = resolve("int main() { int a; int a; }").unwrap_err();
        let err = err.downcast_ref::<CompileError>().unwrap();
        assert_eq!(err.class(), "StaticError");
        assert_eq!(err.pos(), 24);
    }

    #[test]
    fn file_scope_names_may_repeat() {
        assert!(resolve("int g; int g; int main() { return g; }").is_ok());
        assert!(resolve("int f(); int f() { return 0; } int f() { return 1; }").is_ok());
    }

    #[test]
    fn parameter_and_body_share_a_scope() {
        let err = resolve("int f(int a) { int a; return a; }").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>().map(|e| e.class()),
            Some("StaticError")
        );
    }

    #[test]
    fn undeclared_variable_is_a_static_error() {
        let err = resolve("int main() { return b; }").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>(),
            Some(&CompileError::static_error(
                "use of undeclared identifier `b`",
                20
            ))
        );
    }

    #[test]
    fn for_declaration_is_scoped_to_the_loop() {
        let err = resolve("int main() { for (int i = 0;;) { break; } return i; }").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>().map(|e| e.class()),
            Some("StaticError")
        );
        assert!(resolve("int main() { int i; for (int i = 0;;) { int i; break; } return i; }").is_ok());
    }

    #[test]
    fn prototypes_may_precede_definitions_and_unknown_calls_pass_through() {
        let program =
            resolve("int f(int a); int f(int a) { return a; } int main() { printf(\"x\"); return f(1); }")
                .unwrap();
        assert_eq!(program.declarations.len(), 3);
        assert!(resolve("int x; int x;").is_err());
    }
}
