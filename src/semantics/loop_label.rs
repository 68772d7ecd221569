use anyhow::{bail, Result};

use crate::{
    error::CompileError,
    parser::ast::{BlockItem, Declaration, Program, Statement},
};

#[derive(Debug, Default)]
pub struct LabelCounter {
    next: usize,
}

impl LabelCounter {
    fn fresh(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{}.{}", prefix, self.next)
    }
}

pub trait LoopLabel {
    fn loop_label(&mut self, current_label: &str, labels: &mut LabelCounter) -> Result<&mut Self>
    where
        Self: Sized;
}

impl LoopLabel for Program {
    fn loop_label(&mut self, current_label: &str, labels: &mut LabelCounter) -> Result<&mut Self> {
        for decl in &mut self.declarations {
            if let Declaration::Function(func) = decl {
                if let Some(body) = &mut func.body {
                    for item in &mut body.stmts {
                        item.loop_label(current_label, labels)?;
                    }
                }
            }
        }
        Ok(self)
    }
}

impl LoopLabel for BlockItem {
    fn loop_label(&mut self, current_label: &str, labels: &mut LabelCounter) -> Result<&mut Self> {
        if let BlockItem::Statement(stmt) = self {
            stmt.loop_label(current_label, labels)?;
        }
        Ok(self)
    }
}

impl LoopLabel for Statement {
    fn loop_label(&mut self, current_label: &str, labels: &mut LabelCounter) -> Result<&mut Self> {
        match self {
            Statement::Break(brk) => {
                if current_label.is_empty() {
                    bail!(CompileError::static_error(
                        "break statement not within loop",
                        brk.pos
                    ));
                }
                brk.label = current_label.to_owned();
            }
            Statement::While(while_stmt) => {
                let new_label = labels.fresh("While");
                while_stmt.body.loop_label(&new_label, labels)?;
                while_stmt.label = new_label;
            }
            Statement::For(for_stmt) => {
                let new_label = labels.fresh("For");
                for_stmt.body.loop_label(&new_label, labels)?;
                for_stmt.label = new_label;
            }
            Statement::If(if_stmt) => {
                if_stmt.then_branch.loop_label(current_label, labels)?;
                if let Some(else_branch) = &mut if_stmt.else_branch {
                    else_branch.loop_label(current_label, labels)?;
                }
            }
            Statement::Compound(block) => {
                for item in &mut block.stmts {
                    item.loop_label(current_label, labels)?;
                }
            }
            Statement::Return(_) | Statement::Expression(_) | Statement::Null => {}
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lexer::lex::tokenize,
        parser::{ast::FunctionDeclaration, recursive_descent::Parser},
    };

    fn label(src: &str) -> Result<Program> {
        let mut program = Parser::new(tokenize(src)?).parse()?;
        program.loop_label("", &mut LabelCounter::default())?;
        Ok(program)
    }

    #[test]
    fn break_targets_innermost_loop() {
        let program =
            label("int main() { while (1) { for (;;) { break; } break; } return 0; }").unwrap();
        let Declaration::Function(FunctionDeclaration {
            body: Some(body), ..
        }) = &program.declarations[0]
        else {
            panic!("expected a function")
        };
        let BlockItem::Statement(Statement::While(outer)) = &body.stmts[0] else {
            panic!("expected a while loop")
        };
        let Statement::Compound(outer_body) = outer.body.as_ref() else {
            panic!("expected a block")
        };
        let BlockItem::Statement(Statement::For(inner)) = &outer_body.stmts[0] else {
            panic!("expected a for loop")
        };
        let Statement::Compound(inner_body) = inner.body.as_ref() else {
            panic!("expected a block")
        };

        let break_label = |item: &BlockItem| match item {
            BlockItem::Statement(Statement::Break(brk)) => brk.label.clone(),
            other => panic!("expected a break, got {:?}", other),
        };

        assert_eq!(outer.label, "While.1");
        assert_eq!(inner.label, "For.2");
        assert_eq!(break_label(&inner_body.stmts[0]), "For.2");
        assert_eq!(break_label(&outer_body.stmts[1]), "While.1");
    }

    #[test]
    fn stray_break_is_a_static_error() {
        let err = label("int main() { if (1) break; return 0; }").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>(),
            Some(&CompileError::static_error(
                "break statement not within loop",
                20
            ))
        );
    }
}
