use crate::{
    parser::ast::{
        BlockItem, ConstantExpression, Declaration, Expression, ForInit, FunctionDeclaration,
        Initializer, Program, Statement, Type, VariableDeclaration,
    },
    semantics::{
        const_eval::{self, StaticValue},
        typechecker::{get_alignment, get_size_of_type, get_type},
    },
};
use anyhow::Result;
use log::debug;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticInit {
    Char(i8),
    Int(i32),
    Quad(i64),
    Address(String, i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalLayout {
    pub name: String,
    pub size: usize,
    pub alignment: usize,
    pub inits: Vec<(usize, StaticInit)>,
}

// Register parameters and locals sit below %rbp, stack parameters above.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameLayout {
    pub slots: HashMap<String, isize>,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageLayout {
    pub globals: Vec<GlobalLayout>,
    pub frames: HashMap<String, FrameLayout>,
    pub strings: Vec<(String, String)>,
}

impl StorageLayout {
    pub fn intern_string(&mut self, value: &str) -> String {
        if let Some((label, _)) = self.strings.iter().find(|(_, v)| v == value) {
            return label.clone();
        }
        let label = format!("str.{}", self.strings.len());
        self.strings.push((label.clone(), value.to_owned()));
        label
    }

    pub fn frame(&self, function: &str) -> Option<&FrameLayout> {
        self.frames.get(function)
    }
}

pub const ARG_REGISTERS: usize = 6;

pub fn allocate(program: &Program) -> Result<StorageLayout> {
    let mut layout = StorageLayout::default();

    for decl in &program.declarations {
        match decl {
            Declaration::Variable(var_decl) => {
                let global = allocate_global(var_decl, &mut layout)?;
                layout.globals.push(global);
            }
            Declaration::Function(func_decl) if func_decl.body.is_some() => {
                let frame = allocate_frame(func_decl);
                debug!("frame of `{}`: {} bytes", func_decl.name, frame.size);
                layout.frames.insert(func_decl.name.clone(), frame);
            }
            Declaration::Function(_) => {}
        }
    }

    debug!(
        "allocated {} globals and {} frames",
        layout.globals.len(),
        layout.frames.len()
    );

    Ok(layout)
}

fn allocate_global(var_decl: &VariableDeclaration, layout: &mut StorageLayout) -> Result<GlobalLayout> {
    let mut flat = vec![];
    if let Some(init) = &var_decl.init {
        flatten_initializer(init, &var_decl._type, 0, false, &mut flat);
    }

    let mut inits = vec![];
    for (offset, expr) in flat {
        let init = match (const_eval::eval(&expr)?, get_type(&expr)) {
            (StaticValue::Int(0), _) => continue,
            (StaticValue::Int(v), Type::Char) => StaticInit::Char(v as i8),
            (StaticValue::Int(v), Type::Int) => StaticInit::Int(v as i32),
            (StaticValue::Int(v), _) => StaticInit::Quad(v),
            (StaticValue::Address(name, delta), _) => StaticInit::Address(name, delta),
            (StaticValue::String(value, delta), _) => {
                StaticInit::Address(layout.intern_string(&value), delta)
            }
        };
        inits.push((offset, init));
    }

    Ok(GlobalLayout {
        name: var_decl.name.clone(),
        size: get_size_of_type(&var_decl._type),
        alignment: slot_alignment(&var_decl._type),
        inits,
    })
}

pub fn flatten_initializer(
    init: &Initializer,
    t: &Type,
    offset: usize,
    zero_fill: bool,
    out: &mut Vec<(usize, Expression)>,
) {
    match (t, init) {
        (Type::Array { element, size }, Initializer::Single(Expression::String(string))) => {
            let bytes = string.value.as_bytes();
            for i in 0..*size {
                let byte = bytes.get(i).copied().unwrap_or(0);
                if byte != 0 || zero_fill {
                    out.push((offset + i, constant(byte as i8 as i32, element, string.pos)));
                }
            }
        }
        (Type::Array { element, size }, Initializer::Compound(pos, inits)) => {
            let element_size = get_size_of_type(element);
            for (i, init) in inits.iter().enumerate() {
                flatten_initializer(init, element, offset + i * element_size, zero_fill, out);
            }
            if zero_fill {
                for i in inits.len()..*size {
                    zero_initializer(element, offset + i * element_size, *pos, out);
                }
            }
        }
        (_, Initializer::Single(expr)) => out.push((offset, expr.clone())),
        (_, Initializer::Compound(_, inits)) => {
            if let Some(init) = inits.first() {
                flatten_initializer(init, t, offset, zero_fill, out);
            }
        }
    }
}

fn zero_initializer(t: &Type, offset: usize, pos: usize, out: &mut Vec<(usize, Expression)>) {
    match t {
        Type::Array { element, size } => {
            let element_size = get_size_of_type(element);
            for i in 0..*size {
                zero_initializer(element, offset + i * element_size, pos, out);
            }
        }
        _ => out.push((offset, constant(0, t, pos))),
    }
}

fn constant(value: i32, t: &Type, pos: usize) -> Expression {
    Expression::Constant(ConstantExpression {
        value,
        _type: t.clone(),
        pos,
    })
}

fn slot_alignment(t: &Type) -> usize {
    match t {
        Type::Array { .. } => 16,
        _ => get_alignment(t),
    }
}

fn align_up(n: usize, alignment: usize) -> usize {
    (n + alignment - 1) / alignment * alignment
}

#[derive(Default)]
struct FrameBuilder {
    frame: FrameLayout,
    depth: usize,
}

impl FrameBuilder {
    // Array slots are padded to a multiple of 16 bytes.
    fn push_slot(&mut self, name: &str, t: &Type) {
        let size = match t {
            Type::Array { .. } => align_up(get_size_of_type(t), 16),
            _ => get_size_of_type(t),
        };
        self.depth = align_up(self.depth + size, slot_alignment(t));
        self.frame
            .slots
            .insert(name.to_owned(), -(self.depth as isize));
        self.frame.size = self.frame.size.max(self.depth);
    }

    fn block(&mut self, items: &[BlockItem]) {
        let saved = self.depth;
        for item in items {
            match item {
                BlockItem::Declaration(Declaration::Variable(var_decl)) => {
                    self.push_slot(&var_decl.name, &var_decl._type)
                }
                BlockItem::Declaration(Declaration::Function(_)) => {}
                BlockItem::Statement(stmt) => self.statement(stmt),
            }
        }
        self.depth = saved;
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Compound(block) => self.block(&block.stmts),
            Statement::If(if_stmt) => {
                self.statement(&if_stmt.then_branch);
                if let Some(else_branch) = &if_stmt.else_branch {
                    self.statement(else_branch);
                }
            }
            Statement::While(while_stmt) => self.statement(&while_stmt.body),
            Statement::For(for_stmt) => {
                let saved = self.depth;
                if let ForInit::Declaration(decls) = &for_stmt.init {
                    for decl in decls {
                        self.push_slot(&decl.name, &decl._type);
                    }
                }
                self.statement(&for_stmt.body);
                self.depth = saved;
            }
            Statement::Return(_) | Statement::Expression(_) | Statement::Break(_) | Statement::Null => {}
        }
    }
}

fn allocate_frame(func_decl: &FunctionDeclaration) -> FrameLayout {
    let param_types = match &func_decl._type {
        Type::Func { params, .. } => params.clone(),
        _ => unreachable!(),
    };

    let mut builder = FrameBuilder::default();
    for (i, (param, t)) in func_decl.params.iter().zip(&param_types).enumerate() {
        if i < ARG_REGISTERS {
            builder.push_slot(param, t);
        } else {
            let offset = 16 + 8 * (i - ARG_REGISTERS);
            builder.frame.slots.insert(param.clone(), offset as isize);
        }
    }

    if let Some(body) = &func_decl.body {
        builder.block(&body.stmts);
    }

    builder.frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lexer::lex::tokenize,
        parser::recursive_descent::Parser,
        semantics::{
            resolver::{Resolve, ResolveContext},
            typechecker::{Typecheck, TypeContext},
        },
    };

    fn layout_of(src: &str) -> StorageLayout {
        let mut program = Parser::new(tokenize(src).unwrap()).parse().unwrap();
        program.resolve(&mut ResolveContext::new()).unwrap();
        program.typecheck(&mut TypeContext::new()).unwrap();
        allocate(&program).unwrap()
    }

    fn slot(frame: &FrameLayout, name: &str) -> isize {
        frame
            .slots
            .iter()
            .find(|(k, _)| k.starts_with(&format!("var.{}.", name)))
            .map(|(_, v)| *v)
            .unwrap()
    }

    #[test]
    fn nested_initializers_flatten_row_major() {
        let layout = layout_of("int a[3][3] = {{1, 2, 3}, {}, {17, 8}};");
        let global = &layout.globals[0];
        assert_eq!(global.size, 36);
        assert_eq!(
            global.inits,
            vec![
                (0, StaticInit::Int(1)),
                (4, StaticInit::Int(2)),
                (8, StaticInit::Int(3)),
                (24, StaticInit::Int(17)),
                (28, StaticInit::Int(8)),
            ]
        );
    }

    #[test]
    fn globals_default_to_zero_and_take_addresses() {
        let layout = layout_of("int n; int memo[50]; char s[8] = \"ok\"; char *p = \"ok\"; int *q = &memo[1];");
        assert!(layout.globals[0].inits.is_empty());
        assert_eq!(layout.globals[1].size, 200);
        assert_eq!(layout.globals[1].alignment, 16);
        assert_eq!(
            layout.globals[2].inits,
            vec![(0, StaticInit::Char(b'o' as i8)), (1, StaticInit::Char(b'k' as i8))]
        );
        assert_eq!(
            layout.globals[3].inits,
            vec![(0, StaticInit::Address("str.0".into(), 0))]
        );
        assert_eq!(
            layout.globals[4].inits,
            vec![(0, StaticInit::Address("memo".into(), 4))]
        );
        assert_eq!(layout.strings, vec![("str.0".to_owned(), "ok".to_owned())]);
    }

    #[test]
    fn local_zero_fill_covers_missing_elements() {
        let mut out = vec![];
        let t = Type::Array {
            element: Type::Array {
                element: Type::Int.into(),
                size: 2,
            }
            .into(),
            size: 2,
        };
        let init = Initializer::Compound(
            0,
            vec![Initializer::Compound(
                0,
                vec![Initializer::Single(constant(5, &Type::Int, 0))],
            )],
        );
        flatten_initializer(&init, &t, 0, true, &mut out);
        let offsets: Vec<usize> = out.iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 12]);
    }

    #[test]
    fn sibling_blocks_reuse_frame_space() {
        let layout = layout_of(
            "int f(int a) { int b; { int c; } { int d; } for (int i = 0; i < 3; i = i + 1) { int e[3]; } return b; }",
        );
        let frame = layout.frame("f").unwrap();
        assert_eq!(slot(frame, "a"), -4);
        assert_eq!(slot(frame, "b"), -8);
        assert_eq!(slot(frame, "c"), -12);
        assert_eq!(slot(frame, "d"), -12);
        assert_eq!(slot(frame, "i"), -12);
        assert_eq!(slot(frame, "e"), -32);
        assert_eq!(frame.size, 32);
    }

    #[test]
    fn stack_parameters_live_above_the_frame() {
        let layout = layout_of(
            "int f(int a, int b, int c, int d, int e, int g, int h, int i) { return h + i; }",
        );
        let frame = layout.frame("f").unwrap();
        assert_eq!(slot(frame, "h"), 16);
        assert_eq!(slot(frame, "i"), 24);
        assert_eq!(frame.size, 24);
    }
}
