use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockItem {
    Statement(Statement),
    Declaration(Declaration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Variable(VariableDeclaration),
    Function(FunctionDeclaration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub name: String,
    pub _type: Type,
    pub init: Option<Initializer>,
    pub is_global: bool,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub _type: Type,
    pub params: Vec<String>,
    pub body: Option<BlockStatement>,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Char,
    Pointer(Box<Type>),
    Array { element: Box<Type>, size: usize },
    Func { params: Vec<Type>, ret: Box<Type> },
    Dummy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Return(ReturnStatement),
    Expression(ExpressionStatement),
    If(IfStatement),
    Compound(BlockStatement),
    While(WhileStatement),
    For(ForStatement),
    Break(BreakStatement),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStatement {
    pub expr: Option<Expression>,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionStatement {
    pub expr: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    pub condition: Expression,
    pub then_branch: Box<Statement>,
    pub else_branch: Option<Box<Statement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub stmts: Vec<BlockItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    pub condition: Expression,
    pub body: Box<Statement>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    pub init: ForInit,
    pub condition: Option<Expression>,
    pub post: Option<Expression>,
    pub body: Box<Statement>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Declaration(Vec<VariableDeclaration>),
    Expression(Option<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakStatement {
    pub label: String,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Single(Expression),
    Compound(usize, Vec<Initializer>),
}

impl Initializer {
    pub fn pos(&self) -> usize {
        match self {
            Initializer::Single(expr) => expr.pos(),
            Initializer::Compound(pos, _) => *pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(ConstantExpression),
    String(StringExpression),
    Variable(VariableExpression),
    Unary(UnaryExpression),
    Binary(BinaryExpression),
    Assign(AssignExpression),
    Postfix(PostfixExpression),
    Conditional(ConditionalExpression),
    Comma(CommaExpression),
    Call(CallExpression),
    Cast(CastExpression),
    Deref(DerefExpression),
    AddrOf(AddrOfExpression),
    Sizeof(SizeofExpression),
    SizeofT(SizeofTExpression),
}

impl Expression {
    pub fn pos(&self) -> usize {
        match self {
            Expression::Constant(e) => e.pos,
            Expression::String(e) => e.pos,
            Expression::Variable(e) => e.pos,
            Expression::Unary(e) => e.pos,
            Expression::Binary(e) => e.pos,
            Expression::Assign(e) => e.pos,
            Expression::Postfix(e) => e.pos,
            Expression::Conditional(e) => e.pos,
            Expression::Comma(e) => e.pos,
            Expression::Call(e) => e.pos,
            Expression::Cast(e) => e.pos,
            Expression::Deref(e) => e.pos,
            Expression::AddrOf(e) => e.pos,
            Expression::Sizeof(e) => e.pos,
            Expression::SizeofT(e) => e.pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantExpression {
    pub value: i32,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringExpression {
    pub value: String,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableExpression {
    pub value: String,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpression {
    pub kind: UnaryExpressionKind,
    pub expr: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryExpressionKind {
    Negate,
    Complement,
    Not,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    pub kind: BinaryExpressionKind,
    pub lhs: Box<Expression>,
    pub rhs: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryExpressionKind {
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
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpression {
    pub op: Option<BinaryExpressionKind>,
    pub lhs: Box<Expression>,
    pub rhs: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostfixExpression {
    pub kind: PostfixExpressionKind,
    pub expr: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixExpressionKind {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpression {
    pub condition: Box<Expression>,
    pub then_expr: Box<Expression>,
    pub else_expr: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommaExpression {
    pub lhs: Box<Expression>,
    pub rhs: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    pub name: String,
    pub args: Vec<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastExpression {
    pub target_type: Type,
    pub expr: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerefExpression {
    pub expr: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddrOfExpression {
    pub expr: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeofExpression {
    pub expr: Box<Expression>,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeofTExpression {
    pub t: Type,
    pub _type: Type,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declarator {
    Ident(String, usize),
    Pointer(Box<Declarator>),
    Func(Vec<ParamInfo>, Box<Declarator>),
    Array(Box<Declarator>, Option<usize>),
}

pub type ParamInfo = (Type, Box<Declarator>);

#[derive(Debug, Clone, PartialEq)]
pub enum AbstractDeclarator {
    Pointer(Box<AbstractDeclarator>),
    Array(Box<AbstractDeclarator>, usize),
    Base,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Char => write!(f, "char"),
            Type::Pointer(referenced) => write!(f, "{}*", referenced),
            Type::Array { element, size } => write!(f, "{}[{}]", element, size),
            Type::Func { ret, .. } => write!(f, "function returning {}", ret),
            Type::Dummy => write!(f, "<untyped>"),
        }
    }
}
