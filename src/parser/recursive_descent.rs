use crate::{
    error::CompileError,
    lexer::lex::{Lexeme, Token},
    parser::ast::{
        AbstractDeclarator, AddrOfExpression, AssignExpression, BinaryExpression,
        BinaryExpressionKind, BlockItem, BlockStatement, BreakStatement, CallExpression,
        CastExpression, CommaExpression, ConditionalExpression, ConstantExpression, Declaration,
        Declarator, DerefExpression, Expression, ExpressionStatement, ForInit, ForStatement,
        FunctionDeclaration, IfStatement, Initializer, ParamInfo, PostfixExpression,
        PostfixExpressionKind, Program, ReturnStatement, SizeofExpression, SizeofTExpression,
        Statement, StringExpression, Type, UnaryExpression, UnaryExpressionKind,
        VariableDeclaration, VariableExpression, WhileStatement,
    },
};
use anyhow::{bail, Result};
use log::debug;
use std::collections::VecDeque;

pub struct Parser {
    pub tokens: VecDeque<Lexeme>,
    pub current: Lexeme,
    pub previous: Lexeme,
    pub depth: usize,
}

type Level = fn(&mut Parser) -> Result<Expression>;

impl Parser {
    pub fn new(mut tokens: VecDeque<Lexeme>) -> Parser {
        let current = tokens.pop_front().unwrap_or(Lexeme {
            token: Token::Eof,
            pos: 0,
        });
        Parser {
            tokens,
            previous: current.clone(),
            current,
            depth: 0,
        }
    }

    fn advance(&mut self) -> Token {
        let next = self.tokens.pop_front().unwrap_or(Lexeme {
            token: Token::Eof,
            pos: self.current.pos,
        });
        self.previous = std::mem::replace(&mut self.current, next);
        self.previous.token.clone()
    }

    fn consume(&mut self, token: &Token) -> Result<Token> {
        if self.check(token) {
            return Ok(self.advance());
        }
        let expected = match token {
            Token::Identifier(_) => "identifier".to_owned(),
            Token::Constant(_) => "integer literal".to_owned(),
            _ => token.to_string(),
        };
        Err(self.unexpected(&expected))
    }

    fn unexpected(&self, expected: &str) -> anyhow::Error {
        CompileError::parse(expected, self.current.token.to_string(), self.current.pos).into()
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.current.token) == std::mem::discriminant(token)
    }

    fn is_next(&mut self, tokens: &[Token]) -> bool {
        for token in tokens {
            if self.check(token) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check_many(&self, tokens: &[Token]) -> bool {
        tokens.iter().any(|token| self.check(token))
    }

    fn peek(&self, n: usize) -> Vec<Token> {
        let mut v = vec![self.current.token.clone()];
        v.extend(self.tokens.iter().take(n - 1).map(|lexeme| lexeme.token.clone()));
        v
    }

    pub fn parse(&mut self) -> Result<Program> {
        let mut declarations = vec![];
        while !self.check(&Token::Eof) {
            if !self.is_type_specifier(&self.current.token) {
                return Err(self.unexpected("declaration"));
            }
            declarations.extend(self.parse_declaration()?);
        }
        debug!("parsed {} top-level declarations", declarations.len());
        Ok(Program { declarations })
    }

    fn is_type_specifier(&self, token: &Token) -> bool {
        matches!(token, Token::Int | Token::Char)
    }

    fn parse_type_specifier(&mut self) -> Result<Type> {
        if self.is_next(&[Token::Int]) {
            Ok(Type::Int)
        } else if self.is_next(&[Token::Char]) {
            Ok(Type::Char)
        } else {
            Err(self.unexpected("type specifier"))
        }
    }

    fn parse_declaration(&mut self) -> Result<Vec<Declaration>> {
        let base_type = self.parse_type_specifier()?;
        let mut declarations = vec![];

        loop {
            let declarator = self.parse_declarator()?;
            let (name, pos, decl_type, params) =
                self.process_declarator(&declarator, &base_type, false)?;

            match decl_type {
                Type::Func { .. } => {
                    if declarations.is_empty() && self.check(&Token::LBrace) {
                        if self.depth > 0 {
                            return Err(self.unexpected("`;`"));
                        }
                        let body = self.parse_function_body()?;
                        return Ok(vec![Declaration::Function(FunctionDeclaration {
                            name,
                            _type: decl_type,
                            params,
                            body: Some(body),
                            pos,
                        })]);
                    }
                    declarations.push(Declaration::Function(FunctionDeclaration {
                        name,
                        _type: decl_type,
                        params,
                        body: None,
                        pos,
                    }));
                }
                _ => {
                    let init = if self.is_next(&[Token::Equal]) {
                        Some(self.parse_initializer()?)
                    } else {
                        None
                    };
                    declarations.push(Declaration::Variable(VariableDeclaration {
                        name,
                        _type: decl_type,
                        init,
                        is_global: self.depth == 0,
                        pos,
                    }));
                }
            }

            if !self.is_next(&[Token::Comma]) {
                break;
            }
        }

        self.consume(&Token::Semicolon)?;
        Ok(declarations)
    }

    fn parse_function_body(&mut self) -> Result<BlockStatement> {
        self.consume(&Token::LBrace)?;
        self.parse_block()
    }

    fn parse_initializer(&mut self) -> Result<Initializer> {
        if self.is_next(&[Token::LBrace]) {
            let pos = self.previous.pos;
            let mut items = vec![];
            while !self.is_next(&[Token::RBrace]) {
                items.push(self.parse_initializer()?);
                if !self.is_next(&[Token::Comma]) {
                    self.consume(&Token::RBrace)?;
                    break;
                }
            }
            Ok(Initializer::Compound(pos, items))
        } else {
            Ok(Initializer::Single(self.assignment()?))
        }
    }

    fn parse_declarator(&mut self) -> Result<Declarator> {
        if self.is_next(&[Token::Star]) {
            let inner = self.parse_declarator()?;
            Ok(Declarator::Pointer(Box::new(inner)))
        } else {
            self.parse_direct_declarator()
        }
    }

    fn parse_direct_declarator(&mut self) -> Result<Declarator> {
        let simple_declarator = self.parse_simple_declarator()?;
        if self.is_next(&[Token::LParen]) {
            let params = self.parse_param_list()?;
            Ok(Declarator::Func(params, Box::new(simple_declarator)))
        } else if self.check(&Token::LBracket) {
            self.parse_array_decl_suffix(simple_declarator)
        } else {
            Ok(simple_declarator)
        }
    }

    fn parse_simple_declarator(&mut self) -> Result<Declarator> {
        if self.is_next(&[Token::LParen]) {
            let decl = self.parse_declarator()?;
            self.consume(&Token::RParen)?;
            Ok(decl)
        } else {
            let pos = self.current.pos;
            let name = self.consume(&Token::Identifier("".to_owned()))?.as_string();
            Ok(Declarator::Ident(name, pos))
        }
    }

    fn parse_array_decl_suffix(&mut self, base_decl: Declarator) -> Result<Declarator> {
        let mut decl = base_decl;
        while self.check(&Token::LBracket) {
            let dim = self.parse_dim()?;
            decl = Declarator::Array(Box::new(decl), dim);
        }
        Ok(decl)
    }

    fn parse_dim(&mut self) -> Result<Option<usize>> {
        self.consume(&Token::LBracket)?;
        let dim = match self.current.token {
            Token::Constant(n) => Some(n as usize),
            Token::CharLiteral(c) => Some(c as usize),
            Token::RBracket => None,
            _ => return Err(self.unexpected("array size")),
        };
        if dim.is_some() {
            self.advance();
        }
        self.consume(&Token::RBracket)?;
        Ok(dim)
    }

    fn parse_param_list(&mut self) -> Result<Vec<ParamInfo>> {
        if matches!(self.peek(2).as_slice(), [Token::Void, Token::RParen]) {
            self.advance();
        }
        let mut params = vec![];
        if !self.is_next(&[Token::RParen]) {
            loop {
                let param_type = self.parse_type_specifier()?;
                let declarator = self.parse_declarator()?;
                params.push((param_type, Box::new(declarator)));
                if !self.is_next(&[Token::Comma]) {
                    break;
                }
            }
            self.consume(&Token::RParen)?;
        }
        Ok(params)
    }

    fn process_declarator(
        &self,
        declarator: &Declarator,
        base_type: &Type,
        param: bool,
    ) -> Result<(String, usize, Type, Vec<String>)> {
        match declarator {
            Declarator::Ident(name, pos) => Ok((name.clone(), *pos, base_type.clone(), vec![])),
            Declarator::Pointer(decl) => {
                let derived_type = Type::Pointer(base_type.clone().into());
                self.process_declarator(decl, &derived_type, param)
            }
            Declarator::Func(params, decl) => match decl.as_ref() {
                Declarator::Ident(name, pos) => {
                    if let Type::Array { .. } = base_type {
                        bail!(CompileError::type_error(
                            format!("function `{}` cannot return an array", name),
                            *pos
                        ));
                    }

                    let mut param_names = vec![];
                    let mut param_types = vec![];

                    for (param_base_type, param_declarator) in params {
                        let (param_name, param_pos, param_type, _) =
                            self.process_declarator(param_declarator, param_base_type, true)?;
                        if let Type::Func { .. } = param_type {
                            bail!(CompileError::type_error(
                                "function parameters cannot have function type",
                                param_pos
                            ));
                        }
                        param_names.push(param_name);
                        param_types.push(param_type);
                    }

                    let derived_type = Type::Func {
                        params: param_types,
                        ret: base_type.clone().into(),
                    };
                    Ok((name.clone(), *pos, derived_type, param_names))
                }
                _ => bail!(CompileError::type_error(
                    "function pointers and arrays of functions are not supported",
                    self.previous.pos
                )),
            },
            Declarator::Array(inner, size) => {
                if let Type::Func { .. } = base_type {
                    bail!(CompileError::type_error(
                        "arrays of functions are not supported",
                        self.previous.pos
                    ));
                }
                if param {
                    if let Declarator::Ident(name, pos) = inner.as_ref() {
                        return Ok((
                            name.clone(),
                            *pos,
                            Type::Pointer(base_type.clone().into()),
                            vec![],
                        ));
                    }
                }
                let size = match size {
                    Some(size) => *size,
                    None => bail!(CompileError::type_error(
                        "array declared without a size",
                        self.previous.pos
                    )),
                };
                let derived_type = Type::Array {
                    element: Box::new(base_type.clone()),
                    size,
                };
                self.process_declarator(inner, &derived_type, param)
            }
        }
    }

    fn parse_block_item(&mut self) -> Result<Vec<BlockItem>> {
        if self.is_type_specifier(&self.current.token) {
            Ok(self
                .parse_declaration()?
                .into_iter()
                .map(BlockItem::Declaration)
                .collect())
        } else {
            Ok(vec![BlockItem::Statement(self.parse_statement()?)])
        }
    }

    fn parse_block(&mut self) -> Result<BlockStatement> {
        self.depth += 1;
        let mut stmts = vec![];
        while !self.is_next(&[Token::RBrace]) {
            if self.check(&Token::Eof) {
                return Err(self.unexpected("`}`"));
            }
            stmts.extend(self.parse_block_item()?);
        }
        self.depth -= 1;
        Ok(BlockStatement { stmts })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if self.is_next(&[Token::Return]) {
            self.parse_return_statement()
        } else if self.is_next(&[Token::If]) {
            self.parse_if_statement()
        } else if self.is_next(&[Token::While]) {
            self.parse_while_statement()
        } else if self.is_next(&[Token::For]) {
            self.parse_for_statement()
        } else if self.is_next(&[Token::Break]) {
            self.parse_break_statement()
        } else if self.is_next(&[Token::LBrace]) {
            Ok(Statement::Compound(self.parse_block()?))
        } else if self.is_next(&[Token::Semicolon]) {
            Ok(Statement::Null)
        } else {
            self.parse_expression_statement()
        }
    }

    fn parse_if_statement(&mut self) -> Result<Statement> {
        self.consume(&Token::LParen)?;
        let condition = self.parse_expression()?;
        self.consume(&Token::RParen)?;
        let then_branch = self.parse_statement()?;

        let else_branch = if self.is_next(&[Token::Else]) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        Ok(Statement::If(IfStatement {
            condition,
            then_branch: then_branch.into(),
            else_branch,
        }))
    }

    fn parse_while_statement(&mut self) -> Result<Statement> {
        self.consume(&Token::LParen)?;
        let condition = self.parse_expression()?;
        self.consume(&Token::RParen)?;
        let body = self.parse_statement()?;

        Ok(Statement::While(WhileStatement {
            condition,
            body: body.into(),
            label: "".to_owned(),
        }))
    }

    fn parse_for_statement(&mut self) -> Result<Statement> {
        self.consume(&Token::LParen)?;

        let init = if self.is_next(&[Token::Semicolon]) {
            ForInit::Expression(None)
        } else if self.is_type_specifier(&self.current.token) {
            let pos = self.current.pos;
            let decls = self.parse_declaration()?;
            let vars = decls
                .into_iter()
                .map(|decl| match decl {
                    Declaration::Variable(var) => Ok(var),
                    Declaration::Function(_) => Err(CompileError::static_error(
                        "function declared in a for loop initializer",
                        pos,
                    )),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ForInit::Declaration(vars)
        } else {
            let expr = self.parse_expression()?;
            self.consume(&Token::Semicolon)?;
            ForInit::Expression(Some(expr))
        };

        let condition = if self.is_next(&[Token::Semicolon]) {
            None
        } else {
            let expr = self.parse_expression()?;
            self.consume(&Token::Semicolon)?;
            Some(expr)
        };

        let post = if self.is_next(&[Token::RParen]) {
            None
        } else {
            let expr = self.parse_expression()?;
            self.consume(&Token::RParen)?;
            Some(expr)
        };

        let body = self.parse_statement()?;

        Ok(Statement::For(ForStatement {
            init,
            condition,
            post,
            body: body.into(),
            label: "".to_owned(),
        }))
    }

    fn parse_break_statement(&mut self) -> Result<Statement> {
        let pos = self.previous.pos;
        self.consume(&Token::Semicolon)?;
        Ok(Statement::Break(BreakStatement {
            label: "".to_owned(),
            pos,
        }))
    }

    fn parse_return_statement(&mut self) -> Result<Statement> {
        let pos = self.previous.pos;
        let expr = if self.is_next(&[Token::Semicolon]) {
            None
        } else {
            let expr = Some(self.parse_expression()?);
            self.consume(&Token::Semicolon)?;
            expr
        };
        Ok(Statement::Return(ReturnStatement { expr, pos }))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement> {
        let expr = self.parse_expression()?;
        self.consume(&Token::Semicolon)?;
        Ok(Statement::Expression(ExpressionStatement { expr }))
    }

    pub fn parse_expression(&mut self) -> Result<Expression> {
        self.comma()
    }

    fn comma(&mut self) -> Result<Expression> {
        let mut result = self.assignment()?;
        while self.is_next(&[Token::Comma]) {
            let pos = self.previous.pos;
            result = Expression::Comma(CommaExpression {
                lhs: result.into(),
                rhs: self.assignment()?.into(),
                _type: Type::Dummy,
                pos,
            });
        }
        Ok(result)
    }

    fn assignment(&mut self) -> Result<Expression> {
        let result = self.conditional()?;
        if self.is_next(&[
            Token::Equal,
            Token::PlusEqual,
            Token::HyphenEqual,
            Token::StarEqual,
            Token::SlashEqual,
            Token::PercentEqual,
            Token::AmpersandEqual,
            Token::PipeEqual,
            Token::CaretEqual,
            Token::DoubleLessEqual,
            Token::DoubleGreaterEqual,
        ]) {
            let pos = self.previous.pos;
            let op = match self.previous.token {
                Token::Equal => None,
                Token::PlusEqual => Some(BinaryExpressionKind::Add),
                Token::HyphenEqual => Some(BinaryExpressionKind::Sub),
                Token::StarEqual => Some(BinaryExpressionKind::Mul),
                Token::SlashEqual => Some(BinaryExpressionKind::Div),
                Token::PercentEqual => Some(BinaryExpressionKind::Rem),
                Token::AmpersandEqual => Some(BinaryExpressionKind::BitAnd),
                Token::PipeEqual => Some(BinaryExpressionKind::BitOr),
                Token::CaretEqual => Some(BinaryExpressionKind::BitXor),
                Token::DoubleLessEqual => Some(BinaryExpressionKind::ShiftLeft),
                Token::DoubleGreaterEqual => Some(BinaryExpressionKind::ShiftRight),
                _ => unreachable!(),
            };
            return Ok(Expression::Assign(AssignExpression {
                op,
                lhs: result.into(),
                rhs: self.assignment()?.into(),
                _type: Type::Dummy,
                pos,
            }));
        }
        Ok(result)
    }

    fn conditional(&mut self) -> Result<Expression> {
        let result = self.or()?;
        if self.is_next(&[Token::QuestionMark]) {
            let pos = self.previous.pos;
            let then_expr = self.parse_expression()?;
            self.consume(&Token::Colon)?;
            let else_expr = self.conditional()?;
            return Ok(Expression::Conditional(ConditionalExpression {
                condition: result.into(),
                then_expr: then_expr.into(),
                else_expr: else_expr.into(),
                _type: Type::Dummy,
                pos,
            }));
        }
        Ok(result)
    }

    fn binary_level(
        &mut self,
        operators: &[(Token, BinaryExpressionKind)],
        next: Level,
    ) -> Result<Expression> {
        let mut result = next(self)?;
        'outer: loop {
            for (token, kind) in operators {
                if self.is_next(std::slice::from_ref(token)) {
                    let pos = self.previous.pos;
                    result = Expression::Binary(BinaryExpression {
                        kind: *kind,
                        lhs: result.into(),
                        rhs: next(self)?.into(),
                        _type: Type::Dummy,
                        pos,
                    });
                    continue 'outer;
                }
            }
            return Ok(result);
        }
    }

    fn or(&mut self) -> Result<Expression> {
        self.binary_level(&[(Token::DoublePipe, BinaryExpressionKind::Or)], Parser::and)
    }

    fn and(&mut self) -> Result<Expression> {
        self.binary_level(
            &[(Token::DoubleAmpersand, BinaryExpressionKind::And)],
            Parser::bitwise_or,
        )
    }

    fn bitwise_or(&mut self) -> Result<Expression> {
        self.binary_level(
            &[(Token::Pipe, BinaryExpressionKind::BitOr)],
            Parser::bitwise_xor,
        )
    }

    fn bitwise_xor(&mut self) -> Result<Expression> {
        self.binary_level(
            &[(Token::Caret, BinaryExpressionKind::BitXor)],
            Parser::bitwise_and,
        )
    }

    fn bitwise_and(&mut self) -> Result<Expression> {
        self.binary_level(
            &[(Token::Ampersand, BinaryExpressionKind::BitAnd)],
            Parser::equality,
        )
    }

    fn equality(&mut self) -> Result<Expression> {
        self.binary_level(
            &[
                (Token::DoubleEqual, BinaryExpressionKind::Equal),
                (Token::BangEqual, BinaryExpressionKind::NotEqual),
            ],
            Parser::relational,
        )
    }

    fn relational(&mut self) -> Result<Expression> {
        self.binary_level(
            &[
                (Token::Less, BinaryExpressionKind::Less),
                (Token::Greater, BinaryExpressionKind::Greater),
                (Token::LessEqual, BinaryExpressionKind::LessEqual),
                (Token::GreaterEqual, BinaryExpressionKind::GreaterEqual),
            ],
            Parser::shift,
        )
    }

    fn shift(&mut self) -> Result<Expression> {
        self.binary_level(
            &[
                (Token::DoubleLess, BinaryExpressionKind::ShiftLeft),
                (Token::DoubleGreater, BinaryExpressionKind::ShiftRight),
            ],
            Parser::term,
        )
    }

    fn term(&mut self) -> Result<Expression> {
        self.binary_level(
            &[
                (Token::Plus, BinaryExpressionKind::Add),
                (Token::Hyphen, BinaryExpressionKind::Sub),
            ],
            Parser::factor,
        )
    }

    fn factor(&mut self) -> Result<Expression> {
        self.binary_level(
            &[
                (Token::Star, BinaryExpressionKind::Mul),
                (Token::Slash, BinaryExpressionKind::Div),
                (Token::Percent, BinaryExpressionKind::Rem),
            ],
            Parser::unary,
        )
    }

    fn unary(&mut self) -> Result<Expression> {
        let pos = self.current.pos;

        if self.is_next(&[Token::Hyphen, Token::Plus, Token::Tilde, Token::Bang]) {
            let kind = match self.previous.token {
                Token::Hyphen => UnaryExpressionKind::Negate,
                Token::Plus => UnaryExpressionKind::Plus,
                Token::Tilde => UnaryExpressionKind::Complement,
                Token::Bang => UnaryExpressionKind::Not,
                _ => unreachable!(),
            };
            let expr = self.unary()?;
            return Ok(Expression::Unary(UnaryExpression {
                kind,
                expr: expr.into(),
                _type: Type::Dummy,
                pos,
            }));
        }

        if self.is_next(&[Token::Star]) {
            let expr = self.unary()?;
            return Ok(Expression::Deref(DerefExpression {
                expr: expr.into(),
                _type: Type::Dummy,
                pos,
            }));
        }

        if self.is_next(&[Token::Ampersand]) {
            let expr = self.unary()?;
            return Ok(Expression::AddrOf(AddrOfExpression {
                expr: expr.into(),
                _type: Type::Dummy,
                pos,
            }));
        }

        if self.is_next(&[Token::DoublePlus, Token::DoubleHyphen]) {
            let op = match self.previous.token {
                Token::DoublePlus => BinaryExpressionKind::Add,
                _ => BinaryExpressionKind::Sub,
            };
            let expr = self.unary()?;
            return Ok(Expression::Assign(AssignExpression {
                op: Some(op),
                lhs: expr.into(),
                rhs: Expression::Constant(ConstantExpression {
                    value: 1,
                    _type: Type::Dummy,
                    pos,
                })
                .into(),
                _type: Type::Dummy,
                pos,
            }));
        }

        let next_three_tokens = self.peek(3);
        match next_three_tokens.as_slice() {
            [Token::Sizeof, Token::LParen, t] if self.is_type_specifier(t) => {
                self.consume(&Token::Sizeof)?;
                self.consume(&Token::LParen)?;
                let t = self.parse_type_name()?;
                self.consume(&Token::RParen)?;
                Ok(Expression::SizeofT(SizeofTExpression {
                    t,
                    _type: Type::Dummy,
                    pos,
                }))
            }
            [Token::Sizeof, ..] => {
                self.consume(&Token::Sizeof)?;
                let expr = self.unary()?;
                Ok(Expression::Sizeof(SizeofExpression {
                    expr: expr.into(),
                    _type: Type::Dummy,
                    pos,
                }))
            }
            [Token::LParen, t, ..] if self.is_type_specifier(t) => {
                self.consume(&Token::LParen)?;
                let target_type = self.parse_type_name()?;
                self.consume(&Token::RParen)?;
                let expr = self.unary()?;
                Ok(Expression::Cast(CastExpression {
                    target_type,
                    expr: expr.into(),
                    _type: Type::Dummy,
                    pos,
                }))
            }
            _ => self.postfix(),
        }
    }

    fn parse_type_name(&mut self) -> Result<Type> {
        let base_type = self.parse_type_specifier()?;
        if self.check(&Token::RParen) {
            return Ok(base_type);
        }
        let decl = self.parse_abstract_declarator()?;
        self.process_abstract_declarator(&decl, &base_type)
    }

    fn parse_abstract_declarator(&mut self) -> Result<AbstractDeclarator> {
        if self.is_next(&[Token::Star]) {
            let inner = if self.check_many(&[Token::Star, Token::LParen, Token::LBracket]) {
                self.parse_abstract_declarator()?
            } else {
                AbstractDeclarator::Base
            };
            Ok(AbstractDeclarator::Pointer(Box::new(inner)))
        } else {
            self.parse_direct_abstract_declarator()
        }
    }

    fn parse_direct_abstract_declarator(&mut self) -> Result<AbstractDeclarator> {
        let inner = if self.is_next(&[Token::LParen]) {
            let inner = self.parse_abstract_declarator()?;
            self.consume(&Token::RParen)?;
            if !self.check(&Token::LBracket) {
                return Ok(inner);
            }
            inner
        } else {
            AbstractDeclarator::Base
        };

        let mut decl = inner;
        loop {
            let pos = self.current.pos;
            match self.parse_dim()? {
                Some(size) => decl = AbstractDeclarator::Array(Box::new(decl), size),
                None => bail!(CompileError::type_error("array type without a size", pos)),
            }
            if !self.check(&Token::LBracket) {
                return Ok(decl);
            }
        }
    }

    fn process_abstract_declarator(
        &self,
        decl: &AbstractDeclarator,
        base_type: &Type,
    ) -> Result<Type> {
        match decl {
            AbstractDeclarator::Base => Ok(base_type.clone()),
            AbstractDeclarator::Pointer(inner) => {
                let derived_type = Type::Pointer(base_type.clone().into());
                self.process_abstract_declarator(inner, &derived_type)
            }
            AbstractDeclarator::Array(inner, size) => {
                let derived_type = Type::Array {
                    element: Box::new(base_type.clone()),
                    size: *size,
                };
                self.process_abstract_declarator(inner, &derived_type)
            }
        }
    }

    fn postfix(&mut self) -> Result<Expression> {
        let mut expr = self.primary()?;
        loop {
            if self.is_next(&[Token::LParen]) {
                let pos = self.previous.pos;
                let name = match expr {
                    Expression::Variable(var) => var.value,
                    _ => bail!(CompileError::parse(
                        "function name before `(`",
                        "expression",
                        pos
                    )),
                };
                let mut args = vec![];
                if !self.is_next(&[Token::RParen]) {
                    loop {
                        args.push(self.assignment()?);
                        if !self.is_next(&[Token::Comma]) {
                            break;
                        }
                    }
                    self.consume(&Token::RParen)?;
                }
                expr = Expression::Call(CallExpression {
                    name,
                    args,
                    _type: Type::Dummy,
                    pos,
                });
            } else if self.is_next(&[Token::LBracket]) {
                // a[i] is *(a + i); either operand may be the pointer.
                let pos = self.previous.pos;
                let index = self.parse_expression()?;
                self.consume(&Token::RBracket)?;
                expr = Expression::Deref(DerefExpression {
                    expr: Expression::Binary(BinaryExpression {
                        kind: BinaryExpressionKind::Add,
                        lhs: expr.into(),
                        rhs: index.into(),
                        _type: Type::Dummy,
                        pos,
                    })
                    .into(),
                    _type: Type::Dummy,
                    pos,
                });
            } else if self.is_next(&[Token::DoublePlus, Token::DoubleHyphen]) {
                let kind = match self.previous.token {
                    Token::DoublePlus => PostfixExpressionKind::Increment,
                    _ => PostfixExpressionKind::Decrement,
                };
                expr = Expression::Postfix(PostfixExpression {
                    kind,
                    expr: expr.into(),
                    _type: Type::Dummy,
                    pos: self.previous.pos,
                });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expression> {
        let pos = self.current.pos;
        match self.current.token.clone() {
            Token::Constant(value) => {
                self.advance();
                Ok(Expression::Constant(ConstantExpression {
                    value,
                    _type: Type::Dummy,
                    pos,
                }))
            }
            Token::CharLiteral(c) => {
                self.advance();
                Ok(Expression::Constant(ConstantExpression {
                    value: c as i32,
                    _type: Type::Dummy,
                    pos,
                }))
            }
            Token::StringLiteral(_) => self.parse_string(),
            Token::Identifier(value) => {
                self.advance();
                Ok(Expression::Variable(VariableExpression {
                    value,
                    _type: Type::Dummy,
                    pos,
                }))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume(&Token::RParen)?;
                Ok(expr)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_string(&mut self) -> Result<Expression> {
        let pos = self.current.pos;
        let mut value = String::new();
        while let Token::StringLiteral(s) = &self.current.token {
            value.push_str(s);
            self.advance();
        }
        Ok(Expression::String(StringExpression {
            value,
            _type: Type::Dummy,
            pos,
        }))
    }
}
