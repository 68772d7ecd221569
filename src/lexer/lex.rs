use crate::error::CompileError;
use crate::lexer::util::{parse_integer, unescape};
use anyhow::{bail, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::VecDeque;
use std::fmt;

lazy_static! {
    static ref PUNCTUATION_TRIPLE_RE: Regex = Regex::new(r"^(<<=|>>=)").unwrap();
    static ref PUNCTUATION_DOUBLE_RE: Regex =
        Regex::new(r"^(==|!=|<=|>=|&&|\|\||<<|>>|\+=|-=|\*=|/=|%=|&=|\|=|\^=|\+\+|--)").unwrap();
    static ref PUNCTUATION_RE: Regex = Regex::new(r"^[-+*/%&|^~!<>=?:,;(){}\[\]]").unwrap();
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").unwrap();
    static ref CONSTANT_RE: Regex = Regex::new(r"^[0-9]+").unwrap();
    static ref CHAR_CONST_RE: Regex = Regex::new(r"^'([^'\\\n]|\\.)'").unwrap();
    static ref MULTI_CHAR_RE: Regex = Regex::new(r"^'([^'\\\n]|\\.){2,}'").unwrap();
    static ref STRING_RE: Regex = Regex::new(r#"^"([^"\\\n]|\\.)*""#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub token: Token,
    pub pos: usize,
}

// Yields one `Token::Eof` and then stops; also stops after the first error.
#[derive(Debug, Clone)]
pub struct Lexer {
    src: String,
    pos: usize,
    done: bool,
}

impl Lexer {
    pub fn new(src: impl Into<String>) -> Lexer {
        Lexer {
            src: src.into(),
            pos: 0,
            done: false,
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            let rest = &self.src[self.pos..];
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                self.pos += trimmed.find('\n').unwrap_or(trimmed.len());
            } else if trimmed.starts_with("/*") {
                match trimmed[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => bail!(CompileError::lex("unterminated comment", self.pos)),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn scan(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments()?;

        let src = &self.src[self.pos..];
        let start = self.pos;

        let token = if src.is_empty() {
            Token::Eof
        } else if let Some(m) = PUNCTUATION_TRIPLE_RE.find(src) {
            self.pos += m.as_str().len();
            match m.as_str() {
                "<<=" => Token::DoubleLessEqual,
                ">>=" => Token::DoubleGreaterEqual,
                _ => unreachable!(),
            }
        } else if let Some(m) = PUNCTUATION_DOUBLE_RE.find(src) {
            self.pos += m.as_str().len();
            match m.as_str() {
                "==" => Token::DoubleEqual,
                "!=" => Token::BangEqual,
                "<=" => Token::LessEqual,
                ">=" => Token::GreaterEqual,
                "&&" => Token::DoubleAmpersand,
                "||" => Token::DoublePipe,
                "<<" => Token::DoubleLess,
                ">>" => Token::DoubleGreater,
                "+=" => Token::PlusEqual,
                "-=" => Token::HyphenEqual,
                "*=" => Token::StarEqual,
                "/=" => Token::SlashEqual,
                "%=" => Token::PercentEqual,
                "&=" => Token::AmpersandEqual,
                "|=" => Token::PipeEqual,
                "^=" => Token::CaretEqual,
                "++" => Token::DoublePlus,
                "--" => Token::DoubleHyphen,
                _ => unreachable!(),
            }
        } else if let Some(m) = PUNCTUATION_RE.find(src) {
            self.pos += m.as_str().len();
            match m.as_str() {
                "+" => Token::Plus,
                "-" => Token::Hyphen,
                "*" => Token::Star,
                "/" => Token::Slash,
                "%" => Token::Percent,
                "&" => Token::Ampersand,
                "|" => Token::Pipe,
                "^" => Token::Caret,
                "~" => Token::Tilde,
                "!" => Token::Bang,
                "<" => Token::Less,
                ">" => Token::Greater,
                "=" => Token::Equal,
                "?" => Token::QuestionMark,
                ":" => Token::Colon,
                "," => Token::Comma,
                ";" => Token::Semicolon,
                "(" => Token::LParen,
                ")" => Token::RParen,
                "{" => Token::LBrace,
                "}" => Token::RBrace,
                "[" => Token::LBracket,
                "]" => Token::RBracket,
                _ => unreachable!(),
            }
        } else if let Some(m) = IDENTIFIER_RE.find(src) {
            self.pos += m.as_str().len();
            match m.as_str() {
                "int" => Token::Int,
                "char" => Token::Char,
                "void" => Token::Void,
                "return" => Token::Return,
                "if" => Token::If,
                "else" => Token::Else,
                "while" => Token::While,
                "for" => Token::For,
                "break" => Token::Break,
                "sizeof" => Token::Sizeof,
                ident => Token::Identifier(ident.to_owned()),
            }
        } else if let Some(m) = CONSTANT_RE.find(src) {
            self.pos += m.as_str().len();

            if let Some(ch) = self.src[self.pos..].chars().next() {
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    bail!(CompileError::UnexpectedChar { ch, pos: self.pos });
                }
            }

            Token::Constant(parse_integer(m.as_str(), start)?)
        } else if let Some(m) = CHAR_CONST_RE.find(src) {
            self.pos += m.as_str().len();
            let body = &m.as_str()[1..m.as_str().len() - 1];
            let ch = unescape(body, start)?.chars().next().unwrap_or('\0');
            Token::CharLiteral(ch)
        } else if let Some(m) = STRING_RE.find(src) {
            self.pos += m.as_str().len();
            let body = &m.as_str()[1..m.as_str().len() - 1];
            Token::StringLiteral(unescape(body, start)?)
        } else {
            let ch = src.chars().next().unwrap_or('\0');
            if MULTI_CHAR_RE.is_match(src) {
                bail!(CompileError::lex("multi-character character constant", start));
            }
            if src.starts_with("''") {
                bail!(CompileError::lex("empty character constant", start));
            }
            if ch == '"' || ch == '\'' {
                bail!(CompileError::lex("unterminated literal", start));
            }
            bail!(CompileError::UnexpectedChar { ch, pos: start });
        };

        Ok(token)
    }
}

impl Iterator for Lexer {
    type Item = Result<Lexeme>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start = self.pos;
        match self.scan() {
            Ok(token) => {
                if token == Token::Eof {
                    self.done = true;
                }
                let pos = if token == Token::Eof {
                    self.pos
                } else {
                    start + leading_trivia(&self.src[start..])
                };
                Some(Ok(Lexeme { token, pos }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn leading_trivia(src: &str) -> usize {
    let mut scanner = Lexer::new(src);
    match scanner.skip_whitespace_and_comments() {
        Ok(()) => scanner.pos,
        Err(_) => 0,
    }
}

pub fn tokenize(src: &str) -> Result<VecDeque<Lexeme>> {
    let tokens = Lexer::new(src).collect::<Result<VecDeque<_>>>()?;
    debug!("lexed {} tokens", tokens.len());
    Ok(tokens)
}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum Token {
    Int,
    Char,
    Void,
    Return,
    If,
    Else,
    While,
    For,
    Break,
    Sizeof,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Plus,
    Hyphen,
    Star,
    Slash,
    Percent,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    Bang,
    QuestionMark,
    Colon,
    Less,
    Greater,
    Equal,
    Comma,
    Semicolon,
    DoubleEqual,
    BangEqual,
    LessEqual,
    GreaterEqual,
    DoubleAmpersand,
    DoublePipe,
    DoubleLess,
    DoubleGreater,
    PlusEqual,
    HyphenEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    AmpersandEqual,
    PipeEqual,
    CaretEqual,
    DoubleLessEqual,
    DoubleGreaterEqual,
    DoublePlus,
    DoubleHyphen,
    Identifier(String),
    Constant(i32),
    CharLiteral(char),
    StringLiteral(String),
    Eof,
}

impl Token {
    pub fn as_string(&self) -> String {
        match self {
            Token::Identifier(s) => s.to_owned(),
            _ => unreachable!(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Identifier(name) => return write!(f, "identifier `{}`", name),
            Token::Constant(n) => return write!(f, "integer literal `{}`", n),
            Token::CharLiteral(c) => return write!(f, "character literal {:?}", c),
            Token::StringLiteral(s) => return write!(f, "string literal {:?}", s),
            Token::Eof => return write!(f, "end of input"),
            Token::Int => "int",
            Token::Char => "char",
            Token::Void => "void",
            Token::Return => "return",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::Break => "break",
            Token::Sizeof => "sizeof",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Plus => "+",
            Token::Hyphen => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Ampersand => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Bang => "!",
            Token::QuestionMark => "?",
            Token::Colon => ":",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Equal => "=",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::DoubleEqual => "==",
            Token::BangEqual => "!=",
            Token::LessEqual => "<=",
            Token::GreaterEqual => ">=",
            Token::DoubleAmpersand => "&&",
            Token::DoublePipe => "||",
            Token::DoubleLess => "<<",
            Token::DoubleGreater => ">>",
            Token::PlusEqual => "+=",
            Token::HyphenEqual => "-=",
            Token::StarEqual => "*=",
            Token::SlashEqual => "/=",
            Token::PercentEqual => "%=",
            Token::AmpersandEqual => "&=",
            Token::PipeEqual => "|=",
            Token::CaretEqual => "^=",
            Token::DoubleLessEqual => "<<=",
            Token::DoubleGreaterEqual => ">>=",
            Token::DoublePlus => "++",
            Token::DoubleHyphen => "--",
        };
        write!(f, "`{}`", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|lexeme| lexeme.token)
            .collect()
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("a<<=b>>c<=d"),
            vec![
                Token::Identifier("a".into()),
                Token::DoubleLessEqual,
                Token::Identifier("b".into()),
                Token::DoubleGreater,
                Token::Identifier("c".into()),
                Token::LessEqual,
                Token::Identifier("d".into()),
                Token::Eof,
            ]
        );
        assert_eq!(
            kinds("s*=s%=39"),
            vec![
                Token::Identifier("s".into()),
                Token::StarEqual,
                Token::Identifier("s".into()),
                Token::PercentEqual,
                Token::Constant(39),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comments_emit_no_tokens() {
        let src = "// single line\nint /* multi\n line */ x; // trailing";
        assert_eq!(
            kinds(src),
            vec![
                Token::Int,
                Token::Identifier("x".into()),
                Token::Semicolon,
                Token::Eof
            ]
        );
    }

    #[test]
    fn keywords_are_not_identifier_prefixes() {
        assert_eq!(
            kinds("int integer for_each"),
            vec![
                Token::Int,
                Token::Identifier("integer".into()),
                Token::Identifier("for_each".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn literals_are_unescaped() {
        assert_eq!(
            kinds(r#"'a' '\n' "%d: \"ok\"\n""#),
            vec![
                Token::CharLiteral('a'),
                Token::CharLiteral('\n'),
                Token::StringLiteral("%d: \"ok\"\n".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn positions_skip_trivia() {
        let tokens = tokenize("  x /* c */ = 1;").unwrap();
        let positions: Vec<_> = tokens.iter().map(|l| l.pos).collect();
        assert_eq!(positions, vec![2, 12, 14, 15, 16]);
    }

    #[test]
    fn unrecognized_character_is_reported_with_position() {
        let err = tokenize("int x = 3 @ 4;").unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>(),
            Some(&CompileError::UnexpectedChar { ch: '@', pos: 10 })
        );
    }

    #[test]
    fn unterminated_comment_is_a_lex_error() {
        let err = tokenize("int x; /* never closed").unwrap_err();
        let err = err.downcast_ref::<CompileError>().unwrap();
        assert_eq!(err.class(), "LexError");
        assert_eq!(err.pos(), 7);
    }

    #[test]
    fn malformed_char_constants_are_named() {
        for (src, message) in [
            ("x = 'ab';", "multi-character character constant"),
            ("x = '\\nq';", "multi-character character constant"),
            ("x = '';", "empty character constant"),
            ("x = 'a;", "unterminated literal"),
        ] {
            let err = tokenize(src).unwrap_err();
            assert_eq!(
                err.downcast_ref::<CompileError>(),
                Some(&CompileError::lex(message, 4)),
                "{}",
                src
            );
        }
    }

    #[test]
    fn lexer_restarts_from_a_clone() {
        let mut lexer = Lexer::new("a + b");
        lexer.next();
        let restarted: Vec<_> = lexer
            .clone()
            .map(|lexeme| lexeme.unwrap().token)
            .collect();
        let original: Vec<_> = lexer.map(|lexeme| lexeme.unwrap().token).collect();
        assert_eq!(restarted, original);
        assert_eq!(restarted.len(), 3);
    }
}
