use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("LexError: unrecognized character {ch:?}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("LexError: {message}")]
    Lex { message: String, pos: usize },

    #[error("ParseError: expected {expected}, found {found}")]
    Parse {
        expected: String,
        found: String,
        pos: usize,
    },

    #[error("TypeError: {message}")]
    Type { message: String, pos: usize },

    #[error("StaticError: {message}")]
    Static { message: String, pos: usize },
}

impl CompileError {
    pub fn lex(message: impl Into<String>, pos: usize) -> Self {
        CompileError::Lex {
            message: message.into(),
            pos,
        }
    }

    pub fn parse(expected: impl Into<String>, found: impl Into<String>, pos: usize) -> Self {
        CompileError::Parse {
            expected: expected.into(),
            found: found.into(),
            pos,
        }
    }

    pub fn type_error(message: impl Into<String>, pos: usize) -> Self {
        CompileError::Type {
            message: message.into(),
            pos,
        }
    }

    pub fn static_error(message: impl Into<String>, pos: usize) -> Self {
        CompileError::Static {
            message: message.into(),
            pos,
        }
    }

    pub fn pos(&self) -> usize {
        match self {
            CompileError::UnexpectedChar { pos, .. }
            | CompileError::Lex { pos, .. }
            | CompileError::Parse { pos, .. }
            | CompileError::Type { pos, .. }
            | CompileError::Static { pos, .. } => *pos,
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            CompileError::UnexpectedChar { .. } | CompileError::Lex { .. } => "LexError",
            CompileError::Parse { .. } => "ParseError",
            CompileError::Type { .. } => "TypeError",
            CompileError::Static { .. } => "StaticError",
        }
    }

    pub fn render(&self, src: &str, path: &str) -> String {
        let (line, col) = line_col(src, self.pos());
        let text = src.lines().nth(line - 1).unwrap_or("");

        format!(
            "{}:{}:{}: {}\n  {}\n  {}^",
            path,
            line,
            col,
            self,
            text,
            " ".repeat(col - 1)
        )
    }
}

pub fn line_col(src: &str, pos: usize) -> (usize, usize) {
    let pos = pos.min(src.len());
    let before = &src[..pos];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = before[line_start..].chars().count() + 1;
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_one() {
        let src = "int a;\nint b = @;\n";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 15), (2, 9));
        assert_eq!(line_col(src, 1000), (3, 1));
    }

    #[test]
    fn render_points_at_column() {
        let src = "int main() {\n  return $;\n}\n";
        let err = CompileError::UnexpectedChar { ch: '$', pos: 22 };
        let rendered = err.render(src, "t.c");

        assert!(rendered.starts_with("t.c:2:10: LexError: unrecognized character '$'"));
        assert!(rendered.ends_with("\n           ^"));
        assert_eq!(err.class(), "LexError");
    }
}
