use crate::error::CompileError;
use anyhow::{bail, Result};

pub fn parse_integer(just_number: &str, pos: usize) -> Result<i32> {
    match just_number.parse::<i64>().ok().and_then(|n| i32::try_from(n).ok()) {
        Some(n) => Ok(n),
        None => bail!(CompileError::lex(
            format!("integer literal {} does not fit in int", just_number),
            pos
        )),
    }
}

pub fn unescape(body: &str, pos: usize) -> Result<String> {
    let mut result = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }

        let escaped = match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('a') => '\x07',
            Some('b') => '\x08',
            Some('f') => '\x0c',
            Some('v') => '\x0b',
            Some('\\') => '\\',
            Some('\'') => '\'',
            Some('"') => '"',
            Some('?') => '?',
            Some(other) => bail!(CompileError::lex(
                format!("unknown escape sequence '\\{}'", other),
                pos
            )),
            None => bail!(CompileError::lex("dangling backslash in literal", pos)),
        };

        result.push(escaped);
    }

    Ok(result)
}
