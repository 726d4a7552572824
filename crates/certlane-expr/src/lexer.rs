//! Tokenizer for resource requirement expressions.

use crate::ResourceEvaluationError;

/// A lexical token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Job name or attribute name
    Ident(String),
    /// Quoted string literal (quotes removed, escapes resolved)
    Str(String),
    /// Numeric literal
    Num(f64),
    True,
    False,
    And,
    Or,
    Not,
    In,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    End,
}

impl TokenKind {
    /// Short human readable form used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("name '{}'", name),
            TokenKind::Str(s) => format!("string '{}'", s),
            TokenKind::Num(n) => format!("number {}", n),
            TokenKind::True => "True".to_string(),
            TokenKind::False => "False".to_string(),
            TokenKind::And => "'and'".to_string(),
            TokenKind::Or => "'or'".to_string(),
            TokenKind::Not => "'not'".to_string(),
            TokenKind::In => "'in'".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::Eq => "'=='".to_string(),
            TokenKind::Ne => "'!='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Le => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Ge => "'>='".to_string(),
            TokenKind::End => "end of expression".to_string(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

// Job names routinely contain '-' and '/', e.g. `usb/detect` or `cpu-info`.
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/'
}

/// Split an expression into tokens. The returned list always ends with
/// [`TokenKind::End`].
pub fn tokenize(text: &str) -> Result<Vec<Token>, ResourceEvaluationError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match c {
            '.' => Some(TokenKind::Dot),
            ',' => Some(TokenKind::Comma),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            _ => None,
        };
        // A dot directly followed by a digit is a decimal like `.5`
        let dot_number = c == '.' && matches!(chars.get(i + 1), Some((_, d)) if d.is_ascii_digit());
        if let Some(kind) = single {
            if !dot_number {
                tokens.push(Token { kind, offset });
                i += 1;
                continue;
            }
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let comparison = match (c, next) {
            ('=', Some('=')) => Some((TokenKind::Eq, 2)),
            ('!', Some('=')) => Some((TokenKind::Ne, 2)),
            ('<', Some('=')) => Some((TokenKind::Le, 2)),
            ('>', Some('=')) => Some((TokenKind::Ge, 2)),
            ('<', _) => Some((TokenKind::Lt, 1)),
            ('>', _) => Some((TokenKind::Gt, 1)),
            ('=', _) => {
                return Err(ResourceEvaluationError::new(
                    offset,
                    "single '=' is not a comparison, use '=='",
                ))
            }
            _ => None,
        };
        if let Some((kind, width)) = comparison {
            tokens.push(Token { kind, offset });
            i += width;
            continue;
        }

        if c == '\'' || c == '"' {
            let (value, consumed) = read_string(&chars[i..], offset)?;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                offset,
            });
            i += consumed;
            continue;
        }

        let signed_number = c == '-' && matches!(next, Some(d) if d.is_ascii_digit() || d == '.');
        if c.is_ascii_digit() || dot_number || signed_number {
            i += 1;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let end = chars.get(i).map(|(o, _)| *o).unwrap_or(text.len());
            let literal = &text[offset..end];
            let value: f64 = literal.parse().map_err(|_| {
                ResourceEvaluationError::new(offset, format!("invalid number '{}'", literal))
            })?;
            tokens.push(Token {
                kind: TokenKind::Num(value),
                offset,
            });
            continue;
        }

        if is_ident_start(c) {
            i += 1;
            while i < chars.len() && is_ident_continue(chars[i].1) {
                i += 1;
            }
            let end = chars.get(i).map(|(o, _)| *o).unwrap_or(text.len());
            let word = &text[offset..end];
            let kind = match word {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                "in" => TokenKind::In,
                "True" | "true" => TokenKind::True,
                "False" | "false" => TokenKind::False,
                _ => TokenKind::Ident(word.to_string()),
            };
            tokens.push(Token { kind, offset });
            continue;
        }

        return Err(ResourceEvaluationError::new(
            offset,
            format!("unexpected character '{}'", c),
        ));
    }

    tokens.push(Token {
        kind: TokenKind::End,
        offset: text.len(),
    });
    Ok(tokens)
}

/// Read a quoted string starting at `chars[0]`. Returns the unescaped value
/// and the number of chars consumed including both quotes.
fn read_string(
    chars: &[(usize, char)],
    offset: usize,
) -> Result<(String, usize), ResourceEvaluationError> {
    let quote = chars[0].1;
    let mut value = String::new();
    let mut i = 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == '\\' {
            let escaped = chars.get(i + 1).map(|(_, c)| *c).ok_or_else(|| {
                ResourceEvaluationError::new(offset, "unterminated string literal")
            })?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((value, i + 1));
        }
        value.push(c);
        i += 1;
    }

    Err(ResourceEvaluationError::new(
        offset,
        "unterminated string literal",
    ))
}
