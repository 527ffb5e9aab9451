// clinqc-core/src/domain/dsl/token.rs

use miette::Diagnostic;
use thiserror::Error;

/// Malformed rule text. Carries the byte offset and the offending fragment
/// so the authoring UI can point at the exact spot.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
#[error("Syntax error at offset {offset} near '{fragment}': {message}")]
#[diagnostic(
    code(clinqc::dsl::syntax),
    help("The rule grammar is closed: only comparisons, and/or/not, in(...), between, \
          within, required, if/then/else/endif and the documented functions are accepted.")
)]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
    pub fragment: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, offset: usize, fragment: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset,
            fragment: fragment.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals & names
    Ident(String),
    Number(f64),
    Str(String),

    // Keywords
    And,
    Or,
    Not,
    If,
    Then,
    Else,
    EndIf,
    Between,
    In,
    Within,
    Of,
    Days,
    Required,

    // Operators
    Eq,    // ==
    Ne,    // !=
    Lt,    // <
    Le,    // <=
    Gt,    // >
    Ge,    // >=
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    At,

    // Punctuation
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    /// Slice of the source this token came from (for error messages).
    pub text: String,
}

/// Tokenize rule text. Rejects anything outside the closed grammar with
/// position information. Keywords are case-insensitive; identifiers keep
/// their original casing.
pub fn tokenize(src: &str) -> Result<Vec<Token>, SyntaxError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        // Identifiers & keywords
        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() {
                let c2 = bytes[i] as char;
                if c2.is_ascii_alphanumeric() || c2 == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            let word = &src[start..i];
            let kind = match word.to_ascii_lowercase().as_str() {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                "if" => TokenKind::If,
                "then" => TokenKind::Then,
                "else" => TokenKind::Else,
                "endif" => TokenKind::EndIf,
                "between" => TokenKind::Between,
                "in" => TokenKind::In,
                "within" => TokenKind::Within,
                "of" => TokenKind::Of,
                "days" => TokenKind::Days,
                "required" => TokenKind::Required,
                _ => TokenKind::Ident(word.to_string()),
            };
            tokens.push(Token {
                kind,
                offset: start,
                text: word.to_string(),
            });
            continue;
        }

        // Numbers (integer or decimal)
        if c.is_ascii_digit() {
            let mut seen_dot = false;
            while i < bytes.len() {
                let c2 = bytes[i] as char;
                if c2.is_ascii_digit() {
                    i += 1;
                } else if c2 == '.' && !seen_dot {
                    seen_dot = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let raw = &src[start..i];
            let value: f64 = raw
                .parse()
                .map_err(|_| SyntaxError::new("invalid number literal", start, raw))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset: start,
                text: raw.to_string(),
            });
            continue;
        }

        // String literals: single quotes, '' escapes a quote (SQL style).
        // Only the quote byte is inspected, the content is copied as &str
        // slices so multi-byte characters round-trip intact.
        if c == '\'' {
            i += 1;
            let mut value = String::new();
            let mut segment = i;
            let mut closed = false;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    value.push_str(&src[segment..i]);
                    if bytes.get(i + 1) == Some(&b'\'') {
                        value.push('\'');
                        i += 2;
                        segment = i;
                    } else {
                        i += 1;
                        closed = true;
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            if !closed {
                return Err(SyntaxError::new(
                    "unterminated string literal",
                    start,
                    &src[start..],
                ));
            }
            tokens.push(Token {
                kind: TokenKind::Str(value),
                offset: start,
                text: src[start..i].to_string(),
            });
            continue;
        }

        // Operators & punctuation. Le lookahead de deux octets ne doit pas
        // couper un caractère multi-octets en deux.
        let two = if i + 1 < bytes.len() && src.is_char_boundary(i + 2) {
            &src[i..i + 2]
        } else {
            ""
        };
        let (kind, len) = match two {
            "==" => (TokenKind::Eq, 2),
            "!=" => (TokenKind::Ne, 2),
            "<=" => (TokenKind::Le, 2),
            ">=" => (TokenKind::Ge, 2),
            _ => match c {
                '<' => (TokenKind::Lt, 1),
                '>' => (TokenKind::Gt, 1),
                '+' => (TokenKind::Plus, 1),
                '-' => (TokenKind::Minus, 1),
                '*' => (TokenKind::Star, 1),
                '/' => (TokenKind::Slash, 1),
                '%' => (TokenKind::Percent, 1),
                '@' => (TokenKind::At, 1),
                '(' => (TokenKind::LParen, 1),
                ')' => (TokenKind::RParen, 1),
                ',' => (TokenKind::Comma, 1),
                '=' => {
                    return Err(SyntaxError::new(
                        "unknown token '=' (did you mean '==' ?)",
                        start,
                        "=",
                    ));
                }
                _ => {
                    // Décodé depuis la source, pas depuis l'octet : un
                    // caractère multi-octets est rapporté entier.
                    let ch = src[start..].chars().next().unwrap_or(c);
                    return Err(SyntaxError::new(
                        format!("unknown token '{}'", ch),
                        start,
                        ch.to_string(),
                    ));
                }
            },
        };
        tokens.push(Token {
            kind,
            offset: start,
            text: src[start..start + len].to_string(),
        });
        i = start + len;
    }

    Ok(tokens)
}
