//! Hand-written token scanner for the expression language.

use std::sync::Arc;

use num_bigint::BigInt;

use crate::{
    error::{EvalError, EvalResult},
    span::Span,
};

/// A token kind. Word operators (`and`, `or`, `not`, `eq`, `ne`, `lt`,
/// `le`, `gt`, `ge`) lex directly to their symbolic counterparts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Int(i64),
    Big(BigInt),
    Real(f64),
    Str(Arc<str>),
    Ident(Arc<str>),

    // keywords
    Var,
    Let,
    Const,
    If,
    Else,
    While,
    Do,
    For,
    Return,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    Switch,
    Case,
    Default,
    New,
    Function,
    True,
    False,
    Null,
    Empty,
    Size,
    Pragma,

    // operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    SarAssign,
    ShruAssign,
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Coalesce,
    Question,
    Elvis,
    QDot,
    QBracket,
    Colon,
    Shl,
    Sar,
    Shru,
    PlusPlus,
    MinusMinus,
    Match,
    NotMatch,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Dot,
    DotDot,
    Comma,
    Semi,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Arrow,
    FatArrow,
    At,
    Eof,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub span: Span,
}

/// Scans the whole source into a token vector ending with `Eof`.
pub(crate) fn scan(source: &str) -> EvalResult<Vec<Token>> {
    let mut lexer = Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.tok == Tok::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'s> {
    source: &'s str,
    bytes: &'s [u8],
    pos: usize,
}

impl Lexer<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, at: usize, message: impl Into<String>) -> EvalError {
        EvalError::parse(message).located(Span::new(at as u32, self.pos.max(at + 1).min(self.source.len()) as u32), self.source)
    }

    fn skip_trivia(&mut self) -> EvalResult<()> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(_) => self.pos += 1,
                            None => return Err(self.error(start, "unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> EvalResult<Token> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(Token {
                tok: Tok::Eof,
                span: Span::new(start as u32, start as u32),
            });
        };
        let tok = match c {
            b'0'..=b'9' => return self.number(),
            b'\'' | b'"' => return self.string(c),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' => return Ok(self.word()),
            b'#' => {
                self.pos += 1;
                let word_start = self.pos;
                while matches!(self.peek(), Some(b'a'..=b'z')) {
                    self.pos += 1;
                }
                if &self.source[word_start..self.pos] == "pragma" {
                    Tok::Pragma
                } else {
                    return Err(self.error(start, "expected '#pragma'"));
                }
            }
            b'+' => self.take(&[(b"+=", Tok::PlusAssign), (b"++", Tok::PlusPlus)], Tok::Plus),
            b'-' => self.take(
                &[(b"-=", Tok::MinusAssign), (b"--", Tok::MinusMinus), (b"->", Tok::Arrow)],
                Tok::Minus,
            ),
            b'*' => self.take(&[(b"*=", Tok::StarAssign)], Tok::Star),
            b'/' => self.take(&[(b"/=", Tok::SlashAssign)], Tok::Slash),
            b'%' => self.take(&[(b"%=", Tok::PercentAssign)], Tok::Percent),
            b'&' => self.take(&[(b"&&", Tok::AndAnd), (b"&=", Tok::AmpAssign)], Tok::Amp),
            b'|' => self.take(&[(b"||", Tok::OrOr), (b"|=", Tok::PipeAssign)], Tok::Pipe),
            b'^' => self.take(&[(b"^=", Tok::CaretAssign)], Tok::Caret),
            b'~' => self.take(&[], Tok::Tilde),
            b'!' => self.take(
                &[
                    (b"!=", Tok::BangEq),
                    (b"!~", Tok::NotMatch),
                    (b"!^", Tok::NotStartsWith),
                    (b"!$", Tok::NotEndsWith),
                ],
                Tok::Bang,
            ),
            b'=' => self.take(
                &[
                    (b"==", Tok::EqEq),
                    (b"=~", Tok::Match),
                    (b"=^", Tok::StartsWith),
                    (b"=$", Tok::EndsWith),
                    (b"=>", Tok::FatArrow),
                ],
                Tok::Assign,
            ),
            b'<' => self.take(&[(b"<<=", Tok::ShlAssign), (b"<<", Tok::Shl), (b"<=", Tok::Le)], Tok::Lt),
            b'>' => self.take(
                &[
                    (b">>>=", Tok::ShruAssign),
                    (b">>>", Tok::Shru),
                    (b">>=", Tok::SarAssign),
                    (b">>", Tok::Sar),
                    (b">=", Tok::Ge),
                ],
                Tok::Gt,
            ),
            b'?' => self.take(
                &[
                    (b"??", Tok::Coalesce),
                    (b"?:", Tok::Elvis),
                    (b"?.", Tok::QDot),
                    (b"?[", Tok::QBracket),
                ],
                Tok::Question,
            ),
            b':' => self.take(&[], Tok::Colon),
            b'.' => self.take(&[(b"..", Tok::DotDot)], Tok::Dot),
            b',' => self.take(&[], Tok::Comma),
            b';' => self.take(&[], Tok::Semi),
            b'(' => self.take(&[], Tok::LParen),
            b')' => self.take(&[], Tok::RParen),
            b'[' => self.take(&[], Tok::LBracket),
            b']' => self.take(&[], Tok::RBracket),
            b'{' => self.take(&[], Tok::LBrace),
            b'}' => self.take(&[], Tok::RBrace),
            b'@' => self.take(&[], Tok::At),
            other => return Err(self.error(start, format!("unexpected character '{}'", other as char))),
        };
        Ok(Token {
            tok,
            span: Span::new(start as u32, self.pos as u32),
        })
    }

    /// Matches the longest alternative at the current position, falling
    /// back to the single-character token.
    fn take(&mut self, options: &[(&[u8], Tok)], single: Tok) -> Tok {
        for (text, tok) in options {
            if self.bytes[self.pos..].starts_with(text) {
                self.pos += text.len();
                return tok.clone();
            }
        }
        self.pos += 1;
        single
    }

    fn word(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'$')) {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        let tok = match text {
            "var" => Tok::Var,
            "let" => Tok::Let,
            "const" => Tok::Const,
            "if" => Tok::If,
            "else" => Tok::Else,
            "while" => Tok::While,
            "do" => Tok::Do,
            "for" => Tok::For,
            "return" => Tok::Return,
            "break" => Tok::Break,
            "continue" => Tok::Continue,
            "throw" => Tok::Throw,
            "try" => Tok::Try,
            "catch" => Tok::Catch,
            "finally" => Tok::Finally,
            "switch" => Tok::Switch,
            "case" => Tok::Case,
            "default" => Tok::Default,
            "new" => Tok::New,
            "function" => Tok::Function,
            "true" => Tok::True,
            "false" => Tok::False,
            "null" => Tok::Null,
            "empty" => Tok::Empty,
            "size" => Tok::Size,
            "and" => Tok::AndAnd,
            "or" => Tok::OrOr,
            "not" => Tok::Bang,
            "eq" => Tok::EqEq,
            "ne" => Tok::BangEq,
            "lt" => Tok::Lt,
            "le" => Tok::Le,
            "gt" => Tok::Gt,
            "ge" => Tok::Ge,
            _ => Tok::Ident(Arc::from(text)),
        };
        Token {
            tok,
            span: Span::new(start as u32, self.pos as u32),
        }
    }

    fn number(&mut self) -> EvalResult<Token> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let mut real = false;
        // a '.' continues the number only when a digit follows, so ranges
        // like 1..3 lex as Int DotDot Int
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            real = true;
            self.pos += 1;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E'))
            && (matches!(self.peek_at(1), Some(b'0'..=b'9'))
                || (matches!(self.peek_at(1), Some(b'+' | b'-')) && matches!(self.peek_at(2), Some(b'0'..=b'9'))))
        {
            real = true;
            self.pos += 2;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        let digits = &self.source[start..self.pos];
        let suffix = match self.peek() {
            Some(s @ (b'b' | b'B' | b'l' | b'L' | b'f' | b'F' | b'd' | b'D')) => {
                self.pos += 1;
                Some(s.to_ascii_lowercase())
            }
            _ => None,
        };
        let span = Span::new(start as u32, self.pos as u32);
        let tok = match suffix {
            Some(b'b') => {
                if real {
                    return Err(self.error(start, "big integer literal cannot have a fraction"));
                }
                match digits.parse::<BigInt>() {
                    Ok(big) => Tok::Big(big),
                    Err(_) => return Err(self.error(start, "malformed integer literal")),
                }
            }
            Some(b'f' | b'd') => match digits.parse::<f64>() {
                Ok(r) => Tok::Real(r),
                Err(_) => return Err(self.error(start, "malformed number literal")),
            },
            _ if real => match digits.parse::<f64>() {
                Ok(r) => Tok::Real(r),
                Err(_) => return Err(self.error(start, "malformed number literal")),
            },
            // plain or 'l': i64, promoting to a big literal on overflow
            _ => match digits.parse::<i64>() {
                Ok(i) => Tok::Int(i),
                Err(_) => match digits.parse::<BigInt>() {
                    Ok(big) => Tok::Big(big),
                    Err(_) => return Err(self.error(start, "malformed integer literal")),
                },
            },
        };
        Ok(Token { tok, span })
    }

    fn string(&mut self, quote: u8) -> EvalResult<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error(start, "unterminated string"));
            };
            if c == quote {
                self.pos += 1;
                break;
            }
            if c == b'\\' {
                self.pos += 1;
                let Some(escape) = self.peek() else {
                    return Err(self.error(start, "unterminated string"));
                };
                match escape {
                    b'n' => text.push('\n'),
                    b't' => text.push('\t'),
                    b'r' => text.push('\r'),
                    b'\\' => text.push('\\'),
                    b'\'' => text.push('\''),
                    b'"' => text.push('"'),
                    b'u' => {
                        let hex_start = self.pos + 1;
                        let hex_end = hex_start + 4;
                        let Some(hex) = self.source.get(hex_start..hex_end) else {
                            return Err(self.error(start, "truncated unicode escape"));
                        };
                        let Some(ch) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) else {
                            return Err(self.error(start, "invalid unicode escape"));
                        };
                        text.push(ch);
                        self.pos += 4;
                    }
                    other => return Err(self.error(start, format!("unknown escape '\\{}'", other as char))),
                }
                self.pos += 1;
                continue;
            }
            // consume one UTF-8 scalar
            let ch_len = self.source[self.pos..].chars().next().map_or(1, char::len_utf8);
            text.push_str(&self.source[self.pos..self.pos + ch_len]);
            self.pos += ch_len;
        }
        Ok(Token {
            tok: Tok::Str(Arc::from(text.as_str())),
            span: Span::new(start as u32, self.pos as u32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        scan(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn ranges_do_not_eat_the_dots() {
        assert_eq!(
            kinds("1..3"),
            vec![Tok::Int(1), Tok::DotDot, Tok::Int(3), Tok::Eof]
        );
        assert_eq!(kinds("1.5"), vec![Tok::Real(1.5), Tok::Eof]);
    }

    #[test]
    fn multi_character_operators_lex_greedily() {
        assert_eq!(
            kinds("a >>>= b >>> c ?: d"),
            vec![
                Tok::Ident("a".into()),
                Tok::ShruAssign,
                Tok::Ident("b".into()),
                Tok::Shru,
                Tok::Ident("c".into()),
                Tok::Elvis,
                Tok::Ident("d".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn word_operators_alias_symbols() {
        assert_eq!(
            kinds("a and b or not c"),
            vec![
                Tok::Ident("a".into()),
                Tok::AndAnd,
                Tok::Ident("b".into()),
                Tok::OrOr,
                Tok::Bang,
                Tok::Ident("c".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn big_literal_suffix_and_overflow_promotion() {
        let toks = kinds("42b 99999999999999999999");
        assert!(matches!(&toks[0], Tok::Big(b) if b.to_string() == "42"));
        assert!(matches!(&toks[1], Tok::Big(b) if b.to_string() == "99999999999999999999"));
    }

    #[test]
    fn strings_support_escapes() {
        assert_eq!(
            kinds(r#"'a\n' "A""#),
            vec![Tok::Str("a\n".into()), Tok::Str("A".into()), Tok::Eof]
        );
    }
}
