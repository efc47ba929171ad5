//! Reads pipeline descriptions in the form printed by `Pipeline::to_s`:
//!
//! ```text
//! [BP.new].read_fasta(input: "in.fna").grab(select: ["est1", "QM"], exact: true).run(thread: true)
//! ```
//!
//! Values are double or single quoted strings (with `\"`, `\\`, `\n`, `\t`,
//! `\r`, `\0` and `\u{..}` escapes), `:symbols`, integers, floats, `true`,
//! `false`, `nil` and bracketed lists. A trailing `.run` or `.run(...)`
//! carries run options.

use std::fmt;

use logos::{Logos, Span};

use crate::config::defs::{OptionError, ENTRY_POINT};
use crate::utils::options::{OptionValue, Options};

/// Parsed description: commands in order and the options of a trailing `.run`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Description {
    pub commands: Vec<(String, Options)>,
    pub run: Option<Options>,
}

#[derive(Debug, Clone, PartialEq, Default)]
enum LexError {
    #[default]
    UnexpectedCharacter,
    UnterminatedString,
    InvalidEscape,
    InvalidNumber,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnexpectedCharacter => write!(f, "unexpected character"),
            LexError::UnterminatedString => write!(f, "unterminated string"),
            LexError::InvalidEscape => write!(f, "invalid escape sequence"),
            LexError::InvalidNumber => write!(f, "invalid number"),
        }
    }
}

/// Keywords come before `Ident` so `true`, `false` and `nil` win over names.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Token {
    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("nil")]
    Nil,

    #[token(".")]
    Dot,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token("=")]
    Eq,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[regex(r#""([^"\\]|\\.)*""#, unescape)]
    #[regex(r"'([^'\\]|\\.)*'", unescape)]
    Str(String),

    /// A quote with no closing partner; always an error.
    #[regex(r#""([^"\\]|\\.)*"#, unterminated)]
    #[regex(r"'([^'\\]|\\.)*", unterminated)]
    Unterminated,

    #[regex(r"-?[0-9][0-9_]*", lex_int)]
    Int(i64),

    #[regex(r"-?[0-9][0-9_]*\.[0-9_]*([eE][-+]?[0-9]+)?", lex_float)]
    #[regex(r"-?[0-9][0-9_]*[eE][-+]?[0-9]+", lex_float)]
    #[regex(r"-?\.[0-9][0-9_]*([eE][-+]?[0-9]+)?", lex_float)]
    Float(f64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Text of tokens usable as an option key, command name or symbol.
    fn word(&self) -> Option<&str> {
        match self {
            Token::Ident(name) => Some(name.as_str()),
            Token::True => Some("true"),
            Token::False => Some("false"),
            Token::Nil => Some("nil"),
            _ => None,
        }
    }
}

/// Strips the quotes and resolves escapes.
fn unescape(lex: &mut logos::Lexer<Token>) -> Result<String, LexError> {
    let slice = lex.slice();
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                if chars.next() != Some('{') {
                    return Err(LexError::InvalidEscape);
                }
                let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(LexError::InvalidEscape)?;
                out.push(code);
            }
            Some(other) => out.push(other),
            None => return Err(LexError::InvalidEscape),
        }
    }
    Ok(out)
}

fn unterminated(_: &mut logos::Lexer<Token>) -> Result<(), LexError> {
    Err(LexError::UnterminatedString)
}

fn lex_int(lex: &mut logos::Lexer<Token>) -> Result<i64, LexError> {
    lex.slice().replace('_', "").parse().map_err(|_| LexError::InvalidNumber)
}

fn lex_float(lex: &mut logos::Lexer<Token>) -> Result<f64, LexError> {
    lex.slice().replace('_', "").parse().map_err(|_| LexError::InvalidNumber)
}

fn invalid(offset: usize, message: &str) -> OptionError {
    OptionError(format!("Invalid pipeline description at offset {}: {}", offset, message))
}

/// Token stream with byte offsets into the original description.
struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    end: usize,
}

impl Parser {
    /// Lexes `source`, which starts at byte `base` of the full description.
    fn new(source: &str, base: usize) -> Result<Self, OptionError> {
        let mut tokens = Vec::new();
        for (result, span) in Token::lexer(source).spanned() {
            let span = span.start + base..span.end + base;
            match result {
                Ok(token) => tokens.push((token, span)),
                Err(e) => return Err(invalid(span.start, &e.to_string())),
            }
        }
        Ok(Parser {
            tokens,
            pos: 0,
            end: base + source.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn error(&self, message: &str) -> OptionError {
        let offset = self.tokens.get(self.pos).map(|(_, span)| span.start).unwrap_or(self.end);
        invalid(offset, message)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, shown: &str) -> Result<(), OptionError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", shown)))
        }
    }

    fn name(&mut self) -> Result<String, OptionError> {
        match self.peek().and_then(Token::word).map(str::to_string) {
            Some(name) => {
                self.pos += 1;
                Ok(name)
            }
            None => Err(self.error("expected a name")),
        }
    }

    fn value(&mut self) -> Result<OptionValue, OptionError> {
        let value = match self.peek() {
            Some(Token::Str(s)) => OptionValue::Str(s.clone()),
            Some(Token::Int(i)) => OptionValue::Int(*i),
            Some(Token::Float(f)) => OptionValue::Float(*f),
            Some(Token::True) => OptionValue::Bool(true),
            Some(Token::False) => OptionValue::Bool(false),
            Some(Token::Nil) => OptionValue::Nil,
            Some(Token::Colon) => {
                self.pos += 1;
                return Ok(OptionValue::Sym(self.name()?));
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.value()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma, ",")?;
                    }
                }
                return Ok(OptionValue::List(items));
            }
            Some(Token::Ident(word)) => {
                return Err(self.error(&format!("unexpected {:?}; quote strings", word)));
            }
            _ => return Err(self.error("value expected")),
        };
        self.pos += 1;
        Ok(value)
    }

    /// `(key: value, ...)`, or nothing when no parenthesis follows.
    fn options(&mut self) -> Result<Options, OptionError> {
        let mut options = Options::new();
        if !self.eat(&Token::LParen) || self.eat(&Token::RParen) {
            return Ok(options);
        }
        loop {
            let key = self.name()?;
            if !self.eat(&Token::Colon) && !self.eat(&Token::Eq) {
                return Err(self.error(&format!("expected ':' after {}", key)));
            }
            if options.contains(&key) {
                return Err(self.error(&format!("duplicate option {}", key)));
            }
            let value = self.value()?;
            options.insert(key, value);
            if self.eat(&Token::RParen) {
                return Ok(options);
            }
            self.expect(&Token::Comma, ",")?;
        }
    }
}

/// Parses a pipeline description.
///
/// # Arguments
///
/// * `text` - Description, with or without the leading `BP.new`.
///
/// # Returns
/// Description, or OptionError pointing at the offending byte offset.
pub fn parse_description(text: &str) -> Result<Description, OptionError> {
    let trimmed = text.trim_start();
    let mut start = text.len() - trimmed.len();
    if trimmed.starts_with(ENTRY_POINT) {
        start += ENTRY_POINT.len();
    }
    let mut parser = Parser::new(&text[start..], start)?;
    let mut description = Description::default();

    while parser.peek().is_some() {
        if description.run.is_some() {
            return Err(parser.error("nothing may follow .run"));
        }
        parser.expect(&Token::Dot, ".")?;
        let name = parser.name()?;
        let options = parser.options()?;
        if name == "run" {
            description.run = Some(options);
        } else {
            description.commands.push((name, options));
        }
    }
    Ok(description)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Token::lexer(source).map(|t| t.unwrap()).collect()
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            lex(r#"key: :SYM, "a\tb" 'c\'d' -3 1_000 2.5e3 .5 nil"#),
            vec![
                Token::Ident("key".into()),
                Token::Colon,
                Token::Colon,
                Token::Ident("SYM".into()),
                Token::Comma,
                Token::Str("a\tb".into()),
                Token::Str("c'd".into()),
                Token::Int(-3),
                Token::Int(1000),
                Token::Float(2500.0),
                Token::Float(0.5),
                Token::Nil,
            ]
        );
        assert_eq!(lex(r#""\u{e9}""#), vec![Token::Str("é".into())]);
        assert_eq!(lex("nilly"), vec![Token::Ident("nilly".into())]);
    }

    #[test]
    fn test_parse_full_description() {
        let d = parse_description(
            r#"BP.new.read_fasta(input: "in.fna").grab(select: ["est1", 'QM'], exact: true).sort(key: :COUNT, block_size: 1_000).dump.run(thread: true)"#,
        )
        .unwrap();
        assert_eq!(d.commands.len(), 4);
        assert_eq!(d.commands[0].0, "read_fasta");
        assert_eq!(d.commands[1].1.get("select"), Some(&OptionValue::List(vec!["est1".into(), "QM".into()])));
        assert_eq!(d.commands[2].1.get("key"), Some(&OptionValue::sym("COUNT")));
        assert_eq!(d.commands[2].1.get_i64("block_size"), Some(1000));
        assert!(d.commands[3].1.is_empty());
        assert_eq!(d.run, Some(Options::new().with("thread", true)));
    }

    #[test]
    fn test_rendered_options_read_back() {
        let options = Options::new()
            .with("evaluate", r#":NAME == "a\"b""#)
            .with("identity", 0.97)
            .with("first", -1)
            .with("x", OptionValue::Nil);
        let text = format!(".grab({})", options);
        let d = parse_description(&text).unwrap();
        assert_eq!(d.commands[0].1, options);
        assert_eq!(d.run, None);
    }

    #[test]
    fn test_errors() {
        assert!(parse_description(".grab(select: bare)").is_err());
        assert!(parse_description(".grab(select: 1, select: 2)").is_err());
        assert!(parse_description(".run.dump").is_err());
        assert!(parse_description("grab").is_err());
        assert!(parse_description(".grab(first: 99999999999999999999)").is_err());
        assert_eq!(parse_description("").unwrap(), Description::default());

        let err = parse_description(".grab(select: \"open)").unwrap_err();
        assert_eq!(err.0, "Invalid pipeline description at offset 14: unterminated string");
        let err = parse_description("  BP.new.grab(select ~)").unwrap_err();
        assert!(err.0.contains("offset 21"), "{}", err.0);
    }
}
