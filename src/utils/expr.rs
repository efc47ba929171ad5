//! Boolean predicates over record fields for `grab(evaluate: ...)`.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := not (("&&" | "and") not)*
//! not     := ("!" | "not") not | compare
//! compare := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := number | "string" | 'string' | :FIELD | true | false | "(" or ")"
//! ```
//!
//! Expressions are side-effect free. Any `:FIELD` missing from the record (or
//! nil) makes the whole predicate a non-match. Comparing a string with a number
//! is false (`!=` is true) unless the string reads as a number. Arithmetic on
//! incompatible operands, division by zero and a non-boolean result are errors.

use std::cmp::Ordering;
use std::fmt;

use anyhow::{bail, Context, Result};

use crate::config::defs::OptionError;
use crate::utils::record::{Record, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    fn from_value(value: &Value) -> Option<Scalar> {
        match value {
            Value::Nil => None,
            Value::Int(i) => Some(Scalar::Int(*i)),
            Value::Float(f) => Some(Scalar::Float(*f)),
            Value::Str(s) => Some(Scalar::Str(s.clone())),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Str(s) => s.trim().parse().ok(),
            Scalar::Bool(_) => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "boolean",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{:?}", x),
            Scalar::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Scalar),
    Field(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parses an expression. Malformed text is an option error.
    pub fn parse(text: &str) -> Result<Expr, OptionError> {
        let tokens = tokenize(text).map_err(|e| OptionError(format!("Bad evaluate expression {:?}: {}", text, e)))?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser
            .parse_or()
            .and_then(|expr| parser.expect_end().map(|_| expr))
            .map_err(|e| OptionError(format!("Bad evaluate expression {:?}: {}", text, e)))?;
        Ok(expr)
    }

    /// True when the record satisfies the predicate.
    pub fn matches(&self, record: &Record) -> Result<bool> {
        match self.eval(record)? {
            None => Ok(false),
            Some(Scalar::Bool(b)) => Ok(b),
            Some(other) => bail!("expression yields {} {}, expected a boolean", other.type_name(), other),
        }
    }

    /// Evaluates against a record. `None` means a referenced field is absent.
    pub fn eval(&self, record: &Record) -> Result<Option<Scalar>> {
        match self {
            Expr::Literal(s) => Ok(Some(s.clone())),
            Expr::Field(name) => Ok(record.get(name).and_then(Scalar::from_value)),
            Expr::Not(inner) => match inner.eval(record)? {
                None => Ok(None),
                Some(Scalar::Bool(b)) => Ok(Some(Scalar::Bool(!b))),
                Some(other) => bail!("cannot negate {} {}", other.type_name(), other),
            },
            Expr::Neg(inner) => match inner.eval(record)? {
                None => Ok(None),
                Some(Scalar::Int(i)) => Ok(Some(Scalar::Int(i.checked_neg().context("overflow in negation")?))),
                Some(Scalar::Float(f)) => Ok(Some(Scalar::Float(-f))),
                Some(other) => bail!("cannot negate {} {}", other.type_name(), other),
            },
            Expr::Binary(BinOp::And, lhs, rhs) => match lhs.eval(record)? {
                None => Ok(None),
                Some(Scalar::Bool(false)) => Ok(Some(Scalar::Bool(false))),
                Some(Scalar::Bool(true)) => expect_bool(rhs.eval(record)?),
                Some(other) => bail!("'&&' needs booleans, got {} {}", other.type_name(), other),
            },
            Expr::Binary(BinOp::Or, lhs, rhs) => match lhs.eval(record)? {
                None => Ok(None),
                Some(Scalar::Bool(true)) => Ok(Some(Scalar::Bool(true))),
                Some(Scalar::Bool(false)) => expect_bool(rhs.eval(record)?),
                Some(other) => bail!("'||' needs booleans, got {} {}", other.type_name(), other),
            },
            Expr::Binary(op, lhs, rhs) => {
                let (Some(a), Some(b)) = (lhs.eval(record)?, rhs.eval(record)?) else {
                    return Ok(None);
                };
                match op {
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        Ok(Some(Scalar::Bool(compare(*op, &a, &b))))
                    }
                    _ => arithmetic(*op, a, b).map(Some),
                }
            }
        }
    }
}

fn expect_bool(value: Option<Scalar>) -> Result<Option<Scalar>> {
    match value {
        None | Some(Scalar::Bool(_)) => Ok(value),
        Some(other) => bail!("expected a boolean, got {} {}", other.type_name(), other),
    }
}

fn ordering(a: &Scalar, b: &Scalar) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(y)),
        (Scalar::Str(x), Scalar::Str(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(y)),
        (Scalar::Bool(_), _) | (_, Scalar::Bool(_)) => None,
        _ => a.as_number()?.partial_cmp(&b.as_number()?),
    }
}

fn compare(op: BinOp, a: &Scalar, b: &Scalar) -> bool {
    let Some(ord) = ordering(a, b) else {
        return op == BinOp::Ne;
    };
    match op {
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Ne => ord != Ordering::Equal,
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Le => ord != Ordering::Greater,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Ge => ord != Ordering::Less,
        _ => false,
    }
}

fn arithmetic(op: BinOp, a: Scalar, b: Scalar) -> Result<Scalar> {
    if let (BinOp::Add, Scalar::Str(x), Scalar::Str(y)) = (op, &a, &b) {
        return Ok(Scalar::Str(format!("{}{}", x, y)));
    }
    if let (Scalar::Int(x), Scalar::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        let result = match op {
            BinOp::Add => x.checked_add(y).context("overflow in addition")?,
            BinOp::Sub => x.checked_sub(y).context("overflow in subtraction")?,
            BinOp::Mul => x.checked_mul(y).context("overflow in multiplication")?,
            BinOp::Div => {
                if y == 0 {
                    bail!("division by zero");
                }
                x.checked_div_euclid(y).context("overflow in division")?
            }
            BinOp::Rem => {
                if y == 0 {
                    bail!("modulo by zero");
                }
                x.checked_rem_euclid(y).context("overflow in modulo")?
            }
            _ => bail!("not an arithmetic operator: {:?}", op),
        };
        return Ok(Scalar::Int(result));
    }
    let numeric = |s: &Scalar| match s {
        Scalar::Int(i) => Some(*i as f64),
        Scalar::Float(f) => Some(*f),
        _ => None,
    };
    let (Some(x), Some(y)) = (numeric(&a), numeric(&b)) else {
        bail!(
            "incompatible operands for {:?}: {} {} and {} {}",
            op,
            a.type_name(),
            a,
            b.type_name(),
            b
        );
    };
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                bail!("division by zero");
            }
            x / y
        }
        BinOp::Rem => {
            if y == 0.0 {
                bail!("modulo by zero");
            }
            x.rem_euclid(y)
        }
        _ => bail!("not an arithmetic operator: {:?}", op),
    };
    Ok(Scalar::Float(result))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Scalar),
    Str(String),
    Field(String),
    Word(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "||", "&&", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%", "(", ")",
];

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == ':' {
            let start = i + 1;
            i = start;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            if i == start {
                bail!("field name expected after ':' at offset {}", start - 1);
            }
            tokens.push(Token::Field(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i == chars.len() {
                bail!("unterminated string starting at offset {}", start - 1);
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let number = match Value::parse(&literal) {
                Value::Int(n) => Scalar::Int(n),
                Value::Float(f) => Scalar::Float(f),
                _ => bail!("bad number {:?}", literal),
            };
            tokens.push(Token::Num(number));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                Some(op) => {
                    tokens.push(Token::Op(op));
                    i += op.chars().count();
                }
                None => bail!("unexpected character {:?} at offset {}", c, i),
            }
        }
    }
    Ok(tokens)
}

/// Recursive descent over the token list.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => bail!("unexpected trailing {:?}", token),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_op("||") || self.eat_word("or") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_op("&&") || self.eat_word("and") {
            let right = self.parse_not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_op("!") || self.eat_word("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let left = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinOp::Eq,
            Some(Token::Op("!=")) => BinOp::Ne,
            Some(Token::Op("<")) => BinOp::Lt,
            Some(Token::Op("<=")) => BinOp::Le,
            Some(Token::Op(">")) => BinOp::Gt,
            Some(Token::Op(">=")) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.parse_product()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Rem
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(Expr::Literal(n)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Scalar::Str(s))),
            Some(Token::Field(name)) => Ok(Expr::Field(name)),
            Some(Token::Word(w)) if w == "true" => Ok(Expr::Literal(Scalar::Bool(true))),
            Some(Token::Word(w)) if w == "false" => Ok(Expr::Literal(Scalar::Bool(false))),
            Some(Token::Op("(")) => {
                let inner = self.parse_or()?;
                if !self.eat_op(")") {
                    bail!("expected ')'");
                }
                Ok(inner)
            }
            Some(token) => bail!("unexpected {:?}", token),
            None => bail!("unexpected end of expression"),
        }
    }
}
