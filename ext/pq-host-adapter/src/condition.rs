//! Row filter conditions for `read`, `save` and `if`
//!
//! Accepts the host's `if` syntax (`==`, `!=`, `~=`, `&`, `|`, `!`,
//! `missing()`, `inrange()`, `inlist()`) and plain SQL predicates (`AND`, `OR`,
//! `NOT`, `IS [NOT] NULL`, `[NOT] BETWEEN`, `[NOT] IN`). Conditions are
//! evaluated on whole record batches with Arrow's kernels.
//!
//! A comparison involving a null is null, and null rows are dropped by the
//! filter, so `x > 5` never keeps a row where `x` is missing. Empty strings
//! count as missing.

use std::fmt;
use std::sync::Arc;

use arrow::compute::kernels::boolean::{and_kleene, not, or_kleene};
use arrow::compute::kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq};
use arrow::compute::{cast, filter_record_batch, is_null};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Datum, Float64Array, RecordBatch, Scalar, StringArray,
};
use arrow_schema::DataType;
use indexmap::IndexSet;

use crate::{HostError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Less => "<",
            CompareOp::LessEq => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEq => ">=",
        };
        f.write_str(op)
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Column(String),
    Number(f64),
    Text(String),
    Compare {
        op: CompareOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    IsNull {
        expr: Box<Condition>,
        negated: bool,
    },
    Between {
        expr: Box<Condition>,
        low: Box<Condition>,
        high: Box<Condition>,
        negated: bool,
    },
    InList {
        expr: Box<Condition>,
        list: Vec<Condition>,
        negated: bool,
    },
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn fmt_list(list: &[Condition]) -> String {
    list.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQL rendering, as shown by the `if` command
impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Column(name) => f.write_str(name),
            Condition::Number(n) => write!(f, "{}", n),
            Condition::Text(text) => f.write_str(&quote(text)),
            Condition::Compare { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Condition::And(left, right) => write!(f, "({} AND {})", left, right),
            Condition::Or(left, right) => write!(f, "({} OR {})", left, right),
            Condition::Not(inner) => write!(f, "NOT ({})", inner),
            Condition::IsNull { expr, negated } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{} IS{} NULL", expr, not)
            }
            Condition::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{}{} BETWEEN {} AND {}", expr, not, low, high)
            }
            Condition::InList {
                expr,
                list,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{}{} IN ({})", expr, not, fmt_list(list))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Number(f64),
    Text(String),
    LParen,
    RParen,
    Comma,
    Minus,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    And,
    Or,
    Not,
    Is,
    Null,
    Between,
    In,
    Eof,
}

fn parse_error<S: Into<String>>(msg: S) -> HostError {
    HostError::Condition(msg.into())
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn consume_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> String {
        let mut buf = String::new();
        while let Some(&c) = self.chars.peek() {
            if !predicate(c) {
                break;
            }
            buf.push(c);
            self.chars.next();
        }
        buf
    }

    /// Consume `next` if it follows
    fn follow(&mut self, next: char) -> bool {
        if self.chars.peek() == Some(&next) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn quoted(&mut self, delimiter: char) -> Result<Token> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(parse_error("unterminated string")),
                Some(c) if c == delimiter => {
                    if self.follow(delimiter) {
                        out.push(delimiter);
                        continue;
                    }
                    return Ok(Token::Text(out));
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.consume_while(char::is_whitespace);
        let Some(c) = self.chars.next() else {
            return Ok(Token::Eof);
        };
        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '-' => Token::Minus,
            '&' => {
                self.follow('&');
                Token::And
            }
            '|' => {
                self.follow('|');
                Token::Or
            }
            '=' => {
                self.follow('=');
                Token::Eq
            }
            '!' | '~' => {
                if self.follow('=') {
                    Token::NotEq
                } else {
                    Token::Not
                }
            }
            '<' => {
                if self.follow('=') {
                    Token::LessEq
                } else if self.follow('>') {
                    Token::NotEq
                } else {
                    Token::Less
                }
            }
            '>' => {
                if self.follow('=') {
                    Token::GreaterEq
                } else {
                    Token::Greater
                }
            }
            '"' | '\'' => return self.quoted(c),
            c if c.is_ascii_digit() || c == '.' => {
                let mut digits = c.to_string();
                digits.push_str(&self.consume_while(|c| c.is_ascii_digit() || c == '.'));
                if matches!(self.chars.peek(), Some('e' | 'E')) {
                    digits.extend(self.chars.next());
                    if matches!(self.chars.peek(), Some('+' | '-')) {
                        digits.extend(self.chars.next());
                    }
                    digits.push_str(&self.consume_while(|c| c.is_ascii_digit()));
                }
                let value = digits
                    .parse::<f64>()
                    .map_err(|_| parse_error(format!("invalid number '{}'", digits)))?;
                Token::Number(value)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = c.to_string();
                ident.push_str(&self.consume_while(|c| c.is_alphanumeric() || c == '_'));
                match ident.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "NULL" => Token::Null,
                    "BETWEEN" => Token::Between,
                    "IN" => Token::In,
                    _ => Token::Identifier(ident),
                }
            }
            other => return Err(parse_error(format!("unexpected character '{}'", other))),
        };
        Ok(token)
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn bump(&mut self) -> Result<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn eat(&mut self, token: &Token) -> Result<bool> {
        if &self.lookahead == token {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token)? {
            Ok(())
        } else {
            Err(parse_error(format!(
                "expected {:?}, found {:?}",
                token, self.lookahead
            )))
        }
    }

    fn parse(mut self) -> Result<Condition> {
        let condition = self.parse_or()?;
        if self.lookahead != Token::Eof {
            return Err(parse_error(format!(
                "unexpected {:?} after the condition",
                self.lookahead
            )));
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> Result<Condition> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or)? {
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And)? {
            let right = self.parse_not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Condition> {
        if self.eat(&Token::Not)? {
            return Ok(Condition::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Condition> {
        let left = self.parse_operand()?;
        let op = match self.lookahead {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::NotEq,
            Token::Less => CompareOp::Less,
            Token::LessEq => CompareOp::LessEq,
            Token::Greater => CompareOp::Greater,
            Token::GreaterEq => CompareOp::GreaterEq,
            Token::Is => {
                self.bump()?;
                let negated = self.eat(&Token::Not)?;
                self.expect(Token::Null)?;
                return Ok(Condition::IsNull {
                    expr: Box::new(left),
                    negated,
                });
            }
            Token::Not | Token::Between | Token::In => {
                let negated = self.eat(&Token::Not)?;
                return self.parse_range_or_list(left, negated);
            }
            _ => return Ok(left),
        };
        self.bump()?;
        let right = self.parse_operand()?;
        Ok(Condition::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_range_or_list(&mut self, expr: Condition, negated: bool) -> Result<Condition> {
        if self.eat(&Token::Between)? {
            let low = self.parse_operand()?;
            self.expect(Token::And)?;
            let high = self.parse_operand()?;
            return Ok(Condition::Between {
                expr: Box::new(expr),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }
        self.expect(Token::In)?;
        self.expect(Token::LParen)?;
        let list = self.parse_arguments()?;
        Ok(Condition::InList {
            expr: Box::new(expr),
            list,
            negated,
        })
    }

    /// Comma separated operands up to and including the closing parenthesis
    fn parse_arguments(&mut self) -> Result<Vec<Condition>> {
        let mut args = vec![self.parse_operand()?];
        while self.eat(&Token::Comma)? {
            args.push(self.parse_operand()?);
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn parse_operand(&mut self) -> Result<Condition> {
        match self.bump()? {
            Token::Number(n) => Ok(Condition::Number(n)),
            Token::Minus => match self.bump()? {
                Token::Number(n) => Ok(Condition::Number(-n)),
                other => Err(parse_error(format!("expected a number after '-', found {:?}", other))),
            },
            Token::Text(text) => Ok(Condition::Text(text)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Identifier(name) if self.lookahead == Token::LParen => {
                self.bump()?;
                let args = self.parse_arguments()?;
                function_call(&name, args)
            }
            Token::Identifier(name) => Ok(Condition::Column(name)),
            other => Err(parse_error(format!("unexpected {:?}", other))),
        }
    }
}

fn function_call(name: &str, mut args: Vec<Condition>) -> Result<Condition> {
    let arity = |n: usize, args: &[Condition]| {
        if args.len() == n {
            Ok(())
        } else {
            Err(parse_error(format!(
                "{}() takes {} arguments, got {}",
                name,
                n,
                args.len()
            )))
        }
    };
    match name.to_ascii_lowercase().as_str() {
        "missing" => {
            arity(1, &args)?;
            Ok(Condition::IsNull {
                expr: Box::new(args.remove(0)),
                negated: false,
            })
        }
        "inrange" => {
            arity(3, &args)?;
            let mut args = args.into_iter();
            let (Some(expr), Some(low), Some(high)) = (args.next(), args.next(), args.next())
            else {
                return Err(parse_error("inrange() takes 3 arguments"));
            };
            Ok(Condition::Between {
                expr: Box::new(expr),
                low: Box::new(low),
                high: Box::new(high),
                negated: false,
            })
        }
        "inlist" => {
            if args.len() < 2 {
                return Err(parse_error("inlist() needs a value and at least one candidate"));
            }
            let expr = args.remove(0);
            Ok(Condition::InList {
                expr: Box::new(expr),
                list: args,
                negated: false,
            })
        }
        _ => Err(parse_error(format!("unknown function '{}'", name))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Number,
    Text,
}

/// One side of a comparison: a whole column or a literal
enum Operand {
    Column(ArrayRef, Kind),
    Literal(ArrayRef, Kind),
}

impl Operand {
    fn kind(&self) -> Kind {
        match self {
            Operand::Column(_, kind) | Operand::Literal(_, kind) => *kind,
        }
    }

    fn datum(&self) -> Box<dyn Datum> {
        match self {
            Operand::Column(array, _) => Box::new(Arc::clone(array)),
            Operand::Literal(array, _) => Box::new(Scalar::new(Arc::clone(array))),
        }
    }
}

fn constant(value: Option<bool>, rows: usize) -> BooleanArray {
    BooleanArray::from(vec![value; rows])
}

/// Stretch a single-row result of two literals to the batch
fn broadcast(result: BooleanArray, rows: usize) -> BooleanArray {
    if result.len() == rows {
        return result;
    }
    let value = (result.len() == 1 && result.is_valid(0)).then(|| result.value(0));
    constant(value, rows)
}

impl Condition {
    /// Parse a condition; an empty string has no condition
    pub fn parse(input: &str) -> Result<Option<Self>> {
        if input.trim().is_empty() {
            return Ok(None);
        }
        Parser::new(input)?.parse().map(Some)
    }

    /// Columns the condition reads, in order of first use
    pub fn columns(&self) -> Vec<String> {
        let mut names = IndexSet::new();
        self.collect_columns(&mut names);
        names.into_iter().collect()
    }

    fn collect_columns(&self, names: &mut IndexSet<String>) {
        match self {
            Condition::Column(name) => {
                names.insert(name.clone());
            }
            Condition::Number(_) | Condition::Text(_) => {}
            Condition::Compare { left, right, .. }
            | Condition::And(left, right)
            | Condition::Or(left, right) => {
                left.collect_columns(names);
                right.collect_columns(names);
            }
            Condition::Not(inner) | Condition::IsNull { expr: inner, .. } => {
                inner.collect_columns(names)
            }
            Condition::Between { expr, low, high, .. } => {
                expr.collect_columns(names);
                low.collect_columns(names);
                high.collect_columns(names);
            }
            Condition::InList { expr, list, .. } => {
                expr.collect_columns(names);
                for item in list {
                    item.collect_columns(names);
                }
            }
        }
    }

    /// Rows of `batch` that satisfy the condition
    pub fn filter(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let mask = self.evaluate(batch)?;
        Ok(filter_record_batch(batch, &mask)?)
    }

    /// Three-valued truth of the condition for every row of `batch`
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let rows = batch.num_rows();
        let mask = match self {
            Condition::Column(_) | Condition::Number(_) | Condition::Text(_) => {
                return Err(parse_error(format!("'{}' is not a condition", self)))
            }
            Condition::Compare { op, left, right } => {
                let left = left.operand(batch)?;
                let right = right.operand(batch)?;
                compare(*op, &left, &right, rows)?
            }
            Condition::And(left, right) => {
                and_kleene(&left.evaluate(batch)?, &right.evaluate(batch)?)?
            }
            Condition::Or(left, right) => {
                or_kleene(&left.evaluate(batch)?, &right.evaluate(batch)?)?
            }
            Condition::Not(inner) => not(&inner.evaluate(batch)?)?,
            Condition::IsNull { expr, negated } => {
                let missing = expr.missing(batch)?;
                if *negated {
                    not(&missing)?
                } else {
                    missing
                }
            }
            Condition::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = expr.operand(batch)?;
                let above = compare(CompareOp::GreaterEq, &value, &low.operand(batch)?, rows)?;
                let below = compare(CompareOp::LessEq, &value, &high.operand(batch)?, rows)?;
                let inside = and_kleene(&above, &below)?;
                if *negated {
                    not(&inside)?
                } else {
                    inside
                }
            }
            Condition::InList {
                expr,
                list,
                negated,
            } => {
                let value = expr.operand(batch)?;
                let mut any = constant(Some(false), rows);
                for candidate in list {
                    let hit = compare(CompareOp::Eq, &value, &candidate.operand(batch)?, rows)?;
                    any = or_kleene(&any, &hit)?;
                }
                if *negated {
                    not(&any)?
                } else {
                    any
                }
            }
        };
        Ok(mask)
    }

    fn operand(&self, batch: &RecordBatch) -> Result<Operand> {
        match self {
            Condition::Column(name) => {
                let array = batch
                    .column_by_name(name)
                    .ok_or_else(|| parse_error(format!("unknown variable '{}'", name)))?;
                let (target, kind) = match array.data_type() {
                    DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                        (DataType::Utf8, Kind::Text)
                    }
                    t if t.is_numeric() || *t == DataType::Boolean => {
                        (DataType::Float64, Kind::Number)
                    }
                    other => {
                        return Err(parse_error(format!(
                            "variable '{}' of type {} cannot be compared",
                            name, other
                        )))
                    }
                };
                Ok(Operand::Column(cast(array.as_ref(), &target)?, kind))
            }
            Condition::Number(n) => Ok(Operand::Literal(
                Arc::new(Float64Array::from(vec![*n])),
                Kind::Number,
            )),
            Condition::Text(text) => Ok(Operand::Literal(
                Arc::new(StringArray::from(vec![text.as_str()])),
                Kind::Text,
            )),
            other => Err(parse_error(format!("'{}' is not a value", other))),
        }
    }

    /// `missing()`: null, or an empty string
    fn missing(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let rows = batch.num_rows();
        match self.operand(batch)? {
            Operand::Literal(array, Kind::Text) => {
                let empty = array.as_any().downcast_ref::<StringArray>().map(|a| a.value(0).is_empty());
                Ok(constant(empty, rows))
            }
            Operand::Literal(_, Kind::Number) => Ok(constant(Some(false), rows)),
            Operand::Column(array, Kind::Number) => Ok(is_null(array.as_ref())?),
            Operand::Column(array, Kind::Text) => {
                let blank = eq(&array, &Scalar::new(StringArray::from(vec![""])))?;
                Ok(or_kleene(&is_null(array.as_ref())?, &blank)?)
            }
        }
    }
}

fn compare(op: CompareOp, left: &Operand, right: &Operand, rows: usize) -> Result<BooleanArray> {
    if left.kind() != right.kind() {
        return Err(parse_error(format!(
            "cannot compare a {} with a {}",
            kind_name(left.kind()),
            kind_name(right.kind())
        )));
    }
    let (l, r) = (left.datum(), right.datum());
    let (l, r) = (l.as_ref(), r.as_ref());
    let result = match op {
        CompareOp::Eq => eq(l, r)?,
        CompareOp::NotEq => neq(l, r)?,
        CompareOp::Less => lt(l, r)?,
        CompareOp::LessEq => lt_eq(l, r)?,
        CompareOp::Greater => gt(l, r)?,
        CompareOp::GreaterEq => gt_eq(l, r)?,
    };
    Ok(broadcast(result, rows))
}

fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Number => "number",
        Kind::Text => "string",
    }
}
