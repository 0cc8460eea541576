//! Restricted expression language for success indicators and hook conditions.
//!
//! Expressions are parsed when a dictionary is loaded and interpreted against
//! a vendor response body (`$`-paths) and the request context (bare
//! identifiers). There is no function call, assignment, or evaluation of
//! arbitrary code.
//!
//! ```text
//! expr    := or
//! or      := and ('||' and)*
//! and     := not ('&&' not)*
//! not     := '!' not | cmp
//! cmp     := operand (('==' | '!=' | '<' | '<=' | '>' | '>=') operand)?
//! operand := path | ident | string | number | true | false | null | '(' expr ')'
//! path    := '$' ('.' name | '[' index ']')*
//! ```

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{ch}' at byte {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal starting at byte {offset}")]
    UnterminatedString { offset: usize },
    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },
    #[error("invalid path '{text}'")]
    InvalidPath { text: String },
    #[error("unexpected token '{token}'")]
    UnexpectedToken { token: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Field(String),
    Index(usize),
}

/// Locator into a JSON document such as `$.data.items[0].id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    source: String,
    steps: Vec<PathStep>,
}

impl FieldPath {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let invalid = || ExpressionError::InvalidPath {
            text: source.to_owned(),
        };
        let trimmed = source.trim();
        let mut rest = trimmed.strip_prefix('$').ok_or_else(invalid)?;
        let mut steps = Vec::new();

        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                let end = after_dot
                    .find(['.', '['])
                    .unwrap_or(after_dot.len());
                let name = &after_dot[..end];
                let valid = !name.is_empty()
                    && name
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
                if !valid {
                    return Err(invalid());
                }
                steps.push(PathStep::Field(name.to_owned()));
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let end = after_bracket.find(']').ok_or_else(invalid)?;
                let index = after_bracket[..end]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid())?;
                steps.push(PathStep::Index(index));
                rest = &after_bracket[end + 1..];
            } else {
                return Err(invalid());
            }
        }

        Ok(Self {
            source: trimmed.to_owned(),
            steps,
        })
    }

    pub fn find<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.steps.iter().try_fold(document, |current, step| match step {
            PathStep::Field(name) => current.as_object()?.get(name),
            PathStep::Index(index) => current.as_array()?.get(*index),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Path(FieldPath),
    Variable(Vec<String>),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(Comparison, Box<Node>, Box<Node>),
}

/// Parsed boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser { tokens, position: 0 };
        let root = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::UnexpectedToken {
                token: token.to_string(),
            });
        }
        Ok(Self {
            source: source.trim().to_owned(),
            root,
        })
    }

    /// Evaluates against a response `document` (`$`-paths) and `variables`
    /// (bare identifiers). Missing values evaluate as `null`.
    pub fn evaluate(&self, document: &Value, variables: &ExecutionContext) -> bool {
        truthy(&eval(&self.root, document, variables))
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}

fn eval(node: &Node, document: &Value, variables: &ExecutionContext) -> Value {
    match node {
        Node::Literal(value) => value.clone(),
        Node::Path(path) => path.find(document).cloned().unwrap_or(Value::Null),
        Node::Variable(path) => variables.lookup(path).cloned().unwrap_or(Value::Null),
        Node::Not(inner) => Value::Bool(!truthy(&eval(inner, document, variables))),
        Node::And(left, right) => Value::Bool(
            truthy(&eval(left, document, variables)) && truthy(&eval(right, document, variables)),
        ),
        Node::Or(left, right) => Value::Bool(
            truthy(&eval(left, document, variables)) || truthy(&eval(right, document, variables)),
        ),
        Node::Compare(op, left, right) => {
            let left = eval(left, document, variables);
            let right = eval(right, document, variables);
            Value::Bool(compare(*op, &left, &right))
        }
    }
}

fn compare(op: Comparison, left: &Value, right: &Value) -> bool {
    match op {
        Comparison::Eq => loosely_equal(left, right),
        Comparison::Ne => !loosely_equal(left, right),
        Comparison::Lt | Comparison::Le | Comparison::Gt | Comparison::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                Comparison::Lt => ordering.is_lt(),
                Comparison::Le => ordering.is_le(),
                Comparison::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    Op(&'static str),
    LParen,
    RParen,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(text) | Self::Ident(text) => f.write_str(text),
            Self::Str(text) => write!(f, "\"{text}\""),
            Self::Num(number) => write!(f, "{number}"),
            Self::Op(op) => f.write_str(op),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
        }
    }
}

const OPERATORS: [&str; 9] = ["==", "!=", "<=", ">=", "&&", "||", "<", ">", "!"];

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars = source.char_indices().collect::<Vec<_>>();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch == '(' || ch == ')' {
            tokens.push(if ch == '(' { Token::LParen } else { Token::RParen });
            i += 1;
            continue;
        }
        if ch == '"' || ch == '\'' {
            let mut text = String::new();
            let mut j = i + 1;
            loop {
                let Some(&(_, next)) = chars.get(j) else {
                    return Err(ExpressionError::UnterminatedString { offset });
                };
                if next == ch {
                    break;
                }
                if next == '\\' {
                    if let Some(&(_, escaped)) = chars.get(j + 1) {
                        text.push(escaped);
                        j += 2;
                        continue;
                    }
                }
                text.push(next);
                j += 1;
            }
            tokens.push(Token::Str(text));
            i = j + 1;
            continue;
        }
        if let Some(op) = OPERATORS
            .iter()
            .find(|op| source[offset..].starts_with(**op))
        {
            tokens.push(Token::Op(*op));
            i += op.chars().count();
            continue;
        }

        let word_end = chars[i..]
            .iter()
            .position(|(_, c)| !is_word_char(*c))
            .map_or(chars.len(), |p| i + p);
        if word_end == i {
            return Err(ExpressionError::UnexpectedChar { ch, offset });
        }
        let end_offset = chars.get(word_end).map_or(source.len(), |(o, _)| *o);
        let word = &source[offset..end_offset];
        i = word_end;

        let token = if word.starts_with('$') {
            FieldPath::parse(word)?;
            Token::Path(word.to_owned())
        } else if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            let number = word
                .parse::<i64>()
                .map(serde_json::Number::from)
                .ok()
                .or_else(|| word.parse::<f64>().ok().and_then(serde_json::Number::from_f64))
                .ok_or_else(|| ExpressionError::InvalidNumber {
                    text: word.to_owned(),
                })?;
            Token::Num(number)
        } else {
            Token::Ident(word.to_owned())
        };
        tokens.push(token);
    }

    Ok(tokens)
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '$' | '[' | ']')
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(current)) if *current == op) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.and()?;
        while self.eat_op("||") {
            left = Node::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.not()?;
        while self.eat_op("&&") {
            left = Node::And(Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Node, ExpressionError> {
        if self.eat_op("!") {
            return Ok(Node::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let left = self.operand()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => Comparison::Eq,
            Some(Token::Op("!=")) => Comparison::Ne,
            Some(Token::Op("<")) => Comparison::Lt,
            Some(Token::Op("<=")) => Comparison::Le,
            Some(Token::Op(">")) => Comparison::Gt,
            Some(Token::Op(">=")) => Comparison::Ge,
            _ => return Ok(left),
        };
        self.position += 1;
        let right = self.operand()?;
        Ok(Node::Compare(op, Box::new(left), Box::new(right)))
    }

    fn operand(&mut self) -> Result<Node, ExpressionError> {
        let token = self.next().ok_or(ExpressionError::UnexpectedEnd)?;
        match token {
            Token::LParen => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken {
                        token: other.to_string(),
                    }),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Token::Path(text) => Ok(Node::Path(FieldPath::parse(&text)?)),
            Token::Str(text) => Ok(Node::Literal(Value::String(text))),
            Token::Num(number) => Ok(Node::Literal(Value::Number(number))),
            Token::Ident(word) => Ok(match word.as_str() {
                "true" => Node::Literal(Value::Bool(true)),
                "false" => Node::Literal(Value::Bool(false)),
                "null" => Node::Literal(Value::Null),
                _ => Node::Variable(word.split('.').map(str::to_owned).collect()),
            }),
            other @ (Token::Op(_) | Token::RParen) => Err(ExpressionError::UnexpectedToken {
                token: other.to_string(),
            }),
        }
    }
}
