//! The hook expression language: lexer, recursive-descent parser, and
//! evaluator over a JSON payload.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := add (("==" | "!=" | "<" | "<=" | ">" | ">=") add)?
//! add     := mul (("+" | "-") mul)*
//! mul     := unary (("*" | "/" | "%") unary)*
//! unary   := ("!" | "-") unary | postfix
//! postfix := primary ("." ident | "." ident "(" args ")")*
//! primary := number | string | "true" | "false" | "null"
//!          | ident | "(" expr ")" | "{" ... "}" (object literal)
//! ```
//!
//! Root identifiers resolve against the payload object. Method calls are
//! limited to the fixed helper set; anything else fails at parse time.

use serde_json::{Map, Value};
use std::fmt;

/// Hard cap on AST nodes; registration rejects larger programs.
pub const MAX_NODES: usize = 256;
/// Evaluation step budget (nodes visited), a cheap stand-in for a timer
/// in a language with no loops.
const MAX_EVAL_STEPS: usize = 4_096;

const METHODS: &[&str] = &[
    "contains",
    "starts_with",
    "ends_with",
    "len",
    "lower",
    "upper",
    "get",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Field(Box<Expr>, String),
    Method(Box<Expr>, String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Object(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

fn lex(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed = number
                    .parse::<f64>()
                    .map_err(|_| ParseError(format!("bad number literal '{number}'")))?;
                tokens.push(Token::Number(parsed));
            }
            '"' | '\'' => {
                let quote = ch;
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => break,
                        }
                    } else {
                        text.push(c);
                    }
                }
                if !closed {
                    return Err(ParseError("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(text));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => {
                chars.next();
                let two: Option<&'static str> = match (ch, chars.peek().copied()) {
                    ('&', Some('&')) => Some("&&"),
                    ('|', Some('|')) => Some("||"),
                    ('=', Some('=')) => Some("=="),
                    ('!', Some('=')) => Some("!="),
                    ('<', Some('=')) => Some("<="),
                    ('>', Some('=')) => Some(">="),
                    _ => None,
                };
                if let Some(punct) = two {
                    chars.next();
                    tokens.push(Token::Punct(punct));
                    continue;
                }
                let one: &'static str = match ch {
                    '!' => "!",
                    '<' => "<",
                    '>' => ">",
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    '(' => "(",
                    ')' => ")",
                    '.' => ".",
                    ',' => ",",
                    '{' => "{",
                    '}' => "}",
                    ':' => ":",
                    other => {
                        return Err(ParseError(format!("unexpected character '{other}'")));
                    }
                };
                tokens.push(Token::Punct(one));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nodes: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(ParseError(format!("expected '{punct}'")))
        }
    }

    fn node(&mut self) -> Result<(), ParseError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(ParseError(format!(
                "expression exceeds {MAX_NODES} nodes"
            )));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            self.node()?;
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_cmp()?;
        while self.eat_punct("&&") {
            self.node()?;
            let right = self.parse_cmp()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Punct("==")) => Some(BinaryOp::Eq),
            Some(Token::Punct("!=")) => Some(BinaryOp::Ne),
            Some(Token::Punct("<")) => Some(BinaryOp::Lt),
            Some(Token::Punct("<=")) => Some(BinaryOp::Le),
            Some(Token::Punct(">")) => Some(BinaryOp::Gt),
            Some(Token::Punct(">=")) => Some(BinaryOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                self.node()?;
                let right = self.parse_add()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_add(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("+")) => BinaryOp::Add,
                Some(Token::Punct("-")) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.node()?;
            let right = self.parse_mul()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("*")) => BinaryOp::Mul,
                Some(Token::Punct("/")) => BinaryOp::Div,
                Some(Token::Punct("%")) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.node()?;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_punct("!") {
            self.node()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat_punct("-") {
            self.node()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.eat_punct(".") {
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                _ => return Err(ParseError("expected field or method name after '.'".to_string())),
            };
            self.node()?;
            if self.eat_punct("(") {
                if !METHODS.contains(&name.as_str()) {
                    return Err(ParseError(format!("unknown method '{name}'")));
                }
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                expr = Expr::Method(Box::new(expr), name, args);
            } else {
                expr = Expr::Field(Box::new(expr), name);
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.node()?;
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Ident(ident)),
            },
            Some(Token::Punct("(")) => {
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Token::Punct("{")) => {
                let mut fields = Vec::new();
                if !self.eat_punct("}") {
                    loop {
                        let key = match self.next() {
                            Some(Token::Ident(key)) | Some(Token::Str(key)) => key,
                            _ => return Err(ParseError("expected object key".to_string())),
                        };
                        self.expect_punct(":")?;
                        fields.push((key, self.parse_expr()?));
                        if self.eat_punct("}") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(fields))
            }
            Some(other) => Err(ParseError(format!("unexpected token {other:?}"))),
            None => Err(ParseError("unexpected end of expression".to_string())),
        }
    }
}

/// Parse and statically validate a hook program.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError("empty expression".to_string()));
    }
    let tokens = lex(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nodes: 0,
    };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError("trailing input after expression".to_string()));
    }
    Ok(expr)
}

/// Evaluate against a payload object. Root identifiers resolve to
/// payload fields (missing fields are `null`).
pub fn eval(expr: &Expr, payload: &Value) -> Result<Value, ParseError> {
    let mut steps = 0usize;
    eval_inner(expr, payload, &mut steps)
}

fn eval_inner(expr: &Expr, payload: &Value, steps: &mut usize) -> Result<Value, ParseError> {
    *steps += 1;
    if *steps > MAX_EVAL_STEPS {
        return Err(ParseError("evaluation budget exceeded".to_string()));
    }

    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => Ok(payload.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Field(base, name) => {
            let base = eval_inner(base, payload, steps)?;
            Ok(base.get(name).cloned().unwrap_or(Value::Null))
        }
        Expr::Method(base, name, args) => {
            let base = eval_inner(base, payload, steps)?;
            let args = args
                .iter()
                .map(|arg| eval_inner(arg, payload, steps))
                .collect::<Result<Vec<_>, _>>()?;
            eval_method(&base, name, &args)
        }
        Expr::Unary(op, inner) => {
            let value = eval_inner(inner, payload, steps)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match value.as_f64() {
                    Some(n) => Ok(number(-n)),
                    None => Err(ParseError("cannot negate a non-number".to_string())),
                },
            }
        }
        Expr::Binary(op, left, right) => {
            // Short-circuit the boolean operators.
            match op {
                BinaryOp::And => {
                    let left = eval_inner(left, payload, steps)?;
                    if !truthy(&left) {
                        return Ok(Value::Bool(false));
                    }
                    let right = eval_inner(right, payload, steps)?;
                    return Ok(Value::Bool(truthy(&right)));
                }
                BinaryOp::Or => {
                    let left = eval_inner(left, payload, steps)?;
                    if truthy(&left) {
                        return Ok(Value::Bool(true));
                    }
                    let right = eval_inner(right, payload, steps)?;
                    return Ok(Value::Bool(truthy(&right)));
                }
                _ => {}
            }

            let left = eval_inner(left, payload, steps)?;
            let right = eval_inner(right, payload, steps)?;
            eval_binary(*op, &left, &right)
        }
        Expr::Object(fields) => {
            let mut map = Map::new();
            for (key, value_expr) in fields {
                map.insert(key.clone(), eval_inner(value_expr, payload, steps)?);
            }
            Ok(Value::Object(map))
        }
    }
}

fn eval_method(base: &Value, name: &str, args: &[Value]) -> Result<Value, ParseError> {
    let arg_str = |index: usize| -> Result<&str, ParseError> {
        args.get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError(format!("method '{name}' expects a string argument")))
    };

    match name {
        "contains" => match base {
            Value::String(text) => Ok(Value::Bool(text.contains(arg_str(0)?))),
            Value::Array(items) => Ok(Value::Bool(items.contains(
                args.first()
                    .ok_or_else(|| ParseError("contains expects an argument".to_string()))?,
            ))),
            _ => Ok(Value::Bool(false)),
        },
        "starts_with" => Ok(Value::Bool(
            base.as_str().is_some_and(|text| text.starts_with(arg_str(0).unwrap_or_default())),
        )),
        "ends_with" => Ok(Value::Bool(
            base.as_str().is_some_and(|text| text.ends_with(arg_str(0).unwrap_or_default())),
        )),
        "len" => {
            let length = match base {
                Value::String(text) => text.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                _ => 0,
            };
            Ok(number(length as f64))
        }
        "lower" => Ok(base
            .as_str()
            .map(|text| Value::String(text.to_lowercase()))
            .unwrap_or(Value::Null)),
        "upper" => Ok(base
            .as_str()
            .map(|text| Value::String(text.to_uppercase()))
            .unwrap_or(Value::Null)),
        "get" => Ok(base.get(arg_str(0)?).cloned().unwrap_or(Value::Null)),
        other => Err(ParseError(format!("unknown method '{other}'"))),
    }
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ParseError> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(left == right)),
        Ne => Ok(Value::Bool(left != right)),
        Lt | Le | Gt | Ge => {
            let ordering = compare(left, right)
                .ok_or_else(|| ParseError("cannot compare these values".to_string()))?;
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(left, right, |a, b| a + b),
        },
        Sub => arithmetic(left, right, |a, b| a - b),
        Mul => arithmetic(left, right, |a, b| a * b),
        Div => arithmetic(left, right, |a, b| a / b),
        Rem => arithmetic(left, right, |a, b| a % b),
        And | Or => unreachable!("handled with short-circuiting"),
    }
}

fn arithmetic(left: &Value, right: &Value, op: fn(f64, f64) -> f64) -> Result<Value, ParseError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(number(op(a, b))),
        _ => Err(ParseError("arithmetic on non-numbers".to_string())),
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(program: &str, payload: Value) -> Value {
        eval(&parse(program).unwrap(), &payload).unwrap()
    }

    #[test]
    fn test_literals_and_arithmetic() {
        assert_eq!(run("1 + 2 * 3", json!({})), json!(7.0));
        assert_eq!(run("(1 + 2) * 3", json!({})), json!(9.0));
        assert_eq!(run("10 % 3", json!({})), json!(1.0));
        assert_eq!(run("-4 + 6", json!({})), json!(2.0));
    }

    #[test]
    fn test_field_access() {
        let payload = json!({"arguments": {"path": "/tmp/x", "depth": 3}});
        assert_eq!(run("arguments.path", payload.clone()), json!("/tmp/x"));
        assert_eq!(run("arguments.depth > 2", payload.clone()), json!(true));
        assert_eq!(run("arguments.missing", payload), Value::Null);
    }

    #[test]
    fn test_string_helpers() {
        let payload = json!({"tool": "write_file"});
        assert_eq!(run("tool.starts_with('write_')", payload.clone()), json!(true));
        assert_eq!(run("tool.ends_with('file')", payload.clone()), json!(true));
        assert_eq!(run("tool.contains('rite')", payload.clone()), json!(true));
        assert_eq!(run("tool.len()", payload.clone()), json!(10.0));
        assert_eq!(run("tool.upper()", payload), json!("WRITE_FILE"));
    }

    #[test]
    fn test_boolean_operators_short_circuit() {
        let payload = json!({"a": true});
        assert_eq!(run("a && tool.len() >= 0 || false", payload.clone()), json!(true));
        // Right side of || never evaluates when left is true.
        assert_eq!(run("a || missing.field.deeper", payload), json!(true));
    }

    #[test]
    fn test_object_literal_builds_replacement_arguments() {
        let payload = json!({"arguments": {"path": "/etc/passwd"}});
        let result = run("{path: '/tmp/safe', redirected: true}", payload);
        assert_eq!(result, json!({"path": "/tmp/safe", "redirected": true}));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("'abc' < 'abd'", json!({})), json!(true));
        assert_eq!(run("3 >= 3", json!({})), json!(true));
        assert_eq!(run("'a' == 'a' && 1 != 2", json!({})), json!(true));
    }

    #[test]
    fn test_unknown_method_rejected_at_parse() {
        let err = parse("tool.system('rm -rf /')").unwrap_err();
        assert!(err.0.contains("unknown method"));
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(parse("").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("tool..name").is_err());
        assert!(parse("1 @ 2").is_err());
        assert!(parse("'unterminated").is_err());
    }

    #[test]
    fn test_node_cap() {
        let program = "1".to_string() + &" + 1".repeat(MAX_NODES);
        let err = parse(&program).unwrap_err();
        assert!(err.0.contains("nodes"));
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(parse("1 + 1 extra").is_err());
    }

    #[test]
    fn test_type_errors_surface() {
        let payload = json!({"tool": "x"});
        assert!(eval(&parse("tool - 1").unwrap(), &payload).is_err());
        assert!(eval(&parse("tool < 1").unwrap(), &payload).is_err());
    }
}
