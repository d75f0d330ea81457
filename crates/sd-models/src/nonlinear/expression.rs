//! Model expressions for nonlinear regression
//!
//! Grammar, loosest binding first:
//! - `expr   := term (('+' | '-') term)*`
//! - `term   := unary (('*' | '/') unary)*`
//! - `unary  := '-' unary | power`
//! - `power  := atom (('^' | '**') unary)?`
//! - `atom   := number | name | name '(' args ')' | '(' expr ')'`
//!
//! Names are parameters when declared as such and data variables
//! otherwise. Function calls resolve through a [`FunctionRegistry`].

use std::iter::Peekable;
use std::str::Chars;

use indexmap::IndexMap;

use crate::error::{ModelError, Result};

/// Function body over evaluated arguments
pub type Function = fn(&[f64]) -> f64;

/// Number of arguments a function accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionDef {
    pub arity: Arity,
    pub apply: Function,
}

/// Functions callable from a model expression, looked up case-insensitively
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, FunctionDef>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elementary functions, with their SPSS spellings as aliases
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("exp", Arity::Exact(1), |a| a[0].exp());
        registry.register("ln", Arity::Exact(1), |a| a[0].ln());
        registry.register("log", Arity::Exact(1), |a| a[0].ln());
        registry.register("lg10", Arity::Exact(1), |a| a[0].log10());
        registry.register("log10", Arity::Exact(1), |a| a[0].log10());
        registry.register("sqrt", Arity::Exact(1), |a| a[0].sqrt());
        registry.register("abs", Arity::Exact(1), |a| a[0].abs());
        registry.register("sin", Arity::Exact(1), |a| a[0].sin());
        registry.register("cos", Arity::Exact(1), |a| a[0].cos());
        registry.register("tan", Arity::Exact(1), |a| a[0].tan());
        registry.register("arsin", Arity::Exact(1), |a| a[0].asin());
        registry.register("artan", Arity::Exact(1), |a| a[0].atan());
        registry.register("min", Arity::AtLeast(1), |a| a.iter().copied().fold(f64::INFINITY, f64::min));
        registry.register("max", Arity::AtLeast(1), |a| {
            a.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        });
        registry
    }

    /// Add or replace a function
    pub fn register(&mut self, name: &str, arity: Arity, apply: Function) {
        self.functions
            .insert(name.to_lowercase(), FunctionDef { arity, apply });
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Power => a.powf(b),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Number(f64),
    Parameter(usize),
    Variable(usize),
    Negate(Box<Node>),
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Call {
        name: String,
        apply: Function,
        args: Vec<Node>,
    },
}

impl Node {
    fn eval(&self, parameters: &[f64], variables: &[f64]) -> f64 {
        match self {
            Node::Number(v) => *v,
            Node::Parameter(i) => parameters.get(*i).copied().unwrap_or(f64::NAN),
            Node::Variable(i) => variables.get(*i).copied().unwrap_or(f64::NAN),
            Node::Negate(inner) => -inner.eval(parameters, variables),
            Node::Binary { op, left, right } => {
                op.apply(left.eval(parameters, variables), right.eval(parameters, variables))
            }
            Node::Call { apply, args, .. } => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(parameters, variables)).collect();
                apply(&values)
            }
        }
    }

    fn visit_parameters(&self, found: &mut Vec<usize>) {
        match self {
            Node::Parameter(i) => found.push(*i),
            Node::Negate(inner) => inner.visit_parameters(found),
            Node::Binary { left, right, .. } => {
                left.visit_parameters(found);
                right.visit_parameters(found);
            }
            Node::Call { args, .. } => args.iter().for_each(|a| a.visit_parameters(found)),
            Node::Number(_) | Node::Variable(_) => {}
        }
    }
}

/// A parsed model expression
#[derive(Debug, Clone)]
pub struct Expression {
    root: Node,
    source: String,
    /// Data variables in order of first use
    variables: Vec<String>,
}

impl Expression {
    /// Parse `source`, treating the names in `parameters` as parameters
    pub fn parse(source: &str, parameters: &[String], registry: &FunctionRegistry) -> Result<Self> {
        let mut parser = Parser {
            chars: source.chars().peekable(),
            position: 0,
            parameters,
            registry,
            variables: Vec::new(),
        };
        parser.skip_whitespace();
        if parser.peek().is_none() {
            return Err(ModelError::Expression {
                position: 0,
                message: "Empty expression".to_string(),
            });
        }
        let root = parser.parse_expr()?;
        parser.skip_whitespace();
        if let Some(c) = parser.peek() {
            return Err(parser.error(format!("Unexpected '{}'", c)));
        }
        Ok(Self {
            root,
            source: source.to_string(),
            variables: parser.variables,
        })
    }

    pub fn eval(&self, parameters: &[f64], variables: &[f64]) -> f64 {
        self.root.eval(parameters, variables)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn uses_parameter(&self, index: usize) -> bool {
        let mut found = Vec::new();
        self.root.visit_parameters(&mut found);
        found.contains(&index)
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
    parameters: &'a [String],
    registry: &'a FunctionRegistry,
    variables: Vec<String>,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ModelError {
        ModelError::Expression {
            position: self.position,
            message: message.into(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse_expr(&mut self) -> Result<Node> {
        let mut left = self.parse_term()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_term()?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Node> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('/') => BinaryOp::Divide,
                Some('*') => {
                    // `**` is power, handled below the unary level
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'*') {
                        return Ok(left);
                    }
                    BinaryOp::Multiply
                }
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary()?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Node> {
        self.skip_whitespace();
        if self.peek() == Some('-') {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Node::Negate(Box::new(inner)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Node> {
        let base = self.parse_atom()?;
        self.skip_whitespace();
        let is_power = match self.peek() {
            Some('^') => {
                self.bump();
                true
            }
            Some('*') => {
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if lookahead.peek() == Some(&'*') {
                    self.bump();
                    self.bump();
                    true
                } else {
                    false
                }
            }
            _ => false,
        };
        if !is_power {
            return Ok(base);
        }
        let exponent = self.parse_unary()?;
        Ok(Node::Binary {
            op: BinaryOp::Power,
            left: Box::new(base),
            right: Box::new(exponent),
        })
    }

    fn parse_atom(&mut self) -> Result<Node> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.bump();
                let inner = self.parse_expr()?;
                self.skip_whitespace();
                match self.bump() {
                    Some(')') => Ok(inner),
                    Some(c) => Err(self.error(format!("Expected ')', found '{}'", c))),
                    None => Err(self.error("Unexpected end of expression, expected ')'")),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' || c == '@' || c == '#' || c == '$' => {
                self.parse_name()
            }
            Some(c) => Err(self.error(format!("Unexpected '{}'", c))),
            None => Err(self.error("Unexpected end of expression")),
        }
    }

    fn parse_number(&mut self) -> Result<Node> {
        let start = self.position;
        let mut literal = String::new();
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '+' || c == '-')
                && literal.ends_with(['e', 'E']);
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                literal.push(c);
                self.bump();
            } else {
                break;
            }
        }
        literal.parse::<f64>().map(Node::Number).map_err(|_| ModelError::Expression {
            position: start,
            message: format!("Invalid number '{}'", literal),
        })
    }

    fn parse_name(&mut self) -> Result<Node> {
        let start = self.position;
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '#' | '$') {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }

        self.skip_whitespace();
        if self.peek() == Some('(') {
            self.bump();
            return self.parse_call(name, start);
        }

        if let Some(index) = self.parameters.iter().position(|p| p.eq_ignore_ascii_case(&name)) {
            return Ok(Node::Parameter(index));
        }
        let index = match self.variables.iter().position(|v| *v == name) {
            Some(i) => i,
            None => {
                self.variables.push(name);
                self.variables.len() - 1
            }
        };
        Ok(Node::Variable(index))
    }

    fn parse_call(&mut self, name: String, start: usize) -> Result<Node> {
        let Some(def) = self.registry.get(&name).copied() else {
            return Err(ModelError::Expression {
                position: start,
                message: format!("Unknown function '{}'", name),
            });
        };

        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.bump();
        } else {
            loop {
                args.push(self.parse_expr()?);
                self.skip_whitespace();
                match self.bump() {
                    Some(',') => continue,
                    Some(')') => break,
                    Some(c) => return Err(self.error(format!("Expected ',' or ')', found '{}'", c))),
                    None => return Err(self.error("Unexpected end of expression, expected ')'")),
                }
            }
        }

        if !def.arity.accepts(args.len()) {
            let expected = match def.arity {
                Arity::Exact(k) => k.to_string(),
                Arity::AtLeast(k) => format!("at least {}", k),
            };
            return Err(ModelError::Expression {
                position: start,
                message: format!(
                    "Function '{}' expects {} argument(s), found {}",
                    name,
                    expected,
                    args.len()
                ),
            });
        }
        Ok(Node::Call {
            name: name.to_lowercase(),
            apply: def.apply,
            args,
        })
    }
}
