//! Arithmetic/logical formula language used by formula ratings, transitional
//! ratings and virtual-rating sources.
//!
//! Variables: `ARGn`, `$n`, `In` and `$In` name the n-th independent input;
//! `Rn` and `$Rn` name the output of the n-th source rating. Indices start at 1.
//! Booleans are numbers: comparisons yield `1.0` or `0.0`, and any non-zero
//! value is true.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{RatingError, Result};

/// A variable reference, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    Input(usize),
    Source(usize),
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Input(i) => write!(f, "I{}", i + 1),
            Variable::Source(i) => write!(f, "R{}", i + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Min,
    Max,
    Floor,
    Ceil,
    Round,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        let func = match name {
            "ABS" => Func::Abs,
            "SQRT" => Func::Sqrt,
            "EXP" => Func::Exp,
            "LN" => Func::Ln,
            "LOG" | "LOG10" => Func::Log10,
            "SIN" => Func::Sin,
            "COS" => Func::Cos,
            "TAN" => Func::Tan,
            "MIN" => Func::Min,
            "MAX" => Func::Max,
            "FLOOR" => Func::Floor,
            "CEIL" | "CEILING" => Func::Ceil,
            "ROUND" => Func::Round,
            "POW" => Func::Pow,
            _ => return None,
        };
        Some(func)
    }

    /// Accepted argument counts (min, max).
    fn arity(&self) -> (usize, usize) {
        match self {
            Func::Min | Func::Max => (1, usize::MAX),
            Func::Pow => (2, 2),
            _ => (1, 1),
        }
    }

    fn apply(&self, args: &[f64]) -> f64 {
        match self {
            Func::Abs => args[0].abs(),
            Func::Sqrt => args[0].sqrt(),
            Func::Exp => args[0].exp(),
            Func::Ln => args[0].ln(),
            Func::Log10 => args[0].log10(),
            Func::Sin => args[0].sin(),
            Func::Cos => args[0].cos(),
            Func::Tan => args[0].tan(),
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Floor => args[0].floor(),
            Func::Ceil => args[0].ceil(),
            Func::Round => args[0].round(),
            Func::Pow => args[0].powf(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Var(Variable),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
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
            let value = literal
                .parse::<f64>()
                .map_err(|_| RatingError::Expression(format!("bad number '{}'", literal)))?;
            tokens.push(Token::Number(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::Op("^"), 2),
            ('<', Some('=')) => (Token::Op("<="), 2),
            ('>', Some('=')) => (Token::Op(">="), 2),
            ('=', Some('=')) => (Token::Op("=="), 2),
            ('!', Some('=')) => (Token::Op("!="), 2),
            ('<', Some('>')) => (Token::Op("!="), 2),
            ('&', Some('&')) => (Token::Op("AND"), 2),
            ('|', Some('|')) => (Token::Op("OR"), 2),
            ('+', _) => (Token::Op("+"), 1),
            ('-', _) => (Token::Op("-"), 1),
            ('*', _) => (Token::Op("*"), 1),
            ('/', _) => (Token::Op("/"), 1),
            ('^', _) => (Token::Op("^"), 1),
            ('<', _) => (Token::Op("<"), 1),
            ('>', _) => (Token::Op(">"), 1),
            ('=', _) => (Token::Op("=="), 1),
            ('!', _) => (Token::Op("NOT"), 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => {
                return Err(RatingError::Expression(format!(
                    "unexpected character '{}' in '{}'",
                    c, text
                )))
            }
        };
        tokens.push(token);
        i += width;
    }
    Ok(tokens)
}

/// Resolve an identifier to a variable reference, if it is one.
fn variable(ident: &str) -> Result<Option<Variable>> {
    let upper = ident.to_ascii_uppercase();
    let bare = upper.strip_prefix('$').unwrap_or(&upper);
    let (kind, digits) = if bare.chars().all(|c| c.is_ascii_digit()) && !bare.is_empty() {
        ("I", bare)
    } else if let Some(rest) = bare.strip_prefix("ARG") {
        ("I", rest)
    } else if let Some(rest) = bare.strip_prefix('I') {
        ("I", rest)
    } else if let Some(rest) = bare.strip_prefix('R') {
        ("R", rest)
    } else {
        return Ok(None);
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }
    let index: usize = digits
        .parse()
        .map_err(|_| RatingError::Expression(format!("bad variable '{}'", ident)))?;
    if index == 0 {
        return Err(RatingError::Expression(format!(
            "variable indices start at 1: '{}'",
            ident
        )));
    }
    Ok(Some(match kind {
        "I" => Variable::Input(index - 1),
        _ => Variable::Source(index - 1),
    }))
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) => Some(*op),
            Some(Token::Ident(id)) => match id.to_ascii_uppercase().as_str() {
                "AND" => Some("AND"),
                "OR" => Some("OR"),
                "NOT" => Some("NOT"),
                _ => None,
            },
            _ => None,
        }
    }

    fn error(&self, message: &str) -> RatingError {
        RatingError::Expression(format!("{} in '{}'", message, self.text))
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", token)))
        }
    }

    fn or(&mut self) -> Result<Node> {
        let mut left = self.and()?;
        while self.peek_op() == Some("OR") {
            self.pos += 1;
            let right = self.and()?;
            left = Node::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node> {
        let mut left = self.not()?;
        while self.peek_op() == Some("AND") {
            self.pos += 1;
            let right = self.not()?;
            left = Node::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Node> {
        if self.peek_op() == Some("NOT") {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node> {
        let left = self.additive()?;
        let op = match self.peek_op() {
            Some("<") => BinOp::Lt,
            Some("<=") => BinOp::Le,
            Some(">") => BinOp::Gt,
            Some(">=") => BinOp::Ge,
            Some("==") => BinOp::Eq,
            Some("!=") => BinOp::Ne,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Node::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Node> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_op() {
                Some("+") => BinOp::Add,
                Some("-") => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Node> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_op() {
                Some("*") => BinOp::Mul,
                Some("/") => BinOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // right associative; the exponent may carry its own sign
    fn power(&mut self) -> Result<Node> {
        let base = self.primary()?;
        if self.peek_op() == Some("^") {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node> {
        let token = self.peek().cloned().ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        match token {
            Token::Number(v) => Ok(Node::Number(v)),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(ident) => {
                let upper = ident.to_ascii_uppercase();
                if self.peek() == Some(&Token::LParen) {
                    let func = Func::lookup(&upper)
                        .ok_or_else(|| self.error(&format!("unknown function '{}'", ident)))?;
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        args.push(self.or()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            args.push(self.or()?);
                        }
                    }
                    self.expect(Token::RParen)?;
                    let (min, max) = func.arity();
                    if args.len() < min || args.len() > max {
                        return Err(self.error(&format!(
                            "wrong number of arguments to '{}'",
                            ident
                        )));
                    }
                    return Ok(Node::Call(func, args));
                }
                match upper.as_str() {
                    "PI" => return Ok(Node::Number(std::f64::consts::PI)),
                    "E" => return Ok(Node::Number(std::f64::consts::E)),
                    _ => {}
                }
                variable(&ident)?
                    .map(Node::Var)
                    .ok_or_else(|| self.error(&format!("unknown identifier '{}'", ident)))
            }
            other => Err(self.error(&format!("unexpected {:?}", other))),
        }
    }
}

fn truth(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn collect_variables(node: &Node, into: &mut BTreeSet<Variable>) {
    match node {
        Node::Number(_) => {}
        Node::Var(v) => {
            into.insert(*v);
        }
        Node::Neg(inner) | Node::Not(inner) => collect_variables(inner, into),
        Node::Binary(_, left, right) => {
            collect_variables(left, into);
            collect_variables(right, into);
        }
        Node::Call(_, args) => args.iter().for_each(|a| collect_variables(a, into)),
    }
}

/// A parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    root: Node,
    variables: BTreeSet<Variable>,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(RatingError::Expression("empty expression".to_string()));
        }
        let mut parser = Parser {
            text,
            tokens,
            pos: 0,
        };
        let root = parser.or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        let mut variables = BTreeSet::new();
        collect_variables(&root, &mut variables);
        Ok(Self {
            text: text.trim().to_string(),
            root,
            variables,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.variables.iter().copied()
    }

    /// One more than the highest input index referenced.
    pub fn input_count(&self) -> usize {
        self.variables
            .iter()
            .filter_map(|v| match v {
                Variable::Input(i) => Some(i + 1),
                Variable::Source(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// One more than the highest source index referenced.
    pub fn source_count(&self) -> usize {
        self.variables
            .iter()
            .filter_map(|v| match v {
                Variable::Source(i) => Some(i + 1),
                Variable::Input(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Evaluate, asking `lookup` for each variable as it is reached.
    ///
    /// `and`/`or` short-circuit, so a variable on the untaken side is never
    /// looked up.
    pub fn evaluate<F>(&self, mut lookup: F) -> Result<f64>
    where
        F: FnMut(Variable) -> Result<f64>,
    {
        eval(&self.root, &mut lookup)
    }

    /// Evaluate with inputs only.
    pub fn evaluate_inputs(&self, inputs: &[f64]) -> Result<f64> {
        self.evaluate(|var| match var {
            Variable::Input(i) => inputs.get(i).copied().ok_or_else(|| {
                RatingError::Configuration(format!(
                    "'{}' references {} but only {} inputs were given",
                    self.text,
                    var,
                    inputs.len()
                ))
            }),
            Variable::Source(_) => Err(RatingError::Expression(format!(
                "'{}' references a source rating",
                self.text
            ))),
        })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn eval<F>(node: &Node, lookup: &mut F) -> Result<f64>
where
    F: FnMut(Variable) -> Result<f64>,
{
    let value = match node {
        Node::Number(v) => *v,
        Node::Var(var) => lookup(*var)?,
        Node::Neg(inner) => -eval(inner, lookup)?,
        Node::Not(inner) => flag(!truth(eval(inner, lookup)?)),
        Node::Binary(BinOp::And, left, right) => {
            flag(truth(eval(left, lookup)?) && truth(eval(right, lookup)?))
        }
        Node::Binary(BinOp::Or, left, right) => {
            flag(truth(eval(left, lookup)?) || truth(eval(right, lookup)?))
        }
        Node::Binary(op, left, right) => {
            let a = eval(left, lookup)?;
            let b = eval(right, lookup)?;
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Pow => a.powf(b),
                BinOp::Lt => flag(a < b),
                BinOp::Le => flag(a <= b),
                BinOp::Gt => flag(a > b),
                BinOp::Ge => flag(a >= b),
                BinOp::Eq => flag(a == b),
                BinOp::Ne => flag(a != b),
                BinOp::And | BinOp::Or => unreachable!("handled above"),
            }
        }
        Node::Call(func, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, lookup))
                .collect::<Result<Vec<f64>>>()?;
            func.apply(&values)
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(text: &str, inputs: &[f64]) -> f64 {
        Expression::parse(text).unwrap().evaluate_inputs(inputs).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(calc("1 + 2 * 3", &[]), 7.0);
        assert_eq!(calc("(1 + 2) * 3", &[]), 9.0);
        assert_eq!(calc("2 ^ 3 ^ 2", &[]), 512.0);
        assert_eq!(calc("-2 ^ 2", &[]), -4.0);
        assert_eq!(calc("2 ** -1", &[]), 0.5);
        assert_eq!(calc("10 - 4 - 3", &[]), 3.0);
    }

    #[test]
    fn test_variables_all_spellings() {
        let inputs = [2.0, 5.0];
        assert_eq!(calc("ARG1 + arg2", &inputs), 7.0);
        assert_eq!(calc("$1 * $2", &inputs), 10.0);
        assert_eq!(calc("I1 + $I2", &inputs), 7.0);
    }

    #[test]
    fn test_functions_and_constants() {
        assert!((calc("sqrt(16) + abs(-1) + log10(100)", &[]) - 7.0).abs() < 1e-12);
        assert_eq!(calc("max(1, 5, 3) - min(4, 2)", &[]), 3.0);
        assert!((calc("cos(pi)", &[]) + 1.0).abs() < 1e-12);
        assert!((calc("ln(e)", &[]) - 1.0).abs() < 1e-12);
        assert_eq!(calc("pow(2, 10)", &[]), 1024.0);
        assert_eq!(calc("floor(2.7) + ceil(2.2) + round(2.5)", &[]), 8.0);
    }

    #[test]
    fn test_logic() {
        assert_eq!(calc("I1 > 3 and I1 <= 10", &[5.0]), 1.0);
        assert_eq!(calc("I1 > 3 && I1 <= 10", &[12.0]), 0.0);
        assert_eq!(calc("not (I1 == 1) || I1 != 1", &[1.0]), 0.0);
        assert_eq!(calc("I1 <> 2", &[1.0]), 1.0);
    }

    #[test]
    fn test_short_circuit_skips_lookup() {
        let expr = Expression::parse("I1 > 0 or R1 > 0").unwrap();
        let mut asked = Vec::new();
        let value = expr
            .evaluate(|var| {
                asked.push(var);
                Ok(1.0)
            })
            .unwrap();
        assert_eq!(value, 1.0);
        assert_eq!(asked, vec![Variable::Input(0)]);
    }

    #[test]
    fn test_variable_inventory() {
        let expr = Expression::parse("R2 * I3 + $R1").unwrap();
        assert_eq!(expr.input_count(), 3);
        assert_eq!(expr.source_count(), 2);
        assert_eq!(
            expr.variables().collect::<Vec<_>>(),
            vec![Variable::Input(2), Variable::Source(0), Variable::Source(1)]
        );
    }

    #[test]
    fn test_scientific_numbers() {
        assert_eq!(calc("1.5e2 + .5", &[]), 150.5);
        assert_eq!(calc("2E-1", &[]), 0.2);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "1 +", "(1", "foo(1)", "I0", "1 2", "x", "sqrt(1, 2)", "#"] {
            assert!(
                matches!(Expression::parse(bad), Err(RatingError::Expression(_))),
                "{} should not parse",
                bad
            );
        }
    }

    #[test]
    fn test_missing_input_is_configuration_error() {
        let expr = Expression::parse("I2").unwrap();
        assert!(matches!(
            expr.evaluate_inputs(&[1.0]),
            Err(RatingError::Configuration(_))
        ));
    }
}
