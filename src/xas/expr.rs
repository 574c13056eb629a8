//! # Channel Expression Evaluator
//!
//! Users derive signals from raw channels with small math expressions,
//! e.g. `log(I0 / Ir_Pt_corr)` or `instrument__mu_roi * 2`. The grammar
//! is explicit: a tokenizer and Pratt parser produce an AST which an
//! interpreter evaluates over the loaded channel arrays. There is no
//! reflection and no dynamic evaluation: only the whitelisted functions
//! and the referenced channels exist in the namespace.
//!
//! Channel references come in two spellings:
//!
//! - full path with `/` rewritten to `__`: `instrument__energy_enc`
//! - short name, accepted only when unambiguous: `energy_enc`
//!
//! Ambiguous short names are dropped during reference extraction, which
//! surfaces later as an evaluation failure, the same observable behavior
//! a missing channel has.

use std::collections::HashMap;

use ndarray::Array1;

use crate::xas::store::ScanStore;
use crate::xas::XasError;

/// Whitelisted one-argument functions.
const UNARY_FUNCTIONS: &[&str] = &[
    "abs", "sign", "sqrt", "square", "sin", "cos", "tan", "arcsin", "arccos", "arctan", "sinh",
    "cosh", "tanh", "exp", "log", "log10", "log2", "expm1", "log1p", "floor", "ceil", "round",
    "trunc",
];

/// Whitelisted two-argument functions.
const BINARY_FUNCTIONS: &[&str] = &["power"];

/// Whitelisted constants.
const CONSTANTS: &[(&str, f64)] = &[("pi", std::f64::consts::PI), ("e", std::f64::consts::E)];

fn is_function(name: &str) -> bool {
    UNARY_FUNCTIONS.contains(&name) || BINARY_FUNCTIONS.contains(&name)
}

fn is_constant(name: &str) -> bool {
    CONSTANTS.iter().any(|(n, _)| *n == name)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    DoubleStar,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, XasError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    tokens.push(Token::DoubleStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit()
                        || bytes[i] == b'.'
                        || bytes[i] == b'e'
                        || bytes[i] == b'E'
                        || ((bytes[i] == b'+' || bytes[i] == b'-')
                            && i > start
                            && (bytes[i - 1] == b'e' || bytes[i - 1] == b'E')))
                {
                    i += 1;
                }
                let text = &input[start..i];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| XasError::EvalError(format!("bad number literal '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(input[start..i].to_string()));
            }
            other => {
                return Err(XasError::EvalError(format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// Channel reference or constant
    Ident(String),
    /// Unary negation
    Neg(Box<Expr>),
    /// Binary operation
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Whitelisted function call
    Call(String, Vec<Expr>),
}

/// Binary operators of the expression grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `**`
    Pow,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<(), XasError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(XasError::EvalError(format!("expected {token:?}, found {other:?}"))),
        }
    }

    /// Pratt loop. `**` is right-associative and binds tighter than the
    /// unary minus, so `-x**2` parses as `-(x**2)`.
    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, XasError> {
        let mut lhs = match self.next() {
            Some(Token::Number(v)) => Expr::Number(v),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = vec![self.parse_expr(0)?];
                    while self.peek() == Some(&Token::Comma) {
                        self.next();
                        args.push(self.parse_expr(0)?);
                    }
                    self.expect(Token::RParen)?;
                    Expr::Call(name, args)
                } else {
                    Expr::Ident(name)
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                inner
            }
            Some(Token::Minus) => Expr::Neg(Box::new(self.parse_expr(5)?)),
            Some(Token::Plus) => self.parse_expr(5)?,
            other => {
                return Err(XasError::EvalError(format!("unexpected token {other:?}")));
            }
        };

        loop {
            let (op, lbp, rbp) = match self.peek() {
                Some(Token::Plus) => (BinOp::Add, 1, 2),
                Some(Token::Minus) => (BinOp::Sub, 1, 2),
                Some(Token::Star) => (BinOp::Mul, 3, 4),
                Some(Token::Slash) => (BinOp::Div, 3, 4),
                Some(Token::Percent) => (BinOp::Rem, 3, 4),
                Some(Token::DoubleStar) => (BinOp::Pow, 7, 6),
                _ => break,
            };
            if lbp < min_bp {
                break;
            }
            self.next();
            let rhs = self.parse_expr(rbp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }
}

/// Parse an expression into its tree.
pub fn parse(expression: &str) -> Result<Expr, XasError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(XasError::EvalError("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(XasError::EvalError("trailing input after expression".to_string()));
    }
    Ok(expr)
}

fn collect_idents(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Ident(name) => {
            if !is_constant(name) && !is_function(name) {
                out.push(name.clone());
            }
        }
        Expr::Neg(inner) => collect_idents(inner, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_idents(lhs, out);
            collect_idents(rhs, out);
        }
        Expr::Call(_, args) => {
            for arg in args {
                collect_idents(arg, out);
            }
        }
    }
}

/// Channel paths referenced by an expression, resolved against the
/// available channels.
///
/// Full `__`-paths are resolved first; bare identifiers resolve through
/// the short-name index only when exactly one channel carries that name.
/// Ambiguous and unknown identifiers are omitted.
pub fn extract_channel_refs(
    expression: &str,
    available_channels: &[String],
) -> Result<Vec<String>, XasError> {
    let expr = parse(expression)?;
    let mut idents = Vec::new();
    collect_idents(&expr, &mut idents);

    let mut path_lookup: HashMap<String, &str> = HashMap::new();
    let mut short_lookup: HashMap<&str, Vec<&str>> = HashMap::new();
    for channel in available_channels {
        if channel.contains('/') {
            path_lookup.insert(channel.replace('/', "__"), channel);
            let short = channel.rsplit('/').next().unwrap_or(channel);
            short_lookup.entry(short).or_default().push(channel);
        } else {
            path_lookup.insert(channel.clone(), channel);
            short_lookup.entry(channel).or_default().push(channel);
        }
    }

    let mut referenced: Vec<String> = Vec::new();
    for ident in idents {
        let resolved = path_lookup.get(&ident).copied().or_else(|| {
            match short_lookup.get(ident.as_str()).map(Vec::as_slice) {
                Some([single]) => Some(*single),
                _ => None,
            }
        });
        if let Some(path) = resolved {
            if !referenced.iter().any(|r| r == path) {
                referenced.push(path.to_string());
            }
        }
    }
    Ok(referenced)
}

/// A value in the interpreter: a scalar or a channel-length array.
#[derive(Debug, Clone)]
pub enum Value {
    /// Scalar
    Scalar(f64),
    /// 1-D array
    Array(Array1<f64>),
}

impl Value {
    fn unary(self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(v)),
            Value::Array(a) => Value::Array(a.mapv(f)),
        }
    }

    fn binary(self, rhs: Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, XasError> {
        Ok(match (self, rhs) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(a, b)),
            (Value::Scalar(a), Value::Array(b)) => Value::Array(b.mapv(|x| f(a, x))),
            (Value::Array(a), Value::Scalar(b)) => Value::Array(a.mapv(|x| f(x, b))),
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Err(XasError::EvalError(format!(
                        "array length mismatch: {} vs {}",
                        a.len(),
                        b.len()
                    )));
                }
                Value::Array(Array1::from_iter(a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y))))
            }
        })
    }
}

fn apply_function(name: &str, args: Vec<Value>) -> Result<Value, XasError> {
    if BINARY_FUNCTIONS.contains(&name) {
        if args.len() != 2 {
            return Err(XasError::EvalError(format!("{name}() takes 2 arguments")));
        }
        let mut iter = args.into_iter();
        let a = iter.next().expect("len checked");
        let b = iter.next().expect("len checked");
        return a.binary(b, f64::powf);
    }
    if !UNARY_FUNCTIONS.contains(&name) {
        return Err(XasError::EvalError(format!("unknown function '{name}'")));
    }
    if args.len() != 1 {
        return Err(XasError::EvalError(format!("{name}() takes 1 argument")));
    }
    let arg = args.into_iter().next().expect("len checked");

    let f: fn(f64) -> f64 = match name {
        "abs" => f64::abs,
        "sign" => f64::signum,
        "sqrt" => f64::sqrt,
        "square" => |v| v * v,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "arcsin" => f64::asin,
        "arccos" => f64::acos,
        "arctan" => f64::atan,
        "sinh" => f64::sinh,
        "cosh" => f64::cosh,
        "tanh" => f64::tanh,
        "exp" => f64::exp,
        "log" => f64::ln,
        "log10" => f64::log10,
        "log2" => f64::log2,
        "expm1" => f64::exp_m1,
        "log1p" => f64::ln_1p,
        "floor" => f64::floor,
        "ceil" => f64::ceil,
        "round" => f64::round,
        "trunc" => f64::trunc,
        _ => unreachable!("whitelist checked"),
    };
    Ok(arg.unary(f))
}

fn eval_expr(expr: &Expr, namespace: &HashMap<String, Value>) -> Result<Value, XasError> {
    match expr {
        Expr::Number(v) => Ok(Value::Scalar(*v)),
        Expr::Ident(name) => namespace
            .get(name)
            .cloned()
            .ok_or_else(|| XasError::EvalError(format!("unknown identifier '{name}'"))),
        Expr::Neg(inner) => Ok(eval_expr(inner, namespace)?.unary(|v| -v)),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, namespace)?;
            let rhs = eval_expr(rhs, namespace)?;
            match op {
                BinOp::Add => lhs.binary(rhs, |a, b| a + b),
                BinOp::Sub => lhs.binary(rhs, |a, b| a - b),
                BinOp::Mul => lhs.binary(rhs, |a, b| a * b),
                BinOp::Div => lhs.binary(rhs, |a, b| a / b),
                BinOp::Rem => lhs.binary(rhs, |a, b| a % b),
                BinOp::Pow => lhs.binary(rhs, f64::powf),
            }
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval_expr(a, namespace))
                .collect::<Result<Vec<_>, _>>()?;
            apply_function(name, args)
        }
    }
}

/// Evaluate an expression over one scan's channels.
///
/// Only the channels actually referenced are loaded. The namespace holds
/// exactly the whitelist constants and the loaded channels, under their
/// `__`-path name and (when free) their short name.
pub fn evaluate_expression(
    store: &dyn ScanStore,
    scan: &str,
    expression: &str,
    available_channels: &[String],
) -> Result<Array1<f64>, XasError> {
    let referenced = extract_channel_refs(expression, available_channels)?;
    if referenced.is_empty() {
        return Err(XasError::NoChannels(expression.to_string()));
    }

    let mut namespace: HashMap<String, Value> = CONSTANTS
        .iter()
        .map(|(name, value)| (name.to_string(), Value::Scalar(*value)))
        .collect();

    for channel_path in &referenced {
        let (parent, channel) = match channel_path.split_once('/') {
            Some((parent, channel)) => (parent.to_string(), channel.to_string()),
            None => {
                // Bare channel name: find it under any parent path.
                let parents = store.parent_paths(scan)?;
                let parent = parents
                    .into_iter()
                    .find(|p| store.has_channel(scan, p, channel_path))
                    .ok_or_else(|| {
                        XasError::NotFound(format!("channel '{channel_path}' in any parent path"))
                    })?;
                (parent, channel_path.clone())
            }
        };

        let data = store.read_channel(scan, &parent, &channel)?;
        let value =
            if data.len() == 1 { Value::Scalar(data[0]) } else { Value::Array(data) };

        namespace.insert(channel_path.replace('/', "__"), value.clone());
        namespace.entry(channel).or_insert(value);
    }

    let expr = parse(expression)?;
    match eval_expr(&expr, &namespace)? {
        Value::Array(a) => Ok(a),
        Value::Scalar(v) => Ok(Array1::from_elem(1, v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn parses_python_style_power() {
        // -x**2 must parse as -(x**2).
        let expr = parse("-x**2").unwrap();
        assert_eq!(
            expr,
            Expr::Neg(Box::new(Expr::Binary(
                BinOp::Pow,
                Box::new(Expr::Ident("x".to_string())),
                Box::new(Expr::Number(2.0)),
            )))
        );
        // Right associativity: 2**3**2 = 2**(3**2).
        let mut ns = HashMap::new();
        ns.insert("x".to_string(), Value::Scalar(3.0));
        let v = eval_expr(&parse("2**3**2").unwrap(), &ns).unwrap();
        match v {
            Value::Scalar(v) => assert_eq!(v, 512.0),
            _ => panic!("expected scalar"),
        }
    }

    #[test]
    fn extract_resolves_paths_and_short_names() {
        let available = channels(&[
            "instrument/energy_enc",
            "instrument/I0",
            "measurement/I0",
            "instrument/mu_roi",
        ]);
        // Full path always resolves; ambiguous short name (I0) is omitted.
        let refs =
            extract_channel_refs("log(instrument__I0 / mu_roi) + I0", &available).unwrap();
        assert_eq!(refs, vec!["instrument/I0", "instrument/mu_roi"]);
    }

    #[test]
    fn function_names_are_not_channels() {
        let available = channels(&["instrument/log"]);
        // `log` in call position is the function; the bare channel named
        // `log` would be shadowed, so nothing resolves here.
        let refs = extract_channel_refs("log(2.0)", &available).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn evaluates_over_store_channels() {
        let mut store = MemoryScanStoreFixture::new();
        let store = store.with("1.1", "instrument", "I0", vec![1.0, 2.0, 4.0]).with(
            "1.1",
            "instrument",
            "mu",
            vec![2.0, 4.0, 8.0],
        );
        let available = channels(&["instrument/I0", "instrument/mu"]);
        let result =
            evaluate_expression(store.store(), "1.1", "log2(mu / I0)", &available).unwrap();
        assert_eq!(result.to_vec(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn no_channels_error() {
        let store = crate::xas::store::MemoryScanStore::new();
        let err = evaluate_expression(&store, "1.1", "2 + 2", &[]).unwrap_err();
        assert!(matches!(err, XasError::NoChannels(_)));
    }

    #[test]
    fn shape_mismatch_is_eval_error() {
        let mut fixture = MemoryScanStoreFixture::new();
        let fixture = fixture
            .with("1.1", "instrument", "a", vec![1.0, 2.0])
            .with("1.1", "instrument", "b", vec![1.0, 2.0, 3.0]);
        let available = channels(&["instrument/a", "instrument/b"]);
        let err = evaluate_expression(fixture.store(), "1.1", "a + b", &available).unwrap_err();
        assert!(matches!(err, XasError::EvalError(_)));
    }

    #[test]
    fn constants_available() {
        let mut fixture = MemoryScanStoreFixture::new();
        let fixture = fixture.with("1.1", "instrument", "a", vec![1.0]);
        let available = channels(&["instrument/a"]);
        let result = evaluate_expression(fixture.store(), "1.1", "a * pi", &available).unwrap();
        assert!((result[0] - std::f64::consts::PI).abs() < 1e-12);
    }

    /// Small helper so tests read as a builder chain.
    struct MemoryScanStoreFixture {
        store: crate::xas::store::MemoryScanStore,
    }

    impl MemoryScanStoreFixture {
        fn new() -> Self {
            Self { store: crate::xas::store::MemoryScanStore::new() }
        }

        fn with(&mut self, scan: &str, parent: &str, channel: &str, data: Vec<f64>) -> &mut Self {
            self.store.insert(scan, parent, channel, data);
            self
        }

        fn store(&self) -> &crate::xas::store::MemoryScanStore {
            &self.store
        }
    }
}
