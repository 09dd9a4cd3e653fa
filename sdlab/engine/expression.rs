//! Arithmetic equations of the stock/flow model.
//!
//! Grammar: `+ - * /`, unary minus, parentheses, numbers, `min(a, b)`,
//! `max(a, b)`, `abs(a)` and variable names. A bare name is any run of
//! letters, digits, `_`, `'` and inner spaces, so `tasa de desempleo * 2`
//! references `tasa de desempleo`. Names containing operator characters are
//! written in double quotes.

/// Canonical form used to match variable names: lowercase, `_` and runs of
/// whitespace folded into single spaces.
#[must_use]
pub fn canonical_name(raw: &str) -> String {
    raw.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// Builtin function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `min(a, b)`
    Min,
    /// `max(a, b)`
    Max,
    /// `abs(a)`
    Abs,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    const fn arity(self) -> usize {
        match self {
            Self::Min | Self::Max => 2,
            Self::Abs => 1,
        }
    }
}

/// Compiled equation; variables are resolved to slots of the value vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal.
    Number(f64),
    /// Value slot.
    Var(usize),
    /// Unary minus.
    Neg(Box<Expr>),
    /// Binary arithmetic.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Builtin call.
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Parses `source`, resolving each name through `resolve`.
    pub fn parse<F>(source: &str, resolve: F) -> Result<Self, ExprError>
    where
        F: Fn(&str) -> Option<usize>,
    {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            resolve: &resolve,
        };
        let expr = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(ExprError::Syntax(format!("unexpected {token:?}")));
        }
        Ok(expr)
    }

    /// Evaluates against the current value vector.
    #[must_use]
    pub fn eval(&self, values: &[f64]) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Var(slot) => values[*slot],
            Self::Neg(inner) => -inner.eval(values),
            Self::Binary(op, lhs, rhs) => {
                let (a, b) = (lhs.eval(values), rhs.eval(values));
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                }
            }
            Self::Call(function, args) => match function {
                Function::Min => args[0].eval(values).min(args[1].eval(values)),
                Function::Max => args[0].eval(values).max(args[1].eval(values)),
                Function::Abs => args[0].eval(values).abs(),
            },
        }
    }

    /// Slots referenced by this expression.
    #[must_use]
    pub fn references(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_references(&self, out: &mut Vec<usize>) {
        match self {
            Self::Number(_) => {}
            Self::Var(slot) => out.push(*slot),
            Self::Neg(inner) => inner.collect_references(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
            Self::Call(_, args) => args.iter().for_each(|arg| arg.collect_references(out)),
        }
    }
}

/// Equation parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    /// Malformed input.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// Name that resolves to no variable.
    #[error("unknown variable \"{0}\"")]
    UnknownName(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
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
            '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '"')
                    .ok_or_else(|| ExprError::Syntax("unterminated quoted name".into()))?;
                let name: String = chars[i + 1..i + 1 + end].iter().collect();
                tokens.push(Token::Name(name));
                i += end + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
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
                    .map_err(|_| ExprError::Syntax(format!("invalid number {literal}")))?;
                tokens.push(Token::Number(value));
            }
            c if is_name_char(c) => {
                let start = i;
                let mut end = i;
                while i < chars.len() && (is_name_char(chars[i]) || chars[i] == ' ') {
                    if chars[i] != ' ' {
                        end = i + 1;
                    }
                    i += 1;
                }
                i = end;
                tokens.push(Token::Name(chars[start..end].iter().collect()));
            }
            other => return Err(ExprError::Syntax(format!("unexpected character {other:?}"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    resolve: &'a dyn Fn(&str) -> Option<usize>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(ExprError::Syntax(format!(
                "expected {expected:?}, found {token:?}"
            ))),
            None => Err(ExprError::Syntax(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = if *op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let op = if *op == '*' { BinaryOp::Mul } else { BinaryOp::Div };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    if let Some(function) = Function::lookup(&name.to_lowercase()) {
                        return self.call(function);
                    }
                }
                (self.resolve)(&canonical_name(&name))
                    .map(Expr::Var)
                    .ok_or(ExprError::UnknownName(name))
            }
            Some(token) => Err(ExprError::Syntax(format!("unexpected {token:?}"))),
            None => Err(ExprError::Syntax("unexpected end of input".into())),
        }
    }

    fn call(&mut self, function: Function) -> Result<Expr, ExprError> {
        self.expect(&Token::LParen)?;
        let mut args = vec![self.expression()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.expression()?);
        }
        self.expect(&Token::RParen)?;
        if args.len() != function.arity() {
            return Err(ExprError::Syntax(format!(
                "{function:?} takes {} argument(s), got {}",
                function.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call(function, args))
    }
}
