//! Arithmetic formulas over columns, e.g. `[Unit Price] * [Qty] - 5`.
//!
//! A formula is parsed once and evaluated per row. Column references are replaced by
//! positional identifiers before tokenizing, so names may contain spaces or punctuation.
//! The evaluator sees nothing but the bound reference values.

use regex::Regex;

use crate::value::RowRef;

/// Per-row evaluation failure. The `Display` text is what ends up in the derived cell.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("Column not found")]
    ColumnNotFound,
    #[error("Non-numeric value")]
    NonNumeric,
    #[error("Invalid formula")]
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ref(usize),
    Op(char),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Ref(usize),
    Neg(Box<Expr>),
    Binary(Box<Expr>, char, Box<Expr>),
}

/// Marks a reference slot in the rewritten source. A private-use char, and rejected when it
/// already appears outside a reference.
const REF_MARKER: char = '\u{E000}';

/// A parsed formula. Parsing never fails outright: a syntax error is kept and reported as
/// `Invalid` for each row after the column references have been checked.
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    references: Vec<String>,
    expr: Option<Expr>,
}

impl Formula {
    pub fn parse(source: &str) -> Self {
        let (sanitized, references) = extract_references(source);
        let expr = sanitized
            .and_then(|s| tokenize(&s, references.len()).ok())
            .and_then(|tokens| Parser::new(&tokens).parse().ok());
        Self {
            source: source.to_string(),
            references,
            expr,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct column names referenced, in first-appearance order.
    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn is_valid(&self) -> bool {
        self.expr.is_some()
    }

    pub fn evaluate(&self, row: &RowRef<'_>) -> Result<f64, FormulaError> {
        let mut bound = Vec::with_capacity(self.references.len());
        for name in &self.references {
            let value = row.get(name).ok_or(FormulaError::ColumnNotFound)?;
            bound.push(value.as_number().ok_or(FormulaError::NonNumeric)?);
        }
        let expr = self.expr.as_ref().ok_or(FormulaError::Invalid)?;
        let result = eval(expr, &bound)?;
        if result.is_finite() {
            Ok(result)
        } else {
            Err(FormulaError::Invalid)
        }
    }
}

/// Replaces every `[Name]` with a slot marker. Repeated names share one slot. The rewritten
/// source is None when the marker already appears outside a reference.
fn extract_references(source: &str) -> (Option<String>, Vec<String>) {
    let mut references: Vec<String> = Vec::new();
    let re = match Regex::new(r"\[([^\]]+)\]") {
        Ok(re) => re,
        Err(_) => return (Some(source.to_string()), references),
    };
    let stray_marker = re.split(source).any(|outside| outside.contains(REF_MARKER));
    let sanitized = re.replace_all(source, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        let slot = match references.iter().position(|r| r == name) {
            Some(i) => i,
            None => {
                references.push(name.to_string());
                references.len() - 1
            }
        };
        format!(" {}{} ", REF_MARKER, slot)
    });
    let sanitized = (!stray_marker).then(|| sanitized.into_owned());
    (sanitized, references)
}

fn tokenize(input: &str, ref_count: usize) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut num = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = num.parse().map_err(|_| FormulaError::Invalid)?;
                tokens.push(Token::Number(n));
            }
            REF_MARKER => {
                chars.next();
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let slot = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|&i| i < ref_count)
                    .ok_or(FormulaError::Invalid)?;
                tokens.push(Token::Ref(slot));
            }
            _ => return Err(FormulaError::Invalid),
        }
    }
    Ok(tokens)
}

/// Recursive descent:
/// expr   := term (('+' | '-') term)*
/// term   := unary (('*' | '/') unary)*
/// unary  := '-' unary | '+' unary | atom
/// atom   := number | ref | '(' expr ')'
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<Expr, FormulaError> {
        let expr = self.expr()?;
        if self.pos != self.tokens.len() {
            return Err(FormulaError::Invalid);
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(*n)),
            Some(Token::Ref(i)) => Ok(Expr::Ref(*i)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(FormulaError::Invalid),
                }
            }
            _ => Err(FormulaError::Invalid),
        }
    }
}

fn eval(expr: &Expr, bound: &[f64]) -> Result<f64, FormulaError> {
    Ok(match expr {
        Expr::Number(n) => *n,
        Expr::Ref(i) => *bound.get(*i).ok_or(FormulaError::Invalid)?,
        Expr::Neg(e) => -eval(e, bound)?,
        Expr::Binary(l, op, r) => {
            let l = eval(l, bound)?;
            let r = eval(r, bound)?;
            match op {
                '+' => l + r,
                '-' => l - r,
                '*' => l * r,
                '/' => l / r,
                _ => return Err(FormulaError::Invalid),
            }
        }
    })
}
