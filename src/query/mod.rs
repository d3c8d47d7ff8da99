// Copyright 2026 The graphite-mux Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parser for Graphite target expressions.
//!
//! A target is either a metric pattern or a function call whose arguments
//! may nest further metrics, calls, and literals. The grammar:
//!
//! ```text
//! Query   := Metric | Func
//! Func    := WORD '(' ArgList ')'
//! ArgList := ε | Expr | ArgList ',' Expr
//! Expr    := Query | STRING | NUMBER
//! ```

mod lex;
mod metric;

pub use metric::Metric;

use std::fmt;

use thiserror::Error;

use lex::{SpannedToken, Token, lex};

/// Recursion guard for parsing and traversal, sized to survive
/// pathological input.
const MAX_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{msg} at offset {pos}")]
pub struct ParseError {
    pub pos: usize,
    pub msg: String,
}

impl ParseError {
    pub(crate) fn new(pos: usize, msg: impl Into<String>) -> Self {
        ParseError {
            pos,
            msg: msg.into(),
        }
    }
}

/// A literal argument: a quoted string (source bytes preserved, quotes
/// included) or a decimal number kept as text to avoid round-trip loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(String);

impl Value {
    pub fn new(raw: impl Into<String>) -> Self {
        Value(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A function call with ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Func(Func),
    Metric(Metric),
    Value(Value),
}

/// One parsed target expression. The top level is a metric or a function
/// call, never a bare literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    expr: Expr,
}

impl Query {
    /// Parses one Graphite target expression. Trailing input after a
    /// complete expression is an error.
    pub fn parse(input: &str) -> Result<Query, ParseError> {
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: input.len(),
        };
        let expr = parser.expr(0)?;
        if let Some(trailing) = parser.peek() {
            return Err(ParseError::new(
                trailing.pos,
                "trailing input after expression",
            ));
        }
        match expr {
            Expr::Value(_) => Err(ParseError::new(
                0,
                "query must be a metric or a function call",
            )),
            expr => Ok(Query { expr }),
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Pre-order depth-first traversal; stops descending past the
    /// recursion guard.
    pub fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        walk_expr(&self.expr, visit, 0);
    }

    /// Mutable handles to every metric in the query, in source order.
    /// Mutating a handle changes what the query renders to.
    pub fn metrics_mut(&mut self) -> Vec<&mut Metric> {
        let mut handles = Vec::new();
        collect_metrics(&mut self.expr, &mut handles);
        handles
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expr.fmt(f)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Func(func) => func.fmt(f),
            Expr::Metric(metric) => metric.fmt(f),
            Expr::Value(value) => value.fmt(f),
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            arg.fmt(f)?;
        }
        f.write_str(")")
    }
}

fn walk_expr(expr: &Expr, visit: &mut dyn FnMut(&Expr), depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }
    visit(expr);
    if let Expr::Func(func) = expr {
        for arg in &func.args {
            walk_expr(arg, visit, depth + 1);
        }
    }
}

fn collect_metrics<'a>(expr: &'a mut Expr, out: &mut Vec<&'a mut Metric>) {
    match expr {
        Expr::Metric(metric) => out.push(metric),
        Expr::Func(func) => {
            for arg in &mut func.args {
                collect_metrics(arg, out);
            }
        }
        Expr::Value(_) => {}
    }
}

struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self, depth: usize) -> Result<Expr, ParseError> {
        if depth > MAX_DEPTH {
            let pos = self.peek().map_or(self.end, |t| t.pos);
            return Err(ParseError::new(pos, "expression nested too deeply"));
        }
        let Some(spanned) = self.peek() else {
            return Err(ParseError::new(self.end, "unexpected end of input"));
        };
        self.pos += 1;
        match &spanned.tok {
            Token::Word(word) => {
                if matches!(self.peek().map(|t| &t.tok), Some(Token::OpenParen)) {
                    self.pos += 1;
                    let args = self.args(depth + 1)?;
                    Ok(Expr::Func(Func {
                        name: word.clone(),
                        args,
                    }))
                } else {
                    Ok(Expr::Metric(Metric::new(word.clone())))
                }
            }
            Token::Metric(path) => Ok(Expr::Metric(Metric::new(path.clone()))),
            Token::Number(raw) | Token::Str(raw) => Ok(Expr::Value(Value::new(raw.clone()))),
            Token::OpenParen => Err(ParseError::new(spanned.pos, "unexpected '('")),
            Token::CloseParen => Err(ParseError::new(spanned.pos, "unexpected ')'")),
            Token::Comma => Err(ParseError::new(spanned.pos, "unexpected ','")),
        }
    }

    /// Parses the argument list of a call, consuming the closing paren.
    fn args(&mut self, depth: usize) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if matches!(self.peek().map(|t| &t.tok), Some(Token::CloseParen)) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr(depth)?);
            match self.peek() {
                Some(spanned) if spanned.tok == Token::Comma => self.pos += 1,
                Some(spanned) if spanned.tok == Token::CloseParen => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(spanned) => {
                    return Err(ParseError::new(spanned.pos, "expected ',' or ')'"));
                }
                None => {
                    return Err(ParseError::new(self.end, "unterminated argument list"));
                }
            }
        }
    }
}
