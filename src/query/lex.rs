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

//! Tokenizer for Graphite target expressions.
//!
//! A metric pattern is emitted as a single token rather than a run of words
//! and dots, because metric names contain characters (`cpu-[0-7]`,
//! `server*`, `{queues,exchanges}`) that would otherwise need contextual
//! disambiguation in the grammar.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{anychar, char, none_of, one_of},
    combinator::{map, recognize},
    multi::{many0_count, many1_count},
    sequence::{delimited, preceded},
};

use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    OpenParen,
    CloseParen,
    Comma,
    /// Run of identifier characters: a function name, or a single-component
    /// metric depending on context.
    Word(String),
    /// Decimal number, kept as source text.
    Number(String),
    /// Quoted string literal, surrounding quotes and escapes preserved so
    /// the proxied request byte-reproduces the input.
    Str(String),
    /// Dotted metric pattern, possibly with glob or brace syntax.
    Metric(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpannedToken {
    pub(crate) pos: usize,
    pub(crate) tok: Token,
}

type NomResult<'a, T> = IResult<&'a str, T>;

pub(crate) fn lex(input: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(tokens);
        }
        let pos = input.len() - rest.len();
        match token(rest) {
            Ok((next, tok)) => {
                tokens.push(SpannedToken { pos, tok });
                rest = next;
            }
            Err(_) => return Err(diagnose(input, pos)),
        }
    }
}

fn token(input: &str) -> NomResult<'_, Token> {
    alt((punct, string_token, pattern_token))(input)
}

fn punct(input: &str) -> NomResult<'_, Token> {
    map(one_of("(),"), |ch| match ch {
        '(' => Token::OpenParen,
        ')' => Token::CloseParen,
        _ => Token::Comma,
    })(input)
}

fn string_token(input: &str) -> NomResult<'_, Token> {
    map(alt((double_quoted, single_quoted)), |raw: &str| {
        Token::Str(raw.to_string())
    })(input)
}

fn double_quoted(input: &str) -> NomResult<'_, &str> {
    recognize(delimited(
        char('"'),
        many0_count(alt((escape_pair, recognize(none_of("\"\\"))))),
        char('"'),
    ))(input)
}

fn single_quoted(input: &str) -> NomResult<'_, &str> {
    recognize(delimited(
        char('\''),
        many0_count(alt((escape_pair, recognize(none_of("'\\"))))),
        char('\''),
    ))(input)
}

fn escape_pair(input: &str) -> NomResult<'_, &str> {
    recognize(preceded(char('\\'), anychar))(input)
}

/// `[...]` consumed to the matching close; backslash escapes one character.
fn bracket_group(input: &str) -> NomResult<'_, &str> {
    recognize(delimited(
        char('['),
        many0_count(alt((escape_pair, recognize(none_of("]\\"))))),
        char(']'),
    ))(input)
}

fn brace_group(input: &str) -> NomResult<'_, &str> {
    recognize(delimited(
        char('{'),
        many0_count(alt((escape_pair, recognize(none_of("}\\"))))),
        char('}'),
    ))(input)
}

fn pattern_run(input: &str) -> NomResult<'_, &str> {
    recognize(many1_count(alt((
        take_while1(is_ident_char),
        recognize(one_of(".*?")),
        bracket_group,
        brace_group,
        escape_pair,
    ))))(input)
}

fn pattern_token(input: &str) -> NomResult<'_, Token> {
    map(pattern_run, classify)(input)
}

/// A recognized run is a NUMBER when it reads as a signed decimal, a WORD
/// when it is a plain identifier, and a METRIC otherwise.
fn classify(run: &str) -> Token {
    if is_number(run) {
        Token::Number(run.to_string())
    } else if run.chars().all(is_ident_char) {
        Token::Word(run.to_string())
    } else {
        Token::Metric(run.to_string())
    }
}

fn is_number(run: &str) -> bool {
    let unsigned = run.strip_prefix('-').unwrap_or(run);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    if int.is_empty() || !int.chars().all(|ch| ch.is_ascii_digit()) {
        return false;
    }
    match frac {
        Some(frac) => !frac.is_empty() && frac.chars().all(|ch| ch.is_ascii_digit()),
        None => true,
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '-'
}

/// Re-scans the stuck input to pinpoint why tokenization failed.
fn diagnose(input: &str, pos: usize) -> ParseError {
    let rest = &input[pos..];
    let mut iter = rest.char_indices();
    while let Some((off, ch)) = iter.next() {
        match ch {
            c if c.is_whitespace() => continue,
            '(' | ')' | ',' => continue,
            '\\' => {
                if iter.next().is_none() {
                    return ParseError::new(pos + off, "eof after backslash");
                }
            }
            '\'' | '"' => {
                if !skip_until(&mut iter, ch) {
                    return ParseError::new(pos + off, "unterminated string");
                }
            }
            '[' => {
                if !skip_until(&mut iter, ']') {
                    return ParseError::new(pos + off, "unterminated '['");
                }
            }
            '{' => {
                if !skip_until(&mut iter, '}') {
                    return ParseError::new(pos + off, "unterminated '{'");
                }
            }
            c if is_ident_char(c) || matches!(c, '.' | '*' | '?') => continue,
            c => return ParseError::new(pos + off, format!("unexpected char {c:?}")),
        }
    }
    ParseError::new(pos, "invalid input")
}

/// Advances past the closing delimiter, honoring backslash escapes.
fn skip_until(iter: &mut std::str::CharIndices<'_>, close: char) -> bool {
    while let Some((_, ch)) = iter.next() {
        if ch == '\\' {
            if iter.next().is_none() {
                return false;
            }
            continue;
        }
        if ch == close {
            return true;
        }
    }
    false
}
