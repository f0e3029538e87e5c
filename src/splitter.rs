//! Rewrites a boolean expression into a category-only and a keyword-only expression.
//!
//! Terms of the other kind are replaced by a removal placeholder which is then
//! eliminated by local rewrites applied to a fixed point. Operator precedence
//! (NOT over AND over OR) is respected, so a placeholder is always taken out
//! together with the operator that binds it most tightly.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use crate::compiler::parse_expression;
use crate::construct::TermKind;
use crate::error::Result;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"@[^@]*@|[A-Za-z0-9_\-]+|[()&|~]").unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Term(TermKind, String),
    Removed,
    And,
    Or,
    Not,
    Open,
    Close,
}
impl Token {
    fn is_binary(&self) -> bool {
        matches!(self, Token::And | Token::Or)
    }
    fn is_operator(&self) -> bool {
        matches!(self, Token::And | Token::Or | Token::Not)
    }
}
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Term(TermKind::Category, text) => write!(f, "{}", text),
            Token::Term(TermKind::Phrase, text) => write!(f, "@{}@", text),
            Token::Removed => write!(f, "REMOVED"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::Open => write!(f, "("),
            Token::Close => write!(f, ")"),
        }
    }
}

fn tokenize(expression: &str) -> Vec<Token> {
    TOKEN
        .find_iter(expression)
        .map(|m| {
            let text = m.as_str();
            match text.to_lowercase().as_str() {
                "and" | "&" => Token::And,
                "or" | "|" => Token::Or,
                "not" | "~" => Token::Not,
                "(" => Token::Open,
                ")" => Token::Close,
                lowered if text.starts_with('@') => {
                    Token::Term(TermKind::Phrase, lowered.trim_matches('@').trim().to_string())
                }
                lowered => Token::Term(TermKind::Category, lowered.to_string()),
            }
        })
        .collect()
}

/// Splits `expression` into `(category_expression, keyword_expression)`.
/// A side without any term of its kind is the empty string.
pub fn split_category_keyword(expression: &str) -> Result<(String, String)> {
    parse_expression(expression)?;
    let tokens = tokenize(expression);
    Ok((
        keep_only(&tokens, TermKind::Category),
        keep_only(&tokens, TermKind::Phrase),
    ))
}

fn keep_only(tokens: &[Token], kind: TermKind) -> String {
    let mut tokens: Vec<Token> = tokens
        .iter()
        .map(|t| match t {
            Token::Term(k, _) if *k != kind => Token::Removed,
            other => other.clone(),
        })
        .collect();
    while rewrite(&mut tokens) {}
    render(&tokens)
}

// Applies the first rule that matches, reporting whether anything changed.
fn rewrite(tokens: &mut Vec<Token>) -> bool {
    let at = |tokens: &Vec<Token>, i: isize| -> Option<Token> {
        if i < 0 { None } else { tokens.get(i as usize).cloned() }
    };
    let n = tokens.len() as isize;

    // NOT REMOVED → REMOVED, (REMOVED) → REMOVED, (term) → term
    for i in 0..n {
        let here = at(tokens, i);
        if here == Some(Token::Not) && at(tokens, i + 1) == Some(Token::Removed) {
            tokens.remove(i as usize);
            return true;
        }
        if here == Some(Token::Open)
            && at(tokens, i + 2) == Some(Token::Close)
            && matches!(at(tokens, i + 1), Some(Token::Removed) | Some(Token::Term(..)))
        {
            tokens.remove(i as usize + 2);
            tokens.remove(i as usize);
            return true;
        }
        // () and NOT ()
        if here == Some(Token::Open) && at(tokens, i + 1) == Some(Token::Close) {
            tokens.drain(i as usize..i as usize + 2);
            tokens.insert(i as usize, Token::Removed);
            return true;
        }
    }

    // REMOVED AND REMOVED → REMOVED
    for i in 0..n {
        if at(tokens, i) == Some(Token::Removed)
            && at(tokens, i + 1) == Some(Token::And)
            && at(tokens, i + 2) == Some(Token::Removed)
        {
            tokens.drain(i as usize + 1..i as usize + 3);
            return true;
        }
    }
    // REMOVED OR REMOVED → REMOVED, unless an AND binds either side
    for i in 0..n {
        if at(tokens, i) == Some(Token::Removed)
            && at(tokens, i + 1) == Some(Token::Or)
            && at(tokens, i + 2) == Some(Token::Removed)
            && at(tokens, i - 1) != Some(Token::And)
            && at(tokens, i + 3) != Some(Token::And)
            && at(tokens, i - 1) != Some(Token::Not)
        {
            tokens.drain(i as usize + 1..i as usize + 3);
            return true;
        }
    }

    // X op REMOVED → X, the tightest binding operator goes first
    for i in 0..n {
        if at(tokens, i) != Some(Token::Removed) || at(tokens, i - 1) == Some(Token::Not) {
            continue;
        }
        let left = at(tokens, i - 1);
        let right = at(tokens, i + 1);
        let has_operand = |j: isize| at(tokens, j).is_some_and(|t| !t.is_operator() && t != Token::Open);
        if left == Some(Token::And) {
            tokens.drain(i as usize - 1..i as usize + 1);
            return true;
        }
        if right == Some(Token::And) {
            tokens.drain(i as usize..i as usize + 2);
            return true;
        }
        if left == Some(Token::Or) && (has_operand(i - 2) || at(tokens, i - 2) == Some(Token::Close)) {
            tokens.drain(i as usize - 1..i as usize + 1);
            return true;
        }
        if right == Some(Token::Or) {
            tokens.drain(i as usize..i as usize + 2);
            return true;
        }
    }

    // dangling operators
    if tokens.first().is_some_and(Token::is_binary) {
        tokens.remove(0);
        return true;
    }
    if tokens.last().is_some_and(Token::is_operator) {
        tokens.pop();
        return true;
    }
    for i in 0..n {
        if at(tokens, i) == Some(Token::Open) && at(tokens, i + 1).is_some_and(|t| t.is_binary()) {
            tokens.remove(i as usize + 1);
            return true;
        }
        if at(tokens, i) == Some(Token::Close) && at(tokens, i - 1).is_some_and(|t| t.is_operator()) {
            tokens.remove(i as usize - 1);
            return true;
        }
    }
    false
}

fn render(tokens: &[Token]) -> String {
    if tokens.iter().all(|t| matches!(t, Token::Removed | Token::Open | Token::Close)) {
        return String::new();
    }
    let mut rendered = String::new();
    let mut previous: Option<&Token> = None;
    for token in tokens {
        let glue = matches!(previous, None | Some(Token::Open)) || *token == Token::Close;
        if !glue {
            rendered.push(' ');
        }
        rendered.push_str(&token.to_string());
        previous = Some(token);
    }
    rendered
}
