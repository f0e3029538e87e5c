//! Compiles boolean search expressions into Disjunctive Normal Form.
//!
//! The pipeline is: parse (pest, with a native phrase mode so `@car repair@`
//! lexes as one token) → map every distinct term to a compact symbol →
//! distribute-and-flatten into conjunctions of symbol bit masks → simplify →
//! map symbols back into [`Clause`]s.

use bimap::BiMap;
use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

use crate::construct::{Clause, ClauseList, Literal, Term};
use crate::error::{PlacequeryError, Result};

#[derive(Parser)]
#[grammar = "boolean.pest"]
struct BooleanParser;

/// Symbols are bit positions in a `u64`, so no more than this many terms can ever be mapped.
pub const SYMBOL_SPACE: usize = 64;

// ------------- Expr -------------
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Atom(Term),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}
impl Expr {
    /// Distinct terms in order of first appearance.
    pub fn terms(&self) -> Vec<&Term> {
        let mut terms = Vec::new();
        self.collect_terms(&mut terms);
        terms
    }
    fn collect_terms<'a>(&'a self, terms: &mut Vec<&'a Term>) {
        match self {
            Expr::Atom(term) => {
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
            Expr::Not(inner) => inner.collect_terms(terms),
            Expr::And(operands) | Expr::Or(operands) => {
                for operand in operands {
                    operand.collect_terms(terms);
                }
            }
        }
    }
}
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Atom(term) => write!(f, "{}", term),
            Expr::Not(inner) => write!(f, "NOT {}", inner),
            Expr::And(operands) | Expr::Or(operands) => {
                let op = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                let parts: Vec<String> = operands.iter().map(|o| o.to_string()).collect();
                write!(f, "({})", parts.join(op))
            }
        }
    }
}

/// Parses a boolean expression. Category terms and phrases are lower-cased.
pub fn parse_expression(expression: &str) -> Result<Expr> {
    let mut pairs = BooleanParser::parse(Rule::expression, expression).map_err(|e| {
        let (line, col) = match e.line_col {
            LineColLocation::Pos((l, c)) => (l, c),
            LineColLocation::Span((l, c), _) => (l, c),
        };
        PlacequeryError::Parse {
            message: e.variant.message().to_string(),
            line: Some(line),
            col: Some(col),
        }
    })?;
    let disjunction = pairs
        .next()
        .and_then(|expression| expression.into_inner().find(|p| p.as_rule() == Rule::disjunction))
        .ok_or_else(|| PlacequeryError::parse("empty expression"))?;
    build_expr(disjunction)
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr> {
    let rule = pair.as_rule();
    match rule {
        Rule::disjunction | Rule::conjunction => {
            let mut operands = pair
                .into_inner()
                .filter(|p| !matches!(p.as_rule(), Rule::or_op | Rule::and_op))
                .map(build_expr)
                .collect::<Result<Vec<_>>>()?;
            if operands.len() == 1 {
                return Ok(operands.remove(0));
            }
            Ok(if rule == Rule::disjunction { Expr::Or(operands) } else { Expr::And(operands) })
        }
        Rule::negation => {
            let mut negations = 0;
            let mut operand = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::not_op => negations += 1,
                    _ => operand = Some(build_expr(inner)?),
                }
            }
            let operand = operand.ok_or_else(|| PlacequeryError::parse("NOT without operand"))?;
            Ok(if negations % 2 == 1 { Expr::Not(Box::new(operand)) } else { operand })
        }
        Rule::category => Ok(Expr::Atom(Term::category(pair.as_str().to_lowercase()))),
        Rule::phrase => {
            let text = pair.into_inner().next().map(|p| p.as_str().trim()).unwrap_or("");
            if text.is_empty() {
                return Err(PlacequeryError::parse("empty phrase"));
            }
            Ok(Expr::Atom(Term::phrase(text.to_lowercase())))
        }
        other => Err(PlacequeryError::parse(format!("unexpected {:?}", other))),
    }
}

// ------------- Symbols -------------
pub type Symbol = u8;

/// One-to-one mapping between distinct terms and compact symbols.
#[derive(Debug, Default)]
pub struct SymbolTable {
    kept: BiMap<Term, Symbol>,
}
impl SymbolTable {
    /// Maps every distinct term of `expr`, failing when there are more than `cap`.
    pub fn for_expr(expr: &Expr, cap: usize) -> Result<Self> {
        let terms = expr.terms();
        let cap = cap.min(SYMBOL_SPACE);
        if terms.len() > cap {
            return Err(PlacequeryError::TooManyTerms {
                found: terms.len(),
                cap,
            });
        }
        let mut table = Self::default();
        for term in terms {
            table.keep(term.clone());
        }
        Ok(table)
    }
    fn keep(&mut self, term: Term) -> Symbol {
        if let Some(symbol) = self.kept.get_by_left(&term) {
            return *symbol;
        }
        let symbol = self.kept.len() as Symbol;
        self.kept.insert(term, symbol);
        symbol
    }
    pub fn symbol(&self, term: &Term) -> Option<Symbol> {
        self.kept.get_by_left(term).copied()
    }
    pub fn term(&self, symbol: Symbol) -> Option<&Term> {
        self.kept.get_by_right(&symbol)
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    /// Renders a mapped expression, `a & ~b | c` style, using letters for the first 26 symbols.
    pub fn render(&self, conjunctions: &[Conjunction]) -> String {
        let name = |s: Symbol| -> String {
            if s < 26 { ((b'a' + s) as char).to_string() } else { format!("s{}", s) }
        };
        let parts: Vec<String> = conjunctions
            .iter()
            .map(|c| {
                let mut literals = Vec::new();
                for s in 0..SYMBOL_SPACE as Symbol {
                    if c.pos & bit(s) != 0 {
                        literals.push(name(s));
                    }
                    if c.neg & bit(s) != 0 {
                        literals.push(format!("~{}", name(s)));
                    }
                }
                if literals.is_empty() { "true".to_string() } else { literals.join(" & ") }
            })
            .collect();
        if parts.is_empty() { "false".to_string() } else { parts.join(" | ") }
    }
}

fn bit(symbol: Symbol) -> u64 {
    1u64 << symbol
}

// ------------- Conjunction -------------
/// A clause over symbols: bit `s` of `pos` means symbol `s`, bit `s` of `neg` means NOT `s`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Conjunction {
    pub pos: u64,
    pub neg: u64,
}
impl Conjunction {
    fn literal(symbol: Symbol, negated: bool) -> Self {
        if negated {
            Self { pos: 0, neg: bit(symbol) }
        } else {
            Self { pos: bit(symbol), neg: 0 }
        }
    }
    fn is_contradiction(&self) -> bool {
        self.pos & self.neg != 0
    }
    fn and(&self, other: &Self) -> Self {
        Self {
            pos: self.pos | other.pos,
            neg: self.neg | other.neg,
        }
    }
    /// Every literal of `self` also appears in `other`.
    fn subsumes(&self, other: &Self) -> bool {
        self.pos & !other.pos == 0 && self.neg & !other.neg == 0
    }
    // X&v and X&~v differ in the sign of exactly one symbol
    fn merge(&self, other: &Self) -> Option<Self> {
        let flipped = self.pos ^ other.pos;
        if flipped.count_ones() != 1 || flipped != (self.neg ^ other.neg) {
            return None;
        }
        if (self.pos & flipped != 0) == (other.pos & flipped != 0) {
            return None;
        }
        Some(Self {
            pos: self.pos & other.pos,
            neg: self.neg & other.neg,
        })
    }
}

/// Converts an expression to DNF over the symbols of `table`.
///
/// Negations are pushed inwards while descending, so only atoms are ever negated.
/// Contradictory conjunctions are dropped as soon as they appear.
pub fn to_dnf(expr: &Expr, table: &SymbolTable, max_clauses: usize) -> Result<Vec<Conjunction>> {
    let conjunctions = distribute(expr, false, table, max_clauses)?;
    Ok(simplify(conjunctions))
}

fn distribute(expr: &Expr, negated: bool, table: &SymbolTable, max_clauses: usize) -> Result<Vec<Conjunction>> {
    match expr {
        Expr::Atom(term) => {
            let symbol = table
                .symbol(term)
                .ok_or_else(|| PlacequeryError::parse(format!("unmapped term {}", term)))?;
            Ok(vec![Conjunction::literal(symbol, negated)])
        }
        Expr::Not(inner) => distribute(inner, !negated, table, max_clauses),
        Expr::And(operands) | Expr::Or(operands) => {
            // De Morgan: a negated AND behaves as an OR and vice versa
            let conjunctive = matches!(expr, Expr::And(_)) != negated;
            if conjunctive {
                let mut product = vec![Conjunction::default()];
                for operand in operands {
                    let factor = distribute(operand, negated, table, max_clauses)?;
                    let mut next = Vec::with_capacity(product.len() * factor.len());
                    for left in &product {
                        for right in &factor {
                            let combined = left.and(right);
                            if !combined.is_contradiction() && !next.contains(&combined) {
                                next.push(combined);
                            }
                        }
                    }
                    if next.len() > max_clauses {
                        return Err(PlacequeryError::TooComplex { cap: max_clauses });
                    }
                    if next.is_empty() {
                        return Ok(next);
                    }
                    product = next;
                }
                Ok(product)
            } else {
                let mut sum = Vec::new();
                for operand in operands {
                    for conjunction in distribute(operand, negated, table, max_clauses)? {
                        if !sum.contains(&conjunction) {
                            sum.push(conjunction);
                        }
                    }
                    if sum.len() > max_clauses {
                        return Err(PlacequeryError::TooComplex { cap: max_clauses });
                    }
                }
                Ok(sum)
            }
        }
    }
}

/// Absorption (`X | X&Y → X`) and complementary merge (`X&v | X&~v → X`) to a fixed point.
/// An empty conjunction (tautology) absorbs everything else.
fn simplify(mut conjunctions: Vec<Conjunction>) -> Vec<Conjunction> {
    loop {
        let mut changed = false;

        let mut kept: Vec<Conjunction> = Vec::with_capacity(conjunctions.len());
        for (i, c) in conjunctions.iter().enumerate() {
            let absorbed = conjunctions.iter().enumerate().any(|(j, d)| {
                j != i && d.subsumes(c) && (d != c || j < i)
            });
            if absorbed {
                changed = true;
            } else {
                kept.push(*c);
            }
        }
        conjunctions = kept;

        'merge: for i in 0..conjunctions.len() {
            for j in (i + 1)..conjunctions.len() {
                if let Some(merged) = conjunctions[i].merge(&conjunctions[j]) {
                    conjunctions[i] = merged;
                    conjunctions.remove(j);
                    changed = true;
                    break 'merge;
                }
            }
        }

        if !changed {
            return conjunctions;
        }
    }
}

/// Maps conjunctions back to clauses over the input terms.
pub fn decompose(conjunctions: &[Conjunction], table: &SymbolTable) -> ClauseList {
    let clauses = conjunctions
        .iter()
        .filter_map(|c| {
            let mut literals = Vec::new();
            for s in 0..table.len() as Symbol {
                if let Some(term) = table.term(s) {
                    if c.pos & bit(s) != 0 {
                        literals.push(Literal::positive(term.clone()));
                    }
                    if c.neg & bit(s) != 0 {
                        literals.push(Literal::negative(term.clone()));
                    }
                }
            }
            Clause::new(literals)
        })
        .collect();
    ClauseList::new(clauses)
}

// ------------- Compiler -------------
#[derive(Clone, Copy, Debug)]
pub struct CompileLimits {
    /// Input-size guard on distinct terms.
    pub max_terms: usize,
    /// Guard against exponential growth while distributing.
    pub max_clauses: usize,
}
impl Default for CompileLimits {
    fn default() -> Self {
        Self {
            max_terms: 26,
            max_clauses: 512,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Compiler {
    limits: CompileLimits,
}
impl Compiler {
    pub fn new(limits: CompileLimits) -> Self {
        Self { limits }
    }
    pub fn limits(&self) -> CompileLimits {
        self.limits
    }
    pub fn compile(&self, expression: &str) -> Result<ClauseList> {
        let expr = parse_expression(expression)?;
        self.compile_expr(&expr)
    }
    pub fn compile_expr(&self, expr: &Expr) -> Result<ClauseList> {
        let table = SymbolTable::for_expr(expr, self.limits.max_terms)?;
        let conjunctions = to_dnf(expr, &table, self.limits.max_clauses)?;
        debug!(expression = %expr, mapped = %table.render(&conjunctions), "normalized to DNF");
        Ok(decompose(&conjunctions, &table))
    }
    /// Unions all clauses into one included and one excluded set.
    /// Terms found in both sets are dropped from both.
    pub fn reduce(&self, expression: &str) -> Result<(Vec<String>, Vec<String>)> {
        let clauses = self.compile(expression)?;
        let mut included = BTreeSet::new();
        let mut excluded = BTreeSet::new();
        for clause in &clauses {
            included.extend(clause.included().iter().map(|t| t.text().to_string()));
            excluded.extend(clause.excluded().iter().map(|t| t.text().to_string()));
        }
        let conflicting: Vec<String> = included.intersection(&excluded).cloned().collect();
        if !conflicting.is_empty() {
            warn!(?conflicting, "dropping terms both included and excluded");
            for term in &conflicting {
                included.remove(term);
                excluded.remove(term);
            }
        }
        Ok((included.into_iter().collect(), excluded.into_iter().collect()))
    }
}

/// Compiles with the default limits.
pub fn compile_to_clauses(expression: &str) -> Result<ClauseList> {
    Compiler::default().compile(expression)
}

pub fn reduce_to_single_clause(expression: &str) -> Result<(Vec<String>, Vec<String>)> {
    Compiler::default().reduce(expression)
}
