//! Query compiler.
//!
//! Turns user-typed text into a [`Query`] tree and serializes it into an FTS5
//! match expression.
//!
//! # Supported syntax
//!
//! - `term1 term2`: implicit AND
//! - `term1 term2 OR term3`: `OR` (any case) separates AND-groups
//! - every term matches as a prefix (`merg` finds `merger`)
//! - terms missing from the vocabulary are widened with near spellings
//!
//! Compilation never fails: stray `OR`s are dropped, and input with no usable
//! term yields no query at all.

use strsim::osa_distance;

use crate::config::QueryConfig;
use crate::vocab::Vocabulary;

/// One search term and its fuzzy alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    /// Normalized term as typed.
    pub term: String,
    /// Near spellings from the vocabulary, best first. Never contains `term`.
    pub variants: Vec<String>,
}

/// Terms that must all match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndGroup {
    terms: Vec<Literal>,
}

/// Groups of which at least one must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    groups: Vec<AndGroup>,
}

impl AndGroup {
    /// `None` for an empty group.
    pub fn new(terms: Vec<Literal>) -> Option<Self> {
        if terms.is_empty() {
            None
        } else {
            Some(Self { terms })
        }
    }

    pub fn terms(&self) -> &[Literal] {
        &self.terms
    }
}

impl Query {
    /// `None` when there is no group to search for.
    pub fn new(groups: Vec<AndGroup>) -> Option<Self> {
        if groups.is_empty() {
            None
        } else {
            Some(Self { groups })
        }
    }

    pub fn groups(&self) -> &[AndGroup] {
        &self.groups
    }

    /// Serialize into an FTS5 match expression.
    ///
    /// `alice merger OR enron` → `("alice"* AND "merger"*) OR ("enron"*)`
    pub fn to_match_expr(&self) -> String {
        let groups: Vec<String> = self.groups.iter().map(render_group).collect();
        if groups.len() == 1 {
            groups.into_iter().next().unwrap_or_default()
        } else {
            groups
                .iter()
                .map(|g| format!("({g})"))
                .collect::<Vec<_>>()
                .join(" OR ")
        }
    }
}

fn render_group(group: &AndGroup) -> String {
    group
        .terms
        .iter()
        .map(render_literal)
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn render_literal(literal: &Literal) -> String {
    if literal.variants.is_empty() {
        return prefix_term(&literal.term);
    }
    let options: Vec<String> = std::iter::once(&literal.term)
        .chain(literal.variants.iter())
        .map(|t| prefix_term(t))
        .collect();
    format!("({})", options.join(" OR "))
}

/// Quoted prefix token, e.g. `"merger"*`.
fn prefix_term(term: &str) -> String {
    format!("\"{term}\"*")
}

/// How far a term may be from a vocabulary entry to count as a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyPolicy {
    pub short_term_max_len: usize,
    pub short_term_distance: usize,
    pub long_term_distance: usize,
    pub max_variants: Option<usize>,
}

impl Default for FuzzyPolicy {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

impl FuzzyPolicy {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            short_term_max_len: config.short_term_max_len,
            short_term_distance: config.short_term_distance,
            long_term_distance: config.long_term_distance,
            max_variants: config.max_variants,
        }
    }

    /// Maximum edit distance allowed for a term of `len` characters.
    pub fn max_distance(&self, len: usize) -> usize {
        if len <= self.short_term_max_len {
            self.short_term_distance
        } else {
            self.long_term_distance
        }
    }
}

/// Compile raw user text against a vocabulary snapshot.
///
/// Returns `None` for empty or whitespace-only input, or when no term survives
/// normalization.
pub fn compile(input: &str, vocab: &Vocabulary, policy: &FuzzyPolicy) -> Option<Query> {
    let mut groups = Vec::new();
    let mut current: Vec<Literal> = Vec::new();

    for token in input.split_whitespace() {
        if token.eq_ignore_ascii_case("OR") {
            groups.extend(AndGroup::new(std::mem::take(&mut current)));
            continue;
        }
        let Some(term) = normalize_term(token) else {
            continue;
        };
        let variants = expand(&term, vocab, policy);
        current.push(Literal { term, variants });
    }
    groups.extend(AndGroup::new(current));

    Query::new(groups)
}

/// Lowercase and strip characters FTS5 would read as syntax.
fn normalize_term(token: &str) -> Option<String> {
    let cleaned: String = token
        .chars()
        .filter(|c| *c != '"' && *c != '*')
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| !c.is_alphanumeric());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Vocabulary terms near `term`, ordered by distance, then frequency, then spelling.
fn expand(term: &str, vocab: &Vocabulary, policy: &FuzzyPolicy) -> Vec<String> {
    if vocab.contains(term) {
        return Vec::new();
    }

    let len = term.chars().count();
    let max_distance = policy.max_distance(len);
    if max_distance == 0 {
        return Vec::new();
    }

    let mut matches: Vec<(usize, u64, &str)> = vocab
        .iter()
        .filter(|(candidate, _)| candidate.chars().count().abs_diff(len) <= max_distance)
        .filter_map(|(candidate, freq)| {
            let distance = osa_distance(term, candidate);
            (distance <= max_distance).then_some((distance, freq, candidate))
        })
        .collect();

    matches.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.cmp(b.2))
    });
    if let Some(cap) = policy.max_variants {
        matches.truncate(cap);
    }

    matches.into_iter().map(|(_, _, t)| t.to_string()).collect()
}
