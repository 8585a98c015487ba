//! Variable list patterns
//!
//! A varlist is a whitespace separated list of names. `*` alone selects
//! everything; `prefix*` and `*suffix` select by prefix or suffix. Matches keep
//! the order of `available` within each pattern and drop repeats.

use indexmap::IndexSet;

use crate::{HostError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern<'a> {
    All,
    Exact(&'a str),
    Prefix(&'a str),
    Suffix(&'a str),
}

impl<'a> Pattern<'a> {
    fn parse(token: &'a str) -> Result<Self> {
        if token == "*" {
            return Ok(Pattern::All);
        }
        let pattern = if let Some(prefix) = token.strip_suffix('*') {
            Pattern::Prefix(prefix)
        } else if let Some(suffix) = token.strip_prefix('*') {
            Pattern::Suffix(suffix)
        } else {
            Pattern::Exact(token)
        };
        match pattern {
            Pattern::Prefix(p) | Pattern::Suffix(p) | Pattern::Exact(p) if p.contains('*') => Err(
                HostError::invalid_argument(format!("Unsupported wildcard pattern '{}'", token)),
            ),
            other => Ok(other),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::All => true,
            Pattern::Exact(exact) => name == *exact,
            Pattern::Prefix(prefix) => name.starts_with(prefix),
            Pattern::Suffix(suffix) => name.ends_with(suffix),
        }
    }
}

/// Names in `available` selected by `varlist`
///
/// An empty varlist selects everything. A pattern that matches nothing is an
/// error.
pub fn expand_varlist<S: AsRef<str>>(varlist: &str, available: &[S]) -> Result<Vec<String>> {
    let tokens: Vec<&str> = varlist.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(available.iter().map(|s| s.as_ref().to_string()).collect());
    }

    let mut selected = IndexSet::new();
    for token in tokens {
        let pattern = Pattern::parse(token)?;
        let mut matched = false;
        for name in available.iter().map(AsRef::as_ref) {
            if pattern.matches(name) {
                matched = true;
                selected.insert(name.to_string());
            }
        }
        if !matched {
            return Err(HostError::NoMatch(token.to_string()));
        }
    }
    Ok(selected.into_iter().collect())
}
