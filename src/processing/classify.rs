//! Classification marking detection.

use crate::processing::types::FileMarkings;
use regex::{Regex, RegexBuilder};

/// Ordered, compiled classification terms.
///
/// Longer terms are tried first so that a specific marking such as `TOP SECRET` wins over a
/// term it contains, such as `SECRET`. Ties keep their input order.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTerms {
    terms: Vec<(String, Regex)>,
}

impl ClassificationTerms {
    /// Compile `terms`, dropping blanks.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled: Vec<(String, Regex)> = terms
            .into_iter()
            .filter_map(|term| {
                let term = term.as_ref().trim();
                if term.is_empty() {
                    return None;
                }
                match term_pattern(term) {
                    Ok(pattern) => Some((term.to_string(), pattern)),
                    Err(error) => {
                        tracing::warn!(term, error = %error, "Skipping classification term");
                        None
                    }
                }
            })
            .collect();
        compiled.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
        Self { terms: compiled }
    }

    /// Parse the reference list: one term per line.
    pub fn parse(contents: &str) -> Self {
        Self::new(contents.lines())
    }

    /// Number of usable terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether no usable terms were supplied.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

// Terms containing a slash (e.g. `S//NF`) match anywhere; all others need word boundaries.
fn term_pattern(term: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(term);
    let pattern = if term.contains('/') {
        escaped
    } else {
        format!(r"\b{escaped}\b")
    };
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

/// Find the first marking in `text`.
///
/// Terms are tried in order; for each term the lines of `text` are scanned top to bottom and
/// the first hit is returned together with its full line.
pub fn match_classification(text: &str, terms: &ClassificationTerms) -> Option<FileMarkings> {
    terms.terms.iter().find_map(|(term, pattern)| {
        text.lines()
            .find(|line| pattern.is_match(line))
            .map(|line| FileMarkings {
                classification: term.clone(),
                containing_line: line.to_string(),
            })
    })
}
