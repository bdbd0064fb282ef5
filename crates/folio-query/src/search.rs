//! Full-text scoring.
//!
//! score = occurrences of query terms in the body
//!       + 10 for each query term in the title
//!       + 3 for each query term in any other metadata string

use folio_indexer::ContentNode;
use std::collections::{BTreeSet, HashMap, HashSet};

const TITLE_WEIGHT: u64 = 10;
const METADATA_WEIGHT: u64 = 3;

/// Lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Distinct query terms.
pub fn query_terms(query: &str) -> BTreeSet<String> {
    tokenize(query).into_iter().collect()
}

/// Relevance of `node` for `terms`; zero means no match.
pub fn score(node: &ContentNode, terms: &BTreeSet<String>) -> u64 {
    if terms.is_empty() {
        return 0;
    }

    let mut body_counts: HashMap<String, u64> = HashMap::new();
    for token in tokenize(&node.body.plain_text()) {
        *body_counts.entry(token).or_insert(0) += 1;
    }

    let title: HashSet<String> = node.title().map(tokenize).unwrap_or_default().into_iter().collect();

    let mut metadata: HashSet<String> = HashSet::new();
    for (key, value) in &node.raw_metadata {
        if key == "title" {
            continue;
        }
        let mut strings = Vec::new();
        value.collect_strings(&mut strings);
        for s in strings {
            metadata.extend(tokenize(s));
        }
    }

    terms
        .iter()
        .map(|term| {
            let mut total = body_counts.get(term).copied().unwrap_or(0);
            if title.contains(term) {
                total += TITLE_WEIGHT;
            }
            if metadata.contains(term) {
                total += METADATA_WEIGHT;
            }
            total
        })
        .sum()
}
