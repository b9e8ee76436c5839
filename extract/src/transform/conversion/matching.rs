//! Record matching for conversion directives.
//!
//! Matching works on a snapshot of one field across a table: every record
//! becomes a [`Candidate`] holding the field values that are still usable
//! (unique passes hide values consumed earlier).

use regex::Regex;
use strsim::levenshtein;

use crate::store::Table;

/// One record's usable values for the matched field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub values: Vec<String>,
}

/// A record selected by a directive, with the value that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub id: String,
    pub value: String,
}

/// Snapshot `field` over `table`, keeping values accepted by `usable`.
pub fn candidates(table: &Table, field: &str, usable: impl Fn(&str) -> bool) -> Vec<Candidate> {
    table
        .iter()
        .filter_map(|(id, record)| {
            let values: Vec<String> = record
                .get(field)?
                .values()
                .iter()
                .filter(|v| usable(v))
                .cloned()
                .collect();
            (!values.is_empty()).then(|| Candidate {
                id: id.clone(),
                values,
            })
        })
        .collect()
}

/// Records holding `key` (scalar or list element), one match per record.
pub fn exact_matches(key: &str, candidates: &[Candidate]) -> Vec<Match> {
    first_value_matches(candidates, |value| value == key)
}

/// Records with a value containing a match for `pattern`.
pub fn regex_matches(pattern: &Regex, candidates: &[Candidate]) -> Vec<Match> {
    first_value_matches(candidates, |value| pattern.is_match(value))
}

fn first_value_matches(candidates: &[Candidate], test: impl Fn(&str) -> bool) -> Vec<Match> {
    candidates
        .iter()
        .filter_map(|c| {
            c.values.iter().find(|v| test(v)).map(|value| Match {
                id: c.id.clone(),
                value: value.clone(),
            })
        })
        .collect()
}

/// Distance from each key to each candidate, with the closest value.
struct DistanceTable {
    /// `cells[key][candidate] = (distance, value index)`
    cells: Vec<Vec<(usize, usize)>>,
}

impl DistanceTable {
    fn new(keys: &[&str], candidates: &[Candidate]) -> Self {
        let cells = keys
            .iter()
            .map(|key| {
                candidates
                    .iter()
                    .map(|c| {
                        c.values
                            .iter()
                            .enumerate()
                            .map(|(i, v)| (levenshtein(key, v), i))
                            .min_by_key(|&(d, _)| d)
                            .unwrap_or((usize::MAX, 0))
                    })
                    .collect()
            })
            .collect();
        Self { cells }
    }

    /// Strictly closest key for candidate `c`; `None` on ties.
    fn best_key(&self, c: usize) -> Option<usize> {
        strict_min(self.cells.iter().map(|row| row[c].0))
    }

    /// Strictly closest candidate for key `k`; `None` on ties.
    fn best_candidate(&self, k: usize) -> Option<usize> {
        strict_min(self.cells[k].iter().map(|cell| cell.0))
    }

    fn matched(&self, k: usize, c: usize, candidates: &[Candidate]) -> Match {
        let candidate = &candidates[c];
        Match {
            id: candidate.id.clone(),
            value: candidate.values[self.cells[k][c].1].clone(),
        }
    }
}

fn strict_min(distances: impl Iterator<Item = usize>) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    let mut tied = false;
    for (i, d) in distances.enumerate() {
        match best {
            Some((_, current)) if d == current => tied = true,
            Some((_, current)) if d > current => {}
            _ => {
                best = Some((i, d));
                tied = false;
            }
        }
    }
    match best {
        Some((i, d)) if !tied && d != usize::MAX => Some(i),
        _ => None,
    }
}

/// Non-unique approximate matching.
///
/// Every candidate is paired with its strictly closest key, so several
/// records may receive the same directive.
pub fn levenshtein_nearest(keys: &[&str], candidates: &[Candidate]) -> Vec<(usize, Match)> {
    if keys.is_empty() {
        return Vec::new();
    }
    let table = DistanceTable::new(keys, candidates);
    (0..candidates.len())
        .filter_map(|c| table.best_key(c).map(|k| (k, table.matched(k, c, candidates))))
        .collect()
}

/// Unique approximate matching: one round of mutual nearest neighbours.
///
/// A key and a candidate are paired only if each is the other's strictly
/// closest partner.
pub fn levenshtein_mutual(keys: &[&str], candidates: &[Candidate]) -> Vec<(usize, Match)> {
    if keys.is_empty() {
        return Vec::new();
    }
    let table = DistanceTable::new(keys, candidates);
    (0..keys.len())
        .filter_map(|k| {
            let c = table.best_candidate(k)?;
            (table.best_key(c) == Some(k)).then(|| (k, table.matched(k, c, candidates)))
        })
        .collect()
}
