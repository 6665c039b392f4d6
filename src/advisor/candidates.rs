//! Candidate Generator
//!
//! Derives index field sequences from each workload shape following the
//! equality, sort, range discipline: equality-bound fields first, then at
//! most one sort field, then at most one range field.

use super::workload::WorkloadEntry;
use crate::model::{IndexCandidate, OperatorClass, Query};
use std::collections::HashMap;
use tracing::debug;

/// Generates and deduplicates index candidates
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    include_single_field: bool,
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CandidateGenerator {
    pub fn new(include_single_field: bool) -> Self {
        Self { include_single_field }
    }

    /// Field sequences for one shape, without duplicates.
    pub fn field_sequences(&self, entry: &WorkloadEntry) -> Vec<Vec<String>> {
        let query = &entry.query;
        let mut sequences: Vec<Vec<String>> = Vec::new();
        let mut push = |seq: Vec<String>| {
            if !seq.is_empty() && !sequences.contains(&seq) {
                sequences.push(seq);
            }
        };

        if query.is_empty() {
            // Sort-only shape: the index has to deliver the whole sort order.
            push(dedup_fields(query.sort()));
            return sequences;
        }

        for seq in esr_sequences(query) {
            push(seq);
        }
        if self.include_single_field {
            for predicate in query.predicates() {
                push(vec![predicate.field().to_string()]);
            }
        }
        sequences
    }

    /// Candidates for every entry, merged by exact field sequence. Candidate
    /// order is first appearance, which keeps runs reproducible.
    pub fn generate(&self, entries: &[WorkloadEntry]) -> Vec<IndexCandidate> {
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        let mut candidates: Vec<IndexCandidate> = Vec::new();

        for entry in entries {
            for fields in self.field_sequences(entry) {
                let id = match index.get(&fields) {
                    Some(&id) => id,
                    None => {
                        let id = candidates.len();
                        index.insert(fields.clone(), id);
                        candidates.push(IndexCandidate::new(fields));
                        id
                    }
                };
                let candidate = &mut candidates[id];
                if candidate.contributing_entries.insert(entry.id) {
                    candidate.frequency += entry.frequency;
                    if !entry.query.sort().is_empty() && entry.query.can_use_sort(&candidate.fields) {
                        candidate.sort_supported_entries += 1;
                    }
                    if entry.query.is_covered(&candidate.fields) {
                        candidate.covered_entries += 1;
                    }
                }
            }
        }

        debug!(
            entries = entries.len(),
            candidates = candidates.len(),
            compound = candidates.iter().filter(|c| c.is_compound()).count(),
            "Generated index candidates"
        );
        candidates
    }
}

/// ESR sequences for a query with at least one predicate: one per choice of
/// range-position field, or a single sequence when there is none.
fn esr_sequences(query: &Query) -> Vec<Vec<String>> {
    let fields_of = |class: OperatorClass| -> Vec<String> {
        query
            .predicates()
            .iter()
            .filter(|p| p.class() == class)
            .map(|p| p.field().to_string())
            .collect()
    };

    let equality = fields_of(OperatorClass::Equality);
    let mut range_position = fields_of(OperatorClass::Range);
    if range_position.is_empty() {
        // Exclusion and pattern fields gain nothing as prefix keys but can
        // still bound the scan from the last position.
        range_position = fields_of(OperatorClass::Exclusion);
        range_position.extend(fields_of(OperatorClass::ExistencePattern));
    }

    let mut head = equality.clone();
    let sort_field = query.sort().iter().find(|f| !equality.contains(f));
    if let Some(field) = sort_field {
        head.push(field.clone());
    }

    // A sort field with a range predicate already holds the one range slot.
    let sort_is_range = sort_field
        .and_then(|f| query.predicate(f))
        .is_some_and(|p| p.class() == OperatorClass::Range);
    if range_position.is_empty() || sort_is_range {
        return vec![head];
    }
    range_position
        .into_iter()
        .map(|field| {
            let mut seq = head.clone();
            if !seq.contains(&field) {
                seq.push(field);
            }
            seq
        })
        .collect()
}

fn dedup_fields(fields: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        if !out.contains(field) {
            out.push(field.clone());
        }
    }
    out
}
