use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A proposed index: an ordered sequence of distinct field paths, all
/// ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexCandidate {
    /// Index key fields in order
    pub fields: Vec<String>,
    /// Workload entry ids that could use this index
    pub contributing_entries: BTreeSet<usize>,
    /// Selectivity with every field applied (0.0 to 1.0, lower is better)
    pub selectivity: f64,
    /// Selectivity per prefix length; `prefix_selectivity[k]` covers the
    /// first `k + 1` fields
    pub prefix_selectivity: Vec<f64>,
    /// Ranking value
    pub score: f64,
    /// Total frequency of the contributing entries
    pub frequency: u64,
    /// Contributing entries whose sort order the index provides
    pub sort_supported_entries: usize,
    /// Contributing entries the index covers entirely
    pub covered_entries: usize,
    /// Matching documents in the full collection, when its size is known
    pub estimated_documents: Option<u64>,
}

impl IndexCandidate {
    pub fn new(fields: Vec<String>) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                fields.iter().all(|f| seen.insert(f))
            },
            "duplicate index field"
        );
        Self {
            fields,
            contributing_entries: BTreeSet::new(),
            selectivity: 1.0,
            prefix_selectivity: Vec::new(),
            score: 0.0,
            frequency: 0,
            sort_supported_entries: 0,
            covered_entries: 0,
            estimated_documents: None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_compound(&self) -> bool {
        self.fields.len() > 1
    }

    /// True if this candidate's fields are a strict prefix of `other`'s.
    pub fn is_strict_prefix_of(&self, other: &IndexCandidate) -> bool {
        self.fields.len() < other.fields.len() && other.fields.starts_with(&self.fields)
    }

    /// Default MongoDB index name, e.g. `a_1_b_1`.
    pub fn index_name(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}_1", f.replace(' ', "_")))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Key specification as passed to `createIndexes`.
    pub fn key_document(&self) -> JsonValue {
        let mut keys = Map::new();
        for field in &self.fields {
            keys.insert(field.clone(), JsonValue::from(1));
        }
        JsonValue::Object(keys)
    }
}

impl fmt::Display for IndexCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.fields.join(", "))
    }
}

/// Why a prefix estimate fell back to worst case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationUnknown {
    /// The sample holds no documents
    EmptySample,
    /// The field never occurs in the sample
    FieldAbsent(String),
    /// The sample source failed for this request
    SourceFailure(String),
}

/// Outcome of estimating one candidate prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixEstimate {
    Matched(u64),
    Unknown(EstimationUnknown),
}

/// Per-candidate cumulative match counts against the sample, keyed by
/// candidate id and prefix length.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleStatistics {
    sample_size: u64,
    size_known: bool,
    estimates: BTreeMap<(usize, usize), PrefixEstimate>,
}

impl SampleStatistics {
    pub fn new(sample_size: u64) -> Self {
        Self {
            sample_size,
            size_known: true,
            estimates: BTreeMap::new(),
        }
    }

    /// Statistics for a sample whose size could not be read. Every prefix
    /// is worst case.
    pub fn unknown_size() -> Self {
        Self {
            size_known: false,
            ..Self::new(0)
        }
    }

    /// False when the sample size could not be read
    pub fn size_known(&self) -> bool {
        self.size_known
    }

    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    pub fn record(&mut self, candidate: usize, prefix_len: usize, estimate: PrefixEstimate) {
        self.estimates.insert((candidate, prefix_len), estimate);
    }

    pub fn get(&self, candidate: usize, prefix_len: usize) -> Option<&PrefixEstimate> {
        self.estimates.get(&(candidate, prefix_len))
    }

    /// `m / N` for a matched prefix; unknown, unrecorded and empty-sample
    /// prefixes are worst case (1.0).
    pub fn selectivity(&self, candidate: usize, prefix_len: usize) -> f64 {
        match self.get(candidate, prefix_len) {
            Some(PrefixEstimate::Matched(m)) if self.sample_size > 0 => {
                (*m as f64 / self.sample_size as f64).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }

    pub fn unknown_count(&self) -> usize {
        self.estimates
            .values()
            .filter(|e| matches!(e, PrefixEstimate::Unknown(_)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }
}
