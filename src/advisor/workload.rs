//! Workload Aggregator
//!
//! Collapses normalized queries into distinct shapes. Two queries share a
//! shape when they constrain the same fields with the same operator classes
//! and sort on the same fields; operand values are irrelevant to the shape
//! but a few distinct variations are kept for selectivity estimation.

use crate::model::{OperatorClass, Query};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Canonical, order-independent description of a query shape
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShapeSignature {
    /// `(field, class)` pairs sorted by field
    predicates: Vec<(String, OperatorClass)>,
    sort: Vec<String>,
}

impl ShapeSignature {
    pub fn of(query: &Query) -> Self {
        let mut predicates: Vec<(String, OperatorClass)> = query
            .predicates()
            .iter()
            .map(|p| (p.field().to_string(), p.class()))
            .collect();
        predicates.sort();
        Self {
            predicates,
            sort: query.sort().to_vec(),
        }
    }

    pub fn predicates(&self) -> &[(String, OperatorClass)] {
        &self.predicates
    }

    pub fn sort(&self) -> &[String] {
        &self.sort
    }
}

impl fmt::Display for ShapeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preds: Vec<String> = self
            .predicates
            .iter()
            .map(|(field, class)| format!("{field}:{class}"))
            .collect();
        write!(f, "{{{}}}", preds.join(", "))?;
        if !self.sort.is_empty() {
            write!(f, " sort({})", self.sort.join(", "))?;
        }
        Ok(())
    }
}

/// A distinct query shape and how often it occurred
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadEntry {
    /// Position in first-appearance order
    pub id: usize,
    pub signature: ShapeSignature,
    /// Number of logged queries with this shape
    pub frequency: u64,
    /// First query seen with this shape
    pub query: Query,
    /// Distinct operand variations, starting with `query`
    pub representatives: Vec<Query>,
}

/// Single-pass shape aggregation
#[derive(Debug)]
pub struct WorkloadAggregator {
    index: HashMap<ShapeSignature, usize>,
    entries: Vec<WorkloadEntry>,
    max_representatives: usize,
    total_queries: u64,
}

impl WorkloadAggregator {
    pub fn new(max_representatives: usize) -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
            max_representatives: max_representatives.max(1),
            total_queries: 0,
        }
    }

    /// Record one supported query and return its entry id.
    pub fn add(&mut self, query: Query) -> usize {
        self.total_queries += 1;
        let signature = ShapeSignature::of(&query);

        if let Some(&id) = self.index.get(&signature) {
            let entry = &mut self.entries[id];
            entry.frequency += 1;
            if entry.representatives.len() < self.max_representatives
                && !entry
                    .representatives
                    .iter()
                    .any(|r| r.predicates() == query.predicates())
            {
                entry.representatives.push(query);
            }
            return id;
        }

        let id = self.entries.len();
        self.index.insert(signature.clone(), id);
        self.entries.push(WorkloadEntry {
            id,
            signature,
            frequency: 1,
            representatives: vec![query.clone()],
            query,
        });
        id
    }

    pub fn get(&self, signature: &ShapeSignature) -> Option<&WorkloadEntry> {
        self.index.get(signature).map(|&id| &self.entries[id])
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[WorkloadEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<WorkloadEntry> {
        self.entries
    }
}

/// Aggregate a sequence of supported queries.
pub fn aggregate<I>(queries: I, max_representatives: usize) -> Vec<WorkloadEntry>
where
    I: IntoIterator<Item = Query>,
{
    let mut aggregator = WorkloadAggregator::new(max_representatives);
    for query in queries {
        aggregator.add(query);
    }
    aggregator.into_entries()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::normalizer::normalize;
    use crate::sources::RawQuery;
    use serde_json::{json, Value as JsonValue};

    fn query(filter: JsonValue) -> Query {
        normalize(&RawQuery::find(filter)).unwrap()
    }

    #[test]
    fn test_signature_ignores_predicate_order_and_values() {
        let a = query(json!({"a": 1, "b": {"$gt": 2}}));
        let b = query(json!({"b": {"$lt": 9}, "a": 7}));
        assert_eq!(ShapeSignature::of(&a), ShapeSignature::of(&b));

        let c = query(json!({"a": {"$ne": 1}, "b": {"$gt": 2}}));
        assert_ne!(ShapeSignature::of(&a), ShapeSignature::of(&c));
    }

    #[test]
    fn test_sort_is_part_of_the_shape() {
        let plain = query(json!({"a": 1}));
        let sorted = normalize(&RawQuery::find(json!({"a": 1})).with_sort(json!({"b": 1}))).unwrap();
        assert_ne!(ShapeSignature::of(&plain), ShapeSignature::of(&sorted));
    }

    #[test]
    fn test_frequencies_and_representatives() {
        let entries = aggregate(
            vec![
                query(json!({"name": "bob"})),
                query(json!({"age": {"$gt": 30}})),
                query(json!({"name": "alice"})),
                query(json!({"name": "bob"})),
                query(json!({"name": "carol"})),
            ],
            2,
        );

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[0].frequency, 4);
        assert_eq!(entries[0].representatives.len(), 2);
        assert_eq!(entries[1].frequency, 1);
        assert_eq!(entries.iter().map(|e| e.frequency).sum::<u64>(), 5);
    }

    #[test]
    fn test_signature_display() {
        let q = normalize(&RawQuery::find(json!({"b": {"$gt": 1}, "a": 1})).with_sort(json!({"c": 1}))).unwrap();
        assert_eq!(ShapeSignature::of(&q).to_string(), "{a:equality, b:range} sort(c)");
    }
}
