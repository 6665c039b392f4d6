use super::predicate::{Conjunction, OperatorClass, Predicate};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;

/// A normalized logged operation.
///
/// Predicates keep the order in which their fields appeared in the logged
/// filter (after `$and` flattening); that order is the tie-breaker for
/// equality field ordering in generated candidates. Each field has at most
/// one predicate.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Query {
    predicates: Vec<Predicate>,
    sort: Vec<String>,
    projection: Option<Vec<String>>,
    limit: Option<u64>,
}

impl Query {
    pub(crate) fn from_parts(
        predicates: Vec<Predicate>,
        sort: Vec<String>,
        projection: Option<Vec<String>>,
        limit: Option<u64>,
    ) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                predicates.iter().all(|p| seen.insert(p.field()))
            },
            "duplicate predicate field"
        );
        Self {
            predicates,
            sort,
            projection,
            limit,
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn predicate(&self, field: &str) -> Option<&Predicate> {
        self.predicates.iter().find(|p| p.field() == field)
    }

    pub fn sort(&self) -> &[String] {
        &self.sort
    }

    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Number of predicates
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// All fields referenced by predicates, sort and projection, sorted and
    /// deduplicated.
    pub fn fields(&self) -> Vec<String> {
        let mut fields: BTreeSet<&str> = self.predicates.iter().map(Predicate::field).collect();
        fields.extend(self.sort.iter().map(String::as_str));
        if let Some(projection) = &self.projection {
            fields.extend(projection.iter().map(String::as_str));
        }
        fields.into_iter().map(str::to_string).collect()
    }

    /// True if every predicate field appears in the index. Necessary but not
    /// sufficient for the index to answer the query alone.
    pub fn is_subset(&self, index: &[String]) -> bool {
        self.predicates
            .iter()
            .all(|p| index.iter().any(|f| f == p.field()))
    }

    /// True if predicate and projected fields all appear in the index. A
    /// query without projection is never covered.
    pub fn is_covered(&self, index: &[String]) -> bool {
        let Some(projection) = &self.projection else {
            return false;
        };
        self.is_subset(index) && projection.iter().all(|f| index.contains(f))
    }

    /// True if the index can deliver results in this query's sort order:
    /// the sort fields equal the index fields, are a prefix of them, or are a
    /// contiguous run of them preceded only by equality-bound fields.
    pub fn can_use_sort(&self, index: &[String]) -> bool {
        let n = self.sort.len();
        if n == 0 {
            return true;
        }
        if index.len() < n {
            return false;
        }
        (0..=index.len() - n).any(|start| {
            index[start..start + n] == self.sort[..]
                && index[..start].iter().all(|field| {
                    self.predicate(field)
                        .is_some_and(|p| p.class() == OperatorClass::Equality)
                })
        })
    }

    /// Predicates on the index fields, left to right, stopping at the first
    /// index field the query does not constrain.
    pub fn index_intersect(&self, index: &[String]) -> Query {
        let predicates = index
            .iter()
            .map_while(|field| self.predicate(field).cloned())
            .collect();
        Query::from_parts(predicates, Vec::new(), None, None)
    }

    /// Conjunction of the predicates whose fields are among `fields`.
    pub fn bound_to(&self, fields: &[String]) -> Conjunction {
        Conjunction::new(
            self.predicates
                .iter()
                .filter(|p| fields.iter().any(|f| f == p.field()))
                .cloned()
                .collect(),
        )
    }

    /// Render the filter part as a MongoDB filter document.
    pub fn to_filter(&self) -> JsonValue {
        JsonValue::Object(
            self.predicates
                .iter()
                .map(|p| (p.field().to_string(), p.to_filter_value()))
                .collect(),
        )
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query(filter={}", self.to_filter())?;
        if !self.sort.is_empty() {
            write!(f, ", sort={:?}", self.sort)?;
        }
        if let Some(limit) = self.limit {
            write!(f, ", limit={limit}")?;
        }
        if let Some(projection) = &self.projection {
            write!(f, ", projection={projection:?}")?;
        }
        f.write_str(")")
    }
}
