//! Predicate model
//!
//! Strongly typed representation of a normalized workload: literal values,
//! predicates, queries, and the index candidates derived from them. Nothing
//! downstream of the normalizer sees raw query documents.

pub mod candidate;
pub mod predicate;
pub mod query;
pub mod value;

pub use candidate::{EstimationUnknown, IndexCandidate, PrefixEstimate, SampleStatistics};
pub use predicate::{Bound, Conjunction, Operand, Operator, OperatorClass, Predicate};
pub use query::Query;
pub use value::Value;
