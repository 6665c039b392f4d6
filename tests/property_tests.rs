use index_advisor::advisor::scoring::compare_ranked;
use index_advisor::advisor::{aggregate, normalize, CandidateGenerator, Scorer, SelectivityEstimator};
use index_advisor::model::OperatorClass;
use index_advisor::{CancellationToken, IndexCandidate, InMemorySample, Query, RawQuery, ScoringConfig};
use proptest::collection::vec as prop_vec;
use proptest::prelude::*;
use serde_json::{json, Map, Value as JsonValue};
use std::cmp::Ordering;
use std::sync::Arc;

const FIELDS: [&str; 5] = ["a", "b", "c", "d", "e.f"];

fn clause() -> impl Strategy<Value = JsonValue> {
    prop_oneof![
        (0i64..5).prop_map(|v| json!(v)),
        (0i64..5).prop_map(|v| json!({"$gt": v})),
        (0i64..5, 5i64..10).prop_map(|(lo, hi)| json!({"$gte": lo, "$lt": hi})),
        prop_vec(0i64..5, 1..3).prop_map(|vs| json!({"$in": vs})),
        (0i64..5).prop_map(|v| json!({"$ne": v})),
        any::<bool>().prop_map(|b| json!({"$exists": b})),
    ]
}

fn raw_query() -> impl Strategy<Value = RawQuery> {
    (
        prop_vec((prop::sample::select(FIELDS.to_vec()), clause()), 0..4),
        prop::sample::subsequence(FIELDS.to_vec(), 0..3),
    )
        .prop_map(|(clauses, sort)| {
            let filter: Map<String, JsonValue> =
                clauses.into_iter().map(|(f, c)| (f.to_string(), c)).collect();
            let mut raw = RawQuery::find(JsonValue::Object(filter));
            if !sort.is_empty() {
                let sort: Map<String, JsonValue> = sort.into_iter().map(|f| (f.to_string(), json!(1))).collect();
                raw = raw.with_sort(JsonValue::Object(sort));
            }
            raw
        })
}

fn document() -> impl Strategy<Value = JsonValue> {
    // every queried field is present, so no prefix is left unknown
    (0i64..6, 0i64..12, prop::option::of(0i64..6), 0i64..4, 0i64..3)
        .prop_map(|(a, b, c, d, f)| json!({"a": a, "b": b, "c": c, "d": d, "e": {"f": f}}))
}

fn normalized(raws: &[RawQuery]) -> Vec<Query> {
    raws.iter().filter_map(|r| normalize(r).ok()).collect()
}

// Property: normalization is deterministic and yields one predicate per field
proptest! {
    #[test]
    fn prop_normalize_is_deterministic(raw in raw_query()) {
        let first = normalize(&raw);
        let second = normalize(&raw);
        prop_assert_eq!(&first, &second);

        if let Ok(query) = first {
            let mut fields: Vec<&str> = query.predicates().iter().map(|p| p.field()).collect();
            let total = fields.len();
            fields.sort();
            fields.dedup();
            prop_assert_eq!(fields.len(), total);
        }
    }
}

// Property: every supported query is counted in exactly one shape
proptest! {
    #[test]
    fn prop_frequencies_sum_to_supported(raws in prop_vec(raw_query(), 0..40)) {
        let queries = normalized(&raws);
        let supported = queries.len() as u64;
        let entries = aggregate(queries, 3);

        prop_assert_eq!(entries.iter().map(|e| e.frequency).sum::<u64>(), supported);
        prop_assert!(entries.iter().all(|e| e.frequency > 0));
        prop_assert!(entries.iter().all(|e| !e.representatives.is_empty() && e.representatives.len() <= 3));
    }
}

// Property: candidates follow equality, sort, range order with at most one
// range field
proptest! {
    #[test]
    fn prop_candidates_follow_esr(raws in prop_vec(raw_query(), 1..20)) {
        let entries = aggregate(normalized(&raws), 3);
        let generator = CandidateGenerator::default();

        for entry in &entries {
            let query = &entry.query;
            let class_of = |field: &str| query.predicate(field).map(|p| p.class());

            for seq in generator.field_sequences(entry) {
                let mut seen_non_equality = false;
                let mut range_fields = 0;
                for field in &seq {
                    match class_of(field) {
                        Some(OperatorClass::Equality) => prop_assert!(!seen_non_equality, "{:?}", seq),
                        Some(OperatorClass::Range) => {
                            range_fields += 1;
                            seen_non_equality = true;
                        }
                        _ => seen_non_equality = true,
                    }
                }
                prop_assert!(range_fields <= 1, "{:?}", seq);

                let mut unique = seq.clone();
                unique.sort();
                unique.dedup();
                prop_assert_eq!(unique.len(), seq.len());
            }
        }

        let candidates = generator.generate(&entries);
        for (i, a) in candidates.iter().enumerate() {
            for b in &candidates[i + 1..] {
                prop_assert_ne!(&a.fields, &b.fields);
            }
        }
    }
}

// Property: a more selective index never scores lower
proptest! {
    #[test]
    fn prop_score_monotone_in_selectivity(
        frequency in 0u64..1000,
        len in 1usize..5,
        s1 in 0.0f64..=1.0,
        s2 in 0.0f64..=1.0,
        weight in 0.1f64..10.0,
        penalty in 0.0f64..3.0,
    ) {
        let scorer = Scorer::new(ScoringConfig { frequency_weight: weight, field_penalty: penalty });
        let make = |selectivity: f64| {
            let mut c = IndexCandidate::new((0..len).map(|i| format!("f{i}")).collect());
            c.frequency = frequency;
            c.selectivity = selectivity;
            c
        };
        let (low, high) = if s1 <= s2 { (s1, s2) } else { (s2, s1) };
        prop_assert!(scorer.score(&make(low)) >= scorer.score(&make(high)));
        prop_assert!(scorer.score(&make(high)) >= 0.0);
    }
}

// Property: ranking is ordered and free of dominated prefixes
proptest! {
    #[test]
    fn prop_ranking_has_no_redundant_prefix(
        specs in prop_vec((prop::sample::subsequence(FIELDS.to_vec(), 1..4), 1u64..50, 0.0f64..=1.0), 1..12)
    ) {
        let mut candidates: Vec<IndexCandidate> = Vec::new();
        for (fields, frequency, selectivity) in specs {
            let fields: Vec<String> = fields.into_iter().map(str::to_string).collect();
            if candidates.iter().any(|c| c.fields == fields) {
                continue;
            }
            let mut c = IndexCandidate::new(fields);
            c.frequency = frequency;
            c.selectivity = selectivity;
            candidates.push(c);
        }

        let ranking = Scorer::default().rank(candidates, None);
        let recs = &ranking.recommendations;
        for a in recs {
            for b in recs {
                prop_assert!(!(a.is_strict_prefix_of(b) && b.score >= a.score));
            }
        }
        for pair in recs.windows(2) {
            prop_assert_ne!(compare_ranked(&pair[0], &pair[1]), Ordering::Greater);
        }
    }
}

// Property: longer prefixes are never estimated less selective
proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_prefix_selectivity_non_increasing(
        docs in prop_vec(document(), 0..60),
        raws in prop_vec(raw_query(), 1..10),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let entries = aggregate(normalized(&raws), 3);
        let mut candidates = CandidateGenerator::default().generate(&entries);
        let sample = Arc::new(InMemorySample::from_documents(docs));
        let estimator = SelectivityEstimator::new(sample, 4);

        runtime
            .block_on(estimator.estimate(&mut candidates, &entries, &CancellationToken::new()))
            .unwrap();

        for c in &candidates {
            prop_assert_eq!(c.prefix_selectivity.len(), c.len());
            for pair in c.prefix_selectivity.windows(2) {
                prop_assert!(pair[1] <= pair[0], "{} {:?}", c, c.prefix_selectivity);
            }
            prop_assert!((0.0..=1.0).contains(&c.selectivity));
        }
    }
}
