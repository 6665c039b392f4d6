mod common;

use common::*;
use index_advisor::{
    AdvisorConfig, AdvisorWarning, CancellationToken, Error, InMemorySample, IndexAdvisor, RawQuery,
    Recommendation, SourceError, VecWorkload,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fields(rec: &Recommendation) -> Vec<&str> {
    rec.candidate.fields.iter().map(String::as_str).collect()
}

fn names_and_ages() -> VecWorkload {
    let mut queries = repeat(find(json!({"age": {"$gt": 30}})), 5);
    queries.extend(repeat(find(json!({"name": "bob"})), 10));
    VecWorkload::new(queries)
}

#[tokio::test]
async fn test_selective_index_outranks_broad_one() {
    init_test_logging();
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(people_sample())).unwrap();

    let report = advisor
        .recommend(names_and_ages(), "", &CancellationToken::new())
        .await
        .unwrap();

    let recs = &report.recommendations;
    assert_eq!(recs.len(), 2);
    assert_eq!(fields(&recs[0]), vec!["name"]);
    assert_eq!(fields(&recs[1]), vec!["age"]);
    assert!((recs[0].candidate.selectivity - 0.001).abs() < 1e-12);
    assert!((recs[1].candidate.selectivity - 0.4).abs() < 1e-12);
    assert!((recs[0].candidate.score - 9.99).abs() < 1e-9);
    assert!((recs[1].candidate.score - 3.0).abs() < 1e-9);
    assert_eq!(report.summary.sample_size, 1000);
    assert!(report.summary.warnings.is_empty());
}

#[tokio::test]
async fn test_equality_sort_range_candidate_wins() {
    let docs = (0..100).map(|i| json!({"a": i % 10, "b": i, "c": 100 - i}));
    let advisor =
        IndexAdvisor::new(AdvisorConfig::default(), Arc::new(InMemorySample::from_documents(docs))).unwrap();
    let workload = VecWorkload::new(vec![
        find(json!({"a": 1, "b": {"$gt": 5}})).with_sort(json!({"c": 1}))
    ]);

    let report = advisor.recommend(workload, "", &CancellationToken::new()).await.unwrap();

    let recs = &report.recommendations;
    assert_eq!(fields(&recs[0]), vec!["a", "c", "b"]);
    assert_eq!(recs[0].index_name, "a_1_c_1_b_1");
    assert_eq!(recs[0].candidate.prefix_selectivity, vec![0.1, 0.1, 0.09]);
    assert_eq!(recs[0].candidate.sort_supported_entries, 1);
    assert_eq!(fields(&recs[1]), vec!["b"]);
    // [a] is a prefix of the better [a, c, b]
    assert_eq!(report.summary.candidates_generated, 3);
    assert_eq!(report.summary.pruned, 1);
}

#[tokio::test]
async fn test_empty_sample_ranks_by_frequency() {
    let sample = Arc::new(FaultySample::new(InMemorySample::default()));
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::clone(&sample)).unwrap();
    let mut queries = repeat(find(json!({"x": 1})), 3);
    queries.extend(repeat(find(json!({"y": 1})), 7));

    let report = advisor
        .recommend(VecWorkload::new(queries), "", &CancellationToken::new())
        .await
        .unwrap();

    let order: Vec<_> = report.recommendations.iter().map(fields).collect();
    assert_eq!(order, vec![vec!["y"], vec!["x"]]);
    assert!(report.recommendations.iter().all(|r| r.candidate.selectivity == 1.0));
    assert_eq!(report.summary.warnings, vec![AdvisorWarning::EmptySample]);
    assert_eq!(sample.calls(), 0);
}

#[tokio::test]
async fn test_unsupported_queries_are_counted_and_skipped() {
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(people_sample())).unwrap();
    let workload = VecWorkload::new(vec![
        find(json!({"$or": [{"name": "bob"}, {"age": 3}]})),
        find(json!({"name": "bob"})),
        find(json!({"age": {"$where": "1"}})),
        RawQuery::find(json!({})).with_operation(index_advisor::sources::OperationType::Aggregate),
    ]);

    let report = advisor.recommend(workload, "", &CancellationToken::new()).await.unwrap();

    let summary = &report.summary;
    assert_eq!(summary.total_records, 4);
    assert_eq!(summary.supported, 1);
    assert_eq!(summary.skipped.get("disjunction"), Some(&1));
    assert_eq!(summary.skipped.get("unknown_operator"), Some(&1));
    assert_eq!(summary.skipped.get("aggregation_pipeline"), Some(&1));
    assert!(summary.warnings.contains(&AdvisorWarning::SkippedQueries { count: 3 }));
    assert_eq!(fields(&report.recommendations[0]), vec!["name"]);
}

#[tokio::test]
async fn test_absent_field_is_worst_case() {
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(people_sample())).unwrap();
    let mut queries = repeat(find(json!({"ghost": 5})), 3);
    queries.push(find(json!({"name": "bob"})));

    let report = advisor
        .recommend(VecWorkload::new(queries), "", &CancellationToken::new())
        .await
        .unwrap();

    let ghost = report
        .recommendations
        .iter()
        .find(|r| fields(r) == vec!["ghost"])
        .unwrap();
    assert_eq!(ghost.candidate.selectivity, 1.0);
    assert_eq!(ghost.candidate.score, 0.0);
    assert!(report.summary.warnings.contains(&AdvisorWarning::UnknownEstimates { count: 1 }));
}

#[tokio::test]
async fn test_workload_frequencies_sum_to_supported() {
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(people_sample())).unwrap();
    let mut queries = repeat(find(json!({"name": "bob", "age": {"$lt": 40}})), 4);
    queries.extend(repeat(find(json!({"age": {"$gte": 50}, "name": "carl"})), 2));
    queries.extend(repeat(find(json!({"city": "Oslo"})).with_sort(json!({"age": -1})), 3));

    let report = advisor
        .recommend(VecWorkload::new(queries), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.workload.len(), 2);
    let total: u64 = report.workload.iter().map(|w| w.frequency).sum();
    assert_eq!(total, report.summary.supported);
    assert_eq!(report.workload[0].frequency, 6);
}

#[tokio::test]
async fn test_collection_count_extrapolates() {
    let sample = people_sample().with_collection_count(1_000_000);
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(sample)).unwrap();

    let report = advisor
        .recommend(names_and_ages(), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.recommendations[0].candidate.estimated_documents, Some(1_000));
    assert_eq!(report.recommendations[1].candidate.estimated_documents, Some(400_000));
}

#[tokio::test]
async fn test_max_recommendations_cutoff() {
    let config = AdvisorConfig {
        max_recommendations: Some(1),
        ..Default::default()
    };
    let advisor = IndexAdvisor::new(config, Arc::new(people_sample())).unwrap();

    let report = advisor
        .recommend(names_and_ages(), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.recommendations.len(), 1);
    assert_eq!(report.summary.truncated, 1);
}

#[tokio::test]
async fn test_transient_failure_degrades_one_candidate() {
    let sample = FaultySample::new(people_sample())
        .failing(json!({"age": {"$gt": 30}}), SourceError::Transient("timeout".into()));
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(sample)).unwrap();

    let report = advisor
        .recommend(names_and_ages(), "", &CancellationToken::new())
        .await
        .unwrap();

    let age = report.recommendations.iter().find(|r| fields(r) == vec!["age"]).unwrap();
    assert_eq!(age.candidate.selectivity, 1.0);
    let name = report.recommendations.iter().find(|r| fields(r) == vec!["name"]).unwrap();
    assert!((name.candidate.selectivity - 0.001).abs() < 1e-12);
}

#[tokio::test]
async fn test_unreadable_sample_size_ranks_by_frequency() {
    let sample = Arc::new(
        FaultySample::new(people_sample()).failing_total(SourceError::Transient("socket timeout".into())),
    );
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::clone(&sample)).unwrap();

    let report = advisor
        .recommend(names_and_ages(), "", &CancellationToken::new())
        .await
        .unwrap();

    let order: Vec<_> = report.recommendations.iter().map(fields).collect();
    assert_eq!(order, vec![vec!["name"], vec!["age"]]);
    assert!(report.recommendations.iter().all(|r| r.candidate.selectivity == 1.0));
    assert_eq!(report.summary.warnings, vec![AdvisorWarning::UnknownEstimates { count: 2 }]);
    assert_eq!(sample.calls(), 0);
}

#[tokio::test]
async fn test_unavailable_sample_aborts_run() {
    let sample = FaultySample::new(people_sample())
        .failing(json!({"name": "bob"}), SourceError::Unavailable("connection reset".into()));
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(sample)).unwrap();

    let result = advisor.recommend(names_and_ages(), "", &CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::SourceUnavailable(_))));
}

#[tokio::test]
async fn test_cancellation_returns_no_partial_list() {
    let sample = FaultySample::new(people_sample()).with_delay(Duration::from_secs(10));
    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(sample)).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        advisor.recommend(names_and_ages(), "", &cancel),
    )
    .await
    .expect("cancellation should stop the run promptly");

    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_run_timeout() {
    let config = AdvisorConfig {
        run_timeout_ms: Some(50),
        ..Default::default()
    };
    let sample = FaultySample::new(people_sample()).with_delay(Duration::from_secs(10));
    let advisor = IndexAdvisor::new(config, Arc::new(sample)).unwrap();

    let result = advisor
        .recommend(names_and_ages(), "", &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::Timeout(_))));
}

#[tokio::test]
async fn test_run_timeout_leaves_caller_token_usable() {
    let config = AdvisorConfig {
        run_timeout_ms: Some(30),
        ..Default::default()
    };
    let slow = FaultySample::new(people_sample()).with_delay(Duration::from_secs(10));
    let timed = IndexAdvisor::new(config, Arc::new(slow)).unwrap();
    let token = CancellationToken::new();

    let result = timed.recommend(names_and_ages(), "", &token).await;
    assert!(matches!(result, Err(Error::Timeout(_))));
    assert!(!token.is_cancelled());

    let advisor = IndexAdvisor::new(AdvisorConfig::default(), Arc::new(people_sample())).unwrap();
    let report = advisor.recommend(names_and_ages(), "", &token).await.unwrap();
    assert_eq!(report.recommendations.len(), 2);
}
