//! Integration tests for the built-in catalogue against both orchestrators
//!
//! Uses the offline toolkit: heuristic model, rule patcher, and the sandbox
//! oracle when python3 is on PATH or pattern checks otherwise.

use repair_agents::cases::{builtin_cases, select, to_cases};
use repair_agents::compare::run_compare;
use repair_agents::oracle::interpreter_available;
use repair_agents::report::Analytics;
use repair_agents::{build_rewriter, build_toolkit, AppConfig};
use repair_coordination::{AgentSystem, Approach, CaseStatus, LinearOrchestrator, RunConfig};

#[tokio::test]
async fn test_off_by_one_repaired_by_both_orchestrators() {
    let config = AppConfig::default();
    assert_eq!(config.run.n_reviewers, 5);
    assert_eq!(config.run.max_retries, 2);
    assert_eq!(config.run.seed, 42);

    let toolkit = build_toolkit(&config);
    let cases = to_cases(&select(builtin_cases(), &[1]).unwrap());

    let linear = LinearOrchestrator::new(toolkit.clone(), &config.run).unwrap();
    let sync = linear.run_case(&cases[0]).await;

    let system = AgentSystem::start(toolkit, &config.run).unwrap();
    let r#async = system.run_case(&cases[0]).await;
    system.shutdown().await;

    for outcome in [&sync, &r#async] {
        assert_eq!(outcome.status, CaseStatus::Success, "{:?}", outcome.approach);
        let fix = outcome.chosen_fix.as_deref().unwrap();
        assert!(fix.contains("Replace range(len(arr)+1)"));
        assert!(outcome.test_log.as_deref().unwrap().contains("= 6"));
        assert!(outcome
            .patched_code
            .as_deref()
            .unwrap()
            .contains("range(len(arr)):"));
        assert_eq!(outcome.metrics.candidates_generated, 2);
        assert_eq!(outcome.metrics.reviews_performed, 10);
        assert_eq!(outcome.metrics.retries_used, 0);
    }

    assert_eq!(sync.approach, Approach::Sync);
    assert_eq!(sync.metrics.messages_sent, 0);
    assert_eq!(r#async.approach, Approach::Async);
    assert_eq!(r#async.metrics.messages_sent, 6);
    assert_eq!(r#async.metrics.messages_received, 6);
    assert_eq!(r#async.metrics.message_efficiency, 1.0);
}

#[tokio::test]
async fn test_whole_catalogue_in_parallel() {
    let config = AppConfig::default();
    let toolkit = build_toolkit(&config);
    let cases = to_cases(&builtin_cases());

    let system = AgentSystem::start(toolkit.clone(), &config.run).unwrap();
    let outcomes = system.run_cases(&cases).await;
    system.shutdown().await;

    let linear = LinearOrchestrator::new(toolkit, &config.run).unwrap();
    let sync_outcomes = linear.run_cases(&cases).await;

    let mut analytics = Analytics::new(None);
    analytics.extend(sync_outcomes);
    analytics.extend(outcomes);
    let summary = analytics.summary();

    assert_eq!(summary.total_cases, 10);
    let sync = summary.sync_approach.unwrap();
    let r#async = summary.async_approach.unwrap();
    assert_eq!(sync.successful, 5);
    assert_eq!(r#async.successful, 5);
    assert_eq!(r#async.timeouts, 0);
    assert_eq!(summary.comparison.unwrap().success_difference, 0);

    for (case, outcome) in cases.iter().zip(analytics.outcomes().iter().skip(5)) {
        assert_eq!(outcome.correlation_id, case.correlation_id);
        assert_eq!(outcome.bug_id, case.bug_id);
    }
}

#[tokio::test]
async fn test_single_reviewer_single_candidate() {
    let toolkit = build_toolkit(&AppConfig::default());
    let config = RunConfig {
        n_reviewers: 1,
        max_retries: 0,
        max_candidates: Some(1),
        ..Default::default()
    };
    let cases = to_cases(&select(builtin_cases(), &[5]).unwrap());

    let system = AgentSystem::start(toolkit, &config).unwrap();
    let outcome = system.run_case(&cases[0]).await;
    system.shutdown().await;

    assert_eq!(outcome.status, CaseStatus::Success);
    assert_eq!(outcome.rounds.len(), 1);
    assert_eq!(outcome.rounds[0].candidates.len(), 1);
    assert_eq!(outcome.metrics.reviews_performed, 1);
}

#[tokio::test]
async fn test_sandbox_oracle_end_to_end() {
    let config = AppConfig {
        use_sandbox: Some(true),
        ..Default::default()
    };
    if !interpreter_available(&config.sandbox.interpreter) {
        eprintln!("python3 not on PATH, skipping");
        return;
    }
    let toolkit = build_toolkit(&config);
    let cases = to_cases(&select(builtin_cases(), &[1, 3]).unwrap());
    let linear = LinearOrchestrator::new(toolkit, &config.run).unwrap();
    for outcome in linear.run_cases(&cases).await {
        assert_eq!(outcome.status, CaseStatus::Success, "{:?}", outcome.test_log);
    }
}

#[tokio::test]
async fn test_every_approach_repairs_the_catalogue() {
    let config = AppConfig::default();
    let toolkit = build_toolkit(&config);
    let cases = to_cases(&builtin_cases());

    let report = run_compare(&toolkit, build_rewriter(&config), &config.run, &cases, 3)
        .await
        .unwrap();

    assert_eq!(report.cases, vec![1, 2, 3, 4, 5]);
    for tally in report.tallies() {
        assert_eq!(tally.successful, 5, "{}", tally.approach);
    }
    assert!(report.baseline.iter().all(|r| !r.fix.is_empty()));
    assert!(report.iterative.iter().all(|o| o.attempts == 1));
}
