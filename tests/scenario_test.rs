//! End-to-end runs of the engine against a mock HTTP backend.

use std::collections::BTreeMap;
use std::time::Duration;

use loadplan::loadtest::engine::LoadTestEngine;
use loadplan::loadtest::plan::{PostProcessor, RequestStep, Sampler, TestPlan, ThreadGroup};
use loadplan::loadtest::settings::{ResultFormat, RunSettings};
use serde_json::Value;

fn jsonl_settings(dir: &tempfile::TempDir) -> RunSettings {
    RunSettings::new(dir.path().join("results.jsonl"))
        .with_format(ResultFormat::Jsonl)
        .with_timeout(Duration::from_secs(5))
        .with_summariser_interval(None)
}

fn read_records(settings: &RunSettings) -> Vec<Value> {
    std::fs::read_to_string(&settings.output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_threads_ten_loops_extract_title_on_every_sample() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/post")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"title":"x"}"#)
        .expect(20)
        .create_async()
        .await;

    let plan = TestPlan::builder("Extraction")
        .thread_group(
            ThreadGroup::builder("Group")
                .threads(2)
                .ramp_up_secs(1)
                .loops(10)
                .step(
                    RequestStep::new(Sampler::get("post", &format!("{}/post", server.url())).unwrap())
                        .with(PostProcessor::json_extractor("foo", "$.title"))
                        .with(PostProcessor::response_code_equals("200")),
                )
                .build(),
        )
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let settings = jsonl_settings(&dir);
    let result = LoadTestEngine::new(plan, settings.clone())
        .with_signal_handling(false)
        .run()
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(result.records_written, 20);
    assert_eq!(result.snapshot.total, 20);
    assert_eq!(result.snapshot.failures, 0);

    let records = read_records(&settings);
    assert_eq!(records.len(), 20);
    let mut per_thread: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in &records {
        assert_eq!(record["extracted"]["foo"], "x");
        assert_eq!(record["success"], true);
        per_thread
            .entry(record["thread_name"].as_str().unwrap().to_string())
            .or_default()
            .push(record["timestamp"].as_str().unwrap().to_string());
    }
    assert_eq!(per_thread.len(), 2);
    assert_eq!(per_thread["Group 1-1"].len(), 10);
    assert_eq!(per_thread["Group 1-2"].len(), 10);

    // Thread 2 of 2 starts half-way through the 1s ramp-up
    let first = |name: &str| {
        per_thread[name]
            .iter()
            .map(|ts| chrono::DateTime::parse_from_rfc3339(ts).unwrap())
            .min()
            .unwrap()
    };
    let gap = first("Group 1-2") - first("Group 1-1");
    assert!(gap >= chrono::Duration::milliseconds(450), "gap was {gap}");
}

#[tokio::test]
async fn run_first_adds_one_leading_iteration() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .expect(11)
        .create_async()
        .await;

    let plan = TestPlan::builder("Run First")
        .thread_group(
            ThreadGroup::builder("Group")
                .loops(10)
                .run_first(true)
                .step(RequestStep::new(
                    Sampler::get("home", &format!("{}/", server.url())).unwrap(),
                ))
                .build(),
        )
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let result = LoadTestEngine::new(plan, jsonl_settings(&dir))
        .with_signal_handling(false)
        .run()
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(result.records_written, 11);
}

#[tokio::test]
async fn assertion_mismatch_is_recorded_and_run_completes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(500)
        .create_async()
        .await;

    let plan = TestPlan::builder("Failing")
        .thread_group(
            ThreadGroup::builder("Group")
                .loops(3)
                .step(
                    RequestStep::new(Sampler::get("home", &format!("{}/", server.url())).unwrap())
                        .with(PostProcessor::response_code_equals("200")),
                )
                .build(),
        )
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let settings = jsonl_settings(&dir);
    let result = LoadTestEngine::new(plan, settings.clone())
        .with_signal_handling(false)
        .run()
        .await
        .unwrap();

    assert_eq!(result.records_written, 3);
    assert_eq!(result.snapshot.failures, 3);
    for record in read_records(&settings) {
        assert_eq!(record["success"], false);
        assert_eq!(record["response_code"], 500);
        let message = record["failure_message"].as_str().unwrap();
        assert!(
            message.contains("response code expected to equal \"200\" but was \"500\""),
            "{message}"
        );
    }
}

#[tokio::test]
async fn extracted_variable_feeds_later_step() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/items")
        .with_status(200)
        .with_body(r#"{"items":[{"id":"abc"}]}"#)
        .create_async()
        .await;
    let detail = server
        .mock("GET", "/items/abc")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let base = server.url();
    let host_port = server.host_with_port();
    let (host, port) = host_port.rsplit_once(':').unwrap();
    let plan = TestPlan::builder("Chained")
        .thread_group(
            ThreadGroup::builder("Group")
                .loops(2)
                .step(
                    RequestStep::new(Sampler::get("list", &format!("{base}/items")).unwrap())
                        .with(PostProcessor::json_extractor("item", "$.items[0].id")),
                )
                .step(RequestStep::new(
                    Sampler::new("detail", "GET", "http", host, "/items/${item}")
                        .with_port(port.parse().unwrap()),
                ))
                .build(),
        )
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let result = LoadTestEngine::new(plan, jsonl_settings(&dir))
        .with_signal_handling(false)
        .run()
        .await
        .unwrap();

    detail.assert_async().await;
    assert_eq!(result.snapshot.failures, 0);
}

#[tokio::test]
async fn repeated_runs_produce_identical_counts() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/ok")
        .with_status(200)
        .create_async()
        .await;
    server
        .mock("GET", "/bad")
        .with_status(404)
        .create_async()
        .await;

    let plan = TestPlan::builder("Deterministic")
        .thread_group(
            ThreadGroup::builder("Group")
                .threads(3)
                .loops(4)
                .step(RequestStep::new(
                    Sampler::get("ok", &format!("{}/ok", server.url())).unwrap(),
                ))
                .step(RequestStep::new(
                    Sampler::get("bad", &format!("{}/bad", server.url())).unwrap(),
                ))
                .build(),
        )
        .build()
        .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let dir = tempfile::tempdir().unwrap();
        let result = LoadTestEngine::new(plan.clone(), jsonl_settings(&dir))
            .with_signal_handling(false)
            .run()
            .await
            .unwrap();
        outcomes.push((
            result.snapshot.total,
            result.snapshot.failures,
            result.snapshot.error_category_counts.clone(),
        ));
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[0].0, 24);
    assert_eq!(outcomes[0].1, 12);
    assert_eq!(outcomes[0].2.get("http"), Some(&12));
}

#[tokio::test]
async fn serialized_thread_groups_run_one_after_another() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(200)
        .create_async()
        .await;
    let url = format!("{}/", server.url());

    let group = |name: &str| {
        ThreadGroup::builder(name)
            .threads(2)
            .loops(3)
            .step(RequestStep::new(Sampler::get(name, &url).unwrap()))
            .build()
    };
    let plan = TestPlan::builder("Serialized")
        .serialize_thread_groups(true)
        .thread_group(group("first"))
        .thread_group(group("second"))
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let settings = jsonl_settings(&dir);
    LoadTestEngine::new(plan, settings.clone())
        .with_signal_handling(false)
        .run()
        .await
        .unwrap();

    let labels: Vec<String> = read_records(&settings)
        .iter()
        .map(|r| r["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels.len(), 12);
    assert!(labels[..6].iter().all(|l| l == "first"), "{labels:?}");
    assert!(labels[6..].iter().all(|l| l == "second"), "{labels:?}");
}

#[tokio::test]
async fn plan_variables_seed_every_virtual_user() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/status")
        .match_header("x-env", "staging")
        .with_status(200)
        .expect(4)
        .create_async()
        .await;

    let host_port = server.host_with_port();
    let (host, port) = host_port.rsplit_once(':').unwrap();
    let plan = TestPlan::builder("Variables")
        .variable("version", "v1")
        .variable("env", "staging")
        .thread_group(
            ThreadGroup::builder("Group")
                .threads(2)
                .loops(2)
                .step(RequestStep::new(
                    Sampler::new("status", "GET", "http", host, "/${version}/status")
                        .with_port(port.parse().unwrap())
                        .with_header("x-env", "${env}"),
                ))
                .build(),
        )
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let result = LoadTestEngine::new(plan, jsonl_settings(&dir))
        .with_signal_handling(false)
        .run()
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(result.snapshot.failures, 0);
}
