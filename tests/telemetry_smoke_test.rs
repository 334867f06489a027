//! Smoke tests for the full observability stack.
//!
//! These tests require the Docker Compose stack running:
//! ```sh
//! docker compose up -d
//! ```
//!
//! Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::KeyValue;
use taskrelay::model::{Status, TaskId};

static TELEMETRY: OnceLock<taskrelay::telemetry::TelemetryGuard> = OnceLock::new();

fn ensure_telemetry() -> &'static taskrelay::telemetry::TelemetryGuard {
    TELEMETRY.get_or_init(|| {
        taskrelay::telemetry::init_telemetry(taskrelay::telemetry::TelemetryConfig {
            endpoint: Some("http://localhost:4317".to_string()),
            service_name: "taskrelay-smoke-test".to_string(),
            log_level: None,
        })
        .expect("failed to init telemetry")
    })
}

/// Force-flush all providers and give backends time to ingest.
async fn flush_and_wait(guard: &taskrelay::telemetry::TelemetryGuard) {
    guard.force_flush();
    // Give batch exporters and backends time to process.
    tokio::time::sleep(Duration::from_secs(8)).await;
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_traces() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Generate trace data - spans must be entered to be exported.
        {
            let span = taskrelay::telemetry::task::start_task_span("jobs_normal", "smoke:1");
            let _enter = span.enter();
            taskrelay::telemetry::task::record_task(&span, TaskId(1), "send_email");
            taskrelay::telemetry::task::record_status_transition(
                &span,
                Status::Queued,
                Status::Running,
            );
        }

        flush_and_wait(guard).await;

        // Query Tempo for traces from our service.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", "service.name=taskrelay-smoke-test"), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");

        assert!(
            resp.status().is_success(),
            "Tempo query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp.json().await.expect("failed to parse Tempo response");
        let traces = body["traces"].as_array();
        assert!(
            traces.is_some_and(|t| !t.is_empty()),
            "expected traces in Tempo, got: {body}"
        );
        println!("Tempo: found {} trace(s)", traces.unwrap().len());
    });
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_metrics() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Emit metric data.
        let counter = taskrelay::telemetry::metrics::tasks_submitted();
        for _ in 0..2 {
            counter.add(
                1,
                &[
                    KeyValue::new("task_type", "smoke"),
                    KeyValue::new("priority", "normal"),
                ],
            );
        }

        let histogram = taskrelay::telemetry::metrics::task_execution_ms();
        histogram.record(
            42.5,
            &[
                KeyValue::new("task_type", "smoke"),
                KeyValue::new("outcome", "succeeded"),
            ],
        );

        let transitions = taskrelay::telemetry::metrics::task_status_transitions();
        transitions.add(
            1,
            &[
                KeyValue::new("from", "queued"),
                KeyValue::new("to", "running"),
            ],
        );

        flush_and_wait(guard).await;

        // Query Prometheus for our metric.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:9090/api/v1/query")
            .query(&[("query", "taskrelay_tasks_submitted_total")])
            .send()
            .await
            .expect("failed to query Prometheus");

        assert!(
            resp.status().is_success(),
            "Prometheus query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp
            .json()
            .await
            .expect("failed to parse Prometheus response");
        let results = body["data"]["result"].as_array();
        assert!(
            results.is_some_and(|r| !r.is_empty()),
            "expected metric results in Prometheus, got: {body}"
        );
        println!(
            "Prometheus: found {} series for taskrelay_tasks_submitted_total",
            results.unwrap().len()
        );
    });
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_logs() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Emit log data via tracing macros (bridged to OTel logs).
        tracing::info!(component = "smoke-test", "smoke test info log");
        tracing::warn!(component = "smoke-test", "smoke test warning log");

        flush_and_wait(guard).await;

        // Query Loki for logs from our service.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:3100/loki/api/v1/query_range")
            .query(&[
                ("query", r#"{service_name="taskrelay-smoke-test"}"#),
                ("limit", "10"),
            ])
            .send()
            .await
            .expect("failed to query Loki");

        assert!(
            resp.status().is_success(),
            "Loki query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp.json().await.expect("failed to parse Loki response");
        let streams = body["data"]["result"].as_array();
        assert!(
            streams.is_some_and(|s| !s.is_empty()),
            "expected log streams in Loki, got: {body}"
        );
        println!("Loki: found {} stream(s)", streams.unwrap().len());
    });
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_full_lifecycle() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Simulate a full task lifecycle generating all signal types.
        let task_id = TaskId(7);

        // Traces: enter the span so it is exported.
        {
            let span = taskrelay::telemetry::task::start_task_span("jobs_high", "smoke:1");
            let _enter = span.enter();
            taskrelay::telemetry::task::record_task(&span, task_id, "run_query");
            taskrelay::telemetry::task::record_status_transition(
                &span,
                Status::Queued,
                Status::Running,
            );
            taskrelay::telemetry::task::record_status_transition(
                &span,
                Status::Running,
                Status::Succeeded,
            );
        }

        // Metrics: counters + histogram
        taskrelay::telemetry::metrics::tasks_submitted().add(
            1,
            &[
                KeyValue::new("task_type", "run_query"),
                KeyValue::new("priority", "high"),
            ],
        );

        let transitions = taskrelay::telemetry::metrics::task_status_transitions();
        for (from, to) in [("queued", "running"), ("running", "succeeded")] {
            transitions.add(1, &[KeyValue::new("from", from), KeyValue::new("to", to)]);
        }

        let queue_ops = taskrelay::telemetry::metrics::queue_operations();
        for operation in ["send", "pop"] {
            queue_ops.add(
                1,
                &[
                    KeyValue::new("queue", "jobs_high"),
                    KeyValue::new("operation", operation),
                ],
            );
        }

        taskrelay::telemetry::metrics::lock_acquisitions()
            .add(1, &[KeyValue::new("result", "acquired")]);
        taskrelay::telemetry::metrics::executor_attempts().add(
            1,
            &[
                KeyValue::new("task_type", "run_query"),
                KeyValue::new("result", "ok"),
            ],
        );
        taskrelay::telemetry::metrics::recovery_requeued()
            .add(1, &[KeyValue::new("status", "failed")]);
        taskrelay::telemetry::metrics::task_execution_ms().record(
            150.0,
            &[
                KeyValue::new("task_type", "run_query"),
                KeyValue::new("outcome", "succeeded"),
            ],
        );

        // Logs: various levels
        tracing::info!(task_id = %task_id, task_type = "run_query", "task submitted");
        tracing::info!(task_id = %task_id, "status transition: queued -> succeeded");
        tracing::warn!(task_id = %task_id, "simulated warning during lifecycle");

        flush_and_wait(guard).await;

        // Verify all three backends have data.
        let client = reqwest::Client::new();

        // Tempo
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", "service.name=taskrelay-smoke-test"), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");
        let body: serde_json::Value = resp.json().await.unwrap();
        let trace_count = body["traces"].as_array().map_or(0, |t| t.len());
        println!("Full lifecycle - Tempo: {trace_count} trace(s)");
        assert!(trace_count > 0, "expected traces in Tempo");

        // Prometheus
        let resp = client
            .get("http://localhost:9090/api/v1/query")
            .query(&[("query", "taskrelay_tasks_submitted_total")])
            .send()
            .await
            .expect("failed to query Prometheus");
        let body: serde_json::Value = resp.json().await.unwrap();
        let metric_count = body["data"]["result"].as_array().map_or(0, |r| r.len());
        println!("Full lifecycle - Prometheus: {metric_count} series");
        assert!(metric_count > 0, "expected metrics in Prometheus");

        // Loki
        let resp = client
            .get("http://localhost:3100/loki/api/v1/query_range")
            .query(&[
                ("query", r#"{service_name="taskrelay-smoke-test"}"#),
                ("limit", "10"),
            ])
            .send()
            .await
            .expect("failed to query Loki");
        let body: serde_json::Value = resp.json().await.unwrap();
        let log_count = body["data"]["result"].as_array().map_or(0, |s| s.len());
        println!("Full lifecycle - Loki: {log_count} stream(s)");
        assert!(log_count > 0, "expected logs in Loki");

        println!("Full lifecycle smoke test passed!");
    });
}
