// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::*;
use async_trait::async_trait;
use bodywear_classifier::domain::models::classification::{ClassificationResult, Label, OutputRecord};
use bodywear_classifier::domain::models::domain_task::DomainTask;
use bodywear_classifier::domain::models::fetch::Stage;
use bodywear_classifier::domain::repositories::result_sink::{AppendOutcome, ResultSink, SinkError};
use bodywear_classifier::infrastructure::repositories::csv_result_sink::CsvResultSink;
use bodywear_classifier::workers::manager::WorkerPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn tasks(domains: &[&str]) -> Vec<DomainTask> {
    DomainTask::from_inputs(domains.iter().copied())
}

#[tokio::test]
async fn test_run_writes_one_row_per_domain() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("results.csv");
    let direct = Arc::new(
        RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML))
            .route("store.example", Behavior::Page(GENERALIST_HTML))
            .route("down.example", Behavior::ServerError),
    );
    let use_case = PipelineBuilder::new().stage(direct).build();
    let sink = Arc::new(CsvResultSink::open(&output).unwrap());

    let summary = WorkerPool::new(use_case, sink.clone(), 2)
        .run(
            tasks(&["lingerie.example", "store.example", "down.example"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    sink.close().await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.interrupted, 0);
    assert_eq!(summary.label_count(Label::PureBodywear), 1);
    assert_eq!(summary.label_count(Label::Generalist), 1);
    assert_eq!(summary.label_count(Label::Error), 1);
    assert_eq!(summary.stages.get("stage1"), Some(&2));

    assert_eq!(read_headers(&output), OutputRecord::HEADERS.to_vec());
    let rows = read_rows(&output);
    assert_eq!(rows.len(), 3);
    let domains: HashSet<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(
        domains,
        HashSet::from(["lingerie.example", "store.example", "down.example"])
    );
    let down = rows.iter().find(|r| &r[0] == "down.example").unwrap();
    assert_eq!(&down[1], "Error");
    assert_eq!(&down[2], "");
    assert!(down[8].starts_with("network_error"));
}

#[tokio::test]
async fn test_deferred_domain_is_not_written_and_retried_later() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("results.csv");
    let direct = Arc::new(
        RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML))
            .route("busy.example", Behavior::ServerError),
    );
    let browser = Arc::new(RoutedStrategy::new(Stage::Browser, Behavior::NoCapacity));
    let use_case = PipelineBuilder::new().stage(direct.clone()).stage(browser).build();
    let sink = Arc::new(CsvResultSink::open(&output).unwrap());

    let summary = WorkerPool::new(use_case, sink.clone(), 2)
        .run(tasks(&["lingerie.example", "busy.example"]), CancellationToken::new())
        .await
        .unwrap();
    sink.close().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.interrupted, 1);
    let rows = read_rows(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "lingerie.example");

    // 有空闲页面后重新运行
    let browser = Arc::new(RoutedStrategy::new(Stage::Browser, Behavior::Page(BODYWEAR_HTML)));
    let use_case = PipelineBuilder::new().stage(direct).stage(browser).build();
    let sink = Arc::new(CsvResultSink::open(&output).unwrap());
    let summary = WorkerPool::new(use_case, sink.clone(), 2)
        .run(tasks(&["lingerie.example", "busy.example"]), CancellationToken::new())
        .await
        .unwrap();
    sink.close().await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.stages.get("stage2"), Some(&1));
    assert_eq!(read_rows(&output).len(), 2);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("results.csv");
    let direct = Arc::new(
        RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML))
            .with_delay(Duration::from_millis(30)),
    );
    let use_case = PipelineBuilder::new().stage(direct.clone()).build();
    let sink = Arc::new(CsvResultSink::open(&output).unwrap());
    let domains: Vec<String> = (0..24).map(|i| format!("shop{}.example", i)).collect();

    let summary = WorkerPool::new(use_case, sink.clone(), 4)
        .run(DomainTask::from_inputs(domains.iter()), CancellationToken::new())
        .await
        .unwrap();
    sink.close().await.unwrap();

    assert_eq!(summary.processed, 24);
    assert!(direct.peak_in_flight() <= 4, "peak {}", direct.peak_in_flight());
    assert!(direct.peak_in_flight() >= 2);

    let rows = read_rows(&output);
    assert_eq!(rows.len(), 24);
    let unique: HashSet<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(unique.len(), 24);
    assert!(rows.iter().all(|r| r.len() == OutputRecord::HEADERS.len()));
}

#[tokio::test]
async fn test_rerun_skips_completed_domains() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("results.csv");

    {
        let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML)));
        let sink = Arc::new(CsvResultSink::open(&output).unwrap());
        let pool = WorkerPool::new(PipelineBuilder::new().stage(direct).build(), sink.clone(), 3);
        pool.run(tasks(&["a.example", "b.example", "c.example"]), CancellationToken::new())
            .await
            .unwrap();
        sink.close().await.unwrap();
    }

    let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML)));
    let sink = Arc::new(CsvResultSink::open(&output).unwrap());
    let pool = WorkerPool::new(PipelineBuilder::new().stage(direct.clone()).build(), sink.clone(), 3);
    let summary = pool
        .run(
            tasks(&["a.example", "b.example", "c.example", "d.example"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    sink.close().await.unwrap();

    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.processed, 1);
    assert_eq!(direct.calls(), vec!["d.example".to_string()]);

    let rows = read_rows(&output);
    assert_eq!(rows.len(), 4);
    let unique: HashSet<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(unique.len(), 4);
}

#[tokio::test]
async fn test_cancellation_stops_admission_and_leaves_work_for_resume() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("results.csv");
    let cancel = CancellationToken::new();

    let direct = Arc::new(
        RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML))
            .route("b.example", Behavior::CancelRun(cancel.clone())),
    );
    let browser = Arc::new(RoutedStrategy::new(Stage::Browser, Behavior::Page(BODYWEAR_HTML)));
    let sink = Arc::new(CsvResultSink::open(&output).unwrap());
    let pool = WorkerPool::new(
        PipelineBuilder::new().stage(direct.clone()).stage(browser.clone()).build(),
        sink.clone(),
        1,
    );

    let summary = pool
        .run(tasks(&["a.example", "b.example", "c.example"]), cancel)
        .await
        .unwrap();
    sink.close().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.interrupted, 2);
    assert_eq!(direct.calls(), vec!["a.example".to_string(), "b.example".to_string()]);
    assert!(browser.calls().is_empty());
    let rows = read_rows(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "a.example");

    // 续跑：只处理未完成的域名
    let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML)));
    let sink = Arc::new(CsvResultSink::open(&output).unwrap());
    let pool = WorkerPool::new(PipelineBuilder::new().stage(direct.clone()).build(), sink.clone(), 2);
    let summary = pool
        .run(tasks(&["a.example", "b.example", "c.example"]), CancellationToken::new())
        .await
        .unwrap();
    sink.close().await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 2);
    let mut calls = direct.calls();
    calls.sort();
    assert_eq!(calls, vec!["b.example".to_string(), "c.example".to_string()]);
    assert_eq!(read_rows(&output).len(), 3);
}

/// 每次写入都失败的输出
struct BrokenSink;

#[async_trait]
impl ResultSink for BrokenSink {
    async fn append(&self, _result: &ClassificationResult) -> Result<AppendOutcome, SinkError> {
        Err(SinkError::Io(std::io::Error::other("disk full")))
    }

    fn is_completed(&self, _domain: &str) -> bool {
        false
    }

    fn completed_count(&self) -> usize {
        0
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_sink_failure_aborts_run() {
    let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML)));
    let pool = WorkerPool::new(
        PipelineBuilder::new().stage(direct.clone()).build(),
        Arc::new(BrokenSink),
        1,
    );
    let cancel = CancellationToken::new();

    let outcome = pool
        .run(tasks(&["a.example", "b.example", "c.example"]), cancel.clone())
        .await;

    assert!(matches!(outcome, Err(SinkError::Io(_))));
    assert_eq!(direct.calls(), vec!["a.example".to_string()]);
    assert!(!cancel.is_cancelled());
}
