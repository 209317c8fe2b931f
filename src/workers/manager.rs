// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::usecases::classify_domain::ClassifyDomainUseCase;
use crate::domain::models::classification::{ClassificationResult, Label};
use crate::domain::models::domain_task::DomainTask;
use crate::domain::repositories::result_sink::{AppendOutcome, ResultSink, SinkError};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 单个域名任务的结束状态
enum TaskOutcome {
    Completed(Box<ClassificationResult>, AppendOutcome),
    Interrupted,
}

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// 输入中的域名数
    pub total: usize,
    /// 之前运行已完成而跳过的域名数
    pub skipped: usize,
    /// 本次写入的结果数
    pub processed: usize,
    /// 被取消、下次运行会重新处理的域名数
    pub interrupted: usize,
    pub labels: BTreeMap<Label, usize>,
    /// 按 `stage_used` 统计
    pub stages: BTreeMap<String, usize>,
    pub vision_used: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    fn record(&mut self, result: &ClassificationResult) {
        self.processed += 1;
        *self.labels.entry(result.label).or_default() += 1;
        if let Some(stage_used) = result.stage_used {
            *self.stages.entry(stage_used.to_string()).or_default() += 1;
            if stage_used.vision {
                self.vision_used += 1;
            }
        }
    }

    pub fn label_count(&self, label: Label) -> usize {
        self.labels.get(&label).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "domains: {} total, {} processed, {} skipped (already done), {} interrupted",
            self.total, self.processed, self.skipped, self.interrupted
        )?;
        for label in Label::ALL {
            writeln!(f, "  {:<17} {}", label.as_str(), self.label_count(label))?;
        }
        for (stage, count) in &self.stages {
            writeln!(f, "  via {:<13} {}", stage, count)?;
        }
        write!(
            f,
            "vision used: {}, elapsed: {:.1}s",
            self.vision_used,
            self.elapsed.as_secs_f64()
        )
    }
}

/// 有界工作池
///
/// 最多 `concurrency` 个域名同时处理，空出一个槽位才放入下一个域名。
/// 取消后不再放入新域名，处理中的域名在下一个阶段边界停止且不输出。
/// 输出写入失败对整个运行是致命的。
pub struct WorkerPool {
    use_case: Arc<ClassifyDomainUseCase>,
    sink: Arc<dyn ResultSink>,
    concurrency: usize,
    show_progress: bool,
}

impl WorkerPool {
    pub fn new(use_case: Arc<ClassifyDomainUseCase>, sink: Arc<dyn ResultSink>, concurrency: usize) -> Self {
        Self {
            use_case,
            sink,
            concurrency: concurrency.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// 处理所有尚未完成的域名
    pub async fn run(&self, tasks: Vec<DomainTask>, cancel: CancellationToken) -> Result<RunSummary, SinkError> {
        let started = Instant::now();
        let mut summary = RunSummary {
            total: tasks.len(),
            ..RunSummary::default()
        };

        let pending: Vec<DomainTask> = tasks
            .into_iter()
            .filter(|task| !self.sink.is_completed(task.domain()))
            .collect();
        summary.skipped = summary.total - pending.len();
        info!(
            "Starting run: {} pending, {} already completed, concurrency {}",
            pending.len(),
            summary.skipped,
            self.concurrency
        );

        let progress = self.progress_bar(pending.len() as u64);
        // 写入失败时只取消本次运行内的任务
        let run_token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut sink_error: Option<SinkError> = None;
        let mut admitted = 0;

        for task in &pending {
            let permit = tokio::select! {
                _ = run_token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = workers.try_join_next() {
                self.settle(joined, &mut summary, &mut sink_error, &run_token, &progress);
            }
            if run_token.is_cancelled() {
                break;
            }

            admitted += 1;
            let use_case = self.use_case.clone();
            let sink = self.sink.clone();
            let token = run_token.clone();
            let task = task.clone();
            workers.spawn(async move {
                let _permit = permit;
                match use_case.execute(&task, &token).await {
                    Ok(result) => {
                        let outcome = sink.append(&result).await?;
                        Ok(TaskOutcome::Completed(Box::new(result), outcome))
                    }
                    Err(_) => Ok(TaskOutcome::Interrupted),
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            self.settle(joined, &mut summary, &mut sink_error, &run_token, &progress);
        }

        summary.interrupted += pending.len() - admitted;
        summary.elapsed = started.elapsed();
        progress.finish_and_clear();

        if let Some(e) = sink_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            warn!("Run cancelled, {} domains left for the next run", summary.interrupted);
        }
        info!(
            "Run finished: {} processed, {} interrupted in {:.1}s",
            summary.processed,
            summary.interrupted,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    fn settle(
        &self,
        joined: Result<Result<TaskOutcome, SinkError>, JoinError>,
        summary: &mut RunSummary,
        sink_error: &mut Option<SinkError>,
        run_token: &CancellationToken,
        progress: &ProgressBar,
    ) {
        match joined {
            Ok(Ok(TaskOutcome::Completed(result, AppendOutcome::Written))) => {
                summary.record(&result);
                progress.inc(1);
            }
            Ok(Ok(TaskOutcome::Completed(result, AppendOutcome::Duplicate))) => {
                info!("Result for {} was already recorded", result.domain);
                progress.inc(1);
            }
            Ok(Ok(TaskOutcome::Interrupted)) => summary.interrupted += 1,
            Ok(Err(e)) => {
                error!("Result sink failed, stopping run: {}", e);
                summary.interrupted += 1;
                run_token.cancel();
                sink_error.get_or_insert(e);
            }
            Err(e) => {
                error!("Domain worker panicked: {}", e);
                summary.interrupted += 1;
            }
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }
}
