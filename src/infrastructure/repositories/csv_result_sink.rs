// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::models::classification::{ClassificationResult, OutputRecord};
use crate::domain::repositories::result_sink::{AppendOutcome, ResultSink, SinkError};
use async_trait::async_trait;
use dashmap::DashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 写入队列长度
const WRITE_QUEUE_CAPACITY: usize = 256;

struct WriteCommand {
    record: OutputRecord,
    ack: oneshot::Sender<Result<(), SinkError>>,
}

/// 可断点续跑的CSV结果输出
///
/// 所有追加经由单个写入线程串行化；每行在 `flush` 与 `sync_data` 之后才确认。
/// 打开已有文件时会截掉崩溃留下的半行，并把带 `finished_at` 的域名载入完成集合。
pub struct CsvResultSink {
    path: PathBuf,
    completed: DashSet<String>,
    sender: parking_lot::Mutex<Option<mpsc::Sender<WriteCommand>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<Result<(), SinkError>>>>,
}

impl CsvResultSink {
    /// 打开（或创建）输出文件并启动写入线程
    ///
    /// 需要在tokio运行时内调用
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let completed = DashSet::new();
        if path.exists() {
            truncate_torn_tail(&path)?;
            for domain in load_completed(&path)? {
                completed.insert(domain);
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            let mut header = csv::Writer::from_writer(Vec::new());
            header.write_record(OutputRecord::HEADERS)?;
            let bytes = header.into_inner().map_err(|e| SinkError::Io(e.into_error()))?;
            file.write_all(&bytes)?;
            file.sync_data()?;
        }

        info!(
            "Opened result file {} ({} completed domains)",
            path.display(),
            completed.len()
        );

        let (sender, receiver) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let writer = tokio::task::spawn_blocking(move || run_writer(file, receiver));

        Ok(Self {
            path,
            completed,
            sender: parking_lot::Mutex::new(Some(sender)),
            writer: tokio::sync::Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for CsvResultSink {
    async fn append(&self, result: &ClassificationResult) -> Result<AppendOutcome, SinkError> {
        let key = domain_key(&result.domain);
        // 先占位，避免并发写入同一域名
        if !self.completed.insert(key.clone()) {
            debug!("Skipping duplicate result for {}", result.domain);
            return Ok(AppendOutcome::Duplicate);
        }

        let outcome = self.send(result.to_record()).await;
        if outcome.is_err() {
            self.completed.remove(&key);
        }
        outcome.map(|_| AppendOutcome::Written)
    }

    fn is_completed(&self, domain: &str) -> bool {
        self.completed.contains(&domain_key(domain))
    }

    fn completed_count(&self) -> usize {
        self.completed.len()
    }

    async fn close(&self) -> Result<(), SinkError> {
        drop(self.sender.lock().take());
        let handle = self.writer.lock().await.take();
        match handle {
            Some(handle) => handle.await.map_err(|_| SinkError::Closed)?,
            None => Ok(()),
        }
    }
}

impl CsvResultSink {
    async fn send(&self, record: OutputRecord) -> Result<(), SinkError> {
        let sender = self.sender.lock().clone().ok_or(SinkError::Closed)?;
        let (ack, done) = oneshot::channel();
        sender
            .send(WriteCommand { record, ack })
            .await
            .map_err(|_| SinkError::Closed)?;
        done.await.map_err(|_| SinkError::Closed)?
    }
}

fn run_writer(file: File, mut receiver: mpsc::Receiver<WriteCommand>) -> Result<(), SinkError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    while let Some(WriteCommand { record, ack }) = receiver.blocking_recv() {
        let result = write_durable(&mut writer, &record);
        if let Err(e) = &result {
            error!("Failed to persist result for {}: {}", record.domain, e);
        }
        // 调用方可能已放弃等待
        let _ = ack.send(result);
    }

    writer.flush()?;
    writer.get_ref().sync_data()?;
    Ok(())
}

fn write_durable(writer: &mut csv::Writer<File>, record: &OutputRecord) -> Result<(), SinkError> {
    writer.serialize(record)?;
    writer.flush()?;
    writer.get_ref().sync_data()?;
    Ok(())
}

fn domain_key(domain: &str) -> String {
    domain.trim().to_lowercase()
}

/// 截掉文件末尾没有换行的半行
fn truncate_torn_tail(path: &Path) -> Result<(), SinkError> {
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }

    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    warn!(
        "Truncating torn trailing line in {} ({} bytes)",
        path.display(),
        bytes.len() - keep
    );

    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_data()?;
    Ok(())
}

/// 读取已完成的域名（`finished_at` 非空的行）
fn load_completed(path: &Path) -> Result<Vec<String>, SinkError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let domain_idx = headers.iter().position(|h| h == "domain");
    let finished_idx = headers.iter().position(|h| h == "finished_at");
    let (Some(domain_idx), Some(finished_idx)) = (domain_idx, finished_idx) else {
        warn!("{} has no domain/finished_at header, nothing to resume", path.display());
        return Ok(Vec::new());
    };

    let mut domains = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping unreadable row in {}: {}", path.display(), e);
                continue;
            }
        };
        let finished = row.get(finished_idx).map(str::trim).unwrap_or_default();
        if let (Some(domain), false) = (row.get(domain_idx), finished.is_empty()) {
            domains.push(domain_key(domain));
        }
    }
    Ok(domains)
}
