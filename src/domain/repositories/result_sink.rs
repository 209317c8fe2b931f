// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::classification::ClassificationResult;
use async_trait::async_trait;
use thiserror::Error;

/// 输出写入错误
///
/// 写入失败会破坏断点续跑的保证，因此对整个运行是致命的
#[derive(Error, Debug)]
pub enum SinkError {
    /// I/O错误
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV编码错误
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// 写入线程已退出
    #[error("Result writer is closed")]
    Closed,
}

/// 追加结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// 已持久化
    Written,
    /// 该域名已有完成记录，本次忽略
    Duplicate,
}

/// 结果输出特质
///
/// 仅追加；每个域名至多一行。`append` 返回时记录已经落盘。
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// 追加一条结果
    async fn append(&self, result: &ClassificationResult) -> Result<AppendOutcome, SinkError>;

    /// 域名是否已有完成记录（包括本次运行之前写入的）
    fn is_completed(&self, domain: &str) -> bool;

    /// 已完成记录数
    fn completed_count(&self) -> usize;

    /// 刷新并关闭写入器
    async fn close(&self) -> Result<(), SinkError>;
}
