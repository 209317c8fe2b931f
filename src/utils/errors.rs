// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 抓取失败原因
///
/// 单个阶段的失败会被归类为以下原因之一；
/// `Exhausted` 仅在没有任何阶段能够执行时出现（例如全部未配置或预算耗尽）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 反爬虫拦截或挑战页面
    Blocked,
    /// 超时
    Timeout,
    /// 网络错误、非2xx响应或无可用内容
    NetworkError,
    /// 所有阶段均无法执行
    Exhausted,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Blocked => "blocked",
            FailureReason::Timeout => "timeout",
            FailureReason::NetworkError => "network_error",
            FailureReason::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 终止性的抓取失败
///
/// 所有阶段都失败后由编排器返回。`reason` 为最后一个实际执行阶段的失败原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub reason: FailureReason,
    /// 最后失败的阶段名称（`stage1`/`stage2`/`stage3`），无阶段执行时为 `None`
    pub stage: Option<&'static str>,
    pub detail: String,
}

impl FetchFailure {
    pub fn new(reason: FailureReason, stage: Option<&'static str>, detail: impl Into<String>) -> Self {
        Self {
            reason,
            stage,
            detail: detail.into(),
        }
    }

    /// 没有任何阶段可执行时的失败
    pub fn exhausted(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::Exhausted, None, detail)
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{}: {} ({})", self.reason, self.detail, stage),
            None => write!(f, "{}: {}", self.reason, self.detail),
        }
    }
}

/// 分类器错误类型
///
/// 前三类只在单个阶段内部出现并触发升级；`FetchExhausted` 对单个域名是终止性的；
/// `VisionUnavailable` 降级为纯文本评分；`ConfigInvalid` 在处理任何域名之前中止运行。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("blocked: {0}")]
    FetchBlocked(String),

    #[error("timeout: {0}")]
    FetchTimeout(String),

    #[error("network_error: {0}")]
    FetchNetworkError(String),

    #[error("all fetch stages failed: {0}")]
    FetchExhausted(FetchFailure),

    #[error("vision unavailable: {0}")]
    VisionUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl ClassifierError {
    /// 单阶段错误对应的失败原因
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ClassifierError::FetchBlocked(_) => Some(FailureReason::Blocked),
            ClassifierError::FetchTimeout(_) => Some(FailureReason::Timeout),
            ClassifierError::FetchNetworkError(_) => Some(FailureReason::NetworkError),
            ClassifierError::FetchExhausted(failure) => Some(failure.reason),
            _ => None,
        }
    }
}

impl From<FetchFailure> for ClassifierError {
    fn from(failure: FetchFailure) -> Self {
        ClassifierError::FetchExhausted(failure)
    }
}

/// 输入列表错误
#[derive(Error, Debug)]
pub enum InputError {
    #[error("无法读取输入文件: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV解析错误: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV输入缺少 domain 列")]
    MissingDomainColumn,
}
