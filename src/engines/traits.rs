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

use crate::domain::models::fetch::{AttemptOutcome, FetchedPage, Stage, VisionImage};
use crate::utils::errors::FailureReason;
use crate::utils::retry_policy::RetryPolicy;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// 引擎错误类型
///
/// 只在单个阶段内部出现，唯一的作用是触发升级到下一阶段
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 反爬虫拦截或挑战页面
    #[error("Blocked: {0}")]
    Blocked(String),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 非2xx且没有可用内容
    #[error("HTTP status {status}")]
    Http { status: u16 },
    /// 响应体为空
    #[error("Empty response body")]
    EmptyBody,
    /// 浏览器错误
    #[error("Browser error: {0}")]
    Browser(String),
    /// 等待执行资源超时，尚未访问站点
    #[error("Capacity unavailable: {0}")]
    Unavailable(String),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 对应的失败原因
    pub fn reason(&self) -> FailureReason {
        match self {
            EngineError::Blocked(_) => FailureReason::Blocked,
            EngineError::Timeout => FailureReason::Timeout,
            EngineError::RequestFailed(e) if e.is_timeout() => FailureReason::Timeout,
            _ => FailureReason::NetworkError,
        }
    }

    /// 尝试记录中的结果分类
    pub fn outcome(&self) -> AttemptOutcome {
        if let EngineError::Unavailable(_) = self {
            return AttemptOutcome::Unavailable;
        }
        match self.reason() {
            FailureReason::Blocked => AttemptOutcome::Blocked,
            FailureReason::Timeout => AttemptOutcome::Timeout,
            _ => AttemptOutcome::Error,
        }
    }
}

/// 单次尝试失败
///
/// `partial` 保留失败前已经拿到的内容（例如挑战页面的截图），
/// 当所有阶段都失败时可作为最后的特征来源
#[derive(Debug)]
pub struct AttemptFailure {
    pub error: EngineError,
    pub partial: Option<FetchedPage>,
}

impl AttemptFailure {
    pub fn with_partial(error: EngineError, partial: Option<FetchedPage>) -> Self {
        Self { error, partial }
    }
}

impl From<EngineError> for AttemptFailure {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

impl From<reqwest::Error> for AttemptFailure {
    fn from(error: reqwest::Error) -> Self {
        EngineError::from(error).into()
    }
}

/// 抓取策略特质
///
/// 编排器按固定顺序依次尝试各策略
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// 所属阶段
    fn stage(&self) -> Stage;

    /// 策略名称
    fn name(&self) -> &'static str;

    /// 单次尝试超时
    fn timeout(&self) -> Duration;

    /// 等待执行资源（例如浏览器页面）的上限，不计入 `timeout`
    fn checkout_timeout(&self) -> Duration {
        Duration::ZERO
    }

    /// 阶段内重试策略，默认只尝试一次
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    /// 是否为计费调用（受回退预算约束）
    fn is_metered(&self) -> bool {
        false
    }

    /// 执行一次抓取尝试
    ///
    /// # 参数
    ///
    /// * `domain` - 规范化后的域名
    /// * `attempt` - 从1开始的尝试序号，可用于选择等待策略
    async fn attempt(&self, domain: &str, attempt: u32) -> Result<FetchedPage, AttemptFailure>;

    /// 截取首页视口截图，不支持截图的策略返回 `None`
    async fn capture_screenshot(&self, _domain: &str) -> Option<VisionImage> {
        None
    }
}
