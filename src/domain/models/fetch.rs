// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 抓取阶段
///
/// 顺序固定：直连HTTP → 浏览器渲染 → 商业抓取回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "stage1")]
    Direct,
    #[serde(rename = "stage2")]
    Browser,
    #[serde(rename = "stage3")]
    Fallback,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Direct => "stage1",
            Stage::Browser => "stage2",
            Stage::Fallback => "stage3",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Blocked,
    Error,
    /// 没有空闲的执行资源，站点未被访问
    Unavailable,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::Error => "error",
            AttemptOutcome::Unavailable => "unavailable",
        }
    }
}

/// 阶段尝试记录
///
/// 只记录元数据；抓取到的内容由编排器持有，直到交给特征提取
#[derive(Debug, Clone, PartialEq)]
pub struct StageAttempt {
    pub stage: Stage,
    /// 从1开始的尝试序号
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
    pub final_url: Option<String>,
    pub http_status: Option<u16>,
    /// 失败详情
    pub detail: Option<String>,
}

/// 发送给视觉模型的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionImage {
    /// 远程图片地址
    Url(String),
    /// JPEG截图字节
    Jpeg(Vec<u8>),
}

/// 页面内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    Html(String),
    /// 回退服务仅返回Markdown时使用
    Markdown(String),
}

impl PageContent {
    pub fn is_blank(&self) -> bool {
        match self {
            PageContent::Html(s) | PageContent::Markdown(s) => s.trim().is_empty(),
        }
    }
}

/// 抓取到的页面
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub content: PageContent,
    /// 重定向后的最终URL
    pub final_url: String,
    pub http_status: Option<u16>,
    /// 视口截图（在任何页面操作之前截取）
    pub screenshot: Option<VisionImage>,
}

impl FetchedPage {
    pub fn html(content: impl Into<String>, final_url: impl Into<String>) -> Self {
        Self {
            content: PageContent::Html(content.into()),
            final_url: final_url.into(),
            http_status: None,
            screenshot: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_screenshot(mut self, screenshot: VisionImage) -> Self {
        self.screenshot = Some(screenshot);
        self
    }
}
