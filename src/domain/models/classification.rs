// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::fetch::Stage;
use crate::utils::errors::FetchFailure;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 分类标签（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "Pure Bodywear")]
    PureBodywear,
    #[serde(rename = "Bodywear Leaning")]
    BodywearLeaning,
    #[serde(rename = "Needs Review")]
    NeedsReview,
    #[serde(rename = "Generalist")]
    Generalist,
    #[serde(rename = "Error")]
    Error,
}

impl Label {
    pub const ALL: [Label; 5] = [
        Label::PureBodywear,
        Label::BodywearLeaning,
        Label::NeedsReview,
        Label::Generalist,
        Label::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::PureBodywear => "Pure Bodywear",
            Label::BodywearLeaning => "Bodywear Leaning",
            Label::NeedsReview => "Needs Review",
            Label::Generalist => "Generalist",
            Label::Error => "Error",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产出结果所用的阶段，以及视觉评分是否参与
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageUsed {
    pub stage: Stage,
    pub vision: bool,
}

impl StageUsed {
    pub fn new(stage: Stage, vision: bool) -> Self {
        Self { stage, vision }
    }
}

impl fmt::Display for StageUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vision {
            write!(f, "{}+vision", self.stage)
        } else {
            write!(f, "{}", self.stage)
        }
    }
}

/// 单个域名的分类结果
///
/// 写入输出后不再修改。`confidence` 仅在标签为 `Error` 时为 `None`。
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub domain: String,
    pub label: Label,
    pub confidence: Option<f64>,
    pub text_score: Option<f64>,
    pub vision_score: Option<f64>,
    pub stage_used: Option<StageUsed>,
    pub reasons: Vec<String>,
    pub image_count: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ClassificationResult {
    /// 所有阶段失败时的错误结果
    pub fn failed(domain: &str, failure: &FetchFailure, started_at: DateTime<Utc>) -> Self {
        Self {
            domain: domain.to_string(),
            label: Label::Error,
            confidence: None,
            text_score: None,
            vision_score: None,
            stage_used: None,
            reasons: Vec::new(),
            image_count: 0,
            error: Some(failure.to_string()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// 转换为输出行
    pub fn to_record(&self) -> OutputRecord {
        OutputRecord {
            domain: self.domain.clone(),
            label: self.label.as_str().to_string(),
            confidence: self.confidence.map(round4),
            text_score: self.text_score.map(round4),
            vision_score: self.vision_score.map(round4),
            reasons: self.reasons.join(";"),
            image_count: self.image_count,
            stage_used: self
                .stage_used
                .map(|s| s.to_string())
                .unwrap_or_default(),
            error: self.error.clone().unwrap_or_default(),
            started_at: self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: self.finished_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// 输出CSV中的一行
///
/// 字段顺序即列顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub domain: String,
    pub label: String,
    pub confidence: Option<f64>,
    pub text_score: Option<f64>,
    pub vision_score: Option<f64>,
    pub reasons: String,
    pub image_count: usize,
    pub stage_used: String,
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
}

impl OutputRecord {
    pub const HEADERS: [&'static str; 11] = [
        "domain",
        "label",
        "confidence",
        "text_score",
        "vision_score",
        "reasons",
        "image_count",
        "stage_used",
        "error",
        "started_at",
        "finished_at",
    ];
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
