// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::{FusionSettings, FusionWeights, ThresholdSettings};
use crate::domain::models::classification::Label;
use crate::domain::models::score::clamp_unit;
use crate::domain::services::vision_scorer::VisionScore;

/// 稀疏提取时附加的原因
pub const SPARSE_REASON: &str = "text_extraction_sparse";

/// 融合结果
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub label: Label,
    /// [0, 1]
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// 分数融合与标签判定
///
/// 无视觉分数时直接使用文本分数；有视觉分数时按是否稀疏选择权重。
/// 阈值从高到低依次判定，保证结果唯一。
pub struct ScoreFusion {
    thresholds: ThresholdSettings,
    weights: FusionSettings,
}

impl ScoreFusion {
    pub fn new(thresholds: ThresholdSettings, weights: FusionSettings) -> Self {
        Self {
            thresholds,
            weights,
        }
    }

    pub fn fuse(
        &self,
        text_score: f64,
        text_reasons: &[String],
        vision: Option<&VisionScore>,
        sparse: bool,
    ) -> FusedScore {
        let mut reasons = text_reasons.to_vec();

        let confidence = match vision {
            None => clamp_unit(text_score),
            Some(vision) => {
                let weights: FusionWeights = if sparse {
                    self.weights.sparse
                } else {
                    self.weights.normal
                };
                reasons.push(vision.reason());
                if sparse {
                    reasons.push(SPARSE_REASON.to_string());
                }
                clamp_unit(weights.text * text_score + weights.vision * vision.score)
            }
        };

        FusedScore {
            label: self.label_for(confidence),
            confidence,
            reasons,
        }
    }

    /// 从高到低依次判定阈值
    pub fn label_for(&self, confidence: f64) -> Label {
        let t = &self.thresholds;
        if confidence >= t.pure {
            Label::PureBodywear
        } else if confidence >= t.leaning {
            Label::BodywearLeaning
        } else if confidence >= t.review_floor {
            Label::NeedsReview
        } else {
            Label::Generalist
        }
    }
}
