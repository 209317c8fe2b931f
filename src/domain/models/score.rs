// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 评分
///
/// 构造时夹紧到 [0, 1]，NaN 视为 0
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    value: f64,
    reasons: Vec<String>,
}

impl Score {
    pub fn new(value: f64, reasons: Vec<String>) -> Self {
        Self {
            value: clamp_unit(value),
            reasons,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn into_reasons(self) -> Vec<String> {
        self.reasons
    }
}

/// 将数值夹紧到 [0, 1]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
