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

use crate::utils::errors::ClassifierError;
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::cmp::Ordering;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// 应用程序配置设置
///
/// 启动时加载一次并校验，之后以 `Arc<Settings>` 的形式注入各组件，运行期间只读
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    /// 标签阈值
    #[validate(nested)]
    pub thresholds: ThresholdSettings,
    /// 文本评分参数
    #[validate(nested)]
    pub scoring: ScoringSettings,
    /// 稀疏提取判定与图片数量
    #[validate(nested)]
    pub extraction: ExtractionSettings,
    /// 视觉评分配置
    #[validate(nested)]
    pub vision: VisionSettings,
    /// 融合权重
    #[validate(nested)]
    pub fusion: FusionSettings,
    /// 抓取阶段超时与重试
    #[validate(nested)]
    pub fetch: FetchSettings,
    /// 浏览器池配置
    #[validate(nested)]
    pub browser: BrowserSettings,
    /// 商业抓取回退服务配置
    pub fallback: FallbackSettings,
    /// 付费调用预算
    pub budget: BudgetSettings,
    /// 流水线配置
    #[validate(nested)]
    pub pipeline: PipelineSettings,
    /// 指标导出配置
    pub metrics: MetricsSettings,
}

/// 标签阈值，必须满足 `pure > leaning > review_floor`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ThresholdSettings {
    #[validate(range(min = 0.0, max = 1.0))]
    pub pure: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub leaning: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub review_floor: f64,
}

/// 文本评分配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ScoringSettings {
    /// 泛品类惩罚权重
    #[validate(range(min = 0.0, max = 10.0))]
    pub generalist_penalty_weight: f64,
}

/// 特征提取配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExtractionSettings {
    /// 导航项最少数量（同时低于两个最小值即视为稀疏）
    pub min_nav_items: usize,
    /// 标题最少数量
    pub min_headings: usize,
    /// 候选图片上限
    #[validate(range(min = 1, max = 16))]
    pub max_images: usize,
}

/// 视觉评分配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VisionSettings {
    /// 是否启用视觉评分
    pub enabled: bool,
    /// API密钥，未设置时回退到 `OPENAI_API_KEY`
    pub api_key: Option<String>,
    /// 模型名称
    pub model: String,
    /// API基础URL
    pub api_base_url: String,
    /// 不确定区间下界（含）
    #[validate(range(min = 0.0, max = 1.0))]
    pub uncertain_min: f64,
    /// 不确定区间上界（含）
    #[validate(range(min = 0.0, max = 1.0))]
    pub uncertain_max: f64,
    /// 单次调用发送的图片上限
    #[validate(range(min = 1, max = 16))]
    pub max_images: usize,
    /// 发送前缩放图片的最长边（像素）
    #[validate(range(min = 64, max = 4096))]
    pub max_image_dimension: u32,
    /// 图片细节等级 (low, high, auto)
    pub detail: String,
    /// 最大输出token
    pub max_tokens: u32,
    /// 采样温度
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f64,
    /// 单次调用超时（秒）
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    /// 每分钟请求上限
    #[validate(range(min = 1))]
    pub requests_per_minute: u32,
}

/// 一组融合权重
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct FusionWeights {
    #[validate(range(min = 0.0, max = 1.0))]
    pub text: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub vision: f64,
}

/// 融合权重配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FusionSettings {
    /// 常规提取时的权重
    #[validate(nested)]
    pub normal: FusionWeights,
    /// 稀疏提取时的权重（更依赖视觉）
    #[validate(nested)]
    pub sparse: FusionWeights,
}

/// 抓取配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FetchSettings {
    /// 阶段1超时（秒）
    #[validate(range(min = 1))]
    pub stage1_timeout_secs: u64,
    /// 阶段2单次尝试超时（秒）
    #[validate(range(min = 1))]
    pub stage2_timeout_secs: u64,
    /// 阶段3超时（秒）
    #[validate(range(min = 1))]
    pub stage3_timeout_secs: u64,
    /// 阶段2尝试次数
    #[validate(range(min = 1, max = 10))]
    pub stage2_attempts: u32,
    /// 阶段2重试初始退避（毫秒）
    pub retry_initial_backoff_ms: u64,
    /// 阶段2重试最大退避（毫秒）
    pub retry_max_backoff_ms: u64,
    /// 请求使用的 User-Agent
    pub user_agent: String,
}

/// 浏览器池配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BrowserSettings {
    /// 是否启用浏览器阶段
    pub enabled: bool,
    /// 同时签出的页面上限
    #[validate(range(min = 1))]
    pub max_pages: usize,
    /// 等待空闲页面的上限（秒），不得超过阶段2单次尝试超时；
    /// 超时的域名留到下次运行，不记为站点失败
    #[validate(range(min = 1))]
    pub checkout_timeout_secs: u64,
    /// 远程Chrome调试地址，未设置时本地启动
    pub remote_debugging_url: Option<String>,
    /// network-idle 等待条件下的静置时间（毫秒）
    pub network_idle_settle_ms: u64,
    /// 等待导航元素出现的时间（毫秒）
    pub nav_wait_ms: u64,
}

/// 商业抓取回退服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackSettings {
    /// 是否启用
    pub enabled: bool,
    /// API密钥，未设置时回退到 `FIRECRAWL_API_KEY`；仍为空则跳过阶段3
    pub api_key: Option<String>,
    /// API基础URL
    pub base_url: String,
    /// 服务端等待JS执行的时间（毫秒）
    pub wait_for_ms: u64,
}

/// 付费调用预算，0 表示不限
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    /// 本次运行视觉调用上限
    pub max_vision_calls: u64,
    /// 本次运行回退服务调用上限
    pub max_fallback_calls: u64,
}

/// 流水线配置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PipelineSettings {
    /// 并发域名数
    #[validate(range(min = 1, max = 1000))]
    pub concurrency: usize,
    /// 词典文件路径
    pub dictionary_path: String,
    /// 弹窗规则文件路径
    pub overlay_patterns_path: String,
}

/// 指标导出配置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出
    pub enabled: bool,
    /// 监听地址
    pub listen_addr: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加默认值、`config/default`、`config/{APP_ENVIRONMENT}` 与
    /// `CLASSIFIER__*` 环境变量，并完成校验
    pub fn new() -> Result<Self, ClassifierError> {
        Self::load(None)
    }

    /// 加载配置，`path` 为额外的配置文件（优先级高于默认文件，低于环境变量）
    pub fn load(path: Option<&Path>) -> Result<Self, ClassifierError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let mut builder = Self::builder_with_defaults()
            .map_err(config_invalid)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("CLASSIFIER")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_invalid)?;

        settings.apply_key_fallbacks();
        settings.validate_all()?;
        Ok(settings)
    }

    /// 仅由内置默认值构成的配置（不读取文件和环境变量）
    pub fn defaults() -> Result<Self, ClassifierError> {
        let settings: Settings = Self::builder_with_defaults()
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .map_err(config_invalid)?;
        settings.validate_all()?;
        Ok(settings)
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            // Thresholds
            .set_default("thresholds.pure", 0.70)?
            .set_default("thresholds.leaning", 0.35)?
            .set_default("thresholds.review_floor", 0.25)?
            // Text scoring
            .set_default("scoring.generalist_penalty_weight", 1.0)?
            // Extraction
            .set_default("extraction.min_nav_items", 5)?
            .set_default("extraction.min_headings", 3)?
            .set_default("extraction.max_images", 4)?
            // Vision
            .set_default("vision.enabled", true)?
            .set_default("vision.model", "gpt-4o-mini")?
            .set_default("vision.api_base_url", "https://api.openai.com/v1")?
            .set_default("vision.uncertain_min", 0.15)?
            .set_default("vision.uncertain_max", 0.80)?
            .set_default("vision.max_images", 4)?
            .set_default("vision.max_image_dimension", 512)?
            .set_default("vision.detail", "low")?
            .set_default("vision.max_tokens", 200)?
            .set_default("vision.temperature", 0.3)?
            .set_default("vision.timeout_secs", 30)?
            .set_default("vision.requests_per_minute", 60)?
            // Fusion
            .set_default("fusion.normal.text", 0.5)?
            .set_default("fusion.normal.vision", 0.5)?
            .set_default("fusion.sparse.text", 0.1)?
            .set_default("fusion.sparse.vision", 0.9)?
            // Fetch
            .set_default("fetch.stage1_timeout_secs", 20)?
            .set_default("fetch.stage2_timeout_secs", 45)?
            .set_default("fetch.stage3_timeout_secs", 60)?
            .set_default("fetch.stage2_attempts", 3)?
            .set_default("fetch.retry_initial_backoff_ms", 2000)?
            .set_default("fetch.retry_max_backoff_ms", 15000)?
            .set_default(
                "fetch.user_agent",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )?
            // Browser pool
            .set_default("browser.enabled", true)?
            .set_default("browser.max_pages", 4)?
            .set_default("browser.checkout_timeout_secs", 30)?
            .set_default("browser.network_idle_settle_ms", 2000)?
            .set_default("browser.nav_wait_ms", 5000)?
            // Fallback service
            .set_default("fallback.enabled", true)?
            .set_default("fallback.base_url", "https://api.firecrawl.dev/v1")?
            .set_default("fallback.wait_for_ms", 3000)?
            // Budgets
            .set_default("budget.max_vision_calls", 0)?
            .set_default("budget.max_fallback_calls", 0)?
            // Pipeline
            .set_default("pipeline.concurrency", 25)?
            .set_default("pipeline.dictionary_path", "config/dictionaries.json")?
            .set_default(
                "pipeline.overlay_patterns_path",
                "config/overlay_patterns.json",
            )?
            // Metrics
            .set_default("metrics.enabled", false)?
            .set_default("metrics.listen_addr", "0.0.0.0:9000")
    }

    fn apply_key_fallbacks(&mut self) {
        if blank(&self.vision.api_key) {
            self.vision.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        if blank(&self.fallback.api_key) {
            self.fallback.api_key = std::env::var("FIRECRAWL_API_KEY")
                .ok()
                .filter(|k| !k.is_empty());
        }
    }

    /// 完整校验：字段范围 + 跨字段约束
    ///
    /// 任一失败都返回 `ConfigInvalid`，调用方应在处理任何域名之前中止
    pub fn validate_all(&self) -> Result<(), ClassifierError> {
        self.validate()
            .map_err(|e| ClassifierError::ConfigInvalid(e.to_string()))?;
        self.validate_semantics()
    }

    /// 跨字段约束校验
    ///
    /// NaN 与任何值比较都不成立，因此每条约束都以“满足才通过”的形式检查
    pub fn validate_semantics(&self) -> Result<(), ClassifierError> {
        let mut problems = Vec::new();
        let t = &self.thresholds;

        for (name, value) in self.float_fields() {
            if !value.is_finite() {
                problems.push(format!("{} must be a finite number (got {})", name, value));
            }
        }

        if !strictly_above(t.pure, t.leaning) {
            problems.push(format!(
                "thresholds.pure ({}) must be greater than thresholds.leaning ({})",
                t.pure, t.leaning
            ));
        }
        if !strictly_above(t.leaning, t.review_floor) {
            problems.push(format!(
                "thresholds.leaning ({}) must be greater than thresholds.review_floor ({})",
                t.leaning, t.review_floor
            ));
        }
        if !at_most(self.vision.uncertain_min, self.vision.uncertain_max) {
            problems.push(format!(
                "vision.uncertain_min ({}) must not exceed vision.uncertain_max ({})",
                self.vision.uncertain_min, self.vision.uncertain_max
            ));
        }
        for (name, weights) in [("normal", self.fusion.normal), ("sparse", self.fusion.sparse)] {
            let sum = weights.text + weights.vision;
            if !at_most((sum - 1.0).abs(), WEIGHT_SUM_TOLERANCE) {
                problems.push(format!(
                    "fusion.{} weights must sum to 1.0 (got {})",
                    name, sum
                ));
            }
        }
        if self.browser.checkout_timeout_secs > self.fetch.stage2_timeout_secs {
            problems.push(format!(
                "browser.checkout_timeout_secs ({}) must not exceed fetch.stage2_timeout_secs ({})",
                self.browser.checkout_timeout_secs, self.fetch.stage2_timeout_secs
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ClassifierError::ConfigInvalid(problems.join("; ")))
        }
    }

    fn float_fields(&self) -> [(&'static str, f64); 11] {
        [
            ("thresholds.pure", self.thresholds.pure),
            ("thresholds.leaning", self.thresholds.leaning),
            ("thresholds.review_floor", self.thresholds.review_floor),
            ("scoring.generalist_penalty_weight", self.scoring.generalist_penalty_weight),
            ("vision.uncertain_min", self.vision.uncertain_min),
            ("vision.uncertain_max", self.vision.uncertain_max),
            ("vision.temperature", self.vision.temperature),
            ("fusion.normal.text", self.fusion.normal.text),
            ("fusion.normal.vision", self.fusion.normal.vision),
            ("fusion.sparse.text", self.fusion.sparse.text),
            ("fusion.sparse.vision", self.fusion.sparse.vision),
        ]
    }

    /// 视觉评分是否可用（启用且配置了密钥）
    pub fn vision_available(&self) -> bool {
        self.vision.enabled && !blank(&self.vision.api_key)
    }

    /// 回退服务是否可用
    pub fn fallback_available(&self) -> bool {
        self.fallback.enabled && !blank(&self.fallback.api_key)
    }
}

impl FetchSettings {
    pub fn stage1_timeout(&self) -> Duration {
        Duration::from_secs(self.stage1_timeout_secs)
    }

    pub fn stage2_timeout(&self) -> Duration {
        Duration::from_secs(self.stage2_timeout_secs)
    }

    pub fn stage3_timeout(&self) -> Duration {
        Duration::from_secs(self.stage3_timeout_secs)
    }
}

fn strictly_above(high: f64, low: f64) -> bool {
    high.partial_cmp(&low) == Some(Ordering::Greater)
}

fn at_most(value: f64, limit: f64) -> bool {
    matches!(value.partial_cmp(&limit), Some(Ordering::Less | Ordering::Equal))
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

fn config_invalid(e: ConfigError) -> ClassifierError {
    ClassifierError::ConfigInvalid(e.to_string())
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
