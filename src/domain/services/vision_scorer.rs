// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::budget::CallBudget;
use crate::config::settings::VisionSettings;
use crate::domain::models::fetch::VisionImage;
use crate::domain::models::score::clamp_unit;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// 视觉模型调用错误
#[derive(Error, Debug)]
pub enum VisionError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 配额或速率限制
    #[error("Quota or rate limit exceeded: {0}")]
    QuotaExceeded(String),
    /// 非成功状态码
    #[error("Vision API returned {status}: {body}")]
    Http { status: u16, body: String },
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 无法解析的回复
    #[error("Malformed reply: {0}")]
    Malformed(String),
}

/// 视觉提示词
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionPrompt {
    /// 商品图片
    ProductImages,
    /// 首页截图
    HomepageScreenshot,
}

impl VisionPrompt {
    pub fn text(&self) -> &'static str {
        match self {
            VisionPrompt::ProductImages => PRODUCT_IMAGES_PROMPT,
            VisionPrompt::HomepageScreenshot => HOMEPAGE_SCREENSHOT_PROMPT,
        }
    }

    /// 写入 reasons 的标签
    pub fn reason_tag(&self) -> &'static str {
        match self {
            VisionPrompt::ProductImages => "vision_images",
            VisionPrompt::HomepageScreenshot => "vision_screenshot",
        }
    }
}

/// 视觉模型的判定
#[derive(Debug, Clone, PartialEq)]
pub struct VisionVerdict {
    /// [0, 1]
    pub score: f64,
    pub reasoning: Option<String>,
}

/// 视觉分类能力
///
/// 给定一组图片与提示词，返回贴身衣物概率
#[async_trait]
pub trait VisionClassifier: Send + Sync {
    async fn classify(
        &self,
        images: &[VisionImage],
        prompt: VisionPrompt,
    ) -> Result<VisionVerdict, VisionError>;
}

/// 候选图片的下载与预处理
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// 返回成功加载的图片（保持输入顺序），失败的条目直接跳过
    async fn load(&self, urls: &[String]) -> Vec<VisionImage>;
}

/// 视觉评分结果
#[derive(Debug, Clone, PartialEq)]
pub struct VisionScore {
    pub score: f64,
    pub prompt: VisionPrompt,
    pub reasoning: Option<String>,
}

impl VisionScore {
    /// 例如 `vision_images:0.72`
    pub fn reason(&self) -> String {
        format!("{}:{:.2}", self.prompt.reason_tag(), self.score)
    }
}

/// 视觉评分器（阶段B）
///
/// 仅当文本分数落在不确定区间（含端点）或提取稀疏时触发。
/// 每次调用都会占用视觉预算，并经过速率限制器排队；
/// 任何失败都降级为 `None`，由融合阶段退回纯文本。
pub struct VisionScorer {
    classifier: Option<Arc<dyn VisionClassifier>>,
    image_loader: Option<Arc<dyn ImageLoader>>,
    budget: Arc<CallBudget>,
    limiter: DefaultDirectRateLimiter,
    uncertain_min: f64,
    uncertain_max: f64,
    max_images: usize,
}

impl VisionScorer {
    /// 创建视觉评分器，`classifier` 为 `None` 表示视觉未配置
    pub fn new(
        classifier: Option<Arc<dyn VisionClassifier>>,
        settings: &VisionSettings,
        budget: Arc<CallBudget>,
    ) -> Self {
        let per_minute = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            classifier,
            image_loader: None,
            budget,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            uncertain_min: settings.uncertain_min,
            uncertain_max: settings.uncertain_max,
            max_images: settings.max_images,
        }
    }

    /// 发送前先下载并缩放候选图片；未设置时直接发送图片地址
    pub fn with_image_loader(mut self, loader: Arc<dyn ImageLoader>) -> Self {
        self.image_loader = Some(loader);
        self
    }

    pub fn is_available(&self) -> bool {
        self.classifier.is_some()
    }

    /// 是否需要视觉评分
    pub fn should_run(&self, text_score: f64, sparse: bool) -> bool {
        self.is_available()
            && (sparse || (self.uncertain_min..=self.uncertain_max).contains(&text_score))
    }

    /// 执行视觉评分
    ///
    /// 有可用的候选图片时发送图片（至多 `max_images` 张），否则发送截图；
    /// 两者都没有时返回 `None`
    pub async fn score(
        &self,
        domain: &str,
        image_urls: &[String],
        screenshot: Option<&VisionImage>,
    ) -> Option<VisionScore> {
        let classifier = self.classifier.as_ref()?;

        let candidates = &image_urls[..image_urls.len().min(self.max_images)];
        let images = match (&self.image_loader, candidates.is_empty()) {
            (_, true) => Vec::new(),
            (Some(loader), false) => {
                let loaded = loader.load(candidates).await;
                if loaded.len() < candidates.len() {
                    debug!(
                        "Loaded {} of {} candidate images for {}",
                        loaded.len(),
                        candidates.len(),
                        domain
                    );
                }
                loaded
            }
            (None, false) => candidates.iter().map(|u| VisionImage::Url(u.clone())).collect(),
        };

        let (images, prompt) = if !images.is_empty() {
            (images, VisionPrompt::ProductImages)
        } else if let Some(shot) = screenshot {
            (vec![shot.clone()], VisionPrompt::HomepageScreenshot)
        } else {
            debug!("No usable images or screenshot for vision scoring of {}", domain);
            return None;
        };

        if !self.budget.try_acquire() {
            warn!("Vision budget exhausted, falling back to text-only for {}", domain);
            metrics::counter!("classifier_vision_calls_total", "outcome" => "budget_exhausted")
                .increment(1);
            return None;
        }

        self.limiter.until_ready().await;

        match classifier.classify(&images, prompt).await {
            Ok(verdict) => {
                metrics::counter!("classifier_vision_calls_total", "outcome" => "success")
                    .increment(1);
                debug!(
                    "Vision verdict for {}: {:.2} ({:?}) {}",
                    domain,
                    verdict.score,
                    prompt,
                    verdict.reasoning.as_deref().unwrap_or("")
                );
                Some(VisionScore {
                    score: clamp_unit(verdict.score),
                    prompt,
                    reasoning: verdict.reasoning,
                })
            }
            Err(e) => {
                let outcome = match e {
                    VisionError::QuotaExceeded(_) => "quota",
                    VisionError::Timeout => "timeout",
                    _ => "error",
                };
                metrics::counter!("classifier_vision_calls_total", "outcome" => outcome)
                    .increment(1);
                warn!("Vision unavailable for {}: {}", domain, e);
                None
            }
        }
    }
}

/// 解析模型回复中的第一个JSON对象
///
/// 支持 `{"bodywear_score": x}` 以及旧格式
/// `{"is_bodywear": bool, "confidence": x}` / `{"is_bodywear_specialist": bool, "confidence": x}`
pub fn parse_vision_reply(content: &str) -> Result<VisionVerdict, VisionError> {
    let start = content
        .find('{')
        .ok_or_else(|| VisionError::Malformed("no JSON object in reply".to_string()))?;
    let end = content
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| VisionError::Malformed("unterminated JSON object".to_string()))?;

    let data: Value = serde_json::from_str(&content[start..=end])
        .map_err(|e| VisionError::Malformed(e.to_string()))?;

    let reasoning = data
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(score) = data.get("bodywear_score").and_then(Value::as_f64) {
        return Ok(VisionVerdict {
            score: clamp_unit(score),
            reasoning,
        });
    }

    let legacy = data
        .get("is_bodywear")
        .or_else(|| data.get("is_bodywear_specialist"))
        .and_then(Value::as_bool);
    if let Some(is_bodywear) = legacy {
        let confidence = clamp_unit(data.get("confidence").and_then(Value::as_f64).unwrap_or(0.8));
        let score = if is_bodywear { confidence } else { 1.0 - confidence };
        return Ok(VisionVerdict { score, reasoning });
    }

    Err(VisionError::Malformed(
        "reply has neither bodywear_score nor is_bodywear".to_string(),
    ))
}

const PRODUCT_IMAGES_PROMPT: &str = r#"Analyze these product images from one online store and determine whether they show BODYWEAR/INTIMATE APPAREL.

BODYWEAR INCLUDES:
- Lingerie: bras, panties, underwear, corsets, babydolls, chemises, teddies
- Sleepwear: pajamas, pyjamas, nightgowns, robes, sleep sets
- Swimwear: bikinis, one-pieces, swim trunks, boardshorts
- Shapewear: control garments, body shapers
- Hosiery: stockings, tights, socks
- Loungewear: comfortable home wear
- Basic underwear: boxers, briefs, trunks, boyshorts, thongs

NOT BODYWEAR:
- Regular clothing: dresses, shirts, pants, skirts, outerwear
- Accessories: bags, shoes, jewelry
- Non-intimate apparel

Respond with JSON where bodywear_score is the probability the images show bodywear (0.0=definitely not bodywear, 1.0=definitely bodywear):
{"bodywear_score": 0.0-1.0, "reasoning": "brief explanation"}"#;

const HOMEPAGE_SCREENSHOT_PROMPT: &str = r#"Analyze this e-commerce homepage screenshot to determine the retailer type.

BODYWEAR SPECIALIST (score 0.7-1.0):
- Navigation shows primarily bodywear categories: Lingerie, Bras, Underwear, Sleepwear, Swimwear, Shapewear
- Hero images feature models in lingerie, bras, underwear or swimwear
- Brand positioning focuses on intimate apparel, bodywear or sleepwear

BODYWEAR LEANING (score 0.45-0.7):
- Significant bodywear presence (30-60% of navigation)
- Mix of bodywear (sleepwear, swimwear, loungewear) and other apparel

GENERALIST (score 0.0-0.45):
- Broad fashion categories: Outerwear, Denim, Shoes, Accessories, Kids, Home
- Bodywear is minor or absent in navigation

Look at the navigation menu first, then hero images, visible products and brand messaging.

Respond with JSON where bodywear_score is the probability this is a bodywear specialist (0.0=definitely generalist, 1.0=definitely bodywear specialist):
{"bodywear_score": 0.0-1.0, "reasoning": "brief explanation"}"#;

#[cfg(test)]
#[path = "vision_scorer_test.rs"]
mod tests;
