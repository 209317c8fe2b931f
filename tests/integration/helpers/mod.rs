// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use bodywear_classifier::application::budget::{BudgetKind, CallBudget};
use bodywear_classifier::application::usecases::classify_domain::ClassifyDomainUseCase;
use bodywear_classifier::config::settings::Settings;
use bodywear_classifier::domain::models::dictionary::Dictionary;
use bodywear_classifier::domain::models::fetch::{FetchedPage, Stage, VisionImage};
use bodywear_classifier::domain::services::feature_extractor::FeatureExtractor;
use bodywear_classifier::domain::services::fusion::ScoreFusion;
use bodywear_classifier::domain::services::text_scorer::TextScorer;
use bodywear_classifier::domain::services::vision_scorer::{
    VisionClassifier, VisionError, VisionPrompt, VisionScorer, VisionVerdict,
};
use bodywear_classifier::engines::orchestrator::{FetchOrchestrator, SparseThresholds};
use bodywear_classifier::engines::overlay_dismisser::OverlayDismisser;
use bodywear_classifier::engines::traits::{AttemptFailure, EngineError, FetchStrategy};
use bodywear_classifier::utils::retry_policy::RetryPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DICTIONARY: &str = r#"{
    "en": {
        "bodywear": ["lingerie", "bras", "panties", "sleepwear", "swimwear", "shapewear"],
        "generalist": ["shoes", "jackets", "furniture", "electronics"]
    },
    "fr": {
        "bodywear": ["soutien-gorge", "culottes"],
        "generalist": ["chaussures"]
    }
}"#;

/// 6个导航项、3个标题，全部为贴身衣物词：9 / 10 = 0.90
pub const BODYWEAR_HTML: &str = r#"<html><body>
    <nav>
      <a href="/lingerie">Lingerie</a><a href="/bras">Bras</a><a href="/panties">Panties</a>
      <a href="/sleepwear">Sleepwear</a><a href="/swimwear">Swimwear</a><a href="/shapewear">Shapewear</a>
    </nav>
    <h1>Lingerie</h1><h2>Bras</h2><h3>Sleepwear</h3>
</body></html>"#;

/// 贴身衣物5、泛品类1：5/7 − 1/7 ≈ 0.571，落在不确定区间
pub const MIXED_HTML: &str = r#"<html><body>
    <nav>
      <a href="/lingerie">Lingerie</a><a href="/bras">Bras</a><a href="/panties">Panties</a>
      <a href="/sleepwear">Sleepwear</a><a href="/swimwear">Swimwear</a><a href="/shoes">Shoes</a>
    </nav>
    <h1>Summer sale</h1><h2>New in</h2><h3>Stories</h3>
</body></html>"#;

/// 泛品类为主：分数被截断为 0
pub const GENERALIST_HTML: &str = r#"<html><body>
    <nav>
      <a href="/shoes">Shoes</a><a href="/jackets">Jackets</a><a href="/furniture">Furniture</a>
      <a href="/electronics">Electronics</a><a href="/chaussures">Chaussures</a><a href="/bras">Bras</a>
    </nav>
    <h1>Shoes</h1><h2>Jackets</h2><h3>Furniture</h3>
</body></html>"#;

pub const SCREENSHOT_URL: &str = "https://screenshots.example/home.jpg";

/// 单个域名在某阶段的表现
#[derive(Clone)]
pub enum Behavior {
    Page(&'static str),
    PageWithScreenshot(&'static str),
    Blocked,
    ServerError,
    /// 挂起直到超时
    Hang,
    /// 没有空闲的执行资源
    NoCapacity,
    /// 取消整个运行后失败
    CancelRun(CancellationToken),
}

/// 按域名路由结果的抓取策略
pub struct RoutedStrategy {
    stage: Stage,
    routes: HashMap<String, Behavior>,
    fallback: Behavior,
    metered: bool,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl RoutedStrategy {
    pub fn new(stage: Stage, fallback: Behavior) -> Self {
        Self {
            stage,
            routes: HashMap::new(),
            fallback,
            metered: false,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn route(mut self, domain: &str, behavior: Behavior) -> Self {
        self.routes.insert(domain.to_string(), behavior);
        self
    }

    pub fn metered(mut self) -> Self {
        self.metered = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchStrategy for RoutedStrategy {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn name(&self) -> &'static str {
        "routed"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(300)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn is_metered(&self) -> bool {
        self.metered
    }

    async fn attempt(&self, domain: &str, _attempt: u32) -> Result<FetchedPage, AttemptFailure> {
        self.calls.lock().push(domain.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let url = format!("https://{}/", domain);
        let behavior = self.routes.get(domain).unwrap_or(&self.fallback).clone();
        match behavior {
            Behavior::Page(html) => Ok(FetchedPage::html(html, url).with_status(200)),
            Behavior::PageWithScreenshot(html) => Ok(FetchedPage::html(html, url)
                .with_status(200)
                .with_screenshot(VisionImage::Url(SCREENSHOT_URL.to_string()))),
            Behavior::Blocked => Err(EngineError::Blocked("challenge page".to_string()).into()),
            Behavior::ServerError => Err(EngineError::Http { status: 500 }.into()),
            Behavior::NoCapacity => Err(EngineError::Unavailable("no browser page free".to_string()).into()),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err(EngineError::Other("hang finished".to_string()).into())
            }
            Behavior::CancelRun(token) => {
                token.cancel();
                Err(EngineError::Http { status: 503 }.into())
            }
        }
    }
}

/// 返回固定分数的视觉分类器
pub struct FakeVision {
    score: Option<f64>,
    calls: Mutex<Vec<(usize, VisionPrompt)>>,
}

impl FakeVision {
    pub fn scoring(score: f64) -> Self {
        Self {
            score: Some(score),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用都返回配额错误
    pub fn quota_exceeded() -> Self {
        Self {
            score: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(usize, VisionPrompt)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl VisionClassifier for FakeVision {
    async fn classify(
        &self,
        images: &[VisionImage],
        prompt: VisionPrompt,
    ) -> Result<VisionVerdict, VisionError> {
        self.calls.lock().push((images.len(), prompt));
        match self.score {
            Some(score) => Ok(VisionVerdict {
                score,
                reasoning: Some("fake".to_string()),
            }),
            None => Err(VisionError::QuotaExceeded("insufficient_quota".to_string())),
        }
    }
}

/// 组装分类用例
pub struct PipelineBuilder {
    strategies: Vec<Arc<dyn FetchStrategy>>,
    vision: Option<Arc<FakeVision>>,
    max_vision_calls: u64,
    max_fallback_calls: u64,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            vision: None,
            max_vision_calls: 0,
            max_fallback_calls: 0,
        }
    }

    pub fn stage(mut self, strategy: Arc<RoutedStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn vision(mut self, vision: Arc<FakeVision>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn max_vision_calls(mut self, limit: u64) -> Self {
        self.max_vision_calls = limit;
        self
    }

    pub fn max_fallback_calls(mut self, limit: u64) -> Self {
        self.max_fallback_calls = limit;
        self
    }

    pub fn build(self) -> Arc<ClassifyDomainUseCase> {
        let settings = Settings::defaults().unwrap();
        let dictionary = Arc::new(Dictionary::from_json_str(DICTIONARY).unwrap());
        let sparse = SparseThresholds {
            min_nav_items: settings.extraction.min_nav_items,
            min_headings: settings.extraction.min_headings,
        };

        let orchestrator = Arc::new(FetchOrchestrator::new(
            self.strategies,
            Arc::new(FeatureExtractor::new(settings.extraction.max_images).unwrap()),
            Arc::new(OverlayDismisser::new(Vec::new(), false)),
            Arc::new(CallBudget::new(BudgetKind::Fallback, self.max_fallback_calls)),
            sparse,
        ));

        let vision = self.vision.map(|v| v as Arc<dyn VisionClassifier>);
        Arc::new(ClassifyDomainUseCase::new(
            orchestrator,
            TextScorer::new(dictionary, settings.scoring.generalist_penalty_weight),
            VisionScorer::new(
                vision,
                &settings.vision,
                Arc::new(CallBudget::new(BudgetKind::Vision, self.max_vision_calls)),
            ),
            ScoreFusion::new(settings.thresholds, settings.fusion),
            sparse,
        ))
    }
}

/// 读取输出CSV的所有行
pub fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

pub fn read_headers(path: &Path) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.headers().unwrap().iter().map(str::to_string).collect()
}
