// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::budget::CallBudget;
use crate::domain::models::feature_bundle::FeatureBundle;
use crate::domain::models::fetch::{AttemptOutcome, FetchedPage, PageContent, Stage, StageAttempt, VisionImage};
use crate::domain::services::feature_extractor::FeatureExtractor;
use crate::engines::overlay_dismisser::{OverlayDismisser, StaticSurface};
use crate::engines::traits::{AttemptFailure, EngineError, FetchStrategy};
use crate::utils::errors::FetchFailure;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// 编排器错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// 运行被取消，域名不输出结果
    #[error("fetch cancelled")]
    Cancelled,
    /// 所有阶段均失败
    #[error("{0}")]
    Failed(FetchFailure),
    /// 某个阶段因资源不足未能执行，且没有阶段成功；域名留到下次运行
    #[error("{0} had no free capacity")]
    Deferred(Stage),
}

/// 特征来源
#[derive(Debug, Clone)]
pub struct FeatureSource {
    pub page: FetchedPage,
    pub bundle: FeatureBundle,
    pub stage: Stage,
    pub attempts: Vec<StageAttempt>,
    /// 内容来自失败阶段保留下来的部分结果
    pub partial: bool,
}

/// 稀疏判定阈值
#[derive(Debug, Clone, Copy)]
pub struct SparseThresholds {
    pub min_nav_items: usize,
    pub min_headings: usize,
}

/// 抓取编排器
///
/// 按固定顺序尝试各阶段策略。升级规则与具体策略无关：
/// 失败（网络错误、超时、非2xx、拦截）即升级；阶段1的结果稀疏时也升级。
pub struct FetchOrchestrator {
    strategies: Vec<Arc<dyn FetchStrategy>>,
    extractor: Arc<FeatureExtractor>,
    dismisser: Arc<OverlayDismisser>,
    fallback_budget: Arc<CallBudget>,
    sparse: SparseThresholds,
}

/// 阶段失败时保留的部分结果
struct Retained {
    stage: Stage,
    page: FetchedPage,
}

impl Retained {
    fn richness(page: &FetchedPage) -> u8 {
        let content = if page.content.is_blank() { 0 } else { 2 };
        content + u8::from(page.screenshot.is_some())
    }
}

impl FetchOrchestrator {
    pub fn new(
        strategies: Vec<Arc<dyn FetchStrategy>>,
        extractor: Arc<FeatureExtractor>,
        dismisser: Arc<OverlayDismisser>,
        fallback_budget: Arc<CallBudget>,
        sparse: SparseThresholds,
    ) -> Self {
        Self {
            strategies,
            extractor,
            dismisser,
            fallback_budget,
            sparse,
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.strategies.iter().map(|s| s.stage()).collect()
    }

    /// 抓取域名并提取特征
    pub async fn fetch(&self, domain: &str, cancel: &CancellationToken) -> Result<FeatureSource, FetchError> {
        let mut attempts = Vec::new();
        let mut retained: Option<Retained> = None;
        let mut last_failure: Option<FetchFailure> = None;
        let mut deferred: Option<Stage> = None;

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let stage = strategy.stage();
            if strategy.is_metered() && !self.fallback_budget.try_acquire() {
                warn!("Fallback budget exhausted, skipping {} for {}", stage, domain);
                continue;
            }

            let policy = strategy.retry_policy();
            let mut attempt_number = 1;
            loop {
                if attempt_number > 1 {
                    let delay = policy.calculate_backoff(attempt_number - 1);
                    debug!("Retrying {} for {} in {:?}", stage, domain, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return Err(FetchError::Cancelled);
                }

                let started = Instant::now();
                let limit = strategy.checkout_timeout() + strategy.timeout();
                let result = tokio::time::timeout(limit, strategy.attempt(domain, attempt_number))
                    .await
                    .unwrap_or_else(|_| Err(AttemptFailure::from(EngineError::Timeout)));

                match result {
                    Ok(page) => {
                        attempts.push(record(stage, attempt_number, AttemptOutcome::Success, started, Some(&page), None));
                        metrics::counter!("classifier_stage_attempts_total", "stage" => stage.as_str(), "outcome" => "success")
                            .increment(1);

                        let bundle = self.extract(stage, &page).await;
                        let sparse = bundle.is_sparse(self.sparse.min_nav_items, self.sparse.min_headings);
                        if stage == Stage::Direct && sparse {
                            debug!(
                                "{} content for {} is sparse (nav={}, headings={}), escalating",
                                stage,
                                domain,
                                bundle.nav_count(),
                                bundle.heading_count()
                            );
                            retain(&mut retained, stage, page);
                            break;
                        }

                        info!("Fetched {} via {} ({})", domain, stage, strategy.name());
                        return Ok(FeatureSource {
                            page,
                            bundle,
                            stage,
                            attempts,
                            partial: false,
                        });
                    }
                    Err(failure) => {
                        let outcome = failure.error.outcome();
                        attempts.push(record(
                            stage,
                            attempt_number,
                            outcome,
                            started,
                            failure.partial.as_ref(),
                            Some(failure.error.to_string()),
                        ));
                        metrics::counter!("classifier_stage_attempts_total", "stage" => stage.as_str(), "outcome" => outcome.as_str())
                            .increment(1);
                        debug!(
                            "{} attempt {} for {} failed: {}",
                            stage, attempt_number, domain, failure.error
                        );

                        // 站点未被访问，不计为站点失败，也不重试本阶段
                        if outcome == AttemptOutcome::Unavailable {
                            warn!("{} skipped for {}: {}", stage, domain, failure.error);
                            deferred.get_or_insert(stage);
                            break;
                        }

                        last_failure = Some(FetchFailure::new(
                            failure.error.reason(),
                            Some(stage.as_str()),
                            failure.error.to_string(),
                        ));
                        if let Some(partial) = failure.partial {
                            retain(&mut retained, stage, partial);
                        }

                        // 拦截时不再重试本阶段
                        if outcome == AttemptOutcome::Blocked || !policy.should_retry(attempt_number) {
                            break;
                        }
                        attempt_number += 1;
                    }
                }
            }
        }

        if let Some(stage) = deferred {
            debug!("No full result for {} and {} never ran, deferring to the next run", domain, stage);
            return Err(FetchError::Deferred(stage));
        }

        if let Some(Retained { stage, page }) = retained {
            info!("All stages failed for {}, using retained {} result", domain, stage);
            let bundle = self.extract(stage, &page).await;
            return Ok(FeatureSource {
                page,
                bundle,
                stage,
                attempts,
                partial: true,
            });
        }

        Err(FetchError::Failed(
            last_failure.unwrap_or_else(|| FetchFailure::exhausted("no fetch stage could run")),
        ))
    }

    /// 向支持截图的策略请求首页视口截图
    pub async fn capture_screenshot(&self, domain: &str) -> Option<VisionImage> {
        for strategy in &self.strategies {
            let limit = strategy.checkout_timeout() + strategy.timeout();
            let capture = tokio::time::timeout(limit, strategy.capture_screenshot(domain));
            if let Ok(Some(image)) = capture.await {
                return Some(image);
            }
        }
        None
    }

    async fn extract(&self, stage: Stage, page: &FetchedPage) -> FeatureBundle {
        let base_url = Url::parse(&page.final_url).ok();

        // 阶段3只有静态快照，无法交互，把横幅容器排除在提取之外
        let excluded = match (&page.content, stage) {
            (PageContent::Html(html), Stage::Fallback) => {
                let surface = StaticSurface::from_html(html, self.dismisser.patterns());
                self.dismisser.dismiss(&surface).await.excluded_selectors
            }
            _ => Vec::new(),
        };

        self.extractor.extract(&page.content, base_url.as_ref(), &excluded)
    }
}

fn retain(retained: &mut Option<Retained>, stage: Stage, mut page: FetchedPage) {
    match retained {
        Some(current) => {
            if Retained::richness(&page) > Retained::richness(&current.page) {
                if page.screenshot.is_none() {
                    page.screenshot = current.page.screenshot.take();
                }
                *current = Retained { stage, page };
            } else if current.page.screenshot.is_none() {
                current.page.screenshot = page.screenshot;
            }
        }
        None => *retained = Some(Retained { stage, page }),
    }
}

fn record(
    stage: Stage,
    attempt_number: u32,
    outcome: AttemptOutcome,
    started: Instant,
    page: Option<&FetchedPage>,
    detail: Option<String>,
) -> StageAttempt {
    StageAttempt {
        stage,
        attempt_number,
        outcome,
        elapsed: started.elapsed(),
        final_url: page.map(|p| p.final_url.clone()),
        http_status: page.and_then(|p| p.http_status),
        detail,
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
