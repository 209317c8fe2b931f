// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::classification::{ClassificationResult, StageUsed};
use crate::domain::models::domain_task::DomainTask;
use crate::domain::services::fusion::ScoreFusion;
use crate::domain::services::text_scorer::TextScorer;
use crate::domain::services::vision_scorer::VisionScorer;
use crate::engines::orchestrator::{FeatureSource, FetchError, FetchOrchestrator, SparseThresholds};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// 域名处理被取消或延后，不产生输出行，下次运行会重新处理
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("classification of {0} interrupted")]
pub struct Interrupted(pub String);

// === Section: Use Case Definition ===

/// 单个域名的分类流水线
///
/// 抓取 → 文本评分 → （按需）视觉评分 → 融合与标签
pub struct ClassifyDomainUseCase {
    orchestrator: Arc<FetchOrchestrator>,
    text_scorer: TextScorer,
    vision_scorer: VisionScorer,
    fusion: ScoreFusion,
    sparse: SparseThresholds,
}

// === Section: Implementation ===

impl ClassifyDomainUseCase {
    pub fn new(
        orchestrator: Arc<FetchOrchestrator>,
        text_scorer: TextScorer,
        vision_scorer: VisionScorer,
        fusion: ScoreFusion,
        sparse: SparseThresholds,
    ) -> Self {
        Self {
            orchestrator,
            text_scorer,
            vision_scorer,
            fusion,
            sparse,
        }
    }

    #[instrument(skip(self, cancel), fields(domain = %task))]
    pub async fn execute(
        &self,
        task: &DomainTask,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, Interrupted> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let domain = task.domain();

        let result = match self.orchestrator.fetch(domain, cancel).await {
            Ok(source) => self.score(domain, source, started_at, cancel).await?,
            Err(FetchError::Cancelled) => return Err(Interrupted(domain.to_string())),
            Err(FetchError::Deferred(stage)) => {
                warn!("{} deferred, {} had no free capacity", domain, stage);
                return Err(Interrupted(domain.to_string()));
            }
            Err(FetchError::Failed(failure)) => {
                warn!("All fetch stages failed for {}: {}", domain, failure);
                ClassificationResult::failed(domain, &failure, started_at)
            }
        };

        metrics::counter!("classifier_domains_total", "label" => result.label.as_str()).increment(1);
        metrics::histogram!("classifier_domain_duration_seconds").record(timer.elapsed().as_secs_f64());

        info!(
            label = %result.label,
            confidence = ?result.confidence,
            stage = %result.stage_used.map(|s| s.to_string()).unwrap_or_default(),
            "Classified {}",
            domain
        );
        Ok(result)
    }

    async fn score(
        &self,
        domain: &str,
        source: FeatureSource,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, Interrupted> {
        let bundle = &source.bundle;
        let sparse = bundle.is_sparse(self.sparse.min_nav_items, self.sparse.min_headings);
        let text = self.text_scorer.score(bundle);

        let mut vision = None;
        if self.vision_scorer.should_run(text.value(), sparse) {
            if cancel.is_cancelled() {
                return Err(Interrupted(domain.to_string()));
            }

            let mut screenshot = source.page.screenshot.clone();
            if bundle.image_urls().is_empty() && screenshot.is_none() {
                screenshot = self.orchestrator.capture_screenshot(domain).await;
            }
            vision = self
                .vision_scorer
                .score(domain, bundle.image_urls(), screenshot.as_ref())
                .await;
        }

        let fused = self
            .fusion
            .fuse(text.value(), text.score.reasons(), vision.as_ref(), sparse);

        Ok(ClassificationResult {
            domain: domain.to_string(),
            label: fused.label,
            confidence: Some(fused.confidence),
            text_score: Some(text.value()),
            vision_score: vision.as_ref().map(|v| v.score),
            stage_used: Some(StageUsed::new(source.stage, vision.is_some())),
            reasons: fused.reasons,
            image_count: bundle.image_count(),
            error: None,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
