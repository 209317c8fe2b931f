// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::*;
use bodywear_classifier::domain::models::classification::Label;
use bodywear_classifier::domain::models::domain_task::DomainTask;
use bodywear_classifier::domain::models::fetch::Stage;
use bodywear_classifier::domain::services::vision_scorer::VisionPrompt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn task(domain: &str) -> DomainTask {
    DomainTask::parse(domain).unwrap()
}

#[tokio::test]
async fn test_rich_direct_fetch_is_pure_bodywear_without_vision() {
    let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML)));
    let browser = Arc::new(RoutedStrategy::new(Stage::Browser, Behavior::Page(BODYWEAR_HTML)));
    let vision = Arc::new(FakeVision::scoring(0.1));
    let use_case = PipelineBuilder::new()
        .stage(direct.clone())
        .stage(browser.clone())
        .vision(vision.clone())
        .build();

    let result = use_case
        .execute(&task("lingerie.example"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.label, Label::PureBodywear);
    assert!((result.confidence.unwrap() - 0.9).abs() < 1e-9);
    assert_eq!(result.text_score, result.confidence);
    assert_eq!(result.vision_score, None);
    assert_eq!(result.to_record().stage_used, "stage1");
    assert!(result.reasons.iter().any(|r| r.starts_with("bodywear:")));
    assert!(result.error.is_none());
    assert!(browser.calls().is_empty());
    assert!(vision.calls().is_empty());
}

#[tokio::test]
async fn test_timeouts_escalate_to_fallback_and_uncertain_text_uses_vision() {
    let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Hang));
    let browser = Arc::new(RoutedStrategy::new(Stage::Browser, Behavior::Hang));
    let fallback = Arc::new(
        RoutedStrategy::new(Stage::Fallback, Behavior::PageWithScreenshot(MIXED_HTML)).metered(),
    );
    let vision = Arc::new(FakeVision::scoring(0.9));
    let use_case = PipelineBuilder::new()
        .stage(direct.clone())
        .stage(browser.clone())
        .stage(fallback.clone())
        .vision(vision.clone())
        .build();

    let result = use_case
        .execute(&task("mixed.example"), &CancellationToken::new())
        .await
        .unwrap();

    let text = result.text_score.unwrap();
    assert!((text - 4.0 / 7.0).abs() < 1e-9, "text score {}", text);
    assert_eq!(result.vision_score, Some(0.9));
    // 0.5 × 0.571 + 0.5 × 0.9
    assert!((result.confidence.unwrap() - (0.5 * text + 0.45)).abs() < 1e-9);
    assert_eq!(result.label, Label::PureBodywear);
    assert_eq!(result.to_record().stage_used, "stage3+vision");
    assert!(result.reasons.contains(&"vision_screenshot:0.90".to_string()));
    assert_eq!(vision.calls(), vec![(1, VisionPrompt::HomepageScreenshot)]);
    assert_eq!(direct.calls().len(), 1);
    assert_eq!(browser.calls().len(), 1);
}

#[tokio::test]
async fn test_all_stages_failing_yields_error_row() {
    let use_case = PipelineBuilder::new()
        .stage(Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::ServerError)))
        .stage(Arc::new(RoutedStrategy::new(Stage::Browser, Behavior::Blocked)))
        .stage(Arc::new(RoutedStrategy::new(Stage::Fallback, Behavior::ServerError).metered()))
        .build();

    let result = use_case
        .execute(&task("down.example"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.label, Label::Error);
    assert_eq!(result.confidence, None);
    assert_eq!(result.text_score, None);
    assert_eq!(result.stage_used, None);
    let error = result.error.clone().unwrap();
    assert!(error.starts_with("network_error"), "{}", error);
    assert!(error.ends_with("(stage3)"), "{}", error);

    let record = result.to_record();
    assert_eq!(record.label, "Error");
    assert_eq!(record.confidence, None);
    assert_eq!(record.stage_used, "");
}

#[tokio::test]
async fn test_exhausted_fallback_budget_skips_metered_stage() {
    let fallback = Arc::new(
        RoutedStrategy::new(Stage::Fallback, Behavior::Page(BODYWEAR_HTML)).metered(),
    );
    let use_case = PipelineBuilder::new()
        .stage(Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::ServerError)))
        .stage(fallback.clone())
        .max_fallback_calls(1)
        .build();
    let cancel = CancellationToken::new();

    let first = use_case.execute(&task("a.example"), &cancel).await.unwrap();
    let second = use_case.execute(&task("b.example"), &cancel).await.unwrap();

    assert_eq!(first.label, Label::PureBodywear);
    assert_eq!(second.label, Label::Error);
    assert!(second.error.unwrap().starts_with("network_error"));
    assert_eq!(fallback.calls(), vec!["a.example".to_string()]);
}

#[tokio::test]
async fn test_vision_quota_error_degrades_to_text_only() {
    let vision = Arc::new(FakeVision::quota_exceeded());
    let use_case = PipelineBuilder::new()
        .stage(Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::PageWithScreenshot(MIXED_HTML))))
        .vision(vision.clone())
        .build();

    let result = use_case
        .execute(&task("mixed.example"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(vision.calls().len(), 1);
    assert_eq!(result.vision_score, None);
    assert_eq!(result.confidence, result.text_score);
    assert_eq!(result.label, Label::BodywearLeaning);
    assert_eq!(result.to_record().stage_used, "stage1");
}

#[tokio::test]
async fn test_vision_budget_limits_calls_per_run() {
    let vision = Arc::new(FakeVision::scoring(0.8));
    let use_case = PipelineBuilder::new()
        .stage(Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::PageWithScreenshot(MIXED_HTML))))
        .vision(vision.clone())
        .max_vision_calls(1)
        .build();
    let cancel = CancellationToken::new();

    let first = use_case.execute(&task("a.example"), &cancel).await.unwrap();
    let second = use_case.execute(&task("b.example"), &cancel).await.unwrap();

    assert_eq!(vision.calls().len(), 1);
    assert_eq!(first.vision_score, Some(0.8));
    assert_eq!(second.vision_score, None);
    assert_eq!(second.to_record().stage_used, "stage1");
}

#[tokio::test]
async fn test_generalist_site_is_labelled_generalist() {
    let use_case = PipelineBuilder::new()
        .stage(Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Page(GENERALIST_HTML))))
        .vision(Arc::new(FakeVision::scoring(0.9)))
        .build();

    let result = use_case
        .execute(&task("store.example"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.label, Label::Generalist);
    assert_eq!(result.confidence, Some(0.0));
    assert_eq!(result.vision_score, None);
}

#[tokio::test]
async fn test_cancelled_before_fetch_is_interrupted() {
    let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::Page(BODYWEAR_HTML)));
    let use_case = PipelineBuilder::new().stage(direct.clone()).build();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = use_case.execute(&task("a.example"), &cancel).await;

    assert!(outcome.is_err());
    assert!(direct.calls().is_empty());
}

#[tokio::test]
async fn test_domain_without_browser_capacity_is_left_for_next_run() {
    let direct = Arc::new(RoutedStrategy::new(Stage::Direct, Behavior::ServerError));
    let browser = Arc::new(RoutedStrategy::new(Stage::Browser, Behavior::NoCapacity));
    let use_case = PipelineBuilder::new().stage(direct).stage(browser.clone()).build();

    let result = use_case
        .execute(&task("queued.example"), &CancellationToken::new())
        .await;

    assert!(result.is_err());
    assert_eq!(browser.calls(), vec!["queued.example".to_string()]);
}
