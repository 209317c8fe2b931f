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

use anyhow::Context;
use bodywear_classifier::application::budget::{BudgetKind, CallBudget};
use bodywear_classifier::application::input_loader::load_tasks;
use bodywear_classifier::application::usecases::classify_domain::ClassifyDomainUseCase;
use bodywear_classifier::config::settings::Settings;
use bodywear_classifier::domain::models::dictionary::Dictionary;
use bodywear_classifier::domain::repositories::result_sink::ResultSink;
use bodywear_classifier::domain::services::feature_extractor::FeatureExtractor;
use bodywear_classifier::domain::services::fusion::ScoreFusion;
use bodywear_classifier::domain::services::text_scorer::TextScorer;
use bodywear_classifier::domain::services::vision_scorer::{VisionClassifier, VisionScorer};
use bodywear_classifier::engines::browser_pool::BrowserPool;
use bodywear_classifier::engines::fire_engine::FireEngine;
use bodywear_classifier::engines::orchestrator::{FetchOrchestrator, SparseThresholds};
use bodywear_classifier::engines::overlay_dismisser::OverlayDismisser;
use bodywear_classifier::engines::playwright_engine::PlaywrightEngine;
use bodywear_classifier::engines::reqwest_engine::ReqwestEngine;
use bodywear_classifier::engines::traits::FetchStrategy;
use bodywear_classifier::infrastructure::metrics::init_metrics;
use bodywear_classifier::infrastructure::repositories::csv_result_sink::CsvResultSink;
use bodywear_classifier::infrastructure::vision::image_loader::HttpImageLoader;
use bodywear_classifier::infrastructure::vision::openai_client::OpenAiVisionClient;
use bodywear_classifier::utils::telemetry;
use bodywear_classifier::workers::manager::WorkerPool;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// 贴身衣物零售商分类器
#[derive(Parser, Debug)]
#[command(name = "bodywear-classifier", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 分类输入列表中的域名，结果追加到输出CSV
    Run {
        /// 域名列表（每行一个，或带 domain 列的CSV）
        #[arg(short, long)]
        input: PathBuf,
        /// 输出CSV，已存在时跳过其中已完成的域名
        #[arg(short, long)]
        output: PathBuf,
        /// 额外的配置文件
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// 覆盖 pipeline.concurrency
        #[arg(long)]
        concurrency: Option<usize>,
        /// 不显示进度条
        #[arg(long)]
        no_progress: bool,
    },
    /// 只加载并校验配置、词典与弹窗模式
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动分类运行
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig { config } => check_config(config.as_deref()),
        Command::Run {
            input,
            output,
            config,
            concurrency,
            no_progress,
        } => run(&input, &output, config.as_deref(), concurrency, !no_progress).await,
    }
}

fn check_config(config: Option<&Path>) -> anyhow::Result<()> {
    let settings = Settings::load(config)?;
    let dictionary = Dictionary::load(&settings.pipeline.dictionary_path)?;
    let overlays = OverlayDismisser::load(Path::new(&settings.pipeline.overlay_patterns_path))?;

    println!("configuration OK");
    println!("  dictionary languages: {}", dictionary.languages().join(", "));
    println!("  overlay patterns:     {}", overlays.patterns().len());
    println!("  browser stage:        {}", settings.browser.enabled);
    println!("  fallback stage:       {}", settings.fallback_available());
    println!("  vision scoring:       {}", settings.vision_available());
    Ok(())
}

async fn run(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    concurrency: Option<usize>,
    show_progress: bool,
) -> anyhow::Result<()> {
    // 2. Load configuration
    let mut settings = Settings::load(config)?;
    if let Some(concurrency) = concurrency {
        settings.pipeline.concurrency = concurrency;
        settings.validate_all()?;
    }
    info!("Configuration loaded");

    // Initialize Prometheus Metrics
    init_metrics(&settings.metrics);

    // 3. Load shared read-only data
    let dictionary = Arc::new(Dictionary::load(&settings.pipeline.dictionary_path)?);
    let dismisser = Arc::new(OverlayDismisser::load(Path::new(
        &settings.pipeline.overlay_patterns_path,
    ))?);
    let extractor = Arc::new(FeatureExtractor::new(settings.extraction.max_images)?);
    info!(
        "Loaded dictionary ({} languages) and {} overlay patterns",
        dictionary.languages().len(),
        dismisser.patterns().len()
    );

    // 4. Budgets
    let vision_budget = Arc::new(CallBudget::new(BudgetKind::Vision, settings.budget.max_vision_calls));
    let fallback_budget = Arc::new(CallBudget::new(
        BudgetKind::Fallback,
        settings.budget.max_fallback_calls,
    ));

    // 5. Initialize Engines
    let mut strategies: Vec<Arc<dyn FetchStrategy>> = vec![Arc::new(ReqwestEngine::new(&settings.fetch))];
    let browser_pool = settings
        .browser
        .enabled
        .then(|| Arc::new(BrowserPool::new(&settings.browser, &settings.fetch)));
    if let Some(pool) = &browser_pool {
        strategies.push(Arc::new(PlaywrightEngine::new(&settings, pool.clone(), dismisser.clone())));
    } else {
        warn!("Browser stage disabled");
    }
    match FireEngine::from_settings(&settings) {
        Some(engine) => strategies.push(Arc::new(engine)),
        None => warn!("Fallback service not configured, stage 3 disabled"),
    }

    let sparse = SparseThresholds {
        min_nav_items: settings.extraction.min_nav_items,
        min_headings: settings.extraction.min_headings,
    };
    let orchestrator = Arc::new(FetchOrchestrator::new(
        strategies,
        extractor,
        dismisser,
        fallback_budget,
        sparse,
    ));

    // 6. Scorers
    let vision_client = OpenAiVisionClient::from_settings(&settings.vision)
        .map(|client| Arc::new(client) as Arc<dyn VisionClassifier>);
    if vision_client.is_none() {
        warn!("Vision scoring not configured, using text scores only");
    }
    let image_loader = Arc::new(HttpImageLoader::new(&settings.vision, &settings.fetch.user_agent)?);
    let use_case = Arc::new(ClassifyDomainUseCase::new(
        orchestrator,
        TextScorer::new(dictionary, settings.scoring.generalist_penalty_weight),
        VisionScorer::new(vision_client, &settings.vision, vision_budget).with_image_loader(image_loader),
        ScoreFusion::new(settings.thresholds.clone(), settings.fusion.clone()),
        sparse,
    ));

    // 7. Input and output
    let tasks = load_tasks(input).with_context(|| format!("cannot load {}", input.display()))?;
    let sink = Arc::new(CsvResultSink::open(output)?);
    info!(
        "Loaded {} domains, {} already in {}",
        tasks.len(),
        sink.completed_count(),
        output.display()
    );

    // 8. Cancellation on Ctrl+C
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing in-flight domains");
            signal_token.cancel();
        }
    });

    // 9. Run
    let pool = WorkerPool::new(use_case, sink.clone(), settings.pipeline.concurrency).with_progress(show_progress);
    let run_id = Uuid::new_v4();
    let outcome = pool
        .run(tasks, cancel)
        .instrument(tracing::info_span!("run", %run_id))
        .await;

    sink.close().await?;
    if let Some(pool) = browser_pool {
        pool.close();
    }

    let summary = outcome?;
    println!("{}", summary);
    Ok(())
}
