// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::Settings;
use crate::domain::models::fetch::{FetchedPage, Stage, VisionImage};
use crate::engines::browser_pool::{BrowserPool, PageSlot};
use crate::engines::overlay_dismisser::OverlayDismisser;
use crate::engines::traits::{AttemptFailure, EngineError, FetchStrategy};
use crate::engines::validators;
use crate::utils::retry_policy::RetryPolicy;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 截图与DOM快照各自的超时
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);
/// 导航之后的处理（截图、弹窗、快照）预留时间
const POST_NAVIGATION_GRACE: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const SCREENSHOT_QUALITY: i64 = 70;

const NAV_ELEMENT_SCRIPT: &str =
    "document.querySelector('nav, header, [role=navigation]') !== null";
const DOCUMENT_STATE_SCRIPT: &str =
    "({ href: document.location.href, state: document.readyState })";
const NAVIGATION_STATUS_SCRIPT: &str = "(() => { \
    const entry = performance.getEntriesByType('navigation')[0]; \
    return entry && entry.responseStatus ? entry.responseStatus : null; })()";

/// 页面就绪的等待条件，随尝试次数逐级放宽
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl WaitStrategy {
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 | 1 => WaitStrategy::DomContentLoaded,
            2 => WaitStrategy::Load,
            _ => WaitStrategy::NetworkIdle,
        }
    }

    /// 导航调用本身是否等待 load 事件
    pub fn waits_for_load_event(&self) -> bool {
        !matches!(self, WaitStrategy::DomContentLoaded)
    }

    /// 视为就绪的 `document.readyState`
    pub fn ready_states(&self) -> &'static [&'static str] {
        match self {
            WaitStrategy::DomContentLoaded => &["interactive", "complete"],
            WaitStrategy::Load | WaitStrategy::NetworkIdle => &["complete"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WaitStrategy::DomContentLoaded => "domcontentloaded",
            WaitStrategy::Load => "load",
            WaitStrategy::NetworkIdle => "networkidle",
        }
    }
}

/// 轮询得到的文档状态
#[derive(Debug, Clone, Deserialize)]
struct DocumentState {
    href: String,
    state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Failed,
}

fn readiness(strategy: WaitStrategy, document: &DocumentState) -> Readiness {
    if document.href.starts_with("chrome-error://") {
        return Readiness::Failed;
    }
    // 仍是导航前的空白页
    if document.href == "about:blank" {
        return Readiness::Pending;
    }
    if strategy.ready_states().contains(&document.state.as_str()) {
        Readiness::Ready
    } else {
        Readiness::Pending
    }
}

/// 浏览器渲染引擎（阶段2）
///
/// 基于chromiumoxide。每次尝试：导航 → 视口截图 → 拦截检测 →
/// 关闭弹窗 → 等待导航元素 → DOM快照。
pub struct PlaywrightEngine {
    pool: Arc<BrowserPool>,
    dismisser: Arc<OverlayDismisser>,
    navigation_timeout: Duration,
    network_idle_settle: Duration,
    nav_wait: Duration,
    retry_policy: RetryPolicy,
}

impl PlaywrightEngine {
    pub fn new(settings: &Settings, pool: Arc<BrowserPool>, dismisser: Arc<OverlayDismisser>) -> Self {
        let mut retry_policy = RetryPolicy::with_attempts(
            settings.fetch.stage2_attempts,
            Duration::from_millis(settings.fetch.retry_initial_backoff_ms),
        );
        retry_policy.max_backoff = Duration::from_millis(settings.fetch.retry_max_backoff_ms);

        Self {
            pool,
            dismisser,
            navigation_timeout: settings.fetch.stage2_timeout(),
            network_idle_settle: Duration::from_millis(settings.browser.network_idle_settle_ms),
            nav_wait: Duration::from_millis(settings.browser.nav_wait_ms),
            retry_policy,
        }
    }

    async fn navigate(&self, page: &Page, url: &str, strategy: WaitStrategy) -> Result<(), EngineError> {
        if strategy.waits_for_load_event() {
            page.goto(url).await.map_err(browser_error)?;
        } else {
            // goto 会等待 load 事件，这里改由脚本发起导航
            let literal = serde_json::to_string(url).map_err(|e| EngineError::Other(e.to_string()))?;
            if let Err(e) = page.evaluate(format!("window.location.assign({})", literal)).await {
                debug!("Script navigation to {} reported: {}", url, e);
            }
        }

        wait_for_ready_state(page, strategy).await?;
        if strategy == WaitStrategy::NetworkIdle {
            tokio::time::sleep(self.network_idle_settle).await;
        }
        Ok(())
    }

    async fn wait_for_nav_element(&self, page: &Page) {
        let deadline = tokio::time::Instant::now() + self.nav_wait;
        while tokio::time::Instant::now() < deadline {
            if evaluate_bool(page, NAV_ELEMENT_SCRIPT).await {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn open_and_render(
        &self,
        slot: PageSlot<'_>,
        domain: &str,
        attempt: u32,
    ) -> Result<FetchedPage, AttemptFailure> {
        let lease = slot.open().await?;
        self.render(&lease, domain, attempt).await
    }

    async fn render(&self, page: &Page, domain: &str, attempt: u32) -> Result<FetchedPage, AttemptFailure> {
        let url = format!("https://{}", domain);
        let strategy = WaitStrategy::for_attempt(attempt);
        debug!("Rendering {} with wait strategy {}", url, strategy.as_str());

        let navigation = tokio::time::timeout(self.navigation_timeout, self.navigate(page, &url, strategy))
            .await
            .unwrap_or(Err(EngineError::Timeout));

        // 在任何页面操作之前截图
        let screenshot = capture_viewport(page).await;

        if let Err(error) = navigation {
            let html = snapshot(page).await.unwrap_or_default();
            return Err(AttemptFailure::with_partial(error, partial(&url, html, screenshot)));
        }

        let status = navigation_status(page).await;
        let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.clone());
        let initial_html = match snapshot(page).await {
            Ok(html) => html,
            Err(error) => return Err(AttemptFailure::with_partial(error, partial(&final_url, String::new(), screenshot))),
        };

        if let Some(detail) = validators::detect_block(status, &initial_html) {
            return Err(AttemptFailure::with_partial(
                EngineError::Blocked(detail),
                partial(&final_url, String::new(), screenshot),
            ));
        }

        let report = self.dismisser.dismiss(page).await;
        debug!(
            "Overlay handling for {}: applied={:?} hidden={} notes={}",
            domain,
            report.applied,
            report.hidden_overlays,
            report.notes.len()
        );

        self.wait_for_nav_element(page).await;

        let html = snapshot(page).await.unwrap_or(initial_html);
        let mut fetched = FetchedPage::html(html, final_url);
        fetched.http_status = status;
        fetched.screenshot = screenshot;
        Ok(fetched)
    }
}

#[async_trait]
impl FetchStrategy for PlaywrightEngine {
    fn stage(&self) -> Stage {
        Stage::Browser
    }

    fn name(&self) -> &'static str {
        "playwright"
    }

    fn timeout(&self) -> Duration {
        self.navigation_timeout + self.nav_wait + POST_NAVIGATION_GRACE
    }

    fn checkout_timeout(&self) -> Duration {
        self.pool.checkout_timeout()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    async fn attempt(&self, domain: &str, attempt: u32) -> Result<FetchedPage, AttemptFailure> {
        // 等待页面槽位不计入渲染超时
        let slot = self.pool.checkout().await?;
        tokio::time::timeout(self.timeout(), self.open_and_render(slot, domain, attempt))
            .await
            .unwrap_or_else(|_| Err(EngineError::Timeout.into()))
    }

    async fn capture_screenshot(&self, domain: &str) -> Option<VisionImage> {
        let lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                debug!("No browser page for screenshot of {}: {}", domain, e);
                return None;
            }
        };
        let url = format!("https://{}", domain);
        let navigation = tokio::time::timeout(
            self.navigation_timeout,
            self.navigate(&lease, &url, WaitStrategy::Load),
        )
        .await;
        if !matches!(navigation, Ok(Ok(()))) {
            debug!("Screenshot navigation to {} did not complete", url);
        }
        capture_viewport(&lease).await
    }
}

fn partial(url: &str, html: String, screenshot: Option<VisionImage>) -> Option<FetchedPage> {
    if html.trim().is_empty() && screenshot.is_none() {
        return None;
    }
    let mut page = FetchedPage::html(html, url);
    page.screenshot = screenshot;
    Some(page)
}

fn browser_error(e: chromiumoxide::error::CdpError) -> EngineError {
    EngineError::Browser(e.to_string())
}

async fn capture_viewport(page: &Page) -> Option<VisionImage> {
    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Jpeg)
        .quality(SCREENSHOT_QUALITY)
        .full_page(false)
        .build();

    match tokio::time::timeout(SNAPSHOT_TIMEOUT, page.screenshot(params)).await {
        Ok(Ok(bytes)) if !bytes.is_empty() => Some(VisionImage::Jpeg(bytes)),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("Screenshot failed: {}", e);
            None
        }
        Err(_) => {
            debug!("Screenshot timed out");
            None
        }
    }
}

async fn snapshot(page: &Page) -> Result<String, EngineError> {
    tokio::time::timeout(SNAPSHOT_TIMEOUT, page.content())
        .await
        .map_err(|_| EngineError::Timeout)?
        .map_err(browser_error)
}

async fn wait_for_ready_state(page: &Page, strategy: WaitStrategy) -> Result<(), EngineError> {
    loop {
        // 导航过程中执行上下文可能被销毁，求值失败时继续轮询
        let document = match page.evaluate(DOCUMENT_STATE_SCRIPT).await {
            Ok(result) => result.into_value::<DocumentState>().ok(),
            Err(_) => None,
        };
        if let Some(document) = document {
            match readiness(strategy, &document) {
                Readiness::Ready => return Ok(()),
                Readiness::Failed => {
                    return Err(EngineError::Browser(format!("navigation failed at {}", document.href)))
                }
                Readiness::Pending => {}
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn evaluate_bool(page: &Page, script: &str) -> bool {
    match page.evaluate(script).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(_) => false,
    }
}

async fn navigation_status(page: &Page) -> Option<u16> {
    page.evaluate(NAVIGATION_STATUS_SCRIPT)
        .await
        .ok()
        .and_then(|result| result.into_value::<Option<u16>>().ok())
        .flatten()
}

#[cfg(test)]
#[path = "playwright_engine_test.rs"]
mod tests;
