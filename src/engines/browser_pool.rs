// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::{BrowserSettings, FetchSettings};
use crate::engines::traits::EngineError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// 受限的浏览器页面池
///
/// 浏览器在第一次签出时才启动（或连接远程实例），之后在整个运行期间复用。
/// 同时签出的页面数量由信号量限制，签出等待有硬超时。
pub struct BrowserPool {
    browser: OnceCell<Browser>,
    permits: Arc<Semaphore>,
    checkout_timeout: Duration,
    remote_debugging_url: Option<String>,
    user_agent: String,
    request_timeout: Duration,
}

impl BrowserPool {
    pub fn new(browser: &BrowserSettings, fetch: &FetchSettings) -> Self {
        Self {
            browser: OnceCell::new(),
            permits: Arc::new(Semaphore::new(browser.max_pages)),
            checkout_timeout: Duration::from_secs(browser.checkout_timeout_secs),
            remote_debugging_url: browser
                .remote_debugging_url
                .clone()
                .or_else(|| std::env::var("CHROMIUM_REMOTE_DEBUGGING_URL").ok()),
            user_agent: fetch.user_agent.clone(),
            request_timeout: fetch.stage2_timeout(),
        }
    }

    /// 当前可用的页面槽位
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn browser(&self) -> Result<&Browser, EngineError> {
        self.browser
            .get_or_try_init(|| async {
                let (browser, mut handler) = if let Some(url) = &self.remote_debugging_url {
                    info!("Connecting to remote Chrome instance at: {}", url);
                    Browser::connect(url.as_str()).await.map_err(|e| {
                        EngineError::Browser(format!("Failed to connect to remote Chrome: {}", e))
                    })?
                } else {
                    let config = BrowserConfig::builder()
                        .no_sandbox()
                        .window_size(1920, 1080)
                        .request_timeout(self.request_timeout)
                        .arg("--disable-gpu")
                        .arg("--disable-dev-shm-usage")
                        .arg(format!("--user-agent={}", self.user_agent))
                        .build()
                        .map_err(EngineError::Browser)?;
                    Browser::launch(config)
                        .await
                        .map_err(|e| EngineError::Browser(e.to_string()))?
                };

                tokio::spawn(async move {
                    while let Some(event) = handler.next().await {
                        if event.is_err() {
                            break;
                        }
                    }
                });

                Ok(browser)
            })
            .await
    }

    /// 等待一个页面槽位
    ///
    /// 等待超过 `checkout_timeout` 时返回 `Unavailable`，此时尚未访问任何站点
    pub async fn checkout(&self) -> Result<PageSlot<'_>, EngineError> {
        let permit = tokio::time::timeout(self.checkout_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                EngineError::Unavailable(format!(
                    "no browser page free after {}s",
                    self.checkout_timeout.as_secs()
                ))
            })?
            .map_err(|_| EngineError::Browser("browser pool closed".to_string()))?;

        Ok(PageSlot { pool: self, permit })
    }

    /// 签出槽位并打开空白页面
    pub async fn acquire(&self) -> Result<PageLease, EngineError> {
        self.checkout().await?.open().await
    }

    pub fn checkout_timeout(&self) -> Duration {
        self.checkout_timeout
    }

    /// 停止签出新页面
    pub fn close(&self) {
        self.permits.close();
    }
}

/// 已占用、尚未打开页面的槽位
pub struct PageSlot<'a> {
    pool: &'a BrowserPool,
    permit: OwnedSemaphorePermit,
}

impl PageSlot<'_> {
    /// 启动（或复用）浏览器并打开空白页面
    pub async fn open(self) -> Result<PageLease, EngineError> {
        let browser = self.pool.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Browser(e.to_string()))?;

        Ok(PageLease {
            page,
            _permit: self.permit,
        })
    }
}

/// 签出的页面
///
/// 离开作用域时关闭页面并归还槽位，包括出错与取消的路径
pub struct PageLease {
    page: Page,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PageLease {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        let page = self.page.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = page.close().await {
                    debug!("Failed to close browser page: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;

    fn pool(max_pages: usize) -> BrowserPool {
        let mut settings = Settings::defaults().unwrap();
        settings.browser.max_pages = max_pages;
        settings.browser.checkout_timeout_secs = 1;
        BrowserPool::new(&settings.browser, &settings.fetch)
    }

    #[test]
    fn test_pool_starts_with_all_slots_free() {
        assert_eq!(pool(3).available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_gives_up_after_timeout() {
        let pool = pool(1);
        let _held = pool.checkout().await.unwrap();
        assert_eq!(pool.available(), 0);

        let started = tokio::time::Instant::now();
        let result = pool.checkout().await;

        assert!(matches!(result, Err(EngineError::Unavailable(_))));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dropped_slot_frees_capacity() {
        let pool = pool(2);
        let slot = pool.checkout().await.unwrap();
        assert_eq!(pool.available(), 1);
        drop(slot);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_checkout() {
        let pool = pool(1);
        pool.close();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(EngineError::Browser(_))));
    }
}
