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

use crate::config::settings::FetchSettings;
use crate::domain::models::fetch::{FetchedPage, Stage};
use crate::engines::traits::{AttemptFailure, EngineError, FetchStrategy};
use crate::engines::validators;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::time::Duration;
use tracing::debug;

/// 直连HTTP抓取引擎（阶段1）
///
/// 依次尝试 `https://{domain}` 与 `http://{domain}`，跟随重定向。
/// 非2xx、空响应与挑战页面都视为失败。
pub struct ReqwestEngine {
    user_agent: String,
    timeout: Duration,
    schemes: Vec<&'static str>,
}

impl ReqwestEngine {
    pub fn new(settings: &FetchSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout: settings.stage1_timeout(),
            schemes: vec!["https", "http"],
        }
    }

    /// 仅使用指定协议（例如测试中的纯HTTP服务器）
    pub fn with_schemes(mut self, schemes: Vec<&'static str>) -> Self {
        self.schemes = schemes;
        self
    }

    fn build_client(&self) -> Result<reqwest::Client, EngineError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        // Each domain gets a fresh client for cookie isolation
        Ok(reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .timeout(self.timeout)
            .cookie_store(true)
            .build()?)
    }

    async fn fetch_url(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<FetchedPage, EngineError> {
        let response = client.get(url).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        if let Some(detail) = validators::detect_block(Some(status), &body) {
            return Err(EngineError::Blocked(detail));
        }
        if !validators::is_success_status(status) {
            return Err(EngineError::Http { status });
        }
        if body.trim().is_empty() {
            return Err(EngineError::EmptyBody);
        }

        Ok(FetchedPage::html(body, final_url).with_status(status))
    }
}

#[async_trait]
impl FetchStrategy for ReqwestEngine {
    fn stage(&self) -> Stage {
        Stage::Direct
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, domain: &str, _attempt: u32) -> Result<FetchedPage, AttemptFailure> {
        let client = self.build_client()?;
        let mut failure: Option<EngineError> = None;

        for scheme in &self.schemes {
            let url = format!("{}://{}", scheme, domain);
            match self.fetch_url(&client, &url).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    debug!("HTTP fetch of {} failed: {}", url, e);
                    // 拦截比后续协议的网络错误更能说明问题
                    let keep_previous =
                        matches!(failure, Some(EngineError::Blocked(_))) && !matches!(e, EngineError::Blocked(_));
                    if !keep_previous {
                        failure = Some(e);
                    }
                }
            }
        }

        Err(failure
            .unwrap_or_else(|| EngineError::Other("no URL scheme configured".to_string()))
            .into())
    }
}

#[cfg(test)]
#[path = "reqwest_engine_test.rs"]
mod tests;
