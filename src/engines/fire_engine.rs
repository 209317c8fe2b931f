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

use crate::config::settings::Settings;
use crate::domain::models::fetch::{FetchedPage, PageContent, Stage, VisionImage};
use crate::engines::traits::{AttemptFailure, EngineError, FetchStrategy};
use crate::engines::validators;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// 商业抓取回退引擎（阶段3，Firecrawl 兼容的 `/scrape` 接口）
///
/// 每次调用都计费，由编排器按回退预算放行
pub struct FireEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    wait_for_ms: u64,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: String,
    formats: [&'a str; 3],
    only_main_content: bool,
    wait_for: u64,
    timeout: u64,
}

#[derive(Deserialize, Debug)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    raw_html: Option<String>,
    #[serde(default)]
    screenshot: Option<String>,
    #[serde(default)]
    metadata: Option<ScrapeMetadata>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ScrapeMetadata {
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default, rename = "sourceURL")]
    source_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl FireEngine {
    /// 根据配置创建，未启用或缺少密钥时返回 `None`
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        if !settings.fallback_available() {
            return None;
        }
        let api_key = settings.fallback.api_key.clone()?;
        Some(Self::new(
            settings.fallback.base_url.clone(),
            api_key,
            settings.fallback.wait_for_ms,
            settings.fetch.stage3_timeout(),
        ))
    }

    pub fn new(base_url: String, api_key: String, wait_for_ms: u64, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            wait_for_ms,
            timeout,
        }
    }

    fn into_page(domain: &str, data: ScrapeData) -> Result<FetchedPage, EngineError> {
        let metadata = data.metadata.unwrap_or_default();
        let final_url = metadata
            .url
            .or(metadata.source_url)
            .unwrap_or_else(|| format!("https://{}", domain));

        // 优先使用HTML，缺失时退回Markdown
        let content = match (data.html.or(data.raw_html), data.markdown) {
            (Some(html), _) if !html.trim().is_empty() => PageContent::Html(html),
            (_, Some(markdown)) if !markdown.trim().is_empty() => PageContent::Markdown(markdown),
            _ => return Err(EngineError::EmptyBody),
        };

        if let PageContent::Html(html) = &content {
            if let Some(detail) = validators::detect_block(metadata.status_code, html) {
                return Err(EngineError::Blocked(detail));
            }
        }

        Ok(FetchedPage {
            content,
            final_url,
            http_status: metadata.status_code,
            screenshot: data
                .screenshot
                .filter(|s| !s.trim().is_empty())
                .map(VisionImage::Url),
        })
    }
}

#[async_trait]
impl FetchStrategy for FireEngine {
    fn stage(&self) -> Stage {
        Stage::Fallback
    }

    fn name(&self) -> &'static str {
        "firecrawl"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_metered(&self) -> bool {
        true
    }

    async fn attempt(&self, domain: &str, _attempt: u32) -> Result<FetchedPage, AttemptFailure> {
        let body = ScrapeRequest {
            url: format!("https://{}", domain),
            formats: ["markdown", "html", "screenshot"],
            only_main_content: false,
            wait_for: self.wait_for_ms,
            timeout: self.timeout.as_millis() as u64,
        };

        let resp = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !validators::is_success_status(status) {
            let text = resp.text().await.unwrap_or_default();
            debug!("Fallback service returned {} for {}: {}", status, domain, text);
            return Err(EngineError::Http { status }.into());
        }

        let parsed: ScrapeResponse = resp.json().await?;
        if !parsed.success {
            return Err(EngineError::Other(
                parsed
                    .error
                    .unwrap_or_else(|| "fallback service reported failure".to_string()),
            )
            .into());
        }

        Ok(Self::into_page(domain, parsed.data.unwrap_or_default())?)
    }
}
