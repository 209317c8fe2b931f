// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::VisionSettings;
use crate::domain::models::fetch::VisionImage;
use crate::domain::services::vision_scorer::{
    parse_vision_reply, VisionClassifier, VisionError, VisionPrompt, VisionVerdict,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;

/// 错误信息中表示配额问题的片段
const QUOTA_MARKERS: &[&str] = &["insufficient_quota", "rate limit", "rate_limit", "quota"];

/// OpenAI 兼容的视觉分类客户端
///
/// 通过 `/chat/completions` 发送图片（URL 或 JPEG data URL）与固定提示词
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base_url: String,
    detail: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
}

impl OpenAiVisionClient {
    /// 根据配置创建，视觉未启用或缺少密钥时返回 `None`
    pub fn from_settings(settings: &VisionSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        let api_key = settings.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        Some(Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: settings.model.clone(),
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            detail: settings.detail.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    fn image_part(&self, image: &VisionImage) -> Value {
        let url = match image {
            VisionImage::Url(url) => url.clone(),
            VisionImage::Jpeg(bytes) => format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)),
        };
        json!({
            "type": "image_url",
            "image_url": { "url": url, "detail": self.detail }
        })
    }

    fn request_body(&self, images: &[VisionImage], prompt: VisionPrompt) -> Value {
        let mut content = vec![json!({ "type": "text", "text": prompt.text() })];
        content.extend(images.iter().map(|image| self.image_part(image)));

        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        })
    }
}

#[async_trait]
impl VisionClassifier for OpenAiVisionClient {
    async fn classify(
        &self,
        images: &[VisionImage],
        prompt: VisionPrompt,
    ) -> Result<VisionVerdict, VisionError> {
        let url = format!("{}/chat/completions", self.api_base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(images, prompt))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { VisionError::Timeout } else { VisionError::RequestFailed(e) })?;

        let status = response.status().as_u16();
        if status == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::QuotaExceeded(body));
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let lower = body.to_lowercase();
            if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
                return Err(VisionError::QuotaExceeded(body));
            }
            return Err(VisionError::Http { status, body });
        }

        let body: Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| VisionError::Malformed("Invalid response format from vision API".to_string()))?;

        parse_vision_reply(content)
    }
}
