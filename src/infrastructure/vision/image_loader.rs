// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::VisionSettings;
use crate::domain::models::fetch::VisionImage;
use crate::domain::services::vision_scorer::ImageLoader;
use async_trait::async_trait;
use futures::future::join_all;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const JPEG_QUALITY: u8 = 85;

/// 单张图片加载错误
#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("Image too large: {0} bytes")]
    TooLarge(usize),
    #[error("Undecodable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Resize task failed: {0}")]
    Task(String),
}

/// 通过HTTP下载候选图片并缩放为JPEG
///
/// 逐张下载，下载或解码失败的图片直接丢弃
pub struct HttpImageLoader {
    client: reqwest::Client,
    max_dimension: u32,
}

impl HttpImageLoader {
    pub fn new(settings: &VisionSettings, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(IMAGE_TIMEOUT)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            max_dimension: settings.max_image_dimension,
        })
    }

    async fn load_one(&self, url: &str) -> Result<Vec<u8>, ImageLoadError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageLoadError::Http(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageLoadError::TooLarge(bytes.len()));
        }

        let max_dimension = self.max_dimension;
        tokio::task::spawn_blocking(move || to_jpeg(&bytes, max_dimension))
            .await
            .map_err(|e| ImageLoadError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, urls: &[String]) -> Vec<VisionImage> {
        let results = join_all(urls.iter().map(|url| self.load_one(url))).await;

        urls.iter()
            .zip(results)
            .filter_map(|(url, result)| match result {
                Ok(jpeg) => Some(VisionImage::Jpeg(jpeg)),
                Err(e) => {
                    debug!("Skipping image {}: {}", url, e);
                    None
                }
            })
            .collect()
    }
}

/// 解码任意支持的格式，最长边超过 `max_dimension` 时等比缩小，输出JPEG
pub fn to_jpeg(bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, ImageLoadError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = if decoded.width().max(decoded.height()) > max_dimension {
        decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        decoded
    };

    let rgb = resized.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(jpeg)
}
