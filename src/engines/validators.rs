// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 挑战页面通常很小，超过该长度的页面不再按正文特征判定
const MAX_CHALLENGE_BODY_LEN: usize = 60_000;

/// 常见反爬虫/挑战页面的特征（小写）
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "challenge-platform",
    "cf_chl_opt",
    "<title>just a moment...</title>",
    "attention required! | cloudflare",
    "checking your browser before accessing",
    "ddos protection by",
    "_incapsula_resource",
    "request unsuccessful. incapsula incident",
    "px-captcha",
    "captcha-delivery.com",
    "please verify you are a human",
    "verify you are human",
    "are you a robot",
    "<title>access denied</title>",
];

/// 直接视为拦截的状态码
const BLOCKING_STATUSES: &[u16] = &[401, 403, 429, 503];

/// 判定响应是否为拦截/挑战页面
///
/// # 返回值
///
/// 拦截时返回简短描述，否则返回 `None`
pub fn detect_block(status: Option<u16>, body: &str) -> Option<String> {
    if let Some(status) = status {
        if BLOCKING_STATUSES.contains(&status) {
            return Some(format!("challenge page: HTTP {}", status));
        }
    }

    if body.len() > MAX_CHALLENGE_BODY_LEN {
        return None;
    }

    let lower = body.to_lowercase();
    CHALLENGE_MARKERS
        .iter()
        .find(|marker| lower.contains(*marker))
        .map(|marker| format!("challenge page: {}", marker))
}

/// 状态码是否表示成功
pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}
