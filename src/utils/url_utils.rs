// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use url::{ParseError, Url};

/// 将可能为相对路径的URL转换为绝对路径URL
pub fn resolve_url(base_url: &Url, path: &str) -> Result<Url, ParseError> {
    base_url.join(path)
}

/// 将用户输入的域名规范化为裸主机名
///
/// 去除协议、路径、查询串、端口以外的部分、末尾的点，并转为小写。
/// 无法得到非空主机名时返回 `None`。
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    if trimmed.is_empty() {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return None;
    }

    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_protocol_relative_url() {
        let base = Url::parse("https://example.com/a/b").unwrap();
        assert_eq!(
            resolve_url(&base, "//t.co/c").unwrap().as_str(),
            "https://t.co/c"
        );
    }

    #[test]
    fn test_resolve_relative_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        assert_eq!(
            resolve_url(&base, "c").unwrap().as_str(),
            "http://example.com/a/c"
        );
    }

    #[test]
    fn test_normalize_domain_strips_scheme_and_path() {
        assert_eq!(
            normalize_domain("  HTTPS://Shop.Example.COM/collections/bras?x=1 "),
            Some("shop.example.com".to_string())
        );
        assert_eq!(
            normalize_domain("example.com."),
            Some("example.com".to_string())
        );
        assert_eq!(
            normalize_domain("\"lingerie.fr\""),
            Some("lingerie.fr".to_string())
        );
    }

    #[test]
    fn test_normalize_domain_keeps_port() {
        assert_eq!(
            normalize_domain("127.0.0.1:8080"),
            Some("127.0.0.1:8080".to_string())
        );
    }

    #[test]
    fn test_normalize_domain_rejects_empty() {
        assert_eq!(normalize_domain("   "), None);
        assert_eq!(normalize_domain("http://"), None);
    }
}
