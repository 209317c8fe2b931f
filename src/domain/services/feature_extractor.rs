// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::feature_bundle::FeatureBundle;
use crate::domain::models::fetch::PageContent;
use crate::utils::errors::ClassifierError;
use crate::utils::url_utils::resolve_url;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

const MAX_NAV_ITEMS: usize = 150;
const MAX_HEADINGS: usize = 30;
const MAX_HERO_TEXTS: usize = 30;
/// 小于该尺寸（像素）的图片视为图标
const MIN_IMAGE_DIMENSION: u32 = 150;
/// 未声明尺寸的图片按该面积参与排序
const UNKNOWN_IMAGE_AREA: u64 = 300 * 300;
/// 同目录下两个文件名的相似度达到该值即视为同一图片
const NEAR_DUPLICATE_SIMILARITY: f64 = 0.92;

const NAV_SELECTOR: &str = "nav a, header a, [role=\"navigation\"] a, .nav a, .navigation a, \
     .menu a, .main-menu a, #nav a, #navigation a, #menu a";
const HEADING_SELECTOR: &str = "h1, h2, h3";
const HERO_SELECTOR: &str = ".hero, .banner, .jumbotron, [class*=\"hero\"], [class*=\"banner\"], \
     [class*=\"slideshow\"], [class*=\"carousel\"]";
const HERO_TEXT_SELECTOR: &str = "h1, h2, h3, p";
const CTA_SELECTOR: &str = "button, a.button, a.btn, [role=\"button\"], .cta, [class*=\"cta\"]";
const OG_IMAGE_SELECTOR: &str =
    "meta[property=\"og:image\"], meta[property=\"og:image:secure_url\"], meta[name=\"twitter:image\"]";
const IMG_SELECTOR: &str = "img";
const BACKGROUND_SELECTOR: &str = "[style*=\"background\"]";
/// 默认排除的同意/Cookie 容器
const DEFAULT_EXCLUDED: &[&str] = &[
    "#onetrust-banner-sdk",
    "#onetrust-consent-sdk",
    "#CybotCookiebotDialog",
    "[id*=\"cookie-banner\"]",
    "[class*=\"cookie-banner\"]",
    "[id*=\"consent\"]",
    "[class*=\"consent\"]",
];

/// 路径中出现这些词（完整词）的图片不是商品图
const SKIP_IMAGE_TOKENS: &[&str] = &[
    "logo",
    "logos",
    "icon",
    "icons",
    "sprite",
    "sprites",
    "placeholder",
    "spacer",
    "pixel",
    "tracking",
    "favicon",
    "blank",
    "loader",
    "loading",
    "badge",
    "badges",
    "payment",
    "payments",
];
const PRODUCT_PATH_HINTS: &[&str] = &[
    "/product",
    "/products",
    "/collections",
    "/collection",
    "/catalog",
    "/shop",
    "/files/",
    "/media/",
    "/uploads/",
];

/// 特征提取器
///
/// 从HTML或Markdown中确定性地提取导航文本、标题、主视觉/CTA文本与候选图片。
/// 选择器在构造时编译一次，提取本身不会失败。
pub struct FeatureExtractor {
    max_images: usize,
    nav: Selector,
    headings: Selector,
    hero: Selector,
    hero_text: Selector,
    cta: Selector,
    og_image: Selector,
    img: Selector,
    background: Selector,
    default_excluded: Vec<Selector>,
    size_suffix: Regex,
    css_url: Regex,
    md_link: Regex,
}

/// 提取过程中的候选图片
#[derive(Debug, Clone)]
struct ImageCandidate {
    url: String,
    canonical: String,
    area: u64,
    order: usize,
    priority: bool,
}

impl FeatureExtractor {
    pub fn new(max_images: usize) -> Result<Self, ClassifierError> {
        Ok(Self {
            max_images,
            nav: parse_selector(NAV_SELECTOR)?,
            headings: parse_selector(HEADING_SELECTOR)?,
            hero: parse_selector(HERO_SELECTOR)?,
            hero_text: parse_selector(HERO_TEXT_SELECTOR)?,
            cta: parse_selector(CTA_SELECTOR)?,
            og_image: parse_selector(OG_IMAGE_SELECTOR)?,
            img: parse_selector(IMG_SELECTOR)?,
            background: parse_selector(BACKGROUND_SELECTOR)?,
            default_excluded: DEFAULT_EXCLUDED
                .iter()
                .map(|s| parse_selector(s))
                .collect::<Result<_, _>>()?,
            size_suffix: parse_regex(
                r"(?:[_-]\d+x\d*|[_-]\d*x\d+|@\dx|[_-](?:small|medium|large|grande|compact|master|thumb|thumbnail|pico))$",
            )?,
            css_url: parse_regex(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#)?,
            md_link: parse_regex(r"(!?)\[([^\]]*)\]\(\s*([^)\s]+)[^)]*\)")?,
        })
    }

    /// 提取特征
    ///
    /// # 参数
    ///
    /// * `content` - 页面内容（HTML 或 Markdown）
    /// * `base_url` - 解析相对链接所用的页面URL
    /// * `excluded` - 需要从提取中排除的容器选择器（例如未能关闭的同意横幅）
    pub fn extract(
        &self,
        content: &PageContent,
        base_url: Option<&Url>,
        excluded: &[String],
    ) -> FeatureBundle {
        match content {
            PageContent::Html(html) => self.extract_html(html, base_url, excluded),
            PageContent::Markdown(markdown) => self.extract_markdown(markdown, base_url),
        }
    }

    fn extract_html(&self, html: &str, base_url: Option<&Url>, excluded: &[String]) -> FeatureBundle {
        let document = Html::parse_document(html);
        let roots = self.excluded_roots(&document, excluded);

        let nav_items = collect_texts(
            document.select(&self.nav).filter(|e| !is_excluded(e, &roots)),
            3,
            99,
            MAX_NAV_ITEMS,
        );

        let headings = collect_texts(
            document.select(&self.headings).filter(|e| !is_excluded(e, &roots)),
            4,
            usize::MAX,
            MAX_HEADINGS,
        );

        let hero_elements = document
            .select(&self.hero)
            .filter(|e| !is_excluded(e, &roots))
            .flat_map(|hero| hero.select(&self.hero_text).collect::<Vec<_>>());
        let mut hero_texts = collect_texts(hero_elements, 4, 200, MAX_HERO_TEXTS);
        let cta_texts = collect_texts(
            document.select(&self.cta).filter(|e| !is_excluded(e, &roots)),
            3,
            49,
            MAX_HERO_TEXTS,
        );
        for text in cta_texts {
            if hero_texts.len() >= MAX_HERO_TEXTS {
                break;
            }
            if !hero_texts.contains(&text) {
                hero_texts.push(text);
            }
        }

        let image_urls = self.extract_images(&document, base_url, &roots);

        FeatureBundle::new(nav_items, headings, hero_texts, image_urls)
    }

    fn excluded_roots<'a>(&self, document: &'a Html, extra: &[String]) -> Vec<ElementRef<'a>> {
        let mut roots = Vec::new();
        for selector in &self.default_excluded {
            roots.extend(document.select(selector));
        }
        for raw in extra {
            match Selector::parse(raw) {
                Ok(selector) => roots.extend(document.select(&selector)),
                Err(_) => tracing::debug!("Ignoring unparsable exclusion selector: {}", raw),
            }
        }
        roots
    }

    fn extract_images(
        &self,
        document: &Html,
        base_url: Option<&Url>,
        roots: &[ElementRef],
    ) -> Vec<String> {
        let mut candidates = Vec::new();
        let mut order = 0usize;

        for meta in document.select(&self.og_image) {
            if let Some(raw) = meta.value().attr("content") {
                if let Some(url) = self.accept_image_url(raw, base_url) {
                    candidates.push(self.candidate(url, UNKNOWN_IMAGE_AREA, order, true));
                    order += 1;
                }
            }
        }

        for img in document.select(&self.img).filter(|e| !is_excluded(e, roots)) {
            let el = img.value();
            let width = el.attr("width").and_then(parse_dimension);
            let height = el.attr("height").and_then(parse_dimension);
            if width.is_some_and(|w| w < MIN_IMAGE_DIMENSION)
                || height.is_some_and(|h| h < MIN_IMAGE_DIMENSION)
            {
                continue;
            }
            if el
                .attr("alt")
                .is_some_and(|alt| alt.to_lowercase().contains("logo"))
            {
                continue;
            }

            let source = el
                .attr("srcset")
                .or_else(|| el.attr("data-srcset"))
                .and_then(largest_srcset_candidate)
                .or_else(|| {
                    ["data-src", "data-lazy-src", "data-original", "src"]
                        .iter()
                        .filter_map(|attr| el.attr(attr))
                        .map(str::trim)
                        .find(|v| !v.is_empty() && !v.starts_with("data:"))
                });

            if let Some(url) = source.and_then(|raw| self.accept_image_url(raw, base_url)) {
                let area = match (width, height) {
                    (Some(w), Some(h)) => u64::from(w) * u64::from(h),
                    _ => UNKNOWN_IMAGE_AREA,
                };
                candidates.push(self.candidate(url, area, order, false));
                order += 1;
            }
        }

        for el in document.select(&self.background).filter(|e| !is_excluded(e, roots)) {
            let Some(style) = el.value().attr("style") else {
                continue;
            };
            for capture in self.css_url.captures_iter(style) {
                if let Some(url) = self.accept_image_url(&capture[1], base_url) {
                    candidates.push(self.candidate(url, UNKNOWN_IMAGE_AREA, order, false));
                    order += 1;
                }
            }
        }

        self.rank_and_dedup(candidates)
    }

    fn extract_markdown(&self, markdown: &str, base_url: Option<&Url>) -> FeatureBundle {
        let mut nav_items = Vec::new();
        let mut headings = Vec::new();
        let mut candidates = Vec::new();

        for line in markdown.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                let heading = normalize_text(trimmed.trim_start_matches('#'));
                let heading = self.md_link.replace_all(&heading, "$2").to_string();
                push_unique(&mut headings, heading, 4, usize::MAX, MAX_HEADINGS);
            }

            for capture in self.md_link.captures_iter(trimmed) {
                let is_image = &capture[1] == "!";
                if is_image {
                    if let Some(url) = self.accept_image_url(&capture[3], base_url) {
                        let order = candidates.len();
                        candidates.push(self.candidate(url, UNKNOWN_IMAGE_AREA, order, false));
                    }
                } else {
                    let text = normalize_text(&capture[2]);
                    push_unique(&mut nav_items, text, 3, 99, MAX_NAV_ITEMS);
                }
            }
        }

        FeatureBundle::new(nav_items, headings, Vec::new(), self.rank_and_dedup(candidates))
    }

    fn accept_image_url(&self, raw: &str, base_url: Option<&Url>) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with("javascript:") {
            return None;
        }

        let url = if raw.starts_with("//") {
            Url::parse(&format!("https:{}", raw)).ok()?
        } else {
            match Url::parse(raw) {
                Ok(url) => url,
                Err(_) => resolve_url(base_url?, raw).ok()?,
            }
        };

        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        let path = url.path().to_lowercase();
        if path.ends_with(".svg") || path.ends_with(".ico") {
            return None;
        }
        if path
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| SKIP_IMAGE_TOKENS.contains(&token))
        {
            return None;
        }

        Some(url.to_string())
    }

    fn candidate(&self, url: String, area: u64, order: usize, priority: bool) -> ImageCandidate {
        ImageCandidate {
            canonical: self.canonical_image_key(&url),
            url,
            area,
            order,
            priority,
        }
    }

    /// 图片的规范化键：去掉查询串、片段与尺寸后缀
    fn canonical_image_key(&self, raw: &str) -> String {
        let Ok(url) = Url::parse(raw) else {
            return raw.to_lowercase();
        };
        let path = url.path().to_lowercase();
        let (stem, ext) = match path.rfind('.') {
            Some(idx) if idx > path.rfind('/').unwrap_or(0) => path.split_at(idx),
            _ => (path.as_str(), ""),
        };
        let stem = self.size_suffix.replace(stem, "");
        format!("{}{}{}", url.host_str().unwrap_or_default(), stem, ext)
    }

    fn rank_and_dedup(&self, mut candidates: Vec<ImageCandidate>) -> Vec<String> {
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| image_rank(b).total_cmp(&image_rank(a)))
                .then_with(|| a.order.cmp(&b.order))
        });

        let mut kept: Vec<ImageCandidate> = Vec::new();
        for candidate in candidates {
            if kept.len() >= self.max_images {
                break;
            }
            let duplicate = kept.iter().any(|k| {
                k.url == candidate.url
                    || k.canonical == candidate.canonical
                    || near_duplicate(&k.canonical, &candidate.canonical)
            });
            if !duplicate {
                kept.push(candidate);
            }
        }

        kept.into_iter().map(|c| c.url).collect()
    }
}

/// 排名分：声明面积、商品路径提示与文档位置（靠前近似首屏）
fn image_rank(candidate: &ImageCandidate) -> f64 {
    let area_score = (candidate.area.min(1_000_000) as f64) / 1_000_000.0;
    let path = candidate.canonical.as_str();
    let product_bonus = if PRODUCT_PATH_HINTS.iter().any(|h| path.contains(h)) {
        0.5
    } else {
        0.0
    };
    let position_score = 0.5 / (1.0 + candidate.order as f64);
    area_score + product_bonus + position_score
}

/// 同一目录下文件名高度相似的图片视为同一张
///
/// 数字序列不同（且都非空）的文件名视为不同商品，例如 `bra-1` 与 `bra-2`
fn near_duplicate(a: &str, b: &str) -> bool {
    let (dir_a, file_a) = a.rsplit_once('/').unwrap_or(("", a));
    let (dir_b, file_b) = b.rsplit_once('/').unwrap_or(("", b));
    if dir_a != dir_b {
        return false;
    }

    let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
    let (digits_a, digits_b) = (digits(file_a), digits(file_b));
    if !digits_a.is_empty() && !digits_b.is_empty() && digits_a != digits_b {
        return false;
    }

    strsim::normalized_levenshtein(file_a, file_b) >= NEAR_DUPLICATE_SIMILARITY
}

fn is_excluded(element: &ElementRef, roots: &[ElementRef]) -> bool {
    roots.iter().any(|root| {
        root.id() == element.id() || element.ancestors().any(|node| node.id() == root.id())
    })
}

fn collect_texts<'a>(
    elements: impl Iterator<Item = ElementRef<'a>>,
    min_len: usize,
    max_len: usize,
    cap: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    for element in elements {
        if out.len() >= cap {
            break;
        }
        let text = normalize_text(&element.text().collect::<Vec<_>>().join(" "));
        push_unique(&mut out, text, min_len, max_len, cap);
    }
    out
}

fn push_unique(out: &mut Vec<String>, text: String, min_len: usize, max_len: usize, cap: usize) {
    let len = text.chars().count();
    if len < min_len || len > max_len || out.len() >= cap || out.contains(&text) {
        return;
    }
    out.push(text);
}

/// 去除首尾空白、折叠内部空白并转为小写
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_dimension(raw: &str) -> Option<u32> {
    raw.trim().trim_end_matches("px").parse::<f64>().ok().map(|v| v as u32)
}

/// 从 srcset 中选出宽度（或密度）最大的候选
fn largest_srcset_candidate(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let url = parts.next()?;
            let weight = parts
                .next()
                .and_then(|d| {
                    d.trim_end_matches(['w', 'x'])
                        .parse::<f64>()
                        .ok()
                })
                .unwrap_or(1.0);
            Some((url, weight))
        })
        .filter(|(url, _)| !url.starts_with("data:"))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(url, _)| url)
}

fn parse_selector(raw: &str) -> Result<Selector, ClassifierError> {
    Selector::parse(raw)
        .map_err(|e| ClassifierError::ConfigInvalid(format!("bad selector '{}': {}", raw, e)))
}

fn parse_regex(raw: &str) -> Result<Regex, ClassifierError> {
    Regex::new(raw).map_err(|e| ClassifierError::ConfigInvalid(format!("bad pattern: {}", e)))
}

#[cfg(test)]
#[path = "feature_extractor_test.rs"]
mod tests;
