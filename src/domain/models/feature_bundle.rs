// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 页面特征集合
///
/// 由特征提取器生成，生成后不可变。数量字段不单独存储，
/// 始终由序列长度派生。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureBundle {
    nav_items: Vec<String>,
    headings: Vec<String>,
    hero_texts: Vec<String>,
    image_urls: Vec<String>,
}

impl FeatureBundle {
    pub fn new(
        nav_items: Vec<String>,
        headings: Vec<String>,
        hero_texts: Vec<String>,
        image_urls: Vec<String>,
    ) -> Self {
        Self {
            nav_items,
            headings,
            hero_texts,
            image_urls,
        }
    }

    pub fn nav_items(&self) -> &[String] {
        &self.nav_items
    }

    pub fn headings(&self) -> &[String] {
        &self.headings
    }

    pub fn hero_texts(&self) -> &[String] {
        &self.hero_texts
    }

    /// 去重后的候选图片URL（按排名排序）
    pub fn image_urls(&self) -> &[String] {
        &self.image_urls
    }

    pub fn nav_count(&self) -> usize {
        self.nav_items.len()
    }

    pub fn heading_count(&self) -> usize {
        self.headings.len()
    }

    pub fn image_count(&self) -> usize {
        self.image_urls.len()
    }

    /// 提取是否稀疏：导航项与标题同时低于最小值
    pub fn is_sparse(&self, min_nav_items: usize, min_headings: usize) -> bool {
        self.nav_count() < min_nav_items && self.heading_count() < min_headings
    }

    /// 参与文本评分的所有文本（导航 + 标题 + 主视觉/CTA）
    pub fn text_segments(&self) -> impl Iterator<Item = &str> {
        self.nav_items
            .iter()
            .chain(self.headings.iter())
            .chain(self.hero_texts.iter())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.nav_items.is_empty()
            && self.headings.is_empty()
            && self.hero_texts.is_empty()
            && self.image_urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_counts_match_sequences() {
        let bundle = FeatureBundle::new(
            strings(&["bras", "panties", "sleepwear"]),
            strings(&["new arrivals"]),
            vec![],
            strings(&["https://a.com/1.jpg"]),
        );
        assert_eq!(bundle.nav_count(), bundle.nav_items().len());
        assert_eq!(bundle.heading_count(), bundle.headings().len());
        assert_eq!(bundle.image_count(), 1);
    }

    #[test]
    fn test_sparse_requires_both_below_minimum() {
        let nav_rich = FeatureBundle::new(strings(&["a", "b", "c", "d", "e"]), vec![], vec![], vec![]);
        assert!(!nav_rich.is_sparse(5, 3));

        let thin = FeatureBundle::new(strings(&["a"]), strings(&["x", "y"]), vec![], vec![]);
        assert!(thin.is_sparse(5, 3));

        let heading_rich = FeatureBundle::new(vec![], strings(&["x", "y", "z"]), vec![], vec![]);
        assert!(!heading_rich.is_sparse(5, 3));
    }

    #[test]
    fn test_text_segments_order() {
        let bundle = FeatureBundle::new(
            strings(&["nav"]),
            strings(&["heading"]),
            strings(&["hero"]),
            vec![],
        );
        let segments: Vec<&str> = bundle.text_segments().collect();
        assert_eq!(segments, vec!["nav", "heading", "hero"]);
    }
}
