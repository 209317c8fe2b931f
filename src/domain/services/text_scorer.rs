// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::dictionary::{fold_text, Category, Dictionary};
use crate::domain::models::feature_bundle::FeatureBundle;
use crate::domain::models::score::Score;
use std::collections::BTreeSet;
use std::sync::Arc;

const MAX_BODYWEAR_REASON_TERMS: usize = 5;
const MAX_GENERALIST_REASON_TERMS: usize = 3;

/// 单个类别的匹配汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMatches {
    /// Σ 权重 × 出现次数
    pub weighted_count: f64,
    /// 命中的词，按贡献降序
    pub terms: Vec<String>,
    /// 命中词所属的语言
    pub languages: BTreeSet<String>,
}

/// 文本评分结果
#[derive(Debug, Clone, PartialEq)]
pub struct TextScore {
    pub score: Score,
    pub bodywear: CategoryMatches,
    pub generalist: CategoryMatches,
}

impl TextScore {
    pub fn value(&self) -> f64 {
        self.score.value()
    }
}

/// 文本评分器（阶段A）
///
/// 对导航、标题与主视觉/CTA文本做词典匹配，计算贴身衣物占比并扣除泛品类惩罚：
///
/// ```text
/// total = bw + gen + 1
/// score = clamp(bw / total − (gen / total) × penalty_weight, 0, 1)
/// ```
///
/// 对稀疏提取同样执行。
pub struct TextScorer {
    dictionary: Arc<Dictionary>,
    penalty_weight: f64,
}

impl TextScorer {
    pub fn new(dictionary: Arc<Dictionary>, penalty_weight: f64) -> Self {
        Self {
            dictionary,
            penalty_weight,
        }
    }

    pub fn score(&self, bundle: &FeatureBundle) -> TextScore {
        let text = fold_text(&bundle.text_segments().collect::<Vec<_>>().join(" \n "));

        let bodywear = self.match_category(Category::Bodywear, &text);
        let generalist = self.match_category(Category::Generalist, &text);

        let total = bodywear.weighted_count + generalist.weighted_count + 1.0;
        let bodywear_ratio = bodywear.weighted_count / total;
        let generalist_penalty = (generalist.weighted_count / total) * self.penalty_weight;

        let mut reasons = Vec::new();
        if !bodywear.terms.is_empty() {
            reasons.push(format!(
                "bodywear:{}",
                head(&bodywear.terms, MAX_BODYWEAR_REASON_TERMS)
            ));
        }
        if !generalist.terms.is_empty() {
            reasons.push(format!(
                "generalist:{}",
                head(&generalist.terms, MAX_GENERALIST_REASON_TERMS)
            ));
        }
        if !bodywear.languages.is_empty() {
            let languages: Vec<&str> = bodywear.languages.iter().map(String::as_str).collect();
            reasons.push(format!("lang:{}", languages.join(",")));
        }

        TextScore {
            score: Score::new(bodywear_ratio - generalist_penalty, reasons),
            bodywear,
            generalist,
        }
    }

    fn match_category(&self, category: Category, folded_text: &str) -> CategoryMatches {
        let mut hits: Vec<(f64, &str)> = Vec::new();
        let mut matches = CategoryMatches::default();

        if folded_text.is_empty() {
            return matches;
        }

        for term in self.dictionary.terms(category) {
            let occurrences = term.occurrences(folded_text);
            if occurrences == 0 {
                continue;
            }
            let contribution = term.weight * occurrences as f64;
            matches.weighted_count += contribution;
            matches.languages.extend(term.languages.iter().cloned());
            hits.push((contribution, term.term.as_str()));
        }

        hits.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        matches.terms = hits.into_iter().map(|(_, t)| t.to_string()).collect();
        matches
    }
}

fn head(terms: &[String], n: usize) -> String {
    terms.iter().take(n).cloned().collect::<Vec<_>>().join(",")
}
