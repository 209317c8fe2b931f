// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::errors::ClassifierError;
use deunicode::deunicode;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const DEFAULT_TERM_WEIGHT: f64 = 1.0;

/// 词典类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// 贴身衣物（内衣、睡衣、泳装、塑身衣、袜类等）
    Bodywear,
    /// 泛品类（鞋履、外套、家居、配饰等）
    Generalist,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TermEntry {
    Plain(String),
    Weighted {
        term: String,
        #[serde(default = "default_weight")]
        weight: f64,
    },
}

fn default_weight() -> f64 {
    DEFAULT_TERM_WEIGHT
}

type RawDictionary = BTreeMap<String, BTreeMap<Category, Vec<TermEntry>>>;

/// 词典中的单个词条
///
/// 同一个词在多个语言中出现时只保留一条，权重取最大值
#[derive(Debug, Clone)]
pub struct DictionaryTerm {
    /// 规范化后的词（小写、ASCII转写）
    pub term: String,
    pub weight: f64,
    /// 包含该词的语言代码
    pub languages: Vec<String>,
    matcher: Regex,
}

impl DictionaryTerm {
    /// 统计词条在（已规范化的）文本中的出现次数
    pub fn occurrences(&self, folded_text: &str) -> usize {
        self.matcher.find_iter(folded_text).count()
    }
}

/// 词典
///
/// 语言 → 类别 → 带权重词条。启动时加载一次，运行期间只读，可被并发无锁读取。
#[derive(Debug, Clone)]
pub struct Dictionary {
    bodywear: Vec<DictionaryTerm>,
    generalist: Vec<DictionaryTerm>,
    languages: Vec<String>,
}

impl Dictionary {
    /// 从JSON文件加载词典
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ConfigInvalid(format!(
                "cannot read dictionary {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// 从JSON字符串解析词典
    ///
    /// 格式：`{"en": {"bodywear": ["bra", {"term": "lingerie", "weight": 2.0}], "generalist": [...]}}`
    pub fn from_json_str(raw: &str) -> Result<Self, ClassifierError> {
        let parsed: RawDictionary = serde_json::from_str(raw)
            .map_err(|e| ClassifierError::ConfigInvalid(format!("invalid dictionary: {}", e)))?;

        let mut merged: BTreeMap<Category, BTreeMap<String, (f64, BTreeSet<String>)>> =
            BTreeMap::new();

        for (language, categories) in &parsed {
            for (category, entries) in categories {
                for entry in entries {
                    let (term, weight) = match entry {
                        TermEntry::Plain(term) => (term.as_str(), DEFAULT_TERM_WEIGHT),
                        TermEntry::Weighted { term, weight } => (term.as_str(), *weight),
                    };
                    if !weight.is_finite() || weight <= 0.0 {
                        return Err(ClassifierError::ConfigInvalid(format!(
                            "dictionary term '{}' ({}) has invalid weight {}",
                            term, language, weight
                        )));
                    }
                    let folded = fold_text(term);
                    if folded.is_empty() {
                        continue;
                    }
                    let slot = merged
                        .entry(*category)
                        .or_default()
                        .entry(folded)
                        .or_insert((weight, BTreeSet::new()));
                    slot.0 = slot.0.max(weight);
                    slot.1.insert(language.clone());
                }
            }
        }

        let mut build = |category: Category| -> Result<Vec<DictionaryTerm>, ClassifierError> {
            merged
                .remove(&category)
                .unwrap_or_default()
                .into_iter()
                .map(|(term, (weight, languages))| {
                    Ok(DictionaryTerm {
                        matcher: term_matcher(&term)?,
                        term,
                        weight,
                        languages: languages.into_iter().collect(),
                    })
                })
                .collect()
        };

        let bodywear = build(Category::Bodywear)?;
        let generalist = build(Category::Generalist)?;

        if bodywear.is_empty() {
            return Err(ClassifierError::ConfigInvalid(
                "dictionary has no bodywear terms".to_string(),
            ));
        }

        Ok(Self {
            bodywear,
            generalist,
            languages: parsed.keys().cloned().collect(),
        })
    }

    /// 指定类别的全部词条
    pub fn terms(&self, category: Category) -> &[DictionaryTerm] {
        match category {
            Category::Bodywear => &self.bodywear,
            Category::Generalist => &self.generalist,
        }
    }

    /// 已配置的语言代码
    pub fn languages(&self) -> &[String] {
        &self.languages
    }
}

/// 将文本规范化为可匹配形式：ASCII转写、小写、空白折叠
pub fn fold_text(text: &str) -> String {
    deunicode(text)
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn term_matcher(folded_term: &str) -> Result<Regex, ClassifierError> {
    let starts_word = folded_term
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric());
    let ends_word = folded_term
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric());

    let pattern = format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        regex::escape(folded_term),
        if ends_word { r"\b" } else { "" }
    );

    Regex::new(&pattern).map_err(|e| {
        ClassifierError::ConfigInvalid(format!("bad dictionary term '{}': {}", folded_term, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "en": {
            "bodywear": ["lingerie", "bra", {"term": "sleepwear", "weight": 2.0}],
            "generalist": ["shoes", "home"]
        },
        "fr": {
            "bodywear": ["lingerie", {"term": "sous-vêtements", "weight": 1.5}],
            "generalist": ["chaussures"]
        }
    }"#;

    #[test]
    fn test_terms_are_merged_across_languages() {
        let dict = Dictionary::from_json_str(SAMPLE).unwrap();
        let lingerie = dict
            .terms(Category::Bodywear)
            .iter()
            .find(|t| t.term == "lingerie")
            .unwrap();
        assert_eq!(lingerie.languages, vec!["en".to_string(), "fr".to_string()]);
        assert_eq!(dict.terms(Category::Bodywear).len(), 4);
        assert_eq!(dict.languages(), &["en".to_string(), "fr".to_string()]);
    }

    #[test]
    fn test_default_and_explicit_weights() {
        let dict = Dictionary::from_json_str(SAMPLE).unwrap();
        let weight = |term: &str| {
            dict.terms(Category::Bodywear)
                .iter()
                .find(|t| t.term == term)
                .map(|t| t.weight)
        };
        assert_eq!(weight("bra"), Some(1.0));
        assert_eq!(weight("sleepwear"), Some(2.0));
        assert_eq!(weight("sous-vetements"), Some(1.5));
    }

    #[test]
    fn test_word_boundary_matching() {
        let dict = Dictionary::from_json_str(SAMPLE).unwrap();
        let bra = dict
            .terms(Category::Bodywear)
            .iter()
            .find(|t| t.term == "bra")
            .unwrap();
        assert_eq!(bra.occurrences(&fold_text("Bras, bra tops and a BRA")), 2);
        assert_eq!(bra.occurrences("celebrate brand"), 0);
    }

    #[test]
    fn test_accents_are_folded() {
        let dict = Dictionary::from_json_str(SAMPLE).unwrap();
        let term = dict
            .terms(Category::Bodywear)
            .iter()
            .find(|t| t.term == "sous-vetements")
            .unwrap();
        assert_eq!(term.occurrences(&fold_text("Nos Sous-Vêtements")), 1);
    }

    #[test]
    fn test_invalid_weight_is_rejected() {
        let raw = r#"{"en": {"bodywear": [{"term": "bra", "weight": -1}]}}"#;
        assert!(matches!(
            Dictionary::from_json_str(raw),
            Err(ClassifierError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_dictionary_without_bodywear_terms_is_rejected() {
        let raw = r#"{"en": {"generalist": ["shoes"]}}"#;
        assert!(Dictionary::from_json_str(raw).is_err());
    }
}
