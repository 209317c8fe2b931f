// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::url_utils::normalize_domain;
use std::collections::HashSet;
use std::fmt;

/// 域名任务
///
/// 流水线的输入单元。域名在构造时完成规范化（小写、去协议/路径），之后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainTask {
    domain: String,
}

impl DomainTask {
    /// 从原始输入创建任务，无法规范化为非空主机名时返回 `None`
    pub fn parse(raw: &str) -> Option<Self> {
        normalize_domain(raw).map(|domain| Self { domain })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// 从原始输入列表构建任务列表
    ///
    /// 无效条目被丢弃，重复域名折叠为一个任务并保留首次出现的顺序
    pub fn from_inputs<I, S>(inputs: I) -> Vec<DomainTask>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        inputs
            .into_iter()
            .filter_map(|raw| DomainTask::parse(raw.as_ref()))
            .filter(|task| seen.insert(task.domain.clone()))
            .collect()
    }
}

impl fmt::Display for DomainTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse_preserving_order() {
        let tasks = DomainTask::from_inputs([
            "b.com",
            "https://A.com/",
            "",
            "b.com",
            "http://a.com/shop",
            "c.com",
        ]);
        let domains: Vec<&str> = tasks.iter().map(|t| t.domain()).collect();
        assert_eq!(domains, vec!["b.com", "a.com", "c.com"]);
    }

    #[test]
    fn test_parse_rejects_blank() {
        assert!(DomainTask::parse("  ").is_none());
    }
}
