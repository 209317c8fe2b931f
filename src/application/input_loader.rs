// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::domain_task::DomainTask;
use crate::utils::errors::InputError;
use std::path::Path;

/// 读取域名列表
///
/// `.csv` 文件按 `domain` 列读取（列名不区分大小写）；其他文件每行一个域名，
/// 忽略空行与 `#` 注释。无效条目丢弃，重复域名折叠。
pub fn load_tasks(path: &Path) -> Result<Vec<DomainTask>, InputError> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    if is_csv {
        load_csv(path)
    } else {
        let raw = std::fs::read_to_string(path)?;
        Ok(parse_lines(&raw))
    }
}

fn parse_lines(raw: &str) -> Vec<DomainTask> {
    DomainTask::from_inputs(
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#')),
    )
}

fn load_csv(path: &Path) -> Result<Vec<DomainTask>, InputError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case("domain"))
        .ok_or(InputError::MissingDomainColumn)?;

    let mut values = Vec::new();
    for record in reader.records() {
        if let Some(value) = record?.get(column) {
            values.push(value.to_string());
        }
    }
    Ok(DomainTask::from_inputs(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn domains(tasks: &[DomainTask]) -> Vec<&str> {
        tasks.iter().map(|t| t.domain()).collect()
    }

    #[test]
    fn test_text_input_skips_comments_and_duplicates() {
        let file = file_with(
            ".txt",
            "# brands\nhttps://Lingerie.example/\n\nshop.example\n  # more\nlingerie.example\n",
        );
        let tasks = load_tasks(file.path()).unwrap();
        assert_eq!(domains(&tasks), vec!["lingerie.example", "shop.example"]);
    }

    #[test]
    fn test_csv_input_uses_domain_column() {
        let file = file_with(".csv", "name,Domain\nA,a.example\nB, b.example \nC,a.example\n");
        let tasks = load_tasks(file.path()).unwrap();
        assert_eq!(domains(&tasks), vec!["a.example", "b.example"]);
    }

    #[test]
    fn test_csv_without_domain_column_fails() {
        let file = file_with(".csv", "name,url\nA,a.example\n");
        assert!(matches!(load_tasks(file.path()), Err(InputError::MissingDomainColumn)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            load_tasks(Path::new("/nonexistent/domains.txt")),
            Err(InputError::Io(_))
        ));
    }
}
