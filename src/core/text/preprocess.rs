//! 识别文本行预处理：去空白、去空行、去排除词

use std::collections::HashSet;

/// 排除集合（条目已去除首尾空白，空条目被忽略）
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    entries: HashSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|e| e.as_ref().trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        Self { entries }
    }

    pub fn contains(&self, line: &str) -> bool {
        self.entries.contains(line.trim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 保留顺序，返回去除首尾空白后的非空、未被排除的行
pub fn preprocess_lines<S: AsRef<str>>(raw_lines: &[S], exclusions: &ExclusionSet) -> Vec<String> {
    raw_lines
        .iter()
        .map(|line| line.as_ref().trim())
        .filter(|line| !line.is_empty() && !exclusions.contains(line))
        .map(str::to_string)
        .collect()
}
