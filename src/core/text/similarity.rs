//! 文本重叠判定
//!
//! 比较上一保留帧的尾部行与当前帧的头部行：
//! - Exact: 行集合有交集即重叠
//! - Fuzzy: 拼接后的 LCS 相似度 >= 阈值

use crate::core::config::{SimilarityConfig, SimilarityPolicy};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapCheck {
    pub overlap: bool,
    /// Exact 策略下为交集是否非空 (1.0/0.0)，Fuzzy 策略下为相似度
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    policy: SimilarityPolicy,
    threshold: f32,
    tail_window: usize,
    head_window: usize,
}

impl SimilarityEngine {
    pub fn new(policy: SimilarityPolicy) -> Self {
        Self::from_config(&SimilarityConfig {
            policy,
            ..Default::default()
        })
    }

    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self {
            policy: config.policy,
            threshold: config.fuzzy_threshold,
            tail_window: config.tail_window.max(1),
            head_window: config.head_window.max(1),
        }
    }

    pub fn tail<'a>(&self, last_kept_lines: &'a [String]) -> &'a [String] {
        let start = last_kept_lines.len().saturating_sub(self.tail_window);
        &last_kept_lines[start..]
    }

    pub fn head<'a>(&self, current_lines: &'a [String]) -> &'a [String] {
        &current_lines[..current_lines.len().min(self.head_window)]
    }

    /// 取尾部/头部窗口并判定重叠
    pub fn check(&self, last_kept_lines: &[String], current_lines: &[String]) -> OverlapCheck {
        let tail = self.tail(last_kept_lines);
        let head = self.head(current_lines);

        match self.policy {
            SimilarityPolicy::Exact => {
                let overlap = lines_overlap(tail, head);
                OverlapCheck {
                    overlap,
                    score: if overlap { 1.0 } else { 0.0 },
                }
            }
            SimilarityPolicy::Fuzzy => {
                let score = similarity_ratio(&tail.join("\n"), &head.join("\n"));
                OverlapCheck {
                    overlap: score >= self.threshold,
                    score,
                }
            }
        }
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::from_config(&SimilarityConfig::default())
    }
}

/// 去空白后的非空行集合是否相交
pub fn lines_overlap<S: AsRef<str>>(lines1: &[S], lines2: &[S]) -> bool {
    let set1: HashSet<&str> = lines1
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .collect();
    lines2
        .iter()
        .map(|l| l.as_ref().trim())
        .any(|l| !l.is_empty() && set1.contains(l))
}

/// 基于最长公共子序列的相似度 `2 * LCS / (|a| + |b|)`，按字符计算
///
/// 两者皆空为 1.0，仅一方为空为 0.0。
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let lcs = lcs_length(&a, &b);
    (2 * lcs) as f32 / (a.len() + b.len()) as f32
}

fn lcs_length(a: &[char], b: &[char]) -> usize {
    // 两行滚动 DP
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
