//! 基于 tesseract 命令行的 OCR 实现
//!
//! 调用 `tesseract <image> stdout -l <lang> tsv`，把单词级结果按
//! (page, block, paragraph, line) 聚合成文本行。

use super::{BoundingBox, OcrProvider, RecognizedLine};
use crate::core::error::PipelineError;
use log::{debug, info};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const WORD_LEVEL: u32 = 5;

pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
    word_separator: &'static str,
}

impl TesseractOcr {
    /// 定位 tesseract 可执行文件（`TESSERACT_PATH` 优先，其次 PATH）
    pub fn new(language: &str) -> Result<Self, PipelineError> {
        let binary = match env::var_os("TESSERACT_PATH") {
            Some(path) => PathBuf::from(path),
            None => which::which("tesseract")
                .map_err(|e| PipelineError::resource("tesseract", e))?,
        };
        info!("🔤 TesseractOcr: using {} (lang={})", binary.display(), language);
        Ok(Self::with_binary(binary, language))
    }

    pub fn with_binary(binary: PathBuf, language: &str) -> Self {
        // 中日文单词之间不加空格
        let word_separator = if language.starts_with("chi") || language.starts_with("jpn") {
            ""
        } else {
            " "
        };
        Self {
            binary,
            language: language.to_string(),
            word_separator,
        }
    }
}

impl OcrProvider for TesseractOcr {
    fn recognize(&self, image: &Path) -> Result<Vec<RecognizedLine>, PipelineError> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .args(["-l", &self.language, "tsv"])
            .output()
            .map_err(|e| PipelineError::Ocr(format!("failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let lines = parse_tsv(&String::from_utf8_lossy(&output.stdout), self.word_separator);
        debug!("tesseract: {} lines from {}", lines.len(), image.display());
        Ok(lines)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

struct LineAccumulator {
    key: (u32, u32, u32, u32),
    words: Vec<String>,
    bbox: BoundingBox,
    conf_sum: f32,
    conf_count: u32,
}

impl LineAccumulator {
    fn finish(self, separator: &str) -> Option<RecognizedLine> {
        let text = self.words.join(separator).trim().to_string();
        if text.is_empty() {
            return None;
        }
        Some(RecognizedLine {
            text,
            bbox: Some(self.bbox),
            confidence: (self.conf_count > 0).then(|| self.conf_sum / self.conf_count as f32),
        })
    }
}

/// 解析 tesseract TSV 输出
pub fn parse_tsv(tsv: &str, word_separator: &str) -> Vec<RecognizedLine> {
    let mut lines = Vec::new();
    let mut current: Option<LineAccumulator> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let nums: Option<Vec<u32>> = cols[..10].iter().map(|c| c.trim().parse().ok()).collect();
        let Some(nums) = nums else {
            continue;
        };
        if nums[0] != WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }

        let key = (nums[1], nums[2], nums[3], nums[4]);
        let bbox = BoundingBox {
            left: nums[6],
            top: nums[7],
            width: nums[8],
            height: nums[9],
        };
        let conf = cols[10].trim().parse::<f32>().ok().filter(|c| *c >= 0.0);

        match current.as_mut() {
            Some(acc) if acc.key == key => {
                acc.words.push(word.to_string());
                acc.bbox = acc.bbox.union(&bbox);
                if let Some(c) = conf {
                    acc.conf_sum += c;
                    acc.conf_count += 1;
                }
            }
            _ => {
                if let Some(done) = current.take() {
                    lines.extend(done.finish(word_separator));
                }
                current = Some(LineAccumulator {
                    key,
                    words: vec![word.to_string()],
                    bbox,
                    conf_sum: conf.unwrap_or(0.0),
                    conf_count: u32::from(conf.is_some()),
                });
            }
        }
    }

    if let Some(done) = current {
        lines.extend(done.finish(word_separator));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t720\t1280\t-1\t
4\t1\t1\t1\t1\t0\t20\t30\t200\t20\t-1\t
5\t1\t1\t1\t1\t1\t20\t30\t80\t20\t90.5\tHello
5\t1\t1\t1\t1\t2\t110\t32\t110\t18\t89.5\tworld
5\t1\t1\t1\t2\t1\t20\t60\t50\t20\t70\tnext
5\t1\t1\t1\t2\t2\t80\t60\t10\t20\t-1\t
5\t1\t2\t1\t1\t1\t20\t400\t60\t20\t95\tbye
";

    #[test]
    fn test_groups_words_into_lines() {
        let lines = parse_tsv(SAMPLE, " ");
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello world", "next", "bye"]);

        assert_eq!(
            lines[0].bbox,
            Some(BoundingBox {
                left: 20,
                top: 30,
                width: 200,
                height: 20
            })
        );
        assert_eq!(lines[0].confidence, Some(90.0));
    }

    #[test]
    fn test_cjk_separator() {
        let tsv = "header\n5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\t你\n5\t1\t1\t1\t1\t2\t10\t0\t10\t10\t90\t好\n";
        let lines = parse_tsv(tsv, "");
        assert_eq!(lines[0].text, "你好");
    }

    #[test]
    fn test_ignores_malformed_rows() {
        assert!(parse_tsv("header\nnot\ta\trow\n", " ").is_empty());
        assert!(parse_tsv("", " ").is_empty());
    }

    #[test]
    fn test_separator_follows_language() {
        let ocr = TesseractOcr::with_binary(PathBuf::from("tesseract"), "chi_sim");
        assert_eq!(ocr.word_separator, "");
        let ocr = TesseractOcr::with_binary(PathBuf::from("tesseract"), "eng");
        assert_eq!(ocr.word_separator, " ");
    }
}
