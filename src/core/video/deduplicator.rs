use crate::core::config::{AnalysisRect, ContinuityPolicy, SimilarityConfig};
use crate::core::error::PipelineError;
use crate::core::ocr::OcrProvider;
use crate::core::progress::{ProgressReporter, StopSignal};
use crate::core::text::{preprocess_lines, ExclusionSet, SimilarityEngine};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::frame::FrameSequence;

/// 顺序文字去重器
///
/// 严格按时间顺序逐帧判定保留/跳过，每一帧只与 "最近一次保留的帧" 比较，
/// 而不是与前一帧比较。序列最后一帧总会被保留（中断时除外）。
pub struct FrameDeduplicator {
    ocr: Arc<dyn OcrProvider>,
    exclusions: ExclusionSet,
    analysis_rect: Option<AnalysisRect>,
    engine: SimilarityEngine,
    continuity: ContinuityPolicy,
    reporter: ProgressReporter,
    stop: StopSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupReason {
    // 保留
    FirstFrame,
    NoOverlapNewContent,
    #[serde(rename = "overlap-but-changed-content")]
    OverlapButChanged,
    ForcedLastFrame,
    ForcedByFailure,
    // 跳过
    EmptyText,
    NoContinuity,
    UnchangedContent,
    RecognitionFailed,
}

/// 单帧去重决策
#[derive(Debug, Clone, Serialize)]
pub struct DedupDecision {
    pub frame: PathBuf,
    pub position: usize,
    pub kept: bool,
    pub reason: DedupReason,
    /// 与上一保留帧的重叠得分（未比较时为 None）
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub kept: Vec<PathBuf>,
    pub decisions: Vec<DedupDecision>,
    pub interrupted: bool,
}

/// 最近一次保留帧的文本快照
#[derive(Debug, Default)]
struct LastKept {
    lines: Vec<String>,
    text: Option<String>,
}

/// 单帧识别后的文本
struct FrameText {
    lines: Vec<String>,
    text: String,
}

impl FrameDeduplicator {
    pub fn new(ocr: Arc<dyn OcrProvider>) -> Self {
        Self {
            ocr,
            exclusions: ExclusionSet::default(),
            analysis_rect: None,
            engine: SimilarityEngine::default(),
            continuity: ContinuityPolicy::default(),
            reporter: ProgressReporter::silent(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_exclusions<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclusions = ExclusionSet::new(entries);
        self
    }

    pub fn with_analysis_rect(mut self, rect: Option<AnalysisRect>) -> Self {
        self.analysis_rect = rect;
        self
    }

    pub fn with_similarity(mut self, config: &SimilarityConfig) -> Self {
        self.engine = SimilarityEngine::from_config(config);
        self.continuity = config.continuity;
        self
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// 扫描目录中的帧并去重
    pub fn run_dir(&self, frames_dir: &Path) -> Result<DedupOutcome, PipelineError> {
        let sequence = FrameSequence::discover(frames_dir)?;
        if sequence.is_empty() {
            self.reporter.warn("未找到视频帧文件。");
        }
        Ok(self.run(&sequence.paths()))
    }

    /// 按给定顺序逐帧去重
    pub fn run(&self, frames: &[PathBuf]) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();
        let total = frames.len();
        if total == 0 {
            return outcome;
        }

        self.reporter
            .info(format!("开始 OCR 筛选: {} 帧 (OCR: {})", total, self.ocr.name()));

        // 裁剪后的临时输入只在本次运行内存在，drop 时删除
        let crop_dir = self.analysis_rect.and_then(|_| self.create_crop_dir(&frames[0]));
        let mut last = LastKept::default();

        for (i, frame) in frames.iter().enumerate() {
            if self.stop.is_stopped() {
                self.reporter.warn("OCR 筛选被中断。");
                outcome.interrupted = true;
                break;
            }
            self.reporter.progress(i + 1, total);

            let is_last = i + 1 == total;
            let recognized = self.recognize(frame, crop_dir.as_ref());
            let decision = self.decide(i, frame, is_last, &recognized, &outcome.kept, &last);

            if decision.kept {
                outcome.kept.push(frame.clone());
                if let Ok(current) = recognized {
                    last.lines = current.lines;
                    last.text = Some(current.text);
                }
            }
            outcome.decisions.push(decision);
        }

        if let Some(dir) = crop_dir {
            if let Err(e) = dir.close() {
                self.reporter.warn(format!("清理 OCR 临时目录失败: {}", e));
            }
        }

        if !outcome.interrupted {
            self.reporter.progress(total, total);
        }
        self.reporter
            .info(format!("OCR 筛选完成。保留 {} 张帧。", outcome.kept.len()));
        outcome
    }

    fn decide(
        &self,
        position: usize,
        frame: &Path,
        is_last: bool,
        recognized: &Result<FrameText, PipelineError>,
        kept: &[PathBuf],
        last: &LastKept,
    ) -> DedupDecision {
        let name = display_name(frame);
        let decision = |kept: bool, reason: DedupReason, score: Option<f32>| DedupDecision {
            frame: frame.to_path_buf(),
            position,
            kept,
            reason,
            score,
        };

        let current = match recognized {
            Ok(current) => current,
            Err(e) => {
                self.reporter.warn(format!("OCR 处理 {} 失败: {}", name, e));
                return if is_last {
                    self.reporter.info(format!("强制保留最后一帧: {} (识别失败)", name));
                    decision(true, DedupReason::ForcedByFailure, None)
                } else {
                    decision(false, DedupReason::RecognitionFailed, None)
                };
            }
        };

        if current.lines.is_empty() {
            return if is_last {
                self.reporter.info(format!("强制保留最后一帧: {} (无文字)", name));
                decision(true, DedupReason::ForcedLastFrame, None)
            } else {
                self.reporter.debug(format!("跳过: {} (无有效文字)", name));
                decision(false, DedupReason::EmptyText, None)
            };
        }

        if kept.is_empty() {
            self.reporter.info(format!("保留: {} (首张有效帧)", name));
            return decision(true, DedupReason::FirstFrame, None);
        }

        let check = self.engine.check(&last.lines, &current.lines);
        let score = Some(check.score);

        let verdict = match self.continuity {
            ContinuityPolicy::KeepOnOverlap if check.overlap => Some(DedupReason::OverlapButChanged),
            ContinuityPolicy::KeepOnOverlap => None,
            ContinuityPolicy::KeepOnNewContent if !check.overlap => {
                Some(DedupReason::NoOverlapNewContent)
            }
            ContinuityPolicy::KeepOnNewContent => {
                (last.text.as_deref() != Some(current.text.as_str()))
                    .then_some(DedupReason::OverlapButChanged)
            }
        };

        match verdict {
            Some(reason) => {
                self.reporter.info(format!("保留: {} ({:?})", name, reason));
                decision(true, reason, score)
            }
            None if is_last => {
                self.reporter.info(format!("强制保留最后一帧: {}", name));
                decision(true, DedupReason::ForcedLastFrame, score)
            }
            None => {
                let reason = if check.overlap {
                    DedupReason::UnchangedContent
                } else {
                    DedupReason::NoContinuity
                };
                self.reporter.debug(format!("跳过: {} ({:?})", name, reason));
                decision(false, reason, score)
            }
        }
    }

    fn recognize(&self, frame: &Path, crop_dir: Option<&TempDir>) -> Result<FrameText, PipelineError> {
        let cropped = crop_dir.and_then(|dir| self.crop_for_ocr(frame, dir.path()));
        let input = cropped.as_deref().unwrap_or(frame);

        let raw = self.ocr.recognize(input)?;
        let raw_texts: Vec<&str> = raw.iter().map(|l| l.text.as_str()).collect();
        let lines = preprocess_lines(&raw_texts, &self.exclusions);
        let text = lines.join("\n");
        Ok(FrameText { lines, text })
    }

    /// 按分析区域裁剪；区域无效或裁剪失败时返回 None（回退到整帧）
    fn crop_for_ocr(&self, frame: &Path, crop_dir: &Path) -> Option<PathBuf> {
        let rect = self.analysis_rect?;
        let name = display_name(frame);

        let img = match image::open(frame) {
            Ok(img) => img,
            Err(e) => {
                self.reporter
                    .warn(format!("处理图片 {} 时出错 (裁剪区域): {}", name, e));
                return None;
            }
        };

        if !rect.fits_within(img.width(), img.height()) {
            self.reporter.warn(format!(
                "OCR 分析区域对 {} 无效 ({}x{})，使用整帧。",
                name,
                img.width(),
                img.height()
            ));
            return None;
        }

        let output = crop_dir.join(format!("cropped_{}", name));
        let cropped = img.crop_imm(rect.x, rect.y, rect.width, rect.height);
        match cropped.save(&output) {
            Ok(()) => Some(output),
            Err(e) => {
                self.reporter
                    .warn(format!("保存裁剪图片 {} 失败: {}", name, e));
                None
            }
        }
    }

    fn create_crop_dir(&self, first_frame: &Path) -> Option<TempDir> {
        let parent = first_frame.parent().filter(|p| p.is_dir());
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("_ocr_temp_inputs");
            b
        };
        let created = match parent {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        };
        match created {
            Ok(dir) => Some(dir),
            Err(e) => {
                self.reporter
                    .warn(format!("创建 OCR 临时目录失败，使用整帧: {}", e));
                None
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
