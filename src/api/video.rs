//! 视频证据任务：抽帧 -> OCR 去重 -> 排序 -> 排版 -> 渲染

use super::{apply_image_order, document_name, file_name, RenderedDocument, TaskOutcome};
use crate::core::config::VideoSettings;
use crate::core::error::PipelineError;
use crate::core::layout::{GridSpec, LayoutEngine, RendererKind};
use crate::core::ocr::{global_provider, OcrProvider};
use crate::core::progress::{ProgressReporter, Stage, StopSignal};
use crate::core::video::{DedupDecision, FrameDeduplicator, FrameSource};
use chrono::Local;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct VideoEvidenceReport {
    pub frames_dir: PathBuf,
    pub extracted_frames: usize,
    pub kept_frames: Vec<PathBuf>,
    pub decisions: Vec<DedupDecision>,
    /// 没有保留帧时为 None
    pub document: Option<RenderedDocument>,
}

pub struct VideoEvidenceJob {
    settings: VideoSettings,
    ocr: Arc<dyn OcrProvider>,
    frames: Arc<dyn FrameSource>,
    renderer: RendererKind,
    reporter: ProgressReporter,
    stop: StopSignal,
}

impl VideoEvidenceJob {
    pub fn new(settings: VideoSettings, ocr: Arc<dyn OcrProvider>, frames: Arc<dyn FrameSource>) -> Self {
        Self {
            settings,
            ocr,
            frames,
            renderer: RendererKind::default(),
            reporter: ProgressReporter::silent(),
            stop: StopSignal::new(),
        }
    }

    /// 使用进程级 OCR 句柄
    pub fn with_global_ocr(
        settings: VideoSettings,
        frames: Arc<dyn FrameSource>,
    ) -> Result<Self, PipelineError> {
        let ocr = global_provider()
            .ok_or_else(|| PipelineError::Config("OCR provider not initialized".into()))?;
        Ok(Self::new(settings, ocr, frames))
    }

    pub fn with_renderer(mut self, renderer: RendererKind) -> Self {
        self.renderer = renderer;
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

    /// 执行完整流程；帧写入 `work_dir/frames`，文档写入 `work_dir/output`
    pub fn run(&self, video: &Path, work_dir: &Path) -> TaskOutcome<VideoEvidenceReport> {
        info!("🎬 VideoEvidenceJob: {}", video.display());
        match self.execute(video, work_dir) {
            Ok((report, false)) => TaskOutcome::ok(report),
            Ok((report, true)) => TaskOutcome::interrupted(Some(report)),
            Err(e) => {
                if !e.is_interruption() {
                    self.reporter.error(format!("处理过程中出错: {}", e));
                }
                TaskOutcome::from(Err::<VideoEvidenceReport, _>(e))
            }
        }
    }

    fn execute(&self, video: &Path, work_dir: &Path) -> Result<(VideoEvidenceReport, bool), PipelineError> {
        self.settings.validate()?;

        let frames_dir = work_dir.join("frames");
        let sequence = self.frames.extract_frames(
            video,
            &frames_dir,
            self.settings.frame_interval_seconds,
            &self.reporter.for_stage(Stage::ExtractingFrames),
        )?;
        if self.stop.is_stopped() {
            return Err(PipelineError::Interrupted);
        }

        let outcome = FrameDeduplicator::new(self.ocr.clone())
            .with_exclusions(&self.settings.exclusion_list)
            .with_analysis_rect(self.settings.ocr_analysis_rect)
            .with_similarity(&self.settings.similarity)
            .with_reporter(self.reporter.for_stage(Stage::OcrProcessing))
            .with_stop_signal(self.stop.clone())
            .run(&sequence.paths());

        let mut report = VideoEvidenceReport {
            frames_dir,
            extracted_frames: sequence.len(),
            kept_frames: outcome.kept,
            decisions: outcome.decisions,
            document: None,
        };
        if outcome.interrupted {
            return Ok((report, true));
        }
        if report.kept_frames.is_empty() {
            self.reporter.warn("没有保留的图片，无法生成文档。");
            return Ok((report, false));
        }

        let layout_reporter = self.reporter.for_stage(Stage::Layout);
        let ordered = apply_image_order(
            &report.kept_frames,
            self.settings.image_order.as_deref(),
            &layout_reporter,
        );
        let grid = GridSpec::new(
            self.settings.pdf_rows,
            self.settings.pdf_cols,
            self.settings.pdf_layout,
        )?;
        let document = LayoutEngine::new(self.settings.page)
            .with_reporter(layout_reporter)
            .with_stop_signal(self.stop.clone())
            .layout(&self.settings.pdf_title, &ordered, grid)?;

        let output_dir = work_dir.join("output");
        fs::create_dir_all(&output_dir).map_err(|e| PipelineError::resource(&output_dir, e))?;
        let name = document_name(&self.settings.pdf_title, "video_evidence", "video", &Local::now());

        let renderer = self
            .renderer
            .build(self.reporter.for_stage(Stage::Rendering), self.stop.clone());
        let files = renderer.render(&document, &output_dir.join(&name))?;
        self.reporter
            .info(format!("✅ 文档生成成功: {} ({})", name, renderer.name()));

        report.document = Some(RenderedDocument {
            name,
            pages: document.page_count(),
            files,
        });
        Ok((report, false))
    }
}

/// 抽取参考帧，供调用方选择 OCR 分析区域
pub fn extract_reference_frame(
    frames: &dyn FrameSource,
    video: &Path,
    output: &Path,
    frame_index: u64,
    reporter: &ProgressReporter,
) -> TaskOutcome<PathBuf> {
    let reporter = reporter.for_stage(Stage::RefFrameExtraction);
    reporter.info(format!("提取参考帧 #{}: {}", frame_index, file_name(video)));
    let result = frames.extract_reference_frame(video, output, frame_index, &reporter);
    if let Err(e) = &result {
        reporter.error(format!("参考帧提取失败: {}", e));
    }
    result.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ocr::ScriptedOcr;
    use crate::core::video::FrameSequence;
    use image::{Rgb, RgbImage};

    /// 直接在输出目录生成 N 张纯色帧
    struct StubFrameSource {
        count: usize,
    }

    impl FrameSource for StubFrameSource {
        fn extract_frames(
            &self,
            _video: &Path,
            output_dir: &Path,
            _interval_seconds: f32,
            _reporter: &ProgressReporter,
        ) -> Result<FrameSequence, PipelineError> {
            fs::create_dir_all(output_dir)?;
            for i in 1..=self.count {
                RgbImage::from_pixel(60, 120, Rgb([0, 0, i as u8]))
                    .save(output_dir.join(format!("frame_{:06}.png", i)))?;
            }
            FrameSequence::discover(output_dir)
        }

        fn extract_reference_frame(
            &self,
            _video: &Path,
            output: &Path,
            _frame_index: u64,
            _reporter: &ProgressReporter,
        ) -> Result<PathBuf, PipelineError> {
            RgbImage::new(4, 4).save(output)?;
            Ok(output.to_path_buf())
        }
    }

    fn create_test_ocr() -> ScriptedOcr {
        ScriptedOcr::new()
            .lines("frame_000001.png", &["hi", "there"])
            .lines("frame_000002.png", &["there", "how are you"])
            .lines("frame_000003.png", &["unrelated"])
            .lines("frame_000004.png", &["how are you", "fine"])
            .lines("frame_000005.png", &["fine"])
    }

    fn create_test_job(settings: VideoSettings, count: usize) -> VideoEvidenceJob {
        VideoEvidenceJob::new(
            settings,
            Arc::new(create_test_ocr()),
            Arc::new(StubFrameSource { count }),
        )
        .with_renderer(RendererKind::Manifest)
    }

    #[test]
    fn test_full_run_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let settings = VideoSettings {
            pdf_rows: 2,
            pdf_cols: 1,
            pdf_title: "chat log".into(),
            ..Default::default()
        };

        let outcome = create_test_job(settings, 5).run(Path::new("in.mp4"), dir.path());
        assert!(outcome.success, "{:?}", outcome.reason);

        let report = outcome.result.unwrap();
        assert_eq!(report.extracted_frames, 5);
        let kept: Vec<String> = report.kept_frames.iter().map(|p| file_name(p)).collect();
        assert_eq!(
            kept,
            vec!["frame_000001.png", "frame_000002.png", "frame_000004.png", "frame_000005.png"]
        );

        let document = report.document.unwrap();
        assert_eq!(document.pages, 2);
        assert!(document.name.starts_with("chat_log_video_"));
        assert!(document.files[0].is_file());
    }

    #[test]
    fn test_custom_order_reaches_layout() {
        let dir = tempfile::tempdir().unwrap();
        let settings = VideoSettings {
            image_order: Some(vec!["frame_000005.png".into(), "frame_000001.png".into()]),
            ..Default::default()
        };

        let report = create_test_job(settings, 5)
            .run(Path::new("in.mp4"), dir.path())
            .result
            .unwrap();
        let manifest = fs::read_to_string(&report.document.unwrap().files[0]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        let first = &value["elements"][0]["cells"][0]["image"]["path"];
        assert!(first.as_str().unwrap().ends_with("frame_000005.png"));
    }

    #[test]
    fn test_invalid_settings_rejected_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let settings = VideoSettings {
            pdf_rows: 0,
            ..Default::default()
        };
        let outcome = create_test_job(settings, 3).run(Path::new("in.mp4"), dir.path());
        assert!(!outcome.success);
        assert!(!dir.path().join("frames").exists());
    }

    #[test]
    fn test_no_frames_kept_has_no_document() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = create_test_job(VideoSettings::default(), 0).run(Path::new("in.mp4"), dir.path());
        assert!(outcome.success);
        let report = outcome.result.unwrap();
        assert!(report.kept_frames.is_empty());
        assert!(report.document.is_none());
    }

    #[test]
    fn test_stop_before_dedup_is_interruption() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::new();
        stop.stop();
        let outcome = create_test_job(VideoSettings::default(), 3)
            .with_stop_signal(stop)
            .run(Path::new("in.mp4"), dir.path());
        assert!(outcome.interrupted);
        assert!(!outcome.success);
    }

    #[test]
    fn test_reference_frame() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("ref.png");
        let outcome = extract_reference_frame(
            &StubFrameSource { count: 0 },
            Path::new("in.mp4"),
            &output,
            10,
            &ProgressReporter::silent(),
        );
        assert_eq!(outcome.result, Some(output));
    }

    #[test]
    fn test_page_breaks_between_pages_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = VideoSettings {
            pdf_rows: 1,
            pdf_cols: 1,
            ..Default::default()
        };
        let report = create_test_job(settings, 5)
            .run(Path::new("in.mp4"), dir.path())
            .result
            .unwrap();
        let manifest = fs::read_to_string(&report.document.unwrap().files[0]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        let breaks = value["elements"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["type"] == "page_break")
            .count();
        assert_eq!(breaks, 3);
    }
}
