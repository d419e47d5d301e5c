//! 长截图任务：切片 -> 排序 -> 排版 -> 渲染

use super::{apply_image_order, document_name, RenderedDocument, TaskOutcome};
use crate::core::config::LongImageSettings;
use crate::core::error::PipelineError;
use crate::core::layout::{GridSpec, LayoutEngine, RendererKind};
use crate::core::progress::{ProgressReporter, Stage, StopSignal};
use crate::core::slicer::{ImageSlicer, Slice, SliceConfig};
use chrono::Local;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct LongImageReport {
    pub slices_dir: PathBuf,
    pub slices: Vec<Slice>,
    pub failed_slices: usize,
    pub document: Option<RenderedDocument>,
}

pub struct LongImageJob {
    settings: LongImageSettings,
    renderer: RendererKind,
    reporter: ProgressReporter,
    stop: StopSignal,
}

impl LongImageJob {
    pub fn new(settings: LongImageSettings) -> Self {
        Self {
            settings,
            renderer: RendererKind::default(),
            reporter: ProgressReporter::silent(),
            stop: StopSignal::new(),
        }
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

    /// 切片写入 `work_dir/slices`，文档写入 `work_dir/output`
    pub fn run(&self, image: &Path, work_dir: &Path) -> TaskOutcome<LongImageReport> {
        info!("🖼️ LongImageJob: {}", image.display());
        match self.execute(image, work_dir) {
            Ok((report, false)) => TaskOutcome::ok(report),
            Ok((report, true)) => TaskOutcome::interrupted(Some(report)),
            Err(e) => {
                if !e.is_interruption() {
                    self.reporter.error(format!("长截图处理出错: {}", e));
                }
                TaskOutcome::from(Err::<LongImageReport, _>(e))
            }
        }
    }

    fn execute(&self, image: &Path, work_dir: &Path) -> Result<(LongImageReport, bool), PipelineError> {
        self.settings.validate()?;
        let config = SliceConfig::new(self.settings.slice_height, self.settings.overlap)?;

        let slices_dir = work_dir.join("slices");
        let outcome = ImageSlicer::new(config)
            .with_reporter(self.reporter.for_stage(Stage::Slicing))
            .with_stop_signal(self.stop.clone())
            .slice(image, &slices_dir)?;

        let paths = outcome.paths();
        let mut report = LongImageReport {
            slices_dir,
            slices: outcome.slices,
            failed_slices: outcome.failed,
            document: None,
        };
        if outcome.interrupted {
            return Ok((report, true));
        }
        if paths.is_empty() {
            return Err(PipelineError::Render(
                "长截图裁剪失败或未生成图片。".to_string(),
            ));
        }

        let layout_reporter = self.reporter.for_stage(Stage::Layout);
        let ordered = apply_image_order(&paths, self.settings.image_order.as_deref(), &layout_reporter);
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
        let name = document_name(&self.settings.pdf_title, "long_screenshot", "long", &Local::now());

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
