//! `evidence` CLI - 把录屏或长截图整理成分页证据文档

use clap::{Parser, Subcommand, ValueEnum};
use evidence_lib::api::{LongImageJob, TaskOutcome, VideoEvidenceJob};
use evidence_lib::core::config::{
    load_settings, AnalysisRect, LayoutOrder, LongImageSettings, SimilarityPolicy, VideoSettings,
};
use evidence_lib::core::error::PipelineError;
use evidence_lib::core::layout::RendererKind;
use evidence_lib::core::ocr::{install_global_provider, TesseractOcr};
use evidence_lib::core::progress::{channel, LogLevel, ProgressEvent, DEFAULT_CHANNEL_CAPACITY};
use evidence_lib::core::video::FfmpegFrameExtractor;
use evidence_lib::init_logging;
use log::{error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "evidence")]
#[command(about = "Turn screen recordings and long screenshots into paginated evidence documents")]
#[command(version)]
struct Cli {
    /// Output directory (frames, slices and documents are written below it)
    #[arg(short, long, global = true, default_value = "evidence_out")]
    output: PathBuf,

    /// Settings file (JSON5 or JSON); flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Document renderer
    #[arg(short, long, global = true, value_enum, default_value = "pdf")]
    renderer: RendererArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract frames from a video, drop redundant ones via OCR and lay out the rest
    Video {
        /// Input video file
        video: PathBuf,

        /// Seconds between extracted frames
        #[arg(short, long)]
        interval: Option<f32>,

        /// Ignore recognized lines equal to this text (repeatable)
        #[arg(short = 'x', long = "exclude")]
        exclusions: Vec<String>,

        /// OCR analysis rectangle "x,y,width,height" in frame pixels
        #[arg(long)]
        rect: Option<String>,

        /// Fuzzy similarity instead of exact line overlap
        #[arg(long)]
        fuzzy: bool,

        /// OCR language passed to tesseract
        #[arg(long, default_value = "chi_sim")]
        lang: String,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Slice a long screenshot into overlapping strips and lay them out
    LongImage {
        /// Input image file
        image: PathBuf,

        /// Strip height in pixels
        #[arg(long)]
        slice_height: Option<u32>,

        /// Rows shared by consecutive strips
        #[arg(long)]
        overlap: Option<u32>,

        #[command(flatten)]
        layout: LayoutArgs,
    },
}

#[derive(clap::Args)]
struct LayoutArgs {
    /// Rows per page
    #[arg(long)]
    rows: Option<u32>,

    /// Columns per page
    #[arg(long)]
    cols: Option<u32>,

    /// Traversal order: grid (row-major) or column (column-major)
    #[arg(long)]
    layout: Option<String>,

    /// Document title
    #[arg(long)]
    title: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum RendererArg {
    Pdf,
    Raster,
    Manifest,
}

impl From<RendererArg> for RendererKind {
    fn from(value: RendererArg) -> Self {
        match value {
            RendererArg::Pdf => RendererKind::Pdf,
            RendererArg::Raster => RendererKind::Raster,
            RendererArg::Manifest => RendererKind::Manifest,
        }
    }
}

fn load_or_default<T>(path: Option<&Path>) -> Result<T, PipelineError>
where
    T: Default + for<'de> serde::Deserialize<'de>,
{
    match path {
        Some(path) => load_settings(path),
        None => Ok(T::default()),
    }
}

fn apply_layout_args(
    args: &LayoutArgs,
    rows: &mut u32,
    cols: &mut u32,
    order: &mut LayoutOrder,
    title: &mut String,
) {
    if let Some(r) = args.rows {
        *rows = r;
    }
    if let Some(c) = args.cols {
        *cols = c;
    }
    if let Some(name) = &args.layout {
        *order = LayoutOrder::from(name.clone());
    }
    if let Some(t) = &args.title {
        *title = t.clone();
    }
}

/// 工作线程执行任务，主线程消费进度事件
fn run_with_progress<T, F>(job: F) -> TaskOutcome<T>
where
    T: Send + 'static,
    F: FnOnce(evidence_lib::core::progress::ProgressReporter) -> TaskOutcome<T> + Send + 'static,
{
    let (reporter, rx) = channel(DEFAULT_CHANNEL_CAPACITY);
    let worker = thread::spawn(move || job(reporter));

    // 所有发送端随工作线程结束而释放，迭代随之结束
    // 日志已经同步写入 log，这里只显示进度和错误
    for event in rx {
        match &event {
            ProgressEvent::Progress { .. } => {
                if let Some(percent) = event.percent() {
                    eprintln!("[{:?}] {:>3}%", event.stage(), percent);
                }
            }
            ProgressEvent::Log {
                level: LogLevel::Error,
                message,
                stage,
            } => eprintln!("[{:?}] ❌ {}", stage, message),
            ProgressEvent::Log { .. } => {}
        }
    }

    worker
        .join()
        .unwrap_or_else(|_| TaskOutcome::failed("worker thread panicked"))
}

fn print_outcome<T: Serialize>(outcome: &TaskOutcome<T>) -> ExitCode {
    match serde_json::to_string_pretty(outcome) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("failed to serialize outcome: {}", e),
    }
    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(cli: Cli) -> Result<ExitCode, PipelineError> {
    let renderer = RendererKind::from(cli.renderer);
    let output = cli.output.clone();

    match cli.command {
        Commands::Video {
            video,
            interval,
            exclusions,
            rect,
            fuzzy,
            lang,
            layout,
        } => {
            let mut settings: VideoSettings = load_or_default(cli.config.as_deref())?;
            if let Some(i) = interval {
                settings.frame_interval_seconds = i;
            }
            settings.exclusion_list.extend(exclusions);
            if let Some(rect) = rect {
                settings.ocr_analysis_rect = Some(AnalysisRect::parse(&rect)?);
            }
            if fuzzy {
                settings.similarity.policy = SimilarityPolicy::Fuzzy;
            }
            apply_layout_args(
                &layout,
                &mut settings.pdf_rows,
                &mut settings.pdf_cols,
                &mut settings.pdf_layout,
                &mut settings.pdf_title,
            );
            settings.validate()?;

            install_global_provider(Arc::new(TesseractOcr::new(&lang)?))?;
            let frames = Arc::new(FfmpegFrameExtractor::new()?);
            let job = VideoEvidenceJob::with_global_ocr(settings, frames)?.with_renderer(renderer);

            let outcome = run_with_progress(move |reporter| {
                job.with_reporter(reporter).run(&video, &output)
            });
            Ok(print_outcome(&outcome))
        }
        Commands::LongImage {
            image,
            slice_height,
            overlap,
            layout,
        } => {
            let mut settings: LongImageSettings = load_or_default(cli.config.as_deref())?;
            if let Some(h) = slice_height {
                settings.slice_height = h;
            }
            if let Some(o) = overlap {
                settings.overlap = o;
            }
            apply_layout_args(
                &layout,
                &mut settings.pdf_rows,
                &mut settings.pdf_cols,
                &mut settings.pdf_layout,
                &mut settings.pdf_title,
            );
            settings.validate()?;

            let job = LongImageJob::new(settings).with_renderer(renderer);
            let outcome = run_with_progress(move |reporter| {
                job.with_reporter(reporter).run(&image, &output)
            });
            Ok(print_outcome(&outcome))
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    info!("🚀 evidence {}", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}
