//! 视频帧序列：目录发现 + ffmpeg 抽帧

use crate::core::error::PipelineError;
use crate::core::progress::ProgressReporter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

static FRAME_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^frame_(\d+)\.(png|jpe?g|bmp|webp)$").expect("frame name pattern")
});

/// 抽帧文件名格式（序号 6 位补零）
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// 帧引用：文件名中嵌入的序号 + 路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub ordinal: u64,
    pub path: PathBuf,
}

/// 按序号排序的帧序列
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    frames: Vec<FrameRef>,
}

impl FrameSequence {
    /// 扫描目录中的 `frame_<n>.<ext>`，按数值序号排序
    pub fn discover(dir: &Path) -> Result<Self, PipelineError> {
        let entries = fs::read_dir(dir).map_err(|e| PipelineError::resource(dir, e))?;

        let mut frames: Vec<FrameRef> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let name = entry.file_name();
                let ordinal = parse_ordinal(&name.to_string_lossy())?;
                Some(FrameRef {
                    ordinal,
                    path: entry.path(),
                })
            })
            .collect();

        frames.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.path.cmp(&b.path)));
        Ok(Self { frames })
    }

    pub fn frames(&self) -> &[FrameRef] {
        &self.frames
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.frames.iter().map(|f| f.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

pub fn parse_ordinal(file_name: &str) -> Option<u64> {
    FRAME_NAME
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// 抽帧协作方接口
pub trait FrameSource: Send + Sync {
    /// 按时间间隔抽帧到 `output_dir`
    fn extract_frames(
        &self,
        video: &Path,
        output_dir: &Path,
        interval_seconds: f32,
        reporter: &ProgressReporter,
    ) -> Result<FrameSequence, PipelineError>;

    /// 抽取单帧（用于选取 OCR 分析区域）
    fn extract_reference_frame(
        &self,
        video: &Path,
        output: &Path,
        frame_index: u64,
        reporter: &ProgressReporter,
    ) -> Result<PathBuf, PipelineError>;
}

pub struct FfmpegFrameExtractor {
    binary: PathBuf,
}

impl FfmpegFrameExtractor {
    /// `FFMPEG_PATH` 优先，否则在 PATH 中查找 ffmpeg
    pub fn new() -> Result<Self, PipelineError> {
        let binary = match env::var_os("FFMPEG_PATH") {
            Some(path) => PathBuf::from(path),
            None => which::which("ffmpeg").map_err(|e| PipelineError::resource("ffmpeg", e))?,
        };
        Ok(Self { binary })
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn frame_extraction_args(video: &Path, output_dir: &Path, interval_seconds: f32) -> Vec<OsString> {
        let fps = 1.0 / interval_seconds.max(0.01);
        vec![
            "-y".into(),
            "-i".into(),
            video.as_os_str().to_owned(),
            "-vf".into(),
            format!("fps={}", fps).into(),
            "-q:v".into(),
            "2".into(),
            output_dir.join(FRAME_PATTERN).into_os_string(),
        ]
    }

    pub fn reference_frame_args(video: &Path, output: &Path, frame_index: u64) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-i".into(),
            video.as_os_str().to_owned(),
            "-vf".into(),
            format!("select='eq(n,{})'", frame_index).into(),
            "-vsync".into(),
            "vfr".into(),
            "-frames:v".into(),
            "1".into(),
            "-q:v".into(),
            "2".into(),
            output.as_os_str().to_owned(),
        ]
    }

    fn run(&self, args: &[OsString], reporter: &ProgressReporter) -> Result<(), PipelineError> {
        reporter.debug(format!(
            "Executing: {} {}",
            self.binary.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        ));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| PipelineError::resource(&self.binary, e))?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            let line = line.trim();
            if !line.is_empty() {
                reporter.debug(format!("[FFmpeg ERR]: {}", line));
            }
        }

        if !output.status.success() {
            return Err(PipelineError::FrameExtraction(format!(
                "ffmpeg exited with {}",
                output.status
            )));
        }
        Ok(())
    }

    /// 删除目录中残留的旧帧
    fn remove_stale_frames(output_dir: &Path, reporter: &ProgressReporter) -> usize {
        let Ok(entries) = fs::read_dir(output_dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            if parse_ordinal(&entry.file_name().to_string_lossy()).is_none() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => reporter.warn(format!(
                    "无法删除旧帧 {}: {}",
                    entry.file_name().to_string_lossy(),
                    e
                )),
            }
        }
        removed
    }
}

impl FrameSource for FfmpegFrameExtractor {
    fn extract_frames(
        &self,
        video: &Path,
        output_dir: &Path,
        interval_seconds: f32,
        reporter: &ProgressReporter,
    ) -> Result<FrameSequence, PipelineError> {
        if !video.is_file() {
            return Err(PipelineError::resource(video, "input video not found"));
        }
        fs::create_dir_all(output_dir).map_err(|e| PipelineError::resource(output_dir, e))?;

        let removed = Self::remove_stale_frames(output_dir, reporter);
        if removed > 0 {
            reporter.info(format!("已清理 {} 个旧帧文件。", removed));
        }

        reporter.info(format!(
            "🎬 提取帧: {} (间隔 {}s)",
            video.display(),
            interval_seconds
        ));
        self.run(
            &Self::frame_extraction_args(video, output_dir, interval_seconds),
            reporter,
        )?;

        let sequence = FrameSequence::discover(output_dir)?;
        reporter.info(format!("帧提取完成，共 {} 帧。", sequence.len()));
        Ok(sequence)
    }

    fn extract_reference_frame(
        &self,
        video: &Path,
        output: &Path,
        frame_index: u64,
        reporter: &ProgressReporter,
    ) -> Result<PathBuf, PipelineError> {
        if !video.is_file() {
            return Err(PipelineError::resource(video, "input video not found"));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::resource(parent, e))?;
        }

        self.run(&Self::reference_frame_args(video, output, frame_index), reporter)?;

        if !output.is_file() {
            return Err(PipelineError::FrameExtraction(format!(
                "reference frame {} was not produced",
                frame_index
            )));
        }
        reporter.info("参考帧提取成功。");
        Ok(output.to_path_buf())
    }
}
