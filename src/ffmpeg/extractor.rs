//! Batched thumbnail extraction: one FFmpeg process per fetch streams
//! scaled raw RGBA frames over a stdout pipe, and we read them back
//! sequentially. Spawning a process per thumbnail would cost a seek per
//! frame; the fps filter amortizes one seek over the whole batch.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{anyhow, ensure, Result};
use image::RgbaImage;

use super::probe::probe_file;
use crate::filmstrip::THUMB_HEIGHT_PX;

/// A decoded frame as returned by a frame source: raw RGBA pixels plus
/// the rounded millisecond timestamp it represents.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// The video-decode resource the filmstrip loader talks to.
///
/// Implementations are blocking; callers run them under `spawn_blocking`
/// with an explicit timeout. Injected as `Arc<dyn FrameSource>` so tests
/// and platforms without FFmpeg can supply their own.
pub trait FrameSource: Send + Sync {
    /// Decode thumbnails near the given timestamps (microseconds).
    /// Returns at most one frame per requested timestamp; fewer when the
    /// clip ends early.
    fn thumbnails(&self, timestamps_us: &[i64]) -> Result<Vec<RawFrame>>;
}

/// FrameSource backed by the FFmpeg CLI.
pub struct FfmpegFrameSource {
    path: PathBuf,
    thumb_width: u32,
    thumb_height: u32,
    duration: f64,
}

impl FfmpegFrameSource {
    /// Probe the source and prepare an extractor. Fails when the file has
    /// no video stream or ffprobe is unavailable; the caller then stays on
    /// the fallback tier.
    pub async fn init(path: PathBuf) -> Result<Self> {
        let probe_path = path.clone();
        let info = tokio::task::spawn_blocking(move || probe_file(&probe_path)).await??;

        ensure!(info.width > 0 && info.height > 0, "no video stream in {:?}", path);
        ensure!(info.duration > 0.0, "zero-duration source {:?}", path);

        let aspect = info.width as f32 / info.height as f32;
        let thumb_height = THUMB_HEIGHT_PX;
        let thumb_width = ((thumb_height as f32 * aspect).round() as u32).max(2);

        Ok(Self {
            path,
            thumb_width,
            thumb_height,
            duration: info.duration,
        })
    }

    /// Aspect ratio of the thumbnails this source produces
    pub fn aspect(&self) -> f32 {
        self.thumb_width as f32 / self.thumb_height as f32
    }
}

impl FrameSource for FfmpegFrameSource {
    fn thumbnails(&self, timestamps_us: &[i64]) -> Result<Vec<RawFrame>> {
        if timestamps_us.is_empty() {
            return Ok(Vec::new());
        }

        let start = (timestamps_us[0] as f64 / 1_000_000.0).clamp(0.0, self.duration);
        let spacing = if timestamps_us.len() > 1 {
            (timestamps_us[1] - timestamps_us[0]) as f64 / 1_000_000.0
        } else {
            1.0
        };
        let spacing = if spacing > 0.0 { spacing } else { 1.0 };
        let fps = (1.0 / spacing).clamp(0.001, 60.0);

        let mut child = spawn_ffmpeg(
            &self.path,
            start,
            self.thumb_width,
            self.thumb_height,
            fps,
            timestamps_us.len(),
        )?;

        let frame_size = (self.thumb_width * self.thumb_height * 4) as usize;
        let mut frames = Vec::with_capacity(timestamps_us.len());

        for &ts_us in timestamps_us {
            match read_one_frame(&mut child, frame_size) {
                Some(data) => frames.push(RawFrame {
                    timestamp_ms: (ts_us + 500) / 1000,
                    width: self.thumb_width,
                    height: self.thumb_height,
                    data,
                }),
                None => break, // EOF - timestamps past the clip end
            }
        }

        kill_process(&mut child);
        Ok(frames)
    }
}

/// Extract a single poster frame, scaled to the thumbnail height.
/// One-shot blocking call; the caller wraps it in a timeout.
pub fn extract_poster(path: &Path, time: f64) -> Result<RgbaImage> {
    let info = probe_file(path)?;
    ensure!(info.width > 0 && info.height > 0, "no video stream in {:?}", path);

    let aspect = info.width as f32 / info.height as f32;
    let height = THUMB_HEIGHT_PX;
    let width = ((height as f32 * aspect).round() as u32).max(2);

    let output = Command::new("ffmpeg")
        .args([
            "-ss", &format!("{:.3}", time.max(0.0)),
            "-i",
        ])
        .arg(path)
        .args([
            "-vframes", "1",
            "-vf", &format!("scale={}:{}", width, height),
            "-f", "rawvideo",
            "-pix_fmt", "rgba",
            "-",
        ])
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "FFmpeg poster extraction failed: {}",
            stderr.lines().last().unwrap_or("unknown error")
        ));
    }

    let expected = (width * height * 4) as usize;
    ensure!(
        output.stdout.len() == expected,
        "unexpected poster frame size: got {} bytes, expected {}",
        output.stdout.len(),
        expected
    );

    RgbaImage::from_raw(width, height, output.stdout)
        .ok_or_else(|| anyhow!("poster frame buffer mismatch"))
}

// ---- Internal helpers ----

/// Spawn an FFmpeg process that streams scaled raw RGBA frames to stdout
fn spawn_ffmpeg(
    path: &Path,
    start_time: f64,
    width: u32,
    height: u32,
    fps: f64,
    max_frames: usize,
) -> Result<Child> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-ss", &format!("{:.3}", start_time),
        "-i",
    ])
    .arg(path)
    .args([
        "-vf", &format!("scale={}:{},fps={:.6}", width, height, fps),
        "-frames:v", &max_frames.to_string(),
        "-f", "rawvideo",
        "-pix_fmt", "rgba",
        "pipe:1",
    ])
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .stdin(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.spawn().map_err(|e| anyhow!("failed to spawn ffmpeg: {}", e))
}

/// Read exactly one frame from the process stdout.
/// Handles partial reads by looping until the buffer is full.
fn read_one_frame(proc: &mut Child, frame_size: usize) -> Option<Vec<u8>> {
    let stdout = proc.stdout.as_mut()?;
    let mut buf = vec![0u8; frame_size];
    let mut offset = 0;

    while offset < frame_size {
        match stdout.read(&mut buf[offset..]) {
            Ok(0) => return None, // EOF - process ended
            Ok(n) => offset += n,
            Err(_) => return None,
        }
    }

    Some(buf)
}

/// Kill a process cleanly (kill + wait to avoid zombies)
fn kill_process(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
