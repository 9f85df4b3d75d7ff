use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub framerate: Option<f64>,
    pub format_name: String,
}

impl MediaInfo {
    /// Pixel aspect ratio of the video stream, if known
    pub fn aspect(&self) -> Option<f32> {
        if self.width > 0 && self.height > 0 {
            Some(self.width as f32 / self.height as f32)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct FFProbeOutput {
    format: Option<FFProbeFormat>,
    streams: Option<Vec<FFProbeStream>>,
}

#[derive(Debug, Deserialize)]
struct FFProbeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

pub fn probe_file(path: &Path) -> Result<MediaInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("ffprobe failed: {}", stderr));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    let probe_output: FFProbeOutput = serde_json::from_str(&json_str)
        .map_err(|e| anyhow!("Failed to parse ffprobe output: {}", e))?;

    let mut info = MediaInfo::default();

    if let Some(format) = probe_output.format {
        info.duration = format.duration
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);
        info.format_name = format.format_name.unwrap_or_default();
    }

    if let Some(streams) = probe_output.streams {
        for stream in streams {
            if stream.codec_type.as_deref() == Some("video") {
                info.width = stream.width.unwrap_or(0);
                info.height = stream.height.unwrap_or(0);
                info.framerate = stream.r_frame_rate
                    .and_then(|r| parse_framerate(&r));
            }
        }
    }

    Ok(info)
}

fn parse_framerate(fps_str: &str) -> Option<f64> {
    let parts: Vec<&str> = fps_str.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }
    fps_str.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_framerate() {
        assert_eq!(parse_framerate("30000/1001").map(|f| (f * 100.0).round()), Some(2997.0));
        assert_eq!(parse_framerate("25/1"), Some(25.0));
        assert_eq!(parse_framerate("24"), Some(24.0));
        assert_eq!(parse_framerate("25/0"), None);
    }

    #[test]
    fn test_aspect() {
        let info = MediaInfo { width: 1920, height: 1080, ..Default::default() };
        assert!((info.aspect().unwrap() - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(MediaInfo::default().aspect(), None);
    }
}
