//! Seekable video decoding through the ffmpeg CLI.

use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{0} not found in PATH")]
    ToolMissing(&'static str),
    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: &'static str, stderr: String },
    #[error("Could not read frame count: {0}")]
    FrameCount(String),
    #[error("Frame {0} is out of range")]
    FrameOutOfRange(u64),
    #[error("Invalid frame data: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Random access to the frames of a pre-recorded video file.
pub trait VideoDecoder: Send + Sync {
    fn frame_count(&self, path: &Path) -> Result<u64, DecodeError>;

    /// Decodes the frame at the 0-based `index`.
    fn read_frame(&self, path: &Path, index: u64) -> Result<RgbImage, DecodeError>;
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegDecoder;

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Runs `tool -v error <before> <path> <after>` and returns stdout.
    fn run(
        tool: &'static str,
        before: &[&str],
        path: &Path,
        after: &[&str],
    ) -> Result<Vec<u8>, DecodeError> {
        let mut command = Command::new(tool);
        command
            .args(["-v", "error"])
            .args(before)
            .arg(path)
            .args(after)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = command.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => DecodeError::ToolMissing(tool),
            _ => DecodeError::Io(e),
        })?;

        if !output.status.success() {
            return Err(DecodeError::ToolFailed {
                tool,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

fn parse_frame_count(stdout: &[u8]) -> Result<u64, DecodeError> {
    let text = String::from_utf8_lossy(stdout);
    let first = text
        .lines()
        .map(|line| line.trim().trim_end_matches(','))
        .find(|line| !line.is_empty())
        .ok_or_else(|| DecodeError::FrameCount("ffprobe printed nothing".into()))?;
    first
        .parse::<u64>()
        .map_err(|_| DecodeError::FrameCount(format!("unexpected ffprobe output {:?}", first)))
}

impl VideoDecoder for FfmpegDecoder {
    fn frame_count(&self, path: &Path) -> Result<u64, DecodeError> {
        let stdout = Self::run(
            "ffprobe",
            &[
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=nb_read_packets",
                "-of",
                "csv=p=0",
            ],
            path,
            &[],
        )?;
        parse_frame_count(&stdout)
    }

    fn read_frame(&self, path: &Path, index: u64) -> Result<RgbImage, DecodeError> {
        let select = format!("select=eq(n\\,{})", index);
        let stdout = Self::run(
            "ffmpeg",
            &["-i"],
            path,
            &[
                "-vf",
                &select,
                "-vsync",
                "0",
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "png",
                "-",
            ],
        )?;
        if stdout.is_empty() {
            return Err(DecodeError::FrameOutOfRange(index));
        }
        Ok(image::load_from_memory(&stdout)?.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_count() {
        assert_eq!(parse_frame_count(b"150\n").unwrap(), 150);
        assert_eq!(parse_frame_count(b"\n 42,\n").unwrap(), 42);
        assert!(parse_frame_count(b"N/A\n").is_err());
        assert!(parse_frame_count(b"").is_err());
    }
}
