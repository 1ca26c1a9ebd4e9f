use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use animanode_core::{AnimaError, AnimaResult, FrameBuffer, PixelFormat};

use crate::encoder::{EncodeSummary, FrameEncoder};

/// H.264 settings passed through to ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    /// Output pixel format; `yuv420p` keeps the file playable everywhere.
    pub pix_fmt: String,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            pix_fmt: "yuv420p".to_string(),
        }
    }
}

struct FfmpegProcess {
    child: Child,
    stdin: ChildStdin,
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Streams raw frames to an ffmpeg child process over stdin.
///
/// The process is spawned on the first frame, once the frame size is known;
/// every later frame must have the same size and pixel format.
pub struct FfmpegEncoder {
    output_path: PathBuf,
    fps: f64,
    options: FfmpegOptions,
    process: Option<FfmpegProcess>,
    frames: u64,
    bytes_written: u64,
}

impl FfmpegEncoder {
    /// Check if FFmpeg is available on the system.
    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn new(output_path: impl Into<PathBuf>, fps: f64) -> Self {
        Self::with_options(output_path, fps, FfmpegOptions::default())
    }

    pub fn with_options(output_path: impl Into<PathBuf>, fps: f64, options: FfmpegOptions) -> Self {
        Self {
            output_path: output_path.into(),
            fps,
            options,
            process: None,
            frames: 0,
            bytes_written: 0,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Command line for a `width`x`height` input stream.
    fn command(&self, width: u32, height: u32, format: PixelFormat) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y");
        cmd.args([
            "-f",
            "rawvideo",
            "-pixel_format",
            format.ffmpeg_name(),
            "-video_size",
            &format!("{}x{}", width, height),
            "-framerate",
            &format!("{}", self.fps),
            "-i",
            "-",
        ]);
        cmd.args([
            "-c:v",
            &self.options.codec,
            "-pix_fmt",
            &self.options.pix_fmt,
            "-preset",
            &self.options.preset,
            "-crf",
            &self.options.crf.to_string(),
            "-movflags",
            "+faststart",
        ]);
        cmd.arg(&self.output_path);
        cmd
    }

    fn spawn(&self, frame: &FrameBuffer) -> AnimaResult<FfmpegProcess> {
        if !Self::is_available() {
            return Err(AnimaError::Encode(
                "ffmpeg not found in PATH. Install FFmpeg: https://ffmpeg.org/download.html"
                    .into(),
            ));
        }
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut child = self
            .command(frame.width, frame.height, frame.format)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AnimaError::Encode(format!("failed to start ffmpeg: {}", e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AnimaError::Encode("failed to open ffmpeg stdin".into()))?;

        tracing::info!(
            "Started ffmpeg for {} ({}x{} @ {}fps)",
            self.output_path.display(),
            frame.width,
            frame.height,
            self.fps
        );
        Ok(FfmpegProcess {
            child,
            stdin,
            width: frame.width,
            height: frame.height,
            format: frame.format,
        })
    }
}

/// Collect ffmpeg's stderr after a failure, for the error message.
fn stderr_of(child: Child) -> String {
    match child.wait_with_output() {
        Ok(output) => String::from_utf8_lossy(&output.stderr).into_owned(),
        Err(e) => format!("<unavailable: {}>", e),
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn encode_frame(&mut self, frame: &FrameBuffer, index: u64) -> AnimaResult<()> {
        if self.process.is_none() {
            self.process = Some(self.spawn(frame)?);
        }
        let Some(proc) = self.process.as_mut() else {
            return Err(AnimaError::Encode("ffmpeg process not running".into()));
        };
        if frame.width != proc.width || frame.height != proc.height || frame.format != proc.format
        {
            return Err(AnimaError::Encode(format!(
                "frame {} has dimensions {}x{}, expected {}x{}",
                index, frame.width, frame.height, proc.width, proc.height
            )));
        }

        let mut written = 0u64;
        let mut result = Ok(());
        for row in frame.packed_rows() {
            if let Err(e) = proc.stdin.write_all(row) {
                result = Err(e);
                break;
            }
            written += row.len() as u64;
        }
        if let Err(e) = result {
            // Surface ffmpeg's own diagnostics rather than a bare broken pipe.
            let stderr = match self.process.take() {
                Some(p) => {
                    drop(p.stdin);
                    stderr_of(p.child)
                }
                None => String::new(),
            };
            return Err(AnimaError::Encode(format!(
                "failed to write frame {} to ffmpeg: {}. FFmpeg stderr: {}",
                index, e, stderr
            )));
        }

        self.bytes_written += written;
        self.frames += 1;
        Ok(())
    }

    fn finalize(&mut self) -> AnimaResult<EncodeSummary> {
        let Some(proc) = self.process.take() else {
            tracing::warn!("No frames were sent to ffmpeg; {} not written", self.output_path.display());
            return Ok(EncodeSummary::default());
        };

        // Closing stdin signals end of input.
        drop(proc.stdin);
        let output = proc
            .child
            .wait_with_output()
            .map_err(|e| AnimaError::Encode(format!("ffmpeg process error: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnimaError::Encode(format!(
                "ffmpeg failed with status {}: {}",
                output.status, stderr
            )));
        }

        tracing::info!(
            "Encoded {} frames to {}",
            self.frames,
            self.output_path.display()
        );
        Ok(EncodeSummary {
            frames: self.frames,
            bytes_written: self.bytes_written,
            output: Some(self.output_path.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animanode_core::Color;

    #[test]
    fn test_ffmpeg_availability() {
        // Only checks that the probe does not panic.
        let _available = FfmpegEncoder::is_available();
    }

    #[test]
    fn test_finalize_without_frames() {
        let mut encoder = FfmpegEncoder::new(std::env::temp_dir().join("never.mp4"), 30.0);
        let summary = encoder.finalize().unwrap();
        assert_eq!(summary.frames, 0);
        assert!(summary.output.is_none());
    }

    #[test]
    fn test_command_line() {
        let encoder = FfmpegEncoder::new("out/video.mp4", 24.0);
        let cmd = encoder.command(320, 240, PixelFormat::Rgba8);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let joined = args.join(" ");
        assert!(joined.contains("-pixel_format rgba"));
        assert!(joined.contains("-video_size 320x240"));
        assert!(joined.contains("-framerate 24"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert_eq!(args.last().map(String::as_str), Some("out/video.mp4"));
    }

    #[test]
    fn test_encode_small_clip() {
        if !FfmpegEncoder::is_available() {
            return;
        }
        let dir = std::env::temp_dir().join(format!("animanode-ffmpeg-{}", std::process::id()));
        let path = dir.join("clip.mp4");
        let mut encoder = FfmpegEncoder::new(&path, 10.0);
        for i in 0..5 {
            let frame = FrameBuffer::solid(64, 48, &Color::rgb(i as f32 / 5.0, 0.2, 0.4));
            encoder.encode_frame(&frame, i).unwrap();
        }
        let summary = encoder.finalize().unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.bytes_written, 5 * 64 * 48 * 4);
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
