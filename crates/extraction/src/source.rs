//! Key-frame source backed by the ffmpeg CLI
//!
//! The decoder is asked for I-frames only (`select='eq(pict_type,I)'`
//! with `-skip_frame nokey`), piping raw RGB24 frames over stdout.
//! Sampling on decoder-marked key frames biases candidates toward
//! scene-cut boundaries, which is what keeps downstream deduplication
//! tractable.

use frame_ingest_common::{IngestError, Resolution, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

/// Probed stream properties of a video file
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub resolution: Resolution,
    pub codec: String,
    pub frame_rate: f64,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
}

/// Parse ffprobe's fractional frame rate, e.g. `30000/1001`
fn parse_frame_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => raw.parse().ok(),
    }
}

fn parse_probe_output(json: &str) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| IngestError::Probe(format!("invalid ffprobe output: {e}")))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| IngestError::Probe("no video stream found".to_string()))?;

    let width = stream
        .width
        .ok_or_else(|| IngestError::Probe("stream is missing width".to_string()))?;
    let height = stream
        .height
        .ok_or_else(|| IngestError::Probe("stream is missing height".to_string()))?;
    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    Ok(VideoInfo {
        resolution: Resolution { width, height },
        codec: stream.codec_name.unwrap_or_default(),
        frame_rate,
    })
}

/// Probe container and codec properties via ffprobe
///
/// A probe failure is fatal for this video only.
pub fn probe_video(video_path: &Path) -> Result<VideoInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,width,height,avg_frame_rate",
            "-of",
            "json",
        ])
        .arg(video_path)
        .output()
        .map_err(|e| IngestError::Probe(format!("failed to execute ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestError::Probe(format!(
            "ffprobe failed for {}: {}",
            video_path.display(),
            stderr.trim()
        )));
    }

    let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
    debug!(
        codec = %info.codec,
        resolution = %info.resolution,
        frame_rate = info.frame_rate,
        "probed {}",
        video_path.display()
    );
    Ok(info)
}

/// Lazy, finite, non-restartable sequence of decoded key frames
///
/// Yields `(RgbImage, frame_number)` pairs in decode order with
/// strictly increasing frame numbers.
pub struct KeyFrameSource {
    child: Child,
    stdout: ChildStdout,
    resolution: Resolution,
    frame_size: usize,
    next_frame_number: u64,
    finished: bool,
}

impl KeyFrameSource {
    /// Spawn the decoder for the given video
    pub fn open(video_path: &Path, info: &VideoInfo) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-skip_frame", "nokey", "-i"])
            .arg(video_path)
            .args([
                "-vf",
                "select=eq(pict_type\\,I)",
                "-vsync",
                "vfr",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IngestError::Decode(format!("failed to execute ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IngestError::Decode("ffmpeg stdout was not captured".to_string()))?;

        let frame_size = info.resolution.width as usize * info.resolution.height as usize * 3;
        Ok(Self {
            child,
            stdout,
            resolution: info.resolution,
            frame_size,
            next_frame_number: 0,
            finished: false,
        })
    }

    /// Read exactly one raw frame; `Ok(None)` at end of stream
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.frame_size];
        let mut filled = 0;
        while filled < self.frame_size {
            let read = self.stdout.read(&mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < self.frame_size {
            // Truncated tail frame; stop here rather than emit garbage
            warn!(
                expected = self.frame_size,
                got = filled,
                "truncated frame at end of stream"
            );
            return Ok(None);
        }
        Ok(Some(buf))
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let status = self
            .child
            .wait()
            .map_err(|e| IngestError::Decode(format!("failed to wait for ffmpeg: {e}")))?;
        if !status.success() && self.next_frame_number == 0 {
            let mut stderr = String::new();
            if let Some(mut pipe) = self.child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(IngestError::Decode(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Iterator for KeyFrameSource {
    type Item = Result<(image::RgbImage, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(data)) => {
                let Some(image) = image::RgbImage::from_vec(
                    self.resolution.width,
                    self.resolution.height,
                    data,
                ) else {
                    self.finished = true;
                    return Some(Err(IngestError::Decode(
                        "invalid RGB24 frame data".to_string(),
                    )));
                };
                let frame_number = self.next_frame_number;
                self.next_frame_number += 1;
                Some(Ok((image, frame_number)))
            }
            Ok(None) => match self.finish() {
                Ok(()) => None,
                Err(e) => Some(Err(e)),
            },
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for KeyFrameSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
