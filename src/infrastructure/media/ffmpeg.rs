use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use serde::Deserialize;
use tracing::{debug, info};

use super::{FrameSink, FrameSource, MediaError, VideoBackend};
use crate::modules::video::model::{Frame, VideoAsset};

const FALLBACK_FPS: f64 = 25.0;
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Drives the `ffprobe` and `ffmpeg` executables over raw-video pipes.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag.
    fn rotation(&self) -> i64 {
        let matrix = self.side_data_list.iter().find_map(|s| s.rotation);
        let tag = self
            .tags
            .as_ref()
            .and_then(|t| t.rotate.as_deref())
            .and_then(|r| r.trim().parse::<f64>().ok());
        matrix.or(tag).map(|deg| deg.round() as i64).unwrap_or(0)
    }
}

/// Parses ffprobe's `num/den` rate notation.
fn parse_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/').unwrap_or((raw, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn asset_from_probe(path: &Path, json: &[u8]) -> Result<VideoAsset, MediaError> {
    let out: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| MediaError::Probe(e.to_string()))?;
    let stream = out
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::Probe("no video stream".to_string()))?;

    let (coded_w, coded_h) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::Probe("missing frame dimensions".to_string())),
    };
    // The decoder autorotates, so quarter turns come out with width and height swapped.
    let (width, height) = if stream.rotation().rem_euclid(180) == 90 {
        (coded_h, coded_w)
    } else {
        (coded_w, coded_h)
    };

    // Container count first, demuxed packet count when the container has none.
    let frame_count = [stream.nb_frames, stream.nb_read_packets]
        .into_iter()
        .flatten()
        .find_map(|n| n.parse::<u64>().ok().filter(|&n| n > 0))
        .unwrap_or(0);

    Ok(VideoAsset {
        path: path.to_path_buf(),
        frame_count,
        width,
        height,
        frame_rate: stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .unwrap_or(FALLBACK_FPS),
    })
}

fn spawn(tool: &str, cmd: &mut Command) -> Result<Child, MediaError> {
    cmd.spawn().map_err(|source| MediaError::Spawn {
        tool: tool.to_string(),
        source,
    })
}

/// Reads a child's stderr on its own thread so a chatty ffmpeg never blocks
/// on a full pipe. Only the last `STDERR_TAIL_BYTES` are kept.
struct StderrTail(Option<JoinHandle<String>>);

impl StderrTail {
    fn capture(child: &mut Child) -> Self {
        let handle = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut tail = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            tail.extend_from_slice(&chunk[..n]);
                            if tail.len() > STDERR_TAIL_BYTES {
                                let excess = tail.len() - STDERR_TAIL_BYTES;
                                tail.drain(..excess);
                            }
                        }
                    }
                }
                String::from_utf8_lossy(&tail).trim().to_string()
            })
        });
        Self(handle)
    }

    /// Call once the child has exited.
    fn collect(&mut self) -> String {
        self.0
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl FfmpegBackend {
    fn spawn_reader(&self, asset: &VideoAsset) -> Result<FfmpegReader, MediaError> {
        let mut child = spawn(
            &self.ffmpeg,
            Command::new(&self.ffmpeg)
                .args(["-v", "error", "-i"])
                .arg(&asset.path)
                .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
        )?;
        let stderr = StderrTail::capture(&mut child);
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MediaError::ToolFailed {
                tool: self.ffmpeg.clone(),
                status: "no stdout".to_string(),
                stderr: String::new(),
            });
        };

        debug!("Decoder started for {}", asset.path.display());
        Ok(FfmpegReader {
            tool: self.ffmpeg.clone(),
            child,
            stdout,
            stderr,
            width: asset.width,
            height: asset.height,
            done: false,
        })
    }

    fn spawn_writer(&self, path: &Path, like: &VideoAsset) -> Result<FfmpegWriter, MediaError> {
        let fps = if like.frame_rate > 0.0 {
            like.frame_rate
        } else {
            FALLBACK_FPS
        };
        let size = format!("{}x{}", like.width, like.height);
        let rate = format!("{fps}");

        let mut child = spawn(
            &self.ffmpeg,
            Command::new(&self.ffmpeg)
                .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "gray"])
                .args(["-s", size.as_str(), "-r", rate.as_str(), "-i", "-"])
                // yuv420p needs even dimensions
                .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
                .args(["-c:v", "libx264", "-preset", "fast", "-pix_fmt", "yuv420p"])
                .arg(path)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped()),
        )?;
        let stderr = StderrTail::capture(&mut child);
        let stdin = child.stdin.take();

        debug!("Encoder started for {}", path.display());
        Ok(FfmpegWriter {
            tool: self.ffmpeg.clone(),
            child,
            stdin,
            stderr,
            width: like.width,
            height: like.height,
        })
    }
}

impl VideoBackend for FfmpegBackend {
    fn probe(&self, path: &Path) -> Result<VideoAsset, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=width,height,r_frame_rate,nb_frames,nb_read_packets:stream_tags=rotate:stream_side_data=rotation",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|source| MediaError::Spawn {
                tool: self.ffprobe.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MediaError::ToolFailed {
                tool: self.ffprobe.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let asset = asset_from_probe(path, &output.stdout)?;
        info!(
            "Probed {}: {}x{} @ {:.2} fps, {} frames",
            path.display(),
            asset.width,
            asset.height,
            asset.frame_rate,
            asset.frame_count
        );
        Ok(asset)
    }

    fn open_reader(&self, asset: &VideoAsset) -> Result<Box<dyn FrameSource>, MediaError> {
        Ok(Box::new(self.spawn_reader(asset)?))
    }

    fn open_writer(&self, path: &Path, like: &VideoAsset) -> Result<Box<dyn FrameSink>, MediaError> {
        Ok(Box::new(self.spawn_writer(path, like)?))
    }
}

struct FfmpegReader {
    tool: String,
    child: Child,
    stdout: ChildStdout,
    stderr: StderrTail,
    width: u32,
    height: u32,
    done: bool,
}

impl FrameSource for FfmpegReader {
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        if self.done {
            return Ok(None);
        }

        let expected = Frame::expected_len(self.width, self.height, 3);
        let mut buf = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected {
            match self.stdout.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }

        if filled == expected {
            return Ok(Some(Frame::new(self.width, self.height, 3, buf)));
        }

        self.done = true;
        if filled > 0 {
            return Err(MediaError::TruncatedFrame {
                expected,
                got: filled,
            });
        }

        let status = self.child.wait()?;
        if !status.success() {
            return Err(MediaError::ToolFailed {
                tool: self.tool.clone(),
                status: status.to_string(),
                stderr: self.stderr.collect(),
            });
        }
        Ok(None)
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        // Stop decoding early if the caller didn't read to the end.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct FfmpegWriter {
    tool: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: StderrTail,
    width: u32,
    height: u32,
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        if frame.width != self.width || frame.height != self.height || frame.channels != 1 {
            return Err(MediaError::FrameShape {
                want_w: self.width,
                want_h: self.height,
                got_w: frame.width,
                got_h: frame.height,
                got_c: frame.channels,
            });
        }
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(&frame.data).map_err(MediaError::from),
            None => Err(MediaError::Io(std::io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<(), MediaError> {
        // Closing stdin is what tells ffmpeg the input ended.
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            return Err(MediaError::ToolFailed {
                tool: self.tool.clone(),
                status: status.to_string(),
                stderr: self.stderr.collect(),
            });
        }
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        // Dropped without finish(): the output is abandoned.
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
