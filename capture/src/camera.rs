//! Camera access – an `ffmpeg` child streaming raw RGB frames from a V4L2
//! device, or a synthetic pattern generator for `stub://` devices.
//!
//! Either way the producer sees the same small interface: [`open`] with a
//! [`StreamConfig`], then [`Camera::next_frame`] per capture and
//! [`Camera::close`] on shutdown.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use urbansight_common::config::Config;

/// Resolution, rate and warm-up of the camera stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub warmup_frames: u32,
    pub frame_timeout: Duration,
}

impl StreamConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device: config.camera_device.clone(),
            width: config.camera_width,
            height: config.camera_height,
            fps: config.camera_fps,
            warmup_frames: config.warmup_frames,
            frame_timeout: config.frame_timeout,
        }
    }

    /// Bytes in one packed RGB8 frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// One packed RGB8 frame.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

pub trait Camera {
    /// The next frame produced after this call, or `None` when none arrived
    /// within the frame timeout.
    fn next_frame(&mut self) -> Result<Option<PixelBuffer>>;

    /// Release the device.  Further calls to `next_frame` fail.
    fn close(&mut self) {}
}

/// Open the camera and discard the warm-up frames so auto-exposure can
/// settle before the first capture is trusted.
pub fn open(config: &StreamConfig) -> Result<Box<dyn Camera>> {
    let mut camera: Box<dyn Camera> = if config.device.starts_with("stub://") {
        Box::new(SyntheticCamera::new(config.clone()))
    } else {
        Box::new(FfmpegCamera::spawn(config)?)
    };

    for i in 0..config.warmup_frames {
        if camera.next_frame()?.is_none() {
            warn!("Warm-up frame {i} timed out");
        }
    }
    info!(
        "Camera ready: {} ({}x{} @ {} fps, {} warm-up frames)",
        config.device, config.width, config.height, config.fps, config.warmup_frames
    );
    Ok(camera)
}

// ── ffmpeg / V4L2 ────────────────────────────────────────────────────────

struct FfmpegCamera {
    child: Child,
    frames: Receiver<Vec<u8>>,
    width: u32,
    height: u32,
    frame_timeout: Duration,
}

/// Arguments for an `ffmpeg` process writing `rgb24` frames of exactly
/// `width x height` to stdout.
fn ffmpeg_args(config: &StreamConfig) -> Vec<String> {
    let size = format!("{}x{}", config.width, config.height);
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend([
        "-f".into(),
        "v4l2".into(),
        "-framerate".into(),
        config.fps.to_string(),
        "-video_size".into(),
        size,
        "-i".into(),
        config.device.clone(),
        "-vf".into(),
        format!("scale={}:{}", config.width, config.height),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-f".into(),
        "rawvideo".into(),
        "-".into(),
    ]);
    args
}

impl FfmpegCamera {
    fn spawn(config: &StreamConfig) -> Result<Self> {
        let args = ffmpeg_args(config);
        info!("Spawning: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn ffmpeg for {}", config.device))?;

        // Drain stderr so device errors reach the log and the pipe never
        // fills up and blocks ffmpeg.
        if let Some(stderr) = child.stderr.take() {
            std::thread::Builder::new()
                .name("ffmpeg-stderr".into())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines() {
                        match line {
                            Ok(l) if l.is_empty() => {}
                            Ok(l) => warn!("[ffmpeg] {l}"),
                            Err(_) => break,
                        }
                    }
                    debug!("ffmpeg stderr stream ended");
                })
                .ok();
        }

        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
        let (tx, rx) = mpsc::sync_channel(1);
        let frame_len = config.frame_len();
        std::thread::Builder::new()
            .name("ffmpeg-frames".into())
            .spawn(move || read_frames(stdout, frame_len, tx))
            .context("Cannot spawn frame reader thread")?;

        info!("ffmpeg started (pid={}, device={})", child.id(), config.device);
        Ok(Self {
            child,
            frames: rx,
            width: config.width,
            height: config.height,
            frame_timeout: config.frame_timeout,
        })
    }
}

/// Split the raw stream into frames.  At most one unclaimed frame is queued;
/// frames arriving while it waits are dropped, so the queued one goes stale
/// and [`Camera::next_frame`] discards it before waiting for the next.
fn read_frames(mut stream: impl Read, frame_len: usize, tx: SyncSender<Vec<u8>>) {
    loop {
        let mut buf = vec![0u8; frame_len];
        if let Err(e) = stream.read_exact(&mut buf) {
            debug!("ffmpeg frame stream ended: {e}");
            break;
        }
        match tx.try_send(buf) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

impl Camera for FfmpegCamera {
    fn next_frame(&mut self) -> Result<Option<PixelBuffer>> {
        // Anything already queued was exposed before we were asked.
        while self.frames.try_recv().is_ok() {}

        match self.frames.recv_timeout(self.frame_timeout) {
            Ok(data) => Ok(Some(PixelBuffer {
                width: self.width,
                height: self.height,
                data,
            })),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => match self.child.try_wait() {
                Ok(Some(status)) => bail!("ffmpeg exited with {status}"),
                _ => bail!("ffmpeg frame stream closed"),
            },
        }
    }

    fn close(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!("ffmpeg camera closed");
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.close();
    }
}

// ── synthetic (stub://) ──────────────────────────────────────────────────

/// Deterministic moving gradient; every frame differs from the last.
pub struct SyntheticCamera {
    config: StreamConfig,
    frame_count: u64,
    closed: bool,
}

impl SyntheticCamera {
    pub fn new(config: StreamConfig) -> Self {
        info!("Synthetic camera on {}", config.device);
        Self {
            config,
            frame_count: 0,
            closed: false,
        }
    }
}

impl Camera for SyntheticCamera {
    fn next_frame(&mut self) -> Result<Option<PixelBuffer>> {
        if self.closed {
            bail!("camera {} is closed", self.config.device);
        }
        self.frame_count += 1;

        let (w, h) = (self.config.width, self.config.height);
        let shift = self.frame_count as u32;
        let mut data = Vec::with_capacity(self.config.frame_len());
        for y in 0..h {
            for x in 0..w {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push(((x ^ y) % 256) as u8);
            }
        }
        Ok(Some(PixelBuffer {
            width: w,
            height: h,
            data,
        }))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> StreamConfig {
        StreamConfig {
            device: "stub://test".into(),
            width: 32,
            height: 24,
            fps: 30,
            warmup_frames: 3,
            frame_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_synthetic_frames_have_stream_size() {
        let mut camera = open(&stub_config()).unwrap();
        let frame = camera.next_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(frame.data.len(), 32 * 24 * 3);
    }

    #[test]
    fn test_warmup_frames_are_discarded() {
        let config = stub_config();
        let mut direct = SyntheticCamera::new(config.clone());
        for _ in 0..config.warmup_frames {
            direct.next_frame().unwrap();
        }
        let expected = direct.next_frame().unwrap().unwrap();

        let mut opened = open(&config).unwrap();
        let first = opened.next_frame().unwrap().unwrap();
        assert_eq!(first.data, expected.data);
    }

    #[test]
    fn test_closed_camera_fails() {
        let mut camera = SyntheticCamera::new(stub_config());
        camera.next_frame().unwrap();
        camera.close();
        assert!(camera.next_frame().is_err());
        assert_eq!(camera.frame_count, 1);
    }

    #[test]
    fn test_read_frames_keeps_oldest_queued_frame() {
        let mut raw = Vec::new();
        for n in 1..=3u8 {
            raw.extend_from_slice(&[n; 6]);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        read_frames(std::io::Cursor::new(raw), 6, tx);

        assert_eq!(rx.try_recv().unwrap(), vec![1u8; 6]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ffmpeg_args() {
        let config = StreamConfig {
            device: "/dev/video2".into(),
            width: 640,
            height: 480,
            fps: 30,
            warmup_frames: 10,
            frame_timeout: Duration::from_secs(5),
        };
        let args = ffmpeg_args(&config);
        let joined = args.join(" ");
        assert!(joined.contains("-f v4l2 -framerate 30 -video_size 640x480 -i /dev/video2"));
        assert!(joined.ends_with("-pix_fmt rgb24 -f rawvideo -"));
        assert_eq!(config.frame_len(), 640 * 480 * 3);
    }
}
