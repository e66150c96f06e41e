//! Movie writer: an FFmpeg-backed [`FrameSink`] that encodes captured
//! frames to disk.
//!
//! Raw RGBA frames are read back on the context thread and handed to a
//! writer thread over a small bounded channel. When the encoder falls
//! behind, frames are dropped rather than stalling frame propagation.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context as _, Result};
use serde::Deserialize;

use crate::context::RenderContext;
use crate::error::OutputError;
use crate::geometry::Size;
use crate::logging::spawn_pipe_thread;
use crate::sink::FrameSink;
use crate::{loge, logi, logw};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mov,
}

impl Container {
    fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mov => "mov",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    Prores,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub container: Container,
    #[serde(default)]
    pub codec: Codec,
    #[serde(default = "default_h264_crf")]
    pub h264_crf: u32,
    #[serde(default = "default_h264_preset")]
    pub h264_preset: String,
    #[serde(default = "default_pix_fmt_out")]
    pub pix_fmt_out: String,
    #[serde(default = "default_prores_profile")]
    pub prores_profile: u32,
    /// GL read-back is bottom-row-first; flip while encoding.
    #[serde(default = "default_vflip")]
    pub vflip: bool,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_fps() -> u32 {
    60
}
fn default_h264_crf() -> u32 {
    18
}
fn default_h264_preset() -> String {
    "veryfast".to_string()
}
fn default_pix_fmt_out() -> String {
    "yuv420p".to_string()
}
fn default_prores_profile() -> u32 {
    3
}
fn default_vflip() -> bool {
    true
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            enabled: false,
            out_dir: default_out_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            fps: default_fps(),
            container: Container::default(),
            codec: Codec::default(),
            h264_crf: default_h264_crf(),
            h264_preset: default_h264_preset(),
            pix_fmt_out: default_pix_fmt_out(),
            prores_profile: default_prores_profile(),
            vflip: default_vflip(),
        }
    }
}

enum WriterMsg {
    Frame(Vec<u8>),
    Stop,
}

struct ActiveSession {
    tx: SyncSender<WriterMsg>,
    stop_flag: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    child: Child,
    size: Size,
    path: PathBuf,
    frames_sent: u64,
    frames_dropped: u64,
}

#[derive(Default)]
struct LatestInput {
    tex: Option<u32>,
    size: Option<Size>,
}

/// Encodes the frames of whatever output node it is attached to.
///
/// Attach with `node.add_target(...)` like any other sink, or share one
/// handle across nodes via [`crate::output::OutputNode::set_movie_writer`]
/// so capture can start before the producer exists.
pub struct MovieWriter {
    cfg: WriterConfig,
    session: Mutex<Option<ActiveSession>>,
    latest: Mutex<LatestInput>,
}

impl MovieWriter {
    pub fn new(cfg: WriterConfig) -> Arc<Self> {
        Arc::new(MovieWriter {
            cfg,
            session: Mutex::new(None),
            latest: Mutex::new(LatestInput::default()),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.cfg
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().expect("writer lock").is_some()
    }

    /// Begin a capture session at `size`. The frame size is fixed for the
    /// session; frames at any other size are dropped with a warning.
    pub fn start(&self, size: Size) -> Result<PathBuf> {
        if !self.cfg.enabled {
            return Err(anyhow!("movie writer is disabled in config"));
        }
        if size.is_empty() {
            return Err(anyhow!("cannot record at {size}"));
        }
        let mut session = self.session.lock().expect("writer lock");
        if session.is_some() {
            return Err(anyhow!("already recording"));
        }

        fs::create_dir_all(&self.cfg.out_dir)
            .with_context(|| format!("creating {}", self.cfg.out_dir.display()))?;
        let path = self.cfg.out_dir.join(make_filename(self.cfg.container));

        let (child, stdin) = spawn_ffmpeg(&self.cfg, size, &path)?;

        // Small bound keeps memory flat; try_send drops frames when the
        // encoder is behind.
        let (tx, rx) = mpsc::sync_channel::<WriterMsg>(3);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_flag = stop_flag.clone();
        let join = thread::Builder::new()
            .name("framecast-writer".to_string())
            .spawn(move || writer_thread(rx, stdin, thread_flag))
            .context("spawning writer thread")?;

        logi!(
            "WRITER",
            "recording {} at {} {}fps",
            path.display(),
            size,
            self.cfg.fps
        );
        *session = Some(ActiveSession {
            tx,
            stop_flag,
            join: Some(join),
            child,
            size,
            path: path.clone(),
            frames_sent: 0,
            frames_dropped: 0,
        });
        Ok(path)
    }

    /// End the capture session, flush the encoder, and wait for FFmpeg to
    /// finalize the file. No-op when not recording.
    pub fn stop(&self) {
        let session = self.session.lock().expect("writer lock").take();
        let Some(session) = session else {
            return;
        };
        let ActiveSession {
            tx,
            stop_flag,
            join,
            mut child,
            path,
            frames_sent,
            frames_dropped,
            ..
        } = session;

        stop_flag.store(true, Ordering::SeqCst);
        let _ = tx.try_send(WriterMsg::Stop);
        // Dropping the sender unblocks the writer thread even when the Stop
        // message did not fit in the bounded channel.
        drop(tx);
        if let Some(join) = join {
            let _ = join.join();
        }
        match child.wait() {
            Ok(status) if status.success() => {
                logi!(
                    "WRITER",
                    "finished {} ({} frames, {} dropped)",
                    path.display(),
                    frames_sent,
                    frames_dropped
                );
            }
            Ok(status) => {
                loge!("WRITER", "ffmpeg exited with {status}");
            }
            Err(e) => {
                loge!("WRITER", "failed to wait for ffmpeg: {e}");
            }
        }
    }
}

impl Drop for MovieWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: RenderContext> FrameSink<C> for MovieWriter {
    fn set_input_texture(&self, tex: u32, _slot: usize) {
        self.latest.lock().expect("writer lock").tex = Some(tex);
    }

    fn set_input_size(&self, size: Size, _slot: usize) {
        self.latest.lock().expect("writer lock").size = Some(size);
    }

    fn new_frame_ready(&self, ctx: &C) -> Result<(), OutputError> {
        let (tex, size) = {
            let latest = self.latest.lock().expect("writer lock");
            match (latest.tex, latest.size) {
                (Some(t), Some(s)) => (t, s),
                _ => return Ok(()),
            }
        };

        let mut session = self.session.lock().expect("writer lock");
        let Some(session) = session.as_mut() else {
            return Ok(());
        };
        if size != session.size {
            logw!(
                "WRITER",
                "frame size {size} does not match session size {}; dropping",
                session.size
            );
            return Ok(());
        }

        let frame = ctx.read_pixels(tex, size)?;
        match session.tx.try_send(WriterMsg::Frame(frame)) {
            Ok(()) => session.frames_sent += 1,
            Err(TrySendError::Full(_)) => session.frames_dropped += 1,
            Err(TrySendError::Disconnected(_)) => {}
        }
        Ok(())
    }
}

fn writer_thread(
    rx: mpsc::Receiver<WriterMsg>,
    mut stdin: ChildStdin,
    stop_flag: Arc<AtomicBool>,
) {
    while let Ok(msg) = rx.recv() {
        match msg {
            WriterMsg::Frame(frame) => {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = stdin.write_all(&frame) {
                    loge!("WRITER", "pipe to ffmpeg broke: {e}");
                    break;
                }
            }
            WriterMsg::Stop => break,
        }
    }
    // Dropping stdin closes the pipe so ffmpeg flushes and exits.
    drop(stdin);
}

fn spawn_ffmpeg(cfg: &WriterConfig, size: Size, out_path: &Path) -> Result<(Child, ChildStdin)> {
    let mut cmd = Command::new(&cfg.ffmpeg_path);
    cmd.arg("-y")
        .args(["-f", "rawvideo"])
        .args(["-pix_fmt", "rgba"])
        .args(["-s", &format!("{}x{}", size.width, size.height)])
        .args(["-r", &cfg.fps.to_string()])
        .args(["-i", "-"]);
    if cfg.vflip {
        cmd.args(["-vf", "vflip"]);
    }
    match cfg.codec {
        Codec::H264 => {
            cmd.args(["-c:v", "libx264"])
                .args(["-preset", &cfg.h264_preset])
                .args(["-crf", &cfg.h264_crf.to_string()])
                .args(["-pix_fmt", &cfg.pix_fmt_out]);
        }
        Codec::Prores => {
            cmd.args(["-c:v", "prores_ks"])
                .args(["-profile:v", &cfg.prores_profile.to_string()]);
        }
    }
    cmd.arg(out_path);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {}", cfg.ffmpeg_path))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("ffmpeg stdin not captured"))?;
    if let Some(stdout) = child.stdout.take() {
        spawn_pipe_thread("ffmpeg-stdout", "FFMPEG", stdout, false);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_pipe_thread("ffmpeg-stderr", "FFMPEG", stderr, true);
    }
    Ok((child, stdin))
}

fn make_filename(container: Container) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("framecast_capture_{ts}.{}", container.extension())
}
