//! Camera acquisition and code decoding.
//!
//! A [`CaptureAdapter`] hands out at most one [`CaptureSession`] at a time. The
//! session owns the frame feed through a background decode task; releasing or
//! dropping it tears the feed down.

use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

/// Default pacing between decoded frames, roughly ten per second.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);
const PAYLOAD_BUFFER: usize = 16;

/// 8-bit greyscale frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
}

impl Frame {
    pub fn from_image(image: &image::DynamicImage) -> Self {
        let luma = image.to_luma8();
        Self {
            width: luma.width(),
            height: luma.height(),
            luma: luma.into_raw(),
        }
    }

    fn is_well_formed(&self) -> bool {
        self.luma.len() == self.width as usize * self.height as usize
    }
}

#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Opens the hardware stream. Dropping the returned feed must release it.
    async fn open(&self) -> ClientResult<Box<dyn FrameFeed>>;
}

#[async_trait]
pub trait FrameFeed: Send {
    /// Next frame, or `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Frame>;
    async fn stop(&mut self);
}

pub trait CodeDecoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Vec<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QrDecoder;

impl CodeDecoder for QrDecoder {
    fn decode(&self, frame: &Frame) -> Vec<String> {
        if !frame.is_well_formed() {
            warn!(
                width = frame.width,
                height = frame.height,
                len = frame.luma.len(),
                "skipping malformed frame"
            );
            return Vec::new();
        }
        let width = frame.width as usize;
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, frame.height as usize, |x, y| {
                frame.luma[y * width + x]
            });
        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| match grid.decode() {
                Ok((_, content)) => Some(content),
                Err(error) => {
                    debug!(?error, "qr grid did not decode");
                    None
                }
            })
            .collect()
    }
}

/// Camera backed by still images on disk. Each open loads every image, so a
/// missing or unreadable file fails the acquisition rather than the stream.
#[derive(Debug, Clone)]
pub struct ImageFileCamera {
    paths: Vec<PathBuf>,
    repeat: bool,
}

impl ImageFileCamera {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            repeat: false,
        }
    }

    /// Keep cycling through the images, like a camera aimed at a still scene.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }
}

#[async_trait]
impl CameraSource for ImageFileCamera {
    async fn open(&self) -> ClientResult<Box<dyn FrameFeed>> {
        if self.paths.is_empty() {
            return Err(ClientError::NoDevice);
        }
        let mut frames = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let bytes = tokio::fs::read(path).await.map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => ClientError::NoDevice,
                io::ErrorKind::PermissionDenied => ClientError::PermissionDenied,
                _ => ClientError::Unsupported(format!("{}: {error}", path.display())),
            })?;
            let image = image::load_from_memory(&bytes).map_err(|error| {
                ClientError::Unsupported(format!("{}: {error}", path.display()))
            })?;
            frames.push(Frame::from_image(&image));
        }
        info!(frames = frames.len(), repeat = self.repeat, "image camera opened");
        Ok(Box::new(StillFeed {
            frames,
            cursor: 0,
            repeat: self.repeat,
            stopped: false,
        }))
    }
}

struct StillFeed {
    frames: Vec<Frame>,
    cursor: usize,
    repeat: bool,
    stopped: bool,
}

#[async_trait]
impl FrameFeed for StillFeed {
    async fn next_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        if self.cursor >= self.frames.len() {
            if !self.repeat || self.frames.is_empty() {
                return None;
            }
            self.cursor = 0;
        }
        let frame = self.frames[self.cursor].clone();
        self.cursor += 1;
        Some(frame)
    }

    async fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Cleared when the owning session (or a pending acquire) goes away.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CaptureAdapter {
    source: Arc<dyn CameraSource>,
    decoder: Arc<dyn CodeDecoder>,
    frame_interval: Duration,
    active: Arc<AtomicBool>,
    authenticated: AtomicBool,
}

impl CaptureAdapter {
    pub fn new(source: Arc<dyn CameraSource>, decoder: Arc<dyn CodeDecoder>) -> Self {
        Self {
            source,
            decoder,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            active: Arc::new(AtomicBool::new(false)),
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether a scan on this adapter has already produced a login.
    pub fn has_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Latches the adapter as spent. Returns `false` if it already was.
    pub fn mark_authenticated(&self) -> bool {
        !self.authenticated.swap(true, Ordering::AcqRel)
    }

    /// Returns `Ok(None)` when a session is already being acquired or held.
    pub async fn acquire(&self) -> ClientResult<Option<CaptureSession>> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("capture already active; ignoring acquire");
            return Ok(None);
        }
        let in_flight = InFlight(self.active.clone());

        let feed = self.source.open().await.map_err(|error| {
            warn!(%error, "camera acquisition failed");
            error
        })?;

        let (payload_tx, payloads) = mpsc::channel(PAYLOAD_BUFFER);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let suppressed = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(decode_loop(
            feed,
            self.decoder.clone(),
            self.frame_interval,
            payload_tx,
            shutdown_rx,
            suppressed.clone(),
        ));
        info!("capture session started");

        Ok(Some(CaptureSession {
            payloads,
            shutdown,
            task: Some(task),
            suppressed,
            _in_flight: in_flight,
        }))
    }
}

async fn decode_loop(
    mut feed: Box<dyn FrameFeed>,
    decoder: Arc<dyn CodeDecoder>,
    frame_interval: Duration,
    payloads: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
    suppressed: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'frames: loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if suppressed.load(Ordering::Acquire) {
            break;
        }
        let Some(frame) = feed.next_frame().await else {
            debug!("frame feed ended");
            break;
        };
        for payload in decoder.decode(&frame) {
            if suppressed.load(Ordering::Acquire) || payloads.send(payload).await.is_err() {
                break 'frames;
            }
        }
    }
    feed.stop().await;
}

/// Live acquisition. Payloads stop flowing after [`CaptureSession::suppress`]
/// and never resume once the feed has stopped.
pub struct CaptureSession {
    payloads: mpsc::Receiver<String>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    suppressed: Arc<AtomicBool>,
    _in_flight: InFlight,
}

impl CaptureSession {
    pub async fn next_payload(&mut self) -> Option<String> {
        if self.is_suppressed() {
            return None;
        }
        let payload = self.payloads.recv().await?;
        (!self.is_suppressed()).then_some(payload)
    }

    pub fn suppress(&self) {
        self.suppressed.store(true, Ordering::Release);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::Acquire)
    }

    /// Discards payloads decoded while the caller was busy; returns how many.
    pub fn drain_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.payloads.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Stops the feed and waits for the decode task to finish.
    pub async fn release(mut self) {
        self.suppress();
        let _ = self.shutdown.send(true);
        self.payloads.close();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                warn!(%error, "decode task ended abnormally");
            }
        }
        info!("capture session released");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.suppress();
            task.abort();
            debug!("capture session dropped without release; decode task aborted");
        }
    }
}

#[cfg(test)]
#[path = "tests/capture_tests.rs"]
mod tests;
