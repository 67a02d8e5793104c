//! Platform capture boundary: tab identifiers, the opaque stream handle,
//! and the backend trait the coordinator acquires streams through.
//!
//! The real tab-capture API lives outside this process. Everything the
//! pipeline needs from it is expressed here as a trait plus a handle, so
//! the coordinator can be tested against an injected fake backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::CaptureError;

/// Opaque platform tab identifier.
pub type TabId = u32;

/// Interleaved stereo sample block.
pub type Frame = Vec<f32>;

/// Tab lifecycle events delivered by the platform. Capture is tied to tab
/// identity, so only events naming the captured tab matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    /// The tab was closed; any capture of it must be torn down.
    Closed(TabId),
    /// The tab began loading a new page; the stream is about to end.
    NavigationStarted(TabId),
    /// The tab finished loading; capture may be resumed automatically.
    LoadComplete(TabId),
    /// Focus moved to this tab. Never affects capture of another tab.
    Activated(TabId),
}

/// A live capture stream handed off exactly once to the processing host.
///
/// Dropping the handle alone does not release the tab's audio;
/// [`StreamHandle::stop_tracks`] must be called so the captured tab's
/// playback returns to normal.
#[derive(Debug)]
pub struct StreamHandle {
    pub stream_id: String,
    pub tab_id: TabId,
    pub sample_rate: u32,
    pub frames: mpsc::Receiver<Frame>,
    live: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn new(tab_id: TabId, sample_rate: u32, frames: mpsc::Receiver<Frame>) -> Self {
        Self {
            stream_id: Uuid::new_v4().to_string(),
            tab_id,
            sample_rate,
            frames,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shared liveness flag; the producer side stops feeding frames once
    /// it flips to false.
    pub fn live_flag(&self) -> Arc<AtomicBool> {
        self.live.clone()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop every track of the underlying stream, releasing the captured
    /// tab's audio back to normal playback.
    pub fn stop_tracks(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Acquires exclusive capture streams from the platform.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire a capture stream for `tab_id`. At most one stream may be
    /// open per backend; callers release the previous one first.
    async fn acquire(&self, tab_id: TabId) -> Result<StreamHandle, CaptureError>;
}

/// Synthetic backend producing a quiet stereo test tone. Stands in for
/// real tab capture when the binary runs outside a browser.
pub struct ToneCaptureBackend {
    pub sample_rate: u32,
    pub frequency_hz: f64,
}

impl Default for ToneCaptureBackend {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frequency_hz: 440.0,
        }
    }
}

#[async_trait]
impl CaptureBackend for ToneCaptureBackend {
    async fn acquire(&self, tab_id: TabId) -> Result<StreamHandle, CaptureError> {
        let (tx, rx) = mpsc::channel::<Frame>(16);
        let handle = StreamHandle::new(tab_id, self.sample_rate, rx);
        let live = handle.live_flag();
        let sample_rate = self.sample_rate;
        let frequency = self.frequency_hz;

        tokio::spawn(async move {
            let block_frames = (sample_rate / 50) as usize; // 20 ms blocks
            let mut phase = 0.0_f64;
            let step = frequency / sample_rate as f64;
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(20));
            while live.load(Ordering::SeqCst) {
                ticker.tick().await;
                let mut frame = Vec::with_capacity(block_frames * 2);
                for _ in 0..block_frames {
                    let sample = (phase * std::f64::consts::TAU).sin() as f32 * 0.2;
                    frame.push(sample);
                    frame.push(sample);
                    phase += step;
                    if phase >= 1.0 {
                        phase -= 1.0;
                    }
                }
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Ok(handle)
    }
}
