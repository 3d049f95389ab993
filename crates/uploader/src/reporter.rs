//! Progress accounting and event delivery shared by all workers.

use std::sync::Arc;

use chunkvault_transfer::{ProgressCounter, SpeedCalculator};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::UploadEvent;

/// Progress counter, speed window and event channel of one upload.
///
/// Cheap to clone; every clone feeds the same counter and channel.
#[derive(Clone)]
pub struct Reporter {
    events: mpsc::Sender<UploadEvent>,
    counter: ProgressCounter,
    speed: Arc<SpeedCalculator>,
}

impl Reporter {
    pub fn new(events: mpsc::Sender<UploadEvent>, total: u64) -> Self {
        Self {
            events,
            counter: ProgressCounter::new(total),
            speed: Arc::new(SpeedCalculator::new(None, None)),
        }
    }

    /// Sends an event without waiting. Events are dropped when nobody
    /// drains the channel fast enough; the report still carries the outcome.
    pub fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("upload event dropped: {e}");
        }
    }

    /// Counts bytes the store already held.
    pub fn skip(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.counter.add(bytes);
        self.emit(UploadEvent::Resumed { bytes });
        self.emit_progress(self.counter.uploaded());
    }

    /// Counts bytes the store acknowledged. Returns the new uploaded total.
    pub fn advance(&self, bytes: u64) -> u64 {
        let uploaded = self.counter.add(bytes);
        self.speed.add_sample(bytes);
        self.emit_progress(uploaded);
        uploaded
    }

    /// Rewinds the counter to zero before a stream attempt renegotiates.
    ///
    /// Only the clone this is called on sees the fresh counter.
    pub fn restart(&mut self) {
        self.counter = ProgressCounter::new(self.counter.total());
        self.speed.reset();
    }

    pub fn uploaded(&self) -> u64 {
        self.counter.uploaded()
    }

    fn emit_progress(&self, uploaded: u64) {
        let total = self.counter.total();
        debug!(
            uploaded,
            total,
            percent = self.counter.fraction() * 100.0,
            "upload progress"
        );
        self.emit(UploadEvent::Progress {
            uploaded,
            total,
            bytes_per_second: self.speed.bytes_per_second(),
            eta: self.speed.eta(total.saturating_sub(uploaded)),
        });
    }
}
