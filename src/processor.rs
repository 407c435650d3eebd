//! Consumer thread: decodes ring slots, conditions them, feeds the active
//! recording and publishes the result for the display.

use crate::conditioner::correct_trigger_point;
use crate::context::AcquisitionContext;
use crate::error::AcquisitionError;
use crate::event::Event;
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const DISABLED_WAIT: Duration = Duration::from_millis(10);
/// Statistics queued for the display. Further stats are dropped until it
/// catches up.
pub const STATS_CAPACITY: usize = 1024;

/// Per-event statistics sent to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStats {
    pub serial: u32,
    /// Raw payload size of the event.
    pub bytes: usize,
    /// Ring buffer bytes still in use after this event.
    pub ring_level: usize,
}

pub struct EventProcessor {
    ctx: Arc<AcquisitionContext>,
    stats: Option<Sender<EventStats>>,
}

impl EventProcessor {
    pub fn new(ctx: Arc<AcquisitionContext>, stats: Option<Sender<EventStats>>) -> Self {
        Self { ctx, stats }
    }

    pub fn run(mut self) {
        debug!("processor started");
        while !self.ctx.should_stop() {
            if !self.ctx.processor.begin_cycle() {
                self.ctx.processor.wait_enabled(DISABLED_WAIT);
                continue;
            }
            if let Err(e) = self.process_once() {
                self.ctx.warn_once(&e);
            }
        }
        self.ctx.processor.finish();
        debug!("processor finished");
    }

    /// Handles at most one event. Returns whether one was available.
    pub fn process_once(&mut self) -> Result<bool, AcquisitionError> {
        let Some((mut ev, bytes)) = self.ctx.next_event(READ_TIMEOUT)? else {
            return Ok(false);
        };

        if self.ctx.take_rearm() {
            self.ctx.start()?;
        }

        if self.ctx.n_boards() > 0 && self.ctx.settings().trigger_correction {
            let trigger = self.ctx.trigger_point(ev.depth());
            let refclk = if self.ctx.is_multi_board() {
                self.ctx.settings().refclk.clone()
            } else {
                Vec::new()
            };
            correct_trigger_point(&mut ev, &trigger, &refclk, self.ctx.domino_period_ns());
        }

        self.record(&mut ev);
        self.ctx.mirror.publish(&ev);

        if let Some(tx) = &self.stats {
            let stats = EventStats {
                serial: ev.serial,
                bytes,
                ring_level: self.ctx.ring_level(),
            };
            match tx.try_send(stats) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => self.stats = None,
            }
        }
        Ok(true)
    }

    /// Appends `ev` to the active recording. The writer is borrowed from the
    /// mirror so the file write runs without holding its lock.
    fn record(&self, ev: &mut Event) {
        let Some(mut recorder) = self.ctx.mirror.take_recorder() else {
            return;
        };
        self.ctx.fill_scalers(ev);
        if let Err(e) = recorder.writer.write(ev) {
            self.ctx
                .warn_once(&format!("recording to {} aborted: {e}", recorder.path.display()));
            self.ctx.mirror.return_recorder(None);
            return;
        }
        if recorder.is_full() {
            info!(
                "recorded {} events to {}",
                recorder.writer.events(),
                recorder.path.display()
            );
            if let Err(e) = recorder.writer.finish() {
                self.ctx.warn_once(&e);
            }
            self.ctx.mirror.return_recorder(None);
            return;
        }
        if let Some(mut stale) = self.ctx.mirror.return_recorder(Some(recorder)) {
            if let Err(e) = stale.writer.finish() {
                self.ctx.warn_once(&e);
            }
        }
    }
}
