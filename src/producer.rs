//! Polling thread moving triggered events from the boards into the ring.

use crate::context::{AcquisitionContext, IDLE_AFTER};
use crate::error::AcquisitionError;
use crate::event::{SlotWriter, Timestamp};
use crate::ring_buffer::{RingProducer, WriteSlot};
use log::{debug, trace};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CLAIM_TIMEOUT: Duration = Duration::from_millis(100);
const DISABLED_WAIT: Duration = Duration::from_millis(10);
/// Idle polls between short sleeps.
const IDLE_POLLS: u32 = 100;
const IDLE_SLEEP: Duration = Duration::from_millis(10);
/// While auto-triggering, pause this long every `AUTO_PAUSE_EVERY` so a real
/// trigger gets a chance.
const AUTO_PAUSE: Duration = Duration::from_millis(30);
const AUTO_PAUSE_EVERY: Duration = Duration::from_millis(300);

pub struct AcquisitionProducer {
    ctx: Arc<AcquisitionContext>,
    ring: RingProducer,
    idle_polls: u32,
    auto_triggered: bool,
    last_pause: Instant,
}

impl AcquisitionProducer {
    pub fn new(ctx: Arc<AcquisitionContext>, ring: RingProducer) -> Self {
        Self {
            ctx,
            ring,
            idle_polls: 0,
            auto_triggered: false,
            last_pause: Instant::now(),
        }
    }

    /// Thread body. Returns once the context's stop flag is set.
    pub fn run(mut self) {
        debug!("producer started");
        while !self.ctx.should_stop() {
            if let Err(e) = self.poll_once() {
                self.ctx.warn_once(&e);
                thread::sleep(DISABLED_WAIT);
            }
        }
        self.ctx.producer.finish();
        debug!("producer finished");
    }

    /// One loop iteration. Returns whether an event was committed.
    pub fn poll_once(&mut self) -> Result<bool, AcquisitionError> {
        let ctx = Arc::clone(&self.ctx);
        if ctx.n_boards() == 0 {
            thread::sleep(DISABLED_WAIT);
            return Ok(false);
        }
        if !ctx.producer.begin_cycle() {
            ctx.producer.wait_enabled(DISABLED_WAIT);
            return Ok(false);
        }

        if ctx.has_triggered() {
            self.idle_polls = 0;
            if !self.auto_triggered {
                ctx.mark_real_trigger();
            }
            self.auto_triggered = false;

            loop {
                if ctx.should_stop() || !ctx.producer.is_enabled() {
                    trace!("event abandoned while waiting for ring space");
                    return Ok(false);
                }
                match self.ring.claim_write(CLAIM_TIMEOUT) {
                    Ok(slot) => return fill_slot(&ctx, slot),
                    Err(_) => trace!("ring buffer full, {} bytes used", self.ring.level()),
                }
            }
        }

        let auto = ctx.settings().auto_trigger;
        if auto && ctx.is_running() && ctx.since_last_trigger() > IDLE_AFTER {
            if self.last_pause.elapsed() > AUTO_PAUSE_EVERY {
                thread::sleep(AUTO_PAUSE);
                self.last_pause = Instant::now();
            }
            if !ctx.has_triggered() {
                ctx.single_trigger()?;
                self.auto_triggered = true;
            }
        } else {
            self.idle_polls += 1;
            if self.idle_polls >= IDLE_POLLS {
                self.idle_polls = 0;
                thread::sleep(IDLE_SLEEP);
            } else {
                thread::yield_now();
            }
        }
        Ok(false)
    }
}

/// Reads out the boards into `slot`, re-arms them slaves first and commits.
/// The slot is abandoned if a slave board has not triggered yet.
fn fill_slot(ctx: &AcquisitionContext, mut slot: WriteSlot<'_>) -> Result<bool, AcquisitionError> {
    let multi = ctx.is_multi_board();
    let indices = ctx.active_boards();

    let mut w = SlotWriter::new(slot.buf());
    w.put_u16(indices.len() as u16);
    let mut skipped = false;
    for (k, &index) in indices.iter().enumerate() {
        let Some(mut board) = ctx.board(index) else {
            continue;
        };
        if multi && k > 0 && board.is_busy() {
            skipped = true;
            break;
        }
        w.put_u16(index as u16);
        w.put_u16(board.serial());
        let header = w.position();
        w.put_u16(0);
        w.put_u16(0);
        w.put_u32(0);
        let n = board.transfer_waves(w.remaining())?;
        w.advance(n);
        w.patch_u16(header, board.stop_cell());
        w.patch_u16(header + 2, board.stop_wsr());
        w.patch_u32(header + 4, n as u32);
    }

    if ctx.is_running() {
        for &index in indices.iter().rev() {
            if let Some(mut board) = ctx.board(index) {
                if !board.is_multi_buffer() {
                    board.start_domino()?;
                }
            }
        }
    }
    if ctx.is_single() {
        ctx.set_armed(false);
    }

    if skipped {
        debug!("slave board still busy, event skipped");
        return Ok(false);
    }
    w.put_timestamp(Timestamp::now());
    let size = w.position();
    slot.commit(size);
    Ok(true)
}
