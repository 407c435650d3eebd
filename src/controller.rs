//! Run-mode state machine and owner of the acquisition threads.

use crate::board::{apply_trigger_source, log_all, Board, BoardCapabilities, TriggerSource};
use crate::config::Conf;
use crate::context::{AcquisitionContext, AcquisitionSettings};
use crate::error::{AcquisitionError, SerializationError};
use crate::event::{max_raw_size, ChannelId, Event, N_CELLS, N_CHANNELS};
use crate::mirror::Recorder;
use crate::processor::{EventProcessor, EventStats, STATS_CAPACITY};
use crate::producer::AcquisitionProducer;
use crate::ring_buffer::RingBuffer;
use crate::writer::EventSink;
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const BUSY_FLUSH_TRIES: usize = 10;
const BUSY_FLUSH_WAIT: Duration = Duration::from_millis(10);

/// Owns the shared context and both worker threads. Dropping the controller
/// stops and joins the threads.
pub struct AcquisitionController {
    ctx: Arc<AcquisitionContext>,
    stats: Receiver<EventStats>,
    producer: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl AcquisitionController {
    /// Configures the boards and starts the producer and processor threads.
    /// Without boards the controller runs in demo mode.
    pub fn new(
        boards: Vec<Box<dyn Board>>,
        settings: AcquisitionSettings,
        ring_bytes: usize,
    ) -> Result<Self, AcquisitionError> {
        for (i, b) in boards.iter().enumerate() {
            log_all(i, b.as_ref());
        }
        let max_event = max_raw_size(boards.iter().map(|b| b.waveform_buffer_size()));
        let needed = 2 * (max_event + 4);
        let capacity = if ring_bytes < needed {
            info!("ring buffer raised from {ring_bytes} to {needed} bytes to hold two events");
            needed
        } else {
            ring_bytes
        };
        let (ring_tx, ring_rx) = RingBuffer::new(capacity, max_event)?.split();

        let (first, section) = (settings.first_channel, settings.chn_section);
        let ctx = Arc::new(AcquisitionContext::new(boards, settings, ring_rx));
        ctx.configure_boards()?;
        if ctx.n_boards() > 0 {
            route_channels(&ctx, first, section)?;
        }

        let (stats_tx, stats) = bounded(STATS_CAPACITY);
        let producer = {
            let worker = AcquisitionProducer::new(Arc::clone(&ctx), ring_tx);
            thread::Builder::new()
                .name("drs-producer".into())
                .spawn(move || worker.run())
                .map_err(|e| thread_error("producer", e))?
        };
        let processor = {
            let worker = EventProcessor::new(Arc::clone(&ctx), Some(stats_tx));
            thread::Builder::new()
                .name("drs-processor".into())
                .spawn(move || worker.run())
                .map_err(|e| thread_error("processor", e))?
        };
        info!(
            "acquisition ready: {} board(s), ring buffer {} kB",
            ctx.n_boards(),
            capacity / 1024
        );

        Ok(Self {
            ctx,
            stats,
            producer: Some(producer),
            processor: Some(processor),
        })
    }

    pub fn from_conf(boards: Vec<Box<dyn Board>>, conf: &Conf) -> Result<Self, AcquisitionError> {
        let settings = AcquisitionSettings::from_conf(conf, boards.len());
        Self::new(boards, settings, conf.run_settings.ring_buffer_mb * 1024 * 1024)
    }

    pub fn context(&self) -> &AcquisitionContext {
        &self.ctx
    }

    // --- run modes ---

    pub fn start(&self) -> Result<(), AcquisitionError> {
        self.ctx.start()
    }

    pub fn stop(&self) -> Result<(), AcquisitionError> {
        self.ctx.stop()
    }

    pub fn single_trigger(&self) -> Result<(), AcquisitionError> {
        self.ctx.single_trigger()
    }

    pub fn set_running(&self, flag: bool) -> Result<(), AcquisitionError> {
        debug!("running: {flag}");
        self.ctx.set_running(flag)
    }

    /// Enters or leaves single-shot mode. An armed acquisition that has not
    /// fired yet is forced and re-armed after its event is decoded.
    pub fn set_single(&self, flag: bool) -> Result<(), AcquisitionError> {
        debug!("single: {flag}");
        if flag {
            if self.ctx.is_running() {
                self.ctx.set_running(false)?;
            }
            self.ctx.set_single_flag(true);
            if self.ctx.is_armed() && !self.ctx.has_triggered() {
                self.ctx.single_trigger()?;
                self.ctx.request_rearm();
            } else {
                self.ctx.start()?;
            }
        } else {
            self.ctx.set_single_flag(false);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    pub fn is_single(&self) -> bool {
        self.ctx.is_single()
    }

    pub fn is_armed(&self) -> bool {
        self.ctx.is_armed()
    }

    pub fn is_idle(&self) -> bool {
        self.ctx.is_idle()
    }

    pub fn current_board(&self) -> usize {
        self.ctx.current_board()
    }

    pub fn board_count(&self) -> usize {
        self.ctx.n_boards()
    }

    /// Switches the board read out in single-board mode.
    pub fn select_board(&self, index: usize) -> Result<(), AcquisitionError> {
        let count = self.ctx.n_boards();
        if index >= count {
            return Err(AcquisitionError::NoSuchBoard { index, count });
        }
        self.paused(|ctx| {
            ctx.set_current_board(index);
            if ctx.is_running() {
                ctx.start()?;
            }
            Ok(())
        })?;
        info!("board {index} selected");
        Ok(())
    }

    /// Routes `first_channel` / `section` on every board. Section 2 selects
    /// 2048-cell cascading.
    pub fn select_channel(&self, first_channel: u8, section: u8) -> Result<(), AcquisitionError> {
        if self.ctx.n_boards() == 0 {
            return Ok(());
        }
        self.paused(|ctx| route_channels(ctx, first_channel, section))
    }

    pub fn set_multi_board(&self, flag: bool) -> Result<(), AcquisitionError> {
        self.paused(|ctx| {
            ctx.settings().multi_board = flag;
            Ok(())
        })
    }

    /// Runs `f` with the producer paused and drains what it left behind.
    fn paused(
        &self,
        f: impl FnOnce(&AcquisitionContext) -> Result<(), AcquisitionError>,
    ) -> Result<(), AcquisitionError> {
        self.ctx.producer.enable(false);
        let result = f(&self.ctx);
        let drained = self.ctx.drain();
        if drained > 0 {
            debug!("{drained} events drained after reconfiguration");
        }
        self.ctx.producer.enable(true);
        result
    }

    // --- configuration ---

    pub fn set_sampling_speed(&self, ghz: f64) -> Result<f64, AcquisitionError> {
        let mut applied = ghz;
        self.paused(|ctx| {
            if ctx.n_boards() == 0 {
                ctx.settings().sampling_speed = ghz;
            } else {
                applied = ctx.apply_sampling_speed(ghz)?;
                ctx.check_calibration();
            }
            Ok(())
        })?;
        info!("sampling speed {applied:.3} GSPS");
        Ok(applied)
    }

    /// Sets all four trigger levels (V).
    pub fn set_trigger_level(&self, volts: f64) -> Result<(), AcquisitionError> {
        self.ctx.settings().trigger_levels = [volts; N_CHANNELS];
        self.ctx.for_each_board(|_, b| {
            if b.kind().trigger_source_is_mask() {
                (0..N_CHANNELS).try_for_each(|c| b.set_individual_trigger_level(c, volts))
            } else {
                b.set_trigger_level(volts)
            }
        })
    }

    pub fn set_individual_trigger_level(
        &self,
        channel: ChannelId,
        volts: f64,
    ) -> Result<(), AcquisitionError> {
        self.ctx.settings().trigger_levels[channel.index()] = volts;
        self.ctx
            .for_each_board(|_, b| b.set_individual_trigger_level(channel.index(), volts))
    }

    pub fn set_trigger_polarity(&self, negative: bool) -> Result<(), AcquisitionError> {
        self.ctx.settings().trigger_negative = negative;
        self.ctx
            .for_each_board(|_, b| b.set_trigger_polarity(negative))
    }

    /// Percent of the window recorded after the trigger.
    pub fn set_trigger_delay(&self, percent: u8) -> Result<(), AcquisitionError> {
        let percent = percent.min(100);
        self.ctx.settings().trigger_delay = percent;
        self.ctx
            .for_each_board(|_, b| b.set_trigger_delay_percent(percent))?;
        debug!(
            "trigger position now {:.2} ns",
            self.ctx.trigger_position_ns(N_CELLS)
        );
        Ok(())
    }

    pub fn set_trigger_source(&self, source: TriggerSource) -> Result<(), AcquisitionError> {
        self.ctx.settings().trigger_source = source;
        self.ctx
            .for_each_board(|_, b| apply_trigger_source(b, source))
    }

    /// Auto mode forces a trigger after a second without one.
    pub fn set_trigger_mode(&self, auto: bool) {
        self.ctx.settings().auto_trigger = auto;
    }

    pub fn set_channel_enabled(
        &self,
        board: usize,
        channel: ChannelId,
        on: bool,
    ) -> Result<(), AcquisitionError> {
        let count = self.ctx.n_boards().max(1);
        let mut settings = self.ctx.settings();
        let flags = settings
            .enabled
            .get_mut(board)
            .ok_or(AcquisitionError::NoSuchBoard { index: board, count })?;
        flags[channel.index()] = on;
        Ok(())
    }

    /// Feeds `board` from the reference clock of the previous board. Boards
    /// without clock routing keep their flag only.
    pub fn set_refclk(&self, board: usize, on: bool) -> Result<(), AcquisitionError> {
        let count = self.ctx.n_boards();
        {
            let mut settings = self.ctx.settings();
            let flag = settings
                .refclk
                .get_mut(board)
                .ok_or(AcquisitionError::NoSuchBoard { index: board, count })?;
            *flag = on;
        }
        if let Some(mut b) = self.ctx.board(board) {
            if b.kind().supports_refclk() {
                b.set_refclk(on)?;
            } else {
                warn!("board {} cannot take a reference clock", b.serial());
            }
        }
        Ok(())
    }

    /// Centre of the input range in V.
    pub fn set_input_range(&self, centre: f64) -> Result<(), AcquisitionError> {
        self.ctx.settings().input_range = centre;
        self.ctx.for_each_board(|_, b| b.set_input_range(centre))?;
        self.ctx.check_calibration();
        Ok(())
    }

    pub fn set_spike_removal(&self, on: bool) {
        self.ctx.settings().spike_removal = on;
    }

    pub fn set_trigger_correction(&self, on: bool) {
        self.ctx.settings().trigger_correction = on;
    }

    pub fn settings(&self) -> AcquisitionSettings {
        self.ctx.settings().clone()
    }

    // --- data ---

    /// Writes the most recent event to `writer`, a DRS2 or XML sink.
    pub fn save_waveforms<S: EventSink + ?Sized>(
        &self,
        writer: &mut S,
    ) -> Result<bool, SerializationError> {
        let Some(mut ev) = self.ctx.mirror.snapshot() else {
            return Ok(false);
        };
        self.ctx.fill_scalers(&mut ev);
        writer.write(&ev)?;
        Ok(true)
    }

    /// Starts recording the next `max_events` events to `path`, replacing
    /// any recording in progress. A `.xml` path selects XML output. Event
    /// numbering restarts at 1.
    pub fn start_recording(
        &self,
        path: impl AsRef<Path>,
        max_events: usize,
    ) -> Result<(), SerializationError> {
        let recorder = Recorder::create(path, self.ctx.time_calibration(), max_events)?;
        self.ctx.reset_serial();
        info!(
            "recording up to {max_events} events to {}",
            recorder.path.display()
        );
        if let Some(mut previous) = self.ctx.mirror.set_recorder(recorder) {
            previous.writer.finish()?;
        }
        Ok(())
    }

    /// Closes the active recording. Returns the number of events written.
    pub fn stop_recording(&self) -> Result<Option<usize>, SerializationError> {
        match self.ctx.mirror.clear_recorder() {
            Some(mut recorder) => {
                recorder.writer.finish()?;
                info!(
                    "recording to {} closed after {} events",
                    recorder.path.display(),
                    recorder.writer.events()
                );
                Ok(Some(recorder.writer.events()))
            }
            None => Ok(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.ctx.mirror.is_recording()
    }

    pub fn waveform(&self, board: usize, channel: ChannelId) -> Option<Vec<f32>> {
        self.ctx.mirror.waveform(board, channel)
    }

    pub fn time(&self, board: usize, channel: ChannelId) -> Option<Vec<f32>> {
        self.ctx.mirror.time(board, channel)
    }

    pub fn snapshot(&self) -> Option<Event> {
        self.ctx.mirror.snapshot()
    }

    /// Events decoded since start.
    pub fn events_decoded(&self) -> u64 {
        self.ctx.mirror.published()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.ctx.warnings()
    }

    /// Per-event statistics from the processor thread.
    pub fn stats(&self) -> Receiver<EventStats> {
        self.stats.clone()
    }

    /// Blocks until `n` events have been decoded in total.
    pub fn wait_for_events(&self, n: u64, timeout: Duration) -> Result<(), AcquisitionError> {
        let deadline = Instant::now() + timeout;
        while self.events_decoded() < n {
            if Instant::now() >= deadline {
                return Err(AcquisitionError::BufferTimeout);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.ctx.request_stop();
        if let Err(e) = self.stop_recording() {
            warn!("closing recording: {e}");
        }
        for (name, ctl, handle) in [
            ("producer", &self.ctx.producer, self.producer.take()),
            ("processor", &self.ctx.processor, self.processor.take()),
        ] {
            if !ctl.wait_finished(TEARDOWN_TIMEOUT) {
                warn!("{name} thread did not finish in time");
            }
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("{name} thread panicked");
                }
            }
        }
        debug!("acquisition torn down");
    }
}

fn thread_error(name: &str, e: std::io::Error) -> AcquisitionError {
    AcquisitionError::Decode(format!("cannot spawn {name} thread: {e}"))
}

/// Flushes busy boards and applies the channel routing of each board kind.
fn route_channels(
    ctx: &AcquisitionContext,
    first_channel: u8,
    section: u8,
) -> Result<(), AcquisitionError> {
    let mut routing = None;
    ctx.for_each_board(|_, b| {
        if b.is_busy() {
            b.soft_trigger()?;
            for _ in 0..BUSY_FLUSH_TRIES {
                if !b.is_busy() {
                    break;
                }
                thread::sleep(BUSY_FLUSH_WAIT);
            }
        }
        let r = b.kind().channel_routing(first_channel, section);
        if let Some((first, last, n_config)) = r.config {
            b.set_channel_config(first, last, n_config)?;
        }
        routing = Some(r);
        Ok(())
    })?;

    let mut s = ctx.settings();
    s.first_channel = first_channel;
    s.chn_section = section;
    if let Some(r) = routing {
        s.chip = r.chip;
        s.chn_offset = r.offset;
    }
    debug!(
        "channels routed: chip {} offset {} section {}",
        s.chip, s.chn_offset, s.chn_section
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_all;
    use crate::sim_board::{Journal, SimulatedBoard};
    use crate::writer::DrsWriter;
    use crate::xml_writer::XmlWriter;

    fn settings(n: usize) -> AcquisitionSettings {
        AcquisitionSettings {
            auto_trigger: false,
            trigger_levels: [0.1; 4],
            ..AcquisitionSettings::new(n)
        }
    }

    fn controller(boards: Vec<SimulatedBoard>) -> AcquisitionController {
        let n = boards.len();
        let boards = boards
            .into_iter()
            .map(|b| Box::new(b) as Box<dyn Board>)
            .collect();
        AcquisitionController::new(boards, settings(n), 0).unwrap()
    }

    #[test]
    fn running_produces_events() {
        let c = controller(vec![SimulatedBoard::new(2801, 1)]);
        assert!(!c.is_armed());
        c.set_running(true).unwrap();
        assert!(c.is_armed());
        c.wait_for_events(5, Duration::from_secs(5)).unwrap();
        c.set_running(false).unwrap();
        assert!(!c.is_armed());

        let ev = c.snapshot().unwrap();
        assert_eq!(ev.boards[0].serial, 2801);
        assert!(c.waveform(0, ChannelId::ALL[3]).is_some());
        assert!(c.stats().try_iter().count() >= 4);
        assert!(c.warnings().is_empty());
    }

    #[test]
    fn demo_mode_without_boards() {
        let c = AcquisitionController::new(Vec::new(), settings(0), 0).unwrap();
        c.set_running(true).unwrap();
        c.wait_for_events(3, Duration::from_secs(5)).unwrap();
        assert_eq!(c.warnings().len(), 1);
        assert_eq!(c.snapshot().unwrap().depth(), 1024);
    }

    #[test]
    fn nothing_decoded_while_stopped() {
        let c = controller(vec![SimulatedBoard::new(1, 0)]);
        assert_eq!(
            c.wait_for_events(1, Duration::from_millis(50)),
            Err(AcquisitionError::BufferTimeout)
        );
    }

    #[test]
    fn select_board_bounds_and_switch() {
        let c = controller(vec![SimulatedBoard::new(1, 0), SimulatedBoard::new(2, 0)]);
        assert_eq!(
            c.select_board(2),
            Err(AcquisitionError::NoSuchBoard { index: 2, count: 2 })
        );
        c.select_board(1).unwrap();
        assert_eq!(c.current_board(), 1);

        c.set_running(true).unwrap();
        let seen = c.events_decoded();
        c.wait_for_events(seen + 3, Duration::from_secs(5)).unwrap();
        assert_eq!(c.snapshot().unwrap().boards[0].serial, 2);
    }

    #[test]
    fn select_board_drains_stale_events() {
        let quiet = SimulatedBoard::new(2, 0).with_trigger_period(None);
        let c = controller(vec![SimulatedBoard::new(1, 0), quiet]);
        c.context().processor.enable(false);
        c.set_running(true).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(c.context().ring_level() > 0);

        c.select_board(1).unwrap();
        assert_eq!(c.context().ring_level(), 0);
        assert!(c.is_armed());
    }

    #[test]
    fn multi_board_start_is_slaves_first() {
        let journal = Journal::default();
        let boards: Vec<Box<dyn Board>> = (20..23)
            .map(|s| {
                Box::new(
                    SimulatedBoard::new(s, 0)
                        .with_trigger_period(None)
                        .with_journal(journal.clone()),
                ) as Box<dyn Board>
            })
            .collect();
        let settings = AcquisitionSettings {
            multi_board: true,
            ..settings(3)
        };
        let c = AcquisitionController::new(boards, settings, 0).unwrap();
        journal.lock().unwrap().clear();
        c.start().unwrap();
        let started: Vec<u16> = journal
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, w)| *w == "start_domino")
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(started, vec![22, 21, 20]);
    }

    #[test]
    fn single_shot_takes_one_event() {
        let board = SimulatedBoard::new(3, 0).with_trigger_period(None);
        let c = controller(vec![board]);
        c.set_single(true).unwrap();
        assert!(c.is_single() && c.is_armed());
        c.single_trigger().unwrap();
        c.wait_for_events(1, Duration::from_secs(5)).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!c.is_armed());
        assert_eq!(c.events_decoded(), 1);
    }

    #[test]
    fn cascading_doubles_depth() {
        let c = controller(vec![SimulatedBoard::new(4, 0)]);
        c.select_channel(0, 2).unwrap();
        assert_eq!(c.context().board(0).unwrap().channel_depth(), 2048);
        c.set_running(true).unwrap();
        c.wait_for_events(1, Duration::from_secs(5)).unwrap();
        assert_eq!(c.snapshot().unwrap().depth(), 2048);
    }

    #[test]
    fn recording_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.dat");
        let c = controller(vec![SimulatedBoard::new(5, 0)]);
        c.start_recording(&path, 4).unwrap();
        assert!(c.is_recording());
        c.set_running(true).unwrap();
        c.wait_for_events(6, Duration::from_secs(5)).unwrap();
        c.set_running(false).unwrap();
        assert!(!c.is_recording());
        assert_eq!(c.stop_recording().unwrap(), None);

        let events = read_all(&path).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].serial, 1);

        let mut writer = DrsWriter::new(Vec::new(), c.context().time_calibration());
        assert!(c.save_waveforms(&mut writer).unwrap());
        assert_eq!(writer.events(), 1);

        let mut xml = XmlWriter::new(Vec::new());
        assert!(c.save_waveforms(&mut xml).unwrap());
        xml.finish().unwrap();
        let text = String::from_utf8(xml.into_inner()).unwrap();
        assert!(text.contains("<Board_5>"));
        assert_eq!(text.matches("<Data>").count(), 4 * 1024);
    }

    #[test]
    fn xml_recording_is_closed_after_max_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.xml");
        let c = controller(vec![SimulatedBoard::new(7, 0)]);
        c.start_recording(&path, 2).unwrap();
        c.set_running(true).unwrap();
        c.wait_for_events(3, Duration::from_secs(5)).unwrap();
        c.set_running(false).unwrap();
        assert!(!c.is_recording());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("<Event>").count(), 2);
        assert!(text.contains("<Serial>2</Serial>"));
        assert!(text.trim_end().ends_with("</DRSOsc>"));
    }

    #[test]
    fn single_while_armed_forces_and_rearms() {
        let journal = Journal::default();
        let board = SimulatedBoard::new(8, 0)
            .with_trigger_period(None)
            .with_journal(journal.clone());
        let c = controller(vec![board]);
        c.start().unwrap();
        assert!(c.is_armed());
        assert_eq!(c.events_decoded(), 0);
        journal.lock().unwrap().clear();

        c.set_single(true).unwrap();
        c.wait_for_events(1, Duration::from_secs(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !c.is_armed() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(c.is_single() && c.is_armed());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(c.events_decoded(), 1);

        let calls: Vec<&str> = journal.lock().unwrap().iter().map(|(_, w)| *w).collect();
        let forced = calls.iter().position(|w| *w == "soft_trigger").unwrap();
        let rearmed = calls.iter().rposition(|w| *w == "start_domino").unwrap();
        assert!(forced < rearmed, "{calls:?}");
    }

    #[test]
    fn stop_drains_buffered_events() {
        let c = controller(vec![SimulatedBoard::new(9, 0)]);
        c.context().processor.enable(false);
        c.set_running(true).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while c.context().ring_level() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(c.context().ring_level() > 0);

        // keep the forced trigger of stop() out of the ring
        c.context().producer.enable(false);
        c.stop().unwrap();
        assert_eq!(c.context().ring_level(), 0);
        assert!(!c.is_armed());
        assert_eq!(c.events_decoded(), 0);
    }

    #[test]
    fn configuration_reaches_settings() {
        let c = controller(vec![SimulatedBoard::new(6, 0)]);
        assert_eq!(c.set_sampling_speed(2.0).unwrap(), 2.0);
        c.set_trigger_level(-0.05).unwrap();
        c.set_individual_trigger_level(ChannelId::ALL[1], 0.2).unwrap();
        c.set_trigger_delay(150).unwrap();
        c.set_channel_enabled(0, ChannelId::ALL[3], false).unwrap();
        assert!(c.set_channel_enabled(3, ChannelId::ALL[0], false).is_err());
        c.set_refclk(0, true).unwrap();

        let s = c.settings();
        assert_eq!(s.sampling_speed, 2.0);
        assert_eq!(s.trigger_levels, [-0.05, 0.2, -0.05, -0.05]);
        assert_eq!(s.trigger_delay, 100);
        assert_eq!(s.enabled[0], [true, true, true, false]);
        assert_eq!(s.refclk, vec![true]);
    }
}
