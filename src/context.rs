//! State shared by the controller, the polling producer and the event
//! processor.

use crate::board::{apply_trigger_source, Board, BoardCapabilities, TriggerSource};
use crate::conditioner::{extrapolate_first_samples, remove_spikes, TriggerPoint};
use crate::config::Conf;
use crate::error::{AcquisitionError, DriverError};
use crate::event::{ChannelId, Event, RawEvent, Timestamp, N_CELLS, N_CHANNELS};
use crate::mirror::SharedMirror;
use crate::ring_buffer::RingConsumer;
use crate::worker::WorkerControl;
use crate::writer::{BoardCalibration, TimeCalibration};
use log::{debug, warn};
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// No real trigger for this long makes the scope idle (and auto-triggering).
pub const IDLE_AFTER: Duration = Duration::from_secs(1);
/// Spacing of synthetic events without boards.
pub const DEMO_PERIOD: Duration = Duration::from_millis(20);

/// Acquisition parameters that can change while running.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    pub multi_board: bool,
    pub spike_removal: bool,
    pub trigger_correction: bool,
    pub auto_trigger: bool,
    /// GSPS
    pub sampling_speed: f64,
    /// V
    pub input_range: f64,
    pub trigger_source: TriggerSource,
    /// V
    pub trigger_levels: [f64; N_CHANNELS],
    pub trigger_negative: bool,
    pub trigger_delay: u8,
    pub enabled: Vec<[bool; N_CHANNELS]>,
    pub refclk: Vec<bool>,
    pub first_channel: u8,
    pub chn_section: u8,
    pub chip: u8,
    pub chn_offset: u8,
}

impl AcquisitionSettings {
    /// Defaults for `n_boards` boards, all channels on, auto trigger on
    /// channel 1 at 0 V.
    pub fn new(n_boards: usize) -> Self {
        let n = n_boards.max(1);
        Self {
            multi_board: false,
            spike_removal: false,
            trigger_correction: true,
            auto_trigger: true,
            sampling_speed: 5.0,
            input_range: 0.0,
            trigger_source: TriggerSource::Channel(0),
            trigger_levels: [0.0; N_CHANNELS],
            trigger_negative: false,
            trigger_delay: 50,
            enabled: vec![[true; N_CHANNELS]; n],
            refclk: vec![false; n],
            first_channel: 0,
            chn_section: 0,
            chip: 0,
            chn_offset: 0,
        }
    }

    pub fn from_conf(conf: &Conf, n_boards: usize) -> Self {
        let rs = &conf.run_settings;
        let bs = &conf.board_settings;
        let ts = &conf.trigger_settings;
        let n = n_boards.max(1);
        let trigger_source = match (ts.source_mask, TriggerSource::from_index(ts.source)) {
            (Some(mask), _) => TriggerSource::Mask(mask),
            (None, Some(source)) => source,
            (None, None) => {
                warn!("trigger source {} out of range, using channel 1", ts.source);
                TriggerSource::Channel(0)
            }
        };
        Self {
            multi_board: rs.multi_board,
            spike_removal: rs.spike_removal,
            trigger_correction: rs.trigger_correction,
            auto_trigger: ts.auto,
            sampling_speed: bs.sampling_speed,
            input_range: bs.input_range,
            trigger_source,
            trigger_levels: ts.level.levels(),
            trigger_negative: ts.negative,
            trigger_delay: ts.delay,
            enabled: vec![bs.en_chans.flags(); n],
            refclk: (0..n).map(|b| bs.refclk.contains(&b)).collect(),
            first_channel: bs.first_channel,
            chn_section: bs.chn_section,
            ..Self::new(n)
        }
    }

    pub fn channel_enabled(&self, board: usize) -> [bool; N_CHANNELS] {
        self.enabled.get(board).copied().unwrap_or([true; N_CHANNELS])
    }
}

pub struct AcquisitionContext {
    boards: Vec<Mutex<Box<dyn Board>>>,
    settings: Mutex<AcquisitionSettings>,
    current: AtomicUsize,
    running: AtomicBool,
    single: AtomicBool,
    armed: AtomicBool,
    rearm: AtomicBool,
    stop: AtomicBool,
    last_trigger: Mutex<Instant>,
    consumer: Mutex<RingConsumer>,
    serial: AtomicU32,
    warnings: Mutex<Vec<String>>,
    demo_rng: Mutex<StdRng>,
    demo_due: Mutex<Instant>,
    pub producer: WorkerControl,
    pub processor: WorkerControl,
    pub mirror: SharedMirror,
}

impl AcquisitionContext {
    pub fn new(
        boards: Vec<Box<dyn Board>>,
        settings: AcquisitionSettings,
        consumer: RingConsumer,
    ) -> Self {
        Self {
            boards: boards.into_iter().map(Mutex::new).collect(),
            settings: Mutex::new(settings),
            current: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            single: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            rearm: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            last_trigger: Mutex::new(Instant::now()),
            consumer: Mutex::new(consumer),
            serial: AtomicU32::new(1),
            warnings: Mutex::new(Vec::new()),
            demo_rng: Mutex::new(StdRng::seed_from_u64(0x0D55)),
            demo_due: Mutex::new(Instant::now()),
            producer: WorkerControl::new(true),
            processor: WorkerControl::new(true),
            mirror: SharedMirror::default(),
        }
    }

    pub fn n_boards(&self) -> usize {
        self.boards.len()
    }

    /// Locks board `index`.
    pub fn board(&self, index: usize) -> Option<MutexGuard<'_, Box<dyn Board>>> {
        self.boards
            .get(index)
            .map(|b| b.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn settings(&self) -> MutexGuard<'_, AcquisitionSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_board(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub(crate) fn set_current_board(&self, index: usize) {
        self.current.store(index, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_single(&self) -> bool {
        self.single.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn set_armed(&self, flag: bool) {
        self.armed.store(flag, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_multi_board(&self) -> bool {
        self.settings().multi_board && self.n_boards() > 1
    }

    /// Boards read out for one event.
    pub fn active_boards(&self) -> Vec<usize> {
        if self.n_boards() == 0 {
            Vec::new()
        } else if self.is_multi_board() {
            (0..self.n_boards()).collect()
        } else {
            vec![self.current_board()]
        }
    }

    /// The board carrying event board #0.
    pub fn primary_board(&self) -> Option<usize> {
        self.active_boards().first().copied()
    }

    pub fn mark_real_trigger(&self) {
        *self.last_trigger.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_trigger(&self, by: Duration) {
        *self.last_trigger.lock().unwrap() = Instant::now() - by;
    }

    pub fn since_last_trigger(&self) -> Duration {
        self.last_trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Running (or armed in single mode) without a real trigger for more
    /// than [`IDLE_AFTER`].
    pub fn is_idle(&self) -> bool {
        let waiting = self.is_running() || (self.is_single() && self.is_armed());
        waiting && self.since_last_trigger() > IDLE_AFTER
    }

    /// An event is ready on the trigger board. Always true without boards.
    pub fn has_triggered(&self) -> bool {
        if self.n_boards() == 0 {
            return true;
        }
        if !(self.is_running() || (self.is_single() && self.is_armed())) {
            return false;
        }
        let index = if self.is_multi_board() {
            0
        } else {
            self.current_board()
        };
        self.board(index)
            .map(|mut b| b.is_event_available())
            .unwrap_or(false)
    }

    pub fn start(&self) -> Result<(), AcquisitionError> {
        for index in self.active_boards().into_iter().rev() {
            if let Some(mut b) = self.board(index) {
                b.start_domino()?;
            }
        }
        self.set_armed(true);
        Ok(())
    }

    /// Forces a trigger and discards whatever is still buffered.
    pub fn stop(&self) -> Result<(), AcquisitionError> {
        let result = self.single_trigger();
        self.set_armed(false);
        if self.n_boards() > 0 {
            self.drain();
        }
        result
    }

    pub fn single_trigger(&self) -> Result<(), AcquisitionError> {
        for index in self.active_boards() {
            if let Some(mut b) = self.board(index) {
                b.soft_trigger()?;
            }
        }
        Ok(())
    }

    pub fn set_running(&self, flag: bool) -> Result<(), AcquisitionError> {
        self.running.store(flag, Ordering::SeqCst);
        if flag {
            self.start()
        } else {
            self.stop()
        }
    }

    pub fn set_single_flag(&self, flag: bool) {
        self.single.store(flag, Ordering::SeqCst);
        self.mark_real_trigger();
    }

    pub fn request_rearm(&self) {
        self.rearm.store(true, Ordering::SeqCst);
    }

    pub fn take_rearm(&self) -> bool {
        self.rearm.swap(false, Ordering::SeqCst)
    }

    /// Discards buffered events. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        let n = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .discard_all();
        if n > 0 {
            debug!("drained {n} stale events");
        }
        n
    }

    pub fn ring_level(&self) -> usize {
        self.consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .level()
    }

    /// Restarts event numbering, done when a recording starts.
    pub fn reset_serial(&self) {
        self.serial.store(1, Ordering::SeqCst);
    }

    /// Logs a condition and keeps it for the display, once per message.
    pub fn warn_once(&self, err: &dyn fmt::Display) {
        let msg = err.to_string();
        let mut warnings = self.warnings.lock().unwrap_or_else(|e| e.into_inner());
        if !warnings.contains(&msg) {
            warn!("{msg}");
            warnings.push(msg);
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Window length in ns at the current sampling speed.
    pub fn waveform_length_ns(&self, depth: usize) -> f64 {
        let speed = self.settings().sampling_speed;
        if speed > 0.0 {
            depth as f64 / speed
        } else {
            0.0
        }
    }

    /// Where the trigger should sit in the primary board's time axis.
    pub fn trigger_position_ns(&self, depth: usize) -> f64 {
        let delay = self
            .primary_board()
            .and_then(|i| self.board(i))
            .map(|b| b.trigger_delay_ns())
            .unwrap_or(0.0);
        self.waveform_length_ns(depth) - delay
    }

    pub fn trigger_point(&self, depth: usize) -> TriggerPoint {
        let nominal_ns = self.trigger_position_ns(depth) as f32;
        let s = self.settings();
        let channel = s.trigger_source.primary_channel().and_then(ChannelId::new);
        let level = channel.map(|c| s.trigger_levels[c.index()]).unwrap_or(0.0);
        TriggerPoint {
            channel,
            level_mv: (level * 1000.0) as f32,
            negative: s.trigger_negative,
            nominal_ns,
        }
    }

    /// One revolution of the domino wave of the primary board, in ns.
    pub fn domino_period_ns(&self) -> f32 {
        let f = match self.primary_board().and_then(|i| self.board(i)) {
            Some(b) => b.true_frequency(),
            None => self.settings().sampling_speed,
        };
        if f > 0.0 {
            (N_CELLS as f64 / f) as f32
        } else {
            0.0
        }
    }

    /// Next event from the ring buffer, or a synthetic one without boards.
    /// Returns the event and the size of its raw payload.
    pub fn next_event(
        &self,
        timeout: Duration,
    ) -> Result<Option<(Event, usize)>, AcquisitionError> {
        if self.n_boards() == 0 {
            if !self.is_running() {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            {
                let mut due = self.demo_due.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                if now < *due {
                    let wait = *due - now;
                    std::thread::sleep(wait.min(timeout));
                    if wait > timeout {
                        return Ok(None);
                    }
                }
                *due = Instant::now().max(*due) + DEMO_PERIOD;
            }
            let ev = self.synthesize();
            let bytes = ev.voltage.len() * std::mem::size_of::<f32>();
            return Ok(Some((ev, bytes)));
        }

        let mut consumer = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        let slot = match consumer.claim_read(timeout) {
            Ok(slot) => slot,
            Err(_) => return Ok(None),
        };
        let size = slot.bytes().len();
        let decoded = self.decode(slot.bytes());
        slot.commit();
        decoded.map(|ev| Some((ev, size)))
    }

    /// Turns a ring slot into calibrated waveforms.
    pub fn decode(&self, bytes: &[u8]) -> Result<Event, AcquisitionError> {
        let raw = RawEvent::parse(bytes)?;
        let settings = self.settings().clone();
        let depth = raw
            .boards
            .iter()
            .filter_map(|rb| self.board(rb.board_index as usize).map(|b| b.channel_depth()))
            .max()
            .unwrap_or(N_CELLS);

        let mut ev = Event::new(raw.boards.len(), depth);
        ev.timestamp = raw.timestamp;
        ev.input_range = settings.input_range;
        ev.serial = self.serial.fetch_add(1, Ordering::SeqCst);

        let mut buf = vec![0f32; depth];
        for (i, rb) in raw.boards.iter().enumerate() {
            let index = rb.board_index as usize;
            let board = self.board(index).ok_or_else(|| {
                AcquisitionError::Decode(format!("slot refers to unknown board {index}"))
            })?;
            let cascading = board.is_cascading();
            for ch in ChannelId::ALL {
                let w = ch.index();
                board.get_time(2 * w, rb.trigger_cell, &mut buf);
                for (dst, src) in ev.time.slice_mut(ndarray::s![i, w, ..]).iter_mut().zip(&buf) {
                    *dst = *src;
                }
                let phys = if cascading {
                    w
                } else {
                    2 * w + settings.chn_offset as usize
                };
                board.get_wave(rb.data, phys, rb.trigger_cell, rb.write_sr, &mut buf)?;
                for (dst, src) in ev
                    .voltage
                    .slice_mut(ndarray::s![i, w, ..])
                    .iter_mut()
                    .zip(&buf)
                {
                    *dst = *src;
                }
            }
            drop(board);

            if settings.spike_removal {
                remove_spikes(
                    ev.voltage.index_axis_mut(Axis(0), i),
                    rb.trigger_cell,
                    cascading,
                );
            }
            extrapolate_first_samples(ev.voltage.index_axis_mut(Axis(0), i));

            ev.boards[i].serial = rb.serial;
            ev.boards[i].trigger_cell = rb.trigger_cell;
            ev.boards[i].write_sr = rb.write_sr;
            ev.boards[i].enabled = settings.channel_enabled(index);
        }
        Ok(ev)
    }

    fn synthesize(&self) -> Event {
        let settings = self.settings().clone();
        let speed = if settings.sampling_speed > 0.0 {
            settings.sampling_speed
        } else {
            1.0
        };
        let mut rng = self.demo_rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut ev = Event::new(1, N_CELLS);
        for w in 0..N_CHANNELS {
            for i in 0..N_CELLS {
                let x = i as f64 / speed;
                let noise = (rng.random::<f64>() - 0.5) * 5.0;
                let phase = x / 10.0 * PI + w as f64 * PI / 4.0;
                ev.voltage[[0, w, i]] = (phase.sin() * 100.0 + noise) as f32;
                ev.time[[0, w, i]] = x as f32;
            }
        }
        ev.serial = self.serial.fetch_add(1, Ordering::SeqCst);
        ev.timestamp = Timestamp::now();
        ev.input_range = settings.input_range;
        ev.boards[0].enabled = settings.channel_enabled(0);
        ev
    }

    /// Reads the trigger scalers of the enabled channels into `ev`.
    pub fn fill_scalers(&self, ev: &mut Event) {
        let indices = self.active_boards();
        for (i, record) in ev.boards.iter_mut().enumerate() {
            let Some(mut board) = indices.get(i).and_then(|&b| self.board(b)) else {
                continue;
            };
            for c in 0..N_CHANNELS {
                if record.enabled[c] {
                    record.scalers[c] = board.scaler(2 * c);
                }
            }
        }
    }

    /// Cell widths of the boards read out for one event.
    pub fn time_calibration(&self) -> TimeCalibration {
        if self.n_boards() == 0 {
            let period = 1.0 / self.settings().sampling_speed.max(1e-3) as f32;
            return TimeCalibration {
                boards: vec![BoardCalibration {
                    serial: 0,
                    widths: std::array::from_fn(|_| vec![period; N_CELLS]),
                }],
            };
        }
        let boards = self
            .active_boards()
            .into_iter()
            .filter_map(|index| {
                self.board(index).map(|b| BoardCalibration {
                    serial: b.serial(),
                    widths: std::array::from_fn(|c| b.time_calibration(2 * c)),
                })
            })
            .collect();
        TimeCalibration { boards }
    }

    /// Pushes the trigger, range and frequency settings to every board and
    /// reports calibration problems.
    pub fn configure_boards(&self) -> Result<(), AcquisitionError> {
        if self.n_boards() == 0 {
            self.warn_once(&AcquisitionError::HardwareUnavailable);
            return Ok(());
        }
        let s = self.settings().clone();
        for index in 0..self.n_boards() {
            let Some(mut guard) = self.board(index) else {
                continue;
            };
            let b: &mut dyn Board = &mut **guard;
            b.set_input_range(s.input_range)?;
            apply_trigger_source(b, s.trigger_source)?;
            for (c, level) in s.trigger_levels.iter().enumerate() {
                b.set_individual_trigger_level(c, *level)?;
            }
            b.set_trigger_polarity(s.trigger_negative)?;
            b.set_trigger_delay_percent(s.trigger_delay)?;
            if b.kind().has_builtin_trigger() {
                b.set_transparent_mode(true)?;
            }
            if b.kind().supports_refclk() {
                b.set_refclk(s.refclk.get(index).copied().unwrap_or(false))?;
            }
        }
        self.apply_sampling_speed(s.sampling_speed)?;
        self.check_calibration();
        Ok(())
    }

    /// Clamps to what every board supports, sets it and checks the PLLs.
    pub fn apply_sampling_speed(&self, ghz: f64) -> Result<f64, AcquisitionError> {
        let (min, max) = (0..self.n_boards())
            .filter_map(|i| self.board(i))
            .map(|b| {
                let kind = b.kind();
                (kind.min_sampling_speed(b.serial()), kind.max_sampling_speed())
            })
            .fold((0.0f64, f64::INFINITY), |(lo, hi), (a, b)| {
                (lo.max(a), hi.min(b))
            });
        let ghz = ghz.clamp(min, max.max(min));
        let mut nominal = ghz;
        for index in 0..self.n_boards() {
            if let Some(mut b) = self.board(index) {
                b.set_frequency(ghz)?;
                nominal = b.nominal_frequency();
                if b.kind().drs_generation() == 4 && !b.is_pll_locked() {
                    self.warn_once(&AcquisitionError::ClockUnlocked {
                        serial: b.serial(),
                        ghz,
                    });
                }
            }
        }
        self.settings().sampling_speed = nominal;
        Ok(nominal)
    }

    /// Reports invalid voltage/timing calibration and range mismatches.
    pub fn check_calibration(&self) {
        let range = self.settings().input_range;
        for index in 0..self.n_boards() {
            let Some(b) = self.board(index) else {
                continue;
            };
            let serial = b.serial();
            if !b.is_voltage_calibration_valid() {
                self.warn_once(&AcquisitionError::CalibrationInvalid {
                    serial,
                    reason: "voltage calibration invalid, waveforms are uncalibrated".into(),
                });
            } else if !b.is_timing_calibration_valid() {
                self.warn_once(&AcquisitionError::CalibrationInvalid {
                    serial,
                    reason: format!(
                        "no timing calibration for {:.2} GSPS, using nominal bin widths",
                        b.nominal_frequency()
                    ),
                });
            }
            if (b.calibrated_input_range() - range).abs() > 0.001 {
                self.warn_once(&AcquisitionError::CalibrationInvalid {
                    serial,
                    reason: format!(
                        "calibrated for range {:.2} V, running at {:.2} V",
                        b.calibrated_input_range(),
                        range
                    ),
                });
            }
        }
    }

    /// Applies `f` to every board, stopping at the first driver error.
    pub fn for_each_board(
        &self,
        mut f: impl FnMut(usize, &mut dyn Board) -> Result<(), DriverError>,
    ) -> Result<(), AcquisitionError> {
        for index in 0..self.n_boards() {
            if let Some(mut b) = self.board(index) {
                f(index, &mut **b)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::max_raw_size;
    use crate::ring_buffer::RingBuffer;
    use crate::sim_board::SimulatedBoard;

    fn settings(n: usize) -> AcquisitionSettings {
        AcquisitionSettings {
            auto_trigger: false,
            trigger_levels: [0.1; 4],
            ..AcquisitionSettings::new(n)
        }
    }

    fn context(boards: Vec<Box<dyn Board>>) -> AcquisitionContext {
        let max = max_raw_size(boards.iter().map(|b| b.waveform_buffer_size()));
        let (_tx, rx) = RingBuffer::new(4 * (max + 4), max).unwrap().split();
        let n = boards.len();
        AcquisitionContext::new(boards, settings(n), rx)
    }

    #[test]
    fn demo_mode_synthesizes_sine() {
        let ctx = context(Vec::new());
        assert!(ctx.next_event(Duration::from_millis(1)).unwrap().is_none());
        ctx.set_running(true).unwrap();
        let (ev, _) = ctx.next_event(Duration::from_millis(1)).unwrap().unwrap();
        assert_eq!(ev.n_boards(), 1);
        assert_eq!(ev.depth(), 1024);
        // sin(w * pi / 4) * 100 at t = 0, plus at most 2.5 mV noise
        let v = ev.waveform(0, ChannelId::ALL[2]).unwrap();
        assert!((v[0] - 100.0).abs() <= 2.5);
        assert_eq!(ev.time[[0, 0, 5]], 1.0);
    }

    #[test]
    fn demo_events_are_paced() {
        let ctx = context(Vec::new());
        ctx.set_running(true).unwrap();
        let t0 = Instant::now();
        assert!(ctx.next_event(Duration::from_millis(1)).unwrap().is_some());
        assert!(ctx.next_event(Duration::from_millis(1)).unwrap().is_none());
        assert!(ctx.next_event(Duration::from_millis(200)).unwrap().is_some());
        assert!(t0.elapsed() >= DEMO_PERIOD);
    }

    #[test]
    fn no_boards_reports_hardware_unavailable() {
        let ctx = context(Vec::new());
        ctx.configure_boards().unwrap();
        ctx.configure_boards().unwrap();
        let w = ctx.warnings();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0], AcquisitionError::HardwareUnavailable.to_string());
        assert!(ctx.has_triggered());
    }

    #[test]
    fn invalid_calibration_warns_once() {
        let board = SimulatedBoard::new(11, 0).with_calibration(true, false);
        let ctx = context(vec![Box::new(board)]);
        ctx.configure_boards().unwrap();
        ctx.check_calibration();
        let w = ctx.warnings();
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("timing calibration"));
    }

    #[test]
    fn sampling_speed_is_clamped_to_board_limits() {
        let ctx = context(vec![Box::new(SimulatedBoard::new(12, 0))]);
        // clamped to the DRS4 range
        assert_eq!(ctx.apply_sampling_speed(9.0).unwrap(), 5.0);
        assert!(ctx.warnings().is_empty());
        assert_eq!(ctx.apply_sampling_speed(0.1).unwrap(), 0.7);
    }

    #[test]
    fn idle_after_a_quiet_second() {
        let ctx = context(vec![Box::new(SimulatedBoard::new(1, 0))]);
        assert!(!ctx.is_idle());
        ctx.running.store(true, Ordering::SeqCst);
        ctx.backdate_last_trigger(Duration::from_millis(1500));
        assert!(ctx.is_idle());
        ctx.mark_real_trigger();
        assert!(!ctx.is_idle());
    }

    #[test]
    fn trigger_point_from_settings() {
        let ctx = context(vec![Box::new(SimulatedBoard::new(1, 0))]);
        let tp = ctx.trigger_point(1024);
        assert_eq!(tp.channel, ChannelId::new(0));
        assert!((tp.level_mv - 100.0).abs() < 1e-3);
        // 204.8 ns window, 50 % delay
        assert!((tp.nominal_ns - 102.4).abs() < 1e-3);
    }
}
