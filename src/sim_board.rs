//! Board driver stand-in producing deterministic synthetic events.
//!
//! Each logical channel carries a rising edge placed at the configured
//! trigger position plus a sub-sample jitter, so that trigger-point
//! correction has something to do. Raw data uses the same cell-ordered `u16`
//! layout as a DRS4 evaluation board: nine physical channels of 1024 cells.

use crate::board::{Board, BoardKind, EvalRevision};
use crate::error::DriverError;
use crate::event::{time_axis, N_CELLS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PHYSICAL_CHANNELS: usize = 9;
const EDGE_AMPLITUDE_MV: f64 = 400.0;
const EDGE_BASE_MV: f64 = -100.0;
const EDGE_RISE_NS: f64 = 1.5;

/// Shared record of driver calls, for checking call order across boards.
pub type Journal = Arc<Mutex<Vec<(u16, &'static str)>>>;

pub struct SimulatedBoard {
    serial: u16,
    kind: BoardKind,
    rng: StdRng,
    frequency: f64,
    widths: Vec<f32>,
    depth: usize,
    input_range: f64,
    negative: bool,
    delay_percent: u8,
    trigger_source: u16,
    armed: bool,
    fired: bool,
    armed_at: Instant,
    trigger_period: Option<Duration>,
    stop_cell: u16,
    triggers: u32,
    pll_locked: bool,
    voltage_cal_valid: bool,
    timing_cal_valid: bool,
    refclk: bool,
    journal: Option<Journal>,
}

impl SimulatedBoard {
    pub fn new(serial: u16, seed: u64) -> Self {
        let mut board = Self {
            serial,
            kind: BoardKind::Drs4Evaluation(EvalRevision::V5),
            rng: StdRng::seed_from_u64(seed ^ serial as u64),
            frequency: 5.0,
            widths: Vec::new(),
            depth: N_CELLS,
            input_range: 0.0,
            negative: false,
            delay_percent: 50,
            trigger_source: 1,
            armed: false,
            fired: false,
            armed_at: Instant::now(),
            trigger_period: Some(Duration::from_millis(2)),
            stop_cell: 0,
            triggers: 0,
            pll_locked: true,
            voltage_cal_valid: true,
            timing_cal_valid: true,
            refclk: false,
            journal: None,
        };
        board.recalibrate();
        board
    }

    pub fn with_kind(mut self, kind: BoardKind) -> Self {
        self.kind = kind;
        self
    }

    /// Interval after which an armed board sees a hardware trigger.
    /// `None` leaves only software triggers.
    pub fn with_trigger_period(mut self, period: Option<Duration>) -> Self {
        self.trigger_period = period;
        self
    }

    pub fn with_calibration(mut self, voltage: bool, timing: bool) -> Self {
        self.voltage_cal_valid = voltage;
        self.timing_cal_valid = timing;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn refclk(&self) -> bool {
        self.refclk
    }

    fn record(&self, what: &'static str) {
        if let Some(journal) = &self.journal {
            if let Ok(mut j) = journal.lock() {
                j.push((self.serial, what));
            }
        }
    }

    fn recalibrate(&mut self) {
        let period = 1.0 / self.frequency;
        let phase = self.serial as f64 * 0.1;
        self.widths = (0..N_CELLS)
            .map(|c| (period * (1.0 + 0.05 * (c as f64 * 0.37 + phase).sin())) as f32)
            .collect();
    }

    fn window_ns(&self) -> f64 {
        self.depth as f64 / self.frequency
    }

    fn signal_mv(&self, t: f64, t_edge: f64, channel: usize) -> f64 {
        let x = (t - t_edge - channel as f64 * 2.0) / EDGE_RISE_NS;
        let v = EDGE_BASE_MV + EDGE_AMPLITUDE_MV / (1.0 + (-x).exp());
        if self.negative {
            -v
        } else {
            v
        }
    }

    fn to_raw(&self, mv: f64) -> u16 {
        ((mv / 1000.0 - self.input_range + 0.5) * 65535.0)
            .round()
            .clamp(0.0, 65535.0) as u16
    }

    fn cell_slot(&self, channel: usize, cell: usize) -> usize {
        if self.depth > N_CELLS {
            (2 * channel + cell / N_CELLS) * N_CELLS + cell % N_CELLS
        } else {
            channel * N_CELLS + cell
        }
    }
}

impl Board for SimulatedBoard {
    fn serial(&self) -> u16 {
        self.serial
    }

    fn kind(&self) -> BoardKind {
        self.kind
    }

    fn firmware(&self) -> u32 {
        21305
    }

    fn is_busy(&mut self) -> bool {
        self.armed && !self.is_event_available()
    }

    fn is_event_available(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        if !self.fired {
            if let Some(period) = self.trigger_period {
                self.fired = self.armed_at.elapsed() >= period;
            }
        }
        self.fired
    }

    fn start_domino(&mut self) -> Result<(), DriverError> {
        self.record("start_domino");
        self.armed = true;
        self.fired = false;
        self.armed_at = Instant::now();
        Ok(())
    }

    fn soft_trigger(&mut self) -> Result<(), DriverError> {
        self.record("soft_trigger");
        if self.armed {
            self.fired = true;
        }
        Ok(())
    }

    fn waveform_buffer_size(&self) -> usize {
        PHYSICAL_CHANNELS * N_CELLS * 2
    }

    fn transfer_waves(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let size = self.waveform_buffer_size();
        if buf.len() < size {
            return Err(DriverError::ShortBuffer {
                needed: size,
                available: buf.len(),
            });
        }
        self.record("transfer_waves");
        self.armed = false;
        self.fired = false;
        self.triggers = self.triggers.wrapping_add(1);
        self.stop_cell = self.rng.random_range(0..N_CELLS as u16);

        let ring = self.depth;
        let times = time_axis(&self.widths, self.stop_cell, ring);
        let jitter = (self.rng.random::<f64>() - 0.5) / self.frequency;
        let t_edge = self.window_ns() * (1.0 - self.delay_percent as f64 / 100.0) + jitter;

        buf[..size].fill(0);
        for channel in 0..4 {
            for (j, t) in times.iter().enumerate() {
                let noise = self.rng.random::<f64>() - 0.5;
                let raw = self.to_raw(self.signal_mv(*t as f64, t_edge, channel) + noise);
                let cell = (j + self.stop_cell as usize) % ring;
                let phys = if ring > N_CELLS { channel } else { 2 * channel };
                for p in [phys, phys + 1].into_iter().take(if ring > N_CELLS { 1 } else { 2 }) {
                    let at = self.cell_slot(p, cell) * 2;
                    buf[at..at + 2].copy_from_slice(&raw.to_le_bytes());
                }
            }
        }
        Ok(size)
    }

    fn stop_cell(&self) -> u16 {
        self.stop_cell
    }

    fn stop_wsr(&self) -> u16 {
        0xFF
    }

    fn channel_depth(&self) -> usize {
        self.depth
    }

    fn get_wave(
        &self,
        raw: &[u8],
        channel: usize,
        trigger_cell: u16,
        _write_sr: u16,
        out: &mut [f32],
    ) -> Result<(), DriverError> {
        let ring = out.len().max(1);
        for (j, v) in out.iter_mut().enumerate() {
            let cell = (j + trigger_cell as usize) % ring;
            let at = self.cell_slot(channel, cell) * 2;
            let bytes = raw.get(at..at + 2).ok_or(DriverError::ShortBuffer {
                needed: at + 2,
                available: raw.len(),
            })?;
            let s = u16::from_le_bytes([bytes[0], bytes[1]]) as f64;
            *v = ((s / 65535.0 - 0.5 + self.input_range) * 1000.0) as f32;
        }
        Ok(())
    }

    fn get_time(&self, _channel: usize, trigger_cell: u16, out: &mut [f32]) {
        let t = time_axis(&self.widths, trigger_cell, out.len());
        out.copy_from_slice(&t);
    }

    fn time_calibration(&self, _channel: usize) -> Vec<f32> {
        self.widths.clone()
    }

    fn scaler(&mut self, channel: usize) -> u32 {
        self.triggers.wrapping_mul(channel as u32 + 1)
    }

    fn set_channel_config(
        &mut self,
        _first: u8,
        _last: u8,
        n_config: u8,
    ) -> Result<(), DriverError> {
        self.record("set_channel_config");
        self.depth = if n_config == 4 { 2 * N_CELLS } else { N_CELLS };
        Ok(())
    }

    fn set_frequency(&mut self, ghz: f64) -> Result<(), DriverError> {
        self.frequency = ghz;
        self.pll_locked = (0.5..=5.5).contains(&ghz);
        self.recalibrate();
        Ok(())
    }

    fn nominal_frequency(&self) -> f64 {
        self.frequency
    }

    fn true_frequency(&self) -> f64 {
        let sum: f64 = self.widths.iter().map(|w| *w as f64).sum();
        N_CELLS as f64 / sum
    }

    fn is_pll_locked(&self) -> bool {
        self.pll_locked
    }

    fn set_input_range(&mut self, center: f64) -> Result<(), DriverError> {
        self.input_range = center;
        Ok(())
    }

    fn calibrated_input_range(&self) -> f64 {
        0.0
    }

    fn calibrated_frequency(&self) -> f64 {
        5.0
    }

    fn is_voltage_calibration_valid(&self) -> bool {
        self.voltage_cal_valid
    }

    fn is_timing_calibration_valid(&self) -> bool {
        self.timing_cal_valid
    }

    fn enable_trigger(&mut self, _external: bool, _analog: bool) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_trigger_source(&mut self, source: u16) -> Result<(), DriverError> {
        self.trigger_source = source;
        Ok(())
    }

    fn set_trigger_level(&mut self, _volts: f64) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_individual_trigger_level(
        &mut self,
        channel: usize,
        _volts: f64,
    ) -> Result<(), DriverError> {
        if channel >= 4 {
            return Err(DriverError::Rejected {
                serial: self.serial,
                what: format!("trigger level for channel {channel}"),
            });
        }
        Ok(())
    }

    fn set_trigger_polarity(&mut self, negative: bool) -> Result<(), DriverError> {
        self.negative = negative;
        Ok(())
    }

    fn set_trigger_delay_percent(&mut self, percent: u8) -> Result<(), DriverError> {
        self.delay_percent = percent.min(100);
        Ok(())
    }

    fn trigger_delay_ns(&self) -> f64 {
        self.window_ns() * self.delay_percent as f64 / 100.0
    }

    fn set_refclk(&mut self, on: bool) -> Result<(), DriverError> {
        self.refclk = on;
        Ok(())
    }

    fn set_transparent_mode(&mut self, _on: bool) -> Result<(), DriverError> {
        Ok(())
    }
}
