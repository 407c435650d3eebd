use crate::error::AcquisitionError;
use ndarray::{Array3, ArrayView1, ArrayViewMut1};
use std::fmt;
use time::OffsetDateTime;

/// Logical channels per board.
pub const N_CHANNELS: usize = 4;
/// Cells of one DRS4 channel.
pub const N_CELLS: usize = 1024;

/// Index of one of the four logical channels of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u8);

impl ChannelId {
    pub const ALL: [ChannelId; N_CHANNELS] =
        [ChannelId(0), ChannelId(1), ChannelId(2), ChannelId(3)];

    pub fn new(index: usize) -> Option<Self> {
        (index < N_CHANNELS).then_some(ChannelId(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0 + 1)
    }
}

/// Wall-clock capture time with millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub year: u16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

impl Timestamp {
    pub const WIRE_SIZE: usize = 14;

    pub fn now() -> Self {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self {
            year: now.year() as u16,
            month: u8::from(now.month()) as u16,
            day: now.day() as u16,
            hour: now.hour() as u16,
            minute: now.minute() as u16,
            second: now.second() as u16,
            millisecond: now.millisecond(),
        }
    }

    pub fn to_fields(self) -> [u16; 7] {
        [
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millisecond,
        ]
    }

    pub fn from_fields(f: [u16; 7]) -> Self {
        Self {
            year: f[0],
            month: f[1],
            day: f[2],
            hour: f[3],
            minute: f[4],
            second: f[5],
            millisecond: f[6],
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millisecond
        )
    }
}

/// Per-board part of a decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardRecord {
    pub serial: u16,
    pub trigger_cell: u16,
    pub write_sr: u16,
    pub enabled: [bool; N_CHANNELS],
    pub scalers: [u32; N_CHANNELS],
}

/// A decoded event. Times are in ns, voltages in mV, both stored as
/// `(board, channel, sample)` arenas.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub serial: u32,
    pub timestamp: Timestamp,
    /// Centre of the input range in V.
    pub input_range: f64,
    pub boards: Vec<BoardRecord>,
    pub time: Array3<f32>,
    pub voltage: Array3<f32>,
}

impl Event {
    pub fn new(n_boards: usize, depth: usize) -> Self {
        Self {
            serial: 0,
            timestamp: Timestamp::default(),
            input_range: 0.0,
            boards: vec![BoardRecord::default(); n_boards],
            time: Array3::zeros((n_boards, N_CHANNELS, depth)),
            voltage: Array3::zeros((n_boards, N_CHANNELS, depth)),
        }
    }

    pub fn n_boards(&self) -> usize {
        self.boards.len()
    }

    /// Samples per channel (1024, or 2048 in cascading mode).
    pub fn depth(&self) -> usize {
        self.voltage.dim().2
    }

    pub fn waveform(&self, board: usize, channel: ChannelId) -> Option<ArrayView1<'_, f32>> {
        (board < self.n_boards()).then(|| {
            self.voltage
                .index_axis(ndarray::Axis(0), board)
                .index_axis_move(ndarray::Axis(0), channel.index())
        })
    }

    pub fn time(&self, board: usize, channel: ChannelId) -> Option<ArrayView1<'_, f32>> {
        (board < self.n_boards()).then(|| {
            self.time
                .index_axis(ndarray::Axis(0), board)
                .index_axis_move(ndarray::Axis(0), channel.index())
        })
    }

    pub fn waveform_mut(
        &mut self,
        board: usize,
        channel: ChannelId,
    ) -> Option<ArrayViewMut1<'_, f32>> {
        let n = self.n_boards();
        (board < n).then(|| {
            self.voltage
                .index_axis_mut(ndarray::Axis(0), board)
                .index_axis_move(ndarray::Axis(0), channel.index())
        })
    }

    pub fn time_mut(&mut self, board: usize, channel: ChannelId) -> Option<ArrayViewMut1<'_, f32>> {
        let n = self.n_boards();
        (board < n).then(|| {
            self.time
                .index_axis_mut(ndarray::Axis(0), board)
                .index_axis_move(ndarray::Axis(0), channel.index())
        })
    }

    /// Copies `other` into `self`, reusing the arenas when the shapes match.
    pub fn copy_from(&mut self, other: &Event) {
        if self.voltage.dim() == other.voltage.dim() {
            self.serial = other.serial;
            self.timestamp = other.timestamp;
            self.input_range = other.input_range;
            self.boards.clone_from(&other.boards);
            self.time.assign(&other.time);
            self.voltage.assign(&other.voltage);
        } else {
            *self = other.clone();
        }
    }
}

/// Builds the time axis of a channel from its cell widths:
/// `t[i] = sum of widths[(j + trigger_cell) % widths.len()] for j < i`.
pub fn time_axis(widths: &[f32], trigger_cell: u16, depth: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; depth];
    if widths.is_empty() {
        return out;
    }
    let n = widths.len();
    let tc = trigger_cell as usize;
    for i in 1..depth {
        out[i] = out[i - 1] + widths[(i - 1 + tc) % n];
    }
    out
}

/// One board's part of a ring slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBoard<'a> {
    pub board_index: u16,
    pub serial: u16,
    pub trigger_cell: u16,
    pub write_sr: u16,
    pub data: &'a [u8],
}

/// Layout of an event inside a ring slot, all little-endian:
///
/// ```text
/// u16 n_boards
/// n_boards x { u16 index, u16 serial, u16 trigger cell, u16 write SR, u32 len, len bytes }
/// 7 x u16 timestamp
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent<'a> {
    pub boards: Vec<RawBoard<'a>>,
    pub timestamp: Timestamp,
}

pub const RAW_BOARD_HEADER: usize = 12;

/// Upper bound of a slot holding the given transfer buffers.
pub fn max_raw_size(buffer_sizes: impl IntoIterator<Item = usize>) -> usize {
    2 + buffer_sizes
        .into_iter()
        .map(|s| RAW_BOARD_HEADER + s)
        .sum::<usize>()
        + Timestamp::WIRE_SIZE
}

impl<'a> RawEvent<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, AcquisitionError> {
        let mut cur = SlotReader { bytes, pos: 0 };
        let n = cur.u16()? as usize;
        let mut boards = Vec::with_capacity(n);
        for _ in 0..n {
            let board_index = cur.u16()?;
            let serial = cur.u16()?;
            let trigger_cell = cur.u16()?;
            let write_sr = cur.u16()?;
            let len = cur.u32()? as usize;
            let data = cur.take(len)?;
            boards.push(RawBoard {
                board_index,
                serial,
                trigger_cell,
                write_sr,
                data,
            });
        }
        let mut f = [0u16; 7];
        for v in f.iter_mut() {
            *v = cur.u16()?;
        }
        Ok(Self {
            boards,
            timestamp: Timestamp::from_fields(f),
        })
    }
}

struct SlotReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SlotReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], AcquisitionError> {
        let end = self.pos + n;
        let out = self.bytes.get(self.pos..end).ok_or_else(|| {
            AcquisitionError::Decode(format!(
                "need {n} bytes at offset {}, slot holds {}",
                self.pos,
                self.bytes.len()
            ))
        })?;
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, AcquisitionError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, AcquisitionError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Sequential writer filling a claimed ring slot.
pub struct SlotWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SlotWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    /// Overwrites a previously written `u16` at `at`.
    pub fn patch_u16(&mut self, at: usize, v: u16) {
        self.buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Unwritten remainder of the slot.
    pub fn remaining(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    pub fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    pub fn put_timestamp(&mut self, ts: Timestamp) {
        for v in ts.to_fields() {
            self.put_u16(v);
        }
    }
}
