use crate::error::FormatError;
use crate::event::{time_axis, BoardRecord, Event, Timestamp, N_CELLS, N_CHANNELS};
use crate::writer::{decode_range, decode_sample, BoardCalibration, TimeCalibration};
use log::warn;
use std::path::Path;

/// Bin widths outside this range (ns) mark a calibration block whose second
/// half was never filled, as written for 2048-cell channels.
const PLAUSIBLE_WIDTH_NS: std::ops::RangeInclusive<f32> = 0.01..=10.0;

/// Reads every event of a DRS2 file.
pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Event>, FormatError> {
    let bytes = std::fs::read(path)?;
    DrsReader::new(&bytes)?.collect()
}

enum Step {
    Truncated,
    Format(FormatError),
}

impl From<FormatError> for Step {
    fn from(e: FormatError) -> Self {
        Step::Format(e)
    }
}

/// Sequential reader over an in-memory DRS2 stream.
///
/// The header is parsed on construction. Boards and channels are discovered
/// from their tags, so files with any number of boards and enabled channels
/// are accepted.
pub struct DrsReader<'a> {
    buf: &'a [u8],
    pos: usize,
    calibration: TimeCalibration,
    done: bool,
}

impl<'a> DrsReader<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, FormatError> {
        let mut r = Self {
            buf,
            pos: 0,
            calibration: TimeCalibration::default(),
            done: false,
        };
        r.read_header().map_err(|e| match e {
            Step::Format(e) => e,
            Step::Truncated => FormatError::Malformed {
                expected: "file header".into(),
                found: "end of file".into(),
                offset: r.pos,
            },
        })?;
        Ok(r)
    }

    pub fn calibration(&self) -> &TimeCalibration {
        &self.calibration
    }

    /// Next event, `None` at the end of the stream. A truncated trailing
    /// event is dropped.
    pub fn next_event(&mut self) -> Result<Option<Event>, FormatError> {
        if self.done || self.pos >= self.buf.len() {
            return Ok(None);
        }
        let start = self.pos;
        match self.read_event() {
            Ok(ev) => Ok(Some(ev)),
            Err(Step::Truncated) => {
                warn!("DRS2 stream ends inside the event starting at offset {start}");
                self.done = true;
                Ok(None)
            }
            Err(Step::Format(e)) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.buf.get(self.pos..self.pos + n)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Step> {
        let out = self.peek(n).ok_or(Step::Truncated)?;
        self.pos += n;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, Step> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Step> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn expect(&mut self, tag: &str) -> Result<(), Step> {
        let offset = self.pos;
        let found = self.take(tag.len())?;
        if found != tag.as_bytes() {
            return Err(Step::Format(FormatError::Malformed {
                expected: tag.into(),
                found: String::from_utf8_lossy(found).into_owned(),
                offset,
            }));
        }
        Ok(())
    }

    /// Channel index of a `Cnnn` tag at the current position, if there is one.
    fn channel_tag(&mut self) -> Result<Option<usize>, Step> {
        match self.peek(4) {
            Some(tag) if tag[0] == b'C' => {
                let offset = self.pos;
                self.pos += 4;
                let text = String::from_utf8_lossy(tag).into_owned();
                let index = text[1..]
                    .parse::<usize>()
                    .ok()
                    .filter(|n| (1..=N_CHANNELS).contains(n))
                    .ok_or(FormatError::BadChannel { tag: text, offset })?;
                Ok(Some(index - 1))
            }
            _ => Ok(None),
        }
    }

    fn read_header(&mut self) -> Result<(), Step> {
        self.expect("DRS2")?;
        self.expect("TIME")?;
        while self.peek(2) == Some(b"B#".as_slice()) {
            self.pos += 2;
            let mut board = BoardCalibration {
                serial: self.u16()?,
                ..Default::default()
            };
            while let Some(c) = self.channel_tag()? {
                let raw = self.take(4 * N_CELLS)?;
                board.widths[c] = raw
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                repair_half_widths(&mut board.widths[c]);
            }
            self.calibration.boards.push(board);
        }
        Ok(())
    }

    fn read_event(&mut self) -> Result<Event, Step> {
        self.expect("EHDR")?;
        let n_boards = self.calibration.boards.len();
        let mut ev = Event::new(n_boards, N_CELLS);
        ev.serial = self.u32()?;
        let mut fields = [0u16; 7];
        for f in fields.iter_mut() {
            *f = self.u16()?;
        }
        ev.timestamp = Timestamp::from_fields(fields);
        ev.input_range = decode_range(self.u16()?);

        for b in 0..n_boards {
            self.expect("B#")?;
            let mut record = BoardRecord {
                serial: self.u16()?,
                ..Default::default()
            };
            self.expect("T#")?;
            record.trigger_cell = self.u16()?;

            while let Some(c) = self.channel_tag()? {
                record.enabled[c] = true;
                record.scalers[c] = self.u32()?;
                let raw = self.take(2 * N_CELLS)?;
                for (j, s) in raw.chunks_exact(2).enumerate() {
                    let sample = u16::from_le_bytes([s[0], s[1]]);
                    ev.voltage[[b, c, j]] = decode_sample(sample, ev.input_range);
                }
                let widths = &self.calibration.boards[b].widths[c];
                if widths.is_empty() {
                    return Err(Step::Format(FormatError::MissingCalibration {
                        board: b,
                        channel: c,
                    }));
                }
                let axis = time_axis(widths, record.trigger_cell, N_CELLS);
                for (j, t) in axis.into_iter().enumerate() {
                    ev.time[[b, c, j]] = t;
                }
            }
            align_cell_zero(&mut ev, b, &record);
            ev.boards[b] = record;
        }
        Ok(ev)
    }
}

/// Copies the first half of a calibration block over an implausible second
/// half.
fn repair_half_widths(widths: &mut [f32]) {
    let half = N_CELLS / 2;
    let last = widths.last().copied();
    if let Some(w) = last {
        if widths.len() == N_CELLS && !PLAUSIBLE_WIDTH_NS.contains(&w) {
            widths.copy_within(..half, half);
        }
    }
}

/// Shifts every channel of board `b` so that the time of cell #0 matches the
/// first enabled channel.
fn align_cell_zero(ev: &mut Event, b: usize, record: &BoardRecord) {
    let cell0 = (N_CELLS - record.trigger_cell as usize % N_CELLS) % N_CELLS;
    let mut enabled = (0..N_CHANNELS).filter(|&c| record.enabled[c]);
    let Some(reference) = enabled.next() else {
        return;
    };
    let t0 = ev.time[[b, reference, cell0]];
    for c in enabled {
        let dt = t0 - ev.time[[b, c, cell0]];
        ev.time
            .slice_mut(ndarray::s![b, c, ..])
            .mapv_inplace(|t| t + dt);
    }
}

impl Iterator for DrsReader<'_> {
    type Item = Result<Event, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
