use crate::error::SerializationError;
use crate::event::{Event, N_CELLS, N_CHANNELS};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Effective cell widths (ns) of one board, per logical channel.
/// Empty vectors mark channels without calibration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoardCalibration {
    pub serial: u16,
    pub widths: [Vec<f32>; N_CHANNELS],
}

/// Time calibration of every board taking part in a recording.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeCalibration {
    pub boards: Vec<BoardCalibration>,
}

/// Maps a voltage in mV onto the 16-bit sample scale of the input range.
pub fn encode_sample(mv: f32, range: f64) -> u16 {
    ((mv as f64 / 1000.0 - range + 0.5) * 65535.0)
        .round()
        .clamp(0.0, 65535.0) as u16
}

pub fn decode_sample(raw: u16, range: f64) -> f32 {
    ((raw as f64 / 65535.0 + range - 0.5) * 1000.0) as f32
}

/// Input range centre as stored in the event header (mV, two's complement).
pub fn encode_range(range: f64) -> u16 {
    (range * 1000.0).round() as i16 as u16
}

pub fn decode_range(raw: u16) -> f64 {
    raw as i16 as f64 / 1000.0
}

/// Destination of saved events.
pub trait EventSink: Send {
    fn write(&mut self, event: &Event) -> Result<(), SerializationError>;

    fn flush(&mut self) -> Result<(), SerializationError>;

    /// Events written so far.
    fn events(&self) -> usize;

    /// Completes the output. No event may be written afterwards.
    fn finish(&mut self) -> Result<(), SerializationError> {
        self.flush()
    }
}

/// Writes events in the DRS2 binary format.
///
/// The file header carrying the time calibration is emitted in front of the
/// first event. Channels are written only when enabled in the event's board
/// record; 2048-sample channels are stored as 1024 pair averages.
pub struct DrsWriter<W: Write> {
    out: W,
    calibration: TimeCalibration,
    header_written: bool,
    events: usize,
    scratch: Vec<u8>,
}

impl DrsWriter<BufWriter<File>> {
    pub fn create(
        path: impl AsRef<Path>,
        calibration: TimeCalibration,
    ) -> Result<Self, SerializationError> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), calibration))
    }
}

impl<W: Write> DrsWriter<W> {
    pub fn new(out: W, calibration: TimeCalibration) -> Self {
        Self {
            out,
            calibration,
            header_written: false,
            events: 0,
            scratch: Vec::new(),
        }
    }

    /// Events written so far.
    pub fn events(&self) -> usize {
        self.events
    }

    pub fn write(&mut self, event: &Event) -> Result<(), SerializationError> {
        self.scratch.clear();
        if !self.header_written {
            self.encode_header(event)?;
        }
        self.encode_event(event);
        self.out.write_all(&self.scratch)?;
        self.header_written = true;
        self.events += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SerializationError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn encode_header(&mut self, event: &Event) -> Result<(), SerializationError> {
        let buf = &mut self.scratch;
        buf.extend_from_slice(b"DRS2");
        buf.extend_from_slice(b"TIME");
        let depth = event.depth();
        for (b, record) in event.boards.iter().enumerate() {
            let cal = self
                .calibration
                .boards
                .get(b)
                .ok_or(SerializationError::MissingCalibration(b))?;
            buf.extend_from_slice(b"B#");
            buf.extend_from_slice(&record.serial.to_le_bytes());
            for (c, widths) in cal.widths.iter().enumerate() {
                if !record.enabled[c] {
                    continue;
                }
                if widths.is_empty() {
                    return Err(SerializationError::MissingCalibration(b));
                }
                buf.extend_from_slice(channel_tag(c).as_bytes());
                let n = widths.len();
                for j in 0..N_CELLS {
                    let w = if depth > N_CELLS {
                        (widths[(2 * j) % n] + widths[(2 * j + 1) % n]) / 2.0
                    } else {
                        widths[j % n]
                    };
                    buf.extend_from_slice(&w.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn encode_event(&mut self, event: &Event) {
        let buf = &mut self.scratch;
        let range = event.input_range;
        buf.extend_from_slice(b"EHDR");
        buf.extend_from_slice(&event.serial.to_le_bytes());
        for v in event.timestamp.to_fields() {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&encode_range(range).to_le_bytes());

        let depth = event.depth();
        for (b, record) in event.boards.iter().enumerate() {
            buf.extend_from_slice(b"B#");
            buf.extend_from_slice(&record.serial.to_le_bytes());
            buf.extend_from_slice(b"T#");
            buf.extend_from_slice(&record.trigger_cell.to_le_bytes());
            for c in 0..N_CHANNELS {
                if !record.enabled[c] {
                    continue;
                }
                buf.extend_from_slice(channel_tag(c).as_bytes());
                buf.extend_from_slice(&record.scalers[c].to_le_bytes());
                for j in 0..N_CELLS {
                    let mv = if depth > N_CELLS {
                        (event.voltage[[b, c, 2 * j]] + event.voltage[[b, c, 2 * j + 1]]) / 2.0
                    } else if j < depth {
                        event.voltage[[b, c, j]]
                    } else {
                        0.0
                    };
                    buf.extend_from_slice(&encode_sample(mv, range).to_le_bytes());
                }
            }
        }
    }
}

/// `C001` .. `C004`
fn channel_tag(channel: usize) -> String {
    format!("C{:03}", channel + 1)
}

impl<W: Write + Send> EventSink for DrsWriter<W> {
    fn write(&mut self, event: &Event) -> Result<(), SerializationError> {
        DrsWriter::write(self, event)
    }

    fn flush(&mut self) -> Result<(), SerializationError> {
        DrsWriter::flush(self)
    }

    fn events(&self) -> usize {
        DrsWriter::events(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_scale_spans_input_range() {
        assert_eq!(encode_sample(-500.0, 0.0), 0);
        assert_eq!(encode_sample(500.0, 0.0), 65535);
        assert_eq!(encode_sample(900.0, 0.0), 65535);
        assert_eq!(encode_sample(0.0, 0.45), encode_sample(-450.0, 0.0));
        assert!((decode_sample(encode_sample(123.4, 0.1), 0.1) - 123.4).abs() < 0.02);
    }

    #[test]
    fn negative_range_survives_the_header_field() {
        assert_eq!(decode_range(encode_range(-0.05)), -0.05);
        assert_eq!(decode_range(encode_range(0.45)), 0.45);
    }

    #[test]
    fn header_precedes_first_event_only() {
        let mut ev = Event::new(1, 1024);
        ev.boards[0].serial = 2801;
        ev.boards[0].enabled = [true, false, false, false];
        let cal = TimeCalibration {
            boards: vec![BoardCalibration {
                serial: 2801,
                widths: [vec![0.2; 1024], Vec::new(), Vec::new(), Vec::new()],
            }],
        };
        let mut w = DrsWriter::new(Vec::new(), cal);
        w.write(&ev).unwrap();
        w.write(&ev).unwrap();
        let bytes = w.into_inner();

        let header = 8 + 4 + 4 + 1024 * 4;
        let event = 4 + 4 + 14 + 2 + 4 + 4 + 4 + 4 + 1024 * 2;
        assert_eq!(bytes.len(), header + 2 * event);
        assert_eq!(&bytes[..8], b"DRS2TIME");
        assert_eq!(&bytes[8..10], b"B#");
        assert_eq!(&bytes[12..16], b"C001");
        assert_eq!(&bytes[header..header + 4], b"EHDR");
        assert_eq!(&bytes[header + event..header + event + 4], b"EHDR");
    }

    #[test]
    fn enabled_channel_without_calibration_fails() {
        let mut ev = Event::new(1, 1024);
        ev.boards[0].enabled = [false, true, false, false];
        let mut w = DrsWriter::new(Vec::new(), TimeCalibration::default());
        assert!(matches!(
            w.write(&ev),
            Err(SerializationError::MissingCalibration(0))
        ));
    }
}
