use crate::error::SerializationError;
use crate::event::{ChannelId, Event};
use crate::writer::EventSink;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::Writer;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const ROOT: &str = "DRSOsc";

/// Writes events as XML, one `<Event>` element per event with the
/// `time,voltage` pairs of every enabled channel.
///
/// The root element is opened in front of the first event and closed by
/// [`EventSink::finish`].
pub struct XmlWriter<W: Write> {
    xml: Writer<W>,
    open: bool,
    closed: bool,
    events: usize,
}

impl XmlWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SerializationError> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> XmlWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            xml: Writer::new_with_indent(out, b' ', 2),
            open: false,
            closed: false,
            events: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.xml.into_inner()
    }

    fn element(&mut self, name: &str, text: &str) -> Result<(), SerializationError> {
        self.xml
            .create_element(name)
            .write_text_content(BytesText::new(text))?;
        Ok(())
    }

    fn start(&mut self, name: &str) -> Result<(), SerializationError> {
        self.xml.write_event(XmlEvent::Start(BytesStart::new(name)))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<(), SerializationError> {
        self.xml.write_event(XmlEvent::End(BytesEnd::new(name)))?;
        Ok(())
    }
}

impl<W: Write + Send> EventSink for XmlWriter<W> {
    fn write(&mut self, event: &Event) -> Result<(), SerializationError> {
        if self.closed {
            return Err(SerializationError::Closed);
        }
        if !self.open {
            self.xml
                .write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("ISO-8859-1"), None)))?;
            self.start(ROOT)?;
            self.open = true;
        }

        let ts = &event.timestamp;
        self.start("Event")?;
        self.element("Serial", &event.serial.to_string())?;
        let time = format!(
            "{:4}/{:02}/{:02} {:02}:{:02}:{:02}.{:03}",
            ts.year, ts.month, ts.day, ts.hour, ts.minute, ts.second, ts.millisecond
        );
        self.element("Time", &time)?;
        self.element("HUnit", "ns")?;
        self.element("VUnit", "mV")?;

        for (b, record) in event.boards.iter().enumerate() {
            let board = format!("Board_{}", record.serial);
            self.start(&board)?;
            self.element("Trigger_Cell", &record.trigger_cell.to_string())?;
            for ch in ChannelId::ALL {
                let c = ch.index();
                if !record.enabled[c] {
                    continue;
                }
                let (Some(t), Some(v)) = (event.time(b, ch), event.waveform(b, ch)) else {
                    continue;
                };
                self.element(&format!("Scaler{c}"), &record.scalers[c].to_string())?;
                let chn = format!("CHN{}", c + 1);
                self.start(&chn)?;
                for (t, v) in t.iter().zip(v.iter()) {
                    self.element("Data", &format!("{t:.3},{v:.1}"))?;
                }
                self.end(&chn)?;
            }
            self.end(&board)?;
        }
        self.end("Event")?;
        self.events += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SerializationError> {
        self.xml.get_mut().flush()?;
        Ok(())
    }

    fn events(&self) -> usize {
        self.events
    }

    fn finish(&mut self) -> Result<(), SerializationError> {
        if self.open && !self.closed {
            self.end(ROOT)?;
        }
        self.closed = true;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BoardRecord, Timestamp};

    fn event() -> Event {
        let mut ev = Event::new(1, 4);
        ev.serial = 7;
        ev.timestamp = Timestamp {
            year: 2025,
            month: 3,
            day: 9,
            hour: 8,
            minute: 5,
            second: 1,
            millisecond: 42,
        };
        ev.boards[0] = BoardRecord {
            serial: 2801,
            trigger_cell: 513,
            enabled: [true, false, true, false],
            scalers: [120, 0, 7, 0],
            ..Default::default()
        };
        for j in 0..4 {
            ev.time[[0, 0, j]] = j as f32 * 0.2;
            ev.voltage[[0, 0, j]] = j as f32 * 10.0 - 5.0;
        }
        ev
    }

    fn text(w: XmlWriter<Vec<u8>>) -> String {
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn event_layout() {
        let mut w = XmlWriter::new(Vec::new());
        w.write(&event()).unwrap();
        w.finish().unwrap();
        assert_eq!(w.events(), 1);
        let xml = text(w);

        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<DRSOsc>"));
        assert!(xml.trim_end().ends_with("</DRSOsc>"));
        assert!(xml.contains("<Serial>7</Serial>"));
        assert!(xml.contains("<Time>2025/03/09 08:05:01.042</Time>"));
        assert!(xml.contains("<Board_2801>"));
        assert!(xml.contains("<Trigger_Cell>513</Trigger_Cell>"));
        assert!(xml.contains("<Scaler0>120</Scaler0>"));
        assert!(xml.contains("<Scaler2>7</Scaler2>"));
        assert!(!xml.contains("<CHN2>"));
        assert!(xml.contains("<Data>0.200,5.0</Data>"));
        assert!(xml.contains("<Data>0.000,-5.0</Data>"));
        // two enabled channels, four samples each
        assert_eq!(xml.matches("<Data>").count(), 8);
    }

    #[test]
    fn root_wraps_every_event() {
        let mut w = XmlWriter::new(Vec::new());
        for _ in 0..3 {
            w.write(&event()).unwrap();
        }
        w.finish().unwrap();
        w.finish().unwrap();
        assert!(matches!(w.write(&event()), Err(SerializationError::Closed)));
        let xml = text(w);
        assert_eq!(xml.matches("<DRSOsc>").count(), 1);
        assert_eq!(xml.matches("</DRSOsc>").count(), 1);
        assert_eq!(xml.matches("<Event>").count(), 3);
    }

    #[test]
    fn empty_recording_stays_empty() {
        let mut w = XmlWriter::new(Vec::new());
        w.finish().unwrap();
        assert!(text(w).is_empty());
    }
}
