//! Latest decoded event, kept for the display, and the active recording.
//!
//! One mutex guards both. The processor copies into the mirror and takes the
//! recorder out for the duration of a write, so no file I/O happens while the
//! lock is held.

use crate::error::SerializationError;
use crate::event::{ChannelId, Event};
use crate::writer::{DrsWriter, EventSink, TimeCalibration};
use crate::xml_writer::XmlWriter;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// An open recording plus its event budget.
pub struct Recorder {
    pub path: PathBuf,
    pub writer: Box<dyn EventSink>,
    pub max_events: usize,
}

impl Recorder {
    /// Opens `path` as XML when it ends in `.xml`, as DRS2 otherwise.
    pub fn create(
        path: impl AsRef<Path>,
        calibration: TimeCalibration,
        max_events: usize,
    ) -> Result<Self, SerializationError> {
        let path = path.as_ref().to_path_buf();
        let xml = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("xml"));
        let writer: Box<dyn EventSink> = if xml {
            Box::new(XmlWriter::create(&path)?)
        } else {
            Box::new(DrsWriter::create(&path, calibration)?)
        };
        Ok(Self {
            path,
            writer,
            max_events,
        })
    }

    pub fn is_full(&self) -> bool {
        self.writer.events() >= self.max_events
    }
}

#[derive(Default)]
struct MirrorState {
    event: Option<Event>,
    recorder: Option<Recorder>,
    /// Set while the processor holds the recorder outside the lock.
    recorder_lent: bool,
    published: u64,
}

#[derive(Default)]
pub struct SharedMirror {
    state: Mutex<MirrorState>,
}

impl SharedMirror {
    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the mirrored event with a copy of `ev`.
    pub fn publish(&self, ev: &Event) {
        let mut state = self.lock();
        match state.event.as_mut() {
            Some(current) => current.copy_from(ev),
            None => state.event = Some(ev.clone()),
        }
        state.published += 1;
    }

    /// Events published since creation.
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    pub fn snapshot(&self) -> Option<Event> {
        self.lock().event.clone()
    }

    pub fn waveform(&self, board: usize, channel: ChannelId) -> Option<Vec<f32>> {
        self.lock()
            .event
            .as_ref()
            .and_then(|ev| ev.waveform(board, channel))
            .map(|v| v.to_vec())
    }

    pub fn time(&self, board: usize, channel: ChannelId) -> Option<Vec<f32>> {
        self.lock()
            .event
            .as_ref()
            .and_then(|ev| ev.time(board, channel))
            .map(|t| t.to_vec())
    }

    /// Runs `f` on the mirrored event under the lock.
    pub fn with_event<R>(&self, f: impl FnOnce(&Event) -> R) -> Option<R> {
        self.lock().event.as_ref().map(f)
    }

    /// Installs a recorder, returning the one it replaces.
    pub fn set_recorder(&self, recorder: Recorder) -> Option<Recorder> {
        let mut state = self.lock();
        state.recorder_lent = false;
        state.recorder.replace(recorder)
    }

    pub fn clear_recorder(&self) -> Option<Recorder> {
        let mut state = self.lock();
        state.recorder_lent = false;
        state.recorder.take()
    }

    /// Lends the recorder to the caller. Hand it back with
    /// [`SharedMirror::return_recorder`].
    pub fn take_recorder(&self) -> Option<Recorder> {
        let mut state = self.lock();
        let recorder = state.recorder.take();
        state.recorder_lent = recorder.is_some();
        recorder
    }

    /// Ends a loan started by [`SharedMirror::take_recorder`]. A recorder
    /// handed back is reinstalled unless the recording was stopped or
    /// replaced meanwhile, in which case it is returned to the caller.
    /// Pass `None` when the recording is over.
    pub fn return_recorder(&self, recorder: Option<Recorder>) -> Option<Recorder> {
        let mut state = self.lock();
        if !state.recorder_lent {
            return recorder;
        }
        state.recorder_lent = false;
        match recorder {
            Some(r) if state.recorder.is_none() => {
                state.recorder = Some(r);
                None
            }
            other => other,
        }
    }

    /// Path and events written so far, if recording.
    pub fn recording(&self) -> Option<(PathBuf, usize)> {
        self.lock()
            .recorder
            .as_ref()
            .map(|r| (r.path.clone(), r.writer.events()))
    }

    pub fn is_recording(&self) -> bool {
        let state = self.lock();
        state.recorder.is_some() || state.recorder_lent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(dir: &tempfile::TempDir, name: &str) -> Recorder {
        Recorder::create(dir.path().join(name), TimeCalibration::default(), 3).unwrap()
    }

    #[test]
    fn file_extension_selects_the_format() {
        let dir = tempfile::tempdir().unwrap();
        let ev = Event::new(1, 8);

        let mut xml = recorder(&dir, "run.XML");
        xml.writer.write(&ev).unwrap();
        xml.writer.finish().unwrap();
        let text = std::fs::read_to_string(dir.path().join("run.XML")).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("<Event>"));

        // DRS2 needs the time calibration of every board
        let mut bin = recorder(&dir, "run.dat");
        assert!(matches!(
            bin.writer.write(&ev),
            Err(SerializationError::MissingCalibration(0))
        ));
        assert!(!bin.is_full());
    }

    #[test]
    fn publish_copies_into_the_held_event() {
        let mirror = SharedMirror::default();
        assert!(mirror.snapshot().is_none());

        let mut ev = Event::new(1, 1024);
        ev.serial = 7;
        ev.voltage[[0, 1, 3]] = 42.0;
        mirror.publish(&ev);
        ev.serial = 8;
        ev.voltage[[0, 1, 3]] = -1.0;
        mirror.publish(&ev);

        assert_eq!(mirror.published(), 2);
        assert_eq!(mirror.with_event(|e| e.serial), Some(8));
        let ch = ChannelId::new(1).unwrap();
        assert_eq!(mirror.waveform(0, ch).unwrap()[3], -1.0);
        assert!(mirror.waveform(1, ch).is_none());
    }

    #[test]
    fn lent_recorder_goes_back() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = SharedMirror::default();
        mirror.set_recorder(recorder(&dir, "a.dat"));

        let r = mirror.take_recorder().unwrap();
        assert!(mirror.is_recording());
        assert!(mirror.return_recorder(Some(r)).is_none());
        assert_eq!(mirror.recording().unwrap().1, 0);
    }

    #[test]
    fn stopped_recording_is_not_resurrected() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = SharedMirror::default();
        mirror.set_recorder(recorder(&dir, "a.dat"));

        let r = mirror.take_recorder().unwrap();
        assert!(mirror.clear_recorder().is_none());
        assert!(!mirror.is_recording());
        assert!(mirror.return_recorder(Some(r)).is_some());
        assert!(mirror.recording().is_none());
    }

    #[test]
    fn finished_loan_ends_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = SharedMirror::default();
        mirror.set_recorder(recorder(&dir, "a.dat"));

        let r = mirror.take_recorder().unwrap();
        assert!(r.max_events == 3);
        assert!(mirror.return_recorder(None).is_none());
        assert!(!mirror.is_recording());
    }
}
