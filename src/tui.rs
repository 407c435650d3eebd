use crate::{AcquisitionController, Counter};
use anyhow::Result;
use crossbeam_channel::tick;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use log::{info, warn};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Stylize,
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Paragraph, Widget},
    DefaultTerminal, Frame,
};
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

pub struct Status<'a> {
    controller: &'a AcquisitionController,
    pub counter: Counter,
    pub ring_level: usize,
    pub last_serial: u32,
    pub output: Option<PathBuf>,
    pub max_events: usize,
    message: Option<String>,
    exit: bool,
}

impl<'a> Status<'a> {
    pub fn new(
        controller: &'a AcquisitionController,
        output: Option<PathBuf>,
        max_events: usize,
    ) -> Self {
        Self {
            controller,
            counter: Counter::default(),
            ring_level: 0,
            last_serial: 0,
            output,
            max_events,
            message: None,
            exit: false,
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let ticker = tick(Duration::from_millis(250));
        let stats = self.controller.stats();

        while !self.exit {
            let _ = ticker.recv();

            // Drain stats channel
            while let Ok(s) = stats.try_recv() {
                self.counter.increment(s.bytes);
                self.ring_level = s.ring_level;
                self.last_serial = s.serial;
            }
            self.counter.evict(Instant::now());

            self.handle_events()?;
            terminal.draw(|f| self.draw(f))?;
        }
        Ok(())
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press {
                    self.handle_key_event(key_event);
                }
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        let c = self.controller;
        let result = match key_event.code {
            KeyCode::Char('q') => {
                self.exit = true;
                Ok(())
            }
            KeyCode::Char('r') => c.set_running(!c.is_running()).map_err(Into::into),
            KeyCode::Char('s') => c.set_single(true).map_err(Into::into),
            KeyCode::Char('t') => c.single_trigger().map_err(Into::into),
            KeyCode::Char('n') if c.board_count() > 1 => c
                .select_board((c.current_board() + 1) % c.board_count())
                .map_err(Into::into),
            KeyCode::Char('w') => self.toggle_recording(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("{e:#}");
            self.message = Some(format!("{e:#}"));
        }
    }

    fn toggle_recording(&mut self) -> anyhow::Result<()> {
        let c = self.controller;
        if c.is_recording() {
            if let Some(n) = c.stop_recording()? {
                self.message = Some(format!("recording closed after {n} events"));
            }
            return Ok(());
        }
        let Some(path) = self.output.clone() else {
            self.message = Some("no output file configured".into());
            return Ok(());
        };
        c.start_recording(&path, self.max_events)?;
        info!("recording started from the status screen");
        self.message = Some(format!("recording to {}", path.display()));
        Ok(())
    }

    fn mode(&self) -> &'static str {
        let c = self.controller;
        if c.is_running() {
            "RUN"
        } else if c.is_single() {
            "SINGLE"
        } else {
            "STOP"
        }
    }
}

impl Widget for &Status<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let c = self.controller;
        let board = format!(
            " DRS4 acquisition, board {}/{} ",
            c.current_board() + 1,
            c.board_count().max(1)
        );
        let title = Line::from(board.bold());
        let instructions = Line::from(vec![
            " Run ".into(),
            "<R>".blue().bold(),
            " Single ".into(),
            "<S>".blue().bold(),
            " Trigger ".into(),
            "<T>".blue().bold(),
            " Board ".into(),
            "<N>".blue().bold(),
            " Record ".into(),
            "<W>".blue().bold(),
            " Quit ".into(),
            "<Q> ".blue().bold(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);

        let mut mode = vec!["Mode: ".into(), self.mode().yellow()];
        if c.is_idle() {
            mode.push(" TRIG?".red().bold());
        }
        let mut lines = vec![
            Line::from(mode),
            Line::from(vec![
                "Elapsed time: ".into(),
                self.counter.t_begin.elapsed().as_secs().to_string().yellow(),
                " s".into(),
                " Events: ".into(),
                self.counter.n_events.to_string().yellow(),
                " Last: ".into(),
                self.last_serial.to_string().yellow(),
                " Rate: ".into(),
                format!("{:.1}", self.counter.event_rate()).yellow(),
                " Hz ".into(),
                format!("{:.2}", self.counter.rate()).yellow(),
                " MB/s".into(),
                " Avg: ".into(),
                format!("{:.2}", self.counter.average_rate()).yellow(),
                " MB/s".into(),
                " Buffer: ".into(),
                format!("{} kB", self.ring_level / 1024).yellow(),
            ]),
        ];
        match c.context().mirror.recording() {
            Some((path, n)) => lines.push(Line::from(vec![
                "Recording: ".into(),
                path.display().to_string().green(),
                format!(" {n}/{}", self.max_events).yellow(),
            ])),
            None => lines.push(Line::from("Recording: off")),
        }
        if let Some(w) = c.warnings().last() {
            lines.push(Line::from(w.clone().red()));
        }
        if let Some(m) = &self.message {
            lines.push(Line::from(m.clone().italic()));
        }

        Paragraph::new(Text::from(lines))
            .centered()
            .block(block)
            .render(area, buf);
    }
}
