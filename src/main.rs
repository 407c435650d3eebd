use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use confique::Config;
use drs_osc::{
    read_all, AcquisitionController, Board, ChannelId, Conf, SimulatedBoard, Status,
};
use log::{info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::{fs::File, path::PathBuf, time::Duration};

#[derive(Parser)]
#[command(name = "drs_osc")]
#[command(about = "DRS4 waveform acquisition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire events, optionally recording them to a DRS2 file
    Run {
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// Number of simulated boards (0 runs the demo signal)
        #[arg(long)]
        simulate: Option<usize>,

        /// Record to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Events to record
        #[arg(long)]
        events: Option<usize>,

        /// No status screen; acquire until the events are recorded
        #[arg(long)]
        headless: bool,
    },

    /// Summarize a DRS2 file
    Inspect { file: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            simulate,
            output,
            events,
            headless,
        } => run(config, simulate, output, events, headless),
        Commands::Inspect { file } => inspect(file),
    }
}

fn init_logging(log_file: &str, headless: bool) -> Result<()> {
    let config = ConfigBuilder::new().set_thread_level(LevelFilter::Debug).build();
    let file = File::create(log_file).with_context(|| format!("creating log file {log_file}"))?;
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(WriteLogger::new(LevelFilter::Debug, config.clone(), file));
    // the status screen owns the terminal otherwise
    if headless {
        loggers.push(TermLogger::new(
            LevelFilter::Info,
            config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn run(
    config: PathBuf,
    simulate: Option<usize>,
    output: Option<PathBuf>,
    events: Option<usize>,
    headless: bool,
) -> Result<()> {
    let conf = Conf::builder()
        .file(&config)
        .load()
        .with_context(|| format!("loading {}", config.display()))?;
    init_logging(&conf.run_settings.log_file, headless)?;
    info!("configuration loaded from {}", config.display());

    let n_boards = simulate.unwrap_or(conf.run_settings.simulated_boards);
    let boards: Vec<Box<dyn Board>> = (0..n_boards)
        .map(|i| Box::new(SimulatedBoard::new(2800 + i as u16, i as u64)) as Box<dyn Board>)
        .collect();
    let output = output.or_else(|| conf.run_settings.output_file.as_ref().map(PathBuf::from));
    let max_events = events.unwrap_or(conf.run_settings.max_events);

    let controller = AcquisitionController::from_conf(boards, &conf)?;
    controller.set_running(true)?;

    if headless {
        let Some(path) = output else {
            anyhow::bail!("headless mode needs an output file");
        };
        controller.start_recording(&path, max_events)?;
        while controller.is_recording() {
            std::thread::sleep(Duration::from_millis(50));
        }
        controller.set_running(false)?;
        info!("{max_events} events recorded to {}", path.display());
        for w in controller.warnings() {
            info!("warning during run: {w}");
        }
        return Ok(());
    }

    let mut terminal = ratatui::init();
    let result = Status::new(&controller, output, max_events).run(&mut terminal);
    ratatui::restore();
    controller.set_running(false)?;
    result
}

fn inspect(file: PathBuf) -> Result<()> {
    let events = read_all(&file).with_context(|| format!("reading {}", file.display()))?;
    println!("{}: {} events", file.display(), events.len());
    let Some(first) = events.first() else {
        return Ok(());
    };
    let serials: Vec<String> = first.boards.iter().map(|b| b.serial.to_string()).collect();
    println!("boards: {}", serials.join(", "));
    println!("samples per channel: {}", first.depth());

    for ev in &events {
        let mut line = format!(
            "#{:<6} {}  range {:+.3} V",
            ev.serial, ev.timestamp, ev.input_range
        );
        for (b, record) in ev.boards.iter().enumerate() {
            line.push_str(&format!("  B{} tc={:4}", record.serial, record.trigger_cell));
            for ch in ChannelId::ALL {
                if !record.enabled[ch.index()] {
                    continue;
                }
                let Some(v) = ev.waveform(b, ch) else {
                    continue;
                };
                let (lo, hi) = v
                    .iter()
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), x| {
                        (lo.min(*x), hi.max(*x))
                    });
                line.push_str(&format!(" {ch}[{lo:.1},{hi:.1}]"));
            }
        }
        println!("{line}");
    }
    Ok(())
}
