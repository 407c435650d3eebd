use confique::Config;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub board_settings: BoardSettings,
    #[config(nested)]
    pub trigger_settings: TriggerSettings,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    /// Read all boards into one event.
    #[config(default = false)]
    pub multi_board: bool,
    #[config(default = false)]
    pub spike_removal: bool,
    #[config(default = true)]
    pub trigger_correction: bool,
    /// Ring buffer size in MiB.
    #[config(default = 4)]
    pub ring_buffer_mb: usize,
    /// Number of simulated boards to use when no hardware driver is linked.
    #[config(default = 1)]
    pub simulated_boards: usize,
    #[config(default = "drs_osc.log")]
    pub log_file: String,
    pub output_file: Option<String>,
    #[config(default = 1000)]
    pub max_events: usize,
}

#[derive(Config, Debug, Clone)]
pub struct BoardSettings {
    /// GSPS
    #[config(default = 5.0)]
    pub sampling_speed: f64,
    /// Centre of the input range in V.
    #[config(default = 0.0)]
    pub input_range: f64,
    #[config(default = 0)]
    pub first_channel: u8,
    /// 2 selects 2048-cell cascading.
    #[config(default = 0)]
    pub chn_section: u8,
    pub en_chans: ChannelConfig,
    /// Indices of boards fed with the reference clock of board 0.
    #[config(default = [])]
    pub refclk: Vec<usize>,
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    #[config(default = true)]
    pub auto: bool,
    /// 0..=3 select a channel, 4 the external input.
    #[config(default = 0)]
    pub source: u8,
    /// Channel mask for boards that OR several trigger inputs.
    pub source_mask: Option<u8>,
    #[config(default = false)]
    pub negative: bool,
    pub level: TriggerLevel,
    /// Percent of the sampling window after the trigger.
    #[config(default = 50)]
    pub delay: u8,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ChannelConfig {
    All(bool),
    List(Vec<u32>),
}

impl ChannelConfig {
    /// Enable flags of the four channels. Channels are numbered from 1.
    pub fn flags(&self) -> [bool; 4] {
        match self {
            ChannelConfig::All(on) => [*on; 4],
            ChannelConfig::List(channels) => {
                std::array::from_fn(|c| channels.contains(&(c as u32 + 1)))
            }
        }
    }
}

/// Trigger level in V.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum TriggerLevel {
    Global(f64),
    PerChannel(HashMap<String, f64>),
}

impl TriggerLevel {
    pub fn levels(&self) -> [f64; 4] {
        match self {
            TriggerLevel::Global(v) => [*v; 4],
            TriggerLevel::PerChannel(map) => std::array::from_fn(|c| {
                map.get(&(c + 1).to_string()).copied().unwrap_or(0.0)
            }),
        }
    }
}
