use crate::error::DriverError;
use log::info;

/// Revision of a DRS4 evaluation board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalRevision {
    V1_1,
    V3,
    V4,
    V5,
}

/// The closed set of board families the acquisition layer knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardKind {
    Drs2Mezzanine,
    Drs4Evaluation(EvalRevision),
    Drs4Mezzanine { usb: bool },
}

/// Chip-level channel routing derived from a channel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRouting {
    /// Arguments for [`Board::set_channel_config`], when the board needs one.
    pub config: Option<(u8, u8, u8)>,
    pub chip: u8,
    /// Offset added to the physical channel of each logical channel.
    pub offset: u8,
}

/// Where the hardware trigger comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Channel(u8),
    /// OR of the channels whose bits are set.
    Mask(u8),
    External,
}

impl TriggerSource {
    /// Legacy encoding: 0..=3 select a channel, 4 is the external input.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0..=3 => Some(TriggerSource::Channel(index)),
            4 => Some(TriggerSource::External),
            _ => None,
        }
    }

    /// Channel whose waveform carries the trigger edge.
    pub fn primary_channel(self) -> Option<usize> {
        match self {
            TriggerSource::Channel(c) => Some(c as usize),
            TriggerSource::Mask(m) if m & 0x0F != 0 => Some((m & 0x0F).trailing_zeros() as usize),
            _ => None,
        }
    }
}

/// Capabilities that vary between board families.
pub trait BoardCapabilities {
    /// On-board analog trigger and transparent mode.
    fn has_builtin_trigger(&self) -> bool;
    /// The trigger source register takes a channel mask instead of an index.
    fn trigger_source_is_mask(&self) -> bool;
    /// Accepts an external reference clock for daisy-chaining.
    fn supports_refclk(&self) -> bool;
    fn drs_generation(&self) -> u8;
    fn max_sampling_speed(&self) -> f64;
    fn min_sampling_speed(&self, serial: u16) -> f64;
    fn channel_routing(&self, first_channel: u8, section: u8) -> ChannelRouting;
}

impl BoardKind {
    /// Maps the driver's numeric board type.
    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(BoardKind::Drs2Mezzanine),
            5 => Some(BoardKind::Drs4Evaluation(EvalRevision::V1_1)),
            6 => Some(BoardKind::Drs4Mezzanine { usb: true }),
            7 => Some(BoardKind::Drs4Evaluation(EvalRevision::V3)),
            8 => Some(BoardKind::Drs4Evaluation(EvalRevision::V4)),
            9 => Some(BoardKind::Drs4Evaluation(EvalRevision::V5)),
            _ => None,
        }
    }
}

impl BoardCapabilities for BoardKind {
    fn has_builtin_trigger(&self) -> bool {
        matches!(self, BoardKind::Drs4Evaluation(_))
    }

    fn trigger_source_is_mask(&self) -> bool {
        matches!(
            self,
            BoardKind::Drs4Evaluation(EvalRevision::V4 | EvalRevision::V5)
        )
    }

    fn supports_refclk(&self) -> bool {
        matches!(
            self,
            BoardKind::Drs4Mezzanine { .. }
                | BoardKind::Drs4Evaluation(EvalRevision::V4 | EvalRevision::V5)
        )
    }

    fn drs_generation(&self) -> u8 {
        match self {
            BoardKind::Drs2Mezzanine => 2,
            _ => 4,
        }
    }

    fn max_sampling_speed(&self) -> f64 {
        match self {
            BoardKind::Drs2Mezzanine => 4.0,
            _ => 5.0,
        }
    }

    fn min_sampling_speed(&self, serial: u16) -> f64 {
        match self {
            BoardKind::Drs2Mezzanine => 0.5,
            // modified boards for slow signals
            _ if matches!(serial, 2146 | 2205 | 2208) => 0.5,
            _ => 0.7,
        }
    }

    fn channel_routing(&self, first_channel: u8, section: u8) -> ChannelRouting {
        match self {
            BoardKind::Drs4Mezzanine { usb: true } => {
                let first = match (first_channel == 0 || first_channel == 2, section == 0) {
                    (true, true) => 1,
                    (true, false) => 0,
                    (false, true) => 3,
                    (false, false) => 2,
                };
                ChannelRouting {
                    config: Some((first, 8, 8)),
                    chip: first_channel,
                    offset: 0,
                }
            }
            BoardKind::Drs2Mezzanine => ChannelRouting {
                config: Some((7, 8, if section == 2 { 4 } else { 8 })),
                chip: first_channel / 2,
                offset: (first_channel % 2) * 4,
            },
            BoardKind::Drs4Evaluation(_) => ChannelRouting {
                config: Some((0, 8, if section == 2 { 4 } else { 8 })),
                chip: first_channel,
                offset: section,
            },
            BoardKind::Drs4Mezzanine { usb: false } => ChannelRouting {
                config: Some((7, 8, if section == 2 { 4 } else { 8 })),
                chip: first_channel,
                offset: section,
            },
        }
    }
}

/// Driver-level access to one digitizer board.
///
/// Physical channel numbers follow the chip layout: in normal mode logical
/// channel `w` reads physical channel `2 * w + offset`, in cascading mode
/// physical channel `w` holds both halves of the 2048-cell channel.
pub trait Board: Send {
    fn serial(&self) -> u16;
    fn kind(&self) -> BoardKind;
    fn firmware(&self) -> u32;

    fn is_busy(&mut self) -> bool;
    fn is_event_available(&mut self) -> bool;
    fn start_domino(&mut self) -> Result<(), DriverError>;
    fn soft_trigger(&mut self) -> Result<(), DriverError>;
    fn is_multi_buffer(&self) -> bool {
        false
    }

    /// Bytes [`Board::transfer_waves`] writes at most.
    fn waveform_buffer_size(&self) -> usize;
    fn transfer_waves(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;
    fn stop_cell(&self) -> u16;
    fn stop_wsr(&self) -> u16;
    /// Cells per logical channel, 1024 or 2048.
    fn channel_depth(&self) -> usize;
    fn is_cascading(&self) -> bool {
        self.channel_depth() > 1024
    }

    /// Decodes one physical channel from a transfer buffer into mV,
    /// in display order starting at the trigger cell.
    fn get_wave(
        &self,
        raw: &[u8],
        channel: usize,
        trigger_cell: u16,
        write_sr: u16,
        out: &mut [f32],
    ) -> Result<(), DriverError>;
    /// Calibrated sample times in ns, starting at the trigger cell.
    fn get_time(&self, channel: usize, trigger_cell: u16, out: &mut [f32]);
    /// Effective cell widths in ns, indexed by cell.
    fn time_calibration(&self, channel: usize) -> Vec<f32>;
    fn scaler(&mut self, channel: usize) -> u32;

    fn set_channel_config(&mut self, first: u8, last: u8, n_config: u8)
        -> Result<(), DriverError>;
    fn set_frequency(&mut self, ghz: f64) -> Result<(), DriverError>;
    fn nominal_frequency(&self) -> f64;
    fn true_frequency(&self) -> f64;
    fn is_pll_locked(&self) -> bool;
    fn set_input_range(&mut self, center: f64) -> Result<(), DriverError>;
    fn calibrated_input_range(&self) -> f64;
    fn calibrated_frequency(&self) -> f64;
    fn is_voltage_calibration_valid(&self) -> bool;
    fn is_timing_calibration_valid(&self) -> bool;

    fn enable_trigger(&mut self, external: bool, analog: bool) -> Result<(), DriverError>;
    fn set_trigger_source(&mut self, source: u16) -> Result<(), DriverError>;
    fn set_trigger_level(&mut self, volts: f64) -> Result<(), DriverError>;
    fn set_individual_trigger_level(&mut self, channel: usize, volts: f64)
        -> Result<(), DriverError>;
    fn set_trigger_polarity(&mut self, negative: bool) -> Result<(), DriverError>;
    fn set_trigger_delay_percent(&mut self, percent: u8) -> Result<(), DriverError>;
    fn trigger_delay_ns(&self) -> f64;
    fn set_refclk(&mut self, on: bool) -> Result<(), DriverError>;
    fn set_transparent_mode(&mut self, on: bool) -> Result<(), DriverError>;
}

/// Routes a trigger source the way the board family expects it.
pub fn apply_trigger_source(
    board: &mut dyn Board,
    source: TriggerSource,
) -> Result<(), DriverError> {
    let kind = board.kind();
    match source {
        TriggerSource::Mask(mask) if kind.trigger_source_is_mask() => {
            board.enable_trigger(true, false)?;
            board.set_trigger_source(mask as u16)
        }
        TriggerSource::Channel(c) if kind.trigger_source_is_mask() => {
            board.enable_trigger(true, false)?;
            board.set_trigger_source(1 << c)
        }
        TriggerSource::External if kind.trigger_source_is_mask() => {
            board.enable_trigger(true, false)?;
            board.set_trigger_source(1 << 4)
        }
        TriggerSource::External => board.enable_trigger(true, false),
        TriggerSource::Channel(c) => {
            board.enable_trigger(false, true)?;
            board.set_trigger_source(c as u16)
        }
        TriggerSource::Mask(mask) => {
            let c = (mask & 0x0F).trailing_zeros().min(3) as u16;
            board.enable_trigger(false, true)?;
            board.set_trigger_source(c)
        }
    }
}

/// Logs the identity and calibration state of a board.
pub fn log_all(index: usize, board: &dyn Board) {
    let kind = board.kind();
    info!("Board {index}:");
    info!("\tSerial number:\t{}", board.serial());
    info!("\tKind:\t\t{:?}", kind);
    info!("\tFirmware:\t{}", board.firmware());
    info!("\tDRS type:\tDRS{}", kind.drs_generation());
    info!("\tChannel depth:\t{}", board.channel_depth());
    info!(
        "\tFrequency:\t{:.3} GSPS (true {:.4})",
        board.nominal_frequency(),
        board.true_frequency()
    );
    info!("\tPLL locked:\t{}", board.is_pll_locked());
    info!(
        "\tVoltage cal:\t{}",
        if board.is_voltage_calibration_valid() {
            "valid"
        } else {
            "invalid"
        }
    );
    info!(
        "\tTiming cal:\t{} ({:.3} GSPS)",
        if board.is_timing_calibration_valid() {
            "valid"
        } else {
            "invalid"
        },
        board.calibrated_frequency()
    );
    info!(
        "\tCal. range:\t{:.3} V",
        board.calibrated_input_range()
    );
    info!("\tRefclk:\t\t{}", kind.supports_refclk());
    info!("\tMask trigger:\t{}", kind.trigger_source_is_mask());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes() {
        assert_eq!(BoardKind::from_type_code(3), Some(BoardKind::Drs2Mezzanine));
        assert_eq!(
            BoardKind::from_type_code(9),
            Some(BoardKind::Drs4Evaluation(EvalRevision::V5))
        );
        assert_eq!(BoardKind::from_type_code(4), None);
    }

    #[test]
    fn capabilities_per_kind() {
        let v5 = BoardKind::Drs4Evaluation(EvalRevision::V5);
        let v3 = BoardKind::Drs4Evaluation(EvalRevision::V3);
        let mezz = BoardKind::Drs4Mezzanine { usb: false };
        assert!(v5.trigger_source_is_mask());
        assert!(!v3.trigger_source_is_mask());
        assert!(v5.supports_refclk() && mezz.supports_refclk());
        assert!(!v3.supports_refclk());
        assert!(v3.has_builtin_trigger() && !mezz.has_builtin_trigger());
        assert_eq!(BoardKind::Drs2Mezzanine.max_sampling_speed(), 4.0);
        assert_eq!(v5.min_sampling_speed(2205), 0.5);
        assert_eq!(v5.min_sampling_speed(3000), 0.7);
    }

    #[test]
    fn routing_for_cascading_section() {
        let v5 = BoardKind::Drs4Evaluation(EvalRevision::V5);
        let r = v5.channel_routing(0, 2);
        assert_eq!(r.config, Some((0, 8, 4)));
        assert_eq!(r.offset, 2);

        let drs2 = BoardKind::Drs2Mezzanine.channel_routing(3, 0);
        assert_eq!(drs2.chip, 1);
        assert_eq!(drs2.offset, 4);

        let usb = BoardKind::Drs4Mezzanine { usb: true }.channel_routing(1, 1);
        assert_eq!(usb.config, Some((2, 8, 8)));
        assert_eq!(usb.offset, 0);
    }

    #[test]
    fn primary_trigger_channel() {
        assert_eq!(TriggerSource::Channel(2).primary_channel(), Some(2));
        assert_eq!(TriggerSource::Mask(0b1100).primary_channel(), Some(2));
        assert_eq!(TriggerSource::External.primary_channel(), None);
        assert_eq!(TriggerSource::from_index(4), Some(TriggerSource::External));
        assert_eq!(TriggerSource::from_index(7), None);
    }
}
