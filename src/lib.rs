pub mod board;
pub mod conditioner;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod event;
pub mod mirror;
pub mod processor;
pub mod producer;
pub mod reader;
pub mod ring_buffer;
pub mod sim_board;
pub mod tui;
pub mod utils;
pub mod worker;
pub mod writer;
pub mod xml_writer;

pub use board::{Board, BoardCapabilities, BoardKind, EvalRevision, TriggerSource};
pub use config::{ChannelConfig, Conf, TriggerLevel};
pub use context::{AcquisitionContext, AcquisitionSettings};
pub use controller::AcquisitionController;
pub use error::{AcquisitionError, DriverError, FormatError, RingError, SerializationError};
pub use event::{ChannelId, Event, Timestamp};
pub use reader::{read_all, DrsReader};
pub use sim_board::SimulatedBoard;
pub use tui::Status;
pub use utils::Counter;
pub use writer::{BoardCalibration, DrsWriter, EventSink, TimeCalibration};
pub use xml_writer::XmlWriter;
