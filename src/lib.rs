pub mod aggregator;
pub mod clock;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod listener;
pub mod protocol;
pub mod runner;
pub mod simulator;
pub mod timer;
pub mod transport;
pub mod types;

pub use clock::WordClock;
pub use config::WordClockConfig;
pub use listener::{ChannelListener, ClockEvent, ClockEventChannel, RecordingListener, WordClockListener};
pub use runner::{ClockRequest, ClockRequestChannel, ClockRunner};
pub use transport::{Transport, TransportError, TransportEvent, TransportEventChannel};
pub use types::*;
