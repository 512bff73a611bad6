//! musecsv records EEG readings from Interaxon Muse headsets into an
//! append-only CSV log. It provides a Bluetooth LE client for the headset,
//! an OSC receiver for readings relayed over UDP, a small connection manager
//! around either, and the sink that turns every reading into one timestamped
//! line.

pub mod comm;
pub mod device;
pub mod error;
pub mod mock;
pub mod osc;
pub mod recorder;
pub mod session;
pub mod sink;

pub use error::{Error, Result};
