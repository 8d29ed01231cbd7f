//! ==============================================================================
//! lib.rs - electronic nose bridge client
//! ==============================================================================
//!
//! purpose:
//!     client side of the e-nose rig. the bridge process owns the serial link
//!     to the sensor board; this crate talks to it over two tcp ports:
//!
//! ```text
//!     - command port: one text line per short-lived connection
//!     - data port: persistent stream of newline-delimited json readings
//! ```
//!
//! ```text
//!     on top of that: session buffers, statistics, csv / ingestion json
//!     export, the data library, gnuplot previews, cloud upload and a small
//!     live dashboard.
//! ```
//!
//! layout:
//!     domain     reading + fsm state decoding
//!     stream     auto-reconnecting data-stream client
//!     command    fire-and-forget command sender
//!     session    in-memory recording
//!     stats      per-sensor descriptive statistics
//!     export     csv / ingestion json files
//!     library    saved recordings on disk
//!     plot       external plot tool
//!     upload     ingestion api client
//!     dashboard  axum live view
//!     recorder   ties the above together for one recording
//!
//! ==============================================================================

pub mod command;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod export;
pub mod library;
pub mod logging;
pub mod plot;
pub mod recorder;
pub mod session;
pub mod stats;
pub mod stream;
pub mod upload;

pub use command::{BridgeCommand, BridgeCommander};
pub use config::BridgeConfig;
pub use domain::{FsmState, SensorReading};
pub use error::{BridgeError, Result};
pub use recorder::{RecordReport, RecordRequest, Recorder, StopReason};
pub use session::SampleSession;
pub use stream::{LineSource, StreamClient, StreamEvent, StreamHandle, TcpLineSource};
