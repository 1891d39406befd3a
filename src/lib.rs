//! Frisko heating controller poller
//!
//! Reads a fixed map of holding registers from a Frisko controller over
//! Modbus TCP (function 0x03), one register per request, and turns the raw
//! values into a snapshot of temperatures, contact inputs and output states.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ConnectionSettings};
pub use devices::{FriskoMeasurements, Measurement, RegisterDefinition};
pub use modbus::{ModbusTransport, RegisterReader, TcpSession};
pub use output::{ConsoleFormatter, DataFormatter, JsonFormatter};
pub use services::{PollPhase, PollService, PollStatus};
pub use utils::error::ModbusError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
