pub mod settings;

pub use settings::{Config, ConnectionSettings, OutputConfig, PollingConfig, DEFAULT_HOST, DEFAULT_PORT};
