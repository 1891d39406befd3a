pub mod poll_service;

pub use poll_service::{PollPhase, PollService, PollStatus};
