use std::time::Duration;

use crate::policy::Policy;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Everything a connection needs to know, fixed for the life of the server.
#[derive(Clone, Debug)]
pub struct Config {
	/// The name the server presents itself as
	pub hostname: String,
	pub policy: Policy,
	pub max_line_length: usize,
	pub idle_timeout: Duration,
}

impl Config {
	pub fn new<S: Into<String>>(hostname: S, policy: Policy) -> Self {
		Self {
			hostname: hostname.into(),
			policy,
			max_line_length: DEFAULT_MAX_LINE_LENGTH,
			idle_timeout: DEFAULT_IDLE_TIMEOUT,
		}
	}
}
