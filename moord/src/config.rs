use std::{
	net::{IpAddr, SocketAddr},
	path::PathBuf,
	str::FromStr,
	time::Duration,
};

use confindent::Confindent;
use getopts::Options;
use moor::{config as defaults, policy::Policy};
use thiserror::Error;

const DEFAULT_CONFIG: &str = "/etc/moor/moor.conf";
const FALLBACK_CONFIG: &str = "moor.conf";

pub struct Config {
	pub address: IpAddr,
	pub port: u16,
	pub spool: PathBuf,
	pub hostname: String,
	pub domains: Vec<String>,
	pub max_message_size: usize,
	pub max_line_length: usize,
	pub idle_timeout: Duration,
	pub verbose: bool,
}

impl Config {
	fn options() -> Options {
		let mut opts = Options::new();
		opts.optflag("h", "help", "Print this help message");
		opts.optflag("v", "verbose", "Log every command and spool write");
		opts.optopt(
			"l",
			"listen-address",
			"The IP address moor will listen for incoming connections on\nDefault: 127.0.0.1",
			"IP_ADDR",
		);
		opts.optopt(
			"p",
			"port",
			"The port moor will listen on\nDefault: 2525",
			"PORT",
		);
		opts.optopt(
			"s",
			"spool",
			"The directory accepted messages are written to\nDefault: /tmp/smtp-mvp",
			"PATH",
		);
		opts.optopt(
			"c",
			"config",
			"An alternate location to read the config from\nDefault: /etc/moor/moor.conf",
			"PATH",
		);
		opts
	}

	fn print_usage<S: AsRef<str>>(prgm: S, opts: &Options) {
		let brief = format!("Usage: {} [options]", prgm.as_ref());
		println!("{}", opts.usage(&brief));
	}

	pub fn socket_address(&self) -> SocketAddr {
		SocketAddr::new(self.address, self.port)
	}

	pub fn server_config(&self) -> defaults::Config {
		let mut config = defaults::Config::new(
			self.hostname.clone(),
			Policy::new(self.domains.iter().cloned(), self.max_message_size),
		);
		config.max_line_length = self.max_line_length;
		config.idle_timeout = self.idle_timeout;
		config
	}

	/// Returns None if we were only asked for the usage text.
	pub fn get() -> Result<Option<Self>, ConfigError> {
		let args: Vec<String> = std::env::args().collect();
		Self::from_args(&args)
	}

	pub fn from_args(args: &[String]) -> Result<Option<Self>, ConfigError> {
		let opts = Self::options();
		let matches = opts.parse(args.iter().skip(1))?;

		if matches.opt_present("help") {
			Self::print_usage(args.first().map(String::as_str).unwrap_or("moord"), &opts);
			return Ok(None);
		}

		// An explicitly named file has to exist. The defaults are optional.
		let file = match matches.opt_str("config") {
			Some(path) => Some(
				Confindent::from_file(&path).map_err(|err| ConfigError::File {
					path,
					reason: err.to_string(),
				})?,
			),
			None => Confindent::from_file(DEFAULT_CONFIG)
				.or_else(|_| Confindent::from_file(FALLBACK_CONFIG))
				.ok(),
		};

		let file_value = |cli_key: &str| -> Option<String> {
			file.as_ref()
				.and_then(|conf| conf.child_value(conf_key(cli_key)))
				.map(String::from)
		};

		// Options specified on the command line take priority. We only take the
		// cli_key and convert to the config key internally so that we can remain
		// consistent.
		let find_value =
			|cli_key: &str| -> Option<String> { matches.opt_str(cli_key).or_else(|| file_value(cli_key)) };

		let address: IpAddr = parse_or(
			find_value("listen-address"),
			"ListenAddress",
			IpAddr::from([127, 0, 0, 1]),
		)?;
		let port: u16 = parse_or(find_value("port"), "Port", 2525)?;
		let spool = find_value("spool")
			.map(PathBuf::from)
			.unwrap_or_else(|| PathBuf::from("/tmp/smtp-mvp"));

		let hostname = file_value("hostname").unwrap_or_else(default_hostname);
		let domains = match file_value("domains") {
			None => vec![String::from("local.test"), String::from("example.com")],
			Some(joined) => parse_domains(&joined)?,
		};

		let max_message_size = parse_or(
			file_value("max-message-size"),
			"MaxMessageSize",
			defaults::DEFAULT_MAX_MESSAGE_SIZE,
		)?;
		let max_line_length = parse_or(
			file_value("max-line-length"),
			"MaxLineLength",
			defaults::DEFAULT_MAX_LINE_LENGTH,
		)?;
		let idle_timeout = Duration::from_secs(parse_or(
			file_value("idle-timeout"),
			"IdleTimeout",
			defaults::DEFAULT_IDLE_TIMEOUT.as_secs(),
		)?);

		Ok(Some(Self {
			address,
			port,
			spool,
			hostname,
			domains,
			max_message_size,
			max_line_length,
			idle_timeout,
			verbose: matches.opt_present("verbose"),
		}))
	}
}

/// `listen-address` becomes `ListenAddress`
fn conf_key(cli_key: &str) -> String {
	cli_key
		.split('-')
		.map(|word| {
			let mut c = word.chars();
			match c.next() {
				None => String::new(),
				Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
			}
		})
		.collect()
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
	match value {
		None => Ok(default),
		Some(value) => value.trim().parse().map_err(|_| ConfigError::Value { key, value }),
	}
}

// Addresses are lowercased before the allow-set is consulted, so the set is too
fn parse_domains(joined: &str) -> Result<Vec<String>, ConfigError> {
	let domains: Vec<String> = joined
		.split(',')
		.map(|domain| domain.trim().to_lowercase())
		.filter(|domain| !domain.is_empty())
		.collect();

	if domains.is_empty() {
		Err(ConfigError::Value {
			key: "Domains",
			value: joined.into(),
		})
	} else {
		Ok(domains)
	}
}

fn default_hostname() -> String {
	gethostname::gethostname()
		.into_string()
		.ok()
		.filter(|name| !name.is_empty())
		.unwrap_or_else(|| String::from("localhost"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("{0}")]
	Arguments(#[from] getopts::Fail),
	#[error("failed to read config file {path}: {reason}")]
	File { path: String, reason: String },
	#[error("'{value}' is not a valid value for {key}")]
	Value { key: &'static str, value: String },
}
