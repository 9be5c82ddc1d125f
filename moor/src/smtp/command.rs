use thiserror::Error;

use super::args::Address;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
	Helo(String),
	Ehlo(String),
	Mail(Address),
	Rcpt(Address),
	Data,
	Rset,
	Noop,
	Quit,
	StartTls,
}

impl std::str::FromStr for Command {
	type Err = ParseCommandError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim_end();
		let (keyword, arguments) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
		let arguments = arguments.trim_start();

		match (keyword.to_ascii_uppercase().as_str(), arguments) {
			("HELO", identity) => Ok(Command::Helo(first_token(identity))),
			("EHLO", identity) => Ok(Command::Ehlo(first_token(identity))),

			("MAIL", reverse_path) => strip_keyword(reverse_path, "FROM:")
				.map(|arg| Command::Mail(Address::extract(arg)))
				.ok_or(ParseCommandError::MissingFrom),
			("RCPT", forward_path) => strip_keyword(forward_path, "TO:")
				.map(|arg| Command::Rcpt(Address::extract(arg)))
				.ok_or(ParseCommandError::MissingTo),

			("DATA", "") => Ok(Command::Data),
			("RSET", "") => Ok(Command::Rset),
			("NOOP", _) => Ok(Command::Noop),
			("QUIT", "") => Ok(Command::Quit),
			("STARTTLS", "") => Ok(Command::StartTls),
			_ => Err(ParseCommandError::Unrecognized),
		}
	}
}

// A bare greeting names the client as the empty string
fn first_token(arguments: &str) -> String {
	arguments.split_whitespace().next().unwrap_or("").to_string()
}

/// Case-insensitively strips `keyword` (like `FROM:`) off the front.
fn strip_keyword<'a>(arguments: &'a str, keyword: &str) -> Option<&'a str> {
	let head = arguments.get(..keyword.len())?;

	if head.eq_ignore_ascii_case(keyword) {
		Some(&arguments[keyword.len()..])
	} else {
		None
	}
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseCommandError {
	#[error("unknown command")]
	Unrecognized,
	#[error("MAIL without FROM:")]
	MissingFrom,
	#[error("RCPT without TO:")]
	MissingTo,
}
