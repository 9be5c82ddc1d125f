use std::{cmp::Ordering, fmt::Display, num::ParseIntError};

use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
	pub code: ResponseCode,
	messages: Vec<String>,
}

impl Response {
	pub fn new(code: ResponseCode) -> Self {
		Self {
			code,
			messages: vec![],
		}
	}

	pub fn with_message<S: Into<String>>(code: ResponseCode, message: S) -> Self {
		Self {
			code,
			messages: vec![message.into()],
		}
	}

	pub fn push<S: Into<String>>(&mut self, message: S) {
		self.messages.push(message.into());
	}

	pub fn insert(&mut self, index: usize, message: &str) {
		self.messages.insert(index, message.to_owned());
	}

	pub fn code(&self) -> ResponseCode {
		self.code
	}

	pub fn messages(&self) -> &[String] {
		&self.messages
	}

	/// Renders the reply as it goes on the wire. Every line but the last
	/// separates the code from the text with a hyphen.
	pub fn as_string(&self) -> String {
		let code = self.code.as_code();

		match self.messages.split_last() {
			None => format!("{} \r\n", code),
			Some((last, continued)) => {
				let mut ret = String::new();
				for message in continued {
					ret.push_str(&format!("{}-{}\r\n", code, message));
				}
				ret.push_str(&format!("{} {}\r\n", code, last));
				ret
			}
		}
	}
}

impl Display for Response {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_string().trim_end())
	}
}

impl std::str::FromStr for Response {
	type Err = ParseResponseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut lines = s.trim_end().rsplit("\r\n");

		let mut response = match lines.next() {
			Some(line) => match line.len().cmp(&3) {
				Ordering::Less => return Err(ParseResponseError::MalformedResponse),
				Ordering::Equal => Response::with_message(line.parse()?, ""),
				Ordering::Greater => {
					let split = line
						.split_once(' ')
						.ok_or(ParseResponseError::MalformedResponse)?;
					let code: ResponseCode = split.0.parse()?;

					Response::with_message(code, split.1.trim())
				}
			},
			None => return Err(ParseResponseError::EmptyString),
		};

		for line in lines {
			let split = line
				.split_once('-')
				.ok_or(ParseResponseError::MalformedResponse)?;
			let code: ResponseCode = split.0.parse()?;

			if response.code() != code {
				return Err(ParseResponseError::MixedResponseCode);
			}
			response.insert(0, split.1.trim());
		}

		Ok(response)
	}
}

#[derive(Error, Debug)]
pub enum ParseResponseError {
	#[error("multiline responses may not mix reply codes")]
	MixedResponseCode,
	#[error("the response was malformed")]
	MalformedResponse,
	#[error("the response code did not make sense")]
	MalformedResponseCode,
	#[error("the response code was invalid")]
	InvalidResponseCode(#[from] ParseIntError),
	#[error("the reply was empty")]
	EmptyString,
}

#[derive(Clone, Copy, Debug)]
pub enum ResponseCode {
	ServiceReady,   // 220
	ServiceClosing, // 221
	Okay,           // 250

	StartMailInput, // 354

	ServiceNotAvailable, // 421 (closing transmission channel)
	ProcessingError,     // 451
	TlsNotAvailable,     // 454

	UnrecognizedCommand,       // 500
	CommandNotImplemented,     // 502
	BadCommandSequence,        // 503
	PermanentMailFail,         // 550
	ExceededStorageAllocation, // 552

	UnknownPositiveCompletion(u16), // 2xx
	UnknownPositiveWaiting(u16),    // 3xx
	UnknownNegativeTemporary(u16),  // 4xx
	UnknownNegativePermanent(u16),  // 5xx
}

impl PartialEq for ResponseCode {
	fn eq(&self, other: &Self) -> bool {
		self.as_code() == other.as_code()
	}
}

impl ResponseCode {
	pub fn from_code(code: u16) -> Option<ResponseCode> {
		let response_code = match code {
			220 => Some(ResponseCode::ServiceReady),
			221 => Some(ResponseCode::ServiceClosing),
			250 => Some(ResponseCode::Okay),

			354 => Some(ResponseCode::StartMailInput),

			421 => Some(ResponseCode::ServiceNotAvailable),
			451 => Some(ResponseCode::ProcessingError),
			454 => Some(ResponseCode::TlsNotAvailable),

			500 => Some(ResponseCode::UnrecognizedCommand),
			502 => Some(ResponseCode::CommandNotImplemented),
			503 => Some(ResponseCode::BadCommandSequence),
			550 => Some(ResponseCode::PermanentMailFail),
			552 => Some(ResponseCode::ExceededStorageAllocation),
			_ => None,
		};

		response_code.or(match code / 100 {
			2 => Some(ResponseCode::UnknownPositiveCompletion(code)),
			3 => Some(ResponseCode::UnknownPositiveWaiting(code)),
			4 => Some(ResponseCode::UnknownNegativeTemporary(code)),
			5 => Some(ResponseCode::UnknownNegativePermanent(code)),
			_ => None,
		})
	}

	pub fn as_code(self) -> u16 {
		match self {
			ResponseCode::ServiceReady => 220,
			ResponseCode::ServiceClosing => 221,
			ResponseCode::Okay => 250,

			ResponseCode::StartMailInput => 354,

			ResponseCode::ServiceNotAvailable => 421,
			ResponseCode::ProcessingError => 451,
			ResponseCode::TlsNotAvailable => 454,

			ResponseCode::UnrecognizedCommand => 500,
			ResponseCode::CommandNotImplemented => 502,
			ResponseCode::BadCommandSequence => 503,
			ResponseCode::PermanentMailFail => 550,
			ResponseCode::ExceededStorageAllocation => 552,

			ResponseCode::UnknownPositiveCompletion(code) => code,
			ResponseCode::UnknownPositiveWaiting(code) => code,
			ResponseCode::UnknownNegativeTemporary(code) => code,
			ResponseCode::UnknownNegativePermanent(code) => code,
		}
	}
}

impl std::str::FromStr for ResponseCode {
	type Err = ParseResponseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() == 3 {
			ResponseCode::from_code(s.parse()?).ok_or(ParseResponseError::MalformedResponseCode)
		} else {
			Err(ParseResponseError::MalformedResponseCode)
		}
	}
}
