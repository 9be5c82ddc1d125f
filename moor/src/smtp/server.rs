use std::{mem, sync::Arc};

use crate::{
	config::Config,
	spool::{self, Store, Submission},
};

use super::{
	args::Address,
	body::{decode_line, BodyLine},
	Command, Frame, Response, ResponseCode,
};

/// The per-connection protocol state machine. It sees one line at a time and
/// answers with at most one response; it never touches the network itself.
pub struct Server {
	config: Arc<Config>,
	store: Arc<dyn Store>,
	remote: String,
	identity: Option<String>,
	phase: Phase,
	exit: bool,
}

impl Server {
	pub fn initiate<S: Into<String>>(
		config: Arc<Config>,
		store: Arc<dyn Store>,
		remote: S,
	) -> (Self, Response) {
		let greeting = Response::with_message(
			ResponseCode::ServiceReady,
			format!("{} SimpleSMTP ready", config.hostname),
		);

		(
			Self {
				config,
				store,
				remote: remote.into(),
				identity: None,
				phase: Phase::Greeting,
				exit: false,
			},
			greeting,
		)
	}

	pub fn push_frame(&mut self, frame: Frame) -> Option<Response> {
		match frame {
			Frame::Line(line) => self.push_line(&line),
			Frame::Overlong => Some(self.line_too_long()),
		}
	}

	/// Feeds one line, without its CRLF. Body lines are taken silently so
	/// this only returns None while a message is being received.
	pub fn push_line(&mut self, line: &[u8]) -> Option<Response> {
		match &mut self.phase {
			Phase::Body(_, buffer) => match decode_line(line) {
				BodyLine::Terminator => Some(self.got_data()),
				BodyLine::Data(data) => {
					buffer.push(data);

					if self.config.policy.size_is_within_limit(buffer.byte_count()) {
						None
					} else {
						tracing::warn!(remote = %self.remote, "message too large, abandoning DATA");
						self.phase = Phase::Transaction(Transaction::default());

						Some(Response::with_message(
							ResponseCode::ExceededStorageAllocation,
							"5.3.4 Message too large; closing DATA",
						))
					}
				}
			},
			_ => Some(self.run_command(line)),
		}
	}

	pub fn should_exit(&self) -> bool {
		self.exit
	}

	pub fn phase(&self) -> &Phase {
		&self.phase
	}

	pub fn identity(&self) -> Option<&str> {
		self.identity.as_deref()
	}

	/// Sent when the client has been idle too long, just before hanging up.
	pub fn timeout() -> Response {
		Response::with_message(ResponseCode::ServiceNotAvailable, "4.4.2 Timeout - closing")
	}

	/// Sent to open sessions when the server is going down.
	pub fn shutting_down() -> Response {
		Response::with_message(
			ResponseCode::ServiceNotAvailable,
			"4.3.2 Service shutting down",
		)
	}

	fn run_command(&mut self, line: &[u8]) -> Response {
		let line = String::from_utf8_lossy(line);
		tracing::debug!(remote = %self.remote, command = %line, "command received");

		match line.parse::<Command>() {
			Ok(command) => match command {
				Command::Helo(identity) | Command::Ehlo(identity) => self.helo(identity),
				Command::Mail(reverse_path) => self.mail(reverse_path),
				Command::Rcpt(forward_path) => self.rcpt(forward_path),
				Command::Data => self.data(),
				Command::Rset => self.rset(),
				Command::Noop => Self::okay(),
				Command::Quit => self.quit(),
				Command::StartTls => Response::with_message(
					ResponseCode::TlsNotAvailable,
					"4.7.0 TLS not available",
				),
			},
			Err(_) => Self::not_implemented(),
		}
	}

	fn helo(&mut self, identity: String) -> Response {
		let name = if identity.is_empty() { "client" } else { &identity };
		let mut resp = Response::with_message(
			ResponseCode::Okay,
			format!("{} Hello {}", self.config.hostname, name),
		);
		resp.push("8BITMIME");
		resp.push(format!("SIZE {}", self.config.policy.max_message_size()));
		resp.push("HELP");

		self.identity = Some(identity);
		// A greeting mid-transaction only renames the client
		if let Phase::Greeting = self.phase {
			self.phase = Phase::Transaction(Transaction::default());
		}

		resp
	}

	fn mail(&mut self, reverse_path: Address) -> Response {
		match &mut self.phase {
			Phase::Transaction(transaction) if transaction.sender.is_none() => {
				transaction.sender = Some(reverse_path.into_string());

				Response::with_message(ResponseCode::Okay, "2.1.0 OK")
			}
			_ => Self::bad_command(),
		}
	}

	fn rcpt(&mut self, forward_path: Address) -> Response {
		match &mut self.phase {
			Phase::Transaction(transaction) if transaction.sender.is_some() => {
				if self.config.policy.domain_is_allowed(forward_path.domain()) {
					transaction.recipients.push(forward_path.into_string());

					Response::with_message(ResponseCode::Okay, "2.1.5 OK")
				} else {
					tracing::warn!(
						remote = %self.remote,
						recipient = %forward_path,
						"relay denied"
					);

					Response::with_message(ResponseCode::PermanentMailFail, "5.1.1 Relay denied")
				}
			}
			_ => Response::with_message(
				ResponseCode::BadCommandSequence,
				"5.5.1 Need MAIL FROM first",
			),
		}
	}

	fn data(&mut self) -> Response {
		match mem::replace(&mut self.phase, Phase::Greeting) {
			Phase::Transaction(transaction) if transaction.is_ready() => {
				self.phase = Phase::Body(transaction, BodyBuffer::default());

				Response::with_message(
					ResponseCode::StartMailInput,
					"End data with <CR><LF>.<CR><LF>",
				)
			}
			other => {
				self.phase = other;

				Response::with_message(
					ResponseCode::BadCommandSequence,
					"5.5.1 Need MAIL FROM and RCPT TO first",
				)
			}
		}
	}

	fn got_data(&mut self) -> Response {
		let phase = mem::replace(&mut self.phase, Phase::Transaction(Transaction::default()));
		let (transaction, buffer) = match phase {
			Phase::Body(transaction, buffer) => (transaction, buffer),
			other => {
				self.phase = other;
				return Self::bad_command();
			}
		};

		let data = buffer.assemble();
		if !self.config.policy.size_is_within_limit(data.len()) {
			tracing::warn!(remote = %self.remote, size = data.len(), "message too large");

			return Response::with_message(
				ResponseCode::ExceededStorageAllocation,
				"5.3.4 Message size exceeds fixed limit",
			);
		}

		let submission = Submission {
			remote: self.remote.clone(),
			identity: self.identity.clone(),
			sender: transaction.sender.unwrap_or_default(),
			recipients: transaction.recipients,
		};

		match spool::blocking(|| self.store.persist(submission, &data)) {
			Ok(envelope) => {
				tracing::info!(
					id = %envelope.id,
					from = %envelope.mail_from,
					to = %envelope.rcpt_to.join(","),
					"queued"
				);

				Response::with_message(ResponseCode::Okay, "2.0.0 OK queued")
			}
			Err(err) => {
				tracing::error!(remote = %self.remote, %err, "failed to persist message");

				Response::with_message(
					ResponseCode::ProcessingError,
					"4.3.0 Local error in processing",
				)
			}
		}
	}

	fn rset(&mut self) -> Response {
		self.phase = Phase::Transaction(Transaction::default());

		Self::okay()
	}

	fn quit(&mut self) -> Response {
		self.exit = true;

		Response::with_message(ResponseCode::ServiceClosing, "2.0.0 Bye")
	}

	fn line_too_long(&mut self) -> Response {
		tracing::warn!(remote = %self.remote, "line too long");

		if let Phase::Body(..) = self.phase {
			self.phase = Phase::Transaction(Transaction::default());
		}

		Response::with_message(ResponseCode::UnrecognizedCommand, "5.5.2 Line too long")
	}

	fn okay() -> Response {
		Response::with_message(ResponseCode::Okay, "2.0.0 OK")
	}

	fn not_implemented() -> Response {
		Response::with_message(
			ResponseCode::CommandNotImplemented,
			"5.5.2 Command not implemented",
		)
	}

	fn bad_command() -> Response {
		Response::with_message(
			ResponseCode::BadCommandSequence,
			"5.5.1 Bad sequence of commands",
		)
	}
}

/// Where the session is in the dialogue. Each phase carries only what is
/// meaningful in it; the client identity lives on the session itself.
#[derive(Debug, PartialEq)]
pub enum Phase {
	Greeting,
	Transaction(Transaction),
	Body(Transaction, BodyBuffer),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transaction {
	pub sender: Option<String>,
	pub recipients: Vec<String>,
}

impl Transaction {
	fn is_ready(&self) -> bool {
		self.sender.is_some() && !self.recipients.is_empty()
	}
}

/// Un-stuffed body lines and their size as they will be stored.
#[derive(Debug, Default, PartialEq)]
pub struct BodyBuffer {
	lines: Vec<Vec<u8>>,
	byte_count: usize,
}

impl BodyBuffer {
	pub fn push(&mut self, line: &[u8]) {
		self.byte_count += line.len() + 2;
		self.lines.push(line.to_vec());
	}

	pub fn byte_count(&self) -> usize {
		self.byte_count
	}

	/// The stored form: every line CRLF-terminated.
	pub fn assemble(&self) -> Vec<u8> {
		let mut data = self.lines.join(&b"\r\n"[..]);
		data.extend_from_slice(b"\r\n");
		data
	}
}
