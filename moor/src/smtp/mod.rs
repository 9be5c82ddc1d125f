pub mod args;
mod body;
mod command;
mod framer;
mod response;
mod server;

pub use body::{decode_line, stuff, unstuff, BodyLine};
pub use command::{Command, ParseCommandError};
pub use framer::{Frame, LineFramer};
pub use response::{ParseResponseError, Response, ResponseCode};
pub use server::{BodyBuffer, Phase, Server, Transaction};

#[cfg(test)]
mod test {
	use std::{
		io,
		sync::{Arc, Mutex},
	};

	use super::*;
	use crate::{
		config::Config,
		policy::Policy,
		spool::{Envelope, Store, StoreError, Submission},
	};

	#[derive(Default)]
	struct MemoryStore {
		messages: Mutex<Vec<(Envelope, Vec<u8>)>>,
	}

	impl Store for MemoryStore {
		fn persist(&self, submission: Submission, body: &[u8]) -> Result<Envelope, StoreError> {
			let envelope = Envelope::stamp(submission)?;
			self.messages
				.lock()
				.unwrap()
				.push((envelope.clone(), body.to_vec()));
			Ok(envelope)
		}
	}

	struct BrokenStore;

	impl Store for BrokenStore {
		fn persist(&self, _: Submission, _: &[u8]) -> Result<Envelope, StoreError> {
			Err(io::Error::new(io::ErrorKind::Other, "disk full").into())
		}
	}

	fn config(max_message_size: usize) -> Arc<Config> {
		Arc::new(Config::new(
			"smtp-local.test",
			Policy::new(["local.test", "example.com"], max_message_size),
		))
	}

	fn session(store: Arc<dyn Store>) -> Server {
		Server::initiate(config(1024), store, "127.0.0.1:40000").0
	}

	fn send(server: &mut Server, line: &str) -> Option<Response> {
		server.push_line(line.as_bytes())
	}

	fn reply(server: &mut Server, line: &str) -> String {
		send(server, line)
			.unwrap_or_else(|| panic!("no reply to {:?}", line))
			.to_string()
	}

	fn transaction(server: &Server) -> Transaction {
		match server.phase() {
			Phase::Transaction(transaction) => transaction.clone(),
			other => panic!("expected a transaction, found {:?}", other),
		}
	}

	fn ready_for_data(server: &mut Server) {
		reply(server, "HELO client1");
		assert_eq!(reply(server, "MAIL FROM:<a@x.com>"), "250 2.1.0 OK");
		assert_eq!(reply(server, "RCPT TO:<b@local.test>"), "250 2.1.5 OK");
	}

	#[test]
	fn greeting() {
		let (mut server, greeting) =
			Server::initiate(config(1024), Arc::new(MemoryStore::default()), "peer");

		assert_eq!(greeting.to_string(), "220 smtp-local.test SimpleSMTP ready");
		assert_eq!(server.phase(), &Phase::Greeting);

		let resp = send(&mut server, "EHLO client1").unwrap();
		assert_eq!(
			resp.as_string(),
			"250-smtp-local.test Hello client1\r\n250-8BITMIME\r\n250-SIZE 1024\r\n250 HELP\r\n"
		);
		assert!(!resp.as_string().contains("STARTTLS"));
		assert_eq!(server.identity(), Some("client1"));
		assert_eq!(transaction(&server), Transaction::default());
	}

	#[test]
	fn bare_greeting_names_the_client_empty() {
		let store = Arc::new(MemoryStore::default());
		let mut server = session(store.clone());

		let resp = send(&mut server, "HELO").unwrap();
		assert_eq!(resp.messages()[0], "smtp-local.test Hello client");
		assert_eq!(server.identity(), Some(""));

		reply(&mut server, "MAIL FROM:<a@x.com>");
		reply(&mut server, "RCPT TO:<b@local.test>");
		reply(&mut server, "DATA");
		assert_eq!(reply(&mut server, "."), "250 2.0.0 OK queued");

		assert_eq!(store.messages.lock().unwrap()[0].0.helo.as_deref(), Some(""));
	}

	#[test]
	fn full_transaction() {
		let store = Arc::new(MemoryStore::default());
		let mut server = session(store.clone());

		ready_for_data(&mut server);
		assert_eq!(reply(&mut server, "DATA"), "354 End data with <CR><LF>.<CR><LF>");
		assert_eq!(send(&mut server, "Hello"), None);
		assert_eq!(send(&mut server, "..leading dot line"), None);
		assert_eq!(reply(&mut server, "."), "250 2.0.0 OK queued");

		let messages = store.messages.lock().unwrap();
		assert_eq!(messages.len(), 1);
		let (envelope, body) = &messages[0];
		assert_eq!(body, b"Hello\r\n.leading dot line\r\n");
		assert_eq!(envelope.remote, "127.0.0.1:40000");
		assert_eq!(envelope.helo.as_deref(), Some("client1"));
		assert_eq!(envelope.mail_from, "a@x.com");
		assert_eq!(envelope.rcpt_to, vec!["b@local.test"]);

		assert_eq!(transaction(&server), Transaction::default());
		assert_eq!(server.identity(), Some("client1"));
	}

	#[test]
	fn empty_body_is_a_lone_crlf() {
		let store = Arc::new(MemoryStore::default());
		let mut server = session(store.clone());

		ready_for_data(&mut server);
		reply(&mut server, "DATA");
		assert_eq!(reply(&mut server, "."), "250 2.0.0 OK queued");

		assert_eq!(store.messages.lock().unwrap()[0].1, b"\r\n");
	}

	#[test]
	fn recipients_keep_order_and_duplicates() {
		let store = Arc::new(MemoryStore::default());
		let mut server = session(store.clone());

		ready_for_data(&mut server);
		assert_eq!(reply(&mut server, "RCPT TO:<Z@example.com>"), "250 2.1.5 OK");
		assert_eq!(reply(&mut server, "rcpt to: b@local.test"), "250 2.1.5 OK");

		assert_eq!(
			transaction(&server).recipients,
			vec!["b@local.test", "z@example.com", "b@local.test"]
		);
	}

	#[test]
	fn relay_denied() {
		let mut server = session(Arc::new(MemoryStore::default()));

		reply(&mut server, "HELO client1");
		reply(&mut server, "MAIL FROM:<a@x.com>");
		assert_eq!(
			reply(&mut server, "RCPT TO:<c@not-allowed.com>"),
			"550 5.1.1 Relay denied"
		);
		assert_eq!(reply(&mut server, "RCPT TO:<>"), "550 5.1.1 Relay denied");
		assert_eq!(reply(&mut server, "RCPT TO:nobody"), "550 5.1.1 Relay denied");
		assert!(transaction(&server).recipients.is_empty());

		assert_eq!(
			reply(&mut server, "DATA"),
			"503 5.5.1 Need MAIL FROM and RCPT TO first"
		);
		assert!(matches!(server.phase(), Phase::Transaction(_)));
	}

	#[test]
	fn sequencing_errors_leave_state_alone() {
		let mut server = session(Arc::new(MemoryStore::default()));

		assert_eq!(reply(&mut server, "MAIL FROM:<a@x.com>"), "503 5.5.1 Bad sequence of commands");
		assert_eq!(reply(&mut server, "RCPT TO:<b@local.test>"), "503 5.5.1 Need MAIL FROM first");
		assert_eq!(
			reply(&mut server, "DATA"),
			"503 5.5.1 Need MAIL FROM and RCPT TO first"
		);
		assert_eq!(server.phase(), &Phase::Greeting);

		reply(&mut server, "HELO client1");
		assert_eq!(reply(&mut server, "RCPT TO:<b@local.test>"), "503 5.5.1 Need MAIL FROM first");
		assert_eq!(reply(&mut server, "MAIL FROM:<a@x.com>"), "250 2.1.0 OK");
		assert_eq!(
			reply(&mut server, "DATA"),
			"503 5.5.1 Need MAIL FROM and RCPT TO first"
		);
		assert_eq!(
			reply(&mut server, "MAIL FROM:<other@x.com>"),
			"503 5.5.1 Bad sequence of commands"
		);
		assert_eq!(transaction(&server).sender.as_deref(), Some("a@x.com"));
	}

	#[test]
	fn rset_clears_the_transaction() {
		let mut server = session(Arc::new(MemoryStore::default()));

		ready_for_data(&mut server);
		assert_eq!(reply(&mut server, "RSET"), "250 2.0.0 OK");
		assert_eq!(transaction(&server), Transaction::default());
		assert_eq!(server.identity(), Some("client1"));

		// RSET also opens a transaction before any greeting
		let mut fresh = session(Arc::new(MemoryStore::default()));
		assert_eq!(reply(&mut fresh, "rset"), "250 2.0.0 OK");
		assert_eq!(reply(&mut fresh, "MAIL FROM:<a@x.com>"), "250 2.1.0 OK");
	}

	#[test]
	fn helo_mid_transaction_keeps_it() {
		let mut server = session(Arc::new(MemoryStore::default()));

		ready_for_data(&mut server);
		reply(&mut server, "EHLO client2");

		assert_eq!(server.identity(), Some("client2"));
		assert_eq!(transaction(&server).recipients, vec!["b@local.test"]);
	}

	#[test]
	fn noop_quit_starttls_and_unknown() {
		let mut server = session(Arc::new(MemoryStore::default()));

		assert_eq!(reply(&mut server, "NOOP"), "250 2.0.0 OK");
		assert_eq!(reply(&mut server, "STARTTLS"), "454 4.7.0 TLS not available");
		assert_eq!(reply(&mut server, "VRFY bob"), "502 5.5.2 Command not implemented");
		assert_eq!(reply(&mut server, "MAIL <a@x.com>"), "502 5.5.2 Command not implemented");
		assert_eq!(server.phase(), &Phase::Greeting);
		assert!(!server.should_exit());

		assert_eq!(reply(&mut server, "QUIT"), "221 2.0.0 Bye");
		assert!(server.should_exit());
	}

	#[test]
	fn commands_are_body_text_during_data() {
		let store = Arc::new(MemoryStore::default());
		let mut server = session(store.clone());

		ready_for_data(&mut server);
		reply(&mut server, "DATA");
		assert_eq!(send(&mut server, "QUIT"), None);
		assert_eq!(send(&mut server, "RSET"), None);
		assert_eq!(reply(&mut server, "."), "250 2.0.0 OK queued");

		assert!(!server.should_exit());
		assert_eq!(store.messages.lock().unwrap()[0].1, b"QUIT\r\nRSET\r\n");
	}

	#[test]
	fn oversized_body_is_abandoned_as_it_streams() {
		let store = Arc::new(MemoryStore::default());
		let mut server = Server::initiate(config(10), store.clone(), "peer").0;

		ready_for_data(&mut server);
		reply(&mut server, "DATA");
		// 6 + 2 bytes so far
		assert_eq!(send(&mut server, "123456"), None);
		assert_eq!(
			reply(&mut server, "789"),
			"552 5.3.4 Message too large; closing DATA"
		);

		assert!(store.messages.lock().unwrap().is_empty());
		assert_eq!(transaction(&server), Transaction::default());
		// What the client sends next is read as commands again
		assert_eq!(reply(&mut server, "."), "502 5.5.2 Command not implemented");
	}

	#[test]
	fn body_at_the_limit_is_kept() {
		let store = Arc::new(MemoryStore::default());
		let mut server = Server::initiate(config(10), store.clone(), "peer").0;

		ready_for_data(&mut server);
		reply(&mut server, "DATA");
		assert_eq!(send(&mut server, "123"), None);
		assert_eq!(send(&mut server, "456"), None);
		assert_eq!(reply(&mut server, "."), "250 2.0.0 OK queued");

		assert_eq!(store.messages.lock().unwrap()[0].1, b"123\r\n456\r\n");
	}

	#[test]
	fn empty_body_over_a_tiny_limit_is_rejected_at_the_end() {
		let store = Arc::new(MemoryStore::default());
		let mut server = Server::initiate(config(1), store.clone(), "peer").0;

		ready_for_data(&mut server);
		reply(&mut server, "DATA");
		assert_eq!(
			reply(&mut server, "."),
			"552 5.3.4 Message size exceeds fixed limit"
		);

		assert!(store.messages.lock().unwrap().is_empty());
		assert_eq!(transaction(&server), Transaction::default());
	}

	#[test]
	fn persistence_failure_is_not_queued() {
		let mut server = session(Arc::new(BrokenStore));

		ready_for_data(&mut server);
		reply(&mut server, "DATA");
		send(&mut server, "Hello");
		assert_eq!(reply(&mut server, "."), "451 4.3.0 Local error in processing");

		assert_eq!(transaction(&server), Transaction::default());
		assert_eq!(reply(&mut server, "RSET"), "250 2.0.0 OK");
	}

	#[test]
	fn overlong_line() {
		let store = Arc::new(MemoryStore::default());
		let mut server = session(store.clone());

		ready_for_data(&mut server);
		let resp = server.push_frame(Frame::Overlong).unwrap();
		assert_eq!(resp.to_string(), "500 5.5.2 Line too long");
		assert_eq!(transaction(&server).recipients, vec!["b@local.test"]);

		reply(&mut server, "DATA");
		server.push_frame(Frame::Line(b"Hello".to_vec()));
		assert_eq!(
			server.push_frame(Frame::Overlong).unwrap().to_string(),
			"500 5.5.2 Line too long"
		);
		assert_eq!(transaction(&server), Transaction::default());
		assert!(store.messages.lock().unwrap().is_empty());
	}

	#[test]
	fn body_is_byte_clean() {
		let store = Arc::new(MemoryStore::default());
		let mut server = session(store.clone());

		ready_for_data(&mut server);
		reply(&mut server, "DATA");
		assert_eq!(server.push_line(b"caf\xe9 \xff\x00"), None);
		reply(&mut server, ".");

		assert_eq!(store.messages.lock().unwrap()[0].1, b"caf\xe9 \xff\x00\r\n");
	}
}
