use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
	io::{self, AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
	sync::watch,
	time::{sleep, timeout},
};

use crate::{
	config::Config,
	smtp::{LineFramer, Server},
	spool::Store,
};

//runs as long as the client remains connected
// handles low-level tcp read and write, passing lines to the session and its responses back
async fn serve(
	mut stream: TcpStream,
	peer: SocketAddr,
	config: Arc<Config>,
	store: Arc<dyn Store>,
	mut rx: watch::Receiver<bool>,
) -> io::Result<()> {
	let idle_timeout = config.idle_timeout;
	let mut framer = LineFramer::new(config.max_line_length);
	let (mut session, initial_response) = Server::initiate(config, store, peer.to_string());
	stream
		.write_all(initial_response.as_string().as_bytes())
		.await?;

	let mut buf = vec![0; 4096];

	while !session.should_exit() {
		let read = tokio::select! {
			read = timeout(idle_timeout, stream.read(&mut buf)) => match read {
				Ok(read) => read?,
				Err(_elapsed) => {
					tracing::warn!(%peer, "idle timeout");
					stream.write_all(Server::timeout().as_string().as_bytes()).await?;
					break;
				}
			},
			_ = rx.changed() => {
				stream.write_all(Server::shutting_down().as_string().as_bytes()).await?;
				break;
			},
		};

		// A zero sized read, this connection has died or been terminated by the client
		if read == 0 {
			tracing::debug!(%peer, "connection closed by client");
			return Ok(());
		}

		framer.push(&buf[..read]);

		while let Some(frame) = framer.next_frame() {
			if let Some(response) = session.push_frame(frame) {
				stream.write_all(response.as_string().as_bytes()).await?;
			}

			if session.should_exit() {
				break;
			}
		}
	}

	stream.shutdown().await
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// Accept errors such as running out of descriptors tend to repeat, so each
// one costs a pause before the next try.
async fn settle_accept<T>(result: io::Result<T>) -> Option<T> {
	match result {
		Ok(accepted) => Some(accepted),
		Err(err) => {
			tracing::error!(%err, "failed to accept connection");
			sleep(ACCEPT_BACKOFF).await;
			None
		}
	}
}

//waits for new connections, dispatches new task to handle each new inbound connection
pub async fn listen(
	listener: TcpListener,
	config: Arc<Config>,
	store: Arc<dyn Store>,
	mut rx: watch::Receiver<bool>,
) {
	loop {
		let (stream, peer) = tokio::select! {
			_ = rx.changed() => break,
			result = listener.accept() => match settle_accept(result).await {
				Some(accepted) => accepted,
				None => continue,
			}
		};

		tracing::info!(%peer, "connection accepted");

		let config = config.clone();
		let store = store.clone();
		let rx = rx.clone();
		tokio::spawn(async move {
			if let Err(err) = serve(stream, peer, config, store, rx).await {
				tracing::error!(%peer, %err, "connection failed");
			}

			tracing::info!(%peer, "connection closed");
		});
	}

	tracing::info!("no longer accepting connections");
}

#[cfg(test)]
mod test {
	use tokio::{
		io::{AsyncBufReadExt, BufReader},
		time::Instant,
	};

	use super::*;
	use crate::{policy::Policy, spool::Spool};

	async fn start(config: Config) -> (SocketAddr, watch::Sender<bool>, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let spool = Spool::new(dir.path());
		spool.create_directories().unwrap();
		let store: Arc<dyn Store> = Arc::new(spool);

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let (tx, rx) = watch::channel(false);

		tokio::spawn(listen(listener, Arc::new(config), store, rx));

		(addr, tx, dir)
	}

	fn config() -> Config {
		Config::new("smtp-local.test", Policy::new(["local.test"], 1024))
	}

	async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
		let mut line = String::new();
		reader.read_line(&mut line).await.unwrap();
		line
	}

	#[tokio::test]
	async fn accept_errors_back_off() {
		let started = Instant::now();
		let failed: io::Result<()> = Err(io::Error::from_raw_os_error(24));

		assert_eq!(settle_accept(failed).await, None);
		assert!(started.elapsed() >= ACCEPT_BACKOFF);
		assert_eq!(settle_accept(Ok(7)).await, Some(7));
	}

	#[tokio::test]
	async fn idle_timeout_closes_the_connection() {
		let mut config = config();
		config.idle_timeout = Duration::from_millis(100);
		let (addr, _tx, _dir) = start(config).await;

		let mut reader = BufReader::new(TcpStream::connect(addr).await.unwrap());
		assert!(read_line(&mut reader).await.starts_with("220 "));
		assert_eq!(read_line(&mut reader).await, "421 4.4.2 Timeout - closing\r\n");
		assert_eq!(read_line(&mut reader).await, "");
	}

	#[tokio::test]
	async fn pipelined_lines_are_answered_in_order() {
		let (addr, _tx, _dir) = start(config()).await;

		let mut reader = BufReader::new(TcpStream::connect(addr).await.unwrap());
		read_line(&mut reader).await;

		reader
			.get_mut()
			.write_all(b"NOOP\r\nFOO\r\nSTARTTLS\r\nQUIT\r\n")
			.await
			.unwrap();

		assert_eq!(read_line(&mut reader).await, "250 2.0.0 OK\r\n");
		assert_eq!(read_line(&mut reader).await, "502 5.5.2 Command not implemented\r\n");
		assert_eq!(read_line(&mut reader).await, "454 4.7.0 TLS not available\r\n");
		assert_eq!(read_line(&mut reader).await, "221 2.0.0 Bye\r\n");
		assert_eq!(read_line(&mut reader).await, "");
	}

	#[tokio::test]
	async fn shutdown_tells_open_sessions() {
		let (addr, tx, _dir) = start(config()).await;

		let mut reader = BufReader::new(TcpStream::connect(addr).await.unwrap());
		read_line(&mut reader).await;

		tx.send(true).unwrap();
		assert_eq!(read_line(&mut reader).await, "421 4.3.2 Service shutting down\r\n");
	}

	#[tokio::test]
	async fn overlong_command_line() {
		let mut config = config();
		config.max_line_length = 16;
		let (addr, _tx, _dir) = start(config).await;

		let mut reader = BufReader::new(TcpStream::connect(addr).await.unwrap());
		read_line(&mut reader).await;

		let mut long = "HELO ".to_string() + &"a".repeat(64);
		long.push_str("\r\nNOOP\r\n");
		reader.get_mut().write_all(long.as_bytes()).await.unwrap();

		assert_eq!(read_line(&mut reader).await, "500 5.5.2 Line too long\r\n");
		assert_eq!(read_line(&mut reader).await, "250 2.0.0 OK\r\n");
	}
}
