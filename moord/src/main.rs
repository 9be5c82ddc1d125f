mod config;

use std::{process::ExitCode, sync::Arc, time::Duration};

use config::Config;
use moor::spool::{Spool, Store};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
	let config = match Config::get() {
		Ok(Some(conf)) => conf,
		Ok(None) => return ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("{}", err);
			return ExitCode::FAILURE;
		}
	};

	init_tracing(config.verbose);

	let spool = Spool::new(&config.spool);
	if let Err(err) = spool.create_directories() {
		tracing::error!(spool = ?config.spool, %err, "could not create the spool directory");
		return ExitCode::FAILURE;
	}

	let listener = match TcpListener::bind(config.socket_address()).await {
		Ok(listener) => listener,
		Err(err) => {
			tracing::error!(address = %config.socket_address(), %err, "could not bind");
			return ExitCode::FAILURE;
		}
	};

	tracing::info!(
		address = %config.socket_address(),
		spool = ?config.spool,
		domains = ?config.domains,
		"listening"
	);

	let (tx, rx) = watch::channel(false);
	let store: Arc<dyn Store> = Arc::new(spool);
	let listen_task = tokio::spawn(moor::net::listen(
		listener,
		Arc::new(config.server_config()),
		store,
		rx,
	));

	shutdown_signal().await;
	tracing::info!("received shutdown signal, beginning graceful shutdown");

	// Open sessions hold receivers; give them a moment to say goodbye
	#[allow(unused_must_use)]
	{
		tx.send(true);
		listen_task.await;
		tokio::time::timeout(Duration::from_secs(5), tx.closed()).await;
	}

	ExitCode::SUCCESS
}

fn init_tracing(verbose: bool) {
	let fallback = if verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	match signal(SignalKind::terminate()) {
		Ok(mut terminate) => {
			tokio::select! {
				_ = tokio::signal::ctrl_c() => (),
				_ = terminate.recv() => (),
			}
		}
		Err(err) => {
			tracing::warn!(%err, "could not listen for SIGTERM");
			let _ = tokio::signal::ctrl_c().await;
		}
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
}
