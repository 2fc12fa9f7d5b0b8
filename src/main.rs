use anyhow::{Context, Result};
use log::logger::RollingLogger;
use log::{LogLevel, error, info};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};

mod api;
mod auth;
mod catalog;
mod cli;
mod conf;
mod cv;
mod presence;
mod session;
mod stream;

#[tokio::main]
async fn main() -> Result<()> {
	let args = cli::parse_args();

	let level = if args.debug { LogLevel::Debug } else { LogLevel::Info };
	if let Err(e) = RollingLogger::init(level) {
		eprintln!("Logger initialization failed: {e}");
	}

	let cfg = conf::load_config()?;

	let scope = cfg
		.scope(&args.section)
		.with_context(|| format!("unknown section '{}'", args.section))?
		.clone();

	let store = match &cfg.backend_url {
		Some(url) => catalog::EncodingStore::Remote(catalog::RemoteStore::new(url.clone())),
		None => catalog::EncodingStore::Json(catalog::JsonStore::new(args.encodings.clone().into())),
	};

	let references = store.get_encodings(&scope).await?;
	let roster = store.get_roster(&scope).await?;
	let references = catalog::restrict_to_roster(references, &roster);
	info!(
		"Monitoring scope '{}' with {} enrolled identities",
		scope.name,
		references.len()
	);

	let events = match (&cfg.backend_url, cfg.notify_backend) {
		(Some(url), true) => {
			let (tx, rx) = mpsc::unbounded_channel();
			tokio::spawn(api::run_notifier(api::Api::new(url), rx));
			Some(tx)
		}
		_ => None,
	};

	let session = Arc::new(session::SessionController::new(events));

	let engine = cv::engine::DnnFaceEngine::new(
		&args.proto,
		&args.model,
		&args.embedder,
		args.min_confidence,
	)?;
	session.start(references, Box::new(engine)).await?;

	let listen = args.listen.unwrap_or_else(|| cfg.listen.clone());
	let listener = TcpListener::bind(&listen)
		.await
		.with_context(|| format!("binding stream server to {listen}"))?;
	let mut server = tokio::spawn(stream::serve(listener, session.clone(), cfg.jpeg_quality));

	let mut status_tick = interval(Duration::from_secs(5));
	loop {
		tokio::select! {
			_ = signal::ctrl_c() => {
				info!("Received CTRL+C signal");
				break;
			}
			_ = status_tick.tick() => {
				let status = session.status();
				info!(
					"Status: {:.1} FPS, {} faces in frame, {} present",
					status.fps, status.faces_detected, status.present_count
				);
			}
			result = &mut server => {
				match result {
					Ok(Err(e)) => error!("Stream server failed: {e:#}"),
					Err(e) => error!("Stream server task failed: {e}"),
					Ok(Ok(())) => {}
				}
				break;
			}
		}
	}

	session.stop().await?;
	server.abort();

	let present = session.presence().labels();
	info!("Session ended with {} present: {:?}", present.len(), present);

	Ok(())
}
