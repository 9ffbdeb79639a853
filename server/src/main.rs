//! Process entrypoint: init tracing, bootstrap the store and context, spawn
//! every entity runner, and serve the HTTP surface until a shutdown signal
//! arrives.
//!
//! Grounded on the teacher's `crates/cloudillo/src/app.rs::AppBuilder::run()`
//! (tracing init, rustls crypto provider install, adapter bootstrap,
//! listener bind, `tokio::try_join!` on the server task) trimmed to this
//! crate's single plain HTTP listener — no TLS cert cache or second HTTP/S
//! listener pair, since `ServerConfig` names one `listen` address.

mod bootstrap;
mod config;
mod inbox;
mod rate_limit;
mod routes;
mod runners;

use std::net::SocketAddr;
use std::sync::Arc;

use relaystate_types::error::ClResult;
use relaystate_types::store::ConfigScope;

#[tokio::main]
async fn main() -> ClResult<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider())
		.map_err(|_| relaystate_types::error::Error::Internal("failed to install default crypto provider".into()))?;

	let config = config::ServerConfig::from_env();
	tracing::info!(version = config::SOFTWARE_VERSION, listen = %config.listen, "starting relaystate");

	let app = bootstrap::bootstrap(&config).await?;
	let pool = app.adapter.pool.clone();
	let app = Arc::new(app);

	let rate_limit_per_minute =
		app.ctx.settings.get_i64("federation.rate_limit_per_minute", ConfigScope::System, None).await?;
	let rate_limiter = Arc::new(rate_limit::InboxRateLimiter::new(
		u32::try_from(rate_limit_per_minute).unwrap_or(120),
	));

	let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
	let _runners = runners::spawn_all(app.ctx.clone(), pool, shutdown_rx).await?;

	let router = routes::router(app.clone(), rate_limiter);
	let listener = tokio::net::TcpListener::bind(&config.listen).await?;
	tracing::info!(listen = %config.listen, "listening");

	let serve = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(wait_for_shutdown_signal());
	if let Err(err) = serve.await {
		tracing::error!("server error: {err}");
	}

	let _ = shutdown_tx.send(true);
	Ok(())
}

/// Resolves on SIGINT or (on unix) SIGTERM, whichever arrives first —
/// mirrors the teacher's use of `tokio::signal` for graceful shutdown.
async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
			return;
		};
		signal.recv().await;
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {}
		() = terminate => {}
	}
}
