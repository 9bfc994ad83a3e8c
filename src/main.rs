//! # Voice Call Backend - Main Application Entry Point
//!
//! Actix-web server for real-time voice conversations: the browser streams
//! microphone audio over a websocket, the server detects when the user has
//! finished speaking, transcribes the utterance, and streams back the assistant's
//! reply as text and synthesized speech, sentence by sentence.
//!
//! ## Application Architecture:
//! - **config**: application configuration (defaults, `config.toml`, environment)
//! - **state**: shared state, counters and the live-session registry
//! - **health**: health endpoint
//! - **websocket**: the `/ws` transport actor
//! - **protocol**: client/server message types
//! - **audio**: framing, voice activity, endpointing, WAV assembly
//! - **pipeline**: sentence segmentation and the reply producer/consumer pipeline
//! - **session**: per-connection session loop, history and turn worker
//! - **services**: transcription, language model, synthesis and conversation log clients
//! - **error**: error types and HTTP error responses

mod audio;
mod config;
mod error;
mod health;
mod pipeline;
mod protocol;
mod services;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use audio::vad::EnergyVad;
use config::{AppConfig, ServiceCredentials};
use services::Collaborators;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate()?;

    // Missing API keys end startup here, before anything binds.
    let credentials = ServiceCredentials::from_env()?;

    info!("Starting voice-call-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        sample_rate = config.audio.sample_rate,
        window_samples = config.audio.window_samples,
        pause_threshold_ms = config.vad.pause_threshold_ms,
        max_sessions = config.session.max_concurrent_sessions,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let collaborators = Collaborators::from_config(&config, &credentials)?;
    let vad = Arc::new(EnergyVad::new(
        config.vad.energy_threshold,
        config.vad.min_silence_ms,
        config.audio.sample_rate,
    ));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, vad, collaborators);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(web::scope("/api/v1").route("/health", web::get().to(health::health_check)))
            .route("/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(websocket::voice_websocket))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            signal?;
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to debug for this crate.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_call_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on SIGTERM or SIGINT.
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
