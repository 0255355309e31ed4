//! Per-call orchestration engine entry point (§6 "Configuration", §7
//! "Process exit codes"): loads configuration, opens the ARI event
//! stream, starts the AudioSocket listener when configured, and spawns
//! one call task per `StasisStart`.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voxrelay_config::document::TransportKind;
use voxrelay_config::{load_settings, Settings};
use voxrelay_persistence::CallRecordWriter;
use voxrelay_server::call::{handle_inbound_call, CallDeps, CallTimeouts};
use voxrelay_server::{init_metrics, AppState, AriClient, AriEvent, TransportBroker};

/// §7: process exit codes. 0 success, 64 bad configuration, 69 a
/// required service was unreachable at startup, 70 an internal error.
const EXIT_CONFIG: i32 = 64;
const EXIT_SERVICE_UNAVAILABLE: i32 = 69;
const EXIT_INTERNAL: i32 = 70;

#[tokio::main]
async fn main() {
    let env = std::env::var("VOXRELAY_ENV").ok();

    let settings = match load_settings(env.as_deref()).and_then(|s| {
        s.validate()?;
        Ok(s)
    }) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    init_tracing(&settings);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting voxrelay-server");

    let metrics_handle = init_metrics();

    let ari_http_base = ari_http_base_url(&settings.telephony.ari_url);
    let ari = AriClient::new(ari_http_base, settings.telephony.app_name.clone());

    if !ari.is_reachable().await {
        tracing::error!("asterisk REST interface unreachable at startup");
        std::process::exit(EXIT_SERVICE_UNAVAILABLE);
    }

    let mut ari_events = match ari.connect_events().await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!(%e, "failed to open ari event stream");
            std::process::exit(EXIT_SERVICE_UNAVAILABLE);
        }
    };

    let record_writer = CallRecordWriter::new(settings.persistence.call_record_path.clone());

    let sessions = Arc::new(voxrelay_agent::SessionManager::new(settings.server.max_concurrent_calls));
    let _cleanup_shutdown = sessions.start_cleanup_task();

    let transport_broker = Arc::new(TransportBroker::new(
        settings.telephony.rtp_port_range,
        settings.telephony.advertise_host.clone(),
    ));

    let server_port = settings.server.port;
    let server_host = settings.server.host.clone();
    let transport_kind = settings.telephony.transport;
    let audiosocket_port = server_port.saturating_add(1);

    let deps = Arc::new(CallDeps {
        settings: Arc::new(parking_lot::RwLock::new(settings)),
        ari: ari.clone(),
        sessions,
        transport_broker: transport_broker.clone(),
        record_writer,
        timeouts: CallTimeouts::default(),
    });

    if matches!(transport_kind, TransportKind::AudioSocket) {
        let listen_addr: SocketAddr = format!("{server_host}:{audiosocket_port}")
            .parse()
            .expect("invalid audiosocket bind address");
        let broker = transport_broker.clone();
        tokio::spawn(async move {
            if let Err(e) = broker.run_audiosocket_listener(listen_addr).await {
                tracing::error!(%e, "audiosocket listener exited");
            }
        });
    }

    let state = AppState::new(deps.clone(), metrics_handle, env);
    let calls = state.calls.clone();

    let event_loop_deps = deps.clone();
    let event_loop_calls = calls.clone();
    let event_loop = tokio::spawn(async move {
        while let Some(event) = ari_events.recv().await {
            match event {
                AriEvent::StasisStart { channel_id, caller_number, callee_number } => {
                    let deps = event_loop_deps.clone();
                    let calls = event_loop_calls.clone();
                    tokio::spawn(async move {
                        handle_inbound_call(deps, calls, channel_id, caller_number, callee_number).await;
                    });
                }
                AriEvent::StasisEnd { channel_id } | AriEvent::ChannelHangupRequest { channel_id } => {
                    if let Some(handle) = event_loop_calls.get(&channel_id) {
                        handle.cancel.cancel();
                    }
                }
                AriEvent::ChannelDtmfReceived { channel_id, digit } => {
                    if let Some(digit) = digit.chars().next() {
                        for entry in event_loop_calls.iter() {
                            entry.control.on_dtmf(&channel_id, digit);
                        }
                    }
                }
                AriEvent::BridgeAttendedTransfer { .. }
                | AriEvent::PlaybackFinished { .. }
                | AriEvent::ChannelStateChange { .. } => {}
            }
        }
        tracing::warn!("ari event stream closed");
    });

    let http_addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    let app = voxrelay_server::create_router(state);
    let listener = match tokio::net::TcpListener::bind(http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%e, %http_addr, "failed to bind health/admission listener");
            std::process::exit(EXIT_SERVICE_UNAVAILABLE);
        }
    };
    tracing::info!(%http_addr, "health/admission surface listening");

    let serve_result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    event_loop.abort();
    if let Err(e) = serve_result {
        tracing::error!(%e, "http server exited with error");
        std::process::exit(EXIT_INTERNAL);
    }

    tracing::info!("shutdown complete");
}

/// `telephony.ari_url` is shaped for the events endpoint
/// (`ws://host:8088/ari/events`) since that is the one URL `AriClient`
/// cannot derive on its own; every other ARI call is a plain HTTP POST
/// under `.../ari`, which `AriClient::connect_events` derives by
/// swapping the scheme back. Strip the `/events` suffix and normalize
/// the scheme here so `AriClient::new` gets the HTTP base it expects.
fn ari_http_base_url(ari_url: &str) -> String {
    let http_scheme = ari_url.replacen("wss://", "https://", 1).replacen("ws://", "http://", 1);
    http_scheme.strip_suffix("/events").unwrap_or(&http_scheme).to_string()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, draining"),
        _ = terminate => tracing::info!("received sigterm, draining"),
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("voxrelay={},tower_http=info", settings.observability.log_level).into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
