use std::sync::Arc;

use bridge_core::{EventDispatcher, Hub, InMemoryStorage, LifecycleReporter};
use bridge_daemon::{router, AppState, Args, BridgeConfig};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config = BridgeConfig::load(&args)?;

    setup_logging(config.debug);

    info!(listen_addr = config.listen_addr, listen_port = config.listen_port, "mochi-bridged starting");

    // No external registry/status/audit implementation is wired in yet; an
    // in-process one stands in so the listener is runnable standalone (see
    // DESIGN.md's storage-collaborator note).
    let storage = Arc::new(InMemoryStorage::new());

    let (hub, lifecycle_rx) = Hub::new();
    let dispatcher = Arc::new(EventDispatcher::new(config.subscriber_inbox_capacity));
    let reporter = Arc::new(LifecycleReporter::new(storage.clone()));
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();

    let reporter_task = tokio::spawn((*reporter).clone().run(lifecycle_rx));
    let dispatcher_task = tokio::spawn(dispatcher.clone().run(event_rx));

    let state = AppState {
        hub: hub.clone(),
        registry: storage.clone(),
        audit: storage.clone(),
        session_config: config.session_config(),
        event_tx,
        reporter: reporter.clone(),
        max_frame_bytes: config.max_frame_bytes,
    };

    let listen_addr = config.listen_socket_addr()?;
    let tcp_listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "listening for connector handshakes");

    let app = router(state).into_make_service_with_connect_info::<std::net::SocketAddr>();

    let mut hup_signal = signal(SignalKind::hangup())?;
    let mut term_signal = signal(SignalKind::terminate())?;
    let mut interrupt_signal = signal(SignalKind::interrupt())?;

    let serve = axum::serve(tcp_listener, app).with_graceful_shutdown(async move {
        tokio::select! {
            _ = hup_signal.recv() => info!("HUP received, shutting down"),
            _ = term_signal.recv() => info!("TERM received, shutting down"),
            _ = interrupt_signal.recv() => info!("INT received, shutting down"),
        }
    });

    serve.await?;

    hub.shutdown(std::time::Duration::from_secs(10)).await;
    reporter_task.abort();
    dispatcher_task.abort();

    info!("mochi-bridged stopped");
    Ok(())
}

fn setup_logging(debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "debug" } else { "info" })
    });

    fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .init();
}
