#![doc = include_str!("../README.md")]

mod server;

use braid::Registry;
use clap::Parser;
use futures::Stream;
use server::config::{CliArgs, ServerConfig};
use server::middleware::{Metrics, build_registry};
use server::proto::{EchoRequest, EchoResponse, FILE_DESCRIPTOR_SET, echo_server::EchoServer};
use server::service::handler::EchoService;
use server::telemetry::init_telemetry;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServerConfig::try_from(CliArgs::parse())?;
    let providers = init_telemetry()?;

    let res = run(config).await;

    // Flush only once the server has stopped, so the last calls are exported.
    providers.shutdown();
    res
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    if config.auth_token.is_none() {
        tracing::warn!("AUTH_TOKEN is not set, serving without authentication");
    }

    // Setup phase: the registry is populated once and then only read while
    // the chains are composed for each method.
    let metrics = Metrics::new();
    let registry: Registry<EchoRequest, EchoResponse> = build_registry(&config, &metrics);
    tracing::info!(
        unary = registry.unary_len(),
        stream = registry.stream_len(),
        "Middleware registered"
    );
    let service = EchoService::new(config.clone(), &registry);

    let addr = config.server_addr.as_str();
    tracing::info!(
        addr,
        uds = config.uds,
        auth = config.auth_token.is_some(),
        "Starting echo service"
    );
    let res = if config.uds {
        serve_uds(addr, service).await
    } else {
        let listener = TcpListener::bind(addr).await?;
        serve(TcpListenerStream::new(listener), service).await
    };

    let stats = metrics.stats();
    tracing::info!(
        completed = stats.completed(),
        failed = stats.failed(),
        cancelled = stats.cancelled(),
        streams_inflight = stats.streams_inflight(),
        "Service shut down"
    );
    res
}

#[cfg(unix)]
async fn serve_uds(path: &str, service: EchoService) -> anyhow::Result<()> {
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;

    let listener = UnixListener::bind(path)?;
    let res = serve(UnixListenerStream::new(listener), service).await;
    let _ = std::fs::remove_file(path);
    res
}

#[cfg(not(unix))]
async fn serve_uds(_path: &str, _service: EchoService) -> anyhow::Result<()> {
    anyhow::bail!("Unix domain sockets are not supported on this platform")
}

async fn serve<I, IO, IE>(incoming: I, service: EchoService) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<EchoServer<EchoService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(echo_server(service.clone()))
        .serve_with_incoming_shutdown(incoming, shutdown(service, health_reporter))
        .await?;

    Ok(())
}

fn echo_server(service: EchoService) -> EchoServer<EchoService> {
    EchoServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

/// Resolves once a shutdown signal arrives, after marking the service as not
/// serving and cancelling every call still in flight.
async fn shutdown(service: EchoService, health_reporter: HealthReporter) {
    let signal = wait_for_signal().await;
    tracing::info!(signal, "Shutdown signal received, terminating gracefully...");

    health_reporter
        .set_not_serving::<EchoServer<EchoService>>()
        .await;
    service.shutdown();
}

async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(%err, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
