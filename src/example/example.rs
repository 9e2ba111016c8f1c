use std::path::PathBuf;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::Request,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use axum_size_guard::size_limit::{
    GlobalSizeConfig, RouteSizeOverride, RouteTable, SizeGuardConfig, SizeGuardLayer, SizeLimitSettings,
    with_size_guard,
};
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Demo server behind the streaming request size guard")]
struct Args {
    /// TOML size guard configuration. Built-in defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "127.0.0.1:3000")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let layer: SizeGuardLayer = match &args.config {
        Some(path) => SizeGuardConfig::from_file(path)?.into(),
        None => {
            // 8 KiB for everything, 10 MB for uploads, no limit on /bulk
            let global = GlobalSizeConfig::new(SizeLimitSettings::new(8 * 1024), "demo.")?;
            let routes = RouteTable::new()
                .with_route("/api/upload", RouteSizeOverride::new(10_000_000))?
                .with_route("/api/bulk", RouteSizeOverride::disabled())?;
            SizeGuardLayer::new(global).with_routes(routes)
        }
    };

    let app = Router::new()
        .route("/api/echo", post(handle_echo))
        .route("/api/upload", post(handle_upload))
        .route("/api/bulk", post(handle_upload));
    let app = with_size_guard(app, layer);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!(address = %args.bind, "Listening");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn handle_echo(body: Bytes) -> impl IntoResponse {
    (StatusCode::OK, body)
}

async fn handle_upload(req: Request<Body>) -> impl IntoResponse {
    let mut stream = req.into_body().into_data_stream();
    let mut total = 0usize;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => total += bytes.len(),
            Err(_) => return (StatusCode::BAD_REQUEST, "Failed to read body").into_response(),
        }
    }

    format!("Uploaded: {} bytes", total).into_response()
}
