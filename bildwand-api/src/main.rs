use crate::blob::FsBlobStore;
use crate::caption::{CaptionGenerator, GeminiCaptioner, StaticCaptioner};
use crate::ingest::IngestPipeline;
use crate::server::ServerState;
use bildwand_common::snowflake::{ProcessId, SnowflakePartOutOfRangeError, WorkerId};
use bildwand_db::client::DbClient;
use bildwand_db::store::{ContentStore, DbError};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod blob;
mod caption;
mod ingest;
mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error connecting to the database: {0}")]
    Database(#[from] DbError),
    #[error("Error preparing the uploads directory: {0}")]
    UploadsDir(std::io::Error),
    #[error("Error building the captioning client: {0}")]
    CaptionClient(#[from] reqwest::Error),
    #[error(transparent)]
    SnowflakePart(#[from] SnowflakePartOutOfRangeError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    #[serde(default)]
    public_base_url: Option<String>,
    #[serde(default)]
    gemini_api_key: Option<String>,
    #[serde(default)]
    gemini_model: Option<String>,
    #[serde(default)]
    uploads_dir: Option<PathBuf>,
    #[serde(default)]
    worker_id: Option<u8>,
    #[serde(default)]
    process_id: Option<u8>,
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bildwand_api=debug,\
                bildwand_common=debug,bildwand_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

fn build_captioner(env: &Env) -> Result<Arc<dyn CaptionGenerator>, InitError> {
    match env.gemini_api_key.clone() {
        Some(api_key) => {
            let model = env
                .gemini_model
                .clone()
                .unwrap_or_else(|| caption::DEFAULT_MODEL.to_owned());
            Ok(Arc::new(GeminiCaptioner::new(api_key, model)?))
        }
        None => {
            warn!("No captioning credential configured, every upload gets the fallback caption");
            Ok(Arc::new(StaticCaptioner))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Could not listen for the shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let worker_id = WorkerId::try_from(env.worker_id.unwrap_or(0))?;
    let process_id = ProcessId::try_from(env.process_id.unwrap_or(0))?;
    let db_client = DbClient::connect(&env.database_url, worker_id, process_id).await?;
    let store: Arc<dyn ContentStore> = Arc::new(db_client);

    let uploads_dir = env
        .uploads_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("uploads"));
    let blobs = FsBlobStore::open(&uploads_dir)
        .await
        .map_err(InitError::UploadsDir)?;

    let captioner = build_captioner(&env)?;
    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        blobs.clone(),
        captioner,
        env.public_base_url.clone(),
    ));

    let state = ServerState {
        store,
        blobs,
        pipeline,
    };

    info!(uploads = %state.blobs.root().display(), "Serving uploads from disk");

    let app = server::routes()
        .with_state(state)
        .nest_service("/uploads", ServeDir::new(&uploads_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;

    info!(%server_address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
