use medkeep::{
    api,
    config::Config,
    embedding, indexing, jobs, logging, metrics,
    processing::Chunker,
    service::AppService,
    store::{schema, VectorStore},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = Arc::new(Config::from_env().expect("Failed to load config from environment"));
    tracing::info!(
        recognition_provider = %config.recognition_provider,
        embedding_model = %config.embedding_model,
        embedding_dimension = config.embedding_dimension,
        "Loaded configuration"
    );

    let pool = PgPoolOptions::new()
        .max_connections((config.job_workers as u32 + 4).max(8))
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to PostgreSQL");
    schema::run_migrations(&pool, config.embedding_dimension)
        .await
        .expect("Failed to apply database schema");

    let embedder =
        embedding::build_embedding_client(&config).expect("Failed to build embedding client");
    let chunker = Chunker::new(config.chunk_size_tokens, config.chunk_overlap_tokens)
        .expect("Failed to initialize chunker");
    let store = Arc::new(VectorStore::new(pool.clone(), chunker, embedder));

    let pipeline_metrics = Arc::new(metrics::PipelineMetrics::new());
    let indexing_service = Arc::new(indexing::IndexingService::new(
        pool.clone(),
        store.clone(),
        pipeline_metrics.clone(),
    ));

    let job_queue = jobs::JobQueue::start(
        Arc::new(jobs::PipelineExecutor::new(jobs::JobContext {
            pool: pool.clone(),
            config: config.clone(),
            indexing: indexing_service.clone(),
            metrics: pipeline_metrics.clone(),
        })),
        config.job_workers,
        config.job_queue_capacity,
        Duration::from_secs(config.job_timeout_seconds),
    );

    let service = Arc::new(AppService::new(
        pool,
        config.clone(),
        store,
        indexing_service,
        job_queue,
        pipeline_metrics,
    ));
    let app = api::create_router(service);

    let (listener, port) = bind_listener(config.server_port)
        .await
        .expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

async fn bind_listener(
    configured_port: Option<u16>,
) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = configured_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8300..=8399;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8300-8399",
    ))
}
