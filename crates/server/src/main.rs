// proctor-server main.rs
// HTTP API for the exam proctoring integrity engine

use proctor_server::{build_router, build_state, Database, ServerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proctor_server=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("database: {:?}", config.db_path);
    tracing::info!("inference service: {}", config.inference_url);
    tracing::info!("port: {}", config.port);

    let db = Database::open(&config.db_path).expect("failed to open database");
    let state = build_state(&config, db);
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("proctoring engine listening at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("shutting down...");
}
