mod config;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "failed to load .env");
        }
    }

    let config = config::ServerConfig::from_env();
    let port = config.port;
    tracing::info!(
        outbound_queue_capacity = config.outbound_queue_capacity,
        max_points_per_delta = config.limits.max_points_per_delta,
        max_strokes_per_session = config.max_strokes_per_session,
        max_points_per_stroke = config.max_points_per_stroke,
        "configuration loaded"
    );

    let state = state::AppState::new(config);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "sketch server listening");
    axum::serve(listener, app).await.expect("server failed");
}
