mod error;
mod events;
mod presence;
mod rooms;
mod routes;
mod session;
mod store;

use axum::{Extension, Router};
use sqlx::SqlitePool;
use tower_http::services::ServeDir;

use crate::error::AppErr;
use crate::presence::Registry;
use crate::rooms::RoomRouter;
use crate::store::MessageLog;

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let pool = SqlitePool::connect(&std::env::var("DATABASE_URL")?).await?;
    let log = MessageLog::new(pool);
    log.migrate().await?;

    let registry = Registry::default();
    let rooms = RoomRouter::default();

    let app = Router::new()
        .merge(routes::router())
        .fallback_service(ServeDir::new("static"))
        .layer(Extension(log))
        .layer(Extension(registry))
        .layer(Extension(rooms));

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
