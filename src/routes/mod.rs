pub mod scraper;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let scraper_routes = Router::new()
        .route("/run", post(scraper::trigger))
        .route("/status", get(scraper::status))
        .route("/runs", get(scraper::runs))
        .route("/runs/{id}", get(scraper::run_detail))
        .route("/details", get(scraper::details))
        .route("/usage", get(scraper::usage))
        .route("/keywords", get(scraper::keywords))
        .route("/queue", get(scraper::queue))
        .with_state(state);

    Router::new().nest("/api/v1/scraper", scraper_routes)
}
