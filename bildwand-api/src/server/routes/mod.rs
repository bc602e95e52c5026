use crate::server::ServerRouter;
use axum::Router;

mod posts;
mod system;
mod uploads;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(posts::routes())
        .merge(uploads::routes())
        .merge(system::routes())
}
