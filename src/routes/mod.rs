mod auth;
mod health_check;
mod markers;
mod routes;

pub use auth::{login, me, refresh, register};
pub use health_check::health_check;
pub use markers::{create_marker, delete_marker, list_markers, update_marker};
pub use routes::{
    create_route, delete_route, get_route, get_shared_route, list_routes, update_route,
};
