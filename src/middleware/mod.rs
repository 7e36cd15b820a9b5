/// Middleware module
///
/// Custom middleware for authentication and other cross-cutting concerns.

mod jwt_middleware;

pub use jwt_middleware::JwtMiddleware;
