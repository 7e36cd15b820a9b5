use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;
use std::sync::Arc;

use crate::configuration::Settings;
use crate::logger::RequestLogger;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    create_marker, create_route, delete_marker, delete_route, get_route, get_shared_route,
    health_check, list_markers, list_routes, login, me, refresh, register, update_marker,
    update_route,
};
use crate::security::{RateLimit, RateLimiterManager};

pub fn run(
    listener: TcpListener,
    connection: PgPool,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let connection = web::Data::new(connection);
    let jwt_config = web::Data::new(settings.jwt.clone());
    let app_settings = web::Data::new(settings.application.clone());
    let rate_limiter = Arc::new(RateLimiterManager::new(settings.rate_limit.clone()));

    let environment = settings.application.environment;
    let jwt_settings = settings.jwt.clone();
    let cors_origins = settings.application.cors_origins();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allow_any_header()
            .max_age(3600);
        for origin in &cors_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            // Global middleware
            .wrap(RequestLogger)
            .wrap(cors)

            // Shared state
            .app_data(connection.clone())
            .app_data(jwt_config.clone())
            .app_data(app_settings.clone())

            .route("/healthz", web::get().to(health_check))

            .service(
                web::scope("/api")
                    // Auth endpoints: rate limited; /me additionally resolves
                    // the bearer credential.
                    .service(
                        web::scope("/auth")
                            .wrap(RateLimit::new(rate_limiter.clone()))
                            .route("/register", web::post().to(register))
                            .route("/login", web::post().to(login))
                            .route("/refresh", web::post().to(refresh))
                            .service(
                                web::resource("/me")
                                    .wrap(JwtMiddleware::new(jwt_settings.clone(), environment))
                                    .route(web::get().to(me)),
                            ),
                    )
                    // Route/marker endpoints: bearer credential resolved when
                    // present; handlers decide whether anonymous is allowed.
                    .service(
                        web::scope("/routes")
                            .wrap(JwtMiddleware::new(jwt_settings.clone(), environment))
                            .route("/share/{token}", web::get().to(get_shared_route))
                            .route("", web::get().to(list_routes))
                            .route("", web::post().to(create_route))
                            .route("/{route_id}", web::get().to(get_route))
                            .route("/{route_id}", web::put().to(update_route))
                            .route("/{route_id}", web::delete().to(delete_route))
                            .route("/{route_id}/markers", web::get().to(list_markers))
                            .route("/{route_id}/markers", web::post().to(create_marker))
                            .route(
                                "/{route_id}/markers/{marker_id}",
                                web::put().to(update_marker),
                            )
                            .route(
                                "/{route_id}/markers/{marker_id}",
                                web::delete().to(delete_marker),
                            ),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
