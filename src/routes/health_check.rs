use actix_web::{web, HttpResponse};

use crate::configuration::ApplicationSettings;

pub async fn health_check(app: web::Data<ApplicationSettings>) -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "env": app.environment.as_str(),
    }))
}
