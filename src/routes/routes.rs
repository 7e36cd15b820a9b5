/// Route CRUD endpoints
///
/// Routes are GeoJSON LineString features owned by a user. Distance and
/// extent are always computed server-side from the geometry; client-supplied
/// distances are ignored. Public routes are readable by anyone and can be
/// shared read-only through an opaque share token.

use actix_web::{web, HttpResponse};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{optional_current_user, require_current_user, Claims, User};
use crate::error::{AppError, ValidationError};
use crate::geo::{bounding_box, line_distance_km, parse_bbox, parse_line_string, Geometry};
use crate::routes::markers::{markers_for_route, markers_for_routes};

const MAX_TITLE_LENGTH: usize = 255;
const SHARE_TOKEN_LENGTH: usize = 32;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Deserialize)]
pub struct RouteCreate {
    pub title: String,
    pub description: Option<String>,
    pub geometry: Geometry,
    #[serde(default)]
    pub is_public: bool,
    /// Accepted for client convenience, always recomputed server-side.
    #[allow(dead_code)]
    pub distance_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct RouteUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub geometry: Option<Geometry>,
    pub is_public: Option<bool>,
    #[allow(dead_code)]
    pub distance_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub q: Option<String>,
    pub bbox: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RouteRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub geometry: Json<Geometry>,
    pub distance_km: f64,
    pub is_public: bool,
    pub share_token: Option<String>,
}

const ROUTE_COLUMNS: &str =
    "id, user_id, title, description, geometry, distance_km, is_public, share_token";

pub(crate) async fn fetch_route(pool: &PgPool, route_id: Uuid) -> Result<RouteRow, AppError> {
    sqlx::query_as::<_, RouteRow>(&format!(
        "SELECT {} FROM routes WHERE id = $1",
        ROUTE_COLUMNS
    ))
    .bind(route_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Route".to_string()))
}

pub(crate) fn can_view(route: &RouteRow, user: Option<&User>) -> bool {
    route.is_public || user.map(|u| u.id == route.user_id).unwrap_or(false)
}

pub(crate) fn require_owner(route: &RouteRow, user: &User) -> Result<(), AppError> {
    if route.user_id != user.id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

fn generate_share_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(ValidationError::EmptyField("title".to_string()));
    }
    if title.len() > MAX_TITLE_LENGTH {
        return Err(ValidationError::TooLong("title".to_string(), MAX_TITLE_LENGTH));
    }
    Ok(())
}

fn route_feature(route: &RouteRow, markers: Vec<Value>, include_share_token: bool) -> Value {
    let mut properties = json!({
        "title": route.title,
        "description": route.description,
        "distance_km": route.distance_km,
        "is_public": route.is_public,
        "markers": markers,
    });
    if include_share_token {
        properties["share_token"] = json!(route.share_token);
    }

    json!({
        "id": route.id.to_string(),
        "type": "Feature",
        "geometry": route.geometry.0,
        "properties": properties,
    })
}

/// GET /api/routes
///
/// Anonymous callers see public routes; authenticated callers additionally
/// see their own. Supports title search (`q`), bounding-box filtering
/// (`bbox=minLng,minLat,maxLng,maxLat`), sorting, and pagination.
pub async fn list_routes(
    query: web::Query<ListQuery>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let user = optional_current_user(pool.get_ref(), claims.as_deref()).await?;

    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(20);
    if page < 1 {
        return Err(ValidationError::InvalidFormat("page must be >= 1".to_string()).into());
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ValidationError::InvalidFormat(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        ))
        .into());
    }

    let sort = match query.sort.as_deref().unwrap_or("updated_at") {
        s @ ("created_at" | "updated_at" | "distance_km") => s,
        other => {
            return Err(ValidationError::InvalidFormat(format!(
                "unsupported sort field: {}",
                other
            ))
            .into())
        }
    };
    let order = match query.order.as_deref().unwrap_or("desc") {
        o @ ("asc" | "desc") => o,
        other => {
            return Err(ValidationError::InvalidFormat(format!(
                "unsupported order: {}",
                other
            ))
            .into())
        }
    };

    let bbox = query.bbox.as_deref().map(parse_bbox).transpose()?;

    // sort/order are whitelisted identifiers, never raw user input.
    let sql = format!(
        r#"
        SELECT {columns}
        FROM routes
        WHERE (is_public = TRUE OR user_id = $1)
          AND ($2::text IS NULL OR title ILIKE '%' || $2 || '%')
          AND ($3::float8 IS NULL
               OR (min_lng <= $5 AND max_lng >= $3 AND min_lat <= $6 AND max_lat >= $4))
        ORDER BY {sort} {order}, id ASC
        LIMIT $7 OFFSET $8
        "#,
        columns = ROUTE_COLUMNS,
        sort = sort,
        order = order,
    );

    let routes = sqlx::query_as::<_, RouteRow>(&sql)
        .bind(user.as_ref().map(|u| u.id))
        .bind(query.q.as_deref().filter(|q| !q.is_empty()))
        .bind(bbox.map(|b| b.min_lng))
        .bind(bbox.map(|b| b.min_lat))
        .bind(bbox.map(|b| b.max_lng))
        .bind(bbox.map(|b| b.max_lat))
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(pool.get_ref())
        .await?;

    if routes.is_empty() {
        return Ok(HttpResponse::Ok().json(Vec::<Value>::new()));
    }

    let route_ids: Vec<Uuid> = routes.iter().map(|r| r.id).collect();
    let mut markers_by_route = markers_for_routes(pool.get_ref(), &route_ids).await?;

    let features: Vec<Value> = routes
        .iter()
        .map(|route| {
            let markers = markers_by_route.remove(&route.id).unwrap_or_default();
            let is_owner = user.as_ref().map(|u| u.id == route.user_id).unwrap_or(false);
            route_feature(route, markers, is_owner)
        })
        .collect();

    Ok(HttpResponse::Ok().json(features))
}

/// POST /api/routes
pub async fn create_route(
    payload: web::Json<RouteCreate>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let user = require_current_user(pool.get_ref(), claims.as_deref()).await?;
    let payload = payload.into_inner();

    validate_title(&payload.title)?;
    let points = parse_line_string(&payload.geometry)?;
    let distance_km = line_distance_km(&points);
    let extent = bounding_box(&points);
    let share_token = payload.is_public.then(generate_share_token);

    let route = sqlx::query_as::<_, RouteRow>(&format!(
        r#"
        INSERT INTO routes
            (user_id, title, description, geometry, distance_km,
             min_lng, min_lat, max_lng, max_lat, is_public, share_token)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        ROUTE_COLUMNS
    ))
    .bind(user.id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(Json(&payload.geometry))
    .bind(distance_km)
    .bind(extent.min_lng)
    .bind(extent.min_lat)
    .bind(extent.max_lng)
    .bind(extent.max_lat)
    .bind(payload.is_public)
    .bind(&share_token)
    .fetch_one(pool.get_ref())
    .await?;

    tracing::info!(route_id = %route.id, user_id = %user.id, "Route created");
    Ok(HttpResponse::Created().json(route_feature(&route, Vec::new(), true)))
}

/// GET /api/routes/{route_id}
pub async fn get_route(
    route_id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let user = optional_current_user(pool.get_ref(), claims.as_deref()).await?;
    let route = fetch_route(pool.get_ref(), *route_id).await?;

    if !can_view(&route, user.as_ref()) {
        return Err(AppError::Forbidden);
    }

    let markers = markers_for_route(pool.get_ref(), route.id).await?;
    let is_owner = user.map(|u| u.id == route.user_id).unwrap_or(false);
    Ok(HttpResponse::Ok().json(route_feature(&route, markers, is_owner)))
}

/// PUT /api/routes/{route_id}
///
/// Partial update. A geometry change recomputes the canonical distance and
/// extent; making a route public mints its share token on first need.
pub async fn update_route(
    route_id: web::Path<Uuid>,
    payload: web::Json<RouteUpdate>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let user = require_current_user(pool.get_ref(), claims.as_deref()).await?;
    let route = fetch_route(pool.get_ref(), *route_id).await?;
    require_owner(&route, &user)?;

    let payload = payload.into_inner();

    let title = match payload.title {
        Some(title) => {
            validate_title(&title)?;
            title
        }
        None => route.title,
    };
    let description = payload.description.or(route.description);
    let is_public = payload.is_public.unwrap_or(route.is_public);

    let geometry = payload.geometry.unwrap_or(route.geometry.0);
    let points = parse_line_string(&geometry)?;
    let distance_km = line_distance_km(&points);
    let extent = bounding_box(&points);

    let share_token = match (is_public, route.share_token) {
        (true, None) => Some(generate_share_token()),
        (_, existing) => existing,
    };

    let updated = sqlx::query_as::<_, RouteRow>(&format!(
        r#"
        UPDATE routes
        SET title = $1, description = $2, geometry = $3, distance_km = $4,
            min_lng = $5, min_lat = $6, max_lng = $7, max_lat = $8,
            is_public = $9, share_token = $10, updated_at = now()
        WHERE id = $11
        RETURNING {}
        "#,
        ROUTE_COLUMNS
    ))
    .bind(&title)
    .bind(&description)
    .bind(Json(&geometry))
    .bind(distance_km)
    .bind(extent.min_lng)
    .bind(extent.min_lat)
    .bind(extent.max_lng)
    .bind(extent.max_lat)
    .bind(is_public)
    .bind(&share_token)
    .bind(route.id)
    .fetch_one(pool.get_ref())
    .await?;

    let markers = markers_for_route(pool.get_ref(), updated.id).await?;
    Ok(HttpResponse::Ok().json(route_feature(&updated, markers, true)))
}

/// DELETE /api/routes/{route_id}
pub async fn delete_route(
    route_id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let user = require_current_user(pool.get_ref(), claims.as_deref()).await?;
    let route = fetch_route(pool.get_ref(), *route_id).await?;
    require_owner(&route, &user)?;

    sqlx::query("DELETE FROM routes WHERE id = $1")
        .bind(route.id)
        .execute(pool.get_ref())
        .await?;

    tracing::info!(route_id = %route.id, user_id = %user.id, "Route deleted");
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/routes/share/{token}
///
/// Public read-only access to a shared route. No authentication; the share
/// token itself is the capability and is never echoed back.
pub async fn get_shared_route(
    token: web::Path<String>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let route = sqlx::query_as::<_, RouteRow>(&format!(
        "SELECT {} FROM routes WHERE share_token = $1 AND is_public = TRUE",
        ROUTE_COLUMNS
    ))
    .bind(token.as_str())
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::NotFound("Route".to_string()))?;

    let markers = markers_for_route(pool.get_ref(), route.id).await?;
    Ok(HttpResponse::Ok().json(route_feature(&route, markers, false)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(is_public: bool, user_id: Uuid) -> RouteRow {
        RouteRow {
            id: Uuid::new_v4(),
            user_id,
            title: "Morning loop".to_string(),
            description: None,
            geometry: Json(Geometry {
                kind: "LineString".to_string(),
                coordinates: json!([[-77.0, -12.0], [-77.1, -12.1]]),
            }),
            distance_km: 14.2,
            is_public,
            share_token: Some("token".to_string()),
        }
    }

    fn user(id: Uuid) -> User {
        User {
            id,
            email: "rider@example.com".to_string(),
            password_hash: String::new(),
            is_active: true,
        }
    }

    #[test]
    fn public_routes_are_visible_to_anyone() {
        let route = row(true, Uuid::new_v4());
        assert!(can_view(&route, None));
        assert!(can_view(&route, Some(&user(Uuid::new_v4()))));
    }

    #[test]
    fn private_routes_are_owner_only() {
        let owner_id = Uuid::new_v4();
        let route = row(false, owner_id);
        assert!(!can_view(&route, None));
        assert!(!can_view(&route, Some(&user(Uuid::new_v4()))));
        assert!(can_view(&route, Some(&user(owner_id))));
    }

    #[test]
    fn require_owner_rejects_non_owners() {
        let route = row(false, Uuid::new_v4());
        assert!(require_owner(&route, &user(Uuid::new_v4())).is_err());
        assert!(require_owner(&route, &user(route.user_id)).is_ok());
    }

    #[test]
    fn share_token_is_only_exposed_to_owner() {
        let route = row(true, Uuid::new_v4());
        let with = route_feature(&route, Vec::new(), true);
        let without = route_feature(&route, Vec::new(), false);

        assert_eq!(with["properties"]["share_token"], "token");
        assert!(without["properties"].get("share_token").is_none());
    }

    #[test]
    fn feature_shape_matches_geojson() {
        let route = row(true, Uuid::new_v4());
        let feature = route_feature(&route, Vec::new(), false);

        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "LineString");
        assert_eq!(feature["properties"]["distance_km"], 14.2);
        assert!(feature["properties"]["markers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn generated_share_tokens_are_url_safe() {
        let token = generate_share_token();
        assert_eq!(token.len(), SHARE_TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
