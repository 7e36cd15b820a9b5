/// Marker endpoints
///
/// Markers are GeoJSON Point features attached to a route, ordered by an
/// explicit `order_index` that is unique per route. Omitting the index on
/// creation appends to the end; an explicit colliding index is a 409.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::{optional_current_user, require_current_user, Claims};
use crate::error::{is_unique_violation, AppError, DatabaseError, ValidationError};
use crate::geo::{parse_point, Geometry};
use crate::routes::routes::{can_view, fetch_route, require_owner};

const MAX_LABEL_LENGTH: usize = 100;
const MAX_ICON_TYPE_LENGTH: usize = 50;
const DEFAULT_ICON_TYPE: &str = "default";

#[derive(Deserialize)]
pub struct MarkerCreate {
    pub geometry: Geometry,
    pub label: Option<String>,
    pub description: Option<String>,
    pub icon_type: Option<String>,
    pub order_index: Option<i32>,
}

#[derive(Deserialize)]
pub struct MarkerUpdate {
    pub geometry: Option<Geometry>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub icon_type: Option<String>,
    pub order_index: Option<i32>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MarkerRow {
    pub id: Uuid,
    pub geometry: Json<Geometry>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub icon_type: String,
    pub order_index: i32,
}

const MARKER_COLUMNS: &str = "id, geometry, label, description, icon_type, order_index";

fn marker_feature(marker: &MarkerRow) -> Value {
    json!({
        "id": marker.id.to_string(),
        "type": "Feature",
        "geometry": marker.geometry.0,
        "properties": {
            "label": marker.label,
            "description": marker.description,
            "icon_type": marker.icon_type,
            "order_index": marker.order_index,
        },
    })
}

/// Markers of one route, in display order.
pub(crate) async fn markers_for_route(
    pool: &PgPool,
    route_id: Uuid,
) -> Result<Vec<Value>, AppError> {
    let rows = sqlx::query_as::<_, MarkerRow>(&format!(
        r#"
        SELECT {}
        FROM markers
        WHERE route_id = $1
        ORDER BY order_index ASC, created_at ASC
        "#,
        MARKER_COLUMNS
    ))
    .bind(route_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(marker_feature).collect())
}

/// Markers of many routes at once, grouped by route. Used by the route
/// listing to avoid one query per route.
pub(crate) async fn markers_for_routes(
    pool: &PgPool,
    route_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Value>>, AppError> {
    #[derive(sqlx::FromRow)]
    struct RouteMarkerRow {
        route_id: Uuid,
        id: Uuid,
        geometry: Json<Geometry>,
        label: Option<String>,
        description: Option<String>,
        icon_type: String,
        order_index: i32,
    }

    let rows = sqlx::query_as::<_, RouteMarkerRow>(&format!(
        r#"
        SELECT route_id, {}
        FROM markers
        WHERE route_id = ANY($1)
        ORDER BY route_id ASC, order_index ASC, created_at ASC
        "#,
        MARKER_COLUMNS
    ))
    .bind(route_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<Value>> = HashMap::new();
    for row in rows {
        let marker = MarkerRow {
            id: row.id,
            geometry: row.geometry,
            label: row.label,
            description: row.description,
            icon_type: row.icon_type,
            order_index: row.order_index,
        };
        grouped
            .entry(row.route_id)
            .or_default()
            .push(marker_feature(&marker));
    }
    Ok(grouped)
}

fn validate_marker_fields(
    label: Option<&str>,
    icon_type: Option<&str>,
) -> Result<(), ValidationError> {
    if let Some(label) = label {
        if label.len() > MAX_LABEL_LENGTH {
            return Err(ValidationError::TooLong("label".to_string(), MAX_LABEL_LENGTH));
        }
    }
    if let Some(icon_type) = icon_type {
        if icon_type.is_empty() {
            return Err(ValidationError::EmptyField("icon_type".to_string()));
        }
        if icon_type.len() > MAX_ICON_TYPE_LENGTH {
            return Err(ValidationError::TooLong(
                "icon_type".to_string(),
                MAX_ICON_TYPE_LENGTH,
            ));
        }
    }
    Ok(())
}

fn order_conflict(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::Database(DatabaseError::UniqueConstraintViolation(
            "marker_order_conflict".to_string(),
        ))
    } else {
        err.into()
    }
}

/// GET /api/routes/{route_id}/markers
pub async fn list_markers(
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
    Ok(HttpResponse::Ok().json(markers))
}

/// POST /api/routes/{route_id}/markers
pub async fn create_marker(
    route_id: web::Path<Uuid>,
    payload: web::Json<MarkerCreate>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let user = require_current_user(pool.get_ref(), claims.as_deref()).await?;
    let route = fetch_route(pool.get_ref(), *route_id).await?;
    require_owner(&route, &user)?;

    let payload = payload.into_inner();
    parse_point(&payload.geometry)?;
    validate_marker_fields(payload.label.as_deref(), payload.icon_type.as_deref())?;

    let order_index = match payload.order_index {
        Some(index) => index,
        None => {
            sqlx::query_scalar::<_, i32>(
                "SELECT COALESCE(MAX(order_index) + 1, 0) FROM markers WHERE route_id = $1",
            )
            .bind(route.id)
            .fetch_one(pool.get_ref())
            .await?
        }
    };

    let marker = sqlx::query_as::<_, MarkerRow>(&format!(
        r#"
        INSERT INTO markers (route_id, geometry, label, description, icon_type, order_index)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        MARKER_COLUMNS
    ))
    .bind(route.id)
    .bind(Json(&payload.geometry))
    .bind(&payload.label)
    .bind(&payload.description)
    .bind(payload.icon_type.as_deref().unwrap_or(DEFAULT_ICON_TYPE))
    .bind(order_index)
    .fetch_one(pool.get_ref())
    .await
    .map_err(order_conflict)?;

    tracing::info!(route_id = %route.id, marker_id = %marker.id, "Marker created");
    Ok(HttpResponse::Created().json(marker_feature(&marker)))
}

/// PUT /api/routes/{route_id}/markers/{marker_id}
pub async fn update_marker(
    path: web::Path<(Uuid, Uuid)>,
    payload: web::Json<MarkerUpdate>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let (route_id, marker_id) = path.into_inner();
    let user = require_current_user(pool.get_ref(), claims.as_deref()).await?;
    let route = fetch_route(pool.get_ref(), route_id).await?;
    require_owner(&route, &user)?;

    let existing = sqlx::query_as::<_, MarkerRow>(&format!(
        "SELECT {} FROM markers WHERE id = $1 AND route_id = $2",
        MARKER_COLUMNS
    ))
    .bind(marker_id)
    .bind(route.id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::NotFound("Marker".to_string()))?;

    let payload = payload.into_inner();
    validate_marker_fields(payload.label.as_deref(), payload.icon_type.as_deref())?;

    let geometry = match payload.geometry {
        Some(geometry) => {
            parse_point(&geometry)?;
            geometry
        }
        None => existing.geometry.0,
    };
    let label = payload.label.or(existing.label);
    let description = payload.description.or(existing.description);
    let icon_type = payload.icon_type.unwrap_or(existing.icon_type);
    let order_index = payload.order_index.unwrap_or(existing.order_index);

    let updated = sqlx::query_as::<_, MarkerRow>(&format!(
        r#"
        UPDATE markers
        SET geometry = $1, label = $2, description = $3, icon_type = $4, order_index = $5
        WHERE id = $6
        RETURNING {}
        "#,
        MARKER_COLUMNS
    ))
    .bind(Json(&geometry))
    .bind(&label)
    .bind(&description)
    .bind(&icon_type)
    .bind(order_index)
    .bind(existing.id)
    .fetch_one(pool.get_ref())
    .await
    .map_err(order_conflict)?;

    Ok(HttpResponse::Ok().json(marker_feature(&updated)))
}

/// DELETE /api/routes/{route_id}/markers/{marker_id}
pub async fn delete_marker(
    path: web::Path<(Uuid, Uuid)>,
    pool: web::Data<PgPool>,
    claims: Option<web::ReqData<Claims>>,
) -> Result<HttpResponse, AppError> {
    let (route_id, marker_id) = path.into_inner();
    let user = require_current_user(pool.get_ref(), claims.as_deref()).await?;
    let route = fetch_route(pool.get_ref(), route_id).await?;
    require_owner(&route, &user)?;

    let result = sqlx::query("DELETE FROM markers WHERE id = $1 AND route_id = $2")
        .bind(marker_id)
        .bind(route.id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Marker".to_string()));
    }

    tracing::info!(route_id = %route.id, marker_id = %marker_id, "Marker deleted");
    Ok(HttpResponse::NoContent().finish())
}
