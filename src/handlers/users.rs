use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crashless::{create_error, HttpError};

use super::AppState;

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

// ─── GET /api/users/:id ──────────────────────────────────────────

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<User>, HttpError> {
    state
        .users
        .read()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| create_error("User not found", 404, "USER_NOT_FOUND"))
}

// ─── POST /api/users ─────────────────────────────────────────────

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), HttpError> {
    if !req.email.contains('@') {
        return Err(create_error("Invalid email address", 422, "VALIDATION_FAILED")
            .with_details(json!({ "field": "email", "value": req.email })));
    }

    let user = User {
        id: format!("usr_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        name: req.name,
        email: req.email,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.users.write().insert(user.id.clone(), user.clone());

    Ok((StatusCode::CREATED, Json(user)))
}
