use axum::{Extension, Json, extract::State};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    SqlErr,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskly_db::entities::users;

use crate::error::{ApiError, ApiJson, require_present};
use crate::security::AuthUser;
use crate::state::AppState;

pub const EMAIL_TAKEN: &str = "Email already registered";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBody {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTimeWithTimeZone,
}

impl From<users::Model> for UserBody {
    fn from(u: users::Model) -> Self {
        UserBody {
            id: u.id,
            name: u.name,
            email: u.email,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub user: UserBody,
}

impl From<users::Model> for UserEnvelope {
    fn from(u: users::Model) -> Self {
        UserEnvelope { user: u.into() }
    }
}

pub async fn find_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<users::Model>, DbErr> {
    users::Entity::find()
        .filter(users::Column::Email.eq(email))
        .one(db)
        .await
}

// The pre-check in the handlers can race; the unique index on email is what decides.
pub fn email_conflict(err: DbErr) -> ApiError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => ApiError::Conflict(EMAIL_TAKEN),
        _ => err.into(),
    }
}

pub async fn create_user(
    db: &DatabaseConnection,
    name: &str,
    email: &str,
    password_hash: String,
) -> Result<users::Model, DbErr> {
    let now = Utc::now().fixed_offset();
    let model = users::Model {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.to_string(),
        password_hash,
        created_at: now,
        updated_at: now,
    };
    users::Entity::insert(users::ActiveModel {
        id: Set(model.id),
        name: Set(model.name.clone()),
        email: Set(model.email.clone()),
        password_hash: Set(model.password_hash.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    })
    .exec(db)
    .await?;
    Ok(model)
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserEnvelope>, ApiError> {
    let found = users::Entity::find_by_id(user.user_id)
        .one(&*state.db)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    Ok(Json(found.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(input), _): ApiJson<UpdateProfileRequest>,
) -> Result<Json<UserEnvelope>, ApiError> {
    let mut present = Vec::new();
    if let Some(name) = input.name.as_deref() {
        present.push(("name", name));
    }
    if let Some(email) = input.email.as_deref() {
        present.push(("email", email));
    }
    require_present(&present)?;

    let db = &*state.db;
    let current = users::Entity::find_by_id(user.user_id)
        .one(db)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;

    let mut active: users::ActiveModel = current.into();
    if let Some(name) = input.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(email) = input.email {
        let email = email.trim().to_string();
        if let Some(other) = find_by_email(db, &email).await? {
            if other.id != user.user_id {
                return Err(ApiError::Conflict(EMAIL_TAKEN));
            }
        }
        active.email = Set(email);
    }
    active.updated_at = Set(Utc::now().fixed_offset());

    let updated = active.update(db).await.map_err(email_conflict)?;
    Ok(Json(updated.into()))
}
