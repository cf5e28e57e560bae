use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskly_db::entities::tasks::{self, TaskPriority, TaskStatus};

use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery, MessageBody, require_present};
use crate::security::AuthUser;
use crate::state::AppState;

const TASK_NOT_FOUND: &str = "Task not found";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBody {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub user_id: Uuid,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl From<tasks::Model> for TaskBody {
    fn from(t: tasks::Model) -> Self {
        TaskBody {
            id: t.id,
            title: t.title,
            description: t.description,
            status: t.status,
            priority: t.priority,
            user_id: t.user_id,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskEnvelope {
    pub task: TaskBody,
}

#[derive(Debug, Serialize)]
pub struct TaskList {
    pub tasks: Vec<TaskBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

fn list_condition(user_id: Uuid, query: &ListQuery) -> Condition {
    let mut cond = Condition::all().add(tasks::Column::UserId.eq(user_id));

    if let Some(status) = query.status {
        cond = cond.add(tasks::Column::Status.eq(status));
    }
    if let Some(priority) = query.priority {
        cond = cond.add(tasks::Column::Priority.eq(priority));
    }

    let search = query.search.as_deref().map(str::trim).unwrap_or_default();
    if !search.is_empty() {
        let pattern = format!("%{}%", search.to_lowercase());
        cond = cond.add(
            Condition::any()
                .add(Expr::expr(Func::lower(Expr::col(tasks::Column::Title))).like(pattern.clone()))
                .add(Expr::expr(Func::lower(Expr::col(tasks::Column::Description))).like(pattern)),
        );
    }
    cond
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Query(query), _): ApiQuery<ListQuery>,
) -> Result<Json<TaskList>, ApiError> {
    let rows = tasks::Entity::find()
        .filter(list_condition(user.user_id, &query))
        .order_by_desc(tasks::Column::CreatedAt)
        .all(&*state.db)
        .await?;

    Ok(Json(TaskList {
        tasks: rows.into_iter().map(TaskBody::from).collect(),
    }))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(input), _): ApiJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskEnvelope>), ApiError> {
    require_present(&[("title", input.title.as_str())])?;

    let now = Utc::now().fixed_offset();
    let task = tasks::Model {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        title: input.title.trim().to_string(),
        description: input.description,
        status: input.status.unwrap_or_default(),
        priority: input.priority.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };

    tasks::Entity::insert(tasks::ActiveModel {
        id: Set(task.id),
        user_id: Set(task.user_id),
        title: Set(task.title.clone()),
        description: Set(task.description.clone()),
        status: Set(task.status),
        priority: Set(task.priority),
        created_at: Set(now),
        updated_at: Set(now),
    })
    .exec(&*state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(TaskEnvelope { task: task.into() })))
}

async fn find_owned(
    state: &AppState,
    user: AuthUser,
    id: Uuid,
) -> Result<tasks::Model, ApiError> {
    tasks::Entity::find_by_id(id)
        .filter(tasks::Column::UserId.eq(user.user_id))
        .one(&*state.db)
        .await?
        .ok_or(ApiError::NotFound(TASK_NOT_FOUND))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Path(id), _): ApiPath<Uuid>,
    WithRejection(Json(input), _): ApiJson<UpdateTaskRequest>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    if let Some(title) = input.title.as_deref() {
        require_present(&[("title", title)])?;
    }

    let current = find_owned(&state, user, id).await?;
    let mut active: tasks::ActiveModel = current.into();
    if let Some(title) = input.title {
        active.title = Set(title.trim().to_string());
    }
    if let Some(description) = input.description {
        active.description = Set(Some(description));
    }
    if let Some(status) = input.status {
        active.status = Set(status);
    }
    if let Some(priority) = input.priority {
        active.priority = Set(priority);
    }
    active.updated_at = Set(Utc::now().fixed_offset());

    let updated = active.update(&*state.db).await?;
    Ok(Json(TaskEnvelope {
        task: updated.into(),
    }))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Path(id), _): ApiPath<Uuid>,
) -> Result<Json<MessageBody>, ApiError> {
    let res = tasks::Entity::delete_many()
        .filter(tasks::Column::Id.eq(id))
        .filter(tasks::Column::UserId.eq(user.user_id))
        .exec(&*state.db)
        .await?;
    if res.rows_affected == 0 {
        return Err(ApiError::NotFound(TASK_NOT_FOUND));
    }
    Ok(Json(MessageBody {
        message: "Task deleted successfully",
    }))
}
