use std::sync::Arc;

use taskly_db::sea_orm::DatabaseConnection;

use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub sessions: SessionManager,
    pub secure_cookies: bool,
    pub allowed_origins: Arc<[String]>,
}
