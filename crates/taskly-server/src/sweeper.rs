use std::time::Duration;

use crate::session::SessionManager;

/// Periodically deletes refresh tokens past their expiry. Expired tokens are already
/// rejected by rotation; this only keeps the table from growing.
#[derive(Clone)]
pub struct ExpiredTokenSweeper {
    sessions: SessionManager,
    interval: Duration,
}

impl ExpiredTokenSweeper {
    pub fn new(sessions: SessionManager, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                self.tick().await;
            }
        })
    }

    async fn tick(&self) -> u64 {
        match self.sessions.purge_expired(chrono::Utc::now()).await {
            Ok(0) => 0,
            Ok(n) => {
                tracing::info!(removed = n, "purged expired refresh tokens");
                n
            }
            Err(err) => {
                tracing::warn!(%err, "refresh token sweep failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drop_refresh_tokens, insert_user, manager, memory_db};
    use sea_orm::{EntityTrait, PaginatorTrait, Set};
    use taskly_db::entities::refresh_tokens;
    use uuid::Uuid;

    #[tokio::test]
    async fn tick_removes_expired_tokens() {
        let db = memory_db().await;
        let user_id = insert_user(&db, "ada@example.com").await;
        let now = chrono::Utc::now();
        refresh_tokens::Entity::insert(refresh_tokens::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token_hash: Set("stale".to_string()),
            expires_at: Set((now - chrono::Duration::hours(1)).into()),
            created_at: Set((now - chrono::Duration::days(7)).into()),
        })
        .exec(&*db)
        .await
        .unwrap();

        let sweeper = ExpiredTokenSweeper::new(manager(db.clone()), Duration::from_secs(60));
        assert_eq!(sweeper.tick().await, 1);
        assert_eq!(refresh_tokens::Entity::find().count(&*db).await.unwrap(), 0);
        assert_eq!(sweeper.tick().await, 0);
    }

    #[tokio::test]
    async fn tick_survives_storage_errors() {
        let db = memory_db().await;
        drop_refresh_tokens(&db).await;
        let sweeper = ExpiredTokenSweeper::new(manager(db.clone()), Duration::from_secs(60));
        assert!(sweeper.sessions.purge_expired(chrono::Utc::now()).await.is_err());
        assert_eq!(sweeper.tick().await, 0);
    }
}
