//! Session credentials: stateless access tokens paired with single-use refresh tokens.
//!
//! Access tokens are HS256 JWTs carrying only the user id. Refresh tokens are random
//! opaque strings; the database keeps an HMAC of each one, never the raw value. A user
//! holds at most one live refresh token, and every successful [`SessionManager::rotate`]
//! consumes the presented token and hands back a fresh pair.

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use taskly_db::entities::refresh_tokens;

pub const ACCESS_TOKEN_TTL: time::Duration = time::Duration::minutes(15);
pub const REFRESH_TOKEN_TTL: time::Duration = time::Duration::days(7);

const REFRESH_TOKEN_BYTES: usize = 40;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Missing, malformed, expired or unknown token.
    #[error("invalid credential")]
    InvalidCredential,
    #[error("invalid key material")]
    KeyMaterial,
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    user_id: Uuid,
    iat: i64,
    exp: i64,
}

/// Signing and hashing keys. Built once at startup and shared read-only.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    refresh_mac: Hmac<Sha256>,
}

impl TokenKeys {
    pub fn new(jwt_secret: &[u8], refresh_secret: &[u8]) -> Result<Self, SessionError> {
        let refresh_mac =
            Hmac::<Sha256>::new_from_slice(refresh_secret).map_err(|_| SessionError::KeyMaterial)?;
        Ok(Self {
            encoding: EncodingKey::from_secret(jwt_secret),
            decoding: DecodingKey::from_secret(jwt_secret),
            refresh_mac,
        })
    }
}

#[derive(Clone)]
pub struct SessionManager {
    db: Arc<DatabaseConnection>,
    keys: Arc<TokenKeys>,
}

impl SessionManager {
    pub fn new(db: Arc<DatabaseConnection>, keys: TokenKeys) -> Self {
        Self {
            db,
            keys: Arc::new(keys),
        }
    }

    /// Keyed digest of a raw refresh token, hex encoded. This is the only form of the
    /// token that is ever persisted.
    pub fn hash(&self, raw: &str) -> String {
        let mut mac = self.keys.refresh_mac.clone();
        mac.update(raw.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, SessionError> {
        self.issue_access_token_at(user_id, OffsetDateTime::now_utc())
    }

    fn issue_access_token_at(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<String, SessionError> {
        let claims = Claims {
            user_id,
            iat: now.unix_timestamp(),
            exp: (now + ACCESS_TOKEN_TTL).unix_timestamp(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys.encoding,
        )?)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Uuid, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        jsonwebtoken::decode::<Claims>(token, &self.keys.decoding, &validation)
            .map(|data| data.claims.user_id)
            .map_err(|_| SessionError::InvalidCredential)
    }

    /// Replaces whatever refresh token `user_id` holds with a new one and returns the raw
    /// value. A previously issued token stops working even if it has not expired.
    pub async fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, SessionError> {
        Ok(self.store_refresh_token(&*self.db, user_id).await?)
    }

    pub async fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, SessionError> {
        let access_token = self.issue_access_token(user_id)?;
        let refresh_token = self.issue_refresh_token(user_id).await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    async fn store_refresh_token<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<String, DbErr> {
        refresh_tokens::Entity::delete_many()
            .filter(refresh_tokens::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;

        let raw = random_token();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(REFRESH_TOKEN_TTL.whole_seconds());

        refresh_tokens::Entity::insert(refresh_tokens::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token_hash: Set(self.hash(&raw)),
            expires_at: Set(expires_at.into()),
            created_at: Set(now.into()),
        })
        .exec(conn)
        .await?;

        Ok(raw)
    }

    /// Exchanges a live refresh token for a new pair. The presented token is consumed.
    ///
    /// The whole exchange runs in one transaction and only succeeds if this call is the
    /// one that deletes the matched row, so two concurrent rotations of the same token
    /// cannot both win.
    pub async fn rotate(&self, raw: &str) -> Result<TokenPair, SessionError> {
        let txn = self.db.begin().await?;
        match self.rotate_in(&txn, raw).await {
            Ok(pair) => {
                txn.commit().await?;
                Ok(pair)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(%rollback_err, "failed to roll back refresh rotation");
                }
                Err(err)
            }
        }
    }

    async fn rotate_in(
        &self,
        txn: &DatabaseTransaction,
        raw: &str,
    ) -> Result<TokenPair, SessionError> {
        let record = refresh_tokens::Entity::find()
            .filter(refresh_tokens::Column::TokenHash.eq(self.hash(raw)))
            .one(txn)
            .await?
            .ok_or(SessionError::InvalidCredential)?;

        if record.expires_at <= Utc::now().fixed_offset() {
            return Err(SessionError::InvalidCredential);
        }

        let deleted = refresh_tokens::Entity::delete_by_id(record.id)
            .exec(txn)
            .await?;
        if deleted.rows_affected != 1 {
            return Err(SessionError::InvalidCredential);
        }

        let access_token = self.issue_access_token(record.user_id)?;
        let refresh_token = self.store_refresh_token(txn, record.user_id).await?;

        tracing::debug!(user_id = %record.user_id, "refresh token rotated");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Best-effort logout: unknown tokens and storage failures are not reported.
    pub async fn revoke(&self, raw: &str) {
        match refresh_tokens::Entity::delete_many()
            .filter(refresh_tokens::Column::TokenHash.eq(self.hash(raw)))
            .exec(&*self.db)
            .await
        {
            Ok(res) => tracing::debug!(rows = res.rows_affected, "refresh token revoked"),
            Err(err) => tracing::warn!(%err, "failed to revoke refresh token"),
        }
    }

    /// Deletes refresh tokens that expired at or before `now`. Returns the number removed.
    pub async fn purge_expired(&self, now: chrono::DateTime<Utc>) -> Result<u64, DbErr> {
        let res = refresh_tokens::Entity::delete_many()
            .filter(refresh_tokens::Column::ExpiresAt.lte(now.fixed_offset()))
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected)
    }
}

fn random_token() -> String {
    use rand::RngCore;
    let mut buf = [0u8; REFRESH_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
