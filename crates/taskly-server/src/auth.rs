use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header::SET_COOKIE},
    response::{IntoResponseParts, ResponseParts},
};
use axum_extra::extract::{
    WithRejection,
    cookie::{Cookie, CookieJar, SameSite},
};
use serde::Deserialize;

use crate::error::{ApiError, ApiJson, MessageBody, require_present};
use crate::session::{ACCESS_TOKEN_TTL, REFRESH_TOKEN_TTL, SessionError, TokenPair};
use crate::state::AppState;
use crate::users::{self, UserEnvelope};

pub const ACCESS_COOKIE_NAME: &str = "accessToken";
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

const INVALID_LOGIN: &str = "Invalid email or password";

// Older clients were issued refresh cookies scoped to these paths.
const LEGACY_REFRESH_PATHS: [&str; 2] = ["/api/auth", "/auth"];

fn session_cookie(
    name: &'static str,
    value: String,
    max_age: time::Duration,
    secure: bool,
) -> Cookie<'static> {
    let mut c = Cookie::new(name, value);
    c.set_http_only(true);
    c.set_same_site(SameSite::Lax);
    c.set_secure(secure);
    c.set_path("/");
    c.set_max_age(max_age);
    c
}

fn clear_cookie(name: &'static str, path: &'static str) -> Cookie<'static> {
    let mut c = Cookie::new(name, "");
    c.set_path(path);
    c.make_removal();
    c
}

/// Response part that expires both session cookies, including refresh cookies left
/// behind at legacy paths.
#[derive(Debug)]
pub struct ClearedSession(CookieJar);

impl ClearedSession {
    pub fn jar(&self) -> &CookieJar {
        &self.0
    }
}

impl IntoResponseParts for ClearedSession {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let mut res = self.0.into_response_parts(res)?;
        // The jar keys cookies by name alone, so same-name removals at other paths
        // have to go out as their own headers.
        for path in LEGACY_REFRESH_PATHS {
            let removal = clear_cookie(REFRESH_COOKIE_NAME, path).to_string();
            if let Ok(value) = HeaderValue::from_str(&removal) {
                res.headers_mut().append(SET_COOKIE, value);
            }
        }
        Ok(res)
    }
}

pub fn set_session_cookies(jar: CookieJar, pair: TokenPair, secure: bool) -> CookieJar {
    jar.add(session_cookie(
        ACCESS_COOKIE_NAME,
        pair.access_token,
        ACCESS_TOKEN_TTL,
        secure,
    ))
    .add(session_cookie(
        REFRESH_COOKIE_NAME,
        pair.refresh_token,
        REFRESH_TOKEN_TTL,
        secure,
    ))
}

pub fn clear_session_cookies(jar: CookieJar) -> ClearedSession {
    ClearedSession(
        jar.remove(clear_cookie(ACCESS_COOKIE_NAME, "/"))
            .remove(clear_cookie(REFRESH_COOKIE_NAME, "/")),
    )
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let argon2 = argon2::Argon2::default();
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

fn verify_password(hash: &str, password: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    argon2::Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Debug, Default, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(input), _): ApiJson<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<UserEnvelope>), ApiError> {
    require_present(&[
        ("name", input.name.as_str()),
        ("email", input.email.as_str()),
        ("password", input.password.as_str()),
    ])?;

    let db = &*state.db;
    let email = input.email.trim();
    if users::find_by_email(db, email).await?.is_some() {
        return Err(ApiError::Conflict(users::EMAIL_TAKEN));
    }

    let password_hash = hash_password(&input.password)
        .map_err(|e| ApiError::internal(anyhow::anyhow!("hash error: {e}")))?;
    let user = users::create_user(db, input.name.trim(), email, password_hash)
        .await
        .map_err(users::email_conflict)?;

    let pair = state.sessions.issue_pair(user.id).await?;
    tracing::info!(user_id = %user.id, "user signed up");

    let jar = set_session_cookies(jar, pair, state.secure_cookies);
    Ok((StatusCode::CREATED, jar, Json(user.into())))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(input), _): ApiJson<LoginRequest>,
) -> Result<(CookieJar, Json<UserEnvelope>), ApiError> {
    require_present(&[
        ("email", input.email.as_str()),
        ("password", input.password.as_str()),
    ])?;

    let user = users::find_by_email(&state.db, input.email.trim())
        .await?
        .ok_or(ApiError::Unauthorized(INVALID_LOGIN))?;

    if !verify_password(&user.password_hash, &input.password) {
        return Err(ApiError::Unauthorized(INVALID_LOGIN));
    }

    let pair = state.sessions.issue_pair(user.id).await?;
    let jar = set_session_cookies(jar, pair, state.secure_cookies);
    Ok((jar, Json(user.into())))
}

// A failed rotation ends the session: both cookies are cleared so the client has to
// log in again.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageBody>), (Option<ClearedSession>, ApiError)> {
    let raw = jar.get(REFRESH_COOKIE_NAME).map(|c| c.value().to_string());
    let Some(raw) = raw else {
        return Err((
            Some(clear_session_cookies(jar)),
            ApiError::Unauthorized("Refresh token required"),
        ));
    };

    match state.sessions.rotate(&raw).await {
        Ok(pair) => Ok((
            set_session_cookies(jar, pair, state.secure_cookies),
            Json(MessageBody {
                message: "Token refreshed",
            }),
        )),
        Err(SessionError::InvalidCredential) => Err((
            Some(clear_session_cookies(jar)),
            ApiError::Unauthorized("Invalid or expired refresh token"),
        )),
        Err(err) => Err((None, err.into())),
    }
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (ClearedSession, Json<MessageBody>) {
    let raw = jar.get(REFRESH_COOKIE_NAME).map(|c| c.value().to_string());
    if let Some(raw) = raw {
        state.sessions.revoke(&raw).await;
    }

    (
        clear_session_cookies(jar),
        Json(MessageBody {
            message: "Logged out successfully",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::authenticate;
    use crate::test_support::{json_body, test_state};
    use axum::http::{HeaderMap, header};
    use axum::response::IntoResponse;

    fn signup_request(email: &str) -> SignupRequest {
        SignupRequest {
            name: "Ada".into(),
            email: email.into(),
            password: "correct horse".into(),
        }
    }

    fn cookie_value(jar: &CookieJar, name: &str) -> String {
        jar.get(name).map(|c| c.value().to_string()).unwrap()
    }

    fn request_with(name: &'static str, value: String) -> CookieJar {
        CookieJar::new().add(Cookie::new(name, value))
    }

    #[test]
    fn session_cookies_carry_expected_attributes() {
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let jar = set_session_cookies(CookieJar::new(), pair, true);

        let access = jar.get(ACCESS_COOKIE_NAME).unwrap();
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.same_site(), Some(SameSite::Lax));
        assert_eq!(access.secure(), Some(true));
        assert_eq!(access.path(), Some("/"));
        assert_eq!(access.max_age(), Some(time::Duration::minutes(15)));

        let refresh = jar.get(REFRESH_COOKIE_NAME).unwrap();
        assert_eq!(refresh.max_age(), Some(time::Duration::days(7)));
        assert_eq!(refresh.http_only(), Some(true));
    }

    #[test]
    fn cookies_are_not_secure_outside_production() {
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let jar = set_session_cookies(CookieJar::new(), pair, false);
        assert_eq!(jar.get(ACCESS_COOKIE_NAME).unwrap().secure(), Some(false));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password(&hash, "s3cret"));
        assert!(!verify_password(&hash, "guess"));
        assert!(!verify_password("not-a-phc-string", "s3cret"));
    }

    #[tokio::test]
    async fn signup_issues_a_working_session() {
        let state = test_state().await;
        let (status, jar, Json(body)) = signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(signup_request("ada@example.com")),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.user.email, "ada@example.com");

        let mut headers = HeaderMap::new();
        let cookie = format!("{ACCESS_COOKIE_NAME}={}", cookie_value(&jar, ACCESS_COOKIE_NAME));
        headers.insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        let user = authenticate(&state, &headers).unwrap();
        assert_eq!(user.user_id, body.user.id);
    }

    #[tokio::test]
    async fn signup_rejects_duplicate_email() {
        let state = test_state().await;
        signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(signup_request("ada@example.com")),
        )
        .await
        .unwrap();

        let res = signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(signup_request("ada@example.com")),
        )
        .await;
        assert!(matches!(res, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn signup_requires_every_field() {
        let state = test_state().await;
        let res = signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(SignupRequest::default()),
        )
        .await;
        match res {
            Err(ApiError::Validation(fields)) => assert_eq!(fields.len(), 3),
            other => panic!("unexpected result: {:?}", other.map(|(s, _, _)| s)),
        }
    }

    #[tokio::test]
    async fn login_checks_the_password() {
        let state = test_state().await;
        signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(signup_request("ada@example.com")),
        )
        .await
        .unwrap();

        let bad = login(
            State(state.clone()),
            CookieJar::new(),
            json_body(LoginRequest {
                email: "ada@example.com".into(),
                password: "wrong".into(),
            }),
        )
        .await;
        assert!(matches!(bad, Err(ApiError::Unauthorized(INVALID_LOGIN))));

        let unknown = login(
            State(state.clone()),
            CookieJar::new(),
            json_body(LoginRequest {
                email: "nobody@example.com".into(),
                password: "correct horse".into(),
            }),
        )
        .await;
        assert!(matches!(unknown, Err(ApiError::Unauthorized(INVALID_LOGIN))));
    }

    #[tokio::test]
    async fn login_replaces_the_previous_session() {
        let state = test_state().await;
        let (_, first, _) = signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(signup_request("ada@example.com")),
        )
        .await
        .unwrap();
        let first_refresh = cookie_value(&first, REFRESH_COOKIE_NAME);

        let (second, Json(body)) = login(
            State(state.clone()),
            CookieJar::new(),
            json_body(LoginRequest {
                email: "ada@example.com".into(),
                password: "correct horse".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body.user.email, "ada@example.com");

        let stale = refresh(
            State(state.clone()),
            request_with(REFRESH_COOKIE_NAME, first_refresh),
        )
        .await;
        assert!(stale.is_err());

        let fresh = refresh(
            State(state.clone()),
            request_with(REFRESH_COOKIE_NAME, cookie_value(&second, REFRESH_COOKIE_NAME)),
        )
        .await;
        assert!(fresh.is_ok());
    }

    #[tokio::test]
    async fn refresh_rotates_the_cookie_pair() {
        let state = test_state().await;
        let (_, jar, _) = signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(signup_request("ada@example.com")),
        )
        .await
        .unwrap();
        let old = cookie_value(&jar, REFRESH_COOKIE_NAME);

        let Ok((rotated, _)) =
            refresh(State(state.clone()), request_with(REFRESH_COOKIE_NAME, old.clone())).await
        else {
            panic!("rotation failed");
        };
        assert_ne!(cookie_value(&rotated, REFRESH_COOKIE_NAME), old);
        assert!(rotated.get(ACCESS_COOKIE_NAME).is_some());

        let Err((cleared, err)) =
            refresh(State(state.clone()), request_with(REFRESH_COOKIE_NAME, old)).await
        else {
            panic!("reused refresh token was accepted");
        };
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(cleared.unwrap().jar().get(REFRESH_COOKIE_NAME).is_none());
    }

    #[tokio::test]
    async fn refresh_without_cookie_is_unauthorized() {
        let state = test_state().await;
        let res = refresh(State(state.clone()), CookieJar::new()).await;
        assert!(matches!(res, Err((_, ApiError::Unauthorized(_)))));
    }

    #[tokio::test]
    async fn logout_revokes_and_clears() {
        let state = test_state().await;
        let (_, jar, _) = signup(
            State(state.clone()),
            CookieJar::new(),
            json_body(signup_request("ada@example.com")),
        )
        .await
        .unwrap();
        let raw = cookie_value(&jar, REFRESH_COOKIE_NAME);

        let (cleared, _) = logout(
            State(state.clone()),
            request_with(REFRESH_COOKIE_NAME, raw.clone()),
        )
        .await;
        assert!(cleared.jar().get(REFRESH_COOKIE_NAME).is_none());
        assert!(state.sessions.rotate(&raw).await.is_err());

        // A second logout with the same cookie is harmless.
        logout(State(state.clone()), request_with(REFRESH_COOKIE_NAME, raw)).await;
    }

    #[tokio::test]
    async fn missing_access_cookie_is_rejected() {
        let state = test_state().await;
        let res = authenticate(&state, &HeaderMap::new());
        assert!(matches!(res, Err(ApiError::Unauthorized("Authentication required"))));
    }

    #[tokio::test]
    async fn logout_expires_refresh_cookie_at_every_path() {
        let state = test_state().await;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("accessToken=a; refreshToken=stale"),
        );

        let res = logout(State(state), CookieJar::from_headers(&headers))
            .await
            .into_response();

        let removed: Vec<Cookie<'static>> = res
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| Cookie::parse(v.to_str().ok()?.to_string()).ok())
            .collect();
        let mut refresh_paths: Vec<&str> = removed
            .iter()
            .filter(|c| c.name() == REFRESH_COOKIE_NAME)
            .filter_map(|c| c.path())
            .collect();
        refresh_paths.sort();
        assert_eq!(refresh_paths, vec!["/", "/api/auth", "/auth"]);
        assert!(
            removed
                .iter()
                .all(|c| c.max_age() == Some(time::Duration::ZERO))
        );
        assert!(removed.iter().any(|c| c.name() == ACCESS_COOKIE_NAME));
    }
}
