use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use subcults_types::Did;

const ACCESS_LIFETIME_MINS: i64 = 60;
const REFRESH_LIFETIME_DAYS: i64 = 7;
const ROOM_GRANT_LIFETIME_MINS: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Present on access tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Short-lived grant admitting one DID to one audio room.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomGrantClaims {
    pub sub: String,
    pub session_id: Uuid,
    pub room: String,
    pub exp: i64,
    pub iat: i64,
}

/// JWT signing service with dual-key rotation.
///
/// New tokens always sign with `current`. Validation tries `current` first and
/// falls back to `previous` when present, so a rotation stays transparent to
/// holders of still-valid tokens. Drop `previous` once every refresh token
/// signed by it has expired.
pub struct JwtService {
    current: (EncodingKey, DecodingKey),
    previous: Option<DecodingKey>,
}

impl JwtService {
    pub fn new(current_secret: &str, previous_secret: Option<&str>) -> Self {
        Self {
            current: (
                EncodingKey::from_secret(current_secret.as_bytes()),
                DecodingKey::from_secret(current_secret.as_bytes()),
            ),
            previous: previous_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        }
    }

    pub fn issue_access_token(&self, did: &Did) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: did.to_string(),
            token_type: TokenType::Access,
            did: Some(did.to_string()),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ACCESS_LIFETIME_MINS)).timestamp(),
        };
        self.sign(&claims)
    }

    pub fn issue_refresh_token(&self, subject: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            token_type: TokenType::Refresh,
            did: None,
            iat: now.timestamp(),
            exp: (now + Duration::days(REFRESH_LIFETIME_DAYS)).timestamp(),
        };
        self.sign(&claims)
    }

    pub fn issue_room_grant(
        &self,
        did: &Did,
        session_id: Uuid,
        room: &str,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = RoomGrantClaims {
            sub: did.to_string(),
            session_id,
            room: room.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ROOM_GRANT_LIFETIME_MINS)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.current.0)
            .map_err(|e| AppError::Internal(format!("failed to sign room grant: {e}")))
    }

    fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.current.0)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(token, &self.current.1, &validation) {
            Ok(data) => Ok(data.claims),
            Err(current_err) => match &self.previous {
                Some(previous) => decode::<Claims>(token, previous, &validation)
                    .map(|data| data.claims)
                    .map_err(|_| AppError::AuthFailed("invalid token".to_string())),
                None => {
                    tracing::debug!(error = %current_err, "token rejected");
                    Err(AppError::AuthFailed("invalid token".to_string()))
                }
            },
        }
    }

    pub fn validate_room_grant(&self, token: &str) -> Result<RoomGrantClaims, AppError> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<RoomGrantClaims>(token, &self.current.1, &validation) {
            Ok(data) => Ok(data.claims),
            Err(_) => match &self.previous {
                Some(previous) => decode::<RoomGrantClaims>(token, previous, &validation)
                    .map(|data| data.claims)
                    .map_err(|_| AppError::AuthFailed("invalid room grant".to_string())),
                None => Err(AppError::AuthFailed("invalid room grant".to_string())),
            },
        }
    }
}

/// Authenticated caller, extracted from the `Authorization: Bearer` header.
/// Only access tokens are accepted; refresh tokens never reach handlers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub did: Did,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::AuthFailed("missing bearer token".to_string()))?;

        let jwt = Arc::<JwtService>::from_ref(state);
        let claims = jwt.validate(bearer.token())?;

        if claims.token_type != TokenType::Access {
            return Err(AppError::AuthFailed(
                "refresh tokens cannot authorize requests".to_string(),
            ));
        }
        let did = claims
            .did
            .ok_or_else(|| AppError::AuthFailed("token is missing identity".to_string()))?;
        let did = Did::new(did).map_err(|_| AppError::AuthFailed("malformed identity".to_string()))?;

        Ok(AuthUser { did })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did() -> Did {
        Did::new("did:plc:rotor1").unwrap()
    }

    #[test]
    fn access_token_round_trips() {
        let jwt = JwtService::new("0123456789abcdef0123456789abcdef", None);
        let token = jwt.issue_access_token(&did()).unwrap();
        let claims = jwt.validate(&token).unwrap();
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.did.as_deref(), Some("did:plc:rotor1"));
    }

    #[test]
    fn refresh_token_carries_no_did() {
        let jwt = JwtService::new("0123456789abcdef0123456789abcdef", None);
        let token = jwt.issue_refresh_token("did:plc:rotor1").unwrap();
        let claims = jwt.validate(&token).unwrap();
        assert_eq!(claims.token_type, TokenType::Refresh);
        assert!(claims.did.is_none());
    }

    #[test]
    fn previous_key_still_validates_after_rotation() {
        let old = JwtService::new("old-secret-old-secret-old-secret!", None);
        let token = old.issue_access_token(&did()).unwrap();

        // Rotate: old secret moves into the previous slot.
        let rotated = JwtService::new(
            "new-secret-new-secret-new-secret!",
            Some("old-secret-old-secret-old-secret!"),
        );
        assert!(rotated.validate(&token).is_ok());

        // A service that already dropped the previous key rejects it.
        let dropped = JwtService::new("new-secret-new-secret-new-secret!", None);
        assert!(dropped.validate(&token).is_err());
    }

    #[test]
    fn new_tokens_sign_with_current_key() {
        let rotated = JwtService::new(
            "new-secret-new-secret-new-secret!",
            Some("old-secret-old-secret-old-secret!"),
        );
        let token = rotated.issue_access_token(&did()).unwrap();

        // Current-only service (same current key) must accept it.
        let current_only = JwtService::new("new-secret-new-secret-new-secret!", None);
        assert!(current_only.validate(&token).is_ok());
    }

    #[test]
    fn room_grant_round_trips() {
        let jwt = JwtService::new("0123456789abcdef0123456789abcdef", None);
        let session = Uuid::new_v4();
        let token = jwt.issue_room_grant(&did(), session, "scene-basement").unwrap();
        let grant = jwt.validate_room_grant(&token).unwrap();
        assert_eq!(grant.session_id, session);
        assert_eq!(grant.room, "scene-basement");
    }
}
