use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::{Id, User};
use crate::repo::RepoError;
use crate::routes::AppState;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username at issue time; informational only.
    pub sub: String,
    pub uid: Id,
    pub iat: usize,
    pub exp: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("token lifetime puts expiry out of range")]
    ExpiryOutOfRange,
    #[error(transparent)]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// Signs and verifies bearer tokens (HS256, fixed validity window).
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: chrono::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        let now = chrono::Utc::now();
        let exp = now.checked_add_signed(self.ttl).ok_or(TokenError::ExpiryOutOfRange)?;
        let claims = Claims {
            sub: user.username.clone(),
            uid: user.id,
            iat: now.timestamp() as usize,
            exp: usize::try_from(exp.timestamp()).map_err(|_| TokenError::ExpiryOutOfRange)?,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Validate a JWT and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

/// The authenticated side of an actor: resolved from storage on every
/// request so role changes apply to tokens already issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Id,
    pub username: String,
    pub role: Role,
    pub is_superuser: bool,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin || self.is_superuser
    }

    pub fn is_moderator(&self) -> bool {
        self.role == Role::Moderator
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            is_superuser: user.is_superuser,
        }
    }
}

/// Who is making the request. Extracted from the optional bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    Member(Identity),
}

impl Actor {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Actor::Anonymous => None,
            Actor::Member(identity) => Some(identity),
        }
    }
}

impl FromRequest for Actor {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        // No header means anonymous; a malformed or invalid one is rejected.
        let bearer = req
            .headers()
            .contains_key(header::AUTHORIZATION)
            .then(|| BearerAuth::from_request(req, pl).into_inner().map(|b| b.token().to_owned()));

        Box::pin(async move {
            let Some(bearer) = bearer else {
                return Ok(Actor::Anonymous);
            };
            let token = bearer.map_err(|_| ApiError::Unauthorized)?;
            let state = state.ok_or(ApiError::Internal)?;
            let claims = state.tokens.verify(&token).map_err(|e| {
                tracing::debug!("rejected bearer token: {e}");
                ApiError::Unauthorized
            })?;
            let user = state.repo.get_user(claims.uid).await.map_err(|e| match e {
                RepoError::NotFound => ApiError::Unauthorized,
                other => other.into(),
            })?;
            Ok(Actor::Member(Identity::from(&user)))
        })
    }
}
