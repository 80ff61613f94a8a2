use crate::errors::WalletError;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use chrono::Utc;
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Support,
    Partner,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Support => "support",
            Role::Partner => "partner",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// Sign a bearer token for `user_id`, valid for `ttl_secs`.
pub fn issue_token(secret: &str, user_id: i64, role: Role, ttl_secs: i64) -> Result<String, WalletError> {
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: (Utc::now().timestamp() + ttl_secs).max(0) as usize,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| WalletError::Internal(format!("token signing failed: {}", e)))
}

/// Caller identity established by [`JwtAuth`]. Never read from the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), WalletError> {
        if allowed.contains(&self.role) {
            return Ok(());
        }

        let required: Vec<&str> = allowed.iter().map(Role::as_str).collect();
        Err(WalletError::Forbidden(required.join(" or ")))
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = WalletError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let identity = req
            .extensions()
            .get::<Claims>()
            .ok_or_else(|| {
                WalletError::Unauthorized("Authentication required. Please login first.".to_string())
            })
            .and_then(|claims| {
                let user_id = claims
                    .sub
                    .parse::<i64>()
                    .map_err(|_| WalletError::Unauthorized("Invalid token subject".to_string()))?;
                Ok(AuthenticatedUser {
                    user_id,
                    role: claims.role,
                })
            });

        ready(identity)
    }
}

pub struct JwtAuth {
    secret: Arc<str>,
}

impl JwtAuth {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddleware {
            service: Rc::new(service),
            secret: self.secret.clone(),
        }))
    }
}

pub struct JwtAuthMiddleware<S> {
    service: Rc<S>,
    secret: Arc<str>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_owned);

        let token = match token {
            Some(token) => token,
            None => {
                return Box::pin(async {
                    Err(Error::from(WalletError::Unauthorized(
                        "Access denied. No token provided.".to_string(),
                    )))
                });
            }
        };

        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(
            &token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(token_data) => {
                req.extensions_mut().insert(token_data.claims);

                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(err) => {
                tracing::warn!("JWT validation failed: {:?}", err);
                Box::pin(async {
                    Err(Error::from(WalletError::Unauthorized(
                        "Invalid or expired token".to_string(),
                    )))
                })
            }
        }
    }
}
