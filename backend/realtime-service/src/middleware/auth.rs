//! Identity token verification.
//!
//! Tokens are issued by the identity service; this crate only verifies them
//! and turns the `sub` claim into a user id. A token that fails verification
//! rejects the request or connection outright, there is no anonymous mode.

use crate::config::JwtKey;
use crate::error::{AppError, AppResult};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage, HttpRequest,
};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// Verified user id, stored in request extensions by [`JwtAuth`].
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

/// Claims this service relies on. Extra claims are ignored.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn new(key: &JwtKey) -> AppResult<Self> {
        let (key, algorithm) = match key {
            JwtKey::Rs256PublicPem(pem) => (
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AppError::Config(format!("invalid JWT public key: {e}")))?,
                Algorithm::RS256,
            ),
            JwtKey::Hs256Secret(secret) => {
                (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
            }
        };
        Ok(Self {
            key,
            validation: Validation::new(algorithm),
        })
    }

    pub fn verify(&self, token: &str) -> AppResult<Uuid> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::warn!(error = %e, "identity token rejected");
            AppError::Unauthorized
        })?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| {
            tracing::warn!("identity token subject is not a uuid");
            AppError::Unauthorized
        })
    }
}

/// Bearer token from the `Authorization` header.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

/// Rejects requests without a valid bearer token and records the caller's id.
pub struct JwtAuth {
    verifier: Arc<IdentityVerifier>,
}

impl JwtAuth {
    pub fn new(verifier: Arc<IdentityVerifier>) -> Self {
        Self { verifier }
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
    type Transform = JwtAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthService {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
        }))
    }
}

pub struct JwtAuthService<S> {
    service: Rc<S>,
    verifier: Arc<IdentityVerifier>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let verifier = self.verifier.clone();

        Box::pin(async move {
            let token = bearer_token(req.request()).ok_or(AppError::Unauthorized)?;
            let user_id = verifier.verify(&token)?;

            req.extensions_mut().insert(UserId(user_id));

            service.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str, exp: i64) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_valid_token_yields_subject() {
        let verifier = IdentityVerifier::new(&JwtKey::Hs256Secret("s3cret".into())).unwrap();
        let user = Uuid::new_v4();
        let id = verifier
            .verify(&token("s3cret", &user.to_string(), in_an_hour()))
            .unwrap();
        assert_eq!(id, user);
    }

    #[test]
    fn test_wrong_secret_is_unauthorized() {
        let verifier = IdentityVerifier::new(&JwtKey::Hs256Secret("s3cret".into())).unwrap();
        let err = verifier
            .verify(&token("other", &Uuid::new_v4().to_string(), in_an_hour()))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn test_expired_token_is_unauthorized() {
        let verifier = IdentityVerifier::new(&JwtKey::Hs256Secret("s3cret".into())).unwrap();
        let stale = chrono::Utc::now().timestamp() - 3600;
        assert!(verifier
            .verify(&token("s3cret", &Uuid::new_v4().to_string(), stale))
            .is_err());
    }

    #[test]
    fn test_non_uuid_subject_is_unauthorized() {
        let verifier = IdentityVerifier::new(&JwtKey::Hs256Secret("s3cret".into())).unwrap();
        assert!(verifier
            .verify(&token("s3cret", "alice", in_an_hour()))
            .is_err());
    }

    #[test]
    fn test_bad_public_key_is_config_error() {
        let err = IdentityVerifier::new(&JwtKey::Rs256PublicPem("not a pem".into()))
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
