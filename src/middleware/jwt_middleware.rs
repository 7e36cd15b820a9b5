/// Bearer credential middleware
///
/// Resolves the Authorization header ahead of the route handlers. A valid
/// access token injects `Claims` into request extensions; no credential at
/// all passes through anonymously so optional-auth endpoints keep working,
/// and each handler decides whether anonymous is acceptable. A credential
/// that is present but invalid, expired, or of the wrong type is rejected
/// here with a 401.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::validate_access_token;
use crate::configuration::{Environment, JwtSettings};
use crate::error::AppError;

pub struct JwtMiddleware {
    jwt_config: JwtSettings,
    environment: Environment,
}

impl JwtMiddleware {
    pub fn new(jwt_config: JwtSettings, environment: Environment) -> Self {
        Self {
            jwt_config,
            environment,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            jwt_config: self.jwt_config.clone(),
            environment: self.environment,
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    jwt_config: JwtSettings,
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    environment: Environment,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
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
        let bearer = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::to_string);

        match bearer {
            Some(token) => match validate_access_token(&token, &self.jwt_config) {
                Ok(claims) => {
                    tracing::debug!(user_id = %claims.sub, "Access token validated");
                    req.extensions_mut().insert(claims);
                    let service = self.service.clone();
                    Box::pin(async move { service.call(req).await })
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Access token rejected");
                    Box::pin(async move { Err(AppError::Auth(e).into()) })
                }
            },
            None => {
                self.maybe_impersonate(&req);
                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
        }
    }
}

impl<S> JwtMiddlewareService<S> {
    /// Development-only impersonation via the X-Debug-User-Id header.
    ///
    /// Unreachable in release binaries (compiled out), and additionally
    /// ignored unless the process is configured as a development
    /// environment. A convenience for local frontend work, not a security
    /// boundary.
    #[cfg(debug_assertions)]
    fn maybe_impersonate(&self, req: &ServiceRequest) {
        if !self.environment.is_development() {
            return;
        }
        let debug_user = req
            .headers()
            .get("X-Debug-User-Id")
            .and_then(|h| h.to_str().ok())
            .and_then(|raw| uuid::Uuid::parse_str(raw).ok());

        if let Some(user_id) = debug_user {
            tracing::warn!(user_id = %user_id, "Impersonating user via X-Debug-User-Id");
            let claims = crate::auth::Claims::access(
                user_id,
                self.jwt_config.access_token_ttl_minutes,
            );
            req.extensions_mut().insert(claims);
        }
    }

    #[cfg(not(debug_assertions))]
    fn maybe_impersonate(&self, _req: &ServiceRequest) {}
}
