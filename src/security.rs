/// Abuse protection for the auth endpoints.
///
/// Per-IP token-bucket rate limiting plus a request body size cap, applied
/// as middleware on the `/api/auth` scope. Limits come from configuration.
/// The limiter is in-process state; it protects a single instance against
/// credential stuffing, it is not a distributed quota.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::CONTENT_LENGTH,
    Error, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::configuration::RateLimitSettings;
use crate::error::ErrorResponse;

/// Simple token bucket rate limiter implementation
struct TokenBucket {
    tokens: f64,
    last_refill: SystemTime,
    capacity: u32,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    fn new(capacity: u32, requests_per_minute: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: SystemTime::now(),
            capacity,
            refill_rate: requests_per_minute as f64 / 60.0,
        }
    }

    fn try_take_token(&mut self) -> bool {
        if let Ok(elapsed) = self.last_refill.elapsed() {
            let elapsed_secs = elapsed.as_secs_f64();
            self.tokens = (self.tokens + elapsed_secs * self.refill_rate).min(self.capacity as f64);
            self.last_refill = SystemTime::now();
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Tracks one bucket per client IP.
pub struct RateLimiterManager {
    settings: RateLimitSettings,
    limiters: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiterManager {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request from this IP is allowed right now.
    pub fn check_rate_limit(&self, ip: &str) -> Result<(), String> {
        let mut limiters = self.limiters.lock().unwrap();

        let limiter = limiters.entry(ip.to_string()).or_insert_with(|| {
            TokenBucket::new(
                self.settings.auth_requests_per_minute,
                self.settings.auth_requests_per_minute,
            )
        });

        if limiter.try_take_token() {
            Ok(())
        } else {
            Err(format!(
                "Rate limit exceeded: max {} requests per minute",
                self.settings.auth_requests_per_minute
            ))
        }
    }

    pub fn check_content_length(&self, length: u64) -> Result<(), String> {
        if length > self.settings.max_content_length {
            return Err(format!(
                "Content length {} exceeds maximum {}",
                length, self.settings.max_content_length
            ));
        }
        Ok(())
    }
}

/// Middleware enforcing the limits above.
pub struct RateLimit {
    manager: Arc<RateLimiterManager>,
}

impl RateLimit {
    pub fn new(manager: Arc<RateLimiterManager>) -> Self {
        Self { manager }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RateLimitService {
            service: Rc::new(service),
            manager: self.manager.clone(),
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    manager: Arc<RateLimiterManager>,
}

fn reject(status: u16, code: &str, message: String) -> Error {
    let response = HttpResponse::build(
        actix_web::http::StatusCode::from_u16(status).expect("static status code"),
    )
    .json(ErrorResponse {
        code: code.to_string(),
        message,
        status,
    });
    actix_web::error::InternalError::from_response(code.to_string(), response).into()
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
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
        let declared_length = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if let Err(message) = self.manager.check_content_length(declared_length) {
            tracing::warn!(length = declared_length, "Oversized auth request rejected");
            let err = reject(413, "payload_too_large", message);
            return Box::pin(async move { Err(err) });
        }

        let ip = req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if let Err(message) = self.manager.check_rate_limit(&ip) {
            tracing::warn!(ip = %ip, "Rate limit exceeded on auth endpoint");
            let err = reject(429, "rate_limit_exceeded", message);
            return Box::pin(async move { Err(err) });
        }

        let service = self.service.clone();
        Box::pin(async move { service.call(req).await })
    }
}
