//! Feature-gate middleware
//!
//! Guards a route behind a flag: the wrapped handler only runs when the flag
//! evaluates enabled for the caller. This is ordinary control flow around
//! `FlagService::evaluate`, configured with a flag key and an error-fallback
//! bit; there is no annotation magic.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorInternalServerError, ErrorNotFound},
    web, Error, HttpRequest,
};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use tracing::warn;

use crate::error::AppError;
use crate::models::EvaluationContext;
use crate::services::FlagService;

/// Gate configuration
#[derive(Debug, Clone)]
pub struct FeatureGateConfig {
    /// Flag that must evaluate enabled for requests to pass
    pub flag_key: String,
    /// When evaluation itself fails (store unreachable), let the request
    /// through instead of failing it
    pub fallback_on_error: bool,
}

/// Feature gate middleware factory
pub struct FeatureGate {
    config: Rc<FeatureGateConfig>,
}

impl FeatureGate {
    pub fn new(flag_key: impl Into<String>, fallback_on_error: bool) -> Self {
        Self {
            config: Rc::new(FeatureGateConfig {
                flag_key: flag_key.into(),
                fallback_on_error,
            }),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for FeatureGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = FeatureGateService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(FeatureGateService {
            service: Rc::new(service),
            config: Rc::clone(&self.config),
        }))
    }
}

pub struct FeatureGateService<S> {
    service: Rc<S>,
    config: Rc<FeatureGateConfig>,
}

impl<S, B> Service<ServiceRequest> for FeatureGateService<S>
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
        let service = Rc::clone(&self.service);
        let config = Rc::clone(&self.config);

        Box::pin(async move {
            let flags = match req.app_data::<web::Data<FlagService>>() {
                Some(flags) => flags.clone(),
                None => return Err(ErrorInternalServerError("FlagService not configured")),
            };

            let ctx = context_from_request(req.request());

            match flags.evaluate(&config.flag_key, &ctx).await {
                Ok(result) if result.enabled => service.call(req).await,
                Ok(_) => Err(ErrorNotFound("feature not available")),
                Err(AppError::NotFound(_)) => Err(ErrorNotFound("feature not available")),
                Err(e) if config.fallback_on_error => {
                    warn!(
                        flag_key = %config.flag_key,
                        error = %e,
                        "Feature gate evaluation failed; falling back to allow"
                    );
                    service.call(req).await
                }
                Err(e) => {
                    warn!(
                        flag_key = %config.flag_key,
                        error = %e,
                        "Feature gate evaluation failed; rejecting request"
                    );
                    Err(ErrorInternalServerError("feature gate unavailable"))
                }
            }
        })
    }
}

/// Build an evaluation context from request identity headers.
fn context_from_request(req: &HttpRequest) -> EvaluationContext {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    let list_header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| {
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    };

    EvaluationContext {
        user_id: header("X-User-Id"),
        roles: list_header("X-User-Roles"),
        email: header("X-User-Email"),
        organization_id: header("X-Organization-Id"),
        groups: list_header("X-User-Groups"),
        attributes: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_context_from_request_headers() {
        let req = TestRequest::default()
            .insert_header(("X-User-Id", "user-1"))
            .insert_header(("X-User-Roles", "admin, beta-tester"))
            .insert_header(("X-Organization-Id", "org-9"))
            .to_http_request();

        let ctx = context_from_request(&req);
        assert_eq!(ctx.user_id.as_deref(), Some("user-1"));
        assert_eq!(ctx.roles, vec!["admin", "beta-tester"]);
        assert_eq!(ctx.organization_id.as_deref(), Some("org-9"));
        assert!(ctx.groups.is_empty());
    }

    #[test]
    fn test_context_from_bare_request_is_anonymous() {
        let req = TestRequest::default().to_http_request();
        let ctx = context_from_request(&req);
        assert_eq!(ctx.subject_id(), EvaluationContext::ANONYMOUS);
    }
}
