use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::Request,
    response::Response,
};
use futures::future::BoxFuture;
use http_body::Body as HttpBody;

use super::body::{GuardedResponseBody, RejectionSlot, SizeGuardBody};
use super::config::{GlobalSizeConfig, RouteSizeOverride};
use super::filter::{FilterStatus, SizeGuardFilter};
use super::route::{RequestRoute, RouteTable};

/// Service enforcing the cumulative request size limit around `inner`.
///
/// Header blocks over the limit are answered locally and never reach `inner`.
/// Body and trailer frames are checked as `inner` reads them; if one crosses
/// the limit, the response `inner` produced is replaced with the rejection.
/// A crossing after `inner` has responded fails the response body instead.
#[derive(Clone)]
pub struct SizeGuardService<S> {
    inner: S,
    config: Arc<GlobalSizeConfig>,
    routes: Arc<RouteTable>,
}

impl<S> SizeGuardService<S> {
    pub fn new(inner: S, config: Arc<GlobalSizeConfig>, routes: Arc<RouteTable>) -> Self {
        Self { inner, config, routes }
    }
}

impl<S> tower::Service<Request<Body>> for SizeGuardService<S>
where
    S: tower::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let config = self.config.clone();

        let route = RequestRoute::new(
            self.routes.clone(),
            request.uri().path(),
            request.extensions().get::<RouteSizeOverride>().copied(),
        );
        let mut filter = SizeGuardFilter::new(config.clone(), route);

        let (parts, body) = request.into_parts();
        if let FilterStatus::StopAndRespond(error) = filter.on_headers(&parts.headers, body.is_end_stream()) {
            return Box::pin(async move { Ok(config.error_format().handle_error(error)) });
        }

        let rejection = RejectionSlot::default();
        let body = Body::new(SizeGuardBody::new(body, filter, rejection.clone()));
        let request = Request::from_parts(parts, body);

        // The readied service goes to this call; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let response = inner.call(request).await?;
            match rejection.get() {
                Some(error) => Ok(config.error_format().handle_error(error)),
                // The request body may still be streaming through the response.
                None => Ok(response.map(|body| Body::new(GuardedResponseBody::new(body, rejection)))),
            }
        })
    }
}
