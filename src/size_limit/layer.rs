use std::sync::Arc;

use axum::Router;

use super::config::{GlobalSizeConfig, SizeGuardConfig};
use super::route::RouteTable;
use super::service::SizeGuardService;
use super::stats::SizeGuardStats;

/// Tower layer installing the request size guard.
///
/// ```
/// use axum::{Router, routing::post};
/// use axum_size_guard::size_limit::{
///     GlobalSizeConfig, RouteSizeOverride, RouteTable, SizeGuardLayer, SizeLimitSettings,
/// };
///
/// let global = GlobalSizeConfig::new(SizeLimitSettings::new(8 * 1024), "ingress.").unwrap();
/// let routes = RouteTable::new()
///     .with_route("/upload", RouteSizeOverride::new(10_000_000))
///     .unwrap();
///
/// let app: Router = Router::new()
///     .route("/upload", post(|| async { "ok" }))
///     .layer(SizeGuardLayer::new(global).with_routes(routes));
/// ```
#[derive(Clone)]
pub struct SizeGuardLayer {
    config: Arc<GlobalSizeConfig>,
    routes: Arc<RouteTable>,
}

impl SizeGuardLayer {
    pub fn new(config: GlobalSizeConfig) -> Self {
        Self::from_shared(Arc::new(config))
    }

    pub fn from_shared(config: Arc<GlobalSizeConfig>) -> Self {
        Self {
            config,
            routes: Arc::new(RouteTable::new()),
        }
    }

    /// Builder-style method to attach per-route overrides.
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = Arc::new(routes);
        self
    }

    pub fn stats(&self) -> &SizeGuardStats {
        self.config.stats()
    }
}

impl From<SizeGuardConfig> for SizeGuardLayer {
    fn from(config: SizeGuardConfig) -> Self {
        Self {
            config: config.global,
            routes: config.routes,
        }
    }
}

impl<S> tower::Layer<S> for SizeGuardLayer {
    type Service = SizeGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SizeGuardService::new(inner, self.config.clone(), self.routes.clone())
    }
}

/// Wraps every route of `router` with the size guard.
pub fn with_size_guard(router: Router, layer: impl Into<SizeGuardLayer>) -> Router {
    router.layer(layer.into())
}
