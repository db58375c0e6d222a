//! Server bootstrap: discover routes, assemble the pipeline, bind, serve.
//!
//! ```rust,no_run
//! use lithe::{App, Reply, RouteModule, RouteModules};
//!
//! fn users() -> RouteModule {
//!     RouteModule::new().get(|_req| async { Reply::ok(serde_json::json!([])) })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lithe::ServeError> {
//!     App::new()
//!         .port(8080)
//!         .cors(true)
//!         .modules(RouteModules::new().module("users", users))
//!         .serve()
//!         .await
//! }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{AppConfig, ConfigError, CorsPolicy, Environment};
use crate::http::Request;
use crate::middleware::{
    Endpoint, LoggerMiddleware, MiddlewareHandler, Next, ResponseFuture, from_middleware,
};
use crate::reload::RouteWatcher;
use crate::router::Router;
use crate::routes::{self, ModuleLoader, RouteModules};
use crate::security::CorsMiddleware;
use crate::server::{Server, ServerError};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("failed to watch routes: {0}")]
    Watch(#[from] notify::Error),
}

/// The application description: configuration, route loader and app-level
/// middleware.
pub struct App {
    config: AppConfig,
    loader: Arc<dyn ModuleLoader>,
    middleware: Vec<MiddlewareHandler>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self::from_config(AppConfig::default())
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self {
            config,
            loader: Arc::new(RouteModules::new()),
            middleware: Vec::new(),
        }
    }

    /// Starts from a `lithe.toml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        AppConfig::from_file(path).map(Self::from_config)
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// `true`, `false` or a [`CorsOptions`](crate::config::CorsOptions).
    #[must_use]
    pub fn cors(mut self, cors: impl Into<CorsPolicy>) -> Self {
        self.config.cors = cors.into();
        self
    }

    #[must_use]
    pub fn routes_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.routes_root = root.into();
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    /// Compiled route modules, bound by directory.
    #[must_use]
    pub fn modules(self, modules: RouteModules) -> Self {
        self.loader(modules)
    }

    /// Replaces the route loader entirely.
    #[must_use]
    pub fn loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    /// Adds app-level middleware, run for every request after the logger and
    /// CORS, before routing.
    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewareHandler) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Discovers and registers routes, returning the full request pipeline.
    pub fn build(&self) -> Endpoint {
        let discovered = routes::discover(&self.config.routes_root);
        let mut router = Router::new();
        let registered = routes::register(&mut router, &discovered, self.loader.as_ref());
        info!(
            root = %self.config.routes_root.display(),
            files = discovered.len(),
            registered,
            "routes loaded"
        );

        let router = Arc::new(router);
        let dispatch: Endpoint = Arc::new(move |req: Request| -> ResponseFuture {
            let router = Arc::clone(&router);
            Box::pin(async move { router.dispatch(req).await })
        });

        let mut chain = vec![from_middleware(Arc::new(LoggerMiddleware))];
        if let Some(cors) = CorsMiddleware::from_policy(&self.config.cors) {
            chain.push(from_middleware(Arc::new(cors)));
        }
        chain.extend(self.middleware.iter().cloned());
        let chain: Arc<[MiddlewareHandler]> = Arc::from(chain);

        Arc::new(move |req: Request| -> ResponseFuture {
            Box::pin(Next::new(Arc::clone(&chain), Arc::clone(&dispatch)).run(req))
        })
    }

    /// Builds the pipeline and binds `host:port`.
    pub async fn bind(self) -> Result<Bound, ServeError> {
        let pipeline = self.build();
        let server = Server::bind(self.config.address()).await?;
        Ok(Bound {
            server,
            pipeline,
            config: self.config,
        })
    }

    /// [`bind`](Self::bind) then [`Bound::run`].
    pub async fn serve(self) -> Result<(), ServeError> {
        self.bind().await?.run().await
    }
}

/// A bound, not yet serving, application.
pub struct Bound {
    server: Server,
    pipeline: Endpoint,
    config: AppConfig,
}

impl Bound {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Serves forever.
    ///
    /// In development the routes root is watched; the first change to a
    /// route source closes the listener and exits the process with status 0
    /// so a supervisor can start it again with fresh routes.
    pub async fn run(self) -> Result<(), ServeError> {
        if self.config.environment.is_production() {
            let pipeline = self.pipeline;
            self.server.run(move |req| pipeline(req)).await?;
            return Ok(());
        }

        let (watcher, mut changes) = RouteWatcher::new(&self.config.routes_root);
        let guard = watcher.start()?;
        let changed = async move {
            match changes.recv().await {
                Some(path) => info!(path = %path.display(), "route source changed, restarting"),
                None => std::future::pending().await,
            }
        };

        let pipeline = self.pipeline;
        self.server.run_until(move |req| pipeline(req), changed).await?;
        drop(guard);
        process::exit(0);
    }

    /// Serves until `shutdown` resolves. No watcher runs.
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), ServeError>
    where
        S: Future<Output = ()>,
    {
        let pipeline = self.pipeline;
        self.server.run_until(move |req| pipeline(req), shutdown).await?;
        Ok(())
    }
}
