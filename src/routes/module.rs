//! Route modules: what a discovered route file exports, and how it is loaded.
//!
//! Two kinds of route file are understood:
//!
//! - `route.rs`: compiled Rust. The file is part of the application binary
//!   and is bound to its directory with [`RouteModules::module`]; loading it
//!   calls the bound constructor, which builds a fresh [`RouteModule`].
//! - `route.toml`: a manifest with one table per verb, each describing a
//!   static reply. It is re-read from disk every time it is loaded.
//!
//! ```toml
//! [GET]
//! json = { status = "ok" }
//!
//! [DELETE]
//! status = 405
//! message = "read-only"
//! headers = { "Cache-Control" = "no-store" }
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::http::Request;
use crate::middleware::MiddlewareHandler;
use crate::reply::{Reply, ReplyError, ReplyFields};
use crate::router::{Handler, IntoHandler, Verb};

use super::discover::DiscoveredRoute;

/// Errors raised while loading a route file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid route manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {verb} reply in {path}: {source}")]
    Reply {
        path: PathBuf,
        verb: Verb,
        #[source]
        source: ReplyError,
    },

    #[error("no compiled module is bound to `{dir}` (found {path})")]
    Unbound { dir: String, path: PathBuf },

    #[error("unsupported route file {path}")]
    Unsupported { path: PathBuf },
}

/// The verb handlers (and shared middleware) one route file exports.
///
/// # Examples
///
/// ```rust,no_run
/// use lithe::{Reply, RouteModule, context};
///
/// pub fn module() -> RouteModule {
///     RouteModule::new()
///         .get(|_req| async { Reply::json(serde_json::json!({ "users": [] })) })
///         .post(|_req| async {
///             let body = context::body()?;
///             Ok::<_, context::ContextError>(Reply::json(body))
///         })
/// }
/// ```
#[derive(Clone, Default)]
pub struct RouteModule {
    exports: Vec<(Verb, Handler)>,
    middleware: Vec<MiddlewareHandler>,
}

impl RouteModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `handler` under `verb`, replacing an earlier export of the same verb.
    #[must_use]
    pub fn export(mut self, verb: Verb, handler: impl IntoHandler) -> Self {
        let handler = handler.into_handler();
        match self.exports.iter_mut().find(|(v, _)| *v == verb) {
            Some(slot) => slot.1 = handler,
            None => self.exports.push((verb, handler)),
        }
        self
    }

    #[must_use]
    pub fn get(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::Get, handler)
    }

    #[must_use]
    pub fn post(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::Post, handler)
    }

    #[must_use]
    pub fn put(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::Put, handler)
    }

    #[must_use]
    pub fn patch(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::Patch, handler)
    }

    #[must_use]
    pub fn delete(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::Delete, handler)
    }

    #[must_use]
    pub fn options(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::Options, handler)
    }

    #[must_use]
    pub fn head(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::Head, handler)
    }

    #[must_use]
    pub fn all(self, handler: impl IntoHandler) -> Self {
        self.export(Verb::All, handler)
    }

    /// Runs `middleware` before every handler of this module, inside the
    /// request context.
    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewareHandler) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// The handler exported under `verb`, if any.
    pub fn handler(&self, verb: Verb) -> Option<Handler> {
        self.exports
            .iter()
            .find(|(v, _)| *v == verb)
            .map(|(_, h)| Arc::clone(h))
    }

    pub fn exported_verbs(&self) -> impl Iterator<Item = Verb> + '_ {
        self.exports.iter().map(|(v, _)| *v)
    }

    pub fn middleware_chain(&self) -> Arc<[MiddlewareHandler]> {
        Arc::from(self.middleware.clone())
    }
}

/// Turns a discovered route file into a [`RouteModule`].
///
/// Called once per route file on every start, never cached across starts.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, route: &DiscoveredRoute) -> Result<RouteModule, LoadError>;
}

type ModuleFactory = Arc<dyn Fn() -> RouteModule + Send + Sync>;

/// The default loader: compiled modules bound by directory, plus manifests.
///
/// # Examples
///
/// ```rust,no_run
/// use lithe::{Reply, RouteModule, RouteModules};
///
/// fn users() -> RouteModule {
///     RouteModule::new().get(|_req| async { Reply::text("all users") })
/// }
///
/// let modules = RouteModules::new().module("users", users);
/// ```
#[derive(Clone, Default)]
pub struct RouteModules {
    compiled: HashMap<String, ModuleFactory>,
}

impl RouteModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the `route.rs` in `dir` (relative to the routes root, e.g.
    /// `users/[id]`) to `factory`.
    #[must_use]
    pub fn module<F>(mut self, dir: &str, factory: F) -> Self
    where
        F: Fn() -> RouteModule + Send + Sync + 'static,
    {
        self.compiled.insert(normalize_dir(dir), Arc::new(factory));
        self
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

impl ModuleLoader for RouteModules {
    fn load(&self, route: &DiscoveredRoute) -> Result<RouteModule, LoadError> {
        match route.source_file.extension().and_then(|e| e.to_str()) {
            Some("toml") => load_manifest(route),
            Some("rs") => self
                .compiled
                .get(&normalize_dir(&route.relative_dir))
                .map(|factory| factory())
                .ok_or_else(|| LoadError::Unbound {
                    dir: route.relative_dir.clone(),
                    path: route.source_file.clone(),
                }),
            _ => Err(LoadError::Unsupported {
                path: route.source_file.clone(),
            }),
        }
    }
}

fn normalize_dir(dir: &str) -> String {
    dir.split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reads a `route.toml` manifest from disk into a module of static replies.
/// Tables whose key is not a verb name are ignored, as are unknown keys
/// inside a verb table.
pub fn load_manifest(route: &DiscoveredRoute) -> Result<RouteModule, LoadError> {
    let path = &route.source_file;
    let source = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&source).map_err(|source| LoadError::Manifest {
        path: path.clone(),
        source,
    })?;

    let mut module = RouteModule::new();
    for (key, value) in table {
        let Some(verb) = Verb::from_name(&key) else {
            debug!(file = %path.display(), key = %key, "ignoring non-verb manifest entry");
            continue;
        };
        if let Some(table) = value.as_table() {
            let unknown = table.keys().filter(|k| !ReplyFields::FIELDS.contains(&k.as_str()));
            for key in unknown {
                debug!(file = %path.display(), %verb, %key, "ignoring unknown reply field");
            }
        }
        let fields: ReplyFields = value.try_into().map_err(|source| LoadError::Manifest {
            path: path.clone(),
            source,
        })?;
        let reply = Reply::try_from(fields).map_err(|source| LoadError::Reply {
            path: path.clone(),
            verb,
            source,
        })?;
        module = module.export(verb, move |_req: Request| {
            let reply = reply.clone();
            async move { reply }
        });
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::reply::ReplyBody;
    use crate::routes::discover;

    fn manifest_route(contents: &str) -> (tempfile::TempDir, DiscoveredRoute) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("health")).unwrap();
        fs::write(dir.path().join("health/route.toml"), contents).unwrap();
        let route = discover(dir.path()).remove(0);
        (dir, route)
    }

    async fn reply_for(module: &RouteModule, verb: Verb) -> Reply {
        let handler = module.handler(verb).expect("verb exported");
        let raw = "GET / HTTP/1.1\r\n\r\n";
        handler(Request::parse(raw.as_bytes()).unwrap().0)
            .await
            .unwrap()
    }

    #[test]
    fn export_replaces_same_verb() {
        let module = RouteModule::new()
            .get(|_req| async { Reply::text("a") })
            .delete(|_req| async { Reply::text("b") })
            .get(|_req| async { Reply::text("c") });
        let verbs: Vec<_> = module.exported_verbs().collect();
        assert_eq!(verbs, vec![Verb::Get, Verb::Delete]);
        assert!(module.handler(Verb::Post).is_none());
    }

    #[tokio::test]
    async fn manifest_exports_only_verb_tables() {
        let (_dir, route) = manifest_route(
            r#"
            title = "health"

            [GET]
            json = { ok = true }
            text = "shadowed"

            [meta]
            owner = "ops"
            "#,
        );
        let module = RouteModules::new().load(&route).unwrap();
        assert_eq!(module.exported_verbs().collect::<Vec<_>>(), vec![Verb::Get]);

        let reply = reply_for(&module, Verb::Get).await;
        assert_eq!(reply.body(), &ReplyBody::Json(serde_json::json!({ "ok": true })));
    }

    #[tokio::test]
    async fn manifest_is_reread_on_every_load() {
        let (_dir, route) = manifest_route("[GET]\ntext = \"v1\"\n");
        let loader = RouteModules::new();
        let first = loader.load(&route).unwrap();

        fs::write(&route.source_file, "[GET]\ntext = \"v2\"\n[POST]\nmessage = \"hi\"\n").unwrap();
        let second = loader.load(&route).unwrap();

        assert_eq!(reply_for(&first, Verb::Get).await.body(), &ReplyBody::Text("v1".into()));
        assert_eq!(reply_for(&second, Verb::Get).await.body(), &ReplyBody::Text("v2".into()));
        assert_eq!(second.exported_verbs().count(), 2);
    }

    #[test]
    fn manifest_errors_name_the_file() {
        let (_dir, route) = manifest_route("[GET]\nstatus = 1000\n");
        let err = RouteModules::new().load(&route).err().unwrap();
        assert!(matches!(err, LoadError::Reply { verb: Verb::Get, .. }));

        let (_dir, route) = manifest_route("[GET]\nstatus = \"ok\"\n");
        let err = RouteModules::new().load(&route).err().unwrap();
        assert!(err.to_string().contains("route.toml"));
    }

    #[tokio::test]
    async fn unknown_reply_fields_keep_the_verb() {
        let (_dir, route) = manifest_route(
            "[GET]\nstatus = 418\nmesage = \"typo\"\ntext = \"short and stout\"\n[DELETE]\nstatus = 204\n",
        );
        let module = RouteModules::new().load(&route).unwrap();
        assert_eq!(module.exported_verbs().count(), 2);

        let reply = reply_for(&module, Verb::Get).await;
        assert_eq!(reply.status_code().map(|s| s.as_u16()), Some(418));
        assert_eq!(reply.body(), &ReplyBody::Text("short and stout".into()));
    }

    #[test]
    fn compiled_modules_are_bound_by_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("users/[id]")).unwrap();
        fs::write(dir.path().join("users/[id]/route.rs"), "").unwrap();
        let route = discover(dir.path()).remove(0);

        let unbound = RouteModules::new().load(&route).err().unwrap();
        assert!(matches!(unbound, LoadError::Unbound { .. }));

        let loader = RouteModules::new().module("/users/[id]/", || {
            RouteModule::new().get(|_req| async { Reply::empty() })
        });
        let module = loader.load(&route).unwrap();
        assert!(module.handler(Verb::Get).is_some());
    }
}
