//! A small users API served from `demos/api`.
//!
//! ```sh
//! cargo run --example users_api
//! curl localhost:6969/users
//! curl -X POST localhost:6969/users -H 'content-type: application/json' -d '{"name":"Grace"}'
//! curl localhost:6969/users/1
//! curl -X PUT localhost:6969/users/1   # 405, Allow: GET, DELETE
//! curl localhost:6969/health
//! ```
//!
//! Run under a supervisor (e.g. `cargo watch`) to restart on route changes;
//! set `LITHE_ENV=production` to turn the watcher off.

use lithe::{App, RouteModules, ServeError};
use tracing_subscriber::EnvFilter;

#[path = "api/users/route.rs"]
mod users;

#[path = "api/users/[id]/route.rs"]
mod user;

mod store {
    use std::sync::{LazyLock, Mutex};

    use serde_json::{Value, json};

    static USERS: LazyLock<Mutex<Vec<(u64, String)>>> =
        LazyLock::new(|| Mutex::new(vec![(1, "Ada".to_owned()), (2, "Linus".to_owned())]));

    fn to_json(id: u64, name: &str) -> Value {
        json!({ "id": id, "name": name })
    }

    pub fn all() -> Value {
        let users = USERS.lock().unwrap_or_else(|e| e.into_inner());
        Value::Array(users.iter().map(|(id, name)| to_json(*id, name)).collect())
    }

    pub fn find(id: &str) -> Option<Value> {
        let id: u64 = id.parse().ok()?;
        let users = USERS.lock().unwrap_or_else(|e| e.into_inner());
        users.iter().find(|(i, _)| *i == id).map(|(i, n)| to_json(*i, n))
    }

    pub fn insert(name: &str) -> Value {
        let mut users = USERS.lock().unwrap_or_else(|e| e.into_inner());
        let id = users.iter().map(|(i, _)| *i).max().unwrap_or(0) + 1;
        users.push((id, name.to_owned()));
        to_json(id, name)
    }

    pub fn remove(id: &str) -> bool {
        let Ok(id) = id.parse::<u64>() else {
            return false;
        };
        let mut users = USERS.lock().unwrap_or_else(|e| e.into_inner());
        let before = users.len();
        users.retain(|(i, _)| *i != id);
        users.len() != before
    }
}

#[tokio::main]
async fn main() -> Result<(), ServeError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let modules = RouteModules::new()
        .module("users", users::module)
        .module("users/[id]", user::module);

    App::new()
        .routes_root("demos/api")
        .cors(true)
        .modules(modules)
        .serve()
        .await
}
