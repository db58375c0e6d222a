use lithe::context::{self, ContextError};
use lithe::http::StatusCode;
use lithe::{Reply, RouteModule};
use serde_json::{Value, json};

use crate::store;

pub fn module() -> RouteModule {
    RouteModule::new()
        .get(|_req| async { Reply::ok(store::all()) })
        .post(|_req| async {
            let body = context::body()?;
            let reply = match body.get("name").and_then(Value::as_str) {
                Some(name) => Reply::json(store::insert(name)).status(StatusCode::Created),
                None => Reply::json(json!({ "error": "name is required" }))
                    .status(StatusCode::BadRequest),
            };
            Ok::<_, ContextError>(reply)
        })
}
