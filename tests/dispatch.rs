use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use lithe::context::{self, ContextError};
use lithe::middleware::from_fn;
use lithe::{App, Reply, RouteModule, RouteModules, StatusCode};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct Answer {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Answer {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    _routes: tempfile::TempDir,
}

impl TestServer {
    async fn start(routes: tempfile::TempDir, modules: RouteModules) -> Self {
        let bound = App::new()
            .host("127.0.0.1")
            .port(0)
            .routes_root(routes.path())
            .modules(modules)
            .bind()
            .await
            .unwrap();
        let addr = bound.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(bound.run_until(async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            stop: Some(stop),
            _routes: routes,
        }
    }

    async fn send(&self, method: &str, path: &str, body: Option<&str>) -> Answer {
        send(self.addr, method, path, body).await
    }

    async fn get(&self, path: &str) -> Answer {
        self.send("GET", path, None).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn send(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> Answer {
    let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    if let Some(body) = body {
        raw.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n",
            body.len()
        ));
    }
    raw.push_str("\r\n");
    raw.push_str(body.unwrap_or_default());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    parse(&out)
}

fn parse(raw: &str) -> Answer {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let mut lines = head.lines();
    let status = lines.next().unwrap().split(' ').nth(1).unwrap().parse().unwrap();
    let headers = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    Answer {
        status,
        headers,
        body: body.to_owned(),
    }
}

fn route_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (relative, contents) in files {
        write(dir.path(), relative, contents);
    }
    dir
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn users_modules() -> RouteModules {
    RouteModules::new()
        .module("users", || {
            RouteModule::new().get(|_req| async { Reply::ok(json!([{ "id": "1" }])) })
        })
        .module("users/[id]", || {
            RouteModule::new()
                .get(|_req| async {
                    let id = context::param("id")?;
                    Ok::<_, ContextError>(Reply::json(json!({ "id": id })))
                })
                .delete(|_req| async { Reply::empty().status(StatusCode::NoContent) })
        })
}

#[tokio::test]
async fn users_scenario() {
    let routes = route_tree(&[("users/route.rs", ""), ("users/[id]/route.rs", "")]);
    let server = TestServer::start(routes, users_modules()).await;

    let resp = server.get("/users/42").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.json(), json!({ "id": "42" }));

    let resp = server.send("POST", "/users/42", None).await;
    assert_eq!(resp.status, 405);
    assert_eq!(resp.header("Allow"), Some("GET, DELETE"));
    assert_eq!(resp.json(), json!({ "error": "Method Not Allowed" }));

    let resp = server.send("DELETE", "/users/42", None).await;
    assert_eq!(resp.status, 204);
    assert!(resp.body.is_empty());

    let resp = server.get("/orders").await;
    assert_eq!(resp.status, 404);
    assert_eq!(resp.json(), json!({ "error": "Not Found", "path": "/orders" }));

    let resp = server.get("/users").await;
    assert_eq!(resp.json(), json!([{ "id": "1" }]));
}

#[tokio::test]
async fn failing_handler_does_not_take_the_server_down() {
    let routes = route_tree(&[("boom/route.rs", ""), ("fine/route.rs", "")]);
    let modules = RouteModules::new()
        .module("boom", || {
            RouteModule::new()
                .get(|_req| async {
                    Err::<Reply, _>(std::io::Error::other("secret: db password rejected"))
                })
                .post(|_req| async {
                    if true {
                        panic!("handler bug");
                    }
                    Reply::empty()
                })
                .put(|_req| async {})
        })
        .module("fine", || RouteModule::new().get(|_req| async { Reply::text("still here") }));
    let server = TestServer::start(routes, modules).await;

    let resp = server.get("/boom").await;
    assert_eq!(resp.status, 500);
    assert_eq!(resp.json(), json!({ "error": "Internal server error" }));
    assert!(!resp.body.contains("secret"));

    let resp = server.send("POST", "/boom", None).await;
    assert_eq!(resp.status, 500);

    let resp = server.send("PUT", "/boom", None).await;
    assert_eq!(resp.status, 500);
    assert_eq!(resp.json(), json!({ "error": "Handler must return a Response" }));

    let resp = server.get("/fine").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "still here");
}

#[tokio::test]
async fn manifest_routes_follow_reply_precedence() {
    let routes = route_tree(&[
        (
            "status/route.toml",
            "[GET]\njson = { up = true }\ntext = \"ignored\"\nstatus = 202\n",
        ),
        ("old/route.toml", "[GET]\nredirect = \"/status\"\nheaders = { X-Skip = \"1\" }\n"),
        ("hello/route.toml", "[ALL]\nmessage = \"hi\"\nheaders = { X-Trace = \"abc\" }\n"),
    ]);
    let server = TestServer::start(routes, RouteModules::new()).await;

    let resp = server.get("/status").await;
    assert_eq!(resp.status, 202);
    assert_eq!(resp.header("Content-Type"), Some("application/json; charset=utf-8"));
    assert_eq!(resp.json(), json!({ "up": true }));

    let resp = server.get("/old").await;
    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("Location"), Some("/status"));
    assert_eq!(resp.header("X-Skip"), None);

    let resp = server.send("PATCH", "/hello", None).await;
    assert_eq!(resp.json(), json!({ "message": "hi" }));
    assert_eq!(resp.header("X-Trace"), Some("abc"));
}

#[tokio::test]
async fn json_bodies_reach_the_handler() {
    let routes = route_tree(&[("echo/route.rs", "")]);
    let modules = RouteModules::new().module("echo", || {
        RouteModule::new().post(|_req| async {
            let body = context::body()?;
            let query = context::query()?.to_json();
            Ok::<_, ContextError>(Reply::json(json!({ "body": body, "query": query })))
        })
    });
    let server = TestServer::start(routes, modules).await;

    let resp = server.send("POST", "/echo?tag=a&tag=b", Some(r#"{"n":1}"#)).await;
    assert_eq!(resp.json(), json!({ "body": { "n": 1 }, "query": { "tag": ["a", "b"] } }));

    let resp = server.send("POST", "/echo", Some("{nope")).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.json(), json!({ "error": "Invalid JSON body" }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_their_own_context() {
    let routes = route_tree(&[("who/[name]/route.rs", "")]);
    let modules = RouteModules::new().module("who/[name]", || {
        RouteModule::new()
            .middleware(from_fn(|req, next| async move {
                let name = context::param("name").ok().flatten().unwrap_or_default();
                context::set("caller", name);
                next.run(req).await
            }))
            .get(|_req| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Reply::json(json!({
                    "caller": context::get("caller"),
                    "param": context::param("name").ok().flatten(),
                }))
            })
    });
    let server = TestServer::start(routes, modules).await;

    let names: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
    let tasks: Vec<_> = names
        .iter()
        .map(|name| {
            let (addr, path) = (server.addr, format!("/who/{name}"));
            tokio::spawn(async move { send(addr, "GET", &path, None).await })
        })
        .collect();

    for (name, task) in names.iter().zip(tasks) {
        let resp = task.await.unwrap();
        assert_eq!(resp.json(), json!({ "caller": name, "param": name }));
    }
    assert_eq!(context::get("caller"), None);
}

#[tokio::test]
async fn head_is_served_by_get_without_a_body() {
    let routes = route_tree(&[("users/route.rs", ""), ("users/[id]/route.rs", "")]);
    let server = TestServer::start(routes, users_modules()).await;

    let full = server.get("/users/42").await;
    let resp = server.send("HEAD", "/users/42", None).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("Content-Length"), full.header("Content-Length"));
    assert_eq!(resp.header("Content-Type"), Some("application/json; charset=utf-8"));
    assert!(resp.body.is_empty());
}

#[tokio::test]
async fn any_three_digit_status_reaches_the_wire() {
    let routes = route_tree(&[
        ("tea/route.toml", "[GET]\nstatus = 418\nmessage = \"teapot\"\n"),
        ("odd/route.toml", "[GET]\nstatus = 299\ntext = \"odd\"\ncolour = \"blue\"\n"),
    ]);
    let server = TestServer::start(routes, RouteModules::new()).await;

    let resp = server.get("/tea").await;
    assert_eq!(resp.status, 418);
    assert_eq!(resp.json(), json!({ "message": "teapot" }));

    let resp = server.get("/odd").await;
    assert_eq!(resp.status, 299);
    assert_eq!(resp.body, "odd");
}

#[tokio::test]
async fn params_are_decoded_and_partial_brackets_are_literal() {
    let routes = route_tree(&[
        ("users/route.rs", ""),
        ("users/[id]/route.rs", ""),
        ("v[version]/route.toml", "[GET]\ntext = \"literal\"\n"),
    ]);
    let server = TestServer::start(routes, users_modules()).await;

    let resp = server.get("/users/john%20doe").await;
    assert_eq!(resp.json(), json!({ "id": "john doe" }));

    let resp = server.get("/v[version]").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "literal");

    let resp = server.get("/v2").await;
    assert_eq!(resp.status, 404);
}

#[tokio::test]
async fn handler_headers_cannot_split_the_response() {
    let routes = route_tree(&[("split/route.rs", "")]);
    let modules = RouteModules::new().module("split", || {
        RouteModule::new()
            .get(|_req| async {
                Reply::json(json!({ "ok": true }))
                    .header("Content-Type", "application/hal+json")
                    .header("X-Note", "a\r\nSet-Cookie: session=stolen")
            })
            .post(|_req| async { Reply::redirect("/home\r\n\r\ninjected") })
    });
    let server = TestServer::start(routes, modules).await;

    let resp = server.get("/split").await;
    assert_eq!(resp.header("Content-Type"), Some("application/hal+json"));
    assert_eq!(resp.header("Set-Cookie"), None);
    assert_eq!(resp.json(), json!({ "ok": true }));

    let resp = server.send("POST", "/split", None).await;
    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("Location"), Some("/homeinjected"));
    assert!(resp.body.is_empty());
}
