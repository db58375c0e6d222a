//! File-system routes: discovery, loading and registration.
//!
//! Startup happens in two phases. [`discover`] walks the routes root and
//! derives one URL pattern per route file; [`register`] then loads each file
//! through a [`ModuleLoader`] and checks it for every [`Verb`] in
//! [`Verb::REGISTRATION_ORDER`], registering what it exports.
//!
//! | File                          | Pattern         |
//! |-------------------------------|-----------------|
//! | `api/route.toml`              | `/`             |
//! | `api/users/route.rs`          | `/users`        |
//! | `api/users/[id]/route.rs`     | `/users/:id`    |
//! | `api/docs/[...slug]/route.rs` | `/docs/*slug`   |

use tracing::{info, warn};

use crate::router::{Router, Verb};

pub mod discover;
pub mod module;

pub use discover::{DiscoveredRoute, ROUTE_FILE_NAMES, discover, url_pattern};
pub use module::{LoadError, ModuleLoader, RouteModule, RouteModules, load_manifest};

/// Registers every verb each discovered route exports.
///
/// A route that fails to load is logged and skipped; it registers no verbs,
/// so requests to its pattern answer 404. Returns the number of `(verb,
/// pattern)` registrations made.
pub fn register(router: &mut Router, routes: &[DiscoveredRoute], loader: &dyn ModuleLoader) -> usize {
    let mut registered = 0;
    for route in routes {
        let module = match loader.load(route) {
            Ok(module) => module,
            Err(e) => {
                warn!(pattern = %route.url_pattern, error = %e, "route file not loaded");
                continue;
            }
        };

        let chain = module.middleware_chain();
        let mut verbs = Vec::new();
        for verb in Verb::REGISTRATION_ORDER {
            if let Some(handler) = module.handler(verb) {
                router.register(verb, &route.url_pattern, handler, chain.clone());
                verbs.push(verb.as_str());
                registered += 1;
            }
        }

        if verbs.is_empty() {
            warn!(pattern = %route.url_pattern, file = %route.source_file.display(), "route file exports no verbs");
        } else {
            info!(pattern = %route.url_pattern, verbs = %verbs.join(", "), "route registered");
        }
    }
    registered
}
