//! Segment trie router for the Portico gateway.
//!
//! This crate resolves `(method, path)` pairs to registered values with
//! named path parameters. It is transport agnostic: the HTTP dispatch layer
//! in `portico-server` stores endpoint handlers as values.
//!
//! # Pattern syntax
//!
//! - **Static segments**: `/users/list`
//! - **Parameters**: `/users/:id` captures one segment under `id`
//! - **Greedy tail**: `/files/*` matches everything below `/files/`
//! - `/a` and `/a/` are the same route
//!
//! # Example
//!
//! ```rust
//! use http::Method;
//! use portico_router::{Lookup, Router};
//!
//! let mut router = Router::new();
//! router.handle(Method::GET, "/orgs/:org/users/:user", "getOrgUser", false).unwrap();
//!
//! if let Lookup::Matched(m) = router.lookup(&Method::GET, "/orgs/acme/users/42") {
//!     assert_eq!(*m.value, "getOrgUser");
//!     assert_eq!(m.params.get("org"), Some("acme"));
//!     assert_eq!(m.params.get("user"), Some("42"));
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//!                  (root)
//!                    │
//!            ┌───────┴───────┐
//!          "orgs"          "files"
//!            │               │
//!          ":org"           "*"
//!            │
//!         "users"
//!            │
//!         ":user"
//! ```
//!
//! Static children are kept sorted and tried first, then the parameter
//! child, then the greedy tail.

#![doc(html_root_url = "https://docs.rs/portico-router/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod node;
mod params;
mod router;

pub use error::{RouterError, RouterResult};
pub use node::{normalize_path, parse_pattern, Segment, Trie};
pub use params::Params;
pub use router::{Lookup, RouteMatch, Router};
