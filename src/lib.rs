//! Stubble
//!
//! Scriptable stub responder for integration tests. A stub answers every
//! request on its endpoint with pre-declared responses instead of real
//! backend logic.
//!
//! # Features
//!
//! - **Sequential Responses**: Cycle through response groups in order
//! - **Random Responses**: Pick a response group uniformly at random
//! - **Matched Responses**: First matching rule wins, with an optional default
//! - **Repeated Actions**: Apply the same actions before every response
//! - **Preprocessing**: Rewrite each request before a response is selected
//! - **Dynamic Templates**: Use Handlebars templates for dynamic responses
//!
//! # Example
//!
//! ```
//! use stubble::action::{header, text};
//! use stubble::{Exchange, StubBuilder};
//!
//! let stub = StubBuilder::new("ping", "http://localhost:8080")
//!     .repeated(header("X-Stub", "ping"))
//!     .response(vec![text("foo")])
//!     .response(vec![text("baz")])
//!     .build()
//!     .unwrap();
//!
//! let mut exchange = Exchange::new("http://localhost:8080").with_body("a");
//! stub.handle(&mut exchange).unwrap();
//! assert_eq!(exchange.body_str(), Some("foo"));
//! assert_eq!(exchange.header("X-Stub"), Some("ping"));
//! ```
//!
//! # Example Configuration
//!
//! ```yaml
//! stubs:
//!   - description: orders
//!     endpoint: "http://localhost:8080/orders"
//!     responses:
//!       - body:
//!           type: json
//!           content:
//!             status: "accepted"
//! ```

pub mod action;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod predicate;
pub mod registry;
pub mod selector;
pub mod stub;
pub mod template;
pub mod uri;

pub use config::StubbleConfig;
pub use error::{ActionError, ConfigurationError, DispatchError};
pub use exchange::Exchange;
pub use registry::StubRegistry;
pub use selector::{MatchRules, Selection, SelectorKind};
pub use stub::{StubBuilder, StubDefinition};
