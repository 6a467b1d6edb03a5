//! Command handlers.
//!
//! Each command is a pure function from a parsed request to a response,
//! registered by name in a [`CommandRegistry`]. The event loop routes every
//! complete frame through the registry; adding a command means registering a
//! new handler, never touching the dispatcher.

pub mod version;

use crate::protocol::{Request, Response};
use std::collections::HashMap;

pub use version::VersionHandler;

/// A single command implementation.
///
/// Handlers are synchronous and must not block: they run on the event-loop
/// thread between two poll cycles. Any state they need is passed in via the
/// request payload or captured at registration time.
pub trait Handler: Send {
    fn handle(&self, request: &Request) -> Response;
}

/// Routing table from command name to handler.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a command name, replacing any previous one.
    pub fn register<H: Handler + 'static>(&mut self, name: impl Into<String>, handler: H) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Route a request to its handler.
    ///
    /// Unrecognized commands get an explicit error response; a request whose
    /// `cmd` field was absent lands here too.
    pub fn dispatch(&self, request: &Request) -> Response {
        match self.handlers.get(request.cmd()) {
            Some(handler) => handler.handle(request),
            None => Response::unknown_command(),
        }
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// Registry with the built-in command set.
pub fn default_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register("VERSION", VersionHandler);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct EchoHandler;

    impl Handler for EchoHandler {
        fn handle(&self, request: &Request) -> Response {
            Response::new(request.payload().clone())
        }
    }

    #[test]
    fn test_default_registry_has_version() {
        let registry = default_registry();
        assert!(registry.contains("VERSION"));

        let response = registry.dispatch(&Request::new("VERSION", json!({"cmd": "VERSION"})));
        let Value::Object(body) = response.body() else {
            panic!("expected an object response");
        };
        assert_eq!(
            body.get("version"),
            Some(&Value::String(env!("CARGO_PKG_VERSION").to_string()))
        );
    }

    #[test]
    fn test_unknown_command_gets_error() {
        let registry = default_registry();
        let response = registry.dispatch(&Request::new("NOPE", json!({"cmd": "NOPE"})));
        assert_eq!(response, Response::unknown_command());

        // Missing cmd routes the same way
        let response = registry.dispatch(&Request::new("", json!({})));
        assert_eq!(response, Response::unknown_command());
    }

    #[test]
    fn test_registry_is_extensible() {
        let mut registry = default_registry();
        registry.register("ECHO", EchoHandler);

        let payload = json!({"cmd": "ECHO", "data": [1, 2]});
        let response = registry.dispatch(&Request::new("ECHO", payload.clone()));
        assert_eq!(response.body(), &payload);

        // The built-in set is untouched
        assert!(registry.contains("VERSION"));
    }
}
