//! VERSION command: report the server's semantic version.

use crate::commands::Handler;
use crate::protocol::{Request, Response};
use serde_json::json;

/// Answers `{"cmd": "VERSION"}` with `{"version": "<crate version>"}`.
pub struct VersionHandler;

impl Handler for VersionHandler {
    fn handle(&self, _request: &Request) -> Response {
        Response::new(json!({"version": env!("CARGO_PKG_VERSION")}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_crate() {
        let response = VersionHandler.handle(&Request::new("VERSION", json!({})));
        assert_eq!(
            response.body(),
            &json!({"version": env!("CARGO_PKG_VERSION")})
        );
    }
}
