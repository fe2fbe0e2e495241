//! Handler Registry: maps a decrypted HTTP request's `Host` to the handler
//! that should produce its response, falling back to a default handler
//! when no host-specific entry matches.

use crate::http::Handler;
use std::collections::HashMap;
use std::sync::Arc;

/// Host-keyed dispatch table for the HTTP MITM pump.
///
/// Lookup is by exact host match (scheme and port stripped by the pump
/// before calling [`Mux::handler_for`]); there is no wildcard or eTLD+1
/// folding here; unlike certificate minting, handler selection is meant to
/// be precise per the original implementation's `Mux` type.
pub struct Mux {
    routes: HashMap<String, Arc<Handler>>,
    default: Arc<Handler>,
}

impl Mux {
    pub fn new(default: Arc<Handler>) -> Self {
        Self {
            routes: HashMap::new(),
            default,
        }
    }

    pub fn register(&mut self, host: impl Into<String>, handler: Arc<Handler>) -> &mut Self {
        self.routes.insert(host.into(), handler);
        self
    }

    pub fn handler_for(&self, host: &str) -> Arc<Handler> {
        self.routes
            .get(host)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}
