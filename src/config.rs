//! Options for an engine.io session, fixed at construction.
//!
//! Unknown options do not exist here: everything a session honors is a named
//! field with a documented default, assembled through the builder.

use std::time::Duration;

use http::HeaderMap;

/// Configuration for the engine.io session and its transports
#[derive(Debug, Clone)]
pub struct EngineIoConfig {
    /// Never leave long-polling, no upgrade probe is ever started.
    /// Defaults to false.
    pub force_polling: bool,

    /// Connect over websocket directly, skipping the polling handshake.
    /// Takes precedence over `force_polling` when both are set.
    /// Defaults to false.
    pub force_websockets: bool,

    /// Double encode the utf8 bytes of text frames exchanged with a polling
    /// transport, some legacy deployments expect it.
    /// Defaults to true.
    pub double_encode_utf8: bool,

    /// Extra query parameters appended in order to every url derived for a
    /// transport.
    pub connect_params: Vec<(String, String)>,

    /// Extra request headers handed verbatim to both transports.
    pub extra_headers: HeaderMap,

    /// Preformatted `name=value` cookie pairs handed verbatim to both
    /// transports.
    pub cookies: Vec<String>,

    /// The request path of the engine.io endpoint.
    /// Defaults to "/engine.io".
    pub socket_path: String,

    /// The amount of time a websocket candidate may take to answer the
    /// upgrade probe before the session falls back to polling.
    /// Defaults to 10 seconds.
    pub probe_timeout: Duration,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        Self {
            force_polling: false,
            force_websockets: false,
            double_encode_utf8: true,
            connect_params: Vec::new(),
            extra_headers: HeaderMap::new(),
            cookies: Vec::new(),
            socket_path: "/engine.io".to_string(),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineIoConfig {
    /// Create a new [`EngineIoConfigBuilder`] with a default config
    pub fn builder() -> EngineIoConfigBuilder {
        EngineIoConfigBuilder::new()
    }
}

/// A builder to create an [`EngineIoConfig`]
pub struct EngineIoConfigBuilder {
    config: EngineIoConfig,
}

impl EngineIoConfigBuilder {
    /// Create a new builder with a default config
    pub fn new() -> Self {
        Self {
            config: EngineIoConfig::default(),
        }
    }

    /// Never leave long-polling, no upgrade probe is ever started.
    /// Defaults to false.
    pub fn force_polling(mut self, force_polling: bool) -> Self {
        self.config.force_polling = force_polling;
        self
    }

    /// Connect over websocket directly, skipping the polling handshake.
    /// Takes precedence over `force_polling` when both are set.
    /// Defaults to false.
    pub fn force_websockets(mut self, force_websockets: bool) -> Self {
        self.config.force_websockets = force_websockets;
        self
    }

    /// Double encode the utf8 bytes of text frames exchanged with a polling
    /// transport, some legacy deployments expect it.
    /// Defaults to true.
    pub fn double_encode_utf8(mut self, double_encode_utf8: bool) -> Self {
        self.config.double_encode_utf8 = double_encode_utf8;
        self
    }

    /// Append a query parameter to every url derived for a transport.
    ///
    /// Parameters keep their insertion order.
    pub fn connect_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.connect_params.push((key.into(), value.into()));
        self
    }

    /// Extra request headers handed verbatim to both transports.
    pub fn extra_headers(mut self, extra_headers: HeaderMap) -> Self {
        self.config.extra_headers = extra_headers;
        self
    }

    /// Add a preformatted `name=value` cookie pair handed verbatim to both
    /// transports.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.config.cookies.push(cookie.into());
        self
    }

    /// The request path of the engine.io endpoint.
    /// Defaults to "/engine.io".
    pub fn socket_path(mut self, socket_path: impl Into<String>) -> Self {
        self.config.socket_path = socket_path.into();
        self
    }

    /// The amount of time a websocket candidate may take to answer the
    /// upgrade probe before the session falls back to polling.
    /// Defaults to 10 seconds.
    pub fn probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.config.probe_timeout = probe_timeout;
        self
    }

    /// Build the config
    pub fn build(self) -> EngineIoConfig {
        self.config
    }
}
impl Default for EngineIoConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
