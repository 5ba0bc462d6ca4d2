//! Session configuration
//!
//! Consolidates the static parameters a session needs: application identity,
//! server endpoint, and presentation strings reported during the handshake.

use serde::{Deserialize, Serialize};

/// Version of the wire protocol spoken by this client, reported in `hi.ver`.
pub const WIRE_VERSION: &str = "0.16";

/// Protocol version literal used in endpoint URL paths.
pub const URL_PROTOCOL_VERSION: &str = "0";

/// Library identifier appended to the user-agent string.
pub const LIBRARY: &str = concat!("palaver-core/", env!("CARGO_PKG_VERSION"));

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Static configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Human-readable application name, leads the user-agent string.
    pub app_name: String,
    /// API key issued by the server operator.
    pub api_key: String,
    /// Server host, optionally with a port (`example.com:6060`).
    pub host: String,
    /// Use TLS (`wss`/`https`) when connecting.
    pub use_tls: bool,
    /// BCP 47 language tag sent in the handshake.
    pub locale: String,
    /// Operating system description for the user-agent string.
    pub os_version: String,
}

impl SessionConfig {
    /// Create a configuration with the common fields; locale defaults to
    /// `en-US` and the OS string to the compile-time target.
    pub fn new<A, K, H>(app_name: A, api_key: K, host: H) -> Self
    where
        A: Into<String>,
        K: Into<String>,
        H: Into<String>,
    {
        Self {
            app_name: app_name.into(),
            api_key: api_key.into(),
            host: host.into(),
            use_tls: true,
            locale: "en-US".into(),
            os_version: std::env::consts::OS.into(),
        }
    }

    /// Disable TLS; useful against local development servers.
    pub fn plaintext(mut self) -> Self {
        self.use_tls = false;
        self
    }

    /// Override the locale reported to the server.
    pub fn with_locale<L: Into<String>>(mut self, locale: L) -> Self {
        self.locale = locale.into();
        self
    }

    /// Override the OS string reported in the user agent.
    pub fn with_os<O: Into<String>>(mut self, os: O) -> Self {
        self.os_version = os.into();
        self
    }

    /// Endpoint URL for the message channel.
    ///
    /// Websocket endpoints use `ws`/`wss`, long-polling fallbacks `http`/`https`;
    /// the scheme's secure variant follows [`use_tls`](Self::use_tls).
    pub fn channels_url(&self, websocket: bool) -> String {
        let scheme = match (websocket, self.use_tls) {
            (true, true) => "wss",
            (true, false) => "ws",
            (false, true) => "https",
            (false, false) => "http",
        };
        format!(
            "{}://{}/v{}/channels",
            scheme, self.host, URL_PROTOCOL_VERSION
        )
    }

    /// User-agent string reported in the `hi` handshake.
    pub fn user_agent(&self) -> String {
        format!(
            "{} ({}; {}); {}",
            self.app_name, self.os_version, self.locale, LIBRARY
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("TestApp", "key", "example.com:6060")
    }

    #[test]
    fn channel_urls() {
        let cfg = config();
        assert_eq!(cfg.channels_url(true), "wss://example.com:6060/v0/channels");
        assert_eq!(
            cfg.channels_url(false),
            "https://example.com:6060/v0/channels"
        );

        let cfg = cfg.plaintext();
        assert_eq!(cfg.channels_url(true), "ws://example.com:6060/v0/channels");
        assert_eq!(
            cfg.channels_url(false),
            "http://example.com:6060/v0/channels"
        );
    }

    #[test]
    fn user_agent_shape() {
        let cfg = config().with_locale("en").with_os("linux");
        let ua = cfg.user_agent();
        assert!(ua.starts_with("TestApp (linux; en); palaver-core/"));
    }
}
