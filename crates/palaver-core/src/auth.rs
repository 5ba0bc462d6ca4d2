//! Authentication state and auto-login
//!
//! Caches the last-used login credentials, guards against concurrent login
//! attempts, and replays the login after a reconnect when auto-login is
//! enabled. Logout clears the device token on the server (null sentinel),
//! drops the connection, and wipes local auth state.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::session::Session;

/// Login scheme for `login:password` credentials.
pub const SCHEME_BASIC: &str = "basic";
/// Login scheme for a previously issued auth token.
pub const SCHEME_TOKEN: &str = "token";

// ----------------------------------------------------------------------------
// Credential Cache
// ----------------------------------------------------------------------------

/// A scheme plus its opaque secret, as last sent in a `login`.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub scheme: String,
    pub secret: Vec<u8>,
}

/// Mutable authentication state owned by the session.
#[derive(Default)]
pub(crate) struct AuthState {
    credentials: Mutex<Option<LoginCredentials>>,
    auto_login: AtomicBool,
    login_in_progress: AtomicBool,
}

impl AuthState {
    pub(crate) fn credentials(&self) -> Option<LoginCredentials> {
        self.credentials.lock().clone()
    }

    pub(crate) fn store_credentials(&self, scheme: &str, secret: &[u8]) {
        *self.credentials.lock() = Some(LoginCredentials {
            scheme: scheme.to_string(),
            secret: secret.to_vec(),
        });
    }

    /// Drop credentials and disable auto-login; auto-login without
    /// credentials is not a representable state.
    pub(crate) fn clear(&self) {
        *self.credentials.lock() = None;
        self.auto_login.store(false, Ordering::Release);
    }

    pub(crate) fn auto_login_enabled(&self) -> bool {
        self.auto_login.load(Ordering::Acquire)
    }

    pub(crate) fn set_auto_login(&self, enabled: bool) {
        self.auto_login.store(enabled, Ordering::Release);
    }

    pub(crate) fn login_in_progress(&self) -> bool {
        self.login_in_progress.load(Ordering::Acquire)
    }

    pub(crate) fn set_login_in_progress(&self, value: bool) {
        self.login_in_progress.store(value, Ordering::Release);
    }
}

// ----------------------------------------------------------------------------
// Session Auth Operations
// ----------------------------------------------------------------------------

impl Session {
    /// Cache credentials and re-login with them automatically after every
    /// reconnect.
    pub fn set_auto_login(&self, scheme: &str, secret: Vec<u8>) {
        self.auth.store_credentials(scheme, &secret);
        self.auth.set_auto_login(true);
    }

    /// Enable auto-login with a server-issued auth token.
    pub fn set_auto_login_with_token(&self, token: &str) {
        self.set_auto_login(SCHEME_TOKEN, token.as_bytes().to_vec());
    }

    /// Stop re-logging in on reconnect. Cached credentials are kept.
    pub fn disable_auto_login(&self) {
        self.auth.set_auto_login(false);
    }

    /// Chain a login after the handshake when auto-login is armed.
    pub(crate) async fn maybe_auto_login(&self) {
        if !self.auth.auto_login_enabled()
            || self.is_authenticated()
            || self.auth.login_in_progress()
        {
            return;
        }
        let Some(creds) = self.auth.credentials() else {
            return;
        };
        if let Err(err) = self.login(&creds.scheme, creds.secret).await {
            warn!(error = %err, "auto-login failed");
        }
    }

    /// Log out: ask the server to forget this device token, drop the
    /// connection, and wipe local per-account state.
    pub async fn logout(&self) {
        // Best effort; the token clear is pointless if the link is down.
        let _ = self.clear_device_token().await;
        self.disconnect().await;
        self.reset_authentication();
        if let Some(store) = self.store() {
            store.logout();
        }
    }

    /// Forget uid, auth token, credentials, and the user cache.
    pub(crate) fn reset_authentication(&self) {
        self.set_my_uid_internal(None);
        self.set_auth_token_internal(None);
        self.auth.clear();
        self.users.clear();
    }

    /// Called on auth failures in `[400, 500)`: the server told us these
    /// credentials are no good.
    pub(crate) fn clear_auth_data(&self) {
        self.set_auth_token_internal(None);
        self.auth.clear();
    }
}
