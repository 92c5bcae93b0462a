use std::time::Duration;

use plexus_h2::Settings;

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Local settings advertised in the preface.
    pub settings: Settings,
    /// How long to wait for the peer to acknowledge our SETTINGS.
    pub settings_timeout: Duration,
    /// Upper bound on draining in-flight streams during [`close`].
    ///
    /// [`close`]: crate::Connection::close
    pub shutdown_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            settings: Settings::client_default(),
            settings_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Applied to every connection the manager opens.
    pub connection: ConnectionConfig,
}
