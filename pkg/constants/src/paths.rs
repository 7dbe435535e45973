//! Filesystem path constants.

// ─── Server ────────────────────────────────────────────────────────────────

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/meshca/config.yaml";

/// Default data directory for the state store.
pub const DEFAULT_SERVER_DATA_DIR: &str = "/tmp/meshca-data";

/// Default listen port for the certificate API.
pub const DEFAULT_SERVER_PORT: u16 = 15012;
