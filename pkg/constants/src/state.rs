//! State store / watch constants.

/// Key prefix under which pods are registered.
/// Full key = `/registry/pods/{namespace}/{pod_id}`.
pub const PODS_PREFIX: &str = "/registry/pods/";

/// Key prefix under which certificate signing records are stored.
/// Full key = `/registry/certificaterequests/{namespace}/{name}`.
pub const CERTIFICATE_REQUESTS_PREFIX: &str = "/registry/certificaterequests/";

/// Capacity of the live broadcast channel feeding watchers.
/// Slow watchers beyond this many events observe a lag and must resync.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;
