pub mod cache;
pub mod client;
pub mod selector;

/// Default user agent for `kubeconf` - automatically uses the package version
///
/// Sent with every list and watch request so the API server audit log can
/// tell configuration traffic apart from the rest of the workload.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
