//! Package-level constants.

/// Current version of the tether client (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client identity sent in the connect request.
pub const CLIENT_NAME: &str = "tether";

/// Prefix for client-generated optimistic message IDs. A user message whose
/// ID carries this prefix has been submitted but not yet observed in
/// canonical history.
pub const OPTIMISTIC_ID_PREFIX: &str = "local-";
