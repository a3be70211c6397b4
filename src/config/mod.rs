//! Host-level address model: authorities and endpoints.

pub mod authority;
pub mod endpoint;

pub use authority::Authority;
pub use endpoint::Endpoint;
