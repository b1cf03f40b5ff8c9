pub mod auth;
pub mod endpoint;
pub mod forwarder;
pub(crate) mod handler;
pub mod listener;
pub mod tunnel;

pub use auth::AuthConfig;
pub use endpoint::Endpoint;
pub use listener::BoundTunnel;
pub use tunnel::{Tunnel, TunnelError};
