//! Local port forwarding over SSH: connections accepted on a local endpoint
//! are carried through an SSH server to a remote endpoint, one SSH session
//! per forwarded connection.

pub mod config;
pub mod host_keys;
pub mod tunneling;
