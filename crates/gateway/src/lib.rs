//! HTTP ingress for the OpsConductor pipeline core: the `/pipeline`
//! endpoints, the authenticated cache management API, config loading, and
//! the server bootstrap.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
