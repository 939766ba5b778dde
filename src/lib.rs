pub mod auth;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod model;
pub mod reconciler;
pub mod remote;
pub mod server;

#[cfg(test)]
mod test_support;
