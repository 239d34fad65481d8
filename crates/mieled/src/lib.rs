//! mieled library: configuration loading and the REST routing layer.

pub mod config;
pub mod routes;
