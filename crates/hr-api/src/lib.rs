//! HTTP surface for the HR AI reliability layer.

pub mod config;
pub mod server;
