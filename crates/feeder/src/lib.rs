//! HTTP surface and configuration of the discovery feeder

pub mod api;
pub mod config;
