pub mod analytics;
pub mod api;
pub mod assets;
pub mod auth;
pub mod config;
pub mod storage;
