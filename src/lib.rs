pub mod bot;
pub mod config;
pub mod error;
pub mod keyboards;
pub mod lifecycle;
pub mod models;
pub mod openapi;
pub mod relay;
pub mod repo;
pub mod routes;
pub mod telegram;

pub use routes::{configure, AppState};
