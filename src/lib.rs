// Quill - server-rendered blogging platform

pub mod admin;
pub mod app_state;
pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod forms;
pub mod models;
pub mod pages;
pub mod views;

// Re-exports for convenience
pub use error::{AppError, AppResult};
