pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod flow;
pub mod handlers;
pub mod manager;
pub mod models;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod validation;
pub mod webhook;
