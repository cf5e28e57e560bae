pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod security;
pub mod session;
pub mod state;
pub mod sweeper;
pub mod tasks;
pub mod users;
