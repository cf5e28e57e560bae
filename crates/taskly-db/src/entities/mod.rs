pub mod refresh_tokens;
pub mod tasks;
pub mod users;
