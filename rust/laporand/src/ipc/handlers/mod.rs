pub mod auth;
pub mod core;
pub mod duty;
pub mod facility;
pub mod stats;
pub mod subscriptions;
pub mod users;
