pub mod announce;
pub mod events;
pub mod health;
