pub mod admin;
pub mod drops;
pub mod health;
