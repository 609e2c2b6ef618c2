pub mod auth;
pub mod delta;
pub mod health;
pub mod payment;
pub mod policy;
pub mod premium;
pub mod reminder;
pub mod score;
