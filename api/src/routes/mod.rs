pub mod auth;
pub mod deltas;
pub mod health;
pub mod payments;
pub mod policies;
pub mod premium_history;
pub mod reminders;
pub mod scores;
