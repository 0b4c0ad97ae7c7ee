pub mod appointments;
pub mod health;
pub mod reminders;
pub mod tenants;
