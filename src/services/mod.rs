pub mod clock;
pub mod delivery;
pub mod directory;
pub mod gateway;
pub mod init;
pub mod message_log;
pub mod queue_store;
pub mod render;
pub mod scheduler;
pub mod templates;

#[cfg(test)]
pub mod testing;
