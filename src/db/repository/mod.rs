pub mod booking_repository;
pub mod message_log_repository;
pub mod reminder_queue_repository;

pub use booking_repository::BookingRepository;
pub use message_log_repository::MessageLogRepository;
pub use reminder_queue_repository::ReminderQueueRepository;
