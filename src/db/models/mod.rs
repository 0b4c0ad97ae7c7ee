//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work.

pub mod booking;
pub mod message_log;
pub mod message_template;
pub mod reminder_queue;

pub use self::booking::*;
pub use self::message_log::*;
pub use self::message_template::*;
pub use self::reminder_queue::*;
