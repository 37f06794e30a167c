//! Reminder scheduling: upstream candidates become pending outbound entries.

mod scheduler;
mod source;

pub use scheduler::{ReminderScheduler, ScheduleReport, SchedulerSettings};
pub use source::{Contact, ReminderCandidate, ReminderCategory, ReminderSource, UserDirectory};
