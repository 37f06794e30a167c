//! Event publishing, notification fan-out and reminder scheduling.
//!
//! Services publish domain events to a shared Redis stream through the
//! [`EventPublisher`]. The [`EventConsumer`] drains the stream through a
//! consumer group and writes in-app notifications. The
//! [`ReminderScheduler`] periodically turns upstream records into pending
//! email/SMS entries for the delivery worker.

pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod reminders;
pub mod store;
pub mod stream;
pub mod taxonomy;
pub mod templates;
pub mod types;

pub use dispatcher::{BatchReport, ConsumerSettings, EventConsumer};
pub use error::NotificationError;
pub use memory::{InMemoryNotificationStore, InMemoryScheduleStore};
pub use publisher::EventPublisher;
pub use reminders::{
    Contact, ReminderCandidate, ReminderCategory, ReminderScheduler, ReminderSource,
    ScheduleReport, SchedulerSettings, UserDirectory,
};
pub use store::{NotificationStore, ScheduleStore};
pub use stream::{EventStream, MemoryEventStream, RedisEventStream, StreamEntry};
pub use templates::{RenderedContent, Template, TemplateRenderer};
pub use types::*;
