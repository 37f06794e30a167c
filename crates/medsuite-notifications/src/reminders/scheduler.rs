//! Periodic reminder scheduling.
//!
//! For every enabled category the scheduler fetches records due within the
//! lookahead window and writes one SCHEDULED entry per available channel.
//! Records that already have a SCHEDULED entry are skipped, and the insert
//! itself is conditional so concurrent runs cannot duplicate an entry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::source::{Contact, ReminderCandidate, ReminderCategory, ReminderSource, UserDirectory};
use crate::error::NotificationError;
use crate::store::ScheduleStore;
use crate::templates::TemplateRenderer;
use crate::types::{DeliveryChannel, ScheduleEntry, ScheduleKey, ScheduleStatus};

/// Configuration for the reminder scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between runs.
    pub interval: Duration,
    /// How far ahead records count as due.
    pub lookahead: Duration,
    pub categories: Vec<ReminderCategory>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            lookahead: Duration::from_secs(24 * 3600),
            categories: ReminderCategory::ALL.to_vec(),
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub candidates: usize,
    pub already_scheduled: usize,
    pub scheduled: usize,
    pub no_contact: usize,
    pub failures: usize,
}

pub struct ReminderScheduler {
    source: Arc<dyn ReminderSource>,
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn ScheduleStore>,
    templates: Arc<TemplateRenderer>,
    settings: SchedulerSettings,
}

impl ReminderScheduler {
    #[must_use]
    pub fn new(
        source: Arc<dyn ReminderSource>,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn ScheduleStore>,
        templates: Arc<TemplateRenderer>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            source,
            directory,
            store,
            templates,
            settings,
        }
    }

    /// Runs every enabled category once.
    ///
    /// Failures are counted and logged per category and per candidate; one
    /// bad record never stops the run.
    pub async fn run_once(&self) -> ScheduleReport {
        let mut report = ScheduleReport::default();

        for &category in &self.settings.categories {
            let candidates = match self
                .source
                .due_within(category, self.settings.lookahead)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(category = %category, error = %e, "Failed to fetch reminder candidates");
                    report.failures += 1;
                    continue;
                }
            };

            for candidate in candidates {
                report.candidates += 1;
                if let Err(e) = self.schedule(&candidate, &mut report).await {
                    report.failures += 1;
                    warn!(
                        category = %category,
                        reference_id = %candidate.reference_id,
                        recipient_id = candidate.recipient_id,
                        error = %e,
                        "Failed to schedule reminder"
                    );
                }
            }
        }

        report
    }

    async fn schedule(
        &self,
        candidate: &ReminderCandidate,
        report: &mut ScheduleReport,
    ) -> Result<(), NotificationError> {
        let category = candidate.category;
        let key = ScheduleKey {
            recipient_id: candidate.recipient_id,
            notification_type: category.notification_type(),
            reference_type: category.reference_type().to_string(),
            reference_id: candidate.reference_id.clone(),
        };

        if self.store.exists_scheduled(&key).await? {
            report.already_scheduled += 1;
            return Ok(());
        }

        let Some(contact) = self.directory.contact(candidate.recipient_id).await? else {
            report.no_contact += 1;
            debug!(recipient_id = candidate.recipient_id, "Recipient not found");
            return Ok(());
        };

        let channels = channels(&contact);
        if channels.is_empty() {
            report.no_contact += 1;
            debug!(recipient_id = candidate.recipient_id, "Recipient has no email or phone");
            return Ok(());
        }

        let rendered = self
            .templates
            .render(category.template_ref(), &template_vars(candidate, &contact))?;
        let now = OffsetDateTime::now_utc();

        for channel in channels {
            let entry = ScheduleEntry {
                id: Uuid::new_v4(),
                recipient_id: candidate.recipient_id,
                recipient_type: candidate.recipient_type,
                recipient_email: contact.email.clone(),
                recipient_phone: contact.phone.clone(),
                notification_type: key.notification_type,
                channel,
                subject: rendered.subject.clone(),
                content: rendered.body.clone(),
                scheduled_at: now,
                status: ScheduleStatus::Scheduled,
                template_ref: category.template_ref().to_string(),
                reference_id: key.reference_id.clone(),
                reference_type: key.reference_type.clone(),
            };

            if self.store.insert_if_absent(&entry).await? {
                report.scheduled += 1;
            } else {
                report.already_scheduled += 1;
            }
        }
        Ok(())
    }

    /// Start the scheduler in a background task.
    ///
    /// Returns a shutdown sender that can be used to stop the scheduler.
    /// Dropping the sender stops it too.
    #[must_use]
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            info!(
                interval_secs = self.settings.interval.as_secs(),
                categories = self.settings.categories.len(),
                "Reminder scheduler started"
            );

            let mut ticker = interval(self.settings.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        if report.failures > 0 {
                            error!(
                                failures = report.failures,
                                "Reminder run finished with failures"
                            );
                        }
                        if report.scheduled > 0 {
                            info!(scheduled = report.scheduled, "Scheduled reminders");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Reminder scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

fn channels(contact: &Contact) -> Vec<DeliveryChannel> {
    let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    let mut channels = Vec::new();
    if present(&contact.email) {
        channels.push(DeliveryChannel::Email);
    }
    if present(&contact.phone) {
        channels.push(DeliveryChannel::Sms);
    }
    channels
}

fn template_vars(candidate: &ReminderCandidate, contact: &Contact) -> Map<String, Value> {
    let mut vars = candidate.data.clone();
    vars.insert("reference_id".into(), Value::String(candidate.reference_id.clone()));
    vars.insert(
        "first_name".into(),
        Value::String(contact.first_name.clone().unwrap_or_default()),
    );
    vars.insert(
        "last_name".into(),
        Value::String(contact.last_name.clone().unwrap_or_default()),
    );
    if let Some(due) = candidate.due_at.and_then(|d| d.format(&Rfc3339).ok()) {
        vars.insert("due_at".into(), Value::String(due));
    }
    vars
}
