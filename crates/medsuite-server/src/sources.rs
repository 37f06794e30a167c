//! Reminder candidates and contacts fetched from sibling services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medsuite_notifications::taxonomy::USERS;
use medsuite_notifications::{
    Contact, NotificationError, ReminderCandidate, ReminderCategory, ReminderSource,
    UserDirectory,
};
use serde_json::Value;

use crate::client::ServiceClient;

/// Lists due records from the service owning each category.
///
/// Accepts a bare JSON array or a paginated `{"results": [...]}` body.
#[derive(Clone)]
pub struct HttpReminderSource {
    client: Arc<ServiceClient>,
}

impl HttpReminderSource {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReminderSource for HttpReminderSource {
    async fn due_within(
        &self,
        category: ReminderCategory,
        lookahead: Duration,
    ) -> Result<Vec<ReminderCandidate>, NotificationError> {
        let hours = lookahead.as_secs().div_ceil(3600).max(1);
        let path = format!("{}?hours={hours}", category.path());

        let Some(body) = self.client.get(category.service(), &path, None).await? else {
            return Ok(Vec::new());
        };

        let records = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("results") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(NotificationError::Source(format!(
                        "{} returned an object without results",
                        category.service()
                    )));
                }
            },
            _ => {
                return Err(NotificationError::Source(format!(
                    "{} returned a non-list body",
                    category.service()
                )));
            }
        };

        let total = records.len();
        let candidates: Vec<_> = records
            .iter()
            .filter_map(|r| ReminderCandidate::from_record(category, r))
            .collect();
        if candidates.len() < total {
            tracing::debug!(
                category = %category,
                skipped = total - candidates.len(),
                "Records without id or patient_id skipped"
            );
        }
        Ok(candidates)
    }
}

/// Looks users up on the users service.
#[derive(Clone)]
pub struct HttpUserDirectory {
    client: Arc<ServiceClient>,
}

impl HttpUserDirectory {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn contact(&self, user_id: i64) -> Result<Option<Contact>, NotificationError> {
        let path = format!("/api/users/{user_id}/");
        match self.client.get(USERS, &path, None).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }
}
