//! Deferred notification delivery.
//!
//! Locked sections only record what should be sent in an [`Outbox`]. The
//! outbox is dispatched after the event lock is released, so a slow gateway
//! never holds up other operations on the same event, and a failed delivery
//! never undoes a committed transition.

use crate::metrics::WaitlistMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use waitlist_core::environment::NotificationGateway;
use waitlist_core::{EventId, UserId, WaitlistEntry, WaitlistStatus};

/// A message owed to a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    /// A slot is reserved until `deadline`.
    Invitation {
        /// Event ID
        event_id: EventId,
        /// Invited user
        user_id: UserId,
        /// Response deadline
        deadline: DateTime<Utc>,
    },
    /// The entry reached a terminal status.
    Decision {
        /// Event ID
        event_id: EventId,
        /// Affected user
        user_id: UserId,
        /// Final status
        status: WaitlistStatus,
    },
}

/// Notices collected while an event lock is held.
#[derive(Debug, Default)]
pub struct Outbox {
    notices: Vec<Notice>,
}

impl Outbox {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an invitation for a freshly promoted entry.
    pub fn invite(&mut self, entry: &WaitlistEntry) {
        if let Some(deadline) = entry.response_deadline {
            self.notices.push(Notice::Invitation {
                event_id: entry.event_id,
                user_id: entry.user_id,
                deadline,
            });
        }
    }

    /// Queue a decision confirmation for an entry in its final status.
    pub fn confirm(&mut self, entry: &WaitlistEntry) {
        self.notices.push(Notice::Decision {
            event_id: entry.event_id,
            user_id: entry.user_id,
            status: entry.status,
        });
    }

    /// Queued notices, in order.
    #[must_use]
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}

/// Delivers outboxes through the configured gateway.
#[derive(Clone)]
pub struct Notifier {
    gateway: Arc<dyn NotificationGateway>,
}

impl Notifier {
    /// Wrap a gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { gateway }
    }

    /// Send every queued notice. Failures are logged and counted only.
    pub async fn dispatch(&self, outbox: Outbox) {
        for notice in outbox.notices {
            let result = match notice {
                Notice::Invitation {
                    event_id,
                    user_id,
                    deadline,
                } => self.gateway.send_invitation(event_id, user_id, deadline).await,
                Notice::Decision {
                    event_id,
                    user_id,
                    status,
                } => {
                    self.gateway
                        .send_decision_confirmation(event_id, user_id, status)
                        .await
                },
            };

            if let Err(error) = result {
                WaitlistMetrics::record_notification_failure();
                tracing::warn!(?notice, %error, "Notification delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
