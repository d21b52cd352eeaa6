//! Notification delivery for the deployed server.
//!
//! Email and push delivery belong to other services; this gateway records
//! every message in the structured log, where a shipper can pick it up.

use chrono::{DateTime, Utc};
use waitlist_core::environment::{NotificationFuture, NotificationGateway};
use waitlist_core::{EventId, UserId, WaitlistStatus};

/// Gateway that emits each notification as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationGateway;

impl NotificationGateway for TracingNotificationGateway {
    fn send_invitation(
        &self,
        event_id: EventId,
        user_id: UserId,
        deadline: DateTime<Utc>,
    ) -> NotificationFuture<'_> {
        Box::pin(async move {
            tracing::info!(
                target: "waitlist::notifications",
                %event_id,
                %user_id,
                %deadline,
                "Invitation sent"
            );
            Ok(())
        })
    }

    fn send_decision_confirmation(
        &self,
        event_id: EventId,
        user_id: UserId,
        decision: WaitlistStatus,
    ) -> NotificationFuture<'_> {
        Box::pin(async move {
            tracing::info!(
                target: "waitlist::notifications",
                %event_id,
                %user_id,
                decision = decision.as_str(),
                "Decision confirmed"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivery_always_succeeds() {
        let gateway = TracingNotificationGateway;
        let event_id = EventId::new();
        let user_id = UserId::new();

        assert!(gateway.send_invitation(event_id, user_id, Utc::now()).await.is_ok());
        assert!(
            gateway
                .send_decision_confirmation(event_id, user_id, WaitlistStatus::Accepted)
                .await
                .is_ok()
        );
    }
}
