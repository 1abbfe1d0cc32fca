//! Audit recorder. Writing an audit entry never fails the audited operation.

use std::sync::Arc;
use uuid::Uuid;

use super::store::{CredentialStore, Page};
use super::ServiceError;
use crate::models::{AuditLog, AuditLogFilter, AuditOutcome};

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn CredentialStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Persist an entry; storage errors are logged and swallowed.
    pub async fn record(&self, log: AuditLog) {
        match log.outcome {
            AuditOutcome::Success => tracing::info!(
                action = %log.action,
                tenant_id = %log.tenant_id,
                actor_user_id = ?log.actor_user_id,
                "Audit event"
            ),
            AuditOutcome::Failure | AuditOutcome::Denied => tracing::warn!(
                action = %log.action,
                outcome = log.outcome.as_str(),
                tenant_id = %log.tenant_id,
                actor_user_id = ?log.actor_user_id,
                "Audit event"
            ),
        }

        if let Err(e) = self.store.insert_audit_log(&log).await {
            tracing::error!(
                error = %e,
                action = %log.action,
                "Failed to write audit log"
            );
        }
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<AuditLog>, ServiceError> {
        self.store
            .list_audit_logs(tenant_id, filter, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use crate::services::MockCredentialStore;

    #[tokio::test]
    async fn test_recorded_entries_listed_newest_first() {
        let store = Arc::new(MockCredentialStore::new());
        let recorder = AuditRecorder::new(store);
        let tenant_id = Uuid::new_v4();

        recorder
            .record(AuditLog::new(tenant_id, AuditAction::Login, AuditOutcome::Failure))
            .await;
        recorder
            .record(AuditLog::new(tenant_id, AuditAction::Login, AuditOutcome::Success))
            .await;
        recorder
            .record(AuditLog::new(Uuid::new_v4(), AuditAction::Login, AuditOutcome::Success))
            .await;

        let page = recorder
            .list(tenant_id, &AuditLogFilter::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].outcome, AuditOutcome::Success);
    }
}
