//! Audit log and notification sinks
use crate::error::ApprovalError;
use crate::store::Store;
use crate::ticket::TimeStamp;
use chrono::Utc;
use tracing::warn;
use uuid7::uuid7;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum Severity {
    #[n(0)]
    Info,
    #[n(1)]
    Critical,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct AuditEntry {
    // raw uuid7 string; hex form keeps the tree ordered by creation time
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub actor_user_id: Option<String>,
    #[n(2)]
    pub action: String,
    #[n(3)]
    pub entity: String,
    #[n(4)]
    pub entity_id: String,
    #[n(5)]
    pub severity: Severity,
    #[n(6)]
    pub metadata: Vec<(String, String)>,
    #[n(7)]
    pub anonymized: bool,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_user_id: Option<String>,
        action: &str,
        entity: &str,
        entity_id: &str,
    ) -> Self {
        Self {
            id: uuid7().to_string(),
            actor_user_id,
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            severity: Severity::Info,
            metadata: vec![],
            anonymized: false,
            created_at: TimeStamp::new(),
        }
    }
    pub fn critical(mut self) -> Self {
        self.severity = Severity::Critical;
        self
    }
    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Clone)]
pub struct AuditLog {
    store: Store,
}

impl AuditLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append an entry. Callers on the critical rollback-failure path must
    /// surface this error; everyone else goes through [`record_best_effort`].
    ///
    /// [`record_best_effort`]: AuditLog::record_best_effort
    pub fn record(&self, entry: AuditEntry) -> Result<(), ApprovalError> {
        let tree = self.store.audit()?;
        self.store.put(&tree, &entry.id, &entry)
    }

    /// Append an entry without letting a sink failure reach the response
    /// path. The loss is observable in logs only.
    pub fn record_best_effort(&self, entry: AuditEntry) {
        if let Err(err) = self.record(entry) {
            warn!(error = %err, "audit entry dropped");
        }
    }

    /// Flag every entry concerning `subject_id` as anonymized and scrub its
    /// metadata. Part of right-to-erasure; the action trail itself survives.
    pub fn anonymize_for_entity(&self, subject_id: &str) -> Result<u64, ApprovalError> {
        let tree = self.store.audit()?;
        let mut flagged = 0;
        for (key, mut entry) in self.store.all::<AuditEntry>(&tree)? {
            let concerns_subject = entry.entity_id == subject_id
                || entry.actor_user_id.as_deref() == Some(subject_id);
            if concerns_subject && !entry.anonymized {
                entry.anonymized = true;
                entry.metadata.clear();
                self.store.put(&tree, &key, &entry)?;
                flagged += 1;
            }
        }
        Ok(flagged)
    }
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub message: String,
    #[n(4)]
    pub kind: String,
    #[n(5)]
    pub read: bool,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Clone)]
pub struct Notifications {
    store: Store,
}

impl Notifications {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a notification record, keyed `user_id/<uuid7>` so one user's
    /// notifications form a contiguous key range.
    pub fn push(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        kind: &str,
    ) -> Result<(), ApprovalError> {
        let tree = self.store.notifications()?;
        let id = uuid7().to_string();
        let record = Notification {
            id: id.clone(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            kind: kind.to_string(),
            read: false,
            created_at: TimeStamp::new(),
        };
        self.store.put(&tree, &format!("{user_id}/{id}"), &record)
    }

    /// Fire-and-forget insert; delivery failures never abort a decision.
    pub fn push_best_effort(&self, user_id: &str, title: &str, message: &str, kind: &str) {
        if let Err(err) = self.push(user_id, title, message, kind) {
            warn!(user_id, error = %err, "notification dropped");
        }
    }

    /// Remove every notification belonging to a user. Right-to-erasure path.
    pub fn purge_for_user(&self, user_id: &str) -> Result<u64, ApprovalError> {
        let tree = self.store.notifications()?;
        let prefix = format!("{user_id}/");
        let mut removed = 0;
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(ApprovalError::Storage)?;
            tree.remove(key)?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("audit_test.db")).unwrap();
        (dir, Store::new(Arc::new(db)))
    }

    #[test]
    fn purge_removes_only_the_target_users_notifications() {
        let (_dir, store) = open_store();
        let notifications = Notifications::new(store.clone());

        notifications.push("user_a", "t", "m", "decision").unwrap();
        notifications.push("user_a", "t", "m", "decision").unwrap();
        notifications.push("user_b", "t", "m", "decision").unwrap();

        assert_eq!(notifications.purge_for_user("user_a").unwrap(), 2);

        let tree = store.notifications().unwrap();
        let left = store.all::<Notification>(&tree).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].1.user_id, "user_b");
    }

    #[test]
    fn anonymize_flags_entries_for_subject_and_scrubs_metadata() {
        let (_dir, store) = open_store();
        let audit = AuditLog::new(store.clone());

        audit
            .record(
                AuditEntry::new(Some("staff_1".into()), "approve", "allocation", "alloc_1")
                    .with_meta("notes", "ok"),
            )
            .unwrap();
        audit
            .record(AuditEntry::new(
                Some("user_gone".into()),
                "login",
                "profile",
                "user_gone",
            ))
            .unwrap();

        assert_eq!(audit.anonymize_for_entity("user_gone").unwrap(), 1);

        let tree = store.audit().unwrap();
        for (_, entry) in store.all::<AuditEntry>(&tree).unwrap() {
            if entry.entity_id == "user_gone" {
                assert!(entry.anonymized);
                assert!(entry.metadata.is_empty());
            } else {
                assert!(!entry.anonymized);
            }
        }
    }
}
