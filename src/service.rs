//! Service layer API for approval decision processing
use crate::audit::{AuditEntry, AuditLog, Notifications};
use crate::error::ApprovalError;
use crate::gateway::WorkflowGateway;
use crate::handlers::{self, HandlerOutcome, NotificationDraft};
use crate::store::Store;
use crate::ticket::{ApprovalTicket, DecisionAction, EntityKind, TicketPayload, TimeStamp};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Wire-level decision request. The action arrives as a string and is
/// validated before any state is touched.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub action: String,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
}

/// Authenticated staff user. Capability checks happen upstream; the engine
/// only records who decided.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
}

/// Successful decision result.
#[derive(Debug)]
pub struct Decision {
    pub ticket: ApprovalTicket,
    pub message: String,
    pub notification: Option<NotificationDraft>,
}

pub struct ApprovalService {
    store: Store,
    gateway: Box<dyn WorkflowGateway>,
    audit: AuditLog,
    notifications: Notifications,
}

impl ApprovalService {
    pub fn new(db: Arc<sled::Db>, gateway: Box<dyn WorkflowGateway>) -> Self {
        let store = Store::new(db);
        Self {
            audit: AuditLog::new(store.clone()),
            notifications: Notifications::new(store.clone()),
            store,
            gateway,
        }
    }

    /// Storage handle for upstream flows that seed the domain records the
    /// handlers operate on.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a pending ticket. Called by the request-submission flows.
    pub fn submit_ticket(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        payload: TicketPayload,
        requested_by: Option<String>,
        notes: Option<String>,
    ) -> anyhow::Result<ApprovalTicket> {
        let ticket = ApprovalTicket::new(
            entity_kind,
            entity_id.to_string(),
            payload,
            requested_by,
            notes,
        )?;
        let tickets = self.store.tickets()?;
        self.store.put(&tickets, &ticket.ticket_id, &ticket)?;
        Ok(ticket)
    }

    pub fn ticket(&self, ticket_id: &str) -> Result<Option<ApprovalTicket>, ApprovalError> {
        let tickets = self.store.tickets()?;
        self.store.get(&tickets, ticket_id)
    }

    /// Apply a staff decision to a pending ticket.
    ///
    /// The pending → resolved transition commits through a single
    /// compare-and-swap on the ticket bytes; that swap is the only guard
    /// against concurrent decisions. Approval fan-out runs after the swap,
    /// and a failing handler triggers a compensating swap back to pending.
    pub fn decide(
        &self,
        ticket_id: &str,
        request: DecisionRequest,
        actor: &Actor,
    ) -> Result<Decision, ApprovalError> {
        let action = DecisionAction::parse(&request.action)?;

        let tickets = self.store.tickets()?;
        let old_bytes = self
            .store
            .raw(&tickets, ticket_id)?
            .ok_or_else(|| ApprovalError::NotFound(ticket_id.to_string()))?;
        let ticket: ApprovalTicket = minicbor::decode(&old_bytes)?;

        // convenience pre-check; the CAS below is the authoritative guard
        if !ticket.is_pending() {
            return Err(ApprovalError::AlreadyProcessed(ticket_id.to_string()));
        }

        let resolved = ticket.resolved(
            action,
            &actor.user_id,
            request.notes,
            request.rejection_reason,
            TimeStamp::new(),
        );
        let resolved_bytes = minicbor::to_vec(&resolved)?;
        if !self
            .store
            .cas_bytes(&tickets, ticket_id, &old_bytes, resolved_bytes.clone())?
        {
            return Err(ApprovalError::Conflict(ticket_id.to_string()));
        }

        let outcome = match action {
            DecisionAction::Approve => {
                match handlers::approve_entity(
                    &self.store,
                    self.gateway.as_ref(),
                    &self.audit,
                    &self.notifications,
                    &resolved,
                    &actor.user_id,
                ) {
                    Ok(outcome) => outcome,
                    Err(handler_err) => {
                        return Err(self.unwind_failed_approval(
                            &tickets,
                            &resolved,
                            &resolved_bytes,
                            handler_err,
                            actor,
                        ));
                    }
                }
            }
            DecisionAction::Reject => {
                // the transition has committed; rejection side effects are
                // deliberately best-effort
                match handlers::reject_entity(
                    &self.store,
                    &resolved,
                    &actor.user_id,
                    resolved.rejection_reason.as_deref(),
                ) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(ticket = ticket_id, error = %err, "rejection side effects degraded");
                        HandlerOutcome::silent()
                    }
                }
            }
        };

        let mut entry = AuditEntry::new(
            Some(actor.user_id.clone()),
            action.as_str(),
            resolved.entity_kind.as_str(),
            &resolved.entity_id,
        )
        .with_meta("ticket_id", ticket_id);
        if let Some(notes) = &resolved.notes {
            entry = entry.with_meta("notes", notes);
        }
        if let Some(reason) = &resolved.rejection_reason {
            entry = entry.with_meta("rejection_reason", reason);
        }
        self.audit.record_best_effort(entry);

        if let Some(requester) = &resolved.requested_by {
            match &outcome.notification {
                Some(draft) => self.notifications.push_best_effort(
                    requester,
                    &draft.title,
                    &draft.message,
                    &draft.kind,
                ),
                None => self.notifications.push_best_effort(
                    requester,
                    "Request resolved",
                    &format!("Your request was {}.", past_tense(action)),
                    "approval_decision",
                ),
            }
        }

        info!(
            ticket = ticket_id,
            action = action.as_str(),
            entity = resolved.entity_kind.as_str(),
            "decision applied"
        );

        Ok(Decision {
            message: format!("Ticket {ticket_id} {}", past_tense(action)),
            ticket: resolved,
            notification: outcome.notification,
        })
    }

    /// Stamp `deleted_at` on a ticket. Unrelated to the decision state
    /// machine; resolved and pending tickets alike can be soft-deleted.
    pub fn soft_delete(&self, ticket_id: &str, actor: &Actor) -> anyhow::Result<ApprovalTicket> {
        let tickets = self.store.tickets()?;
        let mut ticket: ApprovalTicket = self
            .store
            .get(&tickets, ticket_id)?
            .ok_or_else(|| ApprovalError::NotFound(ticket_id.to_string()))?;

        let now = TimeStamp::new();
        ticket.deleted_at = Some(now.clone());
        ticket.updated_at = now;
        self.store.put(&tickets, ticket_id, &ticket)?;

        self.audit.record_best_effort(
            AuditEntry::new(
                Some(actor.user_id.clone()),
                "soft_delete",
                "approval_ticket",
                ticket_id,
            ),
        );
        Ok(ticket)
    }

    /// Map a failed approval handler into the right error class, attempting
    /// the compensating update where the entity kind allows one.
    fn unwind_failed_approval(
        &self,
        tickets: &sled::Tree,
        resolved: &ApprovalTicket,
        resolved_bytes: &[u8],
        handler_err: anyhow::Error,
        actor: &Actor,
    ) -> ApprovalError {
        let ticket_id = resolved.ticket_id.clone();
        let handler_error = format!("{handler_err:#}");

        if !handlers::compensatable(resolved.entity_kind) {
            // resetting to pending after irreversible side effects would
            // misstate the world; escalate to an operator instead
            let rollback_error =
                "entity changes are irreversible, no rollback attempted".to_string();
            let rollback_error = self.record_critical_surfaced(
                self.critical_entry(actor, resolved, &handler_error, &rollback_error),
                rollback_error,
            );
            error!(
                ticket = %ticket_id,
                handler_error = %handler_error,
                "approval of non-compensatable entity failed"
            );
            return ApprovalError::RollbackFailed {
                ticket_id,
                handler_error,
                rollback_error,
            };
        }

        match self.rollback_after_failure(tickets, resolved, resolved_bytes, &handler_error) {
            Ok(()) => {
                self.audit.record_best_effort(
                    AuditEntry::new(
                        Some(actor.user_id.clone()),
                        "approval_rolled_back",
                        resolved.entity_kind.as_str(),
                        &resolved.entity_id,
                    )
                    .with_meta("ticket_id", &ticket_id)
                    .with_meta("handler_error", &handler_error),
                );
                warn!(ticket = %ticket_id, handler_error = %handler_error, "approval rolled back");
                ApprovalError::HandlerFailed {
                    ticket_id,
                    message: handler_error,
                }
            }
            Err(rollback_error) => {
                error!(
                    ticket = %ticket_id,
                    handler_error = %handler_error,
                    rollback_error = %rollback_error,
                    "approval rollback failed, manual intervention required"
                );
                let rollback_error = self.record_critical_surfaced(
                    self.critical_entry(actor, resolved, &handler_error, &rollback_error),
                    rollback_error,
                );
                ApprovalError::RollbackFailed {
                    ticket_id,
                    handler_error,
                    rollback_error,
                }
            }
        }
    }

    /// Compensating swap back to pending, guarded by the resolved bytes the
    /// decision just wrote. Any other writer in between means the ticket
    /// state can no longer be reasoned about here.
    pub(crate) fn rollback_after_failure(
        &self,
        tickets: &sled::Tree,
        resolved: &ApprovalTicket,
        resolved_bytes: &[u8],
        handler_error: &str,
    ) -> Result<(), String> {
        let pending = resolved.rolled_back(handler_error, TimeStamp::new());
        let pending_bytes = minicbor::to_vec(&pending).map_err(|e| e.to_string())?;
        match self
            .store
            .cas_bytes(tickets, &resolved.ticket_id, resolved_bytes, pending_bytes)
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                Err("ticket bytes changed mid-decision, compensating update rejected".to_string())
            }
            Err(err) => Err(err.to_string()),
        }
    }

    fn critical_entry(
        &self,
        actor: &Actor,
        resolved: &ApprovalTicket,
        handler_error: &str,
        rollback_error: &str,
    ) -> AuditEntry {
        AuditEntry::new(
            Some(actor.user_id.clone()),
            "approval_rollback_failed",
            resolved.entity_kind.as_str(),
            &resolved.entity_id,
        )
        .critical()
        .with_meta("ticket_id", &resolved.ticket_id)
        .with_meta("handler_error", handler_error)
        .with_meta("rollback_error", rollback_error)
    }

    /// The critical entry is the one audit write whose failure must reach
    /// the caller; fold it into the rollback error text when it cannot be
    /// persisted.
    fn record_critical_surfaced(&self, entry: AuditEntry, rollback_error: String) -> String {
        match self.audit.record(entry) {
            Ok(()) => rollback_error,
            Err(audit_err) => {
                format!("{rollback_error}; critical audit write also failed: {audit_err}")
            }
        }
    }
}

fn past_tense(action: DecisionAction) -> &'static str {
    match action {
        DecisionAction::Approve => "approved",
        DecisionAction::Reject => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::NoopGateway;
    use tempfile::tempdir;

    fn open_service() -> (tempfile::TempDir, ApprovalService) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("service_test.db")).unwrap();
        (
            dir,
            ApprovalService::new(Arc::new(db), Box::new(NoopGateway)),
        )
    }

    fn staff() -> Actor {
        Actor {
            user_id: "staff_1".to_string(),
        }
    }

    /// Drive a ticket to approved through the public path, handing back the
    /// committed resolved bytes the rollback guard expects.
    fn resolve_manually(service: &ApprovalService, ticket: &ApprovalTicket) -> (ApprovalTicket, Vec<u8>) {
        let tickets = service.store.tickets().unwrap();
        let old = service.store.raw(&tickets, &ticket.ticket_id).unwrap().unwrap();
        let resolved = ticket.resolved(
            DecisionAction::Approve,
            "staff_1",
            None,
            None,
            TimeStamp::new(),
        );
        let resolved_bytes = minicbor::to_vec(&resolved).unwrap();
        assert!(
            service
                .store
                .cas_bytes(&tickets, &ticket.ticket_id, &old, resolved_bytes.clone())
                .unwrap()
        );
        (resolved, resolved_bytes)
    }

    #[test]
    fn rollback_succeeds_against_untouched_resolved_bytes() {
        let (_dir, service) = open_service();
        let ticket = service
            .submit_ticket(EntityKind::Allocation, "alloc_x", TicketPayload::None, None, None)
            .unwrap();
        let (resolved, resolved_bytes) = resolve_manually(&service, &ticket);

        let tickets = service.store.tickets().unwrap();
        service
            .rollback_after_failure(&tickets, &resolved, &resolved_bytes, "boom")
            .unwrap();

        let restored = service.ticket(&ticket.ticket_id).unwrap().unwrap();
        assert!(restored.is_pending());
        assert!(restored.rollback_note.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn rollback_reports_failure_when_ticket_bytes_were_tampered() {
        let (_dir, service) = open_service();
        let ticket = service
            .submit_ticket(EntityKind::Allocation, "alloc_x", TicketPayload::None, None, None)
            .unwrap();
        let (resolved, resolved_bytes) = resolve_manually(&service, &ticket);

        // another writer rewrites the row mid-decision
        let tickets = service.store.tickets().unwrap();
        tickets
            .insert(ticket.ticket_id.as_bytes(), b"tampered".as_slice())
            .unwrap();

        let err = service
            .rollback_after_failure(&tickets, &resolved, &resolved_bytes, "boom")
            .unwrap_err();
        assert!(err.contains("compensating update rejected"));
    }

    #[test]
    fn non_compensatable_failure_maps_to_rollback_failed() {
        let (_dir, service) = open_service();
        let ticket = service
            .submit_ticket(
                EntityKind::GdprDeletionRequest,
                "user_gone",
                TicketPayload::None,
                None,
                None,
            )
            .unwrap();
        let (resolved, resolved_bytes) = resolve_manually(&service, &ticket);

        let tickets = service.store.tickets().unwrap();
        let err = service.unwind_failed_approval(
            &tickets,
            &resolved,
            &resolved_bytes,
            anyhow::anyhow!("partial erasure fault"),
            &staff(),
        );

        match err {
            ApprovalError::RollbackFailed {
                handler_error,
                rollback_error,
                ..
            } => {
                assert!(handler_error.contains("partial erasure fault"));
                assert!(rollback_error.contains("irreversible"));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    #[test]
    fn compensatable_failure_maps_to_handler_failed_and_restores_pending() {
        let (_dir, service) = open_service();
        let ticket = service
            .submit_ticket(EntityKind::Allocation, "alloc_x", TicketPayload::None, None, None)
            .unwrap();
        let (resolved, resolved_bytes) = resolve_manually(&service, &ticket);

        let tickets = service.store.tickets().unwrap();
        let err = service.unwind_failed_approval(
            &tickets,
            &resolved,
            &resolved_bytes,
            anyhow::anyhow!("allocation row missing"),
            &staff(),
        );

        assert!(matches!(err, ApprovalError::HandlerFailed { .. }));
        assert!(err.is_retryable());
        let restored = service.ticket(&ticket.ticket_id).unwrap().unwrap();
        assert!(restored.is_pending());
    }
}
