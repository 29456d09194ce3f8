//! Approval tickets and the decision state machine
use crate::error::ApprovalError;
use crate::utils;
use chrono::{DateTime, Duration, TimeZone, Utc};

/// The decision a reviewer takes on a pending ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    /// Parse the wire-level action string. Anything but the two known
    /// actions is rejected before any state is touched.
    pub fn parse(action: &str) -> Result<Self, ApprovalError> {
        match action {
            "approve" => Ok(DecisionAction::Approve),
            "reject" => Ok(DecisionAction::Reject),
            other => Err(ApprovalError::InvalidInput(other.to_string())),
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Approve => "approve",
            DecisionAction::Reject => "reject",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum TicketStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

/// Closed set of entities a ticket can concern. Handler dispatch matches on
/// this exhaustively, so a new variant will not compile until it has both an
/// approval and a rejection arm.
#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum EntityKind {
    #[n(0)]
    Allocation,
    #[n(1)]
    InvestorOnboarding,
    #[n(2)]
    Deal,
    #[n(3)]
    DealInterest,
    #[n(4)]
    DealInterestNda,
    #[n(5)]
    DataRoomAccessExtension,
    #[n(6)]
    DealSubscription,
    #[n(7)]
    Document,
    #[n(8)]
    WireInstruction,
    #[n(9)]
    SaleRequest,
    #[n(10)]
    GdprDeletionRequest,
    #[n(11)]
    ArrangerProfileUpdate,
    #[n(12)]
    MemberInvitation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Allocation => "allocation",
            EntityKind::InvestorOnboarding => "investor_onboarding",
            EntityKind::Deal => "deal",
            EntityKind::DealInterest => "deal_interest",
            EntityKind::DealInterestNda => "deal_interest_nda",
            EntityKind::DataRoomAccessExtension => "data_room_access_extension",
            EntityKind::DealSubscription => "deal_subscription",
            EntityKind::Document => "document",
            EntityKind::WireInstruction => "wire_instruction",
            EntityKind::SaleRequest => "sale_request",
            EntityKind::GdprDeletionRequest => "gdpr_deletion_request",
            EntityKind::ArrangerProfileUpdate => "arranger_profile_update",
            EntityKind::MemberInvitation => "member_invitation",
        }
    }
}

/// Handler-specific context carried by a ticket, discriminated per entity
/// kind so handlers read typed fields instead of a free-form metadata bag.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub enum TicketPayload {
    #[n(0)]
    None,
    #[n(1)]
    Onboarding {
        #[n(0)]
        email: String,
        #[n(1)]
        display_name: Option<String>,
    },
    #[n(2)]
    Subscription {
        #[n(0)]
        vehicle: Option<String>,
    },
    #[n(3)]
    ProfileUpdate {
        #[n(0)]
        changes: Vec<FieldChange>,
    },
    #[n(4)]
    Invitation {
        #[n(0)]
        email: String,
    },
}

/// One requested field edit for a profile-update ticket.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct FieldChange {
    #[n(0)]
    pub field: String,
    #[n(1)]
    pub value: String,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalTicket {
    #[n(0)]
    pub ticket_id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub entity_kind: EntityKind,
    #[n(2)]
    pub entity_id: String,
    #[n(3)]
    pub payload: TicketPayload,
    #[n(4)]
    pub status: TicketStatus,
    #[n(5)]
    pub requested_by: Option<String>,
    #[n(6)]
    pub notes: Option<String>,
    #[n(7)]
    pub rejection_reason: Option<String>,
    #[n(8)]
    pub rollback_note: Option<String>,
    #[n(9)]
    pub decided_by: Option<String>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub updated_at: TimeStamp<Utc>,
    #[n(12)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub resolved_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub deleted_at: Option<TimeStamp<Utc>>,
    #[n(15)]
    pub actual_processing_time_hours: Option<f64>,
}

impl ApprovalTicket {
    /// Create a pending ticket. Upstream request-submission flows are the
    /// only legitimate caller besides tests.
    pub fn new(
        entity_kind: EntityKind,
        entity_id: String,
        payload: TicketPayload,
        requested_by: Option<String>,
        notes: Option<String>,
    ) -> anyhow::Result<Self> {
        let now = TimeStamp::new();
        Ok(Self {
            ticket_id: utils::new_uuid_to_bech32("tkt_")?,
            entity_kind,
            entity_id,
            payload,
            status: TicketStatus::Pending,
            requested_by,
            notes,
            rejection_reason: None,
            rollback_note: None,
            decided_by: None,
            created_at: now.clone(),
            updated_at: now,
            approved_at: None,
            resolved_at: None,
            deleted_at: None,
            actual_processing_time_hours: None,
        })
    }

    /// The resolved copy of this ticket for the given decision. The caller
    /// commits it with a compare-and-swap against the pending bytes.
    pub fn resolved(
        &self,
        action: DecisionAction,
        actor: &str,
        notes: Option<String>,
        rejection_reason: Option<String>,
        now: TimeStamp<Utc>,
    ) -> Self {
        let mut next = self.clone();
        next.status = match action {
            DecisionAction::Approve => TicketStatus::Approved,
            DecisionAction::Reject => TicketStatus::Rejected,
        };
        next.decided_by = Some(actor.to_string());
        if let Some(notes) = notes {
            next.notes = Some(notes);
        }
        if action == DecisionAction::Reject {
            next.rejection_reason = rejection_reason;
        }
        if action == DecisionAction::Approve {
            next.approved_at = Some(now.clone());
        }
        next.resolved_at = Some(now.clone());
        next.actual_processing_time_hours = Some(now.hours_since(&self.created_at));
        next.updated_at = now;
        next
    }

    /// Compensating copy: back to pending with actor and resolution fields
    /// cleared and a diagnostic note recording why the approval was undone.
    pub fn rolled_back(&self, handler_error: &str, now: TimeStamp<Utc>) -> Self {
        let mut next = self.clone();
        next.status = TicketStatus::Pending;
        next.decided_by = None;
        next.approved_at = None;
        next.resolved_at = None;
        next.actual_processing_time_hours = None;
        next.rollback_note = Some(format!("approval rolled back: {handler_error}"));
        next.updated_at = now;
        next
    }

    pub fn is_pending(&self) -> bool {
        self.status == TicketStatus::Pending
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }
    /// Whole-and-fractional hours elapsed since `earlier`, rounded to two
    /// decimals. Resolution-time metric for every decided ticket.
    pub fn hours_since(&self, earlier: &Self) -> f64 {
        let secs = (self.0 - earlier.0).num_seconds() as f64;
        (secs / 3600.0 * 100.0).round() / 100.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
