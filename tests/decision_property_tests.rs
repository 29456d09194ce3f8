//! Property-based tests for decision state transitions and payload decoding
//!
//! This module uses proptest to verify that the ticket state transitions and
//! the gateway byte normalization behave correctly across a wide range of
//! inputs. The transition logic is critical - bugs here corrupt the decision
//! audit trail - and the four-shape byte decoding is exactly the kind of
//! code where a single encoding slips through manual test selection.

use proptest::prelude::*;
use portal_approval::gateway::WorkflowPayload;
use portal_approval::records::Subscription;
use portal_approval::ticket::{
    ApprovalTicket, DecisionAction, EntityKind, FieldChange, TicketPayload, TicketStatus,
    TimeStamp,
};

// These property tests cover:
//
// 1. Byte-encoding equivalence - all four gateway shapes agree
// 2. Resolution invariants - resolved tickets always carry the decision
// 3. Rollback invariants - compensation always restores a pending ticket
// 4. Serialization correctness - critical for persistence
// 5. Dedup-key stability - the subscription uniqueness constraint
//

/// Strategy to generate an entity kind
fn entity_kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop_oneof![
        Just(EntityKind::Allocation),
        Just(EntityKind::InvestorOnboarding),
        Just(EntityKind::Deal),
        Just(EntityKind::DealInterest),
        Just(EntityKind::DealInterestNda),
        Just(EntityKind::DataRoomAccessExtension),
        Just(EntityKind::DealSubscription),
        Just(EntityKind::Document),
        Just(EntityKind::WireInstruction),
        Just(EntityKind::SaleRequest),
        Just(EntityKind::GdprDeletionRequest),
        Just(EntityKind::ArrangerProfileUpdate),
        Just(EntityKind::MemberInvitation),
    ]
}

/// Strategy to generate a ticket payload
fn payload_strategy() -> impl Strategy<Value = TicketPayload> {
    prop_oneof![
        Just(TicketPayload::None),
        ("[a-z]{1,8}@[a-z]{1,8}\\.com", proptest::option::of("[A-Za-z ]{1,16}")).prop_map(
            |(email, display_name)| TicketPayload::Onboarding {
                email,
                display_name,
            }
        ),
        proptest::option::of("[a-z-]{1,12}")
            .prop_map(|vehicle| TicketPayload::Subscription { vehicle }),
        prop::collection::vec(("[a-z_]{1,10}", "[a-zA-Z0-9 ]{0,20}"), 0..4).prop_map(|changes| {
            TicketPayload::ProfileUpdate {
                changes: changes
                    .into_iter()
                    .map(|(field, value)| FieldChange { field, value })
                    .collect(),
            }
        }),
        "[a-z]{1,8}@[a-z]{1,8}\\.com".prop_map(|email| TicketPayload::Invitation { email }),
    ]
}

fn ticket_strategy() -> impl Strategy<Value = ApprovalTicket> {
    (
        entity_kind_strategy(),
        payload_strategy(),
        "[a-z0-9_]{1,16}",
        proptest::option::of("[a-z0-9_]{1,16}"),
    )
        .prop_map(|(kind, payload, entity_id, requested_by)| {
            ApprovalTicket::new(kind, entity_id, payload, requested_by, None).unwrap()
        })
}

fn action_strategy() -> impl Strategy<Value = DecisionAction> {
    prop_oneof![Just(DecisionAction::Approve), Just(DecisionAction::Reject)]
}

proptest! {
    /// Property: every gateway body shape decodes to the same bytes.
    ///
    /// The upstream contract does not fix the encoding, so any divergence
    /// between the four shapes silently corrupts stored documents.
    #[test]
    fn prop_all_payload_shapes_agree(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        use base64::Engine;

        let latin1: String = bytes.iter().map(|&b| b as char).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let from_text = WorkflowPayload::Text(latin1).into_bytes().unwrap();
        let from_raw = WorkflowPayload::Raw(bytes.clone()).into_bytes().unwrap();
        let from_binary = WorkflowPayload::Binary(bytes.clone()).into_bytes().unwrap();
        let from_base64 = WorkflowPayload::Base64(encoded).into_bytes().unwrap();

        prop_assert_eq!(&from_text, &bytes);
        prop_assert_eq!(&from_raw, &bytes);
        prop_assert_eq!(&from_binary, &bytes);
        prop_assert_eq!(&from_base64, &bytes);
    }

    /// Property: hours_since always matches the independently computed
    /// two-decimal rounding of the elapsed time.
    #[test]
    fn prop_processing_hours_round_to_two_decimals(minutes in 0i64..100_000) {
        let created = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let resolved = created
            .to_datetime_utc()
            .checked_add_signed(chrono::Duration::minutes(minutes))
            .map(TimeStamp::from)
            .unwrap();

        let expected = (minutes as f64 / 60.0 * 100.0).round() / 100.0;
        prop_assert_eq!(resolved.hours_since(&created), expected);
    }

    /// Property: resolving a ticket records the decision exactly once, with
    /// approval timestamps only on approvals and reasons only on rejections.
    #[test]
    fn prop_resolution_invariants(
        ticket in ticket_strategy(),
        action in action_strategy(),
        reason in proptest::option::of("[a-z ]{1,30}"),
    ) {
        let resolved = ticket.resolved(action, "staff_9", None, reason.clone(), TimeStamp::new());

        prop_assert_eq!(resolved.decided_by.as_deref(), Some("staff_9"));
        prop_assert!(resolved.resolved_at.is_some());
        prop_assert!(resolved.actual_processing_time_hours.is_some());
        match action {
            DecisionAction::Approve => {
                prop_assert_eq!(resolved.status, TicketStatus::Approved);
                prop_assert!(resolved.approved_at.is_some());
            }
            DecisionAction::Reject => {
                prop_assert_eq!(resolved.status, TicketStatus::Rejected);
                prop_assert!(resolved.approved_at.is_none());
                prop_assert_eq!(resolved.rejection_reason, reason);
            }
        }
    }

    /// Property: compensation restores a pending ticket whatever the decision
    /// was, clearing every resolution field and keeping the diagnostic note.
    #[test]
    fn prop_rollback_restores_pending(
        ticket in ticket_strategy(),
        action in action_strategy(),
        error_text in "[a-z0-9 ]{1,40}",
    ) {
        let resolved = ticket.resolved(action, "staff_9", None, None, TimeStamp::new());
        let restored = resolved.rolled_back(&error_text, TimeStamp::new());

        prop_assert_eq!(restored.status, TicketStatus::Pending);
        prop_assert!(restored.decided_by.is_none());
        prop_assert!(restored.approved_at.is_none());
        prop_assert!(restored.resolved_at.is_none());
        prop_assert!(restored.actual_processing_time_hours.is_none());
        prop_assert!(restored.rollback_note.unwrap().contains(&error_text));
        prop_assert_eq!(restored.ticket_id, ticket.ticket_id);
    }

    /// Property: tickets round-trip through their storage encoding intact.
    #[test]
    fn prop_ticket_cbor_roundtrip(ticket in ticket_strategy()) {
        let encoded = minicbor::to_vec(&ticket).unwrap();
        let decoded: ApprovalTicket = minicbor::decode(&encoded).unwrap();

        prop_assert_eq!(ticket, decoded);
    }

    /// Property: distinct deal/investor/vehicle combinations map to distinct
    /// uniqueness keys, and identical combinations always collide.
    #[test]
    fn prop_dedup_key_tracks_combination(
        deal_a in "[a-z0-9_]{1,10}", deal_b in "[a-z0-9_]{1,10}",
        investor in "[a-z0-9_]{1,10}",
        vehicle in proptest::option::of("[a-z0-9-]{1,10}"),
    ) {
        let key_a = Subscription::dedup_key(&deal_a, &investor, vehicle.as_deref());
        let key_a2 = Subscription::dedup_key(&deal_a, &investor, vehicle.as_deref());
        let key_b = Subscription::dedup_key(&deal_b, &investor, vehicle.as_deref());

        prop_assert_eq!(&key_a, &key_a2);
        if deal_a != deal_b {
            prop_assert_ne!(&key_a, &key_b);
        }
    }
}
