//! Domain records touched by approval handlers
//!
//! Every record is minicbor-encoded into its own sled tree. Money is held in
//! integer minor units and fees in basis points; no floats in currency.
use crate::ticket::TimeStamp;
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum ReviewStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum KycStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Allocation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub investor_id: String,
    #[n(2)]
    pub deal_id: String,
    #[n(3)]
    pub units: u64,
    #[n(4)]
    pub status: ReviewStatus,
    #[n(5)]
    pub decided_by: Option<String>,
    #[n(6)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub decision_reason: Option<String>,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Investor {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub legal_name: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub kyc_status: KycStatus,
    #[n(4)]
    pub user_id: Option<String>,
    #[n(5)]
    pub anonymized: bool,
}

impl Investor {
    /// Erased copy with placeholder identity derived from the record id.
    pub fn erased(&self, tag: &str) -> Self {
        let mut next = self.clone();
        next.legal_name = format!("Erased Investor {tag}");
        next.email = format!("erased-{tag}@anonymized.invalid");
        next.anonymized = true;
        next
    }
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct UserProfile {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub display_name: String,
    #[n(3)]
    pub phone: Option<String>,
    #[n(4)]
    pub credential: String,
    #[n(5)]
    pub must_reset_credential: bool,
    #[n(6)]
    pub active: bool,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

impl UserProfile {
    /// Erased copy: placeholder identity, contact fields cleared, deactivated.
    pub fn erased(&self, tag: &str) -> Self {
        let mut next = self.clone();
        next.email = format!("erased-{tag}@anonymized.invalid");
        next.display_name = format!("Erased User {tag}");
        next.phone = None;
        next.active = false;
        next
    }
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Deal {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub status: ReviewStatus,
    #[n(3)]
    pub default_fee_plan_id: Option<String>,
    // staff user who counter-signs NDAs and agreements for this deal
    #[n(4)]
    pub counter_signer_id: Option<String>,
    #[n(5)]
    pub decided_by: Option<String>,
    #[n(6)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub decision_reason: Option<String>,
}

/// Price point for a deal. Keyed `deal_id/<uuid7 id>` in its tree, so a
/// prefix scan yields price points in creation order.
#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Valuation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub deal_id: String,
    #[n(2)]
    pub price_per_share_minor: u64,
    #[n(3)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct FeePlan {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub management_fee_bps: u32,
    #[n(3)]
    pub performance_fee_bps: u32,
    #[n(4)]
    pub subscription_fee_bps: u32,
    // free text published alongside the plan; may carry an explicit
    // `price_per_share=<decimal>` override
    #[n(5)]
    pub structure_notes: String,
    #[n(6)]
    pub published: bool,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct DealInterest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub investor_id: String,
    #[n(2)]
    pub deal_id: String,
    #[n(3)]
    pub status: ReviewStatus,
    #[n(4)]
    pub decided_by: Option<String>,
    #[n(5)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub nda_document_id: Option<String>,
    #[n(7)]
    pub decision_reason: Option<String>,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SubscriptionSubmission {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub investor_id: String,
    #[n(2)]
    pub deal_id: String,
    #[n(3)]
    pub amount_minor: u64,
    #[n(4)]
    pub vehicle: Option<String>,
    #[n(5)]
    pub introducer_code: Option<String>,
    #[n(6)]
    pub status: ReviewStatus,
    #[n(7)]
    pub decided_by: Option<String>,
    #[n(8)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub decision_reason: Option<String>,
}

/// Formal subscription created on approval. Stored under the composite key
/// `deal_id/investor_id/vehicle`, which is the uniqueness constraint that
/// prevents duplicate rows for the same combination.
#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Subscription {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub submission_id: String,
    #[n(2)]
    pub investor_id: String,
    #[n(3)]
    pub deal_id: String,
    #[n(4)]
    pub vehicle: String,
    #[n(5)]
    pub amount_minor: u64,
    #[n(6)]
    pub share_count: u64,
    #[n(7)]
    pub price_per_share_minor: u64,
    // fee snapshot copied from the published plan at approval time, so
    // later plan edits cannot drift past fee events
    #[n(8)]
    pub fee_plan_id: String,
    #[n(9)]
    pub management_fee_bps: u32,
    #[n(10)]
    pub performance_fee_bps: u32,
    #[n(11)]
    pub subscription_fee_bps: u32,
    #[n(12)]
    pub funding_deadline: TimeStamp<Utc>,
    #[n(13)]
    pub introducer_id: Option<String>,
    #[n(14)]
    pub draft_document_id: Option<String>,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
}

impl Subscription {
    pub fn dedup_key(deal_id: &str, investor_id: &str, vehicle: Option<&str>) -> String {
        format!(
            "{deal_id}/{investor_id}/{}",
            vehicle.unwrap_or("default")
        )
    }
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct DocumentRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    // entity the document belongs to (subscription, deal interest, ...)
    #[n(2)]
    pub linked_entity_id: Option<String>,
    #[n(3)]
    pub content_hash: String,
    #[n(4)]
    pub size_bytes: u64,
    #[n(5)]
    pub draft: bool,
    #[n(6)]
    pub status: ReviewStatus,
    #[n(7)]
    pub decided_by: Option<String>,
    #[n(8)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub decision_reason: Option<String>,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct WireInstruction {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub investor_id: String,
    #[n(2)]
    pub bank_name: String,
    #[n(3)]
    pub account_reference: String,
    #[n(4)]
    pub status: ReviewStatus,
    #[n(5)]
    pub decided_by: Option<String>,
    #[n(6)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub decision_reason: Option<String>,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SaleRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub investor_id: String,
    #[n(2)]
    pub deal_id: String,
    #[n(3)]
    pub units: u64,
    #[n(4)]
    pub status: ReviewStatus,
    #[n(5)]
    pub decided_by: Option<String>,
    #[n(6)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub decision_reason: Option<String>,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct DataRoomAccess {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub deal_id: String,
    #[n(3)]
    pub expires_at: TimeStamp<Utc>,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Introducer {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub code: String,
    #[n(2)]
    pub user_id: String,
    #[n(3)]
    pub active: bool,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ArrangerProfile {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub firm_name: String,
    #[n(3)]
    pub bio: String,
    #[n(4)]
    pub contact_email: String,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum InvitationStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    ReadyForAcceptance,
    #[n(2)]
    Accepted,
    #[n(3)]
    Declined,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct MemberInvitation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub invited_by: Option<String>,
    #[n(3)]
    pub status: InvitationStatus,
    #[n(4)]
    pub expires_at: TimeStamp<Utc>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum SignerRole {
    #[n(0)]
    Investor,
    #[n(1)]
    CounterSigner,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum SignatureStatus {
    #[n(0)]
    Requested,
    #[n(1)]
    Signed,
    #[n(2)]
    Declined,
}

/// One side of a countersigned document. Approving a deal interest creates
/// a paired investor/counter-signer set for the generated NDA.
#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SignatureRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub document_id: String,
    #[n(2)]
    pub deal_interest_id: String,
    #[n(3)]
    pub signer_role: SignerRole,
    #[n(4)]
    pub signer_id: String,
    #[n(5)]
    pub status: SignatureStatus,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_dedup_key_is_stable_per_combination() {
        let a = Subscription::dedup_key("deal_1", "inv_1", Some("feeder-lp"));
        let b = Subscription::dedup_key("deal_1", "inv_1", Some("feeder-lp"));
        let c = Subscription::dedup_key("deal_1", "inv_1", None);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(c, "deal_1/inv_1/default");
    }

    #[test]
    fn profile_anonymization_clears_contact_fields() {
        let profile = UserProfile {
            id: "user_1".into(),
            email: "alex@example.com".into(),
            display_name: "Alex Example".into(),
            phone: Some("+44 20 0000 0000".into()),
            credential: "secret".into(),
            must_reset_credential: false,
            active: true,
            created_at: TimeStamp::new(),
        };

        let erased = profile.erased("ab12cd34");

        assert_eq!(erased.email, "erased-ab12cd34@anonymized.invalid");
        assert_eq!(erased.display_name, "Erased User ab12cd34");
        assert!(erased.phone.is_none());
        assert!(!erased.active);
        // id and creation time survive so foreign keys stay resolvable
        assert_eq!(erased.id, profile.id);
    }
}
