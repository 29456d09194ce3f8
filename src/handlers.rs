//! Entity handler dispatch
//!
//! One approval arm and one rejection arm per [`EntityKind`]. The match is
//! exhaustive, so a new kind will not compile until both arms exist. Core
//! domain-status mutations propagate errors (the coordinator rolls the
//! ticket back); ancillary orchestration such as document generation and
//! transactional email is wrapped and downgraded to warnings.
use crate::audit::{AuditEntry, AuditLog, Notifications};
use crate::gateway::{
    WF_INVITATION_EMAIL, WF_NDA_DOCUMENT, WF_SUBSCRIPTION_AGREEMENT, WorkflowGateway,
    WorkflowRequest, looks_like_docx,
};
use crate::records::{
    Allocation, ArrangerProfile, DataRoomAccess, Deal, DealInterest, DocumentRecord, FeePlan,
    Introducer, Investor, InvitationStatus, KycStatus, MemberInvitation, ReviewStatus,
    SaleRequest, SignatureRequest, SignatureStatus, SignerRole, Subscription,
    SubscriptionSubmission, UserProfile, Valuation, WireInstruction,
};
use crate::store::Store;
use crate::ticket::{ApprovalTicket, EntityKind, TicketPayload, TimeStamp};
use crate::utils;
use anyhow::{Context, bail, ensure};
use tracing::{info, warn};

/// What a handler hands back to the coordinator on success.
pub struct HandlerOutcome {
    pub notification: Option<NotificationDraft>,
}

#[derive(Debug)]
pub struct NotificationDraft {
    pub title: String,
    pub message: String,
    pub kind: String,
}

impl HandlerOutcome {
    pub(crate) fn with_note(title: &str, message: String) -> Self {
        Self {
            notification: Some(NotificationDraft {
                title: title.to_string(),
                message,
                kind: "approval_decision".to_string(),
            }),
        }
    }
    pub(crate) fn silent() -> Self {
        Self { notification: None }
    }
}

/// Whether a failed approval of this kind may be compensated by resetting
/// the ticket to pending. Erasure cannot be undone, so a reset would lie
/// about the state of the world; the coordinator escalates instead.
pub fn compensatable(kind: EntityKind) -> bool {
    !matches!(kind, EntityKind::GdprDeletionRequest)
}

pub fn approve_entity(
    store: &Store,
    gateway: &dyn WorkflowGateway,
    audit: &AuditLog,
    notifications: &Notifications,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    match ticket.entity_kind {
        EntityKind::Allocation => approve_allocation(store, ticket, actor),
        EntityKind::InvestorOnboarding => approve_investor_onboarding(store, ticket, actor),
        EntityKind::Deal => approve_deal(store, ticket, actor),
        EntityKind::DealInterest | EntityKind::DealInterestNda => {
            approve_deal_interest(store, gateway, ticket, actor)
        }
        EntityKind::DataRoomAccessExtension => approve_access_extension(store, ticket),
        EntityKind::DealSubscription => approve_deal_subscription(store, gateway, ticket, actor),
        EntityKind::Document => approve_document(store, ticket, actor),
        EntityKind::WireInstruction => approve_wire_instruction(store, ticket, actor),
        EntityKind::SaleRequest => approve_sale_request(store, ticket, actor),
        EntityKind::GdprDeletionRequest => {
            approve_gdpr_deletion(store, audit, notifications, ticket, actor)
        }
        EntityKind::ArrangerProfileUpdate => approve_profile_update(store, ticket),
        EntityKind::MemberInvitation => approve_member_invitation(store, gateway, ticket, actor),
    }
}

/// Rejection fan-out. Status-flip-plus-reason only; the coordinator treats
/// every error from here as best-effort because the ticket transition has
/// already committed.
pub fn reject_entity(
    store: &Store,
    ticket: &ApprovalTicket,
    actor: &str,
    reason: Option<&str>,
) -> anyhow::Result<HandlerOutcome> {
    let now = TimeStamp::new();
    let reason_text = reason.unwrap_or("no reason given").to_string();
    match ticket.entity_kind {
        EntityKind::Allocation => {
            let tree = store.allocations()?;
            let mut alloc: Allocation = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("allocation {} not found", ticket.entity_id))?;
            alloc.status = ReviewStatus::Rejected;
            alloc.decided_by = Some(actor.to_string());
            alloc.decided_at = Some(now);
            alloc.decision_reason = reason.map(str::to_string);
            store.put(&tree, &ticket.entity_id, &alloc)?;
            Ok(HandlerOutcome::with_note(
                "Allocation rejected",
                format!("Your allocation request was rejected: {reason_text}"),
            ))
        }
        EntityKind::InvestorOnboarding => {
            let tree = store.investors()?;
            let mut investor: Investor = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("investor {} not found", ticket.entity_id))?;
            investor.kyc_status = KycStatus::Rejected;
            store.put(&tree, &ticket.entity_id, &investor)?;
            Ok(HandlerOutcome::with_note(
                "Onboarding rejected",
                format!("Your KYC submission was rejected: {reason_text}"),
            ))
        }
        EntityKind::Deal => {
            let tree = store.deals()?;
            let mut deal: Deal = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("deal {} not found", ticket.entity_id))?;
            deal.status = ReviewStatus::Rejected;
            deal.decided_by = Some(actor.to_string());
            deal.decided_at = Some(now);
            deal.decision_reason = reason.map(str::to_string);
            store.put(&tree, &ticket.entity_id, &deal)?;
            Ok(HandlerOutcome::silent())
        }
        EntityKind::DealInterest | EntityKind::DealInterestNda => {
            let tree = store.deal_interests()?;
            let mut interest: DealInterest = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("deal interest {} not found", ticket.entity_id))?;
            interest.status = ReviewStatus::Rejected;
            interest.decided_by = Some(actor.to_string());
            interest.decided_at = Some(now);
            interest.decision_reason = reason.map(str::to_string);
            store.put(&tree, &ticket.entity_id, &interest)?;
            Ok(HandlerOutcome::with_note(
                "Deal interest rejected",
                format!("Your interest registration was rejected: {reason_text}"),
            ))
        }
        // the access row keeps its current expiry; nothing to flip
        EntityKind::DataRoomAccessExtension => Ok(HandlerOutcome::with_note(
            "Access extension rejected",
            format!("Your data room access extension was declined: {reason_text}"),
        )),
        EntityKind::DealSubscription => {
            let tree = store.submissions()?;
            let mut submission: SubscriptionSubmission = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("submission {} not found", ticket.entity_id))?;
            submission.status = ReviewStatus::Rejected;
            submission.decided_by = Some(actor.to_string());
            submission.decided_at = Some(now);
            submission.decision_reason = reason.map(str::to_string);
            store.put(&tree, &ticket.entity_id, &submission)?;
            Ok(HandlerOutcome::with_note(
                "Subscription rejected",
                format!("Your subscription request was rejected: {reason_text}"),
            ))
        }
        EntityKind::Document => {
            let tree = store.documents()?;
            let mut doc: DocumentRecord = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("document {} not found", ticket.entity_id))?;
            doc.status = ReviewStatus::Rejected;
            doc.decided_by = Some(actor.to_string());
            doc.decided_at = Some(now);
            doc.decision_reason = reason.map(str::to_string);
            store.put(&tree, &ticket.entity_id, &doc)?;
            Ok(HandlerOutcome::silent())
        }
        EntityKind::WireInstruction => {
            let tree = store.wire_instructions()?;
            let mut wire: WireInstruction = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("wire instruction {} not found", ticket.entity_id))?;
            wire.status = ReviewStatus::Rejected;
            wire.decided_by = Some(actor.to_string());
            wire.decided_at = Some(now);
            wire.decision_reason = reason.map(str::to_string);
            store.put(&tree, &ticket.entity_id, &wire)?;
            Ok(HandlerOutcome::with_note(
                "Wire instruction rejected",
                format!("Your wire instruction could not be verified: {reason_text}"),
            ))
        }
        EntityKind::SaleRequest => {
            let tree = store.sale_requests()?;
            let mut sale: SaleRequest = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("sale request {} not found", ticket.entity_id))?;
            sale.status = ReviewStatus::Rejected;
            sale.decided_by = Some(actor.to_string());
            sale.decided_at = Some(now);
            sale.decision_reason = reason.map(str::to_string);
            store.put(&tree, &ticket.entity_id, &sale)?;
            Ok(HandlerOutcome::with_note(
                "Sale request rejected",
                format!("Your sale request was rejected: {reason_text}"),
            ))
        }
        // denial leaves the account untouched
        EntityKind::GdprDeletionRequest => Ok(HandlerOutcome::with_note(
            "Erasure request declined",
            format!("Your erasure request was declined: {reason_text}"),
        )),
        // requested changes are simply not applied
        EntityKind::ArrangerProfileUpdate => Ok(HandlerOutcome::with_note(
            "Profile update rejected",
            format!("Your requested profile changes were rejected: {reason_text}"),
        )),
        EntityKind::MemberInvitation => {
            let tree = store.invitations()?;
            let mut invite: MemberInvitation = store
                .get(&tree, &ticket.entity_id)?
                .with_context(|| format!("invitation {} not found", ticket.entity_id))?;
            invite.status = InvitationStatus::Declined;
            store.put(&tree, &ticket.entity_id, &invite)?;
            Ok(HandlerOutcome::with_note(
                "Invitation declined",
                format!("The invitation for {} was declined: {reason_text}", invite.email),
            ))
        }
    }
}

fn approve_allocation(
    store: &Store,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.allocations()?;
    let mut alloc: Allocation = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("allocation {} not found", ticket.entity_id))?;

    alloc.status = ReviewStatus::Approved;
    alloc.decided_by = Some(actor.to_string());
    alloc.decided_at = Some(TimeStamp::new());
    store.put(&tree, &ticket.entity_id, &alloc)?;

    Ok(HandlerOutcome::with_note(
        "Allocation approved",
        format!("Your allocation of {} units was approved.", alloc.units),
    ))
}

fn approve_deal(
    store: &Store,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.deals()?;
    let mut deal: Deal = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("deal {} not found", ticket.entity_id))?;

    deal.status = ReviewStatus::Approved;
    deal.decided_by = Some(actor.to_string());
    deal.decided_at = Some(TimeStamp::new());
    store.put(&tree, &ticket.entity_id, &deal)?;

    Ok(HandlerOutcome::with_note(
        "Deal approved",
        format!("The deal \"{}\" was approved for listing.", deal.name),
    ))
}

fn approve_document(
    store: &Store,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.documents()?;
    let mut doc: DocumentRecord = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("document {} not found", ticket.entity_id))?;

    doc.status = ReviewStatus::Approved;
    doc.draft = false;
    doc.decided_by = Some(actor.to_string());
    doc.decided_at = Some(TimeStamp::new());
    store.put(&tree, &ticket.entity_id, &doc)?;

    Ok(HandlerOutcome::with_note(
        "Document approved",
        format!("The document \"{}\" was approved.", doc.name),
    ))
}

fn approve_wire_instruction(
    store: &Store,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.wire_instructions()?;
    let mut wire: WireInstruction = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("wire instruction {} not found", ticket.entity_id))?;

    wire.status = ReviewStatus::Approved;
    wire.decided_by = Some(actor.to_string());
    wire.decided_at = Some(TimeStamp::new());
    store.put(&tree, &ticket.entity_id, &wire)?;

    Ok(HandlerOutcome::with_note(
        "Wire instruction verified",
        format!("Your wire instruction for {} was verified.", wire.bank_name),
    ))
}

fn approve_sale_request(
    store: &Store,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.sale_requests()?;
    let mut sale: SaleRequest = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("sale request {} not found", ticket.entity_id))?;

    sale.status = ReviewStatus::Approved;
    sale.decided_by = Some(actor.to_string());
    sale.decided_at = Some(TimeStamp::new());
    store.put(&tree, &ticket.entity_id, &sale)?;

    Ok(HandlerOutcome::with_note(
        "Sale request approved",
        format!("Your sale of {} units was approved.", sale.units),
    ))
}

fn approve_investor_onboarding(
    store: &Store,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.investors()?;
    let mut investor: Investor = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("investor {} not found", ticket.entity_id))?;

    investor.kyc_status = KycStatus::Approved;

    // the prospective login email rides on the ticket; fall back to the
    // investor's contact email when the upstream flow did not set one
    let (email, display_name) = match &ticket.payload {
        TicketPayload::Onboarding {
            email,
            display_name,
        } => (
            email.clone(),
            display_name.clone().unwrap_or_else(|| investor.legal_name.clone()),
        ),
        _ => (investor.email.clone(), investor.legal_name.clone()),
    };

    if investor.user_id.is_none() {
        let profiles = store.profiles()?;
        let existing = store
            .all::<UserProfile>(&profiles)?
            .into_iter()
            .find(|(_, p)| p.email == email);

        let profile_id = match existing {
            Some((_, profile)) => profile.id,
            None => {
                let profile = UserProfile {
                    id: utils::new_uuid_to_bech32("user_")?,
                    email,
                    display_name,
                    phone: None,
                    credential: utils::temp_credential(),
                    must_reset_credential: true,
                    active: true,
                    created_at: TimeStamp::new(),
                };
                store.put(&profiles, &profile.id, &profile)?;
                info!(profile = %profile.id, investor = %investor.id, "provisioned portal profile");
                profile.id
            }
        };
        investor.user_id = Some(profile_id);
    }

    store.put(&tree, &ticket.entity_id, &investor)?;
    info!(investor = %investor.id, approved_by = actor, "kyc onboarding approved");

    Ok(HandlerOutcome::with_note(
        "Onboarding approved",
        "Your KYC onboarding was approved. Portal access is ready.".to_string(),
    ))
}

fn approve_access_extension(
    store: &Store,
    ticket: &ApprovalTicket,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.data_room_access()?;
    let mut access: DataRoomAccess = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("data room access {} not found", ticket.entity_id))?;

    // relative to the stored deadline, never to now: a delayed approval must
    // not shorten access the requester already holds
    access.expires_at = access.expires_at.plus_days(7);
    store.put(&tree, &ticket.entity_id, &access)?;

    Ok(HandlerOutcome::with_note(
        "Access extended",
        "Your data room access was extended by 7 days.".to_string(),
    ))
}

fn approve_deal_subscription(
    store: &Store,
    gateway: &dyn WorkflowGateway,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let submissions = store.submissions()?;
    let mut submission: SubscriptionSubmission = store
        .get(&submissions, &ticket.entity_id)?
        .with_context(|| format!("subscription submission {} not found", ticket.entity_id))?;

    submission.status = ReviewStatus::Approved;
    submission.decided_by = Some(actor.to_string());
    submission.decided_at = Some(TimeStamp::new());
    store.put(&submissions, &ticket.entity_id, &submission)?;

    let deals = store.deals()?;
    let deal: Deal = store
        .get(&deals, &submission.deal_id)?
        .with_context(|| format!("deal {} not found", submission.deal_id))?;

    let fee_plan = resolve_fee_plan(store, &deal)?;
    let price_per_share_minor = resolve_price_per_share(store, &deal, &fee_plan)?;
    ensure!(
        price_per_share_minor > 0,
        "deal {} resolves to a zero price per share",
        deal.id
    );

    let vehicle = match &ticket.payload {
        TicketPayload::Subscription { vehicle } => vehicle.clone(),
        _ => None,
    }
    .or_else(|| submission.vehicle.clone());

    let now = TimeStamp::new();
    let candidate = Subscription {
        id: utils::new_uuid_to_bech32("sub_")?,
        submission_id: submission.id.clone(),
        investor_id: submission.investor_id.clone(),
        deal_id: submission.deal_id.clone(),
        vehicle: vehicle.clone().unwrap_or_else(|| "default".to_string()),
        amount_minor: submission.amount_minor,
        share_count: submission.amount_minor / price_per_share_minor,
        price_per_share_minor,
        fee_plan_id: fee_plan.id.clone(),
        management_fee_bps: fee_plan.management_fee_bps,
        performance_fee_bps: fee_plan.performance_fee_bps,
        subscription_fee_bps: fee_plan.subscription_fee_bps,
        funding_deadline: now.plus_days(14),
        introducer_id: resolve_introducer(store, submission.introducer_code.as_deref())?,
        draft_document_id: None,
        created_at: now,
    };

    let subscriptions = store.subscriptions()?;
    let key = Subscription::dedup_key(
        &submission.deal_id,
        &submission.investor_id,
        vehicle.as_deref(),
    );
    let subscription = match store.insert_unique(&subscriptions, &key, minicbor::to_vec(&candidate)?)? {
        None => {
            // fresh row; agreement generation is ancillary and must not
            // unwind the decision
            if let Err(err) =
                generate_subscription_agreement(store, gateway, &subscriptions, &key, &candidate, actor)
            {
                warn!(
                    subscription = %candidate.id,
                    error = %err,
                    "subscription agreement generation degraded"
                );
            }
            candidate
        }
        Some(existing) => {
            let existing: Subscription = minicbor::decode(&existing)?;
            info!(
                subscription = %existing.id,
                "subscription already exists for this combination, reusing"
            );
            existing
        }
    };

    Ok(HandlerOutcome::with_note(
        "Subscription approved",
        format!(
            "Your subscription to \"{}\" was approved ({} shares).",
            deal.name, subscription.share_count
        ),
    ))
}

fn resolve_fee_plan(store: &Store, deal: &Deal) -> anyhow::Result<FeePlan> {
    let plan_id = deal
        .default_fee_plan_id
        .as_deref()
        .with_context(|| format!("deal {} has no default fee plan", deal.id))?;
    let tree = store.fee_plans()?;
    let plan: FeePlan = store
        .get(&tree, plan_id)?
        .with_context(|| format!("fee plan {plan_id} not found"))?;
    ensure!(plan.published, "fee plan {} is not published", plan.id);
    Ok(plan)
}

/// An explicit `price_per_share=<decimal>` token in the published structure
/// notes wins; otherwise the deal's latest valuation sets the price.
fn resolve_price_per_share(store: &Store, deal: &Deal, plan: &FeePlan) -> anyhow::Result<u64> {
    if let Some(minor) = parse_price_per_share(&plan.structure_notes) {
        return Ok(minor);
    }
    let tree = store.valuations()?;
    let latest: Option<Valuation> = store.last_in_prefix(&tree, &format!("{}/", deal.id))?;
    let valuation = latest.with_context(|| {
        format!(
            "deal {} has no valuation and fee plan {} carries no explicit price",
            deal.id, plan.id
        )
    })?;
    Ok(valuation.price_per_share_minor)
}

/// Parse a `price_per_share=12.50` token into minor units. Fractions beyond
/// two places are truncated.
fn parse_price_per_share(notes: &str) -> Option<u64> {
    let start = notes.find("price_per_share=")? + "price_per_share=".len();
    let token: String = notes[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = token.splitn(2, '.');
    let whole: u64 = parts.next()?.parse().ok()?;
    let cents = match parts.next() {
        None | Some("") => 0,
        Some(frac) if frac.len() == 1 => frac.parse::<u64>().ok()? * 10,
        Some(frac) => frac.get(..2)?.parse::<u64>().ok()?,
    };
    Some(whole * 100 + cents)
}

fn resolve_introducer(store: &Store, code: Option<&str>) -> anyhow::Result<Option<String>> {
    let Some(code) = code else {
        return Ok(None);
    };
    let tree = store.introducers()?;
    let hit = store
        .all::<Introducer>(&tree)?
        .into_iter()
        .find(|(_, intro)| intro.code == code && intro.active);
    if hit.is_none() {
        // not worth failing an approval over
        warn!(code, "introducer code did not resolve");
    }
    Ok(hit.map(|(_, intro)| intro.id))
}

fn generate_subscription_agreement(
    store: &Store,
    gateway: &dyn WorkflowGateway,
    subscriptions: &sled::Tree,
    key: &str,
    subscription: &Subscription,
    actor: &str,
) -> anyhow::Result<()> {
    let outcome = gateway.trigger(WorkflowRequest {
        workflow_key: WF_SUBSCRIPTION_AGREEMENT.to_string(),
        entity_kind: EntityKind::DealSubscription.as_str().to_string(),
        entity_id: subscription.id.clone(),
        user_id: Some(actor.to_string()),
        payload: vec![
            ("deal_id".to_string(), subscription.deal_id.clone()),
            ("investor_id".to_string(), subscription.investor_id.clone()),
            ("share_count".to_string(), subscription.share_count.to_string()),
        ],
    })?;

    let body = outcome
        .body
        .context("agreement workflow returned no document body")?;
    let bytes = body.into_bytes()?;
    ensure!(
        looks_like_docx(&bytes),
        "generated agreement failed the DOCX signature check"
    );

    let document = register_document(
        store,
        format!("subscription-agreement-{}.docx", subscription.id),
        Some(subscription.id.clone()),
        bytes,
    )?;

    let mut updated = subscription.clone();
    updated.draft_document_id = Some(document.id);
    store.put(subscriptions, key, &updated)?;
    Ok(())
}

/// Persist generated bytes and register the draft document record.
fn register_document(
    store: &Store,
    name: String,
    linked_entity_id: Option<String>,
    bytes: Vec<u8>,
) -> anyhow::Result<DocumentRecord> {
    let documents = store.documents()?;
    let blobs = store.document_blobs()?;

    let id = utils::new_uuid_to_bech32("doc_")?;
    let record = DocumentRecord {
        id: id.clone(),
        name,
        linked_entity_id,
        content_hash: sha256::digest(bytes.as_slice()),
        size_bytes: bytes.len() as u64,
        draft: true,
        status: ReviewStatus::Pending,
        decided_by: None,
        decided_at: None,
        created_at: TimeStamp::new(),
        decision_reason: None,
    };
    blobs.insert(id.as_bytes(), bytes)?;
    store.put(&documents, &id, &record)?;
    Ok(record)
}

fn approve_deal_interest(
    store: &Store,
    gateway: &dyn WorkflowGateway,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.deal_interests()?;
    let mut interest: DealInterest = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("deal interest {} not found", ticket.entity_id))?;

    interest.status = ReviewStatus::Approved;
    interest.decided_by = Some(actor.to_string());
    interest.decided_at = Some(TimeStamp::new());
    store.put(&tree, &ticket.entity_id, &interest)?;

    if let Err(err) = generate_nda(store, gateway, &tree, &mut interest, ticket.entity_kind, actor) {
        warn!(interest = %interest.id, error = %err, "nda generation degraded");
    }

    Ok(HandlerOutcome::with_note(
        "Deal interest approved",
        "Your interest was approved. The NDA will follow for signature.".to_string(),
    ))
}

fn generate_nda(
    store: &Store,
    gateway: &dyn WorkflowGateway,
    interests: &sled::Tree,
    interest: &mut DealInterest,
    kind: EntityKind,
    actor: &str,
) -> anyhow::Result<()> {
    let deals = store.deals()?;
    let deal: Deal = store
        .get(&deals, &interest.deal_id)?
        .with_context(|| format!("deal {} not found", interest.deal_id))?;
    let counter_signer = deal
        .counter_signer_id
        .with_context(|| format!("deal {} has no counter-signer configured", deal.id))?;

    let outcome = gateway.trigger(WorkflowRequest {
        workflow_key: WF_NDA_DOCUMENT.to_string(),
        entity_kind: kind.as_str().to_string(),
        entity_id: interest.id.clone(),
        user_id: Some(actor.to_string()),
        payload: vec![
            ("deal_id".to_string(), interest.deal_id.clone()),
            ("investor_id".to_string(), interest.investor_id.clone()),
        ],
    })?;

    // no generated file is a legitimate response: some deals run without a
    // counter-signed NDA
    let Some(body) = outcome.body else {
        return Ok(());
    };
    let bytes = body.into_bytes()?;
    ensure!(looks_like_docx(&bytes), "generated NDA failed the DOCX signature check");

    let document = register_document(
        store,
        format!("nda-{}.docx", interest.id),
        Some(interest.id.clone()),
        bytes,
    )?;

    interest.nda_document_id = Some(document.id.clone());
    store.put(interests, &interest.id, interest)?;

    // paired signature records: investor side and counter-signer side
    create_signature_request(store, &document.id, &interest.id, SignerRole::Investor, &interest.investor_id)?;
    create_signature_request(store, &document.id, &interest.id, SignerRole::CounterSigner, &counter_signer)?;
    Ok(())
}

fn create_signature_request(
    store: &Store,
    document_id: &str,
    deal_interest_id: &str,
    signer_role: SignerRole,
    signer_id: &str,
) -> anyhow::Result<SignatureRequest> {
    let tree = store.signature_requests()?;
    let request = SignatureRequest {
        id: utils::new_uuid_to_bech32("sig_")?,
        document_id: document_id.to_string(),
        deal_interest_id: deal_interest_id.to_string(),
        signer_role,
        signer_id: signer_id.to_string(),
        status: SignatureStatus::Requested,
        created_at: TimeStamp::new(),
    };
    store.put(&tree, &request.id, &request)?;
    Ok(request)
}

/// Right-to-erasure. Irreversible by nature, so this arm absorbs its own
/// partial failures instead of asking for a rollback that cannot exist, and
/// reports completion under a distinct audit action.
fn approve_gdpr_deletion(
    store: &Store,
    audit: &AuditLog,
    notifications: &Notifications,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let subject_id = ticket.entity_id.as_str();
    // deterministic placeholder tag so reruns produce identical records
    let tag = &sha256::digest(subject_id.as_bytes())[..12];

    match store.profiles().and_then(|tree| {
        store
            .get::<UserProfile>(&tree, subject_id)
            .map(|profile| (tree, profile))
    }) {
        Ok((tree, Some(profile))) => {
            let erased = profile.erased(tag);
            if let Err(err) = store.put(&tree, subject_id, &erased) {
                warn!(subject = subject_id, error = %err, "profile anonymization write failed");
            }
        }
        Ok((_, None)) => warn!(subject = subject_id, "no profile record, erasing linked data only"),
        Err(err) => warn!(subject = subject_id, error = %err, "profile load failed during erasure"),
    }

    match store.investors() {
        Ok(tree) => match store.all::<Investor>(&tree) {
            Ok(investors) => {
                for (key, investor) in investors {
                    if investor.user_id.as_deref() == Some(subject_id) && !investor.anonymized {
                        if let Err(err) = store.put(&tree, &key, &investor.erased(tag)) {
                            warn!(investor = %investor.id, error = %err, "investor anonymization write failed");
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "investor scan failed during erasure"),
        },
        Err(err) => warn!(error = %err, "investor tree unavailable during erasure"),
    }

    if let Err(err) = notifications.purge_for_user(subject_id) {
        warn!(subject = subject_id, error = %err, "notification purge failed");
    }
    if let Err(err) = audit.anonymize_for_entity(subject_id) {
        warn!(subject = subject_id, error = %err, "audit anonymization failed");
    }

    audit.record_best_effort(AuditEntry::new(
        Some(actor.to_string()),
        "gdpr_erasure_completed",
        "profile",
        subject_id,
    ));

    // the account is gone; there is nobody left to notify
    Ok(HandlerOutcome::silent())
}

fn approve_profile_update(store: &Store, ticket: &ApprovalTicket) -> anyhow::Result<HandlerOutcome> {
    let tree = store.arranger_profiles()?;
    let mut profile: ArrangerProfile = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("arranger profile {} not found", ticket.entity_id))?;

    let TicketPayload::ProfileUpdate { changes } = &ticket.payload else {
        bail!("profile-update ticket carries no field changes");
    };

    for change in changes {
        match change.field.as_str() {
            "firm_name" => profile.firm_name = change.value.clone(),
            "bio" => profile.bio = change.value.clone(),
            "contact_email" => profile.contact_email = change.value.clone(),
            other => warn!(field = other, "ignoring unknown profile field"),
        }
    }
    store.put(&tree, &ticket.entity_id, &profile)?;

    Ok(HandlerOutcome::with_note(
        "Profile update approved",
        "Your requested profile changes have been applied.".to_string(),
    ))
}

fn approve_member_invitation(
    store: &Store,
    gateway: &dyn WorkflowGateway,
    ticket: &ApprovalTicket,
    actor: &str,
) -> anyhow::Result<HandlerOutcome> {
    let tree = store.invitations()?;
    let mut invite: MemberInvitation = store
        .get(&tree, &ticket.entity_id)?
        .with_context(|| format!("invitation {} not found", ticket.entity_id))?;

    invite.status = InvitationStatus::ReadyForAcceptance;
    invite.expires_at = TimeStamp::new().plus_days(14);
    store.put(&tree, &ticket.entity_id, &invite)?;

    let email = match &ticket.payload {
        TicketPayload::Invitation { email } => email.clone(),
        _ => invite.email.clone(),
    };

    // deliverability is not this decision's problem
    if let Err(err) = gateway.trigger(WorkflowRequest {
        workflow_key: WF_INVITATION_EMAIL.to_string(),
        entity_kind: EntityKind::MemberInvitation.as_str().to_string(),
        entity_id: invite.id.clone(),
        user_id: Some(actor.to_string()),
        payload: vec![("email".to_string(), email)],
    }) {
        warn!(invitation = %invite.id, error = %err, "invitation email degraded");
    }

    Ok(HandlerOutcome::with_note(
        "Invitation approved",
        format!("The invitation for {} is ready for acceptance.", invite.email),
    ))
}
