//! Workflow trigger gateway seam
//!
//! The external job runner is reached through the [`WorkflowGateway`] trait.
//! Its response body arrives in one of four wire shapes depending on the
//! upstream workflow version; normalization into plain bytes happens here,
//! at the adapter boundary, so handlers only ever see `Vec<u8>`.
use anyhow::bail;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub const WF_SUBSCRIPTION_AGREEMENT: &str = "subscription_agreement";
pub const WF_NDA_DOCUMENT: &str = "nda_document";
pub const WF_INVITATION_EMAIL: &str = "invitation_email";

/// ZIP local-file header; DOCX containers start with it.
pub const DOCX_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

pub fn looks_like_docx(bytes: &[u8]) -> bool {
    bytes.starts_with(&DOCX_MAGIC)
}

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub workflow_key: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub user_id: Option<String>,
    pub payload: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct WorkflowOutcome {
    pub run_id: Option<String>,
    pub body: Option<WorkflowPayload>,
}

/// The four tolerated response-body encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowPayload {
    /// Body bytes smuggled through a latin1-decoded string, one char per byte.
    Text(String),
    /// `{raw: ...}` byte field.
    Raw(Vec<u8>),
    /// `{binary: [...]}` byte array field.
    Binary(Vec<u8>),
    /// `{data: "<base64>"}` field.
    Base64(String),
}

impl WorkflowPayload {
    /// Normalize to the underlying bytes. Fails on a latin1 string carrying
    /// code points above 0xFF or on malformed base64; nothing downstream
    /// should ever have to reason about the wire shape.
    pub fn into_bytes(self) -> anyhow::Result<Vec<u8>> {
        match self {
            WorkflowPayload::Text(text) => {
                let mut bytes = Vec::with_capacity(text.len());
                for ch in text.chars() {
                    let cp = ch as u32;
                    if cp > 0xFF {
                        bail!("workflow body is not latin1: code point U+{cp:04X}");
                    }
                    bytes.push(cp as u8);
                }
                Ok(bytes)
            }
            WorkflowPayload::Raw(bytes) | WorkflowPayload::Binary(bytes) => Ok(bytes),
            WorkflowPayload::Base64(data) => Ok(STANDARD.decode(data.trim())?),
        }
    }
}

pub trait WorkflowGateway: Send + Sync {
    fn trigger(&self, request: WorkflowRequest) -> anyhow::Result<WorkflowOutcome>;
}

/// Gateway that acknowledges every trigger without producing a body. Used in
/// deployments without an external job runner and in tests that do not care
/// about document generation.
pub struct NoopGateway;

impl WorkflowGateway for NoopGateway {
    fn trigger(&self, _request: WorkflowRequest) -> anyhow::Result<WorkflowOutcome> {
        Ok(WorkflowOutcome {
            run_id: None,
            body: None,
        })
    }
}
