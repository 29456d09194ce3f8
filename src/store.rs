//! Typed sled layer over the portal's tables
//!
//! One named tree per logical table, CBOR-encoded records. The ticket
//! compare-and-swap in here is the engine's only concurrency guard; sled
//! makes it atomic at the storage layer.
use crate::error::ApprovalError;
use sled::IVec;
use std::sync::Arc;

#[derive(Clone)]
pub struct Store {
    db: Arc<sled::Db>,
}

impl Store {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, ApprovalError> {
        Ok(self.db.open_tree(name)?)
    }

    pub fn tickets(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("tickets")
    }
    pub fn allocations(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("allocations")
    }
    pub fn investors(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("investors")
    }
    pub fn profiles(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("profiles")
    }
    pub fn deals(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("deals")
    }
    pub fn valuations(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("valuations")
    }
    pub fn fee_plans(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("fee_plans")
    }
    pub fn deal_interests(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("deal_interests")
    }
    pub fn submissions(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("subscription_submissions")
    }
    pub fn subscriptions(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("subscriptions")
    }
    pub fn documents(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("documents")
    }
    pub fn document_blobs(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("document_blobs")
    }
    pub fn wire_instructions(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("wire_instructions")
    }
    pub fn sale_requests(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("sale_requests")
    }
    pub fn data_room_access(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("data_room_access")
    }
    pub fn introducers(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("introducers")
    }
    pub fn arranger_profiles(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("arranger_profiles")
    }
    pub fn invitations(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("member_invitations")
    }
    pub fn signature_requests(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("signature_requests")
    }
    pub fn notifications(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("notifications")
    }
    pub fn audit(&self) -> Result<sled::Tree, ApprovalError> {
        self.tree("audit_log")
    }

    /// Decode a record by key.
    pub fn get<T>(&self, tree: &sled::Tree, key: &str) -> Result<Option<T>, ApprovalError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and unconditionally write a record.
    pub fn put<T>(&self, tree: &sled::Tree, key: &str, value: &T) -> Result<(), ApprovalError>
    where
        T: minicbor::Encode<()>,
    {
        tree.insert(key.as_bytes(), minicbor::to_vec(value)?)?;
        Ok(())
    }

    pub fn raw(&self, tree: &sled::Tree, key: &str) -> Result<Option<IVec>, ApprovalError> {
        Ok(tree.get(key.as_bytes())?)
    }

    /// Conditional swap of a record's bytes. Returns false when the guard
    /// bytes no longer match, meaning a concurrent writer won the race.
    pub fn cas_bytes(
        &self,
        tree: &sled::Tree,
        key: &str,
        old: &[u8],
        new: Vec<u8>,
    ) -> Result<bool, ApprovalError> {
        match tree.compare_and_swap(key.as_bytes(), Some(old), Some(new))? {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Insert-if-absent. Returns the bytes already under the key when another
    /// writer holds it, so the caller can reuse the existing row instead of
    /// duplicating it.
    pub fn insert_unique(
        &self,
        tree: &sled::Tree,
        key: &str,
        value: Vec<u8>,
    ) -> Result<Option<IVec>, ApprovalError> {
        match tree.compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))? {
            Ok(()) => Ok(None),
            Err(race) => Ok(race.current),
        }
    }

    /// Latest record under a key prefix. Keys embed uuid7 ids, so the last
    /// prefix hit is the most recently created record.
    pub fn last_in_prefix<T>(
        &self,
        tree: &sled::Tree,
        prefix: &str,
    ) -> Result<Option<T>, ApprovalError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.scan_prefix(prefix.as_bytes()).last() {
            Some(item) => {
                let (_, bytes) = item?;
                Ok(Some(minicbor::decode(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Decode every record in a tree along with its key. Tables scanned this
    /// way (introducers, a user's notifications) are small.
    pub fn all<T>(&self, tree: &sled::Tree) -> Result<Vec<(String, T)>, ApprovalError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (key, bytes) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            out.push((key, minicbor::decode(&bytes)?));
        }
        Ok(out)
    }
}
