//! Utility functions for id minting and credential generation

use bech32::Bech32m;
use rand::RngCore;
use uuid7::uuid7;

// construct a unique id then encode using bech32. uuid7 payloads keep ids
// sortable by creation time, which the audit log relies on.
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Mint a temporary credential for a freshly provisioned user profile.
/// The profile is flagged must-reset, so this only needs to be unguessable.
pub fn temp_credential() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
