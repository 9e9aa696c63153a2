//! Utility functions for identifier encoding and credential hashing

use bech32::{Bech32m, Hrp};
use uuid7::uuid7;

use crate::error::{Result, StoreError};

// render raw identifier bytes as bech32m under the given human readable prefix
pub fn encode_id(hrp: &str, bytes: &[u8]) -> anyhow::Result<String> {
    let hrp = Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, bytes)?;
    Ok(encode)
}

/// Parses a bech32 identifier and checks it carries the expected prefix.
pub fn decode_id(hrp: &str, encoded: &str) -> Result<[u8; 16]> {
    let invalid = || StoreError::InvalidInput(format!("'{encoded}' is not a valid {hrp} id"));

    let expected = Hrp::parse(hrp).map_err(|_| invalid())?;
    let (found, data) = bech32::decode(encoded).map_err(|_| invalid())?;
    if found != expected {
        return Err(invalid());
    }

    data.try_into().map_err(|_| invalid())
}

/// Salted SHA-256 of a plain text credential, stored as `salt$digest`.
pub fn hash_credential(plain: &str) -> String {
    let salt = hex::encode(uuid7().as_bytes());
    let digest = sha256::digest(format!("{salt}{plain}"));
    format!("{salt}${digest}")
}

pub fn verify_credential(hashed: &str, plain: &str) -> bool {
    match hashed.split_once('$') {
        Some((salt, digest)) => sha256::digest(format!("{salt}{plain}")) == digest,
        None => false,
    }
}

// unique on-disk file name for an uploaded image, keeping the original name readable
pub fn unique_file_name(file_name: &str) -> String {
    format!("{}_{}", hex::encode(uuid7().as_bytes()), file_name)
}
