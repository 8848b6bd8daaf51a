//! Agent identity: a name and the address derived from its seed

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write;

pub const ADDRESS_PREFIX: &str = "agent1q";

/// Public identity peers use to reach this agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentIdentity {
    pub name: String,
    pub address: String,
}

impl AgentIdentity {
    /// Derive the identity; without a seed the name is used, so the address stays stable
    pub fn new(name: impl Into<String>, seed: Option<&str>) -> Self {
        let name = name.into();
        let address = derive_address(seed.unwrap_or(&name));
        Self { name, address }
    }
}

/// `agent1q` followed by the hex SHA-256 of the seed
pub fn derive_address(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut address = String::with_capacity(ADDRESS_PREFIX.len() + digest.len() * 2);
    address.push_str(ADDRESS_PREFIX);
    for byte in digest.iter() {
        let _ = write!(address, "{byte:02x}");
    }
    address
}
