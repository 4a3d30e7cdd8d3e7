use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::adjustment::BalanceAdjustment;
use crate::domain::balance::BalanceScope;

type HmacSha256 = Hmac<Sha256>;

/// A `BalanceAdjustment` wrapped with its tamper evidence: per-scope chain
/// version, link to the predecessor's hash, and an HMAC signature over the
/// entry hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainedAdjustment {
    pub adjustment: BalanceAdjustment,
    pub chain_version: u32,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub scope: BalanceScope,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AdjustmentChain {
    signing_key: Vec<u8>,
}

impl AdjustmentChain {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec() }
    }

    /// Wrap the next adjustment for a scope. `prev` is the latest stored
    /// entry for the same scope, if any.
    pub fn extend(
        &self,
        prev: Option<&ChainedAdjustment>,
        adjustment: BalanceAdjustment,
    ) -> ChainedAdjustment {
        let chain_version = prev.map(|entry| entry.chain_version).unwrap_or(0).saturating_add(1);
        let prev_hash = prev.map(|entry| entry.entry_hash.clone());
        let entry_hash = hash_entry_material(&adjustment, chain_version, prev_hash.as_deref());
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        ChainedAdjustment { adjustment, chain_version, prev_hash, entry_hash, signature }
    }

    /// Walk a stored per-scope sequence (ascending chain version) and report
    /// the first break. An empty history verifies vacuously.
    pub fn verify(&self, scope: &BalanceScope, entries: &[ChainedAdjustment]) -> ChainVerification {
        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let entry_id = entry.adjustment.id.0.as_str();

            let expected_version = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.chain_version != expected_version {
                return failure(
                    scope,
                    index,
                    previous_hash,
                    format!(
                        "version mismatch at entry {entry_id}: expected {expected_version}, found {}",
                        entry.chain_version
                    ),
                );
            }

            if entry.adjustment.scope != *scope {
                return failure(
                    scope,
                    index,
                    previous_hash,
                    format!("scope mismatch at entry {entry_id}"),
                );
            }

            if entry.prev_hash != previous_hash {
                return failure(
                    scope,
                    index,
                    previous_hash,
                    format!("previous hash mismatch at entry {entry_id}"),
                );
            }

            let computed_entry_hash =
                hash_entry_material(&entry.adjustment, entry.chain_version, entry.prev_hash.as_deref());
            if computed_entry_hash != entry.entry_hash {
                return failure(
                    scope,
                    index,
                    previous_hash,
                    format!("entry hash mismatch at entry {entry_id}"),
                );
            }

            let expected_signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
            if expected_signature != entry.signature {
                return failure(
                    scope,
                    index,
                    previous_hash,
                    format!("signature mismatch at entry {entry_id}"),
                );
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        ChainVerification {
            scope: scope.clone(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }
}

fn failure(
    scope: &BalanceScope,
    verified_entries: usize,
    latest_hash: Option<String>,
    reason: String,
) -> ChainVerification {
    ChainVerification {
        scope: scope.clone(),
        valid: false,
        verified_entries,
        latest_hash,
        failure_reason: Some(reason),
    }
}

fn hash_entry_material(
    adjustment: &BalanceAdjustment,
    chain_version: u32,
    prev_hash: Option<&str>,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        adjustment.scope.employee_id.0,
        adjustment.scope.leave_type_id.0,
        adjustment.scope.year,
        chain_version,
        content_hash(adjustment),
        prev_hash.unwrap_or(""),
        adjustment.occurred_at.to_rfc3339(),
        adjustment.actor_id.0,
        adjustment.kind.as_str(),
    );
    sha256_hex(material.as_bytes())
}

fn content_hash(adjustment: &BalanceAdjustment) -> String {
    let canonical_payload = match serde_json::to_vec(adjustment) {
        Ok(payload) => payload,
        Err(_) => adjustment.id.0.as_bytes().to_vec(),
    };
    sha256_hex(&canonical_payload)
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::domain::adjustment::{AdjustmentId, AdjustmentKind, BalanceAdjustment};
    use crate::domain::balance::BalanceScope;
    use crate::domain::employee::EmployeeId;
    use crate::domain::leave_type::LeaveTypeId;

    use super::AdjustmentChain;

    fn scope() -> BalanceScope {
        BalanceScope {
            employee_id: EmployeeId("emp-1".to_string()),
            leave_type_id: LeaveTypeId("lt-annual".to_string()),
            year: 2025,
        }
    }

    fn adjustment(id: &str, delta: Decimal) -> BalanceAdjustment {
        BalanceAdjustment {
            id: AdjustmentId(id.to_string()),
            scope: scope(),
            kind: if delta < Decimal::ZERO { AdjustmentKind::Consume } else { AdjustmentKind::Restore },
            days_delta: delta,
            balance_before: Decimal::new(10, 0),
            balance_after: Decimal::new(10, 0) + delta,
            effective_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            actor_id: EmployeeId("mgr-1".to_string()),
            reason: "leave approval".to_string(),
            leave_request_id: None,
            correlation_id: "corr-1".to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn extend_links_previous_hash_chain() {
        let chain = AdjustmentChain::new("secret-key");

        let first = chain.extend(None, adjustment("adj-1", Decimal::new(-3, 0)));
        let second = chain.extend(Some(&first), adjustment("adj-2", Decimal::new(3, 0)));

        assert_eq!(first.chain_version, 1);
        assert_eq!(first.prev_hash, None);
        assert_eq!(second.chain_version, 2);
        assert_eq!(second.prev_hash, Some(first.entry_hash.clone()));
    }

    #[test]
    fn verify_succeeds_for_untampered_entries() {
        let chain = AdjustmentChain::new("secret-key");
        let first = chain.extend(None, adjustment("adj-1", Decimal::new(-3, 0)));
        let second = chain.extend(Some(&first), adjustment("adj-2", Decimal::new(3, 0)));
        let third = chain.extend(Some(&second), adjustment("adj-3", Decimal::new(-1, 0)));

        let result = chain.verify(&scope(), &[first, second, third]);

        assert!(result.valid);
        assert_eq!(result.verified_entries, 3);
        assert!(result.failure_reason.is_none());
        assert!(result.latest_hash.is_some());
    }

    #[test]
    fn verify_detects_tampered_signature() {
        let chain = AdjustmentChain::new("secret-key");
        let first = chain.extend(None, adjustment("adj-1", Decimal::new(-3, 0)));
        let mut second = chain.extend(Some(&first), adjustment("adj-2", Decimal::new(3, 0)));
        second.signature = "tampered-signature".to_string();

        let result = chain.verify(&scope(), &[first, second]);

        assert!(!result.valid);
        assert_eq!(result.verified_entries, 1);
        assert!(result.failure_reason.unwrap_or_default().contains("signature mismatch"));
    }

    #[test]
    fn verify_detects_edited_amounts() {
        let chain = AdjustmentChain::new("secret-key");
        let mut entry = chain.extend(None, adjustment("adj-1", Decimal::new(-3, 0)));
        entry.adjustment.days_delta = Decimal::new(-1, 0);

        let result = chain.verify(&scope(), &[entry]);

        assert!(!result.valid);
        assert!(result.failure_reason.unwrap_or_default().contains("entry hash mismatch"));
    }

    #[test]
    fn verify_detects_deleted_entries() {
        let chain = AdjustmentChain::new("secret-key");
        let first = chain.extend(None, adjustment("adj-1", Decimal::new(-3, 0)));
        let second = chain.extend(Some(&first), adjustment("adj-2", Decimal::new(3, 0)));

        // History with the first entry removed: versions no longer line up.
        let result = chain.verify(&scope(), &[second]);

        assert!(!result.valid);
        assert!(result.failure_reason.unwrap_or_default().contains("version mismatch"));
    }

    #[test]
    fn verify_rejects_foreign_signing_key() {
        let writer = AdjustmentChain::new("secret-key");
        let reader = AdjustmentChain::new("other-key");
        let entry = writer.extend(None, adjustment("adj-1", Decimal::new(-3, 0)));

        let result = reader.verify(&scope(), &[entry]);

        assert!(!result.valid);
        assert!(result.failure_reason.unwrap_or_default().contains("signature mismatch"));
    }

    #[test]
    fn empty_history_verifies_vacuously() {
        let chain = AdjustmentChain::new("secret-key");
        let result = chain.verify(&scope(), &[]);

        assert!(result.valid);
        assert_eq!(result.verified_entries, 0);
        assert!(result.latest_hash.is_none());
    }
}
