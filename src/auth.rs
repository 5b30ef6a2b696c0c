use crate::engine::StaffId;
use crate::errors::{LedgerError, LedgerResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Proof that an operator's credential was checked.
///
/// Only a [`CredentialVerifier`] hands these out; every engine mutation takes one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifiedOperator {
    staff_id: StaffId,
}

impl VerifiedOperator {
    pub fn staff_id(&self) -> StaffId {
        self.staff_id
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, staff_id: StaffId, password: &str) -> LedgerResult<VerifiedOperator>;
}

struct Credential {
    salt: [u8; 16],
    digest: [u8; 32],
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// In-memory staff credential table.
#[derive(Default)]
pub struct StaffDirectory {
    credentials: RwLock<HashMap<StaffId, Credential>>,
}

impl StaffDirectory {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn set_password(&self, staff_id: StaffId, password: &str) {
        let salt = *Uuid::new_v4().as_bytes();
        let credential = Credential {
            salt,
            digest: digest(&salt, password),
        };
        self.credentials.write().await.insert(staff_id, credential);
    }

}

#[async_trait]
impl CredentialVerifier for StaffDirectory {
    async fn verify(&self, staff_id: StaffId, password: &str) -> LedgerResult<VerifiedOperator> {
        let credentials = self.credentials.read().await;
        let credential = match credentials.get(&staff_id) {
            Some(c) => c,
            None => {
                warn!(%staff_id, "unknown operator");
                return Err(LedgerError::Unauthorized("Unauthorized".to_string()));
            }
        };
        let candidate = digest(&credential.salt, password);
        if bool::from(candidate.ct_eq(&credential.digest)) {
            Ok(VerifiedOperator { staff_id })
        } else {
            warn!(%staff_id, "operator password rejected");
            Err(LedgerError::Unauthorized("Invalid password".to_string()))
        }
    }
}
