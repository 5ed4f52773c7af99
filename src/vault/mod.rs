pub mod crypto;
pub mod github;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::KeyIdentity;
use crate::errors::AppError;
use crate::store::{CredentialRecord, KeyStatus, NewCredential, Store};

use crypto::{CredentialCrypto, SealedSecret};

/// Custody of upstream-provider tokens. Secrets are sealed before they touch
/// the store and opened only on demand (private-repo cloning).
pub struct CredentialVault {
    crypto: CredentialCrypto,
    store: Arc<dyn Store>,
}

impl CredentialVault {
    pub fn new(master_key_hex: &str, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        Ok(Self {
            crypto: CredentialCrypto::new(master_key_hex)?,
            store,
        })
    }

    /// Seal and persist a validated token.
    pub async fn store_token(
        &self,
        owner_email: &str,
        provider: &str,
        label: &str,
        plaintext: &str,
        granted_scopes: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<CredentialRecord, AppError> {
        let sealed = self.crypto.seal(plaintext)?;

        let record = self
            .store
            .insert_credential(NewCredential {
                owner_email: owner_email.to_string(),
                provider: provider.to_string(),
                label: label.to_string(),
                encrypted_dek: sealed.encrypted_dek,
                dek_nonce: sealed.dek_nonce,
                encrypted_secret: sealed.encrypted_secret,
                secret_nonce: sealed.secret_nonce,
                granted_scopes,
                expires_at,
            })
            .await?;

        Ok(record)
    }

    /// Decrypt a stored token for immediate use. Refuses revoked or expired
    /// credentials.
    pub async fn reveal(&self, id: Uuid) -> Result<String, AppError> {
        let cred = self
            .store
            .credential_by_id(id)
            .await?
            .ok_or(AppError::NotFound("credential"))?;

        if cred.status != KeyStatus::Active {
            return Err(AppError::Forbidden("credential revoked".to_string()));
        }
        if cred.expires_at < Utc::now() {
            return Err(AppError::InvalidArgument("credential expired".to_string()));
        }

        let sealed = SealedSecret {
            encrypted_dek: cred.encrypted_dek,
            dek_nonce: cred.dek_nonce,
            encrypted_secret: cred.encrypted_secret,
            secret_nonce: cred.secret_nonce,
        };

        Ok(self.crypto.open(&sealed)?)
    }

    /// Ownership-checked soft revocation. A second call is a no-op.
    pub async fn revoke(&self, id: Uuid, caller: &KeyIdentity) -> Result<(), AppError> {
        let cred = self
            .store
            .credential_by_id(id)
            .await?
            .ok_or(AppError::NotFound("credential"))?;

        if cred.owner_email != caller.owner_email {
            return Err(AppError::Forbidden(
                "You are not allowed to revoke this credential".to_string(),
            ));
        }

        self.store.revoke_credential_if_active(id).await?;
        Ok(())
    }
}
