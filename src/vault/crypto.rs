//! AES-256-GCM envelope encryption for stored upstream tokens: a random DEK
//! encrypts the secret, the master KEK encrypts the DEK. Only ciphertexts
//! and nonces ever reach the database.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

/// Ciphertext bundle persisted alongside a credential row.
#[derive(Debug, Clone)]
pub struct SealedSecret {
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub secret_nonce: Vec<u8>,
}

pub struct CredentialCrypto {
    kek: [u8; 32],
}

impl CredentialCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self { kek })
    }

    /// Envelope-encrypt a plaintext token.
    pub fn seal(&self, plaintext: &str) -> anyhow::Result<SealedSecret> {
        let mut dek = [0u8; 32];
        OsRng.fill_bytes(&mut dek);

        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let secret_nonce_bytes = generate_nonce();
        let secret_nonce = Nonce::from_slice(&secret_nonce_bytes);
        let encrypted_secret = secret_cipher
            .encrypt(secret_nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce_bytes = generate_nonce();
        let dek_nonce = Nonce::from_slice(&dek_nonce_bytes);
        let encrypted_dek = kek_cipher
            .encrypt(dek_nonce, dek.as_ref())
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        dek.zeroize();

        Ok(SealedSecret {
            encrypted_dek,
            dek_nonce: dek_nonce_bytes.to_vec(),
            encrypted_secret,
            secret_nonce: secret_nonce_bytes.to_vec(),
        })
    }

    /// Reverse of `seal`.
    pub fn open(&self, sealed: &SealedSecret) -> anyhow::Result<String> {
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let d_nonce = Nonce::from_slice(&sealed.dek_nonce);
        let mut dek_bytes = kek_cipher
            .decrypt(d_nonce, sealed.encrypted_dek.as_ref())
            .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?;

        let secret_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let s_nonce = Nonce::from_slice(&sealed.secret_nonce);
        let plaintext_bytes = secret_cipher
            .decrypt(s_nonce, sealed.encrypted_secret.as_ref())
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        dek_bytes.zeroize();

        Ok(String::from_utf8(plaintext_bytes)?)
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex_key: &str) -> anyhow::Result<[u8; 32]> {
    if hex_key.len() != 64 {
        anyhow::bail!(
            "REPOLENS_ENCRYPTION_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex_key.len()
        );
    }
    let bytes = hex::decode(hex_key)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
