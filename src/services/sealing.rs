// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sealing of OAuth tokens at rest.
//!
//! AES-256-GCM with a key derived from `TOKEN_SEALING_KEY`. The account key
//! is bound as additional authenticated data, so a token sealed for one
//! account cannot be opened for another.

use crate::error::AppError;
use crate::models::{StoredTokens, TokenState};
use crate::time_utils::format_utc_rfc3339_millis;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

const HKDF_SALT: &[u8] = b"saxo-portfolio/token-sealing/v1";
const HKDF_INFO: &[u8] = b"aes-256-gcm";

/// Token sealing service.
#[derive(Clone)]
pub struct TokenSealer {
    key: [u8; 32],
    rng: SystemRandom,
}

impl TokenSealer {
    /// Derive the sealing key from a configured secret.
    pub fn new(secret: &str) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::Config("token sealing key is empty".into()));
        }
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HKDF expand failed: {}", e)))?;
        Ok(Self {
            key,
            rng: SystemRandom::new(),
        })
    }

    fn cipher(&self) -> Result<LessSafeKey, AppError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create key: {:?}", e)))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Seal plaintext. Output is base64(nonce || ciphertext || tag).
    pub fn seal(&self, plaintext: &str, aad: &str) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Nonce generation failed: {:?}", e)))?;

        let mut data = plaintext.as_bytes().to_vec();
        self.cipher()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_bytes()),
                &mut data,
            )
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Sealing failed: {:?}", e)))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(data);
        Ok(BASE64.encode(combined))
    }

    /// Open a value produced by [`seal`](Self::seal) with the same AAD.
    pub fn open(&self, sealed_b64: &str, aad: &str) -> Result<String, AppError> {
        let combined = BASE64
            .decode(sealed_b64)
            .map_err(|e| AppError::Storage(format!("Sealed token is not base64: {}", e)))?;
        if combined.len() < NONCE_LEN {
            return Err(AppError::Storage("Sealed token too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| AppError::Storage("Invalid nonce".into()))?;

        let mut data = ciphertext.to_vec();
        let plaintext = self
            .cipher()?
            .open_in_place(nonce, Aad::from(aad.as_bytes()), &mut data)
            .map_err(|_| {
                AppError::Storage("Token unsealing failed (wrong key or account)".into())
            })?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| AppError::Storage(format!("UTF-8 decode failed: {}", e)))
    }

    /// Seal a token state for persistence under `account_key`.
    pub fn seal_tokens(&self, tokens: &TokenState, account_key: &str) -> Result<StoredTokens, AppError> {
        let aad = aad_for(account_key);
        Ok(StoredTokens {
            access_token_sealed: self.seal(&tokens.access_token, &aad)?,
            refresh_token_sealed: self.seal(&tokens.refresh_token, &aad)?,
            token_type: Some(tokens.token_type.clone()),
            issued_at: format_utc_rfc3339_millis(tokens.issued_at),
            access_expires_at: format_utc_rfc3339_millis(tokens.access_expires_at),
            refresh_expires_at: format_utc_rfc3339_millis(tokens.refresh_expires_at),
        })
    }

    /// Inverse of [`seal_tokens`](Self::seal_tokens).
    pub fn open_tokens(&self, stored: &StoredTokens, account_key: &str) -> Result<TokenState, AppError> {
        let aad = aad_for(account_key);
        Ok(TokenState {
            access_token: self.open(&stored.access_token_sealed, &aad)?,
            refresh_token: self.open(&stored.refresh_token_sealed, &aad)?,
            token_type: stored
                .token_type
                .clone()
                .unwrap_or_else(|| "Bearer".to_string()),
            issued_at: parse_time(&stored.issued_at)?,
            access_expires_at: parse_time(&stored.access_expires_at)?,
            refresh_expires_at: parse_time(&stored.refresh_expires_at)?,
        })
    }
}

fn aad_for(account_key: &str) -> String {
    format!("account:{}", account_key)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Storage(format!("Failed to parse timestamp {:?}: {}", raw, e)))
}
