//! Salted commitments over (content, round).
//!
//! `commit` draws a fresh salt for every call and embeds it, together with
//! the cost parameters, in a PHC string. `verify` reads both back out of the
//! supplied string; it never generates a salt of its own. Commitments that
//! are not Argon2id, or whose costs exceed the configured ceilings, are
//! refused without hashing.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::RngCore;

use crate::config::FingerprintSettings;
use crate::log_warn;

const ENABLE_LOGS: bool = true;

const SALT_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct Fingerprinter {
    settings: FingerprintSettings,
}

/// Length-prefixed so no (content, round) pair can collide with another.
fn committed_input(content: &str, round: u64) -> String {
    format!("{}:{content}:{round}", content.len())
}

impl Fingerprinter {
    pub fn new(settings: FingerprintSettings) -> Self {
        Self { settings }
    }

    pub fn commit(&self, content: &str, round: u64) -> Result<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| anyhow!("argon2 salt: {err}"))?;

        let params = Params::new(
            self.settings.memory_kib,
            self.settings.iterations,
            self.settings.parallelism,
            None,
        )
        .map_err(|err| anyhow!("argon2 params: {err}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let hash = argon2
            .hash_password(committed_input(content, round).as_bytes(), &salt)
            .map_err(|err| anyhow!("argon2 hash: {err}"))?;
        Ok(hash.to_string())
    }

    /// False for any mismatch, including a commitment string that does not
    /// parse or that asks for more work than the ceilings allow.
    pub fn verify(&self, content: &str, round: u64, commitment: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(commitment) else {
            return false;
        };
        if !self.within_ceilings(&parsed) {
            return false;
        }
        Argon2::default()
            .verify_password(committed_input(content, round).as_bytes(), &parsed)
            .is_ok()
    }

    fn within_ceilings(&self, parsed: &PasswordHash<'_>) -> bool {
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            log_warn!("Refusing commitment using {}", parsed.algorithm);
            return false;
        }
        let Ok(params) = Params::try_from(parsed) else {
            return false;
        };

        let settings = &self.settings;
        if params.m_cost() > settings.max_memory_kib
            || params.t_cost() > settings.max_iterations
            || params.p_cost() > settings.max_parallelism
        {
            log_warn!(
                "Refusing commitment with m={} t={} p={}: above verification ceiling",
                params.m_cost(),
                params.t_cost(),
                params.p_cost()
            );
            return false;
        }
        true
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(FingerprintSettings::default())
    }
}

#[cfg(test)]
pub(crate) fn light_fingerprinter() -> Fingerprinter {
    Fingerprinter::new(FingerprintSettings {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
        ..FingerprintSettings::default()
    })
}
