use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::Id;

/// SRTP crypto suites that can appear in an `a=crypto` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum SrtpSuite {
    /// AES_CM_128_HMAC_SHA1_80
    AES_CM_128_HMAC_SHA1_80,
    /// AES_CM_128_HMAC_SHA1_32
    AES_CM_128_HMAC_SHA1_32,
    /// AES_256_CM_HMAC_SHA1_80
    AES_256_CM_HMAC_SHA1_80,
    /// AES_256_CM_HMAC_SHA1_32
    AES_256_CM_HMAC_SHA1_32,
    /// AEAD_AES_128_GCM
    AEAD_AES_128_GCM,
    /// AEAD_AES_256_GCM
    AEAD_AES_256_GCM,
}

impl SrtpSuite {
    /// Length of the inline key+salt in base64 characters.
    pub fn key_param_len(&self) -> usize {
        use SrtpSuite::*;
        match self {
            // 16 byte key + 14 byte salt
            AES_CM_128_HMAC_SHA1_80 | AES_CM_128_HMAC_SHA1_32 => 40,
            // 32 byte key + 14 byte salt
            AES_256_CM_HMAC_SHA1_80 | AES_256_CM_HMAC_SHA1_32 => 64,
            // 16 byte key + 12 byte salt
            AEAD_AES_128_GCM => 40,
            // 32 byte key + 12 byte salt
            AEAD_AES_256_GCM => 60,
        }
    }

    /// Suites used when neither the call nor the core configures any.
    pub const DEFAULTS: &'static [SrtpSuite] = &[
        SrtpSuite::AES_CM_128_HMAC_SHA1_80,
        SrtpSuite::AES_CM_128_HMAC_SHA1_32,
    ];
}

impl fmt::Display for SrtpSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One `a=crypto` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrtpCrypto {
    /// The crypto tag, the number that identifies this line in the answer.
    pub tag: u32,
    /// The suite.
    pub suite: SrtpSuite,
    /// `inline:` key material.
    pub master_key: String,
}

impl SrtpCrypto {
    /// New crypto line with random key material for `suite`.
    pub fn generate(tag: u32, suite: SrtpSuite) -> Self {
        let len = suite.key_param_len();
        let mut master_key = String::with_capacity(len);
        while master_key.len() < len {
            master_key.push_str(&Id::<8>::random().to_string());
        }
        master_key.truncate(len);
        SrtpCrypto {
            tag,
            suite,
            master_key,
        }
    }
}

/// Decides which SRTP suites to offer.
///
/// Inputs are the suites from the call parameters, the suites from the core
/// configuration, and a support check for the native engine. Divergences
/// from [`DefaultCryptoPolicy`] are a product decision and belong in a
/// separate implementation.
pub trait CryptoSuitePolicy: fmt::Debug {
    /// Ordered list of suites to put in the local description.
    fn select(
        &self,
        call_suites: &[SrtpSuite],
        core_suites: &[SrtpSuite],
        supported: &dyn Fn(SrtpSuite) -> bool,
    ) -> Vec<SrtpSuite>;
}

/// Call parameters first, then core configuration, then [`SrtpSuite::DEFAULTS`].
///
/// The first non-empty layer wins entirely. Suites the engine does not
/// support are dropped from that layer; if nothing remains the next layer
/// is tried.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoPolicy;

impl CryptoSuitePolicy for DefaultCryptoPolicy {
    fn select(
        &self,
        call_suites: &[SrtpSuite],
        core_suites: &[SrtpSuite],
        supported: &dyn Fn(SrtpSuite) -> bool,
    ) -> Vec<SrtpSuite> {
        for layer in [call_suites, core_suites, SrtpSuite::DEFAULTS] {
            let v: Vec<_> = layer.iter().copied().filter(|s| supported(*s)).collect();
            if !v.is_empty() {
                return v;
            }
        }
        vec![]
    }
}

/// Produce crypto lines for the given suites, tags starting at 1.
pub(crate) fn make_crypto_lines(suites: &[SrtpSuite]) -> Vec<SrtpCrypto> {
    suites
        .iter()
        .enumerate()
        .map(|(i, s)| SrtpCrypto::generate(i as u32 + 1, *s))
        .collect()
}
