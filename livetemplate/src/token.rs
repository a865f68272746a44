//! Opaque session token service: short authenticated identifiers
//! binding a connection to a `(tenant, group)` pair, with replay
//! resistance via a nonce store.
//!
//! Claims are canonically encoded with `serde_json` (its default map
//! representation already sorts struct-field order, so byte-identical
//! claims always MAC identically), the envelope is
//! `hmac::Hmac<sha2::Sha256>`, and the `mac || payload` bytes are
//! `base64`-url-encoded without padding so the token is safe to carry
//! in a query string or header.

use crate::error::{LiveTemplateError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::TokenConfig;

type HmacSha256 = Hmac<Sha256>;

/// The claims an opaque token binds. `user_id` is optional: not every
/// host distinguishes individual users within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub connection_id: String,
    pub tenant: String,
    pub group: Option<String>,
    pub user_id: Option<String>,
    pub issued_at: u64,
    pub expires_at: u64,
    pub nonce: String,
}

/// Signs and verifies opaque session tokens, and tracks nonce
/// freshness for replay resistance.
///
/// The signing key can be rotated: tokens issued under the previous
/// key still verify for one more `token_ttl` grace period, so
/// in-flight tokens don't suddenly invalidate mid-rotation.
pub struct TokenService {
    current_key: Mutex<KeyEpoch>,
    previous_key: Mutex<Option<KeyEpoch>>,
    nonces: NonceStore,
    config: TokenConfig,
}

struct KeyEpoch {
    key: Vec<u8>,
    rotated_at: Instant,
}

impl TokenService {
    pub fn new(signing_key: Vec<u8>, config: TokenConfig) -> Self {
        Self {
            current_key: Mutex::new(KeyEpoch {
                key: signing_key,
                rotated_at: Instant::now(),
            }),
            previous_key: Mutex::new(None),
            nonces: NonceStore::new(config.max_nonces_per_shard, config.nonce_window),
            config,
        }
    }

    /// Serialize, MAC, and base64url-encode `claims` under the current
    /// signing key.
    pub fn issue(&self, claims: &Claims) -> Result<String> {
        let payload = serde_json::to_vec(claims)?;
        let key = self.current_key.lock();
        let mac = compute_mac(&key.key, &payload);
        drop(key);
        let mut envelope = mac;
        envelope.extend_from_slice(&payload);
        Ok(URL_SAFE_NO_PAD.encode(envelope))
    }

    /// Decode `token`, verify its MAC in constant time against the
    /// current key (falling back to the previous key during a
    /// rotation's grace period), check expiry, and check nonce
    /// freshness. `expected_tenant` guards against a valid token for
    /// one tenant being replayed against another.
    pub fn verify(&self, token: &str, expected_tenant: &str) -> Result<Claims> {
        let envelope = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| LiveTemplateError::TokenInvalid(e.to_string()))?;
        if envelope.len() < 32 {
            return Err(LiveTemplateError::TokenInvalid("envelope too short".into()));
        }
        let (mac, payload) = envelope.split_at(32);

        if !self.mac_matches_any_key(mac, payload) {
            return Err(LiveTemplateError::TokenInvalid("MAC verification failed".into()));
        }

        let claims: Claims = serde_json::from_slice(payload)?;

        if claims.tenant != expected_tenant {
            return Err(LiveTemplateError::ApplicationMismatch {
                token_tenant: claims.tenant,
                expected_tenant: expected_tenant.to_string(),
            });
        }

        let now = unix_now();
        if now >= claims.expires_at {
            return Err(LiveTemplateError::TokenExpired);
        }

        if !self.nonces.check_and_record(&claims.nonce) {
            return Err(LiveTemplateError::TokenInvalid("nonce already used".into()));
        }

        Ok(claims)
    }

    fn mac_matches_any_key(&self, mac: &[u8], payload: &[u8]) -> bool {
        if verify_mac(&self.current_key.lock().key, payload, mac) {
            return true;
        }
        if let Some(previous) = self.previous_key.lock().as_ref() {
            if previous.rotated_at.elapsed() <= self.config.token_ttl {
                return verify_mac(&previous.key, payload, mac);
            }
        }
        false
    }

    /// New tokens use `new_key` from this point on; tokens already
    /// issued under the old key remain valid for one more `token_ttl`.
    pub fn rotate_key(&self, new_key: Vec<u8>) {
        let mut current = self.current_key.lock();
        let old = std::mem::replace(
            &mut *current,
            KeyEpoch {
                key: new_key,
                rotated_at: Instant::now(),
            },
        );
        drop(current);
        *self.previous_key.lock() = Some(old);
    }
}

fn compute_mac(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn verify_mac(key: &[u8], payload: &[u8], candidate: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(payload);
    mac.verify_slice(candidate).is_ok()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

const SHARD_COUNT: usize = 16;

/// Fixed-size sharded nonce store with per-shard FIFO eviction once a
/// shard exceeds its configured cap. Sharding bounds lock contention
/// the same way the registry's tenant/group indexes do; nonces are
/// evenly spread across shards by hashing.
struct NonceStore {
    shards: Vec<Mutex<NonceShard>>,
    per_shard_cap: usize,
    window: Duration,
}

struct NonceShard {
    seen: DashMap<String, Instant>,
    order: VecDeque<String>,
}

impl NonceStore {
    fn new(per_shard_cap: usize, window: Duration) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| {
                Mutex::new(NonceShard {
                    seen: DashMap::new(),
                    order: VecDeque::new(),
                })
            })
            .collect();
        Self {
            shards,
            per_shard_cap,
            window,
        }
    }

    /// Returns `true` if `nonce` has not been seen within the replay
    /// window (and records it), `false` if it's a replay.
    fn check_and_record(&self, nonce: &str) -> bool {
        let shard_idx = shard_for(nonce) % self.shards.len();
        let mut shard = self.shards[shard_idx].lock();

        let now = Instant::now();
        if let Some(seen_at) = shard.seen.get(nonce) {
            if now.duration_since(*seen_at) <= self.window {
                return false;
            }
        }

        shard.seen.insert(nonce.to_string(), now);
        shard.order.push_back(nonce.to_string());
        while shard.order.len() > self.per_shard_cap {
            if let Some(oldest) = shard.order.pop_front() {
                shard.seen.remove(&oldest);
            }
        }
        true
    }
}

fn shard_for(nonce: &str) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    nonce.hash(&mut hasher);
    hasher.finish() as usize
}
