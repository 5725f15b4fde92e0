//! Admission Algorithms
//!
//! Token bucket and leaky bucket, behind one trait. The algorithm is chosen
//! once at startup and fixed for the lifetime of the process; request-path
//! code is algorithm-agnostic.
//!
//! Each algorithm carries its state transition twice, field for field: as a
//! pure Rust function (`step`, used by the in-memory store) and as a Lua
//! script (`script`, executed server-side by the Redis store so that
//! load-refill-compare-mutate-persist runs as one indivisible unit). The two
//! forms must stay arithmetically identical.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Minimal per-tenant runtime state: current fill level and the timestamp
/// (epoch seconds) of the last refill/leak computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens remaining (token bucket) or queued volume (leaky bucket).
    pub level: f64,
    /// Epoch seconds of the last transition.
    pub updated_at: f64,
}

/// Outcome of one atomic state transition.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// The persisted post-transition state.
    pub state: BucketState,
}

/// One admission strategy. Implementations are stateless; all tenant state
/// lives in the shared store.
pub trait AdmissionAlgorithm: Send + Sync {
    /// Human-readable name, used for the `X-RateLimit-Algorithm` header.
    fn name(&self) -> &'static str;

    /// Key namespace segment. Token-bucket and leaky-bucket state for the
    /// same tenant id must never collide.
    fn key_segment(&self) -> &'static str;

    /// Lua source of the atomic transition, for script-capable stores.
    ///
    /// KEYS[1] = bucket key; ARGV = capacity, rate, cost, now (epoch secs),
    /// ttl (secs). Returns `{allowed, level, ts}` with level/ts as strings.
    fn script(&self) -> &'static str;

    /// Pure form of the same transition. `prior` is `None` when the bucket
    /// does not exist yet (first contact or TTL expiry). Negative elapsed
    /// time is clamped to zero to tolerate clock skew.
    fn step(&self, prior: Option<BucketState>, capacity: f64, rate: f64, cost: f64, now: f64)
        -> Transition;

    /// Remaining capacity implied by a post-transition fill level.
    fn remaining(&self, capacity: f64, level: f64) -> f64;
}

/// Burst-friendly admission: a bucket of up to `capacity` tokens refilled
/// continuously at `rate` tokens per second; each admitted request takes one.
pub struct TokenBucket;

const TOKEN_BUCKET_SCRIPT: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local tokens = tonumber(redis.call('HGET', KEYS[1], 'level'))
local last = tonumber(redis.call('HGET', KEYS[1], 'ts'))
if tokens == nil or last == nil then
    tokens = capacity
    last = now
end

local elapsed = now - last
if elapsed < 0 then
    elapsed = 0
end
tokens = tokens + elapsed * rate
if tokens > capacity then
    tokens = capacity
end

local allowed = 0
if tokens >= cost then
    tokens = tokens - cost
    allowed = 1
end

redis.call('HSET', KEYS[1], 'level', tostring(tokens), 'ts', tostring(now))
redis.call('EXPIRE', KEYS[1], ttl)
return {allowed, tostring(tokens), tostring(now)}
"#;

impl AdmissionAlgorithm for TokenBucket {
    fn name(&self) -> &'static str {
        "token bucket"
    }

    fn key_segment(&self) -> &'static str {
        TOKEN_SEGMENT
    }

    fn script(&self) -> &'static str {
        TOKEN_BUCKET_SCRIPT
    }

    fn step(
        &self,
        prior: Option<BucketState>,
        capacity: f64,
        rate: f64,
        cost: f64,
        now: f64,
    ) -> Transition {
        let (mut tokens, last) = match prior {
            Some(s) => (s.level, s.updated_at),
            None => (capacity, now),
        };

        let elapsed = (now - last).max(0.0);
        tokens = (tokens + elapsed * rate).min(capacity);

        let allowed = tokens >= cost;
        if allowed {
            tokens -= cost;
        }

        Transition {
            allowed,
            state: BucketState { level: tokens, updated_at: now },
        }
    }

    fn remaining(&self, _capacity: f64, level: f64) -> f64 {
        level
    }
}

/// Smoothing admission: each admitted request adds one unit of volume to a
/// queue of at most `capacity`, drained at `rate` units per second.
pub struct LeakyBucket;

const LEAKY_BUCKET_SCRIPT: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local volume = tonumber(redis.call('HGET', KEYS[1], 'level'))
local last = tonumber(redis.call('HGET', KEYS[1], 'ts'))
if volume == nil or last == nil then
    volume = 0
    last = now
end

local elapsed = now - last
if elapsed < 0 then
    elapsed = 0
end
volume = volume - elapsed * rate
if volume < 0 then
    volume = 0
end

local allowed = 0
if volume + cost <= capacity then
    volume = volume + cost
    allowed = 1
end

redis.call('HSET', KEYS[1], 'level', tostring(volume), 'ts', tostring(now))
redis.call('EXPIRE', KEYS[1], ttl)
return {allowed, tostring(volume), tostring(now)}
"#;

impl AdmissionAlgorithm for LeakyBucket {
    fn name(&self) -> &'static str {
        "leaky bucket"
    }

    fn key_segment(&self) -> &'static str {
        LEAKY_SEGMENT
    }

    fn script(&self) -> &'static str {
        LEAKY_BUCKET_SCRIPT
    }

    fn step(
        &self,
        prior: Option<BucketState>,
        capacity: f64,
        rate: f64,
        cost: f64,
        now: f64,
    ) -> Transition {
        let (mut volume, last) = match prior {
            Some(s) => (s.level, s.updated_at),
            None => (0.0, now),
        };

        let elapsed = (now - last).max(0.0);
        volume = (volume - elapsed * rate).max(0.0);

        let allowed = volume + cost <= capacity;
        if allowed {
            volume += cost;
        }

        Transition {
            allowed,
            state: BucketState { level: volume, updated_at: now },
        }
    }

    fn remaining(&self, capacity: f64, level: f64) -> f64 {
        capacity - level
    }
}

/// Key segment for token-bucket state.
pub const TOKEN_SEGMENT: &str = "token";
/// Key segment for leaky-bucket state.
pub const LEAKY_SEGMENT: &str = "leaky";

/// Which algorithm a controller instance runs. Switching is an operational
/// action (restart with new configuration), never a per-request choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    /// Token bucket.
    Token,
    /// Leaky bucket.
    Leaky,
}

impl AlgorithmKind {
    /// Instantiate the selected algorithm.
    pub fn build(self) -> Arc<dyn AdmissionAlgorithm> {
        match self {
            AlgorithmKind::Token => Arc::new(TokenBucket),
            AlgorithmKind::Leaky => Arc::new(LeakyBucket),
        }
    }
}

impl FromStr for AlgorithmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" => Ok(AlgorithmKind::Token),
            "leaky" => Ok(AlgorithmKind::Leaky),
            other => Err(format!("invalid algorithm '{other}', must be 'token' or 'leaky'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(level: f64, updated_at: f64) -> Option<BucketState> {
        Some(BucketState { level, updated_at })
    }

    #[test]
    fn token_bucket_fresh_tenant_starts_full() {
        let t = TokenBucket.step(None, 5.0, 1.0, 1.0, 100.0);
        assert!(t.allowed);
        assert_eq!(t.state.level, 4.0);
        assert_eq!(t.state.updated_at, 100.0);
    }

    #[test]
    fn token_bucket_burst_then_refill() {
        let algo = TokenBucket;
        // capacity=2, rate=1: allow, allow, deny, then allow after 1s.
        let t1 = algo.step(None, 2.0, 1.0, 1.0, 100.0);
        assert!(t1.allowed);
        assert_eq!(algo.remaining(2.0, t1.state.level), 1.0);

        let t2 = algo.step(Some(t1.state), 2.0, 1.0, 1.0, 100.0);
        assert!(t2.allowed);
        assert_eq!(algo.remaining(2.0, t2.state.level), 0.0);

        let t3 = algo.step(Some(t2.state), 2.0, 1.0, 1.0, 100.0);
        assert!(!t3.allowed);
        assert_eq!(t3.state.level, 0.0);

        let t4 = algo.step(Some(t3.state), 2.0, 1.0, 1.0, 101.0);
        assert!(t4.allowed);
    }

    #[test]
    fn token_bucket_denial_persists_refill_progress() {
        // 0.5 tokens accrue during a denied request and must not be lost.
        let t = TokenBucket.step(state(0.0, 100.0), 5.0, 0.5, 1.0, 101.0);
        assert!(!t.allowed);
        assert_eq!(t.state.level, 0.5);
        assert_eq!(t.state.updated_at, 101.0);
    }

    #[test]
    fn token_bucket_refill_never_exceeds_capacity() {
        let t = TokenBucket.step(state(3.0, 0.0), 5.0, 10.0, 1.0, 100.0);
        assert_eq!(t.state.level, 4.0); // clamped to capacity before consuming
    }

    #[test]
    fn token_bucket_clamps_negative_elapsed() {
        // Store clock ahead of requester clock: no token loss, no refill.
        let t = TokenBucket.step(state(2.0, 200.0), 5.0, 1.0, 1.0, 100.0);
        assert!(t.allowed);
        assert_eq!(t.state.level, 1.0);
    }

    #[test]
    fn token_bucket_zero_rate_admits_exactly_capacity() {
        let algo = TokenBucket;
        let mut prior = None;
        let mut admitted = 0;
        for _ in 0..10 {
            let t = algo.step(prior, 4.0, 0.0, 1.0, 100.0);
            if t.allowed {
                admitted += 1;
            }
            prior = Some(t.state);
        }
        assert_eq!(admitted, 4);
    }

    #[test]
    fn leaky_bucket_fresh_tenant_starts_empty() {
        let t = LeakyBucket.step(None, 2.0, 1.0, 1.0, 100.0);
        assert!(t.allowed);
        assert_eq!(t.state.level, 1.0);
        assert_eq!(LeakyBucket.remaining(2.0, t.state.level), 1.0);
    }

    #[test]
    fn leaky_bucket_fills_then_leaks() {
        let algo = LeakyBucket;
        // capacity=2, rate=1: two immediate requests allowed, third denied.
        let t1 = algo.step(None, 2.0, 1.0, 1.0, 100.0);
        let t2 = algo.step(Some(t1.state), 2.0, 1.0, 1.0, 100.0);
        let t3 = algo.step(Some(t2.state), 2.0, 1.0, 1.0, 100.0);
        assert!(t1.allowed && t2.allowed);
        assert!(!t3.allowed);
        assert_eq!(t3.state.level, 2.0); // denial keeps leaked progress

        // One second later a unit has drained.
        let t4 = algo.step(Some(t3.state), 2.0, 1.0, 1.0, 101.0);
        assert!(t4.allowed);
        assert_eq!(t4.state.level, 2.0);
    }

    #[test]
    fn leaky_bucket_volume_never_negative() {
        let t = LeakyBucket.step(state(1.0, 0.0), 2.0, 5.0, 1.0, 100.0);
        assert_eq!(t.state.level, 1.0); // drained to 0 before adding cost
    }

    #[test]
    fn leaky_bucket_clamps_negative_elapsed() {
        let t = LeakyBucket.step(state(2.0, 200.0), 2.0, 1.0, 1.0, 100.0);
        assert!(!t.allowed);
        assert_eq!(t.state.level, 2.0);
    }

    #[test]
    fn monotonic_refill_and_leak() {
        // With no admissions, tokens are non-decreasing and volume is
        // non-increasing as time advances (cost=0 probes the state).
        let mut tok = TokenBucket.step(state(1.0, 100.0), 10.0, 0.5, 0.0, 100.0).state;
        let mut vol = LeakyBucket.step(state(9.0, 100.0), 10.0, 0.5, 0.0, 100.0).state;
        for i in 1..=20 {
            let now = 100.0 + i as f64;
            let next_tok = TokenBucket.step(Some(tok), 10.0, 0.5, 0.0, now).state;
            let next_vol = LeakyBucket.step(Some(vol), 10.0, 0.5, 0.0, now).state;
            assert!(next_tok.level >= tok.level);
            assert!(next_tok.level <= 10.0);
            assert!(next_vol.level <= vol.level);
            assert!(next_vol.level >= 0.0);
            tok = next_tok;
            vol = next_vol;
        }
        assert_eq!(tok.level, 10.0);
        assert_eq!(vol.level, 0.0);
    }

    #[test]
    fn algorithm_kind_parses() {
        assert_eq!("token".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::Token);
        assert_eq!("LEAKY".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::Leaky);
        assert!("sliding".parse::<AlgorithmKind>().is_err());
    }
}
