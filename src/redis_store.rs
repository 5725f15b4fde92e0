//! Redis-backed state store
//!
//! Production [`StateStore`]: bucket transitions run as embedded Lua scripts
//! (`EVALSHA` with automatic `EVAL` fallback), which Redis executes as one
//! atomic, serializable unit per call. A single multiplexed
//! [`ConnectionManager`] is shared by all concurrent requests, which also
//! handles reconnection after transient failures.

use crate::algorithm::AdmissionAlgorithm;
use crate::error::Error;
use crate::store::{
    all_bucket_keys, bucket_key, decode_bucket, decode_policy, encode_policy, index_key,
    policy_key, PolicyFields, StateStore, TenantPolicy,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Duration;

/// Redis [`StateStore`].
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    /// Connect to Redis and set up the shared multiplexed connection.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, Error> {
        let client = Client::open(url).map_err(|e| Error::Config(format!("invalid store URL: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn admit(
        &self,
        algo: &dyn AdmissionAlgorithm,
        tenant_id: &str,
        policy: &TenantPolicy,
        cost: f64,
        now: f64,
        ttl: Duration,
    ) -> Result<crate::algorithm::Transition, Error> {
        let key = bucket_key(&self.namespace, algo.key_segment(), tenant_id);
        let mut conn = self.conn.clone();

        let (allowed, level, ts): (i64, String, String) = Script::new(algo.script())
            .key(&key)
            .arg(policy.capacity)
            .arg(policy.rate)
            .arg(cost)
            .arg(now)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        let state = decode_bucket(&level, &ts)
            .ok_or_else(|| Error::StoreUnavailable(format!("malformed bucket state for {key}")))?;
        Ok(crate::algorithm::Transition {
            allowed: allowed == 1,
            state,
        })
    }

    async fn tenant_known(&self, tenant_id: &str) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let known: bool = conn.sismember(index_key(&self.namespace), tenant_id).await?;
        Ok(known)
    }

    async fn load_policy(&self, tenant_id: &str) -> Result<Option<PolicyFields>, Error> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(policy_key(&self.namespace, tenant_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_policy(&fields)))
    }

    async fn save_policy(&self, policy: &TenantPolicy) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let fields = encode_policy(policy);
        redis::pipe()
            .atomic()
            .hset_multiple(policy_key(&self.namespace, &policy.tenant_id), &fields)
            .ignore()
            .sadd(index_key(&self.namespace), &policy.tenant_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let [token_key, leaky_key] = all_bucket_keys(&self.namespace, tenant_id);
        redis::pipe()
            .atomic()
            .srem(index_key(&self.namespace), tenant_id)
            .ignore()
            .del(policy_key(&self.namespace, tenant_id))
            .ignore()
            .del(token_key)
            .ignore()
            .del(leaky_key)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(Error::StoreUnavailable(format!("unexpected PING reply: {pong}")));
        }
        Ok(())
    }
}
