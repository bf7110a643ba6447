//! Sliding-window rate limiter across three nested scopes (user, sequence,
//! contact), each with independent per-minute, per-hour and per-day caps
//! plus bounce/error cooldowns. Counters live in Redis (the same store
//! `lib-queue`'s `RedisBackend` talks to) rather than an in-process bucket,
//! so limits are shared across every process talking to one Redis instance.
//! `INCR`+`EXPIRE` accepts slight over-admission and self-corrects at the
//! next window boundary — no compare-and-swap needed.

use redis::AsyncCommands;
use std::time::Duration;

use crate::server_config::cfg;

pub const CAP_PER_MINUTE: i64 = 60;
pub const CAP_PER_HOUR: i64 = 500;
pub const CAP_PER_DAY: i64 = 2000;
pub const CAP_PER_CONTACT_PER_SEQUENCE: i64 = 3;
pub const CAP_PER_SEQUENCE: i64 = 1000;

const BOUNCE_COOLDOWN_SECS: i64 = 24 * 60 * 60;
const ERROR_COOLDOWN_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, Copy)]
pub struct RateCheck {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

impl RateCheck {
    fn ok() -> Self {
        RateCheck {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: &'static str) -> Self {
        RateCheck {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiters {
    client: redis::Client,
}

impl RateLimiters {
    pub fn from_env() -> Self {
        let client =
            redis::Client::open(cfg.redis_url()).expect("invalid REDIS_HOST/REDIS_PORT config");
        Self { client }
    }

    async fn conn(&self) -> anyhow::Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn key(scope: &str, window: &str) -> String {
        format!("{}:ratelimit:{scope}:{window}", cfg.queue_prefix)
    }

    fn cooldown_key(contact_id: i32, kind: &str) -> String {
        format!("{}:cooldown:{kind}:{contact_id}", cfg.queue_prefix)
    }

    /// Non-blocking check across all three scopes; never mutates counters.
    pub async fn check(
        &self,
        user_id: i32,
        sequence_id: Option<i32>,
        contact_id: Option<i32>,
    ) -> anyhow::Result<RateCheck> {
        let mut conn = self.conn().await?;

        if let Some(contact_id) = contact_id {
            let cooldown_bounce: bool = conn.exists(Self::cooldown_key(contact_id, "bounce")).await?;
            if cooldown_bounce {
                return Ok(RateCheck::denied("bounce_cooldown"));
            }
            let cooldown_error: bool = conn.exists(Self::cooldown_key(contact_id, "error")).await?;
            if cooldown_error {
                return Ok(RateCheck::denied("error_cooldown"));
            }
        }

        let user_scope = format!("user:{user_id}");
        if let Some(denial) = self.check_scope(&mut conn, &user_scope, CAP_PER_MINUTE, CAP_PER_HOUR, CAP_PER_DAY).await? {
            return Ok(denial);
        }

        if let Some(sequence_id) = sequence_id {
            let seq_scope = format!("user:{user_id}:sequence:{sequence_id}");
            if let Some(denial) = self
                .check_scope(&mut conn, &seq_scope, CAP_PER_SEQUENCE, CAP_PER_SEQUENCE, CAP_PER_SEQUENCE)
                .await?
            {
                return Ok(denial);
            }

            if let Some(contact_id) = contact_id {
                let contact_scope = format!("user:{user_id}:sequence:{sequence_id}:contact:{contact_id}");
                let count: i64 = conn.get(Self::key(&contact_scope, "day")).await.unwrap_or(0);
                if count >= CAP_PER_CONTACT_PER_SEQUENCE {
                    return Ok(RateCheck::denied("contact_per_sequence_cap"));
                }
            }
        }

        Ok(RateCheck::ok())
    }

    async fn check_scope(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        scope: &str,
        minute_cap: i64,
        hour_cap: i64,
        day_cap: i64,
    ) -> anyhow::Result<Option<RateCheck>> {
        let minute: i64 = conn.get(Self::key(scope, "minute")).await.unwrap_or(0);
        if minute >= minute_cap {
            return Ok(Some(RateCheck::denied("minute_cap")));
        }
        let hour: i64 = conn.get(Self::key(scope, "hour")).await.unwrap_or(0);
        if hour >= hour_cap {
            return Ok(Some(RateCheck::denied("hour_cap")));
        }
        let day: i64 = conn.get(Self::key(scope, "day")).await.unwrap_or(0);
        if day >= day_cap {
            return Ok(Some(RateCheck::denied("day_cap")));
        }
        Ok(None)
    }

    /// Increments counters at all three scopes. A `check` followed by this
    /// call is deliberately not linearizable: two concurrent callers can both
    /// pass `check` and then both increment, slightly over-admitting.
    pub async fn increment(
        &self,
        user_id: i32,
        sequence_id: i32,
        contact_id: i32,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;

        let user_scope = format!("user:{user_id}");
        let seq_scope = format!("user:{user_id}:sequence:{sequence_id}");
        let contact_scope = format!("user:{user_id}:sequence:{sequence_id}:contact:{contact_id}");

        for scope in [user_scope.as_str(), seq_scope.as_str()] {
            self.bump(&mut conn, scope, "minute", 60).await?;
            self.bump(&mut conn, scope, "hour", 3600).await?;
            self.bump(&mut conn, scope, "day", 86_400).await?;
        }
        self.bump(&mut conn, &contact_scope, "day", 86_400).await?;

        Ok(())
    }

    async fn bump(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        scope: &str,
        window: &str,
        ttl_secs: i64,
    ) -> anyhow::Result<()> {
        let key = Self::key(scope, window);
        let value: i64 = conn.incr(&key, 1).await?;
        if value == 1 {
            let _: () = conn.expire(&key, ttl_secs).await?;
        }
        Ok(())
    }

    /// Clears all keys for a (user, sequence), including every per-contact
    /// sub-scope under it — used by the reset control endpoint.
    pub async fn reset(&self, user_id: i32, sequence_id: i32) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let seq_scope = format!("user:{user_id}:sequence:{sequence_id}");
        for window in ["minute", "hour", "day"] {
            let _: () = conn.del(Self::key(&seq_scope, window)).await.unwrap_or(());
        }

        let pattern = Self::key(&format!("{seq_scope}:contact:*"), "*");
        let keys: Vec<String> = conn.keys(&pattern).await.unwrap_or_default();
        if !keys.is_empty() {
            let _: () = conn.del(keys).await.unwrap_or(());
        }

        Ok(())
    }

    pub async fn apply_bounce_cooldown(&self, contact_id: i32) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(Self::cooldown_key(contact_id, "bounce"), 1, BOUNCE_COOLDOWN_SECS as u64)
            .await?;
        Ok(())
    }

    pub async fn apply_error_cooldown(&self, contact_id: i32) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(Self::cooldown_key(contact_id, "error"), 1, ERROR_COOLDOWN_SECS as u64)
            .await?;
        Ok(())
    }
}

/// Default backoff for external calls that need local (non-Redis) pacing —
/// used when talking to Gmail directly.
pub fn default_backoff_duration() -> Duration {
    Duration::from_secs(60)
}
