//! Redis-based counter store.
//!
//! # Architecture
//!
//! - `tier:{id}:available` → live availability (integer)
//! - `tier:{id}:capacity` → unit numbers are valid in `1..=capacity`
//! - `tier:{id}:holds` (ZSET) → unclaimed holds, member `checkout|qty|unit`,
//!   score = expiry in epoch milliseconds
//! - `tier:{id}:claimed` (ZSET) → holds pinned by a running finalize; the
//!   hold hash carries the `token` of the call that pinned it
//! - `tier:{id}:units` (SET) → numbered units that are held or sold
//! - `unit:{id}:{n}:status` → `held:{checkout}` or `sold`
//! - `hold:{checkout}` (HASH) → hold record with native expiry at `expires_at`
//! - `session:{id}:holds` (SET) → checkout ids of a session
//!
//! Every mutating primitive is one Lua script, so a check and the write it
//! guards always run together on the server. Each script starts by
//! reclaiming the tier's lapsed holds (`score < now`), which returns their
//! capacity without a background reaper.
//!
//! # Example
//!
//! ```no_run
//! use softlock_core::stores::RedisCounterStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCounterStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AllocError, Result};
use crate::providers::{
    CapacityRemoval, ClaimOutcome, ClaimedHold, CounterStore, ReleaseOutcome, TierAcquire,
    UnitAcquire,
};
use crate::types::{CheckoutId, ClaimToken, Hold, SessionId, TierId};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::sync::Arc;

/// Shared Lua helpers prepended to every script.
///
/// `give_back` returns a hold's capacity and frees its unit; `reclaim` does
/// that for every unclaimed hold of a tier whose expiry is before `now`.
const RECLAIM_LUA: &str = r"
local function give_back(tier, member)
    local cid, qty, unit = string.match(member, '^([^|]+)|(%d+)|(.*)$')
    if not cid then
        return nil
    end
    redis.call('INCRBY', 'tier:' .. tier .. ':available', qty)
    if unit ~= '' then
        local status_key = 'unit:' .. tier .. ':' .. unit .. ':status'
        if redis.call('GET', status_key) == 'held:' .. cid then
            redis.call('DEL', status_key)
            redis.call('SREM', 'tier:' .. tier .. ':units', unit)
        end
    end
    return cid
end

local function reclaim(tier, now)
    local holds_key = 'tier:' .. tier .. ':holds'
    local lapsed = redis.call('ZRANGEBYSCORE', holds_key, '-inf', '(' .. now)
    for _, member in ipairs(lapsed) do
        local cid = give_back(tier, member)
        if cid then
            redis.call('DEL', 'hold:' .. cid)
        end
        redis.call('ZREM', holds_key, member)
    end
end

local function record_hold(tier, member, checkout, session, payload, expires, now)
    redis.call('ZADD', 'tier:' .. tier .. ':holds', expires, member)
    local hold_key = 'hold:' .. checkout
    redis.call('HSET', hold_key,
        'payload', payload, 'session', session, 'tier', tier,
        'member', member, 'state', 'held')
    redis.call('PEXPIREAT', hold_key, expires)
    local session_key = 'session:' .. session .. ':holds'
    redis.call('SADD', session_key, checkout)
    local keep = tonumber(expires) - tonumber(now) + 60000
    if redis.call('PTTL', session_key) < keep then
        redis.call('PEXPIRE', session_key, keep)
    end
end
";

// ARGV: tier, qty, now, expires, checkout, session, payload, member
const ACQUIRE_TIER_LUA: &str = r"
local tier, qty, now = ARGV[1], tonumber(ARGV[2]), ARGV[3]
reclaim(tier, now)
local available = redis.call('GET', 'tier:' .. tier .. ':available')
if not available then
    return {-1, 0}
end
available = tonumber(available)
if available < qty then
    return {0, available}
end
redis.call('DECRBY', 'tier:' .. tier .. ':available', qty)
record_hold(tier, ARGV[8], ARGV[5], ARGV[6], ARGV[7], ARGV[4], now)
return {1, available - qty}
";

// ARGV: tier, number, now, expires, checkout, session, payload, member
// Returns {code, payload}: 1 acquired, 2 already held by session, 0 locked,
// -1 unknown tier, -2 out of range
const ACQUIRE_UNIT_LUA: &str = r"
local tier, number, now, session = ARGV[1], tonumber(ARGV[2]), ARGV[3], ARGV[6]
reclaim(tier, now)
local available = redis.call('GET', 'tier:' .. tier .. ':available')
if not available then
    return {-1, ''}
end
local capacity = tonumber(redis.call('GET', 'tier:' .. tier .. ':capacity') or '0')
if number < 1 or number > capacity then
    return {-2, ''}
end
local status_key = 'unit:' .. tier .. ':' .. ARGV[2] .. ':status'
local status = redis.call('GET', status_key)
if status then
    if string.sub(status, 1, 5) == 'held:' then
        local owner_key = 'hold:' .. string.sub(status, 6)
        local owner = redis.call('HMGET', owner_key, 'session', 'state', 'payload')
        if owner[1] == session and owner[2] == 'held' then
            return {2, owner[3]}
        end
    end
    return {0, ''}
end
if tonumber(available) < 1 then
    return {0, ''}
end
redis.call('DECRBY', 'tier:' .. tier .. ':available', 1)
redis.call('SET', status_key, 'held:' .. ARGV[5])
redis.call('SADD', 'tier:' .. tier .. ':units', ARGV[2])
record_hold(tier, ARGV[8], ARGV[5], session, ARGV[7], ARGV[4], now)
return {1, ''}
";

// ARGV: checkout, session, now
// Returns {code, payload}: 1 released, 0 not found, -1 not owned
const RELEASE_LUA: &str = r"
local hold_key = 'hold:' .. ARGV[1]
local tier = redis.call('HGET', hold_key, 'tier')
if not tier then
    return {0, ''}
end
reclaim(tier, ARGV[3])
local hold = redis.call('HMGET', hold_key, 'session', 'state', 'payload', 'member')
if not hold[1] or hold[2] ~= 'held' then
    return {0, ''}
end
if hold[1] ~= ARGV[2] then
    return {-1, ''}
end
give_back(tier, hold[4])
redis.call('ZREM', 'tier:' .. tier .. ':holds', hold[4])
redis.call('DEL', hold_key)
redis.call('SREM', 'session:' .. hold[1] .. ':holds', ARGV[1])
return {1, hold[3]}
";

// ARGV: checkout, token, now
// Returns {code, payload}: 1 claimed, 2 claimed by another token, 0 missing,
// -1 expired
const CLAIM_LUA: &str = r"
local hold_key = 'hold:' .. ARGV[1]
local hold = redis.call('HMGET', hold_key, 'tier', 'state', 'payload', 'member', 'token')
local tier = hold[1]
if not tier then
    return {0, ''}
end
if hold[2] == 'claimed' then
    if hold[5] == ARGV[2] then
        return {1, hold[3]}
    end
    return {2, ''}
end
local holds_key = 'tier:' .. tier .. ':holds'
local score = redis.call('ZSCORE', holds_key, hold[4])
if not score then
    redis.call('DEL', hold_key)
    return {0, ''}
end
if tonumber(score) < tonumber(ARGV[3]) then
    reclaim(tier, ARGV[3])
    return {-1, ''}
end
redis.call('ZREM', holds_key, hold[4])
redis.call('ZADD', 'tier:' .. tier .. ':claimed', score, hold[4])
redis.call('HSET', hold_key, 'state', 'claimed', 'token', ARGV[2])
redis.call('PERSIST', hold_key)
return {1, hold[3]}
";

// ARGV: tier, member, checkout, session, unit, token
const SETTLE_LUA: &str = r"
if redis.call('HGET', 'hold:' .. ARGV[3], 'token') ~= ARGV[6] then
    return 0
end
if redis.call('ZREM', 'tier:' .. ARGV[1] .. ':claimed', ARGV[2]) == 0 then
    return 0
end
if ARGV[5] ~= '' then
    redis.call('SET', 'unit:' .. ARGV[1] .. ':' .. ARGV[5] .. ':status', 'sold')
end
redis.call('DEL', 'hold:' .. ARGV[3])
redis.call('SREM', 'session:' .. ARGV[4] .. ':holds', ARGV[3])
return 1
";

// ARGV: tier, member, checkout, session, token
const UNCLAIM_LUA: &str = r"
if redis.call('HGET', 'hold:' .. ARGV[3], 'token') ~= ARGV[5] then
    return 0
end
if redis.call('ZREM', 'tier:' .. ARGV[1] .. ':claimed', ARGV[2]) == 0 then
    return 0
end
give_back(ARGV[1], ARGV[2])
redis.call('DEL', 'hold:' .. ARGV[3])
redis.call('SREM', 'session:' .. ARGV[4] .. ':holds', ARGV[3])
return 1
";

// ARGV: tier, capacity, unsold, now
const RECONCILE_LUA: &str = r"
local tier = ARGV[1]
reclaim(tier, ARGV[4])
local held = 0
for _, key in ipairs({'tier:' .. tier .. ':holds', 'tier:' .. tier .. ':claimed'}) do
    for _, member in ipairs(redis.call('ZRANGE', key, 0, -1)) do
        local qty = string.match(member, '^[^|]+|(%d+)|')
        if qty then
            held = held + tonumber(qty)
        end
    end
end
local available = tonumber(ARGV[3]) - held
if available < 0 then
    available = 0
end
redis.call('SET', 'tier:' .. tier .. ':available', available)
redis.call('SET', 'tier:' .. tier .. ':capacity', ARGV[2])
return available
";

// ARGV: tier, now
const AVAILABLE_LUA: &str = r"
reclaim(ARGV[1], ARGV[2])
local available = redis.call('GET', 'tier:' .. ARGV[1] .. ':available')
if not available then
    return -1
end
return tonumber(available)
";

// ARGV: tier, qty, now
const ADD_CAPACITY_LUA: &str = r"
local tier = ARGV[1]
reclaim(tier, ARGV[3])
if redis.call('EXISTS', 'tier:' .. tier .. ':available') == 0 then
    return -1
end
redis.call('INCRBY', 'tier:' .. tier .. ':capacity', ARGV[2])
return redis.call('INCRBY', 'tier:' .. tier .. ':available', ARGV[2])
";

// ARGV: tier, qty, now
// Returns {code, available}: 1 removed, 0 insufficient, -1 unknown, -2 units in use
const REMOVE_CAPACITY_LUA: &str = r"
local tier, qty = ARGV[1], tonumber(ARGV[2])
reclaim(tier, ARGV[3])
local available = redis.call('GET', 'tier:' .. tier .. ':available')
if not available then
    return {-1, 0}
end
available = tonumber(available)
if available < qty then
    return {0, available}
end
local capacity = tonumber(redis.call('GET', 'tier:' .. tier .. ':capacity') or '0')
local new_capacity = capacity - qty
if new_capacity < 0 then
    new_capacity = 0
end
for _, unit in ipairs(redis.call('SMEMBERS', 'tier:' .. tier .. ':units')) do
    if tonumber(unit) > new_capacity then
        return {-2, available}
    end
end
redis.call('SET', 'tier:' .. tier .. ':capacity', new_capacity)
redis.call('DECRBY', 'tier:' .. tier .. ':available', qty)
return {1, available - qty}
";

struct Scripts {
    acquire_tier: Script,
    acquire_unit: Script,
    release: Script,
    claim: Script,
    settle: Script,
    unclaim: Script,
    reconcile: Script,
    available: Script,
    add_capacity: Script,
    remove_capacity: Script,
}

impl Scripts {
    fn load() -> Self {
        let with_helpers = |body: &str| Script::new(&format!("{RECLAIM_LUA}\n{body}"));
        Self {
            acquire_tier: with_helpers(ACQUIRE_TIER_LUA),
            acquire_unit: with_helpers(ACQUIRE_UNIT_LUA),
            release: with_helpers(RELEASE_LUA),
            claim: with_helpers(CLAIM_LUA),
            settle: Script::new(SETTLE_LUA),
            unclaim: with_helpers(UNCLAIM_LUA),
            reconcile: with_helpers(RECONCILE_LUA),
            available: with_helpers(AVAILABLE_LUA),
            add_capacity: with_helpers(ADD_CAPACITY_LUA),
            remove_capacity: with_helpers(REMOVE_CAPACITY_LUA),
        }
    }
}

/// Redis counter store with Lua-scripted atomic primitives.
#[derive(Clone)]
pub struct RedisCounterStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    scripts: Arc<Scripts>,
}

impl RedisCounterStore {
    /// Create a new Redis counter store.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if connecting to Redis fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            AllocError::StoreUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AllocError::StoreUnavailable(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;

        Ok(Self {
            conn_manager,
            scripts: Arc::new(Scripts::load()),
        })
    }

    fn session_key(session_id: &SessionId) -> String {
        format!("session:{}:holds", session_id.as_str())
    }

    fn hold_key(checkout_id: CheckoutId) -> String {
        format!("hold:{checkout_id}")
    }

    fn claimed_key(tier: &TierId) -> String {
        format!("tier:{}:claimed", tier.as_str())
    }

    /// ZSET member encoding of a hold: `checkout|qty|unit`.
    fn member(hold: &Hold) -> String {
        format!(
            "{}|{}|{}",
            hold.checkout_id,
            hold.target.quantity(),
            Self::unit_arg(hold)
        )
    }

    fn unit_arg(hold: &Hold) -> String {
        hold.target
            .unit_number()
            .map_or_else(String::new, |n| n.to_string())
    }

    fn encode(hold: &Hold) -> Result<String> {
        serde_json::to_string(hold)
            .map_err(|e| AllocError::StoreUnavailable(format!("Failed to encode hold: {e}")))
    }

    fn decode(payload: &str) -> Result<Hold> {
        serde_json::from_str(payload)
            .map_err(|e| AllocError::StoreUnavailable(format!("Corrupt hold record: {e}")))
    }

    async fn load_hold(&self, checkout_id: CheckoutId) -> Result<Option<(Hold, String)>> {
        let mut conn = self.conn_manager.clone();
        let (payload, state): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(Self::hold_key(checkout_id))
            .arg("payload")
            .arg("state")
            .query_async(&mut conn)
            .await?;

        match (payload, state) {
            (Some(payload), Some(state)) => Ok(Some((Self::decode(&payload)?, state))),
            _ => Ok(None),
        }
    }
}

impl CounterStore for RedisCounterStore {
    async fn reconcile_tier(
        &self,
        tier: &TierId,
        capacity: u32,
        unsold: u32,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let mut conn = self.conn_manager.clone();
        let available: u32 = self
            .scripts
            .reconcile
            .arg(tier.as_str())
            .arg(capacity)
            .arg(unsold)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        tracing::info!(tier = %tier, capacity, unsold, available, "Reconciled tier counter");
        Ok(available)
    }

    async fn available(&self, tier: &TierId, now: DateTime<Utc>) -> Result<Option<u32>> {
        let mut conn = self.conn_manager.clone();
        let available: i64 = self
            .scripts
            .available
            .arg(tier.as_str())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(u32::try_from(available).ok())
    }

    async fn acquire_tier(&self, hold: &Hold) -> Result<TierAcquire> {
        let mut conn = self.conn_manager.clone();
        let (code, available): (i64, i64) = self
            .scripts
            .acquire_tier
            .arg(hold.target.tier().as_str())
            .arg(hold.target.quantity())
            .arg(hold.created_at.timestamp_millis())
            .arg(hold.expires_at.timestamp_millis())
            .arg(hold.checkout_id.to_string())
            .arg(hold.session_id.as_str())
            .arg(Self::encode(hold)?)
            .arg(Self::member(hold))
            .invoke_async(&mut conn)
            .await?;

        Ok(match code {
            1 => TierAcquire::Acquired,
            0 => TierAcquire::Insufficient {
                available: u32::try_from(available).unwrap_or(0),
            },
            _ => TierAcquire::UnknownTier,
        })
    }

    async fn acquire_unit(&self, hold: &Hold) -> Result<UnitAcquire> {
        let Some(number) = hold.target.unit_number() else {
            return Ok(UnitAcquire::OutOfRange);
        };

        let mut conn = self.conn_manager.clone();
        let (code, payload): (i64, String) = self
            .scripts
            .acquire_unit
            .arg(hold.target.tier().as_str())
            .arg(number)
            .arg(hold.created_at.timestamp_millis())
            .arg(hold.expires_at.timestamp_millis())
            .arg(hold.checkout_id.to_string())
            .arg(hold.session_id.as_str())
            .arg(Self::encode(hold)?)
            .arg(Self::member(hold))
            .invoke_async(&mut conn)
            .await?;

        Ok(match code {
            1 => UnitAcquire::Acquired,
            2 => UnitAcquire::AlreadyHeld(Self::decode(&payload)?),
            0 => UnitAcquire::Locked,
            -2 => UnitAcquire::OutOfRange,
            _ => UnitAcquire::UnknownTier,
        })
    }

    async fn release(
        &self,
        checkout_id: CheckoutId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome> {
        let mut conn = self.conn_manager.clone();
        let (code, payload): (i64, String) = self
            .scripts
            .release
            .arg(checkout_id.to_string())
            .arg(session_id.as_str())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(match code {
            1 => ReleaseOutcome::Released(Self::decode(&payload)?),
            -1 => ReleaseOutcome::NotOwned,
            _ => ReleaseOutcome::NotFound,
        })
    }

    async fn hold(&self, checkout_id: CheckoutId, now: DateTime<Utc>) -> Result<Option<Hold>> {
        Ok(self
            .load_hold(checkout_id)
            .await?
            .filter(|(hold, state)| state == "held" && !hold.is_expired(now))
            .map(|(hold, _)| hold))
    }

    async fn session_holds(&self, session_id: &SessionId, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        let mut conn = self.conn_manager.clone();
        let session_key = Self::session_key(session_id);
        let members: Vec<String> = conn.smembers(&session_key).await?;

        let mut holds = Vec::with_capacity(members.len());
        let mut dead = Vec::new();
        for member in members {
            let Ok(checkout_id) = member.parse::<CheckoutId>() else {
                dead.push(member);
                continue;
            };
            match self.load_hold(checkout_id).await? {
                Some((hold, state)) if state == "held" && !hold.is_expired(now) => holds.push(hold),
                Some(_) => {}
                None => dead.push(member),
            }
        }

        if !dead.is_empty() {
            let _: () = conn.srem(&session_key, &dead).await?;
            tracing::debug!(session_id = %session_id, pruned = dead.len(), "Pruned session index");
        }

        holds.sort_by_key(|h| h.created_at);
        Ok(holds)
    }

    async fn claim(
        &self,
        checkout_id: CheckoutId,
        token: ClaimToken,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut conn = self.conn_manager.clone();
        let (code, payload): (i64, String) = self
            .scripts
            .claim
            .arg(checkout_id.to_string())
            .arg(token.to_string())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(match code {
            1 => ClaimOutcome::Claimed(Self::decode(&payload)?),
            2 => ClaimOutcome::InProgress,
            -1 => ClaimOutcome::Expired,
            _ => ClaimOutcome::Missing,
        })
    }

    async fn claimed_holds(&self, tier: &TierId) -> Result<Vec<ClaimedHold>> {
        let mut conn = self.conn_manager.clone();
        let members: Vec<String> = conn.zrange(Self::claimed_key(tier), 0, -1).await?;

        let mut holds = Vec::with_capacity(members.len());
        for member in members {
            let checkout = member.split('|').next().unwrap_or_default();
            let Ok(checkout_id) = checkout.parse::<CheckoutId>() else {
                tracing::warn!(tier = %tier, member = %member, "Unparsable claimed member");
                continue;
            };
            let Some((hold, _)) = self.load_hold(checkout_id).await? else {
                tracing::warn!(checkout_id = %checkout_id, "Claimed hold record missing");
                continue;
            };
            let token: Option<String> = conn.hget(Self::hold_key(checkout_id), "token").await?;
            match token.as_deref().map(str::parse::<ClaimToken>) {
                Some(Ok(token)) => holds.push(ClaimedHold { hold, token }),
                _ => tracing::warn!(checkout_id = %checkout_id, "Claimed hold has no token"),
            }
        }
        Ok(holds)
    }

    async fn settle(&self, hold: &Hold, token: ClaimToken) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let settled: i64 = self
            .scripts
            .settle
            .arg(hold.target.tier().as_str())
            .arg(Self::member(hold))
            .arg(hold.checkout_id.to_string())
            .arg(hold.session_id.as_str())
            .arg(Self::unit_arg(hold))
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            tracing::debug!(checkout_id = %hold.checkout_id, "Hold not claimed under token");
        }
        Ok(settled == 1)
    }

    async fn unclaim(&self, hold: &Hold, token: ClaimToken) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let returned: i64 = self
            .scripts
            .unclaim
            .arg(hold.target.tier().as_str())
            .arg(Self::member(hold))
            .arg(hold.checkout_id.to_string())
            .arg(hold.session_id.as_str())
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await?;

        if returned == 1 {
            tracing::info!(
                checkout_id = %hold.checkout_id,
                tier = %hold.target.tier(),
                quantity = hold.target.quantity(),
                "Returned claimed hold to pool"
            );
        }
        Ok(returned == 1)
    }

    async fn add_capacity(
        &self,
        tier: &TierId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let mut conn = self.conn_manager.clone();
        let available: i64 = self
            .scripts
            .add_capacity
            .arg(tier.as_str())
            .arg(quantity)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(u32::try_from(available).ok())
    }

    async fn remove_capacity(
        &self,
        tier: &TierId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<CapacityRemoval> {
        let mut conn = self.conn_manager.clone();
        let (code, available): (i64, i64) = self
            .scripts
            .remove_capacity
            .arg(tier.as_str())
            .arg(quantity)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let available = u32::try_from(available).unwrap_or(0);
        Ok(match code {
            1 => CapacityRemoval::Removed { available },
            0 => CapacityRemoval::Insufficient { available },
            -2 => CapacityRemoval::UnitsInUse,
            _ => CapacityRemoval::UnknownTier,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{HoldTarget, UnitId};
    use chrono::Duration;

    async fn store() -> RedisCounterStore {
        RedisCounterStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Redis must be running for this test")
    }

    fn unique_tier() -> TierId {
        TierId::new(format!("t-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_last_slot_goes_to_exactly_one_caller() {
        let store = store().await;
        let tier = unique_tier();
        let now = Utc::now();
        store.reconcile_tier(&tier, 1, 1, now).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let hold = Hold::new(
                SessionId::new(format!("s{i}")),
                HoldTarget::Tier {
                    tier: tier.clone(),
                    quantity: 1,
                },
                now,
                Duration::minutes(5),
            );
            handles.push(tokio::spawn(async move { store.acquire_tier(&hold).await }));
        }

        let mut acquired = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == TierAcquire::Acquired {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
        assert_eq!(store.available(&tier, now).await.unwrap(), Some(0));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_unit_hold_claim_settle_cycle() {
        let store = store().await;
        let tier = unique_tier();
        let now = Utc::now();
        store.reconcile_tier(&tier, 50, 50, now).await.unwrap();

        let hold = Hold::new(
            SessionId::new("buyer"),
            HoldTarget::Unit(UnitId::new(tier.clone(), 42)),
            now,
            Duration::minutes(5),
        );
        assert_eq!(store.acquire_unit(&hold).await.unwrap(), UnitAcquire::Acquired);

        let rival = Hold::new(
            SessionId::new("rival"),
            HoldTarget::Unit(UnitId::new(tier.clone(), 42)),
            now,
            Duration::minutes(5),
        );
        assert_eq!(store.acquire_unit(&rival).await.unwrap(), UnitAcquire::Locked);

        let token = ClaimToken::new();
        assert_eq!(
            store.claim(hold.checkout_id, token, now).await.unwrap(),
            ClaimOutcome::Claimed(hold.clone())
        );
        assert_eq!(
            store.claim(hold.checkout_id, ClaimToken::new(), now).await.unwrap(),
            ClaimOutcome::InProgress
        );
        assert!(!store.unclaim(&hold, ClaimToken::new()).await.unwrap());
        assert!(store.settle(&hold, token).await.unwrap());

        let later = Hold::new(
            SessionId::new("rival"),
            HoldTarget::Unit(UnitId::new(tier.clone(), 42)),
            now + Duration::minutes(10),
            Duration::minutes(5),
        );
        assert_eq!(store.acquire_unit(&later).await.unwrap(), UnitAcquire::Locked);
        assert_eq!(store.available(&tier, now).await.unwrap(), Some(49));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_lapsed_hold_is_reclaimed() {
        let store = store().await;
        let tier = unique_tier();
        let now = Utc::now();
        store.reconcile_tier(&tier, 3, 3, now).await.unwrap();

        let hold = Hold::new(
            SessionId::new("buyer"),
            HoldTarget::Tier {
                tier: tier.clone(),
                quantity: 3,
            },
            now,
            Duration::seconds(5),
        );
        store.acquire_tier(&hold).await.unwrap();
        assert_eq!(store.available(&tier, now).await.unwrap(), Some(0));

        let later = now + Duration::seconds(6);
        assert_eq!(store.available(&tier, later).await.unwrap(), Some(3));
        assert_eq!(
            store.claim(hold.checkout_id, ClaimToken::new(), later).await.unwrap(),
            ClaimOutcome::Missing
        );
    }
}
