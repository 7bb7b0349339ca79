//! Command descriptors.
//!
//! A [`Command`] is built per call and never persisted. Constructors cover the
//! conventional key-value command set; anything else can be expressed with
//! [`Command::generic`].

use crate::protocol::RespValue;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How a command was put together.
///
/// Batched execution re-encodes commands generically before sending them to
/// non-primary replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Built through one of the typed constructors.
    Typed,
    /// Rebuilt from a raw `verb key args...` tuple.
    Generic,
}

/// Variants of `ZADD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZAddMode {
    Plain,
    /// Only add new members.
    Nx,
    /// Only update existing members.
    Xx,
    /// Return the number of changed members instead of added ones.
    Ch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    parts: Vec<String>,
    key_index: Option<usize>,
    mutating: bool,
    encoding: Encoding,
}

impl Command {
    fn new(verb: &str, mutating: bool) -> Self {
        Self {
            parts: vec![verb.to_string()],
            key_index: None,
            mutating,
            encoding: Encoding::Typed,
        }
    }

    /// Start a read-only command.
    pub fn read(verb: &str) -> Self {
        Self::new(verb, false)
    }

    /// Start a mutating command.
    pub fn write(verb: &str) -> Self {
        Self::new(verb, true)
    }

    /// Append the routing key. Only the first key routes the command.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        if self.key_index.is_none() {
            self.key_index = Some(self.parts.len());
        }
        self.parts.push(key.into());
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self = self.key(key);
        }
        self
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.parts.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.parts.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    /// Build a command from a raw `verb key args...` tuple.
    pub fn generic(parts: Vec<String>, mutating: bool) -> Self {
        let key_index = if parts.len() > 1 { Some(1) } else { None };
        Self {
            parts,
            key_index,
            mutating,
            encoding: Encoding::Generic,
        }
    }

    /// Same verb and arguments, re-encoded generically.
    pub fn to_generic(&self) -> Self {
        Self {
            parts: self.parts.clone(),
            key_index: self.key_index,
            mutating: self.mutating,
            encoding: Encoding::Generic,
        }
    }

    /// Attach a client-side cache TTL to a read.
    pub fn cacheable(self, ttl: Duration) -> CacheableCommand {
        CacheableCommand { command: self, ttl }
    }

    pub fn name(&self) -> &str {
        &self.parts[0]
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.key_index.map(|idx| self.parts[idx].as_str())
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Operation name reported to the metrics sink.
    pub fn metric_name(&self) -> String {
        format!("redis_{}", self.name().to_ascii_lowercase().replace(' ', "_"))
    }

    pub fn to_resp(&self) -> RespValue {
        RespValue::command(self.parts.iter().cloned())
    }

    /// Stable identity used as client-side cache key.
    pub fn cache_key(&self) -> String {
        self.parts.join("\u{1f}")
    }
}

/// A read annotated with the time its result may be served from the
/// client-side cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheableCommand {
    pub command: Command,
    pub ttl: Duration,
}

impl CacheableCommand {
    pub fn new(command: Command, ttl: Duration) -> Self {
        Self { command, ttl }
    }
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

// Connection and server commands
impl Command {
    pub fn ping() -> Self {
        Self::read("PING")
    }

    pub fn auth(username: Option<&str>, password: &str) -> Self {
        let cmd = Self::read("AUTH");
        match username {
            Some(user) => cmd.arg(user).arg(password),
            None => cmd.arg(password),
        }
    }

    pub fn client_setname(name: &str) -> Self {
        Self::read("CLIENT").arg("SETNAME").arg(name)
    }

    pub fn cluster_nodes() -> Self {
        Self::read("CLUSTER").arg("NODES")
    }

    pub fn sentinel_primary_addr(primary: &str) -> Self {
        Self::read("SENTINEL").arg("get-master-addr-by-name").arg(primary)
    }
}

// Keyspace and string commands
impl Command {
    pub fn exists<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self::read("EXISTS").keys(keys)
    }

    pub fn get(key: &str) -> Self {
        Self::read("GET").key(key)
    }

    pub fn mget<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self::read("MGET").keys(keys)
    }

    /// `SET key value [EX seconds]`; a zero TTL stores without expiry.
    pub fn set(key: &str, value: &str, ttl: Option<Duration>) -> Self {
        let cmd = Self::write("SET").key(key).arg(value);
        match ttl {
            Some(ttl) if !ttl.is_zero() => cmd.arg("EX").arg(ttl.as_secs().max(1)),
            _ => cmd,
        }
    }

    pub fn mset<K: ToString, V: ToString>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut cmd = Self::write("MSET");
        for (k, v) in pairs {
            cmd = cmd.key(k.to_string()).arg(v);
        }
        cmd
    }

    pub fn del<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self::write("DEL").keys(keys)
    }

    pub fn expire(key: &str, ttl: Duration) -> Self {
        Self::write("EXPIRE").key(key).arg(ttl.as_secs())
    }

    pub fn expire_at(key: &str, at: SystemTime) -> Self {
        Self::write("EXPIREAT").key(key).arg(unix_seconds(at))
    }

    pub fn ttl(key: &str) -> Self {
        Self::read("TTL").key(key)
    }

    pub fn pttl(key: &str) -> Self {
        Self::read("PTTL").key(key)
    }

    pub fn incr(key: &str) -> Self {
        Self::write("INCR").key(key)
    }

    pub fn incr_by(key: &str, increment: i64) -> Self {
        Self::write("INCRBY").key(key).arg(increment)
    }

    pub fn get_range(key: &str, start: i64, end: i64) -> Self {
        Self::read("GETRANGE").key(key).arg(start).arg(end)
    }

    pub fn set_range(key: &str, offset: i64, value: &str) -> Self {
        Self::write("SETRANGE").key(key).arg(offset).arg(value)
    }

    pub fn strlen(key: &str) -> Self {
        Self::read("STRLEN").key(key)
    }

    pub fn keys_matching(pattern: &str) -> Self {
        Self::read("KEYS").arg(pattern)
    }

    pub fn scan(cursor: u64, pattern: &str, count: u64) -> Self {
        Self::read("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
    }
}

// Hash commands
impl Command {
    pub fn hget(key: &str, field: &str) -> Self {
        Self::read("HGET").key(key).arg(field)
    }

    pub fn hset(key: &str, field: &str, value: &str) -> Self {
        Self::write("HSET").key(key).arg(field).arg(value)
    }

    pub fn hsetnx(key: &str, field: &str, value: &str) -> Self {
        Self::write("HSETNX").key(key).arg(field).arg(value)
    }

    pub fn hmset<K: ToString, V: ToString>(
        key: &str,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let mut cmd = Self::write("HMSET").key(key);
        for (field, value) in pairs {
            cmd = cmd.arg(field).arg(value);
        }
        cmd
    }

    pub fn hmget<S: ToString>(key: &str, fields: impl IntoIterator<Item = S>) -> Self {
        Self::read("HMGET").key(key).args(fields)
    }

    pub fn hdel<S: ToString>(key: &str, fields: impl IntoIterator<Item = S>) -> Self {
        Self::write("HDEL").key(key).args(fields)
    }

    pub fn hgetall(key: &str) -> Self {
        Self::read("HGETALL").key(key)
    }

    pub fn hincr_by(key: &str, field: &str, increment: i64) -> Self {
        Self::write("HINCRBY").key(key).arg(field).arg(increment)
    }

    pub fn hkeys(key: &str) -> Self {
        Self::read("HKEYS").key(key)
    }

    pub fn hvals(key: &str) -> Self {
        Self::read("HVALS").key(key)
    }

    pub fn hlen(key: &str) -> Self {
        Self::read("HLEN").key(key)
    }

    pub fn hscan(key: &str, cursor: u64, pattern: &str, count: u64) -> Self {
        Self::read("HSCAN")
            .key(key)
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
    }
}

// List commands
impl Command {
    pub fn lindex(key: &str, index: i64) -> Self {
        Self::read("LINDEX").key(key).arg(index)
    }

    pub fn linsert(key: &str, before: bool, pivot: &str, element: &str) -> Self {
        Self::write("LINSERT")
            .key(key)
            .arg(if before { "BEFORE" } else { "AFTER" })
            .arg(pivot)
            .arg(element)
    }

    pub fn llen(key: &str) -> Self {
        Self::read("LLEN").key(key)
    }

    pub fn lpop(key: &str) -> Self {
        Self::write("LPOP").key(key)
    }

    pub fn rpop(key: &str) -> Self {
        Self::write("RPOP").key(key)
    }

    pub fn lpush<S: ToString>(key: &str, elements: impl IntoIterator<Item = S>) -> Self {
        Self::write("LPUSH").key(key).args(elements)
    }

    pub fn rpush<S: ToString>(key: &str, elements: impl IntoIterator<Item = S>) -> Self {
        Self::write("RPUSH").key(key).args(elements)
    }

    pub fn lpushx(key: &str, element: &str) -> Self {
        Self::write("LPUSHX").key(key).arg(element)
    }

    pub fn rpushx(key: &str, element: &str) -> Self {
        Self::write("RPUSHX").key(key).arg(element)
    }

    pub fn lrange(key: &str, start: i64, stop: i64) -> Self {
        Self::read("LRANGE").key(key).arg(start).arg(stop)
    }

    pub fn lrem(key: &str, count: i64, element: &str) -> Self {
        Self::write("LREM").key(key).arg(count).arg(element)
    }

    pub fn lset(key: &str, index: i64, element: &str) -> Self {
        Self::write("LSET").key(key).arg(index).arg(element)
    }

    pub fn ltrim(key: &str, start: i64, stop: i64) -> Self {
        Self::write("LTRIM").key(key).arg(start).arg(stop)
    }
}

// Set commands
impl Command {
    pub fn sadd<S: ToString>(key: &str, members: impl IntoIterator<Item = S>) -> Self {
        Self::write("SADD").key(key).args(members)
    }

    pub fn srem<S: ToString>(key: &str, members: impl IntoIterator<Item = S>) -> Self {
        Self::write("SREM").key(key).args(members)
    }

    pub fn scard(key: &str) -> Self {
        Self::read("SCARD").key(key)
    }

    pub fn smembers(key: &str) -> Self {
        Self::read("SMEMBERS").key(key)
    }

    pub fn sismember(key: &str, member: &str) -> Self {
        Self::read("SISMEMBER").key(key).arg(member)
    }

    pub fn sunion<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self::read("SUNION").keys(keys)
    }

    pub fn sinter<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self::read("SINTER").keys(keys)
    }

    pub fn sdiff<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self::read("SDIFF").keys(keys)
    }

    pub fn smove(source: &str, destination: &str, member: &str) -> Self {
        Self::write("SMOVE").key(source).key(destination).arg(member)
    }

    pub fn spop(key: &str) -> Self {
        Self::write("SPOP").key(key)
    }

    pub fn srandmember(key: &str, count: i64) -> Self {
        Self::read("SRANDMEMBER").key(key).arg(count)
    }

    pub fn sscan(key: &str, cursor: u64, pattern: &str, count: u64) -> Self {
        Self::read("SSCAN")
            .key(key)
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
    }
}

// Sorted set commands
impl Command {
    pub fn zadd(key: &str, mode: ZAddMode, score: f64, member: &str) -> Self {
        let cmd = Self::write("ZADD").key(key);
        let cmd = match mode {
            ZAddMode::Plain => cmd,
            ZAddMode::Nx => cmd.arg("NX"),
            ZAddMode::Xx => cmd.arg("XX"),
            ZAddMode::Ch => cmd.arg("CH"),
        };
        cmd.arg(score).arg(member)
    }

    pub fn zcard(key: &str) -> Self {
        Self::read("ZCARD").key(key)
    }

    pub fn zcount(key: &str, min: &str, max: &str) -> Self {
        Self::read("ZCOUNT").key(key).arg(min).arg(max)
    }

    pub fn zincr_by(key: &str, increment: f64, member: &str) -> Self {
        Self::write("ZINCRBY").key(key).arg(increment).arg(member)
    }

    pub fn zlexcount(key: &str, min: &str, max: &str) -> Self {
        Self::read("ZLEXCOUNT").key(key).arg(min).arg(max)
    }

    pub fn zinterstore<S: Into<String>>(
        destination: &str,
        keys: impl IntoIterator<Item = S>,
    ) -> Self {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        Self::write("ZINTERSTORE")
            .key(destination)
            .arg(keys.len())
            .keys(keys)
    }

    pub fn zunionstore<S: Into<String>>(
        destination: &str,
        keys: impl IntoIterator<Item = S>,
    ) -> Self {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        Self::write("ZUNIONSTORE")
            .key(destination)
            .arg(keys.len())
            .keys(keys)
    }

    pub fn zpopmax(key: &str, count: i64) -> Self {
        Self::write("ZPOPMAX").key(key).arg(count)
    }

    pub fn zpopmin(key: &str, count: i64) -> Self {
        Self::write("ZPOPMIN").key(key).arg(count)
    }

    pub fn zrange(key: &str, start: &str, stop: &str) -> Self {
        Self::read("ZRANGE").key(key).arg(start).arg(stop)
    }

    pub fn zrevrange(key: &str, start: i64, stop: i64) -> Self {
        Self::read("ZREVRANGE").key(key).arg(start).arg(stop)
    }

    pub fn zrange_by_score(key: &str, min: &str, max: &str, offset: i64, count: i64) -> Self {
        Self::read("ZRANGEBYSCORE")
            .key(key)
            .arg(min)
            .arg(max)
            .arg("LIMIT")
            .arg(offset)
            .arg(count)
    }

    pub fn zrevrange_by_score(key: &str, max: &str, min: &str, offset: i64, count: i64) -> Self {
        Self::read("ZREVRANGEBYSCORE")
            .key(key)
            .arg(max)
            .arg(min)
            .arg("LIMIT")
            .arg(offset)
            .arg(count)
    }

    pub fn zrange_by_lex(key: &str, min: &str, max: &str, offset: i64, count: i64) -> Self {
        Self::read("ZRANGEBYLEX")
            .key(key)
            .arg(min)
            .arg(max)
            .arg("LIMIT")
            .arg(offset)
            .arg(count)
    }

    pub fn zrevrange_by_lex(key: &str, max: &str, min: &str, offset: i64, count: i64) -> Self {
        Self::read("ZREVRANGEBYLEX")
            .key(key)
            .arg(max)
            .arg(min)
            .arg("LIMIT")
            .arg(offset)
            .arg(count)
    }

    pub fn zrank(key: &str, member: &str) -> Self {
        Self::read("ZRANK").key(key).arg(member)
    }

    pub fn zrevrank(key: &str, member: &str) -> Self {
        Self::read("ZREVRANK").key(key).arg(member)
    }

    pub fn zscore(key: &str, member: &str) -> Self {
        Self::read("ZSCORE").key(key).arg(member)
    }

    pub fn zrem<S: ToString>(key: &str, members: impl IntoIterator<Item = S>) -> Self {
        Self::write("ZREM").key(key).args(members)
    }

    pub fn zremrange_by_lex(key: &str, min: &str, max: &str) -> Self {
        Self::write("ZREMRANGEBYLEX").key(key).arg(min).arg(max)
    }

    pub fn zremrange_by_rank(key: &str, start: i64, stop: i64) -> Self {
        Self::write("ZREMRANGEBYRANK").key(key).arg(start).arg(stop)
    }

    pub fn zremrange_by_score(key: &str, min: &str, max: &str) -> Self {
        Self::write("ZREMRANGEBYSCORE").key(key).arg(min).arg(max)
    }

    pub fn zscan(key: &str, cursor: u64, pattern: &str, count: u64) -> Self {
        Self::read("ZSCAN")
            .key(key)
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
    }
}
