//! Typed convenience wrappers over [`ReplicaSet`].
//!
//! Writes go through Write-All, reads through Read-First-Success. Anything
//! without a wrapper can be sent with [`ReplicaSet::write_all`],
//! [`ReplicaSet::read_first`] or [`ReplicaSet::execute`] and a [`Command`].

use crate::cache::command::Command;
use crate::cache::replica_set::ReplicaSet;
use crate::cache::traits::CacheError;
use crate::protocol::RespValue;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

fn unexpected(reply: &RespValue, wanted: &str) -> CacheError {
    CacheError::Protocol(format!("expected {}, got {:?}", wanted, reply))
}

fn to_optional_string(reply: RespValue) -> Result<Option<String>, CacheError> {
    if reply.is_null() {
        return Ok(None);
    }
    match reply.as_str() {
        Some(s) => Ok(Some(s.to_string())),
        None => Err(unexpected(&reply, "string")),
    }
}

fn to_integer(reply: RespValue) -> Result<i64, CacheError> {
    reply.as_integer().ok_or_else(|| unexpected(&reply, "integer"))
}

fn to_elements(reply: RespValue) -> Result<Vec<RespValue>, CacheError> {
    match reply {
        RespValue::Array(_) | RespValue::Set(_) | RespValue::Map(_) | RespValue::Null => {
            Ok(reply.into_elements().unwrap_or_default())
        }
        other => Err(unexpected(&other, "array")),
    }
}

fn to_optional_strings(reply: RespValue) -> Result<Vec<Option<String>>, CacheError> {
    to_elements(reply)?
        .into_iter()
        .map(to_optional_string)
        .collect()
}

fn to_strings(reply: RespValue) -> Result<Vec<String>, CacheError> {
    Ok(to_optional_strings(reply)?.into_iter().flatten().collect())
}

fn sum_integers(replies: Vec<RespValue>) -> Result<i64, CacheError> {
    replies.into_iter().map(to_integer).sum()
}

fn last_integer(replies: Vec<RespValue>) -> Result<i64, CacheError> {
    replies.into_iter().last().map(to_integer).unwrap_or(Ok(0))
}

impl ReplicaSet {
    pub async fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CacheError> {
        to_optional_string(self.read_first(&Command::get(key), cancel).await?)
    }

    pub async fn mget(
        &self,
        keys: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<String>>, CacheError> {
        to_optional_strings(self.read_first(&Command::mget(keys.iter().copied()), cancel).await?)
    }

    /// Number of the given keys that exist.
    pub async fn exists(&self, keys: &[&str], cancel: &CancellationToken) -> Result<i64, CacheError> {
        to_integer(self.read_first(&Command::exists(keys.iter().copied()), cancel).await?)
    }

    pub async fn ttl(&self, key: &str, cancel: &CancellationToken) -> Result<i64, CacheError> {
        to_integer(self.read_first(&Command::ttl(key), cancel).await?)
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        self.write_all(&Command::set(key, value, ttl), cancel).await?;
        Ok(())
    }

    /// Removed keys, summed over replicas.
    pub async fn del(&self, key: &str, cancel: &CancellationToken) -> Result<i64, CacheError> {
        sum_integers(self.write_all(&Command::del([key]), cancel).await?)
    }

    pub async fn del_multi(
        &self,
        keys: &[&str],
        cancel: &CancellationToken,
    ) -> Result<i64, CacheError> {
        sum_integers(
            self.write_all(&Command::del(keys.iter().copied()), cancel)
                .await?,
        )
    }

    pub async fn expire(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        self.write_all(&Command::expire(key, ttl), cancel).await?;
        Ok(())
    }

    pub async fn expire_at(
        &self,
        key: &str,
        at: SystemTime,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        self.write_all(&Command::expire_at(key, at), cancel).await?;
        Ok(())
    }

    pub async fn hget(
        &self,
        key: &str,
        field: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CacheError> {
        to_optional_string(self.read_first(&Command::hget(key, field), cancel).await?)
    }

    pub async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        cancel: &CancellationToken,
    ) -> Result<i64, CacheError> {
        sum_integers(
            self.write_all(&Command::hset(key, field, value), cancel)
                .await?,
        )
    }

    pub async fn hdel(
        &self,
        key: &str,
        fields: &[&str],
        cancel: &CancellationToken,
    ) -> Result<i64, CacheError> {
        sum_integers(
            self.write_all(&Command::hdel(key, fields.iter()), cancel)
                .await?,
        )
    }

    pub async fn hmset(
        &self,
        key: &str,
        pairs: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        self.write_all(&Command::hmset(key, pairs.iter().copied()), cancel)
            .await?;
        Ok(())
    }

    pub async fn hmget(
        &self,
        key: &str,
        fields: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<String>>, CacheError> {
        to_optional_strings(
            self.read_first(&Command::hmget(key, fields.iter()), cancel)
                .await?,
        )
    }

    pub async fn hgetall(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, CacheError> {
        let flat = to_strings(self.read_first(&Command::hgetall(key), cancel).await?)?;
        Ok(flat
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }

    /// Added members as reported by the last replica.
    pub async fn sadd(
        &self,
        key: &str,
        members: &[&str],
        cancel: &CancellationToken,
    ) -> Result<i64, CacheError> {
        last_integer(
            self.write_all(&Command::sadd(key, members.iter()), cancel)
                .await?,
        )
    }

    pub async fn srem(
        &self,
        key: &str,
        members: &[&str],
        cancel: &CancellationToken,
    ) -> Result<i64, CacheError> {
        last_integer(
            self.write_all(&Command::srem(key, members.iter()), cancel)
                .await?,
        )
    }

    pub async fn smembers(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CacheError> {
        to_strings(self.read_first(&Command::smembers(key), cancel).await?)
    }

    /// `GET` through the client-side cache with the configured TTL.
    pub async fn cached_get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CacheError> {
        let command = Command::get(key).cacheable(self.cache_ttl());
        to_optional_string(self.exec_cached(&command, cancel).await?)
    }

    pub async fn cached_hmget(
        &self,
        key: &str,
        fields: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<String>>, CacheError> {
        let command = Command::hmget(key, fields.iter()).cacheable(self.cache_ttl());
        to_optional_strings(self.exec_cached(&command, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Some(s.to_string()))
    }

    #[test]
    fn test_optional_string() {
        assert_eq!(to_optional_string(bulk("v")).unwrap(), Some("v".to_string()));
        assert_eq!(to_optional_string(RespValue::BulkString(None)).unwrap(), None);
        assert!(to_optional_string(RespValue::Integer(1)).is_err());
    }

    #[test]
    fn test_counts() {
        let replies = vec![RespValue::Integer(1), RespValue::Integer(0), RespValue::Integer(1)];
        assert_eq!(sum_integers(replies.clone()).unwrap(), 2);
        assert_eq!(last_integer(replies).unwrap(), 1);
        assert_eq!(last_integer(Vec::new()).unwrap(), 0);
    }

    #[test]
    fn test_elements_with_nulls() {
        let reply = RespValue::Array(Some(vec![bulk("a"), RespValue::BulkString(None)]));
        assert_eq!(
            to_optional_strings(reply).unwrap(),
            vec![Some("a".to_string()), None]
        );
        assert!(to_elements(bulk("x")).is_err());
    }
}
