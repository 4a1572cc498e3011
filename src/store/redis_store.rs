use async_trait::async_trait;
use redis::{Client, RedisError, Script, aio::ConnectionManager};
use std::time::Duration;

use super::{Store, StoreResult};

const COMPARE_AND_SWAP: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
";

const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    prefix: String,
    cas_script: Script,
    cad_script: Script,
}

impl RedisStore {
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            cas_script: Script::new(COMPARE_AND_SWAP),
            cad_script: Script::new(COMPARE_AND_DELETE),
        })
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis.
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);

        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        let _: () = cmd.query_async(&mut self.connection.clone()).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value).arg("NX");

        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        // Nil reply when the key already exists.
        let reply: Option<String> = cmd.query_async(&mut self.connection.clone()).await?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        let swapped: i32 = self
            .cas_script
            .key(self.key(key))
            .arg(expected)
            .arg(new)
            .invoke_async(&mut self.connection.clone())
            .await?;
        Ok(swapped == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let deleted: i32 = self
            .cad_script
            .key(self.key(key))
            .arg(expected)
            .invoke_async(&mut self.connection.clone())
            .await?;
        Ok(deleted == 1)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        // -2 when missing, -1 when persistent.
        let millis: i64 = redis::cmd("PTTL")
            .arg(self.key(key))
            .query_async(&mut self.connection.clone())
            .await?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let _: i64 = redis::cmd("SADD")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let _: i64 = redis::cmd("SREM")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.key(key))
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(members)
    }
}
