use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::OnceCell;

use crate::cache::{CacheBackend, CacheError, CacheFuture};

const DEFAULT_PREFIX: &str = "aurum:";
const SCAN_BATCH: usize = 200;

/// Redis-backed cache shared between processes.
///
/// Keys are namespaced with a prefix (`aurum:` by default) and stored with
/// `SET .. EX`, so expiry is enforced by the server. `clear` scans and deletes
/// only keys under the prefix. The connection is opened on first use and
/// reconnects on its own afterwards; every failure surfaces as
/// [`CacheError::Remote`].
pub struct RemoteCache {
    client: Client,
    prefix: String,
    connect_timeout: Duration,
    connection: OnceCell<ConnectionManager>,
}

impl RemoteCache {
    /// Parse a `redis://` URL. No connection is made yet.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(remote_error)?;
        Ok(Self {
            client,
            prefix: String::from(DEFAULT_PREFIX),
            connect_timeout: Duration::from_secs(1),
            connection: OnceCell::new(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn scan_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + 1);
        for character in self.prefix.chars() {
            if matches!(character, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(character);
        }
        pattern.push('*');
        pattern
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                match tokio::time::timeout(
                    self.connect_timeout,
                    self.client.get_connection_manager(),
                )
                .await
                {
                    Ok(connected) => connected.map_err(remote_error),
                    Err(_) => Err(CacheError::Remote(format!(
                        "connecting to redis timed out after {} ms",
                        self.connect_timeout.as_millis()
                    ))),
                }
            })
            .await?;
        Ok(connection.clone())
    }
}

fn remote_error(error: RedisError) -> CacheError {
    CacheError::Remote(error.to_string())
}

impl CacheBackend for RemoteCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<Option<String>, CacheError>> {
        Box::pin(async move {
            let mut connection = self.connection().await?;
            let payload: Option<String> = connection
                .get(self.namespaced(key))
                .await
                .map_err(remote_error)?;
            Ok(payload)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        payload: String,
        ttl: Duration,
    ) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut connection = self.connection().await?;
            let () = connection
                .set_ex(self.namespaced(key), payload, ttl.as_secs().max(1))
                .await
                .map_err(remote_error)?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut connection = self.connection().await?;
            let _removed: i64 = connection
                .del(self.namespaced(key))
                .await
                .map_err(remote_error)?;
            Ok(())
        })
    }

    fn clear(&self) -> CacheFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let mut connection = self.connection().await?;
            let pattern = self.scan_pattern();
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut connection)
                    .await
                    .map_err(remote_error)?;
                if !keys.is_empty() {
                    let _removed: i64 = connection.del(keys).await.map_err(remote_error)?;
                }
                if next == 0 {
                    return Ok(());
                }
                cursor = next;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_under_the_prefix() {
        let cache = RemoteCache::open("redis://127.0.0.1:6379/0")
            .expect("valid url")
            .with_prefix("fx:");

        assert_eq!(cache.namespaced("rate:USD/CNY"), "fx:rate:USD/CNY");
        assert_eq!(cache.scan_pattern(), "fx:*");
    }

    #[test]
    fn glob_characters_in_the_prefix_are_escaped_for_clear() {
        let cache = RemoteCache::open("redis://127.0.0.1:6379")
            .expect("valid url")
            .with_prefix("team[a]*:");

        assert_eq!(cache.scan_pattern(), "team\\[a\\]\\*:*");
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(matches!(
            RemoteCache::open("http://cache.local/kv"),
            Err(CacheError::Remote(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_as_a_remote_error() {
        // Port 1 is reserved and refuses connections on loopback.
        let cache = RemoteCache::open("redis://127.0.0.1:1")
            .expect("valid url")
            .with_connect_timeout(Duration::from_millis(300));

        assert!(matches!(cache.get("quote:AAPL").await, Err(CacheError::Remote(_))));
        assert!(matches!(
            cache
                .set("quote:AAPL", String::from("{}"), Duration::from_secs(5))
                .await,
            Err(CacheError::Remote(_))
        ));
    }
}
