// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up source and destination Redis containers.

#![allow(dead_code)]

use rds_channel::config::Address;
use redis::AsyncCommands;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container.
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// A Redis container plus a client for seeding and inspecting it.
pub struct TestRedis<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub address: Address,
}

impl<'a> TestRedis<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let port = container.get_host_port_ipv4(6379);
        Self {
            container,
            address: Address::new("127.0.0.1", port),
        }
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.address.redis_url())?;
        client.get_multiplexed_async_connection().await
    }

    pub async fn set(&self, key: &str, value: &str) -> redis::RedisResult<()> {
        self.conn().await?.set(key, value).await
    }

    pub async fn get(&self, key: &str) -> redis::RedisResult<Option<String>> {
        self.conn().await?.get(key).await
    }

    pub async fn rpush(&self, key: &str, values: &[&str]) -> redis::RedisResult<()> {
        self.conn().await?.rpush(key, values).await
    }

    pub async fn lrange(&self, key: &str) -> redis::RedisResult<Vec<String>> {
        self.conn().await?.lrange(key, 0, -1).await
    }

    pub async fn del(&self, key: &str) -> redis::RedisResult<()> {
        self.conn().await?.del(key).await
    }

    pub async fn exists(&self, key: &str) -> redis::RedisResult<bool> {
        self.conn().await?.exists(key).await
    }

    pub async fn notify_flags(&self) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        let (_, flags): (String, String) = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async(&mut conn)
            .await?;
        Ok(flags)
    }
}
