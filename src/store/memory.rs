//! 内存存储 - 测试与嵌入场景用的 `SettingsStore` 实现

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::{GuildSettings, SettingsStore, SubscriptionSnapshot};
use crate::types::{GuildId, UserId};

/// 进程内存储；互斥锁保证 read-modify-write 的原子性
#[derive(Default)]
pub struct MemoryStore {
    guilds: Mutex<HashMap<GuildId, GuildSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接注入一个 guild 的设置（测试准备数据用）
    pub fn seed(&self, guild_id: GuildId, settings: GuildSettings) {
        self.guilds.lock().unwrap().insert(guild_id, settings);
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn read_subscriptions(&self, guild_id: GuildId) -> Result<SubscriptionSnapshot> {
        let guilds = self.guilds.lock().unwrap();
        Ok(guilds.get(&guild_id).map(|g| g.snapshot()).unwrap_or_default())
    }

    async fn read_block_list(&self, guild_id: GuildId, user_id: UserId) -> Result<HashSet<UserId>> {
        let guilds = self.guilds.lock().unwrap();
        Ok(guilds
            .get(&guild_id)
            .and_then(|g| g.block_lists.get(&user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn read_ignore_active_channel_flag(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let guilds = self.guilds.lock().unwrap();
        Ok(guilds
            .get(&guild_id)
            .map_or(false, |g| g.ignore_active_channel.contains(&user_id)))
    }

    async fn transactionally_update<R, F>(&self, guild_id: GuildId, mutator: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut GuildSettings) -> R + Send + 'static,
    {
        let mut guilds = self.guilds.lock().unwrap();
        let settings = guilds.entry(guild_id).or_default();
        Ok(mutator(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_guild_returns_empty_snapshot() {
        let store = MemoryStore::new();
        let snapshot = store.read_subscriptions(42).await.unwrap();
        assert!(snapshot.subscriptions.is_empty());
        assert!(snapshot.paused_users.is_empty());
    }

    #[tokio::test]
    async fn test_transactional_update_persists_and_returns() {
        let store = MemoryStore::new();

        let added = store
            .transactionally_update(42, |settings| settings.add_subscription(1, "solar", "Solar"))
            .await
            .unwrap();
        assert!(added);

        let snapshot = store.read_subscriptions(42).await.unwrap();
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.subscriptions[0].lowered_word, "solar");
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transactionally_update(1, |settings| {
                        settings.add_subscription(7, "w", "w");
                        settings.bump_trigger_count(7, "w");
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.read_subscriptions(1).await.unwrap();
        // 16 次自增全部落盘，没有丢失更新
        assert_eq!(snapshot.subscriptions[0].trigger_count, 16);
    }
}
