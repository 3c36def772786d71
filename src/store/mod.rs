//! 持久层 - guild 维度的通知设置聚合与存取接口
//!
//! 引擎对持久化的全部要求就是两点：读取当前订阅视图、对单个 guild 的
//! 设置聚合做原子的 read-modify-write。两个实现：
//! - `MemoryStore`：进程内 HashMap，测试与嵌入场景
//! - `FileStore`：单个 JSON 文件 + fs2 文件锁

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::quota::QuotaState;
use crate::types::{ChannelId, GuildId, UserId};

/// 关键词订阅
///
/// 以 (guild, owner, loweredWord) 唯一；长度校验（2-50 字符）在创建入口完成，
/// 匹配器永远不会见到非法模式。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// 订阅所有者
    pub owner_id: UserId,
    /// 小写化后的关键词（匹配用）
    pub lowered_word: String,
    /// 用户原始输入（展示用）
    pub original_word: String,
    /// 累计触发次数
    #[serde(default)]
    pub trigger_count: u64,
}

/// 单个 guild 的通知设置聚合（持久化单元）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildSettings {
    /// 全部订阅
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// 全局暂停通知的用户
    #[serde(default)]
    pub paused_users: HashSet<UserId>,
    /// userId -> 其忽略通知的频道集合
    #[serde(default)]
    pub ignored_channels: HashMap<UserId, HashSet<ChannelId>>,
    /// userId -> 其屏蔽的发送者集合
    #[serde(default)]
    pub block_lists: HashMap<UserId, HashSet<UserId>>,
    /// 开启"跳过活跃频道"（防抖投递）的用户
    #[serde(default)]
    pub ignore_active_channel: HashSet<UserId>,
    /// 每日配额状态
    #[serde(default)]
    pub quota: QuotaState,
}

impl GuildSettings {
    /// 新增订阅；已存在同 (owner, loweredWord) 时返回 false
    pub fn add_subscription(&mut self, owner_id: UserId, lowered: &str, original: &str) -> bool {
        if self
            .subscriptions
            .iter()
            .any(|s| s.owner_id == owner_id && s.lowered_word == lowered)
        {
            return false;
        }
        self.subscriptions.push(Subscription {
            owner_id,
            lowered_word: lowered.to_string(),
            original_word: original.to_string(),
            trigger_count: 0,
        });
        true
    }

    /// 删除订阅；不存在时返回 false
    pub fn remove_subscription(&mut self, owner_id: UserId, lowered: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|s| !(s.owner_id == owner_id && s.lowered_word == lowered));
        self.subscriptions.len() != before
    }

    /// 清空某用户的全部订阅，返回删除数量
    pub fn clear_subscriptions(&mut self, owner_id: UserId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.owner_id != owner_id);
        before - self.subscriptions.len()
    }

    /// 触发计数自增（派发事务内调用）
    pub fn bump_trigger_count(&mut self, owner_id: UserId, lowered: &str) {
        if let Some(sub) = self
            .subscriptions
            .iter_mut()
            .find(|s| s.owner_id == owner_id && s.lowered_word == lowered)
        {
            sub.trigger_count += 1;
        }
    }

    /// 某用户是否屏蔽了 sender
    pub fn is_blocked(&self, user_id: UserId, sender_id: UserId) -> bool {
        self.block_lists
            .get(&user_id)
            .map_or(false, |set| set.contains(&sender_id))
    }

    /// 导出匹配器重建所需的不可变视图
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscriptions: self.subscriptions.clone(),
            paused_users: self.paused_users.clone(),
            ignored_channels: self.ignored_channels.clone(),
        }
    }
}

/// 订阅视图 - `read_subscriptions` 的返回值，也是匹配器重建的输入
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSnapshot {
    pub subscriptions: Vec<Subscription>,
    pub paused_users: HashSet<UserId>,
    pub ignored_channels: HashMap<UserId, HashSet<ChannelId>>,
}

/// 持久层接口
///
/// `transactionally_update` 是唯一的写入口：对同一 guild 的并发调用必须
/// 表现为串行的 read-modify-write（实现方可以用锁或乐观重试达成）。
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// 读取 guild 当前的订阅视图
    async fn read_subscriptions(&self, guild_id: GuildId) -> Result<SubscriptionSnapshot>;

    /// 读取某用户的屏蔽列表
    async fn read_block_list(&self, guild_id: GuildId, user_id: UserId) -> Result<HashSet<UserId>>;

    /// 读取某用户的"跳过活跃频道"标记
    async fn read_ignore_active_channel_flag(&self, guild_id: GuildId, user_id: UserId) -> Result<bool>;

    /// 对 guild 的设置聚合做原子 read-modify-write，返回 mutator 的结果
    async fn transactionally_update<R, F>(&self, guild_id: GuildId, mutator: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut GuildSettings) -> R + Send + 'static;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_subscription_rejects_duplicates() {
        let mut settings = GuildSettings::default();
        assert!(settings.add_subscription(1, "solar", "Solar"));
        assert!(!settings.add_subscription(1, "solar", "SOLAR"));
        // 不同用户的同一个词是另一条订阅
        assert!(settings.add_subscription(2, "solar", "solar"));
        assert_eq!(settings.subscriptions.len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut settings = GuildSettings::default();
        settings.add_subscription(1, "solar", "solar");
        settings.add_subscription(1, "wheein", "wheein");
        settings.add_subscription(2, "solar", "solar");

        assert!(settings.remove_subscription(1, "solar"));
        assert!(!settings.remove_subscription(1, "solar"));
        assert_eq!(settings.clear_subscriptions(1), 1);
        // 用户 2 的订阅不受影响
        assert_eq!(settings.subscriptions.len(), 1);
    }

    #[test]
    fn test_bump_trigger_count() {
        let mut settings = GuildSettings::default();
        settings.add_subscription(1, "solar", "solar");

        settings.bump_trigger_count(1, "solar");
        settings.bump_trigger_count(1, "solar");
        // 不存在的订阅是 no-op
        settings.bump_trigger_count(1, "ghost");

        assert_eq!(settings.subscriptions[0].trigger_count, 2);
    }

    #[test]
    fn test_settings_roundtrip_through_json() {
        let mut settings = GuildSettings::default();
        settings.add_subscription(1, "solar", "Solar");
        settings.paused_users.insert(9);
        settings.block_lists.entry(1).or_default().insert(3);

        let json = serde_json::to_string(&settings).unwrap();
        let parsed: GuildSettings = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.subscriptions.len(), 1);
        assert!(parsed.paused_users.contains(&9));
        assert!(parsed.is_blocked(1, 3));
    }

    #[test]
    fn test_old_settings_without_new_fields_deserialize() {
        // 旧格式（只有订阅）应能正常反序列化
        let old_json = r#"{"subscriptions":[{"owner_id":1,"lowered_word":"solar","original_word":"Solar"}]}"#;
        let settings: GuildSettings = serde_json::from_str(old_json).unwrap();
        assert_eq!(settings.subscriptions[0].trigger_count, 0);
        assert!(settings.paused_users.is_empty());
        assert!(settings.quota.counts.is_empty());
    }
}
