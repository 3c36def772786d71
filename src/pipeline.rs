//! 抑制管线 - 把原始命中过滤成真正要通知的用户集合
//!
//! 两段式：`select` 做本地规则（按用户去重、不通知本人、暂停复查、
//! 频道忽略），不碰网络；`admit` 做需要外部协作方的检查（成员解析、
//! 频道可见性、屏蔽列表），由每个候选自己的投递任务调用，任何一个
//! 候选的解析失败只丢弃该候选，绝不影响同一条消息的其他候选。

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::cache::GuildRules;
use crate::matcher::KeywordHit;
use crate::platform::{MessageEvent, PlatformClient};
use crate::store::SettingsStore;
use crate::types::UserId;

/// 通过本地过滤的候选：目标用户 + 用于展示的首个命中
#[derive(Debug, Clone)]
pub struct Candidate {
    pub user_id: UserId,
    pub hit: KeywordHit,
}

/// 抑制管线
pub struct SuppressionPipeline<S, P> {
    store: Arc<S>,
    platform: Arc<P>,
}

impl<S: SettingsStore, P: PlatformClient> SuppressionPipeline<S, P> {
    pub fn new(store: Arc<S>, platform: Arc<P>) -> Self {
        Self { store, platform }
    }

    /// 本地过滤：每个用户至多一个候选，扫描顺序的首个命中决定展示哪个词
    pub fn select(&self, message: &MessageEvent, rules: &GuildRules, hits: Vec<KeywordHit>) -> Vec<Candidate> {
        let mut seen: HashSet<UserId> = HashSet::new();
        let mut candidates = Vec::new();

        for hit in hits {
            let target = hit.subscription.owner_id;
            if !seen.insert(target) {
                continue;
            }
            // 不通知本人
            if target == message.author_id {
                continue;
            }
            // 暂停用户构建期已剔除；这里尽力复查上次重建之后的变更
            if rules.paused_users.contains(&target) {
                continue;
            }
            // 该用户忽略了这个频道
            if rules
                .ignored_channels
                .get(&target)
                .map_or(false, |set| set.contains(&message.channel_id))
            {
                continue;
            }
            candidates.push(Candidate { user_id: target, hit });
        }

        candidates
    }

    /// 远端检查：成员存在、频道可见、发送者未被屏蔽
    ///
    /// 返回 Ok(false) 表示正常丢弃；Err 由调用方按丢弃处理。
    pub async fn admit(&self, message: &MessageEvent, target: UserId) -> Result<bool> {
        if self.platform.resolve_user(message.guild_id, target).await?.is_none() {
            debug!(user_id = target, "candidate dropped: not a resolvable member");
            return Ok(false);
        }

        if !self
            .platform
            .can_user_view_channel(target, message.channel_id)
            .await?
        {
            debug!(user_id = target, channel_id = message.channel_id, "candidate dropped: channel not visible");
            return Ok(false);
        }

        let blocked = self.store.read_block_list(message.guild_id, target).await?;
        if blocked.contains(&message.author_id) {
            debug!(user_id = target, author_id = message.author_id, "candidate dropped: sender blocked");
            return Ok(false);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::KeywordMatcher;
    use crate::platform::{DeliveryResult, UserRef};
    use crate::store::{GuildSettings, MemoryStore, SettingsStore, Subscription};
    use crate::types::{ChannelId, GuildId};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};

    /// 测试用平台：可配置不可见频道与无法解析的用户
    #[derive(Default)]
    struct MockPlatform {
        hidden_channels: HashMap<UserId, HashSet<ChannelId>>,
        missing_users: HashSet<UserId>,
    }

    #[async_trait]
    impl PlatformClient for MockPlatform {
        async fn can_user_view_channel(&self, user_id: UserId, channel_id: ChannelId) -> Result<bool> {
            Ok(!self
                .hidden_channels
                .get(&user_id)
                .map_or(false, |set| set.contains(&channel_id)))
        }

        async fn send_direct_message(&self, _user_id: UserId, _content: &str) -> Result<DeliveryResult> {
            Ok(DeliveryResult::Sent)
        }

        async fn resolve_user(&self, _guild_id: GuildId, user_id: UserId) -> Result<Option<UserRef>> {
            if self.missing_users.contains(&user_id) {
                return Ok(None);
            }
            Ok(Some(UserRef { id: user_id, display_name: format!("user-{}", user_id) }))
        }
    }

    fn sub(owner_id: UserId, word: &str) -> Subscription {
        Subscription {
            owner_id,
            lowered_word: word.to_string(),
            original_word: word.to_string(),
            trigger_count: 0,
        }
    }

    fn message(author_id: UserId, text: &str) -> MessageEvent {
        MessageEvent {
            author_id,
            guild_id: 1,
            channel_id: 100,
            message_id: 1000,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    fn rules_for(subs: Vec<Subscription>, settings: &GuildSettings) -> GuildRules {
        GuildRules {
            matcher: KeywordMatcher::build(&subs, &settings.paused_users),
            paused_users: settings.paused_users.clone(),
            ignored_channels: settings.ignored_channels.clone(),
        }
    }

    fn pipeline() -> SuppressionPipeline<MemoryStore, MockPlatform> {
        SuppressionPipeline::new(Arc::new(MemoryStore::new()), Arc::new(MockPlatform::default()))
    }

    #[tokio::test]
    async fn test_one_candidate_per_user_even_with_many_hits() {
        let pipeline = pipeline();
        let settings = GuildSettings::default();
        let rules = rules_for(vec![sub(7, "solar"), sub(7, "voice")], &settings);
        let msg = message(3, "solar voice solar");

        let hits = rules.matcher.scan(&msg.text);
        assert_eq!(hits.len(), 3);

        let candidates = pipeline.select(&msg, &rules, hits);
        assert_eq!(candidates.len(), 1);
        // 首个命中决定展示的词
        assert_eq!(candidates[0].hit.subscription.lowered_word, "solar");
        assert_eq!(candidates[0].hit.position, 0);
    }

    #[tokio::test]
    async fn test_author_never_notified_for_own_message() {
        let pipeline = pipeline();
        let settings = GuildSettings::default();
        let rules = rules_for(vec![sub(7, "solar")], &settings);
        let msg = message(7, "I said solar myself");

        let hits = rules.matcher.scan(&msg.text);
        assert!(pipeline.select(&msg, &rules, hits).is_empty());
    }

    #[tokio::test]
    async fn test_paused_user_rechecked_after_rebuild() {
        let pipeline = pipeline();
        // 模拟：构建后用户 7 暂停，规则里的 paused_users 已更新但 matcher 未重建
        let mut settings = GuildSettings::default();
        settings.paused_users.insert(7);
        let rules = GuildRules {
            matcher: KeywordMatcher::build(&[sub(7, "solar")], &HashSet::new()),
            paused_users: settings.paused_users.clone(),
            ignored_channels: HashMap::new(),
        };
        let msg = message(3, "solar");

        let hits = rules.matcher.scan(&msg.text);
        assert_eq!(hits.len(), 1);
        assert!(pipeline.select(&msg, &rules, hits).is_empty());
    }

    #[tokio::test]
    async fn test_ignored_channel_drops_candidate() {
        let pipeline = pipeline();
        let mut settings = GuildSettings::default();
        settings.ignored_channels.entry(7).or_default().insert(100);
        let rules = rules_for(vec![sub(7, "solar")], &settings);
        let msg = message(3, "solar");

        let hits = rules.matcher.scan(&msg.text);
        assert!(pipeline.select(&msg, &rules, hits).is_empty());

        // 其他频道不受影响
        let mut other = message(3, "solar");
        other.channel_id = 200;
        let hits = rules.matcher.scan(&other.text);
        assert_eq!(pipeline.select(&other, &rules, hits).len(), 1);
    }

    #[tokio::test]
    async fn test_admit_rejects_blocked_sender() {
        let store = Arc::new(MemoryStore::new());
        store
            .transactionally_update(1, |s| {
                s.block_lists.entry(7).or_default().insert(3);
            })
            .await
            .unwrap();
        let pipeline = SuppressionPipeline::new(store, Arc::new(MockPlatform::default()));

        assert!(!pipeline.admit(&message(3, "solar"), 7).await.unwrap());
        // 别的发送者不受影响
        assert!(pipeline.admit(&message(4, "solar"), 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_admit_rejects_invisible_channel() {
        let mut platform = MockPlatform::default();
        platform.hidden_channels.entry(7).or_default().insert(100);
        let pipeline = SuppressionPipeline::new(Arc::new(MemoryStore::new()), Arc::new(platform));

        assert!(!pipeline.admit(&message(3, "solar"), 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_admit_rejects_unresolvable_member() {
        let mut platform = MockPlatform::default();
        platform.missing_users.insert(7);
        let pipeline = SuppressionPipeline::new(Arc::new(MemoryStore::new()), Arc::new(platform));

        assert!(!pipeline.admit(&message(3, "solar"), 7).await.unwrap());
    }
}
