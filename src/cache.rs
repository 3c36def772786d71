//! 匹配器缓存 - 每 guild 一份只读匹配规则，变更时整体换新
//!
//! 缓存的单元是 `GuildRules`：匹配器 + 暂停集合 + 频道忽略表，三者从
//! 同一份订阅视图派生，作为一个 `Arc` 整体替换。读者拿到的引用永远是
//! 完整构建好的；写者（invalidate）只在指针换入的一瞬间持写锁。
//! 并发失效时最后的写者获胜，这是安全的，因为规则构建后只读。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::debug;

use crate::matcher::KeywordMatcher;
use crate::store::{SettingsStore, SubscriptionSnapshot};
use crate::types::{ChannelId, GuildId, UserId};

/// 一个 guild 的派生匹配规则（不可变，整体重建）
#[derive(Debug)]
pub struct GuildRules {
    pub matcher: KeywordMatcher,
    /// 全局暂停通知的用户（构建期已从匹配器剔除，管线再做尽力复查）
    pub paused_users: HashSet<UserId>,
    /// userId -> 其忽略通知的频道集合
    pub ignored_channels: HashMap<UserId, HashSet<ChannelId>>,
}

impl GuildRules {
    fn from_snapshot(snapshot: &SubscriptionSnapshot) -> Self {
        Self {
            matcher: KeywordMatcher::build(&snapshot.subscriptions, &snapshot.paused_users),
            paused_users: snapshot.paused_users.clone(),
            ignored_channels: snapshot.ignored_channels.clone(),
        }
    }
}

/// 匹配器缓存
pub struct MatcherCache<S> {
    store: Arc<S>,
    rules: RwLock<HashMap<GuildId, Arc<GuildRules>>>,
}

impl<S: SettingsStore> MatcherCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// 取缓存，未命中则读存储构建
    ///
    /// 存储读取失败时向上传播错误，已有的旧缓存不受影响。
    pub async fn get_or_build(&self, guild_id: GuildId) -> Result<Arc<GuildRules>> {
        if let Some(rules) = self.rules.read().await.get(&guild_id) {
            return Ok(rules.clone());
        }

        let snapshot = self.store.read_subscriptions(guild_id).await?;
        let rules = Arc::new(GuildRules::from_snapshot(&snapshot));
        debug!(
            guild_id,
            patterns = rules.matcher.pattern_count(),
            "built guild matcher"
        );

        self.rules.write().await.insert(guild_id, rules.clone());
        Ok(rules)
    }

    /// 用新的订阅视图重建并换入；订阅/忽略状态的每次变更成功返回前必须调用
    pub async fn invalidate(&self, guild_id: GuildId, snapshot: &SubscriptionSnapshot) {
        let rules = Arc::new(GuildRules::from_snapshot(snapshot));
        debug!(
            guild_id,
            patterns = rules.matcher.pattern_count(),
            "guild matcher invalidated"
        );
        self.rules.write().await.insert(guild_id, rules);
    }
}
