//! 通知引擎 - 消息/打字事件入口、逐候选投递任务与订阅命令面
//!
//! 控制流：消息 → 缓存取规则 → 扫描 → 抑制管线本地过滤 → 每个候选
//! 各自 spawn 一个投递任务（信号量限并发）→ 可选防抖等待 → 事务内
//! 触发计数 + 配额判定 → 发私信或丢弃。打字事件只触碰防抖门。
//! 投递任务 fire-and-forget，消息处理路径不等待它们完成；单个候选
//! 的任何失败只记日志，不影响其他候选，也不影响后续消息。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::MatcherCache;
use crate::debounce::{DebounceGate, DEFAULT_DEBOUNCE_WINDOW};
use crate::matcher::KeywordHit;
use crate::pipeline::{Candidate, SuppressionPipeline};
use crate::platform::{DeliveryResult, MessageEvent, PlatformClient, TypingEvent};
use crate::quota::{QuotaLedger, DEFAULT_DAILY_LIMIT};
use crate::store::{GuildSettings, SettingsStore, Subscription};
use crate::types::{ChannelId, GuildId, UserId};

/// 关键词长度下限（字符数）
pub const MIN_KEYWORD_CHARS: usize = 2;
/// 关键词长度上限（字符数）
pub const MAX_KEYWORD_CHARS: usize = 50;

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 每用户每日通知上限
    pub quota_limit: u32,
    /// 防抖窗口
    pub debounce_window: Duration,
    /// 投递任务并发上限
    pub max_concurrent_deliveries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quota_limit: DEFAULT_DAILY_LIMIT,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            max_concurrent_deliveries: 16,
        }
    }
}

impl EngineConfig {
    pub fn with_quota_limit(mut self, limit: u32) -> Self {
        self.quota_limit = limit;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_max_concurrent_deliveries(mut self, max: usize) -> Self {
        self.max_concurrent_deliveries = max;
        self
    }
}

struct EngineInner<S, P> {
    store: Arc<S>,
    platform: Arc<P>,
    cache: MatcherCache<S>,
    pipeline: SuppressionPipeline<S, P>,
    quota: QuotaLedger<S>,
    debounce: DebounceGate,
    delivery_permits: Semaphore,
    config: EngineConfig,
}

/// 通知引擎；clone 共享同一份内部状态，可随意分发给事件处理任务
pub struct NotificationEngine<S, P> {
    inner: Arc<EngineInner<S, P>>,
}

impl<S, P> Clone for NotificationEngine<S, P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S, P> NotificationEngine<S, P>
where
    S: SettingsStore + 'static,
    P: PlatformClient + 'static,
{
    pub fn new(store: Arc<S>, platform: Arc<P>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                cache: MatcherCache::new(store.clone()),
                pipeline: SuppressionPipeline::new(store.clone(), platform.clone()),
                quota: QuotaLedger::new(store.clone(), config.quota_limit),
                debounce: DebounceGate::new(),
                delivery_permits: Semaphore::new(config.max_concurrent_deliveries),
                store,
                platform,
                config,
            }),
        }
    }

    // ------------------------------------------------------------------
    // 事件入口
    // ------------------------------------------------------------------

    /// 处理一条收到的消息；投递任务 spawn 后立即返回
    pub async fn handle_message(&self, message: MessageEvent) -> Result<()> {
        let rules = self.inner.cache.get_or_build(message.guild_id).await?;
        let hits = rules.matcher.scan(&message.text);
        if hits.is_empty() {
            return Ok(());
        }

        let candidates = self.inner.pipeline.select(&message, &rules, hits);
        debug!(
            guild_id = message.guild_id,
            message_id = message.message_id,
            candidates = candidates.len(),
            "keyword candidates selected"
        );

        for candidate in candidates {
            let engine = self.clone();
            let message = message.clone();
            tokio::spawn(async move {
                let user_id = candidate.user_id;
                if let Err(error) = engine.deliver_candidate(&message, candidate).await {
                    warn!(user_id, error = %error, "notification delivery failed");
                }
            });
        }

        Ok(())
    }

    /// 打字事件：清掉该 (user, channel) 键下全部在途通知
    pub fn handle_typing(&self, event: &TypingEvent) {
        self.inner.debounce.cancel_all((event.user_id, event.channel_id));
    }

    /// 单个候选的完整投递流程（独立任务内执行，失败互不影响）
    async fn deliver_candidate(&self, message: &MessageEvent, candidate: Candidate) -> Result<()> {
        let inner = &*self.inner;
        let user_id = candidate.user_id;

        // 远端抑制检查；解析失败按丢弃处理
        match inner.pipeline.admit(message, user_id).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(error) => {
                debug!(user_id, error = %error, "candidate dropped: resolution failed");
                return Ok(());
            }
        }

        // 仅对开启"跳过活跃频道"的用户走防抖；标记读不到就按未开启立即投递
        let debounced = match inner
            .store
            .read_ignore_active_channel_flag(message.guild_id, user_id)
            .await
        {
            Ok(flag) => flag,
            Err(error) => {
                warn!(user_id, error = %error, "read ignore-active-channel flag failed, delivering immediately");
                false
            }
        };
        if debounced {
            let key = (user_id, message.channel_id);
            inner.debounce.register(key, message.message_id);
            tokio::time::sleep(inner.config.debounce_window).await;
            if !inner.debounce.try_claim(key, message.message_id) {
                debug!(user_id, channel_id = message.channel_id, "notification debounced: user is typing here");
                return Ok(());
            }
        }

        let _permit = inner.delivery_permits.acquire().await?;

        // 触发计数 + 配额，同一事务
        let decision = inner
            .quota
            .charge(message.guild_id, user_id, &candidate.hit.subscription.lowered_word)
            .await?;
        if !decision.allowed {
            debug!(user_id, guild_id = message.guild_id, "notification dropped: daily quota exceeded");
            return Ok(());
        }

        let content = format_notification(message, &candidate.hit);
        match inner.platform.send_direct_message(user_id, &content).await {
            Ok(DeliveryResult::Sent) => {
                info!(
                    user_id,
                    guild_id = message.guild_id,
                    word = %candidate.hit.subscription.lowered_word,
                    "keyword notification sent"
                );
            }
            Ok(DeliveryResult::Blocked) => {
                // 用户关了私信：正常丢弃，不算错误
                debug!(user_id, "notification dropped: direct messages disabled");
            }
            Ok(DeliveryResult::Failed(reason)) => {
                warn!(user_id, reason = %reason, "notification send failed");
            }
            Err(error) => {
                warn!(user_id, error = %error, "notification send failed");
            }
        }

        if decision.just_reached_threshold {
            let warning = format_quota_warning(inner.quota.limit());
            if let Err(error) = inner.platform.send_direct_message(user_id, &warning).await {
                warn!(user_id, error = %error, "quota warning send failed");
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // 订阅命令面（命令层调用；每个变更成功前都重建匹配器）
    // ------------------------------------------------------------------

    /// 新增关键词；重复时返回 false
    pub async fn add_keyword(&self, guild_id: GuildId, user_id: UserId, word: &str) -> Result<bool> {
        let original = word.trim().to_string();
        let chars = original.chars().count();
        if !(MIN_KEYWORD_CHARS..=MAX_KEYWORD_CHARS).contains(&chars) {
            anyhow::bail!(
                "keyword must be {}-{} characters, got {}",
                MIN_KEYWORD_CHARS,
                MAX_KEYWORD_CHARS,
                chars
            );
        }
        let lowered = original.to_lowercase();

        let (added, snapshot) = self
            .inner
            .store
            .transactionally_update(guild_id, move |settings| {
                let added = settings.add_subscription(user_id, &lowered, &original);
                (added, settings.snapshot())
            })
            .await?;
        self.inner.cache.invalidate(guild_id, &snapshot).await;
        Ok(added)
    }

    /// 删除关键词；不存在时返回 false
    pub async fn remove_keyword(&self, guild_id: GuildId, user_id: UserId, word: &str) -> Result<bool> {
        let lowered = word.trim().to_lowercase();
        let (removed, snapshot) = self
            .inner
            .store
            .transactionally_update(guild_id, move |settings| {
                let removed = settings.remove_subscription(user_id, &lowered);
                (removed, settings.snapshot())
            })
            .await?;
        self.inner.cache.invalidate(guild_id, &snapshot).await;
        Ok(removed)
    }

    /// 清空某用户的全部关键词，返回删除数量
    pub async fn clear_keywords(&self, guild_id: GuildId, user_id: UserId) -> Result<usize> {
        let (cleared, snapshot) = self
            .inner
            .store
            .transactionally_update(guild_id, move |settings| {
                let cleared = settings.clear_subscriptions(user_id);
                (cleared, settings.snapshot())
            })
            .await?;
        self.inner.cache.invalidate(guild_id, &snapshot).await;
        Ok(cleared)
    }

    /// 列出某用户的订阅
    pub async fn list_keywords(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<Subscription>> {
        let snapshot = self.inner.store.read_subscriptions(guild_id).await?;
        Ok(snapshot
            .subscriptions
            .into_iter()
            .filter(|s| s.owner_id == user_id)
            .collect())
    }

    /// 全局暂停通知
    pub async fn pause(&self, guild_id: GuildId, user_id: UserId) -> Result<()> {
        self.mutate_and_invalidate(guild_id, move |settings| {
            settings.paused_users.insert(user_id);
        })
        .await
    }

    /// 恢复通知
    pub async fn resume(&self, guild_id: GuildId, user_id: UserId) -> Result<()> {
        self.mutate_and_invalidate(guild_id, move |settings| {
            settings.paused_users.remove(&user_id);
        })
        .await
    }

    /// 屏蔽某个发送者
    pub async fn block_user(&self, guild_id: GuildId, user_id: UserId, blocked_id: UserId) -> Result<()> {
        self.mutate_and_invalidate(guild_id, move |settings| {
            settings.block_lists.entry(user_id).or_default().insert(blocked_id);
        })
        .await
    }

    /// 解除屏蔽
    pub async fn unblock_user(&self, guild_id: GuildId, user_id: UserId, blocked_id: UserId) -> Result<()> {
        self.mutate_and_invalidate(guild_id, move |settings| {
            if let Some(set) = settings.block_lists.get_mut(&user_id) {
                set.remove(&blocked_id);
                if set.is_empty() {
                    settings.block_lists.remove(&user_id);
                }
            }
        })
        .await
    }

    /// 忽略某个频道的通知
    pub async fn ignore_channel(&self, guild_id: GuildId, user_id: UserId, channel_id: ChannelId) -> Result<()> {
        self.mutate_and_invalidate(guild_id, move |settings| {
            settings.ignored_channels.entry(user_id).or_default().insert(channel_id);
        })
        .await
    }

    /// 取消忽略频道
    pub async fn unignore_channel(&self, guild_id: GuildId, user_id: UserId, channel_id: ChannelId) -> Result<()> {
        self.mutate_and_invalidate(guild_id, move |settings| {
            if let Some(set) = settings.ignored_channels.get_mut(&user_id) {
                set.remove(&channel_id);
                if set.is_empty() {
                    settings.ignored_channels.remove(&user_id);
                }
            }
        })
        .await
    }

    /// 开关"跳过活跃频道"（防抖投递）
    pub async fn set_ignore_active_channel(&self, guild_id: GuildId, user_id: UserId, enabled: bool) -> Result<()> {
        self.mutate_and_invalidate(guild_id, move |settings| {
            if enabled {
                settings.ignore_active_channel.insert(user_id);
            } else {
                settings.ignore_active_channel.remove(&user_id);
            }
        })
        .await
    }

    /// 变更 + 重建匹配器的公共骨架
    async fn mutate_and_invalidate<F>(&self, guild_id: GuildId, mutator: F) -> Result<()>
    where
        F: FnOnce(&mut GuildSettings) + Send + 'static,
    {
        let snapshot = self
            .inner
            .store
            .transactionally_update(guild_id, move |settings| {
                mutator(settings);
                settings.snapshot()
            })
            .await?;
        self.inner.cache.invalidate(guild_id, &snapshot).await;
        Ok(())
    }
}

/// 通知正文 - 引擎仅有的两条用户可见消息之一
pub fn format_notification(message: &MessageEvent, hit: &KeywordHit) -> String {
    format!(
        "🔔 关键词 \"{}\" 被提及\n频道: <#{}>\n> {}",
        hit.subscription.original_word, message.channel_id, message.text
    )
}

/// 配额到顶告警 - 另一条用户可见消息，每个配额日至多一次
pub fn format_quota_warning(limit: u32) -> String {
    format!(
        "⚠️ 今天的关键词通知已达上限（{} 条），之后的命中将静默跳过，UTC 日期变更后自动恢复。",
        limit
    )
}
