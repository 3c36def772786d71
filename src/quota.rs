//! 配额账本 - 每用户每日通知计数，UTC 日期边界懒重置
//!
//! 计数与订阅触发计数共用同一个设置聚合事务（见 `SettingsStore::transactionally_update`），
//! 因此并发消息下两者保持一致。没有后台定时器：第一次触碰计数时发现日期已变就清空。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::store::SettingsStore;
use crate::types::{GuildId, UserId};

/// 默认每日配额（与源系统一致）
pub const DEFAULT_DAILY_LIMIT: u32 = 200;

/// 配额判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    /// 是否允许本次发送
    pub allowed: bool,
    /// 本次恰好到达阈值（触发一次性告警）
    pub just_reached_threshold: bool,
}

/// 单个 guild 的配额状态（持久化在设置聚合内）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaState {
    /// 当前配额日（UTC 日历日期）
    #[serde(default)]
    pub quota_date: NaiveDate,
    /// userId -> 当日计数
    #[serde(default)]
    pub counts: HashMap<UserId, u32>,
}

impl QuotaState {
    /// 检查并自增计数（必须在设置聚合事务内调用）
    ///
    /// 日期与存储的配额日不同时先清空全部计数再推进日期。
    /// 计数到达 limit 时仍然允许发送并置 `just_reached_threshold`；
    /// 超过 limit 后静默拒绝。
    pub fn check_and_increment(&mut self, user_id: UserId, today: NaiveDate, limit: u32) -> QuotaDecision {
        if self.quota_date != today {
            self.counts.clear();
            self.quota_date = today;
        }

        let count = self.counts.entry(user_id).or_insert(0);
        *count += 1;

        QuotaDecision {
            allowed: *count <= limit,
            just_reached_threshold: *count == limit,
        }
    }

    /// 当前计数（仅测试/诊断用）
    pub fn count(&self, user_id: UserId) -> u32 {
        self.counts.get(&user_id).copied().unwrap_or(0)
    }
}

/// 配额账本 - 在持久层事务内执行 check-and-increment
pub struct QuotaLedger<S> {
    store: Arc<S>,
    limit: u32,
}

impl<S: SettingsStore> QuotaLedger<S> {
    pub fn new(store: Arc<S>, limit: u32) -> Self {
        Self { store, limit }
    }

    /// 每日配额上限
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// 原子地检查并自增 (guild, user) 的当日计数
    pub async fn check_and_increment(&self, guild_id: GuildId, user_id: UserId) -> Result<QuotaDecision> {
        let limit = self.limit;
        self.store
            .transactionally_update(guild_id, move |settings| {
                settings.quota.check_and_increment(user_id, Utc::now().date_naive(), limit)
            })
            .await
    }

    /// 配额检查 + 订阅触发计数，同一事务完成
    ///
    /// 通知派发路径用这个入口，保证 triggerCount 与配额计数一致。
    pub async fn charge(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        lowered_word: &str,
    ) -> Result<QuotaDecision> {
        let limit = self.limit;
        let word = lowered_word.to_string();
        self.store
            .transactionally_update(guild_id, move |settings| {
                settings.bump_trigger_count(user_id, &word);
                settings.quota.check_and_increment(user_id, Utc::now().date_naive(), limit)
            })
            .await
    }
}
