//! 平台接口 - 聊天平台客户端的外部协作契约与事件类型

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, GuildId, MessageId, UserId};

/// 收到的聊天消息事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub author_id: UserId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// 打字开始事件（只进防抖门）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingEvent {
    pub user_id: UserId,
    pub channel_id: ChannelId,
}

/// 私信投递结果
///
/// `Blocked` 对应用户关闭了私信，按正常丢弃处理，不当作可重试错误。
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    Sent,
    Blocked,
    Failed(String),
}

/// 解析到的用户（guild 成员查询，平台侧可回退到全局用户目录）
#[derive(Debug, Clone)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
}

/// 聊天平台客户端
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// 用户当前能否看到该频道（权限/可见性实时检查）
    async fn can_user_view_channel(&self, user_id: UserId, channel_id: ChannelId) -> Result<bool>;

    /// 发送私信
    async fn send_direct_message(&self, user_id: UserId, content: &str) -> Result<DeliveryResult>;

    /// 解析 guild 成员；用户已离开等情况返回 None
    async fn resolve_user(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<UserRef>>;
}
