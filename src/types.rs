//! 基础 ID 类型 - 与聊天平台侧保持一致的 64 位雪花 ID

/// 社区（guild）ID
pub type GuildId = u64;
/// 用户 ID
pub type UserId = u64;
/// 频道 ID
pub type ChannelId = u64;
/// 消息 ID
pub type MessageId = u64;

/// 防抖键：同一用户在同一频道的待发通知共享一个键
pub type PendingKey = (UserId, ChannelId);
