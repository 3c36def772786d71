//! Keyword Notify - guild 关键词通知引擎
//!
//! 监听每个 guild 的消息流，在数千个用户注册的关键词里做全词匹配，
//! 命中后给订阅者发私信。投递前依次经过自匹配抑制、屏蔽列表、
//! 频道忽略、打字防抖和每日配额这几层有序的抑制规则。

pub mod cache;
pub mod debounce;
pub mod engine;
pub mod matcher;
pub mod pipeline;
pub mod platform;
pub mod quota;
pub mod store;
pub mod types;

pub use cache::{GuildRules, MatcherCache};
pub use debounce::{DebounceGate, DEFAULT_DEBOUNCE_WINDOW};
pub use engine::{EngineConfig, NotificationEngine, MAX_KEYWORD_CHARS, MIN_KEYWORD_CHARS};
pub use matcher::{KeywordHit, KeywordMatcher};
pub use pipeline::{Candidate, SuppressionPipeline};
pub use platform::{DeliveryResult, MessageEvent, PlatformClient, TypingEvent, UserRef};
pub use quota::{QuotaDecision, QuotaLedger, QuotaState, DEFAULT_DAILY_LIMIT};
pub use store::{FileStore, GuildSettings, MemoryStore, SettingsStore, Subscription, SubscriptionSnapshot};
pub use types::{ChannelId, GuildId, MessageId, PendingKey, UserId};
