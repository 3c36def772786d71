//! 防抖门 - "跳过活跃频道" 用户的延迟投递与打字取消
//!
//! 每个 (userId, channelId) 键维护一个在途消息集合。投递任务先
//! `register` 再等一个固定窗口，窗口结束 `try_claim` 成功才真正发送；
//! 期间该键收到打字事件则 `cancel_all` 一次清空，等待中的任务认领
//! 失败、无副作用退出。整个共享表由单把互斥锁保护，临界区只做 O(1)
//! 的集合插入/删除。
//!
//! 认领语义取严格版：只有该 messageId 仍在集合里才算成功。
//! 键存在即成功的宽松版会让陈旧 id 认领到别的消息，不保留。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::types::{MessageId, PendingKey};

/// 默认防抖窗口（源系统为 8 秒）
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(8);

/// 防抖门
#[derive(Default)]
pub struct DebounceGate {
    pending: Mutex<HashMap<PendingKey, HashSet<MessageId>>>,
}

impl DebounceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条待发消息
    pub fn register(&self, key: PendingKey, message_id: MessageId) {
        let mut pending = self.pending.lock().unwrap();
        pending.entry(key).or_default().insert(message_id);
    }

    /// 窗口结束后认领：messageId 仍在集合里返回 true 并移除；
    /// 键已被 `cancel_all` 清空（或 id 已不在）返回 false
    pub fn try_claim(&self, key: PendingKey, message_id: MessageId) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let Some(ids) = pending.get_mut(&key) else {
            return false;
        };
        let claimed = ids.remove(&message_id);
        if ids.is_empty() {
            pending.remove(&key);
        }
        claimed
    }

    /// 打字事件：无条件清掉该键下全部在途消息
    pub fn cancel_all(&self, key: PendingKey) {
        let mut pending = self.pending.lock().unwrap();
        pending.remove(&key);
    }

    /// 该键是否还有在途消息（测试/诊断用）
    pub fn has_pending(&self, key: PendingKey) -> bool {
        self.pending.lock().unwrap().contains_key(&key)
    }
}
