//! 关键词匹配器 - 不可变 arena trie 的多模式全词匹配
//!
//! 一个 guild 一个实例，由订阅变更时整体重建（见 `cache`），构建完成后
//! 只读，天然满足单写多读。扫描代价约为 文本长度 × 平均模式深度：
//! 对每个起始位置沿 trie 走一次，公共前缀只走一遍，途中每个终结节点
//! 都报一次命中（嵌套命中如 "art" / "art show" 会同时触发）。
//!
//! 全词边界按字母相邻判定：命中左右紧邻的字符只要不是字母就算边界，
//! 数字和标点都是合法边界，不做完整的 Unicode 分词。

use std::collections::{HashMap, HashSet};

use crate::store::Subscription;
use crate::types::UserId;

/// 一次命中：位置 + 命中的订阅
///
/// `position` 是小写化后文本里的字符偏移。
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub position: usize,
    pub subscription: Subscription,
}

/// trie 节点；`children` 的值和 `terminals` 的元素都是 arena 下标
#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, usize>,
    /// 恰好终结于此节点的订阅下标
    terminals: Vec<usize>,
}

/// 单个 guild 的只读匹配结构
#[derive(Debug)]
pub struct KeywordMatcher {
    nodes: Vec<TrieNode>,
    subscriptions: Vec<Subscription>,
}

impl KeywordMatcher {
    /// 从订阅列表构建；`ignored_users` 的订阅在构建期剔除
    /// （暂停的用户得到零命中，而不是逐命中过滤）
    pub fn build(subscriptions: &[Subscription], ignored_users: &HashSet<UserId>) -> Self {
        let mut nodes = vec![TrieNode::default()];
        let mut kept: Vec<Subscription> = Vec::new();

        for sub in subscriptions {
            if ignored_users.contains(&sub.owner_id) {
                continue;
            }
            if sub.lowered_word.is_empty() {
                continue;
            }

            let mut current = 0usize;
            for ch in sub.lowered_word.chars() {
                current = match nodes[current].children.get(&ch) {
                    Some(&next) => next,
                    None => {
                        let next = nodes.len();
                        nodes.push(TrieNode::default());
                        nodes[current].children.insert(ch, next);
                        next
                    }
                };
            }
            nodes[current].terminals.push(kept.len());
            kept.push(sub.clone());
        }

        Self { nodes, subscriptions: kept }
    }

    /// 模式数量
    pub fn pattern_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// 扫描文本，按扫描顺序（起始位置升序、同位置短词优先）返回全部全词命中
    pub fn scan(&self, text: &str) -> Vec<KeywordHit> {
        let mut hits = Vec::new();
        if self.subscriptions.is_empty() {
            return hits;
        }

        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for start in 0..chars.len() {
            // 左边界：前一个字符是字母时这里不可能有全词命中
            if start > 0 && chars[start - 1].is_alphabetic() {
                continue;
            }

            let mut current = 0usize;
            for (offset, &ch) in chars[start..].iter().enumerate() {
                current = match self.nodes[current].children.get(&ch) {
                    Some(&next) => next,
                    None => break,
                };

                if self.nodes[current].terminals.is_empty() {
                    continue;
                }
                // 右边界：命中之后的字符不存在或不是字母
                let end = start + offset + 1;
                if end < chars.len() && chars[end].is_alphabetic() {
                    continue;
                }
                for &idx in &self.nodes[current].terminals {
                    hits.push(KeywordHit {
                        position: start,
                        subscription: self.subscriptions[idx].clone(),
                    });
                }
            }
        }

        hits
    }
}
