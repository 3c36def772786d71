//! 文件存储 - 单个 JSON 文件 + fs2 文件锁的 `SettingsStore` 实现
//!
//! 所有 guild 的设置聚合存在一个 JSON 文件里。数据文件通过写临时文件
//! 再原子替换来持久化，因此锁不能落在数据文件自身上（rename 换 inode
//! 后锁就只护着旧文件）：锁持在旁边一个永不替换的 `.lock` 文件上，
//! 拿到锁之后才重读数据文件，写路径全程独占，满足
//! `transactionally_update` 要求的串行 read-modify-write 语义。

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::{GuildSettings, SettingsStore, SubscriptionSnapshot};
use crate::types::{GuildId, UserId};

/// 文件内容：guildId -> 设置聚合
#[derive(Debug, Default, Serialize, Deserialize)]
struct AllSettings {
    #[serde(default)]
    guilds: HashMap<GuildId, GuildSettings>,
}

/// JSON 文件存储
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// 默认路径 `~/.config/keyword-notify/settings.json`
    pub fn new() -> Self {
        Self { path: Self::default_path() }
    }

    /// 指定存储文件路径（测试用临时目录）
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("keyword-notify")
            .join("settings.json")
    }

    /// 打开（必要时创建）锁文件并加锁；锁文件独立于数据文件，永不替换
    fn acquire_lock(path: &Path, exclusive: bool) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))?;
        if exclusive {
            lock.lock_exclusive()?;
        } else {
            lock.lock_shared()?;
        }
        Ok(lock)
    }

    /// 读取全部设置；数据文件尚不存在视为空
    fn load(path: &Path) -> Result<AllSettings> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(AllSettings::default());
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("read settings file {}", path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(AllSettings::default());
        }
        serde_json::from_str(&raw).context("parse settings json")
    }

    /// 写临时文件后原子替换数据文件（调用方需持有独占锁）
    fn persist(path: &Path, all: &AllSettings) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(all)?)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// 共享锁下读取一个 guild 的设置
    fn read_guild(&self, guild_id: GuildId) -> Result<Option<GuildSettings>> {
        let lock = Self::acquire_lock(&self.path, false)?;
        let result = Self::load(&self.path);
        lock.unlock()?;
        let mut all = result?;
        Ok(all.guilds.remove(&guild_id))
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn read_subscriptions(&self, guild_id: GuildId) -> Result<SubscriptionSnapshot> {
        Ok(self
            .read_guild(guild_id)?
            .map(|g| g.snapshot())
            .unwrap_or_default())
    }

    async fn read_block_list(&self, guild_id: GuildId, user_id: UserId) -> Result<HashSet<UserId>> {
        Ok(self
            .read_guild(guild_id)?
            .and_then(|g| g.block_lists.get(&user_id).cloned())
            .unwrap_or_default())
    }

    async fn read_ignore_active_channel_flag(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        Ok(self
            .read_guild(guild_id)?
            .map_or(false, |g| g.ignore_active_channel.contains(&user_id)))
    }

    async fn transactionally_update<R, F>(&self, guild_id: GuildId, mutator: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut GuildSettings) -> R + Send + 'static,
    {
        // 拿锁会阻塞等待其他写者，放到阻塞线程池里做
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let lock = Self::acquire_lock(&path, true)?;
            // 持锁后才读，保证看到的是上一个写者落盘的内容
            let outcome: Result<R> = (|| {
                let mut all = Self::load(&path)?;
                let settings = all.guilds.entry(guild_id).or_default();
                let result = mutator(settings);
                Self::persist(&path, &all)?;
                Ok(result)
            })();
            lock.unlock()?;
            outcome
        })
        .await
        .context("settings transaction task panicked")?
    }
}
