//! 键值持久化。
//!
//! 权限状态的 `static_routes`、`dynamic_routes` 与 `tabs` 以 JSON 形态落盘，
//! 键名带进程级前缀；`is_dynamic_routes_loaded` 永不持久化，由调用方保证。

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::StorageConfig;
use crate::error::{CoreError, ErrorCategory, codes};

/// 存储层错误。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failure on `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("storage codec failure on `{key}`: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for CoreError {
    fn from(value: StorageError) -> Self {
        let code = match value {
            StorageError::Io { .. } => codes::STORAGE_IO,
            StorageError::Codec { .. } => codes::STORAGE_CODEC,
        };
        CoreError::new(code, value.to_string())
            .with_category(ErrorCategory::NonRetryable)
            .with_cause(value)
    }
}

/// 字符串键值存储契约。
///
/// - `get` 对不存在的键返回 `Ok(None)`；
/// - `remove` 对不存在的键视为成功。
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// 读取并反序列化 JSON 值。
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StorageError::Codec {
                key: key.to_owned(),
                source,
            }),
        None => Ok(None),
    }
}

/// 序列化为 JSON 并写入。
pub fn save_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let text = serde_json::to_string(value).map_err(|source| StorageError::Codec {
        key: key.to_owned(),
        source,
    })?;
    store.set(key, &text)
}

/// 内存存储，进程退出即丢失。
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// 目录存储：每个键对应目录下的一个 `<key>.json` 文件。
///
/// # 契约说明（What）
/// - 键名中除 ASCII 字母数字、`-`、`_`、`.` 外的字符会被替换为 `_`，避免路径穿越；
/// - 写入先落到临时文件再重命名，读者不会观察到写了一半的内容。
#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// 在指定目录上创建存储，目录不存在时自动创建。
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|source| StorageError::Io {
            key: directory.display().to_string(),
            source,
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{file}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_owned(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let target = self.path_for(key);
        let staging = target.with_extension("json.tmp");
        std::fs::write(&staging, value)
            .and_then(|()| std::fs::rename(&staging, &target))
            .map_err(|source| StorageError::Io {
                key: key.to_owned(),
                source,
            })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_owned(),
                source,
            }),
        }
    }
}

/// 按配置打开存储：设置了 `directory` 时使用 [`FileStore`]，否则使用 [`MemoryStore`]。
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>, StorageError> {
    match &config.directory {
        Some(directory) => Ok(Arc::new(FileStore::open(directory)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}
