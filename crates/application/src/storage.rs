//! 文件存储协作者
//!
//! 只关心“传入字节、返回URL”的契约；真正的对象存储由部署环境提供。
//! 上传失败必须发生在任何持久化之前，由消息管道保证。

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

/// 待上传的文件
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// 上传完成后的文件引用
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub url: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// 文件存储接口
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store(&self, upload: FileUpload) -> Result<StoredFile, StorageError>;
}

/// 内存文件存储，用于测试和单机部署。
pub struct MemoryFileStorage {
    files: DashMap<String, Vec<u8>>,
}

impl Default for MemoryFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn store(&self, upload: FileUpload) -> Result<StoredFile, StorageError> {
        if upload.bytes.is_empty() {
            return Err(StorageError::Rejected("empty file".to_string()));
        }

        let key = Uuid::new_v4().to_string();
        let url = format!("/files/{}/{}", key, upload.file_name);
        let size = upload.bytes.len() as u64;
        self.files.insert(key, upload.bytes);

        Ok(StoredFile {
            url,
            file_name: upload.file_name,
            file_size: size,
            mime_type: upload.mime_type,
        })
    }
}

/// 总是失败的存储，用于测试上游失败路径。
#[cfg(test)]
pub struct FailingFileStorage;

#[cfg(test)]
#[async_trait]
impl FileStorage for FailingFileStorage {
    async fn store(&self, _upload: FileUpload) -> Result<StoredFile, StorageError> {
        Err(StorageError::Unavailable("storage offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_returns_url() {
        let storage = MemoryFileStorage::new();
        let stored = storage
            .store(FileUpload {
                file_name: "photo.png".to_string(),
                mime_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            })
            .await
            .unwrap();

        assert!(stored.url.starts_with("/files/"));
        assert!(stored.url.ends_with("/photo.png"));
        assert_eq!(stored.file_size, 3);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn empty_upload_rejected() {
        let storage = MemoryFileStorage::new();
        let result = storage
            .store(FileUpload {
                file_name: "empty".to_string(),
                mime_type: "text/plain".to_string(),
                bytes: Vec::new(),
            })
            .await;
        assert!(result.is_err());
        assert!(storage.is_empty());
    }
}
