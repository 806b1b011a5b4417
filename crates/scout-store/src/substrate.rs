//! Durable key-value substrates backing [`PersistentStore`](crate::PersistentStore)

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// A string key-value store that survives the process
///
/// Mirrors the shape of browser-style storage: flat string keys, string
/// values, and a way to enumerate keys.
#[async_trait]
pub trait Substrate: Send + Sync + fmt::Debug {
    /// Whether the substrate can be used at all
    fn is_available(&self) -> bool {
        true
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    async fn remove_item(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;
}

/// Substrate held in process memory
#[derive(Debug, Default)]
pub struct MemorySubstrate {
    items: Mutex<HashMap<String, String>>,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.items.lock().keys().cloned().collect())
    }
}

/// Substrate backed by a directory, one file per key
///
/// Directory structure:
/// ```text
/// cache-dir/
/// ├── __countries.json__data            # form-urlencoded key
/// ├── __countries.json__data__ttl__
/// ├── ~3f5a...c2e1                      # sha256 of a key too long for a file name
/// └── ...
/// ```
///
/// Keys whose encoded form exceeds [`MAX_FILE_NAME`] bytes are stored under
/// the hash of the key, with the encoded key on the first line of the file.
pub struct DirectorySubstrate {
    path: PathBuf,
}

/// Longest encoded key stored under its own name
pub const MAX_FILE_NAME: usize = 200;

const HASHED_PREFIX: char = '~';

impl DirectorySubstrate {
    const TEMP_SUFFIX: &'static str = ".tmp";

    /// Open (creating if needed) a substrate rooted at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() && !path.is_dir() {
            return Err(StoreError::InvalidPath(format!(
                "{} exists and is not a directory",
                path.display()
            )));
        }
        fs::create_dir_all(&path).await?;

        info!("Opened cache directory {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn item_path(&self, key: &str) -> (PathBuf, Option<String>) {
        let encoded = encode_key(key);
        if encoded.len() <= MAX_FILE_NAME {
            return (self.path.join(encoded), None);
        }
        (self.path.join(hashed_name(key)), Some(encoded))
    }

    async fn hashed_key(&self, path: &Path) -> Result<Option<String>> {
        let contents = fs::read_to_string(path).await?;
        let header = contents.split('\n').next().unwrap_or_default();
        Ok(decode_key(header))
    }
}

impl fmt::Debug for DirectorySubstrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectorySubstrate")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl Substrate for DirectorySubstrate {
    fn is_available(&self) -> bool {
        self.path.is_dir()
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let (path, header) = self.item_path(key);
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(header) = header else {
            return Ok(Some(contents));
        };
        match contents.split_once('\n') {
            Some((stored, value)) if stored == header => Ok(Some(value.to_string())),
            _ => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let (target, header) = self.item_path(key);
        let mut temp = target.clone().into_os_string();
        temp.push(Self::TEMP_SUFFIX);

        match header {
            Some(header) => fs::write(&temp, format!("{}\n{}", header, value)).await?,
            None => fs::write(&temp, value).await?,
        }
        fs::rename(&temp, &target).await?;

        debug!("Wrote {} bytes to {:?}", value.len(), target);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let (path, _) = self.item_path(key);
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(Self::TEMP_SUFFIX) {
                continue;
            }
            let key = if name.starts_with(HASHED_PREFIX) {
                match self.hashed_key(&entry.path()).await {
                    Ok(key) => key,
                    Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => None,
                    Err(e) => return Err(e),
                }
            } else {
                decode_key(&name)
            };
            keys.extend(key);
        }

        Ok(keys)
    }
}

fn encode_key(key: &str) -> String {
    url::form_urlencoded::byte_serialize(key.as_bytes()).collect()
}

fn hashed_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{}{:x}", HASHED_PREFIX, digest)
}

fn decode_key(name: &str) -> Option<String> {
    url::form_urlencoded::parse(name.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
}
