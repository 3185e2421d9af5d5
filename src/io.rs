use std::path::PathBuf;

use tokio::fs::{create_dir_all, remove_file, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::err::Error;

/// Keyed face-image storage under a single data directory. One image per
/// key, last write wins; keys are validated student identifiers so they map
/// to plain file names.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.jpg", key))
    }

    /// Store image bytes under `key`, overwriting any previous image.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, Error> {
        let path = self.path_for(key);
        let mut writer = BufWriter::new(File::create(&path).await?);
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(path)
    }

    /// Fetch the image bytes stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let path = self.resolve(key)?;
        let mut bytes = Vec::new();
        BufReader::new(File::open(&path).await?)
            .read_to_end(&mut bytes)
            .await?;
        Ok(bytes)
    }

    /// Resolve `key` to the on-disk path of its image, failing if no image
    /// has been stored for it.
    pub fn resolve(&self, key: &str) -> Result<PathBuf, Error> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(Error::NotFound {
                message: format!("no stored image for key `{}`", key),
            });
        }
        Ok(path)
    }

    pub async fn remove(&self, key: &str) -> Result<(), Error> {
        let path = self.path_for(key);
        if path.exists() {
            remove_file(&path).await?;
        }
        Ok(())
    }
}
