use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::config::Limits;
use crate::simfs::SimFs;

/// A host file holding a serialized [`SimFs`].
pub struct ImageFile {
    path: PathBuf,
}

impl ImageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ImageFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the image, or formats a new file system with `limits` and stores it if there is no
    /// image yet.
    pub fn load(&self, limits: &Limits) -> Result<SimFs> {
        if !self.path.exists() {
            info!("no image at {}, formatting a new one", self.path.display());

            let fs = SimFs::new(limits.clone());
            self.store(&fs)?;

            return Ok(fs);
        }

        self.read()
    }

    /// Reads and checks an existing image.
    pub fn read(&self) -> Result<SimFs> {
        let mut file = File::options()
            .read(true)
            .open(&self.path)
            .with_context(|| format!("unable to open image {}", self.path.display()))?;

        let mut bytes = vec![];
        file.read_to_end(&mut bytes)
            .context("reading image")?;
        debug!("read {} bytes from {}", bytes.len(), self.path.display());

        let fs = SimFs::from_bytes(&bytes)
            .with_context(|| format!("unable to load image {}", self.path.display()))?;

        Ok(fs)
    }

    pub fn store(&self, fs: &SimFs) -> Result<()> {
        let bytes = fs.to_bytes()?;

        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("unable to open image {} for writing", self.path.display()))?;

        file.write_all(&bytes).context("writing image")?;
        debug!("wrote {} bytes to {}", bytes.len(), self.path.display());

        Ok(())
    }

    /// Deletes the image. Returns whether there was one.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("removed image {}", self.path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("unable to remove image {}", self.path.display()))
            }
        }
    }
}
