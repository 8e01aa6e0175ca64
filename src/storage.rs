//! The credential store: small named artifacts (account key, issued
//! certificate and key, response log) with explicit permission bits.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// File name of the issued certificate chain (production runs only).
pub const CERTIFICATE_FILE: &str = "certificate.crt";
/// File name of the issued certificate's private key (production runs only).
pub const CERTIFICATE_KEY_FILE: &str = "certificate.key";
/// File name of the raw-response diagnostic log, written on every run.
pub const RESPONSE_LOG_FILE: &str = "responses.txt";

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid storage name: {0}")]
    InvalidName(String),
}

type Result<T> = std::result::Result<T, StorageError>;

/// Flat, name-keyed artifact store.
///
/// Names are plain file names, never paths. `write` must not leave a
/// partially-written artifact visible under the final name.
pub trait Storage: fmt::Debug {
    /// Reads an artifact; `Ok(None)` when it does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Writes an artifact with the given Unix permission bits.
    fn write(&self, name: &str, data: &[u8], mode: u32) -> Result<()>;

    /// Deletes an artifact; deleting a missing artifact is not an error.
    fn delete(&self, name: &str) -> Result<()>;
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name == "."
        || name == ".."
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Store backed by one directory on disk.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens the store, creating the directory (mode `0o755`) if absent.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            if !root.exists() {
                fs::DirBuilder::new().recursive(true).mode(0o755).create(&root)?;
            }
        }
        #[cfg(not(unix))]
        fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        check_name(name)?;
        Ok(self.root.join(name))
    }
}

impl Storage for FileStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, data: &[u8], mode: u32) -> Result<()> {
        let path = self.path_for(name)?;

        // Stage next to the target, then rename, so readers never observe a
        // half-written artifact under the final name. The mode is applied at
        // creation, before any bytes land in the file.
        let staging = self.root.join(format!("{name}.tmp"));

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&staging)?;
            // a leftover staging file keeps its old bits; correct them
            file.set_permissions(fs::Permissions::from_mode(mode))?;
            file.write_all(data)?;
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            fs::write(&staging, data)?;
        }

        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        check_name(name)?;
        Ok(self.entries.borrow().get(name).cloned())
    }

    fn write(&self, name: &str, data: &[u8], _mode: u32) -> Result<()> {
        check_name(name)?;
        self.entries.borrow_mut().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        check_name(name)?;
        self.entries.borrow_mut().remove(name);
        Ok(())
    }
}
