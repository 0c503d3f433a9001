//! File-backed state store.
//!
//! Each state kind lives in its own file:
//!
//! ```text
//! magic (4) | version (1) | body length (u64 LE) | crc32 of body (u32 LE) | MessagePack body
//! ```

use super::{LedgerState, RegistryState, StateStore};
use crate::error::{BranchError, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the branch registry file.
const REGISTRY_MAGIC: &[u8; 4] = b"BRG\0";

/// Magic bytes for the migration ledger file.
const LEDGER_MAGIC: &[u8; 4] = b"MGL\0";

/// Current state file format version.
const STATE_VERSION: u8 = 1;

/// Registry file name inside the state directory.
pub const REGISTRY_FILE: &str = "branches.bin";

/// Ledger file name inside the state directory.
pub const LEDGER_FILE: &str = "ledger.bin";

/// State store writing framed MessagePack files into one directory.
pub struct FileStateStore {
    dir: PathBuf,
    /// Serializes writers within the process.
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_framed<T: Serialize>(&self, name: &str, magic: &[u8; 4], value: &T) -> Result<()> {
        let _lock = self.write_lock.lock();
        let encoded = rmp_serde::to_vec_named(value)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.dir.join(name))?;

        file.write_all(magic)?;
        file.write_all(&[STATE_VERSION])?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
        file.write_all(&encoded)?;

        file.sync_all()?;
        Ok(())
    }

    fn read_framed<T: DeserializeOwned>(&self, name: &str, magic: &[u8; 4]) -> Result<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path)?;

        let mut found = [0u8; 4];
        file.read_exact(&mut found)?;
        if &found != magic {
            return Err(BranchError::InvalidFormat(format!(
                "invalid magic in {}",
                path.display()
            )));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STATE_VERSION {
            return Err(BranchError::InvalidFormat(format!(
                "unsupported state version {} in {}",
                version[0],
                path.display()
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        // magic + version + len + crc
        let header_len = 4 + 1 + 8 + 4;
        let available = file.metadata()?.len().saturating_sub(header_len);
        if len > available {
            return Err(BranchError::Corruption(format!(
                "declared length {len} exceeds {available} bytes in {}",
                path.display()
            )));
        }

        let mut crc_bytes = [0u8; 4];
        file.read_exact(&mut crc_bytes)?;
        let stored_crc = u32::from_le_bytes(crc_bytes);

        let mut encoded = vec![0u8; len as usize];
        file.read_exact(&mut encoded)?;

        if crc32fast::hash(&encoded) != stored_crc {
            return Err(BranchError::Corruption(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        Ok(Some(rmp_serde::from_slice(&encoded)?))
    }
}

impl StateStore for FileStateStore {
    fn load_registry(&self) -> Result<Option<RegistryState>> {
        self.read_framed(REGISTRY_FILE, REGISTRY_MAGIC)
    }

    fn save_registry(&self, state: &RegistryState) -> Result<()> {
        self.write_framed(REGISTRY_FILE, REGISTRY_MAGIC, state)
    }

    fn load_ledger(&self) -> Result<Option<LedgerState>> {
        self.read_framed(LEDGER_FILE, LEDGER_MAGIC)
    }

    fn save_ledger(&self, state: &LedgerState) -> Result<()> {
        self.write_framed(LEDGER_FILE, LEDGER_MAGIC, state)
    }
}
