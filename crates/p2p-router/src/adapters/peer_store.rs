//! JSON file peer store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::errors::PeerStoreError;
use crate::domain::peer_table::StoredPeer;
use crate::ports::PeerStore;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PeerStoreFile {
    version: u32,
    peers: Vec<StoredPeer>,
}

/// Peer records in a single JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFilePeerStore {
    path: PathBuf,
}

impl JsonFilePeerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl PeerStore for JsonFilePeerStore {
    fn load(&self) -> Result<Vec<StoredPeer>, PeerStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let file: PeerStoreFile = serde_json::from_str(&raw)?;
        debug!(path = %self.path.display(), peers = file.peers.len(), "loaded peer store");
        Ok(file.peers)
    }

    fn save(&self, peers: &[StoredPeer]) -> Result<(), PeerStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = PeerStoreFile {
            version: FORMAT_VERSION,
            peers: peers.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let tmp = self.tmp_path();
        {
            let mut out = fs::File::create(&tmp)?;
            out.write_all(&json)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), peers = peers.len(), "saved peer store");
        Ok(())
    }
}
