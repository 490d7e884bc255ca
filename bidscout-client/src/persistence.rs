//! JSON files for client state that outlives a process.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ClientResult;

/// Read `path`, or `None` if it does not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> ClientResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let state = serde_json::from_str::<T>(&contents)?;
    Ok(Some(state))
}

pub fn save<T: Serialize + ?Sized>(path: &Path, state: &T) -> ClientResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(state)?;
    std::fs::write(path, contents)?;
    Ok(())
}
