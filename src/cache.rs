//! Session cache on disk.
//!
//! The cache is a JSON document shared with other Roborock tooling:
//! `{"email": ..., "user_data": {...}, "cache_data": {"home_data": {...}}}`. Candidate files
//! are read in order; missing or malformed ones are skipped rather than treated as errors.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{is_truthy, json_scalar_to_string};

/// iot_id -> human readable room name.
pub type RoomNameMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Raw session record; parsed into `UserData` by the refresh step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_data: Option<Map<String, Value>>,
    /// Keys written by other tools; preserved on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CachedSession {
    /// Both an e-mail and a session token are present.
    pub fn has_session(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.is_empty()) && self.user_data.as_ref().is_some_and(is_truthy)
    }

    pub fn set_home_data(&mut self, home_data: Value) {
        self.cache_data
            .get_or_insert_with(Map::new)
            .insert("home_data".to_string(), home_data);
    }

    /// Overwrites `path` with the pretty-printed session.
    pub fn store(&self, path: &Path) -> Result<(), String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .map_err(|e| format!("serialize cache for {} failed: {}", path.display(), e))?;
        fs::write(path, buf).map_err(|e| format!("write cache {} failed: {}", path.display(), e))
    }
}

fn read_json_file(path: &Path) -> Option<Value> {
    if !path.is_file() {
        debug!("cache file {} not present", path.display());
        return None;
    }
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            warn!("skipping unreadable cache file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("skipping malformed cache file {}: {}", path.display(), e);
            None
        }
    }
}

/// Extracts room names from `cache_data.home_data.rooms` of a cache document.
///
/// Rooms need a non-null id and a non-empty name. Ids are stringified so that `7` and `"7"`
/// land on the same key.
pub fn room_names_from_document(doc: &Value) -> RoomNameMap {
    let rooms = doc
        .get("cache_data")
        .and_then(|c| c.get("home_data"))
        .and_then(|h| h.get("rooms"))
        .and_then(Value::as_array);

    let Some(rooms) = rooms else {
        return RoomNameMap::new();
    };

    rooms
        .iter()
        .filter_map(|room| {
            let id = json_scalar_to_string(room.get("id")?)?;
            let name = json_scalar_to_string(room.get("name")?)?;
            if name.is_empty() {
                return None;
            }
            Some((id, name))
        })
        .collect()
}

/// Room names from the first candidate file that yields any.
pub fn load_room_name_map(paths: &[PathBuf]) -> RoomNameMap {
    for path in paths {
        let Some(doc) = read_json_file(path) else { continue };
        let names = room_names_from_document(&doc);
        if !names.is_empty() {
            debug!("loaded {} room name(s) from {}", names.len(), path.display());
            return names;
        }
    }
    RoomNameMap::new()
}

/// First candidate file holding a reusable cloud session.
pub fn load_connection_cache(paths: &[PathBuf]) -> Option<(PathBuf, CachedSession)> {
    for path in paths {
        let Some(doc) = read_json_file(path) else { continue };
        let session: CachedSession = match serde_path_to_error::deserialize(doc) {
            Ok(s) => s,
            Err(e) => {
                warn!("skipping cache file {} with unexpected layout: {}", path.display(), e);
                continue;
            }
        };
        if session.has_session() {
            return Some((path.clone(), session));
        }
    }
    None
}
