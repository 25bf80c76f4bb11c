//! Settings backup document and restore merge.

use crate::error::BackupError;
use crate::models::{Filters, Settings, StoragePatch, StoredData};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub version: u32,
    pub export_date: DateTime<Utc>,
    pub settings: Settings,
    pub ignored_series: Vec<String>,
    pub ignored_books: Vec<String>,
    pub filters: Filters,
}

pub fn create_backup(data: &StoredData) -> Backup {
    Backup {
        version: BACKUP_VERSION,
        export_date: Utc::now(),
        settings: data.settings.clone(),
        ignored_series: data.ignored_series.clone(),
        ignored_books: data.ignored_books.clone(),
        filters: data.filters.clone(),
    }
}

/// Overlay the keys present in `incoming` onto `current`. Keys that do not
/// deserialize into `T` leave the whole value unchanged.
fn merge_keys<T>(current: &T, incoming: &Value) -> Result<T, BackupError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let (Value::Object(mut base), Value::Object(overlay)) = (serde_json::to_value(current)?, incoming) else {
        return Ok(current.clone());
    };
    for (key, value) in overlay {
        if base.contains_key(key) {
            base.insert(key.clone(), value.clone());
        }
    }
    match serde_json::from_value(Value::Object(base)) {
        Ok(merged) => Ok(merged),
        Err(e) => {
            log::warn!("backup value has unexpected shape, keeping current: {}", e);
            Ok(current.clone())
        }
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

/// Parse a backup document and build the patch that restores it over
/// `current`. Settings and filters merge key by key; ignored lists are
/// replaced when present.
pub fn restore_patch(document: &str, current: &StoredData) -> Result<StoragePatch, BackupError> {
    let backup: Value = serde_json::from_str(document)?;
    let has_version = backup
        .get("version")
        .map(|v| !v.is_null() && v != &Value::from(0))
        .unwrap_or(false);
    let settings = match backup.get("settings") {
        Some(s) if s.is_object() => s,
        _ => return Err(BackupError::InvalidFormat),
    };
    if !has_version {
        return Err(BackupError::InvalidFormat);
    }

    let filters = match backup.get("filters") {
        Some(f) if f.is_object() => Some(merge_keys(&current.filters, f)?),
        _ => None,
    };

    Ok(StoragePatch {
        settings: Some(merge_keys(&current.settings, settings)?),
        filters,
        ignored_series: string_list(backup.get("ignoredSeries")),
        ignored_books: string_list(backup.get("ignoredBooks")),
        ..Default::default()
    })
}
