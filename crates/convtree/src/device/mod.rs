use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

const SEGMENT_FILE_SUFFIX: &str = "-segment-events.temp";
const PREFERENCES_PLIST: &str = "com.openai.chat.plist";
const APP_BUNDLE_ID: &str = "com.openai.chat";
const APP_PLATFORM: &str = "iOS";

/// Device and app identifiers recovered from the analytics event batch the
/// app keeps next to its conversation folders, or from its preferences plist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub source_path: String,
    pub device_id: Option<String>,
    pub device_model: Option<String>,
    pub device_name: Option<String>,
    pub manufacturer: Option<String>,
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub os_build: Option<String>,
    pub screen_width: Option<String>,
    pub screen_height: Option<String>,
    pub app_version: Option<String>,
    pub app_build: Option<String>,
    pub app_bundle: Option<String>,
    pub timezone: Option<String>,
    pub locale: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLookup {
    pub device: Option<DeviceInfo>,
    pub warnings: Vec<String>,
}

#[must_use]
pub fn segment_dir_for(conversations_dir: &Path) -> PathBuf {
    conversations_dir
        .parent()
        .unwrap_or(conversations_dir)
        .join("segment")
        .join("oai")
}

/// Candidate locations of the app's preferences plist, nearest first: next
/// to the conversation folders, then the backup's `Library/Preferences`.
#[must_use]
pub fn preferences_plist_candidates(conversations_dir: &Path) -> Vec<PathBuf> {
    let app_support = conversations_dir.parent().unwrap_or(conversations_dir);
    let mut candidates = vec![app_support.join("Preferences").join(PREFERENCES_PLIST)];
    if let Some(library) = app_support.parent() {
        candidates.push(library.join("Preferences").join(PREFERENCES_PLIST));
    }
    candidates
}

/// Never fails: anything that prevents reading device info becomes a warning.
/// Segment events come first; the preferences plist fills in the device id
/// when they do not carry one.
#[must_use]
pub fn lookup_device_info(conversations_dir: &Path) -> DeviceLookup {
    let mut warnings = Vec::new();
    let mut device = match segment_device_info(conversations_dir) {
        Ok(device) => Some(device),
        Err(warning) => {
            warn!(%warning, "segment device info unavailable");
            warnings.push(warning);
            None
        }
    };

    if device.as_ref().is_none_or(|device| device.device_id.is_none()) {
        let plist_path = preferences_plist_candidates(conversations_dir)
            .into_iter()
            .find(|path| path.is_file());
        if let Some(plist_path) = plist_path {
            match read_preferences_plist(&plist_path) {
                Ok(preferences) => device = Some(apply_preferences(device, preferences)),
                Err(error) => {
                    let warning = format!("{error:#}");
                    warn!(%warning, "preferences plist unreadable");
                    warnings.push(warning);
                }
            }
        }
    }

    DeviceLookup { device, warnings }
}

fn segment_device_info(conversations_dir: &Path) -> Result<DeviceInfo, String> {
    let segment_dir = segment_dir_for(conversations_dir);
    let newest = newest_segment_file(&segment_dir)
        .map_err(|error| format!("{error:#}"))?
        .ok_or_else(|| format!("no segment event files in {}", segment_dir.display()))?;
    read_segment_file(&newest)
        .map_err(|error| format!("{error:#}"))?
        .ok_or_else(|| {
            format!(
                "segment file has no event with device context: {}",
                newest.display()
            )
        })
}

/// Fields the app mirrors into its preferences plist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencesBackup {
    pub source_path: String,
    pub device_id: Option<String>,
}

/// Reads binary or XML plists alike.
pub fn read_preferences_plist(path: &Path) -> Result<PreferencesBackup> {
    let value = plist::Value::from_file(path)
        .with_context(|| format!("failed to read preferences plist: {}", path.display()))?;
    let dictionary = value.as_dictionary().ok_or_else(|| {
        anyhow!("preferences plist root is not a dictionary: {}", path.display())
    })?;
    Ok(PreferencesBackup {
        source_path: path.display().to_string(),
        device_id: dictionary
            .get("deviceIDBackup")
            .and_then(plist::Value::as_string)
            .map(ToString::to_string),
    })
}

fn apply_preferences(device: Option<DeviceInfo>, preferences: PreferencesBackup) -> DeviceInfo {
    let mut device = device.unwrap_or_else(|| DeviceInfo {
        source_path: preferences.source_path,
        ..DeviceInfo::default()
    });
    if preferences.device_id.is_some() {
        device.device_id = preferences.device_id;
    }
    device.app_bundle = Some(APP_BUNDLE_ID.to_string());
    device.platform = Some(APP_PLATFORM.to_string());
    device
}

/// Segment files sort by name; the last one is the newest batch.
pub fn newest_segment_file(segment_dir: &Path) -> Result<Option<PathBuf>> {
    if !segment_dir.is_dir() {
        return Ok(None);
    }

    let entries = std::fs::read_dir(segment_dir).with_context(|| {
        format!("failed to read segment directory: {}", segment_dir.display())
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| {
            format!("failed to read segment directory entry: {}", segment_dir.display())
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(SEGMENT_FILE_SUFFIX) && entry.path().is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files.pop())
}

pub fn read_segment_file(path: &Path) -> Result<Option<DeviceInfo>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read segment file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("segment file is not valid JSON: {}", path.display()))?;
    Ok(parse_segment_batch(&value, &path.display().to_string()))
}

#[must_use]
pub fn parse_segment_batch(value: &Value, source_path: &str) -> Option<DeviceInfo> {
    let event = value
        .get("batch")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_object)
        .find(|event| event.get("context").is_some_and(Value::is_object))?;
    let context = event.get("context").and_then(Value::as_object)?;

    let device = nested(context, "device");
    let os = nested(context, "os");
    let screen = nested(context, "screen");
    let app = nested(context, "app");

    Some(DeviceInfo {
        source_path: source_path.to_string(),
        device_id: scalar(Some(context), "device_id"),
        device_model: scalar(device, "model"),
        device_name: scalar(device, "name"),
        manufacturer: scalar(device, "manufacturer"),
        platform: scalar(os, "name"),
        os_version: scalar(os, "version"),
        os_build: scalar(nested(event, "traits"), "apple_os_version"),
        screen_width: scalar(screen, "width"),
        screen_height: scalar(screen, "height"),
        app_version: scalar(app, "version"),
        app_build: scalar(app, "build"),
        app_bundle: scalar(app, "namespace"),
        timezone: scalar(Some(context), "timezone"),
        locale: scalar(Some(context), "locale"),
        user_id: scalar(Some(event), "userId"),
    })
}

fn nested<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    object.get(key).and_then(Value::as_object)
}

fn scalar(object: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    match object?.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

pub fn write_device_artifact(path: &Path, device: &DeviceInfo) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create device artifact directory: {}", parent.display())
        })?;
    }

    let encoded = serde_json::to_vec_pretty(device).context("failed to encode device artifact")?;
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write device artifact: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_event_with_context_supplies_device_fields() {
        let batch = json!({
            "batch": [
                {"type": "identify"},
                {
                    "userId": "user-123",
                    "traits": {"apple_os_version": "22F76"},
                    "context": {
                        "device": {"model": "iPhone15,2", "name": "iPhone", "manufacturer": "Apple"},
                        "os": {"name": "iOS", "version": "18.5"},
                        "screen": {"width": 393, "height": 852},
                        "app": {"version": "1.2025.1", "build": "1234", "namespace": "com.openai.chat"},
                        "device_id": "DEVICE-1",
                        "timezone": "Europe/Berlin",
                        "locale": "de-DE"
                    }
                },
                {"context": {"device_id": "later"}}
            ]
        });

        let device = parse_segment_batch(&batch, "x-segment-events.temp").expect("device info");
        assert_eq!(device.device_id.as_deref(), Some("DEVICE-1"));
        assert_eq!(device.device_model.as_deref(), Some("iPhone15,2"));
        assert_eq!(device.screen_width.as_deref(), Some("393"));
        assert_eq!(device.os_build.as_deref(), Some("22F76"));
        assert_eq!(device.user_id.as_deref(), Some("user-123"));
        assert_eq!(device.app_bundle.as_deref(), Some("com.openai.chat"));
    }

    #[test]
    fn batches_without_context_yield_nothing() {
        assert_eq!(parse_segment_batch(&json!({"batch": [{"event": "x"}]}), "f"), None);
        assert_eq!(parse_segment_batch(&json!({"other": 1}), "f"), None);
    }

    #[test]
    fn missing_segment_directory_is_a_warning() {
        let lookup = lookup_device_info(Path::new("/nonexistent/convtree/conversations-v3-x"));
        assert_eq!(lookup.device, None);
        assert_eq!(lookup.warnings.len(), 1);
        assert!(lookup.warnings[0].contains("no segment event files"));
    }

    fn temp_backup(prefix: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        let conversations = std::env::temp_dir()
            .join(format!("{prefix}-{nanos}"))
            .join("Library/Application Support/conversations-v3-x");
        std::fs::create_dir_all(&conversations).expect("conversation dir should be creatable");
        conversations
    }

    const PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>deviceIDBackup</key><string>PLIST-1</string></dict></plist>"#;

    #[test]
    fn preferences_plist_supplies_device_id_without_segment_events() {
        let conversations = temp_backup("convtree-device-plist");
        let preferences = conversations
            .parent()
            .and_then(Path::parent)
            .expect("library dir")
            .join("Preferences");
        std::fs::create_dir_all(&preferences).expect("preferences dir should be creatable");
        std::fs::write(preferences.join(PREFERENCES_PLIST), PLIST).expect("plist should write");

        let lookup = lookup_device_info(&conversations);
        let device = lookup.device.expect("plist should supply device info");
        assert_eq!(device.device_id.as_deref(), Some("PLIST-1"));
        assert_eq!(device.app_bundle.as_deref(), Some("com.openai.chat"));
        assert_eq!(device.platform.as_deref(), Some("iOS"));
        assert!(device.source_path.ends_with("com.openai.chat.plist"));
        assert_eq!(lookup.warnings.len(), 1);
    }

    #[test]
    fn segment_events_without_device_id_are_completed_from_the_plist() {
        let conversations = temp_backup("convtree-device-merge");
        let app_support = conversations.parent().expect("app support dir");
        let segment = segment_dir_for(&conversations);
        std::fs::create_dir_all(&segment).expect("segment dir should be creatable");
        std::fs::write(
            segment.join("0001-segment-events.temp"),
            r#"{"batch": [{"context": {"device": {"model": "iPhone14,5"}}}]}"#,
        )
        .expect("segment file should write");
        std::fs::create_dir_all(app_support.join("Preferences"))
            .expect("preferences dir should be creatable");
        std::fs::write(app_support.join("Preferences").join(PREFERENCES_PLIST), PLIST)
            .expect("plist should write");

        let lookup = lookup_device_info(&conversations);
        let device = lookup.device.expect("device info");
        assert_eq!(device.device_model.as_deref(), Some("iPhone14,5"));
        assert_eq!(device.device_id.as_deref(), Some("PLIST-1"));
        assert!(lookup.warnings.is_empty());
    }

    #[test]
    fn unreadable_plist_is_a_warning() {
        let conversations = temp_backup("convtree-device-bad-plist");
        let preferences = conversations.parent().expect("app support dir").join("Preferences");
        std::fs::create_dir_all(&preferences).expect("preferences dir should be creatable");
        std::fs::write(preferences.join(PREFERENCES_PLIST), "not a plist")
            .expect("plist should write");

        let lookup = lookup_device_info(&conversations);
        assert_eq!(lookup.device, None);
        assert_eq!(lookup.warnings.len(), 2);
        assert!(lookup.warnings[1].contains("preferences plist"));
    }
}
