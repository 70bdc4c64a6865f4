//! Scene data model
//!
//! Desired per-light state, scene configurations as stored on the controller
//! and locally, snapshots, and the issue annotations produced while
//! resolving and activating scenes.

use crate::client::{LightCommand, SceneConfigRecord};
use crate::error::{HassError, Result};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata key carrying the scene mode inside the controller's record
pub const MODE_METADATA_KEY: &str = "scene_mode";

/// Desired power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

/// Attribute form of a desired light state.
///
/// Unknown attributes are carried through untouched in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PowerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<[u8; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp_kelvin: Option<u32>,
    /// Colour temperature in mireds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_color: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy_color: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
    /// Attribute names that were null when loaded
    #[serde(skip)]
    pub(crate) stripped_nulls: Vec<String>,
}

impl PartialEq for LightAttributes {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
            && self.brightness == other.brightness
            && self.rgb_color == other.rgb_color
            && self.color_temp_kelvin == other.color_temp_kelvin
            && self.color_temp == other.color_temp
            && self.hs_color == other.hs_color
            && self.xy_color == other.xy_color
            && self.effect == other.effect
            && self.extra == other.extra
    }
}

impl LightAttributes {
    pub fn has_color(&self) -> bool {
        self.rgb_color.is_some()
            || self.color_temp_kelvin.is_some()
            || self.color_temp.is_some()
            || self.hs_color.is_some()
            || self.xy_color.is_some()
    }

    /// The desired state turns the light on unless `state` says off
    pub fn is_on(&self) -> bool {
        self.state != Some(PowerState::Off)
    }

    /// Colour-only command. The first present representation wins:
    /// RGB, Kelvin, mireds, hue/saturation, then CIE xy.
    pub fn color_command(&self) -> LightCommand {
        let mut command = LightCommand::default();
        if let Some(rgb) = self.rgb_color {
            command.rgb_color = Some(rgb);
        } else if let Some(kelvin) = self.color_temp_kelvin {
            command.color_temp_kelvin = Some(kelvin);
        } else if let Some(mireds) = self.color_temp {
            command.color_temp = Some(mireds);
        } else if let Some(hs) = self.hs_color {
            command.hs_color = Some(hs);
        } else if let Some(xy) = self.xy_color {
            command.xy_color = Some(xy);
        }
        command
    }

    /// Brightness and effect without any colour
    pub fn level_command(&self) -> LightCommand {
        LightCommand {
            brightness: self.brightness,
            effect: self.effect.clone(),
            ..Default::default()
        }
    }

    /// Single command carrying colour, brightness and effect
    pub fn combined_command(&self) -> LightCommand {
        LightCommand {
            brightness: self.brightness,
            effect: self.effect.clone(),
            ..self.color_command()
        }
    }

    pub fn stripped_nulls(&self) -> &[String] {
        &self.stripped_nulls
    }

    fn clear_null_markers(&mut self) {
        self.stripped_nulls.clear();
    }
}

/// Desired state of one light inside a scene
#[derive(Debug, Clone, PartialEq)]
pub enum EntityConfig {
    /// Shorthand `"off"`
    Off,
    /// Shorthand `"on"`
    On,
    /// Attribute form
    Detailed(LightAttributes),
}

impl EntityConfig {
    /// Parse a stored entry. Null attributes are dropped and remembered so
    /// the caller can report the entry as needing repair.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if s.eq_ignore_ascii_case("on") => Ok(EntityConfig::On),
            Value::String(s) if s.eq_ignore_ascii_case("off") => Ok(EntityConfig::Off),
            Value::Bool(true) => Ok(EntityConfig::On),
            Value::Bool(false) => Ok(EntityConfig::Off),
            Value::Object(map) => {
                let mut stripped = Vec::new();
                let cleaned: Map<String, Value> = map
                    .iter()
                    .filter(|(key, value)| {
                        if value.is_null() {
                            stripped.push((*key).clone());
                            false
                        } else {
                            true
                        }
                    })
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();

                let mut attrs: LightAttributes = serde_json::from_value(Value::Object(cleaned))
                    .map_err(|e| HassError::parsing_error(format!("invalid light state: {e}")))?;
                attrs.stripped_nulls = stripped;
                Ok(EntityConfig::Detailed(attrs))
            }
            other => Err(HassError::parsing_error(format!(
                "invalid light state: {other}"
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            EntityConfig::Off => Value::String("off".to_string()),
            EntityConfig::On => Value::String("on".to_string()),
            EntityConfig::Detailed(attrs) => {
                serde_json::to_value(attrs).unwrap_or_else(|_| Value::Object(Map::new()))
            }
        }
    }

    /// True when applying this entry leaves the light on
    pub fn is_on(&self) -> bool {
        match self {
            EntityConfig::Off => false,
            EntityConfig::On => true,
            EntityConfig::Detailed(attrs) => attrs.is_on(),
        }
    }

    /// Attribute names that were null when this entry was loaded
    pub fn stripped_nulls(&self) -> &[String] {
        match self {
            EntityConfig::Detailed(attrs) => attrs.stripped_nulls(),
            _ => &[],
        }
    }
}

impl Serialize for EntityConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            EntityConfig::Off => serializer.serialize_str("off"),
            EntityConfig::On => serializer.serialize_str("on"),
            EntityConfig::Detailed(attrs) => attrs.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for EntityConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        EntityConfig::from_value(&value).map_err(D::Error::custom)
    }
}

/// How a scene treats lights it does not list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneMode {
    /// Unlisted lights are turned off
    Exclusive,
    /// Unlisted lights are left alone
    #[default]
    Additive,
}

impl SceneMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "exclusive" => Some(SceneMode::Exclusive),
            "additive" => Some(SceneMode::Additive),
            _ => None,
        }
    }
}

impl fmt::Display for SceneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneMode::Exclusive => write!(f, "exclusive"),
            SceneMode::Additive => write!(f, "additive"),
        }
    }
}

/// A scene: identity, mode and desired state per light
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfiguration {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mode: SceneMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityConfig>,
    /// Controller metadata other than the scene mode, passed through
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SceneConfiguration {
    pub fn new(id: impl Into<String>, name: impl Into<String>, mode: SceneMode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mode,
            icon: None,
            entities: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    /// Record in the controller's storage format
    pub fn to_record(&self) -> SceneConfigRecord {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            MODE_METADATA_KEY.to_string(),
            Value::String(self.mode.to_string()),
        );
        SceneConfigRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            entities: self
                .entities
                .iter()
                .map(|(entity_id, config)| (entity_id.clone(), config.to_value()))
                .collect(),
            icon: self.icon.clone(),
            metadata,
        }
    }

    /// Forget which entries had null attributes when loaded. The entries
    /// themselves are already clean.
    pub fn clear_null_markers(&mut self) {
        for config in self.entities.values_mut() {
            if let EntityConfig::Detailed(attrs) = config {
                attrs.clear_null_markers();
            }
        }
    }

    /// Entities whose loaded entry carried null attributes
    pub fn entities_with_nulls(&self) -> impl Iterator<Item = (&String, &[String])> {
        self.entities
            .iter()
            .map(|(entity_id, config)| (entity_id, config.stripped_nulls()))
            .filter(|(_, nulls)| !nulls.is_empty())
    }
}

/// A scene as read from the controller
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteScene {
    pub scene: SceneConfiguration,
    /// Mode stored in the record metadata, if any
    pub declared_mode: Option<SceneMode>,
    /// Entries that had to be changed or dropped while parsing
    pub issues: Vec<SceneIssue>,
}

impl RemoteScene {
    /// Parse a controller record, dropping entries that cannot be read
    pub fn from_record(record: SceneConfigRecord) -> Self {
        let mut issues = Vec::new();
        let mut entities = BTreeMap::new();

        for (entity_id, value) in &record.entities {
            match EntityConfig::from_value(value) {
                Ok(config) => {
                    if !config.stripped_nulls().is_empty() {
                        issues.push(SceneIssue::entity(
                            IssueKind::NullFieldsStripped,
                            entity_id,
                            format!(
                                "remote entry had null attributes: {}",
                                config.stripped_nulls().join(", ")
                            ),
                        ));
                    }
                    entities.insert(entity_id.clone(), config);
                }
                Err(e) => issues.push(SceneIssue::entity(
                    IssueKind::UnparseableEntity,
                    entity_id,
                    format!("remote entry dropped: {e}"),
                )),
            }
        }

        let mut metadata = record.metadata;
        let declared_mode = metadata
            .remove(MODE_METADATA_KEY)
            .and_then(|mode| mode.as_str().and_then(SceneMode::parse));

        Self {
            scene: SceneConfiguration {
                id: record.id,
                name: record.name,
                mode: declared_mode.unwrap_or_default(),
                icon: record.icon,
                entities,
                metadata,
            },
            declared_mode,
            issues,
        }
    }
}

/// Local backup of one scene plus sync bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBackupEntry {
    pub scene: SceneConfiguration,
    /// Hash of the remote entity map after this instance's last write or sync
    #[serde(default)]
    pub last_known_remote_hash: Option<String>,
    /// Instance that made the last write
    #[serde(default)]
    pub last_writer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl LocalBackupEntry {
    pub fn new(scene: SceneConfiguration, remote_hash: Option<String>, writer_id: &str) -> Self {
        let now = Utc::now();
        Self {
            scene,
            last_known_remote_hash: remote_hash,
            last_writer_id: Some(writer_id.to_string()),
            created_at: now,
            updated_at: now,
            last_synced_at: Some(now),
        }
    }
}

/// Operation that triggered a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOperation {
    Update,
    Delete,
    Repair,
    Restore,
    Sync,
}

/// Point-in-time copy of a scene taken before a destructive operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub scene_id: String,
    pub name: String,
    pub mode: SceneMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub entities: BTreeMap<String, EntityConfig>,
    pub operation: SnapshotOperation,
    pub taken_at: DateTime<Utc>,
    pub writer_id: String,
}

impl Snapshot {
    pub fn of(scene: &SceneConfiguration, operation: SnapshotOperation, writer_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scene_id: scene.id.clone(),
            name: scene.name.clone(),
            mode: scene.mode,
            icon: scene.icon.clone(),
            entities: scene.entities.clone(),
            operation,
            taken_at: Utc::now(),
            writer_id: writer_id.to_string(),
        }
    }

    pub fn to_scene(&self) -> SceneConfiguration {
        SceneConfiguration {
            id: self.scene_id.clone(),
            name: self.name.clone(),
            mode: self.mode,
            icon: self.icon.clone(),
            entities: self.entities.clone(),
            metadata: Map::new(),
        }
    }
}

/// Kind of annotation attached to a resolution or activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Remote changed since this instance last wrote or synced it
    ForeignWrite,
    /// Both sides list the entity with different values; remote kept
    OverlapDiverged,
    /// Entity only present remotely, taken over by the merge
    MergedFromOther,
    /// Entity only present locally, kept by the merge
    KeptLocal,
    /// Remote missing, recreated from the local backup
    RestoredFromBackup,
    /// No local backup, remote imported
    ImportedFromRemote,
    /// Local backup has no recorded remote hash
    NoSyncBaseline,
    /// Listed light no longer exists
    RemovedMissingDevice,
    /// Unlisted light added as off in an exclusive scene
    AddedNewDevice,
    /// Device list came back empty, liveness check not applied
    LivenessSkipped,
    NullFieldsStripped,
    UnparseableEntity,
    /// Entity outside the light domain, not driven
    UnsupportedEntity,
    SplitSequenced,
    CommandTimedOut,
    CommandFailed,
    /// Verification sweep turned off a stray light
    VerificationCorrection,
    VerificationSkipped,
    /// Scene persisted on activation could not be written
    RepairFailed,
}

/// Annotation describing something noteworthy about a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneIssue {
    pub kind: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub message: String,
}

impl SceneIssue {
    pub fn scene(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: None,
            message: message.into(),
        }
    }

    pub fn entity(kind: IssueKind, entity_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: Some(entity_id.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for SceneIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity_id {
            Some(entity_id) => write!(f, "{entity_id}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_shorthand_and_detailed_parsing() {
        assert_eq!(EntityConfig::from_value(&json!("on")).unwrap(), EntityConfig::On);
        assert_eq!(EntityConfig::from_value(&json!("OFF")).unwrap(), EntityConfig::Off);

        let config = EntityConfig::from_value(&json!({
            "state": "on",
            "brightness": 120,
            "rgb_color": [255, 0, 0],
            "friendly_name": "Desk"
        }))
        .unwrap();
        let EntityConfig::Detailed(attrs) = &config else {
            panic!("expected detailed config");
        };
        assert_eq!(attrs.brightness, Some(120));
        assert_eq!(attrs.extra["friendly_name"], json!("Desk"));
        assert!(config.is_on());
        assert_eq!(config.to_value()["friendly_name"], json!("Desk"));
    }

    #[test]
    fn test_null_attributes_are_stripped_and_reported() {
        let config = EntityConfig::from_value(&json!({
            "state": "on",
            "brightness": 80,
            "color_temp": null,
            "hs_color": null
        }))
        .unwrap();

        assert_eq!(config.stripped_nulls(), ["color_temp", "hs_color"]);
        let value = config.to_value();
        assert!(value.get("color_temp").is_none());
        assert!(value.get("hs_color").is_none());
        assert_eq!(value["brightness"], json!(80));
    }

    #[test]
    fn test_invalid_entries_fail() {
        assert!(EntityConfig::from_value(&json!("dim")).is_err());
        assert!(EntityConfig::from_value(&json!({ "brightness": 900 })).is_err());
        assert!(EntityConfig::from_value(&json!(3)).is_err());
    }

    #[test]
    fn test_color_priority() {
        let attrs = LightAttributes {
            brightness: Some(50),
            color_temp: Some(370),
            color_temp_kelvin: Some(2700),
            hs_color: Some([10.0, 50.0]),
            ..Default::default()
        };
        let command = attrs.color_command();
        assert_eq!(command.color_temp_kelvin, Some(2700));
        assert_eq!(command.color_temp, None);
        assert_eq!(command.hs_color, None);
        assert_eq!(command.brightness, None);

        let combined = attrs.combined_command();
        assert_eq!(combined.brightness, Some(50));
        assert_eq!(combined.color_temp_kelvin, Some(2700));

        let level = attrs.level_command();
        assert!(!level.has_color());
        assert_eq!(level.brightness, Some(50));
    }

    #[test]
    fn test_remote_record_parsing() {
        let record: SceneConfigRecord = serde_json::from_value(json!({
            "id": "movie",
            "name": "Movie",
            "entities": {
                "light.a": "off",
                "light.b": { "state": "on", "brightness": null },
                "light.c": 17
            },
            "metadata": { "scene_mode": "exclusive", "light.a": { "entity_only": true } }
        }))
        .unwrap();

        let remote = RemoteScene::from_record(record);
        assert_eq!(remote.declared_mode, Some(SceneMode::Exclusive));
        assert_eq!(remote.scene.entities.len(), 2);
        assert!(remote.scene.metadata.contains_key("light.a"));
        assert!(!remote.scene.metadata.contains_key(MODE_METADATA_KEY));

        let kinds: Vec<_> = remote.issues.iter().map(|issue| issue.kind).collect();
        assert_eq!(
            kinds,
            vec![IssueKind::NullFieldsStripped, IssueKind::UnparseableEntity]
        );

        let written = remote.scene.to_record();
        assert_eq!(written.metadata[MODE_METADATA_KEY], json!("exclusive"));
        assert_eq!(written.entities["light.b"], json!({ "state": "on" }));
    }

    #[test]
    fn test_missing_mode_defaults_to_additive() {
        let remote = RemoteScene::from_record(SceneConfigRecord {
            id: "s".into(),
            name: "S".into(),
            ..Default::default()
        });
        assert_eq!(remote.declared_mode, None);
        assert_eq!(remote.scene.mode, SceneMode::Additive);
    }
}
