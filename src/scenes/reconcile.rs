//! Scene reconciliation
//!
//! Decides the working configuration of a scene from the controller's copy,
//! the local backup and the set of live devices. Resolution is read-only;
//! callers decide whether to persist the result.

use crate::client::StateRecord;
use crate::devices::LightState;
use crate::scenes::hash::entities_hash;
use crate::scenes::model::{
    EntityConfig, IssueKind, LocalBackupEntry, RemoteScene, SceneConfiguration, SceneIssue,
    SceneMode,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Devices known to the controller at resolution time
#[derive(Debug, Clone, Default)]
pub struct LiveDevices {
    /// Every entity id the controller reports, any domain
    pub entity_ids: BTreeSet<String>,
    pub lights: Vec<LightState>,
    /// Scene config id -> scene entity id
    pub scene_entities: BTreeMap<String, String>,
}

impl LiveDevices {
    pub fn from_states(states: &[StateRecord]) -> Self {
        let mut live = Self::default();
        for record in states {
            live.entity_ids.insert(record.entity_id.clone());
            if let Some(light) = LightState::from_record(record) {
                live.lights.push(light);
            }
            if record.domain() == "scene" {
                if let Some(config_id) = record.attributes.get("id").and_then(|id| id.as_str()) {
                    live.scene_entities
                        .insert(config_id.to_string(), record.entity_id.clone());
                }
            }
        }
        live
    }

    pub fn light(&self, entity_id: &str) -> Option<&LightState> {
        self.lights.iter().find(|light| light.entity_id == entity_id)
    }
}

/// Which branch produced the working configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Remote unchanged since the last sync, local backup authoritative
    Synced,
    /// Foreign write detected, both sides merged
    Merged,
    /// Remote missing, local backup used
    RestoredFromBackup,
    /// No local backup, remote used
    ImportedFromRemote,
}

/// Where a resolved entity entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOrigin {
    Local,
    Remote,
    MergedFromOther,
    KeptLocal,
    Restored,
    Imported,
    AddedOff,
}

#[derive(Debug, Clone, PartialEq)]
struct StoredSide {
    hash: String,
    mode: Option<SceneMode>,
    corrupted: bool,
    baseline: Option<String>,
}

/// Result of resolving one scene
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScene {
    pub scene: SceneConfiguration,
    pub source: ResolutionSource,
    /// Annotations in the order they were found
    pub issues: Vec<SceneIssue>,
    pub origins: BTreeMap<String, EntityOrigin>,
    /// Stored entries dropped because their device is not currently live
    pub missing: BTreeMap<String, EntityConfig>,
    pub conflict_detected: bool,
    /// Hash of the controller's entity map as observed
    pub remote_hash: Option<String>,
    remote: Option<StoredSide>,
    local: Option<StoredSide>,
}

impl ResolvedScene {
    pub fn resolved_hash(&self) -> String {
        entities_hash(&self.scene.entities)
    }

    /// The controller's copy differs from the working configuration
    pub fn requires_remote_write(&self) -> bool {
        side_differs(self.remote.as_ref(), &self.scene)
    }

    /// The local backup differs from the working configuration or lacks
    /// the sync baseline of it
    pub fn requires_local_write(&self) -> bool {
        local_differs(self.local.as_ref(), &self.scene)
    }

    pub fn requires_write(&self) -> bool {
        self.requires_remote_write() || self.requires_local_write()
    }

    /// Working configuration with the entries of missing devices put back.
    ///
    /// This is what gets stored when a write should not drop devices that
    /// may only be temporarily unavailable.
    pub fn retained_scene(&self) -> SceneConfiguration {
        let mut scene = self.scene.clone();
        for (entity_id, config) in &self.missing {
            scene.entities.insert(entity_id.clone(), config.clone());
        }
        scene
    }

    /// Storing [`Self::retained_scene`] would change either copy
    pub fn retained_requires_write(&self) -> bool {
        let scene = self.retained_scene();
        side_differs(self.remote.as_ref(), &scene) || local_differs(self.local.as_ref(), &scene)
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }
}

fn side_differs(side: Option<&StoredSide>, scene: &SceneConfiguration) -> bool {
    match side {
        None => true,
        Some(side) => {
            side.corrupted
                || side.mode != Some(scene.mode)
                || side.hash != entities_hash(&scene.entities)
        }
    }
}

fn local_differs(local: Option<&StoredSide>, scene: &SceneConfiguration) -> bool {
    let hash = entities_hash(&scene.entities);
    side_differs(local, scene)
        || local.map_or(true, |local| local.baseline.as_deref() != Some(hash.as_str()))
}

/// Resolve a scene from its stored copies and the live device set.
///
/// Returns `None` when neither side knows the scene.
pub fn reconcile(
    remote: Option<RemoteScene>,
    local: Option<LocalBackupEntry>,
    live: &LiveDevices,
) -> Option<ResolvedScene> {
    let mut issues = Vec::new();

    let remote_side = remote.as_ref().map(|remote| {
        issues.extend(remote.issues.iter().cloned());
        StoredSide {
            hash: entities_hash(&remote.scene.entities),
            mode: remote.declared_mode,
            corrupted: !remote.issues.is_empty(),
            baseline: None,
        }
    });

    let local_side = local.as_ref().map(|local| {
        let mut corrupted = false;
        for (entity_id, nulls) in local.scene.entities_with_nulls() {
            corrupted = true;
            issues.push(SceneIssue::entity(
                IssueKind::NullFieldsStripped,
                entity_id,
                format!("local entry had null attributes: {}", nulls.join(", ")),
            ));
        }
        StoredSide {
            hash: entities_hash(&local.scene.entities),
            mode: Some(local.scene.mode),
            corrupted,
            baseline: local.last_known_remote_hash.clone(),
        }
    });

    let remote_hash = remote_side.as_ref().map(|side| side.hash.clone());

    let (scene, source, origins, conflict_detected) = match (remote, local) {
        (Some(remote), Some(local)) => {
            let current = remote_hash.clone().unwrap_or_default();
            let baseline = local.last_known_remote_hash.clone();
            match baseline.as_deref() {
                Some(baseline) if baseline != current => {
                    let (scene, origins) = merge(remote, local, &mut issues);
                    (scene, ResolutionSource::Merged, origins, true)
                }
                baseline => {
                    if baseline.is_none() {
                        issues.push(SceneIssue::scene(
                            IssueKind::NoSyncBaseline,
                            "local backup has no sync baseline; treating it as authoritative",
                        ));
                    }
                    let origins = origins_of(&local.scene, EntityOrigin::Local);
                    (local.scene, ResolutionSource::Synced, origins, false)
                }
            }
        }
        (None, Some(local)) => {
            issues.push(SceneIssue::scene(
                IssueKind::RestoredFromBackup,
                "restored from backup - missing remotely",
            ));
            let origins = origins_of(&local.scene, EntityOrigin::Restored);
            (local.scene, ResolutionSource::RestoredFromBackup, origins, false)
        }
        (Some(remote), None) => {
            issues.push(SceneIssue::scene(
                IssueKind::ImportedFromRemote,
                "imported, no local record",
            ));
            let origins = origins_of(&remote.scene, EntityOrigin::Imported);
            (remote.scene, ResolutionSource::ImportedFromRemote, origins, false)
        }
        (None, None) => return None,
    };

    let mut scene = scene;
    scene.clear_null_markers();

    let mut resolved = ResolvedScene {
        scene,
        source,
        issues,
        origins,
        missing: BTreeMap::new(),
        conflict_detected,
        remote_hash,
        remote: remote_side,
        local: local_side,
    };
    adapt_to_live_devices(&mut resolved, live);
    Some(resolved)
}

/// Set-merge after a foreign write: remote wins on overlapping keys, the
/// non-overlapping keys of both sides are kept.
fn merge(
    remote: RemoteScene,
    local: LocalBackupEntry,
    issues: &mut Vec<SceneIssue>,
) -> (SceneConfiguration, BTreeMap<String, EntityOrigin>) {
    issues.push(SceneIssue::scene(
        IssueKind::ForeignWrite,
        "scene changed remotely since the last sync; merged",
    ));

    let mut origins = BTreeMap::new();
    let mut entities = BTreeMap::new();

    for (entity_id, config) in &remote.scene.entities {
        match local.scene.entities.get(entity_id) {
            Some(local_config) => {
                if local_config != config {
                    issues.push(SceneIssue::entity(
                        IssueKind::OverlapDiverged,
                        entity_id,
                        format!(
                            "changed on both sides; kept remote {} over local {}",
                            config.to_value(),
                            local_config.to_value()
                        ),
                    ));
                }
                origins.insert(entity_id.clone(), EntityOrigin::Remote);
            }
            None => {
                issues.push(SceneIssue::entity(
                    IssueKind::MergedFromOther,
                    entity_id,
                    "merged from other instance",
                ));
                origins.insert(entity_id.clone(), EntityOrigin::MergedFromOther);
            }
        }
        entities.insert(entity_id.clone(), config.clone());
    }

    for (entity_id, config) in &local.scene.entities {
        if !remote.scene.entities.contains_key(entity_id) {
            issues.push(SceneIssue::entity(
                IssueKind::KeptLocal,
                entity_id,
                "kept local, not yet synced",
            ));
            origins.insert(entity_id.clone(), EntityOrigin::KeptLocal);
            entities.insert(entity_id.clone(), config.clone());
        }
    }

    let mut metadata = local.scene.metadata;
    metadata.extend(remote.scene.metadata);

    let scene = SceneConfiguration {
        id: remote.scene.id,
        name: if remote.scene.name.is_empty() {
            local.scene.name
        } else {
            remote.scene.name
        },
        mode: remote.declared_mode.unwrap_or(local.scene.mode),
        icon: remote.scene.icon.or(local.scene.icon),
        entities,
        metadata,
    };
    (scene, origins)
}

fn origins_of(
    scene: &SceneConfiguration,
    origin: EntityOrigin,
) -> BTreeMap<String, EntityOrigin> {
    scene
        .entities
        .keys()
        .map(|entity_id| (entity_id.clone(), origin))
        .collect()
}

/// Drop entries for devices that no longer exist; in exclusive mode add every
/// unlisted live light as off.
fn adapt_to_live_devices(resolved: &mut ResolvedScene, live: &LiveDevices) {
    if live.entity_ids.is_empty() {
        resolved.issues.push(SceneIssue::scene(
            IssueKind::LivenessSkipped,
            "controller reported no devices; entries left unchanged",
        ));
        return;
    }

    let missing: Vec<String> = resolved
        .scene
        .entities
        .keys()
        .filter(|entity_id| !live.entity_ids.contains(*entity_id))
        .cloned()
        .collect();
    for entity_id in missing {
        if let Some(config) = resolved.scene.entities.remove(&entity_id) {
            resolved.missing.insert(entity_id.clone(), config);
        }
        resolved.origins.remove(&entity_id);
        resolved.issues.push(SceneIssue::entity(
            IssueKind::RemovedMissingDevice,
            &entity_id,
            "removed - no longer present",
        ));
    }

    if resolved.scene.mode == SceneMode::Exclusive {
        for light in &live.lights {
            if !resolved.scene.entities.contains_key(&light.entity_id) {
                resolved
                    .scene
                    .entities
                    .insert(light.entity_id.clone(), EntityConfig::Off);
                resolved
                    .origins
                    .insert(light.entity_id.clone(), EntityOrigin::AddedOff);
                resolved.issues.push(SceneIssue::entity(
                    IssueKind::AddedNewDevice,
                    &light.entity_id,
                    "added - new device defaults to off",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SceneConfigRecord;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn live(lights: &[&str], others: &[&str]) -> LiveDevices {
        let states: Vec<StateRecord> = lights
            .iter()
            .map(|id| (id, "off"))
            .chain(others.iter().map(|id| (id, "on")))
            .map(|(id, state)| {
                serde_json::from_value(json!({ "entity_id": id, "state": state, "attributes": {} }))
                    .unwrap()
            })
            .collect();
        LiveDevices::from_states(&states)
    }

    fn remote(entities: Value, mode: Option<&str>) -> RemoteScene {
        let mut metadata = serde_json::Map::new();
        if let Some(mode) = mode {
            metadata.insert("scene_mode".into(), json!(mode));
        }
        RemoteScene::from_record(SceneConfigRecord {
            id: "evening".into(),
            name: "Evening".into(),
            entities: entities.as_object().unwrap().clone(),
            icon: None,
            metadata,
        })
    }

    fn local(entities: Value, mode: SceneMode, baseline: Option<String>) -> LocalBackupEntry {
        let scene = SceneConfiguration {
            entities: serde_json::from_value(entities).unwrap(),
            ..SceneConfiguration::new("evening", "Evening", mode)
        };
        LocalBackupEntry::new(scene, baseline, "test-instance")
    }

    fn kinds(resolved: &ResolvedScene) -> Vec<IssueKind> {
        resolved.issues.iter().map(|issue| issue.kind).collect()
    }

    #[test]
    fn test_stale_baseline_merges_both_sides() {
        let remote = remote(json!({ "light.a": "on", "light.c": "off" }), Some("exclusive"));
        let local = local(
            json!({ "light.a": "on", "light.b": "off" }),
            SceneMode::Additive,
            Some("stale".into()),
        );

        let resolved = reconcile(
            Some(remote),
            Some(local),
            &live(&["light.a", "light.b", "light.c"], &[]),
        )
        .unwrap();

        assert!(resolved.conflict_detected);
        assert_eq!(resolved.source, ResolutionSource::Merged);
        assert_eq!(resolved.scene.mode, SceneMode::Exclusive);
        assert_eq!(resolved.origins["light.a"], EntityOrigin::Remote);
        assert_eq!(resolved.origins["light.b"], EntityOrigin::KeptLocal);
        assert_eq!(resolved.origins["light.c"], EntityOrigin::MergedFromOther);
        assert_eq!(
            kinds(&resolved),
            vec![
                IssueKind::ForeignWrite,
                IssueKind::MergedFromOther,
                IssueKind::KeptLocal
            ]
        );
        assert!(resolved.requires_write());
    }

    #[test]
    fn test_merge_keeps_non_overlapping_keys_from_both_sides() {
        let a_local = || local(json!({ "light.a": "on" }), SceneMode::Additive, Some("x".into()));
        let b_remote = || remote(json!({ "light.b": "off" }), None);
        let devices = live(&["light.a", "light.b"], &[]);

        let merged = reconcile(Some(b_remote()), Some(a_local()), &devices).unwrap();
        let keys: Vec<_> = merged.scene.entities.keys().cloned().collect();
        assert_eq!(keys, vec!["light.a", "light.b"]);
        // Mode falls back to the local one when the remote does not declare it
        assert_eq!(merged.scene.mode, SceneMode::Additive);
    }

    #[test]
    fn test_diverged_overlap_keeps_remote_and_flags_it() {
        let remote = remote(json!({ "light.a": { "brightness": 200 } }), None);
        let local = local(
            json!({ "light.a": { "brightness": 20 } }),
            SceneMode::Additive,
            Some("old".into()),
        );

        let resolved = reconcile(Some(remote), Some(local), &live(&["light.a"], &[])).unwrap();
        assert_eq!(
            resolved.scene.entities["light.a"].to_value(),
            json!({ "brightness": 200 })
        );
        assert!(resolved.has_issue(IssueKind::OverlapDiverged));
    }

    #[test]
    fn test_matching_hash_is_not_a_conflict() {
        let entities = json!({ "light.a": { "state": "on", "brightness": 10 } });
        let remote = remote(entities.clone(), Some("additive"));
        let baseline = entities_hash(&remote.scene.entities);
        let local = local(entities, SceneMode::Additive, Some(baseline));

        let resolved = reconcile(Some(remote), Some(local), &live(&["light.a"], &[])).unwrap();
        assert!(!resolved.conflict_detected);
        assert_eq!(resolved.source, ResolutionSource::Synced);
        assert!(resolved.issues.is_empty());
        assert!(!resolved.requires_write());
    }

    #[test]
    fn test_missing_baseline_trusts_local() {
        let remote = remote(json!({ "light.a": "on" }), Some("additive"));
        let local = local(json!({ "light.a": "off" }), SceneMode::Additive, None);

        let resolved = reconcile(Some(remote), Some(local), &live(&["light.a"], &[])).unwrap();
        assert!(!resolved.conflict_detected);
        assert_eq!(resolved.scene.entities["light.a"], EntityConfig::Off);
        assert_eq!(kinds(&resolved), vec![IssueKind::NoSyncBaseline]);
        assert!(resolved.requires_remote_write());
    }

    #[test]
    fn test_single_sided_and_unknown_scenes() {
        let devices = live(&["light.a"], &[]);

        let restored = reconcile(
            None,
            Some(local(json!({ "light.a": "on" }), SceneMode::Additive, None)),
            &devices,
        )
        .unwrap();
        assert_eq!(restored.source, ResolutionSource::RestoredFromBackup);
        assert!(restored.has_issue(IssueKind::RestoredFromBackup));
        assert!(restored.requires_remote_write());

        let imported =
            reconcile(Some(remote(json!({ "light.a": "on" }), None)), None, &devices).unwrap();
        assert_eq!(imported.source, ResolutionSource::ImportedFromRemote);
        assert_eq!(imported.origins["light.a"], EntityOrigin::Imported);
        assert!(imported.requires_local_write());

        assert!(reconcile(None, None, &devices).is_none());
    }

    #[test]
    fn test_liveness_adaptation() {
        let remote = remote(
            json!({ "light.gone": "on", "light.a": "on", "switch.fan": "on" }),
            Some("exclusive"),
        );

        let resolved = reconcile(
            Some(remote),
            None,
            &live(&["light.a", "light.new"], &["switch.fan"]),
        )
        .unwrap();

        assert!(!resolved.scene.entities.contains_key("light.gone"));
        assert!(resolved.scene.entities.contains_key("switch.fan"));
        assert_eq!(resolved.scene.entities["light.new"], EntityConfig::Off);
        assert_eq!(resolved.origins["light.new"], EntityOrigin::AddedOff);
        assert_eq!(
            kinds(&resolved),
            vec![
                IssueKind::ImportedFromRemote,
                IssueKind::RemovedMissingDevice,
                IssueKind::AddedNewDevice
            ]
        );
    }

    #[test]
    fn test_retained_scene_keeps_missing_devices() {
        let entities = json!({ "light.a": "on", "light.gone": "on" });
        let stored = local(entities.clone(), SceneMode::Additive, None);
        let baseline = entities_hash(&stored.scene.entities);
        let stored = LocalBackupEntry {
            last_known_remote_hash: Some(baseline),
            ..stored
        };

        let resolved = reconcile(
            Some(remote(entities, Some("additive"))),
            Some(stored),
            &live(&["light.a"], &[]),
        )
        .unwrap();

        assert_eq!(resolved.missing.keys().collect::<Vec<_>>(), vec!["light.gone"]);
        assert!(!resolved.scene.entities.contains_key("light.gone"));
        assert!(resolved.requires_write());

        // Both copies already hold the retained configuration
        assert!(resolved.retained_scene().entities.contains_key("light.gone"));
        assert!(!resolved.retained_requires_write());
    }

    #[test]
    fn test_additive_scene_does_not_add_lights() {
        let resolved = reconcile(
            Some(remote(json!({ "light.a": "on" }), Some("additive"))),
            None,
            &live(&["light.a", "light.b"], &[]),
        )
        .unwrap();
        assert_eq!(resolved.scene.entities.len(), 1);
    }

    #[test]
    fn test_empty_device_list_skips_liveness() {
        let resolved = reconcile(
            Some(remote(json!({ "light.a": "on" }), Some("exclusive"))),
            None,
            &LiveDevices::default(),
        )
        .unwrap();
        assert_eq!(resolved.scene.entities.len(), 1);
        assert!(resolved.has_issue(IssueKind::LivenessSkipped));
    }

    #[test]
    fn test_repair_is_idempotent() {
        let devices = live(&["light.a", "light.b"], &[]);
        let remote_scene = remote(
            json!({
                "light.a": { "state": "on", "brightness": 90, "color_temp": null },
                "light.gone": "on"
            }),
            Some("exclusive"),
        );

        let first = reconcile(Some(remote_scene), None, &devices).unwrap();
        assert!(first.has_issue(IssueKind::NullFieldsStripped));
        assert!(first.requires_write());

        // Persist the way a repair does: remote upsert plus local backup with baseline
        let written = first.scene.to_record();
        let stored_remote = RemoteScene::from_record(written);
        let stored_local = LocalBackupEntry::new(
            first.scene.clone(),
            Some(first.resolved_hash()),
            "test-instance",
        );

        let second = reconcile(Some(stored_remote), Some(stored_local), &devices).unwrap();
        assert!(second.issues.is_empty(), "{:?}", second.issues);
        assert!(!second.requires_write());
        assert_eq!(second.scene.entities, first.scene.entities);
    }
}
