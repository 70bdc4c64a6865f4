//! Scene engine
//!
//! Owns the API client, profile cache, activation driver and local store,
//! and exposes the scene operations. Every write to a scene goes through
//! [`SceneEngine::persist`], which snapshots the previous state, upserts the
//! controller's copy and records the new sync baseline locally.

use crate::client::HassApi;
use crate::config::{EngineConfig, ServerConfig};
use crate::devices::{DeviceProfile, DeviceProfileResolver, LightState};
use crate::error::{HassError, Result};
use crate::error_recovery::{CallOutcome, RetryStats};
use crate::scenes::activation::{ActivationDriver, ActivationReport, ActivationTimings};
use crate::scenes::hash::entities_hash;
use crate::scenes::model::{
    EntityConfig, IssueKind, LightAttributes, LocalBackupEntry, PowerState, RemoteScene,
    SceneConfiguration, SceneIssue, SceneMode, Snapshot, SnapshotOperation,
};
use crate::scenes::reconcile::{
    reconcile, EntityOrigin, LiveDevices, ResolutionSource, ResolvedScene,
};
use crate::storage::{ConfigurationStore, FileBlobStore};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Dry-run view of a scene resolution
#[derive(Debug, Clone, Serialize)]
pub struct SceneDiagnosis {
    pub scene_id: String,
    pub name: String,
    pub mode: SceneMode,
    pub source: ResolutionSource,
    pub conflict_detected: bool,
    /// A repair would write the controller's copy, the local backup or both
    pub requires_write: bool,
    pub entity_count: usize,
    pub issues: Vec<SceneIssue>,
    pub origins: BTreeMap<String, EntityOrigin>,
    pub remote_hash: Option<String>,
    pub resolved_hash: String,
}

impl SceneDiagnosis {
    pub fn from_resolved(resolved: &ResolvedScene) -> Self {
        Self {
            scene_id: resolved.scene.id.clone(),
            name: resolved.scene.name.clone(),
            mode: resolved.scene.mode,
            source: resolved.source,
            conflict_detected: resolved.conflict_detected,
            requires_write: resolved.requires_write(),
            entity_count: resolved.scene.entities.len(),
            issues: resolved.issues.clone(),
            origins: resolved.origins.clone(),
            remote_hash: resolved.remote_hash.clone(),
            resolved_hash: resolved.resolved_hash(),
        }
    }
}

/// Result of `activate_scene`
#[derive(Debug, Clone, Serialize)]
pub struct ActivationSummary {
    pub scene_id: String,
    /// Present when the scene was resolved and driven device by device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<SceneDiagnosis>,
    /// The resolution was written back before activating
    pub repaired: bool,
    /// Stored entries of devices the controller does not currently report.
    /// They are skipped here but kept in both copies until `repair_scene`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_devices: Vec<String>,
    /// Scene entity handed to the controller when no configuration was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ActivationReport>,
    /// Issues that arose outside the activation report
    pub issues: Vec<SceneIssue>,
}

/// Result of `repair_scene`
#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub scene_id: String,
    pub repaired: bool,
    pub snapshot_id: Option<String>,
    pub diagnosis: SceneDiagnosis,
}

/// Parameters for capturing the current light states as a scene
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub scene_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: SceneMode,
    #[serde(default)]
    pub icon: Option<String>,
    /// Lights to include; every light when absent
    #[serde(default)]
    pub entity_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub scene_id: String,
    pub mode: SceneMode,
    pub entity_count: usize,
    pub entities: BTreeMap<String, EntityConfig>,
    /// Requested lights that do not exist
    pub missing: Vec<String>,
    pub snapshot_id: Option<String>,
}

/// Changes applied by `update_scene`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<SceneMode>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Entity entries to add or replace, in wire form (`"on"`, `"off"` or an
    /// attribute object)
    #[serde(default)]
    pub set: BTreeMap<String, Value>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl SceneUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.mode.is_none()
            && self.icon.is_none()
            && self.set.is_empty()
            && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub scene: SceneConfiguration,
    /// Resolution the changes were applied on top of
    pub resolution: SceneDiagnosis,
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub scene_id: String,
    pub remote_deleted: bool,
    pub local_removed: bool,
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub scene_id: String,
    pub remote_hash: String,
    pub entity_count: usize,
    pub snapshot_id: Option<String>,
    pub issues: Vec<SceneIssue>,
}

/// One row of `list_scenes`
#[derive(Debug, Clone, Serialize)]
pub struct SceneListing {
    pub scene_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_entity: Option<String>,
    pub stored_locally: bool,
    /// Last time the local copy was written or synced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<SceneDiagnosis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub snapshot_id: String,
    pub scene_id: String,
    /// Snapshot of the state the restore replaced
    pub previous_snapshot_id: Option<String>,
    pub entity_count: usize,
}

/// A light with its device profile
#[derive(Debug, Clone, Serialize)]
pub struct LightInfo {
    #[serde(flatten)]
    pub state: LightState,
    pub profile: DeviceProfile,
}

/// Direct control of one light
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightControlRequest {
    pub entity_id: String,
    #[serde(default)]
    pub state: Option<PowerState>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub rgb_color: Option<[u8; 3]>,
    #[serde(default)]
    pub color_temp_kelvin: Option<u32>,
    #[serde(default)]
    pub hs_color: Option<[f64; 2]>,
    #[serde(default)]
    pub xy_color: Option<[f64; 2]>,
    #[serde(default)]
    pub effect: Option<String>,
}

impl LightControlRequest {
    /// Desired state in scene form
    pub fn to_entity_config(&self) -> EntityConfig {
        let attrs = LightAttributes {
            state: self.state,
            brightness: self.brightness,
            rgb_color: self.rgb_color,
            color_temp_kelvin: self.color_temp_kelvin,
            hs_color: self.hs_color,
            xy_color: self.xy_color,
            effect: self.effect.clone(),
            ..Default::default()
        };
        let plain = attrs.brightness.is_none() && attrs.effect.is_none() && !attrs.has_color();
        match self.state {
            Some(PowerState::Off) => EntityConfig::Off,
            _ if plain => EntityConfig::On,
            _ => EntityConfig::Detailed(attrs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: Option<String>,
    pub light_count: usize,
    pub instance_id: String,
    pub backup_location: String,
    pub stored_scenes: usize,
    pub snapshots: usize,
}

/// Both stored copies of a scene
struct StoredCopies {
    remote: Option<RemoteScene>,
    local: Option<LocalBackupEntry>,
}

impl StoredCopies {
    /// Configuration a write would replace; the controller's copy is canonical
    fn current(&self) -> Option<SceneConfiguration> {
        let mut scene = self
            .remote
            .as_ref()
            .map(|remote| remote.scene.clone())
            .or_else(|| self.local.as_ref().map(|local| local.scene.clone()))?;
        scene.clear_null_markers();
        Some(scene)
    }

    fn is_empty(&self) -> bool {
        self.remote.is_none() && self.local.is_none()
    }
}

/// Scene reconciliation and activation engine
pub struct SceneEngine {
    api: Arc<HassApi>,
    profiles: Arc<DeviceProfileResolver>,
    driver: ActivationDriver,
    store: Mutex<ConfigurationStore>,
    instance_id: String,
    config: EngineConfig,
}

impl SceneEngine {
    pub fn new(api: Arc<HassApi>, store: ConfigurationStore, config: EngineConfig) -> Self {
        let profiles = Arc::new(DeviceProfileResolver::new(
            api.clone(),
            config.metadata_timeout,
        ));
        let driver = ActivationDriver::new(
            api.clone(),
            profiles.clone(),
            ActivationTimings::from(&config),
        );
        let instance_id = generate_instance_id();
        info!("Scene engine started as instance {instance_id}");

        Self {
            api,
            profiles,
            driver,
            store: Mutex::new(store),
            instance_id,
            config,
        }
    }

    /// Build an engine from settings: HTTP client plus file-backed store
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let api = Arc::new(HassApi::from_config(&config.hass)?);
        let blob = FileBlobStore::new(config.storage.backup_path());
        let store = ConfigurationStore::open(Box::new(blob), config.storage.max_snapshots)?;
        Ok(Self::new(api, store, config.engine.clone()))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn api(&self) -> &Arc<HassApi> {
        &self.api
    }

    /// Current device set as reported by the controller
    pub async fn live_devices(&self) -> Result<LiveDevices> {
        let states = self.api.get_states().await?;
        Ok(LiveDevices::from_states(&states))
    }

    async fn load(&self, scene_id: &str) -> Result<StoredCopies> {
        let remote = self
            .api
            .get_scene_config(scene_id)
            .await?
            .map(RemoteScene::from_record);
        let local = self.store.lock().await.get(scene_id);
        Ok(StoredCopies { remote, local })
    }

    /// Resolve a scene without writing anything
    pub async fn resolve_scene(&self, scene_id: &str) -> Result<Option<ResolvedScene>> {
        let live = self.live_devices().await?;
        let copies = self.load(scene_id).await?;
        Ok(reconcile(copies.remote, copies.local, &live))
    }

    async fn resolve_or_not_found(
        &self,
        scene_id: &str,
        live: &LiveDevices,
    ) -> Result<(ResolvedScene, Option<SceneConfiguration>)> {
        let copies = self.load(scene_id).await?;
        let previous = copies.current();
        let resolved = reconcile(copies.remote, copies.local, live)
            .ok_or_else(|| HassError::not_found(format!("Scene '{scene_id}'")))?;
        Ok((resolved, previous))
    }

    /// Snapshot the previous state, write the controller's copy and record
    /// the new sync baseline. Returns the snapshot id.
    async fn persist(
        &self,
        scene: &SceneConfiguration,
        previous: Option<&SceneConfiguration>,
        operation: SnapshotOperation,
    ) -> Result<Option<String>> {
        let mut store = self.store.lock().await;

        let snapshot_id = match previous {
            Some(previous) => {
                let snapshot = Snapshot::of(previous, operation, &self.instance_id);
                let id = snapshot.id.clone();
                store.append_snapshot(snapshot)?;
                Some(id)
            }
            None => None,
        };

        self.api.upsert_scene_config(&scene.to_record()).await?;

        let hash = entities_hash(&scene.entities);
        store.put(LocalBackupEntry::new(
            scene.clone(),
            Some(hash.clone()),
            &self.instance_id,
        ))?;

        debug!(scene_id = %scene.id, %hash, ?operation, "Scene written");
        Ok(snapshot_id)
    }

    /// Resolve a scene and drive the lights into it.
    ///
    /// Falls back to the controller's own `scene.turn_on` when neither side
    /// knows a configuration for `scene_id`. Auto-repair stores the resolution
    /// with the entries of missing devices kept; only `repair_scene` drops them.
    pub async fn activate_scene(&self, scene_id: &str) -> Result<ActivationSummary> {
        let live = self.live_devices().await?;
        let copies = self.load(scene_id).await?;
        let previous = copies.current();

        let Some(resolved) = reconcile(copies.remote, copies.local, &live) else {
            return self.activate_unresolved(scene_id, &live).await;
        };

        let mut issues = Vec::new();
        let mut repaired = false;
        if self.config.auto_repair_on_activate && resolved.retained_requires_write() {
            match self
                .persist(
                    &resolved.retained_scene(),
                    previous.as_ref(),
                    SnapshotOperation::Repair,
                )
                .await
            {
                Ok(_) => repaired = true,
                Err(e) if e.is_auth_error() => return Err(e),
                Err(e) => {
                    warn!(scene_id, "Could not persist resolution before activating: {e}");
                    issues.push(SceneIssue::scene(
                        IssueKind::RepairFailed,
                        format!("resolution not persisted: {e}"),
                    ));
                }
            }
        }

        if resolved.conflict_detected {
            warn!(scene_id, "Scene was changed by another writer; activating merged state");
        }

        let report = self.driver.activate(&resolved.scene, &live.lights).await?;
        Ok(ActivationSummary {
            scene_id: scene_id.to_string(),
            resolution: Some(SceneDiagnosis::from_resolved(&resolved)),
            repaired,
            missing_devices: resolved.missing.keys().cloned().collect(),
            fallback_entity: None,
            report: Some(report),
            issues,
        })
    }

    async fn activate_unresolved(
        &self,
        scene_id: &str,
        live: &LiveDevices,
    ) -> Result<ActivationSummary> {
        let entity_id = live
            .scene_entities
            .get(scene_id)
            .cloned()
            .unwrap_or_else(|| scene_entity_id(scene_id));
        if !live.entity_ids.contains(&entity_id) {
            return Err(HassError::not_found(format!("Scene '{scene_id}'")));
        }

        info!(scene_id, %entity_id, "No scene configuration; letting the controller activate it");
        let mut issues = Vec::new();
        let outcome = self
            .api
            .activate_scene_entity(&entity_id, self.config.command_timeout)
            .await?;
        if let CallOutcome::TimedOut = outcome {
            issues.push(SceneIssue::entity(
                IssueKind::CommandTimedOut,
                &entity_id,
                "scene activation timed out; outcome unknown",
            ));
        }

        Ok(ActivationSummary {
            scene_id: scene_id.to_string(),
            resolution: None,
            repaired: false,
            missing_devices: Vec::new(),
            fallback_entity: Some(entity_id),
            report: None,
            issues,
        })
    }

    /// Resolve only and report what a repair would change
    pub async fn diagnose_scene(&self, scene_id: &str) -> Result<SceneDiagnosis> {
        let live = self.live_devices().await?;
        self.diagnose_with(scene_id, &live).await
    }

    async fn diagnose_with(&self, scene_id: &str, live: &LiveDevices) -> Result<SceneDiagnosis> {
        let (resolved, _) = self.resolve_or_not_found(scene_id, live).await?;
        Ok(SceneDiagnosis::from_resolved(&resolved))
    }

    /// Write the resolved configuration back to both sides if it differs
    pub async fn repair_scene(&self, scene_id: &str) -> Result<RepairOutcome> {
        let live = self.live_devices().await?;
        let (resolved, previous) = self.resolve_or_not_found(scene_id, &live).await?;
        let diagnosis = SceneDiagnosis::from_resolved(&resolved);

        if !resolved.requires_write() {
            debug!(scene_id, "Scene already consistent");
            return Ok(RepairOutcome {
                scene_id: scene_id.to_string(),
                repaired: false,
                snapshot_id: None,
                diagnosis,
            });
        }

        let snapshot_id = self
            .persist(&resolved.scene, previous.as_ref(), SnapshotOperation::Repair)
            .await?;
        info!(
            scene_id,
            issues = diagnosis.issues.len(),
            "Scene repaired"
        );
        Ok(RepairOutcome {
            scene_id: scene_id.to_string(),
            repaired: true,
            snapshot_id,
            diagnosis,
        })
    }

    /// Store the current state of the lights as a scene
    pub async fn capture_scene(&self, request: CaptureRequest) -> Result<CaptureOutcome> {
        validate_scene_id(&request.scene_id)?;
        let lights = self.api.get_lights().await?;

        let mut missing = Vec::new();
        let selected: Vec<&LightState> = match &request.entity_ids {
            Some(entity_ids) => {
                let wanted: BTreeSet<&str> = entity_ids.iter().map(String::as_str).collect();
                for entity_id in &wanted {
                    if !lights.iter().any(|light| light.entity_id == *entity_id) {
                        missing.push(entity_id.to_string());
                    }
                }
                lights
                    .iter()
                    .filter(|light| wanted.contains(light.entity_id.as_str()))
                    .collect()
            }
            None => lights.iter().collect(),
        };
        if selected.is_empty() {
            return Err(HassError::invalid_input(
                "No matching lights to capture".to_string(),
            ));
        }

        let mut scene = SceneConfiguration::new(
            request.scene_id.clone(),
            request
                .name
                .clone()
                .unwrap_or_else(|| request.scene_id.clone()),
            request.mode,
        );
        scene.icon = request.icon.clone();
        scene.entities = selected
            .iter()
            .map(|light| (light.entity_id.clone(), light.to_entity_config()))
            .collect();

        let previous = self.load(&request.scene_id).await?.current();
        if let Some(previous) = &previous {
            scene.metadata = previous.metadata.clone();
        }
        let snapshot_id = self
            .persist(&scene, previous.as_ref(), SnapshotOperation::Update)
            .await?;

        info!(
            scene_id = %scene.id,
            lights = scene.entities.len(),
            "Captured scene"
        );
        Ok(CaptureOutcome {
            scene_id: scene.id.clone(),
            mode: scene.mode,
            entity_count: scene.entities.len(),
            entities: scene.entities,
            missing,
            snapshot_id,
        })
    }

    /// Apply changes on top of the resolved configuration and write it
    pub async fn update_scene(&self, scene_id: &str, update: SceneUpdate) -> Result<UpdateOutcome> {
        if update.is_empty() {
            return Err(HassError::invalid_input("No changes given".to_string()));
        }

        let live = self.live_devices().await?;
        let mut parsed = Vec::with_capacity(update.set.len());
        for (entity_id, value) in &update.set {
            if !entity_id.starts_with("light.") {
                return Err(HassError::invalid_input(format!(
                    "'{entity_id}' is not a light"
                )));
            }
            if !live.entity_ids.is_empty() && !live.entity_ids.contains(entity_id) {
                return Err(HassError::invalid_input(format!(
                    "Light '{entity_id}' does not exist"
                )));
            }
            let mut config = EntityConfig::from_value(value)
                .map_err(|e| HassError::invalid_input(format!("{entity_id}: {e}")))?;
            if let EntityConfig::Detailed(attrs) = &mut config {
                attrs.stripped_nulls.clear();
            }
            parsed.push((entity_id.clone(), config));
        }

        let (resolved, previous) = self.resolve_or_not_found(scene_id, &live).await?;
        let resolution = SceneDiagnosis::from_resolved(&resolved);
        let mut scene = resolved.scene;

        if let Some(name) = update.name {
            scene.name = name;
        }
        if let Some(mode) = update.mode {
            scene.mode = mode;
        }
        if update.icon.is_some() {
            scene.icon = update.icon;
        }
        for entity_id in &update.remove {
            scene.entities.remove(entity_id);
        }
        scene.entities.extend(parsed);

        let snapshot_id = self
            .persist(&scene, previous.as_ref(), SnapshotOperation::Update)
            .await?;
        info!(scene_id, entities = scene.entities.len(), "Scene updated");
        Ok(UpdateOutcome {
            scene,
            resolution,
            snapshot_id,
        })
    }

    /// Remove a scene from the controller and the local store
    pub async fn delete_scene(&self, scene_id: &str) -> Result<DeleteOutcome> {
        let copies = self.load(scene_id).await?;
        if copies.is_empty() {
            return Err(HassError::not_found(format!("Scene '{scene_id}'")));
        }

        let mut store = self.store.lock().await;
        let snapshot_id = match copies.current() {
            Some(previous) => {
                let snapshot =
                    Snapshot::of(&previous, SnapshotOperation::Delete, &self.instance_id);
                let id = snapshot.id.clone();
                store.append_snapshot(snapshot)?;
                Some(id)
            }
            None => None,
        };

        let remote_deleted = self.api.delete_scene_config(scene_id).await?;
        let local_removed = store.remove(scene_id)?.is_some();
        info!(scene_id, remote_deleted, local_removed, "Scene deleted");

        Ok(DeleteOutcome {
            scene_id: scene_id.to_string(),
            remote_deleted,
            local_removed,
            snapshot_id,
        })
    }

    /// Accept the controller's copy as the new local baseline
    pub async fn sync_scene(&self, scene_id: &str) -> Result<SyncOutcome> {
        let remote = self
            .api
            .get_scene_config(scene_id)
            .await?
            .map(RemoteScene::from_record)
            .ok_or_else(|| HassError::not_found(format!("Scene '{scene_id}' on the controller")))?;

        let remote_hash = entities_hash(&remote.scene.entities);
        let mut scene = remote.scene;
        scene.clear_null_markers();

        let mut store = self.store.lock().await;
        let snapshot_id = match store.get(scene_id) {
            Some(local) => {
                let snapshot =
                    Snapshot::of(&local.scene, SnapshotOperation::Sync, &self.instance_id);
                let id = snapshot.id.clone();
                store.append_snapshot(snapshot)?;
                Some(id)
            }
            None => None,
        };

        let entity_count = scene.entities.len();
        store.put(LocalBackupEntry::new(
            scene,
            Some(remote_hash.clone()),
            &self.instance_id,
        ))?;
        info!(scene_id, %remote_hash, "Local backup synced from controller");

        Ok(SyncOutcome {
            scene_id: scene_id.to_string(),
            remote_hash,
            entity_count,
            snapshot_id,
            issues: remote.issues,
        })
    }

    /// Every scene known to the controller or the local store, diagnosed
    pub async fn list_scenes(&self) -> Result<Vec<SceneListing>> {
        let live = self.live_devices().await?;
        let local: BTreeMap<String, LocalBackupEntry> = self
            .store
            .lock()
            .await
            .list_all()
            .into_iter()
            .map(|entry| (entry.scene.id.clone(), entry))
            .collect();

        let mut scene_ids: BTreeSet<String> = live.scene_entities.keys().cloned().collect();
        scene_ids.extend(local.keys().cloned());

        let diagnoses = join_all(
            scene_ids
                .iter()
                .map(|scene_id| self.diagnose_with(scene_id, &live)),
        )
        .await;

        Ok(scene_ids
            .into_iter()
            .zip(diagnoses)
            .map(|(scene_id, diagnosis)| {
                let (diagnosis, error) = match diagnosis {
                    Ok(diagnosis) => (Some(diagnosis), None),
                    Err(e) => (None, Some(e.sanitized_message())),
                };
                SceneListing {
                    scene_entity: live.scene_entities.get(&scene_id).cloned(),
                    stored_locally: local.contains_key(&scene_id),
                    local_updated_at: local.get(&scene_id).map(|entry| entry.updated_at),
                    scene_id,
                    diagnosis,
                    error,
                }
            })
            .collect())
    }

    /// Snapshots, newest first
    pub async fn list_snapshots(&self, scene_id: Option<&str>) -> Vec<Snapshot> {
        self.store.lock().await.list_snapshots(scene_id)
    }

    /// Write a snapshot back as the scene's configuration
    pub async fn restore_snapshot(&self, snapshot_id: &str) -> Result<RestoreOutcome> {
        let snapshot = self
            .store
            .lock()
            .await
            .get_snapshot(snapshot_id)
            .ok_or_else(|| HassError::not_found(format!("Snapshot '{snapshot_id}'")))?;

        let copies = self.load(&snapshot.scene_id).await?;
        let previous = copies.current();
        let mut scene = snapshot.to_scene();
        if let Some(previous) = &previous {
            scene.metadata = previous.metadata.clone();
        }

        let previous_snapshot_id = self
            .persist(&scene, previous.as_ref(), SnapshotOperation::Restore)
            .await?;
        info!(
            scene_id = %scene.id,
            snapshot_id,
            "Scene restored from snapshot"
        );
        Ok(RestoreOutcome {
            snapshot_id: snapshot_id.to_string(),
            scene_id: scene.id,
            previous_snapshot_id,
            entity_count: scene.entities.len(),
        })
    }

    /// All lights with their resolved device profiles
    pub async fn list_lights(&self) -> Result<Vec<LightInfo>> {
        let lights = self.api.get_lights().await?;
        let profiles = join_all(
            lights
                .iter()
                .map(|light| self.profiles.resolve(&light.entity_id)),
        )
        .await;
        Ok(lights
            .into_iter()
            .zip(profiles)
            .map(|(state, profile)| LightInfo { state, profile })
            .collect())
    }

    /// Set one light, split into two commands when its profile needs it
    pub async fn control_light(&self, request: LightControlRequest) -> Result<ActivationReport> {
        if !request.entity_id.starts_with("light.") {
            return Err(HassError::invalid_input(format!(
                "'{}' is not a light",
                request.entity_id
            )));
        }
        let lights = self.api.get_lights().await?;
        if !lights.iter().any(|light| light.entity_id == request.entity_id) {
            return Err(HassError::not_found(format!("Light '{}'", request.entity_id)));
        }

        let profile = self.profiles.resolve(&request.entity_id).await;
        let mut report = ActivationReport {
            scene_id: request.entity_id.clone(),
            lights_set: 1,
            ..Default::default()
        };
        if profile.split_sequencing {
            report.split_sequenced.push(request.entity_id.clone());
        } else {
            report.standard.push(request.entity_id.clone());
        }

        self.driver
            .apply_entity(
                &request.entity_id,
                &request.to_entity_config(),
                &profile,
                &mut report,
            )
            .await?;
        Ok(report)
    }

    /// Reachability and credential check plus local store facts
    pub async fn check_connection(&self) -> Result<ConnectionStatus> {
        let api_info: Value = self.api.check_api().await?;
        let lights = self.api.get_lights().await?;
        let store = self.store.lock().await;

        Ok(ConnectionStatus {
            connected: true,
            message: api_info
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            light_count: lights.len(),
            instance_id: self.instance_id.clone(),
            backup_location: store.location(),
            stored_scenes: store.list_all().len(),
            snapshots: store.snapshot_count(),
        })
    }

    pub async fn retry_stats(&self) -> RetryStats {
        self.api.retry_stats().await
    }

    /// Metadata passed through unchanged on the next write
    pub async fn stored_metadata(&self, scene_id: &str) -> Option<Map<String, Value>> {
        self.store
            .lock()
            .await
            .get(scene_id)
            .map(|entry| entry.scene.metadata)
    }
}

/// Writer id: host name plus a random suffix, unique per engine instance
fn generate_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "hass-scenes".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

fn scene_entity_id(scene_id: &str) -> String {
    if scene_id.starts_with("scene.") {
        scene_id.to_string()
    } else {
        format!("scene.{scene_id}")
    }
}

fn validate_scene_id(scene_id: &str) -> Result<()> {
    if scene_id.trim().is_empty() {
        return Err(HassError::invalid_input("Scene id must not be empty"));
    }
    if scene_id.contains('/') {
        return Err(HassError::invalid_input(format!(
            "Scene id '{scene_id}' must not contain '/'"
        )));
    }
    Ok(())
}
