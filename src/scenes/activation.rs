//! Scene activation
//!
//! Drives lights into a resolved scene one device at a time with pacing
//! between devices. Devices that cannot take colour and brightness in one
//! command get two commands separated by a mode-switch pause. Exclusive
//! scenes start from a bulk turn-off and end with a verification sweep.

use crate::client::{HassApi, LightCommand};
use crate::config::EngineConfig;
use crate::devices::{DeviceProfile, DeviceProfileResolver, LightState};
use crate::error::Result;
use crate::error_recovery::CallOutcome;
use crate::scenes::model::{EntityConfig, IssueKind, SceneConfiguration, SceneIssue, SceneMode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Delays and bounds used while activating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationTimings {
    pub pacing: Duration,
    pub mode_switch: Duration,
    pub exclusive_settle: Duration,
    pub verification_settle: Duration,
    pub command_timeout: Duration,
}

impl Default for ActivationTimings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ActivationTimings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            pacing: config.pacing_delay,
            mode_switch: config.mode_switch_delay,
            exclusive_settle: config.exclusive_settle_delay,
            verification_settle: config.verification_settle_delay,
            command_timeout: config.command_timeout,
        }
    }
}

/// What an activation did
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub scene_id: String,
    pub mode: SceneMode,
    /// Devices addressed with at least one command
    pub lights_set: usize,
    pub commands_sent: usize,
    /// Lights switched off by the exclusive baseline
    pub baseline_off: Vec<String>,
    pub standard: Vec<String>,
    pub split_sequenced: Vec<String>,
    pub timed_out: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Lights the verification sweep had to turn off
    pub corrections: Vec<String>,
    pub issues: Vec<SceneIssue>,
}

impl ActivationReport {
    fn new(scene: &SceneConfiguration) -> Self {
        Self {
            scene_id: scene.id.clone(),
            mode: scene.mode,
            ..Default::default()
        }
    }

    /// Every device command completed
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.failed.is_empty()
    }
}

/// Result of one verification sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "lights", rename_all = "snake_case")]
pub enum SweepOutcome {
    /// Nothing was on that should be off
    Clean,
    /// These lights were on and have been turned off
    Corrected(Vec<String>),
    /// These lights were on; the turn-off timed out so their state is unknown
    Unconfirmed(Vec<String>),
}

impl SweepOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, SweepOutcome::Clean)
    }
}

/// Sends scene state to devices
pub struct ActivationDriver {
    api: Arc<HassApi>,
    profiles: Arc<DeviceProfileResolver>,
    timings: ActivationTimings,
}

impl ActivationDriver {
    pub fn new(
        api: Arc<HassApi>,
        profiles: Arc<DeviceProfileResolver>,
        timings: ActivationTimings,
    ) -> Self {
        Self {
            api,
            profiles,
            timings,
        }
    }

    pub fn timings(&self) -> &ActivationTimings {
        &self.timings
    }

    /// Activate a resolved scene against the given live lights.
    ///
    /// Device failures and timeouts are recorded in the report. Only a
    /// rejected credential aborts, since every further call would fail too.
    pub async fn activate(
        &self,
        scene: &SceneConfiguration,
        live_lights: &[LightState],
    ) -> Result<ActivationReport> {
        let mut report = ActivationReport::new(scene);
        info!(
            scene_id = %scene.id,
            mode = %scene.mode,
            entities = scene.entities.len(),
            "Activating scene"
        );

        if scene.mode == SceneMode::Exclusive {
            let on: Vec<String> = live_lights
                .iter()
                .filter(|light| light.is_on)
                .map(|light| light.entity_id.clone())
                .collect();
            if !on.is_empty() {
                debug!("Exclusive baseline: turning off {} light(s)", on.len());
                let outcome = self.api.turn_off(&on, self.timings.command_timeout).await;
                if self.record(&mut report, "baseline", outcome)? {
                    report.baseline_off = on;
                }
                sleep(self.timings.exclusive_settle).await;
            }
        }

        let mut standard = Vec::new();
        let mut split = Vec::new();
        for (entity_id, config) in &scene.entities {
            if !entity_id.starts_with("light.") {
                report.skipped.push(entity_id.clone());
                report.issues.push(SceneIssue::entity(
                    IssueKind::UnsupportedEntity,
                    entity_id,
                    "not a light; skipped",
                ));
                continue;
            }
            let profile = self.profiles.resolve(entity_id).await;
            if profile.split_sequencing {
                split.push((entity_id, config, profile));
            } else {
                standard.push((entity_id, config, profile));
            }
        }

        let mut addressed = 0usize;
        for (entity_id, config, profile) in standard.into_iter().chain(split) {
            if addressed > 0 {
                sleep(self.timings.pacing).await;
            }
            addressed += 1;

            if profile.split_sequencing {
                report.split_sequenced.push(entity_id.clone());
            } else {
                report.standard.push(entity_id.clone());
            }
            self.apply_entity(entity_id, config, &profile, &mut report)
                .await?;
        }
        report.lights_set = addressed;

        if scene.mode == SceneMode::Exclusive {
            match self.verify(scene).await {
                Ok(SweepOutcome::Clean) => {}
                Ok(SweepOutcome::Corrected(corrections)) => {
                    report.issues.push(SceneIssue::scene(
                        IssueKind::VerificationCorrection,
                        format!(
                            "verification turned off {} stray light(s): {}",
                            corrections.len(),
                            corrections.join(", ")
                        ),
                    ));
                    report.commands_sent += 1;
                    report.corrections = corrections;
                }
                Ok(SweepOutcome::Unconfirmed(stray)) => {
                    report.commands_sent += 1;
                    for entity_id in &stray {
                        if !report.timed_out.contains(entity_id) {
                            report.timed_out.push(entity_id.clone());
                        }
                        report.issues.push(SceneIssue::entity(
                            IssueKind::CommandTimedOut,
                            entity_id,
                            "verification turn-off timed out; light may still be on",
                        ));
                    }
                    report.issues.push(SceneIssue::scene(
                        IssueKind::VerificationSkipped,
                        format!(
                            "verification could not confirm {} stray light(s) off: {}",
                            stray.len(),
                            stray.join(", ")
                        ),
                    ));
                }
                Err(e) if e.is_auth_error() => return Err(e),
                Err(e) => {
                    warn!(scene_id = %scene.id, "Verification sweep skipped: {e}");
                    report.issues.push(SceneIssue::scene(
                        IssueKind::VerificationSkipped,
                        format!("verification skipped: {e}"),
                    ));
                }
            }
        }

        info!(
            scene_id = %scene.id,
            lights_set = report.lights_set,
            timed_out = report.timed_out.len(),
            failed = report.failed.len(),
            corrections = report.corrections.len(),
            "Scene activated"
        );
        Ok(report)
    }

    /// Send one entity's desired state, split in two when the profile needs it
    pub async fn apply_entity(
        &self,
        entity_id: &str,
        config: &EntityConfig,
        profile: &DeviceProfile,
        report: &mut ActivationReport,
    ) -> Result<()> {
        let timeout = self.timings.command_timeout;
        let targets = [entity_id.to_string()];

        match config {
            EntityConfig::Off => {
                let outcome = self.api.turn_off(&targets, timeout).await;
                self.record(report, entity_id, outcome)?;
            }
            EntityConfig::On => {
                let outcome = self
                    .api
                    .turn_on(entity_id, &LightCommand::default(), timeout)
                    .await;
                self.record(report, entity_id, outcome)?;
            }
            EntityConfig::Detailed(attrs) if !attrs.is_on() => {
                let outcome = self.api.turn_off(&targets, timeout).await;
                self.record(report, entity_id, outcome)?;
            }
            EntityConfig::Detailed(attrs) if profile.split_sequencing && attrs.has_color() => {
                debug!(entity_id, "Sending colour and brightness separately");
                let outcome = self
                    .api
                    .turn_on(entity_id, &attrs.color_command(), timeout)
                    .await;
                self.record(report, entity_id, outcome)?;

                let level = attrs.level_command();
                if !level.is_empty() {
                    sleep(self.timings.mode_switch).await;
                    let outcome = self.api.turn_on(entity_id, &level, timeout).await;
                    self.record(report, entity_id, outcome)?;
                }
                report.issues.push(SceneIssue::entity(
                    IssueKind::SplitSequenced,
                    entity_id,
                    "colour and brightness sent as separate commands",
                ));
            }
            EntityConfig::Detailed(attrs) => {
                let outcome = self
                    .api
                    .turn_on(entity_id, &attrs.combined_command(), timeout)
                    .await;
                self.record(report, entity_id, outcome)?;
            }
        }
        Ok(())
    }

    /// Turn off every light that is on but should not be.
    ///
    /// Waits for the verification settle delay, re-reads device states and
    /// sends one bulk turn-off. A timed-out turn-off is reported as
    /// unconfirmed, never as a correction.
    pub async fn verify(&self, scene: &SceneConfiguration) -> Result<SweepOutcome> {
        sleep(self.timings.verification_settle).await;

        let lights = self.api.get_lights().await?;
        let stray: Vec<String> = lights
            .iter()
            .filter(|light| light.is_on)
            .filter(|light| {
                scene
                    .entities
                    .get(&light.entity_id)
                    .map_or(true, |config| !config.is_on())
            })
            .map(|light| light.entity_id.clone())
            .collect();

        if stray.is_empty() {
            return Ok(SweepOutcome::Clean);
        }

        warn!(
            scene_id = %scene.id,
            "Verification found {} light(s) on that should be off",
            stray.len()
        );
        match self
            .api
            .turn_off(&stray, self.timings.command_timeout)
            .await?
        {
            CallOutcome::Completed(_) => Ok(SweepOutcome::Corrected(stray)),
            CallOutcome::TimedOut => {
                warn!(scene_id = %scene.id, "Verification turn-off timed out");
                Ok(SweepOutcome::Unconfirmed(stray))
            }
        }
    }

    /// Account for one command. Returns whether it completed.
    fn record(
        &self,
        report: &mut ActivationReport,
        entity_id: &str,
        outcome: Result<CallOutcome<Value>>,
    ) -> Result<bool> {
        report.commands_sent += 1;
        match outcome {
            Ok(CallOutcome::Completed(_)) => Ok(true),
            Ok(CallOutcome::TimedOut) => {
                warn!(entity_id, "Device command timed out");
                if !report.timed_out.iter().any(|id| id == entity_id) {
                    report.timed_out.push(entity_id.to_string());
                }
                report.issues.push(SceneIssue::entity(
                    IssueKind::CommandTimedOut,
                    entity_id,
                    "command timed out; outcome unknown",
                ));
                Ok(false)
            }
            Err(e) if e.is_auth_error() => Err(e),
            Err(e) => {
                warn!(entity_id, "Device command failed: {e}");
                if !report.failed.iter().any(|id| id == entity_id) {
                    report.failed.push(entity_id.to_string());
                }
                report.issues.push(SceneIssue::entity(
                    IssueKind::CommandFailed,
                    entity_id,
                    format!("command failed: {e}"),
                ));
                Ok(false)
            }
        }
    }
}

/// Lights that should be on after activating `scene`
pub fn expected_on(scene: &SceneConfiguration) -> BTreeSet<String> {
    scene
        .entities
        .iter()
        .filter(|(entity_id, config)| entity_id.starts_with("light.") && config.is_on())
        .map(|(entity_id, _)| entity_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::RetryPolicy;
    use crate::mock::MockHassTransport;
    use crate::scenes::model::LightAttributes;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    struct Harness {
        mock: Arc<MockHassTransport>,
        driver: ActivationDriver,
    }

    fn harness() -> Harness {
        let mock = Arc::new(MockHassTransport::new());
        let api = Arc::new(HassApi::new(
            mock.clone(),
            RetryPolicy::new(3, Duration::from_millis(100)),
        ));
        let profiles = Arc::new(DeviceProfileResolver::new(api.clone(), Duration::from_secs(2)));
        Harness {
            driver: ActivationDriver::new(api, profiles, ActivationTimings::default()),
            mock,
        }
    }

    fn detailed(attrs: LightAttributes) -> EntityConfig {
        EntityConfig::Detailed(attrs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_device_gets_two_commands_500ms_apart() {
        let h = harness();
        h.mock.add_light("light.bulb", false);
        h.mock
            .set_device_metadata("light.bulb", "IKEA of Sweden", "TRADFRI bulb E27 CWS", "zha");

        let mut scene = SceneConfiguration::new("warm", "Warm", SceneMode::Exclusive);
        scene.entities.insert(
            "light.bulb".into(),
            detailed(LightAttributes {
                color_temp_kelvin: Some(2700),
                brightness: Some(120),
                ..Default::default()
            }),
        );

        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();

        let calls = h.mock.timed_service_calls("light", "turn_on");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["color_temp_kelvin"], 2700);
        assert!(calls[0].1.get("brightness").is_none());
        assert_eq!(calls[1].1["brightness"], 120);
        assert!(calls[1].1.get("color_temp_kelvin").is_none());
        assert_eq!(calls[1].0 - calls[0].0, Duration::from_millis(500));

        assert_eq!(report.split_sequenced, vec!["light.bulb"]);
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::SplitSequenced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_devices_get_one_combined_command_with_pacing() {
        let h = harness();
        h.mock.add_light("light.a", false);
        h.mock.add_light("light.b", false);

        let mut scene = SceneConfiguration::new("s", "S", SceneMode::Additive);
        scene.entities.insert(
            "light.a".into(),
            detailed(LightAttributes {
                rgb_color: Some([255, 0, 0]),
                color_temp: Some(300),
                brightness: Some(10),
                ..Default::default()
            }),
        );
        scene.entities.insert("light.b".into(), EntityConfig::On);

        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();

        let calls = h.mock.timed_service_calls("light", "turn_on");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["rgb_color"], serde_json::json!([255, 0, 0]));
        assert_eq!(calls[0].1["brightness"], 10);
        assert!(calls[0].1.get("color_temp").is_none());
        assert_eq!(calls[1].1, serde_json::json!({ "entity_id": "light.b" }));
        assert_eq!(calls[1].0 - calls[0].0, Duration::from_millis(50));

        assert_eq!(report.lights_set, 2);
        assert!(report.baseline_off.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_baseline_and_verification() {
        let h = harness();
        h.mock.add_light("light.keep", true);
        h.mock.add_light("light.stray", true);
        h.mock.add_light("light.stuck", true);
        // Commands to this light are accepted but never applied
        h.mock.drop_commands_for("light.stuck");

        let mut scene = SceneConfiguration::new("focus", "Focus", SceneMode::Exclusive);
        scene.entities.insert("light.keep".into(), EntityConfig::On);
        scene.entities.insert("light.stray".into(), EntityConfig::Off);

        let started = Instant::now();
        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();

        let offs = h.mock.service_calls("light", "turn_off");
        assert_eq!(
            offs[0]["entity_id"],
            serde_json::json!(["light.keep", "light.stray", "light.stuck"])
        );
        assert_eq!(report.baseline_off.len(), 3);
        assert_eq!(report.corrections, vec!["light.stuck"]);
        assert!(started.elapsed() >= Duration::from_millis(800));

        assert_eq!(h.mock.lights_on(), vec!["light.keep", "light.stuck"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_sweep_finds_nothing() {
        let h = harness();
        h.mock.add_light("light.keep", false);
        h.mock.add_light("light.other", true);

        let mut scene = SceneConfiguration::new("focus", "Focus", SceneMode::Exclusive);
        scene.entities.insert("light.keep".into(), EntityConfig::On);
        scene.entities.insert("light.other".into(), EntityConfig::Off);

        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();
        assert!(report.corrections.is_empty());
        assert!(h.driver.verify(&scene).await.unwrap().is_clean());

        let on: BTreeSet<String> = h.mock.lights_on().into_iter().collect();
        assert_eq!(on, expected_on(&scene));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_sweep_is_not_a_correction() {
        let h = harness();
        h.mock.add_light("light.keep", false);
        h.mock.add_light("light.stray", true);
        h.mock.delay_entity("light.stray", Duration::from_secs(60));

        let mut scene = SceneConfiguration::new("focus", "Focus", SceneMode::Exclusive);
        scene.entities.insert("light.keep".into(), EntityConfig::On);

        let outcome = h.driver.verify(&scene).await.unwrap();
        assert_eq!(outcome, SweepOutcome::Unconfirmed(vec!["light.stray".into()]));
        assert_eq!(h.mock.lights_on(), vec!["light.stray"]);

        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();
        assert!(report.corrections.is_empty());
        assert!(report.timed_out.contains(&"light.stray".to_string()));
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::VerificationSkipped));
        assert!(!report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::VerificationCorrection));
        assert_eq!(h.mock.lights_on(), vec!["light.keep", "light.stray"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_metadata_does_not_hold_activation() {
        let h = harness();
        for id in ["light.a", "light.b", "light.c"] {
            h.mock.add_light(id, false);
        }
        h.mock.delay_path("api/template", Duration::from_secs(60));

        let mut scene = SceneConfiguration::new("s", "S", SceneMode::Additive);
        for id in ["light.a", "light.b", "light.c"] {
            scene.entities.insert(id.into(), EntityConfig::On);
        }

        let started = Instant::now();
        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();

        // One bounded lookup per device plus pacing between the three commands
        assert_eq!(
            started.elapsed(),
            Duration::from_secs(6) + Duration::from_millis(100)
        );
        assert_eq!(report.lights_set, 3);
        assert!(report.is_clean());
        assert_eq!(h.mock.lights_on(), vec!["light.a", "light.b", "light.c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_and_failures_do_not_abort() {
        let h = harness();
        h.mock.add_light("light.a", false);
        h.mock.add_light("light.slow", false);
        h.mock.add_light("light.z", false);
        h.mock.delay_entity("light.slow", Duration::from_secs(60));
        h.mock.reject_entity("light.a", 400);

        let mut scene = SceneConfiguration::new("s", "S", SceneMode::Additive);
        for id in ["light.a", "light.slow", "light.z"] {
            scene.entities.insert(id.into(), EntityConfig::On);
        }

        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();

        assert_eq!(report.lights_set, 3);
        assert_eq!(report.failed, vec!["light.a"]);
        assert_eq!(report.timed_out, vec!["light.slow"]);
        assert_eq!(h.mock.lights_on(), vec!["light.z"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_lights_are_skipped() {
        let h = harness();
        h.mock.add_light("light.a", false);

        let mut scene = SceneConfiguration::new("s", "S", SceneMode::Additive);
        scene.entities.insert("light.a".into(), EntityConfig::On);
        scene.entities.insert("switch.fan".into(), EntityConfig::On);

        let report = h
            .driver
            .activate(&scene, &h.mock.light_states())
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["switch.fan"]);
        assert_eq!(report.lights_set, 1);
    }
}
