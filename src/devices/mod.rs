//! Live light devices: parsed state and per-device profiles

pub mod profile;

use crate::client::StateRecord;
use crate::scenes::model::{EntityConfig, LightAttributes, PowerState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use profile::{ConnectionMedium, DeviceProfile, DeviceProfileResolver, ProfileSource};

/// Colour mode reported by a light
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Onoff,
    Brightness,
    ColorTemp,
    Hs,
    Xy,
    Rgb,
    Rgbw,
    Rgbww,
    White,
    Unknown,
}

impl ColorMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "onoff" => ColorMode::Onoff,
            "brightness" => ColorMode::Brightness,
            "color_temp" => ColorMode::ColorTemp,
            "hs" => ColorMode::Hs,
            "xy" => ColorMode::Xy,
            "rgb" => ColorMode::Rgb,
            "rgbw" => ColorMode::Rgbw,
            "rgbww" => ColorMode::Rgbww,
            "white" => ColorMode::White,
            _ => ColorMode::Unknown,
        }
    }
}

/// Current colour of a light, in the representation of its active mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightColor {
    Rgb([u8; 3]),
    Hs([f64; 2]),
    Xy([f64; 2]),
    Kelvin(u32),
}

/// Live state of one light entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub entity_id: String,
    pub friendly_name: Option<String>,
    pub is_on: bool,
    /// False when the controller reports the device as unavailable
    pub available: bool,
    pub brightness: Option<u8>,
    pub color_mode: Option<ColorMode>,
    pub supported_color_modes: Vec<ColorMode>,
    pub color: Option<LightColor>,
    pub effect: Option<String>,
    pub effect_list: Vec<String>,
    pub min_color_temp_kelvin: Option<u32>,
    pub max_color_temp_kelvin: Option<u32>,
}

impl LightState {
    /// Parse a state record; `None` for entities outside the light domain
    pub fn from_record(record: &StateRecord) -> Option<Self> {
        if record.domain() != "light" {
            return None;
        }

        let attrs = &record.attributes;
        let color_mode = attrs
            .get("color_mode")
            .and_then(Value::as_str)
            .map(ColorMode::parse);

        Some(Self {
            entity_id: record.entity_id.clone(),
            friendly_name: attrs
                .get("friendly_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            is_on: record.state == "on",
            available: !matches!(record.state.as_str(), "unavailable" | "unknown"),
            brightness: attrs.get("brightness").and_then(as_u8),
            color_mode,
            supported_color_modes: attrs
                .get("supported_color_modes")
                .and_then(Value::as_array)
                .map(|modes| {
                    modes
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ColorMode::parse)
                        .collect()
                })
                .unwrap_or_default(),
            color: current_color(color_mode, attrs),
            effect: attrs
                .get("effect")
                .and_then(Value::as_str)
                .filter(|effect| !matches!(*effect, "none" | "off" | "None"))
                .map(str::to_string),
            effect_list: attrs
                .get("effect_list")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            min_color_temp_kelvin: attrs.get("min_color_temp_kelvin").and_then(as_kelvin),
            max_color_temp_kelvin: attrs.get("max_color_temp_kelvin").and_then(as_kelvin),
        })
    }

    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.entity_id)
    }

    /// Desired-state entry reproducing what the light shows right now
    pub fn to_entity_config(&self) -> EntityConfig {
        if !self.is_on {
            return EntityConfig::Off;
        }

        let mut attrs = LightAttributes {
            state: Some(PowerState::On),
            brightness: self.brightness,
            effect: self.effect.clone(),
            ..Default::default()
        };
        match self.color {
            Some(LightColor::Rgb(rgb)) => attrs.rgb_color = Some(rgb),
            Some(LightColor::Hs(hs)) => attrs.hs_color = Some(hs),
            Some(LightColor::Xy(xy)) => attrs.xy_color = Some(xy),
            Some(LightColor::Kelvin(kelvin)) => attrs.color_temp_kelvin = Some(kelvin),
            None => {}
        }

        if attrs.brightness.is_none() && attrs.effect.is_none() && !attrs.has_color() {
            EntityConfig::On
        } else {
            EntityConfig::Detailed(attrs)
        }
    }
}

fn current_color(mode: Option<ColorMode>, attrs: &Map<String, Value>) -> Option<LightColor> {
    let kelvin = || {
        attrs
            .get("color_temp_kelvin")
            .and_then(as_kelvin)
            .map(LightColor::Kelvin)
    };
    let hs = || attrs.get("hs_color").and_then(as_pair).map(LightColor::Hs);
    let xy = || attrs.get("xy_color").and_then(as_pair).map(LightColor::Xy);
    let rgb = || attrs.get("rgb_color").and_then(as_rgb).map(LightColor::Rgb);

    match mode {
        Some(ColorMode::ColorTemp) => kelvin(),
        Some(ColorMode::Hs) => hs(),
        Some(ColorMode::Xy) => xy(),
        Some(ColorMode::Rgb | ColorMode::Rgbw | ColorMode::Rgbww) => rgb(),
        Some(ColorMode::Onoff | ColorMode::Brightness | ColorMode::White) => None,
        _ => rgb().or_else(kelvin).or_else(hs).or_else(xy),
    }
}

pub(crate) fn as_u8(value: &Value) -> Option<u8> {
    value
        .as_f64()
        .filter(|v| (0.0..=255.0).contains(v))
        .map(|v| v.round() as u8)
}

fn as_kelvin(value: &Value) -> Option<u32> {
    value
        .as_f64()
        .filter(|v| *v > 0.0 && *v < 100_000.0)
        .map(|v| v.round() as u32)
}

pub(crate) fn as_pair(value: &Value) -> Option<[f64; 2]> {
    match value.as_array()?.as_slice() {
        [a, b] => Some([a.as_f64()?, b.as_f64()?]),
        _ => None,
    }
}

pub(crate) fn as_rgb(value: &Value) -> Option<[u8; 3]> {
    match value.as_array()?.as_slice() {
        [r, g, b] => Some([as_u8(r)?, as_u8(g)?, as_u8(b)?]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(entity_id: &str, state: &str, attributes: Value) -> StateRecord {
        serde_json::from_value(json!({
            "entity_id": entity_id,
            "state": state,
            "attributes": attributes,
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_color_temp_light() {
        let light = LightState::from_record(&record(
            "light.kitchen",
            "on",
            json!({
                "friendly_name": "Kitchen",
                "brightness": 200,
                "color_mode": "color_temp",
                "color_temp_kelvin": 2700,
                "rgb_color": [255, 167, 87],
                "supported_color_modes": ["color_temp", "xy"],
                "min_color_temp_kelvin": 2000,
                "max_color_temp_kelvin": 6535
            }),
        ))
        .unwrap();

        assert!(light.is_on);
        assert_eq!(light.brightness, Some(200));
        assert_eq!(light.color, Some(LightColor::Kelvin(2700)));
        assert_eq!(
            light.supported_color_modes,
            vec![ColorMode::ColorTemp, ColorMode::Xy]
        );
        assert_eq!(light.display_name(), "Kitchen");
        assert_eq!(light.min_color_temp_kelvin, Some(2000));
        assert_eq!(light.max_color_temp_kelvin, Some(6535));
    }

    #[test]
    fn test_non_lights_are_ignored() {
        assert!(LightState::from_record(&record("switch.fan", "on", json!({}))).is_none());
    }

    #[test]
    fn test_capture_uses_one_color_representation() {
        let light = LightState::from_record(&record(
            "light.strip",
            "on",
            json!({
                "brightness": 90,
                "color_mode": "hs",
                "hs_color": [30.0, 80.0],
                "rgb_color": [255, 140, 50],
                "effect": "none"
            }),
        ))
        .unwrap();

        match light.to_entity_config() {
            EntityConfig::Detailed(attrs) => {
                assert_eq!(attrs.hs_color, Some([30.0, 80.0]));
                assert_eq!(attrs.rgb_color, None);
                assert_eq!(attrs.effect, None);
                assert_eq!(attrs.brightness, Some(90));
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn test_capture_off_and_plain_on() {
        let off = LightState::from_record(&record("light.a", "off", json!({}))).unwrap();
        assert_eq!(off.to_entity_config(), EntityConfig::Off);

        let on = LightState::from_record(&record(
            "light.b",
            "on",
            json!({ "color_mode": "onoff" }),
        ))
        .unwrap();
        assert_eq!(on.to_entity_config(), EntityConfig::On);
    }
}
