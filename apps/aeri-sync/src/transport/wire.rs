//! JSON and form encodings spoken by the controller firmware.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::catalog;
use crate::model::zone::PERCENT_MAX;
use crate::model::{
    ColorSlot, DeviceSnapshot, Field, FieldValue, GlobalSettings, IndicatorZone, LightZone, PresetSlot, Rgb,
    SideState, SnapshotError, Target, WelcomeConfig, Zone, ZoneId,
};

pub const STATE_PATH: &str = "get-state";
pub const PRESET_DETAILS_PATH: &str = "get-preset-details";
pub const UPDATE_AUTH_PATH: &str = "update-auth";
pub const RESET_PATH: &str = "reset-to-default";
pub const AUTH_HEADER: &str = "X-Auth-PIN";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed state document: {0}")]
    Json(String),
    #[error("{zone} {field} {value} exceeds 100")]
    OutOfRange {
        zone: ZoneId,
        field: &'static str,
        value: u8,
    },
    #[error("{zone} reports unknown mode {mode}")]
    UnknownMode { zone: ZoneId, mode: u8 },
    #[error("unknown welcome mode {0}")]
    UnknownWelcomeMode(u8),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl From<serde_json::Error> for WireError {
    fn from(value: serde_json::Error) -> Self {
        WireError::Json(value.to_string())
    }
}

type WireRgb = [u8; 3];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireSide {
    #[serde(rename = "warna")]
    color: WireRgb,
    #[serde(rename = "warna2", default)]
    color2: WireRgb,
    #[serde(rename = "warna3", default)]
    color3: WireRgb,
    #[serde(rename = "modeEfek")]
    mode: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum WireTarget {
    #[serde(rename = "kiri")]
    Left,
    #[serde(rename = "kanan")]
    Right,
    #[serde(rename = "keduanya")]
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLight {
    #[serde(rename = "stateKiri")]
    left: WireSide,
    #[serde(rename = "stateKanan")]
    right: WireSide,
    led_count: u16,
    brightness: u8,
    speed: u8,
    target: WireTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIndicator {
    led_count: u16,
    mode: u8,
    #[serde(rename = "warna")]
    color: WireRgb,
    speed: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireGlobal {
    #[serde(rename = "modeWelcome")]
    welcome_mode: u8,
    #[serde(rename = "durasiWelcome")]
    welcome_duration: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePreset {
    slot: u8,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireState {
    alis: WireLight,
    shroud: WireLight,
    demon: WireLight,
    sein: WireIndicator,
    global: WireGlobal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    presets: Vec<WirePreset>,
}

/// Summary returned for a stored preset slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

fn rgb([r, g, b]: WireRgb) -> Rgb {
    Rgb::new(r, g, b)
}

fn wire_rgb(color: Rgb) -> WireRgb {
    [color.r, color.g, color.b]
}

fn percent(zone: ZoneId, field: &'static str, value: u8) -> Result<u8, WireError> {
    if value > PERCENT_MAX {
        return Err(WireError::OutOfRange { zone, field, value });
    }
    Ok(value)
}

fn mode(zone: ZoneId, mode: u8) -> Result<u8, WireError> {
    if !catalog::mode_exists(zone.kind(), mode) {
        return Err(WireError::UnknownMode { zone, mode });
    }
    Ok(mode)
}

impl WireSide {
    fn into_side(self, zone: ZoneId) -> Result<SideState, WireError> {
        Ok(SideState {
            mode: mode(zone, self.mode)?,
            colors: [rgb(self.color), rgb(self.color2), rgb(self.color3)],
        })
    }

    fn from_side(side: &SideState) -> Self {
        Self {
            color: wire_rgb(side.colors[0]),
            color2: wire_rgb(side.colors[1]),
            color3: wire_rgb(side.colors[2]),
            mode: side.mode,
        }
    }
}

impl From<WireTarget> for Target {
    fn from(value: WireTarget) -> Self {
        match value {
            WireTarget::Left => Target::Left,
            WireTarget::Right => Target::Right,
            WireTarget::Both => Target::Both,
        }
    }
}

impl From<Target> for WireTarget {
    fn from(value: Target) -> Self {
        match value {
            Target::Left => WireTarget::Left,
            Target::Right => WireTarget::Right,
            Target::Both => WireTarget::Both,
        }
    }
}

impl WireLight {
    fn into_zone(self, zone: ZoneId) -> Result<Zone, WireError> {
        Ok(Zone::Light(LightZone {
            left: self.left.into_side(zone)?,
            right: self.right.into_side(zone)?,
            brightness: percent(zone, "brightness", self.brightness)?,
            speed: percent(zone, "speed", self.speed)?,
            target: self.target.into(),
            led_count: self.led_count,
        }))
    }

    fn from_zone(light: &LightZone) -> Self {
        Self {
            left: WireSide::from_side(&light.left),
            right: WireSide::from_side(&light.right),
            led_count: light.led_count,
            brightness: light.brightness,
            speed: light.speed,
            target: light.target.into(),
        }
    }
}

impl WireIndicator {
    fn into_zone(self, zone: ZoneId) -> Result<Zone, WireError> {
        Ok(Zone::Indicator(IndicatorZone {
            mode: mode(zone, self.mode)?,
            speed: percent(zone, "speed", self.speed)?,
            color: rgb(self.color),
            led_count: self.led_count,
        }))
    }

    fn from_zone(indicator: &IndicatorZone) -> Self {
        Self {
            led_count: indicator.led_count,
            mode: indicator.mode,
            color: wire_rgb(indicator.color),
            speed: indicator.speed,
        }
    }
}

/// Decodes a full state document. Anything out of range rejects the whole
/// document so a bad payload never half-applies.
pub fn decode_snapshot(text: &str) -> Result<DeviceSnapshot, WireError> {
    let state: WireState = serde_json::from_str(text)?;
    if !catalog::welcome_mode_exists(state.global.welcome_mode) {
        return Err(WireError::UnknownWelcomeMode(state.global.welcome_mode));
    }
    let zones = [
        (ZoneId::Alis, state.alis.into_zone(ZoneId::Alis)?),
        (ZoneId::Shroud, state.shroud.into_zone(ZoneId::Shroud)?),
        (ZoneId::Demon, state.demon.into_zone(ZoneId::Demon)?),
        (ZoneId::Sein, state.sein.into_zone(ZoneId::Sein)?),
    ];
    let global = GlobalSettings {
        welcome: WelcomeConfig {
            mode: state.global.welcome_mode,
            duration_secs: state.global.welcome_duration,
        },
        presets: state
            .presets
            .into_iter()
            .map(|preset| PresetSlot {
                slot: preset.slot,
                name: preset.name,
            })
            .collect(),
    };
    Ok(DeviceSnapshot::from_zones(zones, global)?)
}

pub fn encode_snapshot(snapshot: &DeviceSnapshot) -> Result<String, WireError> {
    let light = |id: ZoneId| match snapshot.zone(id) {
        Zone::Light(light) => Ok(WireLight::from_zone(light)),
        Zone::Indicator(_) => Err(SnapshotError::KindMismatch {
            zone: id,
            expected: id.kind(),
        }),
    };
    let sein = match snapshot.zone(ZoneId::Sein) {
        Zone::Indicator(indicator) => WireIndicator::from_zone(indicator),
        Zone::Light(_) => {
            return Err(SnapshotError::KindMismatch {
                zone: ZoneId::Sein,
                expected: ZoneId::Sein.kind(),
            }
            .into());
        }
    };
    let state = WireState {
        alis: light(ZoneId::Alis)?,
        shroud: light(ZoneId::Shroud)?,
        demon: light(ZoneId::Demon)?,
        sein,
        global: WireGlobal {
            welcome_mode: snapshot.global.welcome.mode,
            welcome_duration: snapshot.global.welcome.duration_secs,
        },
        presets: snapshot
            .global
            .presets
            .iter()
            .map(|preset| WirePreset {
                slot: preset.slot,
                name: preset.name.clone(),
            })
            .collect(),
    };
    Ok(serde_json::to_string(&state)?)
}

/// Path of the per-zone mutation endpoint.
pub fn set_mode_path(zone: ZoneId) -> String {
    format!("set-mode-{zone}")
}

/// Form body for a single field update.
pub fn form_fields(field: Field, value: FieldValue) -> Vec<(String, String)> {
    let pair = |key: &str, value: String| (key.to_string(), value);
    match (field, value) {
        (_, FieldValue::Mode(mode)) => vec![pair("mode", mode.to_string())],
        (_, FieldValue::Speed(speed)) => vec![pair("speed", speed.to_string())],
        (_, FieldValue::Brightness(level)) => vec![pair("brightness", level.to_string())],
        (_, FieldValue::Target(target)) => {
            let wire = match target {
                Target::Left => "kiri",
                Target::Right => "kanan",
                Target::Both => "keduanya",
            };
            vec![pair("target", wire.to_string())]
        }
        (field, FieldValue::Color(color)) => {
            let suffix = match field {
                Field::Color(slot) if slot.get() > 1 => slot.get().to_string(),
                _ => String::new(),
            };
            vec![
                (format!("r{suffix}"), color.r.to_string()),
                (format!("g{suffix}"), color.g.to_string()),
                (format!("b{suffix}"), color.b.to_string()),
            ]
        }
    }
}

/// Decodes a form body produced by [`form_fields`] back into a field update.
/// Used by fake firmware in tests and by tooling that replays captures.
pub fn parse_form_fields(pairs: &[(String, String)]) -> Option<(Field, FieldValue)> {
    let get = |key: &str| {
        pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    };
    let number = |key: &str| get(key).and_then(|raw| raw.parse::<u8>().ok());

    if let Some(mode) = number("mode") {
        return Some((Field::Mode, FieldValue::Mode(mode)));
    }
    if let Some(speed) = number("speed") {
        return Some((Field::Speed, FieldValue::Speed(speed)));
    }
    if let Some(level) = number("brightness") {
        return Some((Field::Brightness, FieldValue::Brightness(level)));
    }
    if let Some(target) = get("target") {
        return target
            .parse::<Target>()
            .ok()
            .map(|target| (Field::Target, FieldValue::Target(target)));
    }
    for slot in 1..=ColorSlot::MAX {
        let suffix = if slot == 1 { String::new() } else { slot.to_string() };
        let channel = |name: &str| number(&format!("{name}{suffix}"));
        if let (Some(r), Some(g), Some(b)) = (channel("r"), channel("g"), channel("b")) {
            let slot = ColorSlot::new(slot)?;
            return Some((Field::Color(slot), FieldValue::Color(Rgb::new(r, g, b))));
        }
    }
    None
}
