//! Strongly typed device state: zones, fields and the values they carry.

pub mod catalog;
pub mod snapshot;
pub mod zone;

use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

pub use snapshot::{DeviceSnapshot, GlobalSettings, PresetSlot, SnapshotError, WelcomeConfig};
pub use zone::{IndicatorZone, LightZone, Prior, SideState, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZoneId {
    Alis,
    Shroud,
    Demon,
    Sein,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    /// Left/right capable light group with up to three color slots.
    Light,
    /// Single-sided turn indicator.
    Indicator,
}

impl ZoneId {
    pub const ALL: [ZoneId; 4] = [ZoneId::Alis, ZoneId::Shroud, ZoneId::Demon, ZoneId::Sein];

    pub fn as_str(self) -> &'static str {
        match self {
            ZoneId::Alis => "alis",
            ZoneId::Shroud => "shroud",
            ZoneId::Demon => "demon",
            ZoneId::Sein => "sein",
        }
    }

    pub fn kind(self) -> ZoneKind {
        match self {
            ZoneId::Sein => ZoneKind::Indicator,
            ZoneId::Alis | ZoneId::Shroud | ZoneId::Demon => ZoneKind::Light,
        }
    }

    pub fn is_side_capable(self) -> bool {
        self.kind() == ZoneKind::Light
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ZoneId::Alis => 0,
            ZoneId::Shroud => 1,
            ZoneId::Demon => 2,
            ZoneId::Sein => 3,
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ZoneId::ALL
            .into_iter()
            .find(|zone| zone.as_str() == s)
            .ok_or_else(|| SyncError::UnknownZone(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = String;

    /// Accepts `#RRGGBB`, `RRGGBB` or `r,g,b`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(',') {
            let parts: Vec<u8> = s
                .split(',')
                .map(|part| part.trim().parse::<u8>())
                .collect::<Result<_, _>>()
                .map_err(|err| format!("bad channel in `{s}`: {err}"))?;
            return match parts.as_slice() {
                [r, g, b] => Ok(Rgb::new(*r, *g, *b)),
                _ => Err(format!("expected three channels in `{s}`")),
            };
        }
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("expected #RRGGBB, got `{s}`"));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|err| format!("bad hex `{s}`: {err}"))
        };
        Ok(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// Which physical side of a light zone receives mode and color writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
    Left,
    Right,
    #[default]
    Both,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Left => "left",
            Target::Right => "right",
            Target::Both => "both",
        }
    }

    pub fn covers_left(self) -> bool {
        matches!(self, Target::Left | Target::Both)
    }

    pub fn covers_right(self) -> bool {
        matches!(self, Target::Right | Target::Both)
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" | "kiri" => Ok(Target::Left),
            "right" | "kanan" => Ok(Target::Right),
            "both" | "keduanya" => Ok(Target::Both),
            other => Err(format!("unknown target `{other}`")),
        }
    }
}

/// One of the (up to three) color slots of an effect, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorSlot(u8);

impl ColorSlot {
    pub const FIRST: ColorSlot = ColorSlot(1);
    pub const MAX: u8 = 3;

    pub fn new(slot: u8) -> Option<Self> {
        (1..=Self::MAX).contains(&slot).then_some(ColorSlot(slot))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Mode,
    Speed,
    Brightness,
    Color(ColorSlot),
    Target,
}

/// How quickly a mutation should leave the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Discrete actions: mode picks, target toggles, committed colors.
    Immediate,
    /// Continuous controls: wait for a quiet period after the last value.
    Debounced,
}

impl Field {
    /// Sliders debounce, everything else is a discrete action.
    pub fn default_delivery(self) -> Delivery {
        match self {
            Field::Speed | Field::Brightness => Delivery::Debounced,
            Field::Mode | Field::Color(_) | Field::Target => Delivery::Immediate,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Mode => f.write_str("mode"),
            Field::Speed => f.write_str("speed"),
            Field::Brightness => f.write_str("brightness"),
            Field::Color(slot) if *slot == ColorSlot::FIRST => f.write_str("color"),
            Field::Color(slot) => write!(f, "color{}", slot.get()),
            Field::Target => f.write_str("target"),
        }
    }
}

impl FromStr for Field {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mode" => Ok(Field::Mode),
            "speed" => Ok(Field::Speed),
            "brightness" => Ok(Field::Brightness),
            "target" => Ok(Field::Target),
            "color" | "color1" => Ok(Field::Color(ColorSlot::FIRST)),
            other => other
                .strip_prefix("color")
                .and_then(|slot| slot.parse::<u8>().ok())
                .and_then(ColorSlot::new)
                .map(Field::Color)
                .ok_or_else(|| SyncError::UnknownField(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Mode(u8),
    Speed(u8),
    Brightness(u8),
    Color(Rgb),
    Target(Target),
}

impl FieldValue {
    /// Whether this value is the right shape for `field`.
    pub fn fits(&self, field: Field) -> bool {
        matches!(
            (field, self),
            (Field::Mode, FieldValue::Mode(_))
                | (Field::Speed, FieldValue::Speed(_))
                | (Field::Brightness, FieldValue::Brightness(_))
                | (Field::Color(_), FieldValue::Color(_))
                | (Field::Target, FieldValue::Target(_))
        )
    }

    /// Parses a user supplied string into the value shape `field` expects.
    pub fn parse_for(field: Field, raw: &str) -> Result<Self, SyncError> {
        let invalid = |reason: String| SyncError::InvalidValue { field, reason };
        let number = || {
            raw.trim()
                .parse::<u8>()
                .map_err(|err| invalid(format!("`{raw}`: {err}")))
        };
        match field {
            Field::Mode => number().map(FieldValue::Mode),
            Field::Speed => number().map(FieldValue::Speed),
            Field::Brightness => number().map(FieldValue::Brightness),
            Field::Color(_) => raw.parse().map(FieldValue::Color).map_err(invalid),
            Field::Target => raw.parse().map(FieldValue::Target).map_err(invalid),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Mode(mode) => write!(f, "{mode}"),
            FieldValue::Speed(speed) => write!(f, "{speed}%"),
            FieldValue::Brightness(level) => write!(f, "{level}%"),
            FieldValue::Color(rgb) => write!(f, "{rgb}"),
            FieldValue::Target(target) => f.write_str(target.as_str()),
        }
    }
}

/// Coalescing key: one pending command per zone field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub zone: ZoneId,
    pub field: Field,
}

impl FieldKey {
    pub fn new(zone: ZoneId, field: Field) -> Self {
        Self { zone, field }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.zone, self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_ids_round_trip_through_their_keys() {
        for zone in ZoneId::ALL {
            assert_eq!(zone.as_str().parse::<ZoneId>().unwrap(), zone);
        }
        assert_eq!(
            "kitchen".parse::<ZoneId>(),
            Err(SyncError::UnknownZone("kitchen".into()))
        );
        assert!(!ZoneId::Sein.is_side_capable());
    }

    #[test]
    fn field_names_cover_color_slots() {
        assert_eq!("color".parse::<Field>().unwrap(), Field::Color(ColorSlot::FIRST));
        assert_eq!(
            "color3".parse::<Field>().unwrap(),
            Field::Color(ColorSlot::new(3).unwrap())
        );
        assert!(matches!("color4".parse::<Field>(), Err(SyncError::UnknownField(_))));
        assert!(matches!("hue".parse::<Field>(), Err(SyncError::UnknownField(_))));
        assert_eq!(Field::Color(ColorSlot::new(2).unwrap()).to_string(), "color2");
    }

    #[test]
    fn sliders_debounce_and_discrete_controls_do_not() {
        assert_eq!(Field::Brightness.default_delivery(), Delivery::Debounced);
        assert_eq!(Field::Speed.default_delivery(), Delivery::Debounced);
        assert_eq!(Field::Mode.default_delivery(), Delivery::Immediate);
        assert_eq!(Field::Target.default_delivery(), Delivery::Immediate);
    }

    #[test]
    fn parses_colors_in_both_notations() {
        assert_eq!("#E60023".parse::<Rgb>().unwrap(), Rgb::new(230, 0, 35));
        assert_eq!("230, 0, 35".parse::<Rgb>().unwrap(), Rgb::new(230, 0, 35));
        assert!("#E600".parse::<Rgb>().is_err());
        assert!("1,2".parse::<Rgb>().is_err());
        assert_eq!(Rgb::new(0, 246, 255).to_hex(), "#00F6FF");
    }

    #[test]
    fn parse_for_respects_field_shape() {
        assert_eq!(
            FieldValue::parse_for(Field::Brightness, "95").unwrap(),
            FieldValue::Brightness(95)
        );
        assert_eq!(
            FieldValue::parse_for(Field::Target, "kanan").unwrap(),
            FieldValue::Target(Target::Right)
        );
        assert!(matches!(
            FieldValue::parse_for(Field::Speed, "fast"),
            Err(SyncError::InvalidValue { field: Field::Speed, .. })
        ));
        assert!(FieldValue::Mode(3).fits(Field::Mode));
        assert!(!FieldValue::Mode(3).fits(Field::Speed));
    }
}
