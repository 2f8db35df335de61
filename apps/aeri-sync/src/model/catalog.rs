//! Static effect tables published by the firmware.

use super::ZoneKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectMode {
    pub name: &'static str,
    pub value: u8,
    /// How many color slots the effect reads; extra slots are ignored.
    pub color_slots: u8,
    pub has_speed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedMode {
    pub name: &'static str,
    pub value: u8,
}

const fn effect(name: &'static str, value: u8, color_slots: u8, has_speed: bool) -> EffectMode {
    EffectMode {
        name,
        value,
        color_slots,
        has_speed,
    }
}

const fn named(name: &'static str, value: u8) -> NamedMode {
    NamedMode { name, value }
}

pub const EFFECT_MODES: &[EffectMode] = &[
    effect("Solid", 0, 1, false),
    effect("Breathing", 1, 1, true),
    effect("Rainbow", 2, 0, true),
    effect("Comet", 3, 1, true),
    effect("Cylon Scanner", 4, 1, true),
    effect("Twinkle", 5, 2, true),
    effect("Fire", 6, 0, true),
    effect("Gradient Shift", 7, 3, true),
    effect("Plasma Ball", 8, 2, true),
    effect("Theater Chase", 9, 1, true),
    effect("Color Wipe", 10, 2, true),
    effect("Pride", 11, 0, true),
    effect("Pacifica", 12, 0, false),
    effect("Bouncing Balls", 13, 3, true),
    effect("Meteor", 14, 1, true),
    effect("Confetti", 15, 0, true),
    effect("Juggle", 16, 0, true),
    effect("Sinelon", 17, 1, true),
    effect("Noise", 18, 0, true),
    effect("Matrix", 19, 0, true),
    effect("Ripple", 20, 1, true),
    effect("Larson Scanner", 21, 1, true),
    effect("Two-Color Wipe", 22, 2, true),
    effect("Lightning", 23, 0, true),
];

pub const INDICATOR_MODES: &[NamedMode] = &[
    named("Sequential", 0),
    named("Pulsing Arrow", 1),
    named("Fill & Flush", 2),
    named("Comet Trail", 3),
];

pub const WELCOME_MODES: &[NamedMode] = &[
    named("Power-On Scan", 0),
    named("Ignition Burst", 1),
    named("Spectrum Resolve", 2),
    named("Theater Chase", 3),
    named("Dual Comet", 4),
    named("Center Fill", 5),
    named("Charging", 6),
    named("Glitch", 7),
    named("Sonar", 8),
    named("Burning", 9),
    named("Warp Speed", 10),
    named("DNA", 11),
    named("Laser", 12),
    named("Heartbeat", 13),
    named("Liquid", 14),
    named("Spotlights", 15),
];

pub fn effect_mode(value: u8) -> Option<&'static EffectMode> {
    EFFECT_MODES.iter().find(|mode| mode.value == value)
}

pub fn mode_exists(kind: ZoneKind, value: u8) -> bool {
    match kind {
        ZoneKind::Light => effect_mode(value).is_some(),
        ZoneKind::Indicator => INDICATOR_MODES.iter().any(|mode| mode.value == value),
    }
}

pub fn welcome_mode_exists(value: u8) -> bool {
    WELCOME_MODES.iter().any(|mode| mode.value == value)
}

/// Number of color slots the given mode displays. Indicator zones always
/// show their single color; unknown light modes show none.
pub fn color_slots(kind: ZoneKind, mode: u8) -> usize {
    match kind {
        ZoneKind::Light => effect_mode(mode).map_or(0, |m| usize::from(m.color_slots)),
        ZoneKind::Indicator => 1,
    }
}
