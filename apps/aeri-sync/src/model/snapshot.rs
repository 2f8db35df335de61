use thiserror::Error;

use super::zone::{IndicatorZone, LightZone, SideState, Zone};
use super::{Rgb, Target, ZoneId, ZoneKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot is missing zone {0}")]
    MissingZone(ZoneId),
    #[error("zone {0} given more than once")]
    DuplicateZone(ZoneId),
    #[error("zone {zone} expects {expected:?} state")]
    KindMismatch { zone: ZoneId, expected: ZoneKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WelcomeConfig {
    pub mode: u8,
    pub duration_secs: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetSlot {
    pub slot: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    pub welcome: WelcomeConfig,
    pub presets: Vec<PresetSlot>,
}

/// Full device state. Every zone is always present, so lookups cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    zones: [Zone; 4],
    pub global: GlobalSettings,
}

impl DeviceSnapshot {
    /// Builds a snapshot from decoded zones, refusing anything partial.
    pub fn from_zones(
        zones: impl IntoIterator<Item = (ZoneId, Zone)>,
        global: GlobalSettings,
    ) -> Result<Self, SnapshotError> {
        let mut slots: [Option<Zone>; 4] = Default::default();
        for (id, zone) in zones {
            if zone.kind() != id.kind() {
                return Err(SnapshotError::KindMismatch {
                    zone: id,
                    expected: id.kind(),
                });
            }
            let slot = &mut slots[id.index()];
            if slot.is_some() {
                return Err(SnapshotError::DuplicateZone(id));
            }
            *slot = Some(zone);
        }
        let [alis, shroud, demon, sein] = slots;
        let take = |zone: Option<Zone>, id: ZoneId| zone.ok_or(SnapshotError::MissingZone(id));
        Ok(Self {
            zones: [
                take(alis, ZoneId::Alis)?,
                take(shroud, ZoneId::Shroud)?,
                take(demon, ZoneId::Demon)?,
                take(sein, ZoneId::Sein)?,
            ],
            global,
        })
    }

    pub fn zone(&self, id: ZoneId) -> &Zone {
        &self.zones[id.index()]
    }

    pub(crate) fn zone_mut(&mut self, id: ZoneId) -> &mut Zone {
        &mut self.zones[id.index()]
    }

    pub fn zones(&self) -> impl Iterator<Item = (ZoneId, &Zone)> {
        ZoneId::ALL.into_iter().zip(self.zones.iter())
    }
}

fn side(mode: u8, colors: [Rgb; 3]) -> SideState {
    SideState { mode, colors }
}

fn light(left: SideState, led_count: u16) -> Zone {
    Zone::Light(LightZone {
        left,
        right: default_side(),
        brightness: 85,
        speed: 60,
        target: Target::Both,
        led_count,
    })
}

fn default_side() -> SideState {
    side(
        1,
        [Rgb::new(230, 0, 35), Rgb::new(0, 246, 255), Rgb::new(0, 255, 0)],
    )
}

impl Default for DeviceSnapshot {
    /// The controller's demo state, shown before the first successful sync.
    fn default() -> Self {
        Self {
            zones: [
                light(default_side(), 50),
                light(
                    side(
                        5,
                        [Rgb::new(191, 193, 194), Rgb::new(230, 0, 35), Rgb::new(0, 255, 0)],
                    ),
                    40,
                ),
                light(side(0, [Rgb::new(230, 0, 35), Rgb::BLACK, Rgb::BLACK]), 1),
                Zone::Indicator(IndicatorZone {
                    mode: 0,
                    speed: 50,
                    color: Rgb::new(255, 100, 0),
                    led_count: 50,
                }),
            ],
            global: GlobalSettings {
                welcome: WelcomeConfig {
                    mode: 2,
                    duration_secs: 5,
                },
                presets: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FieldValue};

    fn parts() -> Vec<(ZoneId, Zone)> {
        let snapshot = DeviceSnapshot::default();
        snapshot.zones().map(|(id, zone)| (id, zone.clone())).collect()
    }

    #[test]
    fn default_matches_demo_state() {
        let snapshot = DeviceSnapshot::default();
        assert_eq!(snapshot.zone(ZoneId::Shroud).mode(), 5);
        assert_eq!(snapshot.zone(ZoneId::Demon).led_count(), 1);
        assert_eq!(
            snapshot.zone(ZoneId::Alis).get(Field::Brightness),
            Some(FieldValue::Brightness(85))
        );
        assert_eq!(snapshot.zone(ZoneId::Sein).kind(), ZoneKind::Indicator);
        assert_eq!(snapshot.global.welcome.mode, 2);
    }

    #[test]
    fn partial_snapshots_are_refused() {
        let global = DeviceSnapshot::default().global;
        let mut zones = parts();
        zones.pop();
        assert_eq!(
            DeviceSnapshot::from_zones(zones, global.clone()),
            Err(SnapshotError::MissingZone(ZoneId::Sein))
        );

        let mut zones = parts();
        let alis = zones[0].1.clone();
        zones[3].1 = alis;
        assert!(matches!(
            DeviceSnapshot::from_zones(zones, global.clone()),
            Err(SnapshotError::KindMismatch { zone: ZoneId::Sein, .. })
        ));

        let rebuilt = DeviceSnapshot::from_zones(parts(), global).unwrap();
        assert_eq!(rebuilt, DeviceSnapshot::default());
    }
}
