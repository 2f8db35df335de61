use super::catalog;
use super::{ColorSlot, Field, FieldValue, Rgb, Target, ZoneId, ZoneKind};
use crate::error::SyncError;

/// Upper bound for percent-scaled sliders (speed, brightness).
pub const PERCENT_MAX: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideState {
    pub mode: u8,
    /// All three slots are kept even when the mode shows fewer, so switching
    /// modes back and forth does not lose colors.
    pub colors: [Rgb; 3],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightZone {
    pub left: SideState,
    pub right: SideState,
    pub brightness: u8,
    pub speed: u8,
    pub target: Target,
    pub led_count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorZone {
    pub mode: u8,
    pub speed: u8,
    pub color: Rgb,
    pub led_count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Zone {
    Light(LightZone),
    Indicator(IndicatorZone),
}

/// Whatever a single field write displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prior {
    Single(FieldValue),
    /// Side-scoped fields remember both sides regardless of the target.
    Sided { left: FieldValue, right: FieldValue },
}

pub fn supports(kind: ZoneKind, field: Field) -> bool {
    match (kind, field) {
        (ZoneKind::Light, _) => true,
        (ZoneKind::Indicator, Field::Mode | Field::Speed) => true,
        (ZoneKind::Indicator, Field::Color(slot)) => slot == ColorSlot::FIRST,
        (ZoneKind::Indicator, Field::Brightness | Field::Target) => false,
    }
}

/// Rejects mutations no zone of this kind could hold.
pub fn validate(zone: ZoneId, field: Field, value: &FieldValue) -> Result<(), SyncError> {
    let kind = zone.kind();
    if !supports(kind, field) {
        return Err(SyncError::UnsupportedField { zone, field });
    }
    if !value.fits(field) {
        return Err(SyncError::InvalidValue {
            field,
            reason: format!("{value:?} is not a {field} value"),
        });
    }
    match *value {
        FieldValue::Mode(mode) if !catalog::mode_exists(kind, mode) => Err(SyncError::InvalidValue {
            field,
            reason: format!("mode {mode} is not defined for {zone}"),
        }),
        FieldValue::Speed(level) | FieldValue::Brightness(level) if level > PERCENT_MAX => {
            Err(SyncError::InvalidValue {
                field,
                reason: format!("{level} exceeds {PERCENT_MAX}"),
            })
        }
        _ => Ok(()),
    }
}

fn side_value(side: &SideState, field: Field) -> Option<FieldValue> {
    match field {
        Field::Mode => Some(FieldValue::Mode(side.mode)),
        Field::Color(slot) => Some(FieldValue::Color(side.colors[slot.index()])),
        _ => None,
    }
}

fn side_write(side: &mut SideState, field: Field, value: FieldValue) {
    match (field, value) {
        (Field::Mode, FieldValue::Mode(mode)) => side.mode = mode,
        (Field::Color(slot), FieldValue::Color(rgb)) => side.colors[slot.index()] = rgb,
        _ => {}
    }
}

impl LightZone {
    /// The side the UI shows: left unless only the right side is targeted.
    pub fn displayed(&self) -> &SideState {
        if self.target == Target::Right {
            &self.right
        } else {
            &self.left
        }
    }

    fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Mode => FieldValue::Mode(self.displayed().mode),
            Field::Color(slot) => FieldValue::Color(self.displayed().colors[slot.index()]),
            Field::Speed => FieldValue::Speed(self.speed),
            Field::Brightness => FieldValue::Brightness(self.brightness),
            Field::Target => FieldValue::Target(self.target),
        }
    }

    fn capture(&self, field: Field) -> Option<Prior> {
        match field {
            Field::Mode | Field::Color(_) => Some(Prior::Sided {
                left: side_value(&self.left, field)?,
                right: side_value(&self.right, field)?,
            }),
            _ => Some(Prior::Single(self.get(field))),
        }
    }

    fn assign(&mut self, value: FieldValue) {
        match value {
            FieldValue::Speed(speed) => self.speed = speed,
            FieldValue::Brightness(level) => self.brightness = level,
            FieldValue::Target(target) => self.target = target,
            FieldValue::Mode(_) | FieldValue::Color(_) => {}
        }
    }

    fn write(&mut self, field: Field, value: FieldValue) -> Prior {
        let prior = self
            .capture(field)
            .unwrap_or(Prior::Single(self.get(field)));
        match field {
            Field::Mode | Field::Color(_) => {
                if self.target.covers_left() {
                    side_write(&mut self.left, field, value);
                }
                if self.target.covers_right() {
                    side_write(&mut self.right, field, value);
                }
            }
            Field::Speed | Field::Brightness | Field::Target => self.assign(value),
        }
        prior
    }

    fn restore(&mut self, field: Field, prior: Prior) {
        match prior {
            Prior::Sided { left, right } => {
                side_write(&mut self.left, field, left);
                side_write(&mut self.right, field, right);
            }
            Prior::Single(value) => self.assign(value),
        }
    }
}

impl IndicatorZone {
    fn get(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Mode => Some(FieldValue::Mode(self.mode)),
            Field::Speed => Some(FieldValue::Speed(self.speed)),
            Field::Color(slot) if slot == ColorSlot::FIRST => Some(FieldValue::Color(self.color)),
            _ => None,
        }
    }

    fn assign(&mut self, value: FieldValue) {
        match value {
            FieldValue::Mode(mode) => self.mode = mode,
            FieldValue::Speed(speed) => self.speed = speed,
            FieldValue::Color(rgb) => self.color = rgb,
            FieldValue::Brightness(_) | FieldValue::Target(_) => {}
        }
    }
}

impl Zone {
    pub fn kind(&self) -> ZoneKind {
        match self {
            Zone::Light(_) => ZoneKind::Light,
            Zone::Indicator(_) => ZoneKind::Indicator,
        }
    }

    pub fn supports(&self, field: Field) -> bool {
        supports(self.kind(), field)
    }

    /// Current value of `field`, or `None` when this zone has no such field.
    pub fn get(&self, field: Field) -> Option<FieldValue> {
        match self {
            Zone::Light(light) => Some(light.get(field)),
            Zone::Indicator(indicator) => indicator.get(field),
        }
    }

    pub fn mode(&self) -> u8 {
        match self {
            Zone::Light(light) => light.displayed().mode,
            Zone::Indicator(indicator) => indicator.mode,
        }
    }

    pub fn led_count(&self) -> u16 {
        match self {
            Zone::Light(light) => light.led_count,
            Zone::Indicator(indicator) => indicator.led_count,
        }
    }

    /// Colors the current mode actually displays.
    pub fn active_colors(&self) -> &[Rgb] {
        match self {
            Zone::Light(light) => {
                let side = light.displayed();
                let slots = catalog::color_slots(ZoneKind::Light, side.mode);
                &side.colors[..slots]
            }
            Zone::Indicator(indicator) => std::slice::from_ref(&indicator.color),
        }
    }

    pub(crate) fn capture(&self, field: Field) -> Option<Prior> {
        match self {
            Zone::Light(light) => light.capture(field),
            Zone::Indicator(indicator) => indicator.get(field).map(Prior::Single),
        }
    }

    /// Assigns `value` and returns what it displaced. `None` means the write
    /// did not fit this zone and nothing changed.
    pub(crate) fn write(&mut self, field: Field, value: FieldValue) -> Option<Prior> {
        if !self.supports(field) || !value.fits(field) {
            return None;
        }
        match self {
            Zone::Light(light) => Some(light.write(field, value)),
            Zone::Indicator(indicator) => {
                let prior = indicator.get(field).map(Prior::Single)?;
                indicator.assign(value);
                Some(prior)
            }
        }
    }

    pub(crate) fn restore(&mut self, field: Field, prior: Prior) {
        match (self, prior) {
            (Zone::Light(light), prior) => light.restore(field, prior),
            (Zone::Indicator(indicator), Prior::Single(value)) => indicator.assign(value),
            (Zone::Indicator(_), Prior::Sided { .. }) => {}
        }
    }

    /// Carries over color slots the incoming mode does not display, so a
    /// refresh never erases colors remembered for other modes.
    pub(crate) fn retain_hidden_colors(&mut self, local: &Zone) {
        let (Zone::Light(incoming), Zone::Light(local)) = (self, local) else {
            return;
        };
        for (side, kept) in [
            (&mut incoming.left, &local.left),
            (&mut incoming.right, &local.right),
        ] {
            let shown = catalog::color_slots(ZoneKind::Light, side.mode);
            for slot in shown..side.colors.len() {
                side.colors[slot] = kept.colors[slot];
            }
        }
    }
}
