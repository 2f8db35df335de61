use crate::model::ZoneId;

/// Zones that mirror each other's mutations while sync mode is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroup {
    members: Vec<ZoneId>,
    enabled: bool,
}

impl SyncGroup {
    pub const DEFAULT_MEMBERS: [ZoneId; 3] = [ZoneId::Alis, ZoneId::Shroud, ZoneId::Demon];

    /// Indicator zones are never syncable and are dropped from `members`.
    pub fn new(members: impl IntoIterator<Item = ZoneId>) -> Self {
        let mut unique = Vec::new();
        for zone in members {
            if zone.is_side_capable() && !unique.contains(&zone) {
                unique.push(zone);
            }
        }
        Self {
            members: unique,
            enabled: false,
        }
    }

    pub fn members(&self) -> &[ZoneId] {
        &self.members
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        self.members.contains(&zone)
    }

    pub fn expand_targets(&self, zone: ZoneId) -> Vec<ZoneId> {
        if self.enabled && self.contains(zone) {
            self.members.clone()
        } else {
            vec![zone]
        }
    }
}

impl Default for SyncGroup {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MEMBERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_only_when_enabled() {
        let mut group = SyncGroup::default();
        assert_eq!(group.expand_targets(ZoneId::Shroud), vec![ZoneId::Shroud]);

        group.set_enabled(true);
        assert_eq!(
            group.expand_targets(ZoneId::Demon),
            vec![ZoneId::Alis, ZoneId::Shroud, ZoneId::Demon]
        );
    }

    #[test]
    fn indicator_never_fans_out() {
        let mut group = SyncGroup::new([ZoneId::Sein, ZoneId::Demon, ZoneId::Alis, ZoneId::Demon]);
        group.set_enabled(true);
        assert_eq!(group.members(), &[ZoneId::Demon, ZoneId::Alis]);
        assert_eq!(group.expand_targets(ZoneId::Sein), vec![ZoneId::Sein]);
    }
}
