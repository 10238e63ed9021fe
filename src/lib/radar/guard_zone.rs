use serde::{Deserialize, Serialize};

use super::history::PixelSource;
use super::target::kalman::Polar;
use super::target::{Arpa, Doppler, SCAN_MARGIN2_MS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardZoneType {
    #[default]
    Off,
    Arc,
    Circle,
}

///
/// Persisted definition of a guard zone. Bearings are in degrees relative
/// to the heading, ranges in meters.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardZoneSettings {
    pub zone_type: GuardZoneType,
    pub start_bearing: f64,
    pub end_bearing: f64,
    pub inner_range: u32,
    pub outer_range: u32,
    /// Acquire new ARPA targets found in this zone
    pub arpa_on: bool,
}

impl Default for GuardZoneSettings {
    fn default() -> Self {
        GuardZoneSettings {
            zone_type: GuardZoneType::Off,
            start_bearing: 0.,
            end_bearing: 0.,
            inner_range: 0,
            outer_range: 1852,
            arpa_on: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardZone {
    settings: GuardZoneSettings,
    spokes: i32,
    start_angle: i32,
    end_angle: i32,
    in_zone: bool,
    last_angle: Option<i32>,
    running_count: u32,
    bogey_count: Option<u32>,
    // debug: rotate an arc by this many spokes after each traversal
    rotate: i32,
    arpa_update_time: Vec<u64>,
}

impl GuardZone {
    pub fn new(spokes: usize, settings: GuardZoneSettings, rotate: i32) -> Self {
        let mut zone = GuardZone {
            settings: GuardZoneSettings::default(),
            spokes: spokes as i32,
            start_angle: 0,
            end_angle: 0,
            in_zone: false,
            last_angle: None,
            running_count: 0,
            bogey_count: None,
            rotate,
            arpa_update_time: vec![0; spokes],
        };
        zone.set_type(settings.zone_type);
        zone.set_bearings(settings.start_bearing, settings.end_bearing);
        zone.set_ranges(settings.inner_range, settings.outer_range);
        zone.settings.arpa_on = settings.arpa_on;
        zone
    }

    pub fn settings(&self) -> &GuardZoneSettings {
        &self.settings
    }

    pub fn set_type(&mut self, zone_type: GuardZoneType) {
        self.settings.zone_type = zone_type;
        self.reset_bogeys();
    }

    pub fn set_bearings(&mut self, start_bearing: f64, end_bearing: f64) {
        self.settings.start_bearing = start_bearing;
        self.settings.end_bearing = end_bearing;
        self.start_angle = self.to_spokes(start_bearing);
        self.end_angle = self.to_spokes(end_bearing);
        self.reset_bogeys();
    }

    pub fn set_ranges(&mut self, inner_range: u32, outer_range: u32) {
        self.settings.inner_range = inner_range;
        self.settings.outer_range = outer_range;
        self.reset_bogeys();
    }

    pub fn set_arpa(&mut self, arpa_on: bool) {
        self.settings.arpa_on = arpa_on;
    }

    pub fn reset_bogeys(&mut self) {
        self.bogey_count = None;
        self.running_count = 0;
        self.in_zone = false;
        self.last_angle = None;
    }

    /// Pixels counted in the last complete pass through the zone,
    /// `None` when the zone is off or not yet passed.
    pub fn bogey_count(&self) -> Option<u32> {
        match self.settings.zone_type {
            GuardZoneType::Off => None,
            _ => self.bogey_count,
        }
    }

    fn to_spokes(&self, bearing: f64) -> i32 {
        ((bearing * self.spokes as f64 / 360.).round() as i32).rem_euclid(self.spokes)
    }

    fn in_arc(&self, angle: i32) -> bool {
        Polar::new(angle, 0, 0).angle_is_between(self.start_angle, self.end_angle, self.spokes)
    }

    ///
    /// Count the pixels of one spoke that are at or above `threshold`.
    /// `angle` is relative to the heading.
    ///
    pub fn process_spoke(&mut self, angle: i32, data: &[u8], pixels_per_meter: f64, threshold: u8) {
        let angle = angle.rem_euclid(self.spokes);
        let in_zone = match self.settings.zone_type {
            GuardZoneType::Off => return,
            GuardZoneType::Circle => {
                if self.last_angle.is_some_and(|last| angle <= last) {
                    self.complete_traversal();
                }
                self.last_angle = Some(angle);
                true
            }
            GuardZoneType::Arc => {
                let in_zone = self.in_arc(angle);
                if self.in_zone && !in_zone {
                    self.complete_traversal();
                    if self.rotate != 0 {
                        self.start_angle = (self.start_angle + self.rotate).rem_euclid(self.spokes);
                        self.end_angle = (self.end_angle + self.rotate).rem_euclid(self.spokes);
                    }
                }
                self.in_zone = in_zone;
                in_zone
            }
        };
        if !in_zone {
            return;
        }

        let range_start = (self.settings.inner_range as f64 * pixels_per_meter) as usize;
        let range_end = ((self.settings.outer_range as f64 * pixels_per_meter) as usize)
            .min(data.len().saturating_sub(1));
        if range_start > range_end || data.is_empty() {
            return;
        }
        self.running_count += data[range_start..=range_end]
            .iter()
            .filter(|v| **v >= threshold)
            .count() as u32;
    }

    fn complete_traversal(&mut self) {
        log::trace!("Guard zone traversal complete, bogeys={}", self.running_count);
        self.bogey_count = Some(self.running_count);
        self.running_count = 0;
    }

    ///
    /// Look for new targets in the zone and acquire them.
    /// Each bearing is scanned once per rotation, after the beam has passed it.
    /// `heading` is the heading in spokes, zone bearings are relative to it.
    ///
    pub fn search_targets(&mut self, arpa: &mut Arpa, heading: i32) {
        if !self.settings.arpa_on || self.settings.zone_type == GuardZoneType::Off {
            return;
        }
        let setup = arpa.setup().clone();
        if setup.pixels_per_meter == 0. {
            return;
        }
        let (start_angle, end_angle) = match self.settings.zone_type {
            GuardZoneType::Arc if self.end_angle < self.start_angle => {
                (self.start_angle, self.end_angle + self.spokes)
            }
            GuardZoneType::Arc => (self.start_angle, self.end_angle),
            _ => (0, self.spokes),
        };
        // the other radar covers the near range
        let range_start = ((self.settings.inner_range as f64 * setup.pixels_per_meter) as i32)
            .max(arpa.guard_zone_start());
        let range_end =
            ((self.settings.outer_range as f64 * setup.pixels_per_meter) as i32).min(setup.spoke_len);
        let margin = 3 * setup.scan_margin();

        // +2 as a target must be wider than 2 pixels
        for angle in (start_angle..end_angle).step_by(2) {
            let relative = angle.rem_euclid(self.spokes);
            let bearing = setup.mod_spokes(angle + heading);
            let angle_time = arpa.history().spoke_time(bearing);
            let passed_time = arpa.history().spoke_time(bearing + margin);
            if angle_time <= self.arpa_update_time[relative as usize] + SCAN_MARGIN2_MS
                || passed_time < angle_time
            {
                continue;
            }
            self.arpa_update_time[relative as usize] = angle_time;

            for r in range_start..range_end {
                if arpa.multi_pix(bearing, r, Doppler::Any) {
                    if arpa.is_full() {
                        return;
                    }
                    arpa.acquire_new_arpa_target(Polar::new(bearing, r, 0), Doppler::Any);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::history::HistoryPixel;
    use crate::radar::target::tests::{arpa, sweep, SPOKES};

    fn spoke(qualifying: bool) -> Vec<u8> {
        let mut data = vec![10u8; 512];
        if qualifying {
            data[2] = 60;
            data[3] = 60;
        }
        data
    }

    #[test]
    fn circle_counts_one_sweep() {
        let settings = GuardZoneSettings {
            zone_type: GuardZoneType::Circle,
            inner_range: 0,
            outer_range: 500,
            ..Default::default()
        };
        let mut zone = GuardZone::new(SPOKES, settings, 0);
        for angle in 0..SPOKES as i32 {
            zone.process_spoke(angle, &spoke(angle % 100 == 0 && angle < 2000), 1.0, 50);
        }
        // not yet wrapped
        assert_eq!(zone.bogey_count(), None);
        zone.process_spoke(0, &spoke(false), 1.0, 50);
        assert_eq!(zone.bogey_count(), Some(40));
    }

    #[test]
    fn only_pixels_in_range_count() {
        let settings = GuardZoneSettings {
            zone_type: GuardZoneType::Circle,
            inner_range: 100,
            outer_range: 200,
            ..Default::default()
        };
        let mut zone = GuardZone::new(SPOKES, settings, 0);
        let mut data = vec![0u8; 512];
        data[99] = 60;
        data[100] = 60;
        data[150] = 60;
        data[200] = 60;
        data[201] = 60;
        zone.process_spoke(5, &data, 1.0, 50);
        zone.process_spoke(6, &data, 0.5, 50);
        zone.process_spoke(0, &[], 1.0, 50);
        // at 0.5 pixels per meter the zone is pixels 50..=100
        assert_eq!(zone.bogey_count(), Some(3 + 2));
    }

    #[test]
    fn arc_latches_when_leaving() {
        let settings = GuardZoneSettings {
            zone_type: GuardZoneType::Arc,
            start_bearing: 0.,
            end_bearing: 360. * 20. / SPOKES as f64,
            outer_range: 500,
            ..Default::default()
        };
        let mut zone = GuardZone::new(SPOKES, settings, 0);
        for angle in 0..30 {
            zone.process_spoke(angle, &spoke(true), 1.0, 50);
            if angle < 20 {
                assert_eq!(zone.bogey_count(), None);
            }
        }
        assert_eq!(zone.bogey_count(), Some(40));

        zone.set_ranges(0, 1000);
        assert_eq!(zone.bogey_count(), None);
    }

    #[test]
    fn arc_across_north() {
        let settings = GuardZoneSettings {
            zone_type: GuardZoneType::Arc,
            start_bearing: 350.,
            end_bearing: 10.,
            outer_range: 500,
            ..Default::default()
        };
        let mut zone = GuardZone::new(360, settings, 0);
        for angle in 340..380 {
            zone.process_spoke(angle, &spoke(true), 1.0, 50);
        }
        assert_eq!(zone.bogey_count(), Some(2 * 20));
    }

    #[test]
    fn debug_rotation_moves_arc() {
        let settings = GuardZoneSettings {
            zone_type: GuardZoneType::Arc,
            start_bearing: 10.,
            end_bearing: 20.,
            outer_range: 500,
            ..Default::default()
        };
        let mut zone = GuardZone::new(360, settings, 5);
        for angle in 0..=20 {
            zone.process_spoke(angle, &spoke(true), 1.0, 50);
        }
        assert_eq!(zone.bogey_count(), Some(20));
        assert_eq!((zone.start_angle, zone.end_angle), (15, 25));
    }

    #[test]
    fn off_zone_counts_nothing() {
        let mut zone = GuardZone::new(SPOKES, GuardZoneSettings::default(), 0);
        for angle in 0..SPOKES as i32 * 2 {
            zone.process_spoke(angle, &spoke(true), 1.0, 50);
        }
        assert_eq!(zone.bogey_count(), None);
    }

    #[test]
    fn search_acquires_targets_in_zone() {
        let mut arpa = arpa(1);
        sweep(&mut arpa, 0, &[(300, 400), (1024, 400)], HistoryPixel::INITIAL);
        let settings = GuardZoneSettings {
            zone_type: GuardZoneType::Arc,
            start_bearing: 0.,
            end_bearing: 90.,
            inner_range: 100,
            outer_range: 800,
            arpa_on: true,
        };
        let mut zone = GuardZone::new(SPOKES, settings, 0);
        zone.search_targets(&mut arpa, 0);
        let live: Vec<_> = arpa.targets().iter().filter(|t| t.status().is_alive()).collect();
        assert_eq!(live.len(), 1);
        assert!(live[0].is_automatic());

        // with the heading at 180 degrees the zone covers the other blob
        let mut zone = GuardZone::new(SPOKES, zone.settings().clone(), 0);
        zone.search_targets(&mut arpa, 1024 - 300);
        let live = arpa.targets().iter().filter(|t| t.status().is_alive()).count();
        assert_eq!(live, 2);

        zone.set_arpa(false);
        arpa.delete_all_targets();
        let mut zone = GuardZone::new(SPOKES, zone.settings().clone(), 0);
        zone.search_targets(&mut arpa, 0);
        assert!(arpa.targets().is_empty());
    }
}
