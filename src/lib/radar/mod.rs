use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod guard_zone;
pub mod history;
pub mod target;

use crate::config::Config;
use guard_zone::GuardZone;
use history::{Legend, PixelSource};
use target::message::{DynamicTargetData, IncomingTarget, TargetMessage, TargetSource};
use target::{Arpa, ExtendedPosition};

pub const NAUTICAL_MILE_F64: f64 = 1852.; // 1 nautical mile in meters

#[derive(Error, Debug)]
pub enum RadarError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot decode target data: {0}")]
    Decode(#[from] bincode::Error),
    #[error("Cannot find project directories")]
    NoProjectDirs,
    #[error("Spoke angle {0} out of range 0..{1}")]
    InvalidSpoke(usize, usize),
    #[error("Shutdown")]
    Shutdown,
}

/// A geographic position expressed in degrees latitude and longitude.
/// Latitude is positive in the northern hemisphere, negative in the southern.
/// Longitude is positive in the eastern hemisphere, negative in the western.
/// The range for latitude is -90 to 90, and for longitude is -180 to 180.
#[derive(Clone, Copy, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPosition {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPosition { lat, lon }
    }
}

impl fmt::Display for GeoPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// Navigation data of the own ship, as far as known.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct OwnShip {
    pub position: Option<GeoPosition>,
    pub heading_true: Option<f64>, // degrees
}

impl OwnShip {
    pub fn new(position: GeoPosition, heading_true: f64) -> Self {
        OwnShip {
            position: Some(position),
            heading_true: Some(heading_true),
        }
    }

    /// The position, if heading is known as well. Targets can only be
    /// tracked when both are.
    pub fn fix(&self) -> Option<GeoPosition> {
        self.heading_true.and(self.position)
    }

    fn heading_in_spokes(&self, spokes: usize) -> i32 {
        let heading = self.heading_true.unwrap_or(0.);
        ((heading * spokes as f64 / 360.).round() as i32).rem_euclid(spokes as i32)
    }
}

///
/// Everything that the receive task and the refresh task share.
/// Only reachable through `Radar::lock`, so holding a `&mut RadarState` is
/// the proof that the radar lock is held.
///
#[derive(Debug)]
pub struct RadarState {
    pub arpa: Arpa,
    pub guard_zones: Vec<GuardZone>,
    pub own_ship: OwnShip,
    legend: Legend,
    spokes: usize,
    last_angle: Option<usize>,
}

impl RadarState {
    pub fn legend(&self) -> &Legend {
        &self.legend
    }

    pub fn spokes(&self) -> usize {
        self.spokes
    }
}

#[derive(Clone, Debug)]
pub struct Radar {
    id: usize,
    state: Arc<Mutex<RadarState>>,
    remote_tx: Sender<IncomingTarget>,
    message_tx: Option<Sender<TargetMessage>>,
}

impl Radar {
    pub fn new(
        id: usize,
        spokes: usize,
        spoke_len: usize,
        pixel_values: u8,
        doppler: bool,
        config: &Config,
    ) -> Self {
        let legend = Legend::new(pixel_values, doppler).with_threshold(config.arpa.threshold);
        let arpa = Arpa::new(id, spokes, spoke_len, doppler, config.arpa.clone());
        let guard_zones = config
            .guard_zones
            .iter()
            .map(|gz| GuardZone::new(spokes, gz.clone(), config.arpa.guard_zone_rotate))
            .collect();
        let remote_tx = arpa.remote_target_sender();
        log::info!(
            "Radar {} with {} spokes of {} pixels, Doppler {}",
            id,
            spokes,
            spoke_len,
            doppler
        );

        Radar {
            id,
            state: Arc::new(Mutex::new(RadarState {
                arpa,
                guard_zones,
                own_ship: OwnShip::default(),
                legend,
                spokes,
                last_angle: None,
            })),
            remote_tx,
            message_tx: None,
        }
    }

    /// Send the target messages of every refresh to `tx` as well.
    pub fn with_messages(mut self, tx: Sender<TargetMessage>) -> Self {
        self.message_tx = Some(tx);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Lock the radar state. A poisoned lock is taken over, the state
    /// itself is always consistent between calls.
    pub fn lock(&self) -> MutexGuard<'_, RadarState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_own_ship(&self, own_ship: OwnShip) {
        self.lock().own_ship = own_ship;
    }

    ///
    /// Process one spoke. `angle` is the true bearing in spokes, `range`
    /// the range of the spoke in meters.
    ///
    /// Returns true when this spoke starts a new sweep.
    ///
    pub fn process_spoke(
        &self,
        angle: usize,
        data: &mut [u8],
        range: u32,
        time: u64,
    ) -> Result<bool, RadarError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if angle >= state.spokes {
            return Err(RadarError::InvalidSpoke(angle, state.spokes));
        }
        let pixels_per_meter = if range > 0 {
            data.len() as f64 / range as f64
        } else {
            0.
        };

        // guard zones first, before the contours are drawn into the spoke
        let relative = angle as i32 - state.own_ship.heading_in_spokes(state.spokes);
        for zone in state.guard_zones.iter_mut() {
            zone.process_spoke(relative, data, pixels_per_meter, state.legend.strong_return);
        }

        let pos = state.own_ship.position.unwrap_or_default();
        state
            .arpa
            .process_spoke(angle, data, range, time, pos, &state.legend);

        let new_sweep = state.last_angle.is_some_and(|last| angle < last);
        state.last_angle = Some(angle);
        Ok(new_sweep)
    }

    ///
    /// Once per sweep: search the guard zones and Doppler returns for new
    /// targets, then refresh all targets.
    ///
    pub fn refresh(&self) -> Vec<TargetMessage> {
        let messages = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let own_ship = state.own_ship;
            if own_ship.fix().is_some() {
                let heading = own_ship.heading_in_spokes(state.spokes);
                for zone in state.guard_zones.iter_mut() {
                    zone.search_targets(&mut state.arpa, heading);
                }
                state.arpa.search_doppler_targets(&own_ship);
            }
            state.arpa.refresh_all_arpa_targets(&own_ship)
        };

        if let Some(tx) = &self.message_tx {
            for message in messages.iter() {
                if tx.send(message.clone()).is_err() {
                    log::debug!("Radar {}: nobody listens to target messages", self.id);
                    break;
                }
            }
        }
        messages
    }

    /// Start tracking a target at a user supplied position.
    pub fn acquire_marpa_target(&self, pos: GeoPosition) -> Option<usize> {
        let mut state = self.lock();
        let own_pos = state.own_ship.fix()?;
        let position = ExtendedPosition::at(pos, 0);
        let pol = state.arpa.setup().pos2polar(&position, &own_pos);
        let time = state.arpa.history().spoke_time(pol.angle);
        state
            .arpa
            .acquire_new_marpa_target(ExtendedPosition::at(pos, time))
    }

    /// Delete the target nearest to `pos` at the next refresh.
    pub fn delete_target(&self, pos: GeoPosition) -> bool {
        self.lock().arpa.request_delete(pos)
    }

    pub fn delete_all_targets(&self) {
        self.lock().arpa.delete_all_targets();
    }

    /// Queue a target received from another vessel. Does not take the radar lock.
    pub fn receive_remote_target(&self, bytes: &[u8]) -> Result<(), RadarError> {
        let data = DynamicTargetData::from_bytes(bytes)?;
        self.remote_tx
            .send(IncomingTarget {
                data,
                source: TargetSource::OtherVessel,
            })
            .map_err(|_| RadarError::Shutdown)
    }

    /// Let two radars on the same vessel hand over targets.
    pub fn link(&self, other: &Radar) {
        let to_self = self.lock().arpa.link_to_self();
        let to_other = other.lock().arpa.link_to_self();
        self.lock().arpa.set_link(to_other);
        other.lock().arpa.set_link(to_self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArpaSettings;
    use crate::radar::guard_zone::{GuardZoneSettings, GuardZoneType};
    use crate::radar::target::message::ReportedStatus;
    use crate::radar::target::TargetStatus;

    const SPOKES: usize = 512;
    const SPOKE_LEN: usize = 256;
    const START: u64 = 1_700_000_000_000;

    fn config() -> Config {
        Config {
            arpa: ArpaSettings::default(),
            guard_zones: vec![GuardZoneSettings {
                zone_type: GuardZoneType::Circle,
                inner_range: 0,
                outer_range: 200,
                ..Default::default()
            }],
        }
    }

    fn radar() -> Radar {
        let radar = Radar::new(1, SPOKES, SPOKE_LEN, 16, false, &config());
        radar.set_own_ship(OwnShip::new(GeoPosition::new(52., 4.), 0.));
        radar
    }

    /// One rotation with a blob of 7 x 7 pixels at `blob`
    fn rotation(radar: &Radar, n: u64, blob: (usize, usize)) -> bool {
        let mut new_sweep = false;
        for angle in 0..SPOKES {
            let mut data = vec![0u8; SPOKE_LEN];
            if angle.abs_diff(blob.0) <= 3 {
                for v in data[blob.1 - 3..=blob.1 + 3].iter_mut() {
                    *v = 15;
                }
            }
            let time = START + n * 2500 + angle as u64 * 2500 / SPOKES as u64;
            new_sweep |= radar
                .process_spoke(angle, &mut data, SPOKE_LEN as u32, time)
                .unwrap();
        }
        new_sweep
    }

    #[test]
    fn spoke_out_of_range() {
        let radar = radar();
        let mut data = vec![0u8; SPOKE_LEN];
        assert!(matches!(
            radar.process_spoke(SPOKES, &mut data, 256, 0),
            Err(RadarError::InvalidSpoke(512, 512))
        ));
    }

    #[test]
    fn sweeps_are_detected() {
        let radar = radar();
        assert!(!rotation(&radar, 0, (100, 100)));
        assert!(rotation(&radar, 1, (100, 100)));
        let state = radar.lock();
        assert_eq!(state.arpa.setup().pixels_per_meter, 1.0);
        assert!(state.guard_zones[0].bogey_count().is_some_and(|b| b >= 49));
    }

    #[test]
    fn guard_zone_target_is_reported() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let radar = radar().with_messages(tx);
        let mut states = Vec::new();
        for n in 0..8 {
            rotation(&radar, n, (100, 100));
            for message in radar.refresh() {
                states.push(message.state);
            }
        }
        let state = radar.lock();
        let live: Vec<_> = state
            .arpa
            .targets()
            .iter()
            .filter(|t| t.status().is_alive())
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].status(), TargetStatus::Active);
        assert!(states.contains(&ReportedStatus::Q));
        assert_eq!(states.last(), Some(&ReportedStatus::T));
        assert_eq!(rx.try_iter().count(), states.len());
    }

    #[test]
    fn no_tracking_without_heading() {
        let radar = radar();
        radar.set_own_ship(OwnShip {
            position: Some(GeoPosition::new(52., 4.)),
            heading_true: None,
        });
        rotation(&radar, 0, (100, 100));
        assert!(radar.refresh().is_empty());
        assert!(radar.lock().arpa.targets().is_empty());
        assert_eq!(radar.acquire_marpa_target(GeoPosition::new(52.001, 4.)), None);
    }

    #[test]
    fn marpa_target_is_tracked() {
        // no guard zones, so nothing is acquired automatically
        let radar = Radar::new(1, SPOKES, SPOKE_LEN, 16, false, &Config::default());
        let own = GeoPosition::new(52., 4.);
        radar.set_own_ship(OwnShip::new(own, 0.));
        rotation(&radar, 0, (10, 100));
        let pos = radar
            .lock()
            .arpa
            .setup()
            .polar2pos(&target::kalman::Polar::new(10, 100, 0), &own)
            .pos;
        let id = radar.acquire_marpa_target(pos).unwrap();
        for n in 1..4 {
            rotation(&radar, n, (10, 100));
            radar.refresh();
        }
        let state = radar.lock();
        let target = state.arpa.target(id).unwrap();
        assert!(!target.is_automatic());
        assert!(target.status() >= TargetStatus::Acquiring(3));
        assert_eq!(state.arpa.targets().len(), 1);
    }

    #[test]
    fn remote_targets_are_queued() {
        let radar = radar();
        let source = radar.lock().arpa.targets().len();
        assert_eq!(source, 0);
        assert!(radar.receive_remote_target(&[1, 2, 3]).is_err());

        let data = DynamicTargetData {
            target_id: 700001,
            p: [[0.; 4]; 4],
            position: ExtendedPosition::at(GeoPosition::new(52.001, 4.), START),
            status: TargetStatus::Active,
            age_rotations: 10,
        };
        radar.receive_remote_target(&data.to_bytes().unwrap()).unwrap();
        radar.refresh();
        let state = radar.lock();
        let target = state.arpa.target(700001).unwrap();
        assert!(target.is_transferred());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let radar = radar();
        let clone = radar.clone();
        let result = std::thread::spawn(move || {
            let _guard = clone.lock();
            panic!("receive thread died");
        })
        .join();
        assert!(result.is_err());
        radar.set_own_ship(OwnShip::default());
        assert_eq!(radar.lock().own_ship, OwnShip::default());
    }

    #[test]
    fn linked_radars() {
        let a = radar();
        let b = Radar::new(2, SPOKES, SPOKE_LEN, 16, false, &config());
        a.link(&b);
        let mut data = vec![0u8; SPOKE_LEN];
        a.process_spoke(0, &mut data, 1024, START).unwrap();
        b.process_spoke(0, &mut data, 256, START).unwrap();
        assert_eq!(a.lock().arpa.guard_zone_start(), SPOKE_LEN as i32 / 4);
        assert_eq!(b.lock().arpa.guard_zone_start(), 0);
    }
}
