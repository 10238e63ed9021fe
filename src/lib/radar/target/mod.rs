use std::{
    collections::VecDeque,
    f64::consts::PI,
    sync::{atomic::Ordering, Arc},
};

use atomic_float::AtomicF64;
use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use super::history::{HistorySpokes, Legend, PixelSource};
use super::{GeoPosition, OwnShip};
use crate::config::ArpaSettings;

pub mod arpa;
pub mod contour;
pub mod kalman;
pub mod matrix;
pub mod message;

use arpa::{ArpaTarget, RefreshError};
use contour::ContourSearch;
use kalman::Polar;
use message::{DynamicTargetData, IncomingTarget, TargetMessage, TargetSource};

pub(crate) const MIN_CONTOUR_LENGTH: usize = 6;
pub(crate) const MAX_CONTOUR_LENGTH: usize = 2000; // defines maximal size of target contour in pixels
pub(crate) const MAX_CONTOUR_LENGTH_USED: usize = 500; // larger blobs are interference
pub(crate) const MAX_LOST_COUNT: u32 = 12; // number of sweeps that target can be missed before it is set to lost
pub(crate) const DISTANCE_BETWEEN_TARGETS: i32 = 30; // minimum separation between targets, in pixels
pub(crate) const TARGET_SEARCH_RADIUS1: i32 = 5; // minimal search radius of the second pass
pub(crate) const TARGET_SEARCH_RADIUS2: i32 = 10; // minimal search radius of the third pass
const MAX_DETECTION_SPEED_KN: f64 = 40.;

/// Rotations a target must be found before it is reported
pub const AGE_TO_REPORT: u32 = 5;
/// Rotations a target must be found before it is handed to the other radar
pub(crate) const AGE_TO_TRANSFER: u32 = 4;

pub const METERS_PER_DEGREE_LATITUDE: f64 = 60. * 1852.;
pub const KN_TO_MS: f64 = 1852. / 3600.;
pub const MS_TO_KN: f64 = 3600. / 1852.;

pub(crate) const DEFAULT_ROTATION_MS: u64 = 2500;
// if a spoke is refreshed after this time it is the next sweep
pub(crate) const SCAN_MARGIN2_MS: u64 = 1000;
const DELETE_DISTANCE_M: f64 = 1000.;
const MAX_DELETE_REQUESTS: usize = 10;
const MAX_TARGET_ID: usize = 100000;
const DOPPLER_SEARCH_MARGIN: i32 = 20;

///
/// The length of a degree longitude varies by the latitude,
/// the more north or south you get the shorter it becomes.
/// Since the earth is _nearly_ a sphere, the cosine function
/// is _very_ close.
///
pub fn meters_per_degree_longitude(lat: &f64) -> f64 {
    METERS_PER_DEGREE_LATITUDE * lat.to_radians().cos()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedPosition {
    pub pos: GeoPosition,
    pub dlat_dt: f64, // m / sec
    pub dlon_dt: f64, // m / sec
    pub time: u64,    // millis
    pub speed_kn: f64,
    pub sd_speed_kn: f64, // standard deviation of the speed in knots
}

impl ExtendedPosition {
    pub fn new(
        pos: GeoPosition,
        dlat_dt: f64,
        dlon_dt: f64,
        time: u64,
        speed_kn: f64,
        sd_speed_kn: f64,
    ) -> Self {
        Self {
            pos,
            dlat_dt,
            dlon_dt,
            time,
            speed_kn,
            sd_speed_kn,
        }
    }

    pub fn at(pos: GeoPosition, time: u64) -> Self {
        Self::new(pos, 0., 0., time, 0., 0.)
    }
}

// We try to find each target three times, with different conditions each time
#[derive(Debug, Clone, Copy, PartialEq, EnumIter)]
pub(crate) enum Pass {
    First,
    Second,
    Third,
}

impl Pass {
    /// Part of the maximum speed search radius that this pass covers
    fn radius_divisor(&self) -> i32 {
        match self {
            Pass::First => 4,
            Pass::Second => 3,
            Pass::Third => 1,
        }
    }

    /// Radius searched by this pass even when targets hardly move between rotations
    fn min_radius(&self) -> i32 {
        match self {
            Pass::First => 0,
            Pass::Second => TARGET_SEARCH_RADIUS1,
            Pass::Third => TARGET_SEARCH_RADIUS2,
        }
    }
}

///
/// Life cycle of a target. The variant order is the order of importance:
/// targets are refreshed from `Active` down.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetStatus {
    /// Duplicate, removed at the next cleanup
    ForDeletion,
    Lost,
    /// Under acquisition: 0 = no contour yet, 1 = first position,
    /// 2 = speed and course taken, 3 = verified, next time active
    Acquiring(u8),
    Active,
}

impl TargetStatus {
    pub(crate) fn next(&self) -> TargetStatus {
        match self {
            TargetStatus::Acquiring(n) if *n < 3 => TargetStatus::Acquiring(n + 1),
            TargetStatus::Acquiring(_) | TargetStatus::Active => TargetStatus::Active,
            s => *s,
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, TargetStatus::Acquiring(_) | TargetStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshState {
    NotFound,
    Found,
    OutOfScope,
}

/*
Doppler states of the target.
A Doppler state of a target is an attribute of the target that determines the
search method for the target in the history array, according to the following
table:

x means don't care, bit0 is the above threshold bit, bit2 is the APPROACHING
bit, bit3 is the RECEDING bit.

                  bit0   bit2   bit3
ANY                  1      x      x
NO_DOPPLER           1      0      0
APPROACHING          1      1      0
RECEDING             1      0      1
ANY_DOPPLER          1      1      0   or
                     1      0      1
NOT_RECEDING         1      x      0
NOT_APPROACHING      1      0      x

ANY is typical non Dopper target
NOT_RECEDING and NOT_APPROACHING are only used to check countour length in the
transition of APPROACHING or RECEDING -> ANY ANY_DOPPLER is only used in the
search for targets and converted to APPROACHING or RECEDING in the first refresh
cycle

State transitions:
ANY -> APPROACHING or RECEDING
APPROACHING or RECEDING -> ANY  (based on length of contours)
ANY_DOPPLER -> APPROACHING or RECEDING
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Doppler {
    Any,            // any target above threshold
    NoDoppler,      // a target without a Doppler bit
    Approaching,    // Doppler approaching
    Receding,       // Doppler receding
    AnyDoppler,     // Approaching or Receding
    NotReceding,    // that is NoDoppler or Approaching
    NotApproaching, // that is NoDoppler or Receding
    AnyPlus,        // will also check bits that have been cleared
}

#[derive(Debug, Clone)]
pub struct TargetSetup {
    pub radar_id: usize,
    pub spokes: i32,
    pub spokes_f64: f64,
    pub spoke_len: i32,
    pub have_doppler: bool,
    pub pixels_per_meter: f64,
    pub rotation_speed_ms: u64,
}

impl TargetSetup {
    /// Converts a polar position in the radar image to a geographic
    /// position, relative to the own ship position at the time the spoke
    /// was received.
    pub fn polar2pos(&self, pol: &Polar, own_ship: &GeoPosition) -> ExtendedPosition {
        let distance = pol.r as f64 / self.pixels_per_meter;
        let angle = pol.angle_in_rad(self.spokes_f64);
        let pos = GeoPosition::new(
            own_ship.lat + distance * angle.cos() / METERS_PER_DEGREE_LATITUDE,
            own_ship.lon + distance * angle.sin() / meters_per_degree_longitude(&own_ship.lat),
        );
        ExtendedPosition::at(pos, pol.time)
    }

    /// Converts a geographic position to a polar position relative to `own_ship`.
    pub fn pos2polar(&self, p: &ExtendedPosition, own_ship: &GeoPosition) -> Polar {
        let dif_lat = p.pos.lat - own_ship.lat;
        let dif_lon = (p.pos.lon - own_ship.lon) * own_ship.lat.to_radians().cos();
        let r = ((dif_lat * dif_lat + dif_lon * dif_lon).sqrt()
            * METERS_PER_DEGREE_LATITUDE
            * self.pixels_per_meter)
            .round() as i32;
        let angle = (f64::atan2(dif_lon, dif_lat) * self.spokes_f64 / (2. * PI)).round() as i32;
        Polar::new(self.mod_spokes(angle), r, p.time)
    }

    pub fn mod_spokes(&self, angle: i32) -> i32 {
        angle.rem_euclid(self.spokes)
    }

    /// Number of spokes that a next scan of the target may have moved, 1/10th of circle
    pub fn scan_margin(&self) -> i32 {
        self.spokes / 10
    }

    pub fn rotation_period_ms(&self) -> u64 {
        if self.rotation_speed_ms == 0 {
            DEFAULT_ROTATION_MS
        } else {
            self.rotation_speed_ms
        }
    }

    /// Radius in pixels that a target at maximum speed can move in one rotation
    fn search_radius(&self) -> i32 {
        let speed = MAX_DETECTION_SPEED_KN * KN_TO_MS; // m/sec
        (speed * self.rotation_period_ms() as f64 * self.pixels_per_meter / 1000.) as i32
    }

    fn pass_radius(&self, pass: Pass) -> i32 {
        (self.search_radius() / pass.radius_divisor()).max(pass.min_radius())
    }
}

///
/// Connection to the other radar on the same vessel.
///
/// The radar with the lower pixels per meter covers the longer range. It only
/// hands over targets the short range radar can see, the short range radar
/// hands over everything.
///
#[derive(Debug, Clone)]
pub struct InterRadarLink {
    peer: Sender<IncomingTarget>,
    peer_pixels_per_meter: Arc<AtomicF64>,
}

impl InterRadarLink {
    pub fn new(peer: Sender<IncomingTarget>, peer_pixels_per_meter: Arc<AtomicF64>) -> Self {
        InterRadarLink {
            peer,
            peer_pixels_per_meter,
        }
    }

    fn peer_pixels_per_meter(&self) -> f64 {
        self.peer_pixels_per_meter.load(Ordering::Relaxed)
    }
}

///
/// All (M)ARPA targets of one radar, plus the history of the last rotation
/// in which they are searched.
///
#[derive(Debug)]
pub struct Arpa {
    setup: TargetSetup,
    settings: ArpaSettings,
    next_target_id: usize,
    history: HistorySpokes,
    targets: Vec<ArpaTarget>,
    delete_requests: VecDeque<GeoPosition>,
    remote_tx: Sender<IncomingTarget>,
    remote_rx: Receiver<IncomingTarget>,
    shared_pixels_per_meter: Arc<AtomicF64>,
    link: Option<InterRadarLink>,
    doppler_update_time: Vec<u64>,
}

impl Arpa {
    pub fn new(
        radar_id: usize,
        spokes: usize,
        spoke_len: usize,
        have_doppler: bool,
        settings: ArpaSettings,
    ) -> Self {
        let (remote_tx, remote_rx) = unbounded();
        Arpa {
            setup: TargetSetup {
                radar_id,
                spokes: spokes as i32,
                spokes_f64: spokes as f64,
                spoke_len: spoke_len as i32,
                have_doppler,
                pixels_per_meter: 0.,
                rotation_speed_ms: 0,
            },
            history: HistorySpokes::new(spokes, spoke_len, settings.stationary),
            settings,
            next_target_id: 0,
            targets: Vec::new(),
            delete_requests: VecDeque::new(),
            remote_tx,
            remote_rx,
            shared_pixels_per_meter: Arc::new(AtomicF64::new(0.)),
            link: None,
            doppler_update_time: vec![0; spokes],
        }
    }

    pub fn setup(&self) -> &TargetSetup {
        &self.setup
    }

    pub fn settings(&self) -> &ArpaSettings {
        &self.settings
    }

    pub fn history(&self) -> &HistorySpokes {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistorySpokes {
        &mut self.history
    }

    pub fn targets(&self) -> &[ArpaTarget] {
        &self.targets
    }

    pub fn target(&self, id: usize) -> Option<&ArpaTarget> {
        self.targets.iter().find(|t| t.id() == id)
    }

    pub fn set_rotation_speed(&mut self, ms: u64) {
        self.setup.rotation_speed_ms = ms;
    }

    pub fn set_pixels_per_meter(&mut self, pixels_per_meter: f64) {
        if self.setup.pixels_per_meter != pixels_per_meter {
            log::debug!(
                "detected spoke range change from {} to {} pixels/m",
                self.setup.pixels_per_meter,
                pixels_per_meter,
            );
            self.setup.pixels_per_meter = pixels_per_meter;
            self.shared_pixels_per_meter
                .store(pixels_per_meter, Ordering::Relaxed);
            self.history.reset();
            self.clear_contours();
        }
    }

    /// The link another radar uses to hand targets to this one.
    pub fn link_to_self(&self) -> InterRadarLink {
        InterRadarLink::new(
            self.remote_tx.clone(),
            self.shared_pixels_per_meter.clone(),
        )
    }

    pub fn set_link(&mut self, link: InterRadarLink) {
        self.link = Some(link);
    }

    pub fn remote_target_sender(&self) -> Sender<IncomingTarget> {
        self.remote_tx.clone()
    }

    /// Queue a target from another radar or vessel. It is merged at the next refresh.
    pub fn store_remote_target(&self, data: DynamicTargetData, source: TargetSource) {
        // the receiver is owned by self, so sending cannot fail
        let _ = self.remote_tx.send(IncomingTarget { data, source });
    }

    ///
    /// Store one spoke in the history.
    /// `range` is the range of the spoke in meters.
    ///
    pub fn process_spoke(
        &mut self,
        angle: usize,
        data: &mut [u8],
        range: u32,
        time: u64,
        pos: GeoPosition,
        legend: &Legend,
    ) {
        if range == 0 || data.is_empty() {
            return;
        }
        self.set_pixels_per_meter(data.len() as f64 / range as f64);
        self.history.process_spoke(angle, data, time, pos, legend);
    }

    pub fn multi_pix(&mut self, angle: i32, r: i32, doppler: Doppler) -> bool {
        self.history.multi_pix(doppler, angle, r)
    }

    fn live_targets(&self) -> usize {
        self.targets.iter().filter(|t| t.status().is_alive()).count()
    }

    pub fn is_full(&self) -> bool {
        self.live_targets() >= self.settings.max_targets
    }

    fn get_next_target_id(&mut self) -> usize {
        self.next_target_id += 1;
        if self.next_target_id >= MAX_TARGET_ID {
            self.next_target_id = 1;
        }

        self.next_target_id + MAX_TARGET_ID * self.setup.radar_id
    }

    fn is_near_existing_target(&self, pol: &Polar, own_pos: &GeoPosition) -> bool {
        self.targets
            .iter()
            .filter(|t| t.status().is_alive())
            .any(|t| {
                let other = self.setup.pos2polar(t.position(), own_pos);
                let da = self.setup.mod_spokes(other.angle - pol.angle);
                let da = da.min(self.setup.spokes - da);
                da <= DISTANCE_BETWEEN_TARGETS && (other.r - pol.r).abs() <= DISTANCE_BETWEEN_TARGETS
            })
    }

    ///
    /// Acquire a new automatic target at polar position `pol`.
    ///
    /// Returns `None` when the table is full or when there is already a target
    /// within DISTANCE_BETWEEN_TARGETS; in the latter case the new target is
    /// stored marked for deletion.
    ///
    pub fn acquire_new_arpa_target(&mut self, pol: Polar, doppler: Doppler) -> Option<usize> {
        if self.setup.pixels_per_meter == 0. {
            return None;
        }
        if self.is_full() {
            log::debug!("ARPA table full, not acquiring at {:?}", pol);
            return None;
        }
        let time = self.history.spoke_time(pol.angle);
        let own_pos = self.history.spoke_pos(pol.angle);
        let pol = Polar::new(self.setup.mod_spokes(pol.angle), pol.r, time);
        let position = self.setup.polar2pos(&pol, &own_pos);
        let duplicate = self.is_near_existing_target(&pol, &own_pos);
        let status = if duplicate {
            TargetStatus::ForDeletion
        } else {
            TargetStatus::Acquiring(0)
        };
        let id = self.get_next_target_id();
        log::debug!(
            "Acquire ARPA id={} angle={} r={} doppler={:?} status={:?}",
            id,
            pol.angle,
            pol.r,
            doppler,
            status
        );

        let target = ArpaTarget::new(
            position,
            id,
            &self.setup,
            status,
            doppler,
            true,
            &self.settings,
        );
        self.targets.push(target);
        if duplicate {
            None
        } else {
            Some(id)
        }
    }

    ///
    /// Acquire a target at a user supplied position.
    /// The position is trusted, so the target starts with a first fix.
    ///
    pub fn acquire_new_marpa_target(&mut self, position: ExtendedPosition) -> Option<usize> {
        if self.is_full() {
            log::debug!("ARPA table full, not acquiring MARPA at {}", position.pos);
            return None;
        }
        log::debug!("Adding MARPA target at {}", position.pos);

        let id = self.get_next_target_id();
        let target = ArpaTarget::new(
            position,
            id,
            &self.setup,
            TargetStatus::Acquiring(1),
            Doppler::Any,
            false,
            &self.settings,
        );
        self.targets.push(target);
        Some(id)
    }

    fn find_target_by_position(&self, pos: &GeoPosition) -> Option<usize> {
        let mut best = None;
        let mut min_dist = DELETE_DISTANCE_M;
        for (i, target) in self.targets.iter().enumerate() {
            if target.status() == TargetStatus::Lost {
                continue;
            }
            let dif_lat = (pos.lat - target.position().pos.lat) * METERS_PER_DEGREE_LATITUDE;
            let dif_lon =
                (pos.lon - target.position().pos.lon) * meters_per_degree_longitude(&pos.lat);
            let dist = (dif_lat * dif_lat + dif_lon * dif_lon).sqrt();
            if dist < min_dist {
                min_dist = dist;
                best = Some(i);
            }
        }
        best
    }

    /// Delete the target that is closest to the position, within 1000 meters.
    pub fn delete_target(&mut self, pos: &GeoPosition) -> Option<usize> {
        match self.find_target_by_position(pos) {
            Some(i) => {
                let target = self.targets.remove(i);
                log::debug!("Deleted target id={} near {}", target.id(), pos);
                Some(target.id())
            }
            None => {
                log::debug!(
                    "Could not find (M)ARPA target to delete within 1000 meters from {}",
                    pos
                );
                None
            }
        }
    }

    /// Queue a delete for the next refresh. False when the queue is full.
    pub fn request_delete(&mut self, pos: GeoPosition) -> bool {
        if self.delete_requests.len() >= MAX_DELETE_REQUESTS {
            log::warn!("Delete queue full, ignoring delete at {}", pos);
            return false;
        }
        self.delete_requests.push_back(pos);
        true
    }

    pub fn delete_all_targets(&mut self) {
        self.targets.clear();
    }

    pub fn cleanup_lost_targets(&mut self) {
        self.targets.retain(|t| t.status().is_alive());
        for t in self.targets.iter_mut() {
            t.refreshed = RefreshState::NotFound;
        }
    }

    /// Forget the contours, they are invalid after a range change.
    pub fn clear_contours(&mut self) {
        for t in self.targets.iter_mut() {
            t.clear_contour();
        }
    }

    ///
    /// Merge a target received from the other radar or another vessel.
    /// Updated in place when the id is known, inserted otherwise.
    ///
    pub fn insert_or_update_target_from_other_radar(
        &mut self,
        data: &DynamicTargetData,
        remote: bool,
    ) {
        let index = match self.targets.iter().position(|t| t.id() == data.target_id) {
            Some(i) => {
                log::debug!("InsertOrUpdateTarget found target id={}", data.target_id);
                i
            }
            None => {
                log::debug!("InsertOrUpdateTarget new target id={}", data.target_id);
                let mut target = ArpaTarget::new(
                    data.position,
                    data.target_id,
                    &self.setup,
                    data.status,
                    Doppler::Any,
                    true,
                    &self.settings,
                );
                if remote && self.setup.pixels_per_meter > 0. {
                    // set estimated time of last refresh as if it was a local target
                    let own_pos = self.history.spoke_pos(0);
                    let pol = self.setup.pos2polar(&data.position, &own_pos);
                    target.set_refresh_time(self.history.spoke_time(pol.angle));
                }
                self.targets.push(target);
                self.targets.len() - 1
            }
        };
        self.targets[index].update_from(data, remote);
    }

    fn process_incoming(&mut self) {
        while let Ok(incoming) = self.remote_rx.try_recv() {
            self.insert_or_update_target_from_other_radar(
                &incoming.data,
                incoming.source == TargetSource::OtherVessel,
            );
        }
        while let Some(pos) = self.delete_requests.pop_front() {
            self.delete_target(&pos);
        }
    }

    /// The range, in pixels, below which the other radar is responsible for
    /// finding new targets. Zero unless this is the long range radar.
    pub fn guard_zone_start(&self) -> i32 {
        let Some(link) = &self.link else {
            return 0;
        };
        let own = self.setup.pixels_per_meter;
        let peer = link.peer_pixels_per_meter();
        if own > 0. && peer > own {
            (self.setup.spoke_len as f64 * own / peer) as i32
        } else {
            0
        }
    }

    fn transfer_target_to_other_radar(&self, target: &ArpaTarget) {
        let Some(link) = &self.link else {
            return;
        };
        let border = self.guard_zone_start();
        if border > 0 && target.expected().r > border {
            // don't send targets outside the range of the short range radar
            return;
        }
        log::trace!(
            "TransferTargetToOtherRadar id={} lat={} lon={}",
            target.id(),
            target.position().pos.lat,
            target.position().pos.lon
        );
        if link
            .peer
            .send(IncomingTarget {
                data: target.dynamic_data(),
                source: TargetSource::OtherRadar,
            })
            .is_err()
        {
            log::debug!("Other radar is gone, target id={} not transferred", target.id());
        }
    }

    /// Two live targets on the same spot: keep the one with the highest status.
    fn mark_duplicates(&mut self, own_pos: &GeoPosition) {
        let polars: Vec<Option<Polar>> = self
            .targets
            .iter()
            .map(|t| {
                t.status()
                    .is_alive()
                    .then(|| self.setup.pos2polar(t.position(), own_pos))
            })
            .collect();
        for i in 0..self.targets.len() {
            for j in i + 1..self.targets.len() {
                let (Some(a), Some(b)) = (polars[i], polars[j]) else {
                    continue;
                };
                if !self.targets[i].status().is_alive() || !self.targets[j].status().is_alive() {
                    continue;
                }
                let da = self.setup.mod_spokes(a.angle - b.angle);
                let da = da.min(self.setup.spokes - da);
                if da > DISTANCE_BETWEEN_TARGETS || (a.r - b.r).abs() > DISTANCE_BETWEEN_TARGETS {
                    continue;
                }
                let loser = if (self.targets[j].status(), self.targets[j].age_rotations())
                    > (self.targets[i].status(), self.targets[i].age_rotations())
                {
                    i
                } else {
                    j
                };
                log::debug!(
                    "Target id={} duplicates id={}, marked for deletion",
                    self.targets[loser].id(),
                    self.targets[i + j - loser].id()
                );
                self.targets[loser].status = TargetStatus::ForDeletion;
            }
        }
    }

    ///
    /// Refresh all targets once per sweep. Must be called with the radar
    /// state locked; the lock guard is the only way to reach `&mut Arpa`.
    ///
    /// Returns the target data to report.
    ///
    pub fn refresh_all_arpa_targets(&mut self, own_ship: &OwnShip) -> Vec<TargetMessage> {
        let mut messages = Vec::new();

        self.process_incoming();
        if self.setup.pixels_per_meter == 0. {
            return messages;
        }
        let Some(own_pos) = own_ship.fix() else {
            log::trace!("No own ship position or heading, no (M)ARPA possible");
            return messages;
        };
        self.cleanup_lost_targets();

        // highest status first, so they get the first pick of the blobs
        self.targets.sort_by(|a, b| {
            (b.status(), b.age_rotations()).cmp(&(a.status(), a.age_rotations()))
        });

        for pass in Pass::iter() {
            let radius = self.setup.pass_radius(pass);

            for target in self.targets.iter_mut() {
                // pass one only for fast moving established targets
                if pass == Pass::First
                    && !(target.position().speed_kn >= 2.5
                        && target.age_rotations() >= AGE_TO_REPORT)
                {
                    continue;
                }
                match target.refresh_target(
                    &self.setup,
                    &mut self.history,
                    &own_pos,
                    radius,
                    pass,
                    &self.settings,
                ) {
                    Ok(t) => *target = t,
                    Err(RefreshError::Lost) => {
                        log::debug!("Target id={} lost", target.id());
                        target.set_status_lost();
                    }
                    Err(e) => {
                        log::trace!("Target id={} pass={:?}: {:?}", target.id(), pass, e);
                    }
                }
            }
        }

        self.mark_duplicates(&own_pos);

        for target in self.targets.iter() {
            if target.refreshed == RefreshState::Found && target.age_rotations() > AGE_TO_TRANSFER
            {
                self.transfer_target_to_other_radar(target);
            }
            if let Some(message) = target.message(self.setup.radar_id) {
                messages.push(message);
            }
        }
        messages
    }

    ///
    /// Scan the last rotation for Doppler targets and acquire them.
    /// Each bearing is scanned once per rotation, after the beam has passed it.
    ///
    pub fn search_doppler_targets(&mut self, own_ship: &OwnShip) {
        if !self.setup.have_doppler
            || !self.settings.doppler_arpa
            || self.setup.pixels_per_meter == 0.
            || own_ship.fix().is_none()
        {
            return;
        }
        let margin = 3 * self.setup.scan_margin();
        let range_end = self.setup.spoke_len - DOPPLER_SEARCH_MARGIN;

        // +2 as a target must be wider than 2 pixels
        for angle in (0..self.setup.spokes).step_by(2) {
            let angle_time = self.history.spoke_time(angle);
            let passed_time = self.history.spoke_time(angle + margin);
            if angle_time <= self.doppler_update_time[angle as usize] + SCAN_MARGIN2_MS
                || passed_time < angle_time
            {
                continue;
            }
            self.doppler_update_time[angle as usize] = angle_time;
            for r in DOPPLER_SEARCH_MARGIN..range_end {
                if self.multi_pix(angle, r, Doppler::AnyDoppler) {
                    if self.is_full() {
                        return;
                    }
                    self.acquire_new_arpa_target(Polar::new(angle, r, 0), Doppler::AnyDoppler);
                }
            }
        }
    }
}
