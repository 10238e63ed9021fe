use std::f64::consts::PI;

use super::contour::{Contour, ContourSearch, PixelCount};
use super::kalman::{KalmanFilter, LocalPosition, Polar};
use super::matrix::Matrix;
use super::message::{DynamicTargetData, ReportedStatus, TargetMessage};
use super::{
    meters_per_degree_longitude, Doppler, ExtendedPosition, Pass, RefreshState, TargetSetup,
    TargetStatus, AGE_TO_REPORT, MAX_CONTOUR_LENGTH_USED, MAX_LOST_COUNT,
    METERS_PER_DEGREE_LATITUDE, MS_TO_KN,
};
use crate::config::ArpaSettings;
use crate::radar::history::{HistorySpokes, PixelSource};
use crate::radar::GeoPosition;

// below this speed in knots a target counts as stationary
const STATIONARY_SPEED_KN: f64 = 1.0;
// speed above which the last pass searches twice as far
const FAST_TARGET_SPEED_KN: f64 = 15.;
// speed in knots above which young targets are still extrapolated
const EXTRAPOLATE_SPEED_KN: f64 = 10.;
const ROTATION_MARGIN_MS: u64 = 100;

/// Why a target was not updated in a pass.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RefreshError {
    Inactive,
    AlreadyFound,
    WaitForRefresh,
    NotFound,
    Lost,
}

#[derive(Debug, Clone)]
pub struct ArpaTarget {
    pub(super) status: TargetStatus,
    pub(super) refreshed: RefreshState,
    id: usize,
    average_contour_length: i32,
    small_fast: bool,
    lost_count: u32,
    refresh_time: u64,
    automatic: bool,
    course: f64,
    stationary: u32,
    doppler: Doppler,
    transferred: bool,
    kalman: KalmanFilter,
    contour: Option<Contour>,
    pixels: PixelCount,
    have_doppler: bool,
    position: ExtendedPosition,
    expected: Polar,
    age_rotations: u32,
}

impl ArpaTarget {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        position: ExtendedPosition,
        id: usize,
        setup: &TargetSetup,
        status: TargetStatus,
        doppler: Doppler,
        automatic: bool,
        settings: &ArpaSettings,
    ) -> Self {
        Self {
            status,
            refreshed: RefreshState::NotFound,
            id,
            average_contour_length: 0,
            small_fast: false,
            lost_count: 0,
            refresh_time: 0,
            automatic,
            course: 0.,
            stationary: 0,
            doppler,
            transferred: false,
            kalman: KalmanFilter::new(setup.spokes as usize, settings),
            contour: None,
            pixels: PixelCount::default(),
            have_doppler: setup.have_doppler,
            position,
            expected: Polar::default(),
            age_rotations: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> TargetStatus {
        self.status
    }

    pub fn position(&self) -> &ExtendedPosition {
        &self.position
    }

    pub fn expected(&self) -> Polar {
        self.expected
    }

    pub fn course(&self) -> f64 {
        self.course
    }

    pub fn lost_count(&self) -> u32 {
        self.lost_count
    }

    pub fn age_rotations(&self) -> u32 {
        self.age_rotations
    }

    pub fn doppler(&self) -> Doppler {
        self.doppler
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn is_transferred(&self) -> bool {
        self.transferred
    }

    /// Number of consecutive rotations the target hardly moved
    pub fn stationary(&self) -> u32 {
        self.stationary
    }

    pub fn contour(&self) -> Option<&Contour> {
        self.contour.as_ref()
    }

    pub(super) fn set_refresh_time(&mut self, time: u64) {
        self.refresh_time = time;
    }

    pub(super) fn clear_contour(&mut self) {
        self.contour = None;
    }

    ///
    /// Search the target in the history of the last sweep.
    ///
    /// Works on a copy; on `Ok` the caller replaces the target with the copy,
    /// on `Err(RefreshError::Lost)` it sets the target lost and on any other
    /// error the target stays as it was.
    ///
    pub(super) fn refresh_target(
        &self,
        setup: &TargetSetup,
        history: &mut HistorySpokes,
        own_pos: &GeoPosition,
        dist: i32,
        pass: Pass,
        settings: &ArpaSettings,
    ) -> Result<ArpaTarget, RefreshError> {
        if !self.status.is_alive() {
            return Err(RefreshError::Inactive);
        }
        if self.refreshed == RefreshState::Found {
            return Err(RefreshError::AlreadyFound);
        }

        let mut target = self.clone();
        let pol = setup.pos2polar(&target.position, own_pos);
        let alfa0 = pol.angle;
        let r0 = pol.r;

        // angle_time is the time of a spoke SCAN_MARGIN spokes forward of the target,
        // if that spoke is refreshed we assume that the target has been refreshed
        let angle_time = history.spoke_time(pol.angle + setup.scan_margin());
        let rotation_period = setup.rotation_period_ms();
        if angle_time
            < (target.refresh_time + rotation_period).saturating_sub(ROTATION_MARGIN_MS)
        {
            // the next image of the target is not yet there
            return Err(RefreshError::WaitForRefresh);
        }

        target.refresh_time = history.spoke_time(pol.angle);
        let prev_position = target.position;

        // PREDICTION CYCLE
        log::trace!(
            "Begin prediction id={} status={:?} angle={} r={} pass={:?} lat={} lon={}",
            target.id,
            target.status,
            pol.angle,
            pol.r,
            pass,
            target.position.pos.lat,
            target.position.pos.lon
        );

        let delta_t = if target.refresh_time >= prev_position.time
            && target.status != TargetStatus::Acquiring(0)
        {
            (target.refresh_time - prev_position.time) as f64 / 1000. // in seconds
        } else {
            0.
        };

        if !(-90. ..=90.).contains(&target.position.pos.lat) {
            log::debug!("Target id={} has unlikely latitude", target.id);
            return Err(RefreshError::Lost);
        }

        let mut x_local = LocalPosition::new(
            (target.position.pos.lat - own_pos.lat) * METERS_PER_DEGREE_LATITUDE,
            (target.position.pos.lon - own_pos.lon) * meters_per_degree_longitude(&own_pos.lat),
            target.position.dlat_dt,
            target.position.dlon_dt,
        );
        target.kalman.predict(&mut x_local, delta_t);

        // now set the polar to expected angular position from the expected local position
        let mut pol = Polar::new(
            setup.mod_spokes(
                (f64::atan2(x_local.lon, x_local.lat) * setup.spokes_f64 / (2. * PI)).round()
                    as i32,
            ),
            ((x_local.lat * x_local.lat + x_local.lon * x_local.lon).sqrt()
                * setup.pixels_per_meter)
                .round() as i32,
            pol.time,
        );

        // zooming and target movement may cause r to be out of bounds
        if pol.r >= setup.spoke_len || pol.r <= 0 {
            log::debug!(
                "Target id={} out of range at angle={} r={}",
                target.id,
                pol.angle,
                pol.r
            );
            return Err(RefreshError::Lost);
        }
        target.expected = pol;

        // MEASUREMENT CYCLE
        let mut dist1 = dist;
        if pass == Pass::Third {
            if target.status <= TargetStatus::Acquiring(1)
                || target.position.speed_kn > FAST_TARGET_SPEED_KN
            {
                dist1 *= 2;
            }
            // on the last pass Doppler targets are also looked for as normal targets
            target.doppler = Doppler::Any;
        }

        let found = match history.get_target(target.doppler, pol, dist1) {
            Ok((contour, measured)) => target.check_contour(history, contour, measured, setup, pass, dist1, settings),
            Err(e) => {
                log::trace!("Target id={} not found: {}", target.id, e);
                None
            }
        };

        match found {
            Some((contour, measured)) => {
                pol = measured;
                target.found(contour, pol, x_local, own_pos, &prev_position, alfa0, r0, setup, history, settings)
            }
            None => target.not_found(pass),
        }
    }

    /// Doppler bookkeeping and sanity checks on a contour found near the
    /// expected position. The pixels of an accepted blob are cleared.
    #[allow(clippy::too_many_arguments)]
    fn check_contour(
        &mut self,
        history: &mut HistorySpokes,
        contour: Contour,
        measured: Polar,
        setup: &TargetSetup,
        pass: Pass,
        dist: i32,
        settings: &ArpaSettings,
    ) -> Option<(Contour, Polar)> {
        // the pixels are counted on the whole blob, not only the Doppler part
        self.pixels = if self.doppler != Doppler::Any {
            match history.get_target(Doppler::Any, measured, dist) {
                Ok((any, _)) => history.pixel_counter(&any),
                Err(_) => history.pixel_counter(&contour),
            }
        } else {
            history.pixel_counter(&contour)
        };
        self.state_transition(settings);

        let length = contour.len() as i32;
        if self.average_contour_length != 0
            && (length < self.average_contour_length / 2 || length > self.average_contour_length * 2)
            && pass != Pass::Third
        {
            log::trace!(
                "Target id={} contour length {} too different from average {}",
                self.id,
                length,
                self.average_contour_length
            );
            return None;
        }

        history.reset_pixels(&contour, &measured, setup.pixels_per_meter);
        if contour.len() >= MAX_CONTOUR_LENGTH_USED - 1 {
            // don't use this blob, could be radar interference
            log::trace!("Target id={} contour too long: {}", self.id, contour.len());
            return None;
        }
        Some((contour, measured))
    }

    #[allow(clippy::too_many_arguments)]
    fn found(
        mut self,
        contour: Contour,
        pol: Polar,
        mut x_local: LocalPosition,
        own_pos: &GeoPosition,
        prev_position: &ExtendedPosition,
        alfa0: i32,
        r0: i32,
        setup: &TargetSetup,
        history: &HistorySpokes,
        settings: &ArpaSettings,
    ) -> Result<ArpaTarget, RefreshError> {
        let previous = self.status;
        let p_own = history.spoke_pos(pol.angle);

        if previous == TargetStatus::Acquiring(0) {
            // as this is the first measurement, move target to measured position
            self.position = setup.polar2pos(&pol, &p_own);
            self.expected = pol;
        }

        let mut next = previous.next();
        let mut consistent = true;
        if next >= TargetStatus::Acquiring(2) {
            // Kalman filter update, correct the prediction with the measurement
            self.kalman.update_p();
            match self
                .kalman
                .set_measurement(&pol, &mut x_local, &self.expected, setup.pixels_per_meter)
            {
                Ok(innovation) => consistent = innovation.is_consistent(),
                Err(e) => log::debug!("Target id={} keeps prediction: {}", self.id, e),
            }
        }

        if !consistent && matches!(previous, TargetStatus::Acquiring(2) | TargetStatus::Acquiring(3))
        {
            // a target under acquisition needs consistent fixes to advance
            next = previous;
            self.lost_count += 1;
            if self.lost_count > MAX_LOST_COUNT {
                return Err(RefreshError::Lost);
            }
        } else {
            self.lost_count = 0;
        }
        self.status = next;
        self.age_rotations += 1;
        self.contour = Some(contour);

        self.position.time = pol.time;
        if next != TargetStatus::Acquiring(1) {
            // the first position is the measurement, after that the filter output
            self.position.pos = GeoPosition::new(
                own_pos.lat + x_local.lat / METERS_PER_DEGREE_LATITUDE,
                own_pos.lon + x_local.lon / meters_per_degree_longitude(&own_pos.lat),
            );
            self.position.dlat_dt = x_local.dlat_dt;
            self.position.dlon_dt = x_local.dlon_dt;
            self.position.sd_speed_kn = x_local.sd_speed_m_s * MS_TO_KN;
        }

        if previous == TargetStatus::Acquiring(1) && next == TargetStatus::Acquiring(2) {
            let speed = x_local.dlat_dt.hypot(x_local.dlon_dt);
            if speed > settings.start_up_speed {
                log::debug!(
                    "Target id={} rejected, start speed {:.2} m/s above {:.2}",
                    self.id,
                    speed,
                    settings.start_up_speed
                );
                return Err(RefreshError::Lost);
            }
        }

        let contour_len = self.contour.as_ref().map(|c| c.len() as i32).unwrap_or(0);
        if next == TargetStatus::Acquiring(2) {
            // determine if this is a small and fast target
            let mut dist_angle = pol.angle - alfa0;
            if dist_angle > setup.spokes / 2 {
                dist_angle -= setup.spokes;
            }
            if dist_angle < -setup.spokes / 2 {
                dist_angle += setup.spokes;
            }
            let dist_r = pol.r - r0;
            let (size_angle, size_r) = match &self.contour {
                Some(c) => ((c.max_angle - c.min_angle).max(1), (c.max_r - c.min_r).max(1)),
                None => (1, 1),
            };
            let test = (dist_r as f64 / size_r as f64).abs() + (dist_angle as f64 / size_angle as f64).abs();
            self.small_fast = test > 2.;
            log::trace!(
                "Target id={} small_fast test={} small_fast={}",
                self.id,
                test,
                self.small_fast
            );
        }

        const FORCED_POSITION_STATUS: u32 = 8;
        const FORCED_POSITION_AGE_FAST: u32 = 5;
        let age = self.age_rotations;
        if age >= 2
            && age < FORCED_POSITION_STATUS
            && (age < FORCED_POSITION_AGE_FAST || self.position.speed_kn > EXTRAPOLATE_SPEED_KN)
            && self.small_fast
        {
            // Small fast targets jump around in the measurement; use the
            // displacement since the last position for the speed instead
            let new_pos = setup.polar2pos(&pol, &p_own);
            let delta_t = pol.time.saturating_sub(prev_position.time);
            if delta_t > 1000 {
                let delta_t = delta_t as f64 / 1000.;
                let factor = 0.8_f64.powi(age as i32 - 1);
                let dlat_dt = (new_pos.pos.lat - prev_position.pos.lat) / delta_t * METERS_PER_DEGREE_LATITUDE;
                let dlon_dt = (new_pos.pos.lon - prev_position.pos.lon) / delta_t
                    * meters_per_degree_longitude(&new_pos.pos.lat);
                self.position.dlat_dt = factor * dlat_dt + (1. - factor) * self.position.dlat_dt;
                self.position.dlon_dt = factor * dlon_dt + (1. - factor) * self.position.dlon_dt;
                self.position.pos = GeoPosition::new(
                    factor * new_pos.pos.lat + (1. - factor) * self.position.pos.lat,
                    factor * new_pos.pos.lon + (1. - factor) * self.position.pos.lon,
                );
                log::trace!("Target id={} forced position, factor {:.2}", self.id, factor);
            }
        }

        self.refresh_time = self.position.time;
        let speed_m_s = self.position.dlat_dt.hypot(self.position.dlon_dt);
        self.position.speed_kn = speed_m_s * MS_TO_KN;
        self.course = f64::atan2(self.position.dlon_dt, self.position.dlat_dt)
            .to_degrees()
            .rem_euclid(360.);
        if self.position.speed_kn < STATIONARY_SPEED_KN {
            self.stationary += 1;
        } else {
            self.stationary = 0;
        }

        self.average_contour_length = if self.average_contour_length == 0 {
            contour_len
        } else {
            (self.average_contour_length as f64 * 0.9 + contour_len as f64 * 0.1) as i32
        };

        self.refreshed = RefreshState::Found;
        self.transferred = false;
        log::trace!(
            "Target id={} found status={:?} speed={:.1} kn course={:.0}",
            self.id,
            self.status,
            self.position.speed_kn,
            self.course
        );
        Ok(self)
    }

    fn not_found(mut self, pass: Pass) -> Result<ArpaTarget, RefreshError> {
        log::trace!(
            "Target id={} not found status={:?} pass={:?} lost_count={}",
            self.id,
            self.status,
            pass,
            self.lost_count
        );
        if self.small_fast && pass == Pass::Second && self.status == TargetStatus::Acquiring(2) {
            // status 2 targets that were small and fast are probably noise
            return Err(RefreshError::Lost);
        }
        match self.status {
            TargetStatus::Acquiring(0) => return Err(RefreshError::Lost),
            // a target under acquisition must be found in every sweep
            TargetStatus::Acquiring(_) if pass == Pass::Third => return Err(RefreshError::Lost),
            _ => {}
        }
        if pass != Pass::Third {
            // try again in the next pass, from the old position
            return Err(RefreshError::NotFound);
        }

        // the target keeps its last position and is searched again next sweep
        self.lost_count += 1;
        if self.lost_count > MAX_LOST_COUNT {
            return Err(RefreshError::Lost);
        }
        self.refreshed = RefreshState::NotFound;
        self.transferred = false;
        Ok(self)
    }

    /// Check doppler state of targets if Doppler is on
    fn state_transition(&mut self, settings: &ArpaSettings) {
        if !self.have_doppler || self.doppler == Doppler::AnyPlus {
            return;
        }
        let PixelCount {
            total,
            approaching,
            receding,
        } = self.pixels;

        let check_to_doppler = (total as f64 * settings.doppler_to_doppler) as u32;
        let check_not_approaching =
            (total.saturating_sub(approaching) as f64 * settings.doppler_to_any) as u32;
        let check_not_receding =
            (total.saturating_sub(receding) as f64 * settings.doppler_to_any) as u32;

        let new = match self.doppler {
            Doppler::AnyDoppler | Doppler::Any => {
                // convert to Approaching or Receding
                if approaching > receding && approaching > check_to_doppler {
                    Doppler::Approaching
                } else if receding > approaching && receding > check_to_doppler {
                    Doppler::Receding
                } else if self.doppler == Doppler::AnyDoppler {
                    Doppler::Any
                } else {
                    self.doppler
                }
            }
            Doppler::Receding if receding < check_not_approaching => Doppler::Any,
            Doppler::Approaching if approaching < check_not_receding => Doppler::Any,
            d => d,
        };
        if new != self.doppler {
            log::debug!(
                "Target id={} Doppler state changed from {:?} to {:?}",
                self.id,
                self.doppler,
                new
            );
            self.doppler = new;
        }
    }

    pub(super) fn set_status_lost(&mut self) {
        self.contour = None;
        self.lost_count = 0;
        self.kalman.reset_filter();
        self.status = TargetStatus::Lost;
        self.refresh_time = 0;
        self.course = 0.;
        self.stationary = 0;
        self.position.dlat_dt = 0.;
        self.position.dlon_dt = 0.;
        self.position.speed_kn = 0.;
    }

    /// Status letter for the target mixer, `None` when not reported.
    pub fn reported_status(&self) -> Option<ReportedStatus> {
        match self.status {
            TargetStatus::ForDeletion | TargetStatus::Acquiring(0) => None,
            TargetStatus::Lost if self.age_rotations > 0 => Some(ReportedStatus::L),
            TargetStatus::Lost => None,
            TargetStatus::Active if self.age_rotations >= AGE_TO_REPORT => {
                Some(ReportedStatus::T)
            }
            TargetStatus::Acquiring(_) | TargetStatus::Active => Some(ReportedStatus::Q),
        }
    }

    /// The report for this sweep: found targets, plus targets lost this sweep.
    pub fn message(&self, source_id: usize) -> Option<TargetMessage> {
        if self.status != TargetStatus::Lost && self.refreshed != RefreshState::Found {
            return None;
        }
        let state = self.reported_status()?;
        Some(TargetMessage::new(self, source_id, state))
    }

    pub fn dynamic_data(&self) -> DynamicTargetData {
        DynamicTargetData {
            target_id: self.id,
            p: self.kalman.p().to_array4(),
            position: self.position,
            status: self.status,
            age_rotations: self.age_rotations,
        }
    }

    pub(super) fn update_from(&mut self, data: &DynamicTargetData, remote: bool) {
        if let Err(e) = self.kalman.set_p(Matrix::from_array4(&data.p)) {
            log::warn!("Target id={} covariance not copied: {}", self.id, e);
        }
        self.position = data.position;
        self.status = data.status;
        self.age_rotations = data.age_rotations;
        self.lost_count = 0;
        self.automatic = true;
        self.doppler = Doppler::Any;
        self.course = f64::atan2(data.position.dlon_dt, data.position.dlat_dt)
            .to_degrees()
            .rem_euclid(360.);
        self.transferred = remote;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::target::tests::{arpa, own_ship, sweep, SPOKES};
    use crate::radar::history::HistoryPixel;

    fn target(doppler: Doppler, pixels: PixelCount) -> ArpaTarget {
        let arpa = arpa(1);
        let mut t = ArpaTarget::new(
            ExtendedPosition::default(),
            1,
            arpa.setup(),
            TargetStatus::Active,
            doppler,
            true,
            arpa.settings(),
        );
        t.pixels = pixels;
        t
    }

    fn count(total: u32, approaching: u32, receding: u32) -> PixelCount {
        PixelCount {
            total,
            approaching,
            receding,
        }
    }

    #[test]
    fn doppler_transitions() {
        let settings = ArpaSettings::default();

        let mut t = target(Doppler::AnyDoppler, count(100, 90, 0));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::Approaching);

        let mut t = target(Doppler::AnyDoppler, count(100, 40, 40));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::Any);

        let mut t = target(Doppler::Any, count(100, 0, 86));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::Receding);

        let mut t = target(Doppler::Any, count(100, 50, 10));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::Any);

        // 0.8 * (100 - 10) = 72
        let mut t = target(Doppler::Receding, count(100, 10, 71));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::Any);
        let mut t = target(Doppler::Receding, count(100, 10, 73));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::Receding);

        let mut t = target(Doppler::Approaching, count(100, 30, 20));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::Any);

        let mut t = target(Doppler::AnyPlus, count(100, 100, 0));
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::AnyPlus);

        let mut t = target(Doppler::AnyDoppler, count(100, 90, 0));
        t.have_doppler = false;
        t.state_transition(&settings);
        assert_eq!(t.doppler(), Doppler::AnyDoppler);
    }

    #[test]
    fn reported_status_follows_age() {
        let mut t = target(Doppler::Any, PixelCount::default());
        t.status = TargetStatus::Acquiring(0);
        assert_eq!(t.reported_status(), None);
        t.status = TargetStatus::Acquiring(2);
        t.age_rotations = 2;
        assert_eq!(t.reported_status(), Some(ReportedStatus::Q));
        t.status = TargetStatus::Active;
        t.age_rotations = AGE_TO_REPORT - 1;
        assert_eq!(t.reported_status(), Some(ReportedStatus::Q));
        t.age_rotations = AGE_TO_REPORT;
        assert_eq!(t.reported_status(), Some(ReportedStatus::T));
        t.set_status_lost();
        assert_eq!(t.reported_status(), Some(ReportedStatus::L));
        t.status = TargetStatus::ForDeletion;
        assert_eq!(t.reported_status(), None);
    }

    #[test]
    fn lost_target_is_reset() {
        let mut t = target(Doppler::Any, PixelCount::default());
        t.position.dlat_dt = 3.;
        t.position.speed_kn = 5.8;
        t.lost_count = 4;
        t.set_status_lost();
        assert_eq!(t.status(), TargetStatus::Lost);
        assert_eq!(t.lost_count(), 0);
        assert_eq!(t.position().speed_kn, 0.);
        assert!(t.contour().is_none());
        assert!(matches!(
            t.refresh_target(
                &arpa(1).setup().clone(),
                &mut HistorySpokes::new(SPOKES, 16, false),
                &GeoPosition::default(),
                10,
                Pass::Second,
                &ArpaSettings::default()
            ),
            Err(RefreshError::Inactive)
        ));
    }

    #[test]
    fn refresh_waits_for_next_rotation() {
        let mut arpa = arpa(1);
        let blob = (300, 400);
        sweep(&mut arpa, 0, &[blob], HistoryPixel::INITIAL);
        let id = arpa
            .acquire_new_arpa_target(Polar::new(blob.0 - 3, blob.1, 0), Doppler::Any)
            .unwrap();
        arpa.refresh_all_arpa_targets(&own_ship());
        let t = arpa.target(id).unwrap().clone();
        assert_eq!(t.status(), TargetStatus::Acquiring(1));
        assert_eq!(t.position().time, arpa.history().spoke_time(blob.0));
        let contour = t.contour().unwrap();
        assert_eq!((contour.min_angle, contour.max_angle), (297, 303));

        // same sweep again: nothing new to see
        let mut fresh = t.clone();
        fresh.refreshed = RefreshState::NotFound;
        let own = own_ship().position.unwrap();
        let setup = arpa.setup().clone();
        let settings = arpa.settings().clone();
        assert_eq!(
            fresh
                .refresh_target(&setup, arpa.history_mut(), &own, 20, Pass::Second, &settings)
                .err(),
            Some(RefreshError::WaitForRefresh)
        );
    }

    #[test]
    fn moving_target_gets_speed_and_course() {
        let mut arpa = arpa(1);
        // at 1 pixel per meter, 3 pixels outward per rotation of 2.5 s is 1.2 m/s
        let mut blob = (512, 300);
        sweep(&mut arpa, 0, &[blob], HistoryPixel::INITIAL);
        let id = arpa
            .acquire_new_arpa_target(Polar::new(blob.0 - 3, blob.1, 0), Doppler::Any)
            .unwrap();
        arpa.refresh_all_arpa_targets(&own_ship());
        for rotation in 1..12 {
            blob.1 += 3;
            sweep(&mut arpa, rotation, &[blob], HistoryPixel::INITIAL);
            arpa.refresh_all_arpa_targets(&own_ship());
            assert!(arpa.target(id).is_some_and(|t| t.status().is_alive()));
        }
        let t = arpa.target(id).unwrap();
        assert_eq!(t.status(), TargetStatus::Active);
        // due east
        assert!((t.course() - 90.).abs() < 15., "course {}", t.course());
        let speed_m_s = t.position().speed_kn / MS_TO_KN;
        assert!((speed_m_s - 1.2).abs() < 0.4, "speed {}", speed_m_s);
    }
}
