use std::{f64::consts::PI, ops::Add};

use super::matrix::{Matrix, MatrixError};
use crate::config::ArpaSettings;

// Process noise is the allowed covariance of the target speed in lat and lon.
// Lower values make targets go straight, higher values allow them to make
// curves. The maneuvring regime uses the larger value so a turning target is
// followed quickly.

// Speed below which the course is too noisy to derive a rate of turn, m/s
const MIN_TURN_SPEED: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Polar {
    pub angle: i32,
    pub r: i32,
    pub time: u64, // time of measurement
}

impl Polar {
    pub fn new(angle: i32, r: i32, time: u64) -> Self {
        Polar { angle, r, time }
    }

    pub fn angle_in_rad(&self, spokes: f64) -> f64 {
        self.angle as f64 * 2. * PI / spokes
    }

    /// Is the angle in [start, end) on a ring of `spokes`?
    pub fn angle_is_between(&self, start: i32, end: i32, spokes: i32) -> bool {
        let a = self.angle.rem_euclid(spokes);
        let start = start.rem_euclid(spokes);
        let end = end.rem_euclid(spokes);
        if start <= end {
            a >= start && a < end
        } else {
            a >= start || a < end
        }
    }
}

impl Add for Polar {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Polar {
            angle: self.angle + other.angle,
            r: self.r + other.r,
            time: self.time + other.time,
        }
    }
}

/// Position relative to own ship in meters north (`lat`) and east (`lon`),
/// with the speed vector in m/s.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalPosition {
    pub lat: f64,
    pub lon: f64,
    pub dlat_dt: f64,      // latitude  of speed vector, m/s
    pub dlon_dt: f64,      // longitude of speed vector, m/s
    pub sd_speed_m_s: f64, // standard deviation of the speed, m/s
}

impl LocalPosition {
    pub fn new(lat: f64, lon: f64, dlat_dt: f64, dlon_dt: f64) -> Self {
        Self {
            lat,
            lon,
            dlat_dt,
            dlon_dt,
            sd_speed_m_s: 0.,
        }
    }

    fn to_state(&self) -> Matrix {
        Matrix::column(&[self.lat, self.lon, self.dlat_dt, self.dlon_dt])
    }

    fn set_state(&mut self, x: &Matrix) {
        self.lat = x.at(0, 0);
        self.lon = x.at(1, 0);
        self.dlat_dt = x.at(2, 0);
        self.dlon_dt = x.at(3, 0);
    }
}

/// Result of one measurement update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Innovation {
    /// Measured minus expected, in spokes and radial pixels
    pub z: [f64; 2],
    /// Predicted standard deviation of `z`
    pub sd: [f64; 2],
    /// Axes that were left out of the update
    pub gated: [bool; 2],
}

impl Innovation {
    pub fn is_consistent(&self) -> bool {
        !self.gated[0] && !self.gated[1]
    }
}

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    a: Matrix,
    w: Matrix,
    h: Matrix,
    p: Matrix,
    q1: Matrix,
    q2: Matrix,
    r: Matrix,
    maneuvring: bool,
    turn_rate: f64, // rad/s, positive is clockwise
    max_turn_rate: f64,
    last_course: Option<f64>,
    delta_time: f64,
    pub spokes: f64,
}

impl KalmanFilter {
    // as the measurement to state transformation is non-linear, the extended Kalman filter is used
    // f is the state transformation function Xk <- Xk-1
    // Ai,j is jacobian matrix dfi / dxj

    pub fn new(spokes: usize, settings: &ArpaSettings) -> Self {
        let mut f = KalmanFilter {
            a: Matrix::identity(4),
            w: Matrix::new(4, 2),
            h: Matrix::new(2, 4),
            p: Matrix::new(4, 4),
            // variance in lat and lon speed, (m / sec)2
            q1: Matrix::diag(&[settings.process_noise, settings.process_noise]),
            q2: Matrix::diag(&[settings.maneuver_noise, settings.maneuver_noise]),
            // variance in the angle and in the radius
            r: Matrix::diag(&[settings.angle_noise, settings.range_noise]),
            maneuvring: false,
            turn_rate: 0.,
            max_turn_rate: settings.max_turn_rate.to_radians(),
            last_course: None,
            delta_time: 0.,
            spokes: spokes as f64,
        };
        f.reset_filter();
        f
    }

    pub fn reset_filter(&mut self) {
        self.a = Matrix::identity(4);

        // Jacobian matrix of partial derivatives dfi / dwj
        self.w = Matrix::from_rows(&[&[0., 0.], &[0., 0.], &[1., 0.], &[0., 1.]]);

        // Observation matrix, jacobian of observation function h
        // angle = atan2 (lat,lon) * self.spokes / (2 * pi) + v1
        // r = sqrt(x * x + y * y) + v2
        // V, dhi / dvj, is the identity matrix and left out
        self.h = Matrix::new(2, 4);

        // P estimate error covariance
        self.p = Matrix::diag(&[20., 20., 4., 4.]);

        self.maneuvring = false;
        self.turn_rate = 0.;
        self.last_course = None;
        self.delta_time = 0.;
    }

    pub fn is_maneuvring(&self) -> bool {
        self.maneuvring
    }

    pub fn turn_rate(&self) -> f64 {
        self.turn_rate
    }

    pub fn p(&self) -> &Matrix {
        &self.p
    }

    pub fn set_p(&mut self, p: Matrix) -> Result<(), MatrixError> {
        if p.rows() != 4 || p.cols() != 4 {
            return Err(MatrixError::DimensionMismatch(p.rows(), p.cols(), 4, 4));
        }
        self.p = p;
        Ok(())
    }

    pub fn sd_speed(&self) -> f64 {
        ((self.p.at(2, 2) + self.p.at(3, 3)) / 2.).sqrt() // rough approximation of standard dev of speed
    }

    pub fn predict(&mut self, xx: &mut LocalPosition, delta_time: f64) {
        self.delta_time = delta_time;

        // the speed vector turns by the estimated rate of turn
        let theta = self.turn_rate * delta_time;
        let (jac_b, jac_a) = theta.sin_cos();
        self.a = Matrix::from_rows(&[
            &[1., 0., delta_time, 0.],
            &[0., 1., 0., delta_time],
            &[0., 0., jac_a, -jac_b],
            &[0., 0., jac_b, jac_a],
        ]);

        let x = &self.a * &xx.to_state();
        xx.set_state(&x);
        xx.sd_speed_m_s = self.sd_speed();
    }

    /// Calculate apriori P.
    /// Separate from `predict` so the update is done once when a target is searched in several passes.
    pub fn update_p(&mut self) {
        let q = if self.maneuvring { &self.q2 } else { &self.q1 };
        self.p = &(&(&self.a * &self.p) * &self.a.transpose()) + &(&(&self.w * q) * &self.w.transpose());
    }

    /// Correct the predicted `local_position` with the measured polar position `pol`.
    /// `expected` is the predicted position in polar coordinates.
    ///
    /// When the innovation covariance cannot be inverted the prediction is kept
    /// unmodified and the error is returned.
    pub fn set_measurement(
        &mut self,
        pol: &Polar,
        local_position: &mut LocalPosition,
        expected: &Polar,
        pixels_per_meter: f64,
    ) -> Result<Innovation, MatrixError> {
        let lat = local_position.lat;
        let lon = local_position.lon;
        let q_sum = lon * lon + lat * lat;

        let c = self.spokes / (2. * PI);
        self.h.set(0, 0, -c * lon / q_sum)?;
        self.h.set(0, 1, c * lat / q_sum)?;

        let q_sum = q_sum.sqrt();
        self.h.set(1, 0, lat / q_sum * pixels_per_meter)?;
        self.h.set(1, 1, lon / q_sum * pixels_per_meter)?;

        // Z is difference between measured and expected
        let mut a = (pol.angle - expected.angle) as f64;
        if a > self.spokes / 2. {
            a -= self.spokes;
        }
        if a < -self.spokes / 2. {
            a += self.spokes;
        }
        let b = (pol.r - expected.r) as f64;
        let z = Matrix::column(&[a, b]);

        let ht = self.h.transpose();
        let s = &(&(&self.h * &self.p) * &ht) + &self.r;

        // leave out an axis whose innovation is beyond 2 sigma
        let mut h1 = self.h.clone();
        let sd = [s.get(0, 0)?.sqrt(), s.get(1, 1)?.sqrt()];
        let gated = [a.abs() > 2. * sd[0], b.abs() > 2. * sd[1]];
        for (row, g) in gated.iter().enumerate() {
            if *g {
                h1.zero_row(row)?;
            }
        }
        self.maneuvring = gated[0] || gated[1];

        let s_inv = s.inverse().inspect_err(|e| {
            log::warn!("Kalman update skipped: {}", e);
        })?;

        let k = &(&self.p * &h1.transpose()) * &s_inv;
        let x = &local_position.to_state() + &(&k * &z);
        let p = &self.p - &(&(&k * &self.h) * &self.p);
        if x.is_empty() || p.is_empty() {
            return Err(MatrixError::Empty);
        }
        local_position.set_state(&x);
        self.p = p;
        local_position.sd_speed_m_s = self.sd_speed();

        self.track_turn_rate(local_position);

        Ok(Innovation { z: [a, b], sd, gated })
    }

    /// While maneuvring the rate of turn follows the change of course between
    /// updates, otherwise the model goes straight.
    fn track_turn_rate(&mut self, x: &LocalPosition) {
        let speed = (x.dlat_dt * x.dlat_dt + x.dlon_dt * x.dlon_dt).sqrt();
        if speed < MIN_TURN_SPEED {
            self.turn_rate = 0.;
            self.last_course = None;
            return;
        }
        let course = f64::atan2(x.dlon_dt, x.dlat_dt);
        self.turn_rate = match self.last_course {
            Some(last) if self.maneuvring && self.delta_time > 0. => {
                let mut change = course - last;
                if change > PI {
                    change -= 2. * PI;
                }
                if change < -PI {
                    change += 2. * PI;
                }
                (change / self.delta_time).clamp(-self.max_turn_rate, self.max_turn_rate)
            }
            _ => 0.,
        };
        self.last_course = Some(course);
    }
}
