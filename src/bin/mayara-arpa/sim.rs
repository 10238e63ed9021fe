use std::f64::consts::PI;

use mayara::radar::NAUTICAL_MILE_F64;
use mayara::radar::history::Legend;

/// A simulated vessel, moving in a straight line at constant speed.
/// Position is relative to the own ship in meters.
#[derive(Clone, Debug, PartialEq)]
pub struct SimVessel {
    pub north: f64,
    pub east: f64,
    pub v_north: f64, // m/s
    pub v_east: f64,  // m/s
    pub size: f64,    // m
}

impl SimVessel {
    fn at(&self, seconds: f64) -> (f64, f64) {
        (
            self.north + self.v_north * seconds,
            self.east + self.v_east * seconds,
        )
    }
}

///
/// A radar on an anchored ship with a few vessels around it.
///
#[derive(Clone, Debug)]
pub struct Simulator {
    spokes: usize,
    spoke_len: usize,
    rotation_ms: u64,
    start_time: u64,
    pub vessels: Vec<SimVessel>,
}

impl Simulator {
    /// `count` vessels spread around the own ship between 40% and 80%
    /// of `max_range`, heading in various directions at 4 to 12 knots.
    pub fn new(
        spokes: usize,
        spoke_len: usize,
        rotation_ms: u64,
        start_time: u64,
        count: usize,
        max_range: f64,
    ) -> Self {
        let vessels = (0..count)
            .map(|i| {
                let bearing = (30. + 360. * i as f64 / count as f64).to_radians();
                let range = max_range * (0.4 + 0.4 * ((i % 3) as f64 / 2.));
                let course = (bearing.to_degrees() + 90. + 45. * i as f64).to_radians();
                let speed = (4. + 4. * (i % 3) as f64) * NAUTICAL_MILE_F64 / 3600.;
                SimVessel {
                    north: range * bearing.cos(),
                    east: range * bearing.sin(),
                    v_north: speed * course.cos(),
                    v_east: speed * course.sin(),
                    size: 30.,
                }
            })
            .collect();

        Simulator {
            spokes,
            spoke_len,
            rotation_ms,
            start_time,
            vessels,
        }
    }

    pub fn spokes(&self) -> usize {
        self.spokes
    }

    /// Time, in millis since the epoch, that `angle` is received in `sweep`
    pub fn spoke_time(&self, sweep: u64, angle: usize) -> u64 {
        self.start_time
            + sweep * self.rotation_ms
            + angle as u64 * self.rotation_ms / self.spokes as u64
    }

    ///
    /// The spoke at true bearing `angle` for a radar with range `range` meters.
    /// Vessels show with the strongest intensity, or with the Doppler
    /// value when the legend has them and the vessel moves towards or
    /// away from the radar.
    ///
    pub fn spoke(&self, angle: usize, range: u32, time: u64, legend: &Legend) -> Vec<u8> {
        let mut data = vec![0u8; self.spoke_len];
        if range == 0 {
            return data;
        }
        let meters_per_pixel = range as f64 / self.spoke_len as f64;
        let bearing = angle as f64 * 2. * PI / self.spokes as f64;
        let (sin, cos) = bearing.sin_cos();
        let seconds = time.saturating_sub(self.start_time) as f64 / 1000.;

        for vessel in self.vessels.iter() {
            let (north, east) = vessel.at(seconds);
            let radius = vessel.size / 2.;
            // distance along and across the beam
            let along = north * cos + east * sin;
            let across = -north * sin + east * cos;
            if across.abs() > radius || along <= 0. {
                continue;
            }
            let half = (radius * radius - across * across).sqrt();
            let first = ((along - half) / meters_per_pixel).max(0.) as usize;
            let last = (((along + half) / meters_per_pixel) as usize).min(self.spoke_len - 1);
            if first > last {
                continue;
            }

            let radial_speed = (vessel.v_north * north + vessel.v_east * east) / along.max(1.);
            let value = if radial_speed < -1. && legend.doppler_approaching != 255 {
                legend.doppler_approaching
            } else if radial_speed > 1. && legend.doppler_receding != 255 {
                legend.doppler_receding
            } else {
                legend.border - 2
            };
            for v in data[first..=last].iter_mut() {
                *v = value;
            }
        }
        data
    }
}
