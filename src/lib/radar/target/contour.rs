use std::{
    cmp::{max, min},
    f64::consts::PI,
};

use thiserror::Error;

use super::kalman::Polar;
use super::{Doppler, DISTANCE_BETWEEN_TARGETS, MAX_CONTOUR_LENGTH, MIN_CONTOUR_LENGTH};
use crate::radar::history::{HistoryPixel, PixelSource};

const SHADOW_MARGIN: i32 = 5;
const TARGET_DISTANCE_FOR_BLANKING_SHADOW: f64 = 6000.; // 6 km
const MIN_CONTOUR_FOR_SHADOW: usize = 20;

// the 4 possible translations to move from a point on the contour to the next
const FOUR_DIRECTIONS: [Polar; 4] = [
    Polar {
        angle: 0,
        r: 1,
        time: 0,
    },
    Polar {
        angle: 1,
        r: 0,
        time: 0,
    },
    Polar {
        angle: 0,
        r: -1,
        time: 0,
    },
    Polar {
        angle: -1,
        r: 0,
        time: 0,
    },
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContourError {
    #[error("Range too high")]
    RangeTooHigh,
    #[error("Range too low")]
    RangeTooLow,
    #[error("No echo at start point")]
    NoEchoAtStart,
    #[error("Start point is not on the contour")]
    StartPointNotOnContour,
    #[error("Contour is broken")]
    BrokenContour,
    #[error("No contour found")]
    NoContourFound,
}

///
/// The boundary of one blob.
///
/// `min_angle` and `max_angle` are not wrapped: a blob straddling bearing 0
/// has a negative `min_angle` or a `max_angle` beyond the number of spokes.
/// The points themselves are wrapped.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contour {
    pub min_angle: i32,
    pub max_angle: i32,
    pub min_r: i32,
    pub max_r: i32,
    pub position: Polar,
    pub points: Vec<Polar>,
}

impl Contour {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelCount {
    pub total: u32,
    pub approaching: u32,
    pub receding: u32,
}

///
/// Blob search on a thresholded polar image.
///
pub trait ContourSearch: PixelSource {
    /// Checks if the blob that `(ang, rad)` is on has a contour of at least
    /// MIN_CONTOUR_LENGTH. The start must be on the contour of the blob.
    /// A blob that is too small is erased so it is not checked again.
    fn multi_pix(&mut self, doppler: Doppler, ang: i32, rad: i32) -> bool {
        if !self.pix(doppler, ang, rad) {
            return false;
        }
        let start = Polar::new(ang, rad, 0);
        let mut current = start;

        let mut max_angle = current.angle;
        let mut min_angle = current.angle;
        let mut max_r = current.r;
        let mut min_r = current.r;
        let mut count = 0;

        // first find the orientation of border point p
        let Some(index) = FOUR_DIRECTIONS
            .iter()
            .position(|d| !self.pix(doppler, current.angle + d.angle, current.r + d.r))
        else {
            return false; // inside a blob
        };
        let mut index = (index + 1) % 4; // determines starting direction

        while current.r != start.r || current.angle != start.angle || count == 0 {
            // start with the "left most" translation relative to the previous one
            index = (index + 3) % 4;
            let mut found = false;
            for _ in 0..4 {
                let next = current + FOUR_DIRECTIONS[index];
                if self.pix(doppler, next.angle, next.r) {
                    found = true;
                    break;
                }
                index = (index + 1) % 4;
            }
            if !found {
                return false; // single pixel blob
            }
            current = current + FOUR_DIRECTIONS[index];
            if count >= MIN_CONTOUR_LENGTH {
                return true;
            }
            count += 1;
            max_angle = max(max_angle, current.angle);
            min_angle = min(min_angle, current.angle);
            max_r = max(max_r, current.r);
            min_r = min(min_r, current.r);
        }

        // contour length is less than MIN_CONTOUR_LENGTH, erase this blob
        for a in min_angle..=max_angle {
            for r in min_r..=max_r {
                if let Some(p) = self.pixel(a, r) {
                    self.set_pixel(a, r, p & (HistoryPixel::NO_TARGET | HistoryPixel::CONTOUR));
                }
            }
        }
        false
    }

    /// Moves `pol` to the contour of the blob it is in.
    /// True when that blob is large enough.
    fn find_contour_from_inside(&mut self, doppler: Doppler, pol: &mut Polar) -> bool {
        let mut ang = pol.angle;
        let rad = pol.r;
        let mut limit = self.spokes() / 8;

        if !self.pix(doppler, ang, rad) {
            return false;
        }
        while limit >= 0 && self.pix(doppler, ang, rad) {
            ang -= 1;
            limit -= 1;
        }
        ang += 1;
        pol.angle = ang;

        self.multi_pix(doppler, ang, rad)
    }

    fn pix2(&mut self, doppler: Doppler, pol: &mut Polar, a: i32, r: i32) -> bool {
        if self.multi_pix(doppler, a, r) {
            pol.angle = a;
            pol.r = r;
            return true;
        }
        false
    }

    /// Search along squares of growing size around `pol` for the nearest blob.
    /// `dist` is the search radius in radial pixels.
    fn find_nearest_contour(&mut self, doppler: Doppler, pol: &mut Polar, dist: i32) -> bool {
        let a = pol.angle;
        let r = pol.r;
        let distance = max(dist, 2);
        let factor = self.spokes() as f64 / 2.0 / PI;
        let max_dist_a = max(self.spokes() / 4, 1);

        for j in 1..=distance {
            let dist_r = j;
            let dist_a = (factor / max(r, 1) as f64 * j as f64) as i32;
            let dist_a = dist_a.clamp(1, max_dist_a);
            // search starting from the middle
            for i in 0..=dist_a {
                // "upper" side
                if self.pix2(doppler, pol, a - i, r + dist_r) {
                    return true;
                }
                if self.pix2(doppler, pol, a + i, r + dist_r) {
                    return true;
                }
            }
            for i in 0..dist_r {
                // "right hand" side
                if self.pix2(doppler, pol, a + dist_a, r + i) {
                    return true;
                }
                if self.pix2(doppler, pol, a + dist_a, r - i) {
                    return true;
                }
            }
            for i in 0..=dist_a {
                // "lower" side
                if self.pix2(doppler, pol, a - i, r - dist_r) {
                    return true;
                }
                if self.pix2(doppler, pol, a + i, r - dist_r) {
                    return true;
                }
            }
            for i in 0..dist_r {
                // "left hand" side
                if self.pix2(doppler, pol, a - dist_a, r + i) {
                    return true;
                }
                if self.pix2(doppler, pol, a - dist_a, r - i) {
                    return true;
                }
            }
        }
        false
    }

    ///
    /// Follow the contour clockwise from `pol`, a point on the edge of a blob.
    ///
    /// Returns the contour and its centre. A contour that does not close
    /// within MAX_CONTOUR_LENGTH points is cut off there, with the start
    /// point appended.
    ///
    fn get_contour(&self, doppler: Doppler, pol: Polar) -> Result<(Contour, Polar), ContourError> {
        let start = Polar::new(self.mod_spokes(pol.angle), pol.r, pol.time);
        let mut current = start;
        let mut count = 0;

        let mut contour = Contour {
            min_angle: current.angle,
            max_angle: current.angle,
            min_r: current.r,
            max_r: current.r,
            ..Default::default()
        };

        if pol.r >= self.spoke_len() {
            return Err(ContourError::RangeTooHigh);
        }
        if pol.r < 4 {
            return Err(ContourError::RangeTooLow);
        }
        if !self.pix(doppler, start.angle, start.r) {
            return Err(ContourError::NoEchoAtStart);
        }

        // first find the orientation of border point p
        let index = FOUR_DIRECTIONS
            .iter()
            .position(|d| !self.pix(doppler, current.angle + d.angle, current.r + d.r))
            .ok_or(ContourError::StartPointNotOnContour)?;
        let mut index = (index + 1) % 4; // determines starting direction

        while (current.angle != start.angle || current.r != start.r || count == 0)
            && count < MAX_CONTOUR_LENGTH
        {
            // we will turn left all the time if possible
            index = (index + 3) % 4;
            let mut found = false;
            for _ in 0..4 {
                let next = current + FOUR_DIRECTIONS[index];
                if self.pix(doppler, next.angle, next.r) {
                    found = true;
                    break;
                }
                index = (index + 1) % 4;
            }
            if !found {
                return Err(ContourError::BrokenContour);
            }
            current = current + FOUR_DIRECTIONS[index];
            contour
                .points
                .push(Polar::new(self.mod_spokes(current.angle), current.r, 0));
            if count == MAX_CONTOUR_LENGTH - 1 {
                contour.points.push(start); // shortcut to the beginning for drawing the contour
            }
            contour.max_angle = max(contour.max_angle, current.angle);
            contour.min_angle = min(contour.min_angle, current.angle);
            contour.max_r = max(contour.max_r, current.r);
            contour.min_r = min(contour.min_r, current.r);
            count += 1;
        }

        let angle = self.mod_spokes((contour.max_angle + contour.min_angle) / 2);
        let centre = Polar::new(
            angle,
            (contour.max_r + contour.min_r) / 2,
            self.spoke_time(angle),
        );
        contour.position = centre;

        Ok((contour, centre))
    }

    /// Locate the blob at or near `pol`, searching up to `dist` pixels away.
    fn get_target(
        &mut self,
        doppler: Doppler,
        pol: Polar,
        dist: i32,
    ) -> Result<(Contour, Polar), ContourError> {
        let mut pol = pol;
        let dist = min(dist, pol.r - 5);

        let contour_found = if self.pix(doppler, pol.angle, pol.r) {
            self.find_contour_from_inside(doppler, &mut pol)
        } else {
            self.find_nearest_contour(doppler, &mut pol, dist)
        };
        if !contour_found {
            return Err(ContourError::NoContourFound);
        }
        self.get_contour(doppler, pol)
    }

    ///
    /// Clear the blob plus DISTANCE_BETWEEN_TARGETS around it, so it is not
    /// found again in the same sweep. For larger targets close by the radial
    /// shadow behind the target is cleared as well. The contour is drawn.
    ///
    fn reset_pixels(&mut self, contour: &Contour, pos: &Polar, pixels_per_meter: f64) {
        let last_r = self.spoke_len() - 1;
        for a in contour.min_angle - DISTANCE_BETWEEN_TARGETS
            ..=contour.max_angle + DISTANCE_BETWEEN_TARGETS
        {
            for r in max(contour.min_r - DISTANCE_BETWEEN_TARGETS, 0)
                ..=min(contour.max_r + DISTANCE_BETWEEN_TARGETS, last_r)
            {
                // also clears both Doppler bits
                if let Some(p) = self.pixel(a, r) {
                    self.set_pixel(a, r, p & HistoryPixel::BACKUP);
                }
            }
        }

        let distance_to_radar = pos.r as f64 / pixels_per_meter;
        if contour.len() > MIN_CONTOUR_FOR_SHADOW
            && distance_to_radar < TARGET_DISTANCE_FOR_BLANKING_SHADOW
        {
            for a in contour.min_angle - SHADOW_MARGIN..=contour.max_angle + SHADOW_MARGIN {
                for r in contour.max_r..=min(4 * contour.max_r, last_r) {
                    if let Some(p) = self.pixel(a, r) {
                        self.set_pixel(a, r, p & HistoryPixel::BACKUP);
                    }
                }
            }
        }

        for p in &contour.points {
            if let Some(pixel) = self.pixel(p.angle, p.r) {
                self.set_pixel(p.angle, p.r, pixel | HistoryPixel::CONTOUR);
            }
        }
    }

    ///
    /// Count the pixels in the target, and the approaching and receding ones.
    ///
    /// Moves outwards from every contour point while the pixel is above
    /// threshold. Pixels on the far border are counted more than once.
    ///
    fn pixel_counter(&self, contour: &Contour) -> PixelCount {
        let mut count = PixelCount::default();
        for p in &contour.points {
            for r in p.r..self.spoke_len() {
                let Some(pixel) = self.pixel(p.angle, r) else {
                    break;
                };
                if !pixel.contains(HistoryPixel::TARGET) {
                    break;
                }
                count.total += 1;
                count.approaching += pixel.contains(HistoryPixel::APPROACHING) as u32;
                count.receding += pixel.contains(HistoryPixel::RECEDING) as u32;
            }
        }
        count
    }
}

impl<T: PixelSource + ?Sized> ContourSearch for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::history::HistorySpokes;

    fn history() -> HistorySpokes {
        HistorySpokes::new(2048, 1024, false)
    }

    #[test]
    fn small_square_contour() {
        let mut h = history();
        h.fill(10..=14, 20..=24, HistoryPixel::INITIAL);

        let (contour, centre) = h.get_contour(Doppler::Any, Polar::new(10, 22, 0)).unwrap();
        assert_eq!(contour.len(), 16);
        assert_eq!(
            (contour.min_angle, contour.max_angle, contour.min_r, contour.max_r),
            (10, 14, 20, 24)
        );
        assert_eq!((centre.angle, centre.r), (12, 22));
        assert_eq!(contour.points.last().map(|p| (p.angle, p.r)), Some((10, 22)));
    }

    #[test]
    fn contour_across_north() {
        let mut h = history();
        h.fill(-3..=4, 100..=105, HistoryPixel::INITIAL);

        let (contour, centre) = h.get_contour(Doppler::Any, Polar::new(-3, 102, 0)).unwrap();
        assert_eq!(contour.len(), 24);
        assert_eq!((contour.min_angle, contour.max_angle), (2045, 2052));
        assert_eq!((centre.angle, centre.r), (0, 102));
        assert!(contour.points.iter().all(|p| p.angle >= 0 && p.angle < 2048));
    }

    #[test]
    fn contour_is_capped() {
        let mut h = history();
        h.fill(100..=1099, 10..=609, HistoryPixel::INITIAL);

        let start = Polar::new(100, 300, 0);
        let (contour, _) = h.get_contour(Doppler::Any, start).unwrap();
        assert_eq!(contour.len(), MAX_CONTOUR_LENGTH + 1);
        assert_eq!(contour.points.last(), Some(&start));
    }

    #[test]
    fn contour_errors() {
        let mut h = history();
        h.fill(10..=10, 20..=20, HistoryPixel::INITIAL);
        h.fill(30..=34, 2..=8, HistoryPixel::INITIAL);
        assert_eq!(
            h.get_contour(Doppler::Any, Polar::new(10, 20, 0)),
            Err(ContourError::BrokenContour)
        );
        assert_eq!(
            h.get_contour(Doppler::Any, Polar::new(11, 20, 0)),
            Err(ContourError::NoEchoAtStart)
        );
        assert_eq!(
            h.get_contour(Doppler::Any, Polar::new(32, 6, 0)),
            Err(ContourError::StartPointNotOnContour)
        );
        assert_eq!(
            h.get_contour(Doppler::Any, Polar::new(32, 3, 0)),
            Err(ContourError::RangeTooLow)
        );
        assert_eq!(
            h.get_contour(Doppler::Any, Polar::new(32, 1024, 0)),
            Err(ContourError::RangeTooHigh)
        );
    }

    #[test]
    fn multi_pix_erases_small_blobs() {
        let mut h = history();
        h.fill(10..=11, 20..=20, HistoryPixel::INITIAL);
        h.fill(50..=54, 20..=24, HistoryPixel::INITIAL);

        assert!(!h.multi_pix(Doppler::Any, 10, 20));
        assert!(!h.pix(Doppler::Any, 10, 20));
        assert!(!h.pix(Doppler::Any, 11, 20));

        assert!(h.multi_pix(Doppler::Any, 50, 22));
        assert!(h.pix(Doppler::Any, 50, 22));
    }

    #[test]
    fn target_found_near_expected_position() {
        let mut h = history();
        h.fill(200..=205, 300..=306, HistoryPixel::INITIAL);

        // from inside the blob
        let (contour, centre) = h.get_target(Doppler::Any, Polar::new(203, 303, 0), 10).unwrap();
        assert_eq!((centre.angle, centre.r), (202, 303));
        assert_eq!(contour.min_angle, 200);

        // a few pixels off
        let (_, centre) = h.get_target(Doppler::Any, Polar::new(203, 296, 0), 10).unwrap();
        assert_eq!((centre.angle, centre.r), (202, 303));

        // too far off
        assert_eq!(
            h.get_target(Doppler::Any, Polar::new(203, 280, 0), 10),
            Err(ContourError::NoContourFound)
        );
    }

    #[test]
    fn doppler_class_limits_search() {
        let mut h = history();
        h.fill(200..=205, 300..=306, HistoryPixel::INITIAL);
        assert!(h.get_target(Doppler::Approaching, Polar::new(203, 303, 0), 10).is_err());
        h.fill(
            200..=205,
            300..=306,
            HistoryPixel::INITIAL | HistoryPixel::APPROACHING,
        );
        assert!(h.get_target(Doppler::Approaching, Polar::new(203, 303, 0), 10).is_ok());
        assert!(h.get_target(Doppler::Receding, Polar::new(203, 303, 0), 10).is_err());
    }

    #[test]
    fn reset_clears_blob_and_draws_contour() {
        let mut h = history();
        h.fill(200..=205, 300..=306, HistoryPixel::INITIAL);
        h.fill(220..=222, 300..=302, HistoryPixel::INITIAL);
        let (contour, centre) = h.get_target(Doppler::Any, Polar::new(203, 303, 0), 10).unwrap();

        h.reset_pixels(&contour, &centre, 0.1);
        assert!(!h.pix(Doppler::Any, 203, 303));
        // the neighbour within DISTANCE_BETWEEN_TARGETS is gone too
        assert!(!h.pix(Doppler::Any, 221, 301));
        assert!(h.pix(Doppler::AnyPlus, 203, 303));
        let p = contour.points[0];
        assert!(h.pixel(p.angle, p.r).unwrap().contains(HistoryPixel::CONTOUR));
    }

    #[test]
    fn shadow_is_cleared_behind_large_targets() {
        let mut h = history();
        h.fill(200..=209, 100..=109, HistoryPixel::INITIAL);
        h.fill(204..=205, 300..=300, HistoryPixel::INITIAL);
        let (contour, centre) = h.get_target(Doppler::Any, Polar::new(205, 105, 0), 10).unwrap();
        assert!(contour.len() > MIN_CONTOUR_FOR_SHADOW);

        // 1 pixel per meter, the target is close
        h.reset_pixels(&contour, &centre, 1.0);
        assert!(!h.pix(Doppler::Any, 204, 300));
    }

    #[test]
    fn pixels_are_counted_per_doppler_class() {
        let mut h = history();
        h.fill(200..=205, 300..=305, HistoryPixel::INITIAL);
        h.fill(
            200..=202,
            300..=305,
            HistoryPixel::INITIAL | HistoryPixel::APPROACHING,
        );
        let (contour, _) = h.get_target(Doppler::Any, Polar::new(203, 303, 0), 10).unwrap();
        let count = h.pixel_counter(&contour);
        assert!(count.total > 0);
        assert!(count.approaching > 0);
        assert!(count.approaching < count.total);
        assert_eq!(count.receding, 0);
    }
}
