use bitflags::bitflags;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::target::Doppler;
use super::GeoPosition;

// Number of consecutive rotations a pixel must be lit to count as stationary
const STATIONARY_HITS: u8 = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct HistoryPixel: u8 {
        /// Above threshold
        const TARGET = 0b10000000;
        /// Above threshold, not cleared when a target is refreshed
        const BACKUP = 0b01000000;
        /// Doppler approaching
        const APPROACHING = 0b00100000;
        /// Doppler receding
        const RECEDING = 0b00010000;
        /// Part of a target contour, drawn on the next sweep
        const CONTOUR = 0b00001000;

        const INITIAL = Self::TARGET.bits() | Self::BACKUP.bits();
        const NO_TARGET = !(Self::INITIAL.bits());
    }
}

///
/// What the pixel values in a spoke mean.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legend {
    pub border: u8,
    pub doppler_approaching: u8,
    pub doppler_receding: u8,
    pub strong_return: u8,
}

impl Legend {
    /// Layout for a radar sending `pixel_values` intensities: the intensities,
    /// one black value, the target border and then the Doppler values.
    pub fn new(pixel_values: u8, doppler: bool) -> Self {
        let pixel_values = pixel_values.min(255 - 32 - 2);
        let mut legend = Legend {
            border: 255,
            doppler_approaching: 255,
            doppler_receding: 255,
            strong_return: 255,
        };
        if pixel_values == 0 {
            return legend;
        }

        let one_third = (pixel_values - 1) / 3;
        legend.strong_return = one_third * 2;
        legend.border = pixel_values + 1;
        if doppler {
            legend.doppler_approaching = pixel_values + 2;
            legend.doppler_receding = pixel_values + 3;
        }
        log::debug!("Created legend {:?}", legend);
        legend
    }

    pub fn with_threshold(mut self, threshold: Option<u8>) -> Self {
        if let Some(t) = threshold {
            self.strong_return = t;
        }
        self
    }
}

///
/// Thresholded view of one rotation of the radar, as used by the contour search.
///
pub trait PixelSource {
    fn spokes(&self) -> i32;
    fn spoke_len(&self) -> i32;

    /// The pixel at a wrapped angle, `None` when `r` is off the spoke.
    fn pixel(&self, angle: i32, r: i32) -> Option<HistoryPixel>;
    fn set_pixel(&mut self, angle: i32, r: i32, pixel: HistoryPixel);

    /// Time the spoke at `angle` was received, in millis
    fn spoke_time(&self, angle: i32) -> u64;
    /// Position of the radar when the spoke at `angle` was received
    fn spoke_pos(&self, angle: i32) -> GeoPosition;

    fn is_stationary(&self, _angle: i32, _r: i32) -> bool {
        false
    }

    fn mod_spokes(&self, angle: i32) -> i32 {
        angle.rem_euclid(self.spokes())
    }

    /// Is this pixel part of a target of the given Doppler class?
    fn pix(&self, doppler: Doppler, angle: i32, r: i32) -> bool {
        if r < 3 || r >= self.spoke_len() {
            return false;
        }
        if self.is_stationary(angle, r) {
            return false;
        }
        let Some(history) = self.pixel(angle, r) else {
            return false;
        };
        let target = history.contains(HistoryPixel::TARGET);
        let backup = history.contains(HistoryPixel::BACKUP);
        let approaching = history.contains(HistoryPixel::APPROACHING);
        let receding = history.contains(HistoryPixel::RECEDING);

        match doppler {
            Doppler::Any => target,
            Doppler::NoDoppler => target && !approaching && !receding,
            Doppler::Approaching => approaching,
            Doppler::Receding => receding,
            Doppler::AnyDoppler => approaching || receding,
            Doppler::NotReceding => target && !receding,
            Doppler::NotApproaching => target && !approaching,
            Doppler::AnyPlus => backup,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistorySpokes {
    sweep: Array2<HistoryPixel>,
    time: Vec<u64>,
    pos: Vec<GeoPosition>,
    stationary_layer: Option<Array2<u8>>,
}

impl HistorySpokes {
    pub fn new(spokes: usize, spoke_len: usize, stationary: bool) -> Self {
        log::debug!(
            "creating HistorySpokes ({} x {}) stationary: {}",
            spokes,
            spoke_len,
            stationary
        );
        Self {
            sweep: Array2::from_elem((spokes, spoke_len), HistoryPixel::empty()),
            time: vec![0; spokes],
            pos: vec![GeoPosition::default(); spokes],
            stationary_layer: if stationary {
                Some(Array2::<u8>::zeros((spokes, spoke_len)))
            } else {
                None
            },
        }
    }

    /// Forget everything, used when the range changes.
    pub fn reset(&mut self) {
        self.sweep.fill(HistoryPixel::empty());
        self.time.fill(0);
        self.pos.fill(GeoPosition::default());
        if let Some(layer) = self.stationary_layer.as_mut() {
            layer.fill(0);
        }
    }

    ///
    /// Store one spoke of intensities. Contours drawn in the previous
    /// rotation are copied into `data` as border pixels.
    ///
    pub fn process_spoke(
        &mut self,
        angle: usize,
        data: &mut [u8],
        time: u64,
        pos: GeoPosition,
        legend: &Legend,
    ) {
        let (spokes, spoke_len) = self.sweep.dim();
        if angle >= spokes {
            log::warn!("Spoke angle {} out of range 0..{}", angle, spokes);
            return;
        }
        self.time[angle] = time;
        self.pos[angle] = pos;

        for (radius, value) in data.iter_mut().enumerate().take(spoke_len) {
            let cell = &mut self.sweep[[angle, radius]];
            let had_contour = cell.contains(HistoryPixel::CONTOUR);

            let mut pixel = HistoryPixel::empty();
            let hit = *value >= legend.strong_return;
            if hit {
                pixel = HistoryPixel::INITIAL;
            }
            if *value == legend.doppler_approaching {
                pixel.insert(HistoryPixel::APPROACHING);
            }
            if *value == legend.doppler_receding {
                pixel.insert(HistoryPixel::RECEDING);
            }
            *cell = pixel;

            if let Some(layer) = self.stationary_layer.as_mut() {
                let count = &mut layer[[angle, radius]];
                *count = if hit {
                    count.saturating_add(1)
                } else {
                    count.saturating_sub(1)
                };
            }

            if had_contour {
                *value = legend.border;
            }
        }
        for radius in data.len()..spoke_len {
            self.sweep[[angle, radius]] = HistoryPixel::empty();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_spoke_meta(&mut self, angle: i32, time: u64, pos: GeoPosition) {
        let angle = self.mod_spokes(angle) as usize;
        self.time[angle] = time;
        self.pos[angle] = pos;
    }

    #[cfg(test)]
    pub(crate) fn fill(
        &mut self,
        angles: std::ops::RangeInclusive<i32>,
        rs: std::ops::RangeInclusive<i32>,
        pixel: HistoryPixel,
    ) {
        for a in angles {
            for r in rs.clone() {
                self.set_pixel(a, r, pixel);
            }
        }
    }
}

impl PixelSource for HistorySpokes {
    fn spokes(&self) -> i32 {
        self.sweep.dim().0 as i32
    }

    fn spoke_len(&self) -> i32 {
        self.sweep.dim().1 as i32
    }

    fn pixel(&self, angle: i32, r: i32) -> Option<HistoryPixel> {
        if r < 0 {
            return None;
        }
        self.sweep
            .get([self.mod_spokes(angle) as usize, r as usize])
            .copied()
    }

    fn set_pixel(&mut self, angle: i32, r: i32, pixel: HistoryPixel) {
        if r < 0 {
            return;
        }
        let angle = self.mod_spokes(angle) as usize;
        if let Some(cell) = self.sweep.get_mut([angle, r as usize]) {
            *cell = pixel;
        }
    }

    fn spoke_time(&self, angle: i32) -> u64 {
        self.time[self.mod_spokes(angle) as usize]
    }

    fn spoke_pos(&self, angle: i32) -> GeoPosition {
        self.pos[self.mod_spokes(angle) as usize]
    }

    fn is_stationary(&self, angle: i32, r: i32) -> bool {
        match &self.stationary_layer {
            Some(layer) => layer
                .get([self.mod_spokes(angle) as usize, r as usize])
                .is_some_and(|count| *count >= STATIONARY_HITS),
            None => false,
        }
    }
}
