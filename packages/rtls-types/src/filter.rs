//! Coordinate filters (spec §4.5): three variants sharing a common
//! `{reset, update, value, avg, var, std}` contract, grounded in
//! `examples/original_source/server/coord.py` / `server/filter.py`.

use crate::coord::Coord3;
use std::collections::VecDeque;

pub trait CoordinateFilter {
    fn reset(&mut self);
    fn update(&mut self, v: Coord3);
    fn value(&self) -> Coord3;
    fn avg(&self) -> Coord3;
    fn var(&self) -> f64;
    fn std(&self) -> f64 {
        self.var().sqrt()
    }
}

/// Running window mean of the last `length` samples. `server/coord.py`'s
/// `CoordAvgFilter` references an undefined `data.popleft()` (spec §9 Open
/// Question); this substitutes a bounded `VecDeque` with FIFO eviction.
#[derive(Debug, Clone)]
pub struct RunningMeanFilter {
    length: usize,
    data: VecDeque<Coord3>,
}

impl RunningMeanFilter {
    pub fn new(length: usize) -> Self {
        Self { length, data: VecDeque::with_capacity(length) }
    }
}

impl CoordinateFilter for RunningMeanFilter {
    fn reset(&mut self) {
        self.data.clear();
    }

    fn update(&mut self, v: Coord3) {
        self.data.push_back(v);
        while self.data.len() > self.length {
            self.data.pop_front();
        }
    }

    fn value(&self) -> Coord3 {
        self.avg()
    }

    fn avg(&self) -> Coord3 {
        if self.data.is_empty() {
            return Coord3::ZERO;
        }
        let n = self.data.len() as f64;
        let sum = self.data.iter().fold(Coord3::ZERO, |acc, v| acc + *v);
        Coord3::new(sum.x / n, sum.y / n, sum.z / n)
    }

    fn var(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.avg();
        let n = self.data.len() as f64;
        self.data.iter().map(|v| (*v - mean).norm().powi(2)).sum::<f64>() / n
    }
}

/// Geometric IIR mean/variance, mirroring `CoordGeoFilter`:
/// `val_filt += (v - val_filt) / min(count, N)`,
/// `var_filt += (‖v - val_filt‖² - var_filt) / min(count, N)`.
#[derive(Debug, Clone)]
pub struct GeoFilter {
    length: usize,
    count: usize,
    val_filt: Coord3,
    var_filt: f64,
}

impl GeoFilter {
    pub fn new(length: usize) -> Self {
        Self { length, count: 0, val_filt: Coord3::ZERO, var_filt: 0.0 }
    }
}

impl CoordinateFilter for GeoFilter {
    fn reset(&mut self) {
        self.count = 0;
        self.val_filt = Coord3::ZERO;
        self.var_filt = 0.0;
    }

    fn update(&mut self, v: Coord3) {
        self.count += 1;
        let flen = self.count.min(self.length) as f64;
        let diff = v - self.val_filt;
        self.val_filt = self.val_filt + Coord3::new(diff.x / flen, diff.y / flen, diff.z / flen);
        let sqsum = diff.x * diff.x + diff.y * diff.y + diff.z * diff.z;
        self.var_filt += (sqsum - self.var_filt) / flen;
    }

    fn value(&self) -> Coord3 {
        self.avg()
    }

    fn avg(&self) -> Coord3 {
        self.val_filt
    }

    fn var(&self) -> f64 {
        self.var_filt
    }
}

/// Quality-gated composite: `value` updates only while the update stays
/// within `max_dev` of the quality filter's current estimate; otherwise
/// only the quality filter advances. Mirrors `CoordQCFilter`.
pub struct QcFilter {
    coord_filt: Box<dyn CoordinateFilter + Send>,
    qual_filt: Box<dyn CoordinateFilter + Send>,
    max_dev: f64,
}

impl QcFilter {
    pub fn new(
        coord_filt: Box<dyn CoordinateFilter + Send>,
        qual_filt: Box<dyn CoordinateFilter + Send>,
        max_dev: f64,
    ) -> Self {
        Self { coord_filt, qual_filt, max_dev }
    }
}

impl CoordinateFilter for QcFilter {
    fn reset(&mut self) {
        self.coord_filt.reset();
        self.qual_filt.reset();
    }

    fn update(&mut self, v: Coord3) {
        self.qual_filt.update(v);
        if self.qual_filt.value().distance_to(&v) < self.max_dev {
            self.coord_filt.update(v);
        }
    }

    fn value(&self) -> Coord3 {
        self.coord_filt.value()
    }

    fn avg(&self) -> Coord3 {
        self.coord_filt.avg()
    }

    fn var(&self) -> f64 {
        self.coord_filt.var()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_filter_converges_to_constant_input() {
        let mut f = GeoFilter::new(8);
        let v = Coord3::new(1.0, 2.0, 3.0);
        for _ in 0..200 {
            f.update(v);
        }
        assert!(f.avg().distance_to(&v) < 1e-9);
        assert!(f.var() < 1e-9);
    }

    #[test]
    fn running_mean_evicts_oldest() {
        let mut f = RunningMeanFilter::new(3);
        f.update(Coord3::new(1.0, 0.0, 0.0));
        f.update(Coord3::new(2.0, 0.0, 0.0));
        f.update(Coord3::new(3.0, 0.0, 0.0));
        f.update(Coord3::new(4.0, 0.0, 0.0));
        // oldest (1.0) evicted, mean of {2,3,4}
        assert_eq!(f.avg().x, 3.0);
    }

    #[test]
    fn qc_filter_rejects_outliers() {
        let mut f = QcFilter::new(
            Box::new(GeoFilter::new(8)),
            Box::new(GeoFilter::new(8)),
            0.5,
        );
        for _ in 0..50 {
            f.update(Coord3::new(0.0, 0.0, 0.0));
        }
        f.update(Coord3::new(100.0, 100.0, 100.0));
        assert!(f.value().distance_to(&Coord3::ZERO) < 0.5);
    }
}
