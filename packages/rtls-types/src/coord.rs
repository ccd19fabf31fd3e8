//! A plain 3-vector of reals (spec §3: "Coordinates are 3-vectors of
//! reals"). Used for anchor/tag positions and solver results alike.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coord3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord3 {
    pub const ZERO: Coord3 = Coord3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_xy(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn to_vec(self) -> Vec<f64> {
        vec![self.x, self.y, self.z]
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance_to(&self, other: &Coord3) -> f64 {
        let d = *self - *other;
        d.norm()
    }
}

impl std::ops::Sub for Coord3 {
    type Output = Coord3;
    fn sub(self, rhs: Coord3) -> Coord3 {
        Coord3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Add for Coord3 {
    type Output = Coord3;
    fn add(self, rhs: Coord3) -> Coord3 {
        Coord3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_is_euclidean() {
        let a = Coord3::new(0.0, 0.0, 0.0);
        let b = Coord3::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance_to(&b), 5.0);
    }
}
