//! TDOA solver (spec §4.3), grounded in
//! `examples/original_source/server/tdoa.py`: `woodoo` pseudo-range
//! arithmetic, hypercone closed-form seed, and iterative weighted-least-
//! squares hyperlateration in 2D, 3D, and pseudo-3D (fixed Z).

use crate::error::RtlsError;
use crate::rf::{CABS, DW1000_CLOCK_HZ};
use nalgebra::{DMatrix, DVector};

pub const DEFAULT_THETA: f64 = 0.045;
pub const DEFAULT_MAX_ITER: usize = 8;

/// `ToF = ((T3-T0)*(T5-T2) - (T2-T1)*(T4-T3)) / ((T4-T0) + (T5-T1))`,
/// `DoF = ToF / f_clk * c`. Six timestamps drawn from the three ranging
/// phase buckets (blink, beacon/request, response).
pub fn woodoo(t: &[f64; 6]) -> Result<f64, RtlsError> {
    let t41 = t[3] - t[0];
    let t32 = t[2] - t[1];
    let t54 = t[4] - t[3];
    let t63 = t[5] - t[2];
    let t51 = t[4] - t[0];
    let t62 = t[5] - t[1];
    let denom = t51 + t62;
    if denom == 0.0 {
        return Err(RtlsError::BadTimes);
    }
    let tof = (t41 * t63 - t32 * t54) / denom;
    Ok((tof / DW1000_CLOCK_HZ) * CABS)
}

fn sqrsum_rows(m: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(m.nrows(), (0..m.nrows()).map(|i| m.row(i).iter().map(|v| v * v).sum()))
}

fn norm_rows(m: &DMatrix<f64>) -> DVector<f64> {
    sqrsum_rows(m).map(f64::sqrt)
}

/// Closed-form linear seed: solve `G^T G x = G^T h` where
/// `G = [bi - b0 | di]`, `h = (‖bi‖² − ‖b0‖² − di²)/2`. Returns the
/// leading `dim` components of `x`.
pub fn hypercone(b0: &DVector<f64>, bi: &DMatrix<f64>, di: &DVector<f64>) -> Result<DVector<f64>, RtlsError> {
    let dim = b0.len();
    let n = bi.nrows();
    let bi0 = DMatrix::from_fn(n, dim, |r, c| bi[(r, c)] - b0[c]);
    let mut g = DMatrix::zeros(n, dim + 1);
    g.view_mut((0, 0), (n, dim)).copy_from(&bi0);
    for r in 0..n {
        g[(r, dim)] = di[r];
    }
    let sq_bi = sqrsum_rows(bi);
    let sq_b0: f64 = b0.iter().map(|v| v * v).sum();
    let h = DVector::from_iterator(n, (0..n).map(|r| (sq_bi[r] - sq_b0 - di[r] * di[r]) / 2.0));
    let gtg = g.transpose() * &g;
    let gth = g.transpose() * &h;
    let x = gtg.lu().solve(&gth).ok_or(RtlsError::BadTimes)?;
    Ok(x.rows(0, dim).into_owned())
}

fn dist(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (a - b).norm()
}

/// One 2D weighted-least-squares refinement step. Returns (new estimate,
/// condition number of the normal matrix).
pub fn hyperjump_2d(
    b0: &DVector<f64>,
    bs: &DVector<f64>,
    bi: &DMatrix<f64>,
    di: &DVector<f64>,
    sigma: &DVector<f64>,
    theta: f64,
) -> Result<(DVector<f64>, f64), RtlsError> {
    let n = bi.nrows();
    let bi0 = DMatrix::from_fn(n, 2, |r, c| bi[(r, c)] - b0[c]);
    let bs0 = bs - b0;
    let ds0 = bs0.norm();
    let dis = DVector::from_iterator(n, (0..n).map(|r| {
        let dx = bi[(r, 0)] - bs[0];
        let dy = bi[(r, 1)] - bs[1];
        (dx * dx + dy * dy).sqrt()
    }));

    let mut g = DMatrix::zeros(n + 2, 3);
    g.view_mut((0, 0), (n, 2)).copy_from(&bi0);
    for r in 0..n {
        g[(r, 2)] = di[r];
    }
    g[(n, 0)] = bs0[0];
    g[(n, 1)] = bs0[1];
    g[(n, 2)] = -ds0;
    g[(n + 1, 0)] = bs[1];
    g[(n + 1, 1)] = -bs[0];
    g[(n + 1, 2)] = 0.0;

    let sq_bi = sqrsum_rows(bi);
    let sq_b0: f64 = b0.iter().map(|v| v * v).sum();
    let mut h = DVector::zeros(n + 2);
    for r in 0..n {
        h[r] = (sq_bi[r] - sq_b0 - di[r] * di[r]) / 2.0;
    }
    h[n] = bs0.dot(b0);
    h[n + 1] = 0.0;

    let cv = ds0 * theta;
    let cc = ds0 * theta * theta / 2.0;
    let mut weights = DVector::zeros(n + 2);
    for r in 0..n {
        let pm = dis[r] * sigma[r];
        weights[r] = 1.0 / pm;
    }
    weights[n] = 1.0 / cc;
    weights[n + 1] = 1.0 / cv;
    let gs = DMatrix::from_diagonal(&weights.map(|w| w * w));

    let gtg = g.transpose() * &gs * &g;
    let gth = g.transpose() * &gs * &h;
    let cond = condition_number(&gtg);
    let x = gtg.lu().solve(&gth).ok_or(RtlsError::BadTimes)?;
    Ok((x.rows(0, 2).into_owned(), cond))
}

fn condition_number(m: &DMatrix<f64>) -> f64 {
    let svd = m.clone().svd(false, false);
    let sv = svd.singular_values;
    let max = sv.iter().cloned().fold(f64::MIN, f64::max);
    let min = sv.iter().cloned().fold(f64::MAX, f64::min);
    if min <= 0.0 {
        f64::INFINITY
    } else {
        max / min
    }
}

/// Hypercone seed then iterate `hyperjump_2d` until successive-iterate
/// distance falls to `delta` (default `min(sigma)/2`) or `max_iter` is hit.
/// Requires at least 3 anchors (spec §4.2).
pub fn hyperlater_2d(
    ref_coord: &DVector<f64>,
    coords: &DMatrix<f64>,
    ranges: &DVector<f64>,
    sigmas: &DVector<f64>,
    delta: Option<f64>,
    theta: f64,
    max_iter: usize,
) -> Result<(crate::coord::Coord3, f64), RtlsError> {
    if ref_coord.len() != 2 {
        return Err(RtlsError::ParseError("hyperlater_2d requires a 2D reference coordinate".into()));
    }
    if coords.nrows() < 3 {
        return Err(RtlsError::SolveUnderdetermined { have: coords.nrows(), need: 3 });
    }
    let mut x = hypercone(ref_coord, coords, ranges)?;
    let (mut y, mut cond) = hyperjump_2d(ref_coord, &x, coords, ranges, sigmas, theta)?;
    let delta = delta.unwrap_or_else(|| sigmas.min() / 2.0);
    let mut n = 1;
    while n < max_iter && dist(&x, &y) > delta {
        x = y.clone();
        n += 1;
        let step = hyperjump_2d(ref_coord, &x, coords, ranges, sigmas, theta)?;
        y = step.0;
        cond = step.1;
    }
    Ok((crate::coord::Coord3::new(y[0], y[1], 0.0), cond))
}

/// 3D analog of `hyperjump_2d`.
pub fn hyperjump_3d(
    b0: &DVector<f64>,
    bs: &DVector<f64>,
    bi: &DMatrix<f64>,
    di: &DVector<f64>,
    sigma: &DVector<f64>,
    theta: f64,
) -> Result<(DVector<f64>, f64), RtlsError> {
    let n = bi.nrows();
    let bi0 = DMatrix::from_fn(n, 3, |r, c| bi[(r, c)] - b0[c]);
    let bs0 = bs - b0;
    let ds0 = bs0.norm();
    let dis = DVector::from_iterator(n, (0..n).map(|r| {
        let dx = bi[(r, 0)] - bs[0];
        let dy = bi[(r, 1)] - bs[1];
        let dz = bi[(r, 2)] - bs[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }));

    let mut g = DMatrix::zeros(n + 3, 4);
    g.view_mut((0, 0), (n, 3)).copy_from(&bi0);
    for r in 0..n {
        g[(r, 3)] = di[r];
    }
    g[(n, 0)] = bs0[0];
    g[(n, 1)] = bs0[1];
    g[(n, 2)] = bs0[2];
    g[(n, 3)] = -ds0;
    g[(n + 1, 0)] = bs[1];
    g[(n + 1, 1)] = -bs[0];
    g[(n + 2, 0)] = bs[2];
    g[(n + 2, 2)] = -bs[0];

    let sq_bi = sqrsum_rows(bi);
    let sq_b0: f64 = b0.iter().map(|v| v * v).sum();
    let mut h = DVector::zeros(n + 3);
    for r in 0..n {
        h[r] = (sq_bi[r] - sq_b0 - di[r] * di[r]) / 2.0;
    }
    h[n] = bs0.dot(b0);

    let cv = ds0 * theta;
    let cc = ds0 * theta * theta / 2.0;
    let mut weights = DVector::zeros(n + 3);
    for r in 0..n {
        weights[r] = 1.0 / (dis[r] * sigma[r]);
    }
    weights[n] = 1.0 / cc;
    weights[n + 1] = 1.0 / cv;
    weights[n + 2] = 1.0 / cv;
    let gs = DMatrix::from_diagonal(&weights.map(|w| w * w));

    let gtg = g.transpose() * &gs * &g;
    let gth = g.transpose() * &gs * &h;
    let cond = condition_number(&gtg);
    let x = gtg.lu().solve(&gth).ok_or(RtlsError::BadTimes)?;
    Ok((x.rows(0, 3).into_owned(), cond))
}

/// Requires at least 5 anchors (spec §4.2).
pub fn hyperlater_3d(
    ref_coord: &DVector<f64>,
    coords: &DMatrix<f64>,
    ranges: &DVector<f64>,
    sigmas: &DVector<f64>,
    delta: Option<f64>,
    theta: f64,
    max_iter: usize,
) -> Result<(crate::coord::Coord3, f64), RtlsError> {
    if ref_coord.len() != 3 {
        return Err(RtlsError::ParseError("hyperlater_3d requires a 3D reference coordinate".into()));
    }
    if coords.nrows() < 5 {
        return Err(RtlsError::SolveUnderdetermined { have: coords.nrows(), need: 5 });
    }
    let mut x = hypercone(ref_coord, coords, ranges)?;
    let (mut y, mut cond) = hyperjump_3d(ref_coord, &x, coords, ranges, sigmas, theta)?;
    let delta = delta.unwrap_or_else(|| sigmas.min() / 2.0);
    let mut n = 1;
    while n < max_iter && dist(&x, &y) > delta {
        x = y.clone();
        n += 1;
        let step = hyperjump_3d(ref_coord, &x, coords, ranges, sigmas, theta)?;
        y = step.0;
        cond = step.1;
    }
    Ok((crate::coord::Coord3::new(y[0], y[1], y[2]), cond))
}

/// Pseudo-3D jump: holds Z fixed via the `ci0_z` correction term
/// `(bi.z - b0.z) * ((bi.z - bs.z) + (b0.z - bs.z))`.
pub fn hyperjump_3d_pseudo(
    b0: &DVector<f64>,
    bs: &DVector<f64>,
    bi: &DMatrix<f64>,
    di: &DVector<f64>,
    sigma: &DVector<f64>,
    theta: f64,
) -> Result<(DVector<f64>, f64), RtlsError> {
    let n = bi.nrows();
    let b0_xy = DVector::from_vec(vec![b0[0], b0[1]]);
    let bs_xy = DVector::from_vec(vec![bs[0], bs[1]]);
    let bi_xy = bi.view((0, 0), (n, 2)).into_owned();

    let bi0_xy = DMatrix::from_fn(n, 2, |r, c| bi_xy[(r, c)] - b0_xy[c]);
    let bs0_xy = &bs_xy - &b0_xy;
    let ds0 = ((bs[0] - b0[0]).powi(2) + (bs[1] - b0[1]).powi(2) + (bs[2] - b0[2]).powi(2)).sqrt();
    let dis = DVector::from_iterator(n, (0..n).map(|r| {
        let dx = bi[(r, 0)] - bs[0];
        let dy = bi[(r, 1)] - bs[1];
        let dz = bi[(r, 2)] - bs[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }));

    let ci0_z = DVector::from_iterator(n, (0..n).map(|r| {
        let bi0_z = bi[(r, 2)] - b0[2];
        bi0_z * ((bi[(r, 2)] - bs[2]) + (b0[2] - bs[2]))
    }));

    let mut g = DMatrix::zeros(n + 2, 3);
    g.view_mut((0, 0), (n, 2)).copy_from(&bi0_xy);
    for r in 0..n {
        g[(r, 2)] = di[r];
    }
    g[(n, 0)] = bs0_xy[0];
    g[(n, 1)] = bs0_xy[1];
    g[(n, 2)] = -ds0;
    g[(n + 1, 0)] = bs[1];
    g[(n + 1, 1)] = -bs[0];

    let sq_bi_xy = sqrsum_rows(&bi_xy);
    let sq_b0_xy: f64 = b0_xy.iter().map(|v| v * v).sum();
    let mut h = DVector::zeros(n + 2);
    for r in 0..n {
        h[r] = (sq_bi_xy[r] - sq_b0_xy - di[r] * di[r] + ci0_z[r]) / 2.0;
    }
    h[n] = bs0_xy.dot(&b0_xy);

    let cv = ds0 * theta;
    let cc = ds0 * theta * theta / 2.0;
    let mut weights = DVector::zeros(n + 2);
    for r in 0..n {
        weights[r] = 1.0 / (dis[r] * sigma[r]);
    }
    weights[n] = 1.0 / cc;
    weights[n + 1] = 1.0 / cv;
    let gs = DMatrix::from_diagonal(&weights.map(|w| w * w));

    let gtg = g.transpose() * &gs * &g;
    let gth = g.transpose() * &gs * &h;
    let cond = condition_number(&gtg);
    let xy = gtg.lu().solve(&gth).ok_or(RtlsError::BadTimes)?;
    Ok((DVector::from_vec(vec![xy[0], xy[1], bs[2]]), cond))
}

/// Pseudo-3D hyperlateration: Z held fixed at `z_est` (typically the
/// beacon's Z). Requires at least 5 anchors, same as full 3D.
pub fn hyperlater_3d_pseudo(
    ref_coord: &DVector<f64>,
    coords: &DMatrix<f64>,
    ranges: &DVector<f64>,
    sigmas: &DVector<f64>,
    delta: Option<f64>,
    theta: f64,
    max_iter: usize,
    z_est: f64,
) -> Result<(crate::coord::Coord3, f64), RtlsError> {
    if ref_coord.len() != 3 {
        return Err(RtlsError::ParseError("hyperlater_3d_pseudo requires a 3D reference coordinate".into()));
    }
    if coords.nrows() < 5 {
        return Err(RtlsError::SolveUnderdetermined { have: coords.nrows(), need: 5 });
    }
    let ref_xy = DVector::from_vec(vec![ref_coord[0], ref_coord[1]]);
    let coords_xy = coords.view((0, 0), (coords.nrows(), 2)).into_owned();
    let seed_xy = hypercone(&ref_xy, &coords_xy, ranges)?;
    let mut x = DVector::from_vec(vec![seed_xy[0], seed_xy[1], z_est]);
    let (mut y, mut cond) = hyperjump_3d_pseudo(ref_coord, &x, coords, ranges, sigmas, theta)?;
    let delta = delta.unwrap_or_else(|| sigmas.min() / 2.0);
    let mut n = 1;
    while n < max_iter && dist(&x, &y) > delta {
        x = y.clone();
        n += 1;
        let step = hyperjump_3d_pseudo(ref_coord, &x, coords, ranges, sigmas, theta)?;
        y = step.0;
        cond = step.1;
    }
    Ok((crate::coord::Coord3::new(y[0], y[1], y[2]), cond))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn woodoo_zero_numerator_gives_zero_dof() {
        let t = [0.0, 0.0, 1000.0, 1000.0, 2000.0, 2000.0];
        let dof = woodoo(&t).unwrap();
        assert!(dof.abs() < 1e-9);
    }

    #[test]
    fn woodoo_matches_worked_example() {
        let t = [0.0, 0.0, 100.0, 200.0, 500.0, 400.0];
        let tof_clocks = 33.333333333333336;
        let expected_dof = (tof_clocks / DW1000_CLOCK_HZ) * CABS;
        let dof = woodoo(&t).unwrap();
        assert!((dof - expected_dof).abs() < 1e-9);
        assert!((dof - 0.1564).abs() < 1e-3);
    }

    #[test]
    fn woodoo_zero_denominator_errors() {
        let t = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!(matches!(woodoo(&t), Err(RtlsError::BadTimes)));
    }

    #[test]
    fn hyperlater_2d_recovers_symmetric_fourway_position() {
        let b0 = DVector::from_vec(vec![0.0, 0.0]);
        let anchors = [(10.0, 0.0), (0.0, 10.0), (-10.0, 0.0), (0.0, -10.0)];
        let truth = (3.0, 4.0);
        let dist0 = (truth.0 * truth.0 + truth.1 * truth.1).sqrt();
        let mut coords = DMatrix::zeros(4, 2);
        let mut ranges = DVector::zeros(4);
        for (i, (ax, ay)) in anchors.iter().enumerate() {
            coords[(i, 0)] = *ax;
            coords[(i, 1)] = *ay;
            let d = ((truth.0 - ax).powi(2) + (truth.1 - ay).powi(2)).sqrt();
            ranges[i] = d - dist0;
        }
        let sigmas = DVector::from_element(4, 0.1);
        let (pos, _cond) = hyperlater_2d(&b0, &coords, &ranges, &sigmas, None, DEFAULT_THETA, DEFAULT_MAX_ITER).unwrap();
        assert!((pos.x - truth.0).abs() < 0.001);
        assert!((pos.y - truth.1).abs() < 0.001);
    }

    #[test]
    fn hyperlater_2d_requires_three_anchors() {
        let b0 = DVector::from_vec(vec![0.0, 0.0]);
        let coords = DMatrix::zeros(2, 2);
        let ranges = DVector::zeros(2);
        let sigmas = DVector::from_element(2, 0.1);
        let err = hyperlater_2d(&b0, &coords, &ranges, &sigmas, None, DEFAULT_THETA, DEFAULT_MAX_ITER).unwrap_err();
        assert!(matches!(err, RtlsError::SolveUnderdetermined { .. }));
    }
}
