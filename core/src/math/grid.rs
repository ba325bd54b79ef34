use crate::prelude::{LidarError, LidarResult};

/// Running trapezoidal integral of `y` over `x`, starting at zero on the first sample.
pub fn cumulative_trapezoid(y: &[f64], x: &[f64]) -> LidarResult<Vec<f64>> {
    if y.len() != x.len() {
        return Err(LidarError::mismatch("trapezoid abscissa", y.len(), x.len()));
    }
    let mut total = 0.0;
    let mut out = Vec::with_capacity(y.len());
    for i in 0..y.len() {
        if i > 0 {
            total += 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
        }
        out.push(total);
    }
    Ok(out)
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`; the end segments extend
/// beyond the tabulated range.
pub fn interpolate(xp: &[f64], fp: &[f64], x: &[f64]) -> LidarResult<Vec<f64>> {
    if xp.len() != fp.len() {
        return Err(LidarError::mismatch("interpolation table", xp.len(), fp.len()));
    }
    if xp.len() < 2 {
        return Err(LidarError::InvalidInput(format!(
            "interpolation needs two points, got {}",
            xp.len()
        )));
    }
    if xp.windows(2).any(|pair| !(pair[1] > pair[0])) {
        return Err(LidarError::InvalidInput(
            "interpolation abscissa must increase strictly".into(),
        ));
    }
    let last = xp.len() - 2;
    Ok(x.iter()
        .map(|&value| {
            let seg = xp[1..].partition_point(|&knot| knot < value).min(last);
            let t = (value - xp[seg]) / (xp[seg + 1] - xp[seg]);
            fp[seg] + t * (fp[seg + 1] - fp[seg])
        })
        .collect())
}
