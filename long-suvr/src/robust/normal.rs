//! 标准正态分布.

use std::f64::consts::PI;

/// 标准正态分布密度函数 φ(x).
#[inline]
pub fn pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

const A: [f64; 6] = [
    -3.969683028665376e+01,
    2.209460984245205e+02,
    -2.759285104469687e+02,
    1.383577518672690e+02,
    -3.066479806614716e+01,
    2.506628277459239e+00,
];

const B: [f64; 5] = [
    -5.447609879822406e+01,
    1.615858368580409e+02,
    -1.556989798598866e+02,
    6.680131188771972e+01,
    -1.328068155288572e+01,
];

const C: [f64; 6] = [
    -7.784894002430293e-03,
    -3.223964580411365e-01,
    -2.400758277161838e+00,
    -2.549732539343734e+00,
    4.374664141464968e+00,
    2.938163982698783e+00,
];

const D: [f64; 4] = [
    7.784695709041462e-03,
    3.224671290700398e-01,
    2.445134137142996e+00,
    3.754408661907416e+00,
];

const P_LOW: f64 = 0.02425;

/// 标准正态分布分位函数 Φ⁻¹(p).
///
/// 使用 Acklam 有理逼近, 相对误差小于 1.2e-9. `p` 为 0 或 1 时分别返回负, 正无穷,
/// 区间外返回 NaN.
pub fn quantile(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -quantile(1.0 - p)
    }
}

/// LTS 残差尺度的正态一致性因子.
///
/// 即截断到 `[-q, q]` 的正态分布标准差的倒数: `q = Φ⁻¹((n + h) / 2n)`,
/// `c = 1 / sqrt(1 - 2n / h · q · φ(q))`. `h >= n` 时为 1.
pub fn consistency_factor(h: usize, n: usize) -> f64 {
    if h >= n {
        return 1.0;
    }
    let (h, n) = (h as f64, n as f64);
    let q = quantile((n + h) / (2.0 * n));
    1.0 / (1.0 - 2.0 * n / h * q * pdf(q)).sqrt()
}
