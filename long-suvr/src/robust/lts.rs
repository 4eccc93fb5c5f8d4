//! 最小截尾二乘 (LTS) 直线拟合.

use std::iter;

use itertools::Itertools;
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::normal::{consistency_factor, quantile};
use super::{effective_alpha, validate, FitError, LineFit, RobustFit};
use crate::consts::{
    DEFAULT_ALPHA, LTS_BEST, LTS_MAX_CSTEPS, LTS_SEED, LTS_SUBSETS, MIN_FIT_SAMPLES,
    OUTLIER_QUANTILE,
};

/// 标准化残差的离群阈值 Φ⁻¹(0.9875).
static OUTLIER_CUTOFF: Lazy<f64> = Lazy::new(|| quantile(OUTLIER_QUANTILE));

/// 初始子集在粗筛阶段做的 C-step 轮数.
const WARMUP_CSTEPS: usize = 2;

/// 尺度视作零时使用的相对容差.
const ZERO_TOL: f64 = 1e-9;

/// 截尾比例为 `alpha` 时, `n` 个样本的直线拟合覆盖数 `h`.
///
/// `h = floor(2 n2 - n + 2 (n - n2) alpha)`, 其中 `n2 = (n + 3) / 2` (两个参数),
/// 结果截断到 `[n2, n]`.
pub fn coverage(n: usize, alpha: f64) -> usize {
    const P: usize = 2;
    let n2 = (n + P + 1) / 2;
    let (nf, n2f) = (n as f64, n2 as f64);
    let h = (2.0 * n2f - nf + 2.0 * (nf - n2f) * alpha).floor();
    (h.max(0.0) as usize).clamp(n2.min(n), n)
}

/// 最小截尾二乘拟合器.
///
/// 在 `h` 个残差平方最小的样本上最小化残差平方和. 初始解来自两点确定的直线:
/// 组合数不超过 `subsets` 时穷举, 否则用固定种子随机抽取, 因此结果是确定的.
#[derive(Clone, Debug, PartialEq)]
pub struct Lts {
    alpha: f64,
    seed: u64,
    subsets: usize,
    best: usize,
    max_csteps: usize,
}

impl Default for Lts {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl Lts {
    /// 以截尾比例 `alpha` 创建拟合器. `alpha` 越界时使用 0.75 并给出警告.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: effective_alpha(alpha),
            seed: LTS_SEED,
            subsets: LTS_SUBSETS,
            best: LTS_BEST,
            max_csteps: LTS_MAX_CSTEPS,
        }
    }

    /// 设置随机抽取初始子集的种子.
    #[inline]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// 设置初始子集个数上限 (至少为 1).
    #[inline]
    pub fn with_subsets(mut self, subsets: usize) -> Self {
        self.subsets = subsets.max(1);
        self
    }

    /// 实际使用的截尾比例.
    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// 实际使用的随机种子.
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn starts(&self, x: &[f64], y: &[f64]) -> Vec<Line> {
        let n = x.len();
        let pairs: Vec<(usize, usize)> = if n * (n - 1) / 2 <= self.subsets {
            (0..n).tuple_combinations().collect()
        } else {
            let mut rng = StdRng::seed_from_u64(self.seed);
            (0..self.subsets)
                .map(|_| {
                    let i = rng.random_range(0..n);
                    let mut j = rng.random_range(0..n - 1);
                    if j >= i {
                        j += 1;
                    }
                    (i, j)
                })
                .collect()
        };
        let all: Vec<usize> = (0..n).collect();
        iter::once(ols(x, y, &all))
            .chain(pairs.into_iter().filter_map(|(i, j)| Line::through(x, y, i, j)))
            .collect()
    }
}

impl RobustFit for Lts {
    fn name(&self) -> &'static str {
        "LTS"
    }

    fn fit(&self, x: &[f64], y: &[f64]) -> Result<LineFit, FitError> {
        validate(x, y, MIN_FIT_SAMPLES)?;
        let n = x.len();
        let h = coverage(n, self.alpha);

        let starts = self.starts(x, y);
        let mut pool: Vec<(usize, Candidate)> = refine_all(x, y, &starts, h, WARMUP_CSTEPS)
            .into_iter()
            .enumerate()
            .collect();
        pool.sort_by_key(|(i, c)| (OrderedFloat(c.obj), *i));
        pool.truncate(self.best);

        let (line, obj) = pool
            .into_iter()
            .map(|(i, c)| (i, concentrate(x, y, c, h, self.max_csteps)))
            .min_by_key(|(i, c)| (OrderedFloat(c.obj), *i))
            .map(|(_, c)| (c.line, c.obj))
            .ok_or(FitError::Degenerate)?;

        let scale = (obj / h as f64).sqrt() * consistency_factor(h, n);
        let residuals: Vec<f64> = x.iter().zip(y).map(|(xi, yi)| yi - line.at(*xi)).collect();
        let y_max = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let outliers = if scale > ZERO_TOL * (1.0 + y_max) {
            let cutoff = *OUTLIER_CUTOFF;
            residuals.iter().map(|r| (r / scale).abs() > cutoff).collect()
        } else {
            // 超过一半的样本精确地落在直线上.
            residuals
                .iter()
                .zip(y)
                .map(|(r, yi)| r.abs() > ZERO_TOL * (1.0 + yi.abs()))
                .collect()
        };

        Ok(LineFit {
            intercept: line.a,
            slope: line.b,
            scale,
            coverage: h,
            residuals,
            outliers,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Line {
    a: f64,
    b: f64,
}

impl Line {
    /// 过第 `i`, `j` 个样本的直线. 两点 `x` 相同时返回 `None`.
    fn through(x: &[f64], y: &[f64], i: usize, j: usize) -> Option<Self> {
        let dx = x[j] - x[i];
        if dx == 0.0 {
            return None;
        }
        let b = (y[j] - y[i]) / dx;
        Some(Self { a: y[i] - b * x[i], b })
    }

    #[inline]
    fn at(&self, x: f64) -> f64 {
        self.a + self.b * x
    }
}

#[derive(Copy, Clone, Debug)]
struct Candidate {
    line: Line,
    obj: f64,
}

/// 在 `idx` 给出的样本上做普通最小二乘. `x` 全部相同时斜率取 0.
fn ols(x: &[f64], y: &[f64], idx: &[usize]) -> Line {
    let m = idx.len() as f64;
    let (sx, sy) = idx.iter().fold((0.0, 0.0), |(sx, sy), &i| (sx + x[i], sy + y[i]));
    let (mx, my) = (sx / m, sy / m);
    let (sxx, sxy) = idx.iter().fold((0.0, 0.0), |(sxx, sxy), &i| {
        let dx = x[i] - mx;
        (sxx + dx * dx, sxy + dx * (y[i] - my))
    });
    let b = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    Line { a: my - b * mx, b }
}

/// 残差平方最小的 `h` 个样本的残差平方和, 以及这些样本的下标.
///
/// 残差平方相同时下标较小者优先, 因此选出的集合是唯一的.
fn trimmed(x: &[f64], y: &[f64], line: Line, h: usize) -> (f64, Vec<usize>) {
    let mut r2: Vec<(OrderedFloat<f64>, usize)> = x
        .iter()
        .zip(y)
        .enumerate()
        .map(|(i, (xi, yi))| {
            let r = yi - line.at(*xi);
            (OrderedFloat(r * r), i)
        })
        .collect();
    if h < r2.len() {
        r2.select_nth_unstable(h - 1);
        r2.truncate(h);
    }
    let obj = r2.iter().map(|(v, _)| v.0).sum();
    (obj, r2.into_iter().map(|(_, i)| i).collect())
}

/// 一步 C-step: 在当前直线的 `h` 个最小残差样本上重新拟合.
fn c_step(x: &[f64], y: &[f64], line: Line, h: usize) -> Candidate {
    let (_, idx) = trimmed(x, y, line, h);
    let line = ols(x, y, &idx);
    let (obj, _) = trimmed(x, y, line, h);
    Candidate { line, obj }
}

/// 反复做 C-step 直到目标函数不再下降, 至多 `steps` 轮.
fn concentrate(x: &[f64], y: &[f64], mut cand: Candidate, h: usize, steps: usize) -> Candidate {
    for _ in 0..steps {
        let next = c_step(x, y, cand.line, h);
        if next.obj >= cand.obj {
            break;
        }
        cand = next;
    }
    cand
}

fn start(x: &[f64], y: &[f64], line: Line, h: usize) -> Candidate {
    Candidate {
        line,
        obj: trimmed(x, y, line, h).0,
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        fn refine_all(x: &[f64], y: &[f64], starts: &[Line], h: usize, steps: usize) -> Vec<Candidate> {
            starts
                .par_iter()
                .map(|l| concentrate(x, y, start(x, y, *l, h), h, steps))
                .collect()
        }
    } else {
        fn refine_all(x: &[f64], y: &[f64], starts: &[Line], h: usize, steps: usize) -> Vec<Candidate> {
            starts
                .iter()
                .map(|l| concentrate(x, y, start(x, y, *l, h), h, steps))
                .collect()
        }
    }
}
