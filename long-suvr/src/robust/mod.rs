//! 稳健回归与离群体素筛选.
//!
//! 以 follow-up 摄取值对 baseline 摄取值拟合直线 `y = a + b x`,
//! 拟合器抗离群点 (默认使用 LTS), 再依据标准化残差划分内点与离群点.

use log::warn;
use thiserror::Error;

use crate::consts::{ALPHA_RANGE, DEFAULT_ALPHA};

mod describe;
mod lts;
mod normal;
mod select;

pub use describe::{Describe, DescriptiveStats};
pub use lts::{coverage, Lts};
pub use normal::{consistency_factor, pdf as normal_pdf, quantile as normal_quantile};
pub use select::{select_outliers, OutlierSelection};

/// 拟合失败的原因.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// 样本不足以做实际拟合工作.
    ///
    /// 第一个参数代表目前已有的样本数, 第二个参数代表拟合需要的最少样本数.
    #[error("too few samples: {0} available, at least {1} required")]
    TooFewSamples(usize, usize),

    /// `x` 与 `y` 长度不一致.
    #[error("x has {0} samples while y has {1}")]
    LengthMismatch(usize, usize),

    /// 第 `0` 个样本含有 NaN 或无穷.
    #[error("sample {0} is not finite")]
    NonFinite(usize),

    /// 所有 `x` 都相同, 斜率无法确定.
    #[error("all x values are identical")]
    Degenerate,
}

/// 直线拟合结果, 以及每个样本的残差与离群标记.
#[derive(Clone, Debug, PartialEq)]
pub struct LineFit {
    /// 截距 `a`.
    pub intercept: f64,

    /// 斜率 `b`.
    pub slope: f64,

    /// 残差尺度估计.
    pub scale: f64,

    /// 参与目标函数的样本数 `h`.
    pub coverage: usize,

    /// 残差 `y - a - b x`.
    pub residuals: Vec<f64>,

    /// 离群标记, 与输入样本一一对应.
    pub outliers: Vec<bool>,
}

impl LineFit {
    /// 在 `x` 处的预测值.
    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// 离群样本个数.
    pub fn outlier_count(&self) -> usize {
        self.outliers.iter().filter(|o| **o).count()
    }
}

/// 抗离群点的直线拟合器.
pub trait RobustFit {
    /// 拟合器名称, 用于日志.
    fn name(&self) -> &'static str;

    /// 以 `y` 对 `x` 拟合直线并标记离群样本.
    fn fit(&self, x: &[f64], y: &[f64]) -> Result<LineFit, FitError>;
}

/// 检查截尾比例 `alpha`. 越界或非有限时给出警告并返回默认值 0.75.
pub fn effective_alpha(alpha: f64) -> f64 {
    if alpha.is_finite() && ALPHA_RANGE.contains(&alpha) {
        alpha
    } else {
        warn!(
            "alpha = {alpha} outside [{}, {}], using {DEFAULT_ALPHA} instead",
            ALPHA_RANGE.start(),
            ALPHA_RANGE.end()
        );
        DEFAULT_ALPHA
    }
}

pub(crate) fn validate(x: &[f64], y: &[f64], min: usize) -> Result<(), FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch(x.len(), y.len()));
    }
    if x.len() < min {
        return Err(FitError::TooFewSamples(x.len(), min));
    }
    if let Some(i) = x
        .iter()
        .zip(y)
        .position(|(a, b)| !a.is_finite() || !b.is_finite())
    {
        return Err(FitError::NonFinite(i));
    }
    if x.iter().all(|v| *v == x[0]) {
        return Err(FitError::Degenerate);
    }
    Ok(())
}
