//! 描述统计量.

use std::path::Path;

use ordered_float::OrderedFloat;

use crate::error::{Result, SuvrError};
use crate::uptake::UptakeTable;

/// 单列描述统计量: `count, mean, std, min, 25%, 50%, 75%, max`.
///
/// `std` 使用 `n - 1` 作分母, 分位数在排序后的样本上线性插值.
/// 样本为空时除 `count` 外全为 NaN, 只有一个样本时 `std` 为 NaN.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Describe {
    /// 样本个数.
    pub count: usize,
    /// 均值.
    pub mean: f64,
    /// 样本标准差.
    pub std: f64,
    /// 最小值.
    pub min: f64,
    /// 下四分位数.
    pub q25: f64,
    /// 中位数.
    pub median: f64,
    /// 上四分位数.
    pub q75: f64,
    /// 最大值.
    pub max: f64,
}

impl Describe {
    /// 输出表中各统计量的行名.
    pub const NAMES: [&'static str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

    /// 计算 `values` 的描述统计量.
    pub fn of(values: &[f64]) -> Self {
        let count = values.len();
        let mut sorted: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
        sorted.sort_unstable();
        let sorted: Vec<f64> = sorted.into_iter().map(|v| v.0).collect();

        let n = count as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if count > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            f64::NAN
        };
        Self {
            count,
            mean,
            std,
            min: sorted.first().copied().unwrap_or(f64::NAN),
            q25: quantile_sorted(&sorted, 0.25),
            median: quantile_sorted(&sorted, 0.5),
            q75: quantile_sorted(&sorted, 0.75),
            max: sorted.last().copied().unwrap_or(f64::NAN),
        }
    }

    /// 按 [`Describe::NAMES`] 的顺序给出各统计量.
    pub fn values(&self) -> [f64; 8] {
        [
            self.count as f64,
            self.mean,
            self.std,
            self.min,
            self.q25,
            self.median,
            self.q75,
            self.max,
        ]
    }

    /// 极差 `max - min`.
    #[inline]
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// 已排序样本的 `q` 分位数, 位置 `q (n - 1)` 处线性插值.
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// 摄取值表两列的描述统计量. 不包括体素编号列.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DescriptiveStats {
    /// baseline 摄取值.
    pub baseline: Describe,

    /// follow-up 摄取值.
    pub followup: Describe,
}

impl DescriptiveStats {
    /// 计算 `table` 的描述统计量.
    pub fn of(table: &UptakeTable) -> Self {
        Self {
            baseline: Describe::of(&table.baseline()),
            followup: Describe::of(&table.followup()),
        }
    }

    /// 写为 CSV: 首列 `statistic`, 之后是 `baseline_uptake` 与 `followup_uptake`.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path).map_err(SuvrError::csv(path))?;
        wtr.write_record(["statistic", "baseline_uptake", "followup_uptake"])
            .map_err(SuvrError::csv(path))?;
        for ((name, b), f) in Describe::NAMES
            .iter()
            .zip(self.baseline.values())
            .zip(self.followup.values())
        {
            wtr.write_record([name.to_string(), b.to_string(), f.to_string()])
                .map_err(SuvrError::csv(path))?;
        }
        wtr.flush().map_err(SuvrError::io(path))
    }
}
