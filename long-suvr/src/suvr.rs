//! SUVR 归一化.

use std::fmt;
use std::str::FromStr;

use log::info;

use crate::error::{Result, SuvrError};
use crate::robust::{Describe, DescriptiveStats};
use crate::{PetScan, Timepoint};

/// 参考区域摄取值的统计量.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ReferenceStat {
    /// 内点均值.
    #[default]
    Mean,

    /// 内点中位数.
    Median,
}

impl ReferenceStat {
    /// 从描述统计量中取出对应值.
    #[inline]
    pub fn pick(&self, d: &Describe) -> f64 {
        match self {
            Self::Mean => d.mean,
            Self::Median => d.median,
        }
    }
}

impl fmt::Display for ReferenceStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mean => "mean",
            Self::Median => "median",
        })
    }
}

impl FromStr for ReferenceStat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            other => Err(format!("unknown reference statistic `{other}`")),
        }
    }
}

/// 两个时间点的参考值.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReferenceUptake {
    /// 使用的统计量.
    pub stat: ReferenceStat,

    /// baseline 参考值.
    pub baseline: f64,

    /// follow-up 参考值.
    pub followup: f64,
}

impl ReferenceUptake {
    /// 从内点描述统计量中取参考值. 参考值必须为有限正数.
    pub fn from_stats(stats: &DescriptiveStats, stat: ReferenceStat) -> Result<Self> {
        let check = |v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(v)
            } else {
                Err(SuvrError::InvalidReference(v))
            }
        };
        let r = Self {
            stat,
            baseline: check(stat.pick(&stats.baseline))?,
            followup: check(stat.pick(&stats.followup))?,
        };
        info!(
            "Reference {stat}: baseline {:.4}, followup {:.4}, ratio {:.4}",
            r.baseline,
            r.followup,
            r.ratio()
        );
        Ok(r)
    }

    /// 指定时间点的参考值.
    #[inline]
    pub fn at(&self, timepoint: Timepoint) -> f64 {
        match timepoint {
            Timepoint::Baseline => self.baseline,
            Timepoint::Followup => self.followup,
        }
    }

    /// 纵向参考值比 follow-up / baseline.
    #[inline]
    pub fn ratio(&self) -> f64 {
        self.followup / self.baseline
    }
}

/// 用参考值归一化 PET, 得到 SUVR 图像.
pub fn normalise(pet: &PetScan, reference: f64) -> Result<PetScan> {
    if !reference.is_finite() || reference <= 0.0 {
        return Err(SuvrError::InvalidReference(reference));
    }
    Ok(pet.map(|v| (*v as f64 / reference) as f32))
}
