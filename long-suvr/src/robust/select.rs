//! 离群体素筛选结果.

use std::collections::HashSet;
use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use super::{DescriptiveStats, LineFit, RobustFit};
use crate::error::{Result, SuvrError};
use crate::uptake::UptakeTable;
use crate::{LabelVolume, MaskVolume};

/// 一次离群体素筛选的全部产物.
#[derive(Clone, Debug)]
pub struct OutlierSelection {
    fit: LineFit,
    inliers: UptakeTable,
    outliers: Vec<u32>,
    dropped: Vec<u32>,
    stats: DescriptiveStats,
}

#[derive(Serialize)]
struct OutlierRow {
    voxel_number: u32,
}

/// 在摄取值表上拟合 follow-up 对 baseline 的直线并划分内点与离群点.
///
/// 摄取值含 NaN 或无穷的行不参与拟合, 既不是内点也不是离群点.
/// 剩余样本数不足时返回 [`FitError::TooFewSamples`](super::FitError::TooFewSamples),
/// 此前阶段的产物不受影响.
pub fn select_outliers<F: RobustFit + ?Sized>(
    table: &UptakeTable,
    estimator: &F,
) -> Result<OutlierSelection> {
    let finite = table.filter(|r| r.baseline_uptake.is_finite() && r.followup_uptake.is_finite());
    let dropped: Vec<u32> = if finite.len() == table.len() {
        Vec::new()
    } else {
        table
            .rows()
            .iter()
            .filter(|r| !r.baseline_uptake.is_finite() || !r.followup_uptake.is_finite())
            .map(|r| {
                warn!(
                    "Voxel {} has non-finite uptake ({}, {}), excluded from the fit",
                    r.voxel_number, r.baseline_uptake, r.followup_uptake
                );
                r.voxel_number
            })
            .collect()
    };
    let table = &finite;

    let fit = estimator.fit(&table.baseline(), &table.followup())?;
    let flagged: Vec<u32> = table
        .rows()
        .iter()
        .zip(&fit.outliers)
        .filter_map(|(r, o)| o.then_some(r.voxel_number))
        .collect();
    let set: HashSet<u32> = flagged.iter().copied().collect();
    let inliers = table.filter(|r| !set.contains(&r.voxel_number));
    let stats = DescriptiveStats::of(&inliers);
    info!(
        "{} fit: followup = {:.4} + {:.4} * baseline, scale {:.4}, {} of {} voxels flagged",
        estimator.name(),
        fit.intercept,
        fit.slope,
        fit.scale,
        flagged.len(),
        table.len()
    );
    Ok(OutlierSelection {
        fit,
        inliers,
        outliers: flagged,
        dropped,
        stats,
    })
}

impl OutlierSelection {
    /// 拟合结果.
    #[inline]
    pub fn fit(&self) -> &LineFit {
        &self.fit
    }

    /// 内点行.
    #[inline]
    pub fn inliers(&self) -> &UptakeTable {
        &self.inliers
    }

    /// 升序排列的离群体素编号.
    #[inline]
    pub fn outliers(&self) -> &[u32] {
        &self.outliers
    }

    /// 因摄取值非有限而未参与拟合的体素编号, 升序.
    #[inline]
    pub fn dropped(&self) -> &[u32] {
        &self.dropped
    }

    /// 内点描述统计量.
    #[inline]
    pub fn stats(&self) -> &DescriptiveStats {
        &self.stats
    }

    /// 把离群编号经由编号掩膜映射回 PET 空间, 得到 0/1 掩膜.
    ///
    /// 结果与 `numbers` 同网格, 且总是 `numbers` 非零区域的子集.
    pub fn outlier_mask(&self, numbers: &LabelVolume) -> MaskVolume {
        let set: HashSet<i32> = self.outliers.iter().map(|n| *n as i32).collect();
        numbers.map(|v| u8::from(*v != 0 && set.contains(v)))
    }

    /// 写出离群体素列表, 单列 `voxel_number`.
    pub fn write_outlier_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path).map_err(SuvrError::csv(path))?;
        if self.outliers.is_empty() {
            wtr.write_record(["voxel_number"])
                .map_err(SuvrError::csv(path))?;
        }
        for &voxel_number in &self.outliers {
            wtr.serialize(OutlierRow { voxel_number })
                .map_err(SuvrError::csv(path))?;
        }
        wtr.flush().map_err(SuvrError::io(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robust::{FitError, Lts};
    use crate::uptake::UptakeRecord;
    use crate::{Affine, SuvrError};
    use ndarray::Array3;

    fn table(n: u32, outliers: &[u32]) -> UptakeTable {
        (1..=n)
            .map(|v| {
                let x = 1.0 + 0.1 * v as f64;
                UptakeRecord {
                    voxel_number: v,
                    baseline_uptake: x,
                    followup_uptake: if outliers.contains(&v) { 5.0 * x } else { 1.1 * x },
                }
            })
            .collect()
    }

    #[test]
    fn test_select_and_masks() {
        let sel = select_outliers(&table(20, &[4, 17]), &Lts::new(0.75)).unwrap();
        assert_eq!(sel.outliers(), &[4, 17]);
        assert_eq!(sel.inliers().len(), 18);
        assert!(sel.inliers().rows().iter().all(|r| r.voxel_number != 4));
        assert_eq!(sel.stats().baseline.count, 18);

        let mut numbers = LabelVolume::fake(Array3::zeros((3, 3, 3)), Affine::identity());
        numbers[(0, 0, 0)] = 4;
        numbers[(1, 2, 0)] = 17;
        numbers[(2, 2, 2)] = 5;
        let mask = sel.outlier_mask(&numbers);
        assert_eq!(mask[(0, 0, 0)], 1);
        assert_eq!(mask[(1, 2, 0)], 1);
        assert_eq!(mask[(2, 2, 2)], 0);
        assert_eq!(mask.data().iter().filter(|v| **v == 1).count(), 2);
        // 离群掩膜是编号掩膜非零区域的子集.
        assert!(mask
            .data()
            .iter()
            .zip(numbers.data().iter())
            .all(|(m, n)| *m == 0 || *n != 0));
    }

    #[test]
    fn test_non_finite_rows_are_dropped() {
        let mut rows: Vec<UptakeRecord> = table(20, &[4, 17]).rows().to_vec();
        rows[8].followup_uptake = f64::NAN;
        rows[11].baseline_uptake = f64::INFINITY;
        let uptake: UptakeTable = rows.into_iter().collect();

        let sel = select_outliers(&uptake, &Lts::new(0.75)).unwrap();
        assert_eq!(sel.dropped(), &[9, 12]);
        assert_eq!(sel.outliers(), &[4, 17]);
        assert_eq!(sel.fit().outliers.len(), 18);
        assert_eq!(sel.inliers().len(), 16);
        assert!(sel
            .inliers()
            .rows()
            .iter()
            .all(|r| r.voxel_number != 9 && r.voxel_number != 12));
        assert_eq!(sel.stats().followup.count, 16);
        assert!(sel.stats().followup.mean.is_finite());

        let clean = select_outliers(&table(20, &[]), &Lts::default()).unwrap();
        assert!(clean.dropped().is_empty());
    }

    #[test]
    fn test_dropping_can_leave_too_few() {
        let mut rows: Vec<UptakeRecord> = table(11, &[]).rows().to_vec();
        rows[0].followup_uptake = f64::NAN;
        rows[5].followup_uptake = f64::NEG_INFINITY;
        let uptake: UptakeTable = rows.into_iter().collect();
        let err = select_outliers(&uptake, &Lts::default()).unwrap_err();
        assert!(matches!(err, SuvrError::Fit(FitError::TooFewSamples(9, 10))));
    }

    #[test]
    fn test_too_few_records() {
        let err = select_outliers(&table(4, &[]), &Lts::default()).unwrap_err();
        assert!(matches!(err, SuvrError::Fit(FitError::TooFewSamples(4, 10))));
    }

    #[test]
    fn test_write_outlier_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outliers.csv");
        let sel = select_outliers(&table(12, &[3]), &Lts::default()).unwrap();
        sel.write_outlier_csv(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "voxel_number\n3\n");

        let clean = select_outliers(&table(12, &[]), &Lts::default()).unwrap();
        assert!(clean.outliers().is_empty());
        clean.write_outlier_csv(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "voxel_number\n");
    }
}
