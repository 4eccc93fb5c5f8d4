//! 摄取值提取与摄取值表读写.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SuvrError};
use crate::mapping::CorrespondenceTable;
use crate::PetScan;

/// 摄取值表中的一行.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UptakeRecord {
    /// 参考体素编号.
    pub voxel_number: u32,

    /// baseline PET 在 `B` 处的值.
    pub baseline_uptake: f64,

    /// follow-up PET 在 `F` 处的值.
    pub followup_uptake: f64,
}

/// 按体素编号升序排列的摄取值表.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UptakeTable {
    rows: Vec<UptakeRecord>,
}

impl FromIterator<UptakeRecord> for UptakeTable {
    fn from_iter<I: IntoIterator<Item = UptakeRecord>>(iter: I) -> Self {
        let mut rows: Vec<_> = iter.into_iter().collect();
        rows.sort_by_key(|r| r.voxel_number);
        Self { rows }
    }
}

impl UptakeTable {
    /// 在每对对应体素上做最近邻采样.
    ///
    /// `table` 中的索引已经过越界检查, 因此这里不会失败.
    pub fn extract(table: &CorrespondenceTable, bl_pet: &PetScan, fu_pet: &PetScan) -> Self {
        let rows: Vec<_> = table
            .records()
            .iter()
            .map(|c| UptakeRecord {
                voxel_number: c.voxel,
                baseline_uptake: bl_pet[c.baseline] as f64,
                followup_uptake: fu_pet[c.followup] as f64,
            })
            .collect();
        info!("Extracted {} uptake pairs", rows.len());
        Self { rows }
    }

    /// 所有行.
    #[inline]
    pub fn rows(&self) -> &[UptakeRecord] {
        &self.rows
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// baseline 列.
    pub fn baseline(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.baseline_uptake).collect()
    }

    /// follow-up 列.
    pub fn followup(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.followup_uptake).collect()
    }

    /// 只保留满足 `pred` 的行.
    pub fn filter<P: FnMut(&UptakeRecord) -> bool>(&self, mut pred: P) -> Self {
        Self {
            rows: self.rows.iter().filter(|r| pred(r)).copied().collect(),
        }
    }

    /// 写为带表头 `voxel_number,baseline_uptake,followup_uptake` 的 CSV 文件.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path).map_err(SuvrError::csv(path))?;
        for row in &self.rows {
            wtr.serialize(row).map_err(SuvrError::csv(path))?;
        }
        wtr.flush().map_err(SuvrError::io(path))
    }

    /// 从 CSV 文件读取. 行会按体素编号重新排序.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = csv::Reader::from_path(path).map_err(SuvrError::csv(path))?;
        rdr.deserialize::<UptakeRecord>()
            .map(|r| r.map_err(SuvrError::csv(path)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{map_voxels, MappingTarget};
    use crate::region::{build_region, ReferenceRegion};
    use crate::{Affine, DeformationField, LabelVolume};
    use ndarray::Array3;

    #[test]
    fn test_extract_end_to_end() {
        let mut par = Array3::<i32>::zeros((3, 3, 3));
        for pos in [(0, 0, 1), (0, 2, 2), (1, 1, 0), (2, 0, 2)] {
            par[pos] = 39;
        }
        let par = LabelVolume::fake(par, Affine::identity());
        let region = build_region(ReferenceRegion::Cereb, &par, None).unwrap();
        let field = DeformationField::from_fn((3, 3, 3), Affine::identity(), |(i, j, k)| {
            [i as f64, j as f64, k as f64]
        });
        let bl = PetScan::fake(
            Array3::from_shape_fn((3, 3, 3), |(i, j, k)| (100 * i + 10 * j + k) as f32),
            Affine::identity(),
        );
        let fu = bl.map(|v| 2.0 * v);
        let table = map_voxels(
            &region,
            MappingTarget::new(&field, &bl),
            MappingTarget::new(&field, &fu),
        )
        .unwrap();

        let uptake = UptakeTable::extract(&table, &bl, &fu);
        let expect = [(1, 1.0), (2, 22.0), (3, 110.0), (4, 202.0)];
        assert_eq!(uptake.len(), 4);
        for (row, (n, v)) in uptake.rows().iter().zip(expect) {
            assert_eq!(row.voxel_number, n);
            assert_eq!(row.baseline_uptake, v);
            assert_eq!(row.followup_uptake, 2.0 * v);
        }
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uptake.csv");
        let table: UptakeTable = [
            UptakeRecord {
                voxel_number: 5,
                baseline_uptake: 1.25,
                followup_uptake: 1.5,
            },
            UptakeRecord {
                voxel_number: 2,
                baseline_uptake: 0.75,
                followup_uptake: 0.5,
            },
        ]
        .into_iter()
        .collect();
        assert_eq!(table.rows()[0].voxel_number, 2);

        table.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("voxel_number,baseline_uptake,followup_uptake\n"));
        assert_eq!(UptakeTable::read_csv(&path).unwrap(), table);

        let missing = UptakeTable::read_csv(dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(missing, SuvrError::Csv { .. }));
    }
}
