//! 完整流程: 参考区域 -> 体素映射 -> 摄取值提取 -> 离群筛选 -> SUVR.
//!
//! 上游产物 (编号掩膜与摄取值表) 在离群筛选之前写盘,
//! 因此离群筛选失败时它们仍然有效.

use std::borrow::Cow;
use std::path::PathBuf;

use log::{error, info};

use crate::consts::{DEFAULT_ALPHA, LTS_SEED};
use crate::error::{Result, SuvrError};
use crate::layout::{root_dir_from_env_or_home, OutputLayout};
use crate::mapping::{map_voxels, CorrespondenceTable, MappingTarget};
use crate::region::{build_region, clean_parcellation, ReferenceRegion, RegionMask};
use crate::robust::{select_outliers, DescriptiveStats, Lts};
use crate::suvr::{normalise, ReferenceStat, ReferenceUptake};
use crate::uptake::UptakeTable;
use crate::{DeformationField, LabelVolume, NiftiWrite, PetScan, Timepoint};

/// 一次运行的输入文件路径.
#[derive(Clone, Debug, Default)]
pub struct PipelineInputs {
    /// 受试者标签, 可带 `sub-` 前缀.
    pub subject: String,

    /// midpoint -> baseline PET 形变场.
    pub mid_to_bl: PathBuf,

    /// midpoint -> follow-up PET 形变场.
    pub mid_to_fu: PathBuf,

    /// midpoint 空间 GIF 分区.
    pub mid_par: PathBuf,

    /// baseline PET.
    pub bl_pet: PathBuf,

    /// follow-up PET.
    pub fu_pet: PathBuf,

    /// 外部参考区域掩膜 (midpoint 空间).
    pub ref_roi_mask: Option<PathBuf>,

    /// 用于清洗分区的脑掩膜 (midpoint 空间).
    pub brain_masks: Vec<PathBuf>,
}

/// 运行参数.
#[derive(Clone, Debug)]
pub struct RunConfig {
    region: ReferenceRegion,
    alpha: f64,
    seed: u64,
    root: Option<PathBuf>,
    reference_stat: ReferenceStat,
    suvr: bool,
    parallel: bool,
}

impl RunConfig {
    /// 以参考区域 `region` 和默认参数创建.
    pub fn new(region: ReferenceRegion) -> Self {
        Self {
            region,
            alpha: DEFAULT_ALPHA,
            seed: LTS_SEED,
            root: None,
            reference_stat: ReferenceStat::default(),
            suvr: true,
            parallel: cfg!(feature = "rayon"),
        }
    }

    /// LTS 截尾比例. 越界值在拟合时被替换为 0.75.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// LTS 随机种子.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// 输出根目录. 未设置时使用 `$LONG_SUVR_ROOT` 或 `$HOME/dataset/long_suvr`.
    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = Some(root.into());
        self
    }

    /// 归一化使用的参考统计量.
    pub fn with_reference_stat(mut self, stat: ReferenceStat) -> Self {
        self.reference_stat = stat;
        self
    }

    /// 是否输出 SUVR 图像.
    pub fn with_suvr(mut self, suvr: bool) -> Self {
        self.suvr = suvr;
        self
    }

    /// 是否并行映射. 没有启用 `rayon` feature 时被忽略.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// 参考区域.
    #[inline]
    pub fn region(&self) -> ReferenceRegion {
        self.region
    }

    /// 解析输出根目录.
    pub fn root_dir(&self) -> Result<PathBuf> {
        match &self.root {
            Some(r) => Ok(r.clone()),
            None => root_dir_from_env_or_home().ok_or(SuvrError::UnknownRoot),
        }
    }
}

/// 已加载到内存的输入.
#[derive(Clone, Debug)]
pub struct LoadedInputs {
    par: LabelVolume,
    external: Option<PetScan>,
    brain_masks: Vec<PetScan>,
    to_bl: DeformationField,
    to_fu: DeformationField,
    bl_pet: PetScan,
    fu_pet: PetScan,
}

impl LoadedInputs {
    /// 直接由内存中的体数据组装.
    pub fn new(
        par: LabelVolume,
        to_bl: DeformationField,
        to_fu: DeformationField,
        bl_pet: PetScan,
        fu_pet: PetScan,
    ) -> Self {
        Self {
            par,
            external: None,
            brain_masks: Vec::new(),
            to_bl,
            to_fu,
            bl_pet,
            fu_pet,
        }
    }

    /// 设置外部参考区域掩膜.
    pub fn with_external(mut self, mask: PetScan) -> Self {
        self.external = Some(mask);
        self
    }

    /// 设置清洗分区用的脑掩膜.
    pub fn with_brain_masks(mut self, masks: Vec<PetScan>) -> Self {
        self.brain_masks = masks;
        self
    }

    /// 从文件加载全部输入.
    pub fn load(inputs: &PipelineInputs) -> Result<Self> {
        info!("Loading inputs for {}", inputs.subject);
        let external = inputs.ref_roi_mask.as_ref().map(PetScan::open).transpose()?;
        let brain_masks = inputs
            .brain_masks
            .iter()
            .map(PetScan::open)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            par: LabelVolume::open_labels(&inputs.mid_par)?,
            external,
            brain_masks,
            to_bl: DeformationField::open(&inputs.mid_to_bl)?,
            to_fu: DeformationField::open(&inputs.mid_to_fu)?,
            bl_pet: PetScan::open(&inputs.bl_pet)?,
            fu_pet: PetScan::open(&inputs.fu_pet)?,
        })
    }

    /// 指定时间点的 PET.
    #[inline]
    pub fn pet(&self, tp: Timepoint) -> &PetScan {
        match tp {
            Timepoint::Baseline => &self.bl_pet,
            Timepoint::Followup => &self.fu_pet,
        }
    }

    fn target(&self, tp: Timepoint) -> MappingTarget<'_> {
        match tp {
            Timepoint::Baseline => MappingTarget::new(&self.to_bl, &self.bl_pet),
            Timepoint::Followup => MappingTarget::new(&self.to_fu, &self.fu_pet),
        }
    }
}

/// 离群筛选阶段的结果摘要.
#[derive(Clone, Debug)]
pub struct OutlierReport {
    /// 实际使用的截尾比例.
    pub alpha: f64,

    /// 离群体素个数.
    pub outliers: usize,

    /// 内点个数.
    pub inliers: usize,

    /// 摄取值非有限, 未参与拟合的体素个数.
    pub dropped: usize,

    /// 内点描述统计量.
    pub stats: DescriptiveStats,

    /// 参考值. 未输出 SUVR 时为 `None`.
    pub reference: Option<ReferenceUptake>,
}

/// 一次运行的结果摘要.
#[derive(Debug)]
pub struct RunReport {
    /// 输出布局.
    pub layout: OutputLayout,

    /// 参考区域体素数 `N`.
    pub region_voxels: usize,

    /// 去重后保留的体素对个数.
    pub retained: usize,

    /// 被拒绝的体素个数.
    pub rejected: usize,

    /// 离群筛选阶段. 失败时上游产物仍然有效.
    pub outlier_stage: Result<OutlierReport>,
}

/// 从文件加载输入并运行.
///
/// 配置错误 (例如缺少外部掩膜) 在读取任何体数据之前报告.
pub fn run(inputs: &PipelineInputs, config: &RunConfig) -> Result<RunReport> {
    if config.region.needs_external_mask() && inputs.ref_roi_mask.is_none() {
        return Err(SuvrError::MissingExternalMask(config.region.name()));
    }
    let loaded = LoadedInputs::load(inputs)?;
    run_loaded(&loaded, &inputs.subject, config)
}

/// 在已加载的输入上运行.
pub fn run_loaded(inputs: &LoadedInputs, subject: &str, config: &RunConfig) -> Result<RunReport> {
    let layout = OutputLayout::new(config.root_dir()?, subject, config.region);
    info!("Running {} / {}", layout.subject(), config.region);

    let par = if inputs.brain_masks.is_empty() {
        Cow::Borrowed(&inputs.par)
    } else {
        let masks: Vec<&PetScan> = inputs.brain_masks.iter().collect();
        Cow::Owned(clean_parcellation(&inputs.par, &masks)?)
    };
    let region = build_region(config.region, &par, inputs.external.as_ref())?;

    let table = correspond(&region, inputs, config.parallel)?;
    let uptake = UptakeTable::extract(&table, &inputs.bl_pet, &inputs.fu_pet);

    layout.create_dirs()?;
    region.volume().save(layout.midpoint_mask())?;
    for tp in [Timepoint::Baseline, Timepoint::Followup] {
        table.mask(tp).save(layout.pet_mask(tp))?;
    }
    uptake.write_csv(layout.uptake_csv())?;
    info!("Upstream artifacts written under {}", layout.subject_dir().display());

    let outlier_stage = outlier_stage(&layout, &table, &uptake, inputs, config);
    if let Err(e) = &outlier_stage {
        error!("Outlier selection failed: {e}");
    }

    Ok(RunReport {
        region_voxels: region.len(),
        retained: table.len(),
        rejected: table.rejected().len(),
        layout,
        outlier_stage,
    })
}

fn correspond(
    region: &RegionMask,
    inputs: &LoadedInputs,
    parallel: bool,
) -> Result<CorrespondenceTable> {
    let (bl, fu) = (
        inputs.target(Timepoint::Baseline),
        inputs.target(Timepoint::Followup),
    );
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            if parallel {
                return crate::mapping::par_map_voxels(region, bl, fu);
            }
        } else {
            let _ = parallel;
        }
    }
    map_voxels(region, bl, fu)
}

fn outlier_stage(
    layout: &OutputLayout,
    table: &CorrespondenceTable,
    uptake: &UptakeTable,
    inputs: &LoadedInputs,
    config: &RunConfig,
) -> Result<OutlierReport> {
    let lts = Lts::new(config.alpha).with_seed(config.seed);
    let sel = select_outliers(uptake, &lts)?;

    sel.inliers().write_csv(layout.inlier_csv())?;
    sel.write_outlier_csv(layout.outlier_csv())?;
    sel.stats().write_csv(layout.stats_csv())?;
    for tp in [Timepoint::Baseline, Timepoint::Followup] {
        sel.outlier_mask(table.mask(tp))
            .save(layout.outlier_mask(tp, lts.alpha()))?;
    }

    let reference = if config.suvr {
        let r = ReferenceUptake::from_stats(sel.stats(), config.reference_stat)?;
        for tp in [Timepoint::Baseline, Timepoint::Followup] {
            normalise(inputs.pet(tp), r.at(tp))?.save(layout.suvr_image(tp))?;
        }
        Some(r)
    } else {
        None
    };

    Ok(OutlierReport {
        alpha: lts.alpha(),
        outliers: sel.outliers().len(),
        inliers: sel.inliers().len(),
        dropped: sel.dropped().len(),
        stats: *sel.stats(),
        reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robust::FitError;
    use crate::{Affine, NiftiVolumeAttr};
    use ndarray::Array3;

    const SPIKES: [(usize, usize, usize); 2] = [(0, 1, 2), (3, 3, 0)];

    fn grid_field(shape: (usize, usize, usize)) -> DeformationField {
        DeformationField::from_fn(shape, Affine::identity(), |(i, j, k)| {
            [i as f64, j as f64, k as f64]
        })
    }

    /// 4x4x4 全部标为小脑, 恒等形变, follow-up = 2 * baseline, 两个体素异常升高.
    fn cube() -> LoadedInputs {
        let shape = (4, 4, 4);
        let par = LabelVolume::fake(Array3::from_elem(shape, 39), Affine::identity());
        let bl = PetScan::fake(
            Array3::from_shape_fn(shape, |(i, j, k)| (10 + 16 * i + 4 * j + k) as f32),
            Affine::identity(),
        );
        let mut fu = bl.map(|v| 2.0 * v);
        for pos in SPIKES {
            fu[pos] = 5.0 * bl[pos];
        }
        LoadedInputs::new(par, grid_field(shape), grid_field(shape), bl, fu)
    }

    #[test]
    fn test_run_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(ReferenceRegion::Cereb)
            .with_root(dir.path())
            .with_alpha(0.3);
        let report = run_loaded(&cube(), "01", &config).unwrap();
        assert_eq!(report.region_voxels, 64);
        assert_eq!(report.retained, 64);
        assert_eq!(report.rejected, 0);

        let outliers = report.outlier_stage.as_ref().unwrap();
        assert_eq!(outliers.alpha, 0.75);
        assert_eq!(outliers.outliers, 2);
        assert_eq!(outliers.inliers, 62);
        let reference = outliers.reference.unwrap();
        assert_eq!(reference.ratio(), 2.0);

        let layout = &report.layout;
        let listed = std::fs::read_to_string(layout.outlier_csv()).unwrap();
        // 编号 = 16 i + 4 j + k + 1.
        assert_eq!(listed, "voxel_number\n7\n61\n");
        assert_eq!(UptakeTable::read_csv(layout.uptake_csv()).unwrap().len(), 64);
        assert_eq!(UptakeTable::read_csv(layout.inlier_csv()).unwrap().len(), 62);
        assert!(layout.stats_csv().is_file());

        let mask = PetScan::open(layout.outlier_mask(Timepoint::Followup, 0.75)).unwrap();
        assert_eq!(mask[(0, 1, 2)], 1.0);
        assert_eq!(mask[(3, 3, 0)], 1.0);
        assert_eq!(mask.data().sum(), 2.0);

        let bl_mask = LabelVolume::open_labels(layout.pet_mask(Timepoint::Baseline)).unwrap();
        assert_eq!(bl_mask[(3, 3, 3)], 64);

        let suvr = PetScan::open(layout.suvr_image(Timepoint::Baseline)).unwrap();
        assert_eq!(suvr.shape(), (4, 4, 4));
        assert!((suvr[(0, 0, 0)] as f64 - 10.0 / reference.baseline).abs() < 1e-6);
    }

    /// 两次运行 (顺序映射与默认映射) 的产物逐字节一致.
    #[test]
    fn test_runs_are_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = cube();
        let first = run_loaded(
            &inputs,
            "05",
            &RunConfig::new(ReferenceRegion::Cereb)
                .with_root(dir.path().join("a"))
                .with_parallel(false),
        )
        .unwrap();
        let second = run_loaded(
            &inputs,
            "05",
            &RunConfig::new(ReferenceRegion::Cereb).with_root(dir.path().join("b")),
        )
        .unwrap();
        let (a, b) = (&first.layout, &second.layout);

        let bytes = |p: PathBuf| std::fs::read(p).unwrap();
        for (pa, pb) in [
            (a.uptake_csv(), b.uptake_csv()),
            (a.inlier_csv(), b.inlier_csv()),
            (a.outlier_csv(), b.outlier_csv()),
            (a.stats_csv(), b.stats_csv()),
        ] {
            assert_eq!(bytes(pa), bytes(pb));
        }
        for tp in [Timepoint::Baseline, Timepoint::Followup] {
            let ma = LabelVolume::open_labels(a.pet_mask(tp)).unwrap();
            let mb = LabelVolume::open_labels(b.pet_mask(tp)).unwrap();
            assert_eq!(ma.data(), mb.data());
            let oa = PetScan::open(a.outlier_mask(tp, 0.75)).unwrap();
            let ob = PetScan::open(b.outlier_mask(tp, 0.75)).unwrap();
            assert_eq!(oa.data(), ob.data());
        }
    }

    #[test]
    fn test_non_finite_uptake_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = cube();
        inputs.fu_pet[(2, 2, 2)] = f32::NAN;
        let config = RunConfig::new(ReferenceRegion::Cereb).with_root(dir.path());
        let report = run_loaded(&inputs, "06", &config).unwrap();
        let outliers = report.outlier_stage.unwrap();
        assert_eq!(outliers.dropped, 1);
        assert_eq!(outliers.outliers, 2);
        assert_eq!(outliers.inliers, 61);
        assert!(outliers.reference.unwrap().followup.is_finite());
    }

    #[test]
    fn test_outlier_stage_failure_keeps_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let mut par = Array3::<i32>::zeros((3, 3, 3));
        for pos in [(0, 0, 1), (0, 2, 2), (1, 1, 0), (2, 0, 2)] {
            par[pos] = 39;
        }
        let bl = PetScan::fake(
            Array3::from_shape_fn((3, 3, 3), |(i, j, k)| (100 * i + 10 * j + k) as f32),
            Affine::identity(),
        );
        let fu = bl.map(|v| 2.0 * v);
        let inputs = LoadedInputs::new(
            LabelVolume::fake(par, Affine::identity()),
            grid_field((3, 3, 3)),
            grid_field((3, 3, 3)),
            bl,
            fu,
        );
        let config = RunConfig::new(ReferenceRegion::Cereb).with_root(dir.path());
        let report = run_loaded(&inputs, "sub-02", &config).unwrap();
        assert_eq!(report.retained, 4);
        assert!(matches!(
            report.outlier_stage,
            Err(SuvrError::Fit(FitError::TooFewSamples(4, 10)))
        ));

        let layout = &report.layout;
        assert!(layout.midpoint_mask().is_file());
        assert!(layout.pet_mask(Timepoint::Followup).is_file());
        let uptake = UptakeTable::read_csv(layout.uptake_csv()).unwrap();
        assert_eq!(uptake.rows()[3].followup_uptake, 404.0);
        assert!(!layout.outlier_csv().exists());
    }

    #[test]
    fn test_run_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = |name: &str| dir.path().join("in").join(name);
        std::fs::create_dir_all(dir.path().join("in")).unwrap();

        let cube = cube();
        cube.par.save(input("par.nii.gz")).unwrap();
        cube.to_bl.save(input("to_bl.nii.gz")).unwrap();
        cube.to_fu.save(input("to_fu.nii.gz")).unwrap();
        cube.bl_pet.save(input("bl.nii.gz")).unwrap();
        cube.fu_pet.save(input("fu.nii.gz")).unwrap();
        let brain = cube.bl_pet.map(|_| 1.0f32);
        brain.save(input("brain.nii.gz")).unwrap();

        let inputs = PipelineInputs {
            subject: "03".into(),
            mid_to_bl: input("to_bl.nii.gz"),
            mid_to_fu: input("to_fu.nii.gz"),
            mid_par: input("par.nii.gz"),
            bl_pet: input("bl.nii.gz"),
            fu_pet: input("fu.nii.gz"),
            ref_roi_mask: None,
            brain_masks: vec![input("brain.nii.gz")],
        };
        let config = RunConfig::new(ReferenceRegion::GmCereb)
            .with_root(dir.path().join("out"))
            .with_reference_stat(ReferenceStat::Median)
            .with_suvr(false);
        let report = run(&inputs, &config).unwrap();
        assert_eq!(report.retained, 64);
        let outliers = report.outlier_stage.unwrap();
        assert_eq!(outliers.outliers, 2);
        assert!(outliers.reference.is_none());
        assert!(!report.layout.suvr_image(Timepoint::Baseline).exists());
    }

    #[test]
    fn test_missing_external_mask_is_reported_first() {
        let inputs = PipelineInputs {
            subject: "04".into(),
            ..Default::default()
        };
        let err = run(&inputs, &RunConfig::new(ReferenceRegion::GmCerebClean)).unwrap_err();
        assert!(err.is_config());
    }
}
