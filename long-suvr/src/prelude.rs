//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, RawIdx3d, Timepoint};

pub use crate::{
    Affine, DeformationField, LabelVolume, MaskVolume, NiftiVolumeAttr, NiftiWrite, PetScan,
    Volume,
};

pub use crate::{Result, SuvrError};

pub use crate::consts::{labels, DEFAULT_ALPHA, MIN_FIT_SAMPLES};

pub use crate::region::{build_region, clean_parcellation, ReferenceRegion, RegionMask};

pub use crate::mapping::{map_voxels, Correspondence, CorrespondenceTable, MappingTarget};

#[cfg(feature = "rayon")]
pub use crate::mapping::par_map_voxels;

pub use crate::uptake::{UptakeRecord, UptakeTable};

pub use crate::robust::{
    effective_alpha, select_outliers, DescriptiveStats, FitError, LineFit, Lts, OutlierSelection,
    RobustFit,
};

pub use crate::suvr::{normalise, ReferenceStat, ReferenceUptake};

pub use crate::layout::{root_dir_from_env_or_home, OutputLayout};

pub use crate::pipeline::{run, run_loaded, LoadedInputs, PipelineInputs, RunConfig, RunReport};
