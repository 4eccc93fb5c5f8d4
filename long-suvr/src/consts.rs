//! 通用常量.

/// NeuroMorphometrics (GIF) 分区标签.
pub mod labels {
    /// 整个小脑: 小脑灰质, 小脑白质与蚓部.
    pub const CEREB: [i32; 7] = [39, 40, 41, 42, 72, 73, 74];

    /// 小脑灰质与蚓部.
    pub const GM_CEREB: [i32; 5] = [39, 40, 72, 73, 74];

    /// 脑桥.
    pub const PONS: [i32; 1] = [35];

    /// 皮层下白质.
    pub const WM_SUBCORT: [i32; 2] = [45, 46];

    /// GIF v3 皮层下白质分区.
    pub const WM_SUBCORT_GIF3: [i32; 13] = [81, 82, 83, 84, 85, 86, 87, 89, 90, 91, 92, 93, 94];

    /// 背景.
    pub const BACKGROUND: i32 = 0;
}

/// LTS 截尾比例的合法区间 (闭区间).
pub const ALPHA_RANGE: std::ops::RangeInclusive<f64> = 0.5..=1.0;

/// `alpha` 越界时使用的默认截尾比例.
pub const DEFAULT_ALPHA: f64 = 0.75;

/// 稳健拟合所需的最少体素对个数.
pub const MIN_FIT_SAMPLES: usize = 10;

/// LTS 随机抽取的初始子集个数上限.
pub const LTS_SUBSETS: usize = 500;

/// LTS 保留并迭代到收敛的最优初始子集个数.
pub const LTS_BEST: usize = 10;

/// LTS 单次 C-step 迭代的最多轮数.
pub const LTS_MAX_CSTEPS: usize = 100;

/// LTS 默认随机种子.
pub const LTS_SEED: u64 = 0x5EED_1234;

/// 标准化残差的离群阈值所对应的正态分位点.
pub const OUTLIER_QUANTILE: f64 = 0.9875;

/// 输出根目录的环境变量名.
pub const ROOT_ENV: &str = "LONG_SUVR_ROOT";
