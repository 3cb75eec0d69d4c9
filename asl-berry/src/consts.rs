//! 通用常量.
//!
//! 时间单位约定: T1, TR, Taq, TI 以秒为单位; TE, T2, T2* 以毫秒为单位.

/// 组织纵向弛豫时间 T1 (秒).
pub mod t1 {
    /// 脑脊液.
    pub const CSF: f64 = 4.3;

    /// 灰质.
    pub const GM: f64 = 1.3;

    /// 白质.
    pub const WM: f64 = 1.0;
}

/// 组织与血液的横向弛豫时间 T2 (毫秒).
pub mod t2 {
    /// 脑脊液.
    pub const CSF: f64 = 750.0;

    /// 灰质.
    pub const GM: f64 = 100.0;

    /// 白质.
    pub const WM: f64 = 50.0;

    /// 血液.
    pub const BLOOD: f64 = 150.0;
}

/// 组织与血液的有效横向弛豫时间 T2* (毫秒).
pub mod t2_star {
    /// 脑脊液.
    pub const CSF: f64 = 400.0;

    /// 灰质.
    pub const GM: f64 = 50.0;

    /// 白质.
    pub const WM: f64 = 50.0;

    /// 血液.
    pub const BLOOD: f64 = 50.0;
}

/// 组织/血液分配系数.
pub mod partition {
    /// 脑脊液.
    pub const CSF: f64 = 1.15;

    /// 灰质.
    pub const GM: f64 = 0.98;

    /// 白质.
    pub const WM: f64 = 0.82;
}

/// 未给定 TE 且无法决议参考组织 T2 时使用的 "可忽略" T2 (毫秒).
/// 此时 T2 校正实际上不起作用.
pub const T2_NEGLIGIBLE: f64 = 1.0e6;

/// 默认重复时间 TR (秒).
pub const DEFAULT_TR: f64 = 3.2;

/// 默认采集时长 Taq (秒).
pub const DEFAULT_TAQ: f64 = 0.0;

/// 默认增益比.
pub const DEFAULT_GAIN: f64 = 1.0;

/// 参考组织部分容积图变换到标定空间后的阈值.
pub const PVE_THRESHOLD: f32 = 0.9;

/// 部分容积图下采样到标定空间时的超采样倍数.
pub const SUPERSAMPLE_LEVEL: u32 = 4;

/// 秒到分钟 (60) 与 100g 组织 (100) 的换算, 即 `60 * 100`.
pub const CBF_SCALE: f64 = 6000.0;

/// FAST 分割结果中各组织类别的索引.
pub mod pve_class {
    /// 脑脊液.
    pub const CSF: usize = 0;

    /// 灰质.
    pub const GM: usize = 1;

    /// 白质.
    pub const WM: usize = 2;
}
