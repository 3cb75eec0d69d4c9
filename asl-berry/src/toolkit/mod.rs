//! 外部图像工具箱接口.
//!
//! 脑提取、分割、配准、变换应用和饱和恢复模型拟合都经由 [`ImageToolkit`] 完成.
//! 所有调用都是同步阻塞的, 工具箱内部是否并行对调用方不可见.

use crate::data::{Affine, MrVolume};

pub mod fsl;

pub use fsl::FslToolkit;

/// 外部工具调用失败. 附带工具名与其诊断信息, 不做重试.
#[derive(Clone, Debug, thiserror::Error)]
#[error("external tool `{tool}` failed: {message}")]
pub struct ToolError {
    /// 工具名.
    pub tool: &'static str,

    /// 诊断信息.
    pub message: String,
}

impl ToolError {
    /// 构建错误.
    #[inline]
    pub fn new(tool: &'static str, message: impl Into<String>) -> Self {
        Self {
            tool,
            message: message.into(),
        }
    }
}

/// 工具箱调用结果.
pub type ToolResult<T> = Result<T, ToolError>;

/// 空间变换.
#[derive(Clone, Debug)]
pub enum Transform {
    /// 仿射矩阵.
    Affine(Affine),

    /// 非线性形变场.
    Warp(MrVolume),
}

/// 重采样插值方式.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interpolation {
    /// 最近邻. 用于标签/掩膜.
    NearestNeighbour,

    /// 三线性.
    Trilinear,

    /// 样条.
    Spline,
}

/// 组织分割结果.
#[derive(Clone, Debug)]
pub struct Segmentation {
    /// 各类别的部分容积估计 (PVE) 图, 按类别索引排列.
    pub pve: Vec<MrVolume>,

    /// 偏置场 (乘性). 工具箱不提供时为 `None`.
    pub bias_field: Option<MrVolume>,
}

impl Segmentation {
    /// 获取第 `class` 类的 PVE 图.
    #[inline]
    pub fn class(&self, class: usize) -> Option<&MrVolume> {
        self.pve.get(class)
    }
}

/// Look-Locker 读出参数. 只透传给拟合工具, 不影响本 crate 的控制流.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LookLocker {
    /// 翻转角 (度).
    pub flip_angle: f64,

    /// 低翻转角 (度).
    pub lower_flip_angle: Option<f64>,

    /// 相位数.
    pub phases: Option<u32>,
}

/// 饱和恢复拟合请求.
#[derive(Copy, Clone, Debug)]
pub struct SatRecovRequest<'a> {
    /// 多 TI 数据.
    pub data: &'a MrVolume,

    /// 拟合范围.
    pub mask: &'a MrVolume,

    /// 反转时间 (秒).
    pub tis: &'a [f64],

    /// T1 先验均值 (秒).
    pub prior_t1: f64,

    /// Look-Locker 选项.
    pub look_locker: Option<&'a LookLocker>,

    /// 将饱和效率固定为 100%.
    pub fix_saturation_efficiency: bool,
}

/// 饱和恢复拟合结果.
#[derive(Clone, Debug)]
pub struct SatRecovFit {
    /// T1 图.
    pub t1: MrVolume,

    /// M0 图.
    pub m0: MrVolume,

    /// 翻转角校正图 (仅 Look-Locker).
    pub flip_angle_correction: Option<MrVolume>,
}

/// 体素统计.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VoxelStats {
    /// 范围内平均值. 范围为空时为 `None`.
    pub mean: Option<f64>,

    /// 范围内非零体素个数.
    pub nonzero: usize,
}

/// 外部图像工具箱.
pub trait ImageToolkit {
    /// 脑提取, 返回二值脑掩膜.
    fn brain_extract(&self, image: &MrVolume) -> ToolResult<MrVolume>;

    /// 组织分割.
    fn segment(&self, image: &MrVolume) -> ToolResult<Segmentation>;

    /// 线性配准 `moving -> fixed`.
    fn linear_register(&self, moving: &MrVolume, fixed: &MrVolume) -> ToolResult<Affine>;

    /// 非线性配准 `moving -> fixed`, 以 `seed` 为初始仿射. 返回形变场.
    fn nonlinear_register(
        &self,
        moving: &MrVolume,
        fixed: &MrVolume,
        seed: &Affine,
    ) -> ToolResult<MrVolume>;

    /// 求逆变换. 形变场求逆时以 `reference` 为输出网格.
    fn invert_transform(&self, transform: &Transform, reference: &MrVolume)
        -> ToolResult<Transform>;

    /// 将 `image` 经 `transform` 重采样到 `reference` 的网格上.
    ///
    /// `supersample` 为超采样倍数, 用于避免下采样时的混叠.
    fn apply_transform(
        &self,
        image: &MrVolume,
        transform: &Transform,
        reference: &MrVolume,
        interpolation: Interpolation,
        supersample: Option<u32>,
    ) -> ToolResult<MrVolume>;

    /// 体素统计. 默认在本地计算.
    fn statistics(&self, image: &MrVolume, mask: Option<&MrVolume>) -> ToolResult<VoxelStats> {
        let mean = image
            .mean_in(mask)
            .map_err(|e| ToolError::new("stats", e.to_string()))?;
        let nonzero = match mask {
            Some(m) => image
                .masked_by(m)
                .map_err(|e| ToolError::new("stats", e.to_string()))?
                .count_nonzero(),
            None => image.count_nonzero(),
        };
        Ok(VoxelStats { mean, nonzero })
    }

    /// 饱和恢复模型拟合.
    fn fit_saturation_recovery(&self, request: &SatRecovRequest<'_>) -> ToolResult<SatRecovFit>;
}
