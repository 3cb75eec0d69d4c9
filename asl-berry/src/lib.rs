#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 基于参考组织 (CSF/GM/WM) 的 ASL 标定: 从标定采集中估计 M0,
//! 并将相对灌注信号换算为 CBF (ml/100g/min).
//!
//! 脑提取、组织分割、配准与饱和恢复模型拟合这几类重型算法不在本 crate 中实现,
//! 统一经由 [`ImageToolkit`] trait 交给外部工具箱完成 (参见 [`toolkit::fsl`]).
//! 本 crate 负责其余部分: 参数决议、线圈灵敏度、参考组织掩膜、M0 估计和校正方程.
//!
//! # 流程
//!
//! 1. [`config`]: 构建只读的 [`RunConfiguration`], 并按 "显式值 > 体素图均值 > 组织默认值"
//!   的顺序决议 T1/T2/分配系数.
//! 2. [`sensitivity`]: 可选的线圈灵敏度图. 三个来源: 直接提供, 参考线圈/实际线圈图像对,
//!   或者分割得到的偏置场.
//! 3. [`refmask`]: 标定空间中的参考组织二值掩膜. 可以直接提供, 也可以由结构像自动派生
//!   (CSF 时额外限制到脑室).
//! 4. [`estimate`]: 两种 M0 估计方式, `longtr` (闭式) 与 `satrecov` (模型拟合).
//! 5. [`equation`]: T2 衰减、增益、分配系数、标记效率的顺序校正.
//! 6. [`output`]: 按需写出结果.
//!
//! 整个运行过程的入口是 [`pipeline::run`].
//!
//! # 注意
//!
//! 1. 所有中间体数据都放在一次运行独占的 [`WorkingArea`] 中, 无论成功与否,
//!   离开作用域即被清理 (调试模式下保留).
//! 2. 标量计算全程使用 `f64`, 不做两位小数截断.

/// 三维索引 `(z, y, x)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 四维索引 `(t, z, y, x)`.
pub type Idx4d = (usize, usize, usize, usize);

/// nii 格式 MR 图像基础数据结构.
pub mod data;

pub use data::{Affine, MrVolume, NiftiHeaderAttr, OpenVolumeError, ShapeMismatch};

pub mod consts;

pub mod config;

pub use config::{Mode, ParamSource, RunConfiguration, RunConfigurationBuilder, TissueType};

mod error;

pub use error::{CalibError, CalibResult, MaskOrigin};

pub mod toolkit;

pub use toolkit::{ImageToolkit, ToolError};

pub mod equation;
pub mod estimate;
pub mod output;
pub mod pipeline;
pub mod prelude;
pub mod refmask;
pub mod runlog;
pub mod sensitivity;

mod workspace;

pub use runlog::RunLog;
pub use workspace::WorkingArea;
