//! 运行时错误.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::data::{OpenVolumeError, ParseAffineError, ShapeMismatch};
use crate::toolkit::ToolError;

/// 参考组织掩膜的来源.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaskOrigin {
    /// 用户直接提供.
    Supplied,

    /// 从结构像自动派生.
    Derived,
}

impl fmt::Display for MaskOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supplied => f.write_str("supplied"),
            Self::Derived => f.write_str("derived"),
        }
    }
}

/// 标定过程中的错误. 所有错误对本次运行都是致命的.
#[derive(Debug, thiserror::Error)]
pub enum CalibError {
    /// 缺少必需输入.
    #[error("{0}")]
    Usage(String),

    /// 选项组合不一致或不受支持.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 无法决议的参数 (T1, T2, 分配系数).
    #[error("missing parameter: {0} could not be determined, specify it explicitly")]
    MissingParameter(&'static str),

    /// 用户提供的配准矩阵或形变场路径不存在.
    #[error("registration input not found: {}", .0.display())]
    MissingRegistrationInput(PathBuf),

    /// 最终参考组织掩膜为空.
    #[error("{}", empty_mask_message(.0))]
    EmptyMask(MaskOrigin),

    /// 外部工具箱调用失败.
    #[error(transparent)]
    ExternalTool(#[from] ToolError),

    /// 网格不一致.
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),

    /// 读取图像失败.
    #[error("cannot read image {}: {reason}", path.display())]
    Image {
        /// 图像路径.
        path: PathBuf,
        /// 底层原因.
        reason: String,
    },

    /// 读取仿射矩阵失败.
    #[error("cannot read matrix {}: {source}", path.display())]
    Matrix {
        /// 矩阵路径.
        path: PathBuf,
        /// 底层原因.
        source: ParseAffineError,
    },

    /// 写出图像失败.
    #[error("nifti error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 其他底层 I/O 错误.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

fn empty_mask_message(origin: &MaskOrigin) -> &'static str {
    match origin {
        MaskOrigin::Derived => {
            "automatic reference tissue masking failed (empty mask), \
             check the brain extraction of the structural image"
        }
        MaskOrigin::Supplied => {
            "supplied reference tissue mask is empty, \
             check that the mask is in the same space as the calibration image"
        }
    }
}

impl CalibError {
    /// 为打开图像的错误附加路径信息.
    #[inline]
    pub fn image(path: impl Into<PathBuf>, e: OpenVolumeError) -> Self {
        Self::Image {
            path: path.into(),
            reason: e.to_string(),
        }
    }

    /// 为读取矩阵的错误附加路径信息.
    #[inline]
    pub fn matrix(path: impl Into<PathBuf>, source: ParseAffineError) -> Self {
        Self::Matrix {
            path: path.into(),
            source,
        }
    }

    /// 是否为用法错误 (此时应向用户打印用法).
    #[inline]
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// 标定运行时结果.
pub type CalibResult<T> = Result<T, CalibError>;
