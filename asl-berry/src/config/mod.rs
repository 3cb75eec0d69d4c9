//! 运行配置.
//!
//! [`RunConfiguration`] 在运行开始时由 [`RunConfigurationBuilder`] 一次性构建,
//! 之后所有组件只读地使用它. 参数决议规则见 [`resolve`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use itertools::Itertools;

use crate::consts::{self, pve_class};
use crate::data::{Affine, MrVolume};
use crate::error::{CalibError, CalibResult};
use crate::sensitivity::SensitivitySource;
use crate::toolkit::LookLocker;

pub mod resolve;

pub use resolve::{resolve_param, resolve_params, ResolvedParams};

/// 参考组织类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TissueType {
    /// 脑脊液.
    Csf,

    /// 白质.
    Wm,

    /// 灰质.
    Gm,

    /// 不指定组织. 所有参数必须显式给出, 掩膜必须直接提供.
    None,

    /// 分割结果中的第 `n` 类. 没有默认参数.
    Custom(u32),
}

impl TissueType {
    /// 分割结果中对应的类别索引.
    #[inline]
    pub fn pve_class(&self) -> Option<usize> {
        match self {
            Self::Csf => Some(pve_class::CSF),
            Self::Gm => Some(pve_class::GM),
            Self::Wm => Some(pve_class::WM),
            Self::Custom(n) => Some(*n as usize),
            Self::None => None,
        }
    }

    /// 按 `table` (T2 或 T2*) 获取组织默认参数.
    pub fn defaults(&self, table: &RelaxationTable) -> TissueDefaults {
        match self {
            Self::Csf => TissueDefaults {
                t1: Some(consts::t1::CSF),
                t2: Some(table.csf),
                partition: Some(consts::partition::CSF),
            },
            Self::Gm => TissueDefaults {
                t1: Some(consts::t1::GM),
                t2: Some(table.gm),
                partition: Some(consts::partition::GM),
            },
            Self::Wm => TissueDefaults {
                t1: Some(consts::t1::WM),
                t2: Some(table.wm),
                partition: Some(consts::partition::WM),
            },
            Self::None | Self::Custom(_) => TissueDefaults::default(),
        }
    }

    /// 是否为脑脊液.
    #[inline]
    pub fn is_csf(&self) -> bool {
        matches!(self, Self::Csf)
    }
}

impl FromStr for TissueType {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csf" => Ok(Self::Csf),
            "wm" => Ok(Self::Wm),
            "gm" => Ok(Self::Gm),
            "none" => Ok(Self::None),
            other => other.parse::<u32>().map(Self::Custom).map_err(|_| {
                CalibError::Configuration(format!("unrecognised tissue reference type `{s}`"))
            }),
        }
    }
}

impl fmt::Display for TissueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csf => f.write_str("csf"),
            Self::Wm => f.write_str("wm"),
            Self::Gm => f.write_str("gm"),
            Self::None => f.write_str("none"),
            Self::Custom(n) => write!(f, "{n}"),
        }
    }
}

/// 一组 T2 类默认值 (毫米). 整表选取, 因此不存在部分为 T2、部分为 T2* 的状态.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RelaxationTable {
    /// 脑脊液.
    pub csf: f64,

    /// 灰质.
    pub gm: f64,

    /// 白质.
    pub wm: f64,

    /// 血液.
    pub blood: f64,
}

impl RelaxationTable {
    /// T2 表.
    pub const T2: RelaxationTable = RelaxationTable {
        csf: consts::t2::CSF,
        gm: consts::t2::GM,
        wm: consts::t2::WM,
        blood: consts::t2::BLOOD,
    };

    /// T2* 表.
    pub const T2_STAR: RelaxationTable = RelaxationTable {
        csf: consts::t2_star::CSF,
        gm: consts::t2_star::GM,
        wm: consts::t2_star::WM,
        blood: consts::t2_star::BLOOD,
    };

    /// 按开关整表选取.
    #[inline]
    pub const fn select(use_t2star: bool) -> Self {
        if use_t2star {
            Self::T2_STAR
        } else {
            Self::T2
        }
    }
}

/// 组织默认参数. 无默认值的项为 `None`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TissueDefaults {
    /// T1 (秒).
    pub t1: Option<f64>,

    /// T2 或 T2* (毫秒).
    pub t2: Option<f64>,

    /// 分配系数.
    pub partition: Option<f64>,
}

/// 参数来源: 显式数值或逐体素图.
#[derive(Clone, Debug)]
pub enum ParamSource {
    /// 显式数值.
    Value(f64),

    /// 逐体素图, 取参考组织掩膜内的平均值.
    Map(MrVolume),
}

/// 命令行形式的参数: 数值或图像路径.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParamSpec {
    /// 数值.
    Value(f64),

    /// 图像路径.
    Path(PathBuf),
}

impl FromStr for ParamSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<f64>() {
            Ok(v) => Self::Value(v),
            Err(_) => Self::Path(PathBuf::from(s)),
        })
    }
}

impl ParamSpec {
    /// 读取图像 (如果是路径).
    pub fn load(&self) -> CalibResult<ParamSource> {
        match self {
            Self::Value(v) => Ok(ParamSource::Value(*v)),
            Self::Path(p) => MrVolume::open(p)
                .map(ParamSource::Map)
                .map_err(|e| CalibError::image(p, e)),
        }
    }
}

/// M0 估计方式名.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModeName {
    /// 长 TR 质子密度像, 闭式计算.
    LongTr,

    /// 饱和恢复序列, 模型拟合.
    SatRecov,
}

impl FromStr for ModeName {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "longtr" => Ok(Self::LongTr),
            "satrecov" => Ok(Self::SatRecov),
            _ => Err(CalibError::Configuration(format!(
                "unrecognised calibration mode `{s}`"
            ))),
        }
    }
}

/// M0 估计方式及其参数.
#[derive(Clone, Debug, PartialEq)]
pub enum Mode {
    /// 长 TR 质子密度像.
    LongTr {
        /// 重复时间 (秒).
        tr: f64,

        /// 采集时长 (秒).
        taq: f64,
    },

    /// 饱和恢复序列.
    SatRecov {
        /// 反转时间 (秒).
        tis: Vec<f64>,

        /// Look-Locker 选项.
        look_locker: Option<LookLocker>,

        /// 将饱和效率固定为 100%.
        fix_saturation_efficiency: bool,
    },
}

impl Mode {
    /// 方式名.
    #[inline]
    pub fn name(&self) -> ModeName {
        match self {
            Self::LongTr { .. } => ModeName::LongTr,
            Self::SatRecov { .. } => ModeName::SatRecov,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LongTr { tr, taq } => write!(f, "longtr (TR={tr} s, Taq={taq} s)"),
            Self::SatRecov { tis, .. } => write!(f, "satrecov (TIs={})", tis.iter().join(",")),
        }
    }
}

/// 结构像及标定空间到结构空间的变换.
#[derive(Clone, Debug)]
pub struct StructuralInput {
    /// 已去颅骨的结构像.
    pub image: MrVolume,

    /// 标定空间 -> 结构空间.
    pub calib_to_struct: Affine,
}

/// 标准空间模板.
#[derive(Clone, Debug)]
pub struct StandardSpace {
    /// 标准脑.
    pub brain: MrVolume,

    /// 脑室掩膜图谱.
    pub ventricles: MrVolume,
}

/// 标准空间配准选项.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StandardRegistration {
    /// 请求非线性配准.
    pub nonlinear: bool,

    /// 外部提供的结构空间 -> 标准空间仿射矩阵.
    pub matrix: Option<PathBuf>,

    /// 外部提供的结构空间 -> 标准空间形变场.
    pub warp: Option<PathBuf>,
}

impl StandardRegistration {
    /// 是否走非线性路径: 请求了非线性配准或提供了形变场.
    #[inline]
    pub fn uses_nonlinear(&self) -> bool {
        self.nonlinear || self.warp.is_some()
    }

    /// 外部提供的所有路径.
    pub fn supplied_paths(&self) -> impl Iterator<Item = &Path> {
        self.matrix.iter().chain(self.warp.iter()).map(PathBuf::as_path)
    }
}

/// 一次运行的全部已决议选项. 构建后只读.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RunConfiguration {
    /// 标定图像.
    pub calibration: MrVolume,

    /// 结构像及变换.
    pub structural: Option<StructuralInput>,

    /// M0 估计方式.
    pub mode: Mode,

    /// 参考组织类型.
    pub tissue: TissueType,

    /// 回波时间 (毫秒).
    pub te: Option<f64>,

    /// 标定与 ASL 采集的增益比.
    pub gain: f64,

    /// 标记效率.
    pub alpha: Option<f64>,

    /// 使用 T2* 默认值.
    pub use_t2star: bool,

    /// 参考组织 T1 覆盖.
    pub t1: Option<ParamSource>,

    /// 参考组织 T2 覆盖.
    pub t2: Option<ParamSource>,

    /// 血液 T2 覆盖.
    pub t2_blood: Option<ParamSource>,

    /// 分配系数覆盖.
    pub partition: Option<ParamSource>,

    /// 直接提供的参考组织掩膜 (标定空间).
    pub reference_mask: Option<MrVolume>,

    /// 直接提供的脑掩膜 (标定空间).
    pub brain_mask: Option<MrVolume>,

    /// 直接提供的参考组织 PVE (结构空间).
    pub reference_pve: Option<MrVolume>,

    /// 是否将 CSF 限制到脑室.
    pub ventricle_masking: bool,

    /// 标准空间模板. CSF 且启用脑室限制时需要.
    pub standard: Option<StandardSpace>,

    /// 标准空间配准选项.
    pub registration: StandardRegistration,

    /// 线圈灵敏度来源.
    pub sensitivity: SensitivitySource,

    /// 无其他来源时, 是否用分割得到的偏置场作为灵敏度.
    pub bias_field_sensitivity: bool,

    /// 待标定的灌注图.
    pub perfusion: Option<MrVolume>,

    /// 是否导出全脑饱和恢复拟合结果 (需要输出目录).
    pub export_whole_brain: bool,
}

impl RunConfiguration {
    /// 当前配置对应的 T2 类默认值表.
    #[inline]
    pub fn relaxation_table(&self) -> RelaxationTable {
        RelaxationTable::select(self.use_t2star)
    }
}

/// [`RunConfiguration`] 构建器. 在 `build` 时统一检查输入完整性与选项一致性.
#[derive(Clone, Debug)]
pub struct RunConfigurationBuilder {
    calibration: Option<MrVolume>,
    structural: Option<MrVolume>,
    calib_to_struct: Option<Affine>,
    mode: ModeName,
    tr: f64,
    taq: f64,
    tis: Vec<f64>,
    look_locker: Option<LookLocker>,
    fix_saturation_efficiency: bool,
    tissue: TissueType,
    te: Option<f64>,
    gain: f64,
    alpha: Option<f64>,
    use_t2star: bool,
    t1: Option<ParamSource>,
    t2: Option<ParamSource>,
    t2_blood: Option<ParamSource>,
    partition: Option<ParamSource>,
    reference_mask: Option<MrVolume>,
    brain_mask: Option<MrVolume>,
    reference_pve: Option<MrVolume>,
    ventricle_masking: bool,
    standard: Option<StandardSpace>,
    registration: StandardRegistration,
    sensitivity: SensitivitySource,
    bias_field_sensitivity: bool,
    perfusion: Option<MrVolume>,
    export_whole_brain: bool,
}

impl Default for RunConfigurationBuilder {
    fn default() -> Self {
        Self {
            calibration: None,
            structural: None,
            calib_to_struct: None,
            mode: ModeName::LongTr,
            tr: consts::DEFAULT_TR,
            taq: consts::DEFAULT_TAQ,
            tis: Vec::new(),
            look_locker: None,
            fix_saturation_efficiency: false,
            tissue: TissueType::Csf,
            te: None,
            gain: consts::DEFAULT_GAIN,
            alpha: None,
            use_t2star: false,
            t1: None,
            t2: None,
            t2_blood: None,
            partition: None,
            reference_mask: None,
            brain_mask: None,
            reference_pve: None,
            ventricle_masking: true,
            standard: None,
            registration: StandardRegistration::default(),
            sensitivity: SensitivitySource::None,
            bias_field_sensitivity: true,
            perfusion: None,
            export_whole_brain: false,
        }
    }
}

macro_rules! setter {
    ($(#[$doc:meta])* $name: ident: $ty: ty) => {
        $(#[$doc])*
        #[inline]
        pub fn $name(mut self, $name: $ty) -> Self {
            self.$name = $name;
            self
        }
    };
}

impl RunConfigurationBuilder {
    /// 以默认值创建构建器.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    setter!(/// 标定图像.
        calibration: Option<MrVolume>);
    setter!(/// 结构像.
        structural: Option<MrVolume>);
    setter!(/// 标定空间 -> 结构空间变换.
        calib_to_struct: Option<Affine>);
    setter!(/// M0 估计方式.
        mode: ModeName);
    setter!(/// 重复时间 (秒).
        tr: f64);
    setter!(/// 采集时长 (秒).
        taq: f64);
    setter!(/// 反转时间 (秒).
        tis: Vec<f64>);
    setter!(/// Look-Locker 选项.
        look_locker: Option<LookLocker>);
    setter!(/// 饱和效率固定为 100%.
        fix_saturation_efficiency: bool);
    setter!(/// 参考组织类型.
        tissue: TissueType);
    setter!(/// 回波时间 (毫秒).
        te: Option<f64>);
    setter!(/// 增益比.
        gain: f64);
    setter!(/// 标记效率.
        alpha: Option<f64>);
    setter!(/// 使用 T2* 默认值.
        use_t2star: bool);
    setter!(/// 参考组织 T1 覆盖.
        t1: Option<ParamSource>);
    setter!(/// 参考组织 T2 覆盖.
        t2: Option<ParamSource>);
    setter!(/// 血液 T2 覆盖.
        t2_blood: Option<ParamSource>);
    setter!(/// 分配系数覆盖.
        partition: Option<ParamSource>);
    setter!(/// 参考组织掩膜.
        reference_mask: Option<MrVolume>);
    setter!(/// 脑掩膜.
        brain_mask: Option<MrVolume>);
    setter!(/// 参考组织 PVE.
        reference_pve: Option<MrVolume>);
    setter!(/// 是否将 CSF 限制到脑室.
        ventricle_masking: bool);
    setter!(/// 标准空间模板.
        standard: Option<StandardSpace>);
    setter!(/// 标准空间配准选项.
        registration: StandardRegistration);
    setter!(/// 线圈灵敏度来源.
        sensitivity: SensitivitySource);
    setter!(/// 是否用偏置场作为灵敏度.
        bias_field_sensitivity: bool);
    setter!(/// 待标定的灌注图.
        perfusion: Option<MrVolume>);
    setter!(/// 是否导出全脑拟合结果.
        export_whole_brain: bool);

    /// 当前设置是否需要从结构像派生掩膜.
    #[inline]
    fn derives_mask(&self) -> bool {
        self.reference_mask.is_none()
    }

    /// 检查并构建配置.
    ///
    /// - 缺少标定图像, 或者既没有掩膜也没有 "结构像 + 变换" 时返回 `CalibError::Usage`;
    /// - 选项组合不一致时返回 `CalibError::Configuration`.
    pub fn build(self) -> CalibResult<RunConfiguration> {
        let calibration = self
            .calibration
            .clone()
            .ok_or_else(|| CalibError::Usage("calibration image is required".into()))?;

        let structural = match (&self.structural, &self.calib_to_struct) {
            (Some(image), Some(m)) => Some(StructuralInput {
                image: image.clone(),
                calib_to_struct: *m,
            }),
            (Some(_), None) => {
                return Err(CalibError::Usage(
                    "a structural image requires the calibration to structural transform".into(),
                ))
            }
            _ => None,
        };
        if self.derives_mask() && structural.is_none() {
            return Err(CalibError::Usage(
                "either a reference tissue mask, or a structural image \
                 together with its transform, is required"
                    .into(),
            ));
        }
        if self.derives_mask() && self.tissue == TissueType::None {
            return Err(CalibError::Configuration(
                "tissue reference `none` requires a supplied reference mask".into(),
            ));
        }

        if !(self.gain > 0.0) {
            return Err(CalibError::Configuration(format!(
                "gain must be positive, got {}",
                self.gain
            )));
        }
        if let Some(alpha) = self.alpha {
            if !(alpha > 0.0) {
                return Err(CalibError::Configuration(format!(
                    "inversion efficiency must be positive, got {alpha}"
                )));
            }
        }

        let mode = match self.mode {
            ModeName::LongTr => {
                if !(self.tr > self.taq) {
                    return Err(CalibError::Configuration(format!(
                        "TR ({}) must exceed the acquisition time ({})",
                        self.tr, self.taq
                    )));
                }
                Mode::LongTr {
                    tr: self.tr,
                    taq: self.taq,
                }
            }
            ModeName::SatRecov => {
                if self.tis.is_empty() {
                    return Err(CalibError::Configuration(
                        "satrecov mode requires the inversion times".into(),
                    ));
                }
                if calibration.frames() % self.tis.len() != 0 {
                    return Err(CalibError::Configuration(format!(
                        "calibration image has {} volumes, not a multiple of {} inversion times",
                        calibration.frames(),
                        self.tis.len()
                    )));
                }
                Mode::SatRecov {
                    tis: self.tis.clone(),
                    look_locker: self.look_locker,
                    fix_saturation_efficiency: self.fix_saturation_efficiency,
                }
            }
        };

        if let SensitivitySource::CoilPair { actual: None, .. } = &self.sensitivity {
            if mode.name() != ModeName::LongTr {
                return Err(CalibError::Configuration(
                    "the actual coil image may only be omitted in longtr mode".into(),
                ));
            }
        }

        Ok(RunConfiguration {
            calibration,
            structural,
            mode,
            tissue: self.tissue,
            te: self.te,
            gain: self.gain,
            alpha: self.alpha,
            use_t2star: self.use_t2star,
            t1: self.t1,
            t2: self.t2,
            t2_blood: self.t2_blood,
            partition: self.partition,
            reference_mask: self.reference_mask,
            brain_mask: self.brain_mask,
            reference_pve: self.reference_pve,
            ventricle_masking: self.ventricle_masking,
            standard: self.standard,
            registration: self.registration,
            sensitivity: self.sensitivity,
            bias_field_sensitivity: self.bias_field_sensitivity,
            perfusion: self.perfusion,
            export_whole_brain: self.export_whole_brain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn volume(frames: usize) -> MrVolume {
        MrVolume::from_array(Array4::from_elem((frames, 2, 2, 2), 1.0))
    }

    #[test]
    fn test_parse_tissue_type() {
        assert_eq!("CSF".parse::<TissueType>().unwrap(), TissueType::Csf);
        assert_eq!("wm".parse::<TissueType>().unwrap(), TissueType::Wm);
        assert_eq!("none".parse::<TissueType>().unwrap(), TissueType::None);
        assert_eq!("3".parse::<TissueType>().unwrap(), TissueType::Custom(3));
        assert!(matches!(
            "bone".parse::<TissueType>(),
            Err(CalibError::Configuration(_))
        ));
        assert_eq!(TissueType::Custom(3).pve_class(), Some(3));
        assert_eq!(TissueType::Gm.pve_class(), Some(1));
    }

    #[test]
    fn test_t2star_switches_whole_table() {
        let t2 = RelaxationTable::select(false);
        let t2s = RelaxationTable::select(true);
        assert_eq!(t2, RelaxationTable::T2);
        assert_eq!(t2s, RelaxationTable::T2_STAR);
        assert_ne!(t2.csf, t2s.csf);
        assert_ne!(t2.gm, t2s.gm);
        assert_ne!(t2.blood, t2s.blood);
        // 每种组织的默认 T2 都来自同一张表.
        for tissue in [TissueType::Csf, TissueType::Gm, TissueType::Wm] {
            let d = tissue.defaults(&t2s).t2.unwrap();
            assert!([t2s.csf, t2s.gm, t2s.wm].contains(&d));
        }
    }

    #[test]
    fn test_param_spec() {
        assert_eq!("1.3".parse::<ParamSpec>().unwrap(), ParamSpec::Value(1.3));
        assert_eq!(
            "t1map.nii.gz".parse::<ParamSpec>().unwrap(),
            ParamSpec::Path("t1map.nii.gz".into())
        );
    }

    #[test]
    fn test_usage_errors() {
        let e = RunConfigurationBuilder::new().build().unwrap_err();
        assert!(e.is_usage());

        let e = RunConfigurationBuilder::new()
            .calibration(Some(volume(1)))
            .build()
            .unwrap_err();
        assert!(e.is_usage());

        let e = RunConfigurationBuilder::new()
            .calibration(Some(volume(1)))
            .structural(Some(volume(1)))
            .build()
            .unwrap_err();
        assert!(e.is_usage());

        let ok = RunConfigurationBuilder::new()
            .calibration(Some(volume(1)))
            .reference_mask(Some(volume(1)))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_configuration_errors() {
        let base = RunConfigurationBuilder::new()
            .calibration(Some(volume(3)))
            .reference_mask(Some(volume(1)));

        let e = base.clone().mode(ModeName::SatRecov).build().unwrap_err();
        assert!(matches!(e, CalibError::Configuration(_)));

        let e = base
            .clone()
            .mode(ModeName::SatRecov)
            .tis(vec![0.2, 0.4])
            .build()
            .unwrap_err();
        assert!(matches!(e, CalibError::Configuration(_)));

        let e = base
            .clone()
            .mode(ModeName::SatRecov)
            .tis(vec![0.2, 0.4, 0.6])
            .sensitivity(SensitivitySource::CoilPair {
                reference: volume(1),
                actual: None,
            })
            .build()
            .unwrap_err();
        assert!(matches!(e, CalibError::Configuration(_)));

        let cfg = base
            .clone()
            .sensitivity(SensitivitySource::CoilPair {
                reference: volume(1),
                actual: None,
            })
            .build()
            .unwrap();
        assert_eq!(cfg.mode.name(), ModeName::LongTr);

        let e = base.clone().tr(1.0).taq(1.0).build().unwrap_err();
        assert!(matches!(e, CalibError::Configuration(_)));

        let e = RunConfigurationBuilder::new()
            .calibration(Some(volume(1)))
            .structural(Some(volume(1)))
            .calib_to_struct(Some(Affine::IDENTITY))
            .tissue(TissueType::None)
            .build()
            .unwrap_err();
        assert!(matches!(e, CalibError::Configuration(_)));
    }
}
