//! 线圈灵敏度.
//!
//! 灵敏度图在 M0 估计前除到标定图像上, 在标定前除到灌注图上.
//! 灵敏度为 0 的体素相除结果为 0.

use crate::config::RunConfiguration;
use crate::data::MrVolume;
use crate::error::CalibResult;
use crate::toolkit::{ImageToolkit, Interpolation, Transform};

/// 灵敏度来源. 优先级: 直接提供 > 线圈图像对 > 偏置场.
///
/// 偏置场只有在自动派生掩膜时运行了分割才可用, 因此不在这里表示,
/// 由 [`RunConfiguration::bias_field_sensitivity`] 控制.
#[derive(Clone, Debug, Default)]
pub enum SensitivitySource {
    /// 不做灵敏度校正 (偏置场可用时除外).
    #[default]
    None,

    /// 直接提供的灵敏度图, 原样使用.
    Map(MrVolume),

    /// 参考线圈 (通常为体线圈) 与实际线圈采集的图像对.
    CoilPair {
        /// 参考线圈图像.
        reference: MrVolume,

        /// 实际线圈图像. 缺省时使用时间平均后的标定图像 (仅 `longtr`).
        actual: Option<MrVolume>,
    },
}

impl SensitivitySource {
    /// 是否提供了显式来源.
    #[inline]
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// 标定空间的全脑掩膜, 只在第一次使用时计算.
pub struct BrainMask<'a> {
    cfg: &'a RunConfiguration,
    toolkit: &'a dyn ImageToolkit,
    cached: Option<MrVolume>,
}

impl<'a> BrainMask<'a> {
    /// 创建. 此时不调用工具箱.
    #[inline]
    pub fn new(cfg: &'a RunConfiguration, toolkit: &'a dyn ImageToolkit) -> Self {
        Self {
            cfg,
            toolkit,
            cached: None,
        }
    }

    /// 获取全脑掩膜: 优先使用直接提供的脑掩膜, 否则对时间平均后的标定图像做脑提取.
    pub fn get(&mut self) -> CalibResult<&MrVolume> {
        let mask = match self.cached.take() {
            Some(m) => m,
            None => match &self.cfg.brain_mask {
                Some(m) => m.binarize(),
                None => {
                    log::info!("brain extraction of the calibration image");
                    self.toolkit
                        .brain_extract(&self.cfg.calibration.time_mean())?
                        .binarize()
                }
            },
        };
        Ok(self.cached.insert(mask))
    }

    /// 是否已经计算过.
    #[inline]
    pub fn is_computed(&self) -> bool {
        self.cached.is_some()
    }
}

/// 从线圈图像对计算灵敏度: `mean_t(actual) / mean_t(reference)`, 限制在 `brain` 内.
pub fn from_coil_pair(
    reference: &MrVolume,
    actual: &MrVolume,
    brain: &MrVolume,
) -> CalibResult<MrVolume> {
    let sens = actual
        .time_mean()
        .divide_by(&reference.time_mean())?
        .masked_by(brain)?;
    Ok(sens)
}

/// 由结构空间的偏置场计算灵敏度: 变换到标定空间后取倒数.
pub fn from_bias_field(
    bias: &MrVolume,
    struct_to_calib: &Transform,
    calibration: &MrVolume,
    toolkit: &dyn ImageToolkit,
) -> CalibResult<MrVolume> {
    let bias = toolkit.apply_transform(
        bias,
        struct_to_calib,
        calibration,
        Interpolation::Trilinear,
        None,
    )?;
    Ok(bias.reciprocal())
}

/// 由显式来源 (直接提供或线圈图像对) 计算灵敏度. 没有显式来源时返回 `Ok(None)`.
///
/// 线圈图像对缺少实际线圈图像时, 使用时间平均后的标定图像,
/// 该组合只在 `longtr` 下合法 (已在构建配置时检查).
pub fn from_explicit_source(
    cfg: &RunConfiguration,
    brain: &mut BrainMask<'_>,
) -> CalibResult<Option<MrVolume>> {
    match &cfg.sensitivity {
        SensitivitySource::None => Ok(None),
        SensitivitySource::Map(map) => {
            log::info!("using supplied sensitivity map");
            Ok(Some(map.clone()))
        }
        SensitivitySource::CoilPair { reference, actual } => {
            log::info!("computing sensitivity from reference/actual coil images");
            let actual = actual.as_ref().unwrap_or(&cfg.calibration);
            let brain = brain.get()?;
            from_coil_pair(reference, actual, brain).map(Some)
        }
    }
}

/// 用灵敏度图校正 `image`. `sens` 为 `None` 时原样返回.
pub fn apply(image: &MrVolume, sens: Option<&MrVolume>) -> CalibResult<MrVolume> {
    match sens {
        Some(s) => Ok(image.divide_by(s)?),
        None => Ok(image.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn vol(values: &[f32]) -> MrVolume {
        let data = Array4::from_shape_vec((1, 1, 1, values.len()), values.to_vec()).unwrap();
        MrVolume::from_array(data)
    }

    #[test]
    fn test_coil_pair_ratio() {
        let reference = vol(&[2.0, 4.0, 0.0, 5.0]);
        let actual = MrVolume::from_array(
            Array4::from_shape_vec((2, 1, 1, 4), vec![3.0, 4.0, 1.0, 5.0, 5.0, 4.0, 1.0, 5.0])
                .unwrap(),
        );
        let brain = vol(&[1.0, 1.0, 1.0, 0.0]);
        let sens = from_coil_pair(&reference, &actual, &brain).unwrap();
        assert_eq!(
            sens.data().iter().copied().collect::<Vec<_>>(),
            vec![2.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_apply_zero_sensitivity() {
        let img = vol(&[10.0, 10.0]);
        let sens = vol(&[2.0, 0.0]);
        let out = apply(&img, Some(&sens)).unwrap();
        assert_eq!(out.data().iter().copied().collect::<Vec<_>>(), vec![5.0, 0.0]);
        let same = apply(&img, None).unwrap();
        assert_eq!(same.data(), img.data());
    }
}
