//! 参数决议.
//!
//! 优先级固定为: 显式数值 > 参考组织掩膜内的体素图均值 > 组织默认值.

use crate::consts;
use crate::data::MrVolume;
use crate::error::{CalibError, CalibResult};

use super::{ParamSource, RunConfiguration};

/// 按固定优先级决议单个参数.
///
/// `mask` 为最终的参考组织掩膜. 体素图在掩膜内没有体素时视为未提供.
pub fn resolve_param(
    explicit: Option<&ParamSource>,
    mask: &MrVolume,
    default: Option<f64>,
) -> CalibResult<Option<f64>> {
    match explicit {
        Some(ParamSource::Value(v)) => Ok(Some(*v)),
        Some(ParamSource::Map(map)) => Ok(map.mean_in(Some(mask))?.or(default)),
        None => Ok(default),
    }
}

/// 一次运行中决议完毕的参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResolvedParams {
    /// 参考组织 T1 (秒).
    pub t1r: f64,

    /// 参考组织 T2 (毫秒).
    pub t2r: f64,

    /// 血液 T2 (毫秒).
    pub t2b: f64,

    /// 分配系数.
    pub pc: f64,

    /// 回波时间 (毫秒). 未给定时为 `None`, 此时 T2 校正不起作用.
    pub te: Option<f64>,
}

impl ResolvedParams {
    /// 回波时间 (毫秒), 未给定时为 0.
    #[inline]
    pub fn te_or_zero(&self) -> f64 {
        self.te.unwrap_or(0.0)
    }
}

/// 在参考组织掩膜确定之后决议所有参数.
///
/// - T1 必须决议成功;
/// - T2 仅在未给定 TE 时允许退化为 [`consts::T2_NEGLIGIBLE`];
/// - 分配系数必须决议成功;
/// - 血液 T2 总有默认值.
pub fn resolve_params(cfg: &RunConfiguration, mask: &MrVolume) -> CalibResult<ResolvedParams> {
    let table = cfg.relaxation_table();
    let defaults = cfg.tissue.defaults(&table);

    let t1r = resolve_param(cfg.t1.as_ref(), mask, defaults.t1)?
        .ok_or(CalibError::MissingParameter("reference tissue T1"))?;

    let t2r = match (resolve_param(cfg.t2.as_ref(), mask, defaults.t2)?, cfg.te) {
        (Some(t2), _) => t2,
        (None, None) => consts::T2_NEGLIGIBLE,
        (None, Some(_)) => return Err(CalibError::MissingParameter("reference tissue T2")),
    };

    let t2b = resolve_param(cfg.t2_blood.as_ref(), mask, Some(table.blood))?
        .ok_or(CalibError::MissingParameter("blood T2"))?;

    let pc = resolve_param(cfg.partition.as_ref(), mask, defaults.partition)?
        .ok_or(CalibError::MissingParameter("partition coefficient"))?;

    let params = ResolvedParams {
        t1r,
        t2r,
        t2b,
        pc,
        te: cfg.te,
    };
    log::info!(
        "resolved parameters: T1r={t1r} s, T2r={t2r} ms, T2b={t2b} ms, pc={pc}, TE={:?} ms",
        cfg.te
    );
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunConfigurationBuilder, TissueType};
    use ndarray::Array4;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn mask() -> MrVolume {
        let mut m = MrVolume::from_array(Array4::zeros((1, 1, 2, 2)));
        m[(0, 0, 0)] = 1.0;
        m[(0, 0, 1)] = 1.0;
        m
    }

    fn map() -> MrVolume {
        MrVolume::from_array(
            Array4::from_shape_vec((1, 1, 2, 2), vec![2.0, 4.0, 100.0, 100.0]).unwrap(),
        )
    }

    fn builder() -> RunConfigurationBuilder {
        RunConfigurationBuilder::new()
            .calibration(Some(MrVolume::from_array(Array4::ones((1, 1, 2, 2)))))
            .reference_mask(Some(mask()))
    }

    #[test]
    fn test_precedence() {
        let m = mask();
        let value = ParamSource::Value(1.5);
        let map = ParamSource::Map(map());

        let v = resolve_param(Some(&value), &m, Some(9.0)).unwrap();
        assert_eq!(v, Some(1.5));

        let v = resolve_param(Some(&map), &m, Some(9.0)).unwrap().unwrap();
        assert!(f64_eq(v, 3.0));

        let v = resolve_param(None, &m, Some(9.0)).unwrap();
        assert_eq!(v, Some(9.0));

        assert_eq!(resolve_param(None, &m, None).unwrap(), None);
    }

    #[test]
    fn test_csf_defaults() {
        let cfg = builder().build().unwrap();
        let p = resolve_params(&cfg, &mask()).unwrap();
        assert!(f64_eq(p.t1r, 4.3));
        assert!(f64_eq(p.t2r, 750.0));
        assert!(f64_eq(p.t2b, 150.0));
        assert!(f64_eq(p.pc, 1.15));
        assert_eq!(p.te, None);

        let cfg = builder().use_t2star(true).build().unwrap();
        let p = resolve_params(&cfg, &mask()).unwrap();
        assert!(f64_eq(p.t2r, 400.0));
        assert!(f64_eq(p.t2b, 50.0));
    }

    #[test]
    fn test_custom_tissue() {
        // 没有 TE: T2 退化为可忽略值.
        let cfg = builder()
            .tissue(TissueType::Custom(3))
            .t1(Some(ParamSource::Value(1.2)))
            .partition(Some(ParamSource::Value(0.9)))
            .build()
            .unwrap();
        let p = resolve_params(&cfg, &mask()).unwrap();
        assert!(f64_eq(p.t2r, consts::T2_NEGLIGIBLE));

        // 给定 TE 却没有 T2.
        let cfg = builder()
            .tissue(TissueType::Custom(3))
            .te(Some(13.0))
            .t1(Some(ParamSource::Value(1.2)))
            .partition(Some(ParamSource::Value(0.9)))
            .build()
            .unwrap();
        let e = resolve_params(&cfg, &mask()).unwrap_err();
        assert!(matches!(e, CalibError::MissingParameter("reference tissue T2")));

        // 缺少 T1.
        let cfg = builder()
            .tissue(TissueType::None)
            .partition(Some(ParamSource::Value(0.9)))
            .build()
            .unwrap();
        let e = resolve_params(&cfg, &mask()).unwrap_err();
        assert!(matches!(e, CalibError::MissingParameter("reference tissue T1")));

        // 缺少分配系数.
        let cfg = builder()
            .tissue(TissueType::None)
            .t1(Some(ParamSource::Value(1.2)))
            .build()
            .unwrap();
        let e = resolve_params(&cfg, &mask()).unwrap_err();
        assert!(matches!(e, CalibError::MissingParameter("partition coefficient")));
    }

    #[test]
    fn test_t1_from_map() {
        let cfg = builder()
            .t1(Some(ParamSource::Map(map())))
            .build()
            .unwrap();
        let p = resolve_params(&cfg, &mask()).unwrap();
        assert!(f64_eq(p.t1r, 3.0));
    }
}
