//! 一次完整的标定运行.
//!
//! 顺序: 灵敏度 (显式来源) -> 参考组织掩膜 -> 灵敏度 (偏置场) -> 参数决议 -> M0 估计 -> 标定方程.
//! 任何一步失败都使整个运行失败, 此时不产生任何产物.

use crate::config::{resolve_params, Mode, ResolvedParams, RunConfiguration};
use crate::data::MrVolume;
use crate::equation;
use crate::error::{CalibResult, MaskOrigin};
use crate::estimate::{self, EstimationInput};
use crate::refmask;
use crate::runlog::RunLog;
use crate::sensitivity::{self, BrainMask};
use crate::toolkit::{ImageToolkit, SatRecovFit};

/// 标定运行结果.
#[derive(Clone, Debug)]
pub struct CalibOutcome {
    /// 参考组织原始 M0.
    pub raw_m0: f64,

    /// 血液 M0.
    pub m0_blood: f64,

    /// 标定因子 `6000 / M0blood`.
    pub factor: f64,

    /// 实际使用的参数.
    pub params: ResolvedParams,

    /// 参考组织掩膜.
    pub mask: MrVolume,

    /// 掩膜来源.
    pub mask_origin: MaskOrigin,

    /// 实际使用的灵敏度图.
    pub sensitivity: Option<MrVolume>,

    /// 标定后的灌注图.
    pub calibrated: Option<MrVolume>,

    /// 全脑饱和恢复拟合结果.
    pub whole_brain: Option<SatRecovFit>,
}

/// 执行一次标定.
pub fn run(
    cfg: &RunConfiguration,
    toolkit: &dyn ImageToolkit,
    log: &mut RunLog,
) -> CalibResult<CalibOutcome> {
    log.record("config", "mode", &cfg.mode);
    log.record("config", "tissue", cfg.tissue);
    log.record("config", "T2 table", if cfg.use_t2star { "T2*" } else { "T2" });

    let mut brain = BrainMask::new(cfg, toolkit);
    let mut sens = sensitivity::from_explicit_source(cfg, &mut brain)?;

    let refmask = refmask::build(cfg, toolkit)?;
    log.record("mask", "origin", refmask.origin);
    log.record("mask", "voxels", refmask.voxels);

    if sens.is_none() && cfg.bias_field_sensitivity {
        if let (Some(bias), Some(tr)) = (&refmask.bias_field, &refmask.struct_to_calib) {
            log::info!("using segmentation bias field as sensitivity");
            sens = Some(sensitivity::from_bias_field(
                bias,
                tr,
                &cfg.calibration,
                toolkit,
            )?);
        }
    }
    log.record(
        "sensitivity",
        "source",
        match (&sens, cfg.sensitivity.is_explicit()) {
            (None, _) => "none",
            (Some(_), true) => "supplied",
            (Some(_), false) => "bias field",
        },
    );

    let params = resolve_params(cfg, &refmask.mask)?;
    log.record("params", "T1r (s)", params.t1r);
    log.record("params", "T2r (ms)", params.t2r);
    log.record("params", "T2b (ms)", params.t2b);
    log.record("params", "partition coefficient", params.pc);
    if let Some(te) = params.te {
        log.record("params", "TE (ms)", te);
    }

    let brain_mask = match &cfg.mode {
        Mode::SatRecov { .. } if cfg.export_whole_brain => Some(brain.get()?),
        _ => None,
    };
    let input = EstimationInput {
        calibration: &cfg.calibration,
        mask: &refmask.mask,
        origin: refmask.origin,
        sensitivity: sens.as_ref(),
        params: &params,
        brain_mask,
    };
    let estimator = estimate::for_mode(&cfg.mode);
    let estimate = estimator.estimate(&input, toolkit)?;
    log.record("m0", "estimator", estimator.name());
    log.record("m0", "raw M0", estimate.raw_m0);

    let m0_blood = equation::blood_m0(estimate.raw_m0, &params, cfg.gain);
    let factor = equation::calibration_factor(m0_blood);
    log.record("m0", "gain", cfg.gain);
    log.record("m0", "M0blood", m0_blood);
    log.record("m0", "factor", factor);

    let calibrated = match &cfg.perfusion {
        Some(perf) => {
            if let Some(alpha) = cfg.alpha {
                log.record("calibration", "inversion efficiency", alpha);
            }
            Some(equation::calibrate_perfusion(
                perf,
                sens.as_ref(),
                m0_blood,
                cfg.alpha,
            )?)
        }
        None => None,
    };

    Ok(CalibOutcome {
        raw_m0: estimate.raw_m0,
        m0_blood,
        factor,
        params,
        mask: refmask.mask,
        mask_origin: refmask.origin,
        sensitivity: sens,
        calibrated,
        whole_brain: estimate.whole_brain,
    })
}
