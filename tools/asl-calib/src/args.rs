//! 命令行参数.

use std::path::{Path, PathBuf};

use asl_berry::config::{ModeName, ParamSpec, StandardRegistration};
use asl_berry::output::OutputTargets;
use asl_berry::prelude::*;
use clap::Parser;

use crate::standard;

#[derive(Parser, Debug)]
#[command(name = "asl_calib")]
#[command(
    version,
    about = "Calibration of ASL perfusion images using a tissue reference",
    long_about = None
)]
pub struct Cli {
    /// Calibration image
    #[arg(short = 'c', long, value_name = "IMAGE")]
    pub calib: Option<PathBuf>,

    /// Structural image (already brain extracted)
    #[arg(short = 's', long, value_name = "IMAGE")]
    pub struc: Option<PathBuf>,

    /// Calibration to structural transformation matrix
    #[arg(short = 't', long, value_name = "MAT")]
    pub trans: Option<PathBuf>,

    /// Perfusion image to calibrate
    #[arg(short = 'i', long, value_name = "IMAGE")]
    pub perf: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,

    /// Calibration mode: "longtr" or "satrecov"
    #[arg(long, value_name = "MODE", default_value = "longtr")]
    pub mode: String,

    /// Tissue reference type: csf, wm, gm, none or a segmentation class index
    #[arg(long, value_name = "TISSUE", default_value = "csf")]
    pub tissref: String,

    /// Echo time (ms)
    #[arg(long, value_name = "MS")]
    pub te: Option<f64>,

    /// Repetition time (s)
    #[arg(long, value_name = "S", default_value_t = asl_berry::consts::DEFAULT_TR)]
    pub tr: f64,

    /// Acquisition duration (s)
    #[arg(long, value_name = "S", default_value_t = asl_berry::consts::DEFAULT_TAQ)]
    pub taq: f64,

    /// Relative gain between calibration and ASL data
    #[arg(long, value_name = "GAIN", default_value_t = asl_berry::consts::DEFAULT_GAIN)]
    pub cgain: f64,

    /// T1 of the reference tissue (s), a number or a T1 image
    #[arg(long, value_name = "VALUE|IMAGE")]
    pub t1r: Option<ParamSpec>,

    /// T2 of the reference tissue (ms), a number or a T2 image
    #[arg(long, value_name = "VALUE|IMAGE")]
    pub t2r: Option<ParamSpec>,

    /// T2 of blood (ms)
    #[arg(long, value_name = "VALUE|IMAGE")]
    pub t2b: Option<ParamSpec>,

    /// Partition coefficient of the reference tissue
    #[arg(long, value_name = "VALUE|IMAGE")]
    pub pc: Option<ParamSpec>,

    /// Use T2* rather than T2 defaults
    #[arg(long)]
    pub t2star: bool,

    /// Inversion efficiency, applied when calibrating the perfusion image
    #[arg(long, value_name = "ALPHA")]
    pub alpha: Option<f64>,

    /// Inversion times for satrecov mode (s, comma separated)
    #[arg(long, value_name = "TI,TI,...", value_delimiter = ',')]
    pub tis: Vec<f64>,

    /// Look-Locker flip angle (degrees)
    #[arg(long, value_name = "DEG")]
    pub fa: Option<f64>,

    /// Look-Locker lower flip angle (degrees)
    #[arg(long, value_name = "DEG")]
    pub lfa: Option<f64>,

    /// Look-Locker number of phases
    #[arg(long, value_name = "N")]
    pub nphases: Option<u32>,

    /// Fix the saturation efficiency to 100%
    #[arg(long)]
    pub fixa: bool,

    /// Reference tissue mask in calibration space
    #[arg(short = 'm', long, value_name = "IMAGE")]
    pub mask: Option<PathBuf>,

    /// Brain mask in calibration space
    #[arg(long, value_name = "IMAGE")]
    pub bmask: Option<PathBuf>,

    /// Partial volume estimate of the reference tissue in structural space
    #[arg(long, value_name = "IMAGE")]
    pub refpve: Option<PathBuf>,

    /// Structural to standard space matrix
    #[arg(long, value_name = "MAT")]
    pub str2std: Option<PathBuf>,

    /// Structural to standard space warp
    #[arg(long, value_name = "IMAGE")]
    pub warp: Option<PathBuf>,

    /// Use nonlinear registration to standard space
    #[arg(long)]
    pub nonlin_reg: bool,

    /// Do not restrict the CSF to the ventricles
    #[arg(long)]
    pub no_vent: bool,

    /// Coil sensitivity map
    #[arg(long, value_name = "IMAGE")]
    pub isen: Option<PathBuf>,

    /// Reference coil (body coil) image
    #[arg(long, value_name = "IMAGE")]
    pub cref: Option<PathBuf>,

    /// Actual coil image (defaults to the calibration image in longtr mode)
    #[arg(long, value_name = "IMAGE")]
    pub cact: Option<PathBuf>,

    /// Do not use the segmentation bias field as sensitivity
    #[arg(long)]
    pub no_bias_sens: bool,

    /// Output file for the raw M0 value
    #[arg(long, value_name = "FILE")]
    pub out_m0: Option<PathBuf>,

    /// Output file for the calibration factor
    #[arg(long, value_name = "FILE")]
    pub out_factor: Option<PathBuf>,

    /// Output file for the calibrated perfusion image
    #[arg(long, value_name = "IMAGE")]
    pub out_calibrated: Option<PathBuf>,

    /// Output file for the sensitivity map
    #[arg(long, value_name = "IMAGE")]
    pub out_sens: Option<PathBuf>,

    /// Output file for the reference tissue mask
    #[arg(long, value_name = "IMAGE")]
    pub out_mask: Option<PathBuf>,

    /// Keep the working directory and print debug messages
    #[arg(long)]
    pub debug: bool,
}

/// 解析失败时的退出码: `--help`/`--version` 为 0, 其余均为 1.
pub fn parse_error_code(e: &clap::Error) -> i32 {
    if e.exit_code() == 0 {
        0
    } else {
        1
    }
}

fn load(path: &Path) -> CalibResult<MrVolume> {
    MrVolume::open(path).map_err(|e| CalibError::image(path, e))
}

fn load_opt(path: Option<&PathBuf>) -> CalibResult<Option<MrVolume>> {
    path.map(|p| load(p)).transpose()
}

fn load_param(spec: Option<&ParamSpec>) -> CalibResult<Option<ParamSource>> {
    spec.map(ParamSpec::load).transpose()
}

impl Cli {
    /// 输出请求.
    pub fn targets(&self) -> OutputTargets {
        OutputTargets {
            dir: self.outdir.clone(),
            m0: self.out_m0.clone(),
            factor: self.out_factor.clone(),
            calibrated: self.out_calibrated.clone(),
            sensitivity: self.out_sens.clone(),
            mask: self.out_mask.clone(),
        }
    }

    fn look_locker(&self) -> CalibResult<Option<LookLocker>> {
        match (self.fa, self.lfa, self.nphases) {
            (Some(flip_angle), lower_flip_angle, phases) => Ok(Some(LookLocker {
                flip_angle,
                lower_flip_angle,
                phases,
            })),
            (None, None, None) => Ok(None),
            _ => Err(CalibError::Configuration(
                "Look-Locker options require the flip angle".into(),
            )),
        }
    }

    fn sensitivity(&self) -> CalibResult<SensitivitySource> {
        if let Some(p) = &self.isen {
            return Ok(SensitivitySource::Map(load(p)?));
        }
        match (&self.cref, &self.cact) {
            (Some(r), actual) => Ok(SensitivitySource::CoilPair {
                reference: load(r)?,
                actual: load_opt(actual.as_ref())?,
            }),
            (None, Some(_)) => Err(CalibError::Usage(
                "the actual coil image requires the reference coil image".into(),
            )),
            (None, None) => Ok(SensitivitySource::None),
        }
    }

    /// 读取所有输入, 构建配置.
    pub fn configuration(&self) -> CalibResult<RunConfiguration> {
        // 先检查必需输入, 再读取文件.
        if self.calib.is_none() {
            return Err(CalibError::Usage("calibration image is required (-c)".into()));
        }
        if self.mask.is_none() && (self.struc.is_none() || self.trans.is_none()) {
            return Err(CalibError::Usage(
                "either a reference mask (-m), or a structural image (-s) \
                 with its transform (-t), is required"
                    .into(),
            ));
        }

        let tissue: TissueType = self.tissref.parse()?;
        let mode: ModeName = self.mode.parse()?;

        let calib_to_struct = match &self.trans {
            Some(p) => Some(Affine::open(p).map_err(|e| CalibError::matrix(p, e))?),
            None => None,
        };

        // 只有派生 CSF 掩膜且限制到脑室时才需要标准空间模板.
        let standard = if self.mask.is_none() && tissue.is_csf() && !self.no_vent {
            Some(standard::load_standard_space()?)
        } else {
            None
        };

        RunConfigurationBuilder::new()
            .calibration(load_opt(self.calib.as_ref())?)
            .structural(load_opt(self.struc.as_ref())?)
            .calib_to_struct(calib_to_struct)
            .mode(mode)
            .tr(self.tr)
            .taq(self.taq)
            .tis(self.tis.clone())
            .look_locker(self.look_locker()?)
            .fix_saturation_efficiency(self.fixa)
            .tissue(tissue)
            .te(self.te)
            .gain(self.cgain)
            .alpha(self.alpha)
            .use_t2star(self.t2star)
            .t1(load_param(self.t1r.as_ref())?)
            .t2(load_param(self.t2r.as_ref())?)
            .t2_blood(load_param(self.t2b.as_ref())?)
            .partition(load_param(self.pc.as_ref())?)
            .reference_mask(load_opt(self.mask.as_ref())?)
            .brain_mask(load_opt(self.bmask.as_ref())?)
            .reference_pve(load_opt(self.refpve.as_ref())?)
            .ventricle_masking(!self.no_vent)
            .standard(standard)
            .registration(StandardRegistration {
                nonlinear: self.nonlin_reg,
                matrix: self.str2std.clone(),
                warp: self.warp.clone(),
            })
            .sensitivity(self.sensitivity()?)
            .bias_field_sensitivity(!self.no_bias_sens)
            .perfusion(load_opt(self.perf.as_ref())?)
            .export_whole_brain(self.outdir.is_some())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_error_code, Cli};
    use asl_berry::config::ParamSpec;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["asl_calib", "-c", "calib.nii.gz"]).unwrap();
        assert_eq!(cli.mode, "longtr");
        assert_eq!(cli.tissref, "csf");
        assert_eq!(cli.tr, 3.2);
        assert_eq!(cli.cgain, 1.0);
        assert!(cli.tis.is_empty());
        assert!(!cli.debug);
    }

    #[test]
    fn test_satrecov_options() {
        let cli = Cli::try_parse_from([
            "asl_calib",
            "-c",
            "calib.nii.gz",
            "--mode",
            "satrecov",
            "--tis",
            "0.2,0.4,0.6",
            "--t1r",
            "t1.nii.gz",
            "--pc",
            "0.9",
            "--fa",
            "35",
        ])
        .unwrap();
        assert_eq!(cli.tis, vec![0.2, 0.4, 0.6]);
        assert_eq!(cli.t1r, Some(ParamSpec::Path("t1.nii.gz".into())));
        assert_eq!(cli.pc, Some(ParamSpec::Value(0.9)));
        let ll = cli.look_locker().unwrap().unwrap();
        assert_eq!(ll.flip_angle, 35.0);
        assert_eq!(ll.phases, None);
    }

    #[test]
    fn test_look_locker_requires_flip_angle() {
        let cli = Cli::try_parse_from(["asl_calib", "--lfa", "10"]).unwrap();
        assert!(cli.look_locker().is_err());
    }

    #[test]
    fn test_missing_calibration_is_usage_error() {
        let cli = Cli::try_parse_from(["asl_calib", "-s", "struc.nii.gz"]).unwrap();
        let e = cli.configuration().unwrap_err();
        assert!(e.is_usage());

        let cli = Cli::try_parse_from(["asl_calib", "-c", "calib.nii.gz"]).unwrap();
        let e = cli.configuration().unwrap_err();
        assert!(e.is_usage());
    }

    #[test]
    fn test_malformed_options_exit_with_one() {
        let e = Cli::try_parse_from(["asl_calib", "-c", "calib.nii.gz", "--te", "abc"])
            .unwrap_err();
        assert_eq!(parse_error_code(&e), 1);

        let e = Cli::try_parse_from(["asl_calib", "--bogus"]).unwrap_err();
        assert_eq!(parse_error_code(&e), 1);

        let e = Cli::try_parse_from(["asl_calib", "--help"]).unwrap_err();
        assert_eq!(parse_error_code(&e), 0);
    }
}
