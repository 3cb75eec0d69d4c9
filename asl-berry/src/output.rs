//! 按需写出结果.
//!
//! 每个产物独立写出: 某一项失败只记录并报告, 不影响其他项. 没有请求的产物不写, 也不算错误.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::data::MrVolume;
use crate::pipeline::CalibOutcome;
use crate::runlog::RunLog;

/// 输出目录中各产物的文件名.
pub mod names {
    /// 参考组织原始 M0.
    pub const M0: &str = "M0.txt";

    /// 血液 M0.
    pub const M0_BLOOD: &str = "M0blood.txt";

    /// 标定因子.
    pub const FACTOR: &str = "factor.txt";

    /// 参考组织掩膜.
    pub const MASK: &str = "refmask.nii.gz";

    /// 灵敏度图.
    pub const SENSITIVITY: &str = "sens.nii.gz";

    /// 标定后的灌注图.
    pub const CALIBRATED: &str = "calibrated.nii.gz";

    /// 全脑 T1.
    pub const SATRECOV_T1: &str = "satrecov_T1.nii.gz";

    /// 全脑 M0.
    pub const SATRECOV_M0: &str = "satrecov_M0.nii.gz";

    /// 全脑翻转角校正.
    pub const SATRECOV_FA: &str = "satrecov_FA.nii.gz";

    /// 运行日志.
    pub const LOGFILE: &str = "logfile";
}

/// 输出请求. 单独指定的路径优先于输出目录中的默认文件名.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputTargets {
    /// 输出目录.
    pub dir: Option<PathBuf>,

    /// 原始 M0 文本文件.
    pub m0: Option<PathBuf>,

    /// 标定因子文本文件.
    pub factor: Option<PathBuf>,

    /// 标定后的灌注图.
    pub calibrated: Option<PathBuf>,

    /// 灵敏度图.
    pub sensitivity: Option<PathBuf>,

    /// 参考组织掩膜.
    pub mask: Option<PathBuf>,
}

impl OutputTargets {
    /// 只指定输出目录.
    #[inline]
    pub fn in_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// 是否请求了输出目录.
    #[inline]
    pub fn has_dir(&self) -> bool {
        self.dir.is_some()
    }

    /// 是否请求了任何输出.
    pub fn is_empty(&self) -> bool {
        self.dir.is_none()
            && self.m0.is_none()
            && self.factor.is_none()
            && self.calibrated.is_none()
            && self.sensitivity.is_none()
            && self.mask.is_none()
    }

    /// 产物的目标路径: 单独指定的路径, 或者输出目录中的默认名.
    fn resolve(&self, explicit: Option<&PathBuf>, name: &str) -> Option<PathBuf> {
        explicit
            .cloned()
            .or_else(|| self.dir.as_ref().map(|d| d.join(name)))
    }

    /// 输出目录中的默认路径.
    fn in_output_dir(&self, name: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(name))
    }
}

/// 单个产物写出失败.
#[derive(Debug)]
pub struct WriteFailure {
    /// 目标路径.
    pub path: PathBuf,

    /// 失败原因.
    pub reason: String,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// 写出报告.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// 成功写出的文件.
    pub written: Vec<PathBuf>,

    /// 写出失败的文件.
    pub failed: Vec<WriteFailure>,
}

impl WriteReport {
    /// 是否全部成功.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn push<E: fmt::Display>(&mut self, path: PathBuf, result: Result<(), E>) {
        match result {
            Ok(()) => {
                log::debug!("wrote {}", path.display());
                self.written.push(path);
            }
            Err(e) => {
                log::warn!("failed to write {}: {e}", path.display());
                self.failed.push(WriteFailure {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn value(&mut self, path: Option<PathBuf>, v: f64) {
        if let Some(path) = path {
            let r = write_value(&path, v);
            self.push(path, r);
        }
    }

    fn volume(&mut self, path: Option<PathBuf>, v: Option<&MrVolume>) {
        if let (Some(path), Some(v)) = (path, v) {
            let r = v.save(&path);
            self.push(path, r);
        }
    }
}

/// 以全精度写出单个数值.
fn write_value(path: &Path, v: f64) -> io::Result<()> {
    fs::write(path, format!("{v}\n"))
}

/// 写出所有被请求的产物. 输出目录不存在时先创建.
pub fn write_outputs(outcome: &CalibOutcome, targets: &OutputTargets, log: &RunLog) -> WriteReport {
    let mut report = WriteReport::default();
    if let Some(dir) = &targets.dir {
        if let Err(e) = fs::create_dir_all(dir) {
            report.push(dir.clone(), Err(e));
        }
    }

    report.value(targets.resolve(targets.m0.as_ref(), names::M0), outcome.raw_m0);
    report.value(targets.in_output_dir(names::M0_BLOOD), outcome.m0_blood);
    report.value(
        targets.resolve(targets.factor.as_ref(), names::FACTOR),
        outcome.factor,
    );
    report.volume(
        targets.resolve(targets.mask.as_ref(), names::MASK),
        Some(&outcome.mask),
    );
    report.volume(
        targets.resolve(targets.sensitivity.as_ref(), names::SENSITIVITY),
        outcome.sensitivity.as_ref(),
    );
    report.volume(
        targets.resolve(targets.calibrated.as_ref(), names::CALIBRATED),
        outcome.calibrated.as_ref(),
    );

    if let Some(fit) = &outcome.whole_brain {
        report.volume(targets.in_output_dir(names::SATRECOV_T1), Some(&fit.t1));
        report.volume(targets.in_output_dir(names::SATRECOV_M0), Some(&fit.m0));
        report.volume(
            targets.in_output_dir(names::SATRECOV_FA),
            fit.flip_angle_correction.as_ref(),
        );
    }

    if let Some(path) = targets.in_output_dir(names::LOGFILE) {
        let r = log.save(&path);
        report.push(path, r);
    }
    report
}
