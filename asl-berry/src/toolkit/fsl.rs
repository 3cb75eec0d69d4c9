//! 基于 FSL 命令行工具的 [`ImageToolkit`] 实现.
//!
//! 输入体数据先写入 [`WorkingArea`], 再调用对应的命令, 最后读回结果.
//! 可执行文件优先在 `$FSLDIR/bin` 下查找, 否则交给 `PATH`.

use std::cell::Cell;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{
    ImageToolkit, Interpolation, SatRecovFit, SatRecovRequest, Segmentation, ToolError,
    ToolResult, Transform,
};
use crate::data::{Affine, MrVolume};
use crate::workspace::WorkingArea;

/// FAST 分割的组织类别数.
const FAST_CLASSES: usize = 3;

/// 子进程的 `FSLOUTPUTTYPE`, 与读回时拼接的 `.nii.gz` 后缀一致.
const OUTPUT_TYPE: &str = "NIFTI_GZ";

/// 一条待执行的 FSL 命令.
struct FslCmd {
    tool: &'static str,
    program: PathBuf,
    args: Vec<OsString>,
}

impl FslCmd {
    fn new(tool: &'static str, bin: Option<&Path>) -> Self {
        let program = match bin.map(|b| b.join(tool)) {
            Some(p) if p.exists() => p,
            _ => PathBuf::from(tool),
        };
        Self {
            tool,
            program,
            args: Vec::new(),
        }
    }

    /// 追加位置参数或开关.
    fn arg<S: Into<OsString>>(mut self, a: S) -> Self {
        self.args.push(a.into());
        self
    }

    /// 追加路径参数.
    fn path(self, p: &Path) -> Self {
        self.arg(p.as_os_str())
    }

    /// 追加 `--name=value` 形式的参数.
    fn opt<V: std::fmt::Display>(self, name: &str, value: V) -> Self {
        self.arg(format!("--{name}={value}"))
    }

    /// 追加 `--name=path` 形式的参数.
    fn opt_path(self, name: &str, p: &Path) -> Self {
        let mut s = OsString::from(format!("--{name}="));
        s.push(p.as_os_str());
        self.arg(s)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env("FSLOUTPUTTYPE", OUTPUT_TYPE);
        cmd
    }

    fn run(self) -> ToolResult<()> {
        log::debug!(
            "{} {}",
            self.program.display(),
            self.args
                .iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let out = self
            .command()
            .output()
            .map_err(|e| ToolError::new(self.tool, format!("cannot execute: {e}")))?;
        if out.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        let stdout = String::from_utf8_lossy(&out.stdout);
        let message = match (stderr.trim(), stdout.trim()) {
            ("", "") => format!("exited with {}", out.status),
            ("", s) | (s, _) => s.to_string(),
        };
        Err(ToolError::new(self.tool, message))
    }
}

/// 基于 FSL 的工具箱.
pub struct FslToolkit<'a> {
    area: &'a WorkingArea,
    bin: Option<PathBuf>,
    seq: Cell<usize>,
}

impl<'a> FslToolkit<'a> {
    /// 在 `area` 中工作, 可执行文件位于 `$FSLDIR/bin`.
    pub fn new(area: &'a WorkingArea) -> Self {
        let bin = std::env::var_os("FSLDIR").map(|d| PathBuf::from(d).join("bin"));
        Self::with_bin_dir(area, bin)
    }

    /// 在 `area` 中工作, 可执行文件位于 `bin`. `bin` 为 `None` 时使用 `PATH`.
    #[inline]
    pub fn with_bin_dir(area: &'a WorkingArea, bin: Option<PathBuf>) -> Self {
        Self {
            area,
            bin,
            seq: Cell::new(0),
        }
    }

    fn cmd(&self, tool: &'static str) -> FslCmd {
        FslCmd::new(tool, self.bin.as_deref())
    }

    /// 工作目录中一个未使用过的文件名前缀.
    fn fresh(&self, stem: &str) -> PathBuf {
        let n = self.seq.get();
        self.seq.set(n + 1);
        self.area.file(&format!("{stem}_{n:03}"))
    }

    fn write(&self, tool: &'static str, stem: &str, v: &MrVolume) -> ToolResult<PathBuf> {
        let path = nii(&self.fresh(stem));
        v.save(&path)
            .map_err(|e| ToolError::new(tool, format!("cannot write {}: {e}", path.display())))?;
        Ok(path)
    }

    fn write_matrix(&self, tool: &'static str, stem: &str, m: &Affine) -> ToolResult<PathBuf> {
        let mut path = self.fresh(stem);
        path.set_extension("mat");
        m.save(&path)
            .map_err(|e| ToolError::new(tool, format!("cannot write {}: {e}", path.display())))?;
        Ok(path)
    }

    fn write_transform(
        &self,
        tool: &'static str,
        t: &Transform,
    ) -> ToolResult<(Option<PathBuf>, Option<PathBuf>)> {
        match t {
            Transform::Affine(m) => Ok((Some(self.write_matrix(tool, "xfm", m)?), None)),
            Transform::Warp(w) => Ok((None, Some(self.write(tool, "warp", w)?))),
        }
    }
}

/// 追加 `.nii.gz` 后缀.
fn nii(base: &Path) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(".nii.gz");
    PathBuf::from(s)
}

fn read(tool: &'static str, path: &Path) -> ToolResult<MrVolume> {
    MrVolume::open(path)
        .map_err(|e| ToolError::new(tool, format!("cannot read {}: {e}", path.display())))
}

fn read_matrix(tool: &'static str, path: &Path) -> ToolResult<Affine> {
    Affine::open(path)
        .map_err(|e| ToolError::new(tool, format!("cannot read {}: {e}", path.display())))
}

impl Interpolation {
    /// `applywarp --interp` 取值.
    fn applywarp_name(&self) -> &'static str {
        match self {
            Self::NearestNeighbour => "nn",
            Self::Trilinear => "trilinear",
            Self::Spline => "spline",
        }
    }
}

impl ImageToolkit for FslToolkit<'_> {
    fn brain_extract(&self, image: &MrVolume) -> ToolResult<MrVolume> {
        let input = self.write("bet", "bet_in", image)?;
        let out = self.fresh("bet_out");
        self.cmd("bet").path(&input).path(&out).arg("-m").run()?;
        let mut mask = out.into_os_string();
        mask.push("_mask.nii.gz");
        read("bet", Path::new(&mask))
    }

    fn segment(&self, image: &MrVolume) -> ToolResult<Segmentation> {
        let input = self.write("fast", "fast_in", image)?;
        let base = self.fresh("fast");
        self.cmd("fast")
            .arg("-t")
            .arg("1")
            .arg("-n")
            .arg(FAST_CLASSES.to_string())
            .arg("-b")
            .arg("-o")
            .path(&base)
            .path(&input)
            .run()?;
        let suffixed = |suffix: &str| {
            let mut s = base.clone().into_os_string();
            s.push(suffix);
            PathBuf::from(s)
        };
        let pve = (0..FAST_CLASSES)
            .map(|i| read("fast", &suffixed(&format!("_pve_{i}.nii.gz"))))
            .collect::<ToolResult<Vec<_>>>()?;
        let bias = suffixed("_bias.nii.gz");
        let bias_field = if bias.exists() {
            Some(read("fast", &bias)?)
        } else {
            None
        };
        Ok(Segmentation { pve, bias_field })
    }

    fn linear_register(&self, moving: &MrVolume, fixed: &MrVolume) -> ToolResult<Affine> {
        let input = self.write("flirt", "flirt_in", moving)?;
        let reference = self.write("flirt", "flirt_ref", fixed)?;
        let mut omat = self.fresh("flirt");
        omat.set_extension("mat");
        self.cmd("flirt")
            .arg("-in")
            .path(&input)
            .arg("-ref")
            .path(&reference)
            .arg("-omat")
            .path(&omat)
            .run()?;
        read_matrix("flirt", &omat)
    }

    fn nonlinear_register(
        &self,
        moving: &MrVolume,
        fixed: &MrVolume,
        seed: &Affine,
    ) -> ToolResult<MrVolume> {
        let input = self.write("fnirt", "fnirt_in", moving)?;
        let reference = self.write("fnirt", "fnirt_ref", fixed)?;
        let aff = self.write_matrix("fnirt", "fnirt_aff", seed)?;
        let cout = nii(&self.fresh("fnirt_coef"));
        self.cmd("fnirt")
            .opt_path("in", &input)
            .opt_path("ref", &reference)
            .opt_path("aff", &aff)
            .opt_path("cout", &cout)
            .run()?;
        read("fnirt", &cout)
    }

    fn invert_transform(
        &self,
        transform: &Transform,
        reference: &MrVolume,
    ) -> ToolResult<Transform> {
        match transform {
            Transform::Affine(m) => {
                let input = self.write_matrix("convert_xfm", "fwd", m)?;
                let mut out = self.fresh("inv");
                out.set_extension("mat");
                self.cmd("convert_xfm")
                    .arg("-omat")
                    .path(&out)
                    .arg("-inverse")
                    .path(&input)
                    .run()?;
                read_matrix("convert_xfm", &out).map(Transform::Affine)
            }
            Transform::Warp(w) => {
                let warp = self.write("invwarp", "fwd_warp", w)?;
                let reference = self.write("invwarp", "invwarp_ref", reference)?;
                let out = nii(&self.fresh("inv_warp"));
                self.cmd("invwarp")
                    .opt_path("warp", &warp)
                    .opt_path("ref", &reference)
                    .opt_path("out", &out)
                    .run()?;
                read("invwarp", &out).map(Transform::Warp)
            }
        }
    }

    fn apply_transform(
        &self,
        image: &MrVolume,
        transform: &Transform,
        reference: &MrVolume,
        interpolation: Interpolation,
        supersample: Option<u32>,
    ) -> ToolResult<MrVolume> {
        let input = self.write("applywarp", "aw_in", image)?;
        let reference = self.write("applywarp", "aw_ref", reference)?;
        let (premat, warp) = self.write_transform("applywarp", transform)?;
        let out = nii(&self.fresh("aw_out"));

        let mut cmd = self
            .cmd("applywarp")
            .opt_path("in", &input)
            .opt_path("ref", &reference)
            .opt_path("out", &out)
            .opt("interp", interpolation.applywarp_name());
        if let Some(p) = &premat {
            cmd = cmd.opt_path("premat", p);
        }
        if let Some(w) = &warp {
            cmd = cmd.opt_path("warp", w);
        }
        if let Some(level) = supersample {
            cmd = cmd.arg("--super").opt("superlevel", level);
        }
        cmd.run()?;
        read("applywarp", &out)
    }

    fn fit_saturation_recovery(&self, request: &SatRecovRequest<'_>) -> ToolResult<SatRecovFit> {
        const TOOL: &str = "fabber_asl";

        if request.tis.is_empty() {
            return Err(ToolError::new(TOOL, "no inversion times"));
        }
        let data = self.write(TOOL, "satrecov_data", request.data)?;
        let mask = self.write(TOOL, "satrecov_mask", request.mask)?;
        let out = self.fresh("satrecov");
        let repeats = request.data.frames() / request.tis.len();

        let mut cmd = self
            .cmd(TOOL)
            .opt_path("data", &data)
            .opt_path("mask", &mask)
            .opt_path("output", &out)
            .opt("model", "satrecov")
            .opt("method", "vb")
            .opt("noise", "white")
            .arg("--save-mean")
            .arg("--overwrite")
            .opt("repeats", repeats)
            .opt("t1", request.prior_t1);
        for (i, ti) in request.tis.iter().enumerate() {
            cmd = cmd.opt(&format!("ti{}", i + 1), ti);
        }
        if let Some(ll) = request.look_locker {
            cmd = cmd.opt("FA", ll.flip_angle);
            if let Some(lfa) = ll.lower_flip_angle {
                cmd = cmd.opt("LFA", lfa);
            }
            if let Some(phases) = ll.phases {
                cmd = cmd.opt("phases", phases);
            }
        }
        if request.fix_saturation_efficiency {
            cmd = cmd.arg("--fixa");
        }
        cmd.run()?;

        let t1 = read(TOOL, &out.join("mean_T1t.nii.gz"))?;
        let m0 = read(TOOL, &out.join("mean_M0t.nii.gz"))?;
        let flip_angle_correction = if request.look_locker.is_some() {
            Some(read(TOOL, &out.join("mean_g.nii.gz"))?)
        } else {
            None
        };
        Ok(SatRecovFit {
            t1,
            m0,
            flip_angle_correction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_names_unique() {
        let area = WorkingArea::new(false).unwrap();
        let tk = FslToolkit::with_bin_dir(&area, None);
        let a = tk.fresh("x");
        let b = tk.fresh("x");
        assert_ne!(a, b);
        assert!(a.starts_with(area.path()));
        assert_eq!(nii(&a).extension().unwrap(), "gz");
    }

    #[test]
    fn test_missing_tool_reports_name() {
        let area = WorkingArea::new(false).unwrap();
        let tk = FslToolkit::with_bin_dir(&area, Some(area.path().to_path_buf()));
        let e = tk
            .cmd("definitely_not_an_fsl_tool")
            .arg("--help")
            .run()
            .unwrap_err();
        assert_eq!(e.tool, "definitely_not_an_fsl_tool");
    }

    #[test]
    fn test_output_type_forced() {
        let area = WorkingArea::new(false).unwrap();
        let tk = FslToolkit::with_bin_dir(&area, None);
        let cmd = tk.cmd("bet").command();
        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(
            envs,
            vec![(
                std::ffi::OsStr::new("FSLOUTPUTTYPE"),
                Some(std::ffi::OsStr::new("NIFTI_GZ"))
            )]
        );
    }
}
