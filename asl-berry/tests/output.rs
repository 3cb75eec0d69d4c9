mod common;

use asl_berry::config::ModeName;
use asl_berry::output::names;
use asl_berry::prelude::*;

use common::{half_mask, uniform, FakeToolkit};

fn outcome(perfusion: bool) -> (CalibOutcome, RunLog) {
    let cfg = RunConfigurationBuilder::new()
        .calibration(Some(uniform(2, 1000.0)))
        .reference_mask(Some(half_mask()))
        .perfusion(perfusion.then(|| uniform(1, 3.0)))
        .build()
        .unwrap();
    let mut log = RunLog::new();
    let out = run(&cfg, &FakeToolkit::new(), &mut log).unwrap();
    (out, log)
}

fn read_value(path: &std::path::Path) -> f64 {
    std::fs::read_to_string(path)
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

#[test]
fn writes_requested_artifacts_into_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("calib");
    let (out, log) = outcome(true);

    let report = write_outputs(&out, &OutputTargets::in_dir(&dir), &log);
    assert!(report.is_complete(), "{:?}", report.failed);

    assert_eq!(read_value(&dir.join(names::M0)), out.raw_m0);
    assert_eq!(read_value(&dir.join(names::M0_BLOOD)), out.m0_blood);
    assert_eq!(read_value(&dir.join(names::FACTOR)), out.factor);
    assert!(dir.join(names::MASK).is_file());
    assert!(dir.join(names::CALIBRATED).is_file());
    assert!(dir.join(names::LOGFILE).is_file());
    // 没有灵敏度图, 也没有全脑拟合: 不写, 也不算错误.
    assert!(!dir.join(names::SENSITIVITY).exists());
    assert!(!dir.join(names::SATRECOV_T1).exists());

    let mask = MrVolume::open(dir.join(names::MASK)).unwrap();
    assert_eq!(mask.count_nonzero(), 4);
}

#[test]
fn writes_satrecov_whole_brain_maps() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("calib");
    let cfg = RunConfigurationBuilder::new()
        .calibration(Some(uniform(3, 500.0)))
        .reference_mask(Some(half_mask()))
        .mode(ModeName::SatRecov)
        .tis(vec![0.2, 0.4, 0.6])
        .look_locker(Some(LookLocker {
            flip_angle: 35.0,
            lower_flip_angle: None,
            phases: None,
        }))
        .export_whole_brain(true)
        .build()
        .unwrap();
    let mut log = RunLog::new();
    let out = run(&cfg, &FakeToolkit::new(), &mut log).unwrap();

    let report = write_outputs(&out, &OutputTargets::in_dir(&dir), &log);
    assert!(report.is_complete(), "{:?}", report.failed);
    for name in [names::SATRECOV_T1, names::SATRECOV_M0, names::SATRECOV_FA] {
        assert!(dir.join(name).is_file(), "{name}");
    }
    let fa = MrVolume::open(dir.join(names::SATRECOV_FA)).unwrap();
    assert!(fa.data().iter().all(|v| *v == 1.0));
}

#[test]
fn named_targets_override_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let m0 = tmp.path().join("my_m0.txt");
    let (out, log) = outcome(false);

    let targets = OutputTargets {
        m0: Some(m0.clone()),
        ..Default::default()
    };
    let report = write_outputs(&out, &targets, &log);
    assert_eq!(report.written, vec![m0.clone()]);
    assert_eq!(read_value(&m0), out.raw_m0);
}

#[test]
fn failed_artifact_does_not_stop_others() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let bad = tmp.path().join("no_such_dir").join("factor.txt");
    let (out, log) = outcome(false);

    let targets = OutputTargets {
        dir: Some(dir.clone()),
        factor: Some(bad.clone()),
        ..Default::default()
    };
    let report = write_outputs(&out, &targets, &log);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, bad);
    assert!(dir.join(names::M0).is_file());
    assert!(dir.join(names::MASK).is_file());
}

#[test]
fn nothing_requested() {
    let (out, log) = outcome(false);
    let report = write_outputs(&out, &OutputTargets::default(), &log);
    assert!(report.written.is_empty());
    assert!(report.is_complete());
}
