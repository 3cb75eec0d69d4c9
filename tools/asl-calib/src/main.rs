//! 命令行工具: 基于参考组织的 ASL 标定.
//!
//! 成功时退出码为 0, 否则打印诊断信息 (用法错误时附带用法说明) 并以 1 退出.

use asl_berry::output::names;
use asl_berry::prelude::*;
use clap::{CommandFactory, Parser};
use log::LevelFilter;
use simple_logger::SimpleLogger;

mod args;
mod standard;

use args::Cli;

fn calibrate(cli: &Cli) -> CalibResult<()> {
    let cfg = cli.configuration()?;
    let targets = cli.targets();
    if targets.is_empty() {
        log::warn!("no output requested, results are only printed");
    }

    let area = WorkingArea::new(cli.debug)?;
    let toolkit = FslToolkit::new(&area);
    let mut runlog = RunLog::new();
    let result = run(&cfg, &toolkit, &mut runlog);

    if area.is_kept() {
        if let Err(e) = runlog.save(area.file(names::LOGFILE)) {
            log::warn!("cannot write log file into working area: {e}");
        }
    }
    let outcome = result?;

    println!("M0: {}", outcome.raw_m0);
    println!("M0 blood: {}", outcome.m0_blood);
    println!("Calibration factor: {}", outcome.factor);

    let report = write_outputs(&outcome, &targets, &runlog);
    for f in report.failed.iter() {
        eprintln!("warning: could not write {f}");
    }
    Ok(())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = args::parse_error_code(&e);
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("cannot initialise logger: {e}");
    }

    if let Err(e) = calibrate(&cli) {
        if e.is_usage() {
            let _ = Cli::command().print_help();
            eprintln!();
        }
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
