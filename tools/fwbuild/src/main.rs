//! Firewall topology build tool.
//!
//! ```text
//! fwbuild <board> <build-dir> <out-dir>
//! ```
//!
//! `<board>` names a built-in preset, `<build-dir>` holds the compiled
//! component binaries, `<out-dir>` receives the system description, one
//! config data file and one patched binary per process, and the topology
//! graph. Log verbosity comes from `FWBUILD_LOG` (error/warn/info/debug/
//! trace; default info). Any failure aborts with a non-zero status; a
//! partially configured system is never emitted.

use fw_layout::LayoutContext;
use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::{env, fmt};

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level().as_str().to_lowercase(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging() {
    let level = match env::var("FWBUILD_LOG").as_deref() {
        Ok("error") => LevelFilter::Error,
        Ok("warn") => LevelFilter::Warn,
        Ok("debug") => LevelFilter::Debug,
        Ok("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

struct Usage;

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usage: fwbuild <board> <build-dir> <out-dir>")
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1);
    let (Some(board_name), Some(build_dir), Some(out_dir)) =
        (args.next(), args.next(), args.next())
    else {
        return Err(Usage.to_string());
    };

    let board = fw_board::preset(&board_name)
        .ok_or_else(|| format!("unknown board `{board_name}` (try imx8mp-evk, qemu-virt-aarch64)"))?;
    let build_dir = PathBuf::from(build_dir);
    let out_dir = PathBuf::from(out_dir);

    let mut layout = LayoutContext::new(&build_dir);
    let artifacts = fw_wiring::build(&board, &mut layout).map_err(|e| e.to_string())?;
    fw_wiring::emit(&artifacts, &build_dir, &out_dir).map_err(|e| e.to_string())?;

    log::info!(
        "wrote {} component configs and firewall.system to {}",
        artifacts.packed.len(),
        out_dir.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            log::error!("{message}");
            eprintln!("fwbuild: {message}");
            ExitCode::FAILURE
        }
    }
}
