use std::process::ExitCode;
use std::sync::atomic::Ordering;

use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use cgwatch::config::{Config, CONFIG_FILE_PATH};

extern "C" fn handle_shutdown_signal(_signo: libc::c_int) {
    cgwatch::shutdown_flag().store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action)?;
        signal::sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

/// Entry point for the cgwatch container monitor.
///
/// Loads the configuration, installs SIGINT/SIGTERM handlers that raise the
/// shutdown flag, and runs the monitor until a signal arrives. Exit code 1
/// is reserved for configuration failures; a clean shutdown exits 0.
fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::load(CONFIG_FILE_PATH) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(1);
        }
    };
    config.log_summary();

    // initialize the flag before the handler can fire
    let shutdown = cgwatch::shutdown_flag();
    if let Err(err) = install_signal_handlers() {
        log::error!("failed to install signal handlers: {err}");
    }

    match cgwatch::run(&config, shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(1)
        }
    }
}
