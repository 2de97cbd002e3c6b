use flexi_logger::{Duplicate, FileSpec, Logger};
use log::{error, info};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use paretomics::param;

fn main() {
    let param_file = env::args()
        .nth(1)
        .unwrap_or_else(|| "param.yaml".to_string());
    let mut param = match param::get(param_file.clone()) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("cannot read '{}': {}", param_file, e);
            process::exit(1);
        }
    };
    if let Err(e) = param::validate(&mut param) {
        eprintln!("invalid configuration '{}': {}", param_file, e);
        process::exit(1);
    }

    let logger = match Logger::try_with_env_or_str(&param.general.log_level) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("invalid log level '{}': {}", param.general.log_level, e);
            process::exit(1);
        }
    };
    let logger = if param.general.log_base.is_empty() {
        logger.start()
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(param.general.log_base.clone())
                    .suffix(param.general.log_suffix.clone()),
            )
            .duplicate_to_stderr(Duplicate::Warn)
            .start()
    };
    let _logger = match logger {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("cannot start the logger: {}", e);
            process::exit(1);
        }
    };

    info!("paretomics {}", paretomics::version());

    // a first SIGINT finishes the generation in flight and shuts down
    // cleanly, a second one kills the process
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    match Signals::new([SIGINT]) {
        Ok(mut signals) => {
            std::thread::spawn(move || {
                let mut seen = false;
                for _ in signals.forever() {
                    if seen {
                        process::exit(130);
                    }
                    error!("interrupt received, finishing the generation in flight");
                    flag.store(false, Ordering::SeqCst);
                    seen = true;
                }
            });
        }
        Err(e) => {
            error!("cannot install the interrupt handler: {}", e);
        }
    }

    match paretomics::run_one_setup(&param, running) {
        Ok(run_dir) => {
            info!("artifacts written under {}", run_dir.display());
        }
        Err(e) => {
            error!("run failed: {}", e);
            process::exit(1);
        }
    }
}
