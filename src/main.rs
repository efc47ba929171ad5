use std::io::Write;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{debug, error, LevelFilter};
use nix::sys::signal::{signal, SigHandler, Signal};

use biopieces::cli::description::parse_description;
use biopieces::cli::{parse, Arguments};
use biopieces::config::defs::Config;
use biopieces::Pipeline;

fn main() {
    let run_start = Instant::now();
    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    // Ctrl-C ends the whole run at once, forked children included.
    // SAFETY: no other thread exists yet.
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::SigDfl);
    }

    if let Err(e) = run(args) {
        error!("Pipeline failed: {:#} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }
    debug!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
}

fn run(args: Arguments) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(dir) = &args.tmp_dir {
        config = config.with_tmp_dir(dir);
    }
    if args.no_history {
        config.history_file = None;
    }
    debug!("Spill files in {:?}, tool scratch in {:?}", config.tmp_dir, config.ram_tmp_dir);

    let description = parse_description(&args.description)?;
    let mut pipeline = Pipeline::with_config(config);
    for (name, options) in description.commands {
        pipeline.add(&name, options)?;
    }

    let mut run_options = description.run.unwrap_or_default();
    if args.fork {
        run_options.insert("fork", true);
    }
    if args.thread {
        run_options.insert("thread", true);
    }
    if args.verbose {
        run_options.insert("verbose", true);
    }
    if args.progress {
        run_options.insert("progress", true);
    }
    if let Some(input) = args.input {
        run_options.insert("input", input);
    }
    if let Some(output) = args.output {
        run_options.insert("output", output);
    }
    if let Some(email) = args.email {
        run_options.insert("email", email);
    }
    if let Some(subject) = args.subject {
        run_options.insert("subject", subject);
    }

    pipeline.run(run_options)?;
    Ok(())
}
