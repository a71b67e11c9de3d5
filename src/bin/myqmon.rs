//! myqmon - current-vs-previous status sampling for MySQL servers.
//!
//! Picks one source per run and prints a line per emitted state:
//!   myqmon                      # drive the mysql cli, 1s interval
//!   myqmon -i 5 -u app -H db1   # same, custom interval and connection
//!   myqmon --direct             # poll the server over a direct connection
//!   myqmon -f status.capture    # replay a recorded capture
//!   myqmon -f s.cap --varfile v.cap

use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use myqmon::source::{FileSource, LiveSource, Source, SqlSource};
use myqmon::state::{State, state_stream};

// Exit codes, matching the usual tool conventions.
const BAD_ARGS: i32 = 1;
const SOURCE_ERROR: i32 = 2;

/// Current-vs-previous status sampling for MySQL servers.
#[derive(Debug, Parser)]
#[command(name = "myqmon", about = "Status sampling for MySQL servers", version)]
struct Args {
    /// Time between samples, in seconds (minimum 1).
    #[arg(short, long, default_value_t = 1)]
    interval: u64,

    /// Replay a recorded status capture instead of connecting.
    #[arg(short, long, value_name = "PATH")]
    file: Option<String>,

    /// Variables capture to overlay; only meaningful with --file.
    #[arg(long, value_name = "PATH")]
    varfile: Option<String>,

    /// Poll the server over a direct connection instead of spawning the
    /// mysql client.
    #[arg(long)]
    direct: bool,

    /// MySQL user.
    #[arg(short, long, default_value = "root")]
    user: String,

    /// MySQL password (empty: none).
    #[arg(short, long, default_value = "")]
    password: String,

    /// MySQL host.
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// MySQL port.
    #[arg(short = 'P', long, default_value_t = 3306)]
    port: u16,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only log errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("myqmon={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Exit code for a clap error: usage mistakes map to [`BAD_ARGS`] so code
/// 2 stays reserved for source startup failures; `--help`/`--version`
/// output is a clean exit.
fn arg_error_code(e: &clap::Error) -> i32 {
    if e.use_stderr() { BAD_ARGS } else { 0 }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = arg_error_code(&e);
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_logging(args.verbose, args.quiet);

    if args.interval < 1 {
        error!("interval must be >= 1s");
        std::process::exit(BAD_ARGS);
    }
    let interval = Duration::from_secs(args.interval);

    // Interrupts are not routed through the pipeline; a live child gets
    // its parent-death signal when we go.
    if let Err(e) = ctrlc::set_handler(|| std::process::exit(0)) {
        warn!("could not install interrupt handler: {}", e);
    }

    // Static source selection: file replay, direct polling, or the
    // spawned client. Never changes mid-run. File replay reports runtime
    // from the capture's own uptime; live modes report wall clock.
    let mut source: Box<dyn Source> = if let Some(file) = &args.file {
        let varfile = args.varfile.as_ref().map(Into::into);
        info!("replaying {} at {}s", file, args.interval);
        Box::new(FileSource::new(interval, file, varfile))
    } else if args.direct {
        let url = format!(
            "mysql://{}:{}@{}:{}",
            args.user, args.password, args.host, args.port
        );
        match SqlSource::connect(interval, &url) {
            Ok(source) => {
                info!("polling {}:{} every {}s", args.host, args.port, args.interval);
                Box::new(source)
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(SOURCE_ERROR);
            }
        }
    } else {
        let mut cli_args = vec![
            "-u".to_string(),
            args.user.clone(),
            "-h".to_string(),
            args.host.clone(),
            "-P".to_string(),
            args.port.to_string(),
        ];
        if !args.password.is_empty() {
            cli_args.push(format!("-p{}", args.password));
        }
        info!("sampling {}:{} every {}s", args.host, args.port, args.interval);
        Box::new(LiveSource::new(interval, cli_args))
    };

    let states = match state_stream(source.as_mut()) {
        Ok(states) => states,
        Err(e) => {
            error!("{}", e);
            std::process::exit(SOURCE_ERROR);
        }
    };

    let runtime_basis = args.file.is_some();
    for state in states {
        if let Some(err) = state.error() {
            warn!("sample error: {}", err);
            continue;
        }
        println!("{}", format_state(&state, runtime_basis));
    }
}

/// One output line per state: time basis, uptime, window width and a
/// questions/sec rate once a prev exists.
fn format_state(state: &State, runtime_basis: bool) -> String {
    let stamp = if runtime_basis {
        let runtime = state.cur.get_i("uptime") - state.first_uptime;
        format!("+{}s", runtime)
    } else {
        chrono::Local::now().format("%H:%M:%S").to_string()
    };

    let rate = match &state.prev {
        Some(prev) if state.seconds_diff > 0.0 => {
            let delta = state.cur.get_f("questions") - prev.get_f("questions");
            format!("{:.1}", delta / state.seconds_diff)
        }
        _ => "-".to_string(),
    };

    format!(
        "{} uptime {} diff {:.0}s questions/s {}",
        stamp,
        state.cur.get_i("uptime"),
        state.seconds_diff,
        rate
    )
}
