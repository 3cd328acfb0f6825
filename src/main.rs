use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use uuid::Uuid;

use topoflow::cli::Cli;
use topoflow::config::Config;
use topoflow::error::AgentError;
use topoflow::flow::pipeline::{FlowPipeline, JsonLinesSink};
use topoflow::flow::EmptyPathResolver;
use topoflow::sflow::SflowAgentAllocator;

/// Global shutdown flag, set by signal handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if let Err(e) = run(&cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config, AgentError> {
    let mut config = if Path::new(&cli.config).exists() {
        info!("loading configuration from {}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        warn!("configuration file {} not found, using defaults", cli.config);
        Config::default()
    };

    if let Some(bind) = &cli.bind {
        config.sflow.bind_address = bind.clone();
    }
    if let Some(port_min) = cli.port_min {
        config.sflow.port_min = port_min;
    }
    if let Some(port_max) = cli.port_max {
        config.sflow.port_max = port_max;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), AgentError> {
    install_signal_handlers();

    let config = load_config(cli)?;
    let addr = config.bind_address()?;

    // Expired and updated flows go to stdout as JSON lines; a networked
    // analyzer client plugs in behind the same sink trait.
    let pipeline = Arc::new(
        FlowPipeline::new().with_sink(Box::new(JsonLinesSink::new(Box::new(io::stdout())))),
    );

    let allocator = SflowAgentAllocator::new(
        addr,
        config.sflow.port_min,
        config.sflow.port_max,
        config.flowtable_expire(),
        config.flowtable_update(),
        pipeline,
    );

    let allocation = allocator.alloc(&Uuid::new_v4().to_string(), Arc::new(EmptyPathResolver))?;
    info!(
        "collector listening on {} (expire {}s, update {}s)",
        allocation.agent().target(),
        config.agent.flowtable_expire,
        config.agent.flowtable_update
    );

    while !SHUTDOWN_REQUESTED.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    allocator.release_all();
    Ok(())
}
