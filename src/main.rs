use anyhow::Result;
use clap::Parser;
use tracing::info;

use probed_engine::args::Args;
use probed_engine::net_state::NetState;

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.env_filter())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(args) {
        // The engine core only ever returns a structured FatalError; main is
        // the one place that turns that into a process abort.
        tracing::error!(%err, "fatal error");
        std::process::exit(1);
    }
}

fn run(_args: Args) -> Result<()> {
    info!("starting probe engine");

    // Phase one: open privileged sockets before dropping any privilege the
    // process was started with.
    let mut net_state = NetState::init_privileged()?;

    // Phase two: safe to run after any privilege drop the surrounding
    // deployment performs. Flips O_NONBLOCK on already-open descriptors,
    // then runs platform calibration (byte order, SCTP support).
    net_state.init_unprivileged()?;
    info!(
        ip_length_host_order = net_state.calibration.ip_length_host_order,
        sctp_support = net_state.calibration.sctp_support,
        "platform calibration complete"
    );

    let stdin = std::io::stdin();
    let stdin_fd = std::os::fd::AsRawFd::as_raw_fd(&stdin);
    let stdout = std::io::stdout();
    probed_engine::driver::run_event_loop(&mut net_state, stdin.lock(), Some(stdin_fd), stdout.lock())?;

    Ok(())
}
