use clap::Parser;

/// Command-line arguments for the demo driver binary: just enough to pick a
/// log level and, for convenience, a read timeout floor. The actual probe
/// parameters are driven entirely by `send-probe` lines on stdin
/// (see `crate::driver`), not by flags.
#[derive(Parser, Debug, Clone)]
#[command(name = "probed")]
#[command(about = "Probe engine core: reads send-probe commands on stdin, writes outcome lines on stdout")]
#[command(version = "0.1.0")]
pub struct Args {
    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    #[must_use]
    pub fn env_filter(&self) -> &'static str {
        match self.verbose {
            0 => "probed_engine=info",
            1 => "probed_engine=debug",
            _ => "probed_engine=trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info() {
        let args = Args::try_parse_from(["probed"]).unwrap();
        assert_eq!(args.env_filter(), "probed_engine=info");
    }

    #[test]
    fn one_v_enables_debug() {
        let args = Args::try_parse_from(["probed", "-v"]).unwrap();
        assert_eq!(args.env_filter(), "probed_engine=debug");
    }

    #[test]
    fn two_v_enables_trace() {
        let args = Args::try_parse_from(["probed", "-vv"]).unwrap();
        assert_eq!(args.env_filter(), "probed_engine=trace");
    }
}
