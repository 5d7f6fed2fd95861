//! xruns - monitor audio buffer xruns on FreeBSD
//!
//! One-shot mode prints the current per-channel counters for one device;
//! watch mode polls at a fixed interval and prints only changes.

use std::io::{self, Write};
use std::process;
use std::thread;
use std::time::Duration;

use xruns::{
    diff, read_snapshot, render_events, render_snapshot, resolve_unit, ChannelFilter, Snapshot,
};

/// Parsed command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    /// Target device unit; `None` selects the system default
    unit: Option<i32>,
    /// Show only playback channels
    play_only: bool,
    /// Loop and show only changes
    watch: bool,
    /// Poll interval in seconds for watch mode
    interval: u64,
    /// Whether help was requested
    show_help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            unit: None,
            play_only: false,
            watch: false,
            interval: 1,
            show_help: false,
        }
    }
}

impl CliArgs {
    /// Parse an argument list (without the program name).
    fn parse(args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut iter = args;

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-d" => {
                    let value = iter.next().ok_or("-d requires a device number")?;
                    parsed.unit = Some(parse_unit(&value)?);
                }
                "-i" => {
                    let value = iter.next().ok_or("-i requires an interval")?;
                    parsed.interval = parse_interval(&value);
                }
                "-p" => parsed.play_only = true,
                "-w" => parsed.watch = true,
                "-h" => parsed.show_help = true,
                other => {
                    if let Some(value) = other.strip_prefix("-d") {
                        parsed.unit = Some(parse_unit(value)?);
                    } else if let Some(value) = other.strip_prefix("-i") {
                        parsed.interval = parse_interval(value);
                    } else {
                        return Err(format!("unknown option: {other}"));
                    }
                }
            }
        }

        Ok(parsed)
    }

    fn filter(&self) -> ChannelFilter {
        if self.play_only {
            ChannelFilter::OutputOnly
        } else {
            ChannelFilter::All
        }
    }
}

fn parse_unit(value: &str) -> Result<i32, String> {
    match value.parse::<i32>() {
        Ok(unit) if unit >= 0 => Ok(unit),
        _ => Err(format!("invalid device number: {value}")),
    }
}

/// Intervals below one second are clamped to one, as are unparseable values.
fn parse_interval(value: &str) -> u64 {
    value.parse::<u64>().unwrap_or(0).max(1)
}

const USAGE: &str = "usage: xruns [-d device] [-p] [-w] [-i interval]\n\
                     \n\
                     Options:\n\
                     \x20 -d N      Monitor device pcmN (default: system default)\n\
                     \x20 -p        Show only playback channels\n\
                     \x20 -w        Watch mode - loop and show only changes\n\
                     \x20 -i SEC    Interval in seconds for watch mode (default: 1)\n\
                     \x20 -h        Show this help\n\
                     \n\
                     Examples:\n\
                     \x20 xruns              Show xruns for default device\n\
                     \x20 xruns -d 1         Show xruns for pcm1\n\
                     \x20 xruns -d 0 -p      Show only playback xruns for pcm0\n\
                     \x20 xruns -d 0 -p -w   Watch playback xruns on pcm0";

fn usage() {
    eprintln!("{USAGE}");
}

/// Poll forever, printing only newly observed or changed nonzero counters.
///
/// The previous snapshot is owned by the loop and threaded through each
/// iteration; a failed read keeps the old baseline so a transient query
/// error does not replay already-reported counts.
fn watch(unit: Option<i32>, filter: ChannelFilter, interval: u64) -> ! {
    println!(
        "Watching xruns on pcm{} (Ctrl+C to stop)...",
        resolve_unit(unit)
    );

    let mut previous: Option<Snapshot> = None;
    loop {
        match read_snapshot(unit) {
            Ok(current) => {
                let events = diff(previous.as_ref(), &current, filter);
                for line in render_events(&events, true) {
                    println!("{line}");
                }
                let _ = io::stdout().flush();
                previous = Some(current);
            }
            Err(err) => eprintln!("xruns: {err}"),
        }
        thread::sleep(Duration::from_secs(interval));
    }
}

fn main() {
    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("xruns: {msg}");
            usage();
            process::exit(1);
        }
    };

    if args.show_help {
        usage();
        process::exit(1);
    }

    if args.watch {
        watch(args.unit, args.filter(), args.interval);
    }

    match read_snapshot(args.unit) {
        Ok(snapshot) => {
            println!("{}:", snapshot.devname);
            for line in render_snapshot(&snapshot, args.filter(), false) {
                println!("{line}");
            }
        }
        Err(err) => {
            eprintln!("xruns: {err}");
            process::exit(1);
        }
    }
}
