use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use lava_log::console::{fatal_line, format_log_line};
use lava_log::record::parse_batch;
use lava_log::{Farm, SectionMarker, SectionTracker, TrackerConfig, TrackerError};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "lava-log")]
#[command(about = "Turns LAVA job logs into GitLab-sectioned CI output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a stream of LAVA log batches (one JSON document per line)
    Follow {
        /// Path to the .jsonl file; reads stdin when omitted
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,

        /// JSON tracker configuration
        #[arg(long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Farm name, overrides FARM and the config file
        #[arg(long)]
        farm: Option<String>,

        /// Test case whose section markers are suppressed
        #[arg(long)]
        main_test_case: Option<String>,

        /// Prefix section headers with the time elapsed since startup
        #[arg(long)]
        relative_to_now: bool,
    },
    /// Parse a section marker and print it as JSON
    Marker {
        /// Marker line; `\e`, `\x1b` and `\r` escapes are expanded
        line: String,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Follow {
            path,
            config,
            farm,
            main_test_case,
            relative_to_now,
        } => {
            let mut config = match &config {
                Some(path) => TrackerConfig::load(path)?,
                None => TrackerConfig::default(),
            };
            config.apply_env()?;
            if let Some(farm) = farm {
                config.farm = Farm::from_name(&farm);
            }
            if main_test_case.is_some() {
                config.main_test_case = main_test_case;
            }
            log::debug!("Tracker config: {:?}", config);

            let mut tracker = SectionTracker::new(config);
            if relative_to_now {
                tracker = tracker.relative_to(Some(Utc::now()));
            }

            let input: Box<dyn BufRead> = match &path {
                Some(path) => Box::new(BufReader::new(
                    File::open(path).with_context(|| format!("opening {}", path.display()))?,
                )),
                None => Box::new(BufReader::new(io::stdin())),
            };
            let code = follow(tracker, input, &mut io::stdout())?;
            Ok(ExitCode::from(code))
        }
        Commands::Marker { line } => {
            let line = unescape(&line);
            match SectionMarker::parse(&line) {
                Some(marker) => {
                    println!("{}", serde_json::to_string_pretty(&marker)?);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("Not a section marker: {:?}", line);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

/// Exit status when the current section outlived its budget.
const EXIT_TIMEOUT: u8 = 1;
/// Exit status when a known infrastructure issue was seen; callers retry on it.
const EXIT_KNOWN_ISSUE: u8 = 2;

/// Feeds every batch of `input` to the tracker and prints the corrected
/// stream to `out`. Returns the process exit status.
fn follow(
    mut tracker: SectionTracker,
    input: impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<u8> {
    for (number, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let batch =
            parse_batch(&line).with_context(|| format!("line {}: invalid log batch", number + 1))?;

        match tracker.feed(batch) {
            Ok(true) => {}
            Ok(false) => log::trace!("Batch {} carried no job output", number + 1),
            Err(err @ TrackerError::Timeout { .. }) => {
                print_lines(out, tracker.flush())?;
                return fail(tracker, out, &err.to_string(), EXIT_TIMEOUT);
            }
            Err(err) => return Err(err.into()),
        }
        print_lines(out, tracker.flush())?;

        if let Some(issue) = tracker.known_issue().map(ToString::to_string) {
            return fail(tracker, out, &issue, EXIT_KNOWN_ISSUE);
        }
    }

    print_lines(out, tracker.finish()?)?;
    Ok(0)
}

/// Closes the stream before reporting, so the open section still gets its
/// end marker.
fn fail(
    tracker: SectionTracker,
    out: &mut impl Write,
    reason: &str,
    code: u8,
) -> anyhow::Result<u8> {
    print_lines(out, tracker.finish()?)?;
    writeln!(out, "{}", fatal_line(reason))?;
    out.flush()?;
    Ok(code)
}

fn print_lines(out: &mut impl Write, lines: Vec<String>) -> io::Result<()> {
    let now = Utc::now();
    for line in lines {
        writeln!(out, "{}", format_log_line(&line, now))?;
    }
    out.flush()
}

fn unescape(line: &str) -> String {
    line.replace("\\x1b", "\x1b")
        .replace("\\e", "\x1b")
        .replace("\\r", "\r")
}
