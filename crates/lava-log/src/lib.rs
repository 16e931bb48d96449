//! # lava-log
//!
//! Streaming follower for LAVA job logs, re-emitting them as a GitLab CI log
//! with collapsible sections.
//!
//! ## Overview
//!
//! The LAVA dispatcher hands out job output as batches of structured records
//! (`{lvl, msg, ns}`), in order but with transport damage:
//!
//! - **Split markers**: a `\r` inside a GitLab section marker becomes a line break
//! - **Carriage returns**: every `\r` on the device console becomes a record
//! - **Mangled colors**: some farms drop the `ESC` byte of ANSI codes
//! - **Noise**: device feedback, kernel log bursts interleaved with output
//!
//! The tracker repairs the stream, recognises job phases (deploy, boot, test
//! suites, test cases) and frames them with GitLab section markers. A
//! watchdog fails the job when a phase outlives its budget.
//!
//! ## Architecture
//!
//! ```text
//!  batch of LogRecord
//!        |
//!        v
//!  normalize: strip \r\n -> kernel dump? -> merge \r lines -> feedback noise?
//!        |                      |
//!        |                      +--> console (bold, immediately)
//!        v
//!  PhaseMatcher -> new Section? -> end current, start new (markers)
//!        |
//!        v
//!  level formatting (+ color repair, split-marker recombination)
//!        |
//!        v
//!  buffer --flush()--> corrected lines
//! ```
//!
//! ## Modules
//!
//! - [`record`] - input records as produced by the dispatcher
//! - [`section`] - sections, phases and the marker wire format
//! - [`recombine`] - split-marker repair
//! - [`normalize`] - per-record filters and color-code repair
//! - [`matcher`] - phase detection rules
//! - [`hints`] - known-issue detection
//! - [`tracker`] - the orchestrating [`SectionTracker`]
//!
//! ## Example
//!
//! ```
//! use lava_log::{Level, LogRecord, SectionTracker, TrackerConfig};
//!
//! let mut tracker = SectionTracker::new(TrackerConfig::default())
//!     .with_console(std::io::sink());
//!
//! let alive = tracker.feed(vec![
//!     LogRecord::new(Level::Target, "<LAVA_SIGNAL_STARTTC deqp>"),
//!     LogRecord::new(Level::Target, "Pass: 100\r\n"),
//! ])?;
//! assert!(alive);
//!
//! for line in tracker.flush() {
//!     println!("{line}");
//! }
//! for line in tracker.finish()? {
//!     println!("{line}");
//! }
//! # Ok::<(), lava_log::TrackerError>(())
//! ```

pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod hints;
pub mod matcher;
pub mod normalize;
pub mod recombine;
pub mod record;
pub mod section;
pub mod tracker;


pub use config::{Farm, TimeoutBudgets, TrackerConfig};
pub use error::{ConfigError, SectionError, TrackerError};
pub use record::{Level, LogRecord, Message};
pub use section::{Phase, Section, SectionMarker};
pub use tracker::SectionTracker;
