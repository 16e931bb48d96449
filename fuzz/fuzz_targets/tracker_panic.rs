#![no_main]
use lava_log::clock::ManualClock;
use lava_log::record::parse_batch;
use lava_log::{SectionTracker, TrackerConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Each input line is one batch; lines that are not valid JSON are skipped.
    let s = String::from_utf8_lossy(data);
    let mut tracker = SectionTracker::new(TrackerConfig::default())
        .with_clock(ManualClock::at_epoch(1_714_557_600))
        .with_console(std::io::sink());
    for line in s.lines() {
        if let Ok(batch) = parse_batch(line) {
            if tracker.feed(batch).is_err() {
                return;
            }
            let _ = tracker.flush();
        }
    }
    let _ = tracker.finish();
});
