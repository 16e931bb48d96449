#![no_main]
use lava_log::SectionMarker;
use lava_log::normalize::repair_color_codes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);
    let _ = SectionMarker::parse(&s);
    let _ = SectionMarker::parse(&repair_color_codes(&s));
});
