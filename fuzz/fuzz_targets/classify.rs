#![no_main]

use gordo_log_classifier::classify;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);

    // 패닉 없이 분류되어야 하며, 같은 입력은 같은 결과를 낸다
    let first = classify(&line);
    let second = classify(&line);
    assert_eq!(first.event.kind, second.event.kind);

    if first.event.is_unrecognized() {
        assert_eq!(first.event.raw, line);
    }
});
