#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use dbpool::Backoff;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    strategy: u8,
    base_ms: u32,
    max_ms: u32,
    multiplier: f64,
    jitter: bool,
    retry: u32,
}

fuzz_target!(|input: Input| {
    let base = Duration::from_millis(u64::from(input.base_ms));
    let max = Duration::from_millis(u64::from(input.max_ms));

    let backoff = match input.strategy % 3 {
        0 => Backoff::fixed(base),
        1 => Backoff::linear(base),
        _ => Backoff::exponential(base).multiplier(input.multiplier),
    }
    .max_delay(max)
    .jitter(input.jitter);

    let delay = backoff.delay_for(input.retry);
    if input.retry == 0 {
        assert_eq!(delay, Duration::ZERO);
    }
    assert!(delay <= max + Duration::from_nanos(1), "{delay:?} exceeds cap {max:?}");
});
