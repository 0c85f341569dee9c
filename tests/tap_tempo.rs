// Integration test: tap tempo driving a running ticker
//
// Mirrors what a user interface does with a tap button: the estimate's
// tempo goes to `set_tempo`, a phase correction to `synchronize`.

use gmetronome::{GeneratorId, TapAnalyser, TapFlags, TempoMode, Ticker};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(3);

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_tapped_tempo_reaches_ticker() {
    let mut analyser = TapAnalyser::new();
    let origin = Instant::now();
    let mut estimate = analyser.estimate();
    for i in 0..6 {
        let (tap, e) = analyser.tap_at(origin + Duration::from_millis(400 * i), 1.0);
        assert!(tap.flags.contains(TapFlags::VALID));
        estimate = e;
    }
    assert!((estimate.tempo - 150.0).abs() < 1e-6);
    assert!(estimate.confidence > 0.9);
    assert!(estimate.phase.is_some());

    let mut ticker = Ticker::new();
    ticker.set_tempo(estimate.tempo);
    ticker.start().unwrap();
    assert!(wait_for(TIMEOUT, || {
        let stats = ticker.statistics();
        stats.generator == GeneratorId::Regular && (stats.tempo - estimate.tempo).abs() < 1e-6
    }));

    // a quarter beat phase correction spread over half a second
    ticker.synchronize(0.25, 0.0, Duration::from_millis(500));
    assert!(wait_for(TIMEOUT, || ticker.tempo_mode() == TempoMode::Sync));
    assert!(wait_for(TIMEOUT, || ticker.tempo_mode() == TempoMode::Constant));
    assert!((ticker.statistics().tempo - 150.0).abs() < 1e-3);

    ticker.stop().unwrap();
    ticker.reset();
}

#[test]
fn test_late_tap_restarts_series() {
    let mut analyser = TapAnalyser::new();
    let origin = Instant::now();
    analyser.tap_at(origin, 1.0);
    analyser.tap_at(origin + Duration::from_millis(500), 1.0);
    assert_eq!(analyser.len(), 2);

    let (tap, estimate) = analyser.tap_at(origin + Duration::from_millis(3500), 1.0);
    assert!(tap.flags.contains(TapFlags::TIMEOUT | TapFlags::INIT | TapFlags::VALID));
    assert_eq!(analyser.len(), 1);
    assert_eq!(estimate.tempo, 120.0);
    assert_eq!(estimate.confidence, 0.0);
}
