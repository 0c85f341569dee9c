use std::env;
use std::thread;
use std::time::{Duration, Instant};

use gmetronome::{Backend, CpalBackend, Meter, Ticker, TrainerMode};

/// How long the demo ticks
const DEMO_DURATION: Duration = Duration::from_secs(8);

/// Statistics polling interval (roughly a GUI frame)
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const SWAP_TIMEOUT: Duration = Duration::from_secs(1);

fn main() {
    env_logger::init();

    println!("=== GMetronome ===");

    let mut args = env::args().skip(1);
    let tempo = args
        .next()
        .and_then(|arg| arg.parse::<f64>().ok())
        .unwrap_or(120.0);
    let target = args.next().and_then(|arg| arg.parse::<f64>().ok());

    let mut ticker = Ticker::new();

    // query the devices up front so a missing one falls back to the dummy
    let mut cpal = CpalBackend::new();
    match cpal.devices() {
        Ok(devices) if !devices.is_empty() => {
            for device in &devices {
                let marker = if device.is_default { "*" } else { " " };
                println!("  {} {}", marker, device.name);
            }
            if let Err(e) = ticker.set_backend(Box::new(cpal), SWAP_TIMEOUT) {
                eprintln!("WARNING: {}", e);
            }
        }
        Ok(_) => println!("No output device, using the dummy backend"),
        Err(e) => println!("Using the dummy backend ({})", e),
    }

    ticker.set_meter(Meter::new(4, 1));
    ticker.set_tempo(tempo);
    if let Some(target) = target {
        println!("Ramping {:.1} -> {:.1} BPM", tempo, target);
        ticker.set_target_tempo(target);
        ticker.set_accel(120.0);
        ticker.set_trainer_mode(TrainerMode::Continuous);
    } else {
        println!("Ticking at {:.1} BPM", tempo);
    }

    if let Err(e) = ticker.start() {
        eprintln!("ERROR: {}", e);
        ticker.reset();
        return;
    }

    let begin = Instant::now();
    while begin.elapsed() < DEMO_DURATION {
        thread::sleep(POLL_INTERVAL);
        let stats = ticker.statistics();
        println!(
            "{:?} {:?}  tempo {:6.2}  position {:4.2}/{}  next accent {} in {:?}",
            stats.generator,
            stats.mode,
            stats.tempo,
            stats.position,
            stats.beats,
            stats.next_accent,
            stats.next_accent_delay,
        );
    }

    if let Err(e) = ticker.stop() {
        eprintln!("ERROR: {}", e);
    }
    ticker.reset();
    println!("Done");
}
