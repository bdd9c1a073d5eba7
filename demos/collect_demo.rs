//! Demonstration of the Activity Sensor Agent scheduling core.
//!
//! This example shows how to:
//! 1. Build a collector from probes and an aggregating logger
//! 2. Start it, pause it and resume it
//! 3. Shut it down and inspect the persisted batches
//!
//! Run with: cargo run --example collect_demo

use std::time::Duration;

use activity_sensor_agent::{
    aggregator::{AggregatingLogger, FlushMode, MemorySink, TracingSink},
    init_tracing,
    probes::{FocusWindowProbe, KeyboardProbe, MouseProbe, ProcessProbe},
    System,
};

fn main() {
    init_tracing();

    println!("Activity Sensor Agent - Collect Demo");
    println!("====================================");
    println!();

    let sink = MemorySink::new();
    let logger = AggregatingLogger::new(
        Duration::from_millis(600),
        FlushMode::Quorum,
        Box::new(sink.clone()),
    )
    .with_observer(Box::new(TracingSink));

    let system = System::builder("demo")
        .logger(logger)
        .probe(ProcessProbe::new(Duration::from_millis(500)))
        .and_then(|b| b.probe(FocusWindowProbe::new(Duration::from_millis(500))))
        .and_then(|b| b.probe(MouseProbe::new(Duration::from_millis(200))))
        .and_then(|b| b.probe(KeyboardProbe::new(Duration::from_millis(300))))
        .and_then(|b| b.build());

    let system = match system {
        Ok(system) => system,
        Err(e) => {
            eprintln!("Failed to build collector: {e}");
            return;
        }
    };

    if let Err(e) = system.start() {
        eprintln!("Failed to start collector: {e}");
        return;
    }
    println!("Collecting for 2 seconds...");
    std::thread::sleep(Duration::from_secs(2));

    println!("Pausing for 1 second...");
    system.pause();
    let frozen = system.elapsed();
    std::thread::sleep(Duration::from_secs(1));
    println!(
        "  Virtual time before/after pause: {:.2}s / {:.2}s",
        frozen.as_secs_f64(),
        system.elapsed().as_secs_f64()
    );
    system.resume();

    println!("Collecting for 1 more second...");
    std::thread::sleep(Duration::from_secs(1));

    let report = system.shutdown();
    println!();
    println!("Shutdown clean: {}", report.is_clean());
    println!("Batches persisted: {}", sink.batch_count());
    println!("Records persisted: {}", sink.records().len());
    println!();
    println!("{}", system.stats().summary());
}
