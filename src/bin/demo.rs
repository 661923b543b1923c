//! PerfCounter Watcher - Demo CLI
//!
//! Runs one-shot queries for a few well-known counters and prints the results.

use std::thread;
use std::time::Duration;

use perfcounter_watcher_lib::core::Backend;
use perfcounter_watcher_lib::watcher::Watcher;

const COUNTERS: &[(&str, &str)] = &[
    ("\\Processor(_Total)\\% Processor Time", "_Total"),
    ("\\Processor(*)\\% Processor Time", "*"),
    ("\\Memory\\Available MBytes", "*"),
    ("\\Memory\\Committed Bytes", "*"),
    ("\\System\\Processes", "*"),
    ("\\Process(*)\\Working Set", "total"),
];

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("==============================================");
    println!("   PerfCounter Watcher - One-shot Query Demo");
    println!("==============================================\n");

    let watcher = match Watcher::detect(Backend::Auto) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("No counter subsystem available: {}", e);
            std::process::exit(1);
        }
    };
    println!("  Subsystem: {}\n", watcher.subsystem_name());

    println!("----------------------------------------------------------------");
    println!("  {:<42} | {:<8} | Value", "Counter", "Instance");
    println!("----------------------------------------------------------------");

    for round in 0..3 {
        for (path, instance) in COUNTERS {
            match watcher.query(path, instance) {
                Ok(value) => println!("  {:<42} | {:<8} | {:.2}", path, instance, value),
                Err(e) => println!("  {:<42} | {:<8} | error: {}", path, instance, e),
            }
        }

        if round < 2 {
            println!();
            thread::sleep(Duration::from_secs(1));
        }
    }

    println!("----------------------------------------------------------------");
    println!("  Note: rate counters (% Processor Time) need two collections and");
    println!("  read 0 in one-shot mode. Use the watcher agent for live values.\n");
}
