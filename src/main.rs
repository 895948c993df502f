//! Webtap CLI

use std::path::Path;
use std::process;

use webtap::recording::Har;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Webtap v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: webtap <command> [options]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  stats <file.har>    Summarize a capture archive");
        eprintln!();
        eprintln!("Capture itself runs embedded: construct a SessionController");
        eprintln!("around your navigation host and call start/stop.");
        process::exit(1);
    }

    match args[1].as_str() {
        "stats" => {
            if args.len() < 3 {
                eprintln!("Usage: webtap stats <file.har>");
                process::exit(1);
            }
            show_stats(Path::new(&args[2]));
        }
        command => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'webtap' for usage information.");
            process::exit(1);
        }
    }
}

fn show_stats(path: &Path) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Cannot read {}: {e}", path.display());
            process::exit(1);
        }
    };

    let har: Har = match serde_json::from_str(&content) {
        Ok(har) => har,
        Err(e) => {
            eprintln!("Not a HAR archive: {e}");
            process::exit(1);
        }
    };

    let entries = &har.log.entries;
    let total_bytes: i64 = entries.iter().map(|e| e.response.content.size.max(0)).sum();
    let redacted = entries
        .iter()
        .filter(|e| e.response.redacted == Some(true))
        .count();

    println!("Archive: {}", path.display());
    println!("Creator: {} {}", har.log.creator.name, har.log.creator.version);
    println!("Entries: {}", entries.len());
    println!("Body bytes (decoded): {total_bytes}");
    if redacted > 0 {
        println!("Redacted entries: {redacted}");
    }

    let mut by_status: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
    for entry in entries {
        *by_status.entry(entry.response.status).or_default() += 1;
    }
    if !by_status.is_empty() {
        println!();
        println!("Status distribution:");
        for (status, count) in by_status {
            println!("  {status}: {count}");
        }
    }
}
