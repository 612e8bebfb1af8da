//! Rebuild the I Ching database from structure and scraped-text JSON
//!
//! Usage: cargo run --bin import -- [data-dir] [db-path] [--threshold=0.3]

use anyhow::{Context, Result};
use iching::config::{self, Paths};
use iching::{db, import, Lexicon};
use std::time::Instant;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let positional = config::positional(&args);
    let paths = Paths::resolve(
        positional.first().copied().or(config::flag_value(&args, "--data-dir=")),
        positional.get(1).copied().or(config::flag_value(&args, "--db=")),
    );

    let lexicon = match config::flag_value(&args, "--threshold=") {
        Some(t) => Lexicon::with_threshold(
            t.parse().with_context(|| format!("Invalid threshold {:?}", t))?,
        ),
        None => Lexicon::default(),
    };

    if !paths.data_dir.exists() {
        tracing::warn!(
            "Data directory {:?} does not exist; importing structure only",
            paths.data_dir
        );
    }

    println!("Building database at {:?}", paths.db_path);
    let start = Instant::now();
    let report = import::rebuild_database(&paths.data_dir, &paths.db_path, &lexicon)?;

    let conn = db::init_db(&paths.db_path)?;
    let counts = db::counts(&conn)?;

    println!("\n========================================");
    println!("Import complete! ({:.1?})", start.elapsed());
    println!("  Run: {}", report.run_id);
    println!("  Trigrams: {}", counts.trigrams);
    println!("  Trigram symbols: {}", counts.trigram_symbols);
    println!("  Hexagrams: {}", counts.hexagrams);
    println!("  Lines: {} ({} with text)", counts.lines, counts.lines_with_text);
    println!("  Relationships: {}", counts.relationships);
    println!("  Sequences: {}", counts.sequences);
    println!("  Hexagram texts: {}", counts.hexagram_texts);
    println!("  Ten Wings texts: {}", counts.ten_wings);
    println!("  Commentaries: {}", counts.commentaries);
    println!("  Classified lines: {}", counts.labelled_lines);
    println!("  Source files: {}", counts.import_sources);
    println!("========================================");

    Ok(())
}
