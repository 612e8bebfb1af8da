//! iching CLI
//!
//! Structure generation, database build and the graph/fortune analyses.
//!
//! Run with: cargo run -- --help

use anyhow::{bail, Context, Result};
use iching::{
    config::{self, Paths},
    db, graph, hexagram, import, provenance, stats, structure,
    graph::{Thresholds, TransformationGraph},
    Lexicon,
};
use rusqlite::Connection;
use std::collections::HashSet;

const USAGE: &str = "\
iching - I Ching research database

USAGE:
    iching <command> [args] [--data-dir=DIR] [--db=FILE] [--json]

STRUCTURE:
    --generate <dir>              Write hexagram structure JSON files
    --build [--threshold=T]       Rebuild the database from the data directory

LOOKUP:
    --stats                       Row counts and label distribution
    --show <n>                    One hexagram with its lines
    --path <a> <b>                Shortest line-change path between hexagrams
    --neighbors <n>               Hexagrams one line change away
    --pairs                       Relation inside each King Wen pair
    --sources                     Source files of the last import

ANALYSIS:
    --attractors                  Own lucky rate against neighbour average
    --traps                       Poor hexagrams with poor neighbours
    --clusters                    Good/bad cluster density and best escape paths
    --positions                   Label rates by line position and yang count
    --chi-square                  Position x label independence test
    --permutation [n] [seed]      Shuffle test for attraction scores

CLASSIFIER:
    --classify <text>             Classify one line text
    --reclassify [threshold]      Recompute every stored label
";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print!("{}", USAGE);
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let rest = &args[2..];
    let json = args.iter().any(|a| a == "--json");
    let paths = Paths::from_args(&args);

    match args[1].as_str() {
        "--generate" => {
            let dir = config::positional(rest)
                .first()
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| paths.structure_dir());
            run_generate(&dir)
        }
        "--build" => {
            let lexicon = lexicon_from(config::flag_value(rest, "--threshold="))?;
            let report = import::rebuild_database(&paths.data_dir, &paths.db_path, &lexicon)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Database rebuilt at {:?}", paths.db_path);
                println!("  Hexagrams: {}  Lines: {}  Line texts: {}  Classified: {}",
                    report.hexagrams, report.lines, report.yaoci, report.classified);
            }
            Ok(())
        }
        "--stats" => run_stats(&open(&paths)?, json),
        "--show" => run_show(&open(&paths)?, number_arg(rest, 0)?, json),
        "--path" => run_path(number_arg(rest, 0)?, number_arg(rest, 1)?, json),
        "--neighbors" => run_neighbors(number_arg(rest, 0)?, json),
        "--pairs" => run_pairs(json),
        "--sources" => run_sources(&open(&paths)?, json),
        "--attractors" => run_attractors(&open(&paths)?, json),
        "--traps" => run_traps(&open(&paths)?, json),
        "--clusters" => run_clusters(&open(&paths)?, json),
        "--positions" => run_positions(&open(&paths)?, json),
        "--chi-square" => {
            let lines = labelled_lines(&open(&paths)?)?;
            let result = stats::position_independence(&lines)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Position x label chi-square");
                println!("  χ² = {:.3}  df = {}  p = {:.4}",
                    result.statistic, result.degrees_of_freedom, result.p_value);
            }
            Ok(())
        }
        "--permutation" => {
            let pos = config::positional(rest);
            let iterations: usize = pos.first().map(|s| s.parse::<usize>()).transpose()?.unwrap_or(1000);
            let seed: u64 = pos.get(1).map(|s| s.parse::<u64>()).transpose()?.unwrap_or(42);
            run_permutation(&open(&paths)?, iterations, seed, json)
        }
        "--classify" => {
            let text = config::positional(rest).join(" ");
            let c = Lexicon::default().classify(&text);
            if json {
                println!("{}", serde_json::to_string_pretty(&c)?);
            } else {
                println!("{} ({:+.1})  吉: {:?}  凶: {:?}",
                    c.fortune.glyph(), c.total(), c.lucky_hits, c.unlucky_hits);
            }
            Ok(())
        }
        "--reclassify" => {
            let threshold = config::positional(rest).first().copied();
            let lexicon = lexicon_from(threshold)?;
            let conn = open(&paths)?;
            let n = db::reclassify(&conn, &lexicon)?;
            println!("Reclassified {} lines", n);
            Ok(())
        }
        "--help" | "-h" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command {:?}\n\n{}", other, USAGE),
    }
}

fn open(paths: &Paths) -> Result<Connection> {
    if !paths.db_path.exists() {
        bail!(
            "No database at {:?}. Run `iching --build` or the import binary first.",
            paths.db_path
        );
    }
    db::init_db(&paths.db_path)
}

fn lexicon_from(threshold: Option<&str>) -> Result<Lexicon> {
    match threshold {
        Some(t) => Ok(Lexicon::with_threshold(
            t.parse().with_context(|| format!("Invalid threshold {:?}", t))?,
        )),
        None => Ok(Lexicon::default()),
    }
}

fn number_arg(args: &[String], index: usize) -> Result<u8> {
    let pos = config::positional(args);
    let raw = pos
        .get(index)
        .with_context(|| format!("Missing hexagram number (argument {})", index + 1))?;
    let n: u8 = raw
        .parse()
        .with_context(|| format!("Not a hexagram number: {:?}", raw))?;
    hexagram::by_number(n)?;
    Ok(n)
}

fn labelled_lines(conn: &Connection) -> Result<Vec<iching::LineRow>> {
    let lines = db::labelled_lines(conn)?;
    if lines.is_empty() {
        bail!("No labelled lines in the database. Import line texts (zhouyi_64gua.json) and rebuild.");
    }
    Ok(lines)
}

fn bar(rate: f64) -> String {
    "█".repeat((rate * 20.0).round().max(0.0) as usize)
}

/// First 16 hex digits, or the whole value when it is shorter
fn short_hash(sha256: &str) -> &str {
    sha256.get(..16).unwrap_or(sha256)
}

fn label(n: u8) -> String {
    format!("{:2}. {}", n, hexagram::name_of(n))
}

// ============================================================================
// STRUCTURE
// ============================================================================

fn run_generate(dir: &std::path::Path) -> Result<()> {
    let data = structure::generate();
    data.write_json(dir)?;
    let summary = data.summary();

    println!("Saved hexagram structure to {:?}", dir);
    println!("\n=== Statistics ===");
    println!("Symmetric hexagrams (翻轉不變): {}", summary.symmetric);
    println!("Total transformations: {}", summary.transformations);
    println!("Yang line distribution: {:?}", summary.yang_distribution);
    Ok(())
}

// ============================================================================
// LOOKUP
// ============================================================================

fn run_stats(conn: &Connection, json: bool) -> Result<()> {
    let counts = db::counts(conn)?;
    let lines = db::labelled_lines(conn)?;
    let labels = stats::label_counts(&lines);

    if json {
        let out = serde_json::json!({ "counts": counts, "labels": labels });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Trigrams: {}", counts.trigrams);
    println!("Hexagrams: {}", counts.hexagrams);
    println!("Lines: {} ({} with text)", counts.lines, counts.lines_with_text);
    println!("Relationships: {}", counts.relationships);
    println!("Hexagram texts: {}", counts.hexagram_texts);
    println!("Ten Wings: {}", counts.ten_wings);
    println!("Commentaries: {}", counts.commentaries);

    if labels.total() > 0 {
        println!("\nLabel distribution ({} lines):", labels.total());
        for f in iching::Fortune::ALL {
            println!("  {} {:3} ({:5.1}%)", f.glyph(), labels.get(f), labels.rate(f) * 100.0);
        }
        println!("Majority baseline: {:.1}%", labels.majority_baseline() * 100.0);
    }
    Ok(())
}

fn run_show(conn: &Connection, number: u8, json: bool) -> Result<()> {
    let hex = db::get_hexagram(conn, number)?
        .with_context(|| format!("Hexagram {} not in database", number))?;
    let lines = db::lines_for(conn, number)?;

    if json {
        let out = serde_json::json!({ "hexagram": hex, "lines": lines });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}  {}", hex.king_wen_number, hex.name, hex.binary);
    println!("  Upper: {}  Lower: {}",
        hex.upper_trigram.as_deref().unwrap_or("?"),
        hex.lower_trigram.as_deref().unwrap_or("?"));
    let rel = |n: Option<u8>| n.map(label).unwrap_or_else(|| "?".to_string());
    println!("  Inverse: {}  Complement: {}  Nuclear: {}",
        rel(hex.inverse_hexagram), rel(hex.complement_hexagram), rel(hex.nuclear_hexagram));
    println!("  Fu Xi: {:?}  Mawangdui: {:?}  Canon: {}  Pair: {}",
        hex.fuxi_position, hex.mawangdui_position, hex.canon, hex.pair_number);
    if let Some(guaci) = &hex.guaci {
        println!("  {}", guaci);
    }

    // Top line first, the way hexagrams are drawn
    for line in lines.iter().rev() {
        let glyph = match line.line_type {
            iching::LineType::Yang => "━━━━━━━",
            iching::LineType::Yin => "━━━ ━━━",
        };
        let fortune = line.fortune.map(|f| f.glyph()).unwrap_or(" ");
        println!("  {} {} {} {}", line.position, glyph, fortune, line.yaoci.as_deref().unwrap_or(""));
    }
    Ok(())
}

fn run_path(from: u8, to: u8, json: bool) -> Result<()> {
    let graph = TransformationGraph::build();
    let path = graph.shortest_path(from, to)?;

    if json {
        println!("{}", serde_json::to_string(&path)?);
        return Ok(());
    }

    let names: Vec<String> = path.iter().map(|n| label(*n)).collect();
    println!("{}", names.join(" → "));
    println!("Steps: {}", path.len().saturating_sub(1));
    Ok(())
}

fn run_neighbors(number: u8, json: bool) -> Result<()> {
    let graph = TransformationGraph::build();
    let edges = graph.edges(number);

    if json {
        println!("{}", serde_json::to_string_pretty(edges)?);
        return Ok(());
    }

    println!("{} changes to:", label(number));
    for e in edges {
        println!("  line {} → {}", e.changed_line, label(e.target));
    }
    Ok(())
}

fn run_pairs(json: bool) -> Result<()> {
    let pairs = graph::king_wen_pairs();
    if json {
        println!("{}", serde_json::to_string_pretty(&pairs)?);
        return Ok(());
    }
    for p in &pairs {
        println!("  {:2}: {} / {}  {:?}", p.pair, label(p.first), label(p.second), p.relation);
    }
    Ok(())
}

fn run_sources(conn: &Connection, json: bool) -> Result<()> {
    let sources = provenance::latest_sources(conn)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }
    if sources.is_empty() {
        println!("No source files recorded (structure-only import)");
    }
    for s in &sources {
        println!("  {}  {:>8} bytes  {}", short_hash(&s.sha256), s.byte_len, s.path);
    }
    Ok(())
}

// ============================================================================
// ANALYSIS
// ============================================================================

fn run_attractors(conn: &Connection, json: bool) -> Result<()> {
    let rates = stats::hexagram_rates(&labelled_lines(conn)?);
    let scores = TransformationGraph::build().attraction(&rates);

    if json {
        println!("{}", serde_json::to_string_pretty(&scores)?);
        return Ok(());
    }

    println!("ATTRACTORS (better than their neighbours):");
    for s in scores.iter().take(10) {
        println!("  {}: attraction={:+.1}%  own={:.1}%  neighbours={:.1}%",
            label(s.hexagram), s.attraction * 100.0, s.own_rate * 100.0, s.neighbour_average * 100.0);
    }
    println!("\nREPELLERS (worse than their neighbours):");
    for s in scores.iter().rev().take(10) {
        println!("  {}: attraction={:+.1}%  own={:.1}%  neighbours={:.1}%",
            label(s.hexagram), s.attraction * 100.0, s.own_rate * 100.0, s.neighbour_average * 100.0);
    }
    Ok(())
}

fn run_traps(conn: &Connection, json: bool) -> Result<()> {
    let rates = stats::hexagram_rates(&labelled_lines(conn)?);
    let traps = TransformationGraph::build().traps(&rates, &Thresholds::default());

    if json {
        println!("{}", serde_json::to_string_pretty(&traps)?);
        return Ok(());
    }

    println!("TRAPS (poor, and every change stays poor):");
    if traps.is_empty() {
        println!("  none");
    }
    for t in &traps {
        println!("  {}: own={:.1}%  neighbours={:.1}%",
            label(t.hexagram), t.own_rate * 100.0, t.neighbour_average * 100.0);
    }
    Ok(())
}

fn run_clusters(conn: &Connection, json: bool) -> Result<()> {
    let rates = stats::hexagram_rates(&labelled_lines(conn)?);
    let graph = TransformationGraph::build();
    let thresholds = Thresholds::default();
    let density = graph.cluster_density(&rates, &thresholds);

    // Shortest escape from each of the five worst hexagrams to any of the five best
    let mut ranked: Vec<(u8, f64)> = rates.iter().map(|(h, r)| (*h, *r)).collect();
    ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    let best: HashSet<u8> = ranked.iter().rev().take(5).map(|(h, _)| *h).collect();
    let mut escapes = Vec::new();
    for (worst, _) in ranked.iter().take(5) {
        if let Some(path) = graph.path_to_any(*worst, &best)? {
            escapes.push(path);
        }
    }

    if json {
        let out = serde_json::json!({ "density": density, "escapes": escapes });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Good hexagrams (rate ≥ {:.0}%): {}", thresholds.good * 100.0, density.good_nodes.len());
    println!("Bad hexagrams (rate ≤ {:.0}%): {}", thresholds.bad * 100.0, density.bad_nodes.len());
    println!("Good → good density: {:.1}%", density.good_density * 100.0);
    println!("Bad → bad density: {:.1}%", density.bad_density * 100.0);

    println!("\nShortest escapes (worst → best):");
    for path in &escapes {
        let steps: Vec<String> = path
            .iter()
            .map(|h| format!("{}({:.0}%)", hexagram::name_of(*h), rates.get(h).copied().unwrap_or(0.0) * 100.0))
            .collect();
        println!("  {}  [{} steps]", steps.join(" → "), path.len().saturating_sub(1));
    }
    Ok(())
}

fn run_positions(conn: &Connection, json: bool) -> Result<()> {
    let lines = labelled_lines(conn)?;
    let positions = stats::position_table(&lines);
    let yang = stats::yang_count_table(&stats::hexagram_rates(&lines));

    if json {
        let out = serde_json::json!({ "positions": positions, "yang_counts": yang });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Position  Total   吉      中      凶");
    for p in &positions {
        if p.counts.total() == 0 {
            continue;
        }
        println!("  {}       {:3}   {:5.1}%  {:5.1}%  {:5.1}%",
            p.position,
            p.counts.total(),
            p.counts.rate(iching::Fortune::Lucky) * 100.0,
            p.counts.rate(iching::Fortune::Neutral) * 100.0,
            p.counts.rate(iching::Fortune::Unlucky) * 100.0);
    }

    println!("\nYang lines  Hexagrams  Mean lucky rate");
    for y in &yang {
        println!("  {}          {:2}        {:5.1}% {}",
            y.yang_count, y.hexagrams, y.mean_lucky_rate * 100.0, bar(y.mean_lucky_rate));
    }
    Ok(())
}

fn run_permutation(conn: &Connection, iterations: usize, seed: u64, json: bool) -> Result<()> {
    let lines = labelled_lines(conn)?;
    let graph = TransformationGraph::build();
    let result = stats::attraction_permutation_test(&graph, &lines, iterations, seed)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Attraction spread, real labels:     {:.4}", result.observed_spread);
    println!("Attraction spread, shuffled (mean): {:.4}", result.mean_shuffled_spread);
    println!("p = {:.4} ({} shuffles, seed {})", result.p_value, result.iterations, result.seed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_tolerates_short_values() {
        let full = provenance::hash(b"abc");
        assert_eq!(short_hash(&full), "ba7816bf8f01cfea");
        assert_eq!(short_hash("abc"), "abc");
        assert_eq!(short_hash(""), "");
    }
}
