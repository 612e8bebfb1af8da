//! Import pipeline: structure + scraped text JSON -> SQLite
//!
//! Data directory layout (everything except the structure is optional):
//!
//! ```text
//! <data>/structure/hexagrams_structure.json    generated, or computed on the fly
//! <data>/structure/transformations.json
//! <data>/structure/shuogua_trigram_mappings.json
//! <data>/zhouyi-64gua/zhouyi_64gua.json        structured texts
//! <data>/ctext/zhouyi_64gua.json               paragraph texts
//! <data>/yizhuan/{xici_shang,...}.json         Ten Wings
//! <data>/commentaries/**/*.json                commentaries
//! ```
//!
//! Everything runs in one transaction; a failed import leaves no rows.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config;
use crate::db;
use crate::fortune::{self, Lexicon};
use crate::hexagram::{self, TRIGRAMS};
use crate::provenance::ImportRun;
use crate::structure::{self, StructureData};

const SHUOGUA_FILE: &str = "shuogua_trigram_mappings.json";
const ZHOUYI_FILE: &str = "zhouyi_64gua.json";

/// Ten Wings files: (file, name, pinyin, english)
const WINGS: [(&str, &str, &str, &str); 5] = [
    ("xici_shang.json", "繫辭上傳", "xici_shang", "Xi Ci Shang (Great Commentary I)"),
    ("xici_xia.json", "繫辭下傳", "xici_xia", "Xi Ci Xia (Great Commentary II)"),
    ("shuogua.json", "說卦傳", "shuogua", "Shuo Gua (Discussion of Trigrams)"),
    ("xugua.json", "序卦傳", "xugua", "Xu Gua (Sequence of Hexagrams)"),
    ("zagua.json", "雜卦傳", "zagua", "Za Gua (Miscellaneous Notes)"),
];

/// Rows written by one import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub run_id: String,
    pub trigrams: usize,
    pub trigram_symbols: usize,
    pub hexagrams: usize,
    pub lines: usize,
    pub relationships: usize,
    pub sequences: usize,
    pub ten_wings: usize,
    pub hexagram_texts: usize,
    pub yaoci: usize,
    pub commentaries: usize,
    pub classified: usize,
    pub sources: usize,
}

// ============================================================================
// Source file formats
// ============================================================================

#[derive(Debug, Deserialize)]
struct ShuoguaFile {
    trigrams: BTreeMap<String, ShuoguaTrigram>,
}

#[derive(Debug, Deserialize)]
struct ShuoguaTrigram {
    #[serde(default)]
    attribute_meaning: Option<String>,
    #[serde(default)]
    body_part: Option<String>,
    #[serde(default)]
    animal: Option<String>,
    #[serde(default)]
    all_symbols: Vec<String>,
    /// category -> symbols
    #[serde(default)]
    symbols: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ZhouyiFile {
    #[serde(default)]
    hexagrams: Vec<HexagramText>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HexagramText {
    // Texts already split by kind
    Structured {
        number: u8,
        #[serde(default)]
        guaci: Option<String>,
        #[serde(default)]
        tuan: Option<OneOrMany>,
        /// First entry is the 大象, the rest are 小象 for lines 1-6
        #[serde(default)]
        xiang: Vec<Option<String>>,
        #[serde(default)]
        yaoci: Vec<Option<YaociVariant>>,
    },
    // Flat paragraph list as scraped
    Paragraphs {
        metadata: ParagraphMetadata,
        #[serde(default)]
        content_zh: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn entries(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(s) => vec![s.as_str()],
            OneOrMany::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ParagraphMetadata {
    number: u8,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YaociVariant {
    Object { text: String },
    String(String),
}

impl YaociVariant {
    fn text(&self) -> &str {
        match self {
            YaociVariant::Object { text } => text,
            YaociVariant::String(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WingFile {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommentaryFile {
    Many(Vec<Commentary>),
    One(Commentary),
}

#[derive(Debug, Deserialize)]
struct Commentary {
    #[serde(alias = "hex_num", alias = "number")]
    hexagram: u8,
    #[serde(default)]
    position: Option<u8>,
    source: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    era: Option<String>,
    content: String,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Rebuild the database at `db_path` from `data_dir`
pub fn rebuild_database(data_dir: &Path, db_path: &Path, lexicon: &Lexicon) -> Result<ImportReport> {
    let mut conn = db::rebuild(db_path)?;
    import_all(&mut conn, data_dir, lexicon)
}

/// Import everything into an already initialised, empty database
pub fn import_all(conn: &mut Connection, data_dir: &Path, lexicon: &Lexicon) -> Result<ImportReport> {
    let run = ImportRun::new();
    let tx = conn.transaction()?;

    let structure_dir = data_dir.join(config::STRUCTURE_DIR);
    let data = structure::load_or_generate(&structure_dir)?;

    let mut report = ImportReport {
        run_id: run.run_id(),
        ..Default::default()
    };

    let (trigrams, symbols) = import_trigrams(&tx, &run, &structure_dir)?;
    report.trigrams = trigrams;
    report.trigram_symbols = symbols;

    let (hexagrams, lines) = import_hexagrams(&tx, &data)?;
    report.hexagrams = hexagrams;
    report.lines = lines;

    report.relationships = import_relationships(&tx, &data)?;
    report.sequences = import_sequences(&tx, &data)?;
    report.ten_wings = import_ten_wings(&tx, &run, &data_dir.join(config::YIZHUAN_DIR))?;

    // Structured texts first; paragraph texts only fill what is still empty
    for dir in [config::ZHOUYI_DIR, config::CTEXT_DIR] {
        report.hexagram_texts += import_hexagram_texts(&tx, &run, &data_dir.join(dir).join(ZHOUYI_FILE))?;
    }
    report.yaoci = db::counts(&tx)?.lines_with_text;

    report.commentaries = import_commentaries(&tx, &run, &data_dir.join(config::COMMENTARY_DIR))?;
    report.classified = db::reclassify(&tx, lexicon)?;
    report.sources = db::counts(&tx)?.import_sources;

    tx.commit()?;

    tracing::info!(
        "Import {} done: {} hexagrams, {} lines, {} yaoci, {} classified",
        report.run_id,
        report.hexagrams,
        report.lines,
        report.yaoci,
        report.classified
    );
    Ok(report)
}

/// Static trigram table, enriched with 說卦 symbols when the mapping file exists
fn import_trigrams(conn: &Connection, run: &ImportRun, structure_dir: &Path) -> Result<(usize, usize)> {
    let path = structure_dir.join(SHUOGUA_FILE);
    let shuogua = if path.exists() {
        let content = run.read_source(conn, &path)?;
        let file: ShuoguaFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        file.trigrams
    } else {
        tracing::info!("No {} found, trigrams without symbols", SHUOGUA_FILE);
        BTreeMap::new()
    };

    let mut symbols = 0;
    for (i, t) in TRIGRAMS.iter().enumerate() {
        let id = i as i64 + 1;
        let extra = shuogua.get(t.name);

        conn.execute(
            "INSERT INTO trigrams (id, name, pinyin, english, binary_repr, unicode_symbol,
                                   nature, attribute, attribute_meaning, family_role,
                                   body_part, animal, direction, element)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                id,
                t.name,
                t.pinyin,
                t.english,
                t.binary,
                t.unicode_symbol,
                t.nature,
                t.attribute,
                extra.and_then(|e| e.attribute_meaning.as_deref()),
                t.family,
                extra.and_then(|e| e.body_part.as_deref()),
                extra.and_then(|e| e.animal.as_deref()),
                t.direction,
                t.element,
            ],
        )?;

        let Some(extra) = extra else { continue };
        let categorized = extra
            .symbols
            .iter()
            .flat_map(|(cat, list)| list.iter().map(move |s| (cat.as_str(), s)));
        let uncategorized = extra.all_symbols.iter().map(|s| ("all", s));

        for (category, symbol) in categorized.chain(uncategorized) {
            conn.execute(
                "INSERT INTO trigram_symbols (trigram_id, category, symbol) VALUES (?1, ?2, ?3)",
                params![id, category, symbol],
            )?;
            symbols += 1;
        }
    }

    Ok((TRIGRAMS.len(), symbols))
}

fn trigram_id(binary: &str) -> Option<i64> {
    TRIGRAMS
        .iter()
        .position(|t| t.binary == binary)
        .map(|i| i as i64 + 1)
}

/// Hexagram rows plus their six line rows
fn import_hexagrams(conn: &Connection, data: &StructureData) -> Result<(usize, usize)> {
    let mut hex_stmt = conn.prepare(
        "INSERT INTO hexagrams (id, king_wen_number, name, binary_repr, decimal_value,
                                fuxi_position, mawangdui_position,
                                upper_trigram_id, lower_trigram_id,
                                nuclear_upper_id, nuclear_lower_id,
                                is_symmetric, yang_count, yin_count, canon, pair_number)
         VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )?;
    let mut line_stmt = conn.prepare(
        "INSERT INTO lines (hexagram_id, position, line_type) VALUES (?1, ?2, ?3)",
    )?;

    let mut lines = 0;
    for h in &data.hexagrams {
        hex_stmt.execute(params![
            h.king_wen_number,
            h.name,
            h.binary.to_string(),
            h.decimal,
            h.fuxi_position,
            h.mawangdui_position,
            trigram_id(&h.upper_trigram.binary.to_string()),
            trigram_id(&h.lower_trigram.binary.to_string()),
            trigram_id(&h.nuclear_upper_trigram.binary.to_string()),
            trigram_id(&h.nuclear_lower_trigram.binary.to_string()),
            h.is_symmetric,
            h.yang_count,
            h.yin_count,
            h.canon,
            h.pair,
        ])?;

        for line in &h.lines {
            line_stmt.execute(params![h.king_wen_number, line.position, line.line_type.as_str()])?;
            lines += 1;
        }
    }

    // Relationship columns point at hexagrams, so fill them once all rows exist
    let mut rel_stmt = conn.prepare(
        "UPDATE hexagrams SET inverse_hexagram_id = ?1, complement_hexagram_id = ?2,
                              nuclear_hexagram_id = ?3
         WHERE id = ?4",
    )?;
    for h in &data.hexagrams {
        rel_stmt.execute(params![
            h.inverse_hexagram,
            h.complement_hexagram,
            h.nuclear_hexagram,
            h.king_wen_number
        ])?;
    }

    Ok((data.hexagrams.len(), lines))
}

fn import_relationships(conn: &Connection, data: &StructureData) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO hexagram_relationships (from_hexagram_id, to_hexagram_id,
                                             relationship_type, changed_line)
         VALUES (?1, ?2, ?3, ?4)",
    )?;

    let mut count = 0;
    for t in &data.transformations {
        stmt.execute(params![t.from_hexagram, t.to_hexagram, "single_line_change", t.changed_line])?;
        count += 1;
    }

    for h in &data.hexagrams {
        for (kind, target) in [
            ("inverse", h.inverse_hexagram),
            ("complement", h.complement_hexagram),
            ("nuclear", h.nuclear_hexagram),
        ] {
            stmt.execute(params![h.king_wen_number, target, kind, Option::<u8>::None])?;
            count += 1;
        }
    }

    Ok(count)
}

fn import_sequences(conn: &Connection, data: &StructureData) -> Result<usize> {
    let seqs = data.sequences();
    let mut stmt = conn.prepare(
        "INSERT INTO sequences (hexagram_id, sequence_name, position) VALUES (?1, ?2, ?3)",
    )?;

    let mut count = 0;
    for (name, entries) in [
        ("king_wen", &seqs.king_wen),
        ("fuxi", &seqs.fuxi),
        ("mawangdui", &seqs.mawangdui),
    ] {
        for e in entries {
            stmt.execute(params![e.king_wen_number, name, e.position])?;
            count += 1;
        }
    }
    Ok(count)
}

fn import_ten_wings(conn: &Connection, run: &ImportRun, dir: &Path) -> Result<usize> {
    let mut count = 0;
    for (file, name, pinyin, english) in WINGS {
        let path = dir.join(file);
        if !path.exists() {
            tracing::debug!("Ten Wings file {:?} missing, skipping", path);
            continue;
        }

        let content = run.read_source(conn, &path)?;
        let wing: WingFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        conn.execute(
            "INSERT INTO ten_wings (name, pinyin, english_name, content, char_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, pinyin, english, wing.content, wing.content.chars().count() as i64],
        )?;
        count += 1;
    }

    if count > 0 {
        tracing::info!("Imported {} Ten Wings texts", count);
    }
    Ok(count)
}

/// Insert a hexagram text unless one of that kind already exists
fn insert_text(conn: &Connection, number: u8, kind: &str, content: &str, source: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO hexagram_texts (hexagram_id, text_type, content, source)
         SELECT ?1, ?2, ?3, ?4
         WHERE NOT EXISTS (SELECT 1 FROM hexagram_texts WHERE hexagram_id = ?1 AND text_type = ?2)",
        params![number, kind, content, source],
    )?;
    Ok(inserted > 0)
}

/// Fill an empty line column; an existing text is kept
fn set_line_text(conn: &Connection, number: u8, position: u8, column: LineColumn, text: &str) -> Result<bool> {
    let sql = match column {
        LineColumn::Yaoci => {
            "UPDATE lines SET yaoci = ?1 WHERE hexagram_id = ?2 AND position = ?3 AND yaoci IS NULL"
        }
        LineColumn::Xiaoxiang => {
            "UPDATE lines SET xiaoxiang = ?1 WHERE hexagram_id = ?2 AND position = ?3 AND xiaoxiang IS NULL"
        }
    };
    Ok(conn.execute(sql, params![text, number, position])? > 0)
}

#[derive(Clone, Copy)]
enum LineColumn {
    Yaoci,
    Xiaoxiang,
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s.trim()).filter(|s| !s.is_empty())
}

/// Body of a 彖 / 象 paragraph: `《彖》曰：…`, `《彖》…` or `彖曰：…`
fn strip_commentary<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let text = text.trim();
    let bracketed = format!("《{}》", tag);
    let rest = match text.strip_prefix(bracketed.as_str()) {
        Some(rest) => rest.strip_prefix('曰').unwrap_or(rest),
        None => text.strip_prefix(tag)?.strip_prefix('曰')?,
    };
    Some(rest.trim_start_matches(|c: char| c == '：' || c == ':').trim())
}

fn commentary_body<'a>(text: &'a str, tag: &str) -> &'a str {
    strip_commentary(text, tag).unwrap_or_else(|| text.trim())
}

/// Hexagram-level texts and line texts from either zhouyi layout.
/// Returns the number of hexagram texts inserted.
fn import_hexagram_texts(conn: &Connection, run: &ImportRun, path: &Path) -> Result<usize> {
    if !path.exists() {
        tracing::debug!("{:?} not found, skipping hexagram texts", path);
        return Ok(0);
    }

    let content = run.read_source(conn, path)?;
    let file: ZhouyiFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    let source = if path.components().any(|c| c.as_os_str() == config::CTEXT_DIR) {
        "CTEXT"
    } else {
        "ZHOUYI"
    };

    let mut texts = 0;
    let mut yaoci = 0;

    for entry in &file.hexagrams {
        let number = match entry {
            HexagramText::Structured { number, .. } => *number,
            HexagramText::Paragraphs { metadata, .. } => metadata.number,
        };
        if hexagram::by_number(number).is_err() {
            tracing::warn!("Skipping text for unknown hexagram {}", number);
            continue;
        }

        let parsed = match entry {
            HexagramText::Structured { guaci, tuan, xiang, yaoci: lines, .. } => {
                structured_texts(guaci.as_deref(), tuan.as_ref(), xiang, lines)
            }
            HexagramText::Paragraphs { content_zh, .. } => paragraph_texts(number, content_zh),
        };

        for (kind, text) in &parsed.texts {
            if insert_text(conn, number, kind, text, source)? {
                texts += 1;
            }
        }
        for (pos, text) in &parsed.yaoci {
            if set_line_text(conn, number, *pos, LineColumn::Yaoci, text)? {
                yaoci += 1;
            }
        }
        for (pos, text) in &parsed.xiaoxiang {
            set_line_text(conn, number, *pos, LineColumn::Xiaoxiang, text)?;
        }
    }

    tracing::info!("Imported {} hexagram texts and {} line texts from {:?}", texts, yaoci, path);
    Ok(texts)
}

/// Texts of one hexagram, normalised from either layout
#[derive(Debug, Default)]
struct ParsedTexts {
    /// (kind, text): guaci, tuanzhuan, daxiang, yongyao
    texts: Vec<(&'static str, String)>,
    yaoci: BTreeMap<u8, String>,
    xiaoxiang: BTreeMap<u8, String>,
}

fn structured_texts(
    guaci: Option<&str>,
    tuan: Option<&OneOrMany>,
    xiang: &[Option<String>],
    lines: &[Option<YaociVariant>],
) -> ParsedTexts {
    let mut out = ParsedTexts::default();

    if let Some(g) = guaci.and_then(non_empty) {
        out.texts.push(("guaci", g.to_string()));
    }

    let tuan: Vec<&str> = tuan
        .map(|t| t.entries())
        .unwrap_or_default()
        .into_iter()
        .map(|t| commentary_body(t, "彖"))
        .filter(|t| !t.is_empty())
        .collect();
    if !tuan.is_empty() {
        out.texts.push(("tuanzhuan", tuan.join("\n")));
    }

    let mut xiang = xiang
        .iter()
        .map(|x| x.as_deref().map(|t| commentary_body(t, "象")).filter(|t| !t.is_empty()));
    if let Some(daxiang) = xiang.next().flatten() {
        out.texts.push(("daxiang", daxiang.to_string()));
    }
    for (i, xx) in xiang.take(6).enumerate() {
        if let Some(text) = xx {
            out.xiaoxiang.insert(i as u8 + 1, text.to_string());
        }
    }

    for (i, line) in lines.iter().enumerate() {
        let Some(text) = line.as_ref().and_then(|l| non_empty(l.text())) else {
            continue;
        };
        if i < 6 {
            out.yaoci.insert(i as u8 + 1, text.to_string());
        } else if let Some(extra) = fortune::extract_yaoci(&[text]).extra {
            out.texts.push(("yongyao", extra));
        }
    }

    out
}

/// Walk the paragraphs in order: 象 after a line text is that line's 小象,
/// 象 before any line text is the 大象.
fn paragraph_texts(number: u8, content_zh: &[String]) -> ParsedTexts {
    let extracted = fortune::extract_yaoci(content_zh);
    if !extracted.is_complete() {
        tracing::warn!(
            "Hexagram {} ({}): missing line texts {:?}",
            number,
            hexagram::name_of(number),
            extracted.missing()
        );
    }

    let mut out = ParsedTexts {
        yaoci: extracted.lines.clone(),
        ..Default::default()
    };

    let mut guaci = None;
    let mut tuan = None;
    let mut daxiang = None;
    // Line the next 象 paragraph belongs to; None before the first line and after 用九/用六
    let mut current: Option<u8> = None;
    let mut seen_line = false;

    for para in content_zh.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some(pos) = extracted.lines.iter().find(|(_, l)| l.as_str() == para).map(|(p, _)| *p) {
            current = Some(pos);
            seen_line = true;
        } else if extracted.extra.as_deref() == Some(para) {
            current = None;
            seen_line = true;
        } else if let Some(body) = strip_commentary(para, "彖") {
            tuan.get_or_insert(body);
        } else if let Some(body) = strip_commentary(para, "象") {
            match current {
                Some(pos) => {
                    out.xiaoxiang.entry(pos).or_insert_with(|| body.to_string());
                }
                None if !seen_line => {
                    daxiang.get_or_insert(body);
                }
                None => {}
            }
        } else {
            // The judgement is the first paragraph that is neither a line nor a commentary
            guaci.get_or_insert(para);
        }
    }

    for (kind, text) in [("guaci", guaci), ("tuanzhuan", tuan), ("daxiang", daxiang)] {
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            out.texts.push((kind, text.to_string()));
        }
    }
    if let Some(extra) = extracted.extra {
        out.texts.push(("yongyao", extra));
    }

    out
}

/// Every JSON file under the commentary directory
fn import_commentaries(conn: &Connection, run: &ImportRun, dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
    {
        let path = entry.path();
        let content = run.read_source(conn, path)?;
        let parsed: CommentaryFile = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        let items = match parsed {
            CommentaryFile::Many(v) => v,
            CommentaryFile::One(c) => vec![c],
        };

        for c in items {
            if hexagram::by_number(c.hexagram).is_err() {
                tracing::warn!("{:?}: unknown hexagram {}", path, c.hexagram);
                continue;
            }
            conn.execute(
                "INSERT INTO commentaries (hexagram_id, position, source, author, era, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![c.hexagram, c.position, c.source, c.author, c.era, c.content],
            )?;
            count += 1;
        }
    }

    tracing::info!("Imported {} commentaries from {:?}", count, dir);
    Ok(count)
}
