//! Database layer for the I Ching research data
//!
//! A single SQLite file rebuilt from scratch by the import pipeline.
//! Hexagram ids equal King Wen numbers and trigram ids follow the order of
//! `hexagram::TRIGRAMS`, so relationship columns can be read without joins.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::fortune::Lexicon;
use crate::hexagram::Pattern;
use crate::types::{Fortune, HexagramRow, LineRow, LineType};

/// Open (or create) the database and apply the schema
pub fn init_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;
    apply_schema(&conn)?;
    Ok(conn)
}

/// Delete any existing file, then create a fresh database
pub fn rebuild(path: &Path) -> Result<Connection> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove {:?}", path))?;
        tracing::info!("Removed existing database {:?}", path);
    }
    init_db(path)
}

/// In-memory database with the schema applied
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_schema(&conn)?;
    Ok(conn)
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA).context("Failed to apply schema")?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Trigrams (八卦)
CREATE TABLE IF NOT EXISTS trigrams (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    pinyin TEXT,
    english TEXT,
    binary_repr TEXT NOT NULL UNIQUE,   -- bottom line first
    unicode_symbol TEXT,
    nature TEXT,
    attribute TEXT,
    attribute_meaning TEXT,
    family_role TEXT,
    body_part TEXT,
    animal TEXT,
    direction TEXT,
    element TEXT
);

-- Symbols associated with each trigram (說卦傳)
CREATE TABLE IF NOT EXISTS trigram_symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trigram_id INTEGER NOT NULL REFERENCES trigrams(id),
    category TEXT,
    symbol TEXT NOT NULL,
    english TEXT
);

CREATE INDEX IF NOT EXISTS idx_trigram_symbols_trigram ON trigram_symbols(trigram_id);

-- Hexagrams: id = King Wen number
CREATE TABLE IF NOT EXISTS hexagrams (
    id INTEGER PRIMARY KEY,
    king_wen_number INTEGER UNIQUE NOT NULL,
    name TEXT NOT NULL,
    pinyin TEXT,
    english TEXT,
    binary_repr TEXT NOT NULL UNIQUE,   -- bottom line first
    decimal_value INTEGER,
    fuxi_position INTEGER,
    mawangdui_position INTEGER,
    upper_trigram_id INTEGER REFERENCES trigrams(id),
    lower_trigram_id INTEGER REFERENCES trigrams(id),
    nuclear_upper_id INTEGER REFERENCES trigrams(id),
    nuclear_lower_id INTEGER REFERENCES trigrams(id),
    nuclear_hexagram_id INTEGER REFERENCES hexagrams(id),
    inverse_hexagram_id INTEGER REFERENCES hexagrams(id),
    complement_hexagram_id INTEGER REFERENCES hexagrams(id),
    is_symmetric BOOLEAN,
    yang_count INTEGER,
    yin_count INTEGER,
    canon TEXT,
    pair_number INTEGER
);

-- Lines (爻)
CREATE TABLE IF NOT EXISTS lines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hexagram_id INTEGER NOT NULL REFERENCES hexagrams(id),
    position INTEGER NOT NULL,          -- 1 = bottom
    line_type TEXT NOT NULL,            -- yin / yang
    yaoci TEXT,
    xiaoxiang TEXT,
    fortune INTEGER,                    -- 1 lucky, 0 neutral, -1 unlucky, NULL = no text
    fortune_score REAL,
    UNIQUE(hexagram_id, position)
);

-- Whole-hexagram texts: guaci, tuanzhuan, daxiang, yongyao
CREATE TABLE IF NOT EXISTS hexagram_texts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hexagram_id INTEGER NOT NULL REFERENCES hexagrams(id),
    text_type TEXT NOT NULL,
    content TEXT,
    source TEXT
);

CREATE INDEX IF NOT EXISTS idx_hexagram_texts_hexagram ON hexagram_texts(hexagram_id, text_type);

-- Later commentaries, optionally keyed to a line position
CREATE TABLE IF NOT EXISTS commentaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hexagram_id INTEGER NOT NULL REFERENCES hexagrams(id),
    position INTEGER,
    source TEXT NOT NULL,
    author TEXT,
    era TEXT,
    content TEXT
);

CREATE INDEX IF NOT EXISTS idx_commentaries_hexagram ON commentaries(hexagram_id);

-- Derived relationships: single_line_change, inverse, complement, nuclear
CREATE TABLE IF NOT EXISTS hexagram_relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_hexagram_id INTEGER NOT NULL REFERENCES hexagrams(id),
    to_hexagram_id INTEGER NOT NULL REFERENCES hexagrams(id),
    relationship_type TEXT NOT NULL,
    changed_line INTEGER
);

CREATE INDEX IF NOT EXISTS idx_relationships_from ON hexagram_relationships(from_hexagram_id, relationship_type);

-- Orderings: king_wen, fuxi, mawangdui
CREATE TABLE IF NOT EXISTS sequences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hexagram_id INTEGER NOT NULL REFERENCES hexagrams(id),
    sequence_name TEXT NOT NULL,
    position INTEGER NOT NULL,
    UNIQUE(sequence_name, position)
);

-- Ten Wings (十翼) texts that are not keyed to a hexagram
CREATE TABLE IF NOT EXISTS ten_wings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    pinyin TEXT,
    english_name TEXT,
    content TEXT,
    char_count INTEGER
);

-- Every source file read by an import run
CREATE TABLE IF NOT EXISTS import_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    path TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    byte_len INTEGER NOT NULL,
    imported_at TEXT NOT NULL
);
"#;

/// Row counts of every table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub trigrams: usize,
    pub trigram_symbols: usize,
    pub hexagrams: usize,
    pub lines: usize,
    pub lines_with_text: usize,
    pub labelled_lines: usize,
    pub hexagram_texts: usize,
    pub commentaries: usize,
    pub relationships: usize,
    pub sequences: usize,
    pub ten_wings: usize,
    pub import_sources: usize,
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

pub fn counts(conn: &Connection) -> Result<TableCounts> {
    Ok(TableCounts {
        trigrams: count(conn, "SELECT COUNT(*) FROM trigrams")?,
        trigram_symbols: count(conn, "SELECT COUNT(*) FROM trigram_symbols")?,
        hexagrams: count(conn, "SELECT COUNT(*) FROM hexagrams")?,
        lines: count(conn, "SELECT COUNT(*) FROM lines")?,
        lines_with_text: count(conn, "SELECT COUNT(*) FROM lines WHERE yaoci IS NOT NULL AND yaoci != ''")?,
        labelled_lines: count(conn, "SELECT COUNT(*) FROM lines WHERE fortune IS NOT NULL")?,
        hexagram_texts: count(conn, "SELECT COUNT(*) FROM hexagram_texts")?,
        commentaries: count(conn, "SELECT COUNT(*) FROM commentaries")?,
        relationships: count(conn, "SELECT COUNT(*) FROM hexagram_relationships")?,
        sequences: count(conn, "SELECT COUNT(*) FROM sequences")?,
        ten_wings: count(conn, "SELECT COUNT(*) FROM ten_wings")?,
        import_sources: count(conn, "SELECT COUNT(*) FROM import_sources")?,
    })
}

const HEXAGRAM_SELECT: &str = r#"
    SELECT h.king_wen_number, h.name, h.binary_repr,
           ut.name, lt.name,
           h.nuclear_hexagram_id, h.inverse_hexagram_id, h.complement_hexagram_id,
           h.fuxi_position, h.mawangdui_position,
           h.yang_count, h.canon, h.pair_number,
           (SELECT content FROM hexagram_texts t
             WHERE t.hexagram_id = h.id AND t.text_type = 'guaci' ORDER BY t.id LIMIT 1)
    FROM hexagrams h
    LEFT JOIN trigrams ut ON h.upper_trigram_id = ut.id
    LEFT JOIN trigrams lt ON h.lower_trigram_id = lt.id
"#;

fn hexagram_from_row(row: &Row<'_>) -> rusqlite::Result<HexagramRow> {
    let binary: String = row.get(2)?;
    let binary = Pattern::parse(&binary).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(HexagramRow {
        king_wen_number: row.get(0)?,
        name: row.get(1)?,
        binary,
        upper_trigram: row.get(3)?,
        lower_trigram: row.get(4)?,
        nuclear_hexagram: row.get(5)?,
        inverse_hexagram: row.get(6)?,
        complement_hexagram: row.get(7)?,
        fuxi_position: row.get(8)?,
        mawangdui_position: row.get(9)?,
        yang_count: row.get(10)?,
        canon: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        pair_number: row.get::<_, Option<u8>>(12)?.unwrap_or(0),
        guaci: row.get(13)?,
    })
}

/// One hexagram by King Wen number
pub fn get_hexagram(conn: &Connection, number: u8) -> Result<Option<HexagramRow>> {
    let sql = format!("{} WHERE h.king_wen_number = ?1", HEXAGRAM_SELECT);
    let row = conn
        .query_row(&sql, params![number], hexagram_from_row)
        .optional()?;
    Ok(row)
}

/// All hexagrams in King Wen order
pub fn list_hexagrams(conn: &Connection) -> Result<Vec<HexagramRow>> {
    let sql = format!("{} ORDER BY h.king_wen_number", HEXAGRAM_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], hexagram_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

const LINE_SELECT: &str = r#"
    SELECT hexagram_id, position, line_type, yaoci, xiaoxiang, fortune, fortune_score
    FROM lines
"#;

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<LineRow> {
    let line_type: String = row.get(2)?;
    let fortune: Option<i64> = row.get(5)?;

    Ok(LineRow {
        hexagram: row.get(0)?,
        position: row.get(1)?,
        line_type: if line_type == "yang" { LineType::Yang } else { LineType::Yin },
        yaoci: row.get(3)?,
        xiaoxiang: row.get(4)?,
        fortune: fortune.and_then(Fortune::from_value),
        fortune_score: row.get(6)?,
    })
}

/// The six lines of one hexagram, bottom first
pub fn lines_for(conn: &Connection, number: u8) -> Result<Vec<LineRow>> {
    let sql = format!("{} WHERE hexagram_id = ?1 ORDER BY position", LINE_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![number], line_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every line that carries a fortune label
pub fn labelled_lines(conn: &Connection) -> Result<Vec<LineRow>> {
    let sql = format!(
        "{} WHERE fortune IS NOT NULL ORDER BY hexagram_id, position",
        LINE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], line_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Recompute the fortune label of every line with text. Returns lines labelled.
pub fn reclassify(conn: &Connection, lexicon: &Lexicon) -> Result<usize> {
    let texts: Vec<(i64, String)> = {
        let mut stmt =
            conn.prepare("SELECT id, yaoci FROM lines WHERE yaoci IS NOT NULL AND yaoci != ''")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut update =
        conn.prepare("UPDATE lines SET fortune = ?1, fortune_score = ?2 WHERE id = ?3")?;
    for (id, text) in &texts {
        let c = lexicon.classify(text);
        update.execute(params![c.fortune.value(), c.total(), id])?;
    }

    tracing::info!("Classified {} lines (threshold {})", texts.len(), lexicon.threshold);
    Ok(texts.len())
}

/// Stored single-line changes as (from, to, changed line)
pub fn transformations(conn: &Connection) -> Result<Vec<(u8, u8, u8)>> {
    let mut stmt = conn.prepare(
        "SELECT from_hexagram_id, to_hexagram_id, changed_line
         FROM hexagram_relationships
         WHERE relationship_type = 'single_line_change'
         ORDER BY from_hexagram_id, changed_line",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Target of a one-to-one relationship (inverse, complement, nuclear)
pub fn related(conn: &Connection, number: u8, relationship: &str) -> Result<Option<u8>> {
    let target = conn
        .query_row(
            "SELECT to_hexagram_id FROM hexagram_relationships
             WHERE from_hexagram_id = ?1 AND relationship_type = ?2",
            params![number, relationship],
            |row| row.get(0),
        )
        .optional()?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_empty_tables() {
        let conn = open_in_memory().unwrap();
        let c = counts(&conn).unwrap();
        assert_eq!(c, TableCounts::default());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn test_missing_hexagram_is_none() {
        let conn = open_in_memory().unwrap();
        assert!(get_hexagram(&conn, 1).unwrap().is_none());
        assert!(lines_for(&conn, 1).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iching.db");
        {
            let conn = init_db(&path).unwrap();
            conn.execute(
                "INSERT INTO ten_wings (name, content, char_count) VALUES ('序卦傳', 'x', 1)",
                [],
            )
            .unwrap();
        }
        let conn = rebuild(&path).unwrap();
        assert_eq!(counts(&conn).unwrap().ten_wings, 0);
    }
}
