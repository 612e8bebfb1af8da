//! Derived hexagram structure
//!
//! Computes every relationship that follows from the King Wen binary table
//! (trigrams, nuclear hexagram, inverse, complement, sequences, single-line
//! transformations) and reads/writes it as JSON so other tools can consume
//! the same files the database is built from.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::hexagram::{self, Pattern, TrigramInfo, TrigramPattern, KING_WEN, LINES, TRIGRAMS};
use crate::types::{HexagramRecord, LineSlot, SequenceEntry, TrigramRef, Transformation};

pub const HEXAGRAMS_FILE: &str = "hexagrams_structure.json";
pub const TRIGRAMS_FILE: &str = "trigrams.json";
pub const TRANSFORMATIONS_FILE: &str = "transformations.json";
pub const SEQUENCES_FILE: &str = "sequences.json";
pub const MAWANGDUI_FILE: &str = "mawangdui_sequence.json";

/// Upper trigram order of the Mawangdui silk manuscript
const MAWANGDUI_UPPER: [&str; 8] = ["乾", "艮", "坎", "震", "坤", "兌", "離", "巽"];
/// Lower trigram order inside each Mawangdui group (after the group's own trigram)
const MAWANGDUI_LOWER: [&str; 8] = ["乾", "坤", "艮", "兌", "坎", "離", "震", "巽"];

/// Everything the import pipeline needs that is computed rather than scraped
#[derive(Debug, Clone)]
pub struct StructureData {
    /// King Wen order
    pub hexagrams: Vec<HexagramRecord>,
    pub transformations: Vec<Transformation>,
}

/// All three orderings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequences {
    pub king_wen: Vec<SequenceEntry>,
    pub fuxi: Vec<SequenceEntry>,
    pub mawangdui: Vec<SequenceEntry>,
}

/// Row of `mawangdui_sequence.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MawangduiEntry {
    pub mawangdui_position: u32,
    pub name: String,
    pub binary: Pattern,
    pub upper_trigram: String,
    pub lower_trigram: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MawangduiFile {
    sequence: Vec<MawangduiEntry>,
}

/// Quick facts printed after generation
#[derive(Debug, Clone, Serialize)]
pub struct StructureSummary {
    pub hexagrams: usize,
    pub symmetric: usize,
    pub transformations: usize,
    pub yang_distribution: BTreeMap<u32, usize>,
}

fn trigram_ref(t: TrigramPattern) -> TrigramRef {
    TrigramRef {
        binary: t,
        name: t.info().name.to_string(),
    }
}

/// Compute the Mawangdui order
pub fn mawangdui_sequence() -> Vec<MawangduiEntry> {
    let mut out = Vec::with_capacity(64);
    let mut position = 1;

    for upper in MAWANGDUI_UPPER {
        let lowers = std::iter::once(upper)
            .chain(MAWANGDUI_LOWER.iter().copied().filter(|t| *t != upper));

        for lower in lowers {
            let (Some(u), Some(l)) = (hexagram::trigram_by_name(upper), hexagram::trigram_by_name(lower)) else {
                continue;
            };
            let pattern = Pattern::from_trigrams(l.pattern(), u.pattern());
            out.push(MawangduiEntry {
                mawangdui_position: position,
                name: hexagram::by_pattern(pattern).name.to_string(),
                binary: pattern,
                upper_trigram: upper.to_string(),
                lower_trigram: lower.to_string(),
            });
            position += 1;
        }
    }

    out
}

fn build_record(kw: &hexagram::KingWen, mawangdui: &BTreeMap<Pattern, u32>) -> HexagramRecord {
    let p = kw.pattern();

    HexagramRecord {
        king_wen_number: kw.number,
        name: kw.name.to_string(),
        binary: p,
        decimal: p.decimal(),
        fuxi_position: p.fuxi_position(),
        mawangdui_position: mawangdui.get(&p).copied(),

        lower_trigram: trigram_ref(p.lower()),
        upper_trigram: trigram_ref(p.upper()),
        nuclear_lower_trigram: trigram_ref(p.nuclear_lower()),
        nuclear_upper_trigram: trigram_ref(p.nuclear_upper()),

        inverse_hexagram: hexagram::number_of(p.inverse()),
        complement_hexagram: hexagram::number_of(p.complement()),
        nuclear_hexagram: hexagram::number_of(p.nuclear()),
        is_symmetric: p.is_symmetric(),

        yang_count: p.yang_count(),
        yin_count: p.yin_count(),
        canon: kw.canon().to_string(),
        pair: kw.pair(),

        lines: p
            .lines()
            .iter()
            .enumerate()
            .map(|(i, t)| LineSlot {
                position: i as u8 + 1,
                line_type: *t,
            })
            .collect(),
    }
}

/// Every single-line change, 6 per hexagram
pub fn transformations() -> Vec<Transformation> {
    let mut out = Vec::with_capacity(64 * LINES);
    for kw in KING_WEN.iter() {
        let from = kw.pattern();
        for i in 0..LINES {
            // i < LINES always holds here
            let Ok(to) = from.flip_line(i) else { continue };
            out.push(Transformation {
                from_hexagram: kw.number,
                to_hexagram: hexagram::number_of(to),
                changed_line: i as u8 + 1,
                from_binary: from,
                to_binary: to,
            });
        }
    }
    out
}

/// Compute the full structure in memory
pub fn generate() -> StructureData {
    let mawangdui: BTreeMap<Pattern, u32> = mawangdui_sequence()
        .into_iter()
        .map(|e| (e.binary, e.mawangdui_position))
        .collect();

    StructureData {
        hexagrams: KING_WEN.iter().map(|kw| build_record(kw, &mawangdui)).collect(),
        transformations: transformations(),
    }
}

impl StructureData {
    /// King Wen, Fu Xi and Mawangdui orderings
    pub fn sequences(&self) -> Sequences {
        let entry = |h: &HexagramRecord, position: u32| SequenceEntry {
            position,
            king_wen_number: h.king_wen_number,
            name: h.name.clone(),
            binary: h.binary,
        };

        let king_wen = self
            .hexagrams
            .iter()
            .map(|h| entry(h, h.king_wen_number as u32))
            .collect();

        let mut fuxi: Vec<SequenceEntry> =
            self.hexagrams.iter().map(|h| entry(h, h.fuxi_position)).collect();
        fuxi.sort_by_key(|e| e.position);

        let mut mawangdui: Vec<SequenceEntry> = self
            .hexagrams
            .iter()
            .filter_map(|h| h.mawangdui_position.map(|p| entry(h, p)))
            .collect();
        mawangdui.sort_by_key(|e| e.position);

        Sequences { king_wen, fuxi, mawangdui }
    }

    pub fn hexagram(&self, number: u8) -> Option<&HexagramRecord> {
        self.hexagrams.iter().find(|h| h.king_wen_number == number)
    }

    pub fn summary(&self) -> StructureSummary {
        let mut yang_distribution = BTreeMap::new();
        for h in &self.hexagrams {
            *yang_distribution.entry(h.yang_count).or_insert(0) += 1;
        }

        StructureSummary {
            hexagrams: self.hexagrams.len(),
            symmetric: self.hexagrams.iter().filter(|h| h.is_symmetric).count(),
            transformations: self.transformations.len(),
            yang_distribution,
        }
    }

    /// Write all structure files into `dir`, creating it if needed
    pub fn write_json(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

        let by_number: BTreeMap<u8, &HexagramRecord> =
            self.hexagrams.iter().map(|h| (h.king_wen_number, h)).collect();
        write_pretty(&dir.join(HEXAGRAMS_FILE), &by_number)?;

        let trigrams: BTreeMap<String, &TrigramInfo> =
            TRIGRAMS.iter().map(|t| (t.binary.to_string(), t)).collect();
        write_pretty(&dir.join(TRIGRAMS_FILE), &trigrams)?;

        write_pretty(&dir.join(TRANSFORMATIONS_FILE), &self.transformations)?;
        write_pretty(&dir.join(SEQUENCES_FILE), &self.sequences())?;
        write_pretty(
            &dir.join(MAWANGDUI_FILE),
            &MawangduiFile { sequence: mawangdui_sequence() },
        )?;

        tracing::info!(
            "Wrote {} hexagrams and {} transformations to {:?}",
            self.hexagrams.len(),
            self.transformations.len(),
            dir
        );
        Ok(())
    }

    /// Read structure files written by `write_json`
    pub fn load_json(dir: &Path) -> Result<Self> {
        let hex_path = dir.join(HEXAGRAMS_FILE);
        let content = fs::read_to_string(&hex_path)
            .with_context(|| format!("Failed to read {:?}", hex_path))?;
        let by_number: BTreeMap<u8, HexagramRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", hex_path))?;

        let trans_path = dir.join(TRANSFORMATIONS_FILE);
        let content = fs::read_to_string(&trans_path)
            .with_context(|| format!("Failed to read {:?}", trans_path))?;
        let transformations: Vec<Transformation> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", trans_path))?;

        let mut data = Self {
            hexagrams: by_number.into_values().collect(),
            transformations,
        };
        data.fill_missing();
        data.validate()?;
        Ok(data)
    }

    /// Derive the fields older structure files leave out
    fn fill_missing(&mut self) {
        let expected = generate();
        for h in &mut self.hexagrams {
            let Some(e) = expected.hexagram(h.king_wen_number) else { continue };
            if h.nuclear_hexagram == 0 {
                h.nuclear_hexagram = e.nuclear_hexagram;
            }
            if h.mawangdui_position.is_none() {
                h.mawangdui_position = e.mawangdui_position;
            }
        }
    }

    /// Reject data that disagrees with the structure derived from the King Wen table
    pub fn validate(&self) -> Result<()> {
        if self.hexagrams.len() != KING_WEN.len() {
            bail!("Expected 64 hexagrams, found {}", self.hexagrams.len());
        }

        let expected = generate();
        for (h, e) in self.hexagrams.iter().zip(&expected.hexagrams) {
            if h.king_wen_number != e.king_wen_number {
                bail!(
                    "Expected hexagram {} at position {}, found {}",
                    e.king_wen_number,
                    e.king_wen_number,
                    h.king_wen_number
                );
            }
            if h.binary != e.binary {
                bail!(
                    "Hexagram {} has binary {} but the King Wen table says {}",
                    h.king_wen_number,
                    h.binary,
                    e.binary
                );
            }
            if let Some(field) = first_mismatch(h, e) {
                bail!("Hexagram {} has a wrong {}", h.king_wen_number, field);
            }
        }

        if self.transformations.len() != expected.transformations.len() {
            bail!(
                "Expected {} transformations, found {}",
                expected.transformations.len(),
                self.transformations.len()
            );
        }
        let mut found = self.transformations.clone();
        found.sort_by_key(|t| (t.from_hexagram, t.changed_line));
        for (t, e) in found.iter().zip(&expected.transformations) {
            if t != e {
                bail!(
                    "Transformation {} line {} -> {} does not match the derived {} -> {}",
                    t.from_hexagram,
                    t.changed_line,
                    t.to_hexagram,
                    e.from_hexagram,
                    e.to_hexagram
                );
            }
        }
        Ok(())
    }
}

/// Name of the first derived field where `h` differs from `e`
fn first_mismatch(h: &HexagramRecord, e: &HexagramRecord) -> Option<&'static str> {
    [
        ("name", h.name == e.name),
        ("decimal", h.decimal == e.decimal),
        ("fuxi_position", h.fuxi_position == e.fuxi_position),
        ("mawangdui_position", h.mawangdui_position == e.mawangdui_position),
        ("lower_trigram", h.lower_trigram == e.lower_trigram),
        ("upper_trigram", h.upper_trigram == e.upper_trigram),
        ("nuclear_lower_trigram", h.nuclear_lower_trigram == e.nuclear_lower_trigram),
        ("nuclear_upper_trigram", h.nuclear_upper_trigram == e.nuclear_upper_trigram),
        ("inverse_hexagram", h.inverse_hexagram == e.inverse_hexagram),
        ("complement_hexagram", h.complement_hexagram == e.complement_hexagram),
        ("nuclear_hexagram", h.nuclear_hexagram == e.nuclear_hexagram),
        ("is_symmetric", h.is_symmetric == e.is_symmetric),
        ("yang_count", h.yang_count == e.yang_count),
        ("yin_count", h.yin_count == e.yin_count),
        ("canon", h.canon == e.canon),
        ("pair", h.pair == e.pair),
        ("lines", h.lines == e.lines),
    ]
    .into_iter()
    .find(|(_, same)| !same)
    .map(|(field, _)| field)
}

/// Load from `dir` when both core files are present, otherwise compute
pub fn load_or_generate(dir: &Path) -> Result<StructureData> {
    if dir.join(HEXAGRAMS_FILE).exists() && dir.join(TRANSFORMATIONS_FILE).exists() {
        tracing::info!("Loading structure from {:?}", dir);
        StructureData::load_json(dir)
    } else {
        tracing::info!("No structure files in {:?}, generating", dir);
        Ok(generate())
    }
}

fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_counts() {
        let data = generate();
        let summary = data.summary();
        assert_eq!(summary.hexagrams, 64);
        assert_eq!(summary.symmetric, 8);
        assert_eq!(summary.transformations, 384);

        let dist: Vec<usize> = summary.yang_distribution.values().copied().collect();
        assert_eq!(dist, vec![1, 6, 15, 20, 15, 6, 1]);
    }

    #[test]
    fn test_record_fields() {
        let data = generate();
        let zhun = data.hexagram(3).unwrap();
        assert_eq!(zhun.name, "屯");
        assert_eq!(zhun.inverse_hexagram, 4);
        assert_eq!(zhun.lower_trigram.name, "震");
        assert_eq!(zhun.upper_trigram.name, "坎");
        assert_eq!(zhun.canon, "upper");
        assert_eq!(zhun.pair, 2);
        assert_eq!(zhun.lines.len(), 6);
        assert_eq!(zhun.lines[0].position, 1);

        let weiji = data.hexagram(64).unwrap();
        assert_eq!(weiji.canon, "lower");
        assert_eq!(weiji.pair, 32);
    }

    #[test]
    fn test_mawangdui_is_a_permutation() {
        let seq = mawangdui_sequence();
        assert_eq!(seq.len(), 64);
        let patterns: HashSet<Pattern> = seq.iter().map(|e| e.binary).collect();
        assert_eq!(patterns.len(), 64);

        // Each group opens with its pure hexagram
        assert_eq!(seq[0].name, "乾");
        assert_eq!(seq[8].name, "艮");
        assert_eq!(seq[32].name, "坤");
        // 乾 over 坤 is 否
        assert_eq!(seq[1].name, "否");
    }

    #[test]
    fn test_sequences_are_complete() {
        let seqs = generate().sequences();
        assert_eq!(seqs.king_wen.len(), 64);
        assert_eq!(seqs.fuxi.len(), 64);
        assert_eq!(seqs.mawangdui.len(), 64);
        assert_eq!(seqs.fuxi[0].name, "坤");
        assert_eq!(seqs.fuxi[63].name, "乾");
    }

    #[test]
    fn test_json_round_trip_through_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("structure");
        let data = generate();
        data.write_json(&dir).unwrap();

        assert!(dir.join(SEQUENCES_FILE).exists());
        assert!(dir.join(TRIGRAMS_FILE).exists());

        let loaded = load_or_generate(&dir).unwrap();
        assert_eq!(loaded.hexagrams, data.hexagrams);
        assert_eq!(loaded.transformations, data.transformations);
    }

    #[test]
    fn test_validate_rejects_wrong_binary() {
        let mut data = generate();
        data.hexagrams[0].binary = Pattern::parse("000000").unwrap();
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_edited_derived_fields() {
        let edits: [fn(&mut HexagramRecord); 5] = [
            |h| h.inverse_hexagram = 5,
            |h| h.complement_hexagram = 5,
            |h| h.nuclear_hexagram = 5,
            |h| h.fuxi_position += 1,
            |h| h.yang_count -= 1,
        ];
        for edit in edits {
            let mut data = generate();
            edit(&mut data.hexagrams[2]);
            let err = data.validate().unwrap_err().to_string();
            assert!(err.contains("Hexagram 3"), "{}", err);
        }
    }

    #[test]
    fn test_validate_rejects_partial_transformations() {
        let mut data = generate();
        data.transformations.pop();
        assert!(data.validate().is_err());

        let mut data = generate();
        data.transformations[10].to_hexagram = 1;
        assert!(data.validate().is_err());

        // Order alone does not matter
        let mut data = generate();
        data.transformations.reverse();
        assert!(data.validate().is_ok());
    }

    #[test]
    fn test_loads_records_without_nuclear_or_mawangdui() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let data = generate();
        data.write_json(dir).unwrap();

        // Older generator output: no nuclear hexagram, no Mawangdui position
        let path = dir.join(HEXAGRAMS_FILE);
        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for record in raw.as_object_mut().unwrap().values_mut() {
            let record = record.as_object_mut().unwrap();
            record.remove("nuclear_hexagram");
            record.remove("mawangdui_position");
            record.insert("wenyan".to_string(), serde_json::json!(""));
        }
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let loaded = load_or_generate(dir).unwrap();
        assert_eq!(loaded.hexagrams, data.hexagrams);
        assert_eq!(loaded.hexagram(63).unwrap().nuclear_hexagram, 64);
    }

    #[test]
    fn test_loads_hand_written_record_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let data = generate();
        data.write_json(dir).unwrap();

        let tri = |binary: &str, name: &str, nature: &str| {
            serde_json::json!({"binary": binary, "name": name, "pinyin": "x", "nature": nature})
        };
        let qian = serde_json::json!({
            "king_wen_number": 1,
            "name": "乾",
            "binary": "111111",
            "decimal": 63,
            "fuxi_position": 63,
            "lower_trigram": tri("111", "乾", "天"),
            "upper_trigram": tri("111", "乾", "天"),
            "nuclear_lower_trigram": tri("111", "乾", "天"),
            "nuclear_upper_trigram": tri("111", "乾", "天"),
            "inverse_hexagram": 1,
            "complement_hexagram": 2,
            "is_symmetric": true,
            "yang_count": 6,
            "yin_count": 0,
            "canon": "upper",
            "pair": 1,
            "lines": (1..=6).map(|i| serde_json::json!({"position": i, "type": "yang"})).collect::<Vec<_>>()
        });

        let path = dir.join(HEXAGRAMS_FILE);
        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        raw["1"] = qian;
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let loaded = load_or_generate(dir).unwrap();
        assert_eq!(loaded.hexagram(1), data.hexagram(1));
    }
}
