//! Core types shared by the structure generator, database and analyses
//!
//! The JSON field names match the files written by `structure::write_json`
//! so the same structs load and save `hexagrams_structure.json`.

use serde::{Deserialize, Serialize};

use crate::hexagram::{Pattern, TrigramPattern};

/// Yin or yang line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Yin,
    Yang,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Yin => "yin",
            LineType::Yang => "yang",
        }
    }
}

/// Lucky / neutral / unlucky label (吉 / 中 / 凶)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Fortune {
    Unlucky,
    Neutral,
    Lucky,
}

impl Fortune {
    pub const ALL: [Fortune; 3] = [Fortune::Lucky, Fortune::Neutral, Fortune::Unlucky];

    /// Integer label stored in the database (1 / 0 / -1)
    pub fn value(self) -> i64 {
        match self {
            Fortune::Lucky => 1,
            Fortune::Neutral => 0,
            Fortune::Unlucky => -1,
        }
    }

    pub fn from_value(v: i64) -> Option<Self> {
        match v {
            1 => Some(Fortune::Lucky),
            0 => Some(Fortune::Neutral),
            -1 => Some(Fortune::Unlucky),
            _ => None,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Fortune::Lucky => "吉",
            Fortune::Neutral => "中",
            Fortune::Unlucky => "凶",
        }
    }
}

/// Trigram reference embedded in a hexagram record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrigramRef {
    pub binary: TrigramPattern,
    pub name: String,
}

/// One line slot of a generated hexagram record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineSlot {
    pub position: u8,
    #[serde(rename = "type")]
    pub line_type: LineType,
}

/// Derived structure of one hexagram
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HexagramRecord {
    pub king_wen_number: u8,
    pub name: String,
    pub binary: Pattern,
    pub decimal: u32,
    pub fuxi_position: u32,
    #[serde(default)]
    pub mawangdui_position: Option<u32>,

    pub lower_trigram: TrigramRef,
    pub upper_trigram: TrigramRef,
    pub nuclear_lower_trigram: TrigramRef,
    pub nuclear_upper_trigram: TrigramRef,

    pub inverse_hexagram: u8,
    pub complement_hexagram: u8,
    /// Absent from older structure files; `0` until filled in on load
    #[serde(default)]
    pub nuclear_hexagram: u8,
    pub is_symmetric: bool,

    pub yang_count: u32,
    pub yin_count: u32,
    pub canon: String,
    pub pair: u8,

    pub lines: Vec<LineSlot>,
}

/// Single-line change from one hexagram to another
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transformation {
    pub from_hexagram: u8,
    pub to_hexagram: u8,
    /// 1 = bottom line
    pub changed_line: u8,
    pub from_binary: Pattern,
    pub to_binary: Pattern,
}

/// Position of a hexagram within a named ordering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceEntry {
    pub position: u32,
    pub king_wen_number: u8,
    pub name: String,
    pub binary: Pattern,
}

/// A line of a hexagram as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRow {
    pub hexagram: u8,
    pub position: u8,
    pub line_type: LineType,
    pub yaoci: Option<String>,
    pub xiaoxiang: Option<String>,
    pub fortune: Option<Fortune>,
    pub fortune_score: Option<f64>,
}

/// A hexagram as stored in the database, with trigram names joined in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HexagramRow {
    pub king_wen_number: u8,
    pub name: String,
    pub binary: Pattern,
    pub upper_trigram: Option<String>,
    pub lower_trigram: Option<String>,
    pub nuclear_hexagram: Option<u8>,
    pub inverse_hexagram: Option<u8>,
    pub complement_hexagram: Option<u8>,
    pub fuxi_position: Option<u32>,
    pub mawangdui_position: Option<u32>,
    pub yang_count: u32,
    pub canon: String,
    pub pair_number: u8,
    pub guaci: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fortune_value_round_trip() {
        for f in Fortune::ALL {
            assert_eq!(Fortune::from_value(f.value()), Some(f));
        }
        assert_eq!(Fortune::from_value(2), None);
    }

    #[test]
    fn test_line_slot_serializes_type_field() {
        let slot = LineSlot { position: 1, line_type: LineType::Yang };
        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, r#"{"position":1,"type":"yang"}"#);
    }
}
