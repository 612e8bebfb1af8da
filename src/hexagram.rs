//! Hexagram and trigram line patterns
//!
//! A hexagram is six lines read bottom-first: in the textual form
//! `"100010"` the first character is line 1 (初爻) and the last is line 6
//! (上爻). The same convention holds for trigrams (`"100"` = 震, yang at
//! the bottom).
//!
//! All derived relationships (inverse, complement, nuclear) are pure
//! functions of the pattern, so nothing here touches the database.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::LineType;

/// Number of lines in a hexagram
pub const LINES: usize = 6;

/// Six-line pattern, bit `i` holds line `i + 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern(u8);

impl Pattern {
    /// Build from raw bits (line 1 is the least significant bit)
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits >= 64 {
            bail!("Hexagram bits out of range: {}", bits);
        }
        Ok(Self(bits))
    }

    /// Build from a lower and an upper trigram
    pub fn from_trigrams(lower: TrigramPattern, upper: TrigramPattern) -> Self {
        Self(lower.0 | (upper.0 << 3))
    }

    /// Parse a bottom-first `0`/`1` string of exactly six characters
    pub fn parse(s: &str) -> Result<Self> {
        Ok(Self(parse_lines(s, LINES)?))
    }

    /// Iterate over all 64 patterns in raw-bit order
    pub fn all() -> impl Iterator<Item = Pattern> {
        (0u8..64).map(Pattern)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Line at index `i` (0 = bottom)
    pub fn line(self, i: usize) -> LineType {
        if self.0 & (1 << i) != 0 {
            LineType::Yang
        } else {
            LineType::Yin
        }
    }

    pub fn lines(self) -> [LineType; LINES] {
        let mut out = [LineType::Yin; LINES];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.line(i);
        }
        out
    }

    /// Change one line (變爻). Index 0 is the bottom line.
    pub fn flip_line(self, i: usize) -> Result<Self> {
        if i >= LINES {
            bail!("Line index out of range: {} (expected 0..{})", i, LINES);
        }
        Ok(Self(self.0 ^ (1 << i)))
    }

    /// 180° rotation (綜卦): line order reversed
    pub fn inverse(self) -> Self {
        let mut out = 0u8;
        for i in 0..LINES {
            if self.0 & (1 << i) != 0 {
                out |= 1 << (LINES - 1 - i);
            }
        }
        Self(out)
    }

    /// Every line flipped (錯卦)
    pub fn complement(self) -> Self {
        Self(!self.0 & 0b11_1111)
    }

    /// Lines 1-3
    pub fn lower(self) -> TrigramPattern {
        TrigramPattern(self.0 & 0b111)
    }

    /// Lines 4-6
    pub fn upper(self) -> TrigramPattern {
        TrigramPattern((self.0 >> 3) & 0b111)
    }

    /// Lines 2-4
    pub fn nuclear_lower(self) -> TrigramPattern {
        TrigramPattern((self.0 >> 1) & 0b111)
    }

    /// Lines 3-5
    pub fn nuclear_upper(self) -> TrigramPattern {
        TrigramPattern((self.0 >> 2) & 0b111)
    }

    /// Nuclear hexagram (互卦): lines 2-4 below, lines 3-5 above
    pub fn nuclear(self) -> Self {
        Self::from_trigrams(self.nuclear_lower(), self.nuclear_upper())
    }

    pub fn yang_count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn yin_count(self) -> u32 {
        LINES as u32 - self.yang_count()
    }

    /// Unchanged by rotation
    pub fn is_symmetric(self) -> bool {
        self == self.inverse()
    }

    /// Textual form read as base 2, line 1 most significant
    pub fn decimal(self) -> u32 {
        self.inverse().0 as u32
    }

    /// Fu Xi (binary) position 0..63: the textual form read top line first
    pub fn fuxi_position(self) -> u32 {
        self.0 as u32
    }

    /// Number of differing lines
    pub fn hamming(self, other: Pattern) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_lines(self.0, LINES))
    }
}

impl FromStr for Pattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pattern {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> String {
        p.to_string()
    }
}

/// Three-line pattern, bit `i` holds line `i + 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrigramPattern(u8);

impl TrigramPattern {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(Self(parse_lines(s, 3)?))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Static description of this trigram
    pub fn info(self) -> &'static TrigramInfo {
        // Every 3-bit value has an entry in TRIGRAMS
        TRIGRAMS
            .iter()
            .find(|t| t.pattern() == self)
            .unwrap_or(&TRIGRAMS[0])
    }
}

impl fmt::Display for TrigramPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_lines(self.0, 3))
    }
}

impl TryFrom<String> for TrigramPattern {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<TrigramPattern> for String {
    fn from(p: TrigramPattern) -> String {
        p.to_string()
    }
}

fn parse_lines(s: &str, len: usize) -> Result<u8> {
    if s.chars().count() != len {
        bail!("Expected {} lines, got {:?}", len, s);
    }
    let mut bits = 0u8;
    for (i, c) in s.chars().enumerate() {
        match c {
            '1' => bits |= 1 << i,
            '0' => {}
            other => bail!("Invalid line character {:?} in {:?}", other, s),
        }
    }
    Ok(bits)
}

fn format_lines(bits: u8, len: usize) -> String {
    (0..len)
        .map(|i| if bits & (1 << i) != 0 { '1' } else { '0' })
        .collect()
}

// ============================================================================
// Trigrams (八卦)
// ============================================================================

/// Static trigram attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrigramInfo {
    pub binary: &'static str,
    pub name: &'static str,
    pub pinyin: &'static str,
    pub english: &'static str,
    pub unicode_symbol: &'static str,
    pub nature: &'static str,
    pub attribute: &'static str,
    pub family: &'static str,
    pub direction: &'static str,
    pub element: &'static str,
}

impl TrigramInfo {
    pub fn pattern(&self) -> TrigramPattern {
        // Table entries are valid by construction
        TrigramPattern(parse_lines(self.binary, 3).unwrap_or(0))
    }
}

pub const TRIGRAMS: [TrigramInfo; 8] = [
    TrigramInfo { binary: "111", name: "乾", pinyin: "qian", english: "Heaven", unicode_symbol: "☰", nature: "天", attribute: "健", family: "父", direction: "西北", element: "金" },
    TrigramInfo { binary: "000", name: "坤", pinyin: "kun", english: "Earth", unicode_symbol: "☷", nature: "地", attribute: "順", family: "母", direction: "西南", element: "土" },
    TrigramInfo { binary: "100", name: "震", pinyin: "zhen", english: "Thunder", unicode_symbol: "☳", nature: "雷", attribute: "動", family: "長男", direction: "東", element: "木" },
    TrigramInfo { binary: "011", name: "巽", pinyin: "xun", english: "Wind", unicode_symbol: "☴", nature: "風", attribute: "入", family: "長女", direction: "東南", element: "木" },
    TrigramInfo { binary: "010", name: "坎", pinyin: "kan", english: "Water", unicode_symbol: "☵", nature: "水", attribute: "陷", family: "中男", direction: "北", element: "水" },
    TrigramInfo { binary: "101", name: "離", pinyin: "li", english: "Fire", unicode_symbol: "☲", nature: "火", attribute: "麗", family: "中女", direction: "南", element: "火" },
    TrigramInfo { binary: "001", name: "艮", pinyin: "gen", english: "Mountain", unicode_symbol: "☶", nature: "山", attribute: "止", family: "少男", direction: "東北", element: "土" },
    TrigramInfo { binary: "110", name: "兌", pinyin: "dui", english: "Lake", unicode_symbol: "☱", nature: "澤", attribute: "說", family: "少女", direction: "西", element: "金" },
];

/// Find a trigram by its Chinese name
pub fn trigram_by_name(name: &str) -> Option<&'static TrigramInfo> {
    TRIGRAMS.iter().find(|t| t.name == name)
}

// ============================================================================
// King Wen sequence (文王序卦)
// ============================================================================

/// One hexagram of the traditional sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KingWen {
    pub number: u8,
    pub name: &'static str,
    pub binary: &'static str,
}

impl KingWen {
    pub fn pattern(&self) -> Pattern {
        Pattern(parse_lines(self.binary, LINES).unwrap_or(0))
    }

    /// Canon half: 1-30 upper, 31-64 lower
    pub fn canon(&self) -> &'static str {
        if self.number <= 30 {
            "upper"
        } else {
            "lower"
        }
    }

    /// Index of the King Wen pair this hexagram belongs to (1..32)
    pub fn pair(&self) -> u8 {
        (self.number + 1) / 2
    }
}

macro_rules! kw {
    ($n:expr, $name:expr, $bin:expr) => {
        KingWen { number: $n, name: $name, binary: $bin }
    };
}

pub const KING_WEN: [KingWen; 64] = [
    kw!(1, "乾", "111111"), kw!(2, "坤", "000000"),
    kw!(3, "屯", "100010"), kw!(4, "蒙", "010001"),
    kw!(5, "需", "111010"), kw!(6, "訟", "010111"),
    kw!(7, "師", "010000"), kw!(8, "比", "000010"),
    kw!(9, "小畜", "111011"), kw!(10, "履", "110111"),
    kw!(11, "泰", "111000"), kw!(12, "否", "000111"),
    kw!(13, "同人", "101111"), kw!(14, "大有", "111101"),
    kw!(15, "謙", "001000"), kw!(16, "豫", "000100"),
    kw!(17, "隨", "100110"), kw!(18, "蠱", "011001"),
    kw!(19, "臨", "110000"), kw!(20, "觀", "000011"),
    kw!(21, "噬嗑", "100101"), kw!(22, "賁", "101001"),
    kw!(23, "剝", "000001"), kw!(24, "復", "100000"),
    kw!(25, "無妄", "100111"), kw!(26, "大畜", "111001"),
    kw!(27, "頤", "100001"), kw!(28, "大過", "011110"),
    kw!(29, "坎", "010010"), kw!(30, "離", "101101"),
    kw!(31, "咸", "001110"), kw!(32, "恆", "011100"),
    kw!(33, "遯", "001111"), kw!(34, "大壯", "111100"),
    kw!(35, "晉", "000101"), kw!(36, "明夷", "101000"),
    kw!(37, "家人", "101011"), kw!(38, "睽", "110101"),
    kw!(39, "蹇", "001010"), kw!(40, "解", "010100"),
    kw!(41, "損", "110001"), kw!(42, "益", "100011"),
    kw!(43, "夬", "111110"), kw!(44, "姤", "011111"),
    kw!(45, "萃", "000110"), kw!(46, "升", "011000"),
    kw!(47, "困", "010110"), kw!(48, "井", "011010"),
    kw!(49, "革", "101110"), kw!(50, "鼎", "011101"),
    kw!(51, "震", "100100"), kw!(52, "艮", "001001"),
    kw!(53, "漸", "001011"), kw!(54, "歸妹", "110100"),
    kw!(55, "豐", "101100"), kw!(56, "旅", "001101"),
    kw!(57, "巽", "011011"), kw!(58, "兌", "110110"),
    kw!(59, "渙", "010011"), kw!(60, "節", "110010"),
    kw!(61, "中孚", "110011"), kw!(62, "小過", "001100"),
    kw!(63, "既濟", "101010"), kw!(64, "未濟", "010101"),
];

/// Look up by King Wen number (1..64)
pub fn by_number(number: u8) -> Result<&'static KingWen> {
    match KING_WEN.iter().find(|k| k.number == number) {
        Some(k) => Ok(k),
        None => bail!("Unknown hexagram number: {} (expected 1..64)", number),
    }
}

/// Look up by pattern. Every pattern is in the table.
pub fn by_pattern(pattern: Pattern) -> &'static KingWen {
    KING_WEN
        .iter()
        .find(|k| k.pattern() == pattern)
        .unwrap_or(&KING_WEN[0])
}

/// King Wen number of a pattern
pub fn number_of(pattern: Pattern) -> u8 {
    by_pattern(pattern).number
}

/// Name of the hexagram with the given number, `?` when out of range
pub fn name_of(number: u8) -> &'static str {
    by_number(number).map(|k| k.name).unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_and_display_round_trip() {
        let p = Pattern::parse("100010").unwrap();
        assert_eq!(p.bits(), 0b01_0001);
        assert_eq!(p.to_string(), "100010");
        assert_eq!(p.line(0), LineType::Yang);
        assert_eq!(p.line(1), LineType::Yin);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Pattern::parse("10001").is_err());
        assert!(Pattern::parse("1000100").is_err());
        assert!(Pattern::parse("10a010").is_err());
        assert!(TrigramPattern::parse("1111").is_err());
    }

    #[test]
    fn test_flip_line_preserves_length() {
        for p in Pattern::all() {
            for i in 0..LINES {
                let flipped = p.flip_line(i).unwrap();
                assert_eq!(flipped.to_string().len(), 6);
                assert_eq!(p.hamming(flipped), 1);
            }
        }
        assert!(Pattern::parse("111111").unwrap().flip_line(6).is_err());
    }

    #[test]
    fn test_involutions() {
        for kw in KING_WEN.iter() {
            let p = kw.pattern();
            assert_eq!(p.inverse().inverse(), p);
            assert_eq!(p.complement().complement(), p);
        }
    }

    #[test]
    fn test_inverse_and_complement_match_king_wen() {
        // 屯 / 蒙 are a rotation pair
        let zhun = by_number(3).unwrap().pattern();
        assert_eq!(number_of(zhun.inverse()), 4);
        // 乾 / 坤 are a complement pair
        let qian = by_number(1).unwrap().pattern();
        assert_eq!(number_of(qian.complement()), 2);
        // 既濟 -> 未濟 both ways
        let jiji = by_number(63).unwrap().pattern();
        assert_eq!(number_of(jiji.inverse()), 64);
        assert_eq!(number_of(jiji.complement()), 64);
    }

    #[test]
    fn test_trigrams() {
        let tai = by_number(11).unwrap().pattern();
        assert_eq!(tai.lower().info().name, "乾");
        assert_eq!(tai.upper().info().name, "坤");

        let zhun = by_number(3).unwrap().pattern();
        assert_eq!(zhun.lower().info().name, "震");
        assert_eq!(zhun.upper().info().name, "坎");
    }

    #[test]
    fn test_nuclear_hexagram() {
        // 乾 and 坤 are their own nuclear hexagrams
        assert_eq!(number_of(by_number(1).unwrap().pattern().nuclear()), 1);
        assert_eq!(number_of(by_number(2).unwrap().pattern().nuclear()), 2);
        // 既濟 (101010): lines 2-4 = 010 坎, lines 3-5 = 101 離 -> 未濟
        let jiji = by_number(63).unwrap().pattern();
        assert_eq!(jiji.nuclear_lower().info().name, "坎");
        assert_eq!(jiji.nuclear_upper().info().name, "離");
        assert_eq!(number_of(jiji.nuclear()), 64);
    }

    #[test]
    fn test_king_wen_table_is_a_bijection() {
        let patterns: HashSet<Pattern> = KING_WEN.iter().map(|k| k.pattern()).collect();
        assert_eq!(patterns.len(), 64);
        for (i, kw) in KING_WEN.iter().enumerate() {
            assert_eq!(kw.number as usize, i + 1);
        }
        assert!(by_number(0).is_err());
        assert!(by_number(65).is_err());
    }

    #[test]
    fn test_symmetric_count() {
        let symmetric = KING_WEN.iter().filter(|k| k.pattern().is_symmetric()).count();
        assert_eq!(symmetric, 8);
    }

    #[test]
    fn test_positions() {
        let fu = Pattern::parse("100000").unwrap();
        assert_eq!(fu.decimal(), 32);
        assert_eq!(fu.fuxi_position(), 1);
        assert_eq!(Pattern::parse("111111").unwrap().fuxi_position(), 63);
    }

    #[test]
    fn test_serde_as_string() {
        let p = Pattern::parse("010101").unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"010101\"");
        let back: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<Pattern>("\"01\"").is_err());
    }
}
