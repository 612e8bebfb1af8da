//! Keyword-based fortune classification of line texts
//!
//! Every text is scanned for weighted lucky (吉, 亨, 利 ...) and unlucky
//! (凶, 厲, 悔 ...) keywords. Longer keywords are listed first and a match
//! claims its characters, so `元吉` is counted once rather than as `元吉`
//! plus `吉`. The signed total is thresholded into lucky / neutral /
//! unlucky.
//!
//! The negated forms are handled explicitly: `无不利` is lucky, `无咎` is
//! not blame, `悔亡` is regret vanishing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Fortune;

/// A weighted keyword
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub text: String,
    pub weight: f64,
}

impl Keyword {
    fn new(text: &str, weight: f64) -> Self {
        Self {
            text: text.to_string(),
            weight,
        }
    }
}

/// Keyword lists and decision threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lexicon {
    /// Positive weights, longest first
    pub lucky: Vec<Keyword>,
    /// Negative weights, longest first
    pub unlucky: Vec<Keyword>,
    /// Total above `threshold` is lucky, below `-threshold` unlucky
    pub threshold: f64,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            lucky: vec![
                Keyword::new("无不利", 0.8),
                Keyword::new("無不利", 0.8),
                Keyword::new("元吉", 2.0),
                Keyword::new("大吉", 2.0),
                Keyword::new("終吉", 1.5),
                Keyword::new("貞吉", 1.5),
                Keyword::new("有喜", 1.0),
                Keyword::new("有慶", 1.0),
                Keyword::new("无咎", 0.3),
                Keyword::new("無咎", 0.3),
                Keyword::new("悔亡", 0.3),
                Keyword::new("吉", 1.0),
                Keyword::new("利", 0.3),
                Keyword::new("亨", 0.3),
            ],
            unlucky: vec![
                Keyword::new("大凶", -2.0),
                Keyword::new("終凶", -1.5),
                Keyword::new("貞凶", -1.5),
                Keyword::new("往凶", -1.0),
                Keyword::new("凶", -1.0),
                Keyword::new("不利", -0.5),
                Keyword::new("厲", -0.5),
                Keyword::new("吝", -0.3),
                Keyword::new("悔", -0.3),
                Keyword::new("咎", -0.3),
                Keyword::new("災", -1.0),
                Keyword::new("眚", -0.5),
            ],
            threshold: 0.3,
        }
    }
}

/// Result of classifying one text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub fortune: Fortune,
    pub lucky_score: f64,
    /// Zero or negative
    pub unlucky_score: f64,
    pub lucky_hits: Vec<String>,
    pub unlucky_hits: Vec<String>,
}

impl Classification {
    pub fn total(&self) -> f64 {
        self.lucky_score + self.unlucky_score
    }

    fn neutral() -> Self {
        Self {
            fortune: Fortune::Neutral,
            lucky_score: 0.0,
            unlucky_score: 0.0,
            lucky_hits: Vec::new(),
            unlucky_hits: Vec::new(),
        }
    }
}

impl Lexicon {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Classify one text
    pub fn classify(&self, text: &str) -> Classification {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Classification::neutral();
        }

        let mut claimed = vec![false; chars.len()];
        let (lucky_score, lucky_hits) = scan(&chars, &self.lucky, &mut claimed);
        let (unlucky_score, unlucky_hits) = scan(&chars, &self.unlucky, &mut claimed);

        let total = lucky_score + unlucky_score;
        let fortune = if total > self.threshold {
            Fortune::Lucky
        } else if total < -self.threshold {
            Fortune::Unlucky
        } else {
            Fortune::Neutral
        };

        Classification {
            fortune,
            lucky_score,
            unlucky_score,
            lucky_hits,
            unlucky_hits,
        }
    }
}

/// Count keyword occurrences whose characters are still unclaimed
fn scan(chars: &[char], keywords: &[Keyword], claimed: &mut [bool]) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut hits = Vec::new();

    for kw in keywords {
        let needle: Vec<char> = kw.text.chars().collect();
        if needle.is_empty() || needle.len() > chars.len() {
            continue;
        }

        for start in 0..=chars.len() - needle.len() {
            let end = start + needle.len();
            if chars[start..end] != needle[..] {
                continue;
            }
            if claimed[start..end].iter().any(|c| *c) {
                continue;
            }
            if is_negated(chars, &kw.text, start, end) {
                continue;
            }

            score += kw.weight;
            hits.push(kw.text.clone());
            claimed[start..end].iter_mut().for_each(|c| *c = true);
        }
    }

    (score, hits)
}

/// Occurrences that read the opposite way in context
fn is_negated(chars: &[char], keyword: &str, start: usize, end: usize) -> bool {
    let before = if start > 0 { Some(chars[start - 1]) } else { None };
    let after = chars.get(end).copied();

    match keyword {
        // 不利 is unlucky, not 利
        "利" => before == Some('不'),
        // 无咎: no blame
        "咎" => matches!(before, Some('无') | Some('無')),
        // 悔亡: regret vanishes
        "悔" => after == Some('亡'),
        // 无不利: nothing unfavourable
        "不利" => matches!(before, Some('无') | Some('無')),
        _ => false,
    }
}

// ============================================================================
// Line text extraction
// ============================================================================

/// Heading markers per line position; the first character pair is yang, the second yin
const LINE_MARKERS: [(u8, [&str; 2]); 6] = [
    (1, ["初九", "初六"]),
    (2, ["九二", "六二"]),
    (3, ["九三", "六三"]),
    (4, ["九四", "六四"]),
    (5, ["九五", "六五"]),
    (6, ["上九", "上六"]),
];

/// Extra line text of 乾 and 坤
const EXTRA_MARKERS: [&str; 2] = ["用九", "用六"];

const SEPARATORS: [char; 3] = ['：', ':', '，'];

/// Line texts found in a paragraph list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedLines {
    /// Position (1..6) -> text, heading included
    pub lines: BTreeMap<u8, String>,
    /// 用九 / 用六
    pub extra: Option<String>,
}

impl ExtractedLines {
    pub fn is_complete(&self) -> bool {
        self.lines.len() == 6
    }

    pub fn missing(&self) -> Vec<u8> {
        (1..=6).filter(|p| !self.lines.contains_key(p)).collect()
    }
}

fn starts_with_marker(entry: &str, marker: &str) -> bool {
    entry
        .strip_prefix(marker)
        .and_then(|rest| rest.chars().next())
        .map(|c| SEPARATORS.contains(&c))
        .unwrap_or(false)
}

/// Find the six line texts in the paragraphs of one hexagram.
///
/// Paragraphs that are not line texts (judgement, commentary) are ignored,
/// so the order and mix of the source list does not matter. A later
/// paragraph for the same position replaces an earlier one.
pub fn extract_yaoci<S: AsRef<str>>(entries: &[S]) -> ExtractedLines {
    let mut out = ExtractedLines::default();

    for entry in entries {
        let entry = entry.as_ref().trim();

        if let Some((pos, _)) = LINE_MARKERS
            .iter()
            .find(|(_, markers)| markers.iter().any(|m| starts_with_marker(entry, m)))
        {
            out.lines.insert(*pos, entry.to_string());
            continue;
        }

        if EXTRA_MARKERS.iter().any(|m| starts_with_marker(entry, m)) {
            out.extra = Some(entry.to_string());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        Lexicon::default().classify(text)
    }

    #[test]
    fn test_empty_text_is_neutral() {
        let c = classify("");
        assert_eq!(c.fortune, Fortune::Neutral);
        assert_eq!(c.total(), 0.0);
        assert!(c.lucky_hits.is_empty());
    }

    #[test]
    fn test_longest_keyword_claims_characters() {
        let c = classify("六五：黃裳，元吉。");
        assert_eq!(c.fortune, Fortune::Lucky);
        assert_eq!(c.lucky_hits, vec!["元吉".to_string()]);
        assert_eq!(c.lucky_score, 2.0);
    }

    #[test]
    fn test_wubuli_is_lucky() {
        let c = classify("六二：直方大，不習无不利。");
        assert_eq!(c.fortune, Fortune::Lucky);
        assert_eq!(c.lucky_hits, vec!["无不利".to_string()]);
        assert!(c.unlucky_hits.is_empty());
    }

    #[test]
    fn test_wujiu_is_not_blame() {
        let c = classify("九三：君子終日乾乾，夕惕若厲，无咎。");
        assert!(c.unlucky_hits.contains(&"厲".to_string()));
        assert!(!c.unlucky_hits.contains(&"咎".to_string()));
        // 0.3 - 0.5
        assert!((c.total() + 0.2).abs() < 1e-9);
        assert_eq!(c.fortune, Fortune::Neutral);
    }

    #[test]
    fn test_huiwang_is_not_regret() {
        let c = classify("九四：貞吉，悔亡。");
        assert!(!c.unlucky_hits.contains(&"悔".to_string()));
        assert_eq!(c.fortune, Fortune::Lucky);
    }

    #[test]
    fn test_buli_is_unlucky_but_not_li() {
        let c = classify("不利有攸往");
        assert_eq!(c.lucky_hits, Vec::<String>::new());
        assert_eq!(c.unlucky_hits, vec!["不利".to_string()]);
        assert_eq!(c.fortune, Fortune::Unlucky);
    }

    #[test]
    fn test_xiong_is_unlucky() {
        let c = classify("上六：龍戰于野，其血玄黃。貞凶");
        assert_eq!(c.fortune, Fortune::Unlucky);
        assert_eq!(c.unlucky_hits, vec!["貞凶".to_string()]);
    }

    #[test]
    fn test_repeated_keyword_counts_each_occurrence() {
        let c = classify("吉，吉");
        assert_eq!(c.lucky_hits.len(), 2);
        assert_eq!(c.lucky_score, 2.0);
    }

    #[test]
    fn test_threshold_is_configurable() {
        // 无咎 alone scores exactly 0.3: not above the default threshold
        assert_eq!(classify("无咎").fortune, Fortune::Neutral);
        assert_eq!(Lexicon::with_threshold(0.2).classify("无咎").fortune, Fortune::Lucky);
    }

    #[test]
    fn test_extract_yaoci_ignores_other_paragraphs() {
        let entries = vec![
            "乾：元亨利貞。",
            "初九：潛龍勿用。",
            "九二：見龍在田，利見大人。",
            "彖曰：大哉乾元",
            "九三：君子終日乾乾，夕惕若厲，无咎。",
            "九四:或躍在淵，无咎。",
            "九五，飛龍在天，利見大人。",
            "上九：亢龍有悔。",
            "用九：見群龍无首，吉。",
        ];
        let lines = extract_yaoci(&entries);
        assert!(lines.is_complete());
        assert_eq!(lines.lines[&1], "初九：潛龍勿用。");
        assert_eq!(lines.lines[&4], "九四:或躍在淵，无咎。");
        assert_eq!(lines.extra.as_deref(), Some("用九：見群龍无首，吉。"));
    }

    #[test]
    fn test_extract_yaoci_reports_missing() {
        let entries = ["初六：履霜，堅冰至。", "六二：直方大"];
        let lines = extract_yaoci(&entries);
        assert!(!lines.is_complete());
        assert_eq!(lines.missing(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_marker_needs_separator() {
        // 九二 inside a sentence or without punctuation is not a heading
        let lines = extract_yaoci(&["九二爻變", "說九二：非首"]);
        assert!(lines.lines.is_empty());
    }
}
