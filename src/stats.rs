//! Fortune statistics over labelled lines
//!
//! Answers the recurring research questions:
//! - How are the labels distributed, and what does always guessing the
//!   majority label score?
//! - Does line position or yang count go with luck?
//! - Is position independent of the label (chi-square)?
//! - Are attractor/repeller scores larger than chance (permutation test)?

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::{BTreeMap, HashMap};

use crate::graph::{Rates, TransformationGraph};
use crate::hexagram::KING_WEN;
use crate::types::{Fortune, LineRow};

/// Label counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub lucky: usize,
    pub neutral: usize,
    pub unlucky: usize,
}

impl LabelCounts {
    pub fn add(&mut self, f: Fortune) {
        match f {
            Fortune::Lucky => self.lucky += 1,
            Fortune::Neutral => self.neutral += 1,
            Fortune::Unlucky => self.unlucky += 1,
        }
    }

    pub fn get(&self, f: Fortune) -> usize {
        match f {
            Fortune::Lucky => self.lucky,
            Fortune::Neutral => self.neutral,
            Fortune::Unlucky => self.unlucky,
        }
    }

    pub fn total(&self) -> usize {
        self.lucky + self.neutral + self.unlucky
    }

    pub fn rate(&self, f: Fortune) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.get(f) as f64 / total as f64
        }
    }

    /// Accuracy of always predicting the most common label
    pub fn majority_baseline(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.lucky.max(self.neutral).max(self.unlucky) as f64 / total as f64
    }
}

/// Labels at one line position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionStats {
    pub position: u8,
    pub counts: LabelCounts,
}

/// Mean hexagram lucky rate for one yang count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YangCountStats {
    pub yang_count: u32,
    pub hexagrams: usize,
    pub mean_lucky_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermutationResult {
    pub iterations: usize,
    pub seed: u64,
    /// Standard deviation of attraction scores with the real labels
    pub observed_spread: f64,
    pub mean_shuffled_spread: f64,
    /// Share of shuffles whose spread reached the observed one
    pub p_value: f64,
}

fn labelled(lines: &[LineRow]) -> impl Iterator<Item = (&LineRow, Fortune)> {
    lines.iter().filter_map(|l| l.fortune.map(|f| (l, f)))
}

pub fn label_counts(lines: &[LineRow]) -> LabelCounts {
    let mut counts = LabelCounts::default();
    for (_, f) in labelled(lines) {
        counts.add(f);
    }
    counts
}

/// Lucky lines / labelled lines, per hexagram
pub fn hexagram_rates(lines: &[LineRow]) -> Rates {
    rates_from_labels(labelled(lines).map(|(l, f)| (l.hexagram, f)))
}

fn rates_from_labels(labels: impl Iterator<Item = (u8, Fortune)>) -> Rates {
    let mut per_hex: HashMap<u8, LabelCounts> = HashMap::new();
    for (hex, f) in labels {
        per_hex.entry(hex).or_default().add(f);
    }
    per_hex
        .into_iter()
        .map(|(hex, c)| (hex, c.rate(Fortune::Lucky)))
        .collect()
}

/// Label counts for positions 1..6
pub fn position_table(lines: &[LineRow]) -> Vec<PositionStats> {
    let mut by_pos: BTreeMap<u8, LabelCounts> = (1..=6).map(|p| (p, LabelCounts::default())).collect();
    for (l, f) in labelled(lines) {
        by_pos.entry(l.position).or_default().add(f);
    }
    by_pos
        .into_iter()
        .map(|(position, counts)| PositionStats { position, counts })
        .collect()
}

/// Mean lucky rate of the hexagrams with each yang count; missing rates count as 0
pub fn yang_count_table(rates: &Rates) -> Vec<YangCountStats> {
    let mut groups: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for kw in KING_WEN.iter() {
        let rate = rates.get(&kw.number).copied().unwrap_or(0.0);
        groups.entry(kw.pattern().yang_count()).or_default().push(rate);
    }
    groups
        .into_iter()
        .map(|(yang_count, rates)| YangCountStats {
            yang_count,
            hexagrams: rates.len(),
            mean_lucky_rate: rates.iter().sum::<f64>() / rates.len() as f64,
        })
        .collect()
}

/// Chi-square test of independence on a contingency table.
/// All-zero rows and columns are dropped first.
pub fn chi_square(table: &[Vec<usize>]) -> Result<ChiSquareResult> {
    let cols = table.first().map(|r| r.len()).unwrap_or(0);
    if table.iter().any(|r| r.len() != cols) {
        bail!("Contingency table rows have different lengths");
    }

    let keep_cols: Vec<usize> = (0..cols)
        .filter(|&c| table.iter().any(|r| r[c] > 0))
        .collect();
    let rows: Vec<Vec<f64>> = table
        .iter()
        .filter(|r| r.iter().any(|v| *v > 0))
        .map(|r| keep_cols.iter().map(|&c| r[c] as f64).collect())
        .collect();

    if rows.len() < 2 || keep_cols.len() < 2 {
        bail!(
            "Need at least a 2x2 table with data, got {}x{}",
            rows.len(),
            keep_cols.len()
        );
    }

    let row_totals: Vec<f64> = rows.iter().map(|r| r.iter().sum()).collect();
    let col_totals: Vec<f64> = (0..keep_cols.len())
        .map(|c| rows.iter().map(|r| r[c]).sum())
        .collect();
    let grand: f64 = row_totals.iter().sum();

    let mut statistic = 0.0;
    for (i, row) in rows.iter().enumerate() {
        for (j, observed) in row.iter().enumerate() {
            let expected = row_totals[i] * col_totals[j] / grand;
            statistic += (observed - expected).powi(2) / expected;
        }
    }

    let dof = (rows.len() - 1) * (keep_cols.len() - 1);
    let p_value = match ChiSquared::new(dof as f64) {
        Ok(dist) => 1.0 - dist.cdf(statistic),
        Err(_) => bail!("Invalid degrees of freedom: {}", dof),
    };

    Ok(ChiSquareResult {
        statistic,
        degrees_of_freedom: dof,
        p_value,
    })
}

/// Is line position independent of the label?
pub fn position_independence(lines: &[LineRow]) -> Result<ChiSquareResult> {
    let table: Vec<Vec<usize>> = position_table(lines)
        .iter()
        .map(|p| Fortune::ALL.iter().map(|f| p.counts.get(*f)).collect())
        .collect();
    chi_square(&table)
}

fn spread(graph: &TransformationGraph, rates: &Rates) -> f64 {
    let scores: Vec<f64> = graph.attraction(rates).iter().map(|s| s.attraction).collect();
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    var.sqrt()
}

/// Shuffle labels across all lines and compare attraction spread to the real one
pub fn attraction_permutation_test(
    graph: &TransformationGraph,
    lines: &[LineRow],
    iterations: usize,
    seed: u64,
) -> Result<PermutationResult> {
    if iterations == 0 {
        bail!("Permutation test needs at least one iteration");
    }

    let owners: Vec<u8> = labelled(lines).map(|(l, _)| l.hexagram).collect();
    let mut labels: Vec<Fortune> = labelled(lines).map(|(_, f)| f).collect();
    if labels.is_empty() {
        bail!("No labelled lines; run the import with line texts first");
    }

    let observed = spread(graph, &hexagram_rates(lines));

    let mut rng = StdRng::seed_from_u64(seed);
    let mut at_least = 0usize;
    let mut total_spread = 0.0;

    for _ in 0..iterations {
        labels.shuffle(&mut rng);
        let rates = rates_from_labels(owners.iter().copied().zip(labels.iter().copied()));
        let s = spread(graph, &rates);
        total_spread += s;
        if s >= observed - 1e-12 {
            at_least += 1;
        }
    }

    tracing::debug!("Permutation test: {} of {} shuffles reached {:.4}", at_least, iterations, observed);

    Ok(PermutationResult {
        iterations,
        seed,
        observed_spread: observed,
        mean_shuffled_spread: total_spread / iterations as f64,
        // +1 smoothing keeps the estimate away from an impossible zero
        p_value: (at_least + 1) as f64 / (iterations + 1) as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineType;

    fn line(hexagram: u8, position: u8, fortune: Option<Fortune>) -> LineRow {
        LineRow {
            hexagram,
            position,
            line_type: LineType::Yang,
            yaoci: fortune.map(|_| "text".to_string()),
            xiaoxiang: None,
            fortune,
            fortune_score: None,
        }
    }

    /// Every hexagram: lines 1-5 as given by `f`, line 6 unlabelled
    fn dataset(f: impl Fn(u8, u8) -> Fortune) -> Vec<LineRow> {
        let mut out = Vec::new();
        for h in 1..=64u8 {
            for p in 1..=5u8 {
                out.push(line(h, p, Some(f(h, p))));
            }
            out.push(line(h, 6, None));
        }
        out
    }

    #[test]
    fn test_label_counts_and_baseline() {
        let lines = vec![
            line(1, 1, Some(Fortune::Lucky)),
            line(1, 2, Some(Fortune::Lucky)),
            line(1, 3, Some(Fortune::Unlucky)),
            line(1, 4, Some(Fortune::Neutral)),
            line(1, 5, None),
        ];
        let c = label_counts(&lines);
        assert_eq!(c.total(), 4);
        assert_eq!(c.lucky, 2);
        assert_eq!(c.majority_baseline(), 0.5);
        assert_eq!(LabelCounts::default().majority_baseline(), 0.0);
    }

    #[test]
    fn test_hexagram_rates_ignore_unlabelled() {
        let lines = vec![
            line(3, 1, Some(Fortune::Lucky)),
            line(3, 2, Some(Fortune::Unlucky)),
            line(3, 3, None),
            line(4, 1, Some(Fortune::Neutral)),
        ];
        let rates = hexagram_rates(&lines);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[&3], 0.5);
        assert_eq!(rates[&4], 0.0);
    }

    #[test]
    fn test_position_table_has_six_rows() {
        let lines = dataset(|_, p| if p == 5 { Fortune::Lucky } else { Fortune::Neutral });
        let table = position_table(&lines);
        assert_eq!(table.len(), 6);
        assert_eq!(table[4].counts.lucky, 64);
        assert_eq!(table[5].counts.total(), 0);
    }

    #[test]
    fn test_yang_count_table() {
        let rates: Rates = [(1u8, 1.0)].into_iter().collect();
        let table = yang_count_table(&rates);
        assert_eq!(table.len(), 7);
        let six = table.iter().find(|t| t.yang_count == 6).unwrap();
        assert_eq!(six.hexagrams, 1);
        assert_eq!(six.mean_lucky_rate, 1.0);
        let three = table.iter().find(|t| t.yang_count == 3).unwrap();
        assert_eq!(three.hexagrams, 20);
        assert_eq!(three.mean_lucky_rate, 0.0);
    }

    #[test]
    fn test_chi_square_known_value() {
        // Classic 2x2 example: chi2 = 50 * (20*15 - 5*10)^2 / (25*25*30*20) = 8.333...
        let table = vec![vec![20, 5], vec![10, 15]];
        let r = chi_square(&table).unwrap();
        assert_eq!(r.degrees_of_freedom, 1);
        assert!((r.statistic - 8.3333).abs() < 1e-3);
        assert!(r.p_value < 0.01);
    }

    #[test]
    fn test_chi_square_independent_table() {
        let r = chi_square(&[vec![10, 20], vec![10, 20]]).unwrap();
        assert!(r.statistic.abs() < 1e-12);
        assert!((r.p_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_chi_square_rejects_degenerate() {
        assert!(chi_square(&[vec![1, 2]]).is_err());
        assert!(chi_square(&[vec![1, 0], vec![2, 0]]).is_err());
        assert!(chi_square(&[vec![1, 2], vec![3]]).is_err());
    }

    #[test]
    fn test_position_independence_detects_dependence() {
        let lines = dataset(|_, p| if p == 5 { Fortune::Lucky } else { Fortune::Unlucky });
        let r = position_independence(&lines).unwrap();
        // Position 6 is all-zero and dropped: 5 positions x 2 labels
        assert_eq!(r.degrees_of_freedom, 4);
        assert!(r.p_value < 1e-6);
    }

    #[test]
    fn test_permutation_uniform_labels_are_not_significant() {
        let graph = TransformationGraph::build();
        let lines = dataset(|_, _| Fortune::Lucky);
        let r = attraction_permutation_test(&graph, &lines, 20, 7).unwrap();
        assert_eq!(r.observed_spread, 0.0);
        // Every shuffle is identical to the original
        assert_eq!(r.p_value, 1.0);
    }

    #[test]
    fn test_permutation_is_deterministic_for_a_seed() {
        let graph = TransformationGraph::build();
        let lines = dataset(|h, p| if (h as u32 + p as u32) % 3 == 0 { Fortune::Lucky } else { Fortune::Neutral });
        let a = attraction_permutation_test(&graph, &lines, 25, 42).unwrap();
        let b = attraction_permutation_test(&graph, &lines, 25, 42).unwrap();
        assert_eq!(a.mean_shuffled_spread, b.mean_shuffled_spread);
        assert_eq!(a.p_value, b.p_value);
        assert!(a.p_value > 0.0 && a.p_value <= 1.0);
    }

    #[test]
    fn test_permutation_needs_labels() {
        let graph = TransformationGraph::build();
        assert!(attraction_permutation_test(&graph, &[], 10, 1).is_err());
        let lines = dataset(|_, _| Fortune::Lucky);
        assert!(attraction_permutation_test(&graph, &lines, 0, 1).is_err());
    }
}
