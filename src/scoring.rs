//! System scores, pairwise significance and rank clusters.
//!
//! Scores are averaged twice: first over the annotations of a segment, then
//! over segments. Systems are compared on the per-segment means of the
//! segments they share.

use crate::languages;
use crate::model::ItemType;
use crate::output::{self, Leaderboard, SystemScore};
use crate::records::{self, ScoreRecord};
use crate::sigtest::{self, Alternative};
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const COMBO_MAX: &str = "COMBO_MAX";
pub const REFS_MAX: &str = "REFS_MAX";
pub const DEFAULT_ALPHA: f64 = 0.05;
pub const DEFAULT_TRIALS: u64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigTest {
    /// One-sided Mann–Whitney U test in each direction.
    MannWhitney,
    /// Paired approximate randomisation.
    Randomization { trials: u64, seed: u64 },
}

#[derive(Clone, Debug)]
pub struct ScoringSettings {
    /// Sort and test on z-scores.
    pub wmt22: bool,
    pub sigtest: Option<SigTest>,
    pub alpha: f64,
    pub exclude: HashSet<String>,
    /// Systems combined into the per-segment oracle `COMBO_MAX`.
    pub combo: Vec<String>,
    /// References combined into `REFS_MAX`.
    pub references: Vec<String>,
    pub show_p_values: bool,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        ScoringSettings {
            wmt22: false,
            sigtest: Some(SigTest::MannWhitney),
            alpha: DEFAULT_ALPHA,
            exclude: HashSet::new(),
            combo: Vec::new(),
            references: Vec::new(),
            show_p_values: false,
        }
    }
}

/// Segment means of one system: segment -> (raw, z, annotations).
type Segments = BTreeMap<String, (f64, f64, usize)>;

/// Per-user z-scores of all records of one language pair.
fn standardize(records: &[&ScoreRecord]) -> Vec<f64> {
    let mut by_user: HashMap<&str, Vec<f64>> = HashMap::new();
    for r in records {
        by_user.entry(&r.user).or_default().push(r.score);
    }
    let stats: HashMap<&str, (f64, f64)> = by_user
        .iter()
        .map(|(u, xs)| (*u, sigtest::standardizer(xs)))
        .collect();
    records
        .iter()
        .map(|r| {
            let (mu, sd) = stats[r.user.as_str()];
            (r.score - mu) / sd
        })
        .collect()
}

fn system_segments(records: &[&ScoreRecord], z: &[f64]) -> BTreeMap<String, Segments> {
    let mut raw: BTreeMap<String, BTreeMap<String, (Vec<f64>, Vec<f64>)>> = BTreeMap::new();
    for (r, &z) in records.iter().zip(z) {
        for system in records::split_systems(&r.system) {
            let (xs, zs) = raw
                .entry(system)
                .or_default()
                .entry(r.segment.clone())
                .or_default();
            xs.push(r.score);
            zs.push(z);
        }
    }
    raw.into_iter()
        .map(|(system, segs)| {
            let segs = segs
                .into_iter()
                .map(|(seg, (xs, zs))| (seg, (sigtest::mean(&xs), sigtest::mean(&zs), xs.len())))
                .collect();
            (system, segs)
        })
        .collect()
}

/// Per-segment best of `members`, by the sort key.
fn oracle(systems: &BTreeMap<String, Segments>, members: &[String], by_z: bool) -> Option<Segments> {
    let present: Vec<&Segments> = members.iter().filter_map(|m| systems.get(m)).collect();
    if present.is_empty() {
        return None;
    }
    let mut best: Segments = BTreeMap::new();
    for segs in present {
        for (seg, &v) in segs {
            let key = |v: &(f64, f64, usize)| if by_z { v.1 } else { v.0 };
            let better = best.get(seg).is_none_or(|b| key(&v) > key(b));
            if better {
                best.insert(seg.clone(), v);
            }
        }
    }
    Some(best)
}

/// Bucketed score: 0-12.5 is 1, up to 4 for the top range.
fn h_score(raw: f64) -> f64 {
    ((raw / 25.0).round_ties_even() + 1.0).min(4.0)
}

fn summarize(system: &str, segs: &Segments) -> SystemScore {
    let raws: Vec<f64> = segs.values().map(|v| v.0).collect();
    let zs: Vec<f64> = segs.values().map(|v| v.1).collect();
    let hs: Vec<f64> = raws.iter().map(|&x| h_score(x)).collect();
    SystemScore {
        system: system.to_owned(),
        raw: sigtest::mean(&raws),
        z: sigtest::mean(&zs),
        h: sigtest::mean(&hs),
        data_points: segs.values().map(|v| v.2).sum(),
        segments: segs.len(),
        wins: 0,
        losses: 0,
        rank: String::new(),
        cluster: 0,
    }
}

/// Per-segment sort keys of two systems on their shared segments, in segment order.
fn shared(a: &Segments, b: &Segments, by_z: bool) -> (Vec<f64>, Vec<f64>) {
    let key = |v: &(f64, f64, usize)| if by_z { v.1 } else { v.0 };
    a.iter()
        .filter_map(|(seg, va)| b.get(seg).map(|vb| (key(va), key(vb))))
        .unzip()
}

/// `p[i][j]`: p-value for "system i beats system j".
fn significance(
    names: &[String],
    segments: &[&Segments],
    by_z: bool,
    test: SigTest,
    show: bool,
) -> Vec<Vec<Option<f64>>> {
    let n = names.len();
    let mut p = vec![vec![None; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = shared(segments[i], segments[j], by_z);
            let (p_ij, p_ji) = match test {
                SigTest::MannWhitney => (
                    sigtest::mann_whitney_u(&a, &b, Alternative::Greater).p_value,
                    sigtest::mann_whitney_u(&b, &a, Alternative::Greater).p_value,
                ),
                SigTest::Randomization { trials, seed } => {
                    let two_sided = sigtest::approximate_randomization(&a, &b, trials, seed).p_value;
                    let (ma, mb) = (sigtest::mean(&a), sigtest::mean(&b));
                    if ma > mb {
                        (two_sided, 1.0)
                    } else if mb > ma {
                        (1.0, two_sided)
                    } else {
                        (1.0, 1.0)
                    }
                }
            };
            if show {
                info!(target: "humeval", "{} vs {}: {} shared segments, p={p_ij:.5} / {p_ji:.5}", names[i], names[j], a.len());
            }
            p[i][j] = Some(p_ij);
            p[j][i] = Some(p_ji);
        }
    }
    p
}

/// Splits a sorted list into clusters: a cluster ends once every system in it
/// significantly beats every system below it.
pub fn cluster_ids(wins: &[usize]) -> Vec<usize> {
    let total = wins.len();
    let mut min_wins = total;
    let mut cluster = 0;
    let mut ids = Vec::with_capacity(total);
    for (pos, &w) in wins.iter().enumerate() {
        min_wins = min_wins.min(w);
        ids.push(cluster);
        if min_wins == total - (pos + 1) {
            cluster += 1;
        }
    }
    ids
}

fn leaderboard(source: &str, target: &str, records: &[&ScoreRecord], settings: &ScoringSettings) -> Leaderboard {
    let by_z = settings.wmt22;
    let z = standardize(records);
    let mut systems = system_segments(records, &z);
    for (name, members) in [(COMBO_MAX, &settings.combo), (REFS_MAX, &settings.references)] {
        if members.is_empty() {
            continue;
        }
        match oracle(&systems, members, by_z) {
            Some(segs) => {
                systems.insert(name.to_owned(), segs);
            }
            None => warn!(target: "humeval", "{source}-{target}: none of the systems for {name} found"),
        }
    }

    let mut scored: Vec<(SystemScore, &Segments)> = systems
        .iter()
        .map(|(name, segs)| (summarize(name, segs), segs))
        .collect();
    let key = |s: &SystemScore| if by_z { s.z } else { s.raw };
    scored.sort_by(|(a, _), (b, _)| key(b).total_cmp(&key(a)).then_with(|| a.system.cmp(&b.system)));

    let total = scored.len();
    let names: Vec<String> = scored.iter().map(|(s, _)| s.system.clone()).collect();
    let p_values = match settings.sigtest {
        Some(test) => {
            let segs: Vec<&Segments> = scored.iter().map(|(_, segs)| *segs).collect();
            significance(&names, &segs, by_z, test, settings.show_p_values)
        }
        None => Vec::new(),
    };
    let mut systems: Vec<SystemScore> = scored.into_iter().map(|(s, _)| s).collect();
    if settings.sigtest.is_some() {
        let beats = |i: usize, j: usize| p_values[i][j].is_some_and(|p| p < settings.alpha);
        for i in 0..total {
            systems[i].wins = (0..total).filter(|&j| beats(i, j)).count();
            systems[i].losses = (0..total).filter(|&j| beats(j, i)).count();
        }
        let wins: Vec<usize> = systems.iter().map(|s| s.wins).collect();
        for (s, cluster) in systems.iter_mut().zip(cluster_ids(&wins)) {
            s.cluster = cluster;
            s.rank = output::rank_string(s.wins, s.losses, total);
        }
    } else {
        for (pos, s) in systems.iter_mut().enumerate() {
            s.cluster = pos;
            s.rank = (pos + 1).to_string();
        }
    }
    debug!(target: "humeval", "{source}-{target}: {}", systems.iter().map(|s| format!("{}={}", s.system, s.rank)).join(", "));
    Leaderboard {
        pair: languages::pair_label(source, target),
        source: source.to_owned(),
        target: target.to_owned(),
        systems,
        by_z,
        sigtest: settings.sigtest.is_some(),
        p_values,
    }
}

/// One leaderboard per language pair, from TGT and CHK records.
pub fn leaderboards(records: &[ScoreRecord], settings: &ScoringSettings) -> Vec<Leaderboard> {
    let mut pairs: BTreeMap<(&str, &str), Vec<&ScoreRecord>> = BTreeMap::new();
    for r in records {
        if !matches!(r.item_type, ItemType::Tgt | ItemType::Chk) || settings.exclude.contains(&r.user) {
            continue;
        }
        pairs
            .entry((r.source.as_str(), r.target.as_str()))
            .or_default()
            .push(r);
    }
    let boards: Vec<Leaderboard> = pairs
        .iter()
        .map(|((s, t), rs)| leaderboard(s, t, rs, settings))
        .collect();
    for b in &boards {
        let clusters = b.systems.last().map_or(0, |s| s.cluster + 1);
        info!(target: "humeval", "{}: {} systems in {clusters} clusters", b.pair, b.systems.len());
    }
    boards
}
