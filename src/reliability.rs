//! Annotator reliability filter.
//!
//! Attentive annotators score bad references below the matching references
//! and candidates. For each annotator and language pair the probes are paired
//! with their counterparts and compared with one-sided Mann–Whitney tests.

use crate::campaign;
use crate::errors::{self, Result};
use crate::model::{Id, ItemType};
use crate::records::{self, ExtractOptions, ScoreRecord};
use crate::sigtest::{self, Alternative};
use crate::store::Store;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub const DEFAULT_P_VALUE: f64 = 0.010;
pub const DEFAULT_MIN_SECONDS: f64 = 600.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QcSettings {
    /// Largest p-value of the BAD test that still passes.
    pub p_value: f64,
    /// Smallest total annotation time that passes.
    pub min_seconds: f64,
    /// Compare z-scores instead of raw scores.
    pub wmt22: bool,
}

impl Default for QcSettings {
    fn default() -> Self {
        QcSettings {
            p_value: DEFAULT_P_VALUE,
            min_seconds: DEFAULT_MIN_SECONDS,
            wmt22: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Assessment {
    pub source: String,
    pub target: String,
    pub user: String,
    /// BAD scored below REF of the same segment.
    pub p_ref: f64,
    /// TGT and CHK of the same candidate scored alike (two-sided).
    pub p_chk: f64,
    /// BAD scored below TGT of the same candidate.
    pub p_bad: f64,
    pub ref_pairs: usize,
    pub chk_pairs: usize,
    pub bad_pairs: usize,
    pub items: usize,
    pub seconds: f64,
    pub passed: bool,
}

impl Assessment {
    /// p-value the pass decision is based on.
    pub fn gate_p_value(&self) -> f64 {
        if self.ref_pairs > 0 { self.p_ref } else { self.p_bad }
    }
}

#[derive(Default)]
struct Probes {
    by_segment: HashMap<ItemType, BTreeMap<String, Vec<f64>>>,
    by_candidate: HashMap<ItemType, BTreeMap<String, Vec<f64>>>,
}

impl Probes {
    fn add(&mut self, r: &ScoreRecord, value: f64) {
        let candidate = format!("{}-{}", r.segment, r.system);
        self.by_segment
            .entry(r.item_type)
            .or_default()
            .entry(r.segment.clone())
            .or_default()
            .push(value);
        self.by_candidate
            .entry(r.item_type)
            .or_default()
            .entry(candidate)
            .or_default()
            .push(value);
    }

    /// Mean scores of keys present for both item types.
    fn pairs(table: &HashMap<ItemType, BTreeMap<String, Vec<f64>>>, a: ItemType, b: ItemType) -> (Vec<f64>, Vec<f64>) {
        let (Some(xs), Some(ys)) = (table.get(&a), table.get(&b)) else {
            return (Vec::new(), Vec::new());
        };
        xs.iter()
            .filter_map(|(key, x)| ys.get(key).map(|y| (sigtest::mean(x), sigtest::mean(y))))
            .unzip()
    }
}

fn assess_group(source: &str, target: &str, user: &str, rs: &[&ScoreRecord], settings: &QcSettings) -> Assessment {
    let raw: Vec<f64> = rs.iter().map(|r| r.score).collect();
    let (mu, sd) = sigtest::standardizer(&raw);
    let mut probes = Probes::default();
    for r in rs {
        let value = if settings.wmt22 { (r.score - mu) / sd } else { r.score };
        probes.add(r, value);
    }
    // REF items carry the reference name as system, so they pair by segment.
    let (bad_ref, refs) = Probes::pairs(&probes.by_segment, ItemType::Bad, ItemType::Ref);
    let (tgt_chk, chks) = Probes::pairs(&probes.by_candidate, ItemType::Tgt, ItemType::Chk);
    let (bad_tgt, tgts) = Probes::pairs(&probes.by_candidate, ItemType::Bad, ItemType::Tgt);
    let p_ref = sigtest::mann_whitney_u(&bad_ref, &refs, Alternative::Less).p_value;
    let p_chk = sigtest::mann_whitney_u(&tgt_chk, &chks, Alternative::TwoSided).p_value;
    let p_bad = sigtest::mann_whitney_u(&bad_tgt, &tgts, Alternative::Less).p_value;
    let seconds: f64 = rs.iter().filter_map(|r| r.duration()).sum();
    let mut a = Assessment {
        source: source.to_owned(),
        target: target.to_owned(),
        user: user.to_owned(),
        p_ref,
        p_chk,
        p_bad,
        ref_pairs: refs.len(),
        chk_pairs: chks.len(),
        bad_pairs: tgts.len(),
        items: rs.len(),
        seconds,
        passed: false,
    };
    a.passed = a.gate_p_value() <= settings.p_value && seconds >= settings.min_seconds;
    if a.ref_pairs + a.bad_pairs == 0 {
        warn!(target: "humeval", "{user} ({source}-{target}): no quality-control pairs");
    }
    debug!(target: "humeval", "{user} ({source}-{target}): p_ref={p_ref:.4} p_chk={p_chk:.4} p_bad={p_bad:.4} time={seconds:.0}s");
    a
}

/// One assessment per (source, target, user), in that order.
pub fn assess(records: &[ScoreRecord], settings: &QcSettings) -> Vec<Assessment> {
    let mut groups: BTreeMap<(&str, &str, &str), Vec<&ScoreRecord>> = BTreeMap::new();
    for r in records {
        groups
            .entry((r.source.as_str(), r.target.as_str(), r.user.as_str()))
            .or_default()
            .push(r);
    }
    let assessments: Vec<Assessment> = groups
        .iter()
        .map(|((s, t, u), rs)| assess_group(s, t, u, rs, settings))
        .collect();
    let passed = assessments.iter().filter(|a| a.passed).count();
    info!(target: "humeval", "{passed} of {} annotators passed quality control", assessments.len());
    assessments
}

/// Users that failed quality control.
pub fn rejected_users(assessments: &[Assessment]) -> Vec<String> {
    let mut users: Vec<String> = assessments
        .iter()
        .filter(|a| !a.passed)
        .map(|a| a.user.clone())
        .collect();
    users.sort();
    users.dedup();
    users
}

/// Confirmation token for a user whose agenda is finished, `None` while
/// tasks are still open. Without `qc` every finished user succeeds.
pub fn completion_token(
    store: &Store,
    campaign: Id,
    username: &str,
    secret: &str,
    qc: Option<&QcSettings>,
) -> Result<Option<Uuid>> {
    let agenda = store
        .agenda(username, campaign)
        .ok_or_else(|| errors::lookup_failed(format!("agenda of {username} in campaign {campaign}")))?;
    if !agenda.open.is_empty() {
        return Ok(None);
    }
    let passed = match qc {
        None => true,
        Some(settings) => {
            let options = ExtractOptions {
                extended: true,
                expand_systems: true,
                include_inactive: true,
                completed_only: false,
            };
            let records: Vec<ScoreRecord> = records::extract(store, campaign, &options)?
                .into_iter()
                .filter(|r| r.user == username)
                .collect();
            let assessments = assess(&records, settings);
            !assessments.is_empty() && assessments.iter().all(|a| a.passed)
        }
    };
    Ok(Some(campaign::confirmation_token(secret, username, passed)))
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(segment: usize, system: &str, item_type: ItemType, score: f64) -> ScoreRecord {
        ScoreRecord {
            user: "u".to_owned(),
            system: system.to_owned(),
            segment: segment.to_string(),
            item_type,
            source: "eng".to_owned(),
            target: "deu".to_owned(),
            score,
            rank: None,
            start: Some(0.0),
            end: Some(3.5),
            batch: None,
            item: None,
        }
    }

    fn bad_below_tgt(pairs: usize) -> Vec<ScoreRecord> {
        let mut rs = Vec::new();
        for s in 0..pairs {
            rs.push(record(s, "sysA", ItemType::Tgt, 70.0 + (s % 20) as f64));
            rs.push(record(s, "sysA", ItemType::Bad, 10.0 + (s % 20) as f64));
        }
        rs
    }

    #[test]
    fn attentive_annotator_passes() {
        let rs = bad_below_tgt(100);
        let a = &assess(&rs, &QcSettings::default())[0];
        assert_eq!(a.bad_pairs, 100);
        assert_eq!(a.ref_pairs, 0);
        assert!(a.p_bad < 1e-6);
        assert_eq!(a.seconds, 700.0);
        assert!(a.passed);
        let z = &assess(&rs, &QcSettings { wmt22: true, ..QcSettings::default() })[0];
        assert!(z.passed);
    }

    #[test]
    fn too_fast_fails() {
        let rs = bad_below_tgt(50);
        let a = &assess(&rs, &QcSettings::default())[0];
        assert!(a.p_bad < 0.01);
        assert_eq!(a.seconds, 350.0);
        assert!(!a.passed);
        assert_eq!(rejected_users(&[a.clone()]), vec!["u".to_owned()]);
    }

    #[test]
    fn reference_pairs_decide() {
        let mut rs = bad_below_tgt(100);
        for s in 0..100 {
            rs.push(record(s, "newstest.ref", ItemType::Ref, 5.0));
        }
        let a = &assess(&rs, &QcSettings::default())[0];
        assert_eq!(a.ref_pairs, 100);
        assert!(a.p_ref > 0.5);
        assert!(!a.passed);
    }

    #[test]
    fn random_annotator_fails() {
        let mut rs = Vec::new();
        for s in 0..100 {
            let score = (s * 37 % 100) as f64;
            rs.push(record(s, "sysA", ItemType::Tgt, score));
            rs.push(record(s, "sysA", ItemType::Bad, score));
            rs.push(record(s, "sysA", ItemType::Chk, score));
        }
        let a = &assess(&rs, &QcSettings::default())[0];
        assert!(a.p_bad > 0.1);
        assert!(a.p_chk > 0.9);
        assert!(!a.passed);
    }
}
