//! Campaign manifests, annotator accounts and agenda initialisation.

use crate::dispatch;
use crate::errors::{self, Result};
use crate::hashing;
use crate::languages;
use crate::model::{
    Campaign, CampaignTeam, DEFAULT_CORPUS, DEFAULT_DOMAIN, DEFAULT_SOURCE, DEFAULT_TEAM_ANNOTATIONS,
    DEFAULT_TEAM_HOURS, DEFAULT_VERSION, Id, Lifecycle, TaskKind, User,
};
use crate::store::Store;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::{fmt, fs};
use uuid::Uuid;

/// One `[source, target, mode, annotators, tasks]` entry of a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "(String, String, String, usize, usize)")]
#[serde(into = "(String, String, String, usize, usize)")]
pub struct PairAssignment {
    pub source: String,
    pub target: String,
    pub mode: String,
    pub annotators: usize,
    pub tasks: usize,
}

impl From<(String, String, String, usize, usize)> for PairAssignment {
    fn from(t: (String, String, String, usize, usize)) -> Self {
        PairAssignment {
            source: t.0,
            target: t.1,
            mode: t.2,
            annotators: t.3,
            tasks: t.4,
        }
    }
}

impl From<PairAssignment> for (String, String, String, usize, usize) {
    fn from(p: PairAssignment) -> Self {
        (p.source, p.target, p.mode, p.annotators, p.tasks)
    }
}

fn default_task_type() -> String {
    TaskKind::Direct.name().to_owned()
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Manifest {
    #[serde(rename = "CAMPAIGN_KEY")]
    pub campaign_key: String,
    #[serde(rename = "CAMPAIGN_NAME")]
    pub campaign_name: String,
    #[serde(rename = "CAMPAIGN_NO")]
    pub campaign_no: u32,
    #[serde(rename = "CAMPAIGN_URL")]
    pub campaign_url: String,
    #[serde(rename = "REDUNDANCY")]
    pub redundancy: usize,
    #[serde(rename = "TASK_TYPE", default = "default_task_type")]
    pub task_type: String,
    #[serde(rename = "TASKS_TO_ANNOTATORS")]
    pub tasks_to_annotators: Vec<PairAssignment>,
}

/// How tasks are spread over the annotators of a language pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskMapMode {
    Uniform,
}

impl fmt::Display for TaskMapMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskMapMode::Uniform => write!(f, "uniform"),
        }
    }
}

impl FromStr for TaskMapMode {
    type Err = Box<dyn std::error::Error>;

    fn from_str(s: &str) -> Result<TaskMapMode> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" => Ok(TaskMapMode::Uniform),
            _ => Err(errors::invalid_input(format!("unknown task map mode '{s}'"))),
        }
    }
}

impl TaskMapMode {
    pub fn map(self, annotators: usize, tasks: usize, redundancy: usize) -> Result<Vec<Vec<usize>>> {
        match self {
            TaskMapMode::Uniform => uniform_map(annotators, tasks, redundancy),
        }
    }
}

/// Spreads `tasks × redundancy` slots evenly: annotator `k` receives the
/// `k`-th run of consecutive task indices, wrapping around the task list.
pub fn uniform_map(annotators: usize, tasks: usize, redundancy: usize) -> Result<Vec<Vec<usize>>> {
    let total = tasks * redundancy;
    if annotators == 0 || tasks == 0 || total % annotators != 0 {
        return Err(errors::invalid_input(format!(
            "{tasks} tasks × {redundancy} cannot be split over {annotators} annotators"
        )));
    }
    let per = total / annotators;
    if per > tasks {
        return Err(errors::invalid_input(format!(
            "{annotators} annotators would receive the same task twice"
        )));
    }
    Ok((0..annotators)
        .map(|k| (0..per).map(|j| (k * per + j) % tasks).collect())
        .collect())
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest> {
        info!(target: "humeval", "read manifest: {}", path.display());
        let data = fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&data)
            .map_err(|e| errors::invalid_input(format!("{}: {e}", path.display())))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn task_kind(&self) -> Result<TaskKind> {
        self.task_type.parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.campaign_name.trim().is_empty() {
            return Err(errors::invalid_input_ref("CAMPAIGN_NAME is empty"));
        }
        if self.campaign_no > 0xff {
            return Err(errors::invalid_input(format!(
                "CAMPAIGN_NO {} not in 0..=255",
                self.campaign_no
            )));
        }
        if self.redundancy == 0 {
            return Err(errors::invalid_input_ref("REDUNDANCY must be at least 1"));
        }
        self.task_kind()?;
        let mut seen = HashSet::new();
        for pair in &self.tasks_to_annotators {
            for code in [&pair.source, &pair.target] {
                if !languages::is_valid(code) {
                    return Err(errors::invalid_input(format!("unknown language code '{code}'")));
                }
            }
            if !seen.insert((&pair.source, &pair.target)) {
                return Err(errors::invalid_input(format!(
                    "duplicate entry for {}-{}",
                    pair.source, pair.target
                )));
            }
            let mode: TaskMapMode = pair.mode.parse()?;
            mode.map(pair.annotators, pair.tasks, self.redundancy)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub url: String,
}

/// Account name of annotator `index` (0-based) of a language pair.
pub fn username(source: &str, target: &str, campaign_no: u32, index: usize) -> String {
    let pair = format!("{source}{target}").to_lowercase().replace('-', "");
    format!("{pair}{campaign_no:02x}{:02x}", index + 1)
}

pub fn password(username: &str, key: &str) -> String {
    hashing::md5_hex(&[username, key])[..8].to_owned()
}

pub fn sso_url(base: &str, username: &str, password: &str) -> String {
    format!("{base}{username}/{password}/")
}

/// Credentials of every annotator named in the manifest.
pub fn credentials(manifest: &Manifest) -> Vec<Credentials> {
    let mut all = Vec::new();
    for pair in &manifest.tasks_to_annotators {
        for u in 0..pair.annotators {
            let name = username(&pair.source, &pair.target, manifest.campaign_no, u);
            let pw = password(&name, &manifest.campaign_key);
            all.push(Credentials {
                url: sso_url(&manifest.campaign_url, &name, &pw),
                username: name,
                password: pw,
            });
        }
    }
    all
}

/// Confirmation code handed to crowd workers when their agenda is done.
pub fn confirmation_token(secret: &str, username: &str, passed: bool) -> Uuid {
    let outcome = if passed { "SUCCESS" } else { "FAILED" };
    Uuid::from_bytes(hashing::md5_bytes(&[secret, username, outcome]))
}

/// Registers a new, empty campaign.
pub fn create_campaign(store: &mut Store, manifest: &Manifest, owner: &str) -> Result<Id> {
    manifest.validate()?;
    if store.campaign_by_name(&manifest.campaign_name).is_ok() {
        return Err(errors::invalid_argument(format!(
            "campaign '{}' already exists",
            manifest.campaign_name
        )));
    }
    let id = store.allocate_id();
    let mut meta = Lifecycle::new();
    meta.activate(owner);
    store.campaigns.insert(
        id,
        Campaign {
            id,
            name: manifest.campaign_name.clone(),
            options: String::new(),
            teams: Vec::new(),
            batches: Vec::new(),
            meta,
        },
    );
    info!(target: "humeval", "created campaign '{}' ({id})", manifest.campaign_name);
    Ok(id)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitReport {
    pub users_created: usize,
    pub credentials: Vec<Credentials>,
    /// Agenda entries added, open and completed.
    pub opened: usize,
    pub completed: usize,
    /// Pairs without any tasks yet.
    pub skipped_pairs: Vec<String>,
}

fn team_for(store: &mut Store, campaign: Id, owner: &str) -> Result<Id> {
    let c = store.campaign(campaign)?;
    let name = c.name.clone();
    if let Some(&team) = c.teams.first() {
        return Ok(team);
    }
    let id = store.allocate_id();
    let mut meta = Lifecycle::new();
    meta.activate(owner);
    store.teams.insert(
        id,
        CampaignTeam {
            id,
            name,
            owner: owner.to_owned(),
            members: BTreeSet::from([owner.to_owned()]),
            required_annotations: DEFAULT_TEAM_ANNOTATIONS,
            required_hours: DEFAULT_TEAM_HOURS,
            meta,
        },
    );
    if let Some(c) = store.campaigns.get_mut(&campaign) {
        c.teams.push(id);
    }
    Ok(id)
}

/// Creates users, team membership and agendas for a registered campaign.
///
/// Safe to run again, e.g. after more batches were imported.
pub fn init_campaign(store: &mut Store, manifest: &Manifest, owner: &str, only_activated: bool) -> Result<InitReport> {
    manifest.validate()?;
    let kind = manifest.task_kind()?;
    let campaign = store.campaign_by_name(&manifest.campaign_name)?.id;
    if let Ok(existing) = store.campaign_type(campaign) {
        if existing != kind {
            return Err(errors::invalid_input(format!(
                "campaign uses {existing} tasks but the manifest says {kind}"
            )));
        }
    }
    let mut report = InitReport::default();
    let team = team_for(store, campaign, owner)?;

    for pair in &manifest.tasks_to_annotators {
        let market = store.market_id(&pair.source, &pair.target, DEFAULT_DOMAIN);
        store.metadata_id(market, DEFAULT_CORPUS, DEFAULT_VERSION, DEFAULT_SOURCE);

        let mut usernames = Vec::with_capacity(pair.annotators);
        for u in 0..pair.annotators {
            let name = username(&pair.source, &pair.target, manifest.campaign_no, u);
            let pw = password(&name, &manifest.campaign_key);
            if store.add_user(User::new(&name, &pw)) {
                report.users_created += 1;
            }
            if let Some(t) = store.teams.get_mut(&team) {
                t.members.insert(name.clone());
            }
            report.credentials.push(Credentials {
                url: sso_url(&manifest.campaign_url, &name, &pw),
                username: name.clone(),
                password: pw,
            });
            usernames.push(name);
        }

        let mut tasks: Vec<Id> = Vec::new();
        for task in store.tasks_in_campaign(campaign) {
            if task.kind != kind || (only_activated && !task.meta.is_active()) {
                continue;
            }
            let m = store.task_market(task)?;
            if m.source_language == pair.source && m.target_language == pair.target {
                tasks.push(task.id);
            }
        }
        let label = format!("{}-{}", pair.source, pair.target);
        if tasks.is_empty() {
            info!(target: "humeval", "{label}: no tasks yet, skipping agendas");
            report.skipped_pairs.push(label);
            continue;
        }
        if tasks.len() < pair.tasks {
            return Err(errors::invalid_input(format!(
                "{label}: mismatch of available/required tasks ({} < {})",
                tasks.len(),
                pair.tasks
            )));
        }
        tasks.truncate(pair.tasks);

        let mode: TaskMapMode = pair.mode.parse()?;
        let map = mode.map(pair.annotators, pair.tasks, manifest.redundancy)?;
        for (user, slots) in usernames.iter().zip(&map) {
            for &slot in slots {
                let task = store.task(tasks[slot])?;
                let oid = task.object_id();
                if store.agenda(user, campaign).is_some_and(|a| a.contains_task(&oid)) {
                    continue;
                }
                let done = dispatch::next_item_for_user(store, task.id, user)?.is_none();
                let agenda = store.agenda_or_insert(user, campaign);
                if done {
                    agenda.complete_task(oid);
                    report.completed += 1;
                } else {
                    agenda.activate_task(oid);
                    report.opened += 1;
                }
            }
            debug!(target: "humeval", "{user}: tasks {slots:?}");
        }
        info!(target: "humeval", "{label}: {} users, {} tasks", pair.annotators, tasks.len());
    }
    Ok(report)
}

#[cfg(test)]
mod test {
    use super::*;

    fn manifest() -> Manifest {
        serde_json::from_str(
            r#"{
                "CAMPAIGN_KEY": "secret",
                "CAMPAIGN_NAME": "wmt-test",
                "CAMPAIGN_NO": 1,
                "CAMPAIGN_URL": "http://localhost/dashboard/sso/",
                "REDUNDANCY": 1,
                "TASKS_TO_ANNOTATORS": [["eng", "deu", "uniform", 10, 20]]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn uniform_coverage() {
        let map = uniform_map(10, 20, 1).unwrap();
        assert_eq!(map.len(), 10);
        assert!(map.iter().all(|tasks| tasks.len() == 2));
        let map = uniform_map(4, 6, 2).unwrap();
        let mut count = [0; 6];
        for tasks in &map {
            assert_eq!(tasks.len(), 3);
            let distinct: HashSet<_> = tasks.iter().collect();
            assert_eq!(distinct.len(), 3);
            for &t in tasks {
                count[t] += 1;
            }
        }
        assert!(count.iter().all(|&c| c == 2));
        assert!(uniform_map(3, 20, 1).is_err());
        assert!(uniform_map(0, 20, 1).is_err());
        assert!(uniform_map(1, 2, 2).is_err());
    }

    #[test]
    fn manifest_validation() {
        let m = manifest();
        assert!(m.validate().is_ok());
        assert_eq!(m.task_kind().unwrap(), TaskKind::Direct);
        let mut bad = m.clone();
        bad.tasks_to_annotators[0].target = "xx".to_owned();
        assert!(bad.validate().is_err());
        let mut bad = m.clone();
        bad.tasks_to_annotators[0].mode = "linear".to_owned();
        assert!(bad.validate().is_err());
        let mut bad = m.clone();
        bad.tasks_to_annotators[0].annotators = 3;
        assert!(bad.validate().is_err());
        let mut bad = m.clone();
        bad.task_type = "Bogus".to_owned();
        assert!(bad.validate().is_err());
        let mut bad = m;
        bad.campaign_no = 256;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn credentials_are_deterministic() {
        assert_eq!(username("eng", "deu", 1, 0), "engdeu0101");
        assert_eq!(username("eng", "zho-Hans", 18, 9), "engzhohans120a");
        let pw = password("engdeu0101", "secret");
        assert_eq!(pw.len(), 8);
        assert_eq!(pw, hashing::md5_hex(&["engdeu0101secret"])[..8]);
        let creds = credentials(&manifest());
        assert_eq!(creds.len(), 10);
        assert_eq!(creds, credentials(&manifest()));
        assert_eq!(
            creds[0].url,
            format!("http://localhost/dashboard/sso/engdeu0101/{}/", creds[0].password)
        );
    }

    #[test]
    fn tokens() {
        let ok = confirmation_token("key", "engdeu0101", true);
        let failed = confirmation_token("key", "engdeu0101", false);
        assert_ne!(ok, failed);
        assert_eq!(ok.as_bytes(), &hashing::md5_bytes(&["keyengdeu0101SUCCESS"]));
    }

    #[test]
    fn duplicate_campaign() {
        let mut store = Store::new();
        create_campaign(&mut store, &manifest(), "admin").unwrap();
        assert!(create_campaign(&mut store, &manifest(), "admin").is_err());
        let report = init_campaign(&mut store, &manifest(), "admin", true).unwrap();
        assert_eq!(report.users_created, 10);
        assert_eq!(report.skipped_pairs, vec!["eng-deu".to_owned()]);
        let again = init_campaign(&mut store, &manifest(), "admin", true).unwrap();
        assert_eq!(again.users_created, 0);
        assert_eq!(again.credentials, report.credentials);
    }
}
