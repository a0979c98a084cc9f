//! Identifier-keyed tables holding the state of all campaigns.

use crate::errors::{self, Result};
use crate::model::{
    Campaign, CampaignData, CampaignTeam, Id, Item, Lifecycle, Market, Metadata, ResultRecord,
    Task, TaskAgenda, TaskKind, TrustedUser, User,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::{fs, io};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Store {
    next_id: Id,
    pub markets: BTreeMap<Id, Market>,
    pub metadata: BTreeMap<Id, Metadata>,
    pub items: BTreeMap<Id, Item>,
    pub tasks: BTreeMap<Id, Task>,
    pub campaigns: BTreeMap<Id, Campaign>,
    pub teams: BTreeMap<Id, CampaignTeam>,
    pub batches: BTreeMap<Id, CampaignData>,
    pub results: BTreeMap<Id, ResultRecord>,
    pub users: BTreeMap<String, User>,
    pub trusted: BTreeSet<TrustedUser>,
    pub agendas: Vec<TaskAgenda>,
    /// Items that already have a result, per (user, task).
    #[serde(skip)]
    scored: HashMap<(String, Id), HashSet<Id>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn load(path: &Path) -> Result<Store> {
        info!(target: "humeval", "read store: {}", path.display());
        let data = fs::read_to_string(path)?;
        let mut store: Store = serde_json::from_str(&data)?;
        store.reindex();
        Ok(store)
    }

    /// Loads the store, or starts an empty one if the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Store> {
        if path.exists() {
            Store::load(path)
        } else {
            info!(target: "humeval", "new store: {}", path.display());
            Ok(Store::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        info!(target: "humeval", "write store: {}", path.display());
        let file = fs::File::create(path)?;
        let writer = io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn allocate_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    /// Rebuilds the per-user result index after results were rewritten in bulk.
    pub fn reindex(&mut self) {
        self.scored.clear();
        for r in self.results.values() {
            self.scored
                .entry((r.created_by.clone(), r.task))
                .or_default()
                .insert(r.item);
        }
        debug!(target: "humeval", "indexed {} results", self.results.len());
    }

    pub fn campaign_by_name(&self, name: &str) -> Result<&Campaign> {
        self.campaigns
            .values()
            .find(|c| c.name == name)
            .ok_or_else(|| errors::lookup_failed(format!("campaign '{name}'")))
    }

    pub fn campaign(&self, id: Id) -> Result<&Campaign> {
        self.campaigns
            .get(&id)
            .ok_or_else(|| errors::lookup_failed(format!("campaign {id}")))
    }

    pub fn task(&self, id: Id) -> Result<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| errors::lookup_failed(format!("task {id}")))
    }

    pub fn task_mut(&mut self, id: Id) -> Result<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| errors::lookup_failed(format!("task {id}")))
    }

    pub fn item(&self, id: Id) -> Result<&Item> {
        self.items
            .get(&id)
            .ok_or_else(|| errors::lookup_failed(format!("item {id}")))
    }

    pub fn user(&self, username: &str) -> Result<&User> {
        self.users
            .get(username)
            .ok_or_else(|| errors::lookup_failed(format!("user '{username}'")))
    }

    /// Market of the batch a task was created from.
    pub fn task_market(&self, task: &Task) -> Result<&Market> {
        let metadata = self
            .metadata
            .get(&task.metadata)
            .ok_or_else(|| errors::lookup_failed(format!("metadata {}", task.metadata)))?;
        self.markets
            .get(&metadata.market)
            .ok_or_else(|| errors::lookup_failed(format!("market {}", metadata.market)))
    }

    pub fn tasks_in_campaign(&self, campaign: Id) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(move |t| t.campaign == campaign)
    }

    /// The single task kind used by a campaign.
    pub fn campaign_type(&self, campaign: Id) -> Result<TaskKind> {
        for kind in TaskKind::ALL {
            if self
                .tasks_in_campaign(campaign)
                .any(|t| t.kind == kind)
            {
                return Ok(kind);
            }
        }
        Err(errors::lookup_failed(format!(
            "task type for campaign {campaign}"
        )))
    }

    /// Crowd workers are never trusted, whatever the table says.
    pub fn is_trusted(&self, username: &str, campaign: Id) -> bool {
        let crowd = self
            .users
            .get(username)
            .is_some_and(|u| u.is_crowd_worker());
        !crowd
            && self.trusted.contains(&TrustedUser {
                user: username.to_owned(),
                campaign,
            })
    }

    pub fn has_result(&self, username: &str, task: Id, item: Id) -> bool {
        self.scored
            .get(&(username.to_owned(), task))
            .is_some_and(|items| items.contains(&item))
    }

    /// Number of distinct items a user has scored in a task.
    pub fn scored_items(&self, username: &str, task: Id) -> usize {
        self.scored
            .get(&(username.to_owned(), task))
            .map_or(0, |items| items.len())
    }

    /// Distinct items of a task that have a result from any annotator.
    pub fn covered_items(&self, task: Id) -> usize {
        self.scored
            .iter()
            .filter(|((_, t), _)| *t == task)
            .flat_map(|(_, items)| items)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn results_by_user(&self, username: &str) -> impl Iterator<Item = &ResultRecord> {
        self.results
            .values()
            .filter(move |r| r.created_by == username)
    }

    /// Stores a result, created in the completed state.
    #[allow(clippy::too_many_arguments)]
    pub fn add_result(
        &mut self,
        username: &str,
        task: Id,
        item: Id,
        score: f64,
        score2: Option<f64>,
        start_time: f64,
        end_time: f64,
    ) -> Id {
        let id = self.allocate_id();
        let mut meta = Lifecycle::new();
        meta.complete(username);
        self.results.insert(
            id,
            ResultRecord {
                id,
                score,
                score2,
                start_time,
                end_time,
                item,
                task,
                created_by: username.to_owned(),
                modified_by: username.to_owned(),
                meta,
            },
        );
        self.scored
            .entry((username.to_owned(), task))
            .or_default()
            .insert(item);
        id
    }

    /// Drops a result that was added by [Store::add_result].
    pub fn remove_result(&mut self, id: Id) -> Option<ResultRecord> {
        let r = self.results.remove(&id)?;
        let key = (r.created_by.clone(), r.task);
        let still_scored = self
            .results
            .values()
            .any(|x| x.created_by == r.created_by && x.task == r.task && x.item == r.item);
        if !still_scored {
            if let Some(items) = self.scored.get_mut(&key) {
                items.remove(&r.item);
                if items.is_empty() {
                    self.scored.remove(&key);
                }
            }
        }
        Some(r)
    }

    pub fn market_id(&mut self, source: &str, target: &str, domain: &str) -> Id {
        if let Some(m) = self.markets.values().find(|m| {
            m.source_language == source && m.target_language == target && m.domain == domain
        }) {
            return m.id;
        }
        let id = self.allocate_id();
        let mut meta = Lifecycle::new();
        meta.activate("system");
        self.markets.insert(
            id,
            Market {
                id,
                source_language: source.to_owned(),
                target_language: target.to_owned(),
                domain: domain.to_owned(),
                meta,
            },
        );
        debug!(target: "humeval", "new market {source}_{target}_{domain}");
        id
    }

    pub fn metadata_id(&mut self, market: Id, corpus: &str, version: &str, source: &str) -> Id {
        if let Some(m) = self.metadata.values().find(|m| {
            m.market == market
                && m.corpus_name == corpus
                && m.version_info == version
                && m.source == source
        }) {
            return m.id;
        }
        let id = self.allocate_id();
        let mut meta = Lifecycle::new();
        meta.activate("system");
        self.metadata.insert(
            id,
            Metadata {
                id,
                market,
                corpus_name: corpus.to_owned(),
                version_info: version.to_owned(),
                source: source.to_owned(),
                meta,
            },
        );
        id
    }

    /// Returns false if the user already existed.
    pub fn add_user(&mut self, user: User) -> bool {
        if self.users.contains_key(&user.username) {
            return false;
        }
        self.users.insert(user.username.clone(), user);
        true
    }

    pub fn agenda(&self, username: &str, campaign: Id) -> Option<&TaskAgenda> {
        self.agendas
            .iter()
            .find(|a| a.user == username && a.campaign == campaign)
    }

    pub fn agenda_mut(&mut self, username: &str, campaign: Id) -> Option<&mut TaskAgenda> {
        self.agendas
            .iter_mut()
            .find(|a| a.user == username && a.campaign == campaign)
    }

    pub fn agenda_or_insert(&mut self, username: &str, campaign: Id) -> &mut TaskAgenda {
        let pos = match self
            .agendas
            .iter()
            .position(|a| a.user == username && a.campaign == campaign)
        {
            Some(pos) => pos,
            None => {
                self.agendas.push(TaskAgenda {
                    user: username.to_owned(),
                    campaign,
                    open: BTreeSet::new(),
                    completed: BTreeSet::new(),
                });
                self.agendas.len() - 1
            }
        };
        &mut self.agendas[pos]
    }
}

/// A store shared between concurrent dispatch requests.
///
/// Every mutation runs inside [SharedStore::transaction], which holds the
/// lock for the whole closure. The store is not copied: a closure checks
/// everything that can fail before its first write, or undoes its own
/// writes before returning an error.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    pub fn new(store: Store) -> SharedStore {
        SharedStore {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> Result<T>,
    {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| errors::invalid_state("store lock poisoned".to_owned()))?;
        f(&mut guard)
    }

    /// A copy of the current state, for reporting and saving.
    pub fn snapshot(&self) -> Result<Store> {
        self.transaction(|store| Ok(store.clone()))
    }
}
