//! Per-user task agendas and their archival reset.

use crate::errors::{self, Result};
use crate::model::{Id, ObjectId, TaskAgenda, User};
use crate::store::Store;
use log::{info, warn};
use std::fmt;

impl TaskAgenda {
    pub fn contains_task(&self, task: &ObjectId) -> bool {
        self.open.contains(task) || self.completed.contains(task)
    }

    /// Adds a task to the open set unless the agenda already has it.
    pub fn activate_task(&mut self, task: ObjectId) -> bool {
        if self.contains_task(&task) {
            return false;
        }
        self.open.insert(task)
    }

    /// Records a task as completed, whether or not it was open.
    pub fn complete_task(&mut self, task: ObjectId) {
        self.open.remove(&task);
        self.completed.insert(task);
    }

    /// Moves an open task to the completed set.
    ///
    /// With `only_open`, a task that is not open is an error; otherwise it is
    /// ignored.
    pub fn complete_open_task(&mut self, task: ObjectId, only_open: bool) -> Result<bool> {
        if self.open.remove(&task) {
            self.completed.insert(task);
            return Ok(true);
        }
        if only_open {
            return Err(errors::invalid_state(format!(
                "task {task} is not open for {}",
                self.user
            )));
        }
        Ok(false)
    }

    /// Moves a completed task back to the open set.
    pub fn activate_completed_task(&mut self, task: ObjectId, only_completed: bool) -> Result<bool> {
        if self.completed.remove(&task) {
            self.open.insert(task);
            return Ok(true);
        }
        if only_completed {
            return Err(errors::invalid_state(format!(
                "task {task} is not completed for {}",
                self.user
            )));
        }
        Ok(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResetOutcome {
    pub ok: bool,
    pub message: String,
    pub severity: Severity,
}

impl ResetOutcome {
    fn new(ok: bool, message: String, severity: Severity) -> ResetOutcome {
        ResetOutcome {
            ok,
            message,
            severity,
        }
    }
}

/// Largest shadow index; shadows are numbered with two hex digits.
pub const MAX_SHADOWS: usize = 0xff;

/// Whether `candidate` is a shadow account `{username}-xx` of `username`.
pub fn is_shadow_of(candidate: &str, username: &str) -> bool {
    candidate
        .strip_prefix(username)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|hex| {
            hex.len() == 2
                && hex
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        })
}

/// Archives the work of a user in a campaign so that the agenda can be done again.
///
/// The results move to a fresh inactive shadow account and every completed
/// task of the agenda is reopened.
pub fn reset_taskagenda(store: &mut Store, username: &str, campaign: Id) -> ResetOutcome {
    let kind = match store.campaign_type(campaign) {
        Ok(kind) => kind,
        Err(e) => return ResetOutcome::new(false, format!("Unknown campaign type: {e}"), Severity::Error),
    };
    if store.agenda(username, campaign).is_none() {
        return ResetOutcome::new(
            false,
            format!("No task agenda for {username} in campaign {campaign}"),
            Severity::Error,
        );
    }
    let results: Vec<Id> = store
        .results
        .values()
        .filter(|r| r.created_by == username)
        .filter(|r| store.tasks.get(&r.task).is_some_and(|t| t.campaign == campaign))
        .map(|r| r.id)
        .collect();
    if results.is_empty() {
        return ResetOutcome::new(false, "Nothing to be done".to_owned(), Severity::Info);
    }

    let shadows = store
        .users
        .keys()
        .filter(|u| is_shadow_of(u, username))
        .count();
    if shadows + 1 > MAX_SHADOWS {
        warn!(target: "humeval", "{username} already has {shadows} shadow accounts");
        return ResetOutcome::new(
            false,
            format!("Too many shadow accounts for {username}"),
            Severity::Warning,
        );
    }
    let shadow = format!("{username}-{:02x}", shadows + 1);
    let mut shadow_user = match store.users.get(username) {
        Some(user) => User {
            username: shadow.clone(),
            ..user.clone()
        },
        None => User::new(&shadow, ""),
    };
    shadow_user.active = false;
    store.add_user(shadow_user);

    for id in &results {
        if let Some(r) = store.results.get_mut(id) {
            r.created_by = shadow.clone();
            r.modified_by = shadow.clone();
        }
    }
    store.reindex();

    let mut reopened = 0;
    if let Some(agenda) = store.agenda_mut(username, campaign) {
        let completed: Vec<ObjectId> = agenda.completed.iter().copied().collect();
        for task in completed {
            if let Ok(true) = agenda.activate_completed_task(task, false) {
                reopened += 1;
            }
        }
    }
    info!(target: "humeval", "reset {kind} agenda of {username}: {} results moved to {shadow}, {reopened} tasks reopened", results.len());
    ResetOutcome::new(
        true,
        format!(
            "Reset task agenda for {username}; {} results archived as {shadow}",
            results.len()
        ),
        Severity::Info,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Lifecycle, Task, TaskKind};
    use std::collections::BTreeSet;

    fn oid(id: Id) -> ObjectId {
        ObjectId {
            type_name: TaskKind::Direct,
            id,
        }
    }

    fn agenda() -> TaskAgenda {
        TaskAgenda {
            user: "engdeu0101".to_owned(),
            campaign: 1,
            open: BTreeSet::new(),
            completed: BTreeSet::new(),
        }
    }

    #[test]
    fn open_and_completed_stay_disjoint() {
        let mut a = agenda();
        assert!(a.activate_task(oid(1)));
        assert!(!a.activate_task(oid(1)));
        assert!(a.complete_open_task(oid(1), true).unwrap());
        assert!(a.open.is_empty());
        assert!(a.contains_task(&oid(1)));
        assert!(!a.activate_task(oid(1)));
        assert!(a.complete_open_task(oid(1), true).is_err());
        assert!(!a.complete_open_task(oid(1), false).unwrap());
        assert!(a.activate_completed_task(oid(1), true).unwrap());
        assert!(a.completed.is_empty());
        a.complete_task(oid(2));
        assert!(a.open.intersection(&a.completed).next().is_none());
    }

    #[test]
    fn shadow_names() {
        assert!(is_shadow_of("engdeu0101-01", "engdeu0101"));
        assert!(is_shadow_of("engdeu0101-ff", "engdeu0101"));
        assert!(!is_shadow_of("engdeu0101-1", "engdeu0101"));
        assert!(!is_shadow_of("engdeu0101-FF", "engdeu0101"));
        assert!(!is_shadow_of("engdeu0101", "engdeu0101"));
        assert!(!is_shadow_of("engdeu0102-01", "engdeu0101"));
    }

    /// One active task in campaign 1 with an agenda for the user, who
    /// scored `scored` of its items.
    fn store_with_work(username: &str, scored: Id) -> (Store, Id) {
        let mut store = Store::new();
        let task = store.allocate_id();
        let mut meta = Lifecycle::new();
        meta.activate("admin");
        store.tasks.insert(
            task,
            Task {
                id: task,
                kind: TaskKind::Direct,
                campaign: 1,
                batch_data: None,
                metadata: 0,
                items: (100..110).collect(),
                batch_no: 1,
                required_annotations: 1,
                assigned_to: BTreeSet::new(),
                random_seed: None,
                meta,
            },
        );
        store.add_user(User::new(username, "secret"));
        store.agenda_or_insert(username, 1).complete_task(oid(task));
        for item in 100..100 + scored {
            store.add_result(username, task, item, 50.0, None, 0.0, 1.0);
        }
        (store, task)
    }

    #[test]
    fn reset_moves_results_to_numbered_shadows() {
        let user = "engdeu0101";
        let (mut store, task) = store_with_work(user, 4);
        let outcome = reset_taskagenda(&mut store, user, 1);
        assert!(outcome.ok);
        assert_eq!(outcome.severity, Severity::Info);
        let first = store.user("engdeu0101-01").unwrap();
        assert!(!first.active);
        assert_eq!(first.password, "secret");
        assert_eq!(store.results_by_user("engdeu0101-01").count(), 4);
        assert_eq!(store.results_by_user(user).count(), 0);
        assert!(!store.has_result(user, task, 100));
        let agenda = store.agenda(user, 1).unwrap();
        assert!(agenda.open.contains(&oid(task)));
        assert!(agenda.completed.is_empty());

        let nothing = reset_taskagenda(&mut store, user, 1);
        assert!(!nothing.ok);
        assert_eq!(nothing.severity, Severity::Info);

        store.add_result(user, task, 100, 70.0, None, 0.0, 1.0);
        assert!(reset_taskagenda(&mut store, user, 1).ok);
        assert_eq!(store.results_by_user("engdeu0101-02").count(), 1);
        assert_eq!(store.results_by_user("engdeu0101-01").count(), 4);
    }

    #[test]
    fn archived_results_stay_completed() {
        let user = "engdeu0101";
        let (mut store, task) = store_with_work(user, 3);
        reset_taskagenda(&mut store, user, 1);
        assert!(
            store
                .results_by_user("engdeu0101-01")
                .all(|r| r.meta.is_completed())
        );
        assert_eq!(store.covered_items(task), 3);
    }

    #[test]
    fn shadow_numbers_run_out() {
        let user = "engdeu0101";
        let (mut store, _) = store_with_work(user, 2);
        for n in 1..MAX_SHADOWS {
            store.add_user(User::new(&format!("{user}-{n:02x}"), ""));
        }
        let last = reset_taskagenda(&mut store, user, 1);
        assert!(last.ok);
        assert!(store.user("engdeu0101-ff").is_ok());

        let (mut store, _) = store_with_work(user, 2);
        for n in 1..=MAX_SHADOWS {
            store.add_user(User::new(&format!("{user}-{n:02x}"), ""));
        }
        let refused = reset_taskagenda(&mut store, user, 1);
        assert!(!refused.ok);
        assert_eq!(refused.severity, Severity::Warning);
        assert_eq!(store.results_by_user(user).count(), 2);
    }

    #[test]
    fn reset_without_campaign_tasks() {
        let mut store = Store::new();
        let outcome = reset_taskagenda(&mut store, "engdeu0101", 1);
        assert!(!outcome.ok);
        assert_eq!(outcome.severity, Severity::Error);
    }
}
