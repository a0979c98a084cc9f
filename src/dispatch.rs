//! Serving items to annotators and recording their scores.
//!
//! Read-only queries take a [Store]; operations that change assignments or
//! record results run as one [SharedStore::transaction] each.

use crate::errors::{self, Result};
use crate::model::{CROWD_GROUP, Id, Item, ItemType, ResultRecord, Task, TaskKind};
use crate::store::{SharedStore, Store};
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use std::collections::{HashMap, HashSet};

/// Items a trusted annotator must score per required annotation.
pub const TRUSTED_USER_RESULTS: usize = 70;
/// Items any other annotator must score per required annotation.
pub const REQUIRED_USER_RESULTS: usize = 100;

/// Crowd workers may finish at most this many tasks per campaign.
pub const CROWD_TASK_CAP: usize = 3;

/// Assignments without a result for this long are released.
pub fn staleness_limit() -> TimeDelta {
    TimeDelta::hours(1)
}

/// First item of the task that the user has not scored yet.
///
/// Trusted users only see candidate translations.
pub fn next_item_for_user<'a>(store: &'a Store, task: Id, username: &str) -> Result<Option<&'a Item>> {
    let task = store.task(task)?;
    let trusted = store.is_trusted(username, task.campaign);
    for &id in &task.items {
        if store.has_result(username, task.id, id) {
            continue;
        }
        let item = store.item(id)?;
        if !trusted || item.item_type == ItemType::Tgt {
            return Ok(Some(item));
        }
    }
    Ok(None)
}

pub fn completed_items_for_user(store: &Store, task: Id, username: &str) -> usize {
    store.scored_items(username, task)
}

/// Number of distinct scored items needed to complete the task.
pub fn completion_threshold(task: &Task, trusted: bool) -> usize {
    let per_user = if trusted {
        TRUSTED_USER_RESULTS
    } else {
        REQUIRED_USER_RESULTS
    };
    task.required_annotations as usize * per_user
}

/// Completes the task once enough annotations have been collected.
///
/// Returns true only for the call that completes it.
pub fn update_task_completion(store: &mut Store, task: Id, username: &str) -> Result<bool> {
    let t = store.task(task)?;
    if t.meta.is_completed() {
        return Ok(false);
    }
    let threshold = completion_threshold(t, store.is_trusted(username, t.campaign));
    let covered = store.covered_items(task);
    debug!(target: "humeval", "task {task}: {covered}/{threshold} items scored");
    if covered < threshold {
        return Ok(false);
    }
    let t = store.task_mut(task)?;
    t.meta.complete(username);
    let (campaign, oid) = (t.campaign, t.object_id());
    for agenda in store.agendas.iter_mut().filter(|a| a.campaign == campaign) {
        agenda.complete_open_task(oid, false)?;
    }
    info!(target: "humeval", "completed task {oid}");
    Ok(true)
}

/// Most recently created active task assigned to the user that still has work.
pub fn get_task_for_user(store: &Store, campaign: Option<Id>, username: &str) -> Result<Option<Id>> {
    for task in store.tasks.values().rev() {
        if !task.meta.is_active()
            || !task.assigned_to.contains(username)
            || campaign.is_some_and(|c| c != task.campaign)
        {
            continue;
        }
        if next_item_for_user(store, task.id, username)?.is_some() {
            return Ok(Some(task.id));
        }
    }
    Ok(None)
}

/// Tasks of the campaign in which the user has scored at least `min_items` items.
fn finished_tasks(store: &Store, campaign: Id, username: &str, min_items: usize, item_type: Option<ItemType>) -> usize {
    let mut by_task: HashMap<Id, HashSet<Id>> = HashMap::new();
    for r in completed_results_for_user_and_campaign(store, username, campaign) {
        if let Some(wanted) = item_type {
            if store.items.get(&r.item).is_none_or(|i| i.item_type != wanted) {
                continue;
            }
        }
        by_task.entry(r.task).or_default().insert(r.item);
    }
    by_task.values().filter(|items| items.len() >= min_items).count()
}

/// Lowest-id active task of the campaign for the target language that still
/// needs annotators and is not yet assigned to the user.
pub fn get_next_free_task_for_language(
    store: &Store,
    code: &str,
    campaign: Id,
    username: &str,
) -> Result<Option<Id>> {
    let capped = store.user(username).is_ok_and(|u| u.is_crowd_worker())
        && store.campaign_type(campaign).is_ok_and(|k| k == TaskKind::Data);
    if capped {
        let done = finished_tasks(store, campaign, username, REQUIRED_USER_RESULTS, None);
        if done >= CROWD_TASK_CAP {
            info!(target: "humeval", "{CROWD_GROUP} user {username} already completed {done} tasks in campaign {campaign}");
            return Ok(None);
        }
    }
    for task in store.tasks_in_campaign(campaign) {
        if !task.meta.is_active()
            || task.assigned_to.len() >= task.required_annotations as usize
            || task.assigned_to.contains(username)
        {
            continue;
        }
        if store.task_market(task)?.target_language == code {
            return Ok(Some(task.id));
        }
    }
    Ok(None)
}

/// Assigns a task to the user and puts it on the user's agenda.
pub fn assign_task(store: &mut Store, task: Id, username: &str) -> Result<()> {
    let t = store.task_mut(task)?;
    if !t.meta.is_active() {
        return Err(errors::invalid_state(format!("task {task} is not active")));
    }
    t.assigned_to.insert(username.to_owned());
    let (campaign, oid) = (t.campaign, t.object_id());
    store.agenda_or_insert(username, campaign).activate_task(oid);
    debug!(target: "humeval", "assigned task {oid} to {username}");
    Ok(())
}

/// Finds and assigns the next free task in one step.
pub fn claim_next_free_task(
    shared: &SharedStore,
    code: &str,
    campaign: Id,
    username: &str,
) -> Result<Option<Id>> {
    shared.transaction(|store| {
        let task = get_next_free_task_for_language(store, code, campaign, username)?;
        if let Some(task) = task {
            assign_task(store, task, username)?;
        }
        Ok(task)
    })
}

/// A score as submitted by the annotation form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Submission {
    pub task: Id,
    pub item: Id,
    pub score: f64,
    pub score2: Option<f64>,
    pub start_time: f64,
    pub end_time: f64,
}

/// Records a result, then completes the task if it now has enough annotations.
///
/// Checks run before the result is written; if the follow-up bookkeeping
/// fails, the result is removed again.
pub fn submit_result(shared: &SharedStore, username: &str, s: &Submission) -> Result<Id> {
    shared.transaction(|store| {
        let task = store.task(s.task)?;
        if !task.meta.is_active() {
            return Err(errors::invalid_state(format!("task {} is not active", s.task)));
        }
        if !task.items.contains(&s.item) {
            return Err(errors::invalid_argument(format!(
                "item {} is not part of task {}",
                s.item, s.task
            )));
        }
        let variant = store.item(s.item)?.content.variant();
        if variant.scores() != 1 + usize::from(s.score2.is_some()) {
            return Err(errors::invalid_argument(format!(
                "item {} takes {} scores",
                s.item,
                variant.scores()
            )));
        }
        if store.has_result(username, s.task, s.item) {
            return Err(errors::invalid_state(format!(
                "{username} already scored item {} of task {}",
                s.item, s.task
            )));
        }
        if s.end_time < s.start_time {
            return Err(errors::invalid_argument_ref("result ends before it starts"));
        }
        let campaign = task.campaign;
        let id = store.add_result(
            username,
            s.task,
            s.item,
            s.score,
            s.score2,
            s.start_time,
            s.end_time,
        );
        if let Err(e) = after_submit(store, s.task, username, campaign) {
            store.remove_result(id);
            return Err(e);
        }
        Ok(id)
    })
}

fn after_submit(store: &mut Store, task: Id, username: &str, campaign: Id) -> Result<()> {
    let oid = store.task(task)?.object_id();
    if next_item_for_user(store, task, username)?.is_none() {
        if let Some(agenda) = store.agenda_mut(username, campaign) {
            agenda.complete_open_task(oid, false)?;
        }
    }
    update_task_completion(store, task, username)?;
    Ok(())
}

/// Releases assignments whose last result is older than the staleness limit,
/// or that have no result at all. Agendas are not touched.
pub fn unlink_stale_assignments(store: &mut Store, now: DateTime<Utc>) -> usize {
    let mut last: HashMap<(Id, &str), DateTime<Utc>> = HashMap::new();
    for r in store.results.values() {
        let at = r.meta.date_completed.unwrap_or(r.meta.date_created);
        let entry = last.entry((r.task, r.created_by.as_str())).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }
    let mut stale: Vec<(Id, String)> = Vec::new();
    for task in store.tasks.values() {
        if !task.meta.is_active() {
            continue;
        }
        for user in &task.assigned_to {
            let fresh = last
                .get(&(task.id, user.as_str()))
                .is_some_and(|&at| now - at <= staleness_limit());
            if !fresh {
                stale.push((task.id, user.clone()));
            }
        }
    }
    for (task, user) in &stale {
        if let Some(t) = store.tasks.get_mut(task) {
            t.assigned_to.remove(user);
            debug!(target: "humeval", "unlinked {user} from task {task}");
        }
    }
    info!(target: "humeval", "unlinked {} stale assignments", stale.len());
    stale.len()
}

pub fn completed_results_for_user_and_campaign<'a>(
    store: &'a Store,
    username: &'a str,
    campaign: Id,
) -> impl Iterator<Item = &'a ResultRecord> + 'a {
    store
        .results_by_user(username)
        .filter(move |r| store.tasks.get(&r.task).is_some_and(|t| t.campaign == campaign))
        .filter(|r| r.meta.is_completed())
}

/// Total seconds the user spent scoring in the campaign.
pub fn annotation_time(store: &Store, username: &str, campaign: Id) -> f64 {
    completed_results_for_user_and_campaign(store, username, campaign)
        .map(|r| r.duration())
        .sum()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitStatus {
    /// Tasks with at least 70 scored candidates.
    pub completed_hits: usize,
    pub results: usize,
    pub seconds: f64,
}

pub fn hit_status(store: &Store, username: &str, campaign: Id) -> HitStatus {
    HitStatus {
        completed_hits: finished_tasks(store, campaign, username, TRUSTED_USER_RESULTS, Some(ItemType::Tgt)),
        results: completed_results_for_user_and_campaign(store, username, campaign).count(),
        seconds: annotation_time(store, username, campaign),
    }
}

/// Share of the team's required work that has been done, in [0, 1].
pub fn team_completion(store: &Store, team: Id, campaign: Id) -> Result<f64> {
    let team = store
        .teams
        .get(&team)
        .ok_or_else(|| errors::lookup_failed(format!("team {team}")))?;
    let annotators: Vec<&String> = team.members.iter().filter(|m| **m != team.owner).collect();
    let required = team.required_annotations as usize * annotators.len();
    if required == 0 {
        return Ok(0.0);
    }
    let done: usize = annotators
        .iter()
        .map(|m| completed_results_for_user_and_campaign(store, m, campaign).count())
        .sum();
    Ok((done as f64 / required as f64).min(1.0))
}
