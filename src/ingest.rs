//! Loading batch files into a campaign.
//!
//! A batch file is a JSON array of tasks, or a ZIP archive of such files.
//! Malformed tasks are logged and skipped; only an unreadable file is fatal.

use crate::batchfile::{BatchItem, BatchTarget, BatchTask};
use crate::errors::{self, Result};
use crate::languages;
use crate::model::{
    CampaignData, DocumentContext, Id, Item, ItemContent, ItemType, ItemVariant, Lifecycle,
    MAX_REQUIRED_ANNOTATIONS, TASK_SIZE, Target, Task, TaskKind, TextPair,
};
use crate::model::{DEFAULT_CORPUS, DEFAULT_DOMAIN, DEFAULT_SOURCE, DEFAULT_VERSION};
use crate::store::Store;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::Read;
use std::fs;
use std::path::Path;

/// Provenance recorded for every imported item.
#[derive(Clone, Debug)]
pub struct ImportOptions {
    pub domain: String,
    pub corpus_name: String,
    pub version_info: String,
    pub source: String,
    /// Stop after this many valid tasks.
    pub max_count: Option<usize>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            domain: DEFAULT_DOMAIN.to_owned(),
            corpus_name: DEFAULT_CORPUS.to_owned(),
            version_info: DEFAULT_VERSION.to_owned(),
            source: DEFAULT_SOURCE.to_owned(),
            max_count: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub batch: Id,
    pub tasks: Vec<Id>,
    pub items: usize,
    pub skipped: usize,
}

fn parse_tasks(name: &str, data: &str, skipped: &mut usize) -> Result<Vec<BatchTask>> {
    let values: Vec<Value> = serde_json::from_str(data)
        .map_err(|e| errors::invalid_input(format!("{name}: not a JSON array of tasks: {e}")))?;
    let mut tasks = Vec::with_capacity(values.len());
    for (i, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<BatchTask>(value) {
            Ok(task) => tasks.push(task),
            Err(e) => {
                warn!(target: "humeval", "{name}: task {}: {e}", i + 1);
                *skipped += 1;
            }
        }
    }
    Ok(tasks)
}

/// Reads all tasks of a `.json` file or of every `.json` member of a `.zip` archive.
///
/// Returns the tasks and the number of tasks that could not be parsed.
pub fn read_batch_file(path: &Path) -> Result<(Vec<BatchTask>, usize)> {
    let mut skipped = 0;
    let is_zip = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if !is_zip {
        let data = fs::read_to_string(path)?;
        let tasks = parse_tasks(&path.display().to_string(), &data, &mut skipped)?;
        return Ok((tasks, skipped));
    }
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| errors::invalid_input(format!("{}: invalid zip file: {e}", path.display())))?;
    let mut tasks = Vec::new();
    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        let name = member.name().to_owned();
        if !name.ends_with(".json") {
            debug!(target: "humeval", "skip zip member {name}");
            continue;
        }
        let mut data = String::new();
        if let Err(e) = member.read_to_string(&mut data) {
            warn!(target: "humeval", "{name}: {e}");
            continue;
        }
        match parse_tasks(&name, &data, &mut skipped) {
            Ok(more) => tasks.extend(more),
            Err(e) => warn!(target: "humeval", "{e}"),
        }
    }
    Ok((tasks, skipped))
}

fn missing(field: &str, item: &BatchItem) -> Box<dyn std::error::Error> {
    errors::invalid_input(format!("item {} lacks {field}", item.item_id))
}

/// Builds the content of an item of the given shape.
pub fn item_content(item: &BatchItem, variant: ItemVariant) -> Result<ItemContent> {
    let pair = || TextPair {
        source_id: item.source_id.clone(),
        source_text: item.source_text.clone(),
        target_id: item.target_id.clone(),
        target_text: item.target_text.clone(),
    };
    let content = match variant {
        ItemVariant::TextPair => ItemContent::TextPair(pair()),
        ItemVariant::TextPairWithContext => ItemContent::TextPairWithContext {
            pair: pair(),
            context: DocumentContext {
                document_id: item
                    .document_id
                    .clone()
                    .ok_or_else(|| missing("documentID", item))?,
                is_complete_document: item.is_complete_document.unwrap_or(false),
                source_context_left: item.source_context_left.clone().unwrap_or_default(),
                source_context_right: item.source_context_right.clone().unwrap_or_default(),
                target_context_left: item.target_context_left.clone().unwrap_or_default(),
                target_context_right: item.target_context_right.clone().unwrap_or_default(),
            },
        },
        ItemVariant::TextPairWithImage => ItemContent::TextPairWithImage {
            pair: pair(),
            image_url: item
                .image_url
                .clone()
                .ok_or_else(|| missing("imageURL", item))?,
        },
        ItemVariant::TextPairWithDomain => ItemContent::TextPairWithDomain {
            pair: pair(),
            document_domain: item
                .document_domain
                .clone()
                .ok_or_else(|| missing("documentDomain", item))?,
            source_url: item
                .source_url
                .clone()
                .ok_or_else(|| missing("sourceURL", item))?,
            target_url: item
                .target_url
                .clone()
                .ok_or_else(|| missing("targetURL", item))?,
        },
        ItemVariant::TextSegmentWithTwoTargets => {
            let targets = item.targets.as_deref().unwrap_or_default();
            let [a, b] = targets else {
                return Err(errors::invalid_input(format!(
                    "item {} has {} targets, expected 2",
                    item.item_id,
                    targets.len()
                )));
            };
            let target = |t: &BatchTarget| Target {
                target_id: t.target_id.clone(),
                target_text: t.target_text.clone(),
            };
            ItemContent::TextSegmentWithTwoTargets {
                source_id: item.source_id.clone(),
                source_text: item.source_text.clone(),
                targets: [target(a), target(b)],
            }
        }
    };
    Ok(content)
}

/// Checks a task and converts its items; nothing is stored.
pub fn validate_task(task: &BatchTask, kind: TaskKind) -> Result<Vec<(u32, ItemType, ItemContent)>> {
    let header = &task.task;
    if task.items.len() != TASK_SIZE {
        return Err(errors::invalid_input(format!(
            "expected {TASK_SIZE} items for task but found {}",
            task.items.len()
        )));
    }
    for code in [&header.source_language, &header.target_language] {
        if !languages::is_valid(code) {
            return Err(errors::invalid_input(format!("unknown language code '{code}'")));
        }
    }
    if !(1..=MAX_REQUIRED_ANNOTATIONS).contains(&header.required_annotations) {
        return Err(errors::invalid_input(format!(
            "required annotations {} not in 1..={MAX_REQUIRED_ANNOTATIONS}",
            header.required_annotations
        )));
    }
    let variant = kind.variant();
    task.items
        .iter()
        .map(|item| {
            if item.item_id == 0 {
                return Err(errors::invalid_input_ref("item ids start at 1"));
            }
            Ok((item.item_id, item.item_type, item_content(item, variant)?))
        })
        .collect()
}

/// Imports a batch file into a campaign, creating draft tasks.
pub fn import_batch(
    store: &mut Store,
    campaign: Id,
    kind: TaskKind,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    store.campaign(campaign)?;
    if let Ok(existing) = store.campaign_type(campaign) {
        if existing != kind {
            return Err(errors::invalid_argument(format!(
                "campaign {campaign} already uses {existing} tasks, not {kind}"
            )));
        }
    }
    let (tasks, mut skipped) = read_batch_file(path)?;
    let batch = store.allocate_id();
    store.batches.insert(
        batch,
        CampaignData {
            id: batch,
            campaign,
            data_file: path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            data_valid: false,
            data_ready: false,
            meta: Lifecycle::new(),
        },
    );
    let mut report = ImportReport {
        batch,
        ..ImportReport::default()
    };
    for task in &tasks {
        if options.max_count.is_some_and(|max| report.tasks.len() >= max) {
            info!(target: "humeval", "stopping after {} tasks", report.tasks.len());
            break;
        }
        let items = match validate_task(task, kind) {
            Ok(items) => items,
            Err(e) => {
                warn!(target: "humeval", "batch {}: skip task {}: {e}", path.display(), task.task.batch_no);
                skipped += 1;
                continue;
            }
        };
        let header = &task.task;
        let market = store.market_id(
            &header.source_language,
            &header.target_language,
            &options.domain,
        );
        let metadata = store.metadata_id(
            market,
            &options.corpus_name,
            &options.version_info,
            &options.source,
        );
        let mut ids = Vec::with_capacity(items.len());
        for (item_id, item_type, content) in items {
            let id = store.allocate_id();
            store.items.insert(
                id,
                Item {
                    id,
                    item_id,
                    item_type,
                    metadata,
                    content,
                    meta: Lifecycle::new(),
                },
            );
            ids.push(id);
        }
        report.items += ids.len();
        let id = store.allocate_id();
        store.tasks.insert(
            id,
            Task {
                id,
                kind,
                campaign,
                batch_data: Some(batch),
                metadata,
                items: ids,
                batch_no: header.batch_no,
                required_annotations: header.required_annotations,
                assigned_to: BTreeSet::new(),
                random_seed: header.random_seed,
                meta: Lifecycle::new(),
            },
        );
        debug!(target: "humeval", "task {id}: batch no {}", header.batch_no);
        report.tasks.push(id);
    }
    report.skipped = skipped;
    if let Some(data) = store.batches.get_mut(&batch) {
        data.data_valid = true;
        data.data_ready = true;
    }
    if let Some(c) = store.campaigns.get_mut(&campaign) {
        c.batches.push(batch);
    }
    info!(target: "humeval", "imported {} tasks ({} items) from {}, skipped {}", report.tasks.len(), report.items, path.display(), report.skipped);
    Ok(report)
}

/// Activates the batch data and every task created from it.
pub fn activate_batch(store: &mut Store, batch: Id, by: &str) -> Result<usize> {
    let data = store
        .batches
        .get_mut(&batch)
        .ok_or_else(|| errors::lookup_failed(format!("batch {batch}")))?;
    if !data.data_valid || !data.data_ready {
        return Err(errors::invalid_state(format!(
            "batch {} is not validated and ready",
            data.data_file
        )));
    }
    data.meta.activate(by);
    let mut count = 0;
    for task in store.tasks.values_mut() {
        if task.batch_data == Some(batch) && !task.meta.is_completed() {
            task.meta.activate(by);
            count += 1;
        }
    }
    info!(target: "humeval", "activated {count} tasks of batch {batch}");
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::batchfile::TaskHeader;

    fn task(items: usize, required: u32) -> BatchTask {
        BatchTask {
            task: TaskHeader {
                batch_no: 1,
                batch_size: items,
                source_language: "eng".to_owned(),
                target_language: "deu".to_owned(),
                required_annotations: required,
                random_seed: None,
            },
            items: (0..items)
                .map(|i| {
                    BatchItem::text_pair("ref.txt", "Hallo", "sysA", "Hello", i as u32 + 1, ItemType::Tgt)
                })
                .collect(),
        }
    }

    #[test]
    fn task_validation() {
        assert_eq!(validate_task(&task(100, 1), TaskKind::Direct).unwrap().len(), 100);
        assert!(validate_task(&task(99, 1), TaskKind::Direct).is_err());
        assert!(validate_task(&task(100, 0), TaskKind::Direct).is_err());
        assert!(validate_task(&task(100, 51), TaskKind::Direct).is_err());
        assert!(validate_task(&task(100, 1), TaskKind::MultiModal).is_err());
        let mut bad = task(100, 1);
        bad.task.target_language = "xyz".to_owned();
        assert!(validate_task(&bad, TaskKind::Direct).is_err());
    }

    #[test]
    fn two_targets() {
        let mut item = BatchItem::text_pair("src", "Hallo", "", "", 1, ItemType::Tgt);
        assert!(item_content(&item, ItemVariant::TextSegmentWithTwoTargets).is_err());
        item.targets = Some(vec![
            BatchTarget {
                target_id: "a".to_owned(),
                target_text: "Hi".to_owned(),
            },
            BatchTarget {
                target_id: "b".to_owned(),
                target_text: "Hello".to_owned(),
            },
        ]);
        let content = item_content(&item, ItemVariant::TextSegmentWithTwoTargets).unwrap();
        assert_eq!(content.target_ids(), vec!["a", "b"]);
    }

    #[test]
    fn unparsable_task_is_skipped() {
        let good = serde_json::to_value(task(100, 1)).unwrap();
        let data = serde_json::to_string(&vec![good, serde_json::json!({"task": {}})]).unwrap();
        let mut skipped = 0;
        let tasks = parse_tasks("x.json", &data, &mut skipped).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(skipped, 1);
        assert!(parse_tasks("x.json", "{}", &mut skipped).is_err());
    }
}
