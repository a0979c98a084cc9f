//! Persistent entities of an evaluation campaign.
//!
//! Entities refer to each other through [Id] values that index the tables
//! of a [crate::store::Store]; nothing here holds a reference to anything else.

use crate::errors::{self, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Primary key of a stored entity.
pub type Id = u32;

/// Number of items in every task.
pub const TASK_SIZE: usize = 100;

/// Largest number of annotators that may be required for one task.
pub const MAX_REQUIRED_ANNOTATIONS: u32 = 50;

/// Crowd workers in this group are never trusted and have a per-campaign cap.
pub const CROWD_GROUP: &str = "Appen";

pub const DEFAULT_DOMAIN: &str = "UNDEFINED";
pub const DEFAULT_CORPUS: &str = "UNDEFINED";
pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_SOURCE: &str = "official";

/// Role of an item within a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemType {
    /// Source text.
    Src,
    /// Candidate translation.
    Tgt,
    /// Human reference.
    Ref,
    /// Candidate with a spliced-in phrase from an unrelated reference.
    Bad,
    /// Repeated candidate, used to check consistency.
    Chk,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ItemType::Src => write!(f, "SRC"),
            ItemType::Tgt => write!(f, "TGT"),
            ItemType::Ref => write!(f, "REF"),
            ItemType::Bad => write!(f, "BAD"),
            ItemType::Chk => write!(f, "CHK"),
        }
    }
}

impl FromStr for ItemType {
    type Err = Box<dyn std::error::Error>;

    fn from_str(s: &str) -> Result<ItemType> {
        match s.to_ascii_uppercase().as_str() {
            "SRC" => Ok(ItemType::Src),
            "TGT" => Ok(ItemType::Tgt),
            "REF" => Ok(ItemType::Ref),
            "BAD" => Ok(ItemType::Bad),
            "CHK" => Ok(ItemType::Chk),
            _ => Err(errors::invalid_input(format!("unknown item type '{s}'"))),
        }
    }
}

/// Lifecycle state shared by all persistent entities.
///
/// The states are mutually exclusive; entering one stamps its date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Draft,
    Active,
    Completed,
    Retired,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Draft => write!(f, "draft"),
            State::Active => write!(f, "active"),
            State::Completed => write!(f, "completed"),
            State::Retired => write!(f, "retired"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Lifecycle {
    pub state: State,
    pub date_created: DateTime<Utc>,
    pub date_activated: Option<DateTime<Utc>>,
    pub activated_by: Option<String>,
    pub date_completed: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub date_retired: Option<DateTime<Utc>>,
    pub retired_by: Option<String>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Lifecycle {
        Lifecycle {
            state: State::Draft,
            date_created: Utc::now(),
            date_activated: None,
            activated_by: None,
            date_completed: None,
            completed_by: None,
            date_retired: None,
            retired_by: None,
        }
    }

    pub fn activate(&mut self, by: &str) {
        self.state = State::Active;
        self.date_activated = Some(Utc::now());
        self.activated_by = Some(by.to_owned());
    }

    pub fn complete(&mut self, by: &str) {
        self.state = State::Completed;
        self.date_completed = Some(Utc::now());
        self.completed_by = Some(by.to_owned());
    }

    pub fn retire(&mut self, by: &str) {
        self.state = State::Retired;
        self.date_retired = Some(Utc::now());
        self.retired_by = Some(by.to_owned());
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    pub fn is_completed(&self) -> bool {
        self.state == State::Completed
    }

    pub fn is_retired(&self) -> bool {
        self.state == State::Retired
    }

    /// Time at which the entity reached its current state.
    pub fn last_change(&self) -> DateTime<Utc> {
        let stamp = match self.state {
            State::Draft => None,
            State::Active => self.date_activated,
            State::Completed => self.date_completed,
            State::Retired => self.date_retired,
        };
        stamp.unwrap_or(self.date_created)
    }
}

/// A language pair within a domain.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Market {
    pub id: Id,
    pub source_language: String,
    pub target_language: String,
    pub domain: String,
    pub meta: Lifecycle,
}

impl Market {
    pub fn market_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.source_language, self.target_language, self.domain
        )
    }
}

/// Provenance of a batch of items.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Metadata {
    pub id: Id,
    pub market: Id,
    pub corpus_name: String,
    pub version_info: String,
    pub source: String,
    pub meta: Lifecycle,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TextPair {
    pub source_id: String,
    pub source_text: String,
    pub target_id: String,
    pub target_text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DocumentContext {
    pub document_id: String,
    pub is_complete_document: bool,
    pub source_context_left: String,
    pub source_context_right: String,
    pub target_context_left: String,
    pub target_context_right: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Target {
    pub target_id: String,
    pub target_text: String,
}

/// Shape of an item, one per kind of evaluation form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ItemVariant {
    TextPair,
    TextPairWithContext,
    TextPairWithImage,
    TextPairWithDomain,
    TextSegmentWithTwoTargets,
}

impl ItemVariant {
    /// Number of scores a result for this variant carries.
    pub fn scores(self) -> usize {
        match self {
            ItemVariant::TextSegmentWithTwoTargets => 2,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ItemContent {
    TextPair(TextPair),
    TextPairWithContext {
        pair: TextPair,
        context: DocumentContext,
    },
    TextPairWithImage {
        pair: TextPair,
        image_url: String,
    },
    /// Segments may span several lines joined by newlines.
    TextPairWithDomain {
        pair: TextPair,
        document_domain: String,
        source_url: String,
        target_url: String,
    },
    TextSegmentWithTwoTargets {
        source_id: String,
        source_text: String,
        targets: [Target; 2],
    },
}

impl ItemContent {
    pub fn variant(&self) -> ItemVariant {
        match self {
            ItemContent::TextPair(_) => ItemVariant::TextPair,
            ItemContent::TextPairWithContext { .. } => ItemVariant::TextPairWithContext,
            ItemContent::TextPairWithImage { .. } => ItemVariant::TextPairWithImage,
            ItemContent::TextPairWithDomain { .. } => ItemVariant::TextPairWithDomain,
            ItemContent::TextSegmentWithTwoTargets { .. } => ItemVariant::TextSegmentWithTwoTargets,
        }
    }

    fn pair(&self) -> Option<&TextPair> {
        match self {
            ItemContent::TextPair(pair)
            | ItemContent::TextPairWithContext { pair, .. }
            | ItemContent::TextPairWithImage { pair, .. }
            | ItemContent::TextPairWithDomain { pair, .. } => Some(pair),
            ItemContent::TextSegmentWithTwoTargets { .. } => None,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            ItemContent::TextSegmentWithTwoTargets { source_id, .. } => source_id,
            _ => self.pair().map_or("", |p| p.source_id.as_str()),
        }
    }

    pub fn source_text(&self) -> &str {
        match self {
            ItemContent::TextSegmentWithTwoTargets { source_text, .. } => source_text,
            _ => self.pair().map_or("", |p| p.source_text.as_str()),
        }
    }

    /// Target ids in the order in which scores are recorded.
    pub fn target_ids(&self) -> Vec<&str> {
        match self {
            ItemContent::TextSegmentWithTwoTargets { targets, .. } => {
                targets.iter().map(|t| t.target_id.as_str()).collect()
            }
            _ => self.pair().map(|p| p.target_id.as_str()).into_iter().collect(),
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        match self {
            ItemContent::TextPairWithContext { context, .. } => Some(&context.document_id),
            _ => None,
        }
    }
}

/// A single unit of evaluation. Never changed after ingestion.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Item {
    pub id: Id,
    /// Segment number within the source document, starting at 1.
    pub item_id: u32,
    pub item_type: ItemType,
    pub metadata: Id,
    pub content: ItemContent,
    pub meta: Lifecycle,
}

/// Registry of task kinds. Each campaign uses exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum TaskKind {
    Direct,
    DocLevelDA,
    Document,
    MultiModal,
    Pairwise,
    PairwiseDocument,
    Data,
}

impl TaskKind {
    pub const ALL: [TaskKind; 7] = [
        TaskKind::Direct,
        TaskKind::DocLevelDA,
        TaskKind::Document,
        TaskKind::MultiModal,
        TaskKind::Pairwise,
        TaskKind::PairwiseDocument,
        TaskKind::Data,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Direct => "Direct",
            TaskKind::DocLevelDA => "DocLevelDA",
            TaskKind::Document => "Document",
            TaskKind::MultiModal => "MultiModal",
            TaskKind::Pairwise => "Pairwise",
            TaskKind::PairwiseDocument => "PairwiseDocument",
            TaskKind::Data => "Data",
        }
    }

    /// Item shape used by tasks of this kind.
    pub fn variant(self) -> ItemVariant {
        match self {
            TaskKind::Direct => ItemVariant::TextPair,
            TaskKind::DocLevelDA | TaskKind::Document => ItemVariant::TextPairWithContext,
            TaskKind::MultiModal => ItemVariant::TextPairWithImage,
            TaskKind::Pairwise | TaskKind::PairwiseDocument => {
                ItemVariant::TextSegmentWithTwoTargets
            }
            TaskKind::Data => ItemVariant::TextPairWithDomain,
        }
    }

    /// Segments are identified by segment and document id together.
    pub fn document_level(self) -> bool {
        matches!(self, TaskKind::DocLevelDA | TaskKind::Document)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TaskKind {
    type Err = Box<dyn std::error::Error>;

    fn from_str(s: &str) -> Result<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| errors::lookup_failed(format!("task type '{s}'")))
    }
}

/// An ordered collection of exactly [TASK_SIZE] items.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Task {
    pub id: Id,
    pub kind: TaskKind,
    pub campaign: Id,
    pub batch_data: Option<Id>,
    pub metadata: Id,
    pub items: Vec<Id>,
    /// Starts at 1.
    pub batch_no: u32,
    pub required_annotations: u32,
    pub assigned_to: BTreeSet<String>,
    pub random_seed: Option<u64>,
    pub meta: Lifecycle,
}

impl Task {
    pub fn object_id(&self) -> ObjectId {
        ObjectId {
            type_name: self.kind,
            id: self.id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Campaign {
    pub id: Id,
    pub name: String,
    pub options: String,
    pub teams: Vec<Id>,
    pub batches: Vec<Id>,
    pub meta: Lifecycle,
}

pub const DEFAULT_TEAM_ANNOTATIONS: u32 = 100;
pub const DEFAULT_TEAM_HOURS: u32 = 50;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CampaignTeam {
    pub id: Id,
    pub name: String,
    pub owner: String,
    pub members: BTreeSet<String>,
    pub required_annotations: u32,
    pub required_hours: u32,
    pub meta: Lifecycle,
}

/// One ingested batch file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CampaignData {
    pub id: Id,
    pub campaign: Id,
    pub data_file: String,
    pub data_valid: bool,
    pub data_ready: bool,
    pub meta: Lifecycle,
}

/// One score given to one item by one annotator.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ResultRecord {
    pub id: Id,
    pub score: f64,
    /// Present for two-target items only.
    pub score2: Option<f64>,
    /// Seconds since the epoch.
    pub start_time: f64,
    pub end_time: f64,
    pub item: Id,
    pub task: Id,
    pub created_by: String,
    pub modified_by: String,
    pub meta: Lifecycle,
}

impl ResultRecord {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub username: String,
    pub password: String,
    pub active: bool,
    pub groups: BTreeSet<String>,
}

impl User {
    pub fn new(username: &str, password: &str) -> User {
        User {
            username: username.to_owned(),
            password: password.to_owned(),
            active: true,
            groups: BTreeSet::new(),
        }
    }

    pub fn is_crowd_worker(&self) -> bool {
        self.groups.contains(CROWD_GROUP)
    }
}

/// Marks a user as exempt from quality-control probes in one campaign.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct TrustedUser {
    pub user: String,
    pub campaign: Id,
}

/// Reference to a task of any kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ObjectId {
    pub type_name: TaskKind,
    pub id: Id,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

/// Open and completed tasks of one user in one campaign. The two sets are disjoint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskAgenda {
    pub user: String,
    pub campaign: Id,
    pub open: BTreeSet<ObjectId>,
    pub completed: BTreeSet<ObjectId>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifecycle_states_are_exclusive() {
        let mut meta = Lifecycle::new();
        assert_eq!(meta.state, State::Draft);
        assert!(!meta.is_active());
        meta.activate("admin");
        assert!(meta.is_active());
        assert_eq!(meta.activated_by.as_deref(), Some("admin"));
        meta.complete("engeb0101");
        assert!(meta.is_completed());
        assert!(!meta.is_active());
        assert!(meta.date_completed.is_some());
        meta.retire("admin");
        assert!(meta.is_retired());
        assert!(!meta.is_completed());
        assert_eq!(meta.last_change(), meta.date_retired.unwrap());
    }

    #[test]
    fn item_types() {
        assert_eq!("tgt".parse::<ItemType>().unwrap(), ItemType::Tgt);
        assert_eq!("CHK".parse::<ItemType>().unwrap(), ItemType::Chk);
        assert!("XYZ".parse::<ItemType>().is_err());
        assert_eq!(ItemType::Bad.to_string(), "BAD");
        assert_eq!(serde_json::to_string(&ItemType::Ref).unwrap(), "\"REF\"");
    }

    #[test]
    fn task_kind_registry() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.name().parse::<TaskKind>().unwrap(), kind);
        }
        assert_eq!(TaskKind::Direct.variant(), ItemVariant::TextPair);
        assert_eq!(TaskKind::Pairwise.variant().scores(), 2);
        assert_eq!(TaskKind::Direct.variant().scores(), 1);
        assert!(TaskKind::Document.document_level());
        assert!(!TaskKind::MultiModal.document_level());
        let e = "Bogus".parse::<TaskKind>().unwrap_err();
        assert!(e.downcast_ref::<errors::LookupFailed>().is_some());
    }

    #[test]
    fn content_accessors() {
        let content = ItemContent::TextSegmentWithTwoTargets {
            source_id: "src.txt".to_owned(),
            source_text: "Hallo".to_owned(),
            targets: [
                Target {
                    target_id: "sysA".to_owned(),
                    target_text: "Hello".to_owned(),
                },
                Target {
                    target_id: "sysB".to_owned(),
                    target_text: "Hi".to_owned(),
                },
            ],
        };
        assert_eq!(content.target_ids(), vec!["sysA", "sysB"]);
        assert_eq!(content.source_text(), "Hallo");
        assert_eq!(content.document_id(), None);
    }
}
