//! The JSON batch file format shared by the batch builder and ingestion.
//!
//! A batch file is an array of [BatchTask] objects, each with a task header
//! and the items of one task.

use crate::model::ItemType;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHeader {
    pub batch_no: u32,
    pub batch_size: usize,
    pub source_language: String,
    pub target_language: String,
    pub required_annotations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTarget {
    #[serde(rename = "targetID")]
    pub target_id: String,
    pub target_text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    #[serde(rename = "_item", default)]
    pub item: usize,
    #[serde(rename = "_block", default)]
    pub block: usize,
    #[serde(rename = "sourceID")]
    pub source_id: String,
    pub source_text: String,
    #[serde(rename = "targetID", default)]
    pub target_id: String,
    #[serde(default)]
    pub target_text: String,
    #[serde(rename = "itemID")]
    pub item_id: u32,
    pub item_type: ItemType,
    #[serde(rename = "documentID", default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete_document: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context_left: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context_right: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_context_left: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_context_right: Option<String>,
    #[serde(rename = "imageURL", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_domain: Option<String>,
    #[serde(rename = "sourceURL", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(rename = "targetURL", default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<BatchTarget>>,
}

impl BatchItem {
    /// A plain text-pair item.
    pub fn text_pair(
        source_id: &str,
        source_text: &str,
        target_id: &str,
        target_text: &str,
        item_id: u32,
        item_type: ItemType,
    ) -> BatchItem {
        BatchItem {
            item: 0,
            block: 0,
            source_id: source_id.to_owned(),
            source_text: source_text.to_owned(),
            target_id: target_id.to_owned(),
            target_text: target_text.to_owned(),
            item_id,
            item_type,
            document_id: None,
            is_complete_document: None,
            source_context_left: None,
            source_context_right: None,
            target_context_left: None,
            target_context_right: None,
            image_url: None,
            document_domain: None,
            source_url: None,
            target_url: None,
            targets: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchTask {
    pub task: TaskHeader,
    pub items: Vec<BatchItem>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_names() {
        let data = r#"{
            "task": {"batchNo": 3, "batchSize": 100, "sourceLanguage": "eng",
                     "targetLanguage": "deu", "requiredAnnotations": 1},
            "items": [{"_item": 0, "_block": 20, "sourceID": "ref.txt",
                       "sourceText": "Hallo", "targetID": "sysA+sysB",
                       "targetText": "Hello", "itemID": 17, "itemType": "TGT",
                       "documentID": "doc1", "imageURL": "http://x/1.png"}]
        }"#;
        let task: BatchTask = serde_json::from_str(data).unwrap();
        assert_eq!(task.task.batch_no, 3);
        assert_eq!(task.task.random_seed, None);
        let item = &task.items[0];
        assert_eq!(item.block, 20);
        assert_eq!(item.target_id, "sysA+sysB");
        assert_eq!(item.item_type, ItemType::Tgt);
        assert_eq!(item.document_id.as_deref(), Some("doc1"));
        assert_eq!(item.image_url.as_deref(), Some("http://x/1.png"));
        let json = serde_json::to_string(item).unwrap();
        assert!(json.contains("\"sourceID\":\"ref.txt\""));
        assert!(json.contains("\"itemID\":17"));
        assert!(!json.contains("targets"));
    }
}
