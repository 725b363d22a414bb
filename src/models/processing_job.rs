use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessingStatus {
    Queued,
    Running,
    /// Transcoded, waiting for the hosting upload.
    Completed,
    /// Claimed by the one caller currently uploading to the host.
    Publishing,
    /// Uploaded and attached to the catalog item.
    Published,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Published | ProcessingStatus::Failed)
    }
}

/// One editing step sent to the transcoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    /// Keep only `[start, end)` seconds of the source.
    Cut { start: f64, end: f64 },
    /// Append other sources after the current one.
    Concat { sources: Vec<String> },
    /// Produce a short preview clip from the beginning.
    Preview { duration: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub item_id: String,
    pub external_job_id: String,
    pub source_ref: String,
    pub operations: Vec<EditOperation>,
    pub status: ProcessingStatus,
    pub result_ref: Option<String>,
    pub external_video_id: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProcessingJob {
    pub source_ref: String,
    #[serde(default)]
    pub operations: Vec<EditOperation>,
}
