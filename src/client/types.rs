//! Wire types for the platform API

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Where confirmed traces land on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceTarget {
    /// Project master dataset
    Project { project: String },
    /// Named dataset inside a project
    Dataset { project: String, dataset: String },
}

impl TraceTarget {
    pub fn project(project: impl Into<String>) -> Self {
        Self::Project {
            project: project.into(),
        }
    }

    pub fn dataset(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self::Dataset {
            project: project.into(),
            dataset: dataset.into(),
        }
    }

    /// Project name, sent as `X-Project-Name` and used in spool file names
    pub fn project_name(&self) -> &str {
        match self {
            Self::Project { project } | Self::Dataset { project, .. } => project,
        }
    }

    pub fn dataset_name(&self) -> Option<&str> {
        match self {
            Self::Project { .. } => None,
            Self::Dataset { dataset, .. } => Some(dataset),
        }
    }

    pub(crate) fn presign_body(&self, num_files: usize) -> Value {
        match self {
            Self::Project { project } => json!({
                "projectName": project,
                "numFiles": num_files,
            }),
            Self::Dataset { dataset, .. } => json!({
                "datasetName": dataset,
                "numFiles": num_files,
            }),
        }
    }

    pub(crate) fn insert_body(&self, presigned_url: &str) -> Value {
        match self {
            Self::Project { project } => json!({
                "projectName": project,
                "traceUri": presigned_url,
            }),
            Self::Dataset { dataset, .. } => json!({
                "datasetName": dataset,
                "presignedUrl": presigned_url,
            }),
        }
    }
}

/// Standard `{success, data, message}` response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Paginated listing payload
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenData {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenRequest<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    /// Numeric on current platforms, kept opaque
    #[serde(default)]
    pub id: Option<Value>,
}

impl ProjectSummary {
    /// Id rendered for the `X-Project-Id` header
    pub fn id_header(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub name: String,
}

/// URLs issued by one presign call
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedBatch {
    #[serde(default)]
    pub presigned_urls: Vec<String>,
    #[serde(default)]
    pub trace_folder_url: Option<String>,
}

/// Column mapping registered for a project's trace schema
pub fn project_schema_mapping() -> Value {
    json!({
        "trace_id": "traceId",
        "trace_uri": "traceUri",
        "prompt": "prompt",
        "response": "response",
        "context": "context",
        "llm_model": "pipeline",
        "recorded_on": "metadata",
        "embed_model": "pipeline",
        "log_source": "metadata",
        "vector_store": "pipeline",
    })
}

/// Column mapping registered when traces go to a named dataset
pub fn dataset_schema_mapping() -> Value {
    json!({
        "trace_id": {"columnType": "traceId"},
        "trace_uri": {"columnType": "traceUri"},
        "prompt": {"columnType": "prompt"},
        "response": {"columnType": "response"},
        "context": {"columnType": "context"},
        "llm_model": {"columnType": "pipeline"},
        "recorded_on": {"columnType": "metadata"},
        "embed_model": {"columnType": "pipeline"},
        "log_source": {"columnType": "metadata"},
        "vector_store": {"columnType": "pipeline"},
        "feedback": {"columnType": "feedBack"},
    })
}
