use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Metadata;

use crate::error::CatalystError;

/// Which instrumented library the tracer captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracerType {
    Langchain,
    #[serde(rename = "openai")]
    OpenAi,
    LlamaIndex,
    /// Every non-SDK span
    Custom,
}

impl TracerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Langchain => "langchain",
            Self::OpenAi => "openai",
            Self::LlamaIndex => "llama_index",
            Self::Custom => "custom",
        }
    }

    /// Default `log_source` metadata value
    pub fn log_source(&self) -> String {
        format!("{}_tracer", self.as_str())
    }

    /// Span target prefixes that start a captured trace
    pub fn target_prefixes(&self) -> &'static [&'static str] {
        match self {
            Self::Langchain => &["langchain", "langchain_rust"],
            Self::OpenAi => &["openai", "async_openai"],
            Self::LlamaIndex => &["llama_index", "llamaindex"],
            Self::Custom => &[],
        }
    }

    pub fn instrumentor(&self) -> Arc<dyn Instrumentor> {
        Arc::new(TargetInstrumentor::new(*self))
    }
}

impl fmt::Display for TracerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TracerType {
    type Err = CatalystError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "langchain" => Ok(Self::Langchain),
            "openai" => Ok(Self::OpenAi),
            "llama_index" => Ok(Self::LlamaIndex),
            "custom" => Ok(Self::Custom),
            other => Err(CatalystError::InvalidArgument(format!(
                "Invalid tracer type: {}",
                other
            ))),
        }
    }
}

/// Decides which spans open a captured trace
///
/// Spans nested under a captured span are always captured.
pub trait Instrumentor: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, metadata: &Metadata<'_>) -> bool;
}

/// Accepts spans whose target is, or is nested under, one of the prefixes
#[derive(Debug, Clone)]
pub struct TargetInstrumentor {
    tracer_type: TracerType,
}

impl TargetInstrumentor {
    pub fn new(tracer_type: TracerType) -> Self {
        Self { tracer_type }
    }

    pub fn accepts_target(&self, target: &str) -> bool {
        let prefixes = self.tracer_type.target_prefixes();
        if prefixes.is_empty() {
            return true;
        }
        prefixes.iter().any(|prefix| {
            target == *prefix
                || target
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }
}

impl Instrumentor for TargetInstrumentor {
    fn name(&self) -> &str {
        self.tracer_type.as_str()
    }

    fn accepts(&self, metadata: &Metadata<'_>) -> bool {
        self.accepts_target(metadata.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tracer_type() {
        assert_eq!("openai".parse::<TracerType>().unwrap(), TracerType::OpenAi);
        assert_eq!("llama_index".parse::<TracerType>().unwrap(), TracerType::LlamaIndex);

        let err = "haystack".parse::<TracerType>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: Invalid tracer type: haystack");
    }

    #[test]
    fn test_log_source() {
        assert_eq!(TracerType::Langchain.log_source(), "langchain_tracer");
        assert_eq!(TracerType::LlamaIndex.log_source(), "llama_index_tracer");
    }

    #[test]
    fn test_target_matching() {
        let openai = TargetInstrumentor::new(TracerType::OpenAi);
        assert!(openai.accepts_target("openai"));
        assert!(openai.accepts_target("async_openai::chat"));
        assert!(!openai.accepts_target("openai_compat"));
        assert!(!openai.accepts_target("langchain"));

        let custom = TargetInstrumentor::new(TracerType::Custom);
        assert!(custom.accepts_target("my_app::handler"));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_value(TracerType::OpenAi).unwrap(), "openai");
        assert_eq!(serde_json::to_value(TracerType::LlamaIndex).unwrap(), "llama_index");
    }
}
