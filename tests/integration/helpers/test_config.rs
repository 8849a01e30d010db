use catalyst_sdk::config::{CatalystConfig, SpoolConfig, UploadConfig};
use catalyst_sdk::tracer::{SpanContext, SpanKind, SpanRecord};
use std::path::Path;
use std::time::{Duration, Instant};

/// Config pointing at a mock platform with a temp spool and fast polling
pub fn create_test_config(base_url: &str, spool_root: &Path) -> CatalystConfig {
    CatalystConfig {
        token: Some(crate::mocks::TOKEN.to_string()),
        request_timeout_seconds: 5,
        upload: UploadConfig {
            timeout_seconds: 5,
            max_presigned_urls: 20,
            poll_interval_ms: 20,
            rescan_on_startup: false,
        },
        spool: SpoolConfig {
            root: Some(spool_root.to_path_buf()),
            namespace: "traces".to_string(),
        },
        ..CatalystConfig::with_base_url(base_url)
    }
}

/// A root span and one LLM child in trace `trace_id`
pub fn demo_spans(trace_id: &str) -> Vec<SpanRecord> {
    let root = SpanContext::with_trace_id(trace_id, "query");
    let mut llm = root.child("completion");
    llm.set_kind(SpanKind::Llm);
    llm.set_attribute("prompt", "What is RAG?");
    llm.set_attribute("response", "Retrieval augmented generation.");
    vec![llm.finish(), root.finish()]
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until<F: Fn() -> bool>(limit: Duration, condition: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
