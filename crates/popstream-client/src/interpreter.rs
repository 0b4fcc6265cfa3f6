//! Maps decoded events onto message store mutations

use crate::{
    events::StreamEvent,
    store::{MessageStore, StreamMessage, TextCursor},
};

/// What an event did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// A new message was appended
    Appended,
    /// The open text message grew
    Extended,
    /// A pending tool was marked complete
    Completed,
    /// Nothing changed
    None,
}

impl Effect {
    pub fn changed(self) -> bool {
        self != Effect::None
    }
}

const DEFAULT_TOOL_LABEL: &str = "Running tool";
const DEFAULT_ANALYSIS_LABEL: &str = "Analysis started";

/// Apply one event to the store, in delivery order.
pub fn apply(store: &mut MessageStore, event: StreamEvent) -> Effect {
    match event {
        StreamEvent::AnalysisStart { message } => {
            let label = non_empty(message).unwrap_or_else(|| DEFAULT_ANALYSIS_LABEL.to_string());
            store.append(StreamMessage::milestone(label));
            Effect::Appended
        }
        StreamEvent::ToolStart {
            tool_name,
            tool_description,
        } => {
            let label = start_label(tool_name.as_deref(), tool_description.as_deref());
            store.append(StreamMessage::tool_start(label, non_empty(tool_name)));
            Effect::Appended
        }
        StreamEvent::ToolComplete { tool_output, .. } => {
            let detail = tool_output.and_then(render_output);
            let completed = store.mutate_last(StreamMessage::is_pending_tool, |message| {
                message.content = completion_label(&message.content);
                message.is_complete = true;
                if detail.is_some() {
                    message.detail = detail;
                }
            });
            if completed {
                Effect::Completed
            } else {
                tracing::debug!("tool_complete with no pending tool, dropping");
                Effect::None
            }
        }
        StreamEvent::TextChunk { content } => match content {
            Some(delta) if !delta.is_empty() => {
                let extends = store.cursor() == TextCursor::Open && !store.is_empty();
                store.push_text(&delta);
                if extends {
                    Effect::Extended
                } else {
                    Effect::Appended
                }
            }
            _ => Effect::None,
        },
        StreamEvent::Unrecognized => Effect::None,
    }
}

/// Human label for a running tool
pub fn start_label(tool_name: Option<&str>, tool_description: Option<&str>) -> String {
    tool_description
        .filter(|d| !d.trim().is_empty())
        .or(tool_name.filter(|n| !n.trim().is_empty()))
        .unwrap_or(DEFAULT_TOOL_LABEL)
        .to_string()
}

/// Label shown once a tool finishes: trailing ellipsis dropped, check appended
pub fn completion_label(label: &str) -> String {
    let base = label
        .trim_end()
        .trim_end_matches("...")
        .trim_end_matches('\u{2026}')
        .trim_end();
    format!("{base} \u{2713}")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn render_output(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => non_empty(Some(s)),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageKind;
    use serde_json::json;

    fn tool_start(name: &str) -> StreamEvent {
        StreamEvent::ToolStart {
            tool_name: Some(name.into()),
            tool_description: None,
        }
    }

    fn tool_complete() -> StreamEvent {
        StreamEvent::ToolComplete {
            tool_name: None,
            tool_output: None,
        }
    }

    fn text(s: &str) -> StreamEvent {
        StreamEvent::TextChunk {
            content: Some(s.into()),
        }
    }

    #[test]
    fn test_consecutive_text_chunks_concatenate() {
        let mut store = MessageStore::new();
        assert_eq!(apply(&mut store, text("Hello ")), Effect::Appended);
        assert_eq!(apply(&mut store, text("world")), Effect::Extended);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].content, "Hello world");
    }

    #[test]
    fn test_tool_start_between_text_splits_messages() {
        let mut store = MessageStore::new();
        apply(&mut store, text("one"));
        apply(&mut store, tool_start("fetch_data"));
        apply(&mut store, text("two"));
        let texts: Vec<_> = store
            .snapshot()
            .iter()
            .filter(|m| m.kind == MessageKind::AgentText)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_tool_complete_marks_pending_tool() {
        let mut store = MessageStore::new();
        apply(&mut store, tool_start("fetch_data"));
        assert_eq!(apply(&mut store, tool_complete()), Effect::Completed);
        let msg = &store.snapshot()[0];
        assert!(msg.is_complete);
        assert_eq!(msg.content, "fetch_data \u{2713}");
        assert_eq!(msg.tool_name.as_deref(), Some("fetch_data"));
    }

    #[test]
    fn test_orphan_tool_complete_is_noop() {
        let mut store = MessageStore::new();
        apply(&mut store, text("answer"));
        let before = store.snapshot().to_vec();
        assert_eq!(apply(&mut store, tool_complete()), Effect::None);
        assert_eq!(store.snapshot(), before.as_slice());
    }

    #[test]
    fn test_duplicate_tool_complete_is_noop() {
        let mut store = MessageStore::new();
        apply(&mut store, tool_start("fetch_data"));
        apply(&mut store, tool_complete());
        let before = store.snapshot().to_vec();
        assert_eq!(apply(&mut store, tool_complete()), Effect::None);
        assert_eq!(store.snapshot(), before.as_slice());
    }

    #[test]
    fn test_tool_complete_targets_most_recent_pending() {
        let mut store = MessageStore::new();
        apply(&mut store, tool_start("a"));
        apply(&mut store, tool_start("b"));
        apply(&mut store, tool_complete());
        assert!(!store.snapshot()[0].is_complete);
        assert!(store.snapshot()[1].is_complete);
        apply(&mut store, tool_complete());
        assert!(store.snapshot()[0].is_complete);
    }

    #[test]
    fn test_tool_output_becomes_detail() {
        let mut store = MessageStore::new();
        apply(
            &mut store,
            StreamEvent::ToolStart {
                tool_name: Some("analyze_popup_history".into()),
                tool_description: Some("Analyzing Historical Popup Performance...".into()),
            },
        );
        apply(
            &mut store,
            StreamEvent::ToolComplete {
                tool_name: Some("analyze_popup_history".into()),
                tool_output: Some(json!("Found 62% improvement opportunity")),
            },
        );
        let msg = &store.snapshot()[0];
        assert_eq!(msg.content, "Analyzing Historical Popup Performance \u{2713}");
        assert_eq!(msg.detail.as_deref(), Some("Found 62% improvement opportunity"));
    }

    #[test]
    fn test_analysis_start_is_complete_milestone() {
        let mut store = MessageStore::new();
        apply(
            &mut store,
            StreamEvent::AnalysisStart {
                message: Some("Starting analysis".into()),
            },
        );
        let msg = &store.snapshot()[0];
        assert_eq!(msg.kind, MessageKind::ToolStart);
        assert!(msg.is_complete);
        // a milestone is not something tool_complete can close
        assert_eq!(apply(&mut store, tool_complete()), Effect::None);
    }

    #[test]
    fn test_ignored_events() {
        let mut store = MessageStore::new();
        assert_eq!(apply(&mut store, StreamEvent::Unrecognized), Effect::None);
        assert_eq!(apply(&mut store, StreamEvent::TextChunk { content: None }), Effect::None);
        assert_eq!(apply(&mut store, text("")), Effect::None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_labels() {
        assert_eq!(start_label(Some("fetch"), Some("Fetching data...")), "Fetching data...");
        assert_eq!(start_label(Some("fetch"), Some("  ")), "fetch");
        assert_eq!(start_label(None, None), DEFAULT_TOOL_LABEL);
        assert_eq!(completion_label("Fetching data..."), "Fetching data \u{2713}");
        assert_eq!(completion_label("Scanning\u{2026}"), "Scanning \u{2713}");
        assert_eq!(completion_label("fetch_data"), "fetch_data \u{2713}");
    }
}
