//! Conversation state for one user interaction stream.
//!
//! Two independent compaction mechanisms bound memory growth, applied as an
//! ordered pipeline before each planning round:
//!
//! 1. Tool-use clearing: once more than K tool results exist, older payloads
//!    are replaced with a placeholder (the invoking call stays for context).
//! 2. Summarization: when the running token estimate exceeds the budget, the
//!    oldest span collapses into a single summary message; the most recent N
//!    messages survive verbatim.
//!
//! Both are idempotent: re-applying to an already-compacted history is a
//! no-op.

use crate::{CompletionBackend, Message, Settings, CLEARED_TOOL_RESULT};

const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a conversation summarizer. \
Summarize the conversation below, keeping the user's goals, decisions made, \
facts established, and any work still pending. Output only the summary, \
nothing else. Be concise.";

pub(crate) struct Session {
    pub(crate) id: String,
    pub(crate) messages: Vec<Message>,
    pub(crate) token_budget: usize,
    pub(crate) keep_recent: usize,
    pub(crate) keep_tool_results: usize,
}

impl Session {
    pub(crate) fn new(id: impl Into<String>, settings: &Settings) -> Self {
        Session {
            id: id.into(),
            messages: Vec::new(),
            token_budget: settings.max_context_tokens,
            keep_recent: settings.keep_recent_messages.max(2),
            keep_tool_results: settings.keep_tool_results.max(1),
        }
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Rough token count: chars / 4. Only used to decide when to compact,
    /// so precision doesn't matter.
    pub(crate) fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.text_len()).sum::<usize>() / 4
    }

    pub(crate) fn should_compress(&self) -> bool {
        self.estimate_tokens() > self.token_budget
    }

    pub(crate) fn tool_call_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match m {
                Message::Assistant { tool_calls, .. } => tool_calls.len(),
                _ => 0,
            })
            .sum()
    }

    pub(crate) fn tool_result_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::ToolResult { .. }))
            .count()
    }
}

// ── Transform pipeline ──────────────────────────────────────────────────

/// One step of the context-editing pipeline run before each planning round.
/// Steps are independent and individually testable; order is fixed by
/// `context_pipeline()`.
pub(crate) trait SessionTransform {
    fn name(&self) -> &'static str;
    fn apply(
        &self,
        session: &mut Session,
        backend: &dyn CompletionBackend,
    ) -> Result<(), String>;
}

pub(crate) fn context_pipeline() -> Vec<Box<dyn SessionTransform>> {
    vec![Box::new(ClearOldToolResults), Box::new(SummarizeHistory)]
}

/// Clears the payload of all but the most recent K tool results. The
/// assistant message that requested the call keeps its arguments, so the
/// narrative thread survives without the bulk.
pub(crate) struct ClearOldToolResults;

impl SessionTransform for ClearOldToolResults {
    fn name(&self) -> &'static str {
        "clear_old_tool_results"
    }

    fn apply(
        &self,
        session: &mut Session,
        _backend: &dyn CompletionBackend,
    ) -> Result<(), String> {
        let keep = session.keep_tool_results;
        let result_indices: Vec<usize> = session
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m, Message::ToolResult { .. }))
            .map(|(i, _)| i)
            .collect();
        if result_indices.len() <= keep {
            return Ok(());
        }
        let cutoff = result_indices.len() - keep;
        let mut cleared = 0usize;
        for &idx in &result_indices[..cutoff] {
            if let Message::ToolResult { payload, .. } = &mut session.messages[idx] {
                if payload.as_str() != CLEARED_TOOL_RESULT {
                    *payload = CLEARED_TOOL_RESULT.to_string();
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            eprintln!("[session] cleared {cleared} old tool result payload(s)");
        }
        Ok(())
    }
}

/// Replaces the oldest message span with a single summary message once the
/// token estimate exceeds the budget. The most recent `keep_recent` messages
/// are preserved verbatim and never reordered.
pub(crate) struct SummarizeHistory;

impl SummarizeHistory {
    /// Split point for compression: everything before it is summarized.
    /// Nudged backward so a ToolResult is never severed from the assistant
    /// message that requested it — that would orphan the call id.
    fn split_point(session: &Session) -> usize {
        let mut split = session.messages.len().saturating_sub(session.keep_recent);
        while split > 0 && matches!(session.messages[split], Message::ToolResult { .. }) {
            split -= 1;
        }
        split
    }

    fn render_for_summary(prefix: &[Message]) -> String {
        prefix
            .iter()
            .filter_map(|m| {
                let (role, text) = match m {
                    Message::User { text } => ("user", text.clone()),
                    Message::Assistant { text, tool_calls } => {
                        let mut line = text.clone().unwrap_or_default();
                        for call in tool_calls {
                            line.push_str(&format!(" [called {}]", call.name));
                        }
                        ("assistant", line)
                    }
                    Message::ToolResult { tool_name, payload, .. } => {
                        ("tool", format!("{tool_name}: {payload}"))
                    }
                    Message::Summary { text } => ("summary", text.clone()),
                };
                if text.trim().is_empty() {
                    return None;
                }
                let preview: String = text.chars().take(300).collect();
                Some(format!("[{role}] {preview}"))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl SessionTransform for SummarizeHistory {
    fn name(&self) -> &'static str {
        "summarize_history"
    }

    fn apply(
        &self,
        session: &mut Session,
        backend: &dyn CompletionBackend,
    ) -> Result<(), String> {
        if !session.should_compress() {
            return Ok(());
        }
        let split = Self::split_point(session);
        if split == 0 {
            return Ok(());
        }
        // Already-compressed prefix: re-invocation is a no-op.
        if split == 1 && matches!(session.messages[0], Message::Summary { .. }) {
            return Ok(());
        }

        let rendered = Self::render_for_summary(&session.messages[..split]);
        let summary = backend.summarize(SUMMARIZER_SYSTEM_PROMPT, &rendered)?;
        let token_before = session.estimate_tokens();

        let suffix = session.messages.split_off(split);
        session.messages.clear();
        session.messages.push(Message::Summary { text: summary });
        session.messages.extend(suffix);

        eprintln!(
            "[session] compressed history: ~{token_before} -> ~{} tokens, {} message(s) retained",
            session.estimate_tokens(),
            session.messages.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssistantTurn, Settings, ToolCall, ToolSpec};

    /// Backend stub: returns a fixed summary, counts invocations.
    struct FixedSummarizer(std::cell::Cell<usize>);

    impl CompletionBackend for FixedSummarizer {
        fn complete(
            &self,
            _system: &str,
            _messages: &[Message],
            _tools: &[ToolSpec],
        ) -> Result<AssistantTurn, String> {
            self.0.set(self.0.get() + 1);
            Ok(AssistantTurn {
                text: Some("the user planned a trip".to_string()),
                tool_calls: Vec::new(),
            })
        }
    }

    fn session_with_turns(turns: usize) -> Session {
        let mut session = Session::new("test", &Settings::for_tests());
        for i in 0..turns {
            session.append(Message::User { text: format!("question number {i} {}", "x".repeat(120)) });
            session.append(Message::Assistant {
                text: Some(format!("answer number {i} {}", "y".repeat(120))),
                tool_calls: Vec::new(),
            });
        }
        session
    }

    fn tool_exchange(session: &mut Session, n: usize) {
        for i in 0..n {
            session.append(Message::Assistant {
                text: None,
                tool_calls: vec![ToolCall {
                    id: format!("call_{i}"),
                    name: "get_current_time".into(),
                    args: serde_json::json!({}),
                }],
            });
            session.append(Message::ToolResult {
                call_id: format!("call_{i}"),
                tool_name: "get_current_time".into(),
                payload: format!("result payload {i}"),
                is_error: false,
            });
        }
    }

    #[test]
    fn test_clear_old_tool_results_keeps_recent() {
        let mut session = Session::new("test", &Settings::for_tests());
        tool_exchange(&mut session, 8);
        let backend = FixedSummarizer(Default::default());
        ClearOldToolResults.apply(&mut session, &backend).unwrap();

        let payloads: Vec<String> = session
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(payloads.len(), 8);
        assert!(payloads[..3].iter().all(|p| p == CLEARED_TOOL_RESULT));
        assert!(payloads[3..].iter().all(|p| p.starts_with("result payload")));
    }

    #[test]
    fn test_clear_old_tool_results_idempotent() {
        let mut session = Session::new("test", &Settings::for_tests());
        tool_exchange(&mut session, 9);
        let backend = FixedSummarizer(Default::default());
        ClearOldToolResults.apply(&mut session, &backend).unwrap();
        let snapshot = session.messages.clone();
        ClearOldToolResults.apply(&mut session, &backend).unwrap();
        assert_eq!(session.messages, snapshot);
    }

    #[test]
    fn test_summarize_noop_under_budget() {
        let mut session = session_with_turns(3);
        let backend = FixedSummarizer(Default::default());
        let before = session.messages.clone();
        SummarizeHistory.apply(&mut session, &backend).unwrap();
        assert_eq!(session.messages, before);
        assert_eq!(backend.0.get(), 0);
    }

    #[test]
    fn test_summarize_replaces_prefix_keeps_suffix() {
        let mut session = session_with_turns(20);
        session.token_budget = 10; // force compression
        let backend = FixedSummarizer(Default::default());
        let suffix_before: Vec<Message> =
            session.messages[session.messages.len() - session.keep_recent..].to_vec();

        SummarizeHistory.apply(&mut session, &backend).unwrap();

        assert!(matches!(session.messages[0], Message::Summary { .. }));
        assert_eq!(session.messages.len(), session.keep_recent + 1);
        assert_eq!(&session.messages[1..], suffix_before.as_slice());
    }

    #[test]
    fn test_summarize_idempotent_on_compressed_prefix() {
        let mut session = session_with_turns(20);
        session.token_budget = 10;
        let backend = FixedSummarizer(Default::default());
        SummarizeHistory.apply(&mut session, &backend).unwrap();
        let snapshot = session.messages.clone();
        let calls_after_first = backend.0.get();

        SummarizeHistory.apply(&mut session, &backend).unwrap();
        assert_eq!(session.messages, snapshot);
        assert_eq!(backend.0.get(), calls_after_first);
    }

    #[test]
    fn test_split_point_never_orphans_tool_results() {
        let mut session = session_with_turns(6);
        tool_exchange(&mut session, 1);
        session.append(Message::User { text: "next".into() });
        // Force keep_recent to land the split on the ToolResult.
        let result_idx = session
            .messages
            .iter()
            .position(|m| matches!(m, Message::ToolResult { .. }))
            .unwrap();
        session.keep_recent = session.messages.len() - result_idx;
        let split = SummarizeHistory::split_point(&session);
        // The assistant message owning the call must stay with its result.
        assert!(split < result_idx);
        assert!(!matches!(session.messages[split], Message::ToolResult { .. }));
    }

    #[test]
    fn test_token_estimate_counts_tool_payloads() {
        let mut session = Session::new("test", &Settings::for_tests());
        assert_eq!(session.estimate_tokens(), 0);
        tool_exchange(&mut session, 2);
        assert!(session.estimate_tokens() > 0);
        assert_eq!(session.tool_call_count(), session.tool_result_count());
    }
}
