use std::fmt;

use serde::{Deserialize, Serialize};

/// Cap on tool output appended to the conversation (~2000 tokens).
pub(crate) const TOOL_OUTPUT_MAX_CHARS: usize = 8_000;

/// Placeholder written over old tool-result payloads by the clearing pass.
pub(crate) const CLEARED_TOOL_RESULT: &str = "[cleared: older tool result]";

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct ToolCall {
    pub(crate) id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) args: serde_json::Value,
}

/// A single entry in the conversation history.
///
/// Closed set of variants: the planner, the session transforms, and the wire
/// encoder all match on this exhaustively. Every `ToolResult` answers exactly
/// one prior `ToolCall` (by id) in the same session, and no call is answered
/// twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Message {
    User {
        text: String,
    },
    Assistant {
        text: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        payload: String,
        is_error: bool,
    },
    /// Synthetic message produced by history compression; stands in for the
    /// span of messages it replaced.
    Summary {
        text: String,
    },
}

impl Message {
    pub(crate) fn text_len(&self) -> usize {
        match self {
            Message::User { text } | Message::Summary { text } => text.len(),
            Message::Assistant { text, tool_calls } => {
                text.as_ref().map(|t| t.len()).unwrap_or(0)
                    + tool_calls
                        .iter()
                        .map(|c| c.name.len() + c.args.to_string().len())
                        .sum::<usize>()
            }
            Message::ToolResult { payload, .. } => payload.len(),
        }
    }
}

/// The model's next action: either a final text answer (no tool calls) or a
/// set of tool invocations to execute in order.
#[derive(Debug, Clone)]
pub(crate) struct AssistantTurn {
    pub(crate) text: Option<String>,
    pub(crate) tool_calls: Vec<ToolCall>,
}

// ── Capability results ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// Caller-supplied data is malformed; the model can re-supply it.
    InvalidArgument,
    /// The capability's API key or credential is not configured.
    NotConfigured,
    /// The request was valid but matched nothing.
    NotFound,
    /// The upstream service refused for quota/billing reasons.
    RateLimited,
    /// Non-2xx response, timeout, or transport failure from the service.
    UpstreamError,
    /// No credential exists and an interactive consent flow must run.
    AuthRequired,
    /// The credential expired and could not be refreshed.
    AuthExpired,
}

impl FailureKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidArgument => "invalid_argument",
            FailureKind::NotConfigured => "not_configured",
            FailureKind::NotFound => "not_found",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::UpstreamError => "upstream_error",
            FailureKind::AuthRequired => "auth_required",
            FailureKind::AuthExpired => "auth_expired",
        }
    }
}

/// Classified failure from a capability provider. Providers never panic and
/// never return an unclassified error; every failure path lands here.
#[derive(Debug, Clone)]
pub(crate) struct ToolFailure {
    pub(crate) kind: FailureKind,
    pub(crate) message: String,
}

impl ToolFailure {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ToolFailure { kind: FailureKind::InvalidArgument, message: message.into() }
    }

    pub(crate) fn not_configured(message: impl Into<String>) -> Self {
        ToolFailure { kind: FailureKind::NotConfigured, message: message.into() }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        ToolFailure { kind: FailureKind::NotFound, message: message.into() }
    }

    pub(crate) fn rate_limited(message: impl Into<String>) -> Self {
        ToolFailure { kind: FailureKind::RateLimited, message: message.into() }
    }

    pub(crate) fn upstream(message: impl Into<String>) -> Self {
        ToolFailure { kind: FailureKind::UpstreamError, message: message.into() }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ToolFailure {}

/// Classify a non-2xx HTTP status from an external service into the failure
/// taxonomy. `op` names the operation for the message.
pub(crate) fn classify_http(op: &str, code: u16, body: &str) -> ToolFailure {
    let detail: String = body.chars().take(300).collect();
    match code {
        401 => ToolFailure {
            kind: FailureKind::AuthExpired,
            message: format!("{op}: authorization was not accepted ({code}): {detail}"),
        },
        404 => ToolFailure::not_found(format!("{op}: not found ({code}): {detail}")),
        402 | 429 => ToolFailure::rate_limited(format!("{op}: rate limited ({code}): {detail}")),
        _ => ToolFailure::upstream(format!("{op}: service error ({code}): {detail}")),
    }
}

/// Successful provider output: human-readable text plus structured details
/// for logging. The conversation only ever carries the text.
#[derive(Debug, Clone)]
pub(crate) struct ToolReply {
    pub(crate) text: String,
    pub(crate) details: serde_json::Value,
}

impl ToolReply {
    pub(crate) fn plain(text: impl Into<String>) -> Self {
        ToolReply { text: text.into(), details: serde_json::Value::Null }
    }

    pub(crate) fn with_details(text: impl Into<String>, details: serde_json::Value) -> Self {
        ToolReply { text: text.into(), details }
    }
}

/// Final outcome of one tool invocation as recorded in the session.
#[derive(Debug)]
pub(crate) struct ToolExecution {
    pub(crate) output: String,
    pub(crate) details: serde_json::Value,
    pub(crate) is_error: bool,
}

impl ToolExecution {
    pub(crate) fn from_result(result: Result<ToolReply, ToolFailure>) -> Self {
        match result {
            Ok(reply) => ToolExecution {
                output: reply.text,
                details: reply.details,
                is_error: false,
            },
            Err(failure) => ToolExecution {
                output: failure.message.clone(),
                details: serde_json::json!({ "error_kind": failure.kind.as_str() }),
                is_error: true,
            },
        }
    }
}

/// Identity of the authorized account, derived once from the provider and
/// cached on disk so repeated runs skip the lookup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct UserIdentity {
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) email: Option<String>,
}

impl UserIdentity {
    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("User")
    }
}
