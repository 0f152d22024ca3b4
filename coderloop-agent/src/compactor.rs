//! History compaction
//!
//! Replaces the older part of a transcript with a model-written summary
//! while keeping the most recent messages verbatim.
//!
//! ```text
//! [system] [ head ............ ] [ tail (last N, widened for tool pairs) ]
//!     |            |                          |
//!     v            v                          v
//! [system] [assistant summary]   [ tail, unchanged ]
//! ```
//!
//! The tail is widened backward until no tool result in it answers a call
//! issued in the head, so a compacted transcript never holds an orphaned
//! tool result.

use coderloop_runtime::{
    ChatMessage, CompletionRequest, CompletionResponse, Error, FinishReason, LlmProvider, Result, Role, Transcript,
    Usage,
};
use std::fmt::Write as _;

/// Temperature of the summarization call
pub const SUMMARY_TEMPERATURE: f32 = 0.1;

const TOOL_SNIPPET_CHARS: usize = 240;
/// Budget for rendered tool traffic plus everything that is never clipped
const INPUT_MAX_CHARS: usize = 24_000;

const SUMMARIZER_SYSTEM: &str = "You compress the history of a coding agent's session. \
     Do not invent content.";

const SUMMARIZER_INSTRUCTION: &str = "Summarize the conversation below so the agent can continue its work. \
     Keep the task intent, constraints, decisions made, files created or changed (with paths), \
     commands run and their outcomes, and any open issues. \
     State tool outcomes in one line each; do not reproduce raw code or tool payloads. \
     Be terse.";

/// Result of one compaction attempt
#[derive(Debug, Clone)]
pub struct Compaction {
    pub transcript: Transcript,
    /// Messages folded into the summary (0 when nothing changed)
    pub summarized: usize,
    /// Messages kept verbatim
    pub tail: usize,
    /// Usage of the summarization call, if one was made
    pub usage: Option<Usage>,
    /// Summary text placed in the transcript
    pub summary: Option<String>,
    /// Head as rendered for the summarizer
    pub input: Option<String>,
}

impl Compaction {
    fn unchanged(transcript: &Transcript, tail: usize) -> Self {
        Self {
            transcript: transcript.clone(),
            summarized: 0,
            tail,
            usage: None,
            summary: None,
            input: None,
        }
    }

    pub fn changed(&self) -> bool {
        self.summarized > 0
    }
}

/// A summarization call ready to send, with the split it was built for
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    pub request: CompletionRequest,
    /// Head as rendered into the request
    pub input: String,
    boundary: usize,
    summarized: usize,
}

#[derive(Debug, Clone)]
pub struct Compactor {
    tail_length: usize,
    summary_max_tokens: usize,
    model: Option<String>,
}

impl Compactor {
    pub fn new(tail_length: usize, summary_max_tokens: usize) -> Self {
        Self {
            tail_length,
            summary_max_tokens,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn tail_length(&self) -> usize {
        self.tail_length
    }

    /// Summarize the head of `transcript` and rebuild it around the tail
    pub async fn compact<P: LlmProvider>(&self, provider: &P, transcript: &Transcript) -> Result<Compaction> {
        let Some(plan) = self.plan(transcript) else {
            let start = usize::from(transcript.system().is_some());
            let boundary = split_boundary(transcript.messages(), start, self.tail_length);
            return Ok(Compaction::unchanged(transcript, transcript.len() - boundary));
        };
        let response = provider.complete(plan.request.clone()).await;
        self.apply(transcript, plan, response)
    }

    /// Build the summarization request, or `None` when the head holds
    /// nothing a summary would shrink
    pub fn plan(&self, transcript: &Transcript) -> Option<CompactionPlan> {
        let messages = transcript.messages();
        let start = usize::from(transcript.system().is_some());
        let boundary = split_boundary(messages, start, self.tail_length);
        let head = &messages[start..boundary];

        if head.is_empty() || (head.len() == 1 && head[0].summary) {
            tracing::debug!(tail = messages.len() - boundary, "nothing to compact");
            return None;
        }

        tracing::info!(
            head = head.len(),
            tail = messages.len() - boundary,
            requested_tail = self.tail_length,
            "compacting history"
        );

        let input = render_head(head);
        let mut request = CompletionRequest::new(vec![
            ChatMessage::system(SUMMARIZER_SYSTEM),
            ChatMessage::user(format!("{}\n\n---\n\n{}", SUMMARIZER_INSTRUCTION, input)),
        ])
        .with_temperature(SUMMARY_TEMPERATURE)
        .with_max_tokens(self.summary_max_tokens);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }

        Some(CompactionPlan {
            request,
            input,
            boundary,
            summarized: head.len(),
        })
    }

    /// Check the summarizer's reply and rebuild `[system?, summary, tail...]`
    pub fn apply(
        &self,
        transcript: &Transcript,
        plan: CompactionPlan,
        response: Result<CompletionResponse>,
    ) -> Result<Compaction> {
        let response = response.map_err(|e| {
            Error::compaction_failed(format!("summarization request failed: {}", e.message()))
                .with_operation("compactor::compact")
                .set_source(e)
        })?;

        if response.finish_reason == FinishReason::Length {
            return Err(Error::compaction_failed("summary was truncated")
                .with_operation("compactor::compact")
                .with_context("max_tokens", self.summary_max_tokens.to_string()));
        }
        if response.has_tool_calls() {
            return Err(Error::compaction_failed("summarizer replied with tool calls")
                .with_operation("compactor::compact"));
        }
        if response.finish_reason != FinishReason::Stop {
            return Err(Error::compaction_failed(format!(
                "summarizer stopped with finish reason '{}'",
                response.finish_reason.as_str()
            ))
            .with_operation("compactor::compact"));
        }
        let summary = response.content.as_deref().map(str::trim).unwrap_or("");
        if summary.is_empty() {
            return Err(Error::compaction_failed("summary is empty").with_operation("compactor::compact"));
        }

        let tail = &transcript.messages()[plan.boundary..];
        let mut rebuilt = Vec::with_capacity(tail.len() + 2);
        if let Some(system) = transcript.system() {
            rebuilt.push(system.clone());
        }
        rebuilt.push(ChatMessage::summary(format!("Summary of earlier work:\n{}", summary)));
        rebuilt.extend(tail.iter().cloned());

        Ok(Compaction {
            transcript: Transcript::from_messages(rebuilt),
            summarized: plan.summarized,
            tail: tail.len(),
            usage: Some(response.usage),
            summary: Some(summary.to_string()),
            input: Some(plan.input),
        })
    }
}

/// Index of the first tail message.
///
/// Starts at `len - tail_length` (never before `start`) and moves backward
/// to the issuing assistant message whenever a tool result in the tail
/// belongs to a turn that began in the head. A tool result belongs to the
/// nearest assistant message before it, so reused call ids cannot mix turns.
pub fn split_boundary(messages: &[ChatMessage], start: usize, tail_length: usize) -> usize {
    let mut boundary = messages.len().saturating_sub(tail_length).max(start).min(messages.len());

    loop {
        let earliest = (boundary..messages.len())
            .filter(|&i| messages[i].role == Role::Tool)
            .filter_map(|i| issuing_turn(messages, i))
            .filter(|&turn| turn >= start && turn < boundary)
            .min();

        match earliest {
            Some(turn) => boundary = turn,
            None => return boundary,
        }
    }
}

/// Nearest assistant message before `index`
fn issuing_turn(messages: &[ChatMessage], index: usize) -> Option<usize> {
    messages[..index].iter().rposition(|m| m.role == Role::Assistant)
}

/// Plain-text rendering of the head for the summarizer.
///
/// User, system and summary messages carry the task and earlier decisions
/// and are always rendered whole. Only tool payloads and call arguments are
/// clipped, and when the total still runs over budget, tool traffic from the
/// middle of the head is dropped.
fn render_head(head: &[ChatMessage]) -> String {
    let blocks: Vec<(bool, String)> = head.iter().map(|m| (is_pinned(m), render_message(m))).collect();

    let pinned: usize = blocks.iter().filter(|(p, _)| *p).map(|(_, b)| b.chars().count()).sum();
    let loose: usize = blocks.iter().filter(|(p, _)| !*p).map(|(_, b)| b.chars().count()).sum();
    let budget = INPUT_MAX_CHARS.saturating_sub(pinned);
    if loose <= budget {
        return blocks.into_iter().map(|(_, b)| b).collect();
    }

    // keep loose blocks from both ends, two thirds of the budget up front
    let mut keep = vec![false; blocks.len()];
    let mut front = budget * 2 / 3;
    for (i, (pinned, block)) in blocks.iter().enumerate() {
        let len = block.chars().count();
        if *pinned {
            keep[i] = true;
        } else if len <= front {
            front -= len;
            keep[i] = true;
        } else {
            break;
        }
    }
    let mut back = budget - budget * 2 / 3;
    for (i, (pinned, block)) in blocks.iter().enumerate().rev() {
        let len = block.chars().count();
        if *pinned || keep[i] {
            keep[i] = true;
        } else if len <= back {
            back -= len;
            keep[i] = true;
        } else {
            break;
        }
    }

    let mut text = String::new();
    let mut omitted = 0;
    for ((pinned, block), kept) in blocks.iter().zip(&keep) {
        if *kept || *pinned {
            if omitted > 0 {
                let _ = write!(text, "[... {} tool messages omitted ...]\n\n", omitted);
                omitted = 0;
            }
            text.push_str(block);
        } else {
            omitted += 1;
        }
    }
    if omitted > 0 {
        let _ = write!(text, "[... {} tool messages omitted ...]\n\n", omitted);
    }
    text
}

fn is_pinned(message: &ChatMessage) -> bool {
    matches!(message.role, Role::System | Role::User) || message.summary
}

fn render_message(message: &ChatMessage) -> String {
    let mut text = String::new();
    match message.role {
        Role::System => {
            let _ = write!(text, "System: {}\n\n", message.text());
        }
        Role::User => {
            let _ = write!(text, "User: {}\n\n", message.text());
        }
        Role::Assistant => {
            let label = if message.summary { "Earlier summary" } else { "Assistant" };
            if !message.text().trim().is_empty() {
                let _ = write!(text, "{}: {}\n\n", label, message.text());
            }
            for call in message.calls() {
                let _ = write!(
                    text,
                    "Assistant: [called {} {}]\n\n",
                    call.name,
                    truncate_chars(&call.arguments, TOOL_SNIPPET_CHARS)
                );
            }
        }
        Role::Tool => {
            let _ = write!(
                text,
                "Tool result ({}): {}\n\n",
                message.name.as_deref().unwrap_or("unknown"),
                truncate_chars(message.text(), TOOL_SNIPPET_CHARS)
            );
        }
    }
    text
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderloop_runtime::ToolCall;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "read_file", r#"{"path":"a.txt"}"#)
    }

    fn result(id: &str) -> ChatMessage {
        ChatMessage::tool_result(id, "read_file", r#"{"status":"success"}"#)
    }

    /// system, user, then `turns` turns of (assistant with 2 calls, 2 results)
    fn history(turns: usize) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("build it")];
        for t in 0..turns {
            let a = format!("t{}a", t);
            let b = format!("t{}b", t);
            messages.push(ChatMessage::assistant_tool_calls(None, vec![call(&a), call(&b)]));
            messages.push(result(&a));
            messages.push(result(&b));
        }
        messages
    }

    #[test]
    fn test_boundary_plain_tail() {
        let messages = vec![
            ChatMessage::system("s"),
            ChatMessage::user("u1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("u2"),
            ChatMessage::assistant("a2"),
        ];
        assert_eq!(split_boundary(&messages, 1, 2), 3);
        assert_eq!(split_boundary(&messages, 1, 10), 1);
        assert_eq!(split_boundary(&messages, 1, 0), 5);
    }

    #[test]
    fn test_boundary_moves_to_issuing_assistant() {
        let messages = history(3);
        // len 11; tail 1 would start on the last tool result of turn 2
        assert_eq!(split_boundary(&messages, 1, 1), 8);
        // tail 3 = exactly the last turn
        assert_eq!(split_boundary(&messages, 1, 3), 8);
        // tail 4 starts on the last result of turn 1
        assert_eq!(split_boundary(&messages, 1, 4), 5);
    }

    #[test]
    fn test_boundary_keeps_pairs_for_every_tail_length() {
        for turns in 0..5 {
            let messages = history(turns);
            for n in 0..=messages.len() + 1 {
                let boundary = split_boundary(&messages, 1, n);
                let mut kept = vec![messages[0].clone()];
                kept.extend(messages[boundary..].iter().cloned());
                assert!(
                    Transcript::from_messages(kept).check_tool_pairing().is_ok(),
                    "turns {} tail {} boundary {}",
                    turns,
                    n,
                    boundary
                );
                assert!(messages.len() - boundary >= n.min(messages.len() - 1));
            }
        }
    }

    #[test]
    fn test_boundary_with_reused_call_ids() {
        // every turn calls `call_0`
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("build it")];
        for _ in 0..3 {
            messages.push(ChatMessage::assistant_tool_calls(None, vec![call("call_0")]));
            messages.push(result("call_0"));
        }
        // len 8; tail 1 starts on the last result, whose turn is at 6
        assert_eq!(split_boundary(&messages, 1, 1), 6);
        assert_eq!(split_boundary(&messages, 1, 2), 6);
        assert_eq!(split_boundary(&messages, 1, 3), 4);

        for n in 0..=messages.len() {
            let boundary = split_boundary(&messages, 1, n);
            let mut kept = vec![messages[0].clone(), ChatMessage::summary("s")];
            kept.extend(messages[boundary..].iter().cloned());
            assert!(Transcript::from_messages(kept).check_tool_pairing().is_ok(), "tail {}", n);
        }
    }

    #[test]
    fn test_render_head() {
        let head = vec![
            ChatMessage::user("make a todo app"),
            ChatMessage::assistant_tool_calls(Some("on it".into()), vec![call("c1")]),
            result("c1"),
            ChatMessage::summary("earlier"),
        ];
        let text = render_head(&head);
        assert!(text.contains("User: make a todo app"));
        assert!(text.contains("Assistant: on it"));
        assert!(text.contains("[called read_file {\"path\":\"a.txt\"}]"));
        assert!(text.contains("Tool result (read_file):"));
        assert!(text.contains("Earlier summary: earlier"));
    }

    #[test]
    fn test_render_head_drops_middle_tool_traffic() {
        let mut head = vec![ChatMessage::user("make a todo app")];
        for i in 0..200 {
            let id = format!("c{}", i);
            head.push(ChatMessage::assistant_tool_calls(None, vec![call(&id)]));
            head.push(ChatMessage::tool_result(&id, "read_file", "y".repeat(500)));
        }
        head.push(ChatMessage::user("also add tests"));

        let text = render_head(&head);
        assert!(text.contains("tool messages omitted"));
        assert!(text.starts_with("User: make a todo app"));
        assert!(text.contains("User: also add tests"));
        assert!(text.chars().count() <= INPUT_MAX_CHARS + 200);
    }

    #[test]
    fn test_render_head_keeps_brief_and_summary_whole() {
        let brief = format!("{}BRIEF_TAIL_REQUIREMENT", "b".repeat(1200));
        let earlier = format!("{}END_OF_PRIOR_SUMMARY", "s".repeat(3000));
        let head = vec![
            ChatMessage::user(brief.clone()),
            ChatMessage::summary(earlier.clone()),
            ChatMessage::tool_result("c1", "read_file", "z".repeat(1000)),
        ];

        let text = render_head(&head);
        assert!(text.contains(&brief));
        assert!(text.contains(&earlier));
        // tool payloads are still clipped
        assert!(!text.contains(&"z".repeat(TOOL_SNIPPET_CHARS + 1)));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 3), "hi");
    }
}
