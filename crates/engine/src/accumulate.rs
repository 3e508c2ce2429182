//! Tool-call accumulation: folding raw deltas into a per-stream stock.
//!
//! The stock is owned by exactly one stream task and folded strictly in
//! arrival order. Persisting it is the commit coordinator's job; the fold
//! only reports when a flush is due.

use std::collections::HashMap;

use serde_json::{json, Value};

use tl_domain::delta::Delta;
use tl_domain::entity::{ContentPartType, Id, ToolCallPartType};

/// One buffered piece of message content, persisted as one content part.
#[derive(Debug, Clone, PartialEq)]
pub enum StockChunk {
    Text(String),
    /// Bootstrap bodies of the tool calls this part covers.
    Tool(Vec<Value>),
    /// Grounding metadata, never merged with neighbours.
    Meta(Value),
}

impl StockChunk {
    pub fn kind(&self) -> ContentPartType {
        match self {
            StockChunk::Text(_) => ContentPartType::Text,
            StockChunk::Tool(_) => ContentPartType::Tool,
            StockChunk::Meta(_) => ContentPartType::Meta,
        }
    }

    /// Text stored in the content part.
    pub fn text(&self) -> String {
        match self {
            StockChunk::Text(t) => t.clone(),
            StockChunk::Tool(bodies) => Value::Array(bodies.clone()).to_string(),
            StockChunk::Meta(v) => v.to_string(),
        }
    }

    /// Tool-call ids a `Tool` chunk covers, in order.
    pub fn tool_call_ids(&self) -> Vec<&str> {
        match self {
            StockChunk::Tool(bodies) => bodies.iter().filter_map(tool_call_id_of).collect(),
            _ => Vec::new(),
        }
    }
}

/// One buffered tool-call fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFragment {
    pub tool_call_id: String,
    pub kind: ToolCallPartType,
    pub body: Value,
    /// Arrival index within the stream.
    pub seq: i32,
}

fn tool_call_id_of(body: &Value) -> Option<&str> {
    body.get("toolCallId").and_then(Value::as_str)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Not-yet-persisted output of one stream.
#[derive(Debug, Default)]
pub struct StreamStock {
    chunks: Vec<StockChunk>,
    fragments: Vec<ToolFragment>,
    /// toolCallId → tool-call group, `None` until a flush binds it.
    tool_master: HashMap<String, Option<Id>>,
    /// Index into `fragments` of the most recently opened CALL.
    last_call: Option<usize>,
    /// Arrival counter; survives flushes.
    next_seq: i32,
}

impl StreamStock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[StockChunk] {
        &self.chunks
    }

    pub fn fragments(&self) -> &[ToolFragment] {
        &self.fragments
    }

    /// Nothing buffered. Bindings are not buffered state.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.fragments.is_empty()
    }

    /// The tool-call group a tool-call id is bound to.
    pub fn group_of(&self, tool_call_id: &str) -> Option<&Id> {
        self.tool_master.get(tool_call_id).and_then(Option::as_ref)
    }

    /// Buffered tool-call ids with no group yet, first-seen order.
    pub fn unbound_ids(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let referenced = self
            .chunks
            .iter()
            .flat_map(|c| c.tool_call_ids())
            .chain(self.fragments.iter().map(|f| f.tool_call_id.as_str()));
        for id in referenced {
            if self.group_of(id).is_none() && !out.iter().any(|o| o == id) {
                out.push(id.to_owned());
            }
        }
        out
    }

    /// Record committed bindings.
    pub fn bind(&mut self, tool_call_ids: &[String], group_id: &Id) {
        for id in tool_call_ids {
            self.tool_master.insert(id.clone(), Some(group_id.clone()));
        }
    }

    /// Drop buffered chunks and fragments after a successful commit.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.fragments.clear();
        self.last_call = None;
    }

    // ── Fold ────────────────────────────────────────────────────────

    /// Fold one delta. Returns `true` when the delta carries a terminal
    /// finish reason and the stock must be flushed before it is forwarded.
    pub fn fold(&mut self, delta: &Delta) -> bool {
        for choice in &delta.choices {
            let body = &choice.delta;
            match body.role.as_deref() {
                Some("info") => self.bootstrap(ToolCallPartType::Info, body.content.as_deref()),
                Some("command") => {
                    self.bootstrap(ToolCallPartType::Command, body.content.as_deref())
                }
                Some("tool") => self.result(body.tool_call_id.as_deref(), body.content.as_deref()),
                _ => {
                    if let Some(text) = body.content.as_deref().filter(|t| !t.is_empty()) {
                        self.push_text(text);
                    }
                }
            }

            for tc in body.tool_calls.iter().flatten() {
                let args = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.as_deref())
                    .unwrap_or_default();
                match tc.id.as_deref().filter(|id| !id.is_empty()) {
                    Some(id) => {
                        let name = tc
                            .function
                            .as_ref()
                            .and_then(|f| f.name.as_deref())
                            .unwrap_or_default();
                        self.open_call(id, name, args);
                    }
                    None => self.continue_call(args),
                }
            }
        }

        if let Some(meta) = &delta.grounding_metadata {
            self.chunks.push(StockChunk::Meta(meta.clone()));
        }

        delta.finish_reason().is_some()
    }

    fn push_text(&mut self, text: &str) {
        match self.chunks.last_mut() {
            Some(StockChunk::Text(buf)) => buf.push_str(text),
            _ => self.chunks.push(StockChunk::Text(text.to_owned())),
        }
    }

    /// Append a bootstrap body to the current tool chunk, opening one if
    /// the last chunk is not a tool chunk.
    fn push_tool_body(&mut self, body: Value) {
        match self.chunks.last_mut() {
            Some(StockChunk::Tool(bodies)) => bodies.push(body),
            _ => self.chunks.push(StockChunk::Tool(vec![body])),
        }
    }

    fn record(&mut self, tool_call_id: &str, kind: ToolCallPartType, body: Value) -> usize {
        self.tool_master.entry(tool_call_id.to_owned()).or_insert(None);
        self.fragments.push(ToolFragment {
            tool_call_id: tool_call_id.to_owned(),
            kind,
            body,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.fragments.len() - 1
    }

    fn bootstrap(&mut self, kind: ToolCallPartType, content: Option<&str>) {
        let parsed: Option<Value> = content.and_then(|c| serde_json::from_str(c).ok());
        let Some(body) = parsed else {
            tracing::warn!(?kind, "tool bootstrap delta without a JSON body, ignored");
            return;
        };
        let Some(id) = tool_call_id_of(&body).map(String::from) else {
            tracing::warn!(?kind, "tool bootstrap delta without toolCallId, ignored");
            return;
        };
        self.push_tool_body(body.clone());
        self.record(&id, kind, body);
    }

    fn open_call(&mut self, id: &str, name: &str, args: &str) {
        // Providers without a tool runtime never send a bootstrap; give the
        // call a tool chunk of its own so a content part links to it.
        if !self.tool_master.contains_key(id) {
            self.push_tool_body(json!({ "toolCallId": id }));
        }
        let body = json!({
            "id": id,
            "type": "function",
            "function": { "name": name, "arguments": args },
        });
        let idx = self.record(id, ToolCallPartType::Call, body);
        self.last_call = Some(idx);
    }

    /// Continuation chunks carry no id; they extend the most recently
    /// opened CALL.
    // TODO: match continuations by `index` once interleaved parallel calls
    // need to be supported.
    fn continue_call(&mut self, args: &str) {
        if args.is_empty() {
            return;
        }
        let Some(idx) = self.last_call else {
            tracing::warn!("tool-call continuation with no open call, arguments dropped");
            return;
        };
        let fragment = &mut self.fragments[idx];
        if let Some(slot) = fragment.body.pointer_mut("/function/arguments") {
            let mut joined = slot.as_str().unwrap_or_default().to_owned();
            joined.push_str(args);
            *slot = Value::String(joined);
        }
    }

    fn result(&mut self, tool_call_id: Option<&str>, content: Option<&str>) {
        let Some(id) = tool_call_id.filter(|id| !id.is_empty()) else {
            tracing::warn!("tool result delta without tool_call_id, ignored");
            return;
        };
        let body = json!({ "tool_call_id": id, "content": content.unwrap_or_default() });
        self.record(id, ToolCallPartType::Result, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> Delta {
        Delta::info(&json!({ "toolCallId": id }))
    }

    #[test]
    fn text_deltas_concatenate() {
        let mut stock = StreamStock::new();
        assert!(!stock.fold(&Delta::text("Hel")));
        assert!(!stock.fold(&Delta::text("lo")));
        assert_eq!(stock.chunks(), &[StockChunk::Text("Hello".into())]);
    }

    #[test]
    fn continuation_merges_into_last_call() {
        let mut stock = StreamStock::new();
        stock.fold(&Delta::tool_call_start("t1", "f", ""));
        stock.fold(&Delta::tool_call_args("ab"));
        stock.fold(&Delta::tool_call_args("cd"));

        let calls: Vec<_> = stock
            .fragments()
            .iter()
            .filter(|f| f.kind == ToolCallPartType::Call)
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body["function"]["arguments"], "abcd");
    }

    #[test]
    fn continuation_targets_most_recent_call_not_id() {
        let mut stock = StreamStock::new();
        stock.fold(&Delta::tool_call_start("a", "f", "1"));
        stock.fold(&Delta::tool_call_start("b", "g", "2"));
        stock.fold(&Delta::tool_call_args("3"));

        let frag = |id: &str| {
            stock
                .fragments()
                .iter()
                .find(|f| f.tool_call_id == id && f.kind == ToolCallPartType::Call)
                .unwrap()
                .body["function"]["arguments"]
                .clone()
        };
        assert_eq!(frag("a"), "1");
        assert_eq!(frag("b"), "23");
    }

    #[test]
    fn info_and_call_share_one_tool_chunk() {
        let mut stock = StreamStock::new();
        stock.fold(&info("x"));
        stock.fold(&Delta::tool_call_start("x", "f", ""));

        assert_eq!(stock.chunks().len(), 1);
        assert_eq!(stock.chunks()[0].tool_call_ids(), vec!["x"]);
        assert_eq!(stock.unbound_ids(), vec!["x".to_string()]);
    }

    #[test]
    fn grounding_is_never_merged_with_text() {
        let mut stock = StreamStock::new();
        stock.fold(&Delta::text("a"));
        stock.fold(&Delta::grounding(json!({ "webSearchQueries": ["q"] })));
        stock.fold(&Delta::text("b"));

        let kinds: Vec<_> = stock.chunks().iter().map(StockChunk::kind).collect();
        assert_eq!(
            kinds,
            vec![ContentPartType::Text, ContentPartType::Meta, ContentPartType::Text]
        );
    }

    #[test]
    fn command_is_recorded_like_info() {
        let mut stock = StreamStock::new();
        stock.fold(&Delta::command(&json!({ "toolCallId": "c1", "command": "ls" })));
        assert_eq!(stock.fragments()[0].kind, ToolCallPartType::Command);
        assert_eq!(stock.chunks()[0].kind(), ContentPartType::Tool);
    }

    #[test]
    fn finish_only_delta_requests_flush() {
        let mut stock = StreamStock::new();
        assert!(stock.fold(&Delta::finish("stop")));
        assert!(stock.is_empty());
    }

    #[test]
    fn fragment_seq_survives_clear_and_bindings_persist() {
        let mut stock = StreamStock::new();
        stock.fold(&info("x"));
        stock.bind(&stock.unbound_ids(), &"g1".to_string());
        stock.clear();

        stock.fold(&Delta::tool_result("x", "42"));
        assert_eq!(stock.fragments()[0].seq, 1);
        assert_eq!(stock.group_of("x").map(String::as_str), Some("g1"));
        assert!(stock.unbound_ids().is_empty());
    }

    #[test]
    fn malformed_bootstrap_is_ignored() {
        let mut stock = StreamStock::new();
        let mut d = Delta::text("not json");
        d.choices[0].delta.role = Some("info".into());
        stock.fold(&d);
        assert!(stock.is_empty());
    }
}
