//! Content assembly: resolved chain → provider message array.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use tl_domain::capability::ModelCapabilities;
use tl_domain::entity::{ContentPartType, Id, ToolCallPart, ToolCallPartType};
use tl_domain::error::Result;
use tl_domain::message::{ContentBlock, ProviderMessage, Role, ToolCallRef};
use tl_store::files::{FileGroupResolver, FileRendition};
use tl_store::ConversationStore;

use crate::history::ChainEntry;

pub struct ContentAssembler {
    store: Arc<dyn ConversationStore>,
    files: Arc<dyn FileGroupResolver>,
    pdf_end_marker: String,
}

impl ContentAssembler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        files: Arc<dyn FileGroupResolver>,
        pdf_end_marker: impl Into<String>,
    ) -> Self {
        Self {
            store,
            files,
            pdf_end_marker: pdf_end_marker.into(),
        }
    }

    /// Convert `chain` into the messages sent to a model with `caps`.
    ///
    /// Never returns a message with neither content nor tool calls.
    pub async fn assemble(
        &self,
        chain: &[ChainEntry],
        caps: &ModelCapabilities,
    ) -> Result<Vec<ProviderMessage>> {
        let tool_parts = self.load_tool_parts(chain).await?;

        let mut out: Vec<ProviderMessage> = Vec::new();
        for entry in chain {
            let role = entry.message_group.role;
            let mut current = ProviderMessage::new(role);

            for part in &entry.content_parts {
                match part.kind {
                    ContentPartType::Text | ContentPartType::Error => {
                        current.content.push(ContentBlock::text(part.text.clone()));
                    }
                    ContentPartType::File => {
                        let Some(link) = &part.link_id else { continue };
                        for file in self.files.resolve(link).await? {
                            self.push_file(&mut current, &file, caps);
                        }
                    }
                    ContentPartType::Tool => {
                        let Some(link) = &part.link_id else { continue };
                        let Some(parts) = tool_parts.get(link) else { continue };
                        fold_tool_parts(&mut out, &mut current, role, parts);
                    }
                    // Grounding metadata is for the client only.
                    ContentPartType::Meta => {}
                }
            }
            out.push(current);
        }

        for msg in &mut out {
            msg.content.retain(|b| !b.is_empty_text());
        }
        out.retain(|m| !m.is_empty());
        Ok(out)
    }

    /// All tool-call parts linked from the chain, in one batch, keyed by
    /// tool-call group.
    async fn load_tool_parts(&self, chain: &[ChainEntry]) -> Result<HashMap<Id, Vec<ToolCallPart>>> {
        let mut links: Vec<Id> = Vec::new();
        for entry in chain {
            for part in &entry.content_parts {
                if part.kind == ContentPartType::Tool {
                    if let Some(link) = &part.link_id {
                        if !links.contains(link) {
                            links.push(link.clone());
                        }
                    }
                }
            }
        }
        if links.is_empty() {
            return Ok(HashMap::new());
        }

        let known: Vec<Id> = self
            .store
            .tool_call_groups(&links)
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();
        if known.len() < links.len() {
            let missing: Vec<&Id> = links.iter().filter(|l| !known.contains(l)).collect();
            tracing::warn!(?missing, "tool parts link to unknown tool-call groups, skipped");
        }
        if known.is_empty() {
            return Ok(HashMap::new());
        }

        let mut by_group: HashMap<Id, Vec<ToolCallPart>> = HashMap::new();
        for p in self.store.tool_call_parts(&known).await? {
            by_group.entry(p.tool_call_group_id.clone()).or_default().push(p);
        }
        for parts in by_group.values_mut() {
            parts.sort_by_key(|p| p.seq);
        }
        Ok(by_group)
    }

    fn push_file(&self, current: &mut ProviderMessage, file: &FileRendition, caps: &ModelCapabilities) {
        let inline = |media_type: &str, data: &[u8]| ContentBlock::Inline {
            media_type: media_type.to_owned(),
            data: STANDARD.encode(data),
        };

        if !file.is_pdf_like() || caps.native_pdf {
            current.content.push(inline(&file.mime_type, &file.data));
            return;
        }

        let Some(doc) = &file.document else {
            tracing::warn!(
                file = %file.file_name,
                model = %caps.id,
                "no page rendition for PDF, sending it whole"
            );
            current.content.push(inline(&file.mime_type, &file.data));
            return;
        };

        let mut header = format!("<document name=\"{}\">\n{}", file.file_name, doc.info);
        if !doc.outline.is_empty() {
            header.push_str("\nOutline:\n");
            header.push_str(&doc.outline.join("\n"));
        }
        current.content.push(ContentBlock::text(header));

        for page in &doc.pages {
            current.content.push(inline(&page.image_mime, &page.image));
            current.content.push(ContentBlock::text(page.text.clone()));
        }
        current.content.push(ContentBlock::text(self.pdf_end_marker.clone()));
    }
}

/// Interleave one tool-call group's calls and results into the output.
///
/// Parts are grouped by tool-call id in first-seen order. A call goes onto
/// an assistant message, opening a new one unless the current message is an
/// assistant message with nothing in it yet. A result closes the current
/// message, emits a `tool` message, and reopens a message for `owner`.
fn fold_tool_parts(
    out: &mut Vec<ProviderMessage>,
    current: &mut ProviderMessage,
    owner: Role,
    parts: &[ToolCallPart],
) {
    let mut order: Vec<&str> = Vec::new();
    let mut by_call: HashMap<&str, Vec<&ToolCallPart>> = HashMap::new();
    for p in parts {
        let id = p.tool_call_id.as_str();
        if !by_call.contains_key(id) {
            order.push(id);
        }
        by_call.entry(id).or_default().push(p);
    }

    for id in order {
        let fragments = &by_call[id];

        if let Some(call) = fragments.iter().find(|p| p.kind == ToolCallPartType::Call) {
            if current.role != Role::Assistant || !current.is_empty() {
                out.push(std::mem::replace(current, ProviderMessage::new(Role::Assistant)));
            }
            current.tool_calls.push(ToolCallRef {
                id: id.to_owned(),
                name: call.function_name().unwrap_or_default().to_owned(),
                arguments: call.function_arguments().unwrap_or_default().to_owned(),
            });
        }

        if let Some(result) = fragments.iter().find(|p| p.kind == ToolCallPartType::Result) {
            out.push(std::mem::replace(current, ProviderMessage::new(owner)));
            out.push(ProviderMessage::tool_result(id, result.result_text()));
        }
    }
}
