//! Wire types for the document-analysis service.
//!
//! Messages follow the messages-style tool-use format: assistant turns carry
//! `tool_use` blocks, the following user turn carries one `tool_result` per
//! call.

use serde::{Deserialize, Serialize};

use super::tools::ToolName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }
}

/// The growing conversation. Owned by the loop and only ever appended to.
///
/// Roles strictly alternate and no turn is empty: empty messages are
/// dropped and a message from the same role as the last turn is folded
/// into that turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        if message.content.is_empty() {
            return;
        }
        match self.messages.last_mut() {
            Some(last) if last.role == message.role => last.content.extend(message.content),
            _ => self.messages.push(message),
        }
    }

    pub fn last_role(&self) -> Option<Role> {
        self.messages.last().map(|m| m.role)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn is_submission(&self) -> bool {
        ToolName::from_str(&self.name) == Some(ToolName::SubmitEntries)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One service round: token usage, tool invocations and any free text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceResponse {
    pub usage: Usage,
    pub tool_calls: Vec<ToolCall>,
    pub text: Option<String>,
}

impl ServiceResponse {
    pub fn submission(&self) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|c| c.is_submission())
    }

    /// Submit calls after the first; each still needs a `tool_result`.
    pub fn extra_submissions(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|c| c.is_submission()).skip(1)
    }

    /// Investigative calls, i.e. everything but the terminal submit.
    pub fn investigations(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|c| !c.is_submission())
    }

    /// The assistant turn to append to the conversation.
    pub fn to_message(&self) -> Message {
        let mut content = Vec::new();
        if let Some(text) = self.text.as_ref().filter(|t| !t.trim().is_empty()) {
            content.push(ContentBlock::text(text.clone()));
        }
        content.extend(self.tool_calls.iter().map(|c| ContentBlock::ToolUse {
            id: c.id.clone(),
            name: c.name.clone(),
            input: c.input.clone(),
        }));
        Message::assistant(content)
    }
}

/// Binary image attached to a tool result, already base64-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolImage {
    pub media_type: String,
    pub data: String,
}

/// What a capability executor returns for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub image: Option<ToolImage>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
            is_error: true,
        }
    }

    /// Feed the output back verbatim as a `tool_result` block.
    pub fn into_block(self, tool_use_id: &str) -> ContentBlock {
        let mut content = vec![ContentBlock::text(self.text)];
        if let Some(image) = self.image {
            content.push(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64".into(),
                    media_type: image.media_type,
                    data: image.data,
                },
            });
        }
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content,
            is_error: self.is_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One request: fixed instructions, fixed tool schema, the conversation so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub tools: Vec<ToolDefinition>,
    pub messages: Vec<Message>,
}

impl AnalysisRequest {
    /// Text of the final user turn, if it has any.
    pub fn last_user_text(&self) -> Option<String> {
        let last = self.messages.iter().rev().find(|m| m.role == Role::User)?;
        let text: Vec<&str> = last
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!text.is_empty()).then(|| text.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_use_block_serializes_tagged() {
        let block = ContentBlock::ToolUse {
            id: "t1".into(),
            name: "read_page_text".into(),
            input: json!({"page": 2}),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["input"]["page"], 2);
    }

    #[test]
    fn tool_output_with_image_becomes_nested_blocks() {
        let output = ToolOutput {
            text: "page 3".into(),
            image: Some(ToolImage {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            }),
            is_error: false,
        };
        let ContentBlock::ToolResult { content, is_error, .. } = output.into_block("t9") else {
            panic!("expected tool_result");
        };
        assert!(!is_error);
        assert_eq!(content.len(), 2);
        let value = serde_json::to_value(&content[1]).unwrap();
        assert_eq!(value["source"]["type"], "base64");
    }

    #[test]
    fn response_splits_submission_from_investigations() {
        let response = ServiceResponse {
            usage: Usage::default(),
            tool_calls: vec![
                ToolCall {
                    id: "a".into(),
                    name: "read_page_text".into(),
                    input: json!({"page": 1}),
                },
                ToolCall {
                    id: "b".into(),
                    name: "submit_entries".into(),
                    input: json!({"entries": [], "confidence": 0.5}),
                },
            ],
            text: Some("  ".into()),
        };
        assert_eq!(response.submission().map(|c| c.id.as_str()), Some("b"));
        assert_eq!(response.investigations().count(), 1);
        // Blank text is not echoed back.
        assert_eq!(response.to_message().content.len(), 2);
    }

    #[test]
    fn conversation_folds_same_role_and_drops_empty_turns() {
        let mut conversation = Conversation::new();
        conversation.append(Message::user_text("start"));
        conversation.append(Message::assistant(Vec::new()));
        conversation.append(Message::user_text("nudge"));
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0].content.len(), 2);

        conversation.append(Message::assistant(vec![ContentBlock::text("a")]));
        conversation.append(Message::assistant(vec![ContentBlock::text("b")]));
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last_role(), Some(Role::Assistant));
    }

    #[test]
    fn extra_submissions_skip_the_first() {
        let submit = |id: &str| ToolCall {
            id: id.into(),
            name: "submit_entries".into(),
            input: json!({"entries": [], "confidence": 0.3}),
        };
        let response = ServiceResponse {
            tool_calls: vec![submit("s1"), submit("s2")],
            ..ServiceResponse::default()
        };
        assert_eq!(response.submission().map(|c| c.id.as_str()), Some("s1"));
        let extra: Vec<_> = response.extra_submissions().map(|c| c.id.as_str()).collect();
        assert_eq!(extra, vec!["s2"]);
    }

    #[test]
    fn conversation_is_append_only() {
        let mut conversation = Conversation::new();
        assert!(conversation.is_empty());
        conversation.append(Message::user_text("hello"));
        conversation.append(Message::assistant(vec![ContentBlock::text("hi")]));
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[0].role, Role::User);
    }
}
