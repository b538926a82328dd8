//! The fixed tool schema and the capability executor behind it.

use std::path::Path;

use base64::Engine;
use serde_json::json;

use super::types::{ToolDefinition, ToolImage, ToolOutput};
use crate::pipeline::types::Page;

/// Longest page text returned by one `read_page_text` call.
const MAX_PAGE_CHARS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    ListDocuments,
    ReadPageText,
    ViewPageImage,
    SubmitEntries,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListDocuments => "list_documents",
            Self::ReadPageText => "read_page_text",
            Self::ViewPageImage => "view_page_image",
            Self::SubmitEntries => "submit_entries",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "list_documents" => Some(Self::ListDocuments),
            "read_page_text" => Some(Self::ReadPageText),
            "view_page_image" => Some(Self::ViewPageImage),
            "submit_entries" => Some(Self::SubmitEntries),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SubmitEntries)
    }
}

/// Three read-only investigative tools plus the one terminal submit.
pub fn tool_schema() -> Vec<ToolDefinition> {
    let page_arg = json!({
        "type": "object",
        "properties": {"page": {"type": "integer", "minimum": 1}},
        "required": ["page"]
    });

    vec![
        ToolDefinition {
            name: ToolName::ListDocuments.as_str().into(),
            description: "List the pages of the bid set with their text length and whether a rendered image exists.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: ToolName::ReadPageText.as_str().into(),
            description: "Return the extracted plain text of one page.".into(),
            input_schema: page_arg.clone(),
        },
        ToolDefinition {
            name: ToolName::ViewPageImage.as_str().into(),
            description: "Return the rendered image of one page for visual inspection.".into(),
            input_schema: page_arg,
        },
        ToolDefinition {
            name: ToolName::SubmitEntries.as_str().into(),
            description: "Submit the final signage takeoff. Call exactly once when done.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "entries": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "room_number": {"type": "string"},
                                "identifier": {"type": "string"},
                                "name": {"type": "string"},
                                "sign_type": {"type": "string"},
                                "quantity": {"type": "integer", "minimum": 1},
                                "is_grouped": {"type": "boolean"},
                                "group_range": {"type": "array", "items": {"type": "integer"}, "minItems": 2, "maxItems": 2},
                                "confidence": {"type": "number"},
                                "pages": {"type": "array", "items": {"type": "integer"}},
                                "notes": {"type": "string"}
                            },
                            "required": ["name"]
                        }
                    },
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                    "notes": {"type": "string"}
                },
                "required": ["entries", "confidence"]
            }),
        },
    ]
}

/// Runs one investigative tool call. Calls within a round share no state and
/// may run on separate threads.
pub trait ToolExecutor: Send + Sync {
    fn execute(&self, tool: &str, input: &serde_json::Value, document_root: &Path) -> ToolOutput;
}

/// Serves page text from memory and page images from `page-<n>.png` files
/// under the document root.
#[derive(Debug, Clone, Default)]
pub struct PageStoreExecutor {
    pages: Vec<Page>,
}

impl PageStoreExecutor {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    fn page(&self, input: &serde_json::Value) -> Result<&Page, String> {
        let number = input
            .get("page")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| "Missing integer argument 'page'".to_string())?;
        self.pages
            .iter()
            .find(|p| u64::from(p.page_number) == number)
            .ok_or_else(|| format!("No page {number} (document has {} pages)", self.pages.len()))
    }

    fn list_documents(&self, document_root: &Path) -> ToolOutput {
        if self.pages.is_empty() {
            return ToolOutput::text("The document has no pages.");
        }
        let lines: Vec<String> = self
            .pages
            .iter()
            .map(|p| {
                let rendered = image_path(document_root, p.page_number).is_file();
                format!(
                    "page {}: {} chars{}",
                    p.page_number,
                    p.text.chars().count(),
                    if rendered { ", image available" } else { "" }
                )
            })
            .collect();
        ToolOutput::text(lines.join("\n"))
    }

    fn read_page_text(&self, input: &serde_json::Value) -> ToolOutput {
        match self.page(input) {
            Ok(page) if page.text.trim().is_empty() => {
                ToolOutput::text(format!("Page {} has no extractable text.", page.page_number))
            }
            Ok(page) => {
                let text: String = page.text.chars().take(MAX_PAGE_CHARS).collect();
                ToolOutput::text(text)
            }
            Err(e) => ToolOutput::error(e),
        }
    }

    fn view_page_image(&self, input: &serde_json::Value, document_root: &Path) -> ToolOutput {
        let page = match self.page(input) {
            Ok(page) => page,
            Err(e) => return ToolOutput::error(e),
        };
        let path = image_path(document_root, page.page_number);
        match std::fs::read(&path) {
            Ok(bytes) => ToolOutput {
                text: format!("Rendered image of page {}", page.page_number),
                image: Some(ToolImage {
                    media_type: "image/png".into(),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                }),
                is_error: false,
            },
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Page image unavailable");
                ToolOutput::error(format!("No rendered image for page {}", page.page_number))
            }
        }
    }
}

fn image_path(document_root: &Path, page: u32) -> std::path::PathBuf {
    document_root.join(format!("page-{page}.png"))
}

impl ToolExecutor for PageStoreExecutor {
    fn execute(&self, tool: &str, input: &serde_json::Value, document_root: &Path) -> ToolOutput {
        match ToolName::from_str(tool) {
            Some(ToolName::ListDocuments) => self.list_documents(document_root),
            Some(ToolName::ReadPageText) => self.read_page_text(input),
            Some(ToolName::ViewPageImage) => self.view_page_image(input, document_root),
            Some(ToolName::SubmitEntries) => {
                ToolOutput::error("submit_entries is handled by the loop, not the executor")
            }
            None => ToolOutput::error(format!("Unknown tool '{tool}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_executor() -> PageStoreExecutor {
        PageStoreExecutor::new(vec![
            Page::new(1, "SIGNAGE SCHEDULE\nA1  ROOM ID  4"),
            Page::new(2, ""),
        ])
    }

    #[test]
    fn schema_has_single_terminal_tool() {
        let schema = tool_schema();
        assert_eq!(schema.len(), 4);
        let terminal: Vec<_> = schema
            .iter()
            .filter_map(|t| ToolName::from_str(&t.name))
            .filter(ToolName::is_terminal)
            .collect();
        assert_eq!(terminal, vec![ToolName::SubmitEntries]);
    }

    #[test]
    fn reads_page_text() {
        let dir = tempfile::tempdir().unwrap();
        let output = make_executor().execute("read_page_text", &json!({"page": 1}), dir.path());
        assert!(!output.is_error);
        assert!(output.text.contains("A1"));
    }

    #[test]
    fn empty_and_missing_pages() {
        let dir = tempfile::tempdir().unwrap();
        let executor = make_executor();
        let empty = executor.execute("read_page_text", &json!({"page": 2}), dir.path());
        assert!(!empty.is_error);
        assert!(empty.text.contains("no extractable text"));
        let missing = executor.execute("read_page_text", &json!({"page": 9}), dir.path());
        assert!(missing.is_error);
        let bad_arg = executor.execute("read_page_text", &json!({}), dir.path());
        assert!(bad_arg.is_error);
    }

    #[test]
    fn page_image_is_base64_encoded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page-1.png"), [0x89, b'P', b'N', b'G']).unwrap();
        let executor = make_executor();

        let output = executor.execute("view_page_image", &json!({"page": 1}), dir.path());
        let image = output.image.unwrap();
        assert_eq!(image.data, "iVBORw==");

        let listing = executor.execute("list_documents", &json!({}), dir.path());
        assert!(listing.text.contains("page 1: "));
        assert!(listing.text.lines().next().unwrap().contains("image available"));

        let no_image = executor.execute("view_page_image", &json!({"page": 2}), dir.path());
        assert!(no_image.is_error);
    }

    #[test]
    fn unknown_tool_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(make_executor().execute("delete_page", &json!({}), dir.path()).is_error);
    }
}
