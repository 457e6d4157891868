//! The fixed set of tools advertised to the model.
//!
//! Both orchestrator variants attach exactly these declarations, and the
//! executor dispatches on the same names.

use serde_json::json;

use crate::inference::types::ToolDeclaration;

pub const EXECUTE_TERMINAL_COMMAND: &str = "execute_terminal_command";
pub const TAKE_SCREENSHOT: &str = "take_screenshot";
pub const WEB_SEARCH: &str = "web_search";

/// Tool names in declaration order.
pub const TOOL_NAMES: [&str; 3] = [EXECUTE_TERMINAL_COMMAND, TAKE_SCREENSHOT, WEB_SEARCH];

/// Declarations for every callable tool.
pub fn declarations() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration {
            name: EXECUTE_TERMINAL_COMMAND.into(),
            description: "Executes a shell command on the user's computer and returns the output."
                .into(),
            parameters: string_args("command", "The command to execute."),
        },
        ToolDeclaration {
            name: TAKE_SCREENSHOT.into(),
            description: "Takes a screenshot of the user's screen to see what's currently displayed. \
                Use this when the user asks to read their screen, see what's on their screen, \
                analyze their display, or when you need visual context of their current screen."
                .into(),
            parameters: string_args("reason", "Brief explanation of why the screenshot is needed."),
        },
        ToolDeclaration {
            name: WEB_SEARCH.into(),
            description: "Performs a web search to find recent information or data.".into(),
            parameters: string_args("query", "The search query."),
        },
    ]
}

/// Object schema with one required string property.
fn string_args(name: &str, description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            name: { "type": "string", "description": description }
        },
        "required": [name]
    })
}
