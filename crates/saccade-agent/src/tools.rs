//! Local tool invocations reachable through `tool_use` decisions.
//!
//! Tools never raise: every outcome, including bad arguments and missing
//! files, comes back as a result string the oracle can read on its next turn.

use std::path::Path;
use tracing::info;

/// Max characters returned by `read_file`.
const READ_LIMIT: usize = 2000;

/// Run a tool invocation in the `"tool_name|arg1|arg2..."` wire format.
pub fn run_tool(value: &str) -> String {
    let (name, args) = match value.split_once('|') {
        Some((name, args)) => (name, args),
        None => (value, ""),
    };
    info!("tool: invoking {}", name);

    match name {
        "write_file" => match args.split_once('|') {
            Some((filename, content)) => write_file(filename, content),
            None => "Error: write_file requires 'filename|content'".to_string(),
        },
        "read_file" => read_file(args),
        other => format!("Error: unknown tool '{}'", other),
    }
}

/// Save content to a file in the workspace. Relative paths only.
pub fn write_file(filename: &str, content: &str) -> String {
    if filename.contains("..") || Path::new(filename).is_absolute() {
        return "Error: access denied, relative paths only".to_string();
    }
    match std::fs::write(filename, content) {
        Ok(()) => format!("Success: written to {}", filename),
        Err(e) => format!("Error writing file: {}", e),
    }
}

/// Read a file's contents, truncated to 2000 characters.
pub fn read_file(filename: &str) -> String {
    match std::fs::read_to_string(filename) {
        Ok(content) => {
            let mut truncated: String = content.chars().take(READ_LIMIT).collect();
            if truncated.len() < content.len() {
                truncated.push_str("...[truncated]");
            }
            truncated
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            "Error: file not found".to_string()
        }
        Err(e) => format!("Error reading file: {}", e),
    }
}
