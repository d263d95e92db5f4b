//! One-line invocation summaries and result statistics.
//!
//! Output is plain text. Markup and escaping belong to the transport layer.

use serde_json::Value;

/// Longest argument shown inside `Name(...)`.
pub const MAX_SUMMARY_CHARS: usize = 200;

/// Longest first line of an error result shown in the stats line.
pub const MAX_ERROR_CHARS: usize = 100;

/// Tools that block on the user and are rendered as prompts.
pub const INTERACTIVE_TOOLS: &[&str] = &["AskUserQuestion", "ExitPlanMode"];

pub fn is_interactive(tool_name: &str) -> bool {
    INTERACTIVE_TOOLS.contains(&tool_name)
}

/// Summarise an invocation as `Name(arg)`, or just `Name` when nothing fits.
pub fn invocation_summary(name: &str, input: &Value) -> String {
    let Some(obj) = input.as_object() else {
        return name.to_string();
    };
    let str_field = |key: &str| obj.get(key).and_then(Value::as_str).unwrap_or("");

    let arg: String = match name {
        "Read" | "Glob" => non_empty_or(str_field("file_path"), str_field("pattern")).to_string(),
        "Write" => str_field("file_path").to_string(),
        "Edit" | "NotebookEdit" => {
            non_empty_or(str_field("file_path"), str_field("notebook_path")).to_string()
        }
        "Bash" => str_field("command").to_string(),
        "Grep" => str_field("pattern").to_string(),
        "Task" => str_field("description").to_string(),
        "WebFetch" => str_field("url").to_string(),
        "WebSearch" => str_field("query").to_string(),
        "Skill" => str_field("skill").to_string(),
        "TodoWrite" => match obj.get("todos").and_then(Value::as_array) {
            Some(todos) => format!("{} item(s)", todos.len()),
            None => String::new(),
        },
        "AskUserQuestion" => obj
            .get("questions")
            .and_then(Value::as_array)
            .and_then(|qs| qs.first())
            .and_then(|q| q.get("question"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        "TodoRead" | "ExitPlanMode" => String::new(),
        _ => obj
            .values()
            .filter_map(Value::as_str)
            .find(|s| !s.is_empty())
            .unwrap_or("")
            .to_string(),
    };

    if arg.is_empty() {
        name.to_string()
    } else {
        format!("{name}({})", truncate_chars(&arg, MAX_SUMMARY_CHARS))
    }
}

fn non_empty_or<'a>(first: &'a str, second: &'a str) -> &'a str {
    if first.is_empty() { second } else { first }
}

/// Truncate to `max` chars, appending `…` when anything was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Statistics line plus body for a successful result.
///
/// Read and Write report only a count; other tools keep their output.
pub fn result_stats(tool_name: Option<&str>, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let line_count = text.matches('\n').count() + 1;
    let non_blank = text.lines().filter(|l| !l.trim().is_empty()).count();

    let stats = match tool_name {
        Some("Read") => return format!("  ⎿  Read {line_count} lines"),
        Some("Write") => return format!("  ⎿  Wrote {line_count} lines"),
        Some("Bash") => format!("  ⎿  Output {line_count} lines"),
        Some("Grep") => format!("  ⎿  Found {non_blank} matches"),
        Some("Glob") => format!("  ⎿  Found {non_blank} files"),
        Some("Task") => format!("  ⎿  Agent output {line_count} lines"),
        Some("WebFetch") => format!("  ⎿  Fetched {} characters", text.chars().count()),
        Some("WebSearch") => format!("  ⎿  {} search results", text.matches("\n\n").count() + 1),
        _ => return text.to_string(),
    };
    format!("{stats}\n{text}")
}

/// `  ⎿  Error: <first line>` with the first line bounded.
pub fn error_line(text: &str) -> String {
    match text.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(first) => format!("  ⎿  Error: {}", truncate_chars(first, MAX_ERROR_CHARS)),
        None => "  ⎿  Error".to_string(),
    }
}

/// Count (added, removed) lines between two snippets.
///
/// Common leading and trailing lines are ignored; the differing middle is
/// counted wholesale, which matches how Edit replaces a contiguous block.
pub fn edit_line_delta(old: &str, new: &str) -> (usize, usize) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let removed = old_lines.len() - prefix - suffix;
    let added = new_lines.len() - prefix - suffix;
    (added, removed)
}

/// Full text of a paired or standalone result notification.
///
/// `summary` is the originating invocation's summary line when the pair is
/// known; `input` is its original input (used for Edit stats).
pub fn result_text(
    summary: Option<&str>,
    tool_name: Option<&str>,
    input: Option<&Value>,
    text: &str,
    is_error: bool,
    interrupted: bool,
) -> String {
    let body = if interrupted {
        "⏹ Interrupted".to_string()
    } else if is_error {
        error_line(text)
    } else if tool_name == Some("Edit")
        && let Some(obj) = input.and_then(Value::as_object)
    {
        let old = obj.get("old_string").and_then(Value::as_str).unwrap_or("");
        let new = obj.get("new_string").and_then(Value::as_str).unwrap_or("");
        let (added, removed) = edit_line_delta(old, new);
        format!("  ⎿  Added {added} lines, removed {removed} lines")
    } else {
        result_stats(tool_name, text)
    };

    match (summary, body.is_empty()) {
        (Some(s), true) => format!("{s}\n  ⎿  Done"),
        (Some(s), false) => format!("{s}\n{body}"),
        (None, true) => "  ⎿  Done".to_string(),
        (None, false) => body,
    }
}
