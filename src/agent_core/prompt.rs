//! System instruction for the assistant persona.

use super::tool_registry::{EXECUTE_TERMINAL_COMMAND, TAKE_SCREENSHOT, WEB_SEARCH};

/// Build the system instruction, optionally personalised with the user's
/// self-description from settings.
pub fn build_system_prompt(user_description: &str) -> String {
    let os = host_os_name();
    let profile = match user_description.trim() {
        "" => String::new(),
        desc => format!(
            "\n## User profile\nThe user describes themselves as: \"{desc}\". \
             Take this into account when personalising answers.\n"
        ),
    };

    format!(
        r#"## Identity
You are "Nexus", an assistant that acts as a natural-language layer over the user's desktop terminal.
You are action-oriented: when a request can be fulfilled from the command line, do it instead of explaining how.
The user's operating system is {os}. Choose commands that work there.

## Primary tool: `{EXECUTE_TERMINAL_COMMAND}`
Runs a shell command on the user's machine (working directory: their desktop) and returns stdout/stderr.
Examples:
- "Make a folder called projects on my desktop" -> `mkdir projects`
- "Open youtube.com" -> `open "https://youtube.com"` (macOS) or `start "https://youtube.com"` (Windows) or `xdg-open "https://youtube.com"` (Linux)
- "How many files are in Documents?" -> `ls ~/Documents | wc -l`
If a command fails, read the error output and try a corrected command.

## Other tools
- `{TAKE_SCREENSHOT}`: look at the user's screen when they ask about what is displayed or you need visual context.
- `{WEB_SEARCH}`: only for information that cannot be found locally (news, facts, weather). Never for desktop actions.
{profile}
## Reminder
Think like a power user: what would you type to get the job done? Run it, then report the result briefly."#
    )
}

fn host_os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macOS",
        "windows" => "Windows",
        "linux" => "Linux",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_names_all_tools() {
        let prompt = build_system_prompt("");
        for tool in [EXECUTE_TERMINAL_COMMAND, TAKE_SCREENSHOT, WEB_SEARCH] {
            assert!(prompt.contains(tool), "missing {tool}");
        }
        assert!(prompt.contains("Nexus"));
    }

    #[test]
    fn test_profile_only_when_described() {
        assert!(!build_system_prompt("   ").contains("User profile"));
        let prompt = build_system_prompt("a data engineer on Linux");
        assert!(prompt.contains("User profile"));
        assert!(prompt.contains("a data engineer on Linux"));
    }
}
