use colored::Colorize;
use once_cell::sync::Lazy;
use std::io::{self, BufRead, IsTerminal, Write};

pub static SUCCESS: Lazy<colored::ColoredString> = Lazy::new(|| "[fieldagent]".green());
pub static FAIL: Lazy<colored::ColoredString> = Lazy::new(|| "[fieldagent]".red());
pub static INFO: Lazy<colored::ColoredString> = Lazy::new(|| "[fieldagent]".cyan());

/// `1.0.0 (abc1234 2024-5-1 release)` or just the crate version when unstamped
pub fn version() -> String {
    let hash = option_env!("GIT_HASH").unwrap_or("").trim();
    let date = option_env!("BUILD_DATE").unwrap_or("").trim();
    let profile = option_env!("PROFILE").unwrap_or("").trim();

    let details: Vec<&str> = [hash, date, profile]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();

    if details.is_empty() {
        env!("CARGO_PKG_VERSION").to_string()
    } else {
        format!("{} ({})", env!("CARGO_PKG_VERSION"), details.join(" "))
    }
}

/// Whether we can ask the user for input
pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// Print `question` and read one trimmed line; `None` on EOF or empty answer
pub fn prompt_line(question: &str, input: &mut dyn BufRead) -> Option<String> {
    print!("{question}");
    let _ = io::stdout().flush();

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(answer.trim().to_string()).filter(|a| !a.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_prompt_line_trims_answer() {
        let mut input = Cursor::new("  acme \n");
        assert_eq!(prompt_line("id: ", &mut input), Some("acme".to_string()));
    }

    #[test]
    fn test_prompt_line_empty_or_eof() {
        assert_eq!(prompt_line("id: ", &mut Cursor::new("\n")), None);
        assert_eq!(prompt_line("id: ", &mut Cursor::new("")), None);
    }

    #[test]
    fn test_version_starts_with_crate_version() {
        assert!(version().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
