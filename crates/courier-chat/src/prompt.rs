/// System prompt for free-form `ask` generation.
pub const ASK_SYSTEM: &str = "You are a concise assistant for software engineers. \
Answer the question directly. Prefer a short code example over prose when code is the clearest answer.";

/// Wrap a change summary in the commit-message instruction. The navigator
/// service receives the whole thing as one prompt.
pub fn commit_prompt(change_summary: &str) -> String {
    format!(
        "Write a git commit message for the following changes.\n\
         Subject line: imperative mood, at most 72 characters, no trailing period.\n\
         Add a short body only when the subject alone cannot explain the change.\n\
         Return the commit message and nothing else.\n\n\
         Changes:\n{}",
        change_summary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_prompt_carries_the_summary() {
        let wrapped = commit_prompt("switch parser to nom");
        assert!(wrapped.contains("switch parser to nom"));
        assert!(wrapped.contains("commit message"));
    }
}
