use crate::truncate;

const ECHO_CHARS: usize = 80;

/// Rule-based local responder used when the completion provider fails.
/// The reply is a pure function of the input and the tool names.
#[derive(Clone, Debug, Default)]
pub struct FallbackResponder {
    tool_names: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Intent {
    Empty,
    Greeting,
    Help,
    Question,
    Command,
    Other,
}

const GREETINGS: &[&str] = &["hi", "hello", "hey", "good morning", "good afternoon", "good evening"];
const HELP_MARKERS: &[&str] = &["help", "what can you do", "capabilities", "commands"];
const QUESTION_WORDS: &[&str] = &["what", "why", "how", "when", "where", "who", "which", "can", "is", "are", "do", "does"];
const COMMAND_VERBS: &[&str] = &["run", "execute", "list", "show", "build", "test", "install", "delete", "create"];

impl FallbackResponder {
    pub fn new(mut tool_names: Vec<String>) -> Self {
        tool_names.sort();
        tool_names.dedup();
        Self { tool_names }
    }

    fn classify(message: &str) -> Intent {
        let lower = message.trim().to_lowercase();
        if lower.is_empty() {
            return Intent::Empty;
        }
        let first = lower
            .split(|c: char| !c.is_alphanumeric())
            .find(|w| !w.is_empty())
            .unwrap_or("");

        if GREETINGS
            .iter()
            .any(|g| lower == *g || lower.starts_with(&format!("{g} ")) || lower.starts_with(&format!("{g},")) || first == *g)
        {
            return Intent::Greeting;
        }
        if HELP_MARKERS.iter().any(|m| lower.contains(m)) {
            return Intent::Help;
        }
        if lower.ends_with('?') || QUESTION_WORDS.contains(&first) {
            return Intent::Question;
        }
        if COMMAND_VERBS.contains(&first) {
            return Intent::Command;
        }
        Intent::Other
    }

    fn tool_list(&self) -> String {
        if self.tool_names.is_empty() {
            "no tools".to_string()
        } else {
            self.tool_names.join(", ")
        }
    }

    pub fn respond(&self, message: &str) -> String {
        const UNAVAILABLE: &str = "The completion service is unavailable right now.";
        match Self::classify(message) {
            Intent::Empty => format!("{UNAVAILABLE} I also didn't receive any text; please send your message again."),
            Intent::Greeting => format!("Hello! {UNAVAILABLE} Please try again in a moment."),
            Intent::Help => format!(
                "{UNAVAILABLE} Once it is back I can help using these tools: {}.",
                self.tool_list()
            ),
            Intent::Question => format!(
                "{UNAVAILABLE} I can't answer \"{}\" until it is back; please ask again shortly.",
                truncate::preview(message, ECHO_CHARS)
            ),
            Intent::Command => format!(
                "{UNAVAILABLE} Nothing was executed for \"{}\"; please retry once it is back.",
                truncate::preview(message, ECHO_CHARS)
            ),
            Intent::Other => format!(
                "{UNAVAILABLE} Your message \"{}\" was received but not processed; please try again shortly.",
                truncate::preview(message, ECHO_CHARS)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> FallbackResponder {
        FallbackResponder::new(vec!["kill_shell".into(), "bash".into(), "bash_output".into(), "bash".into()])
    }

    #[test]
    fn deterministic() {
        let r = responder();
        assert_eq!(r.respond("list the files"), r.respond("list the files"));
    }

    #[test]
    fn classifies_intents() {
        assert_eq!(FallbackResponder::classify("   "), Intent::Empty);
        assert_eq!(FallbackResponder::classify("Hello there"), Intent::Greeting);
        assert_eq!(FallbackResponder::classify("hi"), Intent::Greeting);
        assert_eq!(FallbackResponder::classify("I need help with git"), Intent::Help);
        assert_eq!(FallbackResponder::classify("why is the build red?"), Intent::Question);
        assert_eq!(FallbackResponder::classify("How does this work"), Intent::Question);
        assert_eq!(FallbackResponder::classify("run the tests"), Intent::Command);
        assert_eq!(FallbackResponder::classify("the weather is nice"), Intent::Other);
        assert_eq!(FallbackResponder::classify("history of shells"), Intent::Other);
    }

    #[test]
    fn help_lists_sorted_unique_tools() {
        let reply = responder().respond("help");
        assert!(reply.contains("bash, bash_output, kill_shell."));
    }

    #[test]
    fn help_without_tools() {
        let reply = FallbackResponder::default().respond("what can you do");
        assert!(reply.contains("no tools"));
    }

    #[test]
    fn echoes_a_bounded_preview() {
        let long = format!("run {}", "x".repeat(500));
        let reply = responder().respond(&long);
        assert!(reply.contains("Nothing was executed"));
        assert!(reply.len() < 300);
        assert!(reply.contains('…'));
    }
}
