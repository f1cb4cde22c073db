//! Prompt text for the Quarto data science chatbot.

use crate::llm::provider::ProviderKind;
use chrono::NaiveDateTime;
use std::path::Path;

/// Name recorded as the author of every generated document.
pub fn author_name(provider: ProviderKind, model: &str) -> String {
    format!("{} {}", provider, model)
}

/// System prompt asking the model to answer through `show_answer` with a Quarto document.
pub fn system_prompt(author: &str, now: NaiveDateTime) -> String {
    format!(
        r#"
You are a terse data science chatbot. When you are asked a question,
you will submit your answer in the form of a Quarto markdown document
including the original question, an overview, any requested code, and an explanation.
Please use the `show_answer` tool for all of your responses.
For the filename, use a five-word summary of the question, separated by
dashes and the extension .qmd
Make sure to include the Quarto metadata block at the top of the document:
* the author is "{author}"
* the date is {date}
You don't need to add quadruple backticks around the document.
Please remember to surround the language with curly braces when outputting a code block, e.g.
```{{python}}
```{{r}}
Thank you!
"#,
        author = author,
        date = now.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Opening assistant message shown before the first question.
pub fn greeting(author: &str, output_dir: &Path) -> String {
    format!(
        "Hello! I am an instance of `{}`.\n\n\
         I respond to all questions with Quarto documents, written to\n`{}`\n\n\
         How can I help you today?",
        author,
        output_dir.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use regex::Regex;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 20).unwrap().and_hms_opt(12, 0, 5).unwrap()
    }

    #[test]
    fn test_author_name() {
        assert_eq!(
            author_name(ProviderKind::Anthropic, "claude-3-5-sonnet-20240620"),
            "anthropic claude-3-5-sonnet-20240620"
        );
        assert_eq!(author_name(ProviderKind::OpenAi, "gpt-4o"), "openai gpt-4o");
    }

    #[test]
    fn test_system_prompt_mentions_tool_and_extension() {
        let prompt = system_prompt("openai gpt-4o", noon());

        assert!(prompt.contains("`show_answer` tool"));
        assert!(prompt.contains("extension .qmd"));
        assert!(prompt.contains("* the author is \"openai gpt-4o\""));
    }

    #[test]
    fn test_system_prompt_date_line() {
        let prompt = system_prompt("a", noon());
        let date_line = Regex::new(r"(?m)^\* the date is (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})$").unwrap();

        let captures = date_line.captures(&prompt).unwrap();
        assert_eq!(&captures[1], "2024-06-20 12:00:05");
    }

    #[test]
    fn test_system_prompt_keeps_curly_braces() {
        let prompt = system_prompt("a", noon());

        assert!(prompt.contains("```{python}"));
        assert!(prompt.contains("```{r}"));
    }

    #[test]
    fn test_greeting_names_author_and_directory() {
        let text = greeting("anthropic claude", Path::new("/tmp/answers"));

        assert!(text.starts_with("Hello! I am an instance of `anthropic claude`."));
        assert!(text.contains("`/tmp/answers`"));
        assert!(text.ends_with("How can I help you today?"));
    }
}
