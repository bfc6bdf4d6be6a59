//! Prompt templates for the instruction source

use crate::agent::CommandHistoryEntry;

const PREAMBLE: &str = "You now have control of an Ubuntu Linux server.";

const PREAMBLE_RULES: &str = "Do not respond with any judgement, questions or explanations. \
You will give commands and I will respond with current terminal output. \
(This is a noninteractive terminal, so you cannot use nano or vi.)";

/// Ask for the very first command, given only the goal
pub fn initial_command(goal: &str) -> String {
    format!(
        "{} {} {}\n\nRespond with a linux command to give to the server.\n\n",
        PREAMBLE, goal, PREAMBLE_RULES
    )
}

/// Ask for the next command, given the goal and the ordered history
pub fn next_command(goal: &str, history: &[CommandHistoryEntry]) -> String {
    let mut rendered = String::new();
    for entry in history {
        rendered.push_str(&format!("{}\n\n", entry));
    }

    format!(
        "{} {} {}\n\nPrevious commands and outcomes:\n{}Give the next input to the terminal.\n\n",
        PREAMBLE, goal, PREAMBLE_RULES, rendered
    )
}

/// Ask for the outcome of a command given its whole output
pub fn outcome(command: &str, output: &str) -> String {
    format!(
        "A Linux command was run, and this was its output:\n\n{}\n\nThe original command was '{}'. What was the outcome?\n\n",
        output, command
    )
}

/// Ask for the outcome of a command given only the last lines of its output
pub fn outcome_truncated(command: &str, tail: &str, tail_lines: usize) -> String {
    format!(
        "A Linux command was run, and it had a very long output. This is the last {} lines:\n\n{}\n\nThe original command was '{}'. What was the outcome?\n\n",
        tail_lines, tail, command
    )
}

/// Ask for a summary of one fragment of a long output
pub fn fragment_summary(fragment: &str) -> String {
    format!(
        "This is the partial output of a Linux command. Please summarize what happened in this Linux command.\n\n{}\n\n",
        fragment
    )
}

/// Ask for the overall outcome given ordered fragment summaries
pub fn rollup(command: &str, partials: &[String]) -> String {
    let mut parts = String::new();
    for (i, summary) in partials.iter().enumerate() {
        parts.push_str(&format!("Part {}:\n{}\n\n", i + 1, summary));
    }

    format!(
        "A Linux command was run, and it had a very long output. The following segments are the summaries of each part of the output, in order:\n\n{}The original command was '{}'. What was the outcome?\n\n",
        parts, command
    )
}
