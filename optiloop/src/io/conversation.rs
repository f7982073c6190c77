//! The user channel: messages out, checkpoint choices in.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, anyhow};

use crate::core::routing::{PlanChoice, RoundChoice};
use crate::core::types::{OutputOfCode, Purpose};

/// Blocking user channel.
///
/// Checkpoints wait for an answer without a timeout. An `Err` means the
/// channel is gone (e.g. stdin closed), not that the user declined.
pub trait Conversation {
    fn say(&self, message: &str);
    fn choose_plan(&self, purpose: &Purpose) -> Result<PlanChoice>;
    fn choose_round(&self, result: &OutputOfCode) -> Result<RoundChoice>;
}

impl<C: Conversation + ?Sized> Conversation for &C {
    fn say(&self, message: &str) {
        (**self).say(message);
    }

    fn choose_plan(&self, purpose: &Purpose) -> Result<PlanChoice> {
        (**self).choose_plan(purpose)
    }

    fn choose_round(&self, result: &OutputOfCode) -> Result<RoundChoice> {
        (**self).choose_round(result)
    }
}

/// Line-oriented conversation over a reader and writer.
pub struct TerminalConversation<R, W> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl TerminalConversation<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalConversation<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }

    fn write(&self, text: &str) -> Result<()> {
        let mut out = self.output.borrow_mut();
        out.write_all(text.as_bytes()).context("write to user")?;
        out.flush().context("flush user output")
    }

    /// Ask until the answer parses.
    fn ask<T>(&self, question: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
        loop {
            self.write(question)?;
            let mut line = String::new();
            let read = self
                .input
                .borrow_mut()
                .read_line(&mut line)
                .context("read user answer")?;
            if read == 0 {
                return Err(anyhow!("user input closed"));
            }
            if let Some(choice) = parse(line.trim()) {
                return Ok(choice);
            }
            self.write("Please answer with one of the listed options.\n")?;
        }
    }
}

impl<R: BufRead, W: Write> Conversation for TerminalConversation<R, W> {
    fn say(&self, message: &str) {
        let mut text = message.trim_end().to_string();
        text.push('\n');
        if let Err(err) = self.write(&text) {
            tracing::warn!(err = %format!("{err:#}"), "failed to write message");
        }
    }

    fn choose_plan(&self, purpose: &Purpose) -> Result<PlanChoice> {
        self.say(&purpose.chatbot_response);
        if !purpose.next_steps.trim().is_empty() {
            self.say(&format!("Plan:\n{}", purpose.next_steps.trim()));
        }
        self.ask(
            "Proceed with this plan? [c]ontinue / [n]ew plan / [x] cancel: ",
            |answer| match answer.to_ascii_lowercase().as_str() {
                "c" | "continue" | "y" | "yes" => Some(PlanChoice::Continue),
                "n" | "new" | "new plan" => Some(PlanChoice::NewPlan),
                "x" | "cancel" | "q" | "quit" => Some(PlanChoice::Cancel),
                _ => None,
            },
        )
    }

    fn choose_round(&self, result: &OutputOfCode) -> Result<RoundChoice> {
        let objective = result
            .objective_value
            .map_or_else(|| "none".to_string(), |v| v.to_string());
        self.say(&format!(
            "Answer: {}\n{}\nObjective value: {objective}\nGoal achieved: {}\nNext improvement: {}",
            result.answer, result.answer_description, result.is_goal_achieved, result.improvement
        ));
        self.ask(
            "Run another optimization round? [c]ontinue / [d]one: ",
            |answer| match answer.to_ascii_lowercase().as_str() {
                "c" | "continue" | "y" | "yes" => Some(RoundChoice::Continue),
                "d" | "done" | "n" | "no" => Some(RoundChoice::Done),
                _ => None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_purpose, sample_result};
    use std::io::Cursor;

    fn conversation(input: &str) -> TerminalConversation<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalConversation::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn plan_choice_reprompts_on_unknown_answer() {
        let conv = conversation("maybe\nn\n");
        let choice = conv.choose_plan(&sample_purpose()).expect("choice");
        assert_eq!(choice, PlanChoice::NewPlan);
        let shown = String::from_utf8(conv.into_output()).expect("utf8");
        assert!(shown.contains("Please answer"));
        assert!(shown.contains("Plan:\n1."));
    }

    #[test]
    fn round_choice_shows_result() {
        let conv = conversation("done\n");
        let choice = conv
            .choose_round(&sample_result("print(1)", Some(3.5)))
            .expect("choice");
        assert_eq!(choice, RoundChoice::Done);
        let shown = String::from_utf8(conv.into_output()).expect("utf8");
        assert!(shown.contains("Objective value: 3.5"));
    }

    #[test]
    fn closed_input_is_an_error() {
        let conv = conversation("");
        let err = conv.choose_plan(&sample_purpose()).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
