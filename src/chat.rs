//! Interactive chat loop
//!
//! Reads queries with `rustyline`, hands them to the [`Agent`] and prints
//! answers in color. Pressing Enter on an empty line supplies the next
//! configured example query.

use std::collections::VecDeque;
use std::future::Future;
use std::io::Write;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::agent::Agent;
use crate::error::Result;

/// Prompt shown for every query
pub const PROMPT: &str = "Query: ";

/// One read from the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A line of text (without the newline)
    Line(String),
    /// Ctrl-C
    Interrupted,
    /// Ctrl-D / end of input
    Eof,
}

/// Source of user input lines
pub trait LineReader {
    /// Show `prompt` and read one line
    fn read_line(&mut self, prompt: &str) -> Result<Input>;
}

impl LineReader for DefaultEditor {
    fn read_line(&mut self, prompt: &str) -> Result<Input> {
        match self.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    // History is a convenience; failing to record it is harmless.
                    let _ = self.add_history_entry(line.as_str());
                }
                Ok(Input::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(err) => Err(err.into()),
        }
    }
}

/// What to do with one line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this query to the agent
    Query {
        /// Query text
        text: String,
        /// Whether the query was taken from the example list
        from_examples: bool,
    },
    /// Nothing to send; prompt again
    Prompt,
    /// Leave the chat
    Quit,
}

/// Decide what a line of input means, consuming an example query when the
/// line is blank.
///
/// # Examples
///
/// ```
/// use std::collections::VecDeque;
/// use mcp_chat::chat::{interpret_line, Action};
///
/// let mut examples = VecDeque::from(vec!["What time is it?".to_string()]);
/// assert_eq!(
///     interpret_line("  ", &mut examples),
///     Action::Query { text: "What time is it?".to_string(), from_examples: true }
/// );
/// assert_eq!(interpret_line("", &mut examples), Action::Prompt);
/// assert_eq!(interpret_line("Q", &mut examples), Action::Quit);
/// ```
pub fn interpret_line(line: &str, examples: &mut VecDeque<String>) -> Action {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return match examples.pop_front() {
            Some(text) => Action::Query {
                text,
                from_examples: true,
            },
            None => Action::Prompt,
        };
    }

    if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("q") {
        return Action::Quit;
    }

    Action::Query {
        text: trimmed.to_string(),
        from_examples: false,
    }
}

/// Run the chat on the terminal until the user quits
///
/// # Errors
///
/// Returns an error only when the terminal cannot be read; agent failures
/// are printed and the loop continues.
pub async fn run_chat(agent: &mut Agent, example_queries: &[String], verbose: bool) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut stdout = std::io::stdout();
    run_chat_with(agent, example_queries, verbose, &mut editor, &mut stdout).await
}

/// [`run_chat`] over any input source and output sink
pub async fn run_chat_with<R, W>(
    agent: &mut Agent,
    example_queries: &[String],
    verbose: bool,
    reader: &mut R,
    out: &mut W,
) -> Result<()>
where
    R: LineReader,
    W: Write,
{
    let mut examples: VecDeque<String> = example_queries.iter().cloned().collect();
    print_banner(out, example_queries)?;

    loop {
        let line = match reader.read_line(PROMPT)? {
            Input::Line(line) => line,
            Input::Interrupted => continue,
            Input::Eof => break,
        };

        let query = match interpret_line(&line, &mut examples) {
            Action::Query {
                text,
                from_examples,
            } => {
                if from_examples {
                    writeln!(out, "{}", format!("Example Query: {}", text).yellow())?;
                }
                text
            }
            Action::Prompt => {
                writeln!(out, "\nPlease type a query, or 'quit' or 'q' to exit\n")?;
                continue;
            }
            Action::Quit => break,
        };
        writeln!(out)?;

        match agent.execute(query).await {
            Ok(outcome) => {
                if let Some(tool_output) = &outcome.last_tool_output {
                    if verbose {
                        writeln!(out, "{}", tool_output)?;
                    }
                    writeln!(out)?;
                }
                writeln!(out, "{}\n", outcome.response.cyan())?;
            }
            Err(e) => {
                tracing::debug!("Query failed: {:#}", e);
                writeln!(out, "Error getting response: {}", e)?;
                writeln!(out, "You can continue chatting or type 'quit' to exit.")?;
            }
        }
        out.flush()?;
    }

    writeln!(out, "{}\n", "Goodbye!".cyan())?;
    out.flush()?;
    Ok(())
}

/// Drive `session` until it finishes or `interrupt` fires.
///
/// While the prompt is showing, the line editor reads Ctrl-C as a key; the
/// signal only arrives while a query is running. Returning lets the caller
/// close MCP sessions instead of dying with them open. If the signal
/// handler cannot be installed the session simply runs to completion.
pub async fn run_until_interrupted<S, I>(session: S, interrupt: I) -> Result<()>
where
    S: Future<Output = Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(session);
    tokio::select! {
        // Poll the signal first so its handler is installed before the
        // session blocks on the terminal.
        biased;

        signal = interrupt => match signal {
            Ok(()) => {
                tracing::info!("Interrupted; shutting down");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                session.await
            }
        },
        result = &mut session => result,
    }
}

fn print_banner<W: Write>(out: &mut W, example_queries: &[String]) -> Result<()> {
    writeln!(
        out,
        "\nConversation started. Type 'quit' or 'q' to end the conversation.\n"
    )?;
    if !example_queries.is_empty() {
        writeln!(
            out,
            "Example Queries (just type Enter to supply them one by one):"
        )?;
        for query in example_queries {
            writeln!(out, "- {}", query)?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
