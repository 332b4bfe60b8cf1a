use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use triage_core::{KeyValueStore, Outcome, SessionStatus, TriageBackend, TriageResult, TriageSessionController};

const HELP: &str = "\
Commands:
  /history   numbered transcript of this session
  /stats     message counts
  /triage    request the triage result now
  /retry     resend your last message
  /clear     drop this session and start a new one
  /export    print the stored history as JSON
  /quit      leave (the session is kept and resumed next time)";

enum Command<'a> {
    Say(&'a str),
    History,
    Stats,
    Triage,
    Retry,
    Clear,
    Export,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse(line: &str) -> Command<'_> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Command::Say(line);
    }
    match line {
        "/history" => Command::History,
        "/stats" => Command::Stats,
        "/triage" => Command::Triage,
        "/retry" => Command::Retry,
        "/clear" | "/new" => Command::Clear,
        "/export" => Command::Export,
        "/help" | "/?" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other),
    }
}

pub struct Repl<B: TriageBackend, K: KeyValueStore> {
    controller: TriageSessionController<B, K>,
    shown_warning: Option<String>,
}

impl<B: TriageBackend, K: KeyValueStore> Repl<B, K> {
    pub fn new(controller: TriageSessionController<B, K>) -> Self {
        Self { controller, shown_warning: None }
    }

    /// Resume the stored session unless `fresh`, otherwise ask the backend
    /// for a new one.
    pub async fn open(&mut self, fresh: bool) -> Result<()> {
        if !fresh && self.controller.restore().is_applied() {
            println!("Resumed session {}", self.controller.session_id().unwrap_or_default());
            for line in self.controller.numbered_transcript() {
                println!("  {}", line);
            }
            return Ok(());
        }
        let outcome = self.controller.start_session().await;
        if let Outcome::Failed(e) = &outcome {
            anyhow::bail!(describe_failure(e));
        }
        self.print_latest_bot_message();
        Ok(())
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("Type your symptoms, /help for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };

            match parse(&line) {
                Command::Say(text) => {
                    let outcome = tokio::select! {
                        outcome = self.controller.send_message(text) => outcome,
                        _ = tokio::signal::ctrl_c() => {
                            println!("(cancelled)");
                            continue;
                        }
                    };
                    let failed = matches!(outcome, Outcome::Failed(_));
                    self.render(outcome);
                    if failed {
                        let answered = self.controller.messages().last().is_some_and(|m| !m.is_user());
                        println!("{}", send_failure_hint(answered));
                    }
                }
                Command::History => {
                    for line in self.controller.numbered_transcript() {
                        println!("{}", line);
                    }
                }
                Command::Stats => {
                    let stats = self.controller.store_stats();
                    match self.controller.stats() {
                        Some(s) => println!("{} messages in this session (last #{})", s.count, s.last_sequence_number),
                        None => println!("no active session"),
                    }
                    println!("{} messages across {} stored sessions", stats.total_messages, stats.sessions);
                }
                Command::Triage => {
                    let outcome = self.controller.fetch_triage_result().await;
                    self.render(outcome);
                }
                Command::Retry => {
                    let outcome = self.controller.retry_last_message().await;
                    self.render(outcome);
                }
                Command::Clear => {
                    self.controller.clear_session();
                    println!("Session cleared.");
                    if let Err(e) = self.open(true).await {
                        println!("{}", e);
                    }
                }
                Command::Export => match self.controller.export_history() {
                    Ok(json) => println!("{}", json),
                    Err(e) => println!("export failed: {}", e),
                },
                Command::Help => println!("{}", HELP),
                Command::Quit => break,
                Command::Unknown(cmd) => println!("unknown command {}; /help lists them", cmd),
            }
            self.print_new_warning();
        }
        Ok(())
    }

    fn render(&mut self, outcome: Outcome) {
        debug!(?outcome, "operation finished");
        match outcome {
            Outcome::Applied { to: SessionStatus::Complete, .. } => {
                self.print_latest_bot_message();
                if let Some(result) = self.controller.triage_result() {
                    print_triage(&result);
                }
            }
            Outcome::Applied { .. } => self.print_latest_bot_message(),
            Outcome::Ignored(reason) => debug!(?reason, "nothing to do"),
            Outcome::Busy => println!("still waiting for the previous reply"),
            Outcome::InvalidState { status: SessionStatus::Complete, .. } => {
                println!("Triage is complete. Use /clear to start a new session.")
            }
            Outcome::InvalidState { status, operation } => println!("cannot {} while {}", operation, status),
            Outcome::Failed(e) => println!("{}", describe_failure(&e)),
            Outcome::Discarded => {}
        }
    }

    fn print_latest_bot_message(&self) {
        if let Some(m) = self.controller.messages().into_iter().rev().find(|m| !m.is_user()) {
            println!("bot: {}", m.content);
        }
    }

    fn print_new_warning(&mut self) {
        let warning = self.controller.snapshot().last_warning;
        if warning.is_some() && warning != self.shown_warning {
            if let Some(w) = &warning {
                eprintln!("warning: {}", w);
            }
        }
        self.shown_warning = warning;
    }
}

/// What to do after a failed send. When the bot did answer, only the
/// automatic triage fetch failed and resending would duplicate the message.
fn send_failure_hint(answered: bool) -> &'static str {
    if answered {
        "The triage result is not ready yet; /triage asks again."
    } else {
        "Your message was kept; /retry resends it."
    }
}

pub fn describe_failure(e: &triage_core::TriageError) -> String {
    match e.troubleshooting() {
        Some(hint) => format!("error: {}\n{}", e, hint),
        None => format!("error: {}", e),
    }
}

pub fn print_triage(result: &TriageResult) {
    println!();
    println!("=== Triage result: {} ===", result.urgency);
    for s in &result.symptoms {
        let mut details = Vec::new();
        if let Some(d) = &s.duration {
            details.push(format!("duration: {}", d));
        }
        if let Some(sev) = &s.severity {
            details.push(format!("severity: {}", sev));
        }
        if let Some(ctx) = &s.additional_context {
            details.push(ctx.clone());
        }
        if details.is_empty() {
            println!("- {}", s.name);
        } else {
            println!("- {} ({})", s.name, details.join(", "));
        }
    }
    if let Some(reason) = &result.reason {
        println!("Reason: {}", reason);
    }
}
