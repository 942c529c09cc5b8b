//! Terminal rendering of council turns
//!
//! The renderer watches the controller's transcript and prints what changed
//! in the open assistant message. A stage ticker refreshes the elapsed-time
//! status line while a stage is running.

mod format;
mod ticker;

pub use format::{deanonymize, format_elapsed, short_model_name};
pub use ticker::StageTicker;

use crate::backend::Conversation;
use crate::state_machine::{AssistantMessage, Metadata, Stage, StageProgress};
use chrono::{DateTime, Utc};
use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType};
use futures::StreamExt;
use std::io::Write;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;

fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::One => "collecting individual responses",
        Stage::Two => "peer rankings",
        Stage::Three => "chairman synthesis",
    }
}

fn progress_of(message: &AssistantMessage, stage: Stage) -> Option<&StageProgress> {
    match stage {
        Stage::One => Some(&message.progress.stage1),
        Stage::Two => Some(&message.progress.stage2),
        Stage::Three => None,
    }
}

fn completed(message: &AssistantMessage, stage: Stage) -> bool {
    match stage {
        Stage::One => message.stage1.is_some(),
        Stage::Two => message.stage2.is_some(),
        Stage::Three => message.stage3.is_some(),
    }
}

/// Lines describing how `next` differs from `prev`
pub fn describe_changes(
    prev: &AssistantMessage,
    next: &AssistantMessage,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut lines = Vec::new();

    if next.loading.search && !prev.loading.search {
        lines.push("Searching the web...".to_string());
    }
    let prev_query = prev.metadata.as_ref().and_then(Metadata::search_query);
    if let Some(query) = next.metadata.as_ref().and_then(Metadata::search_query) {
        if prev_query != Some(query) {
            let found = next
                .metadata
                .as_ref()
                .and_then(Metadata::search_context)
                .is_some_and(|context| !context.trim().is_empty());
            if found {
                lines.push(format!("Searched: {query}"));
            } else {
                lines.push(format!("Searched: {query} (no results)"));
            }
        }
    }

    for stage in Stage::ALL {
        if next.loading.stage(stage) && !prev.loading.stage(stage) {
            lines.push(format!("{}: {}...", stage.label(), stage_title(stage)));
        }

        if let (Some(before), Some(after)) = (progress_of(prev, stage), progress_of(next, stage)) {
            if after.count > before.count {
                let model = after.current_model.as_deref().map_or("", short_model_name);
                if after.total > 0 {
                    lines.push(format!("  [{}/{}] {model}", after.count, after.total));
                } else {
                    lines.push(format!("  [{}] {model}", after.count));
                }
            }
        }

        if completed(next, stage) && !completed(prev, stage) {
            lines.extend(describe_results(next, stage));
            if let Some(elapsed) = next.timers.elapsed(stage, now) {
                lines.push(format!("{} finished in {}", stage.label(), format_elapsed(elapsed)));
            }
        }
    }

    lines
}

fn describe_results(message: &AssistantMessage, stage: Stage) -> Vec<String> {
    let mut lines = Vec::new();
    let labels = message
        .metadata
        .as_ref()
        .map(Metadata::label_to_model)
        .unwrap_or_default();

    match stage {
        Stage::One => {
            for result in message.stage1.iter().flatten() {
                lines.push(format!("--- {} ---", short_model_name(&result.model)));
                if result.is_error() {
                    let reason = result.error_message.as_deref().unwrap_or("no response");
                    lines.push(format!("(failed: {reason})"));
                } else {
                    lines.push(result.response.clone().unwrap_or_default());
                }
            }
        }
        Stage::Two => {
            for result in message.stage2.iter().flatten() {
                let model = short_model_name(&result.model);
                if result.is_error() {
                    let reason = result.error_message.as_deref().unwrap_or("no ranking");
                    lines.push(format!("{model}: (failed: {reason})"));
                } else {
                    let order = deanonymize(&result.parsed_ranking.join(" > "), &labels);
                    lines.push(format!("{model}: {order}"));
                }
            }
            let aggregate = message
                .metadata
                .as_ref()
                .map(Metadata::aggregate_rankings)
                .unwrap_or_default();
            if !aggregate.is_empty() {
                lines.push("Aggregate ranking:".to_string());
                for (i, entry) in aggregate.iter().enumerate() {
                    lines.push(format!(
                        "  {}. {} (avg {:.2}, {} votes)",
                        i + 1,
                        short_model_name(&entry.model),
                        entry.average_rank,
                        entry.rankings_count
                    ));
                }
            }
        }
        Stage::Three => {
            if let Some(result) = &message.stage3 {
                lines.push(format!("Chairman ({}):", short_model_name(&result.model)));
                if result.is_error() {
                    let reason = result.error_message.as_deref().unwrap_or("synthesis failed");
                    lines.push(format!("(failed: {reason})"));
                } else {
                    lines.push(deanonymize(&result.response, &labels));
                }
            }
        }
    }
    lines
}

/// One-line status for the running stage
pub fn status_line(message: &AssistantMessage, now: DateTime<Utc>) -> Option<String> {
    if !message.loading.any() {
        return None;
    }
    let Some(stage) = message.loading.active_stage() else {
        return Some("Searching the web...".to_string());
    };
    let elapsed = message.timers.elapsed(stage, now).unwrap_or_default();
    let progress = progress_of(message, stage)
        .filter(|p| p.total > 0)
        .map(|p| format!(" {}/{}", p.count, p.total))
        .unwrap_or_default();
    Some(format!("{}{progress} {}", stage.label(), format_elapsed(elapsed)))
}

// ============================================================================
// Transcript tracking
// ============================================================================

/// Tracks the tail of the selected transcript between updates
#[derive(Debug, Default)]
pub struct TranscriptView {
    conversation_id: Option<String>,
    len: usize,
    last: Option<AssistantMessage>,
}

impl TranscriptView {
    /// Adopt `conversation` without describing anything
    pub fn reset(&mut self, conversation: Option<&Conversation>) {
        self.conversation_id = conversation.map(|c| c.id.clone());
        self.len = conversation.map_or(0, |c| c.messages.len());
        self.last = conversation.and_then(tail_assistant);
    }

    /// Describe what changed since the last observed snapshot. A new turn
    /// (two appended messages) is diffed against an empty record; a switch,
    /// reload or rollback just resets the baseline.
    pub fn observe(&mut self, conversation: Option<&Conversation>, now: DateTime<Utc>) -> Vec<String> {
        let Some(conv) = conversation else {
            self.reset(None);
            return Vec::new();
        };

        let same_conversation = self.conversation_id.as_deref() == Some(conv.id.as_str());
        let baseline = if same_conversation && conv.messages.len() == self.len {
            self.last.clone()
        } else if same_conversation && conv.messages.len() == self.len + 2 {
            Some(AssistantMessage::placeholder())
        } else {
            None
        };

        let next = tail_assistant(conv);
        let lines = match (&baseline, &next) {
            (Some(prev), Some(next)) => describe_changes(prev, next, now),
            _ => Vec::new(),
        };

        self.conversation_id = Some(conv.id.clone());
        self.len = conv.messages.len();
        self.last = next;
        lines
    }

    pub fn last(&self) -> Option<&AssistantMessage> {
        self.last.as_ref()
    }
}

fn tail_assistant(conversation: &Conversation) -> Option<AssistantMessage> {
    conversation
        .messages
        .last()
        .and_then(|m| m.as_assistant())
        .cloned()
}

// ============================================================================
// Render loop
// ============================================================================

/// Everything the renderer reacts to
pub struct RenderFeeds {
    pub transcript: watch::Receiver<Option<Conversation>>,
    pub busy: watch::Receiver<bool>,
    pub errors: watch::Receiver<Option<String>>,
    /// Input prompts from the front end; the renderer owns the terminal
    pub prompts: mpsc::UnboundedReceiver<String>,
}

struct Renderer<W> {
    out: W,
    view: TranscriptView,
    turn_running: bool,
    ticker: Option<StageTicker>,
    tick_tx: mpsc::UnboundedSender<()>,
    tick_interval: Duration,
}

impl<W: Write> Renderer<W> {
    fn show_transcript(&mut self, transcript: &mut watch::Receiver<Option<Conversation>>) {
        let lines = {
            let conversation = transcript.borrow_and_update();
            self.view.observe(conversation.as_ref(), Utc::now())
        };
        self.print_lines(&lines);
    }

    fn show_error(&mut self, errors: &mut watch::Receiver<Option<String>>) {
        let error = errors.borrow_and_update().clone();
        if let Some(message) = error {
            self.print_lines(&[format!("Error: {message}")]);
        }
    }

    /// Run a ticker only while a turn is running and a stage is active
    fn sync_ticker(&mut self) {
        let active = if self.turn_running {
            self.view.last().and_then(|m| m.loading.active_stage())
        } else {
            None
        };
        if self.ticker.as_ref().map(StageTicker::stage) == active {
            return;
        }
        if self.ticker.take().is_some() {
            self.print_status("");
        }
        self.ticker = active.map(|stage| {
            let tx = self.tick_tx.clone();
            StageTicker::start(stage, self.tick_interval, move || {
                let _ = tx.send(());
            })
        });
    }

    fn print_lines(&mut self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
        for line in lines {
            let _ = writeln!(self.out, "{line}");
        }
        let _ = self.out.flush();
    }

    fn print_status(&mut self, line: &str) {
        let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = write!(self.out, "{line}");
        let _ = self.out.flush();
    }
}

/// Print transcript changes, turn errors and prompts until a feed closes
pub async fn render<W>(feeds: RenderFeeds, out: W, tick_interval: Duration)
where
    W: Write + Send,
{
    let RenderFeeds {
        mut transcript,
        busy,
        mut errors,
        mut prompts,
    } = feeds;
    let (tick_tx, mut ticks) = mpsc::unbounded_channel();

    let mut renderer = Renderer {
        out,
        view: TranscriptView::default(),
        turn_running: *busy.borrow(),
        ticker: None,
        tick_tx,
        tick_interval,
    };
    renderer.view.reset(transcript.borrow_and_update().as_ref());
    let mut busy_changes = WatchStream::from_changes(busy);

    loop {
        tokio::select! {
            changed = transcript.changed() => {
                if changed.is_err() {
                    break;
                }
                renderer.show_transcript(&mut transcript);
            }
            changed = errors.changed() => {
                if changed.is_err() {
                    break;
                }
                renderer.show_error(&mut errors);
            }
            running = busy_changes.next() => {
                let Some(running) = running else { break };
                renderer.turn_running = running;
            }
            prompt = prompts.recv() => {
                let Some(prompt) = prompt else { break };
                // Everything published before the prompt was requested prints first
                if transcript.has_changed().unwrap_or(true) {
                    renderer.show_transcript(&mut transcript);
                }
                if errors.has_changed().unwrap_or(false) {
                    renderer.show_error(&mut errors);
                }
                // Prompts are only requested between turns
                renderer.turn_running = false;
                renderer.sync_ticker();
                renderer.print_status(&prompt);
                continue;
            }
            Some(()) = ticks.recv() => {
                let line = renderer
                    .ticker
                    .as_ref()
                    .and(renderer.view.last())
                    .and_then(|m| status_line(m, Utc::now()));
                if let Some(line) = line {
                    renderer.print_status(&line);
                }
            }
        }
        renderer.sync_ticker();
    }
}
