use std::collections::HashSet;
use std::io::{self, Write};

use weave_session::{Notice, ViewState};
use weave_types::{MessageRole, ToolFamily};

/// Prints view snapshots to a terminal incrementally
pub struct Renderer<W: Write> {
    out: W,
    conversation_id: Option<String>,
    history_printed: bool,
    streaming: bool,
    printed: usize,
    seen_steps: HashSet<String>,
    printed_tools: [usize; ToolFamily::ALL.len()],
    notice: Option<Notice>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            conversation_id: None,
            history_printed: false,
            streaming: false,
            printed: 0,
            seen_steps: HashSet::new(),
            printed_tools: [0; ToolFamily::ALL.len()],
            notice: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render(&mut self, view: &ViewState) -> io::Result<()> {
        if view.conversation_id != self.conversation_id {
            self.conversation_id = view.conversation_id.clone();
            self.history_printed = false;
            if let Some(id) = &self.conversation_id {
                writeln!(self.out, "-- conversation {} --", id)?;
            }
        }

        if !view.is_streaming && !self.streaming && !self.history_printed && !view.messages.is_empty() {
            for message in &view.messages {
                writeln!(self.out, "{}> {}", role_label(message.role), message.content)?;
            }
            self.history_printed = true;
        }

        if view.is_streaming && !self.streaming {
            self.streaming = true;
            self.history_printed = true;
            self.printed = 0;
            self.seen_steps.clear();
            self.printed_tools = [0; ToolFamily::ALL.len()];
            write!(self.out, "assistant> ")?;
        }

        if self.streaming {
            self.render_progress(view)?;
        }

        if self.streaming && !view.is_streaming {
            self.streaming = false;
            writeln!(self.out)?;
        }

        if view.notice != self.notice {
            self.notice = view.notice.clone();
            match &self.notice {
                Some(Notice::Error(message)) => writeln!(self.out, "! {}", message)?,
                Some(Notice::Info(message)) => writeln!(self.out, "* {}", message)?,
                None => {}
            }
        }

        self.out.flush()
    }

    fn render_progress(&mut self, view: &ViewState) -> io::Result<()> {
        for step in &view.search_steps {
            if self.seen_steps.insert(step.id.clone()) {
                write!(self.out, "\n  [search] {}\n", step.message)?;
            }
        }

        // Calls are append-only per family; the same id may be started again after finishing
        for (printed, family) in self.printed_tools.iter_mut().zip(ToolFamily::ALL) {
            let calls = &view.tools(family).calls;
            for call in calls.iter().skip(*printed) {
                write!(self.out, "\n  [{}] {}\n", family, call.name)?;
            }
            *printed = (*printed).max(calls.len());
        }

        // Text only grows during a reply; a shorter buffer means a fresh one
        let text = view.streaming_text.as_str();
        if text.len() < self.printed || !text.is_char_boundary(self.printed) {
            self.printed = 0;
        }
        if text.len() > self.printed {
            write!(self.out, "{}", &text[self.printed..])?;
            self.printed = text.len();
        }
        Ok(())
    }
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "you",
        MessageRole::Assistant => "assistant",
    }
}
