/// Terminal interaction: rendering of UI events and the blocking prompts the
/// core suspends on (line input and yes/no confirmation).
use crossterm::style::Stylize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
    Dim(String),
    Heading(String),
    /// Titled multi-line text, e.g. a model reply or an analysis
    Block { title: String, body: String },
    /// A bullet entry with an optional indented detail line
    Item { text: String, detail: Option<String> },
}

impl UiEvent {
    /// Every piece of text the event carries, for matching in tests.
    #[cfg(test)]
    pub fn text(&self) -> String {
        match self {
            UiEvent::Info(s)
            | UiEvent::Success(s)
            | UiEvent::Warning(s)
            | UiEvent::Error(s)
            | UiEvent::Dim(s)
            | UiEvent::Heading(s) => s.clone(),
            UiEvent::Block { title, body } => format!("{title}\n{body}"),
            UiEvent::Item { text, detail } => match detail {
                Some(d) => format!("{text}\n{d}"),
                None => text.clone(),
            },
        }
    }
}

// ── Interaction seam ──────────────────────────────────────────────────────────

/// The only way the core talks to the user. Every call blocks until done.
pub trait Interaction {
    fn emit(&mut self, event: UiEvent);

    /// Yes/no question. Anything other than an explicit yes is a no.
    fn confirm(&mut self, question: &str) -> bool;

    /// Free-form line input. `None` on end-of-input or interrupt.
    fn ask(&mut self, prompt: &str) -> Option<String>;
}

// ── Console implementation ────────────────────────────────────────────────────

pub struct ConsoleInteraction {
    editor: DefaultEditor,
}

impl ConsoleInteraction {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }

    fn read_line(&mut self, prompt: &str) -> Option<String> {
        match self.editor.readline(prompt) {
            Ok(line) => Some(line),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => None,
            Err(e) => {
                tracing::warn!(error = %e, "readline failed");
                None
            }
        }
    }
}

impl Interaction for ConsoleInteraction {
    fn emit(&mut self, event: UiEvent) {
        render(&event);
    }

    fn confirm(&mut self, question: &str) -> bool {
        let prompt = format!("{question} [y/n]: ");
        loop {
            let Some(answer) = self.read_line(&prompt) else {
                return false;
            };
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => println!("{}", "Please answer y or n".yellow()),
            }
        }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        let line = self.read_line(prompt)?;
        if !line.trim().is_empty() {
            let _ = self.editor.add_history_entry(line.as_str());
        }
        Some(line)
    }
}

fn render(event: &UiEvent) {
    match event {
        UiEvent::Info(s) => println!("{s}"),
        UiEvent::Success(s) => println!("{}", s.as_str().green()),
        UiEvent::Warning(s) => println!("{}", s.as_str().yellow()),
        UiEvent::Error(s) => println!("{}", s.as_str().red()),
        UiEvent::Dim(s) => println!("{}", s.as_str().dim()),
        UiEvent::Heading(s) => println!("\n{}", s.as_str().bold().blue()),
        UiEvent::Block { title, body } => {
            println!("\n{}", title.as_str().bold());
            println!("{body}");
        }
        UiEvent::Item { text, detail } => {
            let width = terminal_width().saturating_sub(4);
            println!("- {}", truncate_to_width(text, width));
            if let Some(d) = detail {
                println!("  {}", d.as_str().cyan());
            }
        }
    }
}

fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(w, _)| w as usize)
        .unwrap_or(100)
}

/// Cut `s` so it fits in `max` display columns, marking the cut with `…`.
pub fn truncate_to_width(s: &str, max: usize) -> String {
    if UnicodeWidthStr::width(s) <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    // One column goes to the ellipsis
    let budget = max - 1;
    let mut used = 0usize;
    let mut out = String::new();
    for ch in s.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

// ── Test double ───────────────────────────────────────────────────────────────

#[cfg(test)]
#[derive(Default)]
pub struct ScriptedInteraction {
    pub confirms: std::collections::VecDeque<bool>,
    pub inputs: std::collections::VecDeque<String>,
    pub questions: Vec<String>,
    pub events: Vec<UiEvent>,
}

#[cfg(test)]
impl ScriptedInteraction {
    pub fn confirming(answers: &[bool]) -> Self {
        Self {
            confirms: answers.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.events.iter().any(|e| e.text().contains(needle))
    }
}

#[cfg(test)]
impl Interaction for ScriptedInteraction {
    fn emit(&mut self, event: UiEvent) {
        self.events.push(event);
    }

    fn confirm(&mut self, question: &str) -> bool {
        self.questions.push(question.to_string());
        self.confirms.pop_front().unwrap_or(false)
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        self.questions.push(prompt.to_string());
        self.inputs.pop_front()
    }
}
