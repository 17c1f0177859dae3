use std::fmt::{self, Display, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};

use crate::types::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recoverable; parsing continues.
    Warning,
    /// Chunk or subobject unusable; parsing continues.
    Error,
    /// Model unusable; parsing aborts.
    Critical,
}
impl Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Io,
    Validation,
    Parsing,
    Compatibility,
    DataIntegrity,
}
impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Io => "io",
            Category::Validation => "validation",
            Category::Parsing => "parsing",
            Category::Compatibility => "compatibility",
            Category::DataIntegrity => "data-integrity",
        })
    }
}

/// Where in the parse an event happened. Filled in by whoever holds the
/// recorder at the time; all fields optional.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub position: Option<u64>,
    pub chunk: Option<String>,
    pub sub_object: Option<ObjectId>,
    pub version: Option<i32>,
}
impl Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if let Some(chunk) = &self.chunk {
            write!(f, "chunk {}", chunk)?;
            sep = ", ";
        }
        if let Some(pos) = self.position {
            write!(f, "{}offset {:#x}", sep, pos)?;
            sep = ", ";
        }
        if let Some(id) = self.sub_object {
            write!(f, "{}subobject {}", sep, id)?;
            sep = ", ";
        }
        if let Some(version) = self.version {
            write!(f, "{}version {}", sep, version)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    pub context: EventContext,
}
impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.category, self.message)?;
        let ctx = format!("{}", self.context);
        if !ctx.is_empty() {
            write!(f, " ({})", ctx)?;
        }
        Ok(())
    }
}

/// Accumulates every anomaly seen during one parse, in insertion order. The
/// core never throws across component boundaries; failure is this plus an
/// optional model.
#[derive(Debug, Default)]
pub struct ErrorRecorder {
    events: Vec<Event>,
    context: EventContext,
}

impl ErrorRecorder {
    pub fn new() -> ErrorRecorder {
        ErrorRecorder::default()
    }

    pub fn set_version(&mut self, raw: i32) {
        self.context.version = Some(raw);
    }
    pub fn set_position(&mut self, position: u64) {
        self.context.position = Some(position);
    }
    pub fn set_chunk(&mut self, chunk: Option<String>) {
        self.context.chunk = chunk;
    }
    pub fn set_sub_object(&mut self, id: Option<ObjectId>) {
        self.context.sub_object = id;
    }

    pub fn warning(&mut self, category: Category, message: impl Into<String>) {
        self.record(Severity::Warning, category, message);
    }
    pub fn error(&mut self, category: Category, message: impl Into<String>) {
        self.record(Severity::Error, category, message);
    }
    pub fn critical(&mut self, category: Category, message: impl Into<String>) {
        self.record(Severity::Critical, category, message);
    }

    pub fn record(&mut self, severity: Severity, category: Category, message: impl Into<String>) {
        let event = Event {
            severity,
            category,
            message: message.into(),
            context: self.context.clone(),
        };
        match severity {
            Severity::Warning => debug!("{}", event),
            Severity::Error => warn!("{}", event),
            Severity::Critical => error!("{}", event),
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn has_errors(&self, min_severity: Severity) -> bool {
        self.events.iter().any(|event| event.severity >= min_severity)
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.events.iter().map(|event| event.severity).max()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events.iter().filter(|event| event.severity == severity).count()
    }

    pub fn format_report(&self) -> String {
        let mut out = String::new();
        if self.events.is_empty() {
            out.push_str("no events recorded\n");
            return out;
        }
        let _ = writeln!(
            out,
            "{} event(s): {} warning(s), {} error(s), {} critical",
            self.events.len(),
            self.count(Severity::Warning),
            self.count(Severity::Error),
            self.count(Severity::Critical),
        );
        for event in &self.events {
            let _ = writeln!(out, "  {}", event);
        }
        out
    }
}

/// Cooperative cancellation flag, checked at chunk and BSP-opcode boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
