//! Captured diagnostic output
//!
//! A push/drain buffer that collects `log`/`warn`/`error` calls made through a
//! [`Scope`](crate::trap::Scope) so the reporter can print them next to the
//! phase that produced them.

use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{ConsoleOutput, OutputKind, SourceLocation};

#[derive(Clone, Debug, Default)]
pub struct OutputSink {
    entries: Arc<Mutex<Vec<ConsoleOutput>>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: OutputKind, message: impl Into<String>, location: SourceLocation) {
        let entry = ConsoleOutput {
            kind,
            message: message.into(),
            location,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Take everything pushed so far
    pub fn drain(&self) -> Vec<ConsoleOutput> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_drain() {
        let sink = OutputSink::new();
        sink.push(OutputKind::Log, "one", SourceLocation::unknown());
        sink.clone()
            .push(OutputKind::Warn, "two", SourceLocation::unknown());
        assert_eq!(sink.len(), 2);

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].kind, OutputKind::Warn);
        assert!(sink.is_empty());
    }
}
