//! Message Bus (module B): process-wide ordered sink for info/warning/
//! error/fatal/debug events. Grounded on the dedup-tag convention in
//! `original_source/HopsanCore/src/ComponentSystem.cc`
//! (`addWarningMessage(..., "toofewsamples")`) and on the teacher's habit
//! of scoping a logger per owning object (`Universe`/`World` in
//! `legion`'s `src/lib.rs`), reinterpreted as an explicit host-polled
//! queue since the spec requires `getMessage`/`checkMessage` semantics a
//! tracing subscriber alone doesn't give a host.

use std::collections::VecDeque;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Info,
    Warning,
    Error,
    Fatal,
    Debug,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub text: String,
    pub kind: MessageKind,
    pub tag: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    info: usize,
    warning: usize,
    error: usize,
    fatal: usize,
    debug: usize,
}

/// FIFO queue of [`Message`]s with per-kind counters, shared by every
/// component/system owned by one engine instance.
#[derive(Debug, Default)]
pub struct MessageBus {
    inner: Mutex<BusInner>,
}

#[derive(Debug, Default)]
struct BusInner {
    queue: VecDeque<Message>,
    counters: Counters,
}

impl MessageBus {
    pub fn new() -> Self {
        MessageBus::default()
    }

    pub fn push(&self, text: impl Into<String>, kind: MessageKind, tag: Option<&str>) {
        let text = text.into();
        match kind {
            MessageKind::Info => tracing::info!(%text, "hopsan message"),
            MessageKind::Warning => tracing::warn!(%text, "hopsan message"),
            MessageKind::Error => tracing::error!(%text, "hopsan message"),
            MessageKind::Fatal => tracing::error!(%text, fatal = true, "hopsan message"),
            MessageKind::Debug => tracing::debug!(%text, "hopsan message"),
        }

        let mut inner = self.inner.lock();
        match kind {
            MessageKind::Info => inner.counters.info += 1,
            MessageKind::Warning => inner.counters.warning += 1,
            MessageKind::Error => inner.counters.error += 1,
            MessageKind::Fatal => inner.counters.fatal += 1,
            MessageKind::Debug => inner.counters.debug += 1,
        }
        inner.queue.push_back(Message {
            text,
            kind,
            tag: tag.map(|s| s.to_string()),
        });
    }

    pub fn info(&self, text: impl Into<String>) {
        self.push(text, MessageKind::Info, None);
    }
    pub fn warning(&self, text: impl Into<String>) {
        self.push(text, MessageKind::Warning, None);
    }
    pub fn warning_tagged(&self, text: impl Into<String>, tag: &str) {
        self.push(text, MessageKind::Warning, Some(tag));
    }
    pub fn error(&self, text: impl Into<String>) {
        self.push(text, MessageKind::Error, None);
    }
    pub fn fatal(&self, text: impl Into<String>) {
        self.push(text, MessageKind::Fatal, None);
    }
    pub fn debug(&self, text: impl Into<String>) {
        self.push(text, MessageKind::Debug, None);
    }

    /// Pops the oldest unread message, if any.
    pub fn get_message(&self) -> Option<Message> {
        self.inner.lock().queue.pop_front()
    }

    pub fn check_message(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn count_info(&self) -> usize {
        self.inner.lock().counters.info
    }
    pub fn count_warning(&self) -> usize {
        self.inner.lock().counters.warning
    }
    pub fn count_error(&self) -> usize {
        self.inner.lock().counters.error
    }
    pub fn count_fatal(&self) -> usize {
        self.inner.lock().counters.fatal
    }
    pub fn count_debug(&self) -> usize {
        self.inner.lock().counters.debug
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.counters = Counters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_and_counters() {
        let bus = MessageBus::new();
        bus.info("first");
        bus.warning("second");
        assert_eq!(bus.check_message(), 2);
        assert_eq!(bus.get_message().unwrap().text, "first");
        assert_eq!(bus.count_info(), 1);
        assert_eq!(bus.count_warning(), 1);
        assert_eq!(bus.get_message().unwrap().text, "second");
        assert_eq!(bus.check_message(), 0);
    }

    #[test]
    fn tagged_warning_carries_tag() {
        let bus = MessageBus::new();
        bus.warning_tagged("too few samples", "toofewsamples");
        let msg = bus.get_message().unwrap();
        assert_eq!(msg.tag.as_deref(), Some("toofewsamples"));
    }
}
