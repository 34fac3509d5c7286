//! Explicit bundle-window builder.
//!
//! libmapper's C core suspends a coroutine-like "queue" between
//! `mapper_device_start_queue` and `mapper_device_send_queue` calls so
//! several signal updates can be delivered as one timestamped bundle. There
//! is no coroutine equivalent here (Design Note 5): a [`Queue`] instead
//! hands back an explicit [`QueueHandle`] token that [`crate::device::Device`]
//! threads through calls until the caller flushes it.

use std::collections::HashMap;

use crate::codec::{Bundle, Message};
use crate::time::TimeTag;

/// Opaque handle identifying one open bundle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(u64);

/// Tracks bundle windows opened with [`Queue::begin`] until they are
/// flushed with [`Queue::end`].
#[derive(Debug, Default)]
pub struct Queue {
    next_id: u64,
    open: HashMap<QueueHandle, Bundle>,
}

impl Queue {
    /// Create an empty queue with no open windows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new bundle window at timestamp `t`, returning a handle that
    /// must later be passed to [`Queue::set_value`] and [`Queue::end`].
    pub fn begin(&mut self, t: TimeTag) -> QueueHandle {
        let handle = QueueHandle(self.next_id);
        self.next_id += 1;
        self.open.insert(handle, Bundle::new(t));
        handle
    }

    /// Append a message to the bundle identified by `handle`. A no-op if
    /// the handle is unknown or was already flushed.
    pub fn set_value(&mut self, handle: QueueHandle, msg: Message) {
        if let Some(bundle) = self.open.get_mut(&handle) {
            bundle.messages.push(msg);
        }
    }

    /// Close the window and return its accumulated bundle for sending.
    /// Returns `None` if `handle` was unknown or already flushed.
    pub fn end(&mut self, handle: QueueHandle) -> Option<Bundle> {
        self.open.remove(&handle)
    }

    /// Number of windows currently open.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    #[test]
    fn begin_set_end_builds_one_bundle_in_order() {
        let mut q = Queue::new();
        let h = q.begin(TimeTag::new(42, 0));
        q.set_value(h, Message::new("/a").arg(Value::Int32(1)));
        q.set_value(h, Message::new("/b").arg(Value::Int32(2)));
        let bundle = q.end(h).expect("bundle should be present");
        assert_eq!(bundle.messages.len(), 2);
        assert_eq!(bundle.messages[0].address, "/a");
        assert_eq!(bundle.messages[1].address, "/b");
        assert!(q.end(h).is_none(), "handle should not be reusable");
    }

    #[test]
    fn independent_handles_do_not_interfere() {
        let mut q = Queue::new();
        let h1 = q.begin(TimeTag::new(1, 0));
        let h2 = q.begin(TimeTag::new(2, 0));
        q.set_value(h1, Message::new("/a"));
        q.set_value(h2, Message::new("/b"));
        assert_eq!(q.open_count(), 2);
        let b1 = q.end(h1).unwrap();
        let b2 = q.end(h2).unwrap();
        assert_eq!(b1.messages[0].address, "/a");
        assert_eq!(b2.messages[0].address, "/b");
    }
}
