// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session-scoped shared todo list.
//!
//! The list is deliberately process-wide per session: several tools and the
//! host UI observe the same state.  One mutex guards it; writers replace the
//! whole list; listeners run under the lock and receive an immutable
//! snapshot, so every observer sees each revision exactly once and in order.

use std::sync::{Arc, Mutex};

use bosun_model::TodoItem;

type Listener = Box<dyn Fn(&[TodoItem]) + Send + Sync>;

#[derive(Default)]
struct TodoStateInner {
    items: Vec<TodoItem>,
    listeners: Vec<Listener>,
}

/// Shared handle to the session's todo list.  Cheap to clone; pass it into
/// tool constructors rather than reaching for globals.
#[derive(Clone, Default)]
pub struct TodoState {
    inner: Arc<Mutex<TodoStateInner>>,
}

impl TodoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable snapshot of the current list.
    pub fn snapshot(&self) -> Vec<TodoItem> {
        self.inner.lock().expect("todo lock poisoned").items.clone()
    }

    /// Replace the entire list and notify listeners under the lock.
    pub fn replace(&self, items: Vec<TodoItem>) {
        let inner = &mut *self.inner.lock().expect("todo lock poisoned");
        inner.items = items;
        for listener in &inner.listeners {
            listener(&inner.items);
        }
    }

    pub fn add_listener(&self, listener: impl Fn(&[TodoItem]) + Send + Sync + 'static) {
        self.inner
            .lock()
            .expect("todo lock poisoned")
            .listeners
            .push(Box::new(listener));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
