//! Active keybinding set
//!
//! The bindings are held as an immutable snapshot. Reloads swap in a whole
//! new snapshot, so a lookup sees either the old set or the new one.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Keybinding;

/// Registry of the currently active keybindings
#[derive(Debug)]
pub struct Registry {
    bindings: RwLock<Arc<[Keybinding]>>,
}

impl Registry {
    pub fn new(bindings: Vec<Keybinding>) -> Self {
        Self {
            bindings: RwLock::new(bindings.into()),
        }
    }

    /// Replace every binding at once
    pub async fn update(&self, bindings: Vec<Keybinding>) {
        let snapshot: Arc<[Keybinding]> = bindings.into();
        *self.bindings.write().await = snapshot;
    }

    /// Find the first binding, in configuration order, matching the pressed keys
    pub async fn find_match(&self, pressed: &[u16]) -> Option<Keybinding> {
        let bindings = self.snapshot().await;
        bindings
            .iter()
            .find(|binding| binding.combo.matches(pressed))
            .cloned()
    }

    /// The current binding set
    pub async fn snapshot(&self) -> Arc<[Keybinding]> {
        Arc::clone(&*self.bindings.read().await)
    }

    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }
}
