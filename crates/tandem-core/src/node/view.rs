use crate::scene::NodeId;
use std::sync::Arc;

/// Observer of a view's render target, e.g. a dynamic skin that samples it.
///
/// Listeners are held by the view they observe and are called on the
/// producer thread from inside scene mutations.
pub trait ViewListener: Send + Sync {
    /// The view is gone; drop any reference to it.
    fn on_source_destroyed(&self);
    /// The view's content changed; re-pull it before the next read.
    fn on_source_requires_sync(&self);
}

#[derive(Default)]
pub struct ViewContent {
    pub(crate) children: Vec<NodeId>,
    /// Bumped whenever anything below this view changes appearance.
    pub(crate) paint_tracker: u64,
    pub(crate) listeners: Vec<Arc<dyn ViewListener>>,
}

impl ViewContent {
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn paint_tracker(&self) -> u64 {
        self.paint_tracker
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
