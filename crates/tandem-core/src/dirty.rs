//! Per-node dirty tracking.
//!
//! Each producer setter flips exactly one [`DirtyFlags`] category; the sync
//! pass copies only the categories that are set. `pending_sync` and
//! `parent_paint` live beside the category bits because they follow
//! different rules: a node can need a first full sync without any category
//! being re-triggered, and the parent-paint notification is cleared on every
//! sync regardless of what was copied.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u8 {
        /// Position or size changed.
        const GEOMETRY = 1 << 0;
        const TRANSFORM = 1 << 1;
        const COLOR_TRANSFORM = 1 << 2;
        /// Order, transparency, visibility, blend mode or mask reference.
        const PARAMETERS = 1 << 3;
        /// Kind-specific content: paint, image, child list, referenced view.
        const CONTENT = 1 << 4;
        /// The subtree used as this node's mask has to be re-rendered.
        const MASK_CONTENT = 1 << 5;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyState {
    flags: DirtyFlags,
    pending_sync: bool,
    parent_paint: bool,
}

impl DirtyState {
    /// Fresh nodes start fully dirty so the first sync copies everything.
    pub fn new() -> Self {
        Self {
            flags: DirtyFlags::all(),
            pending_sync: true,
            parent_paint: false,
        }
    }

    pub fn flags(&self) -> DirtyFlags {
        self.flags
    }

    pub fn mark(&mut self, flags: DirtyFlags) {
        self.flags |= flags;
        self.pending_sync = true;
    }

    pub fn mark_all(&mut self) {
        self.mark(DirtyFlags::all());
    }

    pub fn is_pending_sync(&self) -> bool {
        self.pending_sync
    }

    pub fn is_parent_paint(&self) -> bool {
        self.parent_paint
    }

    /// Sets the parent-paint flag, returning `false` if it was already set.
    /// Propagation stops at nodes that already notified since the last sync.
    pub fn raise_parent_paint(&mut self) -> bool {
        !std::mem::replace(&mut self.parent_paint, true)
    }

    pub fn clear_parent_paint(&mut self) {
        self.parent_paint = false;
    }

    pub fn clear(&mut self) {
        self.flags = DirtyFlags::empty();
        self.pending_sync = false;
        self.parent_paint = false;
    }
}

impl Default for DirtyState {
    fn default() -> Self {
        Self::new()
    }
}
