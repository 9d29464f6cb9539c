//! Binary diff visualization.
//!
//! A [`MatchDocument`] is loaded from disk, viewed from this session's
//! [`Role`] by a [`DiffViewer`], and kept in the [`ViewRegistry`] so later
//! RPC calls can list, sort and activate its rows.

pub mod document;
pub mod viewer;

pub use document::{
    Block, BlockMatchPair, FunctionMatch, MatchDocument, MatchDocumentError, Role,
    UnidentifiedBlocks,
};
pub use viewer::{DiffColors, DiffViewer, MatchRow, SortColumn, COLUMN_HEADERS, VIEW_TITLE};

use std::sync::{Arc, Mutex, MutexGuard};

/// Open diff views, addressed by the id returned from [`insert`](Self::insert).
#[derive(Clone, Default)]
pub struct ViewRegistry {
    views: Arc<Mutex<Vec<DiffViewer>>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DiffViewer>> {
        self.views.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, viewer: DiffViewer) -> usize {
        let mut views = self.lock();
        views.push(viewer);
        views.len() - 1
    }

    /// Snapshot of a view.
    pub fn get(&self, id: usize) -> Option<DiffViewer> {
        self.lock().get(id).cloned()
    }

    /// Most recently opened view.
    pub fn latest(&self) -> Option<(usize, DiffViewer)> {
        let views = self.lock();
        let id = views.len().checked_sub(1)?;
        Some((id, views[id].clone()))
    }

    pub fn sort(&self, id: usize, column: SortColumn, descending: bool) -> bool {
        match self.lock().get_mut(id) {
            Some(viewer) => {
                viewer.sort_rows(column, descending);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
