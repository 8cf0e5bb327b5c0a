//! Optimistic UI state
//!
//! Displayed state is the confirmed base folded with the ordered list of
//! pending overlays. A commit folds its overlay into the base, and a refreshed
//! `entity:<kind>` listing replaces the base records of that kind.

pub mod reducer;

pub use reducer::{DashboardView, DisplayRecord, OverlayState, RecordStatus, SharedOverlay};
