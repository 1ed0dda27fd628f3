//! Logging hooks behind the `tracing` feature.
//!
//! Spans emitted by the crate:
//!
//! - `search`: one [`Finder::search`](crate::Finder::search) call, with the
//!   target label and point group.
//! - `scan`: the orientation sweep, with the orientation count.
//! - `refine_particles`: refinement of a particle list.
//! - `select`: one [`SelectionFilters::apply`](crate::SelectionFilters::apply)
//!   pass.
//!
//! Info events inside them report `engine_ready`, `region`, `peaks` (count, threshold and
//! whether it was lowered), `collapsed`, `scan_done`, `refined` and one
//! `filter` event per selection step with the number removed. Per-orientation
//! and per-iteration detail goes out at debug level.

/// Info-level span around a search, scan, refinement or selection pass.
#[cfg(feature = "tracing")]
macro_rules! trace_span {
    ($name:expr $(, $($field:tt)*)?) => {
        tracing::info_span!($name $(, $($field)*)?)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_span {
    ($name:expr $(, $($field:tt)*)?) => {
        $crate::trace::NoopSpan
    };
}

/// Info-level event with counts; without the feature the values are still
/// evaluated so bindings used only for logging stay used.
#[cfg(feature = "tracing")]
macro_rules! trace_event {
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::info!(name: $name, $($key = $value),+)
    };
    ($name:expr) => {
        tracing::info!(name: $name)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_event {
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        let _ = ($($value,)+);
    };
    ($name:expr) => {};
}

/// Debug-level event, one per orientation scored or refinement step.
#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::debug!(name: $name, $($key = $value),+)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        let _ = ($($value,)+);
    };
}

pub(crate) use trace_debug;
pub(crate) use trace_event;
pub(crate) use trace_span;

/// Stand-in for `tracing::span::EnteredSpan`.
#[cfg(not(feature = "tracing"))]
pub struct NoopSpan;

#[cfg(not(feature = "tracing"))]
impl NoopSpan {
    #[inline]
    pub fn entered(self) -> Self {
        self
    }
}
