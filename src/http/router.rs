//! Segment-directory request routing.
//!
//! [`make_directory`] builds a handler that dispatches on the first
//! unconsumed path segment and recurses into the rest. Unmatched segments
//! propagate [`RouteOutcome::NotFound`], which the connection handler
//! turns into the fixed 404 response. Directories compose, so deeper
//! dispatch trees need no contract changes.
//!
//! Handlers are `Rc<dyn Fn>` rather than `Arc`: every handler runs on the
//! reactor thread, and keeping them `!Send` makes that rule structural.

use std::collections::HashMap;
use std::rc::Rc;

use super::{Request, Response};

/// What a handler did with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The handler produced a response.
    Handled(Response),
    /// No route matched; the caller synthesizes the 404.
    NotFound,
}

impl RouteOutcome {
    /// Returns true if a handler produced a response.
    pub fn is_handled(&self) -> bool {
        matches!(self, RouteOutcome::Handled(_))
    }
}

/// A route handler. Receives the full request (handlers such as the
/// notify route inspect the raw path) and the path segments it has not
/// yet consumed.
pub type Handler = Rc<dyn Fn(&Request, &[&str]) -> RouteOutcome>;

/// Wraps a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Request, &[&str]) -> RouteOutcome + 'static,
{
    Rc::new(f)
}

/// Builds a directory handler from segment → handler entries.
///
/// The directory consumes the first remaining segment (the empty string
/// when the path is exhausted), looks it up, and invokes the match with
/// the remaining segments. A missing entry is `NotFound`.
pub fn make_directory(entries: HashMap<&'static str, Handler>) -> Handler {
    handler(move |request, segments| {
        let (first, rest) = match segments.split_first() {
            Some((first, rest)) => (*first, rest),
            None => ("", &[] as &[&str]),
        };
        match entries.get(first) {
            Some(entry) => entry(request, rest),
            None => RouteOutcome::NotFound,
        }
    })
}
