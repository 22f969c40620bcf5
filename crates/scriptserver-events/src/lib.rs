//! Console event parsing for ScriptServer
//!
//! Each console line is tried against the matchers of the active flavor in
//! [`EventKind::ALL`](scriptserver_core::EventKind::ALL) order. Kinds the
//! flavor does not override use the default flavor's matcher, and the first
//! match wins.

mod flavor;
mod parser;

pub use flavor::{FlavorMatcherSet, FlavorRegistry, MatchFn, pattern_matcher};
pub use parser::EventParser;
