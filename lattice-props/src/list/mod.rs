//! Ordered Collections
//!
//! Observable lists with splice-based mutation. Every mutator is expressed
//! as a splice so listeners see a uniform `remove`/`add`/`length` sequence,
//! and wholesale replacement is diffed down to the splices that matter.

mod collection;
mod diff;

pub use collection::{ObservableList, MAX_INDEX};
