//! Lowering of an SSA module into a *pointer state subgraph* (PSS): a
//! directed graph whose nodes are the pointer-relevant events of the program
//! (allocations, stores, loads, pointer arithmetic, calls, returns, merges)
//! and whose edges preserve the control-flow order a points-to solver needs.
//!
//! The input is an already-resolved [`ir::Module`]; sizes and offsets come
//! from a [`layout::DataLayout`] oracle. [`pss::Graph::build`] produces the
//! graph rooted at the global-initializer prefix (or at `main` when the
//! module has no globals).

pub mod ir;
pub mod layout;
pub mod pss;
