//! Built-in component implementations registered by
//! [`default_registry`](crate::component::default_registry).

pub mod links;
pub mod matchers;
pub mod modules;
pub mod selectors;
pub mod sources;
pub mod stages;
