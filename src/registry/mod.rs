//! # Registry
//!
//! Process-local registration of the content-generation capability.
//!
//! Handlers are injected per task type at bootstrap; the executor resolves
//! them for every task it runs. A task whose type has no handler fails with a
//! critical `system` classification.

pub mod task_handler_registry;

pub use task_handler_registry::TaskHandlerRegistry;
