//! Background command execution.
//!
//! A [`JobInteractor`] owns the single worker task. Handlers implementing
//! [`CommandHandler`] are collected into a [`HandlerRegistry`] at startup and
//! looked up by command kind for every queued command. Callers hand commands
//! over through a [`Dispatcher`].

pub mod dispatch;
pub mod handler;
pub mod interactor;

pub use dispatch::Dispatcher;
pub use handler::{CommandHandler, HandlerRegistry};
pub use interactor::{JobInteractor, DEFAULT_MAILBOX_CAPACITY, DEFAULT_REPORT_HISTORY};
