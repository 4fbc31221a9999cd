// SPDX-License-Identifier: MIT

pub mod events;
pub mod executor;
pub mod run;
pub(crate) mod scheduler;
pub mod settings;

pub use events::{Event, EventSubscription};
pub use executor::Executor;
pub use run::{CancelReason, RunHandle, RunId, RunStatus};
pub use settings::ExecutorSettings;
