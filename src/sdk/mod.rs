// SPDX-License-Identifier: MIT

pub mod error;
pub mod hooks;
pub mod retry;
pub mod step;
pub mod task;
