// SPDX-License-Identifier: MIT

pub mod background;
pub mod bus;
pub mod engine;
pub mod server;
pub mod tasks;
pub mod workflow;
