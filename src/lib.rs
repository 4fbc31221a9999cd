// SPDX-License-Identifier: MIT

pub mod sdk;
pub mod voxant;
