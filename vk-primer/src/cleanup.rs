// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{
    builder::StateBuilder,
    command::{Command, Object},
};
use ash::vk;

/// Objects that must be destroyed together, in reverse order of registration.
///
/// Objects that depend on others are registered after them, so unwinding destroys a descriptor
/// set before its pool and a view before its image.
#[derive(Debug, Default)]
pub struct CleanupStack {
    entries: Vec<(vk::Device, Object)>,
}

impl CleanupStack {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object` for destruction.
    #[inline]
    pub fn push(&mut self, device: vk::Device, object: Object) {
        self.entries.push((device, object));
    }

    /// Moves every entry of `other` on top of this stack.
    #[inline]
    pub fn append(&mut self, other: &mut CleanupStack) {
        self.entries.append(&mut other.entries);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroys every registered object, last registered first, and leaves the stack empty.
    pub fn unwind(&mut self, sb: &mut StateBuilder<'_>) {
        while let Some((device, object)) = self.entries.pop() {
            sb.write(Command::Destroy { device, object });
        }
    }
}
