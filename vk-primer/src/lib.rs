// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Reconstruction ("priming") of Vulkan image contents for capture replay.
//!
//! When a captured Vulkan frame is replayed, the replay has to start from the exact GPU-visible
//! state that existed at the moment of capture. Creating the objects again is the easy part; the
//! hard part is putting the captured texel data back into every image, for any format, aspect,
//! tiling or sparse-binding configuration, on a device that may not be the one the capture was
//! taken on.
//!
//! # Overview
//!
//! - The [`State`](crate::state::State) tables describe the captured ("old") state that is being
//!   reconstructed and the ("new") state that the emitted replay commands build up.
//!
//! - Nothing in this crate talks to a Vulkan driver. Every Vulkan call is described as a
//!   [`Command`](crate::command::Command) and written through a
//!   [`StateBuilder`](crate::builder::StateBuilder), which applies it to the new state and
//!   forwards it to a [`CommandSink`](crate::command::CommandSink).
//!
//! - Byte payloads (texel data uploaded through mapped memory) are kept out of the command
//!   stream and stored once in a content-addressed [`ContentStore`](crate::content::ContentStore).
//!
//! - [`ScratchResources`](crate::scratch::ScratchResources) owns the transient objects used to
//!   execute priming work: command pools, a [`FlushingMemory`](crate::memory::FlushingMemory)
//!   bump allocator per device and a
//!   [`QueueCommandHandler`](crate::scratch::QueueCommandHandler) per queue.
//!
//! - The [`ImagePrimer`](crate::primer::ImagePrimer) restores image contents with one of three
//!   strategies: a buffer-to-image copy, rendering from staging input attachments, or storing
//!   texels from a compute shader.

pub use ash;
/// Represents memory size and offset values on a Vulkan device.
/// Analogous to the Rust `usize` type on the host.
pub use ash::vk::DeviceSize;
use std::{fmt, marker::PhantomData};

#[macro_use]
mod tests;
pub mod builder;
mod cache;
pub mod cleanup;
pub mod command;
pub mod content;
pub mod format;
pub mod memory;
pub mod primer;
pub mod scratch;
pub mod state;

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonExhaustive<'a>(PhantomData<&'a ()>);

impl fmt::Debug for NonExhaustive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("NonExhaustive")
    }
}

const NE: NonExhaustive<'static> = NonExhaustive(PhantomData);

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
#[inline]
pub(crate) const fn align_up(value: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    debug_assert!(alignment.is_power_of_two());

    (value + alignment - 1) & !(alignment - 1)
}

/// Rounds `value` up to the next multiple of `multiple`, which need not be a power of two.
#[inline]
pub(crate) const fn round_up(value: DeviceSize, multiple: DeviceSize) -> DeviceSize {
    value.div_ceil(multiple) * multiple
}
