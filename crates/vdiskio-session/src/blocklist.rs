//! Two-phase allocated-block transfer
//!
//! A successful allocation query leaves the block list in engine-owned
//! memory; the caller sees only a [`BlockListDescriptor`]. The second
//! phase copies the records into caller storage and releases the engine
//! list in a single consuming call, so the list is freed exactly once no
//! matter how the copy goes.

use std::fmt;
use vdiskio_engine::{Block, DiskEngine, Error, RawBlockList, Result, check};

/// Descriptor for an engine-owned allocated-block list
///
/// Move-only and not caller-constructible: one exists only for a query
/// that succeeded. Consume it with [`copy_and_free`]; a descriptor
/// dropped unconsumed releases the engine list on drop as a backstop.
///
/// [`copy_and_free`]: BlockListDescriptor::copy_and_free
pub struct BlockListDescriptor<'a> {
    engine: &'a dyn DiskEngine,
    list: Option<RawBlockList>,
    num_blocks: u32,
}

impl fmt::Debug for BlockListDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockListDescriptor")
            .field("list", &self.list)
            .field("num_blocks", &self.num_blocks)
            .finish()
    }
}

impl<'a> BlockListDescriptor<'a> {
    pub(crate) fn new(engine: &'a dyn DiskEngine, list: RawBlockList, num_blocks: u32) -> Self {
        Self {
            engine,
            list: Some(list),
            num_blocks,
        }
    }

    /// Number of records in the engine-owned list
    #[must_use]
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    /// Copy the list into `dest` and release it.
    ///
    /// `dest` must hold at least [`num_blocks`](Self::num_blocks)
    /// entries; a too-small destination releases the list without
    /// copying and reports [`Error::InsufficientCapacity`]. Otherwise
    /// exactly `num_blocks` records are copied in engine order and the
    /// engine list is freed unconditionally. A failing copy is reported
    /// ahead of the release outcome; a successful copy reports the
    /// release's own code. A zero-length list is a valid no-op copy
    /// that still frees.
    pub fn copy_and_free(mut self, dest: &mut [Block]) -> Result<()> {
        // `new` always populates the list; `take` leaves `None` so the
        // drop backstop stays idle.
        let Some(list) = self.list.take() else {
            return Ok(());
        };
        let needed = self.num_blocks as usize;
        if dest.len() < needed {
            let _ = self.engine.free_block_list(list);
            return Err(Error::InsufficientCapacity {
                capacity: dest.len(),
                needed,
            });
        }
        let copy_code = self.engine.copy_block_list(list, &mut dest[..needed]);
        let free_code = self.engine.free_block_list(list);
        check("copy_block_list", copy_code)?;
        check("free_block_list", free_code)
    }
}

impl Drop for BlockListDescriptor<'_> {
    fn drop(&mut self) {
        if let Some(list) = self.list.take() {
            let _ = self.engine.free_block_list(list);
        }
    }
}
