//! The host's pending write buffer.
#![allow(unsafe_code)]

/// Address the host returned from its last request-buffer call.
///
/// The host writes the next commit's frames here; the probe reads them back
/// when the commit lands. Nothing is copied at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRegion {
    ptr: *const u8,
}

// The region is only dereferenced on the thread that commits it, under the
// capture context's lock.
unsafe impl Send for WriteRegion {}

impl WriteRegion {
    /// No pending buffer.
    pub const EMPTY: Self = Self {
        ptr: std::ptr::null(),
    };

    /// Wraps a host buffer pointer.
    ///
    /// # Safety
    ///
    /// Until the next commit returns, `ptr` must stay valid for reads of
    /// that commit's `frames × block_align` bytes, and the host must not
    /// write to it concurrently with the commit.
    pub unsafe fn from_raw(ptr: *const u8) -> Self {
        Self { ptr }
    }

    /// Whether no buffer has been requested.
    pub fn is_empty(&self) -> bool {
        self.ptr.is_null()
    }

    /// The committed bytes, or `None` for an empty region.
    pub(crate) fn committed(&self, len: usize) -> Option<&[u8]> {
        if self.ptr.is_null() {
            return None;
        }
        // Validity for `len` bytes was promised in `from_raw`.
        Some(unsafe { std::slice::from_raw_parts(self.ptr, len) })
    }
}

impl Default for WriteRegion {
    fn default() -> Self {
        Self::EMPTY
    }
}
