//! Page-aligned host buffers
//!
//! Device transfers want host memory that starts on a page boundary. This
//! module provides a zero-initialized, fixed-length buffer for any plain old
//! data type, with byte views for transfer and typed views for construction.

use crate::{Error, Result};
use bytemuck::Pod;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

/// A zero-initialized buffer of `T` whose first element sits on `alignment`
pub struct AlignedBuffer<T: Pod> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
    _marker: PhantomData<T>,
}

impl<T: Pod> AlignedBuffer<T> {
    /// Allocate `len` zeroed elements aligned to `alignment` bytes
    ///
    /// Fails if the alignment is not a power of two, is smaller than the
    /// natural alignment of `T`, or the byte size overflows.
    pub fn zeroed(len: usize, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() || alignment < mem::align_of::<T>() {
            return Err(Error::Configuration(format!(
                "Alignment {alignment} must be a power of two and at least {}",
                mem::align_of::<T>()
            )));
        }

        let size = len.checked_mul(mem::size_of::<T>()).ok_or_else(|| {
            Error::Configuration(format!("Buffer of {len} elements overflows usize"))
        })?;
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|e| Error::Configuration(format!("Invalid buffer layout: {e}")))?;

        if size == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len,
                layout,
                _marker: PhantomData,
            });
        }

        // Safety: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) } as *mut T;
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        };

        Ok(Self {
            ptr,
            len,
            layout,
            _marker: PhantomData,
        })
    }

    /// Allocate an aligned copy of `data`
    pub fn from_slice(data: &[T], alignment: usize) -> Result<Self> {
        let mut buffer = Self::zeroed(data.len(), alignment)?;
        buffer.as_mut_slice().copy_from_slice(data);
        Ok(buffer)
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // Safety: ptr is valid for len initialized elements (or dangling with len * size 0)
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // Safety: unique access through &mut self
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Raw bytes, as they would be transferred to the device
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.as_mut_slice())
    }

    /// Zero every element
    pub fn clear(&mut self) {
        self.as_bytes_mut().fill(0);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment the buffer was allocated with
    #[inline]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl<T: Pod> Drop for AlignedBuffer<T> {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            // Safety: allocated in `zeroed` with this exact layout
            unsafe {
                dealloc(self.ptr.as_ptr() as *mut u8, self.layout);
            }
        }
    }
}

impl<T: Pod> Clone for AlignedBuffer<T> {
    fn clone(&self) -> Self {
        let mut copy = match Self::zeroed(self.len, self.layout.align()) {
            Ok(copy) => copy,
            // The layout was already validated when `self` was created
            Err(_) => handle_alloc_error(self.layout),
        };
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        copy
    }
}

impl<T: Pod> std::fmt::Debug for AlignedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("alignment", &self.layout.align())
            .finish()
    }
}

// Safety: AlignedBuffer owns its data and T is plain old data
unsafe impl<T: Pod + Send> Send for AlignedBuffer<T> {}
// Safety: shared access only hands out &[T]
unsafe impl<T: Pod + Sync> Sync for AlignedBuffer<T> {}
