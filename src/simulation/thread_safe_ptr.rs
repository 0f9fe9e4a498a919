/// Raw pointer into a buffer that several workers write to at provably disjoint indices.
///
/// The background grid hands one of these to every block of a colour sweep: blocks of
/// the same colour never share a node, so no two workers ever touch the same element.
#[derive(Copy, Clone)]
pub struct ThreadSafeMutPtr<T> {
    ptr: *mut T,
    len: usize,
}

unsafe impl<T> Sync for ThreadSafeMutPtr<T> {}
unsafe impl<T> Send for ThreadSafeMutPtr<T> {}

impl<T> ThreadSafeMutPtr<T> {
    pub fn new(slice: &mut [T]) -> ThreadSafeMutPtr<T> {
        ThreadSafeMutPtr {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// The buffer must outlive the pointer and no other worker may access `idx`
    /// while the returned reference is alive.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, idx: usize) -> &mut T {
        assert!(idx < self.len);
        &mut *self.ptr.add(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn disjoint_parallel_writes() {
        let mut buffer = vec![0usize; 1000];
        let ptr = ThreadSafeMutPtr::new(&mut buffer);
        (0..ptr.len()).into_par_iter().for_each(|i| unsafe {
            *ptr.get_mut(i) = i * 2;
        });
        assert!(buffer.iter().enumerate().all(|(i, &v)| v == i * 2));
    }
}
