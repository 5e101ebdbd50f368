//! Thread-sliced attachment clearing.

use crate::texture::TextureView;

/// One attachment with its pre-encoded clear value.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ClearTarget {
    pub view: TextureView,
    /// The clear color encoded in the attachment's format; only the first
    /// `bytes_per_texel` bytes are meaningful.
    pub texel: [u8; 32],
}

/// Clears a set of attachments, each split into one contiguous texel range
/// per thread.
pub(crate) struct ClearTask {
    pub targets: Vec<ClearTarget>,
    pub num_threads: usize,
}

impl ClearTask {
    pub fn run(&self, thread_id: usize) {
        for target in &self.targets {
            clear_target(target, thread_id, self.num_threads);
        }
    }
}

fn clear_target(target: &ClearTarget, thread_id: usize, num_threads: usize) {
    let view = &target.view;
    let bpt = view.bytes_per_texel();
    let total = view.width() as usize * view.height() as usize * view.depth() as usize;

    let begin = total * thread_id / num_threads;
    let end = total * (thread_id + 1) / num_threads;
    if begin == end {
        return;
    }

    // SAFETY: texel 0 always exists (views are non-empty) and the per-thread
    // ranges [begin, end) are disjoint.
    let base = unsafe { view.texel_ptr(0, 0).add(begin * bpt) };
    let count = end - begin;

    // SAFETY: `base .. base + count * bpt` stays inside this thread's range.
    unsafe {
        match bpt {
            1 => core::ptr::write_bytes(base, target.texel[0], count),
            2 => {
                let pattern = u16::from_ne_bytes([target.texel[0], target.texel[1]]);
                let ptr = base.cast::<u16>();
                for i in 0..count {
                    ptr.add(i).write_unaligned(pattern);
                }
            }
            4 => {
                let pattern = u32::from_ne_bytes(target.texel[..4].try_into().unwrap());
                let ptr = base.cast::<u32>();
                for i in 0..count {
                    ptr.add(i).write_unaligned(pattern);
                }
            }
            8 => {
                let pattern = u64::from_ne_bytes(target.texel[..8].try_into().unwrap());
                let ptr = base.cast::<u64>();
                for i in 0..count {
                    ptr.add(i).write_unaligned(pattern);
                }
            }
            _ => {
                for i in 0..count {
                    core::ptr::copy_nonoverlapping(target.texel.as_ptr(), base.add(i * bpt), bpt);
                }
            }
        }
    }
}
