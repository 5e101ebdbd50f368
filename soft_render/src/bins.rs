//! The shared primitive bins between the vertex and fragment stages.
//!
//! Two banks of bins are kept so producers can refill one while stragglers
//! still rasterize the other. All cross-thread state is a pair of counters
//! per bank; see the vertex processor for the gate protocol built on them.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use glam::Vec4;

use crate::pipeline::BlendMode;
use crate::shader::{MAX_BINNED_PRIMS, MAX_VARYING_VECTORS};

/// One primitive, fully prepared for rasterization.
///
/// `screen_coords[i]` is `(x_screen, y_screen, z, 1/w)` per vertex; the
/// reciprocal w rides along for perspective-correct interpolation.
/// `barycentric` holds `dλ/dx`, `dλ/dy`, and `λ(0, 0)` for triangles.
#[derive(Copy, Clone, Debug)]
pub struct FragmentBin {
    pub screen_coords: [Vec4; 3],
    pub barycentric: [Vec4; 3],
    pub varyings: [Vec4; 3 * MAX_VARYING_VECTORS],
    /// Submission-order sequence number, for transparency sorting.
    pub prim_index: u32,
}

impl FragmentBin {
    pub const fn empty() -> Self {
        Self {
            screen_coords: [Vec4::ZERO; 3],
            barycentric: [Vec4::ZERO; 3],
            varyings: [Vec4::ZERO; 3 * MAX_VARYING_VECTORS],
            prim_index: 0,
        }
    }
}

/// One bank: bins, the dense id list the rasterizers iterate (and sorting
/// permutes), and the two protocol counters.
pub(crate) struct BinBank {
    bins: Box<[UnsafeCell<FragmentBin>]>,
    bin_ids: Box<[UnsafeCell<u32>]>,
    /// Producer count of reserved bins.
    pub num_bins_used: AtomicU32,
    /// Phase gate: `> 0` counts threads ready to rasterize, `< 0` counts
    /// threads still rasterizing.
    pub frag_processors: AtomicI64,
}

// SAFETY: the UnsafeCell contents are written through reserved slots (unique
// per `fetch_add` ticket) during production and only read during the
// rasterization phase, which the `frag_processors` gate separates from
// production with acquire/release ordering.
unsafe impl Sync for BinBank {}

impl BinBank {
    fn new() -> Self {
        Self {
            bins: (0..MAX_BINNED_PRIMS)
                .map(|_| UnsafeCell::new(FragmentBin::empty()))
                .collect(),
            bin_ids: (0..MAX_BINNED_PRIMS as u32).map(UnsafeCell::new).collect(),
            num_bins_used: AtomicU32::new(0),
            frag_processors: AtomicI64::new(0),
        }
    }

    /// Reserve one bin slot. `None` means the bank is full and must be
    /// flushed before retrying.
    #[inline]
    pub fn reserve(&self) -> Option<usize> {
        let slot = self.num_bins_used.fetch_add(1, Ordering::AcqRel) as usize;
        (slot < MAX_BINNED_PRIMS).then_some(slot)
    }

    /// Publish a bin into a reserved slot.
    ///
    /// # Safety
    ///
    /// `slot` must come from [`BinBank::reserve`] on this bank and not have
    /// been written already in this fill cycle.
    #[inline]
    pub unsafe fn write(&self, slot: usize, bin: FragmentBin) {
        // SAFETY: the reserve ticket makes `slot` unique among producers.
        unsafe {
            *self.bins[slot].get() = bin;
            *self.bin_ids[slot].get() = slot as u32;
        }
    }

    /// Bins reserved so far, clamped to capacity.
    pub fn bins_in_flight(&self) -> usize {
        (self.num_bins_used.load(Ordering::Acquire) as usize).min(MAX_BINNED_PRIMS)
    }

    /// Shared view of the bins for the rasterization phase.
    ///
    /// # Safety
    ///
    /// Callable only between the gate open (`frag_processors` negative) and
    /// the bank reset, while no producer writes this bank.
    pub unsafe fn bins(&self) -> &[FragmentBin] {
        // SAFETY: phase separation per the caller contract; UnsafeCell<T>
        // has the same layout as T.
        unsafe { core::slice::from_raw_parts(self.bins.as_ptr().cast(), MAX_BINNED_PRIMS) }
    }

    /// # Safety
    ///
    /// Same phase contract as [`BinBank::bins`].
    pub unsafe fn bin_ids(&self, count: usize) -> &[u32] {
        // SAFETY: phase separation per the caller contract.
        unsafe { core::slice::from_raw_parts(self.bin_ids.as_ptr().cast(), count) }
    }

    /// Order the bin id list before rasterization.
    ///
    /// Opaque triangle draws sort front-to-back on the stored `1/w` of
    /// vertex 0 to cut overdraw; blended draws sort by primitive index to
    /// restore submission order. Everything else keeps fill order.
    ///
    /// # Safety
    ///
    /// Only the single thread that closes the gate may call this, before it
    /// releases the other rasterizers.
    pub unsafe fn sort_for_raster(&self, count: usize, blend: BlendMode, depth_sort: bool) {
        // SAFETY: gate-closing thread has exclusive access to the id list.
        let ids = unsafe {
            core::slice::from_raw_parts_mut(self.bin_ids.as_ptr() as *mut u32, count)
        };
        // SAFETY: producers are parked at the gate; bins are stable.
        let bins = unsafe { self.bins() };

        if blend != BlendMode::Off {
            ids.sort_unstable_by_key(|&id| bins[id as usize].prim_index);
        } else if depth_sort {
            ids.sort_unstable_by_key(|&id| {
                // larger 1/w is closer; negating the raw float bits yields
                // an ascending front-to-back integer key
                (bins[id as usize].screen_coords[0].w.to_bits() as i32).wrapping_neg()
            });
        }
    }

    /// Re-arm the bank for the next fill cycle.
    pub fn reset(&self) {
        self.num_bins_used.store(0, Ordering::Release);
        self.frag_processors.store(0, Ordering::Release);
    }
}

/// The process-wide pair of banks.
pub(crate) struct BinQueue {
    banks: [BinBank; 2],
}

impl BinQueue {
    pub fn new() -> Self {
        Self {
            banks: [BinBank::new(), BinBank::new()],
        }
    }

    #[inline]
    pub fn bank(&self, index: usize) -> &BinBank {
        &self.banks[index & 1]
    }
}

/*-----------------------------------------------------------------------------
 * Spin backoff
-----------------------------------------------------------------------------*/

/// Exponential CPU-yielding to reduce spinlock overhead: 1, 3, then 7
/// pauses per check, capped.
#[inline]
pub(crate) fn cpu_yield_exponential(yield_count: u32) -> u32 {
    let pauses = match yield_count {
        0 => 1,
        1 => 3,
        _ => 7,
    };
    for _ in 0..pauses {
        core::hint::spin_loop();
    }
    (yield_count + 1).min(2)
}

/// Spin until `done` reports true.
#[inline]
pub(crate) fn spin_wait(mut done: impl FnMut() -> bool) {
    let mut yields = 0;
    while !done() {
        yields = cpu_yield_exponential(yields);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::{BinBank, FragmentBin};
    use crate::pipeline::BlendMode;
    use crate::shader::MAX_BINNED_PRIMS;

    fn bin_with(prim_index: u32, inv_w: f32) -> FragmentBin {
        let mut bin = FragmentBin::empty();
        bin.prim_index = prim_index;
        bin.screen_coords[0] = Vec4::new(0.0, 0.0, 0.0, inv_w);
        bin
    }

    #[test]
    fn reserve_hands_out_unique_slots_until_full() {
        let bank = BinBank::new();
        for expected in 0..MAX_BINNED_PRIMS {
            assert_eq!(bank.reserve(), Some(expected));
        }
        assert_eq!(bank.reserve(), None);

        bank.reset();
        assert_eq!(bank.reserve(), Some(0));
    }

    #[test]
    fn blended_bins_sort_by_submission_order() {
        let bank = BinBank::new();
        for (i, prim) in [2u32, 0, 3, 1].into_iter().enumerate() {
            let slot = bank.reserve().unwrap();
            assert_eq!(slot, i);
            // SAFETY: slot freshly reserved, single thread.
            unsafe { bank.write(slot, bin_with(prim, 1.0)) };
        }

        // SAFETY: no concurrent producers in this test.
        unsafe {
            bank.sort_for_raster(4, BlendMode::Alpha, false);
            assert_eq!(bank.bin_ids(4), &[1, 3, 0, 2]);
        }
    }

    #[test]
    fn opaque_triangles_sort_front_to_back() {
        let bank = BinBank::new();
        // 1/w: bigger means closer to the camera
        for (prim, inv_w) in [(0u32, 0.25f32), (1, 1.0), (2, 0.5)] {
            let slot = bank.reserve().unwrap();
            // SAFETY: slot freshly reserved, single thread.
            unsafe { bank.write(slot, bin_with(prim, inv_w)) };
        }

        // SAFETY: no concurrent producers in this test.
        unsafe {
            bank.sort_for_raster(3, BlendMode::Off, true);
            assert_eq!(bank.bin_ids(3), &[1, 2, 0]);
        }
    }
}
