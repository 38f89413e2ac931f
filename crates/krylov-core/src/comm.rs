//! Collective reductions over a process group.
//!
//! Solvers only ever need an in-place all-reduce sum. Every rank of a group
//! must issue the same reductions in the same order, with the same element
//! type and length; [`ThreadGroup`] reports a mismatch as an error instead of
//! silently mixing buffers.

use std::any::Any;
use std::cell::Cell;
use std::ops::AddAssign;
use std::sync::{Arc, Barrier, Mutex, PoisonError};

use crate::error::{Error, Result};

/// Element types that can travel through a reduction.
pub trait Reducible: Copy + Send + Sync + AddAssign + 'static {}

impl<T: Copy + Send + Sync + AddAssign + 'static> Reducible for T {}

/// A fixed-size group of cooperating processes.
pub trait Communicator {
    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Rank of this process.
    fn rank(&self) -> usize;

    /// Replace `buf` on every rank by the element-wise sum over all ranks.
    fn all_reduce_sum<T: Reducible>(&self, buf: &mut [T]) -> Result<()>;
}

/// Single-process group; reductions are identities.
#[derive(Debug, Default)]
pub struct SelfComm {
    reductions: Cell<usize>,
}

impl SelfComm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reductions issued so far.
    pub fn reductions(&self) -> usize {
        self.reductions.get()
    }
}

impl Communicator for SelfComm {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn all_reduce_sum<T: Reducible>(&self, _buf: &mut [T]) -> Result<()> {
        self.reductions.set(self.reductions.get() + 1);
        Ok(())
    }
}

struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
}

/// One rank of an in-process group of threads.
///
/// Each rank is moved into its own thread. Sums are accumulated in rank
/// order, so every rank obtains bit-identical results.
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
    reductions: Cell<usize>,
}

impl ThreadGroup {
    /// Create the `size` ranks of a new group.
    pub fn create(size: usize) -> Vec<ThreadGroup> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        });
        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                size,
                shared: Arc::clone(&shared),
                reductions: Cell::new(0),
            })
            .collect()
    }

    /// Number of reductions issued so far by this rank.
    pub fn reductions(&self) -> usize {
        self.reductions.get()
    }

    fn sum_slots<T: Reducible>(&self, len: usize) -> Result<Vec<T>> {
        let slots = self
            .shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut total: Option<Vec<T>> = None;
        for (rank, slot) in slots.iter().enumerate() {
            let contribution = slot
                .as_ref()
                .and_then(|boxed| boxed.downcast_ref::<Vec<T>>())
                .ok_or_else(|| {
                    Error::Communication(format!("rank {rank} reduced a different element type"))
                })?;
            if contribution.len() != len {
                return Err(Error::Communication(format!(
                    "rank {rank} reduced {} elements, expected {len}",
                    contribution.len()
                )));
            }
            match total.as_mut() {
                None => total = Some(contribution.clone()),
                Some(acc) => {
                    for (a, &c) in acc.iter_mut().zip(contribution) {
                        *a += c;
                    }
                }
            }
        }
        total.ok_or_else(|| Error::Communication("empty process group".into()))
    }
}

impl Communicator for ThreadGroup {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_reduce_sum<T: Reducible>(&self, buf: &mut [T]) -> Result<()> {
        self.reductions.set(self.reductions.get() + 1);
        if self.size == 1 {
            return Ok(());
        }
        {
            let mut slots = self
                .shared
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slots[self.rank] = Some(Box::new(buf.to_vec()));
        }
        self.shared.barrier.wait();
        let summed = self.sum_slots::<T>(buf.len());
        // All ranks have read every slot once past this point.
        self.shared.barrier.wait();
        buf.copy_from_slice(&summed?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_self_comm_counts() {
        let comm = SelfComm::new();
        let mut buf = [1.0, 2.0];
        comm.all_reduce_sum(&mut buf).unwrap();
        assert_eq!(buf, [1.0, 2.0]);
        assert_eq!(comm.reductions(), 1);
    }

    #[test]
    fn test_thread_group_sums() {
        let handles: Vec<_> = ThreadGroup::create(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut buf = [comm.rank() as f64, 1.0];
                    comm.all_reduce_sum(&mut buf).unwrap();
                    let mut again = [comm.rank() as i64];
                    comm.all_reduce_sum(&mut again).unwrap();
                    (buf, again[0], comm.reductions())
                })
            })
            .collect();
        for handle in handles {
            let (buf, ranks, count) = handle.join().unwrap();
            assert_eq!(buf, [3.0, 3.0]);
            assert_eq!(ranks, 3);
            assert_eq!(count, 2);
        }
    }

    #[test]
    fn test_thread_group_length_mismatch() {
        let handles: Vec<_> = ThreadGroup::create(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut buf = vec![1.0; comm.rank() + 1];
                    comm.all_reduce_sum(&mut buf)
                })
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.join().unwrap(),
                Err(Error::Communication(_))
            ));
        }
    }
}
