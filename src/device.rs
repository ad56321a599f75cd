//! Scoped device buffers.
//!
//! [`DeviceBuffers`] stand in for the memory an inference backend shares with the pipeline: the
//! staging tensor crops are written into, and the raw output of the last inference pass for each
//! hand. They are acquired during initialization and released when dropped, including when
//! initialization fails halfway.

use crate::hand::Hands;
use crate::nn::tensor::Tensor;

pub struct DeviceBuffers {
    staging: Tensor,
    raw_output: Hands<Option<Tensor>>,
}

impl DeviceBuffers {
    /// Allocates a `[1, 3, side, side]` staging tensor holding a black image.
    ///
    /// `black` is the mapped value of a black pixel (see
    /// [`ColorMapper::black`][crate::nn::ColorMapper::black]).
    pub fn acquire(net_side: usize, black: f32) -> Self {
        log::debug!("acquiring device buffers for {net_side}x{net_side} net input");
        #[cfg(test)]
        live::inc();

        let mut buffers = Self {
            staging: Tensor::zeros(&[1, 3, net_side, net_side]),
            raw_output: Hands::default(),
        };
        buffers.clear_staging(black);
        buffers
    }

    /// Resets the staging tensor to a black image.
    pub fn clear_staging(&mut self, black: f32) {
        self.staging.as_raw_data_mut().fill(black);
    }

    #[inline]
    pub fn staging(&self) -> &Tensor {
        &self.staging
    }

    #[inline]
    pub fn staging_mut(&mut self) -> &mut Tensor {
        &mut self.staging
    }

    #[inline]
    pub fn raw_output(&self) -> &Hands<Option<Tensor>> {
        &self.raw_output
    }

    #[inline]
    pub fn raw_output_mut(&mut self) -> &mut Hands<Option<Tensor>> {
        &mut self.raw_output
    }
}

impl Drop for DeviceBuffers {
    fn drop(&mut self) {
        log::debug!(
            "releasing device buffers ({:?} staging tensor)",
            self.staging.shape()
        );
        #[cfg(test)]
        live::dec();
    }
}

/// Per-thread count of buffers that were acquired and not yet released.
#[cfg(test)]
pub(crate) mod live {
    use std::cell::Cell;

    thread_local! {
        static LIVE: Cell<usize> = Cell::new(0);
    }

    pub(crate) fn count() -> usize {
        LIVE.with(Cell::get)
    }

    pub(super) fn inc() {
        LIVE.with(|c| c.set(c.get() + 1));
    }

    pub(super) fn dec() {
        LIVE.with(|c| c.set(c.get() - 1));
    }
}
