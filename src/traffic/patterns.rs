use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::cache::AccessKind;
use crate::traffic::config::TrafficConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Uniform over the chosen region, in `stride` steps.
    Random,
    /// Walks the chosen region `stride` bytes at a time, wrapping at the footprint.
    Strided,
}

/// One generated core access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficAccess {
    pub kind: AccessKind,
    pub address: u64,
}

/// Per-core access stream.  Every core owns its generator so streams do not depend on
/// how the cores interleave.
#[derive(Debug, Clone)]
struct CoreStream {
    rng: StdRng,
    shared_cursor: u64,
    private_cursor: u64,
    generated: usize,
}

#[derive(Debug, Clone)]
pub struct PatternEngine {
    kind: PatternKind,
    streams: Vec<CoreStream>,
    accesses_per_core: usize,
    base: u64,
    footprint: u64,
    stride: u64,
    shared_fraction: f64,
    store_ratio: f64,
    ifetch_ratio: f64,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig, num_cores: usize, seed: u64) -> Self {
        let stride = config.address.stride.max(1);
        let footprint = config.address.footprint_bytes.max(stride);
        let streams = (0..num_cores)
            .map(|core| CoreStream {
                rng: StdRng::seed_from_u64(mix64(seed ^ ((core as u64) << 32))),
                // spread the strided walkers apart in the shared region
                shared_cursor: (core as u64 * stride * 7) % footprint,
                private_cursor: 0,
                generated: 0,
            })
            .collect();
        Self {
            kind: config.pattern,
            streams,
            accesses_per_core: config.accesses_per_core,
            base: config.address.base,
            footprint,
            stride,
            shared_fraction: config.address.shared_fraction,
            store_ratio: config.mix.store_ratio,
            ifetch_ratio: config.mix.ifetch_ratio,
        }
    }

    pub fn num_cores(&self) -> usize {
        self.streams.len()
    }

    pub fn accesses_per_core(&self) -> usize {
        self.accesses_per_core
    }

    pub fn generated(&self, core: usize) -> usize {
        self.streams[core].generated
    }

    pub fn is_exhausted(&self, core: usize) -> bool {
        self.generated(core) >= self.accesses_per_core
    }

    /// Base address of the region only `core` touches.
    pub fn private_base(&self, core: usize) -> u64 {
        self.base + self.footprint * (core as u64 + 1)
    }

    pub fn shared_range(&self) -> std::ops::Range<u64> {
        self.base..self.base + self.footprint
    }

    /// Next access of `core`, or `None` once its stream is exhausted.
    pub fn next_access(&mut self, core: usize) -> Option<TrafficAccess> {
        if self.is_exhausted(core) {
            return None;
        }
        let private_base = self.private_base(core);
        let (kind, footprint, stride) = (self.kind, self.footprint, self.stride);
        let (shared_fraction, store_ratio, ifetch_ratio) =
            (self.shared_fraction, self.store_ratio, self.ifetch_ratio);
        let base = self.base;
        let stream = &mut self.streams[core];
        stream.generated += 1;

        let draw: f64 = stream.rng.gen();
        let access_kind = if draw < store_ratio {
            AccessKind::Store
        } else if draw < store_ratio + ifetch_ratio {
            AccessKind::Ifetch
        } else {
            AccessKind::Load
        };

        let shared = stream.rng.gen_bool(shared_fraction);
        let offset = match kind {
            PatternKind::Random => stream.rng.gen_range(0..footprint / stride) * stride,
            PatternKind::Strided => {
                let cursor = if shared {
                    &mut stream.shared_cursor
                } else {
                    &mut stream.private_cursor
                };
                let offset = *cursor;
                *cursor = (*cursor + stride) % footprint;
                offset
            }
        };
        let region = if shared { base } else { private_base };
        Some(TrafficAccess {
            kind: access_kind,
            address: region + offset,
        })
    }
}

fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
