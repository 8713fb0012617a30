//! Host Bridge contract (spec.md §6). The interpreter core only ever talks
//! to the outside world through this trait; concrete hosts (a terminal, a
//! test harness) live outside this crate's core.

use crate::memory::{FRAMEBUFFER_LEN, PROGRAM_MAX_LEN};

/// Everything the interpreter needs from its environment.
pub trait HostBridge {
    /// Monotonic nanosecond clock.
    fn now_ns(&self) -> i64;

    /// Cooperative sleep; the only intentionally blocking suspension point.
    fn sleep_ns(&self, ns: i64);

    /// Bitmask of CHIP-8 keys (0..16) seen pressed since the last call.
    fn sample_keys(&mut self) -> u16;

    /// Renders the 64x32 1-bit framebuffer.
    fn flush_framebuffer(&mut self, framebuffer: &[u8; FRAMEBUFFER_LEN]);

    /// Emits one short audible tone.
    fn beep(&mut self);

    /// A (not necessarily cryptographic) random byte, for `CXNN`.
    fn random_byte(&mut self) -> u8;

    /// A full memory/register dump, or other diagnostic text.
    fn dump_out(&mut self, text: &str);

    /// A short halt/load diagnostic.
    fn error_out(&mut self, text: &str);
}

/// Errors from loading a ROM image, surfaced via [`HostBridge::error_out`]
/// by the entry orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read ROM: {0}")]
    Io(#[from] std::io::Error),
    #[error("ROM is empty")]
    Empty,
    #[error("ROM too large: {len} bytes, maximum is {max}", max = PROGRAM_MAX_LEN)]
    TooLarge { len: usize },
    #[error("too many ROMs: {count}, maximum is {max}")]
    TooManyRoms { count: usize, max: usize },
}
