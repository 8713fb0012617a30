//! Keypad debouncer (spec.md §4.3): synthesizes key-release events from a
//! host that only ever reports "currently pressed", and carries the
//! FX0A held-key slot.

pub const NUM_KEYS: usize = 16;

/// 16-key down/up state with a per-key debounce timeout.
pub struct Keypad {
    /// Monotonic nanosecond timestamp each key was last seen down, or last
    /// flipped to up.
    last_seen_ns: [i64; NUM_KEYS],
    down: u16,
    up: u16,
    /// FX0A's "waiting for this key to release" slot.
    held_key: Option<u8>,
}

impl Keypad {
    pub fn new() -> Self {
        Keypad {
            last_seen_ns: [0; NUM_KEYS],
            down: 0,
            up: 0xFFFF,
            held_key: None,
        }
    }

    /// Folds in one host sample: `pressed` has bit `k` set iff key `k` was
    /// observed down since the last call. `response_time_ms` is both the
    /// debounce window and the FX0A release threshold.
    pub fn sample(&mut self, pressed: u16, now_ns: i64, response_time_ms: u32) {
        for key in 0..NUM_KEYS as u8 {
            let bit = 1u16 << key;
            if pressed & bit != 0 {
                self.down |= bit;
                self.up &= !bit;
                self.last_seen_ns[key as usize] = now_ns;
            }
        }

        let timeout_ns = response_time_ms as i64 * 1_000_000;
        for key in 0..NUM_KEYS as u8 {
            let bit = 1u16 << key;
            if now_ns - self.last_seen_ns[key as usize] > timeout_ns {
                self.down &= !bit;
                self.up |= bit;
            }
        }

        log::trace!("keypad down={:016b} up={:016b}", self.down, self.up);
    }

    pub fn is_down(&self, key: u8) -> bool {
        self.down & (1 << (key & 0xF)) != 0
    }

    pub fn is_up(&self, key: u8) -> bool {
        self.up & (1 << (key & 0xF)) != 0
    }

    /// The lowest-indexed key currently down, if any.
    pub fn lowest_down(&self) -> Option<u8> {
        (0..NUM_KEYS as u8).find(|&k| self.is_down(k))
    }

    pub fn held_key(&self) -> Option<u8> {
        self.held_key
    }

    pub fn begin_wait(&mut self, key: u8) {
        self.held_key = Some(key);
    }

    pub fn clear_wait(&mut self) {
        self.held_key = None;
    }
}

impl Default for Keypad {
    fn default() -> Self {
        Self::new()
    }
}
