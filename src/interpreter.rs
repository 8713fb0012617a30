//! Interpreter Core (spec.md §4.2): the fetch-decode-execute loop,
//! quirk-gated opcode semantics, the sprite blitter, timer decrement, frame
//! pacing, and halt detection.

use crate::disasm::{self, DumpState};
use crate::host::{HostBridge, LoadError};
use crate::keypad::Keypad;
use crate::memory::{MemoryImage, PC_MAX, PC_MIN, PROGRAM_MAX_LEN, PROGRAM_START};
use crate::opcode::Opcode;
use crate::quirks::Quirks;

/// One 60 Hz tick.
const FRAME_NS: i64 = 16_666_667;

/// §6 "Runtime parameters".
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub opcodes_per_frame: u32,
    pub keypad_response_time_ms: u32,
    pub quirks: Quirks,
}

impl Default for RunConfig {
    fn default() -> Self {
        // Matches original_source's `chip8_exec(&prog, 10, 30, CHIP8_QUIRK_SHIFT_VX)`,
        // which resolves spec.md §9's open question on the debounce window.
        RunConfig {
            opcodes_per_frame: 10,
            keypad_response_time_ms: 30,
            quirks: Quirks::SHIFT_VX,
        }
    }
}

/// A fatal-within-this-ROM halt (spec.md §7.2). Recoverable at the batch
/// level: the entry orchestrator reports it and moves to the next ROM.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum HaltReason {
    #[error("pc overflow (0x{pc:03x})")]
    PcOverflow { pc: u16 },
    #[error("pc did not advance from 0x{pc:03x}; opcode 0x{opcode:04x}")]
    PcStalled { pc: u16, opcode: u16 },
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
}

/// Whether a halt also calls for a diagnostic dump (spec.md §7.2).
impl HaltReason {
    pub fn wants_dump(&self) -> bool {
        matches!(self, HaltReason::PcStalled { .. })
    }
}

enum StepOutcome {
    Advanced,
    Drew,
    /// FX0A waiting for a key, or the `1NNN` self-jump idiom: not an error,
    /// just nothing left to do this frame.
    Stalled,
}

/// The CHIP-8 machine: one [`MemoryImage`] plus the scalar registers the
/// spec keeps outside of it (PC, I, SP, DT, ST).
pub struct Interpreter {
    mem: MemoryImage,
    pc: u16,
    pc_prev: u16,
    i_reg: u16,
    sp: u8,
    dt: u8,
    st: u8,
    program_len: u16,
    keypad: Keypad,
    quirks: Quirks,
    opcodes_per_frame: u32,
    keypad_response_time_ms: u32,
    timer_accum_ns: i64,
    last_tick_ns: Option<i64>,
    last_error: Option<String>,
}

impl Interpreter {
    /// Loads `rom` into a fresh memory image and sets PC to the program
    /// start (spec.md §3 "Lifecycle").
    pub fn new(rom: &[u8], config: RunConfig) -> Result<Self, LoadError> {
        if rom.is_empty() {
            return Err(LoadError::Empty);
        }
        if rom.len() > PROGRAM_MAX_LEN {
            return Err(LoadError::TooLarge { len: rom.len() });
        }

        let mut mem = MemoryImage::new();
        mem.load_rom(rom);

        Ok(Interpreter {
            mem,
            pc: PROGRAM_START as u16,
            pc_prev: PROGRAM_START as u16,
            i_reg: 0,
            sp: 0,
            dt: 0,
            st: 0,
            program_len: rom.len() as u16,
            keypad: Keypad::new(),
            quirks: config.quirks,
            opcodes_per_frame: config.opcodes_per_frame,
            keypad_response_time_ms: config.keypad_response_time_ms,
            timer_accum_ns: 0,
            last_tick_ns: None,
            last_error: None,
        })
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn memory(&self) -> &MemoryImage {
        &self.mem
    }

    pub fn program_len(&self) -> u16 {
        self.program_len
    }

    pub fn held_key(&self) -> Option<u8> {
        self.keypad.held_key()
    }

    /// A full register/memory dump, for `-disasm`-adjacent diagnostics and
    /// the `dump` signal (spec.md §5, §7.3).
    pub fn dump(&self) -> String {
        let mut stack = [0u16; 16];
        for (i, slot) in stack.iter_mut().enumerate() {
            *slot = self.mem.stack_slot(i as u8);
        }
        let state = DumpState {
            pc: self.pc,
            pc_prev: self.pc_prev,
            i_reg: self.i_reg,
            sp: self.sp,
            dt: self.dt,
            st: self.st,
            stack,
            mem: &self.mem,
            program_len: self.program_len,
            last_error: self.last_error.as_deref(),
        };
        disasm::full_dump(&state)
    }

    /// Runs up to `opcodes_per_frame` instructions, decrements the timers,
    /// paces to the 60 Hz frame boundary, flushes the framebuffer, and
    /// samples the keypad (spec.md §4.2-§4.5).
    pub fn step_frame<H: HostBridge>(&mut self, host: &mut H) -> Result<(), HaltReason> {
        let frame_start = host.now_ns();

        for _ in 0..self.opcodes_per_frame {
            match self.step_instruction(host) {
                Ok(StepOutcome::Stalled) => break,
                Ok(StepOutcome::Drew) if self.quirks.contains(Quirks::VBLANK_WAIT) => break,
                Ok(_) => {}
                Err(reason) => {
                    self.last_error = Some(reason.to_string());
                    log::warn!("halt: {}", reason);
                    return Err(reason);
                }
            }
        }

        self.tick_timers(host, frame_start);

        let elapsed = host.now_ns() - frame_start;
        if elapsed < FRAME_NS {
            host.sleep_ns(FRAME_NS - elapsed);
        }

        host.flush_framebuffer(self.mem.framebuffer());

        let pressed = host.sample_keys();
        self.keypad
            .sample(pressed, host.now_ns(), self.keypad_response_time_ms);

        log::debug!(
            "frame: pc=0x{:03x} i=0x{:03x} dt={} st={}",
            self.pc,
            self.i_reg,
            self.dt,
            self.st
        );

        Ok(())
    }

    fn step_instruction<H: HostBridge>(&mut self, host: &mut H) -> Result<StepOutcome, HaltReason> {
        if self.pc < PC_MIN || self.pc >= PC_MAX {
            return Err(HaltReason::PcOverflow { pc: self.pc });
        }

        let op = Opcode::decode(self.mem.read_byte(self.pc), self.mem.read_byte(self.pc + 1));
        self.pc_prev = self.pc;

        let drew = self.execute(op, host)?;

        if self.pc == self.pc_prev {
            let is_key_wait = op.group == 0xF && op.nn == 0x0A;
            let is_self_jump = op.group == 0x1 && op.nnn == self.pc;
            if !(is_key_wait || is_self_jump) {
                return Err(HaltReason::PcStalled {
                    pc: self.pc,
                    opcode: op.raw,
                });
            }
            log::trace!("0x{:03x}: 0x{:04x} (waiting)", self.pc_prev, op.raw);
            return Ok(StepOutcome::Stalled);
        }

        log::trace!(
            "0x{:03x}: 0x{:04x} -> pc=0x{:03x}",
            self.pc_prev,
            op.raw,
            self.pc
        );
        Ok(if drew { StepOutcome::Drew } else { StepOutcome::Advanced })
    }

    /// Dispatches one decoded opcode. Returns whether it was a sprite draw
    /// (relevant only to the VBLANK quirk). Undefined encodings in groups
    /// 0, 5, 9, E, F no-op by advancing PC by 2; an undefined `8XY_` leaves
    /// PC untouched so the caller's no-progress check halts (spec.md §7).
    fn execute<H: HostBridge>(&mut self, op: Opcode, host: &mut H) -> Result<bool, HaltReason> {
        let mut drew = false;

        match op.group {
            0x0 => match op.nn {
                0xE0 => {
                    self.mem.clear_framebuffer();
                    self.pc += 2;
                }
                0xEE => {
                    if self.sp == 0 {
                        return Err(HaltReason::StackUnderflow);
                    }
                    self.sp -= 1;
                    self.pc = self.mem.stack_slot(self.sp);
                }
                _ => self.pc += 2, // legacy 0NNN syscalls, ignored
            },
            0x1 => self.pc = op.nnn,
            0x2 => {
                if self.sp >= 16 {
                    return Err(HaltReason::StackOverflow);
                }
                self.mem.set_stack_slot(self.sp, self.pc + 2);
                self.sp += 1;
                self.pc = op.nnn;
            }
            0x3 => self.pc += if self.mem.v(op.vx) == op.nn { 4 } else { 2 },
            0x4 => self.pc += if self.mem.v(op.vx) != op.nn { 4 } else { 2 },
            0x5 => {
                if op.n == 0 {
                    self.pc += if self.mem.v(op.vx) == self.mem.v(op.vy) { 4 } else { 2 };
                } else {
                    self.pc += 2;
                }
            }
            0x6 => {
                self.mem.set_v(op.vx, op.nn);
                self.pc += 2;
            }
            0x7 => {
                let vx = self.mem.v(op.vx);
                self.mem.set_v(op.vx, vx.wrapping_add(op.nn));
                self.pc += 2;
            }
            0x8 => {
                self.execute_8xy(&op);
                if op.n <= 0x7 || op.n == 0xE {
                    self.pc += 2;
                }
                // else: undefined low nibble, PC deliberately left unchanged.
            }
            0x9 => {
                if op.n == 0 {
                    self.pc += if self.mem.v(op.vx) != self.mem.v(op.vy) { 4 } else { 2 };
                } else {
                    self.pc += 2;
                }
            }
            0xA => {
                self.i_reg = op.nnn;
                self.pc += 2;
            }
            0xB => {
                let base = if self.quirks.contains(Quirks::JUMP_FROM_X) {
                    self.mem.v(op.vx)
                } else {
                    self.mem.v(0)
                };
                self.pc = op.nnn.wrapping_add(base as u16);
            }
            0xC => {
                let r = host.random_byte();
                self.mem.set_v(op.vx, r & op.nn);
                self.pc += 2;
            }
            0xD => {
                self.execute_draw(&op);
                drew = true;
            }
            0xE => match op.nn {
                0x9E => self.pc += if self.keypad.is_down(self.mem.v(op.vx) & 0xF) { 4 } else { 2 },
                0xA1 => self.pc += if !self.keypad.is_down(self.mem.v(op.vx) & 0xF) { 4 } else { 2 },
                _ => self.pc += 2,
            },
            0xF => self.execute_fx(&op),
            _ => unreachable!("opcode group is a nibble"),
        }

        Ok(drew)
    }

    /// `8XY_` arithmetic/logic group. VF is always written *after* `V[X]`,
    /// so `X == F` lets the flag overwrite the arithmetic result.
    fn execute_8xy(&mut self, op: &Opcode) {
        let vx = self.mem.v(op.vx);
        let vy = self.mem.v(op.vy);

        match op.n {
            0x0 => self.mem.set_v(op.vx, vy),
            0x1 => {
                self.mem.set_v(op.vx, vx | vy);
                if self.quirks.contains(Quirks::RESET_VF) {
                    self.mem.set_flag(0);
                }
            }
            0x2 => {
                self.mem.set_v(op.vx, vx & vy);
                if self.quirks.contains(Quirks::RESET_VF) {
                    self.mem.set_flag(0);
                }
            }
            0x3 => {
                self.mem.set_v(op.vx, vx ^ vy);
                if self.quirks.contains(Quirks::RESET_VF) {
                    self.mem.set_flag(0);
                }
            }
            0x4 => {
                let sum = vx as u16 + vy as u16;
                self.mem.set_v(op.vx, (sum & 0xFF) as u8);
                self.mem.set_flag((sum > 0xFF) as u8);
            }
            0x5 => {
                self.mem.set_v(op.vx, vx.wrapping_sub(vy));
                self.mem.set_flag((vx >= vy) as u8);
            }
            0x6 => {
                let src = if self.quirks.contains(Quirks::SHIFT_VX) { vx } else { vy };
                self.mem.set_v(op.vx, src >> 1);
                self.mem.set_flag(src & 1);
            }
            0x7 => {
                self.mem.set_v(op.vx, vy.wrapping_sub(vx));
                self.mem.set_flag((vy >= vx) as u8);
            }
            0xE => {
                let src = if self.quirks.contains(Quirks::SHIFT_VX) { vx } else { vy };
                self.mem.set_v(op.vx, src << 1);
                self.mem.set_flag((src >> 7) & 1);
            }
            _ => log::warn!("undefined opcode 0x8{:x}{:x}{:x}", op.vx, op.vy, op.n),
        }
    }

    /// `DXYN` sprite blit (spec.md §4.2).
    fn execute_draw(&mut self, op: &Opcode) {
        let x0 = self.mem.v(op.vx) as usize % 64;
        let y0 = self.mem.v(op.vy) as usize % 32;
        let no_clip = self.quirks.contains(Quirks::NO_CLIPPING);
        let mut collided = false;

        for row in 0..op.n as u16 {
            let sprite_byte = self.mem.read_byte(self.i_reg + row);
            let mut yc = y0 + row as usize;
            if yc >= 32 {
                if no_clip {
                    yc %= 32;
                } else {
                    break; // y overflow: abort remaining rows
                }
            }

            for col in 0..8usize {
                if sprite_byte & (0x80 >> col) == 0 {
                    continue;
                }
                let mut xc = x0 + col;
                if xc >= 64 {
                    if no_clip {
                        xc %= 64;
                    } else {
                        break; // x overflow: stop this row
                    }
                }
                if self.mem.xor_pixel(xc, yc, true) {
                    collided = true;
                }
            }
        }

        self.mem.set_flag(collided as u8);
        self.pc += 2;
    }

    /// `FX__` group.
    fn execute_fx(&mut self, op: &Opcode) {
        match op.nn {
            0x07 => {
                self.mem.set_v(op.vx, self.dt);
                self.pc += 2;
            }
            0x0A => self.execute_wait_key(op),
            0x15 => {
                self.dt = self.mem.v(op.vx);
                self.pc += 2;
            }
            0x18 => {
                self.st = self.mem.v(op.vx);
                self.pc += 2;
            }
            0x1E => {
                self.i_reg = (self.i_reg + self.mem.v(op.vx) as u16) % 4096;
                self.pc += 2;
            }
            0x29 => {
                self.i_reg = MemoryImage::font_glyph_addr(self.mem.v(op.vx));
                self.pc += 2;
            }
            0x33 => {
                let vx = self.mem.v(op.vx);
                self.mem.write_byte(self.i_reg, vx / 100);
                self.mem.write_byte(self.i_reg + 1, (vx / 10) % 10);
                self.mem.write_byte(self.i_reg + 2, vx % 10);
                self.pc += 2;
            }
            0x55 => {
                for k in 0..=op.vx {
                    let v = self.mem.v(k);
                    self.mem.write_byte(self.i_reg + k as u16, v);
                }
                if self.quirks.contains(Quirks::INCREMENT_I) {
                    self.i_reg = (self.i_reg + op.vx as u16 + 1) % 4096;
                }
                self.pc += 2;
            }
            0x65 => {
                for k in 0..=op.vx {
                    let b = self.mem.read_byte(self.i_reg + k as u16);
                    self.mem.set_v(k, b);
                }
                if self.quirks.contains(Quirks::INCREMENT_I) {
                    self.i_reg = (self.i_reg + op.vx as u16 + 1) % 4096;
                }
                self.pc += 2;
            }
            _ => self.pc += 2,
        }
    }

    /// `FX0A`: two-phase wait for a key to be pressed, then released
    /// (spec.md §4.2 "Wait for key").
    fn execute_wait_key(&mut self, op: &Opcode) {
        if let Some(k) = self.keypad.held_key() {
            if self.keypad.is_up(k) {
                self.keypad.clear_wait();
                self.pc += 2;
            }
            // else: still held, PC stays put.
        } else if let Some(k) = self.keypad.lowest_down() {
            self.mem.set_v(op.vx, k);
            self.keypad.begin_wait(k);
            // PC stays put until release is observed.
        }
    }

    /// Decrements DT/ST at 60 Hz independent of `opcodes_per_frame`
    /// (spec.md §4.4), issuing one beep per ST decrement from nonzero.
    fn tick_timers<H: HostBridge>(&mut self, host: &mut H, now_ns: i64) {
        if let Some(prev) = self.last_tick_ns.replace(now_ns) {
            self.timer_accum_ns += now_ns - prev;
        }

        while self.timer_accum_ns >= FRAME_NS {
            self.timer_accum_ns -= FRAME_NS;
            if self.dt > 0 {
                self.dt -= 1;
            }
            if self.st > 0 {
                self.st -= 1;
                host.beep();
            }
        }
    }
}
