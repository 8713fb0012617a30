//! Disassembler: renders a decoded opcode as a fixed mnemonic, and full or
//! code-only memory dumps (spec.md §6 mnemonic table;
//! `original_source`'s `opcode_to_string`/`chip8_dump`).

use std::fmt::Write as _;

use crate::memory::{MemoryImage, PROGRAM_START, RAM_SIZE};
use crate::opcode::Opcode;

/// Renders `op` as its fixed mnemonic, or `None` for an unrecognized
/// encoding (spec.md §7: such encodings render as raw bytes instead).
pub fn mnemonic(op: &Opcode) -> Option<String> {
    let text = match op.group {
        0x0 => match op.nn {
            0xE0 => "cls".to_string(),
            0xEE => "ret".to_string(),
            _ => return None,
        },
        0x1 => format!("jp   0x{:03x}", op.nnn),
        0x2 => format!("call 0x{:03x}", op.nnn),
        0x3 => format!("se   %{:x}, 0x{:02x}", op.vx, op.nn),
        0x4 => format!("sne  %{:x}, 0x{:02x}", op.vx, op.nn),
        0x5 if op.n == 0 => format!("se   %{:x}, %{:x}", op.vx, op.vy),
        0x6 => format!("ld   %{:x}, 0x{:02x}", op.vx, op.nn),
        0x7 => format!("add  %{:x}, 0x{:02x}", op.vx, op.nn),
        0x8 => match op.n {
            0x0 => format!("ld   %{:x}, %{:x}", op.vx, op.vy),
            0x1 => format!("or   %{:x}, %{:x}", op.vx, op.vy),
            0x2 => format!("and  %{:x}, %{:x}", op.vx, op.vy),
            0x3 => format!("xor  %{:x}, %{:x}", op.vx, op.vy),
            0x4 => format!("add  %{:x}, %{:x}", op.vx, op.vy),
            0x5 => format!("sub  %{:x}, %{:x}", op.vx, op.vy),
            0x6 => format!("shr  %{:x}", op.vx),
            0x7 => format!("subn %{:x}, %{:x}", op.vx, op.vy),
            0xE => format!("shl  %{:x}", op.vx),
            _ => return None,
        },
        0x9 if op.n == 0 => format!("sne  %{:x}, %{:x}", op.vx, op.vy),
        0xA => format!("ld   %i, 0x{:03x}", op.nnn),
        0xB => format!("jp   %0, 0x{:03x}", op.nnn),
        0xC => format!("rnd  %{:x}, 0x{:02x}", op.vx, op.nn),
        0xD => format!("drw  %{:x}, %{:x}, 0x{:02x}", op.vx, op.vy, op.n),
        0xE => match op.nn {
            0x9E => format!("skp  %{:x}", op.vx),
            0xA1 => format!("skpn %{:x}", op.vx),
            _ => return None,
        },
        0xF => match op.nn {
            0x07 => format!("ld   %{:x}, $dt", op.vx),
            0x0A => format!("ld   %{:x}, $kb", op.vx),
            0x15 => format!("ld   $dt, %{:x}", op.vx),
            0x18 => format!("ld   $st, %{:x}", op.vx),
            0x1E => format!("add  %i, %{:x}", op.vx),
            0x29 => format!("fnt  %{:x}", op.vx),
            0x33 => format!("bcd  %{:x}", op.vx),
            0x55 => format!("ld   %i, %{:x}", op.vx),
            0x65 => format!("ld   %{:x}, %i", op.vx),
            _ => return None,
        },
        _ => return None,
    };
    Some(text)
}

/// Everything the `-disasm`/SIGHUP/fatal-halt full dump needs beyond the
/// raw memory image.
pub struct DumpState<'a> {
    pub pc: u16,
    pub pc_prev: u16,
    pub i_reg: u16,
    pub sp: u8,
    pub dt: u8,
    pub st: u8,
    pub stack: [u16; 16],
    pub mem: &'a MemoryImage,
    pub program_len: u16,
    pub last_error: Option<&'a str>,
}

/// A full register/stack/memory dump, written on `SIGHUP`/`SIGQUIT` or a
/// fatal halt.
pub fn full_dump(state: &DumpState) -> String {
    let mem = state.mem;
    let mut out = String::new();

    let _ = writeln!(out, "Name      Addr   Value");
    let _ = writeln!(out, "PC               0x{:03x}", state.pc);
    let _ = writeln!(out, "PC Prev          0x{:03x}", state.pc_prev);
    let _ = writeln!(out, "I                0x{:03x}", state.i_reg);
    let _ = writeln!(out, "Size             0x{:03x}", state.program_len);
    let _ = writeln!(out, "SP               0x{:02x}", state.sp);
    let _ = writeln!(out, "Delay            0x{:02x}", state.dt);
    let _ = writeln!(out, "Sound            0x{:02x}", state.st);

    out.push_str("V                ");
    for x in 0..16u8 {
        let _ = write!(out, "{:x}:{:02x} ", x, mem.v(x));
    }
    out.push('\n');

    if let Some(err) = state.last_error {
        let _ = writeln!(out, "Error            {}", err);
    }

    out.push_str("Stack            ");
    for (i, slot) in state.stack.iter().enumerate() {
        let _ = write!(out, "0x{:04x}", slot);
        if i < 15 {
            out.push_str(", ");
        }
    }
    out.push('\n');

    if state.pc >= PROGRAM_START as u16 && (state.pc as usize) + 1 < RAM_SIZE {
        let op = Opcode::decode(mem.read_byte(state.pc), mem.read_byte(state.pc + 1));
        let _ = writeln!(
            out,
            "Opcode           0x{:04x} vx:0x{:x} vy:0x{:x} n:0x{:x} nn:0x{:02x} nnn:0x{:03x}",
            op.raw, op.vx, op.vy, op.n, op.nn, op.nnn
        );
    }
    out.push('\n');

    out.push_str(&dump_region(
        mem.as_bytes(),
        0,
        RAM_SIZE,
        PROGRAM_START,
        PROGRAM_START + state.program_len as usize,
        16,
    ));
    out
}

/// A code-only disassembly: just the program region, no register state.
/// Used by the `-disasm` CLI mode.
pub fn code_dump(mem: &MemoryImage, program_len: u16) -> String {
    let code_end = PROGRAM_START + program_len as usize;
    dump_region(mem.as_bytes(), PROGRAM_START, code_end, PROGRAM_START, code_end, 1)
}

/// Walks `[start, end)`, emitting one line per decoded opcode inside
/// `[code_start, code_end)` and grouping any other bytes (undefined
/// encodings, data, padding) into hex lines of up to `pack_width` bytes.
fn dump_region(
    mem: &[u8; RAM_SIZE],
    start: usize,
    end: usize,
    code_start: usize,
    code_end: usize,
    pack_width: usize,
) -> String {
    let mut out = String::new();
    let mut cur = start;
    let mut pack: Vec<u8> = Vec::new();
    let mut pack_offset = start;

    while cur < end {
        let next = cur + 1;
        let decoded = (cur >= code_start && cur < code_end && next < end)
            .then(|| Opcode::decode(mem[cur], mem[next]))
            .and_then(|op| mnemonic(&op).map(|text| (op, text)));

        if let Some((_op, text)) = decoded {
            flush_pack(&mut out, pack_offset, &mut pack);
            let _ = writeln!(out, "{:03x}: {:02x}{:02x} {}", cur, mem[cur], mem[next], text);
            cur += 2;
        } else {
            if pack.is_empty() {
                pack_offset = cur;
            }
            pack.push(mem[cur]);
            cur += 1;
            if pack.len() >= pack_width {
                flush_pack(&mut out, pack_offset, &mut pack);
            }
        }
    }
    flush_pack(&mut out, pack_offset, &mut pack);
    out
}

fn flush_pack(out: &mut String, offset: usize, pack: &mut Vec<u8>) {
    if pack.is_empty() {
        return;
    }
    let hex: Vec<String> = pack.iter().map(|b| format!("{:02x}", b)).collect();
    let _ = writeln!(out, "{:03x}: {}", offset, hex.join(" "));
    pack.clear();
}
