use std::io::{stdout, Read, Stdout, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chip8vm::disasm;
use chip8vm::host::HostBridge;
use chip8vm::interpreter::RunConfig;
use chip8vm::memory::MemoryImage;
use chip8vm::orchestrator::{self, CancelFlags, DEMO_ROM};
use chip8vm::quirks::Quirks;

const DISPLAY_WIDTH: usize = 64;
const DISPLAY_HEIGHT: usize = 32;

struct Args {
    roms: Vec<PathBuf>,
    disasm: bool,
    opcodes_per_frame: u32,
    keypad_response_time_ms: u32,
    quirks: Option<Quirks>,
}

fn parse_quirk(name: &str) -> Result<Quirks, lexopt::Error> {
    match name {
        "shift-vx" => Ok(Quirks::SHIFT_VX),
        "jump-from-x" => Ok(Quirks::JUMP_FROM_X),
        "no-clipping" => Ok(Quirks::NO_CLIPPING),
        "increment-i" => Ok(Quirks::INCREMENT_I),
        "reset-vf" => Ok(Quirks::RESET_VF),
        "vblank-wait" => Ok(Quirks::VBLANK_WAIT),
        other => Err(format!("unknown --quirk '{other}'").into()),
    }
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let help_msg = "\
USAGE:
    chip8vm [OPTIONS] [ROM]...

ARGS:
    <ROM>...   Up to 10 CHIP-8 ROM paths, run one after another. With none
               given, runs the built-in boot demo.

OPTIONS:
    -h, --help                    Print this help message.
    -disasm                       Disassemble the given ROM(s) and exit.
    --opcodes-per-frame=NUM       Max instructions per 60 Hz tick (default: 10).
    --keypad-response-ms=NUM      Keypad debounce / FX0A release window (default: 30).
    --quirk=NAME                  Enable one quirk; repeatable. Replaces the
                                    default quirk set (shift-vx) the first time
                                    it's given. One of: shift-vx, jump-from-x,
                                    no-clipping, increment-i, reset-vf,
                                    vblank-wait.

KEYMAP:
    +---+---+---+---+          +---+---+---+---+
    | 1 | 2 | 3 | 4 |          | 1 | 2 | 3 | C |
    +---+---+---+---+          +---+---+---+---+
    | Q | W | E | R |          | 4 | 5 | 6 | D |
    +---+---+---+---+    =>    +---+---+---+---+
    | A | S | D | F |          | 7 | 8 | 9 | E |
    +---+---+---+---+          +---+---+---+---+
    | Z | X | C | V |          | A | 0 | B | F |
    +---+---+---+---+          +---+---+---+---+";

    let mut roms = Vec::new();
    let mut disasm = false;
    let default_config = RunConfig::default();
    let mut opcodes_per_frame = default_config.opcodes_per_frame;
    let mut keypad_response_time_ms = default_config.keypad_response_time_ms;
    let mut quirks: Option<Quirks> = None;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Long("disasm") => disasm = true,
            Long("opcodes-per-frame") => {
                opcodes_per_frame = parser.value()?.parse()?;
            }
            Long("keypad-response-ms") => {
                keypad_response_time_ms = parser.value()?.parse()?;
            }
            Long("quirk") => {
                let flag = parse_quirk(&parser.value()?.string()?)?;
                quirks = Some(quirks.unwrap_or(Quirks::NONE) | flag);
            }
            Value(path) => roms.push(PathBuf::from(path)),
            Short('h') | Long("help") => {
                println!("{help_msg}");
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    if roms.len() > orchestrator::MAX_ROMS {
        return Err(format!(
            "too many ROMs: {}, maximum is {}",
            roms.len(),
            orchestrator::MAX_ROMS
        )
        .into());
    }

    Ok(Args {
        roms,
        disasm,
        opcodes_per_frame,
        keypad_response_time_ms,
        quirks,
    })
}

fn run_disasm(roms: &[PathBuf]) -> i32 {
    if roms.is_empty() {
        let mut mem = MemoryImage::new();
        mem.load_rom(&DEMO_ROM);
        println!("<builtin demo>:");
        println!("{}", disasm::code_dump(&mem, DEMO_ROM.len() as u16));
        return 0;
    }

    let mut exit_code = 0;
    for path in roms {
        match orchestrator::load_rom_file(path) {
            Ok(bytes) => {
                let mut mem = MemoryImage::new();
                mem.load_rom(&bytes);
                println!("{}:", path.display());
                println!("{}", disasm::code_dump(&mem, bytes.len() as u16));
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                exit_code = 1;
            }
        }
    }
    exit_code
}

/// The terminal Host Bridge: raw-mode alternate screen, ANSI block-character
/// framebuffer rendering, BEL beep, monotonic clock. Grounded in the
/// teacher's `driver/termion.rs`, adapted so debouncing lives in the core's
/// `Keypad` rather than the driver.
struct TermHost {
    stdin: termion::AsyncReader,
    screen: termion::screen::AlternateScreen<termion::raw::RawTerminal<Stdout>>,
    term_size: (u16, u16),
    framebuf: String,
    start: Instant,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl TermHost {
    fn new(stop: std::sync::Arc<std::sync::atomic::AtomicBool>) -> Self {
        use termion::raw::IntoRawMode;
        use termion::screen::IntoAlternateScreen;

        let mut host = TermHost {
            stdin: termion::async_stdin(),
            screen: stdout()
                .into_raw_mode()
                .expect("failed to enter raw mode")
                .into_alternate_screen()
                .expect("failed to enter alternate screen"),
            term_size: termion::terminal_size().unwrap_or((DISPLAY_WIDTH as u16, DISPLAY_HEIGHT as u16)),
            framebuf: String::new(),
            start: Instant::now(),
            stop,
        };
        let _ = write!(host.screen, "{}", termion::cursor::Hide);
        let _ = host.screen.flush();
        host
    }

    fn pixel(framebuffer: &[u8; 256], x: usize, y: usize) -> bool {
        let idx = y * DISPLAY_WIDTH + x;
        framebuffer[idx / 8] & (0x80 >> (idx % 8)) != 0
    }
}

impl Drop for TermHost {
    fn drop(&mut self) {
        let _ = write!(self.screen, "{}", termion::cursor::Show);
        let _ = self.screen.flush();
    }
}

impl HostBridge for TermHost {
    fn now_ns(&self) -> i64 {
        self.start.elapsed().as_nanos() as i64
    }

    fn sleep_ns(&self, ns: i64) {
        if ns > 0 {
            std::thread::sleep(Duration::from_nanos(ns as u64));
        }
    }

    fn sample_keys(&mut self) -> u16 {
        let mut inputs = Vec::new();
        let _ = self.stdin.read_to_end(&mut inputs);
        inputs.dedup();

        let mut mask = 0u16;
        for byte in inputs {
            match byte {
                b'1' => mask |= 1 << 0x1,
                b'2' => mask |= 1 << 0x2,
                b'3' => mask |= 1 << 0x3,
                b'4' => mask |= 1 << 0xC,
                b'q' => mask |= 1 << 0x4,
                b'w' => mask |= 1 << 0x5,
                b'e' => mask |= 1 << 0x6,
                b'r' => mask |= 1 << 0xD,
                b'a' => mask |= 1 << 0x7,
                b's' => mask |= 1 << 0x8,
                b'd' => mask |= 1 << 0x9,
                b'f' => mask |= 1 << 0xE,
                b'z' => mask |= 1 << 0xA,
                b'x' => mask |= 1 << 0x0,
                b'c' => mask |= 1 << 0xB,
                b'v' => mask |= 1 << 0xF,
                // Esc or ^C: ask the orchestrator to stop, same as SIGINT.
                0x03 | 0x1B => self.stop.store(true, Ordering::Relaxed),
                _ => {}
            }
        }
        mask
    }

    fn flush_framebuffer(&mut self, framebuffer: &[u8; 256]) {
        use termion::color;

        if let Ok(term_size) = termion::terminal_size() {
            if self.term_size != term_size {
                self.term_size = term_size;
                let _ = write!(self.screen, "{}", termion::clear::All);
            }
        }

        let x_offset = self.term_size.0.saturating_sub(DISPLAY_WIDTH as u16) / 2;
        let y_offset = self.term_size.1.saturating_sub(DISPLAY_HEIGHT as u16) / 2;

        self.framebuf.clear();
        for y in 0..DISPLAY_HEIGHT {
            let _ = write!(
                self.framebuf,
                "{}",
                termion::cursor::Goto(x_offset + 1, y_offset + 1 + y as u16)
            );
            for x in 0..DISPLAY_WIDTH {
                if Self::pixel(framebuffer, x, y) {
                    let _ = write!(self.framebuf, "{}█", color::Fg(color::White));
                } else {
                    let _ = write!(self.framebuf, "{}█", color::Fg(color::Black));
                }
            }
        }
        let _ = write!(self.screen, "{}", self.framebuf);
        let _ = self.screen.flush();
    }

    fn beep(&mut self) {
        let _ = write!(self.screen, "\x07");
        let _ = self.screen.flush();
    }

    fn random_byte(&mut self) -> u8 {
        fastrand::u8(..)
    }

    fn dump_out(&mut self, text: &str) {
        for line in text.lines() {
            eprint!("{line}\r\n");
        }
    }

    fn error_out(&mut self, text: &str) {
        eprint!("{text}\r\n");
    }
}

fn install_signal_handlers(flags: &CancelFlags) -> std::io::Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::flag::register;

    register(SIGINT, flags.stop.clone())?;
    register(SIGTERM, flags.stop.clone())?;
    register(SIGQUIT, flags.stop.clone())?;
    register(SIGQUIT, flags.dump.clone())?;
    register(SIGQUIT, flags.quit.clone())?;
    register(SIGHUP, flags.dump.clone())?;
    Ok(())
}

fn main() -> Result<(), lexopt::Error> {
    env_logger::init();
    let args = parse_args()?;

    if args.disasm {
        std::process::exit(run_disasm(&args.roms));
    }

    let config = RunConfig {
        opcodes_per_frame: args.opcodes_per_frame,
        keypad_response_time_ms: args.keypad_response_time_ms,
        quirks: args.quirks.unwrap_or(RunConfig::default().quirks),
    };

    let flags = CancelFlags::new();
    if let Err(e) = install_signal_handlers(&flags) {
        log::warn!("failed to install signal handlers: {e}");
    }

    let mut host = TermHost::new(flags.stop.clone());
    let exit_code = orchestrator::run_batch(&args.roms, config, &mut host, &flags);
    drop(host);

    std::process::exit(exit_code);
}
