//! Entry Orchestrator (spec.md §2, §5, §7.2-§7.3): loads one or more ROMs,
//! runs each against a host in turn, and ties the `stop`/`dump`/`quit`
//! cancellation flags to the frame loop.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::host::{HostBridge, LoadError};
use crate::interpreter::{Interpreter, RunConfig};
use crate::memory::PROGRAM_MAX_LEN;

/// `-disasm`/positional-argument ceiling (spec.md §6 CLI surface).
pub const MAX_ROMS: usize = 10;

/// `original_source`'s `DemoRandomTimer`: run when no ROM path is given
/// rather than exiting with a usage error (spec.md §8 scenario 1).
pub const DEMO_ROM: [u8; 26] = [
    0x00, 0xE0, 0xC0, 0x0F, 0xF0, 0x29, 0x61, 0x1C, 0x62, 0x0E, 0xD1, 0x25, 0x63, 0x1E, 0xF3, 0x15,
    0xF4, 0x07, 0x34, 0x00, 0x12, 0x10, 0xD1, 0x25, 0x12, 0x02,
];

/// The process-wide cancellation flags spec.md §5 describes: single-writer
/// (a signal handler), single-reader (the frame loop), no locks.
#[derive(Clone)]
pub struct CancelFlags {
    pub stop: Arc<AtomicBool>,
    pub dump: Arc<AtomicBool>,
    pub quit: Arc<AtomicBool>,
}

impl CancelFlags {
    pub fn new() -> Self {
        CancelFlags {
            stop: Arc::new(AtomicBool::new(false)),
            dump: Arc::new(AtomicBool::new(false)),
            quit: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for CancelFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a ROM file and enforces the program-region size limit (spec.md §3).
pub fn load_rom_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    if bytes.len() > PROGRAM_MAX_LEN {
        return Err(LoadError::TooLarge { len: bytes.len() });
    }
    Ok(bytes)
}

/// Runs every ROM in `rom_paths` (or the built-in demo if empty) against
/// `host` in turn. Returns the process exit status: 0 unless a ROM failed
/// to load (spec.md §6 "Exit codes").
pub fn run_batch<H: HostBridge>(
    rom_paths: &[impl AsRef<Path>],
    config: RunConfig,
    host: &mut H,
    flags: &CancelFlags,
) -> i32 {
    if rom_paths.len() > MAX_ROMS {
        let err = LoadError::TooManyRoms {
            count: rom_paths.len(),
            max: MAX_ROMS,
        };
        host.error_out(&err.to_string());
        return 1;
    }

    if rom_paths.is_empty() {
        log::info!("no ROM given, running built-in demo");
        run_one(&DEMO_ROM, "<builtin demo>", config, host, flags);
        return 0;
    }

    let mut exit_code = 0;
    for path in rom_paths {
        let path = path.as_ref();
        if flags.quit.load(Ordering::Relaxed) {
            log::info!("quit requested, stopping batch early");
            break;
        }
        match load_rom_file(path) {
            Ok(bytes) => run_one(&bytes, &path.display().to_string(), config, host, flags),
            Err(e) => {
                log::warn!("{}: {}", path.display(), e);
                host.error_out(&format!("{}: {}", path.display(), e));
                exit_code = 1;
            }
        }
    }
    exit_code
}

fn run_one<H: HostBridge>(
    rom: &[u8],
    name: &str,
    config: RunConfig,
    host: &mut H,
    flags: &CancelFlags,
) {
    let mut interp = match Interpreter::new(rom, config) {
        Ok(interp) => interp,
        Err(e) => {
            log::warn!("{}: {}", name, e);
            host.error_out(&format!("{}: {}", name, e));
            return;
        }
    };

    log::info!("running {}", name);

    loop {
        if flags.dump.swap(false, Ordering::Relaxed) {
            host.dump_out(&interp.dump());
        }
        if flags.stop.load(Ordering::Relaxed) {
            log::info!("{}: stop requested", name);
            break;
        }

        if let Err(reason) = interp.step_frame(host) {
            log::warn!("{}: halt: {}", name, reason);
            host.error_out(&format!("{}: {}", name, reason));
            if reason.wants_dump() {
                host.dump_out(&interp.dump());
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quirks::Quirks;
    use std::cell::Cell;

    struct FakeHost {
        now: Cell<i64>,
        errors: std::cell::RefCell<Vec<String>>,
        dumps: std::cell::RefCell<Vec<String>>,
    }

    impl FakeHost {
        fn new() -> Self {
            FakeHost {
                now: Cell::new(0),
                errors: std::cell::RefCell::new(Vec::new()),
                dumps: std::cell::RefCell::new(Vec::new()),
            }
        }
    }

    impl HostBridge for FakeHost {
        fn now_ns(&self) -> i64 {
            let n = self.now.get();
            self.now.set(n + 16_666_667);
            n
        }
        fn sleep_ns(&self, _ns: i64) {}
        fn sample_keys(&mut self) -> u16 {
            0
        }
        fn flush_framebuffer(&mut self, _framebuffer: &[u8; 256]) {}
        fn beep(&mut self) {}
        fn random_byte(&mut self) -> u8 {
            0
        }
        fn dump_out(&mut self, text: &str) {
            self.dumps.borrow_mut().push(text.to_string());
        }
        fn error_out(&mut self, text: &str) {
            self.errors.borrow_mut().push(text.to_string());
        }
    }

    #[test]
    fn runs_builtin_demo_when_no_roms_given() {
        let flags = CancelFlags::new();
        flags.stop.store(true, Ordering::Relaxed); // halt after the first frame
        let mut host = FakeHost::new();
        let no_roms: [&Path; 0] = [];
        let code = run_batch(&no_roms, RunConfig::default(), &mut host, &flags);
        assert_eq!(code, 0);
        assert!(host.errors.borrow().is_empty());
    }

    #[test]
    fn missing_rom_file_reports_error_and_nonzero_exit() {
        let flags = CancelFlags::new();
        let mut host = FakeHost::new();
        let paths = [Path::new("/nonexistent/path/to/rom.ch8")];
        let code = run_batch(&paths, RunConfig::default(), &mut host, &flags);
        assert_eq!(code, 1);
        assert_eq!(host.errors.borrow().len(), 1);
    }

    #[test]
    fn too_many_roms_is_rejected_up_front() {
        let flags = CancelFlags::new();
        let mut host = FakeHost::new();
        let paths: Vec<&Path> = (0..11).map(|_| Path::new("irrelevant.ch8")).collect();
        let code = run_batch(&paths, RunConfig::default(), &mut host, &flags);
        assert_eq!(code, 1);
        assert!(host.errors.borrow()[0].contains("too many"));
    }

    #[test]
    fn halt_is_reported_but_not_a_load_failure() {
        // 00EE with an empty stack halts immediately; that's not a load
        // error, so the batch still exits 0.
        let dir = std::env::temp_dir().join(format!(
            "chip8vm-orchestrator-test-{:?}",
            std::thread::current().id()
        ));
        std::fs::write(&dir, [0x00u8, 0xEE]).unwrap();
        let flags = CancelFlags::new();
        let mut host = FakeHost::new();
        let config = RunConfig {
            quirks: Quirks::NONE,
            ..RunConfig::default()
        };
        let code = run_batch(&[dir.as_path()], config, &mut host, &flags);
        std::fs::remove_file(&dir).ok();
        assert_eq!(code, 0);
        assert_eq!(host.errors.borrow().len(), 1);
    }

    #[test]
    fn dump_flag_is_cleared_after_one_dump() {
        let flags = CancelFlags::new();
        flags.dump.store(true, Ordering::Relaxed);
        flags.stop.store(true, Ordering::Relaxed);
        let mut host = FakeHost::new();
        let no_roms: [&Path; 0] = [];
        run_batch(&no_roms, RunConfig::default(), &mut host, &flags);
        assert_eq!(host.dumps.borrow().len(), 1);
        assert!(!flags.dump.load(Ordering::Relaxed));
    }
}
