//! Attach/detach sessions against the hidden console process.
//!
//! The console buffer belongs to a separate process that can exit at any
//! tick, so every read happens inside a scoped, reference-counted
//! attachment session: the first lock in the process performs the real
//! `AttachConsole`, the last one dropped performs `FreeConsole`. Buffer
//! reads, resizes and size queries are only reachable through a live
//! lock, which is what bounds the window during which the external buffer
//! is assumed stable.
//!
//! "The target is gone" is an expected, frequent outcome here, not
//! corruption: it gets its own error variant and callers react by tearing
//! the window down, never by aborting the process.

use std::sync::atomic::{AtomicI32, Ordering};

use thiserror::Error;

use crate::geometry::Dimension;
use crate::grid::CellGrid;

/// Largest number of bytes one bulk console read may transfer.
pub const TRANSFER_CEILING: usize = 64 * 1024;

/// Serialized size of one cell on the console transfer path (UTF-16 code
/// unit plus attribute word).
pub const CELL_TRANSFER_BYTES: usize = 4;

/// Whether a snapshot of `dim` must fall back to row-at-a-time reads
/// because the whole grid would exceed the per-call transfer ceiling.
pub fn needs_row_chunking(dim: Dimension) -> bool {
    dim.area() * CELL_TRANSFER_BYTES >= TRANSFER_CEILING
}

#[derive(Error, Debug)]
pub enum AttachError {
    /// The attached console process has exited. Expected and recoverable:
    /// the owning window transitions to Closing.
    #[error("attached console process has exited")]
    TargetGone,

    /// Anything else the console host reported. Fatal for the issuing
    /// window only.
    #[error("console host failure: {0}")]
    Host(String),
}

impl AttachError {
    pub fn is_gone(&self) -> bool {
        matches!(self, AttachError::TargetGone)
    }
}

pub type Result<T> = std::result::Result<T, AttachError>;

/// Operations legal only while an attachment session is open.
pub trait TerminalLock {
    /// Current visible dimension of the external buffer.
    fn current_size(&mut self) -> Result<Dimension>;

    /// Resize the external buffer/viewport. The request is clamped to the
    /// host's maximum; callers must use the returned dimension, not the
    /// requested one.
    fn resize(&mut self, requested: Dimension) -> Result<Dimension>;

    /// Read the visible window of the external buffer.
    fn snapshot(&mut self) -> Result<CellGrid>;

    /// Title of the attached console.
    fn title(&mut self) -> Result<String>;
}

/// Something a session can be opened against. The console process is the
/// production implementation; tests substitute a scripted fake.
pub trait TerminalSource {
    /// Open an attachment session. `Err(TargetGone)` means the process is
    /// confirmed terminated and no further sessions will succeed.
    fn lock(&mut self) -> Result<Box<dyn TerminalLock + '_>>;
}

/// Process-wide attachment reference count.
///
/// Only the transition to one performs the real attach and only the
/// transition to zero the real detach, so nested sessions from different
/// windows never detach the shared console early.
#[derive(Debug, Default)]
pub struct AttachCounter(AtomicI32);

impl AttachCounter {
    pub const fn new() -> Self {
        Self(AtomicI32::new(0))
    }

    /// Increment; returns true when this is the first attachment.
    pub fn acquire(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst) == 0
    }

    /// Decrement; returns true when this was the last attachment.
    pub fn release(&self) -> bool {
        let prev = self.0.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "attachment count underflow");
        prev == 1
    }

    pub fn is_attached(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }
}

#[cfg(windows)]
pub use win::{AttachGuard, ConsoleProcess};

#[cfg(windows)]
mod win {
    //! Win32 console plumbing. Everything here assumes the single-threaded
    //! tick loop; the attach counter is still process-wide because the
    //! console attachment itself is.

    use std::iter;

    use tracing::{debug, info, warn};
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::Foundation::{
        CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, HWND, WAIT_FAILED, WAIT_OBJECT_0,
    };
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows::Win32::System::Console::{
        AllocConsole, AttachConsole, FreeConsole, GetConsoleScreenBufferInfo, GetConsoleTitleW,
        GetConsoleWindow, GetLargestConsoleWindowSize, GetStdHandle, ReadConsoleOutputW,
        SetConsoleScreenBufferSize, SetConsoleWindowInfo, CHAR_INFO, CONSOLE_SCREEN_BUFFER_INFO,
        COORD, SMALL_RECT, STD_OUTPUT_HANDLE,
    };
    use windows::Win32::System::Threading::{
        CreateProcessW, WaitForSingleObject, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
        STARTUPINFOW,
    };
    use windows::Win32::Foundation::{LPARAM, WPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{PostMessageW, ShowWindow, SW_HIDE, WM_CLOSE};

    use super::*;
    use crate::config::Settings;
    use crate::grid::{Attr, Cell, CursorPos};

    /// Win32 error codes the attach race is known to spuriously report.
    const ERROR_ACCESS_DENIED: i32 = 5;
    const ERROR_GEN_FAILURE: i32 = 31;
    /// Stale stdout handle after the shell recreated its buffer.
    const ERROR_INVALID_HANDLE: i32 = 6;

    static ATTACH: AttachCounter = AttachCounter::new();

    fn host_err(context: &str, e: windows::core::Error) -> AttachError {
        AttachError::Host(format!("{context}: {e}"))
    }

    fn win32_code(e: &windows::core::Error) -> i32 {
        e.code().0 & 0xffff
    }

    /// The hidden shell process and its console.
    pub struct ConsoleProcess {
        process_handle: HANDLE,
        stdout_handle: HANDLE,
        process_id: u32,
        console_hwnd: HWND,
    }

    // Safety: handles are only used from the owning tick loop; they are
    // plain kernel handles with no thread affinity.
    unsafe impl Send for ConsoleProcess {}

    impl ConsoleProcess {
        /// Allocate a fresh console, spawn the shell attached to it, size
        /// its buffer per the settings and hide its window.
        pub fn spawn(settings: &Settings) -> Result<Self> {
            assert!(
                !ATTACH.is_attached(),
                "console spawn while another console is attached"
            );
            unsafe {
                // The new process inherits the console we allocate here; do
                // not spawn detached and attach later, the new console may
                // not exist yet when the attach runs.
                AllocConsole().map_err(|e| host_err("AllocConsole", e))?;
                ATTACH.acquire();
                let result = Self::spawn_in_console(settings);
                if ATTACH.release() {
                    let _ = FreeConsole();
                }
                result
            }
        }

        unsafe fn spawn_in_console(settings: &Settings) -> Result<Self> {
            let mut command_line = settings.shell.clone();
            if !settings.shell_arguments.is_empty() {
                command_line.push(' ');
                command_line.push_str(&settings.shell_arguments);
            }
            let mut cmd_wide: Vec<u16> = command_line
                .encode_utf16()
                .chain(iter::once(0))
                .collect();

            let si = STARTUPINFOW {
                cb: std::mem::size_of::<STARTUPINFOW>() as u32,
                ..Default::default()
            };
            let mut pi = PROCESS_INFORMATION::default();
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(cmd_wide.as_mut_ptr()),
                None,
                None,
                true,
                PROCESS_CREATION_FLAGS(0),
                None,
                PCWSTR::null(),
                &si,
                &mut pi,
            )
            .map_err(|e| host_err("CreateProcessW", e))?;
            let _ = CloseHandle(pi.hThread);

            let console_hwnd = GetConsoleWindow();
            let _ = ShowWindow(console_hwnd, SW_HIDE);

            let stdout_handle =
                GetStdHandle(STD_OUTPUT_HANDLE).map_err(|e| host_err("GetStdHandle", e))?;

            let mut process = Self {
                process_handle: pi.hProcess,
                stdout_handle,
                process_id: pi.dwProcessId,
                console_hwnd,
            };
            process.initial_resize(settings)?;
            info!(pid = process.process_id, shell = %settings.shell, "spawned hidden console shell");
            Ok(process)
        }

        unsafe fn initial_resize(&mut self, settings: &Settings) -> Result<()> {
            let csbi = self.buffer_info()?;
            let max = GetLargestConsoleWindowSize(self.stdout_handle);
            if max.X == 0 && max.Y == 0 {
                return Err(AttachError::Host(
                    "GetLargestConsoleWindowSize returned zero".into(),
                ));
            }
            let dim = settings
                .console_dim()
                .clamp_to_max(Dimension::new(max.X as i32, max.Y as i32));

            let buffer_size = COORD {
                X: dim.width as i16,
                Y: (csbi.dwSize.Y as i32).max(dim.height) as i16,
            };
            SetConsoleScreenBufferSize(self.stdout_handle, buffer_size)
                .map_err(|e| host_err("SetConsoleScreenBufferSize", e))?;
            let viewport = SMALL_RECT {
                Left: 0,
                Top: 0,
                Right: dim.width as i16 - 1,
                Bottom: dim.height as i16 - 1,
            };
            SetConsoleWindowInfo(self.stdout_handle, true, &viewport)
                .map_err(|e| host_err("SetConsoleWindowInfo", e))?;
            Ok(())
        }

        pub fn process_id(&self) -> u32 {
            self.process_id
        }

        /// Whether the shell process is still running.
        pub fn is_alive(&self) -> bool {
            unsafe { WaitForSingleObject(self.process_handle, 0) != WAIT_OBJECT_0 }
        }

        /// Perform the real cross-process attach, retrying past the narrow
        /// race where AttachConsole claims the process is gone while its
        /// liveness handle says otherwise. The handle wins.
        fn attach(&self) -> Result<()> {
            loop {
                match unsafe { AttachConsole(self.process_id) } {
                    Ok(()) => break,
                    Err(e) => match win32_code(&e) {
                        ERROR_ACCESS_DENIED => return Err(AttachError::TargetGone),
                        ERROR_GEN_FAILURE => {
                            let wait = unsafe { WaitForSingleObject(self.process_handle, 0) };
                            if wait == WAIT_OBJECT_0 {
                                // Signalled handle: the process really has
                                // closed.
                                return Err(AttachError::TargetGone);
                            }
                            if wait == WAIT_FAILED {
                                return Err(AttachError::Host(
                                    "WaitForSingleObject failed during attach".into(),
                                ));
                            }
                            debug!("spurious AttachConsole failure; process alive, retrying");
                        }
                        _ => return Err(host_err("AttachConsole", e)),
                    },
                }
            }
            let console = unsafe { GetConsoleWindow() };
            // Attaching to some other process's console would silently
            // corrupt every subsequent read.
            assert!(
                console == self.console_hwnd,
                "attached to an unexpected console window"
            );
            Ok(())
        }

        fn raw_buffer_info(&self) -> windows::core::Result<CONSOLE_SCREEN_BUFFER_INFO> {
            let mut csbi = CONSOLE_SCREEN_BUFFER_INFO::default();
            unsafe { GetConsoleScreenBufferInfo(self.stdout_handle, &mut csbi) }?;
            Ok(csbi)
        }

        fn buffer_info(&self) -> Result<CONSOLE_SCREEN_BUFFER_INFO> {
            self.raw_buffer_info()
                .map_err(|e| host_err("GetConsoleScreenBufferInfo", e))
        }

        /// Reopen CONOUT$ after the shell invalidated our cached handle.
        fn reset_handle(&mut self) -> Result<()> {
            let fresh = unsafe {
                CreateFileW(
                    windows::core::w!("CONOUT$"),
                    GENERIC_READ.0 | GENERIC_WRITE.0,
                    FILE_SHARE_WRITE,
                    None,
                    OPEN_EXISTING,
                    FILE_FLAGS_AND_ATTRIBUTES(0),
                    None,
                )
            }
            .map_err(|e| host_err("CreateFileW(CONOUT$)", e))?;
            let _ = unsafe { CloseHandle(self.stdout_handle) };
            self.stdout_handle = fresh;
            Ok(())
        }
    }

    impl TerminalSource for ConsoleProcess {
        fn lock(&mut self) -> Result<Box<dyn TerminalLock + '_>> {
            if ATTACH.acquire() {
                if let Err(e) = self.attach() {
                    ATTACH.release();
                    return Err(e);
                }
            }
            Ok(Box::new(AttachGuard { process: self }))
        }
    }

    impl Drop for ConsoleProcess {
        fn drop(&mut self) {
            unsafe {
                // Ask the shell to close; it owns the console window.
                let _ = PostMessageW(self.console_hwnd, WM_CLOSE, WPARAM(0), LPARAM(0));
                let _ = CloseHandle(self.stdout_handle);
                let _ = CloseHandle(self.process_handle);
            }
        }
    }

    /// An open attachment session. Dropping it releases the process-wide
    /// count and detaches the console when it reaches zero.
    pub struct AttachGuard<'a> {
        process: &'a mut ConsoleProcess,
    }

    impl Drop for AttachGuard<'_> {
        fn drop(&mut self) {
            if ATTACH.release() {
                unsafe {
                    let _ = FreeConsole();
                }
            }
        }
    }

    impl AttachGuard<'_> {
        /// A failing console call while the shell is gone surfaces as
        /// `TargetGone` instead of a host error.
        fn classify(&self, context: &str, e: windows::core::Error) -> AttachError {
            if !self.process.is_alive() {
                return AttachError::TargetGone;
            }
            host_err(context, e)
        }

        fn map_gone(&self, e: AttachError) -> AttachError {
            match e {
                AttachError::Host(_) if !self.process.is_alive() => AttachError::TargetGone,
                other => other,
            }
        }
    }

    impl TerminalLock for AttachGuard<'_> {
        fn current_size(&mut self) -> Result<Dimension> {
            let csbi = match self.process.raw_buffer_info() {
                Ok(csbi) => csbi,
                Err(e) if win32_code(&e) == ERROR_INVALID_HANDLE => {
                    // One bounded retry with a fresh handle; the shell can
                    // recreate its buffer under us.
                    warn!("stale console handle; retrying with a fresh CONOUT$");
                    self.process.reset_handle()?;
                    self.process
                        .buffer_info()
                        .map_err(|e| self.map_gone(e))?
                }
                Err(e) => {
                    return Err(self.map_gone(host_err("GetConsoleScreenBufferInfo", e)))
                }
            };
            Ok(viewport_dim(&csbi))
        }

        fn resize(&mut self, requested: Dimension) -> Result<Dimension> {
            let csbi = self.process.buffer_info().map_err(|e| self.map_gone(e))?;
            let current_width = (csbi.srWindow.Right - csbi.srWindow.Left + 1) as i32;

            let max = unsafe { GetLargestConsoleWindowSize(self.process.stdout_handle) };
            if max.X == 0 && max.Y == 0 {
                return Err(self.classify(
                    "GetLargestConsoleWindowSize",
                    windows::core::Error::from_win32(),
                ));
            }
            let dim = requested.clamp_to_max(Dimension::new(max.X as i32, max.Y as i32));

            // Never shrink the backing buffer height below its scrollback.
            let buffer_size = COORD {
                X: dim.width as i16,
                Y: (csbi.dwSize.Y as i32).max(dim.height) as i16,
            };
            let viewport = SMALL_RECT {
                Left: 0,
                Top: 0,
                Right: dim.width as i16 - 1,
                Bottom: dim.height as i16 - 1,
            };
            // Growing: widen the buffer before the viewport fits in it.
            // Shrinking: the viewport has to give way first.
            let result = unsafe {
                if current_width < dim.width {
                    SetConsoleScreenBufferSize(self.process.stdout_handle, buffer_size).and_then(
                        |()| SetConsoleWindowInfo(self.process.stdout_handle, true, &viewport),
                    )
                } else {
                    SetConsoleWindowInfo(self.process.stdout_handle, true, &viewport).and_then(
                        |()| SetConsoleScreenBufferSize(self.process.stdout_handle, buffer_size),
                    )
                }
            };
            result.map_err(|e| self.classify("console resize", e))?;

            // Report what was actually achieved, not what was asked for.
            let csbi = self.process.buffer_info().map_err(|e| self.map_gone(e))?;
            Ok(viewport_dim(&csbi))
        }

        fn snapshot(&mut self) -> Result<CellGrid> {
            let csbi = self.process.buffer_info().map_err(|e| self.map_gone(e))?;
            let dim = viewport_dim(&csbi);
            let mut raw = vec![CHAR_INFO::default(); dim.area()];

            if !needs_row_chunking(dim) {
                let size = COORD {
                    X: dim.width as i16,
                    Y: dim.height as i16,
                };
                let mut region = csbi.srWindow;
                unsafe {
                    ReadConsoleOutputW(
                        self.process.stdout_handle,
                        raw.as_mut_ptr(),
                        size,
                        COORD::default(),
                        &mut region,
                    )
                }
                .map_err(|e| self.classify("ReadConsoleOutputW", e))?;
            } else {
                // The whole grid exceeds the transfer ceiling; read one
                // row per call.
                let line_size = COORD {
                    X: dim.width as i16,
                    Y: 1,
                };
                for row in 0..dim.height {
                    let mut region = SMALL_RECT {
                        Left: csbi.srWindow.Left,
                        Top: csbi.srWindow.Top + row as i16,
                        Right: csbi.srWindow.Right,
                        Bottom: csbi.srWindow.Top + row as i16,
                    };
                    let offset = row as usize * dim.width as usize;
                    unsafe {
                        ReadConsoleOutputW(
                            self.process.stdout_handle,
                            raw.as_mut_ptr().add(offset),
                            line_size,
                            COORD::default(),
                            &mut region,
                        )
                    }
                    .map_err(|e| self.classify("ReadConsoleOutputW", e))?;
                }
            }

            let cells = raw
                .iter()
                .map(|info| {
                    let unit = unsafe { info.Char.UnicodeChar };
                    let ch = char::from_u32(unit as u32).unwrap_or(' ');
                    Cell::new(ch, Attr::from_bits_retain(info.Attributes))
                })
                .collect();
            let cursor = CursorPos {
                col: (csbi.dwCursorPosition.X - csbi.srWindow.Left) as i32,
                row: (csbi.dwCursorPosition.Y - csbi.srWindow.Top) as i32,
            };
            Ok(CellGrid::from_cells(dim, cells, cursor))
        }

        fn title(&mut self) -> Result<String> {
            let mut buffer = [0u16; 0x800];
            let len = unsafe { GetConsoleTitleW(&mut buffer) } as usize;
            if len == 0 && !self.process.is_alive() {
                return Err(AttachError::TargetGone);
            }
            Ok(String::from_utf16_lossy(&buffer[..len]))
        }
    }

    fn viewport_dim(csbi: &CONSOLE_SCREEN_BUFFER_INFO) -> Dimension {
        Dimension::new(
            (csbi.srWindow.Right - csbi.srWindow.Left + 1) as i32,
            (csbi.srWindow.Bottom - csbi.srWindow.Top + 1) as i32,
        )
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{AttachEvent, FakeConsole, SharedConsole};
    use super::*;
    use std::rc::Rc;

    #[test]
    fn chunking_kicks_in_at_the_transfer_ceiling() {
        // 80x24 cells = 7680 bytes, far below 64K.
        assert!(!needs_row_chunking(Dimension::new(80, 24)));
        // 16384 cells = exactly 64K: must chunk.
        assert!(needs_row_chunking(Dimension::new(128, 128)));
        assert!(needs_row_chunking(Dimension::new(200, 100)));
    }

    #[test]
    fn counter_reports_first_and_last() {
        let counter = AttachCounter::new();
        assert!(counter.acquire());
        assert!(!counter.acquire());
        assert!(!counter.release());
        assert!(counter.is_attached());
        assert!(counter.release());
        assert!(!counter.is_attached());
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn counter_underflow_is_fatal() {
        AttachCounter::new().release();
    }

    #[test]
    fn nested_sessions_detach_only_at_zero() {
        let shared = Rc::new(SharedConsole::default());
        let mut outer_console = FakeConsole::with_shared(Rc::clone(&shared), Dimension::new(8, 2));
        let mut inner_console = FakeConsole::with_shared(Rc::clone(&shared), Dimension::new(8, 2));

        let outer = outer_console.lock().unwrap();
        {
            let _inner = inner_console.lock().unwrap();
        }
        // Dropping the inner session must not detach under the outer one.
        assert_eq!(shared.events.borrow().as_slice(), &[AttachEvent::Attached]);
        drop(outer);
        assert_eq!(
            shared.events.borrow().as_slice(),
            &[AttachEvent::Attached, AttachEvent::Detached]
        );
    }

    #[test]
    fn gone_process_refuses_sessions() {
        let mut console = FakeConsole::new(Dimension::new(8, 2));
        console.state().borrow_mut().gone = true;
        let err = console.lock().err().unwrap();
        assert!(err.is_gone());
    }

    #[test]
    fn resize_clamps_to_external_maximum() {
        let mut console = FakeConsole::new(Dimension::new(80, 24));
        console.state().borrow_mut().max_dim = Dimension::new(120, 60);
        let mut lock = console.lock().unwrap();
        let got = lock.resize(Dimension::new(999, 30)).unwrap();
        assert_eq!(got, Dimension::new(120, 30));
        let got = lock.resize(Dimension::new(100, 999)).unwrap();
        assert_eq!(got, Dimension::new(100, 60));
    }
}
