//! ConPTY plumbing for Windows.
//!
//! Safe wrapper around the Win32 pseudo-console API: pipe setup, console
//! creation, spawning a child process with the pseudo-console attribute,
//! and the ordered teardown of every handle involved.

use std::ffi::c_void;
use std::io;
use std::path::Path;

use thiserror::Error;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, DuplicateHandle, SetHandleInformation, BOOL, DUPLICATE_SAME_ACCESS, HANDLE,
    HANDLE_FLAGS, HANDLE_FLAG_INHERIT,
};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetCurrentProcess, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT, INFINITE,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTUPINFOEXW,
};
use windows::Win32::System::IO::CancelIoEx;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to create pipe: {0}")]
    PipeCreation(#[source] windows::core::Error),

    #[error("failed to create pseudo console: {0}")]
    ConsoleCreation(#[source] windows::core::Error),

    #[error("failed to duplicate pipe handle: {0}")]
    HandleDuplication(#[source] windows::core::Error),

    #[error("failed to build process attribute list: {0}")]
    AttributeList(#[source] windows::core::Error),

    #[error("failed to spawn process: {0}")]
    ProcessSpawn(#[source] windows::core::Error),

    #[error("failed to resize pseudo console: {0}")]
    Resize(#[source] windows::core::Error),

    #[error("failed to read from pty: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write to pty: {0}")]
    Write(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;

/// One ConPTY-backed child process and every OS resource bound to it.
///
/// Either all members are live (session running) or all have been
/// released: `open` unwinds fully when any step fails, so a partially
/// built bundle is never observable.
pub struct PseudoConsole {
    hpc: HPCON,
    input_write: HANDLE,
    output_read: HANDLE,
    process: PROCESS_INFORMATION,
    /// Backing storage for the proc-thread attribute list. The child keeps
    /// no reference, but it is released with the other members.
    attr_list: Vec<u8>,
    /// CreateProcessW may rewrite this buffer in place; owned until teardown.
    cmdline: Vec<u16>,
}

// Safety: the raw handles are only mutated by open/release, which the
// owning session serializes; concurrent read/write/wait on the distinct
// handles is the supported kernel usage.
unsafe impl Send for PseudoConsole {}
unsafe impl Sync for PseudoConsole {}

/// The four raw ends from CreatePipe. The child-facing ends belong to the
/// pseudo console once it exists and our ends get duplicated, so every raw
/// end is closed after construction, on success and failure alike.
#[derive(Default)]
struct PipeEnds {
    input_read: HANDLE,
    input_write: HANDLE,
    output_read: HANDLE,
    output_write: HANDLE,
}

impl PipeEnds {
    unsafe fn close_all(&mut self) {
        for handle in [
            self.input_read,
            self.input_write,
            self.output_read,
            self.output_write,
        ] {
            if !handle.is_invalid() {
                let _ = CloseHandle(handle);
            }
        }
        *self = Self::default();
    }
}

impl PseudoConsole {
    /// Spawn `command_line` under a new pseudo console of the given size.
    pub fn open(command_line: &str, working_dir: &Path, cols: u16, rows: u16) -> Result<Self> {
        let mut pty = PseudoConsole {
            hpc: HPCON::default(),
            input_write: HANDLE::default(),
            output_read: HANDLE::default(),
            process: PROCESS_INFORMATION::default(),
            attr_list: Vec::new(),
            cmdline: Vec::new(),
        };

        let mut ends = PipeEnds::default();
        let result =
            unsafe { pty.open_internal(&mut ends, command_line, working_dir, cols, rows) };
        unsafe { ends.close_all() };

        if let Err(e) = result {
            pty.release();
            return Err(e);
        }
        Ok(pty)
    }

    unsafe fn open_internal(
        &mut self,
        ends: &mut PipeEnds,
        command_line: &str,
        working_dir: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<()> {
        let security = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: BOOL::from(true),
        };

        // Input pipe (we write, the console reads)
        CreatePipe(
            &mut ends.input_read,
            &mut ends.input_write,
            Some(&security),
            0,
        )
        .map_err(PtyError::PipeCreation)?;

        // Output pipe (the console writes, we read)
        CreatePipe(
            &mut ends.output_read,
            &mut ends.output_write,
            Some(&security),
            0,
        )
        .map_err(PtyError::PipeCreation)?;

        // Our ends must not leak into the child
        let _ = SetHandleInformation(ends.input_write, HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0));
        let _ = SetHandleInformation(ends.output_read, HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0));

        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };
        self.hpc = CreatePseudoConsole(size, ends.input_read, ends.output_write, 0)
            .map_err(PtyError::ConsoleCreation)?;

        self.input_write = duplicate_for_io(ends.input_write)?;
        self.output_read = duplicate_for_io(ends.output_read)?;

        // Attribute list binding the pseudo console to the new process
        let mut attr_size: usize = 0;
        let _ = InitializeProcThreadAttributeList(
            LPPROC_THREAD_ATTRIBUTE_LIST::default(),
            1,
            0,
            &mut attr_size,
        );

        let mut buffer = vec![0u8; attr_size];
        let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(buffer.as_mut_ptr() as *mut _);
        InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_size)
            .map_err(PtyError::AttributeList)?;
        // The heap allocation is stable across the move into self.
        self.attr_list = buffer;

        UpdateProcThreadAttribute(
            attr_list,
            0,
            PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
            Some(self.hpc.0 as *const c_void),
            std::mem::size_of::<HPCON>(),
            None,
            None,
        )
        .map_err(PtyError::AttributeList)?;

        let mut startup_info = STARTUPINFOEXW {
            StartupInfo: std::mem::zeroed(),
            lpAttributeList: attr_list,
        };
        startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;

        self.cmdline = wide_string(command_line);
        let dir_wide = wide_string(&working_dir.to_string_lossy());

        CreateProcessW(
            PCWSTR::null(),
            PWSTR(self.cmdline.as_mut_ptr()),
            None,
            None,
            false,
            EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
            None,
            PCWSTR(dir_wide.as_ptr()),
            &startup_info.StartupInfo,
            &mut self.process,
        )
        .map_err(PtyError::ProcessSpawn)?;

        Ok(())
    }

    /// Resize the live pseudo console.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };

        unsafe { ResizePseudoConsole(self.hpc, size).map_err(PtyError::Resize) }
    }

    /// Write bytes to the child's input stream.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut written: u32 = 0;

        unsafe {
            WriteFile(self.input_write, Some(data), Some(&mut written), None)
                .map_err(|e| PtyError::Write(io::Error::from_raw_os_error(e.code().0 as i32)))?;
        }

        Ok(written as usize)
    }

    /// Blocking read from the child's output stream. Unblocked by
    /// `cancel_io` or by the pipe breaking when the console goes away.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut read: u32 = 0;

        unsafe {
            ReadFile(self.output_read, Some(buffer), Some(&mut read), None)
                .map_err(|e| PtyError::Read(io::Error::from_raw_os_error(e.code().0 as i32)))?;
        }

        Ok(read as usize)
    }

    /// Cancel any in-flight read so a blocked pump thread can exit.
    pub fn cancel_io(&self) {
        unsafe {
            let _ = CancelIoEx(self.output_read, None);
        }
    }

    /// Best-effort kill of the child process.
    pub fn terminate(&self, exit_code: u32) {
        if self.process.hProcess.is_invalid() {
            return;
        }

        unsafe {
            if let Err(e) = TerminateProcess(self.process.hProcess, exit_code) {
                tracing::debug!("TerminateProcess failed: {e}");
            }
        }
    }

    /// Block until the child terminates; returns its exit code, or `None`
    /// when no process was spawned or the code cannot be read.
    pub fn wait_for_exit(&self) -> Option<u32> {
        if self.process.hProcess.is_invalid() {
            return None;
        }

        let mut exit_code: u32 = 0;
        unsafe {
            let _ = WaitForSingleObject(self.process.hProcess, INFINITE);
            GetExitCodeProcess(self.process.hProcess, &mut exit_code).ok()?;
        }
        Some(exit_code)
    }

    /// Release every resource in teardown order: duplicated pipe handles,
    /// process handle, thread handle, attribute list, pseudo console,
    /// command-line buffer. Safe to call repeatedly; each step checks
    /// validity first.
    fn release(&mut self) {
        unsafe {
            if !self.input_write.is_invalid() {
                let _ = CloseHandle(self.input_write);
                self.input_write = HANDLE::default();
            }
            if !self.output_read.is_invalid() {
                let _ = CloseHandle(self.output_read);
                self.output_read = HANDLE::default();
            }
            if !self.process.hProcess.is_invalid() {
                let _ = CloseHandle(self.process.hProcess);
                self.process.hProcess = HANDLE::default();
            }
            if !self.process.hThread.is_invalid() {
                let _ = CloseHandle(self.process.hThread);
                self.process.hThread = HANDLE::default();
            }
            if !self.attr_list.is_empty() {
                DeleteProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST(
                    self.attr_list.as_mut_ptr() as *mut _,
                ));
                self.attr_list = Vec::new();
            }
            if !self.hpc.is_invalid() {
                ClosePseudoConsole(self.hpc);
                self.hpc = HPCON::default();
            }
            self.cmdline = Vec::new();
        }
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        self.release();
    }
}

unsafe fn duplicate_for_io(source: HANDLE) -> Result<HANDLE> {
    let mut duplicated = HANDLE::default();
    DuplicateHandle(
        GetCurrentProcess(),
        source,
        GetCurrentProcess(),
        &mut duplicated,
        0,
        false,
        DUPLICATE_SAME_ACCESS,
    )
    .map_err(PtyError::HandleDuplication)?;
    Ok(duplicated)
}

fn wide_string(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}
