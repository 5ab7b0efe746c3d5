//! ConPTY backend for Windows
//!
//! Wraps a Windows pseudo console plus the process attached to it.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, ERROR_BROKEN_PIPE, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTUPINFOEXW,
};
use windows::Win32::System::IO::CancelIoEx;

use super::{Pty, PtyCommand, PtyError, PtyReader, Result};
use crate::sync::lock;

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;

/// ConPTY handle wrapper
pub struct ConPty {
    hpc: Mutex<Option<HPCON>>,
    input_write: Mutex<Option<HANDLE>>,
    /// Copy of the reader's handle, used only to cancel a blocked read
    output_read: HANDLE,
    process: PROCESS_INFORMATION,
}

// Safety: the raw handles are only used through Win32 calls that are safe to
// issue from any thread; mutable state sits behind mutexes.
unsafe impl Send for ConPty {}
unsafe impl Sync for ConPty {}

/// Blocking reader over the pseudo console's output pipe.
struct ConPtyReader {
    handle: HANDLE,
}

unsafe impl Send for ConPtyReader {}

impl Read for ConPtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read: u32 = 0;
        let result = unsafe { ReadFile(self.handle, Some(buf), Some(&mut read), None) };
        match result {
            Ok(()) => Ok(read as usize),
            // The pseudo console closed its end: end of stream
            Err(e) if e.code() == ERROR_BROKEN_PIPE.to_hresult() => Ok(0),
            Err(e) => Err(io::Error::from_raw_os_error(e.code().0)),
        }
    }
}

impl Drop for ConPtyReader {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Quote one argument for the Windows command line.
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for ch in arg.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(ch);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

fn command_line(command: &PtyCommand) -> Vec<u16> {
    let mut line = quote_arg(&command.program);
    for arg in &command.args {
        line.push(' ');
        line.push_str(&quote_arg(arg));
    }
    line.encode_utf16().chain(std::iter::once(0)).collect()
}

/// UTF-16 environment block: inherited variables plus the command's overrides.
fn environment_block(command: &PtyCommand) -> Vec<u16> {
    let mut vars: BTreeMap<String, String> = std::env::vars().collect();
    for (key, value) in &command.env {
        vars.insert(key.clone(), value.clone());
    }
    let mut block = Vec::new();
    for (key, value) in vars {
        block.extend(format!("{key}={value}").encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}

fn wide_path(path: &std::path::Path) -> Vec<u16> {
    path.to_string_lossy()
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect()
}

impl ConPty {
    /// Create a new pseudo console and spawn the command on it
    pub fn open(command: &PtyCommand, cols: u16, rows: u16) -> Result<(Box<dyn Pty>, PtyReader)> {
        let (pty, reader) = unsafe { Self::create_internal(command, cols, rows)? };
        Ok((Box::new(pty), Box::new(reader)))
    }

    unsafe fn create_internal(command: &PtyCommand, cols: u16, rows: u16) -> Result<(Self, ConPtyReader)> {
        // Create pipes for PTY communication
        let mut pty_input_read = HANDLE::default();
        let mut pty_input_write = HANDLE::default();
        let mut pty_output_read = HANDLE::default();
        let mut pty_output_write = HANDLE::default();

        // Input pipe (we write, PTY reads)
        CreatePipe(&mut pty_input_read, &mut pty_input_write, None, 0).map_err(PtyError::Os)?;

        // Output pipe (PTY writes, we read)
        CreatePipe(&mut pty_output_read, &mut pty_output_write, None, 0).map_err(PtyError::Os)?;

        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };
        let hpc = CreatePseudoConsole(size, pty_input_read, pty_output_write, 0).map_err(|e| {
            PtyError::Open(e.to_string())
        })?;

        // Close the handles that the ConPTY now owns
        let _ = CloseHandle(pty_input_read);
        let _ = CloseHandle(pty_output_write);

        let mut attr_list_size: usize = 0;
        let _ = InitializeProcThreadAttributeList(
            LPPROC_THREAD_ATTRIBUTE_LIST::default(),
            1,
            0,
            &mut attr_list_size,
        );

        let mut attr_list_buffer = vec![0u8; attr_list_size];
        let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(attr_list_buffer.as_mut_ptr() as *mut _);

        let spawn_error = |e: windows::core::Error| PtyError::Spawn {
            program: command.program.clone(),
            reason: e.to_string(),
        };

        InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_list_size).map_err(spawn_error)?;

        // Associate ConPTY with the process
        UpdateProcThreadAttribute(
            attr_list,
            0,
            PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
            Some(hpc.0 as *const _),
            std::mem::size_of::<HPCON>(),
            None,
            None,
        )
        .map_err(spawn_error)?;

        let mut startup_info = STARTUPINFOEXW {
            StartupInfo: std::mem::zeroed(),
            lpAttributeList: attr_list,
        };
        startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;

        let mut process_info = PROCESS_INFORMATION::default();
        let mut cmd_wide = command_line(command);
        let env_block = environment_block(command);
        let cwd_wide = wide_path(&command.cwd);

        let spawned = CreateProcessW(
            PCWSTR::null(),
            PWSTR(cmd_wide.as_mut_ptr()),
            None,
            None,
            false,
            EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
            Some(env_block.as_ptr() as *const _),
            PCWSTR(cwd_wide.as_ptr()),
            &startup_info.StartupInfo,
            &mut process_info,
        );
        DeleteProcThreadAttributeList(attr_list);

        if let Err(e) = spawned {
            ClosePseudoConsole(hpc);
            let _ = CloseHandle(pty_input_write);
            let _ = CloseHandle(pty_output_read);
            return Err(spawn_error(e));
        }

        let pty = ConPty {
            hpc: Mutex::new(Some(hpc)),
            input_write: Mutex::new(Some(pty_input_write)),
            output_read: pty_output_read,
            process: process_info,
        };
        Ok((pty, ConPtyReader {
            handle: pty_output_read,
        }))
    }

    fn exited(&self, timeout_ms: u32) -> bool {
        unsafe { WaitForSingleObject(self.process.hProcess, timeout_ms) == WAIT_OBJECT_0 }
    }
}

impl Pty for ConPty {
    fn write(&self, data: &[u8]) -> Result<()> {
        let guard = lock(&self.input_write);
        let handle = guard.ok_or(PtyError::Closed)?;
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut written: u32 = 0;
            unsafe {
                WriteFile(handle, Some(remaining), Some(&mut written), None)
                    .map_err(|e| PtyError::Write(io::Error::from_raw_os_error(e.code().0)))?;
            }
            remaining = &remaining[written as usize..];
        }
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = lock(&self.hpc);
        let hpc = guard.ok_or(PtyError::Closed)?;
        let size = COORD {
            X: cols.max(1) as i16,
            Y: rows.max(1) as i16,
        };
        unsafe { ResizePseudoConsole(hpc, size).map_err(|e| PtyError::Resize(e.to_string())) }
    }

    fn try_wait(&self) -> Option<u32> {
        if !self.exited(0) {
            return None;
        }
        let mut exit_code: u32 = 0;
        unsafe { GetExitCodeProcess(self.process.hProcess, &mut exit_code).ok()? };
        Some(exit_code)
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.process.dwProcessId)
    }

    fn terminate(&self, grace: Duration) {
        // Closing the pseudo console sends CTRL_CLOSE_EVENT to attached processes
        if let Some(hpc) = lock(&self.hpc).take() {
            unsafe { ClosePseudoConsole(hpc) };
        }
        let grace_ms = u32::try_from(grace.as_millis()).unwrap_or(u32::MAX);
        if self.exited(grace_ms) {
            return;
        }
        warn!(pid = self.process.dwProcessId, "child still running after console close, terminating");
        unsafe {
            if let Err(e) = TerminateProcess(self.process.hProcess, 1) {
                debug!(error = %e, "TerminateProcess failed");
            }
        }
    }

    fn close(&self, grace: Duration) -> Result<()> {
        if let Some(handle) = lock(&self.input_write).take() {
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
        self.terminate(grace);
        // Unblock a reader still waiting on the pipe
        unsafe {
            let _ = CancelIoEx(self.output_read, None);
        }
        Ok(())
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        let _ = self.close(Duration::ZERO);
        unsafe {
            let _ = CloseHandle(self.process.hProcess);
            let _ = CloseHandle(self.process.hThread);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("plain"), "plain");
        assert_eq!(quote_arg("two words"), "\"two words\"");
        assert_eq!(quote_arg(""), "\"\"");
        assert_eq!(quote_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_arg("C:\\dir with space\\"), "\"C:\\dir with space\\\\\"");
    }

    #[test]
    fn test_conpty_creation() {
        let cwd = std::env::current_dir().expect("cwd");
        let command = PtyCommand::new("cmd.exe", cwd).arg("/c").arg("echo hello");
        assert!(ConPty::open(&command, 80, 24).is_ok());
    }
}
