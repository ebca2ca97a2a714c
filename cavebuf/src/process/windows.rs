//! Windows target processes via the Win32 virtual-memory API.

use std::mem;

use winapi::{
    shared::{
        basetsd::SIZE_T,
        minwindef::{FALSE, LPCVOID, LPVOID},
        winerror::ERROR_INVALID_ADDRESS,
    },
    um::{
        errhandlingapi::GetLastError,
        handleapi::CloseHandle,
        memoryapi::{
            ReadProcessMemory, VirtualAllocEx, VirtualFreeEx, VirtualQueryEx, WriteProcessMemory,
        },
        processthreadsapi::{GetCurrentProcess, OpenProcess},
        sysinfoapi::{GetSystemInfo, SYSTEM_INFO},
        winnt::{
            HANDLE, MEMORY_BASIC_INFORMATION, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
            PAGE_EXECUTE_READWRITE, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
            PROCESS_VM_READ, PROCESS_VM_WRITE,
        },
    },
};

use crate::{
    error::{BufferError, Result},
    memory::MemorySource,
    pages::{PageEnumerator, PageRecord, PageState},
    process::ProcessTarget,
};

/// A Windows process: the current one (pseudo-handle) or another process
/// opened by pid.
#[derive(Debug)]
pub struct Process {
    handle: HANDLE,
    owns_handle: bool,
}

// SAFETY: the handle is only passed to Win32 calls that are documented as
// callable from any thread.
unsafe impl Send for Process {}
unsafe impl Sync for Process {}

impl Process {
    pub fn current() -> Self {
        Self {
            handle: unsafe { GetCurrentProcess() },
            owns_handle: false,
        }
    }

    pub fn from_pid(pid: u32) -> Result<Self> {
        let access =
            PROCESS_QUERY_INFORMATION | PROCESS_VM_OPERATION | PROCESS_VM_READ | PROCESS_VM_WRITE;
        let handle = unsafe { OpenProcess(access, FALSE, pid) };
        if handle.is_null() {
            return Err(BufferError::ProcessOpenFailed(unsafe { GetLastError() }));
        }
        Ok(Self {
            handle,
            owns_handle: true,
        })
    }

    fn query_region(&self, addr: u64) -> Option<PageRecord> {
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
        let written = unsafe {
            VirtualQueryEx(
                self.handle,
                addr as LPCVOID,
                &mut info,
                mem::size_of::<MEMORY_BASIC_INFORMATION>() as SIZE_T,
            )
        };
        if written == 0 {
            return None;
        }
        let state = match info.State {
            MEM_COMMIT => PageState::Committed,
            MEM_RESERVE => PageState::Reserved,
            _ => PageState::Free,
        };
        Some(PageRecord {
            base: info.BaseAddress as u64,
            size: info.RegionSize as u64,
            state,
            protection: info.Protect,
        })
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.owns_handle {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

impl MemorySource for Process {
    fn read(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let mut read: SIZE_T = 0;
        let ok = unsafe {
            ReadProcessMemory(
                self.handle,
                addr as LPCVOID,
                out.as_mut_ptr() as LPVOID,
                out.len() as SIZE_T,
                &mut read,
            )
        };
        if ok == FALSE || read != out.len() as SIZE_T {
            return Err(BufferError::Unreadable {
                addr,
                len: out.len(),
                code: unsafe { GetLastError() },
            });
        }
        Ok(())
    }

    fn write(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut written: SIZE_T = 0;
        let ok = unsafe {
            WriteProcessMemory(
                self.handle,
                addr as LPVOID,
                bytes.as_ptr() as LPCVOID,
                bytes.len() as SIZE_T,
                &mut written,
            )
        };
        if ok == FALSE || written != bytes.len() as SIZE_T {
            return Err(BufferError::Unwritable {
                addr,
                len: bytes.len(),
                code: unsafe { GetLastError() },
            });
        }
        Ok(())
    }
}

impl PageEnumerator for Process {
    fn pages(&self) -> Box<dyn Iterator<Item = PageRecord> + '_> {
        Box::new(PageIter {
            process: self,
            cursor: 0,
            end: max_application_address(),
        })
    }

    fn page_at(&self, addr: u64) -> Option<PageRecord> {
        self.query_region(addr)
    }
}

impl ProcessTarget for Process {
    fn commit(&self, addr: u64, len: u64) -> Result<u64> {
        let base = unsafe {
            VirtualAllocEx(
                self.handle,
                addr as LPVOID,
                len as SIZE_T,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_EXECUTE_READWRITE,
            )
        };
        if base.is_null() {
            return Err(BufferError::CommitFailed(unsafe { GetLastError() }));
        }

        let got = base as u64;
        if got != addr {
            // The allocation base is the requested address rounded down to
            // the granularity; a buffer anywhere but the placed address is
            // useless.
            unsafe { VirtualFreeEx(self.handle, base, 0, MEM_RELEASE) };
            return Err(BufferError::CommitFailed(ERROR_INVALID_ADDRESS));
        }
        tracing::trace!(addr, len, "committed region");
        Ok(got)
    }
}

struct PageIter<'p> {
    process: &'p Process,
    cursor: u64,
    end: u64,
}

impl Iterator for PageIter<'_> {
    type Item = PageRecord;

    fn next(&mut self) -> Option<PageRecord> {
        if self.cursor >= self.end {
            return None;
        }
        // A failed query ends the sequence.
        let record = self.process.query_region(self.cursor)?;
        self.cursor = record.base.saturating_add(record.size);
        Some(record)
    }
}

fn max_application_address() -> u64 {
    let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    info.lpMaximumApplicationAddress as u64
}
