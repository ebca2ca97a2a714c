//! Linux target processes via `/proc` and the `process_vm` syscalls.
//!
//! Reads and writes go through `process_vm_readv`/`process_vm_writev` even
//! for the current process: the syscall reports `EFAULT` where a direct
//! dereference would fault, and discovery legitimately probes unreadable
//! addresses. The page map is synthesized from `/proc/<pid>/maps`, with free
//! records filling the gaps between mappings.

use std::{
    fs,
    io::{IoSlice, IoSliceMut},
    num::NonZeroUsize,
};

use nix::{
    errno::Errno,
    sys::{
        mman::{mmap_anonymous, munmap, MapFlags, ProtFlags},
        uio::{process_vm_readv, process_vm_writev, RemoteIoVec},
    },
    unistd::Pid,
};

use crate::{
    error::{BufferError, Result},
    memory::MemorySource,
    pages::{PageEnumerator, PageRecord, PageState},
    process::ProcessTarget,
};

/// Top of the range the enumerator covers, i.e. the kernel's `TASK_SIZE`.
/// Everything above (vsyscall, kernel space) is never mappable from user
/// code, so placement must not consider it. The stack's last page ends
/// exactly here.
#[cfg(target_arch = "x86_64")]
const USER_SPACE_END: u64 = 0x7FFF_FFFF_F000;
/// 48-bit user VA on the other 64-bit architectures.
#[cfg(not(target_arch = "x86_64"))]
const USER_SPACE_END: u64 = 0xFFFF_FFFF_F000;

/// A Linux process: the current one or another process addressed by pid.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    current: bool,
}

impl Process {
    pub fn current() -> Self {
        Self {
            pid: Pid::this(),
            current: true,
        }
    }

    pub fn from_pid(pid: u32) -> Result<Self> {
        if !std::path::Path::new(&format!("/proc/{pid}")).exists() {
            return Err(BufferError::ProcessOpenFailed(Errno::ESRCH as i32 as u32));
        }
        Ok(Self {
            pid: Pid::from_raw(pid as i32),
            current: false,
        })
    }

    fn maps_path(&self) -> String {
        if self.current {
            "/proc/self/maps".into()
        } else {
            format!("/proc/{}/maps", self.pid)
        }
    }

    fn mappings(&self) -> Vec<Mapping> {
        match fs::read_to_string(self.maps_path()) {
            Ok(text) => parse_maps(&text),
            // An unreadable maps file ends the enumeration, it does not
            // panic; callers see an empty page map.
            Err(error) => {
                tracing::warn!(%error, "failed reading process maps");
                Vec::new()
            }
        }
    }
}

impl MemorySource for Process {
    fn read(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let len = out.len();
        let mut local = [IoSliceMut::new(out)];
        let remote = [RemoteIoVec {
            base: addr as usize,
            len,
        }];
        let read = process_vm_readv(self.pid, &mut local, &remote).map_err(|errno| {
            BufferError::Unreadable {
                addr,
                len,
                code: errno as i32 as u32,
            }
        })?;
        if read != len {
            return Err(BufferError::Unreadable { addr, len, code: 0 });
        }
        Ok(())
    }

    fn write(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let len = bytes.len();
        let local = [IoSlice::new(bytes)];
        let remote = [RemoteIoVec {
            base: addr as usize,
            len,
        }];
        let written = process_vm_writev(self.pid, &local, &remote).map_err(|errno| {
            BufferError::Unwritable {
                addr,
                len,
                code: errno as i32 as u32,
            }
        })?;
        if written != len {
            return Err(BufferError::Unwritable { addr, len, code: 0 });
        }
        Ok(())
    }
}

impl PageEnumerator for Process {
    fn pages(&self) -> Box<dyn Iterator<Item = PageRecord> + '_> {
        Box::new(PageIter::new(self.mappings()))
    }
}

impl ProcessTarget for Process {
    fn commit(&self, addr: u64, len: u64) -> Result<u64> {
        if !self.current {
            // There is no cross-process mmap.
            return Err(BufferError::RemoteCommitUnsupported);
        }
        let Some(length) = NonZeroUsize::new(len as usize) else {
            return Err(BufferError::CommitFailed(Errno::EINVAL as i32 as u32));
        };
        // Page zero is never mappable.
        let Some(base) = NonZeroUsize::new(addr as usize) else {
            return Err(BufferError::CommitFailed(Errno::EINVAL as i32 as u32));
        };

        let mapped = unsafe {
            mmap_anonymous(
                Some(base),
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED_NOREPLACE,
            )
        }
        .map_err(|errno| BufferError::CommitFailed(errno as i32 as u32))?;

        let got = mapped.as_ptr() as u64;
        if got != addr {
            // Pre-4.17 kernels ignore MAP_FIXED_NOREPLACE and map elsewhere;
            // a buffer anywhere but the placed address is useless.
            let _ = unsafe { munmap(mapped, len as usize) };
            return Err(BufferError::CommitFailed(Errno::EEXIST as i32 as u32));
        }
        tracing::trace!(addr, len, "committed region");
        Ok(got)
    }
}

/// One line of the maps file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mapping {
    start: u64,
    end: u64,
    protection: u32,
}

fn parse_maps(text: &str) -> Vec<Mapping> {
    text.lines()
        .filter_map(parse_maps_line)
        .filter(|mapping| mapping.start < USER_SPACE_END)
        .map(|mapping| Mapping {
            end: mapping.end.min(USER_SPACE_END),
            ..mapping
        })
        .collect()
}

fn parse_maps_line(line: &str) -> Option<Mapping> {
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let perms = fields.next()?;

    let mut protection = 0;
    for (flag, bit) in [('r', 1u32), ('w', 2), ('x', 4)] {
        if perms.contains(flag) {
            protection |= bit;
        }
    }

    Some(Mapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        protection,
    })
}

/// Turns the mapping list into the gap-free record stream the
/// [`PageEnumerator`] contract requires.
struct PageIter {
    mappings: std::vec::IntoIter<Mapping>,
    cursor: u64,
    pending: Option<PageRecord>,
    done: bool,
}

impl PageIter {
    fn new(mappings: Vec<Mapping>) -> Self {
        Self {
            mappings: mappings.into_iter(),
            cursor: 0,
            pending: None,
            done: false,
        }
    }
}

impl Iterator for PageIter {
    type Item = PageRecord;

    fn next(&mut self) -> Option<PageRecord> {
        if let Some(record) = self.pending.take() {
            return Some(record);
        }
        if self.done {
            return None;
        }

        match self.mappings.next() {
            Some(mapping) => {
                let committed = PageRecord {
                    base: mapping.start,
                    size: mapping.end - mapping.start,
                    state: PageState::Committed,
                    protection: mapping.protection,
                };
                let gap_start = self.cursor;
                self.cursor = mapping.end;
                if mapping.start > gap_start {
                    self.pending = Some(committed);
                    Some(PageRecord {
                        base: gap_start,
                        size: mapping.start - gap_start,
                        state: PageState::Free,
                        protection: 0,
                    })
                } else {
                    Some(committed)
                }
            }
            None => {
                self.done = true;
                (self.cursor < USER_SPACE_END).then(|| PageRecord {
                    base: self.cursor,
                    size: USER_SPACE_END - self.cursor,
                    state: PageState::Free,
                    protection: 0,
                })
            }
        }
    }
}
