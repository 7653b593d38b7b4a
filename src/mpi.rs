//! The native MPI backend (feature `native`).
//!
//! [`Mpi`] owns the MPI environment. [`NativeMpi`] implements [`Messenger`]
//! over it, and [`native_routines`] binds compiled receives to the C
//! custom-call targets in `csrc/mpiprim.c`.
//!
//! # Example
//!
//! ```no_run
//! use mpiprim::mpi::Mpi;
//! use mpiprim::{recv, Array, ArrayDesc, Context, Dtype, RecvParams};
//!
//! fn main() -> Result<(), mpiprim::Error> {
//!     let mpi = Mpi::init()?;
//!     let native = mpi.messenger();
//!     let world = mpi.world();
//!
//!     if native.rank(world)? == 0 {
//!         let data = Array::from_slice(&[3], &[1.0f64, 2.0, 3.0])?;
//!         native.send(world, 1, 7, &data)?;
//!     } else {
//!         let template = Array::zeros(ArrayDesc::new(&[3], Dtype::F64))?;
//!         let mut ctx = Context::eager(&native);
//!         let out = recv(&mut ctx, template.into(), RecvParams::new(world).tag(7))?;
//!         println!("{out:?}");
//!     }
//!     Ok(())
//! }
//! ```

use crate::array::Array;
use crate::datatype::Dtype;
use crate::error::{Error, Result};
use crate::ffi;
use crate::handle::{CommHandle, DatatypeHandle, StatusHandle};
use crate::lower::{ForeignRoutine, RoutineTable};
use crate::messenger::Messenger;
use crate::recv::{RECV_IGNORE_STATUS, RECV_WITH_STATUS};
use crate::status::Status;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global flag tracking whether MPI has been initialized
static MPI_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// MPI thread support levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum ThreadLevel {
    /// Only single-threaded execution
    Single = 0,
    /// Multi-threaded, but MPI calls only from main thread
    Funneled = 1,
    /// Multi-threaded, but MPI calls serialized by user
    Serialized = 2,
    /// Full multi-threaded support
    Multiple = 3,
}

/// MPI environment handle.
///
/// There can only be one instance at a time. When dropped, it finalizes MPI.
pub struct Mpi {
    thread_level: ThreadLevel,
    /// Marker to make Mpi !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl Mpi {
    /// Initialize MPI with single-threaded support.
    pub fn init() -> Result<Self> {
        Self::init_thread(ThreadLevel::Single)
    }

    /// Initialize MPI with the specified thread support level.
    ///
    /// The level actually provided is available from
    /// [`thread_level()`](Self::thread_level).
    ///
    /// # Errors
    ///
    /// Returns an error if MPI is already initialized or if initialization fails.
    pub fn init_thread(required: ThreadLevel) -> Result<Self> {
        if MPI_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        let mut provided: i32 = 0;
        let ret = unsafe { ffi::mpiprim_init_thread(required as i32, &mut provided) };
        if ret != 0 {
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(Error::from_code(ret));
        }

        let thread_level = match provided {
            0 => ThreadLevel::Single,
            1 => ThreadLevel::Funneled,
            2 => ThreadLevel::Serialized,
            _ => ThreadLevel::Multiple,
        };
        tracing::debug!(?required, provided = ?thread_level, "MPI initialized");

        Ok(Mpi {
            thread_level,
            _marker: PhantomData,
        })
    }

    /// Thread support level that was provided.
    pub fn thread_level(&self) -> ThreadLevel {
        self.thread_level
    }

    /// Handle to `MPI_COMM_WORLD`.
    pub fn world(&self) -> CommHandle {
        // SAFETY: the C layer returns the address of its static world
        // storage, which lives as long as the process.
        let ptr = unsafe { ffi::mpiprim_comm_world() };
        unsafe { CommHandle::from_raw(ptr) }.unwrap_or_else(|| unreachable!("static storage"))
    }

    /// A messenger over this environment.
    pub fn messenger(&self) -> NativeMpi<'_> {
        NativeMpi { _env: self }
    }

    /// The MPI library version string.
    pub fn version() -> Result<String> {
        let mut buf = [0u8; 8192];
        let mut len: i32 = 0;
        let ret = unsafe { ffi::mpiprim_get_version(buf.as_mut_ptr().cast(), &mut len) };
        Error::check(ret)?;

        let len = (len.max(0) as usize).min(buf.len());
        let s = std::str::from_utf8(&buf[..len])
            .map_err(|_| Error::Internal("Invalid UTF-8 in version string".into()))?;
        Ok(s.trim_end_matches('\0').trim_end().to_string())
    }

    /// Check if MPI has been initialized.
    pub fn is_initialized() -> bool {
        let mut flag: i32 = 0;
        unsafe { ffi::mpiprim_initialized(&mut flag) };
        flag != 0
    }

    /// Check if MPI has been finalized.
    pub fn is_finalized() -> bool {
        let mut flag: i32 = 0;
        unsafe { ffi::mpiprim_finalized(&mut flag) };
        flag != 0
    }
}

impl Drop for Mpi {
    fn drop(&mut self) {
        if MPI_INITIALIZED.load(Ordering::SeqCst) {
            unsafe {
                ffi::mpiprim_finalize();
            }
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for Mpi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mpi")
            .field("thread_level", &self.thread_level)
            .finish()
    }
}

/// [`Messenger`] backed by the MPI library. Borrowing the [`Mpi`] guard
/// keeps MPI initialized while the messenger exists.
#[derive(Debug, Clone, Copy)]
pub struct NativeMpi<'env> {
    _env: &'env Mpi,
}

impl NativeMpi<'_> {
    /// Rank of the calling process in `comm`.
    pub fn rank(&self, comm: CommHandle) -> Result<i32> {
        let mut rank: i32 = 0;
        let ret = unsafe { ffi::mpiprim_comm_rank(comm.as_ptr(), &mut rank) };
        Error::check(ret)?;
        Ok(rank)
    }

    /// Number of processes in `comm`.
    pub fn size(&self, comm: CommHandle) -> Result<i32> {
        let mut size: i32 = 0;
        let ret = unsafe { ffi::mpiprim_comm_size(comm.as_ptr(), &mut size) };
        Error::check(ret)?;
        Ok(size)
    }

    /// Blocking send of `data` to `dest` with `tag`.
    pub fn send(&self, comm: CommHandle, dest: i32, tag: i32, data: &Array) -> Result<()> {
        let dtype = data.desc().dtype;
        let datatype = self.datatype(dtype).ok_or(Error::UnsupportedDtype(dtype))?;
        let nitems = data.desc().nitems()?;
        let count = i32::try_from(nitems).map_err(|_| Error::invalid_count(nitems))?;
        let ret = unsafe {
            ffi::mpiprim_send(
                data.as_bytes().as_ptr().cast(),
                count,
                datatype.as_ptr(),
                dest,
                tag,
                comm.as_ptr(),
            )
        };
        Error::check(ret)
    }

    fn type_size(&self, datatype: DatatypeHandle) -> Result<usize> {
        let mut size: i32 = 0;
        let ret = unsafe { ffi::mpiprim_type_size(datatype.as_ptr(), &mut size) };
        Error::check(ret)?;
        usize::try_from(size).map_err(|_| Error::Internal(format!("negative type size {size}")))
    }
}

impl Messenger for NativeMpi<'_> {
    fn any_source(&self) -> i32 {
        unsafe { ffi::mpiprim_any_source() }
    }

    fn any_tag(&self) -> i32 {
        unsafe { ffi::mpiprim_any_tag() }
    }

    fn datatype(&self, dtype: Dtype) -> Option<DatatypeHandle> {
        let tag = dtype.tag()?;
        // SAFETY: the C layer returns an address in its static datatype
        // table, or null for an unknown tag.
        unsafe { DatatypeHandle::from_raw(ffi::mpiprim_datatype(tag as i32)) }
    }

    fn recv(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: DatatypeHandle,
        source: i32,
        tag: i32,
        comm: CommHandle,
        status: Option<StatusHandle>,
    ) -> Result<()> {
        let elements = usize::try_from(count).map_err(|_| Error::InvalidCount(i64::from(count)))?;
        let needed = elements
            .checked_mul(self.type_size(datatype)?)
            .ok_or_else(|| Error::invalid_count(elements))?;
        if needed > buf.len() {
            return Err(Error::InvalidBuffer);
        }
        let status = status.map_or(std::ptr::null_mut(), StatusHandle::as_ptr);
        let ret = unsafe {
            ffi::mpiprim_recv(
                buf.as_mut_ptr().cast(),
                count,
                datatype.as_ptr(),
                source,
                tag,
                comm.as_ptr(),
                status,
            )
        };
        Error::check(ret)
    }
}

/// A native `MPI_Status` owned by Rust.
#[derive(Debug)]
pub struct StatusBuffer {
    handle: StatusHandle,
}

impl StatusBuffer {
    /// Allocate a zeroed status buffer.
    pub fn new() -> Result<Self> {
        let ptr = unsafe { ffi::mpiprim_status_new() };
        // SAFETY: freshly allocated by the C layer, freed in Drop.
        let handle = unsafe { StatusHandle::from_raw(ptr) }
            .ok_or_else(|| Error::Internal("status allocation failed".into()))?;
        Ok(StatusBuffer { handle })
    }

    /// Handle to pass in [`RecvParams`](crate::RecvParams).
    pub fn handle(&self) -> StatusHandle {
        self.handle
    }

    /// Read the metadata written by the last receive, counting elements of
    /// `dtype`.
    pub fn read(&self, messenger: &NativeMpi<'_>, dtype: Dtype) -> Result<Status> {
        let datatype = messenger
            .datatype(dtype)
            .ok_or(Error::UnsupportedDtype(dtype))?;
        let mut source: i32 = 0;
        let mut tag: i32 = 0;
        let mut count: i64 = 0;
        let ret = unsafe {
            ffi::mpiprim_status_read(
                self.handle.as_ptr(),
                datatype.as_ptr(),
                &mut source,
                &mut tag,
                &mut count,
            )
        };
        Error::check(ret)?;
        Ok(Status { source, tag, count })
    }
}

impl Drop for StatusBuffer {
    fn drop(&mut self) {
        unsafe { ffi::mpiprim_status_free(self.handle.as_ptr()) }
    }
}

type CustomCall = unsafe extern "C" fn(*mut c_void, *const *const c_void);

/// A C custom-call target.
struct NativeRoutine(CustomCall);

impl ForeignRoutine for NativeRoutine {
    fn call(&self, out: &mut [u8], operands: &[&[u8]]) -> Result<()> {
        let pointers: Vec<*const c_void> = operands.iter().map(|o| o.as_ptr().cast()).collect();
        // SAFETY: guaranteed by the contract of `native_routines`. The C
        // routine aborts the job on MPI failure instead of returning.
        unsafe { (self.0)(out.as_mut_ptr().cast(), pointers.as_ptr()) };
        Ok(())
    }
}

/// Routine table binding both receive targets to the C routines.
///
/// # Safety
///
/// The C routines trust their operands. Only run programs built by the
/// `recv_mpi` encode rule against a [`NativeMpi`], while the communicators
/// and status buffers they reference are alive.
pub unsafe fn native_routines<'a>() -> RoutineTable<'a> {
    let mut table = RoutineTable::new();
    table.insert(RECV_WITH_STATUS, NativeRoutine(ffi::mpi_recv));
    table.insert(RECV_IGNORE_STATUS, NativeRoutine(ffi::mpi_recv_ignore_status));
    table
}
