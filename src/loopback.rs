//! In-process messaging library.
//!
//! [`Loopback`] implements [`Messenger`] with a single mailbox shared by all
//! ranks of a pretend world. Senders post messages with an explicit source
//! rank; receivers block on a condition variable until a matching message
//! is queued. Matching follows MPI: the oldest message whose communicator,
//! source and tag match is taken, with wildcards accepted for source and
//! tag. It is the backend used by the test suite and by single-process
//! pipelines that need the primitive without an MPI launcher.
//!
//! Handles given out by a `Loopback` are addresses of boxes it (or a
//! [`StatusSlot`]) owns. The library looks them up by address and never
//! dereferences them.

use crate::array::Array;
use crate::datatype::{DatatypeTag, Dtype};
use crate::error::{Error, Result};
use crate::handle::{CommHandle, DatatypeHandle, StatusHandle};
use crate::messenger::Messenger;
use crate::status::Status;
use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Wildcard source sentinel (MPICH value).
pub const ANY_SOURCE: i32 = -2;

/// Wildcard tag sentinel (MPICH value).
pub const ANY_TAG: i32 = -1;

static DATATYPES: [DatatypeTag; 13] = DatatypeTag::ALL;

fn element_size(tag: DatatypeTag) -> usize {
    match tag {
        DatatypeTag::U8 | DatatypeTag::I8 | DatatypeTag::Bool => 1,
        DatatypeTag::I16 | DatatypeTag::U16 => 2,
        DatatypeTag::F32 | DatatypeTag::I32 | DatatypeTag::U32 => 4,
        DatatypeTag::F64 | DatatypeTag::I64 | DatatypeTag::U64 | DatatypeTag::C64 => 8,
        DatatypeTag::C128 => 16,
    }
}

#[derive(Debug)]
struct Envelope {
    comm: u64,
    source: i32,
    tag: i32,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Mailbox {
    comms: Vec<Box<u64>>,
    queue: VecDeque<Envelope>,
    statuses: HashMap<u64, Status>,
}

/// A status buffer for [`Loopback`] receives.
///
/// Owns a unique address; [`Loopback::status`] reads back what the last
/// receive given this slot's handle recorded.
#[derive(Debug)]
pub struct StatusSlot(Box<u64>);

impl StatusSlot {
    /// Allocate a slot.
    pub fn new() -> Self {
        StatusSlot(Box::new(0))
    }

    /// Handle to pass in [`RecvParams`](crate::RecvParams).
    pub fn handle(&self) -> StatusHandle {
        let ptr = (&*self.0 as *const u64).cast_mut().cast::<c_void>();
        // SAFETY: a Box address is non-null and stable for the slot's
        // lifetime; the loopback only compares it, never dereferences it.
        unsafe { StatusHandle::from_raw(ptr) }.unwrap_or_else(|| unreachable!("box is non-null"))
    }
}

impl Default for StatusSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process [`Messenger`] with a shared mailbox.
#[derive(Debug)]
pub struct Loopback {
    size: i32,
    world: Box<u64>,
    mailbox: Mutex<Mailbox>,
    arrived: Condvar,
}

impl Loopback {
    /// A two-rank world.
    pub fn new() -> Self {
        Self::with_size(2)
    }

    /// A world of `size` ranks.
    pub fn with_size(size: i32) -> Self {
        Loopback {
            size: size.max(1),
            world: Box::new(0),
            mailbox: Mutex::new(Mailbox::default()),
            arrived: Condvar::new(),
        }
    }

    /// Number of ranks in the world.
    pub fn size(&self) -> i32 {
        self.size
    }

    fn lock(&self) -> Result<MutexGuard<'_, Mailbox>> {
        self.mailbox
            .lock()
            .map_err(|_| Error::Internal("loopback mailbox poisoned".into()))
    }

    fn comm_handle(token: &u64) -> CommHandle {
        let ptr = (token as *const u64).cast_mut().cast::<c_void>();
        // SAFETY: tokens are boxed, so non-null and stable until the
        // loopback is dropped; the loopback never dereferences them.
        unsafe { CommHandle::from_raw(ptr) }.unwrap_or_else(|| unreachable!("box is non-null"))
    }

    /// The world communicator.
    pub fn world(&self) -> CommHandle {
        Self::comm_handle(&self.world)
    }

    /// Create a new communicator over the same ranks. Messages never cross
    /// communicators.
    pub fn duplicate(&self) -> Result<CommHandle> {
        let mut mailbox = self.lock()?;
        mailbox.comms.push(Box::new(0));
        let token = mailbox.comms.last().ok_or(Error::InvalidCommunicator)?;
        Ok(Self::comm_handle(token))
    }

    /// Release a communicator made by [`duplicate`](Self::duplicate),
    /// discarding messages still queued on it. The world cannot be freed.
    pub fn free(&self, comm: CommHandle) -> Result<()> {
        let mut mailbox = self.lock()?;
        let bits = comm.to_bits();
        let index = mailbox
            .comms
            .iter()
            .position(|token| Self::comm_handle(token).to_bits() == bits)
            .ok_or(Error::InvalidCommunicator)?;
        mailbox.comms.swap_remove(index);
        mailbox.queue.retain(|envelope| envelope.comm != bits);
        tracing::trace!(comm = bits, "loopback communicator freed");
        Ok(())
    }

    fn known_comm(&self, mailbox: &Mailbox, comm: CommHandle) -> Result<u64> {
        let bits = comm.to_bits();
        if comm == self.world()
            || mailbox
                .comms
                .iter()
                .any(|token| Self::comm_handle(token).to_bits() == bits)
        {
            Ok(bits)
        } else {
            Err(Error::InvalidCommunicator)
        }
    }

    fn check_rank(&self, rank: i32) -> Result<()> {
        if (0..self.size).contains(&rank) {
            Ok(())
        } else {
            Err(Error::InvalidRank(rank))
        }
    }

    /// Post `data` on `comm` as if rank `source` had sent it with `tag`.
    pub fn send(&self, comm: CommHandle, source: i32, tag: i32, data: &Array) -> Result<()> {
        self.check_rank(source)?;
        if tag < 0 {
            return Err(Error::InvalidTag(tag));
        }
        let mut mailbox = self.lock()?;
        let comm = self.known_comm(&mailbox, comm)?;
        mailbox.queue.push_back(Envelope {
            comm,
            source,
            tag,
            payload: data.as_bytes().to_vec(),
        });
        drop(mailbox);
        self.arrived.notify_all();
        Ok(())
    }

    /// Number of queued, unreceived messages.
    pub fn pending(&self) -> usize {
        self.lock().map(|m| m.queue.len()).unwrap_or(0)
    }

    /// Metadata recorded for `status` by the last receive that used it.
    pub fn status(&self, status: StatusHandle) -> Option<Status> {
        self.lock()
            .ok()
            .and_then(|m| m.statuses.get(&status.to_bits()).copied())
    }

    fn datatype_tag(datatype: DatatypeHandle) -> Option<DatatypeTag> {
        let target = datatype.as_ptr().cast_const();
        DATATYPES
            .iter()
            .find(|tag| std::ptr::eq((*tag as *const DatatypeTag).cast::<c_void>(), target))
            .copied()
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Messenger for Loopback {
    fn any_source(&self) -> i32 {
        ANY_SOURCE
    }

    fn any_tag(&self) -> i32 {
        ANY_TAG
    }

    fn datatype(&self, dtype: Dtype) -> Option<DatatypeHandle> {
        let tag = dtype.tag()?;
        let entry = &DATATYPES[tag as usize];
        let ptr = (entry as *const DatatypeTag).cast_mut().cast::<c_void>();
        // SAFETY: entries of a static table live for the whole process.
        unsafe { DatatypeHandle::from_raw(ptr) }
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
        if source != ANY_SOURCE {
            self.check_rank(source)?;
        }
        if tag != ANY_TAG && tag < 0 {
            return Err(Error::InvalidTag(tag));
        }
        let count = usize::try_from(count).map_err(|_| Error::InvalidCount(i64::from(count)))?;
        let element = Self::datatype_tag(datatype)
            .map(element_size)
            .ok_or_else(|| Error::Internal("unknown datatype handle".into()))?;
        let capacity = count
            .checked_mul(element)
            .ok_or_else(|| Error::invalid_count(count))?;
        if capacity > buf.len() {
            return Err(Error::InvalidBuffer);
        }

        let mut mailbox = self.lock()?;
        let comm = self.known_comm(&mailbox, comm)?;
        let envelope = loop {
            let hit = mailbox.queue.iter().position(|e| {
                e.comm == comm
                    && (source == ANY_SOURCE || e.source == source)
                    && (tag == ANY_TAG || e.tag == tag)
            });
            if let Some(envelope) = hit.and_then(|i| mailbox.queue.remove(i)) {
                break envelope;
            }
            mailbox = self
                .arrived
                .wait(mailbox)
                .map_err(|_| Error::Internal("loopback mailbox poisoned".into()))?;
        };

        tracing::debug!(
            source = envelope.source,
            tag = envelope.tag,
            bytes = envelope.payload.len(),
            "loopback delivered"
        );
        if envelope.payload.len() > capacity {
            return Err(Error::Truncated {
                capacity,
                incoming: envelope.payload.len(),
            });
        }
        buf[..envelope.payload.len()].copy_from_slice(&envelope.payload);
        if let Some(status) = status {
            mailbox.statuses.insert(
                status.to_bits(),
                Status {
                    source: envelope.source,
                    tag: envelope.tag,
                    count: (envelope.payload.len() / element) as i64,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayDesc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn f64_type(lib: &Loopback) -> DatatypeHandle {
        lib.datatype(Dtype::F64).unwrap()
    }

    #[test]
    fn receives_in_arrival_order() {
        let lib = Loopback::new();
        let world = lib.world();
        for v in [1.0f64, 2.0] {
            let data = Array::from_slice(&[1], &[v]).unwrap();
            lib.send(world, 1, 0, &data).unwrap();
        }
        let mut buf = [0u8; 8];
        lib.recv(&mut buf, 1, f64_type(&lib), ANY_SOURCE, ANY_TAG, world, None)
            .unwrap();
        assert_eq!(f64::from_ne_bytes(buf), 1.0);
        assert_eq!(lib.pending(), 1);
    }

    #[test]
    fn matches_tag_and_source() {
        let lib = Loopback::with_size(3);
        let world = lib.world();
        let a = Array::from_slice(&[1], &[10.0f64]).unwrap();
        let b = Array::from_slice(&[1], &[20.0f64]).unwrap();
        lib.send(world, 1, 5, &a).unwrap();
        lib.send(world, 2, 6, &b).unwrap();

        let slot = StatusSlot::new();
        let mut buf = [0u8; 8];
        lib.recv(&mut buf, 1, f64_type(&lib), 2, ANY_TAG, world, Some(slot.handle()))
            .unwrap();
        assert_eq!(f64::from_ne_bytes(buf), 20.0);
        assert_eq!(
            lib.status(slot.handle()),
            Some(Status {
                source: 2,
                tag: 6,
                count: 1
            })
        );
    }

    #[test]
    fn communicators_are_isolated() {
        let lib = Loopback::new();
        let world = lib.world();
        let other = lib.duplicate().unwrap();
        assert_ne!(world, other);
        let data = Array::from_slice(&[1], &[3.0f64]).unwrap();
        lib.send(other, 0, 0, &data).unwrap();
        lib.send(world, 1, 0, &Array::from_slice(&[1], &[4.0f64]).unwrap())
            .unwrap();

        let mut buf = [0u8; 8];
        lib.recv(&mut buf, 1, f64_type(&lib), ANY_SOURCE, ANY_TAG, world, None)
            .unwrap();
        assert_eq!(f64::from_ne_bytes(buf), 4.0);
    }

    #[test]
    fn freed_communicator_is_rejected() {
        let lib = Loopback::new();
        let other = lib.duplicate().unwrap();
        let data = Array::from_slice(&[1], &[3.0f64]).unwrap();
        lib.send(other, 0, 0, &data).unwrap();

        lib.free(other).unwrap();
        assert_eq!(lib.send(other, 0, 0, &data), Err(Error::InvalidCommunicator));
        let mut buf = [0u8; 8];
        assert_eq!(
            lib.recv(&mut buf, 1, f64_type(&lib), ANY_SOURCE, ANY_TAG, other, None),
            Err(Error::InvalidCommunicator)
        );
        assert_eq!(lib.free(other), Err(Error::InvalidCommunicator));
        assert_eq!(lib.free(lib.world()), Err(Error::InvalidCommunicator));
        assert!(lib.lock().unwrap().queue.is_empty());
    }

    #[test]
    fn oversized_message_is_truncation_error() {
        let lib = Loopback::new();
        let world = lib.world();
        let data = Array::zeros(ArrayDesc::new(&[4], Dtype::F64)).unwrap();
        lib.send(world, 0, 0, &data).unwrap();
        let mut buf = [0u8; 16];
        let err = lib
            .recv(&mut buf, 2, f64_type(&lib), ANY_SOURCE, ANY_TAG, world, None)
            .unwrap_err();
        assert_eq!(
            err,
            Error::Truncated {
                capacity: 16,
                incoming: 32
            }
        );
    }

    #[test]
    fn invalid_arguments_are_reported() {
        let lib = Loopback::new();
        let world = lib.world();
        let data = Array::zeros(ArrayDesc::new(&[1], Dtype::F64)).unwrap();
        assert_eq!(lib.send(world, 7, 0, &data), Err(Error::InvalidRank(7)));
        assert_eq!(lib.send(world, 0, -3, &data), Err(Error::InvalidTag(-3)));

        let stranger = Loopback::new();
        assert_eq!(
            lib.send(stranger.world(), 0, 0, &data),
            Err(Error::InvalidCommunicator)
        );
    }

    #[test]
    fn recv_blocks_until_send() {
        let lib = Arc::new(Loopback::new());
        let world_bits = lib.world().to_bits();
        let sender = {
            let lib = Arc::clone(&lib);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let world = unsafe { CommHandle::from_bits(world_bits) }.unwrap();
                let data = Array::from_slice(&[2], &[7.0f64, 8.0]).unwrap();
                lib.send(world, 1, 9, &data).unwrap();
            })
        };
        let mut buf = [0u8; 16];
        lib.recv(&mut buf, 2, f64_type(&lib), 1, 9, lib.world(), None)
            .unwrap();
        sender.join().unwrap();
        assert_eq!(f64::from_ne_bytes(buf[8..].try_into().unwrap()), 8.0);
    }

    #[test]
    fn half_precision_has_no_datatype() {
        let lib = Loopback::new();
        assert!(lib.datatype(Dtype::F16).is_none());
        let tag = Loopback::datatype_tag(lib.datatype(Dtype::C128).unwrap());
        assert_eq!(tag, Some(DatatypeTag::C128));
    }
}
