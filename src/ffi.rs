//! Raw FFI bindings to the C layer in `csrc/mpiprim.c`.
//!
//! These are low-level unsafe functions. Use the safe wrappers in [`crate::mpi`].

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_void};

// Type aliases matching the C header
pub type int32_t = i32;
pub type int64_t = i64;

extern "C" {
    // ============================================================
    // Initialization and Finalization
    // ============================================================

    pub fn mpiprim_init_thread(required: c_int, provided: *mut c_int) -> c_int;
    pub fn mpiprim_finalize() -> c_int;
    pub fn mpiprim_initialized(flag: *mut c_int) -> c_int;
    pub fn mpiprim_finalized(flag: *mut c_int) -> c_int;
    pub fn mpiprim_get_version(version: *mut c_char, len: *mut c_int) -> c_int;

    // ============================================================
    // Communicators
    // ============================================================

    pub fn mpiprim_comm_world() -> *mut c_void;
    pub fn mpiprim_comm_rank(comm: *const c_void, rank: *mut int32_t) -> c_int;
    pub fn mpiprim_comm_size(comm: *const c_void, size: *mut int32_t) -> c_int;

    // ============================================================
    // Sentinels and Datatypes
    // ============================================================

    pub fn mpiprim_any_source() -> int32_t;
    pub fn mpiprim_any_tag() -> int32_t;
    pub fn mpiprim_datatype(tag: int32_t) -> *mut c_void;
    pub fn mpiprim_type_size(datatype: *const c_void, size: *mut int32_t) -> c_int;

    // ============================================================
    // Point-to-Point
    // ============================================================

    pub fn mpiprim_send(
        buf: *const c_void,
        count: int32_t,
        datatype: *const c_void,
        dest: int32_t,
        tag: int32_t,
        comm: *const c_void,
    ) -> c_int;

    pub fn mpiprim_recv(
        buf: *mut c_void,
        count: int32_t,
        datatype: *const c_void,
        source: int32_t,
        tag: int32_t,
        comm: *const c_void,
        status: *mut c_void,
    ) -> c_int;

    // ============================================================
    // Status Buffers
    // ============================================================

    pub fn mpiprim_status_new() -> *mut c_void;
    pub fn mpiprim_status_free(status: *mut c_void);
    pub fn mpiprim_status_read(
        status: *const c_void,
        datatype: *const c_void,
        source: *mut int32_t,
        tag: *mut int32_t,
        count: *mut int64_t,
    ) -> c_int;

    // ============================================================
    // Custom-Call Targets
    // ============================================================

    pub fn mpi_recv(out: *mut c_void, operands: *const *const c_void);
    pub fn mpi_recv_ignore_status(out: *mut c_void, operands: *const *const c_void);
}
