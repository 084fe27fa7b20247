// SPDX-License-Identifier: MPL-2.0

//! The kernel error model.
//!
//! Every fallible operation returns `Result<T>` with an [`Error`] carrying a
//! closed [`ErrorCode`] and an optional static message. Primitives propagate
//! errors to their caller without recovery; `RestartSyscall` is consumed by
//! the handle-forwarder helpers; user-visible layers translate to POSIX
//! `errno` values through [`ErrorCode::to_errno`].

#![allow(dead_code)]

/// The closed set of error kinds used by the kernel core.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCode {
    /// Argument out of range or ill-typed.
    InvalidArgument = 1,
    /// Handle or path not present.
    NotFound,
    /// Operation not supported by this component.
    NotImplemented,
    /// Allocation failure.
    OutOfMemory,
    /// Access bits deny the request.
    PermissionDenied,
    /// Deadline passed before the operation completed.
    TimedOut,
    /// A signal arrived during the wait and syscall restart is disabled.
    Interrupted,
    /// Recursive acquisition of a `RaiseError`-mode mutex.
    DeadlockWouldOccur,
    /// Unlock by a thread that does not hold the lock.
    NotOwner,
    /// Count beyond the semaphore maximum.
    Overflow,
    /// The underlying bus is busy.
    BusBusy,
    /// Lower-level I/O failure.
    IoError,
    /// Transient; callers loop with `force_process_signals` between tries.
    RestartSyscall,
    /// Rename across volumes.
    CrossDevice,
    /// Mutation on a read-only volume.
    ReadOnly,
    /// The object was destroyed while the caller was parked on it.
    BadState,
    /// The target name already exists.
    AlreadyExists,
    /// A path component that must be a directory is not one.
    NotADirectory,
    /// A directory where a non-directory was required.
    IsADirectory,
    /// Directory not empty.
    NotEmpty,
}

impl ErrorCode {
    /// Translate to the POSIX `errno` value the C shims report.
    pub const fn to_errno(self) -> i32 {
        match self {
            ErrorCode::InvalidArgument => 22,    // EINVAL
            ErrorCode::NotFound => 2,            // ENOENT
            ErrorCode::NotImplemented => 38,     // ENOSYS
            ErrorCode::OutOfMemory => 12,        // ENOMEM
            ErrorCode::PermissionDenied => 13,   // EACCES
            ErrorCode::TimedOut => 110,          // ETIMEDOUT
            ErrorCode::Interrupted => 4,         // EINTR
            ErrorCode::DeadlockWouldOccur => 35, // EDEADLK
            ErrorCode::NotOwner => 1,            // EPERM
            ErrorCode::Overflow => 75,           // EOVERFLOW
            ErrorCode::BusBusy => 16,            // EBUSY
            ErrorCode::IoError => 5,             // EIO
            ErrorCode::RestartSyscall => 85,     // ERESTART
            ErrorCode::CrossDevice => 18,        // EXDEV
            ErrorCode::ReadOnly => 30,           // EROFS
            ErrorCode::BadState => 116,          // ESTALE
            ErrorCode::AlreadyExists => 17,      // EEXIST
            ErrorCode::NotADirectory => 20,      // ENOTDIR
            ErrorCode::IsADirectory => 21,       // EISDIR
            ErrorCode::NotEmpty => 39,           // ENOTEMPTY
        }
    }
}

/// Error type returned by kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    code: ErrorCode,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(code: ErrorCode) -> Self {
        Error { code, msg: None }
    }

    pub const fn with_message(code: ErrorCode, msg: &'static str) -> Self {
        Error {
            code,
            msg: Some(msg),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    pub const fn message(&self) -> Option<&'static str> {
        self.msg
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::new(code)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{:?}: {}", self.code, msg),
            None => write!(f, "{:?}", self.code),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
