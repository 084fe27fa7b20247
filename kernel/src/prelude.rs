// SPDX-License-Identifier: MPL-2.0

// The kernel prelude.

#![allow(unused)]

pub(crate) use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::{any::Any, fmt::Debug};

pub(crate) use bitflags::bitflags;
pub(crate) use lazy_static::lazy_static;
pub(crate) use log::{debug, error, info, trace, warn};
pub(crate) use pados_frame::sync::{SpinLock, SpinLockGuard};

pub(crate) use crate::error::{Error, ErrorCode, Result};
pub(crate) use crate::time::TimeValNanos;
