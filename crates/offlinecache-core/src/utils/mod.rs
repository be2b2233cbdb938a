//! Small shared helpers.

pub(crate) mod lock;

pub(crate) use lock::{mutex_lock, rw_read, rw_write};
