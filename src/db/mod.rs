pub mod cancel;
pub mod connection;
pub mod driver;
pub mod events;
pub mod oracle_driver;
pub mod query;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use cancel::CancelToken;
pub use connection::*;
pub use driver::{BoundCursor, CursorId, DatabaseDriver, DriverSession, ExecuteOutcome, RawRow};
pub use events::{EventBus, Subscription};
pub use oracle_driver::OracleDriver;
pub use query::*;
pub use session::*;

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            eprintln!("Warning: {what} lock was poisoned; recovering.");
            poisoned.into_inner()
        }
    }
}
