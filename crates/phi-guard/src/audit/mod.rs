//! Append-only audit ledger for authentication, PHI access and security events.
//!
//! Events are emitted to every local sink, awaited by the caller, and then written,
//! once, to a date-partitioned object store:
//!
//! ```text
//! {prefix}{YYYY}/{MM}/{DD}/{event_id}.json
//! ```

pub mod delivery;
pub mod event;
pub mod ledger;
pub mod sink;
pub mod store;

pub use delivery::{Delivery, DurableWriteFailure, RetryPolicy};
pub use event::{
    Actor, AuditEvent, AuditEventType, AuditSeverity, InvalidPatientHash, Outcome, Resource,
};
pub use ledger::{phi_event_type, AuditLedger, LedgerError, PhiAccess, UnknownActionPolicy};
pub use sink::{JsonLinesSink, LocalEmitError, LocalSink, TracingSink};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore, S3ObjectStore, StoreError};
