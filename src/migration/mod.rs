//! Migration engine.
//!
//! Converts parser events into RESTORE-ASKING writes against the target
//! cluster, with bounded per-record retries and pool lifecycles tied to the
//! stream's phase events.
//!
//! ## Module Structure
//!
//! - [`event`]: Records and the event contract with the snapshot parser
//! - [`command`]: Restore commands and remaining-TTL math
//! - [`filter`]: Database, key pattern and data type filtering
//! - [`report`]: Record outcomes and run summaries
//! - [`context`]: Immutable state shared by every worker
//! - [`visitor`]: Per-worker conversion, retry loop and pool lifecycle
//! - [`dispatch`]: Worker pool fed by a single producer

pub mod command;
pub mod context;
pub mod dispatch;
pub mod event;
pub mod filter;
pub mod report;
pub mod visitor;

pub use command::{RESTORE_ASKING, RestoreCommand, Ttl};
pub use context::{Clock, Context, now_ms};
pub use dispatch::{Dispatcher, run};
pub use event::{AuxField, DataType, Event, Record};
pub use filter::RecordFilter;
pub use report::{MigrationReport, Outcome};
pub use visitor::{Attempt, MigrationVisitor, WorkerState};
