mod attempt;
mod snapshot;

pub use attempt::AttemptOutcome;
pub use snapshot::{format_timestamp, snapshot_filename, Pointer, PointerState, Snapshot};
