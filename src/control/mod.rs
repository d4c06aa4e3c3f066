//! Control-event authorization.
//!
//! # Data Flow
//! ```text
//! POST <handler path>
//!     → event.rs (envelope → typed ControlEvent, or ValidationError)
//!     → engine.rs (decision over one Configuration snapshot)
//!     → verdict.rs (wire encoding)
//!     → on accepted Login: ConfigStore::record_activity
//! ```

pub mod engine;
pub mod event;
pub mod verdict;

pub use engine::{authorize, ActivityUpdate, Decision};
pub use event::{ControlEvent, ControlRequest, Operation, ValidationError};
pub use verdict::Verdict;
