//! Sequencing for Arbor.
//!
//! Sequencing derives additional structure from committed content, such as
//! parsing a stored DDL model definition into table and column nodes. Every
//! commit is submitted to the [`SequencingCoordinator`], which matches the
//! touched nodes against registered [`TriggerRule`]s, runs the matching
//! [`Sequencer`]s on the async runtime, and settles the commit's
//! [`CommitSignal`] once its outstanding task count reaches zero. A commit
//! that triggers nothing settles immediately.
//!
//! Derived output is written straight to the node store in its own change
//! set, so it never triggers sequencing again.

pub mod coordinator;
pub mod ddl;
pub mod error;
pub mod rule;
pub mod sequencer;
pub mod signal;
pub mod task;

pub use coordinator::{SequencingCoordinator, TouchedNode};
pub use ddl::DdlSequencer;
pub use error::{SequencingError, SequencingResult};
pub use rule::{TriggerRule, ValueShape};
pub use sequencer::{DerivedNode, Sequencer, SequencerOutput, SequencingInput};
pub use signal::{CommitSignal, SequencingOutcome, SequencingReport};
pub use task::{SequencingTask, TaskReport, TaskStatus};
