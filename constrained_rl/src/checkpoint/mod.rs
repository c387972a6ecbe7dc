//! Policy checkpointing.
//!
//! ```rust,ignore
//! let mut checkpointer = Checkpointer::new(CheckpointerConfig::new("./checkpoints"))?;
//! if checkpointer.should_save(iteration) {
//!     checkpointer.save(&policy, iteration, Some(mean_reward))?;
//! }
//! // Resume: the iteration comes back from the file name.
//! let (policy, iteration) = checkpointer.load_latest(template, &device)?;
//! ```

pub mod checkpointer;

pub use checkpointer::{
    checkpoint_file_name, load_checkpoint, parse_iteration, CheckpointError, CheckpointInfo, Checkpointer,
    CheckpointerConfig,
};
