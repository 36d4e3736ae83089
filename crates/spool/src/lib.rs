//! Spooling Stack: a bounded-memory LIFO stack backed by bundle files
//!
//! Pushes accumulate in memory until the buffer exceeds the bundle size; the
//! oldest values are then written to `<root>/<prefix>.<index>`. Pops drain
//! memory first and reload the newest bundle when memory runs dry, so the
//! caller only ever sees ordinary stack order.
//!
//! # Modules
//!
//! - `stack`: the spooling engine (push, pop, flush, reset)
//! - `bundle`: bundle file naming, discovery and I/O
//! - `codec`: pluggable bundle encodings (JSON, bincode)
//! - `collection`: named stacks under one root directory
//! - `config`: stack parameters, TOML and environment loading
//! - `error`: error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use spooling_stack::{SpoolingStack, StackConfig};
//!
//! # fn main() -> spooling_stack::Result<()> {
//! let stack: SpoolingStack<String> =
//!     SpoolingStack::new(StackConfig::new("/tmp/spool").with_bundle_size(1000))?;
//! stack.push("hello".to_string())?;
//! assert_eq!(stack.pop()?, "hello");
//! stack.close()?;
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod codec;
pub mod collection;
pub mod config;
pub mod error;
pub mod stack;

pub use bundle::{BundleRange, BundleStore};
pub use codec::{Codec, Format};
pub use collection::StackCollection;
pub use config::{DEFAULT_BUNDLE_SIZE, DEFAULT_PREFIX, StackConfig};
pub use error::{CodecError, Result, StackError};
pub use stack::SpoolingStack;
