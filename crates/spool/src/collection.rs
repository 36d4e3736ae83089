//! Named stacks sharing one root directory
//!
//! A [`StackCollection`] hands out stacks rooted at `<root>/<name>` and can
//! flush or reset all of them in one call. It holds no lock of its own while
//! relaying: each stack already serializes its own operations.

use crate::config::StackConfig;
use crate::error::{Result, StackError};
use crate::stack::SpoolingStack;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A registry of named spooling stacks
pub struct StackCollection<T> {
    root: PathBuf,
    stacks: BTreeMap<String, Arc<SpoolingStack<T>>>,
}

impl<T> StackCollection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StackCollection {
            root: root.into(),
            stacks: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a stack named `name` and keep track of it
    ///
    /// `template` supplies every parameter except the root, which becomes
    /// `<collection root>/<name>`. A stack already registered under the same
    /// name is replaced (its files are left alone).
    pub fn create(&mut self, name: &str, template: StackConfig) -> Result<Arc<SpoolingStack<T>>> {
        validate_name(name)?;
        let config = template.with_root(self.root.join(name));
        let stack = Arc::new(SpoolingStack::new(config)?);
        debug!(name, root = %stack.root().display(), "Registered stack");
        self.stacks.insert(name.to_string(), Arc::clone(&stack));
        Ok(stack)
    }

    /// Return a previously built stack
    pub fn get(&self, name: &str) -> Result<Arc<SpoolingStack<T>>> {
        self.stacks
            .get(name)
            .cloned()
            .ok_or_else(|| StackError::NotFound(name.to_string()))
    }

    /// Names of all registered stacks, in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.stacks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Flush the whole buffer of every stack to disk
    pub fn flush_all(&self) -> Result<()> {
        for (name, stack) in &self.stacks {
            stack.flush(None, true).inspect_err(|e| {
                warn!(name = %name, error = %e, "Failed to flush stack");
            })?;
        }
        Ok(())
    }

    /// Reset every stack, deleting its directory
    pub fn reset_all(&self) -> Result<()> {
        for (name, stack) in &self.stacks {
            stack.reset().inspect_err(|e| {
                warn!(name = %name, error = %e, "Failed to reset stack");
            })?;
        }
        Ok(())
    }
}

/// Stack names become directory names, so they must be a single component
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StackError::Config(format!(
            "invalid stack name '{}'",
            name
        )));
    }
    Ok(())
}
