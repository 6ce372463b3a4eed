//! Write-once, read-many port buffers.
//!
//! A buffer is the value slot behind a named port. It is bound exactly
//! once, either to manifest paths (a constant) or to a producing node's
//! output port (deferred), and downstream consumers are indifferent to
//! which. This discipline is what makes the assembled graph race-free
//! once handed to a parallel executor: no slot is ever written twice.

use std::path::PathBuf;

use serde::Serialize;

use crate::catalog::PortKind;
use crate::errors::{PortReboundError, UnboundPortError};

use super::NodeId;

/// Stable identity of a buffer within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    /// The numeric index of the buffer.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// What a buffer is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum PortBinding {
    /// A constant: paths already present in the derivatives store.
    Manifest {
        /// The cached paths.
        paths: Vec<PathBuf>,
    },
    /// Deferred: the value a node's output port will produce.
    Produced {
        /// The producing node.
        node: NodeId,
        /// The producing output port name.
        port: String,
    },
}

/// A named slot holding either a cached value or a promise of one.
#[derive(Debug, Clone, Serialize)]
pub struct PortBuffer {
    /// The buffer identity.
    pub id: BufferId,
    /// The logical name of the value this buffer carries.
    pub name: String,
    /// The kind of value.
    pub kind: PortKind,
    binding: Option<PortBinding>,
    readers: usize,
}

impl PortBuffer {
    pub(crate) fn new(id: BufferId, name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            binding: None,
            readers: 0,
        }
    }

    /// Binds the buffer. May be called exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is already bound.
    pub fn bind(&mut self, binding: PortBinding) -> Result<(), PortReboundError> {
        if self.binding.is_some() {
            return Err(PortReboundError::new(&self.name));
        }
        self.binding = Some(binding);
        Ok(())
    }

    /// Reads the binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer has not been bound yet.
    pub fn read(&self) -> Result<&PortBinding, UnboundPortError> {
        self.binding
            .as_ref()
            .ok_or_else(|| UnboundPortError::new(&self.name))
    }

    /// Returns true when the buffer has been bound.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// The number of downstream consumers wired to this buffer.
    #[must_use]
    pub const fn readers(&self) -> usize {
        self.readers
    }

    pub(crate) fn mark_read(&mut self) {
        self.readers += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_once_read_many() {
        let mut buffer = PortBuffer::new(BufferId(0), "t1w_preproc", PortKind::Volume);
        assert!(buffer.read().is_err());

        buffer
            .bind(PortBinding::Manifest {
                paths: vec![PathBuf::from("t1w.nii.gz")],
            })
            .unwrap();

        assert!(buffer.read().is_ok());
        assert!(buffer.read().is_ok());
    }

    #[test]
    fn test_rebind_rejected() {
        let mut buffer = PortBuffer::new(BufferId(0), "t1w_mask", PortKind::Mask);
        let binding = PortBinding::Produced {
            node: NodeId(0),
            port: "t1w_mask".to_string(),
        };

        buffer.bind(binding.clone()).unwrap();
        let err = buffer.bind(binding).unwrap_err();
        assert!(err.to_string().contains("already bound"));
    }
}
