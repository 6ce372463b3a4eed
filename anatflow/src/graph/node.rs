//! Stage nodes and external tool invocation descriptors.

use serde::Serialize;

use crate::catalog::StageId;

/// Stable identity of a node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The numeric index of the node.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One file a tool invocation is expected to produce, keyed by the
/// output port it populates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedOutput {
    /// The output port name.
    pub port: String,
    /// The filename the tool writes, relative to its working directory.
    pub filename: String,
}

/// The boundary handed to the external execution engine: one command
/// line per instantiated stage.
///
/// Argv entries may reference the node's own input ports as
/// `{port_name}` placeholders; the engine substitutes the bound paths
/// before launching the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationDescriptor {
    /// The executable to launch.
    pub executable: String,
    /// The argument list, with port placeholders unresolved.
    pub argv: Vec<String>,
    /// The files the invocation is expected to produce.
    pub expected_outputs: Vec<ExpectedOutput>,
}

impl InvocationDescriptor {
    /// Creates a descriptor for one executable.
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            argv: Vec::new(),
            expected_outputs: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends an argument referencing one of the node's input ports.
    #[must_use]
    pub fn with_port_arg(self, port: &str) -> Self {
        let placeholder = Self::port_placeholder(port);
        self.with_arg(placeholder)
    }

    /// Declares an expected output file for one output port.
    #[must_use]
    pub fn with_output(mut self, port: impl Into<String>, filename: impl Into<String>) -> Self {
        self.expected_outputs.push(ExpectedOutput {
            port: port.into(),
            filename: filename.into(),
        });
        self
    }

    /// The placeholder syntax for referencing an input port in argv.
    #[must_use]
    pub fn port_placeholder(port: &str) -> String {
        format!("{{{port}}}")
    }
}

/// One instantiated stage in the task graph.
///
/// Replicated stages (per-template registration, per-kind conversion)
/// appear as several nodes sharing a [`StageId`] but carrying distinct
/// labels. The join collector carries no invocation; it is pure
/// synchronization.
#[derive(Debug, Clone, Serialize)]
pub struct StageNode {
    /// The node identity.
    pub id: NodeId,
    /// The stage this node instantiates.
    pub stage: StageId,
    /// Unique human-readable label, e.g. `template_registration:MNIInfant`.
    pub label: String,
    /// The external tool invocation, absent for pure collectors.
    pub invocation: Option<InvocationDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let invocation = InvocationDescriptor::new("antsRegistration")
            .with_args(["--dimensionality", "3"])
            .with_port_arg("t1w_preproc")
            .with_output("anat2std_xfm", "anat2std_xfm.h5");

        assert_eq!(invocation.executable, "antsRegistration");
        assert_eq!(invocation.argv.last().map(String::as_str), Some("{t1w_preproc}"));
        assert_eq!(invocation.expected_outputs.len(), 1);
    }

    #[test]
    fn test_port_placeholder_syntax() {
        assert_eq!(
            InvocationDescriptor::port_placeholder("t1w_mask"),
            "{t1w_mask}"
        );
    }
}
