//! The solved result: one [`ImplementationSelection`] per interface the
//! solver chose, plus the canonical XML rendering a caller hands off to a
//! launcher.
//!
//! XML is hand-assembled with manual escaping rather than a serde-xml
//! crate, the same manual text-emission style this crate already uses
//! for its other structured on-disk documents.

use crate::arch::Architecture;
use crate::digest::ManifestDigest;
use crate::feed::Stability;
use crate::version::Version;
use std::fmt::{self, Display, Formatter};

/// A binding: how a dependency's selected implementation is exposed to its
/// consumer (an environment variable, an executable on `PATH`, and so on).
/// `zi_core` only carries the data shape through the solve; actually
/// applying a binding to a child process's environment is out of scope.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Binding {
    EnvironmentValue {
        name: String,
        insert: String,
        mode: EnvironmentMode,
    },
    Executable {
        name: String,
        command: String,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EnvironmentMode {
    Prepend,
    Append,
    Replace,
}

impl Display for EnvironmentMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentMode::Prepend => "prepend",
            EnvironmentMode::Append => "append",
            EnvironmentMode::Replace => "replace",
        };
        write!(f, "{s}")
    }
}

/// One interface's resolved implementation, as chosen by [`crate::solver::Solver`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImplementationSelection {
    pub interface: String,
    pub impl_id: String,
    pub version: Version,
    pub architecture: Architecture,
    pub effective_stability: Stability,
    pub digest: ManifestDigest,
    pub from_feed: String,
    pub main: Option<String>,
    /// Interfaces this selection depends on, for diagnostics and for
    /// ordering a launcher's own environment setup; not consulted by the
    /// solver itself, which already resolved them.
    pub dependency_interfaces: Vec<String>,
    pub bindings: Vec<Binding>,
}

/// The solved result for a full run of the solver: a root interface, the
/// command chain to run it (see below), and every selected implementation.
///
/// `commands` models the chain of commands a launcher must run: the root
/// command, then its runner's command, then the runner's own runner, and
/// so on, as a single root command. [`crate::feed::Implementation`] only
/// carries one `main`
/// executable per implementation, so there is no runner-of-a-runner to
/// chain to; a caller that needs a multi-level runner chain supplies a
/// feed model that carries one, at which point this field grows
/// naturally from a single element to several.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Selections {
    root_interface: String,
    commands: Vec<String>,
    implementations: Vec<ImplementationSelection>,
}

impl Selections {
    pub fn new(
        root_interface: String,
        root_command: Option<String>,
        implementations: Vec<ImplementationSelection>,
    ) -> Self {
        Self {
            root_interface,
            commands: root_command.into_iter().collect(),
            implementations,
        }
    }

    pub fn root_interface(&self) -> &str {
        &self.root_interface
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn implementations(&self) -> &[ImplementationSelection] {
        &self.implementations
    }

    pub fn find(&self, interface: &str) -> Option<&ImplementationSelection> {
        self.implementations.iter().find(|i| i.interface == interface)
    }
}

/// Escapes `&`, `<`, `>`, and `"` for safe placement inside an XML element
/// body or a double-quoted attribute value.
fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn attr(name: &str, value: &str) -> String {
    format!(" {name}=\"{}\"", escape_xml(value))
}

impl Display for Selections {
    /// Renders the canonical selections document: one `<selections>` root
    /// carrying the interface/command chain, with
    /// one `<selection>` child per resolved interface.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "<?xml version=\"1.0\"?>")?;
        write!(f, "<selections")?;
        write!(f, "{}", attr("interface", &self.root_interface))?;
        if let Some(command) = self.commands.first() {
            write!(f, "{}", attr("command", command))?;
        }
        writeln!(f, ">")?;

        for implementation in &self.implementations {
            write!(f, "  <selection")?;
            write!(f, "{}", attr("interface", &implementation.interface))?;
            write!(f, "{}", attr("id", &implementation.impl_id))?;
            write!(f, "{}", attr("version", &implementation.version.to_string()))?;
            write!(f, "{}", attr("arch", &implementation.architecture.to_string()))?;
            write!(
                f,
                "{}",
                attr("stability", stability_name(implementation.effective_stability))
            )?;
            write!(f, "{}", attr("from-feed", &implementation.from_feed))?;
            if let Some(main) = &implementation.main {
                write!(f, "{}", attr("main", main))?;
            }
            if let Some(name) = implementation.digest.preferred_store_name() {
                write!(f, "{}", attr("digest", &name))?;
            }

            if implementation.dependency_interfaces.is_empty() && implementation.bindings.is_empty() {
                writeln!(f, "/>")?;
                continue;
            }
            writeln!(f, ">")?;

            for dependency in &implementation.dependency_interfaces {
                writeln!(f, "    <requires{}/>", attr("interface", dependency))?;
            }
            for binding in &implementation.bindings {
                write_binding(f, binding)?;
            }

            writeln!(f, "  </selection>")?;
        }

        writeln!(f, "</selections>")
    }
}

fn write_binding(f: &mut Formatter<'_>, binding: &Binding) -> fmt::Result {
    match binding {
        Binding::EnvironmentValue { name, insert, mode } => {
            write!(f, "    <environment")?;
            write!(f, "{}", attr("name", name))?;
            write!(f, "{}", attr("insert", insert))?;
            write!(f, "{}", attr("mode", &mode.to_string()))?;
            writeln!(f, "/>")
        }
        Binding::Executable { name, command } => {
            write!(f, "    <executable-in-path")?;
            write!(f, "{}", attr("name", name))?;
            write!(f, "{}", attr("command", command))?;
            writeln!(f, "/>")
        }
    }
}

fn stability_name(stability: Stability) -> &'static str {
    match stability {
        Stability::Insecure => "insecure",
        Stability::Buggy => "buggy",
        Stability::Developer => "developer",
        Stability::Testing => "testing",
        Stability::Stable => "stable",
        Stability::Packaged => "packaged",
        Stability::Preferred => "preferred",
    }
}
