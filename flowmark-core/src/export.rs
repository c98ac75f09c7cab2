//! Graph export to Graphviz DOT and Mermaid.

use crate::definition::Definition;
use crate::error::CoreError;
use std::fmt::Write;
use std::str::FromStr;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Dot,
    Mermaid,
}

impl ExportFormat {
    /// File extension conventionally used for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Dot => "dot",
            ExportFormat::Mermaid => "md",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dot" | "graphviz" => Ok(ExportFormat::Dot),
            "md" | "mermaid" => Ok(ExportFormat::Mermaid),
            other => Err(CoreError::invalid(format!(
                "unsupported export format '{}'",
                other
            ))),
        }
    }
}

/// Renders a definition in the given format.
pub fn export(definition: &Definition, format: ExportFormat) -> String {
    match format {
        ExportFormat::Dot => definition.to_graphviz(),
        ExportFormat::Mermaid => definition.to_mermaid(),
    }
}

impl Definition {
    /// Renders the graph as a Graphviz digraph.
    pub fn to_graphviz(&self) -> String {
        let mut out = String::from("digraph Workflow {\n");

        for (id, _) in self.places() {
            let _ = writeln!(out, "    \"{}\" [label=\"{}\"];", id, id);
        }

        for (id, transition) in self.transitions() {
            for from in transition.from.ids() {
                for to in transition.to.ids() {
                    let _ = writeln!(out, "    \"{}\" -> \"{}\" [label=\"{}\"];", from, to, id);
                }
            }
        }

        out.push('}');
        out
    }

    /// Renders the graph as a Mermaid flowchart.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD;\n");

        for (id, _) in self.places() {
            let _ = writeln!(out, "    {}[\"{}\"];", id, id);
        }

        for (id, transition) in self.transitions() {
            for from in transition.from.ids() {
                for to in transition.to.ids() {
                    let _ = writeln!(out, "    {} -->|{}| {};", from, id, to);
                }
            }
        }

        out
    }
}
