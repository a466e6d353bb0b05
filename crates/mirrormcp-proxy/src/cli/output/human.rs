//! Human-readable listing
//!
//! Each kind gets a `---- Kind ----` header, then one block per entry whose
//! size depends on the [`ViewMode`].

use std::io::Write;

use colored::Colorize;
use mirrormcp_protocol::{Prompt, Resource, Tool};
use serde_json::Value;

use super::ListingFormatter;
use crate::cli::args::ViewMode;
use crate::error::ProxyResult;
use crate::list::{ListOutput, ListSelection};

/// Width of descriptions in the summary view.
const SUMMARY_WIDTH: usize = 70;

const INDENT: &str = "    ";

/// Plain-text formatter with colored section headers
#[derive(Debug)]
pub struct HumanFormatter {
    view: ViewMode,
}

impl HumanFormatter {
    /// Create a new human formatter
    #[must_use]
    pub fn new(view: ViewMode) -> Self {
        Self { view }
    }

    fn header(writer: &mut dyn Write, title: &str) -> ProxyResult<()> {
        writeln!(writer, "{}", format!("---- {title} ----").bold().cyan())?;
        Ok(())
    }

    fn description(&self, writer: &mut dyn Write, description: Option<&str>) -> ProxyResult<()> {
        let Some(description) = description.filter(|d| !d.is_empty()) else {
            return Ok(());
        };
        match self.view {
            ViewMode::Detailed => {
                for line in description.split('\n') {
                    writeln!(writer, "{INDENT}{line}")?;
                }
            }
            _ => writeln!(writer, "{INDENT}{}", single_line(description, SUMMARY_WIDTH))?,
        }
        Ok(())
    }

    fn write_prompt(&self, writer: &mut dyn Write, prompt: &Prompt) -> ProxyResult<()> {
        let title = non_empty(prompt.title.as_deref());
        if self.view == ViewMode::Brief {
            return brief_line(writer, title, &prompt.name);
        }

        if let Some(title) = title {
            writeln!(writer, "{INDENT}{title}")?;
        }
        write!(writer, "{INDENT}{}", prompt.name)?;
        if let Some(arguments) = prompt.arguments.as_deref().filter(|a| !a.is_empty()) {
            let rendered: Vec<String> = arguments
                .iter()
                .map(|arg| {
                    if arg.required.unwrap_or(false) {
                        arg.name.clone()
                    } else {
                        format!("[{}]", arg.name)
                    }
                })
                .collect();
            write!(writer, "({})", rendered.join(", "))?;
        }
        writeln!(writer)?;
        self.description(writer, prompt.description.as_deref())?;
        writeln!(writer)?;
        Ok(())
    }

    fn write_resource(&self, writer: &mut dyn Write, resource: &Resource) -> ProxyResult<()> {
        let title = non_empty(resource.title.as_deref());
        if self.view == ViewMode::Brief {
            return brief_line(writer, title, &resource.name);
        }

        if let Some(title) = title {
            writeln!(writer, "{INDENT}{title}")?;
        }
        write!(writer, "{INDENT}{}", resource.name)?;
        if let Some(size) = resource.size.filter(|size| *size > 0) {
            write!(writer, " {size}")?;
        }
        if let Some(mime_type) = non_empty(resource.mime_type.as_deref()) {
            write!(writer, " {mime_type}")?;
        }
        writeln!(writer)?;
        if !resource.uri.is_empty() {
            writeln!(writer, "{INDENT}{}", resource.uri)?;
        }
        self.description(writer, resource.description.as_deref())?;
        writeln!(writer)?;
        Ok(())
    }

    fn write_tool(&self, writer: &mut dyn Write, tool: &Tool) -> ProxyResult<()> {
        let title = non_empty(tool.title.as_deref());
        let annotated_title = non_empty(
            tool.annotations
                .as_ref()
                .and_then(|a| a.get("title"))
                .and_then(Value::as_str),
        );
        if self.view == ViewMode::Brief {
            return brief_line(writer, title.or(annotated_title), &tool.name);
        }

        for title in [title, annotated_title].into_iter().flatten() {
            writeln!(writer, "{INDENT}{title}")?;
        }
        let arguments: Vec<String> = schema_arguments(&tool.input_schema)
            .into_iter()
            .map(|arg| {
                if arg.required {
                    format!("{} {}", arg.name, arg.kind)
                } else {
                    format!("{{{} {}}}", arg.name, arg.kind)
                }
            })
            .collect();
        writeln!(writer, "{INDENT}{}({})", tool.name, arguments.join(", "))?;
        self.description(writer, tool.description.as_deref())?;
        writeln!(writer)?;
        Ok(())
    }
}

impl ListingFormatter for HumanFormatter {
    fn write_listing(
        &self,
        listing: &ListOutput,
        selection: ListSelection,
        writer: &mut dyn Write,
    ) -> ProxyResult<()> {
        if selection.prompts {
            Self::header(writer, "Prompts")?;
            for prompt in &listing.prompts {
                self.write_prompt(writer, prompt)?;
            }
        }
        if selection.resources {
            Self::header(writer, "Resources")?;
            for resource in &listing.resources {
                self.write_resource(writer, resource)?;
            }
        }
        if selection.tools {
            Self::header(writer, "Tools")?;
            for tool in &listing.tools {
                self.write_tool(writer, tool)?;
            }
        }
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn brief_line(writer: &mut dyn Write, title: Option<&str>, name: &str) -> ProxyResult<()> {
    match title {
        Some(title) => writeln!(writer, "{INDENT}{title} ({name})")?,
        None => writeln!(writer, "{INDENT}{name}")?,
    }
    Ok(())
}

/// First line of `text`, cut to at most `width` characters.
fn single_line(text: &str, width: usize) -> String {
    let first = text.split('\n').next().unwrap_or_default();
    first.chars().take(width).collect()
}

/// One property of a tool's input schema.
#[derive(Debug, PartialEq, Eq)]
struct SchemaArgument {
    name: String,
    kind: String,
    required: bool,
}

/// Arguments declared by a JSON Schema object, in declaration order.
///
/// A property without a string `type` is `any`; an array of typed items is
/// shown as `item[]`.
fn schema_arguments(schema: &Value) -> Vec<SchemaArgument> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, property)| {
            let declared = property.get("type").and_then(Value::as_str);
            let kind = match declared {
                Some("array") => property
                    .get("items")
                    .and_then(|items| items.get("type"))
                    .and_then(Value::as_str)
                    .map_or_else(|| "array".to_string(), |item| format!("{item}[]")),
                Some(kind) => kind.to_string(),
                None => "any".to_string(),
            };
            SchemaArgument {
                name: name.clone(),
                kind,
                required: required.contains(&name.as_str()),
            }
        })
        .collect()
}
