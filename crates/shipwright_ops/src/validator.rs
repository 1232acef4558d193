//! Structural validation and normalization of parsed operations.
//!
//! Every operation is checked on its own: an invalid child is dropped and
//! reported without invalidating its siblings or its container.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::operation::{Operation, OperationKind, OperationTree};
use crate::parser::{RawTree, ResponseParser};

/// A problem found at a specific position in the raw tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Position in the raw tree, e.g. `operations[0].fixes[2]`.
    pub location: String,
    /// The `operation` tag as received, when there was one.
    pub tag: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{} ({}): {}", self.location, tag, self.message),
            None => write!(f, "{}: {}", self.location, self.message),
        }
    }
}

/// Validation errors and warnings for one response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    fn error(&mut self, location: &str, tag: Option<&str>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            location: location.to_string(),
            tag: tag.map(str::to_string),
            message: message.into(),
        });
    }

    fn warning(&mut self, location: &str, tag: Option<&str>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            location: location.to_string(),
            tag: tag.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// A well-typed tree and the issues met while building it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatedTree {
    pub tree: OperationTree,
    pub report: ValidationReport,
}

/// Result of parsing and validating a full model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedResponse {
    /// Number of JSON payloads located in the text.
    pub payloads: usize,
    pub tree: OperationTree,
    pub report: ValidationReport,
}

impl ParsedResponse {
    /// No payload could be located at all.
    pub fn nothing_found(&self) -> bool {
        self.payloads == 0
    }
}

/// Parse free-form model output and validate every payload found.
pub fn parse_response(text: &str) -> ParsedResponse {
    let raw = ResponseParser::parse(text);
    let payloads = raw.len();
    let mut tree = OperationTree::default();
    let mut report = ValidationReport::new();

    for (index, raw_tree) in raw.iter().enumerate() {
        let validated = OperationValidator::validate_at(raw_tree, index);
        tree.operations.extend(validated.tree.operations);
        report.merge(validated.report);
    }

    ParsedResponse {
        payloads,
        tree,
        report,
    }
}

/// Validator for raw operation values.
pub struct OperationValidator;

impl OperationValidator {
    /// Validate every root of a raw payload.
    pub fn validate(raw: &RawTree) -> ValidatedTree {
        Self::validate_at(raw, 0)
    }

    fn validate_at(raw: &RawTree, payload: usize) -> ValidatedTree {
        let prefix = if payload == 0 {
            "operations".to_string()
        } else {
            format!("payload[{}].operations", payload)
        };
        let mut report = ValidationReport::new();
        let operations = Self::validate_list(&raw.roots, &prefix, &mut report);
        ValidatedTree {
            tree: OperationTree::new(operations),
            report,
        }
    }

    /// Validate a single raw value. Returns `None` (with an error recorded)
    /// when the value cannot be turned into an operation.
    pub fn validate_value(value: &Value, location: &str, report: &mut ValidationReport) -> Option<Operation> {
        let Some(obj) = value.as_object() else {
            report.error(location, None, "operation must be a JSON object");
            return None;
        };

        let raw_tag = match obj.get("operation") {
            Some(Value::String(tag)) => tag.as_str(),
            Some(_) => {
                report.error(location, None, "'operation' must be a string");
                return None;
            }
            // An untagged object carrying an operations list is a group.
            None if obj.get("operations").map_or(false, Value::is_array) => "MULTIPLE_OPERATIONS",
            None => {
                report.error(location, None, "missing 'operation' tag");
                return None;
            }
        };

        let Some(kind) = OperationKind::from_tag(raw_tag) else {
            report.error(
                location,
                Some(raw_tag),
                format!("unknown operation type '{}'", raw_tag),
            );
            return None;
        };

        let mut fields = Fields {
            obj,
            location,
            tag: raw_tag,
            report,
        };

        match kind {
            OperationKind::CreateFile => Some(Operation::CreateFile {
                path: fields.path()?,
                content: fields.content()?,
            }),
            OperationKind::OverwriteFile => Some(Operation::OverwriteFile {
                path: fields.path()?,
                content: fields.content()?,
            }),
            OperationKind::InsertLines => {
                let path = fields.path();
                let line = fields.positive("line");
                let content = fields.content();
                Some(Operation::InsertLines {
                    path: path?,
                    line: line?,
                    content: content?,
                })
            }
            OperationKind::DeleteFile => Some(Operation::DeleteFile { path: fields.path()? }),
            OperationKind::DeleteLines => {
                let path = fields.path();
                let start_line = fields.positive("start_line");
                let end_line = fields.positive("end_line");
                let (path, start_line, end_line) = (path?, start_line?, end_line?);
                if end_line < start_line {
                    fields.error(format!(
                        "end_line {} is before start_line {}",
                        end_line, start_line
                    ));
                    return None;
                }
                Some(Operation::DeleteLines {
                    path,
                    start_line,
                    end_line,
                })
            }
            OperationKind::MultipleOperations => {
                let children = match obj.get("operations") {
                    Some(Value::Array(items)) => {
                        let child_location = format!("{}.operations", location);
                        Self::validate_list(items, &child_location, report)
                    }
                    Some(_) => {
                        report.error(location, Some(raw_tag), "'operations' must be an array");
                        return None;
                    }
                    None => {
                        report.warning(location, Some(raw_tag), "no operations specified");
                        Vec::new()
                    }
                };
                Some(Operation::MultipleOperations { operations: children })
            }
            OperationKind::NeedsRetry => {
                let message = obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let fixes = match obj.get("fixes") {
                    Some(Value::Array(items)) => {
                        let child_location = format!("{}.fixes", location);
                        Self::validate_list(items, &child_location, report)
                    }
                    None | Some(Value::Null) => Vec::new(),
                    Some(_) => {
                        report.error(location, Some(raw_tag), "'fixes' must be an array");
                        return None;
                    }
                };
                if fixes.is_empty() {
                    report.warning(location, Some(raw_tag), "no fixes specified");
                }
                Some(Operation::NeedsRetry { message, fixes })
            }
            OperationKind::VerifyComplete => Some(Operation::VerifyComplete {
                message: obj.get("message").and_then(Value::as_str).map(str::to_string),
            }),
        }
    }

    fn validate_list(items: &[Value], location: &str, report: &mut ValidationReport) -> Vec<Operation> {
        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| Self::validate_value(item, &format!("{}[{}]", location, i), report))
            .collect()
    }
}

/// Field accessors that record an error for every missing or mistyped field.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    location: &'a str,
    tag: &'a str,
    report: &'a mut ValidationReport,
}

impl Fields<'_> {
    fn error(&mut self, message: impl Into<String>) {
        self.report.error(self.location, Some(self.tag), message);
    }

    fn path(&mut self) -> Option<String> {
        match self.obj.get("path") {
            Some(Value::String(raw)) => match normalize_path(raw) {
                Ok(path) => Some(path),
                Err(reason) => {
                    self.error(reason);
                    None
                }
            },
            Some(_) => {
                self.error("'path' must be a string");
                None
            }
            None => {
                self.error("missing required field 'path'");
                None
            }
        }
    }

    fn content(&mut self) -> Option<String> {
        match self.obj.get("content") {
            Some(Value::String(content)) => Some(content.clone()),
            Some(_) => {
                self.error("'content' must be a string");
                None
            }
            None => {
                self.error("missing required field 'content'");
                None
            }
        }
    }

    fn positive(&mut self, field: &str) -> Option<usize> {
        match self.obj.get(field) {
            Some(value) => match value.as_u64().filter(|n| *n > 0) {
                Some(n) => usize::try_from(n).ok(),
                None => {
                    self.error(format!("'{}' must be a positive integer, got {}", field, value));
                    None
                }
            },
            None => {
                self.error(format!("missing required field '{}'", field));
                None
            }
        }
    }
}

/// Trim a repository-relative path and reject ones that escape the tree.
pub fn normalize_path(raw: &str) -> Result<String, String> {
    let mut path = raw.trim();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }

    if path.is_empty() {
        return Err("'path' must not be empty".to_string());
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(format!("path '{}' escapes the repository", raw));
    }
    Ok(path.to_string())
}
