//! Minimal ROS `.msg` reflection parser (messages only).
//!
//! Parses the textual ROS message definition format into a typed,
//! reflection-friendly representation, including the concatenated
//! multi-definition form used by recorded schemas, where dependent
//! types follow the main type separated by `===` lines and `MSG:`
//! headers. No pre-baked message definitions are required.

use std::collections::HashMap;

use anyhow::{bail, Context as _};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltInType {
    Bool,
    Byte,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    /// ROS1 `time` (two u32s on the wire). Not a primitive in ROS2.
    Time,
    /// ROS1 `duration`.
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySize {
    Fixed(usize),
    Bounded(usize),
    Unbounded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    BuiltIn(BuiltInType),
    Array {
        elem: Box<Type>,
        size: ArraySize,
    },
    /// A message type referenced by full (`pkg/Type`) or short name.
    Complex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

/// Specification of one message type: its fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    pub name: String,
    pub fields: Vec<Field>,
}

/// A parsed schema: the main message type plus the dependent types its
/// fields reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    pub spec: MessageSpec,
    pub dependencies: Vec<MessageSpec>,
}

impl MessageSchema {
    pub fn parse(name: &str, input: &str) -> anyhow::Result<Self> {
        let mut sections = split_sections(input);
        if sections.is_empty() {
            bail!("empty message definition");
        }

        let (_, main_body) = sections.remove(0);
        let spec = MessageSpec::parse(name, &main_body)
            .with_context(|| format!("failed to parse message spec `{name}`"))?;

        let mut dependencies = Vec::new();
        for (dep_name, dep_body) in sections {
            let dep_name =
                dep_name.context("dependent message definition is missing its `MSG:` header")?;
            let dep = MessageSpec::parse(&dep_name, &dep_body)
                .with_context(|| format!("failed to parse dependent message spec `{dep_name}`"))?;
            dependencies.push(dep);
        }

        Ok(Self { spec, dependencies })
    }
}

impl MessageSpec {
    fn parse(name: &str, body: &str) -> anyhow::Result<Self> {
        let mut fields = Vec::new();
        for line in body.lines() {
            if let Some(field) = parse_field_line(line)
                .with_context(|| format!("bad field declaration {line:?}"))?
            {
                fields.push(field);
            }
        }
        Ok(Self {
            name: name.to_owned(),
            fields,
        })
    }
}

/// Resolves complex type references against the parsed dependencies,
/// by full name first and bare name second (matching how recorded
/// definitions reference their siblings).
pub struct TypeResolver<'a> {
    by_full_name: HashMap<&'a str, &'a MessageSpec>,
    by_short_name: HashMap<&'a str, &'a MessageSpec>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(schema: &'a MessageSchema) -> Self {
        let mut by_full_name = HashMap::new();
        let mut by_short_name = HashMap::new();
        for spec in &schema.dependencies {
            by_full_name.insert(spec.name.as_str(), spec);
            if let Some((_, short)) = spec.name.rsplit_once('/') {
                by_short_name.insert(short, spec);
            } else {
                by_short_name.insert(spec.name.as_str(), spec);
            }
        }
        Self {
            by_full_name,
            by_short_name,
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&'a MessageSpec> {
        if let Some(spec) = self.by_full_name.get(name) {
            return Some(spec);
        }
        // "pkg/msg/Type" and "pkg/Type" are used interchangeably in
        // recorded ROS2 definitions.
        let collapsed = collapse_msg_infix(name);
        if let Some(spec) = self.by_full_name.get(collapsed.as_str()) {
            return Some(spec);
        }
        let short = name.rsplit_once('/').map_or(name, |(_, s)| s);
        self.by_short_name.get(short).copied()
    }
}

fn collapse_msg_infix(name: &str) -> String {
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        [pkg, "msg", ty] => format!("{pkg}/{ty}"),
        _ => name.to_owned(),
    }
}

/// A line of at least 3 `=` characters separates concatenated message
/// definitions.
fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '=')
}

/// Splits a concatenated definition into `(name, body)` sections. The
/// first section (the main type) has no `MSG:` header.
fn split_sections(input: &str) -> Vec<(Option<String>, String)> {
    let mut sections = Vec::new();
    let mut name: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();
    let mut first_line_of_section = true;

    for line in input.lines() {
        if is_separator(line) {
            sections.push((name.take(), body.join("\n")));
            body.clear();
            first_line_of_section = true;
            continue;
        }
        if first_line_of_section {
            if line.trim().is_empty() {
                continue;
            }
            first_line_of_section = false;
            if let Some(header) = line.trim().strip_prefix("MSG: ") {
                name = Some(collapse_msg_infix(header.trim()));
                continue;
            }
        }
        body.push(line);
    }
    sections.push((name, body.join("\n")));
    sections
}

/// Parses one declaration line into a field, or `None` for blank
/// lines, comments, and constants.
fn parse_field_line(line: &str) -> anyhow::Result<Option<Field>> {
    let line = match line.split_once('#') {
        Some((head, _comment)) => head,
        None => line,
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (type_token, rest) = line
        .split_once(char::is_whitespace)
        .context("missing field name")?;
    let rest = rest.trim_start();

    // Constants (`int32 FOO=1` / `int32 FOO = 1`) are skipped; the
    // name always ends at whitespace or `=`.
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    if name.is_empty() {
        bail!("missing field name");
    }
    if rest[name_end..].trim_start().starts_with('=') {
        return Ok(None);
    }
    // Anything else after the name is a ROS2 default value; irrelevant
    // for decoding.

    Ok(Some(Field {
        name: name.to_owned(),
        ty: parse_type(type_token)?,
    }))
}

fn parse_type(token: &str) -> anyhow::Result<Type> {
    if let Some((base, bracketed)) = token.split_once('[') {
        let inside = bracketed
            .strip_suffix(']')
            .with_context(|| format!("unterminated array suffix in {token:?}"))?;
        let size = if inside.is_empty() {
            ArraySize::Unbounded
        } else if let Some(bound) = inside.strip_prefix("<=") {
            ArraySize::Bounded(bound.parse().context("bad array bound")?)
        } else {
            ArraySize::Fixed(inside.parse().context("bad array length")?)
        };
        return Ok(Type::Array {
            elem: Box::new(parse_base_type(base)?),
            size,
        });
    }
    parse_base_type(token)
}

fn parse_base_type(token: &str) -> anyhow::Result<Type> {
    use BuiltInType as B;

    // Bounded strings (`string<=10`) decode like unbounded ones.
    let (token, _bound) = match token.split_once("<=") {
        Some((head, bound)) => (head, Some(bound)),
        None => (token, None),
    };

    let built_in = match token {
        "bool" => Some(B::Bool),
        "byte" => Some(B::Byte),
        "char" => Some(B::Char),
        "int8" => Some(B::Int8),
        "uint8" | "octet" => Some(B::UInt8),
        "int16" => Some(B::Int16),
        "uint16" => Some(B::UInt16),
        "int32" => Some(B::Int32),
        "uint32" => Some(B::UInt32),
        "int64" => Some(B::Int64),
        "uint64" => Some(B::UInt64),
        "float32" => Some(B::Float32),
        "float64" => Some(B::Float64),
        "string" | "wstring" => Some(B::String),
        "time" => Some(B::Time),
        "duration" => Some(B::Duration),
        _ => None,
    };

    Ok(match built_in {
        Some(b) => Type::BuiltIn(b),
        // ROS1 shorthand for std_msgs/Header.
        None if token == "Header" => Type::Complex("std_msgs/Header".to_owned()),
        None => Type::Complex(collapse_msg_infix(token)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_definition() {
        let schema = MessageSchema::parse("std_msgs/String", "string data\n").unwrap();
        assert_eq!(schema.spec.fields.len(), 1);
        assert_eq!(schema.spec.fields[0].name, "data");
        assert_eq!(schema.spec.fields[0].ty, Type::BuiltIn(BuiltInType::String));
        assert!(schema.dependencies.is_empty());
    }

    #[test]
    fn skips_comments_and_constants() {
        let body = "\
# a mood message
uint8 HAPPY=1
uint8 SAD = 2
uint8 state   # current mood
float64[3] confidence
";
        let schema = MessageSchema::parse("fleet_msgs/Mood", body).unwrap();
        let fields = &schema.spec.fields;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "state");
        assert_eq!(
            fields[1].ty,
            Type::Array {
                elem: Box::new(Type::BuiltIn(BuiltInType::Float64)),
                size: ArraySize::Fixed(3),
            }
        );
    }

    #[test]
    fn parses_concatenated_dependencies() {
        let body = "\
geometry_msgs/Point position
================================================================================
MSG: geometry_msgs/Point
float64 x
float64 y
float64 z
";
        let schema = MessageSchema::parse("fleet_msgs/Pose", body).unwrap();
        assert_eq!(schema.dependencies.len(), 1);
        assert_eq!(schema.dependencies[0].name, "geometry_msgs/Point");
        assert_eq!(schema.dependencies[0].fields.len(), 3);

        let resolver = TypeResolver::new(&schema);
        assert!(resolver.resolve("geometry_msgs/Point").is_some());
        assert!(resolver.resolve("Point").is_some());
        assert!(resolver.resolve("geometry_msgs/msg/Point").is_some());
        assert!(resolver.resolve("geometry_msgs/Quaternion").is_none());
    }

    #[test]
    fn parses_bounded_and_unbounded_arrays() {
        let body = "string<=32 name\nint32[] values\nuint8[<=16] blob\n";
        let schema = MessageSchema::parse("fleet_msgs/Sample", body).unwrap();
        let fields = &schema.spec.fields;
        assert_eq!(fields[0].ty, Type::BuiltIn(BuiltInType::String));
        assert_eq!(
            fields[1].ty,
            Type::Array {
                elem: Box::new(Type::BuiltIn(BuiltInType::Int32)),
                size: ArraySize::Unbounded,
            }
        );
        assert_eq!(
            fields[2].ty,
            Type::Array {
                elem: Box::new(Type::BuiltIn(BuiltInType::UInt8)),
                size: ArraySize::Bounded(16),
            }
        );
    }

    #[test]
    fn header_shorthand_resolves_to_std_msgs() {
        let schema = MessageSchema::parse("fleet_msgs/Scan", "Header header\n").unwrap();
        assert_eq!(
            schema.spec.fields[0].ty,
            Type::Complex("std_msgs/Header".to_owned())
        );
    }
}
