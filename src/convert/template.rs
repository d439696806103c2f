//! convert::template
//!
//! Reference conversion engine.
//!
//! # Template language
//!
//! A template is JSON text with two kinds of tags:
//!
//! - `{{> name}}` includes another template, resolved through the request's
//!   [`TemplateResolver`]. Includes nest up to the request's depth limit and
//!   may not form a cycle.
//! - `{{SEG-F}}`, `{{SEG-F.C}}`, `{{SEG-F.C.S}}` substitute a message value.
//!   `{{OBX[2]-5}}` selects the second `OBX`. A trailing `| map:Table` passes
//!   the value through a replacement table. Substituted values are escaped as
//!   JSON string content, so placeholders belong inside string literals.
//!
//! After substitution the text must parse as JSON. Empty strings, objects and
//! arrays are pruned from the result, so unmapped optional fields vanish.
//!
//! # Example
//!
//! ```text
//! {
//!   "resourceType": "Patient",
//!   "gender": "{{PID-8 | map:Gender}}",
//!   "name": [{ "family": "{{PID-5.1}}", "given": ["{{PID-5.2}}"] }],
//!   "managingOrganization": {{> partials/Organization.json}}
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;

use super::hl7::{Locator, Lookup, Message};
use super::{
    ConversionEngine, ConversionError, ConversionOutput, ConversionRequest, EngineFactory,
    TemplateResolver,
};

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{>\s*([^\s{}]+)\s*\}\}").expect("include pattern is valid")
});

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\{\{\s*([A-Z][A-Z0-9]{2})(?:\[(\d+)\])?-(\d+)(?:\.(\d+))?(?:\.(\d+))?\s*(?:\|\s*map:\s*([A-Za-z0-9_\-]+)\s*)?\}\}",
    )
    .expect("placeholder pattern is valid")
});

/// Compiled templates kept per engine before the cache is reset.
const COMPILED_CACHE_LIMIT: usize = 128;

#[derive(Debug)]
struct Placeholder {
    locator: Locator,
    table: Option<String>,
    label: String,
}

#[derive(Debug)]
enum Piece {
    Literal(String),
    Slot(Placeholder),
}

#[derive(Debug)]
struct Compiled {
    pieces: Vec<Piece>,
}

/// The reference engine.
#[derive(Debug, Default)]
pub struct TemplateEngine {
    compiled: HashMap<String, Arc<Compiled>>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&mut self, expanded: &str) -> Result<Arc<Compiled>, ConversionError> {
        if let Some(compiled) = self.compiled.get(expanded) {
            return Ok(Arc::clone(compiled));
        }

        let compiled = Arc::new(compile(expanded)?);
        if self.compiled.len() >= COMPILED_CACHE_LIMIT {
            self.compiled.clear();
        }
        self.compiled
            .insert(expanded.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl ConversionEngine for TemplateEngine {
    fn convert(
        &mut self,
        request: &ConversionRequest<'_>,
    ) -> Result<ConversionOutput, ConversionError> {
        let message =
            Message::parse(request.message).map_err(|e| ConversionError::InvalidMessage {
                message: e.to_string(),
            })?;

        let mut stack = Vec::new();
        let expanded = expand(
            request.template,
            request.resolver,
            request.max_include_depth,
            &mut stack,
        )?;
        let compiled = self.compile(&expanded)?;

        let mut used = vec![false; message.segments().len()];
        let mut invalid_access: Vec<String> = Vec::new();
        let mut rendered = String::with_capacity(expanded.len());

        for piece in &compiled.pieces {
            match piece {
                Piece::Literal(text) => rendered.push_str(text),
                Piece::Slot(placeholder) => match message.lookup(&placeholder.locator) {
                    Lookup::Value {
                        segment_index,
                        value,
                    } => {
                        used[segment_index] = true;
                        let mapped = apply_map(
                            value,
                            placeholder.table.as_deref(),
                            request.replacement_table,
                        );
                        rendered.push_str(&escape_json(&mapped));
                    }
                    Lookup::MissingSegment => {
                        if !invalid_access.contains(&placeholder.label) {
                            invalid_access.push(placeholder.label.clone());
                        }
                    }
                },
            }
        }

        let parsed: Value =
            serde_json::from_str(&rendered).map_err(|e| ConversionError::Template {
                message: format!("rendered template is not valid JSON: {}", e),
            })?;
        let document = prune(parsed).unwrap_or_else(|| Value::Object(Default::default()));

        Ok(ConversionOutput {
            document,
            unused_segments: unused_segments(&message, &used),
            invalid_access,
        })
    }

    fn invalidate(&mut self) {
        self.compiled.clear();
    }
}

/// Factory for [`TemplateEngine`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateEngineFactory;

impl EngineFactory for TemplateEngineFactory {
    fn create(&self) -> Box<dyn ConversionEngine> {
        Box::new(TemplateEngine::new())
    }
}

fn expand(
    text: &str,
    resolver: &dyn TemplateResolver,
    max_depth: usize,
    stack: &mut Vec<String>,
) -> Result<String, ConversionError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in INCLUDE_RE.captures_iter(text) {
        let (whole, name) = match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(name)) => (whole, name.as_str()),
            _ => continue,
        };
        out.push_str(&text[last..whole.start()]);

        if stack.iter().any(|n| n == name) {
            return Err(ConversionError::Template {
                message: format!("include cycle: {} -> {}", stack.join(" -> "), name),
            });
        }
        if stack.len() >= max_depth {
            return Err(ConversionError::Template {
                message: format!("includes nested deeper than {} levels at '{}'", max_depth, name),
            });
        }
        let body = resolver
            .resolve(name)
            .ok_or_else(|| ConversionError::Template {
                message: format!("included template '{}' not found", name),
            })?;

        stack.push(name.to_string());
        out.push_str(&expand(&body, resolver, max_depth, stack)?);
        stack.pop();

        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

fn compile(text: &str) -> Result<Compiled, ConversionError> {
    let mut pieces = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let whole = match caps.get(0) {
            Some(whole) => whole,
            None => continue,
        };
        if whole.start() > last {
            pieces.push(Piece::Literal(text[last..whole.start()].to_string()));
        }

        let number = |i: usize| -> Result<Option<usize>, ConversionError> {
            caps.get(i)
                .map(|m| {
                    m.as_str().parse::<usize>().map_err(|_| ConversionError::Template {
                        message: format!("number out of range in '{}'", whole.as_str()),
                    })
                })
                .transpose()
        };

        let segment = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let occurrence = number(2)?.unwrap_or(1);
        let field = number(3)?.unwrap_or(0);
        let component = number(4)?;
        let subcomponent = number(5)?;
        if occurrence == 0 || field == 0 || component == Some(0) || subcomponent == Some(0) {
            return Err(ConversionError::Template {
                message: format!("positions are 1-based in '{}'", whole.as_str()),
            });
        }

        let mut label = format!("{}-{}", segment, field);
        if occurrence > 1 {
            label = format!("{}[{}]-{}", segment, occurrence, field);
        }
        for part in [component, subcomponent].into_iter().flatten() {
            label.push_str(&format!(".{}", part));
        }

        pieces.push(Piece::Slot(Placeholder {
            locator: Locator {
                segment: segment.to_string(),
                occurrence,
                field,
                component,
                subcomponent,
            },
            table: caps.get(6).map(|m| m.as_str().to_string()),
            label,
        }));
        last = whole.end();
    }

    if last < text.len() {
        pieces.push(Piece::Literal(text[last..].to_string()));
    }
    Ok(Compiled { pieces })
}

fn apply_map(value: String, table: Option<&str>, tables: Option<&Value>) -> String {
    let mapped = table
        .zip(tables)
        .and_then(|(table, tables)| tables.get(table))
        .and_then(|table| table.get(&value));

    match mapped {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => value,
        Some(other) => other.to_string(),
    }
}

fn escape_json(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Remove empty strings, objects and arrays, bottom-up.
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().filter_map(prune).collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        Value::Object(map) => {
            let map: serde_json::Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        other => Some(other),
    }
}

fn unused_segments(message: &Message, used: &[bool]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut unused = Vec::new();
    for (segment, used) in message.segments().iter().zip(used) {
        let occurrence = seen.entry(segment.id.as_str()).or_insert(0);
        *occurrence += 1;
        if !used {
            if *occurrence == 1 {
                unused.push(segment.id.clone());
            } else {
                unused.push(format!("{}[{}]", segment.id, occurrence));
            }
        }
    }
    unused
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MESSAGE: &str = "MSH|^~\\&|SENDER|FAC|RECV|DEST|20240101120000||ADT^A01|MSG001|P|2.5\r\
        EVN|A01|20240101120000\r\
        PID|1||12345^^^HOSP^MR||Doe^John||19800101|M\r\
        OBX|1|ST|HT||180\r\
        OBX|2|ST|WT||\"75\"";

    #[derive(Default)]
    struct Includes(HashMap<String, Arc<str>>);

    impl Includes {
        fn with(mut self, name: &str, body: &str) -> Self {
            self.0.insert(name.to_string(), Arc::from(body));
            self
        }
    }

    impl TemplateResolver for Includes {
        fn resolve(&self, name: &str) -> Option<Arc<str>> {
            self.0.get(name).cloned()
        }
    }

    fn convert_with(
        template: &str,
        includes: &Includes,
        tables: Option<&Value>,
    ) -> Result<ConversionOutput, ConversionError> {
        TemplateEngine::new().convert(&ConversionRequest {
            template,
            message: MESSAGE,
            replacement_table: tables,
            resolver: includes,
            max_include_depth: 4,
        })
    }

    fn convert(template: &str) -> Result<ConversionOutput, ConversionError> {
        convert_with(template, &Includes::default(), None)
    }

    mod placeholders {
        use super::*;

        #[test]
        fn substitutes_fields_and_components() {
            let out = convert(r#"{"id": "{{PID-3.1}}", "family": "{{PID-5.1}}", "event": "{{MSH-9.2}}"}"#)
                .unwrap();
            assert_eq!(
                out.document,
                json!({"id": "12345", "family": "Doe", "event": "A01"})
            );
        }

        #[test]
        fn selects_occurrence() {
            let out = convert(r#"{"height": "{{OBX-5}}", "weight": "{{OBX[2]-5}}"}"#).unwrap();
            assert_eq!(out.document, json!({"height": "180", "weight": "\"75\""}));
        }

        #[test]
        fn maps_through_replacement_table() {
            let tables = json!({"Gender": {"M": "male", "F": "female"}});
            let out = convert_with(
                r#"{"gender": "{{PID-8 | map:Gender}}", "raw": "{{PID-8|map:Missing}}"}"#,
                &Includes::default(),
                Some(&tables),
            )
            .unwrap();
            assert_eq!(out.document, json!({"gender": "male", "raw": "M"}));
        }

        #[test]
        fn zero_positions_rejected() {
            let err = convert(r#"{"x": "{{PID-0}}"}"#).unwrap_err();
            assert!(matches!(err, ConversionError::Template { .. }));
        }
    }

    mod diagnostics {
        use super::*;

        #[test]
        fn reports_unused_segments_and_invalid_access() {
            let out = convert(r#"{"family": "{{PID-5.1}}", "visit": "{{PV1-2}}", "again": "{{PV1-2}}"}"#)
                .unwrap();
            assert_eq!(out.unused_segments, vec!["MSH", "EVN", "OBX", "OBX[2]"]);
            assert_eq!(out.invalid_access, vec!["PV1-2"]);
            assert_eq!(out.document, json!({"family": "Doe"}));
        }
    }

    mod includes {
        use super::*;

        #[test]
        fn expands_nested_includes() {
            let includes = Includes::default()
                .with("partials/Name.json", r#"{"family": "{{PID-5.1}}", "given": {{> partials/Given.json}}}"#)
                .with("partials/Given.json", r#"["{{PID-5.2}}"]"#);
            let out = convert_with(r#"{"name": {{> partials/Name.json}}}"#, &includes, None).unwrap();
            assert_eq!(
                out.document,
                json!({"name": {"family": "Doe", "given": ["John"]}})
            );
        }

        #[test]
        fn missing_include_is_template_error() {
            let err = convert(r#"{"a": {{> nope.json}}}"#).unwrap_err();
            assert_eq!(err.status(), 400);
            assert!(err.to_string().contains("nope.json"));
        }

        #[test]
        fn cycles_are_rejected() {
            let includes = Includes::default()
                .with("a", "{{> b}}")
                .with("b", "{{> a}}");
            let err = convert_with("{{> a}}", &includes, None).unwrap_err();
            assert!(err.to_string().contains("cycle"));
        }

        #[test]
        fn depth_is_limited() {
            let includes = Includes::default()
                .with("1", "{{> 2}}")
                .with("2", "{{> 3}}")
                .with("3", "{{> 4}}")
                .with("4", "{{> 5}}")
                .with("5", "{}");
            let err = convert_with("{{> 1}}", &includes, None).unwrap_err();
            assert!(err.to_string().contains("deeper"));
        }
    }

    mod output {
        use super::*;

        #[test]
        fn prunes_empty_values() {
            let out = convert(
                r#"{"keep": "{{PID-5.1}}", "gone": "{{PID-40}}", "obj": {"x": ""}, "arr": ["", {}], "n": 0}"#,
            )
            .unwrap();
            assert_eq!(out.document, json!({"keep": "Doe", "n": 0}));
        }

        #[test]
        fn escapes_substituted_quotes() {
            let out = convert(r#"{"w": "{{OBX[2]-5}}"}"#).unwrap();
            assert_eq!(out.document["w"], "\"75\"");
        }

        #[test]
        fn invalid_json_is_template_error() {
            let err = convert(r#"{"a": {{PID-5.1}}}"#).unwrap_err();
            assert!(matches!(err, ConversionError::Template { .. }));
        }

        #[test]
        fn invalid_message_is_rejected() {
            let err = TemplateEngine::new()
                .convert(&ConversionRequest {
                    template: "{}",
                    message: "not a message",
                    replacement_table: None,
                    resolver: &Includes::default(),
                    max_include_depth: 4,
                })
                .unwrap_err();
            assert!(matches!(err, ConversionError::InvalidMessage { .. }));
        }
    }

    mod caching {
        use super::*;

        #[test]
        fn compiled_templates_are_reused_until_invalidated() {
            let mut engine = TemplateEngine::new();
            let includes = Includes::default();
            let request = ConversionRequest {
                template: r#"{"a": "{{PID-5.1}}"}"#,
                message: MESSAGE,
                replacement_table: None,
                resolver: &includes,
                max_include_depth: 4,
            };

            engine.convert(&request).unwrap();
            engine.convert(&request).unwrap();
            assert_eq!(engine.compiled.len(), 1);

            engine.invalidate();
            assert!(engine.compiled.is_empty());
        }
    }
}
