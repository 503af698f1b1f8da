//! Restricted template engine
//!
//! Renders `{{expr}}` blocks inside arbitrary JSON values. Supported
//! expressions:
//!
//! - `args.<path>` - call argument lookup, dotted paths walk nested objects
//! - `now` - current UTC time, RFC 3339
//! - `timestamp` - current Unix time in milliseconds
//! - `uuid()` - random v4 UUID
//! - `random_int(min,max)` - integer in `[min, max]`
//! - `random_float(min,max)` - float in `[min, max)`
//!
//! A string that is exactly one block evaluates to the expression's native
//! JSON value. Blocks embedded in longer strings are stringified in place.
//! `credential.<KEY>` blocks are never evaluated here; they are left verbatim
//! for the HTTP handler to resolve against the server's credentials.
//!
//! In lenient mode (the default) an unrecognized expression renders as its
//! own literal text. Strict mode turns it into [`TemplateError::UnknownExpression`].

use rand::Rng;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Template rendering failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated '{{{{' at byte {0}")]
    Unterminated(usize),

    #[error("invalid arguments to {function}: {reason}")]
    InvalidArguments {
        function: &'static str,
        reason: String,
    },

    #[error("{function} requires min <= max (got {min}, {max})")]
    InvalidRange {
        function: &'static str,
        min: String,
        max: String,
    },

    #[error("unknown expression '{0}'")]
    UnknownExpression(String),
}

type Result<T> = std::result::Result<T, TemplateError>;

/// Outcome of evaluating a single expression
#[derive(Debug, Clone, PartialEq)]
enum Evaluated {
    Value(Value),
    /// Leave the block exactly as written
    Literal,
}

static ARGS_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^args\.([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)$").expect("valid regex")
});

static RANDOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(random_int|random_float)\(\s*([^,()]*?)\s*,\s*([^,()]*?)\s*\)$")
        .expect("valid regex")
});

/// Expression evaluator shared by the mock and HTTP handler strategies
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine {
    strict: bool,
}

impl TemplateEngine {
    /// Unknown expressions pass through as literal text
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    /// Unknown expressions are errors
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Recursively render a template value against call arguments.
    ///
    /// Object keys are left untouched; only values are rendered.
    pub fn render(&self, template: &Value, args: &Value) -> Result<Value> {
        match template {
            Value::String(s) => self.render_str(s, args),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render(item, args))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.render(value, args)?);
                }
                Ok(Value::Object(out))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    /// Render a single string.
    ///
    /// Returns the native value when the whole string is one block.
    pub fn render_str(&self, input: &str, args: &Value) -> Result<Value> {
        if let Some(expr) = whole_block(input) {
            return Ok(match self.evaluate(expr, args)? {
                Evaluated::Value(value) => value,
                Evaluated::Literal => Value::String(input.to_string()),
            });
        }
        self.interpolate(input, args).map(Value::String)
    }

    /// Render a string and always return text
    pub fn render_text(&self, input: &str, args: &Value) -> Result<String> {
        Ok(stringify(&self.render_str(input, args)?))
    }

    fn interpolate(&self, input: &str, args: &Value) -> Result<String> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or(TemplateError::Unterminated(offset + start))?;
            let raw = &after_open[..end];
            let block_len = OPEN.len() + end + CLOSE.len();

            match self.evaluate(raw.trim(), args)? {
                Evaluated::Value(value) => out.push_str(&stringify(&value)),
                Evaluated::Literal => out.push_str(&rest[start..start + block_len]),
            }

            offset += start + block_len;
            rest = &rest[start + block_len..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn evaluate(&self, expr: &str, args: &Value) -> Result<Evaluated> {
        match expr {
            "now" => {
                return Ok(Evaluated::Value(Value::String(
                    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                )));
            }
            "timestamp" => {
                return Ok(Evaluated::Value(Value::from(
                    chrono::Utc::now().timestamp_millis(),
                )));
            }
            "uuid()" => {
                return Ok(Evaluated::Value(Value::String(
                    uuid::Uuid::new_v4().to_string(),
                )));
            }
            "args" => return Ok(Evaluated::Value(args.clone())),
            _ => {}
        }

        if expr.starts_with("credential.") {
            return Ok(Evaluated::Literal);
        }

        if let Some(caps) = ARGS_PATH_RE.captures(expr) {
            let value = caps[1]
                .split('.')
                .try_fold(args, |current, key| current.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            return Ok(Evaluated::Value(value));
        }

        if let Some(caps) = RANDOM_RE.captures(expr) {
            let value = match &caps[1] {
                "random_int" => random_int(&caps[2], &caps[3])?,
                _ => random_float(&caps[2], &caps[3])?,
            };
            return Ok(Evaluated::Value(value));
        }

        if self.strict {
            return Err(TemplateError::UnknownExpression(expr.to_string()));
        }
        tracing::debug!(expr, "unrecognized template expression left verbatim");
        Ok(Evaluated::Literal)
    }
}

/// Inner expression when `input` is exactly one `{{...}}` block
fn whole_block(input: &str) -> Option<&str> {
    let inner = input.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner.trim())
}

/// Text form used when a value is embedded in a larger string
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn random_int(min: &str, max: &str) -> Result<Value> {
    let parse = |s: &str| {
        s.parse::<i64>().map_err(|e| TemplateError::InvalidArguments {
            function: "random_int",
            reason: format!("'{}': {}", s, e),
        })
    };
    let (lo, hi) = (parse(min)?, parse(max)?);
    if lo > hi {
        return Err(TemplateError::InvalidRange {
            function: "random_int",
            min: lo.to_string(),
            max: hi.to_string(),
        });
    }
    Ok(Value::from(rand::thread_rng().gen_range(lo..=hi)))
}

fn random_float(min: &str, max: &str) -> Result<Value> {
    let parse = |s: &str| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| TemplateError::InvalidArguments {
                function: "random_float",
                reason: format!("'{}' is not a finite number", s),
            })
    };
    let (lo, hi) = (parse(min)?, parse(max)?);
    if lo > hi {
        return Err(TemplateError::InvalidRange {
            function: "random_float",
            min: lo.to_string(),
            max: hi.to_string(),
        });
    }
    let sampled = if lo == hi {
        lo
    } else {
        rand::thread_rng().gen_range(lo..hi)
    };
    Number::from_f64(sampled)
        .map(Value::Number)
        .ok_or_else(|| TemplateError::InvalidArguments {
            function: "random_float",
            reason: "result is not representable".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> TemplateEngine {
        TemplateEngine::lenient()
    }

    #[test]
    fn whole_block_preserves_native_type() {
        let args = json!({ "count": 3, "flags": [true, false] });
        assert_eq!(engine().render(&json!("{{args.count}}"), &args).unwrap(), json!(3));
        assert_eq!(
            engine().render(&json!("{{ args.flags }}"), &args).unwrap(),
            json!([true, false])
        );
    }

    #[test]
    fn embedded_blocks_are_stringified() {
        let args = json!({ "name": "Ada", "n": 2, "obj": { "a": 1 } });
        let out = engine()
            .render(&json!("hi {{args.name}} x{{args.n}} {{args.obj}}"), &args)
            .unwrap();
        assert_eq!(out, json!("hi Ada x2 {\"a\":1}"));
    }

    #[test]
    fn nested_paths_and_missing_args() {
        let args = json!({ "user": { "address": { "city": "Oslo" } } });
        assert_eq!(
            engine().render(&json!("{{args.user.address.city}}"), &args).unwrap(),
            json!("Oslo")
        );
        assert_eq!(engine().render(&json!("{{args.nope}}"), &args).unwrap(), Value::Null);
        assert_eq!(
            engine().render(&json!("[{{args.nope}}]"), &args).unwrap(),
            json!("[]")
        );
    }

    #[test]
    fn scenario_uuid_and_echo() {
        let template = json!({ "id": "{{uuid()}}", "echo": "{{args.text}}" });
        let out = engine().render(&template, &json!({ "text": "hi" })).unwrap();

        assert_eq!(out["echo"], json!("hi"));
        let id = out["id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok(), "not a uuid: {}", id);
    }

    #[test]
    fn rendering_without_random_expressions_is_idempotent() {
        let template = json!({
            "greeting": "Hello {{args.name}}",
            "items": ["{{args.n}}", 4, null, { "deep": "{{args.name}}!" }],
            "raw": "{{mystery}}"
        });
        let args = json!({ "name": "Lin", "n": 7 });
        let first = engine().render(&template, &args).unwrap();
        let second = engine().render(&template, &args).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn random_int_stays_in_inclusive_range() {
        for (lo, hi) in [(0i64, 0i64), (1, 6), (-5, 5), (-10, -3), (100, 101)] {
            for _ in 0..200 {
                let expr = format!("{{{{random_int({}, {})}}}}", lo, hi);
                let v = engine().render(&json!(expr), &json!({})).unwrap();
                let n = v.as_i64().unwrap();
                assert!((lo..=hi).contains(&n), "{} not in [{}, {}]", n, lo, hi);
            }
        }
    }

    #[test]
    fn random_float_stays_in_range() {
        for _ in 0..200 {
            let v = engine()
                .render(&json!("{{random_float(0.5, 1.5)}}"), &json!({}))
                .unwrap();
            let f = v.as_f64().unwrap();
            assert!((0.5..1.5).contains(&f));
        }
    }

    #[test]
    fn random_with_inverted_range_fails() {
        let err = engine()
            .render(&json!("{{random_int(5, 1)}}"), &json!({}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidRange { .. }));
    }

    #[test]
    fn time_helpers() {
        let v = engine().render(&json!("{{timestamp}}"), &json!({})).unwrap();
        assert!(v.as_i64().unwrap() > 1_600_000_000_000);

        let v = engine().render(&json!("{{now}}"), &json!({})).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(v.as_str().unwrap()).is_ok());
    }

    #[test]
    fn unknown_expression_lenient_vs_strict() {
        let template = json!("value: {{process.exit(1)}}");
        assert_eq!(engine().render(&template, &json!({})).unwrap(), template);
        assert_eq!(
            engine().render(&json!("{{nope}}"), &json!({})).unwrap(),
            json!("{{nope}}")
        );

        let err = TemplateEngine::strict()
            .render(&template, &json!({}))
            .unwrap_err();
        assert_eq!(err, TemplateError::UnknownExpression("process.exit(1)".into()));
    }

    #[test]
    fn credential_references_survive_strict_mode() {
        let out = TemplateEngine::strict()
            .render(&json!("Bearer {{credential.TOKEN}}"), &json!({}))
            .unwrap();
        assert_eq!(out, json!("Bearer {{credential.TOKEN}}"));
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let err = engine().render(&json!("oops {{args.x"), &json!({})).unwrap_err();
        assert_eq!(err, TemplateError::Unterminated(5));
    }

    #[test]
    fn non_string_scalars_pass_through() {
        let template = json!({ "n": 1.5, "b": true, "z": null });
        assert_eq!(engine().render(&template, &json!({})).unwrap(), template);
    }
}
