use crate::host::ProgressLookup;
use crate::types::Entry;
use serde_json::Value;

/// Comparison applied by one clause
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Eq(String),
    Neq(String),
    StartsWith(String),
    EndsWith(String),
    In(Vec<String>),
}

/// One parsed filter clause, e.g. `type=kanji` or `jlpt.in[N5,N4]`
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub field: String,
    pub op: Op,
}

/// What a clause needs besides the entry itself
pub struct FilterContext<'a> {
    pub progress: Option<&'a dyn ProgressLookup>,
    /// Field prefix routed to the progress lookup
    pub progress_prefix: &'a str,
    /// Fields tried in order to derive the study key
    pub identity_keys: &'a [String],
}

/// `field.method[args]` with the closing bracket at the very end. A field
/// containing `=` means the method text belongs to a comparison value.
fn bracketed<'a>(input: &'a str, method: &str) -> Option<(&'a str, &'a str)> {
    let at = input.find(method)?;
    let field = input[..at].trim();
    if field.is_empty() || field.contains('=') {
        return None;
    }
    let args = input[at + method.len()..].strip_suffix(']')?;
    Some((field, args))
}

impl Clause {
    /// Parse one clause; `None` when malformed
    pub fn parse(input: &str) -> Option<Clause> {
        let input = input.trim();
        let clause = |field: &str, op: Op| {
            Some(Clause {
                field: field.to_string(),
                op,
            })
        };

        if let Some((field, arg)) = bracketed(input, ".startsWith[") {
            return clause(field, Op::StartsWith(arg.to_string()));
        }
        if let Some((field, arg)) = bracketed(input, ".endsWith[") {
            return clause(field, Op::EndsWith(arg.to_string()));
        }
        if let Some((field, args)) = bracketed(input, ".in[") {
            let values = args.split(',').map(|v| v.trim().to_string()).collect();
            return clause(field, Op::In(values));
        }
        if let Some((field, value)) = input.split_once("!=") {
            let field = field.trim();
            if field.is_empty() {
                return None;
            }
            return clause(field, Op::Neq(value.trim().to_string()));
        }
        if let Some((field, value)) = input.split_once('=') {
            let field = field.trim();
            if field.is_empty() {
                return None;
            }
            return clause(field, Op::Eq(value.trim().to_string()));
        }
        None
    }

    /// Whether `entry` satisfies the clause. Never fails: anything that
    /// cannot be evaluated is a non-match.
    pub fn matches(&self, entry: &Entry, ctx: &FilterContext<'_>) -> bool {
        if let Some(field) = self.field.strip_prefix(ctx.progress_prefix) {
            let record = entry
                .study_key(ctx.identity_keys)
                .and_then(|key| ctx.progress?.lookup_progress(key));
            return match record {
                // only an inequality against a real value holds without a record
                None => matches!(&self.op, Op::Neq(v) if !v.is_empty()),
                Some(record) => self.op.test(record.get(field).unwrap_or(&Value::Null), true),
            };
        }
        self.op
            .test(entry.fields.get(&self.field).unwrap_or(&Value::Null), false)
    }
}

impl Op {
    /// Arrays match when any element does (`Neq`: when no element is equal)
    fn test(&self, actual: &Value, typed: bool) -> bool {
        match actual {
            Value::Array(items) => match self {
                Op::Neq(_) => items.iter().all(|item| self.test_scalar(item, typed)),
                _ => items.iter().any(|item| self.test_scalar(item, typed)),
            },
            _ => self.test_scalar(actual, typed),
        }
    }

    fn test_scalar(&self, actual: &Value, typed: bool) -> bool {
        match self {
            Op::Eq(expected) => equals(actual, expected, typed),
            Op::Neq(expected) => !equals(actual, expected, typed),
            Op::StartsWith(prefix) => as_text(actual).starts_with(prefix.as_str()),
            Op::EndsWith(suffix) => as_text(actual).ends_with(suffix.as_str()),
            Op::In(options) => options.iter().any(|o| equals(actual, o, typed)),
        }
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Progress values compare numbers and booleans by parsed value
fn equals(actual: &Value, expected: &str, typed: bool) -> bool {
    if typed {
        match actual {
            Value::Number(n) => {
                return match (n.as_f64(), expected.trim().parse::<f64>()) {
                    (Some(a), Ok(e)) => a == e,
                    _ => false,
                }
            }
            Value::Bool(b) => return expected.trim().parse::<bool>().is_ok_and(|e| e == *b),
            _ => {}
        }
    }
    as_text(actual) == expected
}

/// Parsed filter list; every clause must hold (logical AND)
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// `None` marks a malformed clause, which no entry satisfies
    clauses: Vec<Option<Clause>>,
}

impl Filter {
    pub fn parse<S: AsRef<str>>(clauses: &[S]) -> Self {
        let clauses = clauses
            .iter()
            .map(|raw| {
                let parsed = Clause::parse(raw.as_ref());
                if parsed.is_none() {
                    log::warn!("malformed filter clause '{}'", raw.as_ref());
                }
                parsed
            })
            .collect();
        Filter { clauses }
    }

    pub fn matches(&self, entry: &Entry, ctx: &FilterContext<'_>) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.as_ref().is_some_and(|c| c.matches(entry, ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> Entry {
        serde_json::from_value(value).unwrap()
    }

    fn keys() -> Vec<String> {
        vec!["kanji".to_string(), "word".to_string()]
    }

    fn progress(key: &str) -> Option<Value> {
        match key {
            "火" => Some(json!({"state": "learned", "reviews": 3, "starred": true})),
            "水" => Some(json!({"state": "learning", "reviews": 0})),
            _ => None,
        }
    }

    fn check(clauses: &[&str], e: &Entry) -> bool {
        let keys = keys();
        let ctx = FilterContext {
            progress: Some(&progress as &dyn ProgressLookup),
            progress_prefix: "kanji_progress.",
            identity_keys: &keys,
        };
        Filter::parse(clauses).matches(e, &ctx)
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            Clause::parse("type=kanji"),
            Some(Clause {
                field: "type".into(),
                op: Op::Eq("kanji".into())
            })
        );
        assert_eq!(
            Clause::parse("kanji_progress.state!=learned").unwrap().op,
            Op::Neq("learned".into())
        );
        assert_eq!(
            Clause::parse("jlpt.in[N5, N4]").unwrap().op,
            Op::In(vec!["N5".into(), "N4".into()])
        );
        assert_eq!(
            Clause::parse("reading.startsWith[か]").unwrap().op,
            Op::StartsWith("か".into())
        );
        assert_eq!(
            Clause::parse("reading.endsWith[=]").unwrap().op,
            Op::EndsWith("=".into())
        );
        assert_eq!(Clause::parse("garbage"), None);
        assert_eq!(Clause::parse("=x"), None);
        assert_eq!(Clause::parse("a.in[x"), None);
    }

    #[test]
    fn test_method_text_inside_value() {
        assert_eq!(
            Clause::parse("note=see.in[x]"),
            Some(Clause {
                field: "note".into(),
                op: Op::Eq("see.in[x]".into())
            })
        );
        assert_eq!(
            Clause::parse("note!=a.startsWith[b]").unwrap().op,
            Op::Neq("a.startsWith[b]".into())
        );
        assert!(check(&["note=see.in[x]"], &entry(json!({"note": "see.in[x]"}))));
    }

    #[test]
    fn test_type_and_progress_state() {
        let filters = ["type=kanji", "kanji_progress.state!=learned"];
        assert!(!check(&filters, &entry(json!({"kanji": "火", "type": "kanji"}))));
        assert!(check(&filters, &entry(json!({"kanji": "水", "type": "kanji"}))));
        // no progress record passes the inequality
        assert!(check(&filters, &entry(json!({"kanji": "木", "type": "kanji"}))));
        assert!(!check(&filters, &entry(json!({"kanji": "木", "type": "Kanji"}))));
        assert!(!check(&filters, &entry(json!({"kanji": "木"}))));
    }

    #[test]
    fn test_missing_progress_fails_other_ops() {
        let e = entry(json!({"kanji": "木"}));
        assert!(!check(&["kanji_progress.state=new"], &e));
        assert!(!check(&["kanji_progress.state.startsWith[n]"], &e));
        assert!(!check(&["kanji_progress.state.in[new,learning]"], &e));
        assert!(!check(&["kanji_progress.state!="], &e));
    }

    #[test]
    fn test_typed_progress_values() {
        let e = entry(json!({"kanji": "火"}));
        assert!(check(&["kanji_progress.reviews=3.0"], &e));
        assert!(check(&["kanji_progress.starred=true"], &e));
        assert!(!check(&["kanji_progress.reviews=three"], &e));
        assert!(check(&["kanji_progress.reviews.in[1,3]"], &e));
    }

    #[test]
    fn test_entry_fields_compare_as_text() {
        let e = entry(json!({"kanji": "火", "strokes": 4, "tags": ["n5", "nature"]}));
        assert!(check(&["strokes=4"], &e));
        assert!(!check(&["strokes=4.0"], &e));
        assert!(check(&["tags=nature"], &e));
        assert!(check(&["tags!=verb"], &e));
        assert!(!check(&["tags!=n5"], &e));
        assert!(check(&["kanji.endsWith[火]"], &e));
    }

    #[test]
    fn test_malformed_clause_excludes() {
        let e = entry(json!({"kanji": "火", "type": "kanji"}));
        assert!(!check(&["type=kanji", "nonsense"], &e));
    }
}
