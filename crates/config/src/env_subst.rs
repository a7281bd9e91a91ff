use serde_json::Value;

/// Expand `${VAR}` placeholders in every string leaf of a parsed config tree.
///
/// Object keys are never touched. Values are inserted verbatim, so quotes and
/// backslashes in the environment survive unchanged.
pub fn expand_placeholders(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(text) => {
            if text.contains("${") {
                *text = expand_str(text, lookup);
            }
        },
        Value::Array(items) => {
            for item in items {
                expand_placeholders(item, lookup);
            }
        },
        Value::Object(map) => {
            for item in map.values_mut() {
                expand_placeholders(item, lookup);
            }
        },
        Value::Null | Value::Bool(_) | Value::Number(_) => {},
    }
}

/// Expand placeholders in one string. Unknown names and unterminated
/// placeholders are kept literally.
pub fn expand_str(text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match (!name.is_empty()).then(|| lookup(name)).flatten() {
            Some(resolved) => out.push_str(&resolved),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "SECRET" => Some("s3cret".into()),
            "ROOT" => Some(r"C:\tools\new".into()),
            _ => None,
        }
    }

    #[test]
    fn known_names_resolve_inside_text() {
        assert_eq!(expand_str("Bearer ${SECRET}!", &vars), "Bearer s3cret!");
        assert_eq!(expand_str("${ROOT}", &vars), r"C:\tools\new");
    }

    #[test]
    fn unknown_and_empty_names_stay_literal() {
        assert_eq!(expand_str("${MISSING}/x", &vars), "${MISSING}/x");
        assert_eq!(expand_str("a${}b", &vars), "a${}b");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(expand_str("token=${SECRET", &vars), "token=${SECRET");
    }

    #[test]
    fn walks_nested_leaves_but_not_keys() {
        let mut tree = json!({
            "${SECRET}": {
                "args": ["--root", "${ROOT}"],
                "port": 8080,
                "enabled": true
            }
        });
        expand_placeholders(&mut tree, &vars);
        assert_eq!(
            tree,
            json!({
                "${SECRET}": {
                    "args": ["--root", r"C:\tools\new"],
                    "port": 8080,
                    "enabled": true
                }
            })
        );
    }
}
