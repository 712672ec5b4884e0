/// SQL-flavored operator tokens and their store-native equivalents.
///
/// `like` maps to `=` because LIKE translation rewrites the value into a
/// regex beforehand; the resulting condition is a plain equality against it.
pub(crate) fn translate(op: &str) -> Option<&'static str> {
    match op {
        "=" | "like" => Some("="),
        "<>" | "!=" => Some("ne"),
        "<=" => Some("lte"),
        ">=" => Some("gte"),
        "<" => Some("lt"),
        ">" => Some("gt"),
        "in" => Some("in"),
        "not_in" => Some("nin"),
        _ => None,
    }
}

/// `elem_match` → `elemMatch`: the store names multi-word directives in
/// camelCase while the DSL accepts UPPER_SNAKE.
pub(crate) fn to_camel(op: &str) -> String {
    let mut out = String::with_capacity(op.len());
    for (i, part) in op.split('_').enumerate() {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_comparison_operators() {
        assert_eq!(translate("="), Some("="));
        assert_eq!(translate("like"), Some("="));
        assert_eq!(translate("<>"), Some("ne"));
        assert_eq!(translate("!="), Some("ne"));
        assert_eq!(translate("<="), Some("lte"));
        assert_eq!(translate(">="), Some("gte"));
        assert_eq!(translate("<"), Some("lt"));
        assert_eq!(translate(">"), Some("gt"));
        assert_eq!(translate("in"), Some("in"));
        assert_eq!(translate("not_in"), Some("nin"));
    }

    #[test]
    fn unknown_operator_is_not_translated() {
        assert_eq!(translate("exists"), None);
        assert_eq!(translate("elem_match"), None);
    }

    #[test]
    fn snake_to_camel() {
        assert_eq!(to_camel("elem_match"), "elemMatch");
        assert_eq!(to_camel("set_on_insert"), "setOnInsert");
        assert_eq!(to_camel("size"), "size");
    }
}
