use crate::error::QueryError;
use crate::modifier::Modifier;

/// A parsed condition key: `<identifier> <operator> [ %<modifier> | <literal> ]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub identifier: String,
    /// Operator token as written: `>`, `LIKE`, `ELEM_MATCH`, `$gt`, ...
    pub operator: String,
    pub modifier: Option<Modifier>,
    /// Inline literal following the operator, verbatim.
    pub inline: Option<String>,
}

/// Scan a condition key for an embedded operator.
///
/// Returns `Ok(None)` when no operator-shaped token is present; the caller
/// falls back to the structural rules. The rightmost operator-shaped token
/// wins, so `"note = went > expected"` parses as identifier `"note = went"`,
/// operator `">"`, inline value `"expected"`.
pub fn parse(cmd: char, key: &str) -> Result<Option<ConditionExpr>, QueryError> {
    let tokens = token_spans(key);

    let Some(op_idx) = tokens
        .iter()
        .rposition(|&(start, end)| is_operator_token(cmd, &key[start..end]))
        .filter(|&i| i >= 1)
    else {
        return Ok(None);
    };

    let identifier = &key[tokens[0].0..tokens[op_idx - 1].1];
    if identifier.starts_with(cmd) {
        return Err(QueryError::InvalidExpression(format!(
            "field name cannot start with '{cmd}': {identifier}"
        )));
    }

    let (op_start, op_end) = tokens[op_idx];
    let operator = key[op_start..op_end].to_string();
    let tail = key[op_end..].trim();

    let (modifier, inline) = if tail.is_empty() {
        (None, None)
    } else if let Some(token) = tail.strip_prefix('%').filter(|t| is_modifier_token(t)) {
        (Some(Modifier::parse(token)), None)
    } else {
        (None, Some(tail.to_string()))
    };

    Ok(Some(ConditionExpr {
        identifier: identifier.to_string(),
        operator,
        modifier,
        inline,
    }))
}

fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Operator shapes: a command-prefixed native token (`$gt`), an UPPER_SNAKE
/// named operator (`ELEM_MATCH`), or a comparison symbol.
fn is_operator_token(cmd: char, token: &str) -> bool {
    if let Some(rest) = token.strip_prefix(cmd) {
        return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    }

    if !token.is_empty()
        && token
            .split('_')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_uppercase()))
    {
        return true;
    }

    matches!(token, "=" | "<>" | "!=" | "<=" | ">=" | "<" | ">")
}

/// `\w+` optionally suffixed with `[]`.
fn is_modifier_token(token: &str) -> bool {
    let base = token.strip_suffix("[]").unwrap_or(token);
    !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
