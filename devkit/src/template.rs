/*!
Rendu minimal des `value_template` Home Assistant

Couvre ce que les configs de découverte de l'agent utilisent:
- `{{ value }}`: payload brut
- `{{ value_json.a.b }}`: champ du payload JSON
- `| default('x')`: valeur de repli si le champ est absent ou nul

Les booléens s'affichent comme en Jinja (`True` / `False`).
*/

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

/// Rend `template` contre le payload d'un topic d'état.
pub fn render(template: &str, payload: &str) -> Result<String> {
    let mut output = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| anyhow!("unterminated expression in {:?}", template))?;
        output.push_str(&eval(after[..end].trim(), payload)?);
        rest = &after[end + 2..];
    }
    output.push_str(rest);
    Ok(output)
}

fn eval(expression: &str, payload: &str) -> Result<String> {
    let mut parts = expression.split('|').map(str::trim);
    let base = parts.next().unwrap_or_default();

    let mut fallback = None;
    for filter in parts {
        match filter
            .strip_prefix("default(")
            .and_then(|f| f.strip_suffix(')'))
        {
            Some(arg) => fallback = Some(arg.trim().trim_matches(|c| c == '\'' || c == '"').to_string()),
            None => bail!("unsupported filter {:?}", filter),
        }
    }

    let value = lookup(base, payload)?;
    match (value, fallback) {
        (Some(value), _) => Ok(value),
        (None, Some(fallback)) => Ok(fallback),
        (None, None) => bail!("{} is undefined for payload {:?}", base, payload),
    }
}

fn lookup(path: &str, payload: &str) -> Result<Option<String>> {
    if path == "value" {
        return Ok(Some(payload.to_string()));
    }

    let Some(fields) = path.strip_prefix("value_json") else {
        bail!("unsupported expression {:?}", path);
    };
    let json: Value = serde_json::from_str(payload)
        .map_err(|e| anyhow!("payload is not JSON ({}): {:?}", e, payload))?;

    let mut current = &json;
    for field in fields.split('.').filter(|f| !f.is_empty()) {
        match current.get(field) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }

    Ok(match current {
        Value::Null => None,
        Value::Bool(true) => Some("True".to_string()),
        Value::Bool(false) => Some("False".to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}
