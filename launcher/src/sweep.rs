use crate::overrides::{OverrideError, OverrideToken};
use itertools::Itertools;

/// split a sweep value on top level commas, quoted and bracketed parts stay whole
fn choices(value: &str) -> Vec<String> {
    let mut choices = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for character in value.chars() {
        if escaped {
            current.push(character);
            escaped = false;
            continue;
        }

        match (character, quote) {
            ('\\', _) => {
                escaped = true;
                current.push(character);
            }
            (c, Some(open)) if c == open => {
                quote = None;
                current.push(c);
            }
            (c, Some(_)) => current.push(c),
            ('\'' | '"', None) => {
                quote = Some(character);
                current.push(character);
            }
            ('[' | '{' | '(', None) => {
                depth += 1;
                current.push(character);
            }
            (']' | '}' | ')', None) => {
                depth = depth.saturating_sub(1);
                current.push(character);
            }
            (',', None) if depth == 0 => choices.push(std::mem::take(&mut current)),
            (c, None) => current.push(c),
        }
    }
    choices.push(current);

    choices
}

/// Expand `key=a,b` style overrides into the cartesian product of runs.
/// Keys vary in the order given, the last one fastest.
pub fn expand<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Vec<String>>, OverrideError> {
    let axes = raw
        .iter()
        .map(|raw| {
            let token = OverrideToken::parse(raw.as_ref())?;

            if token.is_launch() {
                return Ok(vec![token.to_string()]);
            }

            Ok(choices(token.value())
                .into_iter()
                .map(|choice| format!("{}={choice}", token.key()))
                .collect_vec())
        })
        .collect::<Result<Vec<_>, OverrideError>>()?;

    if axes.is_empty() {
        return Ok(vec![Vec::new()]);
    }

    Ok(axes.into_iter().multi_cartesian_product().collect())
}
