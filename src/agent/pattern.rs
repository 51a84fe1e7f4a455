//! Scope specific pattern parsers. Pure functions, no state.
use crate::agent::error::Error;
use regex::Regex;

/// `module!function` glob query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFunction {
    pub module: String,
    pub function: String,
}

impl ModuleFunction {
    /// Glob understood by the export resolver.
    pub fn glob(&self) -> String {
        format!("{}!{}", self.module, self.function)
    }
}

/// Parse a `module!function` pattern. A missing half defaults to `*`.
pub fn parse_module_function(pattern: &str) -> ModuleFunction {
    let or_any = |s: &str| {
        if s.is_empty() {
            "*".to_string()
        } else {
            s.to_string()
        }
    };

    match pattern.split_once('!') {
        Some((module, function)) => ModuleFunction {
            module: or_any(module),
            function: or_any(function),
        },
        None => ModuleFunction {
            module: "*".to_string(),
            function: or_any(pattern),
        },
    }
}

/// `module!offset` query of a relative function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOffset {
    pub module: String,
    pub offset: u64,
}

/// Parse a `module!hexOffset` pattern, the offset may carry a `0x` prefix.
pub fn parse_module_offset(pattern: &str) -> Result<ModuleOffset, Error> {
    let (module, offset) = pattern
        .split_once('!')
        .ok_or_else(|| Error::InvalidPattern(pattern.to_string(), "expected module!offset"))?;
    if module.is_empty() {
        return Err(Error::InvalidPattern(pattern.to_string(), "empty module name"));
    }

    let digits = offset
        .strip_prefix("0x")
        .or_else(|| offset.strip_prefix("0X"))
        .unwrap_or(offset);
    let offset = u64::from_str_radix(digits, 16)
        .map_err(|_| Error::InvalidPattern(pattern.to_string(), "offset is not a hex number"))?;

    Ok(ModuleOffset {
        module: module.to_string(),
        offset,
    })
}

/// Display name synthesized for a function known only by its offset.
pub fn offset_display_name(offset: u64) -> String {
    format!("sub_{offset:x}")
}

/// Split a method pattern list on `;` or `,`, dropping empty fragments.
pub fn parse_method_list(pattern: &str) -> Vec<&str> {
    pattern
        .split([';', ','])
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect()
}

/// Build one case-sensitive regex per fragment, malformed fragments are skipped.
pub fn parse_regex_list(pattern: &str) -> Vec<Regex> {
    parse_method_list(pattern)
        .into_iter()
        .filter_map(|fragment| crate::muted_error!(Regex::new(fragment), "filter fragment:"))
        .collect()
}

/// Setter selector for an instance variable: a single leading `_` is stripped and the first
/// character upper-cased. Only ASCII letters change case, other characters pass through.
pub fn setter_selector(ivar: &str) -> String {
    let name = property_name(ivar);
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("set{}{}:", first.to_ascii_uppercase(), chars.as_str()),
        None => "set:".to_string(),
    }
}

/// Getter selector for an instance variable.
pub fn property_name(ivar: &str) -> &str {
    ivar.strip_prefix('_').unwrap_or(ivar)
}
