//! Path templating: route match regexes, rewrite substitutions and rewrite-policy templates.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{Error, Result};

/// Capture group replacing one `{param}` of a path template
pub const PATH_PARAM_GROUP: &str = "([^/]+)";
/// Capture group replacing a trailing `/*`; matches the bare prefix, a slash or nested paths
pub const WILDCARD_GROUP: &str = "((/(.*))*)";
/// Optional query string appended to every route regex
pub const QUERY_GROUP: &str = r"(\?([^/]+))?";

static PATH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid path parameter regex"));
static REWRITE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{uri\.var\.([^{}]+)\}").expect("valid rewrite parameter regex"));
static REWRITE_ALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9~/_.\-\\]*$").expect("valid rewrite character regex"));

/// Route prefix: the gateway basepath when set, else the endpoint basepath; always starting with
/// `/` and never ending with one.
pub fn route_prefix(x_wso2_basepath: &str, endpoint_basepath: &str) -> String {
    let base = if x_wso2_basepath.is_empty() { endpoint_basepath } else { x_wso2_basepath };
    let trimmed = base.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Route prefix of a default version API: a non-capturing group matching the basepath with or
/// without its trailing version segment, so rewrite back-references keep their positions.
///
/// `/petstore/1.0.0` of version `1.0.0` becomes `(?:/petstore/1.0.0|/petstore)`.
pub fn default_version_prefix(prefix: &str, version: &str) -> String {
    let segment = format!("/{}", version);
    let boundary = prefix.rmatch_indices(&segment).map(|(index, _)| index).find(|index| {
        matches!(prefix[index + segment.len()..].chars().next(), None | Some('/'))
    });
    match boundary {
        Some(index) if !version.is_empty() => {
            let unversioned = format!("{}{}", &prefix[..index], &prefix[index + segment.len()..]);
            format!("(?:{}|{})", prefix, unversioned)
        }
        _ => prefix.to_string(),
    }
}

/// Anchored regex matching request paths of `resource_path` under the route prefix.
///
/// `/pet/{petId}` under `/api` compiles to `^/api/pet/([^/]+)(\?([^/]+))?$`.
pub fn build_path_regex(x_wso2_basepath: &str, endpoint_basepath: &str, resource_path: &str) -> String {
    path_regex_under(&route_prefix(x_wso2_basepath, endpoint_basepath), resource_path)
}

/// Anchored regex matching request paths of `resource_path` under an already resolved `prefix`
pub fn path_regex_under(prefix: &str, resource_path: &str) -> String {
    let resource_path = resource_path.split('?').next().unwrap_or_default();
    let full = format!("{}{}", prefix, resource_path);
    let mut regex = PATH_PARAM.replace_all(&full, PATH_PARAM_GROUP).into_owned();

    if let Some(stripped) = regex.strip_suffix("/*") {
        regex = format!("{}{}", stripped, WILDCARD_GROUP);
    }

    format!("^{}{}$", regex, QUERY_GROUP)
}

/// Substitution string for a regex rewrite: the endpoint basepath followed by the resource path
/// with `\N` back-references in place of its parameters and its trailing wildcard.
pub fn generate_substitution_string(endpoint_basepath: &str, resource_path: &str) -> String {
    let mut index = 0;
    let mut substitution = PATH_PARAM
        .replace_all(resource_path, |_: &Captures<'_>| {
            index += 1;
            format!("\\{}", index)
        })
        .into_owned();

    if let Some(stripped) = substitution.strip_suffix("/*") {
        index += 1;
        substitution = format!("{}\\{}", stripped, index);
    }

    let substitution = format!("{}{}", endpoint_basepath.trim_end_matches('/'), substitution);
    if substitution.is_empty() {
        "/".to_string()
    } else {
        substitution
    }
}

/// 1-based capture group index of every parameter of a path template
fn path_param_indexes(path_template: &str) -> HashMap<&str, usize> {
    PATH_PARAM
        .captures_iter(path_template)
        .enumerate()
        .filter_map(|(i, captures)| captures.get(1).map(|param| (param.as_str(), i + 1)))
        .collect()
}

/// Convert a rewrite template such as `/internal/{uri.var.petId}` into a substitution with
/// back-references into the route regex of `path_template`.
pub fn rewrite_regex_from_path_template(path_template: &str, rewrite_template: &str) -> Result<String> {
    let indexes = path_param_indexes(path_template);
    let mut rewrite = format!("/{}", rewrite_template.trim_matches('/'));

    for captures in REWRITE_PARAM.captures_iter(rewrite_template) {
        let (Some(templated), Some(param)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let index = indexes
            .get(param.as_str())
            .ok_or_else(|| Error::InvalidRewriteParam { param: param.as_str().to_string() })?;
        rewrite = rewrite.replace(templated.as_str(), &format!("\\{}", index));
    }

    if !REWRITE_ALLOWED.is_match(&rewrite) {
        return Err(Error::RegexCompilation { regex: rewrite });
    }

    Ok(rewrite)
}
