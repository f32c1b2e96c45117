use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use tracing::error;

use crate::errors::codes;
use crate::model::endpoint::EndpointCluster;
use crate::model::extensions::ExtensionBag;
use crate::model::operation::Operation;
use crate::model::policy::{actions, params};
use crate::xds::path::rewrite_regex_from_path_template;

static WORD_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w\s]").expect("valid word character regex"));

/// A path template and its operations
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub path: String,
    pub uuid: String,
    pub operations: Vec<Operation>,
    pub production_endpoints: Option<EndpointCluster>,
    pub sandbox_endpoints: Option<EndpointCluster>,
    pub extensions: ExtensionBag,
}

impl Resource {
    pub fn new<P: Into<String>>(path: P, operations: Vec<Operation>, extensions: ExtensionBag) -> Self {
        Self {
            path: path.into(),
            uuid: uuid::Uuid::new_v4().to_string(),
            operations,
            production_endpoints: None,
            sandbox_endpoints: None,
            extensions,
        }
    }

    pub fn methods(&self) -> Vec<String> {
        self.operations.iter().map(|operation| operation.method.clone()).collect()
    }

    /// Rewrite regex of the first convertible `REWRITE_RESOURCE_PATH` request policy, and whether
    /// any operation rewrites its method.
    pub fn rewrite_resource(&self) -> (Option<String>, bool) {
        let mut rewrite_path = None;
        let mut rewrite_method = false;

        for operation in &self.operations {
            for policy in &operation.policies.request {
                if policy.action.eq_ignore_ascii_case(actions::REWRITE_RESOURCE_METHOD) {
                    rewrite_method = true;
                    continue;
                }
                if rewrite_path.is_some()
                    || !policy.action.eq_ignore_ascii_case(actions::REWRITE_RESOURCE_PATH)
                {
                    continue;
                }
                let Some(template) = policy.string_param(params::REWRITE_PATH_RESOURCE_PATH) else {
                    continue;
                };
                match rewrite_regex_from_path_template(&self.path, template) {
                    Ok(regex) => rewrite_path = Some(regex),
                    Err(err) => error!(
                        error_code = codes::INVALID_REWRITE_PATH,
                        rewrite_path = %template,
                        error = %err,
                        "Invalid rewrite path"
                    ),
                }
            }
        }

        (rewrite_path, rewrite_method)
    }
}

/// Order resources so more specific paths are matched first: dotted paths lead, a trailing `/*`
/// trails, everything else compares on its punctuation skeleton.
pub fn sort_resources(resources: &mut [Resource]) {
    resources.sort_by(|a, b| compare_paths(&a.path, &b.path));
}

fn compare_paths(a: &str, b: &str) -> Ordering {
    let a = WORD_CHARACTERS.replace_all(a, "");
    let b = WORD_CHARACTERS.replace_all(b, "");

    let (a_wildcard, b_wildcard) = (a.ends_with("/*"), b.ends_with("/*"));
    if a_wildcard || b_wildcard {
        return a_wildcard.cmp(&b_wildcard);
    }

    match (a.contains('.'), b.contains('.')) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(&b),
    }
}
