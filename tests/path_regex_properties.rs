//! Property tests for the path-template compiler.

use api_adapter::xds::path::{build_path_regex, generate_substitution_string, rewrite_regex_from_path_template};
use api_adapter::Error;
use proptest::prelude::*;
use regex::Regex;

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

fn segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        "[a-z][a-z0-9_-]{0,8}".prop_map(Segment::Literal),
        "[a-zA-Z][a-zA-Z0-9]{0,6}".prop_map(Segment::Param),
    ]
}

fn template(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Literal(literal) => format!("/{}", literal),
            Segment::Param(name) => format!("/{{{}}}", name),
        })
        .collect()
}

/// Request path for a template, with each parameter replaced by `value`
fn concrete(segments: &[Segment], value: &str) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Literal(literal) => format!("/{}", literal),
            Segment::Param(_) => format!("/{}", value),
        })
        .collect()
}

fn param_count(segments: &[Segment]) -> usize {
    segments.iter().filter(|segment| matches!(segment, Segment::Param(_))).count()
}

proptest! {
    #[test]
    fn template_regex_matches_its_concrete_paths(
        segments in prop::collection::vec(segment(), 1..6),
        basepath in "/[a-z]{1,8}",
        value in "[a-zA-Z0-9._~-]{1,10}",
    ) {
        let regex = Regex::new(&build_path_regex(&basepath, "", &template(&segments))).unwrap();
        let path = format!("{}{}", basepath, concrete(&segments, &value));

        prop_assert!(regex.is_match(&path));
        let path_with_query = format!("{}?page=2", path);
        prop_assert!(regex.is_match(&path_with_query));
    }

    #[test]
    fn template_regex_rejects_extra_segments(
        segments in prop::collection::vec(segment(), 1..6),
        value in "[a-z0-9]{1,10}",
        extra in "[a-z0-9]{1,10}",
    ) {
        let regex = Regex::new(&build_path_regex("/api", "", &template(&segments))).unwrap();
        let path = format!("/api{}/{}", concrete(&segments, &value), extra);
        prop_assert!(!regex.is_match(&path));
    }

    #[test]
    fn slash_inside_a_parameter_value_does_not_match(
        segments in prop::collection::vec(segment(), 1..6),
        head in "[a-z0-9]{1,5}",
        tail in "[a-z0-9]{1,5}",
    ) {
        prop_assume!(param_count(&segments) > 0);
        let regex = Regex::new(&build_path_regex("/api", "", &template(&segments))).unwrap();
        let path = format!("/api{}", concrete(&segments, &format!("{}/{}", head, tail)));
        prop_assert!(!regex.is_match(&path));
    }

    #[test]
    fn regex_is_anchored_with_an_optional_query(segments in prop::collection::vec(segment(), 0..6)) {
        let regex = build_path_regex("/api", "/backend", &template(&segments));
        prop_assert!(regex.starts_with("^/api"));
        prop_assert!(regex.ends_with(r"(\?([^/]+))?$"));
    }

    #[test]
    fn substitution_references_every_parameter_in_order(segments in prop::collection::vec(segment(), 0..6)) {
        let substitution = generate_substitution_string("/backend/", &template(&segments));
        prop_assert!(substitution.starts_with("/backend"));
        for index in 1..=param_count(&segments) {
            let reference = format!("\\{}", index);
            prop_assert!(substitution.contains(&reference));
        }
        let next = format!("\\{}", param_count(&segments) + 1);
        prop_assert!(!substitution.contains(&next));
    }

    #[test]
    fn rewrite_backreferences_follow_template_order(
        names in prop::collection::btree_set("[a-z]{1,6}", 1..5),
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let path_template: String = names.iter().map(|name| format!("/{{{}}}", name)).collect();
        let rewrite_template: String = names.iter().rev().map(|name| format!("/{{uri.var.{}}}", name)).collect();

        let rewrite = rewrite_regex_from_path_template(&path_template, &rewrite_template).unwrap();
        let expected: String = (1..=names.len()).rev().map(|index| format!("/\\{}", index)).collect();
        prop_assert_eq!(rewrite, expected);
    }
}

#[test]
fn parameter_matches_a_single_segment() {
    let regex = Regex::new(&build_path_regex("/api", "", "/v2/pet/{petId}")).unwrap();
    assert!(regex.is_match("/api/v2/pet/5"));
    assert!(!regex.is_match("/api/v2/pet/5/extra"));
}

#[test]
fn rewrite_uses_path_template_positions() {
    assert_eq!(
        rewrite_regex_from_path_template("/v2/pet/{petId}", "/internal/{uri.var.petId}").unwrap(),
        r"/internal/\1"
    );
    assert_eq!(
        rewrite_regex_from_path_template("/shops/{shopId}/pets/{petId}", "/pets/{uri.var.petId}/shops/{uri.var.shopId}")
            .unwrap(),
        r"/pets/\2/shops/\1"
    );
}

#[test]
fn unknown_rewrite_parameter_fails() {
    let err = rewrite_regex_from_path_template("/pets/{petId}", "/pets/{uri.var.id}").unwrap_err();
    assert!(matches!(err, Error::InvalidRewriteParam { ref param } if param == "id"));
}
