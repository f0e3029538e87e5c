use placequery::error::PlacequeryError;
use placequery::splitter::split_category_keyword;

fn split(expression: &str) -> (String, String) {
    split_category_keyword(expression).expect("splits")
}

#[test]
fn conjunction_of_kinds_splits_cleanly() {
    assert_eq!(
        split("restaurant AND @live music@"),
        ("restaurant".to_string(), "@live music@".to_string())
    );
}

#[test]
fn negated_phrase_leaves_a_negated_keyword_side() {
    assert_eq!(
        split("(restaurant OR cafe) AND NOT @fast food@"),
        ("(restaurant OR cafe)".to_string(), "NOT @fast food@".to_string())
    );
}

#[test]
fn mixed_alternative_keeps_each_term_on_its_own_side() {
    let (categories, keywords) = split("(auto_parts_store OR @auto parts@) AND NOT @x@");
    assert_eq!(categories, "auto_parts_store");
    assert_eq!(keywords, "@auto parts@ AND NOT @x@");
    assert!(!keywords.contains("auto_parts_store"));
}

#[test]
fn single_kind_queries_have_an_empty_side() {
    assert_eq!(split("bar OR pub"), ("bar OR pub".to_string(), String::new()));
    assert_eq!(split("@vegan bakery@"), (String::new(), "@vegan bakery@".to_string()));
}

#[test]
fn removal_respects_precedence() {
    // AND binds tighter, so the phrase goes together with its AND
    assert_eq!(split("a OR @x@ AND b"), ("a OR b".to_string(), "@x@".to_string()));
}

#[test]
fn output_is_normalized() {
    assert_eq!(split("Bar and not Pub"), ("bar AND NOT pub".to_string(), String::new()));
    assert_eq!(split("bar & ~pub"), ("bar AND NOT pub".to_string(), String::new()));
}

#[test]
fn both_sides_stay_parseable() {
    for query in [
        "(a OR @b@) AND (c OR @d@)",
        "NOT (a AND @b@) OR c",
        "(@x y@ OR a) AND NOT (b OR @z@)",
    ] {
        let (categories, keywords) = split(query);
        for side in [categories, keywords] {
            if !side.is_empty() {
                placequery::compiler::parse_expression(&side)
                    .unwrap_or_else(|e| panic!("{} split into unparseable '{}': {}", query, side, e));
            }
        }
    }
}

#[test]
fn invalid_input_is_rejected() {
    assert!(matches!(split_category_keyword("a AND AND b"), Err(PlacequeryError::Parse { .. })));
}
