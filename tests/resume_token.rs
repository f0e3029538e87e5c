use placequery::error::PlacequeryError;
use placequery::token::ResumeToken;

#[test]
fn absent_or_empty_token_starts_the_plan() {
    for token in [None, Some(""), Some("   ")] {
        let decoded = ResumeToken::decode(token).expect("decodes");
        assert_eq!(decoded.cursor(), None);
        assert_eq!(decoded.plan_index(), 0);
    }
}

#[test]
fn cursor_and_index_are_separated() {
    let decoded = ResumeToken::decode(Some("CmRSAAAA@#$5")).expect("decodes");
    assert_eq!(decoded.cursor(), Some("CmRSAAAA"));
    assert_eq!(decoded.plan_index(), 5);

    let decoded = ResumeToken::decode(Some("@#$3")).expect("decodes");
    assert_eq!(decoded.cursor(), None);
    assert_eq!(decoded.plan_index(), 3);
}

#[test]
fn bare_provider_cursor_is_at_the_first_row() {
    let decoded = ResumeToken::decode(Some("CmRSAAAA")).expect("decodes");
    assert_eq!(decoded.cursor(), Some("CmRSAAAA"));
    assert_eq!(decoded.plan_index(), 0);
}

#[test]
fn the_last_separator_wins() {
    let decoded = ResumeToken::decode(Some("a@#$b@#$2")).expect("decodes");
    assert_eq!(decoded.cursor(), Some("a@#$b"));
    assert_eq!(decoded.plan_index(), 2);
}

#[test]
fn bad_indexes_are_rejected() {
    assert!(matches!(ResumeToken::decode(Some("abc@#$x")), Err(PlacequeryError::Token(_))));
    assert!(matches!(ResumeToken::decode(Some("abc@#$-1")), Err(PlacequeryError::Token(_))));
}

#[test]
fn encoding_reads_back() {
    assert_eq!(ResumeToken::new(None, 7).encode(), "@#$7");
    assert_eq!(ResumeToken::new(Some(String::new()), 7), ResumeToken::new(None, 7));
    let token = ResumeToken::new(Some("next".into()), 12);
    assert_eq!(token.to_string(), "next@#$12");
    assert_eq!(ResumeToken::decode(Some(&token.encode())).expect("decodes"), token);
}
