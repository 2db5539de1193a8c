//! End-to-end composition of the credential page stylesheets.

use std::collections::BTreeMap;
use std::path::PathBuf;
use stylecomp_core::{ComposeError, Composer, Theme, emitter, loader};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/credentials")
}

fn credentials() -> Composer {
    let dir = fixture_dir();
    let theme = Theme::load(dir.join("theme.json")).expect("load theme");
    let sheet = loader::load_stylesheet(&[dir.join("main.scss")]).expect("load stylesheets");
    Composer::new(&sheet, &theme).expect("compose")
}

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(p, v)| (p.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_footer_legal_column_opens_at_medium() {
    let composer = credentials();

    assert_eq!(
        composer.resolve(".footer-app-legal", 500),
        map(&[("font-size", "12px")])
    );
    assert_eq!(
        composer.resolve(".footer-app-legal", 1024),
        map(&[
            ("flex", "0 0 50%"),
            ("font-size", "12px"),
            ("max-width", "50%"),
        ])
    );
}

#[test]
fn test_record_cards_alternate_backgrounds() {
    let composer = credentials();

    let even = composer.resolve(".record-card:nth-of-type(even)", 1024);
    assert_eq!(even["background"], "#FFFFFF");

    let odd = composer.resolve(".record-card:nth-of-type(odd)", 1024);
    assert_eq!(odd["background"], "#F9FAFC");

    let nested_even = composer.resolve(".records .record-card:nth-of-type(even)", 1200);
    assert_eq!(nested_even["background"], "#FFFFFF");
    assert_eq!(nested_even["margin"], "0 0 0.5rem");
    assert_eq!(nested_even["flex"], "0 0 33.333333%");
}

#[test]
fn test_header_pulls_in_utilities_and_tokens() {
    let composer = credentials();

    assert_eq!(
        composer.resolve(".wrapper-header", 0),
        map(&[
            ("background-color", "#FFFFFF"),
            ("border-bottom", "1px solid #D9D9D9"),
            ("font-family", "\"Open Sans\", Arial, sans-serif"),
        ])
    );
    assert_eq!(
        composer.resolve(".wrapper-header .nav-link", 0),
        map(&[
            ("background", "none"),
            ("border", "0"),
            ("color", "#0075B4"),
            ("font-weight", "600"),
            ("padding", "0"),
        ])
    );
    assert_eq!(
        composer.resolve(".wrapper-header .header-app-title", 0)["position"],
        "absolute"
    );
    assert_eq!(composer.resolve("[id=\"skip-link\"]", 0)["width"], "1px");
}

#[test]
fn test_banner_spacing_and_alignment() {
    let composer = credentials();
    let narrow = composer.resolve(".wrapper-banner", 320);
    assert_eq!(narrow["padding"], "2rem");
    assert_eq!(narrow["text-align"], "center");
    assert_eq!(composer.resolve(".wrapper-banner", 768)["text-align"], "left");
}

#[test]
fn test_later_layer_adds_to_footer() {
    let composer = credentials();
    assert_eq!(
        composer.resolve(".footer-app", 0),
        map(&[
            ("color", "#414141"),
            ("font-family", "\"Open Sans\", Arial, sans-serif"),
            ("padding", "1rem"),
        ])
    );
}

#[test]
fn test_resolve_is_deterministic() {
    let composer = credentials();
    let other = credentials();
    for width in [0, 500, 768, 991, 992, 1200, 4000] {
        for selector in [".footer-app-legal", ".records .record-card", ".wrapper-banner"] {
            let first = composer.resolve(selector, width);
            assert_eq!(first, composer.resolve(selector, width));
            assert_eq!(first, other.resolve(selector, width));
        }
    }
}

#[test]
fn test_gated_declarations_are_monotonic_in_width() {
    let composer = credentials();
    let gated: Vec<_> = composer
        .declarations()
        .filter(|(_, d)| d.min_width.is_some_and(|w| w > 0))
        .map(|(selector, d)| (selector.to_string(), d.clone()))
        .collect();
    assert!(!gated.is_empty());

    for (selector, decl) in gated {
        let threshold = decl.min_width.expect("gated");
        let below = composer.resolve(&selector, threshold - 1);
        let at = composer.resolve(&selector, threshold);
        assert_ne!(below.get(&decl.property), Some(&decl.value), "{selector} below {threshold}");
        assert_eq!(at.get(&decl.property), Some(&decl.value), "{selector} at {threshold}");
    }
}

#[test]
fn test_shared_fragments_expand_independently() {
    let composer = Composer::from_source(
        "%card { border: 1px solid; padding: 4px; }
         .a { @extend %card; padding: 8px; }
         .b { @extend %card; color: red; }",
        &Theme::default(),
    )
    .expect("compose");

    assert_eq!(
        composer.resolve(".a", 0),
        map(&[("border", "1px solid"), ("padding", "8px")])
    );
    assert_eq!(
        composer.resolve(".b", 0),
        map(&[("border", "1px solid"), ("color", "red"), ("padding", "4px")])
    );
}

#[test]
fn test_cyclic_extension_fails_composition() {
    let err = Composer::from_source(
        "%a { @extend %b; } %b { @extend %a; }",
        &Theme::default(),
    )
    .err()
    .expect("cycle must be rejected");
    assert!(matches!(err, ComposeError::CyclicExtension { .. }));
    assert!(err.to_string().contains("%a -> %b -> %a"));
}

#[test]
fn test_unknown_breakpoint_fails_composition() {
    let err = Composer::from_source(
        ".a { @include media-breakpoint-up(xxl) { top: 0; } }",
        &Theme::default(),
    )
    .err()
    .expect("unknown breakpoint must be rejected");
    assert!(matches!(err, ComposeError::UnknownBreakpoint { .. }));
}

#[test]
fn test_snapshots_serve_concurrent_readers() {
    let composer = credentials();
    let expected = composer.resolve(".footer-app-legal", 1024);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                assert_eq!(composer.resolve(".footer-app-legal", 1024), expected);
            });
        }
    });
}

#[test]
fn test_emitted_css_groups_breakpoints() {
    let css = emitter::emit_css(&credentials());
    let md = css.find("@media (min-width: 768px)").expect("md block");
    let lg = css.find("@media (min-width: 992px)").expect("lg block");
    assert!(md < lg);
    assert!(css.contains(".footer-app-legal {\n    font-size: 12px;\n}"));
    assert!(!css.contains("%sr-only"));
    assert!(!css.contains("@include"));
    assert!(!css.contains('$'));
}
