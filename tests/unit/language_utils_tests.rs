/*!
 * Tests for language utility functions
 */

use tinbox::language_utils::{
    display_name, get_language_name, language_codes_match, normalize_to_part2t, validate_language_code,
    LanguageCodeType,
};

/// Test validation of language codes
#[test]
fn test_validate_language_code_withValidCodes_shouldReturnCorrectType() {
    // ISO 639-1 tests
    assert!(matches!(validate_language_code("en").unwrap(), LanguageCodeType::Part1));
    assert!(matches!(validate_language_code("ja").unwrap(), LanguageCodeType::Part1));

    // ISO 639-2/T tests
    assert!(matches!(validate_language_code("fra").unwrap(), LanguageCodeType::Part2T));
    assert!(matches!(validate_language_code("deu").unwrap(), LanguageCodeType::Part2T));

    // ISO 639-2/B tests
    assert!(matches!(validate_language_code("fre").unwrap(), LanguageCodeType::Part2B));
    assert!(matches!(validate_language_code("ger").unwrap(), LanguageCodeType::Part2B));

    // Whitespace and case tests
    assert!(matches!(validate_language_code(" EN ").unwrap(), LanguageCodeType::Part1));

    // Invalid codes
    assert!(validate_language_code("123").is_err());
    assert!(validate_language_code("e").is_err());
    assert!(validate_language_code("auto").is_err());
}

/// Test normalization of language codes to ISO 639-2/T format
#[test]
fn test_normalize_to_part2t_withValidCodes_shouldNormalizeCorrectly() {
    assert_eq!(normalize_to_part2t("en").unwrap(), "eng");
    assert_eq!(normalize_to_part2t("ger").unwrap(), "deu");
    assert_eq!(normalize_to_part2t("FRA").unwrap(), "fra");
    assert!(normalize_to_part2t("xyz1").is_err());
}

/// Test matching of different language code formats
#[test]
fn test_language_codes_match_withEquivalentCodes_shouldReturnTrue() {
    assert!(language_codes_match("de", "ger"));
    assert!(language_codes_match("deu", "DE"));
    assert!(language_codes_match("auto", "AUTO"));
    assert!(!language_codes_match("de", "nl"));
    assert!(!language_codes_match("auto", "en"));
}

/// Test language names used in prompts
#[test]
fn test_language_names_withKnownAndUnknownCodes_shouldResolve() {
    assert_eq!(get_language_name("es").unwrap(), "Spanish");
    assert_eq!(get_language_name("jpn").unwrap(), "Japanese");
    assert!(get_language_name("qq").is_err());
    assert_eq!(display_name("de"), "German");
    assert_eq!(display_name("elvish"), "elvish");
}
