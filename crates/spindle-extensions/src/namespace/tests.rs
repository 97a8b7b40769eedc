//! Unit tests for namespace resolution.

use rstest::rstest;

use super::*;

#[rstest]
#[case("web-search", "webSearch")]
#[case("show-chart", "showChart")]
#[case("show-table", "showTable")]
#[case("postgresql", "postgresql")]
#[case("excel-document", "excel")]
#[case("pdf-reader", "pdfReader")]
#[case("show", "show")]
#[case("image-gen-pro", "imageGenPro")]
#[case("csv-export-tools", "csv")]
fn resolves_known_ids(#[case] id: &str, #[case] expected: &str) {
    assert_eq!(Namespace::for_extension(id).as_str(), expected);
}

#[rstest]
#[case("excel-document", "excelDocument")]
#[case("a--b", "aB")]
#[case("-leading", "leading")]
#[case("trailing-", "trailing")]
#[case("already", "already")]
fn camel_cases_kebab_ids(#[case] id: &str, #[case] expected: &str) {
    assert_eq!(camel_case(id), expected);
}

#[test]
fn resolution_is_deterministic() {
    let first = Namespace::for_extension("word-processor");
    let second = Namespace::for_extension("word-processor");
    assert_eq!(first, second);
    assert_eq!(first.to_string(), "wordProcessor");
}

#[test]
fn empty_ids_resolve_to_an_empty_namespace() {
    assert_eq!(Namespace::for_extension("").as_str(), "");
}
