//! Price label parsing as seen on real detail pages
use catalog_crawler_lib::crawling::{PriceLabelError, parse_price};
use rstest::rstest;

#[rstest]
#[case::regular("$4.00", "$4.00", "$4.00")]
#[case::marked_down("Sale: $2.99 discounted from $3.49", "$2.99", "$3.49")]
#[case::per_pound("$8.99/lb", "$8.99/lb", "$8.99/lb")]
#[case::marked_down_per_pound("Sale: $6.99/lb discounted from $8.99/lb", "$6.99/lb", "$8.99/lb")]
#[case::padded("\n  $1.25 \t", "$1.25", "$1.25")]
fn splits_price_and_mrp(#[case] label: &str, #[case] price: &str, #[case] mrp: &str) {
    let (parsed_price, parsed_mrp) = parse_price(label).unwrap();
    assert_eq!(parsed_price, price);
    assert_eq!(parsed_mrp, mrp);
}

#[test]
fn values_are_not_validated_as_numbers() {
    assert_eq!(
        parse_price("2 for $5").unwrap(),
        ("2 for $5".to_string(), "2 for $5".to_string())
    );
}

#[test]
fn marked_down_label_with_extra_words_is_rejected() {
    let err = parse_price("Sale: $2.99 each discounted from $3.49 each").unwrap_err();
    assert_eq!(
        err,
        PriceLabelError::UnexpectedTokens {
            label: "Sale: $2.99 each discounted from $3.49 each".to_string(),
            tokens: 4,
        }
    );
}

#[test]
fn blank_label_is_rejected() {
    assert_eq!(parse_price(""), Err(PriceLabelError::Empty));
}
