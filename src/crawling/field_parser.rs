//! Field normalization for raw strings read off a detail page. No I/O.

use super::errors::PriceLabelError;

/// Markdown marker that prefixes a discounted price label
pub const SALE_MARKER: &str = "Sale:";

/// Phrase separating the discounted price from the reference price
pub const DISCOUNT_PHRASE: &str = "discounted from";

pub const UPC_PREFIX: &str = "UPC: ";

pub const LOCATION_PREFIX: &str = "Located in ";

/// Split a raw price label into `(price, mrp)`.
///
/// `"Sale: $2.99 discounted from $3.49"` gives `("$2.99", "$3.49")`; a label
/// without the sale marker is both price and mrp. Values are not validated
/// as numbers.
pub fn parse_price(raw_label: &str) -> Result<(String, String), PriceLabelError> {
    if raw_label.contains(SALE_MARKER) {
        let remainder = raw_label.replace(SALE_MARKER, "").replace(DISCOUNT_PHRASE, "");
        let tokens: Vec<&str> = remainder.split_whitespace().collect();
        return match tokens.as_slice() {
            [price, mrp] => Ok(((*price).to_string(), (*mrp).to_string())),
            _ => Err(PriceLabelError::UnexpectedTokens {
                label: raw_label.to_string(),
                tokens: tokens.len(),
            }),
        };
    }

    let value = raw_label.trim();
    if value.is_empty() {
        return Err(PriceLabelError::Empty);
    }
    Ok((value.to_string(), value.to_string()))
}

/// Remove a literal label prefix (`"UPC: "`, `"Located in "`) and trim
pub fn strip_label_prefix(raw: &str, prefix: &str) -> String {
    raw.replace(prefix, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("Sale: $2.99 discounted from $3.49", "$2.99", "$3.49")]
    #[case("$4.00", "$4.00", "$4.00")]
    #[case("  $4.00  ", "$4.00", "$4.00")]
    #[case("Sale:$1.25 discounted from $1.50", "$1.25", "$1.50")]
    #[case("$5.99/lb", "$5.99/lb", "$5.99/lb")]
    fn parses_price_labels(#[case] label: &str, #[case] price: &str, #[case] mrp: &str) {
        assert_eq!(parse_price(label).unwrap(), (price.to_string(), mrp.to_string()));
    }

    #[rstest]
    #[case("Sale: $2.99")]
    #[case("Sale: $2.99 discounted from $3.49 each")]
    #[case("Sale:")]
    fn malformed_sale_labels_are_reported(#[case] label: &str) {
        assert!(matches!(
            parse_price(label),
            Err(PriceLabelError::UnexpectedTokens { .. })
        ));
    }

    #[test]
    fn empty_label_is_reported() {
        assert_eq!(parse_price("   "), Err(PriceLabelError::Empty));
    }

    #[test]
    fn strips_known_prefixes() {
        assert_eq!(strip_label_prefix("UPC: 0001111041700", UPC_PREFIX), "0001111041700");
        assert_eq!(strip_label_prefix("Located in Aisle 12 ", LOCATION_PREFIX), "Aisle 12");
        assert_eq!(strip_label_prefix("0001111041700", UPC_PREFIX), "0001111041700");
    }

    proptest! {
        #[test]
        fn unmarked_labels_are_price_and_mrp(label in "[$0-9./a-z ]{0,16}[$0-9]") {
            let (price, mrp) = parse_price(&label).unwrap();
            prop_assert_eq!(&price, &mrp);
            prop_assert_eq!(price.as_str(), label.trim());
        }

        #[test]
        fn marked_labels_split_into_both_tokens(price in "\\$[0-9]{1,3}\\.[0-9]{2}", mrp in "\\$[0-9]{1,3}\\.[0-9]{2}") {
            let label = format!("Sale: {price} discounted from {mrp}");
            prop_assert_eq!(parse_price(&label).unwrap(), (price, mrp));
        }
    }
}
