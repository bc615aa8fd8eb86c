use super::*;
use std::str::FromStr;

#[test]
fn test_parse_decimal_keeps_scale() {
    let fp = parse_decimal("10.005").unwrap();
    assert_eq!(fp.mantissa, 10005);
    assert_eq!(fp.scale, 3);
    assert_eq!(fp.integer_digits(), 2);

    let small = parse_decimal("0.005").unwrap();
    assert_eq!(small.mantissa, 5);
    assert_eq!(small.integer_digits(), 0);

    let neg = parse_decimal("-1.50").unwrap();
    assert_eq!(neg.mantissa, -150);
    assert_eq!(neg.scale, 2);
}

#[test]
fn test_parse_decimal_rejects_text() {
    assert!(parse_decimal("abc").is_err());
    assert!(parse_decimal("1e5").is_err());
    assert!(parse_decimal("").is_err());
    assert!(parse_decimal("$10").is_err());
}

#[test]
fn test_rescale() {
    assert_eq!(rescale(5, 3, 3), Some(5));
    assert_eq!(rescale(15, 1, 3), Some(1500));
    assert_eq!(rescale(1500, 3, 1), Some(15));
    assert_eq!(rescale(1501, 3, 1), None);
    assert_eq!(rescale(i128::MAX, 0, 2), None);
}

#[test]
fn test_to_decimal_exact() {
    let d = to_decimal(1_001_000_000_000, 3).unwrap();
    assert_eq!(d, Decimal::from_str("1001000000.000").unwrap());
    assert!(to_decimal(i128::MAX, 0).is_err());
}

#[test]
fn test_null_tokens() {
    assert!(is_null_token(""));
    assert!(is_null_token("  "));
    assert!(is_null_token("NULL"));
    assert!(is_null_token("n/a"));
    assert!(!is_null_token("0"));
}

#[test]
fn test_date_round_trip_through_days() {
    let date = parse_date("2024-03-31").unwrap();
    assert_eq!(date_to_days(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
    assert_eq!(days_to_date(date_to_days(date)), Some(date));
    assert_eq!(parse_date("2024/03/31"), Some(date));
    assert_eq!(parse_date("31.03.2024"), None);
}

#[test]
fn test_sort_cmp() {
    let one = Value::Int(1);
    let one_and_half = Value::Decimal(Decimal::from_str("1.5").unwrap());
    assert_eq!(one.sort_cmp(&one_and_half), Ordering::Less);
    assert_eq!(Value::Null.sort_cmp(&one), Ordering::Less);
    assert_eq!(
        Value::Text("b".into()).sort_cmp(&Value::Text("a".into())),
        Ordering::Greater
    );
}

#[test]
fn test_value_serde_is_tagged() {
    let v = Value::Decimal(Decimal::from_str("10.50").unwrap());
    let json = serde_json::to_string(&v).unwrap();
    assert_eq!(json, r#"{"decimal":"10.50"}"#);
    let back: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(back, v);
    assert_eq!(serde_json::to_string(&Value::Null).unwrap(), r#""null""#);
}
