//! Simple-type value handling: coercion of raw bytes to the declared value space, then facet
//! checks over the coerced value.
//!
//! A facet violation fails the whole validation; the element callback for the offending value is
//! never invoked.

use crate::error::{Error, Result};
use crate::pl::Pl;
use crate::xml::schema::{Facet, SimpleType, XmlDataType};
use crate::xml::XmlValue;

/// Coerce raw bytes to one XS builtin value.
///
/// Booleans accept exactly `true`, `false`, `1`, `0`.  The numeric builtins share one unsigned
/// decimal reader; the per-type ranges were not enforced by the original and are not here.
pub(crate) fn convert_xs_value<'a>(
    data_type: XmlDataType,
    raw: &'a [u8],
) -> Result<XmlValue<'a>> {
    match data_type {
        XmlDataType::Boolean => match raw {
            b"true" | b"1" => Ok(XmlValue::Bool(true)),
            b"false" | b"0" => Ok(XmlValue::Bool(false)),
            _ => Err(Error::invalid(format!(
                "'{}' is not a boolean",
                String::from_utf8_lossy(raw)
            ))),
        },
        XmlDataType::UnsignedByte
        | XmlDataType::Short
        | XmlDataType::Integer
        | XmlDataType::Long => {
            let v = Pl::new(raw)
                .to_u64()
                .map_err(|e| Error::invalid(format!("numeric value: {e}")))?;
            Ok(XmlValue::U64(v))
        }
        XmlDataType::String => Ok(XmlValue::Str(Pl::new(raw))),
        other => Err(Error::invalid(format!(
            "no value coercion for data type {other:?}"
        ))),
    }
}

/// Coerce against a simple type: base conversion then facet validation.
pub(crate) fn convert_simple_value<'a>(st: &SimpleType, raw: &'a [u8]) -> Result<XmlValue<'a>> {
    let value = convert_xs_value(st.base, raw)?;
    validate_facets(st, &value)?;
    Ok(value)
}

fn validate_facets(st: &SimpleType, value: &XmlValue<'_>) -> Result<()> {
    match value {
        XmlValue::U64(v) => validate_numeric_facets(st, *v),
        XmlValue::Str(pl) => validate_string_facets(st, pl),
        // Booleans carry no facet the supported set can constrain.
        _ => Ok(()),
    }
}

fn validate_numeric_facets(st: &SimpleType, v: u64) -> Result<()> {
    let mut has_enum = false;
    let mut enum_hit = false;

    for facet in st.facets.iter() {
        match facet {
            Facet::MinInclusive(lo) if v < *lo => {
                return Err(facet_err(format!("{v} below minInclusive {lo}")));
            }
            Facet::MaxInclusive(hi) if v > *hi => {
                return Err(facet_err(format!("{v} above maxInclusive {hi}")));
            }
            Facet::MinExclusive(lo) if v <= *lo => {
                return Err(facet_err(format!("{v} not above minExclusive {lo}")));
            }
            Facet::MaxExclusive(hi) if v >= *hi => {
                return Err(facet_err(format!("{v} not below maxExclusive {hi}")));
            }
            Facet::TotalDigits(n) => {
                let digits = count_digits(v);
                if digits > *n {
                    return Err(facet_err(format!(
                        "{v} has {digits} digits, totalDigits allows {n}"
                    )));
                }
            }
            Facet::EnumNum(e) => {
                has_enum = true;
                enum_hit = enum_hit || v == *e;
            }
            _ => {}
        }
    }

    if has_enum && !enum_hit {
        return Err(facet_err(format!("{v} is not an enumerated value")));
    }
    Ok(())
}

fn validate_string_facets(st: &SimpleType, pl: &Pl<'_>) -> Result<()> {
    let len = pl.len() as u64;
    let mut has_enum = false;
    let mut enum_hit = false;

    for facet in st.facets.iter() {
        match facet {
            Facet::Length(n) if len != *n => {
                return Err(facet_err(format!("length {len} differs from fixed length {n}")));
            }
            Facet::MinLength(n) if len < *n => {
                return Err(facet_err(format!("length {len} below minLength {n}")));
            }
            Facet::MaxLength(n) if len > *n => {
                return Err(facet_err(format!("length {len} above maxLength {n}")));
            }
            Facet::EnumStr(e) => {
                has_enum = true;
                enum_hit = enum_hit || pl.eq_str(e);
            }
            _ => {}
        }
    }

    if has_enum && !enum_hit {
        return Err(facet_err(format!("'{pl}' is not an enumerated value")));
    }
    Ok(())
}

fn facet_err(reason: String) -> Error {
    Error::invalid(format!("facet violation: {reason}"))
}

fn count_digits(v: u64) -> u32 {
    if v == 0 {
        1
    } else {
        v.ilog10() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::ListPlus;

    fn st(base: XmlDataType, facets: Vec<Facet>) -> SimpleType {
        SimpleType {
            type_name: None,
            base,
            facets: facets.into_iter().collect::<ListPlus<_>>(),
        }
    }

    #[test]
    fn boolean_lexical_space() {
        assert!(matches!(
            convert_xs_value(XmlDataType::Boolean, b"true").unwrap(),
            XmlValue::Bool(true)
        ));
        assert!(matches!(
            convert_xs_value(XmlDataType::Boolean, b"0").unwrap(),
            XmlValue::Bool(false)
        ));
        assert!(convert_xs_value(XmlDataType::Boolean, b"TRUE").is_err());
        assert!(convert_xs_value(XmlDataType::Boolean, b"yes").is_err());
    }

    #[test]
    fn numeric_rejects_non_digits() {
        assert!(matches!(
            convert_xs_value(XmlDataType::Integer, b"40075").unwrap(),
            XmlValue::U64(40075)
        ));
        assert!(convert_xs_value(XmlDataType::Integer, b"40a75").is_err());
        assert!(convert_xs_value(XmlDataType::Integer, b"").is_err());
    }

    #[test]
    fn inclusive_and_exclusive_bounds() {
        let t = st(
            XmlDataType::Integer,
            vec![Facet::MinInclusive(10), Facet::MaxExclusive(20)],
        );
        assert!(convert_simple_value(&t, b"10").is_ok());
        assert!(convert_simple_value(&t, b"19").is_ok());
        assert!(convert_simple_value(&t, b"9").is_err());
        assert!(convert_simple_value(&t, b"20").is_err());
    }

    #[test]
    fn total_digits() {
        let t = st(XmlDataType::Long, vec![Facet::TotalDigits(3)]);
        assert!(convert_simple_value(&t, b"999").is_ok());
        assert!(convert_simple_value(&t, b"0").is_ok());
        assert!(convert_simple_value(&t, b"1000").is_err());
    }

    #[test]
    fn numeric_enumeration() {
        let t = st(
            XmlDataType::Short,
            vec![Facet::EnumNum(5060), Facet::EnumNum(5061)],
        );
        assert!(convert_simple_value(&t, b"5060").is_ok());
        assert!(convert_simple_value(&t, b"5062").is_err());
    }

    #[test]
    fn string_lengths_and_enumeration() {
        let t = st(
            XmlDataType::String,
            vec![Facet::MinLength(2), Facet::MaxLength(4)],
        );
        assert!(convert_simple_value(&t, b"ab").is_ok());
        assert!(convert_simple_value(&t, b"a").is_err());
        assert!(convert_simple_value(&t, b"abcde").is_err());

        let e = st(
            XmlDataType::String,
            vec![
                Facet::EnumStr("udp".into()),
                Facet::EnumStr("tcp".into()),
            ],
        );
        assert!(convert_simple_value(&e, b"tcp").is_ok());
        assert!(convert_simple_value(&e, b"sctp").is_err());

        let exact = st(XmlDataType::String, vec![Facet::Length(3)]);
        assert!(convert_simple_value(&exact, b"abc").is_ok());
        assert!(convert_simple_value(&exact, b"ab").is_err());
    }
}
