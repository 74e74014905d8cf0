use crate::table::Cell;

/// Slack added to the tolerance so that binary rounding never turns an exact
/// one-cent difference into a reported divergence.
const FLOAT_SLACK: f64 = 1e-9;

/// Parses a monetary amount written with either comma or dot as the
/// fractional separator, with optional thousands grouping and currency prefix.
///
/// # Examples
/// - `"1.234,56"` -> 1234.56
/// - `"1,234.56"` -> 1234.56
/// - `"R$ 10,5"` -> 10.5
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            if comma > dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) => {
            if cleaned.matches(',').count() == 1 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) => {
            if cleaned.matches('.').count() > 1 {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        (None, None) => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_amount_cell(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) if n.is_finite() => Some(*n),
        Cell::Number(_) | Cell::Empty => None,
        Cell::Text(s) => parse_amount(s),
    }
}

pub fn amounts_match(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance + FLOAT_SLACK
}

/// Strips every punctuation mark so `12.345.678/0001-90` compares equal to `12345678000190`.
pub fn normalize_party_id(party_id: &str) -> String {
    party_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Checks the `NN.NNN.NNN/NNNN-NN` shape (18 characters with punctuation).
pub fn is_valid_party_id(party_id: &str) -> bool {
    const SHAPE: &[u8] = b"99.999.999/9999-99";
    let bytes = party_id.trim().as_bytes();
    bytes.len() == SHAPE.len()
        && bytes.iter().zip(SHAPE).all(|(b, s)| match s {
            b'9' => b.is_ascii_digit(),
            other => b == other,
        })
}

/// Reduces a service code to its bare integer part.
///
/// Codes arrive as floats (`1880.0`), integers, dotted codes (`14.02`) or
/// `"code - description"` strings; all of them reduce to the integer part
/// of the leading code. Returns `None` for blank input.
pub fn normalize_service_code(raw: &str) -> Option<String> {
    let code = raw.split(" - ").next().unwrap_or(raw).trim();
    if code.is_empty() {
        return None;
    }

    match code.replace(',', ".").parse::<f64>() {
        Ok(value) if value.is_finite() => Some(format!("{}", value.trunc() as i64)),
        _ => Some(code.to_string()),
    }
}

pub fn normalize_service_code_cell(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Number(n) if n.is_finite() => Some(format!("{}", n.trunc() as i64)),
        other => other.as_text().and_then(|t| normalize_service_code(&t)),
    }
}

/// Case-insensitive identity used for cross-source joins.
pub fn id_key(external_id: &str) -> String {
    external_id.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_separators() {
        assert_eq!(parse_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("100,00"), Some(100.0));
        assert_eq!(parse_amount("100.5"), Some(100.5));
        assert_eq!(parse_amount("1.234.567"), Some(1234567.0));
        assert_eq!(parse_amount("R$ 10,5"), Some(10.5));
        assert_eq!(parse_amount("-3,10"), Some(-3.1));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount("12,3x"), None);
    }

    #[test]
    fn test_amounts_match_at_one_cent() {
        assert!(amounts_match(100.00, 100.01, 0.01));
        assert!(amounts_match(0.1 + 0.2, 0.3, 0.01));
        assert!(!amounts_match(100.00, 100.02, 0.01));
    }

    #[test]
    fn test_party_id_shape() {
        assert!(is_valid_party_id("07.175.725/0030-02"));
        assert!(!is_valid_party_id("07175725003002"));
        assert!(!is_valid_party_id("07.175.725/0030-0"));
        assert!(!is_valid_party_id("AB.175.725/0030-02"));
        assert_eq!(normalize_party_id("07.175.725/0030-02"), "07175725003002");
    }

    #[test]
    fn test_service_code_normalization() {
        assert_eq!(normalize_service_code("14.02 - Assistência Técnica").as_deref(), Some("14"));
        assert_eq!(normalize_service_code("3115 - Assessoria E Consultoria").as_deref(), Some("3115"));
        assert_eq!(normalize_service_code("1880.0").as_deref(), Some("1880"));
        assert_eq!(normalize_service_code("1.07").as_deref(), Some("1"));
        assert_eq!(normalize_service_code("  ").as_deref(), None);
        assert_eq!(normalize_service_code_cell(&Cell::Number(3115.0)).as_deref(), Some("3115"));
    }
}
