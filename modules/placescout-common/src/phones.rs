//! Best-effort phone normalization from a fixed country-code table.

/// Map a country name (or ISO-2 code) to an ISO-2 region. Falls back to `US`.
pub fn country_to_region(country: &str) -> String {
    let c = country.trim();
    if c.is_empty() {
        return "US".to_string();
    }
    if c.len() == 2 {
        return c.to_uppercase();
    }
    match c.to_lowercase().as_str() {
        "united states" | "usa" | "u.s.a." => "US",
        "indonesia" => "ID",
        "singapore" => "SG",
        "malaysia" => "MY",
        "philippines" => "PH",
        "thailand" => "TH",
        "vietnam" => "VN",
        "india" => "IN",
        "united kingdom" | "uk" | "great britain" => "GB",
        "canada" => "CA",
        "australia" => "AU",
        _ => "US",
    }
    .to_string()
}

/// Country calling code for an ISO-2 region; empty when unknown.
pub fn country_calling_code(region: &str) -> &'static str {
    match region.to_uppercase().as_str() {
        "US" | "CA" => "+1",
        "ID" => "+62",
        "SG" => "+65",
        "MY" => "+60",
        "PH" => "+63",
        "TH" => "+66",
        "VN" => "+84",
        "IN" => "+91",
        "GB" => "+44",
        "AU" => "+61",
        _ => "",
    }
}

/// Normalize a phone number into national, international, and E.164-ish
/// variants, deduplicated in insertion order. Empty input yields nothing.
pub fn normalize_phones(phone: &str, country: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut add = |v: String| {
        let v = v.trim().to_string();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    };

    let s = phone.trim();
    if s.is_empty() {
        return Vec::new();
    }

    // Keep digits, preserving a leading '+'
    let digits: String = s.chars().filter(|r| r.is_ascii_digit() || *r == '+').collect();

    let region = country_to_region(country);
    let cc = country_calling_code(&region);

    // National, as given
    add(s.to_string());

    // International
    if digits.starts_with('+') {
        add(digits.clone());
    } else if !cc.is_empty() {
        add(format!("{cc} {digits}"));
        add(format!("{cc}{digits}"));
    } else {
        add(digits.clone());
    }

    // E.164 (best effort)
    if digits.starts_with('+') {
        add(digits);
    } else if !cc.is_empty() {
        add(format!("{cc}{digits}"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_phone_yields_nothing() {
        assert!(normalize_phones("", "Indonesia").is_empty());
        assert!(normalize_phones("   ", "US").is_empty());
    }

    #[test]
    fn indonesian_number_gets_cc62_variants() {
        let phones = normalize_phones("(021) 555-1234", "Indonesia");
        assert!(phones.contains(&"(021) 555-1234".to_string()));
        assert!(phones.contains(&"+62 0215551234".to_string()));
        assert!(phones.contains(&"+620215551234".to_string()));
        // no duplicates
        let mut sorted = phones.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), phones.len());
    }

    #[test]
    fn already_international_not_double_prefixed() {
        let phones = normalize_phones("+1 415 555 0100", "United States");
        assert!(phones.contains(&"+14155550100".to_string()));
        assert!(!phones.iter().any(|p| p.starts_with("+1+")));
    }

    #[test]
    fn unknown_country_falls_back_to_us() {
        assert_eq!(country_to_region("Atlantis"), "US");
        assert_eq!(country_to_region(""), "US");
    }

    #[test]
    fn iso2_passthrough() {
        assert_eq!(country_to_region("id"), "ID");
        assert_eq!(country_calling_code("ID"), "+62");
    }

    #[test]
    fn normalize_is_superset_on_reapplication() {
        // parse_phones(normalize_phones(x)) ⊇ parse_phones(x)
        let first = normalize_phones("(021) 555-1234", "ID");
        for p in &first {
            let again = normalize_phones(p, "ID");
            assert!(again.contains(p));
        }
    }
}
