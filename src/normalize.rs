// 🧹 Normalization - Canonical forms for names, domains, places and tags
//
// Everything the blocker and feature extractor compare goes through here
// first, so "California Public Employees' Retirement System, Inc." and
// "california public employees retirement system" look the same.

use rphonetic::{DoubleMetaphone, Encoder};
use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// WORD LISTS
// ============================================================================

/// Legal-form suffixes stripped from the end of a name
const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "llp", "lllp", "lp", "ltd", "limited", "plc", "corp",
    "corporation", "co", "gmbh", "ag", "sa", "sarl", "bv", "nv",
];

/// Connector words that carry no identity (dropped from significant tokens)
const NAME_STOPWORDS: &[&str] = &["the", "of", "and", "for", "de", "du", "des", "la", "le", "at"];

/// Industry words too common to be useful as blocking keys on their own
const GENERIC_TOKENS: &[&str] = &[
    "capital", "partners", "partner", "fund", "funds", "management", "investment",
    "investments", "advisors", "advisers", "group", "holdings", "asset", "assets",
    "ventures", "equity", "global", "private", "retirement", "system", "pension",
    "pensions", "foundation", "trust", "university", "endowment", "employees", "public",
    "state", "county", "city", "board", "association", "company", "office", "family",
    "teachers", "national", "international",
];

/// Country names and ISO-3 codes we fold to ISO-3166 alpha-2
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("united states", "US"),
    ("united states of america", "US"),
    ("usa", "US"),
    ("us", "US"),
    ("u s a", "US"),
    ("u s", "US"),
    ("america", "US"),
    ("united kingdom", "GB"),
    ("uk", "GB"),
    ("gbr", "GB"),
    ("great britain", "GB"),
    ("england", "GB"),
    ("canada", "CA"),
    ("can", "CA"),
    ("germany", "DE"),
    ("deu", "DE"),
    ("france", "FR"),
    ("fra", "FR"),
    ("netherlands", "NL"),
    ("nld", "NL"),
    ("switzerland", "CH"),
    ("che", "CH"),
    ("japan", "JP"),
    ("jpn", "JP"),
    ("china", "CN"),
    ("chn", "CN"),
    ("singapore", "SG"),
    ("sgp", "SG"),
    ("australia", "AU"),
    ("aus", "AU"),
    ("norway", "NO"),
    ("nor", "NO"),
    ("sweden", "SE"),
    ("swe", "SE"),
    ("denmark", "DK"),
    ("dnk", "DK"),
    ("united arab emirates", "AE"),
    ("uae", "AE"),
    ("are", "AE"),
    ("saudi arabia", "SA"),
    ("sau", "SA"),
    ("hong kong", "HK"),
    ("hkg", "HK"),
    ("south korea", "KR"),
    ("korea", "KR"),
    ("kor", "KR"),
    ("brazil", "BR"),
    ("bra", "BR"),
    ("luxembourg", "LU"),
    ("lux", "LU"),
    ("ireland", "IE"),
    ("irl", "IE"),
];

// ============================================================================
// TEXT FOLDING
// ============================================================================

/// Fold to lowercase ASCII (strips accents via NFKD decomposition)
pub fn fold_ascii(raw: &str) -> String {
    raw.nfkd()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .to_lowercase()
}

/// Lowercase, strip punctuation, join abbreviations ("L.P." -> "lp"),
/// collapse whitespace
fn clean_words(raw: &str) -> Vec<String> {
    let folded = fold_ascii(raw).replace('&', " and ");

    folded
        .chars()
        .filter(|c| *c != '\'' && *c != '.')
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|w| w.to_string())
        .collect()
}

// ============================================================================
// NAMES
// ============================================================================

/// Canonical organization name used by every comparison
///
/// Example: "California Public Employees' Retirement System, Inc."
///        → "california public employees retirement system"
pub fn normalize_name(raw: &str) -> String {
    let mut words = clean_words(raw);

    // Strip trailing legal forms, possibly stacked ("co ltd")
    while words.len() > 1
        && words
            .last()
            .map_or(false, |w| LEGAL_SUFFIXES.contains(&w.as_str()))
    {
        words.pop();
    }

    words.join(" ")
}

/// Tokens of a normalized name, minus connector words
pub fn significant_tokens(normalized: &str) -> Vec<String> {
    normalized
        .split_whitespace()
        .filter(|t| !NAME_STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Token is distinctive enough to act as a blocking key
pub fn is_distinctive_token(token: &str) -> bool {
    token.len() >= 4
        && !GENERIC_TOKENS.contains(&token)
        && !token.chars().all(|c| c.is_ascii_digit())
}

/// Name without spaces ("black stone" → "blackstone")
pub fn squash(normalized: &str) -> String {
    normalized.chars().filter(|c| !c.is_whitespace()).collect()
}

/// First letter of every significant token
pub fn initials(tokens: &[String]) -> String {
    tokens.iter().filter_map(|t| t.chars().next()).collect()
}

/// Can `short` be spelled by taking a prefix of each long-name token, in order?
///
/// Tokens may contribute nothing (skipped), but the first token must
/// contribute and at least two tokens must be used. This accepts
/// "calpers" ← CALifornia Public Employees Retirement System and
/// "nystrs" ← New York State Teachers Retirement System.
pub fn is_abbreviation(short: &str, long_tokens: &[String]) -> bool {
    if short.len() < 2 || long_tokens.len() < 2 {
        return false;
    }
    let short = short.as_bytes();
    let tokens: Vec<&[u8]> = long_tokens.iter().map(|t| t.as_bytes()).collect();

    if tokens[0].first() != short.first() {
        return false;
    }

    fn spell(short: &[u8], si: usize, tokens: &[&[u8]], ti: usize, used: usize) -> bool {
        if si == short.len() {
            return used >= 2;
        }
        if ti == tokens.len() {
            return false;
        }

        let token = tokens[ti];
        let mut k = 0;
        while k < token.len() && si + k < short.len() && token[k] == short[si + k] {
            k += 1;
            // Take the longest useful prefix first
            if spell(short, si + k, tokens, ti + 1, used + 1) {
                return true;
            }
        }

        // The first token anchors the abbreviation and cannot be skipped
        ti > 0 && spell(short, si, tokens, ti + 1, used)
    }

    spell(short, 0, &tokens, 0, 0)
}

/// One name is an abbreviation of the other (either direction)
pub fn abbreviation_match(a_normalized: &str, b_normalized: &str) -> bool {
    let a_tokens = significant_tokens(a_normalized);
    let b_tokens = significant_tokens(b_normalized);

    match (a_tokens.len(), b_tokens.len()) {
        (1, n) if n >= 2 => is_abbreviation(&a_tokens[0], &b_tokens),
        (n, 1) if n >= 2 => is_abbreviation(&b_tokens[0], &a_tokens),
        _ => false,
    }
}

/// Acronym blocking key: initials for multi-token names, the name itself
/// for short single-token names that look like acronyms
pub fn acronym_key(normalized: &str) -> Option<String> {
    let tokens = significant_tokens(normalized);
    match tokens.len() {
        0 => None,
        1 => {
            let token = &tokens[0];
            if (2..=8).contains(&token.len()) {
                Some(token.clone())
            } else {
                None
            }
        }
        _ => {
            let key = initials(&tokens);
            if key.len() >= 3 {
                Some(key)
            } else {
                None
            }
        }
    }
}

// ============================================================================
// PHONETICS
// ============================================================================

/// Double Metaphone primary code for a single token
pub fn phonetic_code(token: &str) -> String {
    let encoder = DoubleMetaphone::default();
    encoder.encode(token)
}

/// Phonetic codes for each significant token of a normalized name
pub fn phonetic_codes(normalized: &str) -> Vec<String> {
    let encoder = DoubleMetaphone::default();
    significant_tokens(normalized)
        .iter()
        .map(|t| encoder.encode(t))
        .filter(|code| !code.is_empty())
        .collect()
}

// ============================================================================
// DOMAINS, PLACES, IDENTIFIERS, TAGS
// ============================================================================

/// Reduce a website/URL/email to a bare registrable host
///
/// "https://www.CalPERS.ca.gov/about" → "calpers.ca.gov"
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    if let Some(at) = s.rfind('@') {
        s = s[at + 1..].to_string();
    }
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.to_string();
        }
    }
    if let Some(slash) = s.find('/') {
        s.truncate(slash);
    }
    if let Some(colon) = s.find(':') {
        s.truncate(colon);
    }
    if let Some(rest) = s.strip_prefix("www.") {
        s = rest.to_string();
    }

    if s.contains('.') && !s.starts_with('.') && !s.ends_with('.') {
        Some(s)
    } else {
        None
    }
}

/// Fold a country name or code to ISO-3166 alpha-2 where we recognize it,
/// otherwise to an uppercase folded form
pub fn normalize_country(raw: &str) -> Option<String> {
    let cleaned = clean_words(raw).join(" ");
    if cleaned.is_empty() {
        return None;
    }

    if let Some((_, code)) = COUNTRY_ALIASES.iter().find(|(name, _)| *name == cleaned) {
        return Some(code.to_string());
    }

    Some(cleaned.to_uppercase())
}

/// Country value is a two-letter code
pub fn is_recognized_country(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase())
}

pub fn normalize_city(raw: &str) -> Option<String> {
    let cleaned = clean_words(raw).join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn normalize_identifier(raw: &str) -> Option<String> {
    let id: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Strategy/geography tag: lowercase snake case
pub fn normalize_tag(raw: &str) -> Option<String> {
    let words = clean_words(raw);
    if words.is_empty() {
        None
    } else {
        Some(words.join("_"))
    }
}

/// Split a `;`- or `|`-separated tag cell
pub fn split_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = raw
        .split(|c| c == ';' || c == '|')
        .filter_map(normalize_tag)
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

// ============================================================================
// SET SIMILARITY
// ============================================================================

pub fn token_set(text: &str) -> BTreeSet<String> {
    significant_tokens(&normalize_name(text)).into_iter().collect()
}

/// |A ∩ B| / |A ∪ B| (None when both sets are empty)
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> Option<f64> {
    if a.is_empty() && b.is_empty() {
        return None;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    Some(intersection / union)
}

/// |A ∩ B| / min(|A|, |B|) (None when either set is empty)
pub fn containment<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let intersection = a.intersection(b).count() as f64;
    Some(intersection / a.len().min(b.len()) as f64)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        significant_tokens(&normalize_name(s))
    }

    #[test]
    fn test_normalize_name_strips_punctuation_and_suffixes() {
        assert_eq!(
            normalize_name("California Public Employees' Retirement System"),
            "california public employees retirement system"
        );
        assert_eq!(normalize_name("Blackstone Group, L.P."), "blackstone group");
        assert_eq!(normalize_name("Acme Capital Co. Ltd."), "acme capital");
        assert_eq!(normalize_name("Crédit Agricole"), "credit agricole");
        assert_eq!(normalize_name("Smith & Sons"), "smith and sons");
    }

    #[test]
    fn test_single_word_suffix_is_kept() {
        // Never strip a name down to nothing
        assert_eq!(normalize_name("Limited"), "limited");
    }

    #[test]
    fn test_abbreviation_calpers() {
        let long = tokens("California Public Employees' Retirement System");
        assert!(is_abbreviation("calpers", &long));
    }

    #[test]
    fn test_abbreviation_initialisms() {
        assert!(is_abbreviation(
            "nystrs",
            &tokens("New York State Teachers' Retirement System")
        ));
        assert!(is_abbreviation(
            "swib",
            &tokens("State of Wisconsin Investment Board")
        ));
        assert!(is_abbreviation(
            "trs",
            &tokens("Teacher Retirement System of Texas")
        ));
        assert!(is_abbreviation("kkr", &tokens("Kohlberg Kravis Roberts")));
    }

    #[test]
    fn test_abbreviation_rejects_unrelated() {
        let long = tokens("California Public Employees' Retirement System");
        assert!(!is_abbreviation("calstrs", &long));
        assert!(!is_abbreviation("apollo", &long));
        // One token alone is a prefix, not an abbreviation
        assert!(!is_abbreviation("blackstone", &tokens("Blackstone Group")));
    }

    #[test]
    fn test_abbreviation_match_is_symmetric() {
        let a = normalize_name("CalPERS");
        let b = normalize_name("California Public Employees' Retirement System");
        assert!(abbreviation_match(&a, &b));
        assert!(abbreviation_match(&b, &a));
        assert!(!abbreviation_match(&a, &a));
    }

    #[test]
    fn test_acronym_key() {
        assert_eq!(
            acronym_key(&normalize_name("New York State Teachers' Retirement System")),
            Some("nystrs".to_string())
        );
        assert_eq!(
            acronym_key(&normalize_name("NYSTRS")),
            Some("nystrs".to_string())
        );
        assert_eq!(acronym_key(&normalize_name("Blackstone")), None);
    }

    #[test]
    fn test_phonetic_codes_match_spelling_variants() {
        assert_eq!(phonetic_code("smith"), phonetic_code("smyth"));
        assert!(!phonetic_codes("carlyle group").is_empty());
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(
            normalize_domain("https://www.CalPERS.ca.gov/about"),
            Some("calpers.ca.gov".to_string())
        );
        assert_eq!(
            normalize_domain("ir@blackstone.com"),
            Some("blackstone.com".to_string())
        );
        assert_eq!(normalize_domain("n/a"), None);
        assert_eq!(normalize_domain(""), None);
    }

    #[test]
    fn test_normalize_country() {
        assert_eq!(normalize_country("United States"), Some("US".to_string()));
        assert_eq!(normalize_country("usa"), Some("US".to_string()));
        assert_eq!(normalize_country("U.S.A."), Some("US".to_string()));
        assert_eq!(normalize_country("us"), Some("US".to_string()));
        assert_eq!(normalize_country("Norway"), Some("NO".to_string()));
        assert_eq!(normalize_country(""), None);
        assert!(is_recognized_country("US"));
        assert!(!is_recognized_country("ATLANTIS"));
    }

    #[test]
    fn test_split_tags() {
        assert_eq!(
            split_tags("Buyout; Growth Equity|buyout"),
            vec!["buyout".to_string(), "growth_equity".to_string()]
        );
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn test_set_similarity() {
        let a: BTreeSet<&str> = ["a", "b", "c"].into_iter().collect();
        let b: BTreeSet<&str> = ["b", "c"].into_iter().collect();
        let empty: BTreeSet<&str> = BTreeSet::new();

        assert_eq!(jaccard(&a, &b), Some(2.0 / 3.0));
        assert_eq!(containment(&a, &b), Some(1.0));
        assert_eq!(jaccard(&empty, &empty), None);
        assert_eq!(containment(&a, &empty), None);
    }
}
