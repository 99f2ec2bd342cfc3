//! Static team alias table
//!
//! Sources spell team identity three ways: official abbreviations, city
//! names, and nicknames. Everything funnels into the canonical abbreviation
//! used by the canonical game id.

/// Canonical MLB team abbreviations
pub const TEAM_ABBREVS: [&str; 30] = [
    "ARI", "ATL", "BAL", "BOS", "CHC", "CWS", "CIN", "CLE", "COL", "DET", "HOU", "KC", "LAA",
    "LAD", "MIA", "MIL", "MIN", "NYM", "NYY", "OAK", "PHI", "PIT", "SD", "SF", "SEA", "STL", "TB",
    "TEX", "TOR", "WSH",
];

/// Alias rows: lowercase alias → canonical abbreviation
const ALIASES: &[(&str, &str)] = &[
    ("arizona diamondbacks", "ARI"),
    ("diamondbacks", "ARI"),
    ("d-backs", "ARI"),
    ("atlanta braves", "ATL"),
    ("braves", "ATL"),
    ("baltimore orioles", "BAL"),
    ("orioles", "BAL"),
    ("boston red sox", "BOS"),
    ("red sox", "BOS"),
    ("chicago cubs", "CHC"),
    ("cubs", "CHC"),
    ("chicago white sox", "CWS"),
    ("white sox", "CWS"),
    ("chw", "CWS"),
    ("cha", "CWS"),
    ("cincinnati reds", "CIN"),
    ("reds", "CIN"),
    ("cleveland guardians", "CLE"),
    ("guardians", "CLE"),
    ("colorado rockies", "COL"),
    ("rockies", "COL"),
    ("detroit tigers", "DET"),
    ("tigers", "DET"),
    ("houston astros", "HOU"),
    ("astros", "HOU"),
    ("kansas city royals", "KC"),
    ("royals", "KC"),
    ("kcr", "KC"),
    ("los angeles angels", "LAA"),
    ("angels", "LAA"),
    ("ana", "LAA"),
    ("los angeles dodgers", "LAD"),
    ("dodgers", "LAD"),
    ("miami marlins", "MIA"),
    ("marlins", "MIA"),
    ("milwaukee brewers", "MIL"),
    ("brewers", "MIL"),
    ("minnesota twins", "MIN"),
    ("twins", "MIN"),
    ("new york mets", "NYM"),
    ("mets", "NYM"),
    ("new york yankees", "NYY"),
    ("yankees", "NYY"),
    ("ny yankees", "NYY"),
    ("oakland athletics", "OAK"),
    ("athletics", "OAK"),
    ("a's", "OAK"),
    ("ath", "OAK"),
    ("philadelphia phillies", "PHI"),
    ("phillies", "PHI"),
    ("pittsburgh pirates", "PIT"),
    ("pirates", "PIT"),
    ("san diego padres", "SD"),
    ("padres", "SD"),
    ("sdp", "SD"),
    ("san francisco giants", "SF"),
    ("giants", "SF"),
    ("sfg", "SF"),
    ("seattle mariners", "SEA"),
    ("mariners", "SEA"),
    ("st. louis cardinals", "STL"),
    ("st louis cardinals", "STL"),
    ("cardinals", "STL"),
    ("tampa bay rays", "TB"),
    ("rays", "TB"),
    ("tbr", "TB"),
    ("texas rangers", "TEX"),
    ("rangers", "TEX"),
    ("toronto blue jays", "TOR"),
    ("blue jays", "TOR"),
    ("washington nationals", "WSH"),
    ("nationals", "WSH"),
    ("was", "WSH"),
    ("wsn", "WSH"),
];

/// Resolve any team spelling to its canonical abbreviation.
pub fn normalize_team(name: &str) -> Option<&'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_ascii_uppercase();
    if let Some(abbrev) = TEAM_ABBREVS.iter().find(|a| **a == upper) {
        return Some(abbrev);
    }

    let lower = trimmed.to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, abbrev)| *abbrev)
}

/// Whether the string already is a canonical abbreviation.
pub fn is_canonical_abbrev(abbrev: &str) -> bool {
    let upper = abbrev.trim().to_ascii_uppercase();
    TEAM_ABBREVS.iter().any(|a| *a == upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_passthrough() {
        assert_eq!(normalize_team("NYY"), Some("NYY"));
        assert_eq!(normalize_team("nyy"), Some("NYY"));
        assert_eq!(normalize_team(" bos "), Some("BOS"));
    }

    #[test]
    fn test_full_name_and_nickname() {
        assert_eq!(normalize_team("New York Yankees"), Some("NYY"));
        assert_eq!(normalize_team("yankees"), Some("NYY"));
        assert_eq!(normalize_team("St. Louis Cardinals"), Some("STL"));
        assert_eq!(normalize_team("white sox"), Some("CWS"));
    }

    #[test]
    fn test_variant_abbrevs() {
        assert_eq!(normalize_team("CHW"), Some("CWS"));
        assert_eq!(normalize_team("WAS"), Some("WSH"));
        assert_eq!(normalize_team("TBR"), Some("TB"));
    }

    #[test]
    fn test_unknown_team() {
        assert_eq!(normalize_team("Montreal Expos"), None);
        assert_eq!(normalize_team(""), None);
    }

    #[test]
    fn test_every_alias_targets_known_abbrev() {
        for (_, abbrev) in ALIASES {
            assert!(is_canonical_abbrev(abbrev), "bad alias target {}", abbrev);
        }
    }
}
