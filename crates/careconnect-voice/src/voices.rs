//! Local voice catalog and the voice selection cascade.

use serde::Serialize;

/// A voice offered by the local synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voice {
    /// Display name, matched exactly by the preference list.
    pub name: String,
    /// BCP-47 tag, normalized (`en-US`).
    pub lang: String,
    /// Identifier handed back to the synthesizer.
    pub id: String,
}

/// Pick a voice; first match wins:
/// 1. `requested` by exact name
/// 2. `preferred` names, in order
/// 3. first name containing "Female"
/// 4. first voice tagged `en-US`
///
/// `None` means "use the platform default"; an empty catalog is not an error.
pub fn select_voice<'a>(
    catalog: &'a [Voice],
    requested: Option<&str>,
    preferred: &[String],
) -> Option<&'a Voice> {
    let by_name = |name: &str| catalog.iter().find(|v| v.name == name);

    requested
        .and_then(by_name)
        .or_else(|| preferred.iter().find_map(|p| by_name(p.as_str())))
        .or_else(|| catalog.iter().find(|v| v.name.contains("Female")))
        .or_else(|| catalog.iter().find(|v| v.lang == "en-US"))
}

/// `en_us` / `EN-us` → `en-US`; script and variant subtags keep their case rules.
pub fn normalize_lang(tag: &str) -> String {
    tag.split(['-', '_'])
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, part)| match (i, part.chars().count()) {
            (0, _) => part.to_lowercase(),
            (_, 2) => part.to_uppercase(),
            (_, 4) => {
                let mut chars = part.chars();
                chars
                    .next()
                    .map(|first| first.to_uppercase().chain(chars.flat_map(char::to_lowercase)))
                    .into_iter()
                    .flatten()
                    .collect()
            }
            _ => part.to_lowercase(),
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(name: &str, lang: &str) -> Voice {
        Voice {
            name: name.to_string(),
            lang: lang.to_string(),
            id: name.to_lowercase(),
        }
    }

    fn preferred() -> Vec<String> {
        careconnect_core::SynthesisConfig::default().preferred_voices
    }

    #[test]
    fn samantha_wins_without_higher_priority_match() {
        let catalog = vec![
            voice("Alex", "en-US"),
            voice("Victoria Female", "en-US"),
            voice("Samantha", "en-US"),
        ];
        assert_eq!(select_voice(&catalog, None, &preferred()).unwrap().name, "Samantha");
    }

    #[test]
    fn preference_order_beats_catalog_order() {
        let catalog = vec![voice("Samantha", "en-US"), voice("Google US English", "en-US")];
        assert_eq!(
            select_voice(&catalog, None, &preferred()).unwrap().name,
            "Google US English"
        );
    }

    #[test]
    fn explicit_request_comes_first() {
        let catalog = vec![voice("Samantha", "en-US"), voice("Daniel", "en-GB")];
        assert_eq!(
            select_voice(&catalog, Some("Daniel"), &preferred()).unwrap().name,
            "Daniel"
        );
        // Unknown request falls through the cascade.
        assert_eq!(
            select_voice(&catalog, Some("Nobody"), &preferred()).unwrap().name,
            "Samantha"
        );
    }

    #[test]
    fn heuristics_then_default() {
        let catalog = vec![voice("Karen", "en-AU"), voice("English Female", "en-GB")];
        assert_eq!(select_voice(&catalog, None, &preferred()).unwrap().name, "English Female");

        let catalog = vec![voice("Karen", "en-AU"), voice("Fred", "en-US")];
        assert_eq!(select_voice(&catalog, None, &preferred()).unwrap().name, "Fred");

        assert!(select_voice(&[], None, &preferred()).is_none());
        assert!(select_voice(&[voice("Karen", "en-AU")], None, &[]).is_none());
    }

    #[test]
    fn lang_tags_are_normalized() {
        assert_eq!(normalize_lang("en-us"), "en-US");
        assert_eq!(normalize_lang("EN_gb"), "en-GB");
        assert_eq!(normalize_lang("zh-hant-tw"), "zh-Hant-TW");
        assert_eq!(normalize_lang("fr"), "fr");
        // Malformed catalog entries must not take the synthesis task down.
        assert_eq!(normalize_lang("en-éé"), "en-ÉÉ");
        assert_eq!(normalize_lang("xx-éab"), "xx-éab");
        assert_eq!(normalize_lang("xx-éabc"), "xx-Éabc");
        assert_eq!(normalize_lang("xx-ÉABC-us"), "xx-Éabc-US");
    }
}
