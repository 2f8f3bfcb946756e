//! Visitor language inference and the localized canned replies

use crate::session::Language;

/// Language assumed when a message gives no usable signal
pub const FALLBACK_LANGUAGE: Language = Language::Norwegian;

const NORWEGIAN_KEYWORDS: &[&str] = &[
    "hei",
    "hva",
    "hvordan",
    "takk",
    "vær",
    "besøkende",
    "kontakt",
    "erfaring",
    "ferdigheter",
    "bakgrunn",
];

const ENGLISH_KEYWORDS: &[&str] = &[
    "hello",
    "what",
    "how",
    "thanks",
    "please",
    "contact",
    "background",
    "experience",
    "skills",
    "portfolio",
];

/// Guesses the visitor's language from word-level keywords and the letters æ, ø, å
///
/// Any Norwegian letter settles it. Otherwise whichever keyword list matches more words wins;
/// ties and messages with no matches fall back to Norwegian.
pub fn detect_language(text: &str) -> Language {
    let lowered = text.to_lowercase();
    if lowered.contains(['æ', 'ø', 'å']) {
        return Language::Norwegian;
    }

    let mut norwegian = 0usize;
    let mut english = 0usize;
    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if NORWEGIAN_KEYWORDS.contains(&word) {
            norwegian += 1;
        }
        if ENGLISH_KEYWORDS.contains(&word) {
            english += 1;
        }
    }

    if english > norwegian {
        Language::English
    } else {
        FALLBACK_LANGUAGE
    }
}

/// Reply sent instead of a model answer when the visitor is over the rate limit
pub fn rate_limit_message(language: Language) -> &'static str {
    match language {
        Language::English => {
            "I'd love to keep chatting, but I can only respond to a few messages per minute per \
             visitor. Please try again in a moment."
        }
        Language::Norwegian => {
            "Jeg svarer gjerne, men jeg er begrenset til noen få meldinger per minutt per \
             besøkende. Prøv igjen om et lite øyeblikk."
        }
    }
}

/// Apology sent when the model backend fails or times out
pub fn fallback_message(language: Language) -> &'static str {
    match language {
        Language::English => {
            "Sorry, I ran into an issue reaching the service. Please try again shortly."
        }
        Language::Norwegian => {
            "Beklager, jeg støtte på et problem med tjenesten min. Kan du prøve igjen om litt?"
        }
    }
}
