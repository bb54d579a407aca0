//! Deterministic query generator used whenever the AI service is not usable.

use super::QueryAnalysis;
use crate::autoplay::strategy::SearchStrategy;

const INTERNATIONAL_INDICATORS: &[&str] = &[
    "official video",
    "vevo",
    "lyrics",
    "official audio",
    "official music video",
];

const INTERNATIONAL_ARTISTS: &[&str] = &[
    "adele",
    "ed sheeran",
    "taylor swift",
    "drake",
    "beyoncé",
    "ariana grande",
    "billie eilish",
    "the weeknd",
    "dua lipa",
    "harry styles",
    "post malone",
    "travis scott",
    "kendrick lamar",
    "bruno mars",
    "rihanna",
    "justin bieber",
    "sia",
    "coldplay",
    "imagine dragons",
    "maroon 5",
    "one direction",
    "sam smith",
    "lewis capaldi",
    "shawn mendes",
    "camila cabello",
    "demi lovato",
    "selena gomez",
    "miley cyrus",
    "katy perry",
    "lady gaga",
    "pink",
    "eminem",
    "snoop dogg",
    "dr dre",
    "50 cent",
    "jay-z",
    "kanye west",
    "foo fighters",
    "linkin park",
    "green day",
    "red hot chili peppers",
    "amy winehouse",
    "jessie j",
    "alicia keys",
    "john legend",
    "frank ocean",
];

/// First matching genre wins, so order matters ("trap" is caught by rap).
const GENRE_KEYWORDS: &[(&str, &[&str])] = &[
    ("rap", &["rap", "hip hop", "freestyle", "trap"]),
    ("trap", &["trap"]),
    ("funk", &["funk", "baile"]),
    ("rock", &["rock", "metal", "punk"]),
    ("pop", &["pop"]),
    ("acústico", &["acústico", "acoustic", "violão", "guitar"]),
    ("sertanejo", &["sertanejo", "country"]),
    ("pagode", &["pagode", "samba"]),
    ("reggae", &["reggae", "ska"]),
];

pub fn is_international(title: &str, channel: &str) -> bool {
    let title = title.to_lowercase();
    let channel = channel.to_lowercase();

    INTERNATIONAL_INDICATORS.iter().any(|ind| title.contains(ind))
        || INTERNATIONAL_ARTISTS.iter().any(|artist| channel.contains(artist))
}

pub fn detect_genre(title: &str, channel: &str) -> Option<&'static str> {
    let title = title.to_lowercase();
    let channel = channel.to_lowercase();

    GENRE_KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|kw| title.contains(kw) || channel.contains(kw))
        })
        .map(|(genre, _)| *genre)
}

/// Artist guess: title text before the first separator.
fn leading_artist(title: &str) -> &str {
    title
        .split(['-', '–', '(', '|'])
        .next()
        .unwrap_or(title)
        .trim()
}

pub fn fallback_query(title: &str, channel: &str, strategy: SearchStrategy) -> QueryAnalysis {
    let international = is_international(title, channel);
    let genre = detect_genre(title, channel);

    let query = match (strategy, genre) {
        (SearchStrategy::VerySimilar, Some(genre)) if international => {
            format!("{genre} music official 2024")
        }
        (SearchStrategy::VerySimilar, Some(genre)) => format!("{genre} brasileiro oficial"),
        (SearchStrategy::VerySimilar, None) if international => {
            format!("{} similar artists music", leading_artist(title))
        }
        (SearchStrategy::VerySimilar, None) => format!("{} música brasileira", leading_artist(title)),
        (SearchStrategy::ExpandGenre, Some(genre)) if international => {
            format!("{genre} best songs 2023 2024")
        }
        (SearchStrategy::ExpandGenre, Some(genre)) => format!("{genre} nacional 2024"),
        (SearchStrategy::ExpandGenre, None) if international => "top music 2024".to_string(),
        (SearchStrategy::ExpandGenre, None) => "música brasileira 2024".to_string(),
        (SearchStrategy::AdjacentGenre, _) if international => {
            "indie alternative music official".to_string()
        }
        (SearchStrategy::AdjacentGenre, _) => "indie brasileiro música alternativa".to_string(),
        (SearchStrategy::Broad, _) if international => "popular music official audio".to_string(),
        (SearchStrategy::Broad, _) => "música brasileira popular oficial".to_string(),
    };

    QueryAnalysis {
        query,
        kind: "fallback".to_string(),
        genre: genre.unwrap_or("unknown").to_string(),
        is_international: international,
        explanation: "Generated locally (AI unavailable)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn templates_follow_strategy_and_origin() {
        let cases = [
            ("Djonga - Olho de Tigre (rap)", "Djonga", SearchStrategy::VerySimilar, "rap brasileiro oficial"),
            ("Skyfall (Official Audio) pop", "Adele", SearchStrategy::VerySimilar, "pop music official 2024"),
            ("Matuê - 777-666", "Matuê", SearchStrategy::VerySimilar, "Matuê música brasileira"),
            ("Hello", "Adele", SearchStrategy::VerySimilar, "Hello similar artists music"),
            ("Pagode do Bom", "Grupo", SearchStrategy::ExpandGenre, "pagode nacional 2024"),
            ("Hello", "Adele", SearchStrategy::ExpandGenre, "top music 2024"),
            ("Matuê - 777-666", "Matuê", SearchStrategy::ExpandGenre, "música brasileira 2024"),
            ("Hello", "Adele", SearchStrategy::AdjacentGenre, "indie alternative music official"),
            ("Matuê - 777-666", "Matuê", SearchStrategy::AdjacentGenre, "indie brasileiro música alternativa"),
            ("Matuê - 777-666", "Matuê", SearchStrategy::Broad, "música brasileira popular oficial"),
        ];

        for (title, channel, strategy, expected) in cases {
            assert_eq!(fallback_query(title, channel, strategy).query, expected, "{title} / {strategy:?}");
        }
    }

    #[test]
    fn trap_is_reported_as_rap() {
        assert_eq!(detect_genre("Trap do Momento", "Canal"), Some("rap"));
        assert_eq!(detect_genre("Noite Calma", "Canal"), None);
    }

    #[test]
    fn vevo_titles_are_international() {
        assert!(is_international("Song (Official Music Video)", "Someone"));
        assert!(is_international("Song", "TaylorSwiftVEVO - taylor swift"));
        assert!(!is_international("Música Boa", "Canal BR"));
    }
}
