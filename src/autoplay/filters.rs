//! Hard filters applied to search candidates before any quota is spent on
//! them: cheap title/channel heuristics first, then the duration window.

use crate::sources::SearchResult;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Longer than this is likely a compilation
pub const MAX_MINUTES: u64 = 10;
/// Shorter than this is likely a short-form clip
pub const MIN_MINUTES: u64 = 1;
/// Overlap needed before a superset title counts as the same song
pub const DUPLICATE_MIN_OVERLAP: usize = 3;

static EXPLANATORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(how|why|who is|what is|como (fazer|hacer|tocar|aprender)|quem e|o que e|de onde vem|a historia de)\b",
    )
    .expect("explanatory pattern")
});

static NON_MUSICAL_CHANNEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(documentar\w*|podcast\w*|tutoria\w*|educa\w*|aulas?)\b").expect("channel pattern")
});

static EXCLUDED_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(podcast|interview|entrevista|reaction|reacao|react|reagindo|gameplay|tutorial|documentary|documentario|making[\s-]?of|vlog|challenge|desafio|playlist|compilation|compilacao|top\s*\d+|shorts|live[\s-]?stream|livestream)\b",
    )
    .expect("excluded content pattern")
});

static ALTERNATIVE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(cover|remix|instrumental|karaoke|lyric video|lyrics video|slowed|sped[\s-]?up|speed[\s-]?up)\b",
    )
    .expect("alternative version pattern")
});

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").expect("duration pattern")
});

const STOPWORDS: &[&str] = &[
    // en
    "the", "and", "for", "with", "from", "feat", "official", "video", "audio", "music", "lyric",
    "lyrics", "version", "remastered", "visualizer", "full",
    // pt / es
    "que", "com", "para", "dos", "das", "uma", "por", "del", "los", "las", "nao", "mais",
    "oficial", "clipe", "musica", "letra", "videoclipe", "ao", "vivo",
];

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    AlreadyPlayed,
    Explanatory,
    NonMusicalChannel,
    ExcludedContent,
    AlternativeVersion,
    NearDuplicate,
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Lowercase with common Latin accents removed.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().chars().map(fold_char).collect()
}

/// Words of three or more characters that are not stopwords.
pub fn significant_words(title: &str) -> HashSet<String> {
    normalize(title)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3 && !STOPWORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// True only when every reference word is present in the candidate and at
/// least [`DUPLICATE_MIN_OVERLAP`] words overlap.
pub fn is_near_duplicate(reference: &HashSet<String>, candidate: &HashSet<String>) -> bool {
    let overlap = reference.intersection(candidate).count();
    overlap >= DUPLICATE_MIN_OVERLAP && candidate.is_superset(reference)
}

/// ISO-8601 duration to whole minutes. Seconds >= 30 round the minute up,
/// except when the duration is under one minute.
pub fn parse_duration_minutes(iso: &str) -> Option<u64> {
    let caps = ISO_DURATION.captures(iso.trim())?;
    let field = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let minutes = field(1) * 24 * 60 + field(2) * 60 + field(3);
    let seconds = field(4);

    if minutes > 0 && seconds >= 30 {
        Some(minutes + 1)
    } else {
        Some(minutes + seconds / 60)
    }
}

pub fn within_duration_window(minutes: u64) -> bool {
    (MIN_MINUTES..=MAX_MINUTES).contains(&minutes)
}

/// Title and channel heuristics for one autoplay cycle.
pub struct CandidateFilter<'a> {
    exclude_ids: &'a HashSet<String>,
    reference_id: &'a str,
    reference_words: HashSet<String>,
}

impl<'a> CandidateFilter<'a> {
    pub fn new(exclude_ids: &'a HashSet<String>, reference_id: &'a str, reference_title: &str) -> Self {
        Self {
            exclude_ids,
            reference_id,
            reference_words: significant_words(reference_title),
        }
    }

    /// Checks run in a fixed order; the first that matches wins.
    pub fn check(&self, candidate: &SearchResult) -> Result<(), Rejection> {
        if candidate.video_id == self.reference_id || self.exclude_ids.contains(&candidate.video_id) {
            return Err(Rejection::AlreadyPlayed);
        }

        let title = normalize(&candidate.title);

        if EXPLANATORY.is_match(&title) || title.trim_end().ends_with('?') {
            return Err(Rejection::Explanatory);
        }
        if NON_MUSICAL_CHANNEL.is_match(&normalize(&candidate.channel_title)) {
            return Err(Rejection::NonMusicalChannel);
        }
        if EXCLUDED_CONTENT.is_match(&title) {
            return Err(Rejection::ExcludedContent);
        }
        if ALTERNATIVE_VERSION.is_match(&title) {
            return Err(Rejection::AlternativeVersion);
        }
        if is_near_duplicate(&self.reference_words, &significant_words(&candidate.title)) {
            return Err(Rejection::NearDuplicate);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, title: &str, channel: &str) -> SearchResult {
        SearchResult {
            video_id: id.to_string(),
            title: title.to_string(),
            channel_title: channel.to_string(),
            thumbnail_url: None,
        }
    }

    #[test]
    fn duration_table() {
        let cases = [
            ("PT1H2M3S", Some(62)),
            ("PT10M45S", Some(11)),
            ("PT45S", Some(0)),
            ("PT0M0S", Some(0)),
            ("PT3M29S", Some(3)),
            ("PT4M", Some(4)),
            ("P0D", Some(0)),
            ("garbage", None),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_duration_minutes(input), expected, "{input}");
        }
    }

    #[test]
    fn duration_window_bounds() {
        assert!(!within_duration_window(0));
        assert!(within_duration_window(1));
        assert!(within_duration_window(10));
        assert!(!within_duration_window(11));
    }

    #[test]
    fn significant_words_fold_accents_and_drop_stopwords() {
        let words = significant_words("Matuê - Anos Luz (Clipe Oficial)");
        let expected: HashSet<String> = ["matue", "anos", "luz"].iter().map(|w| w.to_string()).collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn near_duplicate_needs_full_reference_match() {
        let reference = significant_words("Matuê - Anos Luz (Clipe Oficial)");

        let same_song = significant_words("MATUÊ — Anos Luz [Official Audio]");
        assert!(is_near_duplicate(&reference, &same_song));

        let two_shared = significant_words("Matuê - Anos Dourados");
        assert!(!is_near_duplicate(&reference, &two_shared));
    }

    #[test]
    fn short_reference_never_marks_duplicates() {
        let reference = significant_words("Luz");
        assert!(!is_near_duplicate(&reference, &significant_words("Luz Anos Matuê")));
    }

    #[test]
    fn heuristics_apply_in_order() {
        let exclude: HashSet<String> = ["played".to_string()].into();
        let filter = CandidateFilter::new(&exclude, "ref", "Matuê - Anos Luz");

        let cases = [
            (candidate("ref", "Anything", "X"), Err(Rejection::AlreadyPlayed)),
            (candidate("played", "Anything", "X"), Err(Rejection::AlreadyPlayed)),
            (candidate("a", "Quem é Matuê?", "X"), Err(Rejection::Explanatory)),
            (candidate("b", "Why trap took over", "X"), Err(Rejection::Explanatory)),
            (candidate("b2", "Como fazer um beat de trap", "X"), Err(Rejection::Explanatory)),
            (candidate("c", "Melhores do ano", "Rap Podcast BR"), Err(Rejection::NonMusicalChannel)),
            (candidate("d", "Reagindo ao novo som", "X"), Err(Rejection::ExcludedContent)),
            (candidate("e", "TOP 10 trap nacional", "X"), Err(Rejection::ExcludedContent)),
            (candidate("f", "Teto - Dia Azul (Slowed)", "X"), Err(Rejection::AlternativeVersion)),
            (candidate("g", "Anos Luz - Matuê (Áudio Oficial)", "X"), Err(Rejection::NearDuplicate)),
            (candidate("h", "Teto - Dia Azul", "Teto"), Ok(())),
            (candidate("i", "Discover weekly vibes", "X"), Ok(())),
            (candidate("j", "Selena - Como La Flor", "X"), Ok(())),
            (candidate("k", "Porque Te Vas", "Jeanette"), Ok(())),
        ];

        for (c, expected) in cases {
            assert_eq!(filter.check(&c), expected, "{}", c.title);
        }
    }
}
