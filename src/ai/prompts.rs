use super::ValidationCandidate;
use crate::autoplay::strategy::SearchStrategy;

pub const QUERY_SYSTEM: &str = "You are a music expert who analyses songs and writes optimised YouTube \
search queries. Always answer with valid JSON.";

pub const VALIDATION_SYSTEM: &str =
    "You are a music content validator. Always answer with valid JSON.";

pub fn query_prompt(title: &str, channel: &str, history: &[String], strategy: SearchStrategy) -> String {
    let history = if history.is_empty() {
        "- (nothing played yet)".to_string()
    } else {
        let start = history.len().saturating_sub(10);
        history[start..]
            .iter()
            .map(|h| format!("- {h}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let strategy = format!("{} - {}", strategy.index(), strategy.description());

    format!(
        r#"Analyse this song and write an optimised YouTube search query.

CURRENT SONG:
- Title: "{title}"
- Channel/Artist: "{channel}"

RECENT HISTORY (already played, AVOID REPEATING):
{history}

SEARCH STRATEGY: {strategy}

INSTRUCTIONS:
1. Detect main artist, genre, mood/energy and language.
2. Decide if it is Brazilian, international, indie or mainstream.
3. Never suggest artists or songs from the history.
4. Write a query that brings DIVERSE but musically COHERENT results.

RULES:
- Brazilian song: add "brasileiro", "nacional" or "br" to the query.
- International song: use English terms such as "official", "music", "similar to".
- Strategies 0-1: keep the genre, vary the artists.
- Strategies 2-3: be creative and explore related genres.
- Prefer terms that return OFFICIAL songs (not covers or remixes).

Answer ONLY with JSON in this exact shape:
{{
  "query": "search query, 3-8 words",
  "type": "similar_artist|genre|mood|exploratory",
  "genre": "detected genre",
  "isInternational": true or false,
  "explanation": "short reason, max 60 chars"
}}"#
    )
}

pub fn validation_prompt(candidates: &[ValidationCandidate], ref_title: &str, ref_channel: &str) -> String {
    let videos = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. Title: \"{}\" | Channel: \"{}\"", i + 1, c.title, c.channel))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Decide whether each YouTube video is a SONG suitable for autoplay or UNWANTED content.

REFERENCE SONG:
Title: "{ref_title}"
Channel: "{ref_channel}"

VIDEOS FOUND:
{videos}

UNWANTED: documentaries and explainers, podcasts and interviews, reactions and reviews,
tutorials and making-of, gameplay, vlogs, challenges, long compilations and playlists,
motivational or meditation videos, anything that is not music to listen to.

SUITABLE (be flexible): official audio or video, featurings, covers, remixes, acoustic
versions, lyric videos, live performances, songs of the same or similar genres.

Answer ONLY with JSON:
{{
  "validations": [
    {{ "index": 1, "approved": true or false, "reason": "short reason, max 50 chars" }}
  ]
}}

When in doubt between music and non-music: APPROVE."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_prompt_keeps_last_ten_history_titles() {
        let history: Vec<String> = (0..15).map(|i| format!("Song {i}")).collect();
        let prompt = query_prompt("Title", "Channel", &history, SearchStrategy::AdjacentGenre);

        assert!(!prompt.contains("- Song 4\n"));
        assert!(prompt.contains("- Song 5"));
        assert!(prompt.contains("- Song 14"));
        assert!(prompt.contains("SEARCH STRATEGY: 2 - adjacent genres"));
    }

    #[test]
    fn validation_prompt_numbers_candidates_from_one() {
        let candidates = vec![
            ValidationCandidate { title: "A".into(), channel: "X".into() },
            ValidationCandidate { title: "B".into(), channel: "Y".into() },
        ];
        let prompt = validation_prompt(&candidates, "Ref", "RefChan");
        assert!(prompt.contains("1. Title: \"A\" | Channel: \"X\""));
        assert!(prompt.contains("2. Title: \"B\" | Channel: \"Y\""));
    }
}
