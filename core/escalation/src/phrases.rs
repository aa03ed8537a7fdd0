//! Maps recognized transcripts to confirmation intents.
//! Escalate phrases win over cancel phrases when both match, so ambiguous
//! speech fails toward seeking help.

/// What a transcript (or ranked set of transcripts) resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptClass {
    /// Matched the cancel-phrase set; the user says they are fine.
    Cancel,
    /// Matched the escalate-phrase set; the user is asking for help.
    Escalate,
    /// Matched neither set; listening should restart.
    Unrecognized,
}

/// Classify a single transcript with case-insensitive substring matching.
pub fn classify(transcript: &str, cancel: &[String], escalate: &[String]) -> TranscriptClass {
    let normalized = transcript.trim().to_lowercase();
    if normalized.is_empty() {
        return TranscriptClass::Unrecognized;
    }
    if matches_any(&normalized, escalate) {
        return TranscriptClass::Escalate;
    }
    if matches_any(&normalized, cancel) {
        return TranscriptClass::Cancel;
    }
    TranscriptClass::Unrecognized
}

/// Classify ranked transcripts (best first). An escalate match anywhere in
/// the ranking beats a cancel match anywhere else.
pub fn classify_ranked(
    transcripts: &[String],
    cancel: &[String],
    escalate: &[String],
) -> TranscriptClass {
    let mut saw_cancel = false;
    for transcript in transcripts {
        match classify(transcript, cancel, escalate) {
            TranscriptClass::Escalate => return TranscriptClass::Escalate,
            TranscriptClass::Cancel => saw_cancel = true,
            TranscriptClass::Unrecognized => {}
        }
    }
    if saw_cancel {
        TranscriptClass::Cancel
    } else {
        TranscriptClass::Unrecognized
    }
}

fn matches_any(normalized: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|phrase| {
        let phrase = phrase.trim();
        !phrase.is_empty() && normalized.contains(&phrase.to_lowercase())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn defaults() -> (Vec<String>, Vec<String>) {
        let config = SessionConfig::default();
        (config.cancel_phrases, config.escalate_phrases)
    }

    #[test]
    fn cancel_phrase_matches_as_substring() {
        let (cancel, escalate) = defaults();
        assert_eq!(
            classify("yeah I'm fine thanks", &cancel, &escalate),
            TranscriptClass::Cancel
        );
        assert_eq!(
            classify("OKAY", &cancel, &escalate),
            TranscriptClass::Cancel
        );
    }

    #[test]
    fn escalate_phrase_matches_as_substring() {
        let (cancel, escalate) = defaults();
        assert_eq!(
            classify("help me please", &cancel, &escalate),
            TranscriptClass::Escalate
        );
        assert_eq!(
            classify("this is an EMERGENCY", &cancel, &escalate),
            TranscriptClass::Escalate
        );
    }

    #[test]
    fn escalate_wins_when_both_sets_match() {
        let (cancel, escalate) = defaults();
        assert_eq!(
            classify("help, i'm fine", &cancel, &escalate),
            TranscriptClass::Escalate
        );
    }

    #[test]
    fn unrelated_speech_is_unrecognized() {
        let (cancel, escalate) = defaults();
        assert_eq!(
            classify("what was that noise", &cancel, &escalate),
            TranscriptClass::Unrecognized
        );
        assert_eq!(classify("   ", &cancel, &escalate), TranscriptClass::Unrecognized);
    }

    #[test]
    fn ranked_results_prefer_escalate_across_alternatives() {
        let (cancel, escalate) = defaults();
        let transcripts = vec![
            "i am fine".to_string(),
            "i need help".to_string(),
        ];
        assert_eq!(
            classify_ranked(&transcripts, &cancel, &escalate),
            TranscriptClass::Escalate
        );
    }

    #[test]
    fn ranked_results_fall_back_to_cancel_then_unrecognized() {
        let (cancel, escalate) = defaults();
        let transcripts = vec!["mumble".to_string(), "alright".to_string()];
        assert_eq!(
            classify_ranked(&transcripts, &cancel, &escalate),
            TranscriptClass::Cancel
        );

        let transcripts = vec!["mumble".to_string()];
        assert_eq!(
            classify_ranked(&transcripts, &cancel, &escalate),
            TranscriptClass::Unrecognized
        );
    }

    #[test]
    fn blank_phrases_never_match() {
        let cancel = vec!["".to_string(), "  ".to_string()];
        let escalate = vec!["".to_string()];
        assert_eq!(
            classify("anything", &cancel, &escalate),
            TranscriptClass::Unrecognized
        );
    }
}
