/// Heuristic extraction of activity state from a watched page.
///
/// The page is treated as opaque text and scanned with an ordered list of
/// case-insensitive patterns. The first identifier pattern that matches wins,
/// so the list runs from the most structural markers (response roots, submission
/// lists, response form actions, respond frames) down to generic fallbacks
/// (data attributes, hidden fields, JSON bootstrap).
///
/// Callers only see the [`Extractor`] trait; the regex strategy can be replaced
/// by a real parser without touching the transition logic.
use regex::Regex;
use serde::Deserialize;

/// Result of scanning one page body. `title` is cosmetic and never drives control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub activity_id: Option<String>,
    pub accepting: bool,
    pub title: Option<String>,
}

pub trait Extractor: Send + Sync {
    /// Pure and infallible: returns an all-absent result when nothing matches.
    fn extract(&self, markup: &str) -> Extraction;
}

/// Which identifier patterns a deployment recognises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Every known marker, including turbo-frame respond sources.
    #[default]
    Full,
    /// Response roots, submission lists and response actions plus the generic fallbacks.
    Standard,
    /// Generic fallbacks only.
    Generic,
}

struct IdPattern {
    regex: Regex,
    /// Structural markers only render while an activity is on screen, so they
    /// also count as proof that the page is not a plain waiting screen.
    structural: bool,
}

const RESPONSE_ROOT: &str = r#"(?i)id="response_root_question_(\d+)""#;
const ALL_SUBMISSIONS: &str = r#"(?i)id="all_submissions_question_(\d+)""#;
const RESPONSE_ACTION: &str = r#"(?i)action="/a/questions/(\d+)/responses"#;
const CHOICE_RESPOND_SRC: &str = r#"(?i)src="/multiple_choice_polls/([^"/]+)/respond"#;
const TEXT_RESPOND_SRC: &str = r#"(?i)src="/text_polls/([^"/]+)/respond"#;
const DATA_ACTIVITY_ID: &str = r#"(?i)data-activity-id="([^"]+)""#;
const HIDDEN_ACTIVITY_FIELD: &str = r#"(?i)name="activity_id"\s+value="([^"]+)""#;
const JSON_ACTIVITY_ID: &str = r#"(?i)"activityId"\s*:\s*"([^"]+)""#;

const ACCEPTING_HINTS: &str = r"(?i)(audience submissions|responding to the presenter|you may respond|accepting responses|respond|submit|send response|vote now)";
const RESPONSE_FORM_MARKERS: &str =
    r#"(?i)(action="/a/questions/\d+/responses|data-input--choice|data-response-to)"#;
const RESPOND_FRAME: &str = r#"(?i)<turbo-frame[^>]+src="[^"]+/respond"#;
const WAITING_HINT: &str = r"(?i)waiting";

const TITLE_PATTERNS: [&str; 3] = [
    r"(?i)<h1[^>]*>([^<]{5,200})</h1>",
    r"(?i)<h2[^>]*>([^<]{5,200})</h2>",
    r"(?i)<h[1-6][^>]*>([^<]{10,200})</h[1-6]>",
];

impl Profile {
    fn id_patterns(self) -> Vec<(&'static str, bool)> {
        let generic = [
            (DATA_ACTIVITY_ID, false),
            (HIDDEN_ACTIVITY_FIELD, false),
            (JSON_ACTIVITY_ID, false),
        ];
        let mut patterns = match self {
            Profile::Full => vec![
                (RESPONSE_ROOT, true),
                (ALL_SUBMISSIONS, true),
                (RESPONSE_ACTION, true),
                (CHOICE_RESPOND_SRC, true),
                (TEXT_RESPOND_SRC, true),
            ],
            Profile::Standard => vec![
                (RESPONSE_ROOT, true),
                (ALL_SUBMISSIONS, true),
                (RESPONSE_ACTION, true),
            ],
            Profile::Generic => Vec::new(),
        };
        patterns.extend(generic);
        patterns
    }
}

/// Regex implementation of [`Extractor`].
pub struct PatternExtractor {
    id_patterns: Vec<IdPattern>,
    accepting_hints: Regex,
    response_forms: Regex,
    respond_frame: Regex,
    waiting: Regex,
    titles: Vec<Regex>,
}

impl PatternExtractor {
    pub fn new(profile: Profile) -> Result<Self, regex::Error> {
        let id_patterns = profile
            .id_patterns()
            .into_iter()
            .map(|(pattern, structural)| {
                Ok(IdPattern {
                    regex: Regex::new(pattern)?,
                    structural,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        let titles = TITLE_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id_patterns,
            accepting_hints: Regex::new(ACCEPTING_HINTS)?,
            response_forms: Regex::new(RESPONSE_FORM_MARKERS)?,
            respond_frame: Regex::new(RESPOND_FRAME)?,
            waiting: Regex::new(WAITING_HINT)?,
            titles,
        })
    }

    fn find_id(&self, markup: &str) -> Option<(String, bool)> {
        self.id_patterns.iter().find_map(|p| {
            p.regex
                .captures(markup)
                .and_then(|c| c.get(1))
                .map(|m| (m.as_str().to_string(), p.structural))
        })
    }

    fn find_title(&self, markup: &str) -> Option<String> {
        self.titles.iter().find_map(|re| {
            re.captures(markup)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|t| !t.is_empty())
        })
    }
}

impl Extractor for PatternExtractor {
    fn extract(&self, markup: &str) -> Extraction {
        let respond_frame = self.respond_frame.is_match(markup);
        let response_forms = self.response_forms.is_match(markup);
        let found = self.find_id(markup);
        let structural_id = matches!(found, Some((_, true)));

        // Waiting screen with nothing to submit to is the only reliable "inactive" signal.
        if self.waiting.is_match(markup) && !respond_frame && !response_forms && !structural_id {
            return Extraction::default();
        }

        let accepting = self.accepting_hints.is_match(markup) || response_forms || respond_frame;

        Extraction {
            activity_id: found.map(|(id, _)| id),
            accepting,
            title: self.find_title(markup),
        }
    }
}
