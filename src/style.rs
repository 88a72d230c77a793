// src/style.rs
// RESPONSE STYLE MANAGER: a stable voice per persona
// Style is classified once per conversation and cached; `apply_style` layers
// register and intensity tweaks onto generated text without touching quotes.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::behavior::ResponseLength;
use crate::persona::PersonaProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleArchetype {
    Analytical,
    Emotional,
    Casual,
    Authoritative,
    Hesitant,
    Storytelling,
}

struct TemplateSet {
    openers: &'static [&'static str],
    connectors: &'static [&'static str],
    closers: &'static [&'static str],
    emphasis: &'static [&'static str],
    uncertainty: &'static [&'static str],
}

const ANALYTICAL: TemplateSet = TemplateSet {
    openers: &[
        "Looking at this from a data perspective,",
        "Based on my experience in {occupation},",
        "The key factor here is",
        "What we need to consider is",
        "From a practical standpoint,",
    ],
    connectors: &["Furthermore,", "Additionally,", "However,", "On the other hand,", "More importantly,"],
    closers: &[
        "That's my assessment based on the evidence.",
        "I think that's the most logical approach.",
        "The data supports this conclusion.",
        "This approach has worked in {industry}.",
        "That's what the research indicates.",
    ],
    emphasis: &["clearly", "definitely", "obviously", "certainly"],
    uncertainty: &["possibly", "potentially", "it seems", "I believe"],
};

const EMOTIONAL: TemplateSet = TemplateSet {
    openers: &[
        "Oh my goodness,",
        "I feel so strongly about this,",
        "This really hits home for me because",
        "I get so frustrated when",
        "It breaks my heart that",
    ],
    connectors: &[
        "And another thing,",
        "Plus,",
        "But here's what really gets me:",
        "And don't even get me started on",
        "What makes it worse is",
    ],
    closers: &[
        "Sorry, I get passionate about this stuff.",
        "It just really matters to me, you know?",
        "I hope that makes sense.",
        "Am I the only one who feels this way?",
        "This is so important to get right.",
    ],
    emphasis: &["absolutely", "totally", "completely", "so much"],
    uncertainty: &["I think", "maybe", "I guess", "kind of"],
};

const CASUAL: TemplateSet = TemplateSet {
    openers: &["I mean,", "Here's the thing:", "Honestly,", "So like,", "Okay so,"],
    connectors: &["But yeah,", "And like,", "Plus,", "Also,", "But then again,"],
    closers: &[
        "That's just my two cents.",
        "But what do I know?",
        "Just saying.",
        "Know what I mean?",
        "That's how I see it anyway.",
    ],
    emphasis: &["totally", "really", "super", "way"],
    uncertainty: &["like", "sort of", "I guess", "maybe"],
};

const AUTHORITATIVE: TemplateSet = TemplateSet {
    openers: &[
        "Let me be clear:",
        "The reality is",
        "What you need to understand is",
        "I've been saying this for years:",
        "The fact of the matter is",
    ],
    connectors: &["Moreover,", "Furthermore,", "In fact,", "What's more,", "Beyond that,"],
    closers: &["End of story.", "That's just how it is.", "No question about it.", "Period.", "Case closed."],
    emphasis: &["absolutely", "definitely", "without question", "undoubtedly"],
    uncertainty: &["arguably", "conceivably", "presumably"],
};

const HESITANT: TemplateSet = TemplateSet {
    openers: &[
        "Well, I'm not sure, but",
        "I don't know if this is right, but",
        "Maybe it's just me, but",
        "I could be wrong, but",
        "I don't really know much about this, but",
    ],
    connectors: &["I think...", "Maybe...", "I'm not sure, but", "It seems like", "I guess"],
    closers: &[
        "But I could be wrong.",
        "I don't know, what do you think?",
        "That's just my opinion though.",
        "But maybe I'm missing something.",
        "I'm probably not the best person to ask.",
    ],
    emphasis: &["probably", "mostly", "generally", "usually"],
    uncertainty: &["maybe", "possibly", "I think", "perhaps", "sort of"],
};

const STORYTELLING: TemplateSet = TemplateSet {
    openers: &[
        "I remember back when I was",
        "My {family_member} always used to say",
        "Growing up in {location}, we",
        "There was this one time when",
        "Back when I started out,",
    ],
    connectors: &["And then,", "So anyway,", "Speaking of which,", "That's like when", "Funny enough,"],
    closers: &[
        "So that's why I feel this way.",
        "And that's stayed with me ever since.",
        "That experience really shaped my thinking.",
        "I'll never forget that lesson.",
        "That's where I'm coming from on this.",
    ],
    emphasis: &["really", "always", "never", "completely"],
    uncertainty: &["I think", "seemed like", "probably", "maybe"],
};

impl StyleArchetype {
    fn templates(self) -> &'static TemplateSet {
        match self {
            Self::Analytical => &ANALYTICAL,
            Self::Emotional => &EMOTIONAL,
            Self::Casual => &CASUAL,
            Self::Authoritative => &AUTHORITATIVE,
            Self::Hesitant => &HESITANT,
            Self::Storytelling => &STORYTELLING,
        }
    }

    /// First matching rule wins.
    pub fn classify(persona: &PersonaProfile) -> Self {
        let big5 = &persona.personality;
        let title = persona.occupation.title.to_lowercase();
        let education = persona.background.education.to_lowercase();

        if big5.conscientiousness >= 4 && big5.agreeableness <= 2 {
            return Self::Authoritative;
        }
        if big5.neuroticism >= 4 && big5.extraversion <= 2 {
            return Self::Hesitant;
        }
        if big5.openness >= 4 && big5.extraversion >= 4 {
            return Self::Emotional;
        }
        let storyteller_interest = persona
            .preferences
            .interests
            .iter()
            .any(|i| ["storytelling", "history", "literature", "travel"].contains(&i.to_lowercase().as_str()));
        if big5.openness >= 4 || title.contains("writer") || title.contains("teacher") || storyteller_interest {
            return Self::Storytelling;
        }
        if ["analyst", "engineer", "manager", "director"].iter().any(|w| title.contains(w))
            || education.contains("masters")
            || education.contains("phd")
        {
            return Self::Analytical;
        }
        Self::Casual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyLevel {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionLevel {
    Reserved,
    Moderate,
    Expressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechPattern {
    ModernSlang,
    ShorterSentences,
    QuestionTags,
    FormalLanguage,
    LongerExplanations,
    ReferencePast,
    SouthernPoliteness,
    StorytellingTendency,
    DirectCommunication,
    FastPaced,
    DiplomaticLanguage,
    AgreementSeeking,
    SelfDoubt,
    HedgeWords,
    CreativeExpressions,
    MetaphorUsage,
    TechnicalMetaphors,
    PreciseLanguage,
    PersuasiveLanguage,
    EnthusiasmMarkers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTemplate {
    pub openers: Vec<String>,
    pub connectors: Vec<String>,
    pub closers: Vec<String>,
    pub emphasis_markers: Vec<String>,
    pub uncertainty_markers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStyle {
    pub persona_id: String,
    pub archetype: StyleArchetype,
    pub template: ResponseTemplate,
    pub speech_patterns: Vec<SpeechPattern>,
    pub vocabulary_level: VocabularyLevel,
    pub response_length: ResponseLength,
    pub emotional_expression: ExpressionLevel,
}

impl ResponseStyle {
    /// Casual, pattern-free fallback for personas nobody styled.
    pub fn neutral(persona_id: &str) -> Self {
        Self {
            persona_id: persona_id.to_string(),
            archetype: StyleArchetype::Casual,
            template: instantiate(&CASUAL, &[]),
            speech_patterns: Vec::new(),
            vocabulary_level: VocabularyLevel::Moderate,
            response_length: ResponseLength::Medium,
            emotional_expression: ExpressionLevel::Moderate,
        }
    }

    /// One-line summary for generation prompts.
    pub fn hint(&self) -> String {
        let opener = self.template.openers.first().map(String::as_str).unwrap_or("");
        let label = |v: String| v.to_lowercase();
        format!(
            "{} voice, {} vocabulary, {} expression; you might open with \"{}\"",
            label(format!("{:?}", self.archetype)),
            label(format!("{:?}", self.vocabulary_level)),
            label(format!("{:?}", self.emotional_expression)),
            opener
        )
    }
}

// --- Derivation ---

const FAMILY_MEMBERS: &[&str] = &["father", "mother", "grandfather", "grandmother", "uncle", "aunt"];
const SOUTHERN_MARKERS: &[&str] = &["south", "atlanta", "georgia", "texas", "alabama", "tennessee", "carolina"];

/// Stable per-persona pick, so re-styling the same persona gives the same text.
fn stable_index(seed: &str, len: usize) -> usize {
    let hash = seed.bytes().fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64));
    (hash % len.max(1) as u64) as usize
}

fn instantiate(set: &TemplateSet, replacements: &[(&str, String)]) -> ResponseTemplate {
    let fill = |items: &[&str]| -> Vec<String> {
        items
            .iter()
            .map(|item| {
                replacements
                    .iter()
                    .fold(item.to_string(), |acc, (placeholder, value)| acc.replace(placeholder, value))
            })
            .collect()
    };
    ResponseTemplate {
        openers: fill(set.openers),
        connectors: fill(set.connectors),
        closers: fill(set.closers),
        emphasis_markers: fill(set.emphasis),
        uncertainty_markers: fill(set.uncertainty),
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_lowercase()
    }
}

fn speech_patterns(persona: &PersonaProfile) -> Vec<SpeechPattern> {
    use SpeechPattern::*;
    let mut patterns = Vec::new();
    let big5 = &persona.personality;
    let location = persona.location.to_lowercase();
    let title = persona.occupation.title.to_lowercase();

    if persona.age < 30 {
        patterns.extend([ModernSlang, ShorterSentences, QuestionTags]);
    } else if persona.age > 50 {
        patterns.extend([FormalLanguage, LongerExplanations, ReferencePast]);
    }

    if SOUTHERN_MARKERS.iter().any(|m| location.contains(m)) {
        patterns.extend([SouthernPoliteness, StorytellingTendency]);
    } else if location.contains("new york") {
        patterns.extend([DirectCommunication, FastPaced]);
    }

    if big5.agreeableness >= 4 {
        patterns.extend([DiplomaticLanguage, AgreementSeeking]);
    }
    if big5.neuroticism >= 4 {
        patterns.extend([SelfDoubt, HedgeWords]);
    }
    if big5.openness >= 4 {
        patterns.extend([CreativeExpressions, MetaphorUsage]);
    }

    if title.contains("tech") || title.contains("engineer") {
        patterns.extend([TechnicalMetaphors, PreciseLanguage]);
    } else if title.contains("sales") {
        patterns.extend([PersuasiveLanguage, EnthusiasmMarkers]);
    }
    patterns
}

fn vocabulary_level(persona: &PersonaProfile) -> VocabularyLevel {
    let education = persona.background.education.to_lowercase();
    let title = persona.occupation.title.to_lowercase();
    let mut score = 0;

    if education.contains("phd") {
        score += 3;
    } else if education.contains("masters") {
        score += 2;
    } else if education.contains("college") || education.contains("bachelor") {
        score += 1;
    }

    if ["professor", "researcher", "analyst"].iter().any(|w| title.contains(w)) {
        score += 2;
    } else if title.contains("manager") || title.contains("director") {
        score += 1;
    }

    if persona.personality.openness >= 4 {
        score += 1;
    }
    if persona.personality.conscientiousness >= 4 {
        score += 1;
    }

    match score {
        s if s >= 4 => VocabularyLevel::Complex,
        s if s >= 2 => VocabularyLevel::Moderate,
        _ => VocabularyLevel::Simple,
    }
}

fn preferred_length(persona: &PersonaProfile) -> ResponseLength {
    let big5 = &persona.personality;
    if big5.extraversion >= 4 && big5.openness >= 4 {
        ResponseLength::Long
    } else if big5.extraversion <= 2 || big5.neuroticism >= 4 {
        ResponseLength::Short
    } else {
        ResponseLength::Medium
    }
}

fn emotional_expression(persona: &PersonaProfile) -> ExpressionLevel {
    let big5 = &persona.personality;
    let score = big5.extraversion as i32 + big5.neuroticism as i32 - big5.agreeableness as i32;
    if score >= 6 {
        ExpressionLevel::Expressive
    } else if score <= 2 {
        ExpressionLevel::Reserved
    } else {
        ExpressionLevel::Moderate
    }
}

// --- Text transforms ---

fn word_regex(word: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).expect("vocabulary pattern")
}

static SIMPLER_WORDS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        ("utilize", "use"),
        ("implement", "carry out"),
        ("facilitate", "help"),
        ("comprehensive", "complete"),
        ("significant", "big"),
    ]
    .iter()
    .map(|(from, to)| (word_regex(from), *to))
    .collect()
});

static FANCIER_WORDS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [("use", "utilize"), ("help", "facilitate"), ("complete", "comprehensive"), ("big", "significant")]
        .iter()
        .map(|(from, to)| (word_regex(from), *to))
        .collect()
});

static I_THINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bI think\b").expect("i think pattern"));
static SOFTENERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:really|totally) ").expect("softener pattern"));

/// Keep the case of the first letter when swapping a word.
fn swap_words(text: &str, table: &[(Regex, &'static str)]) -> String {
    table.iter().fold(text.to_string(), |acc, (re, to)| {
        re.replace_all(&acc, |caps: &Captures| {
            let starts_upper = caps[0].chars().next().map(char::is_uppercase).unwrap_or(false);
            if starts_upper {
                let mut chars = to.chars();
                chars.next().map(|c| c.to_uppercase().chain(chars).collect()).unwrap_or_default()
            } else {
                to.to_string()
            }
        })
        .into_owned()
    })
}

/// Apply `f` to the text outside double quotes. Quoted citations stay verbatim.
fn map_unquoted(text: &str, f: impl Fn(&str) -> String) -> String {
    text.split('"')
        .enumerate()
        .map(|(i, part)| if i % 2 == 0 { f(part) } else { part.to_string() })
        .collect::<Vec<_>>()
        .join("\"")
}

fn apply_pattern(text: &str, pattern: SpeechPattern) -> String {
    match pattern {
        SpeechPattern::ModernSlang => map_unquoted(text, |s| s.replace("very ", "super ").replace("really ", "totally ")),
        SpeechPattern::DirectCommunication => {
            map_unquoted(text, |s| s.replace("I think maybe", "I think").replace("sort of ", ""))
        }
        SpeechPattern::TechnicalMetaphors => map_unquoted(text, |s| s.replace("process", "workflow")),
        SpeechPattern::SelfDoubt => format!("I might be wrong about this. {}", text),
        SpeechPattern::SouthernPoliteness if !text.to_lowercase().contains("please") => {
            format!("{} If you don't mind me saying so.", text.trim_end())
        }
        _ => text.to_string(),
    }
}

fn adjust_vocabulary(text: &str, level: VocabularyLevel) -> String {
    match level {
        VocabularyLevel::Simple => map_unquoted(text, |s| swap_words(s, &SIMPLER_WORDS)),
        VocabularyLevel::Complex => map_unquoted(text, |s| swap_words(s, &FANCIER_WORDS)),
        VocabularyLevel::Moderate => text.to_string(),
    }
}

fn adjust_expression(text: &str, level: ExpressionLevel) -> String {
    match level {
        ExpressionLevel::Expressive => {
            let mut out = map_unquoted(text, |s| I_THINK.replace_all(s, "I really think").into_owned());
            if out.ends_with('.') {
                out.pop();
                out.push('!');
            }
            out
        }
        ExpressionLevel::Reserved => {
            map_unquoted(text, |s| SOFTENERS.replace_all(&s.replace('!', "."), "").into_owned())
        }
        ExpressionLevel::Moderate => text.to_string(),
    }
}

// --- Manager ---

#[derive(Debug, Clone)]
pub struct ResponseStyleManager {
    styles: HashMap<String, ResponseStyle>,
    pattern_probability: f64,
}

impl ResponseStyleManager {
    pub fn new(pattern_probability: f64) -> Self {
        Self { styles: HashMap::new(), pattern_probability }
    }

    /// Computes the persona's style once; later calls return the cached one.
    pub fn generate_style(&mut self, persona: &PersonaProfile) -> &ResponseStyle {
        self.styles.entry(persona.id.clone()).or_insert_with(|| {
            let archetype = StyleArchetype::classify(persona);
            let replacements = [
                ("{occupation}", or_default(&persona.occupation.title, "my line of work")),
                ("{industry}", or_default(&persona.occupation.industry, "my field")),
                ("{location}", if persona.location.is_empty() { "my hometown".to_string() } else { persona.location.clone() }),
                ("{family_member}", FAMILY_MEMBERS[stable_index(&persona.id, FAMILY_MEMBERS.len())].to_string()),
            ];
            ResponseStyle {
                persona_id: persona.id.clone(),
                archetype,
                template: instantiate(archetype.templates(), &replacements),
                speech_patterns: speech_patterns(persona),
                vocabulary_level: vocabulary_level(persona),
                response_length: preferred_length(persona),
                emotional_expression: emotional_expression(persona),
            }
        })
    }

    pub fn style(&self, persona_id: &str) -> Option<&ResponseStyle> {
        self.styles.get(persona_id)
    }

    pub fn style_or_default(&self, persona_id: &str) -> ResponseStyle {
        match self.styles.get(persona_id) {
            Some(style) => style.clone(),
            None => {
                warn!(persona_id, "style requested for uninitialized persona; using neutral style");
                ResponseStyle::neutral(persona_id)
            }
        }
    }

    /// Layer speech patterns, vocabulary register and emotional expression onto `text`.
    /// Unknown personas get their text back unchanged.
    pub fn apply_style<R: Rng + ?Sized>(&self, persona_id: &str, text: &str, rng: &mut R) -> String {
        let Some(style) = self.styles.get(persona_id) else {
            return text.to_string();
        };

        let mut out = text.to_string();
        for pattern in &style.speech_patterns {
            if rng.gen::<f64>() < self.pattern_probability {
                out = apply_pattern(&out, *pattern);
            }
        }
        out = adjust_vocabulary(&out, style.vocabulary_level);
        adjust_expression(&out, style.emotional_expression)
    }
}
