// src/persona.rs
// PERSONA REGISTRY: immutable participant snapshots + the committed Turn record

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker name reserved for the moderator in the transcript.
pub const MODERATOR: &str = "Moderator";

// --- Big Five (1-5 each) ---
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Personality {
    pub openness: u8,
    pub conscientiousness: u8,
    pub extraversion: u8,
    pub agreeableness: u8,
    pub neuroticism: u8,
}

impl Default for Personality {
    fn default() -> Self {
        Self::new(3, 3, 3, 3, 3)
    }
}

impl Personality {
    /// Scores are clamped into 1..=5.
    pub fn new(openness: u8, conscientiousness: u8, extraversion: u8, agreeableness: u8, neuroticism: u8) -> Self {
        Self {
            openness: openness.clamp(1, 5),
            conscientiousness: conscientiousness.clamp(1, 5),
            extraversion: extraversion.clamp(1, 5),
            agreeableness: agreeableness.clamp(1, 5),
            neuroticism: neuroticism.clamp(1, 5),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Occupation {
    pub title: String,
    pub industry: String,
    pub experience_years: u32,
    pub income: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Preferences {
    pub interests: Vec<String>,
    pub hobbies: Vec<String>,
    pub values: Vec<String>,
    pub lifestyle: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Behaviors {
    pub communication_style: String,
    pub decision_making: String,
    pub technology_adoption: String,
    pub shopping_habits: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Goals {
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
    pub fears: Vec<String>,
    pub aspirations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Background {
    pub education: String,
    pub family_status: String,
    pub life_stage: String,
    pub experiences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersonaProfile {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub location: String,
    pub occupation: Occupation,
    pub personality: Personality,
    pub preferences: Preferences,
    pub behaviors: Behaviors,
    pub goals: Goals,
    pub background: Background,
    pub expertise_areas: Vec<String>,
    pub summary: String,
}

impl Default for PersonaProfile {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            age: 35,
            gender: String::new(),
            location: String::new(),
            occupation: Occupation::default(),
            personality: Personality::default(),
            preferences: Preferences::default(),
            behaviors: Behaviors::default(),
            goals: Goals::default(),
            background: Background::default(),
            expertise_areas: Vec::new(),
            summary: String::new(),
        }
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl PersonaProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), ..Self::default() }
    }

    // --- Builder setters (hosts and tests) ---
    pub fn with_age(mut self, age: u32) -> Self {
        self.age = age;
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn with_occupation(mut self, title: &str, industry: &str) -> Self {
        self.occupation.title = title.to_string();
        self.occupation.industry = industry.to_string();
        self
    }

    pub fn with_experience_years(mut self, years: u32) -> Self {
        self.occupation.experience_years = years;
        self
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = personality;
        self
    }

    pub fn with_education(mut self, education: &str) -> Self {
        self.background.education = education.to_string();
        self
    }

    pub fn with_life_stage(mut self, life_stage: &str) -> Self {
        self.background.life_stage = life_stage.to_string();
        self
    }

    pub fn with_family_status(mut self, family_status: &str) -> Self {
        self.background.family_status = family_status.to_string();
        self
    }

    pub fn with_interests(mut self, interests: &[&str]) -> Self {
        self.preferences.interests = owned(interests);
        self
    }

    pub fn with_values(mut self, values: &[&str]) -> Self {
        self.preferences.values = owned(values);
        self
    }

    pub fn with_fears(mut self, fears: &[&str]) -> Self {
        self.goals.fears = owned(fears);
        self
    }

    pub fn with_experiences(mut self, experiences: &[&str]) -> Self {
        self.background.experiences = owned(experiences);
        self
    }

    pub fn with_expertise(mut self, areas: &[&str]) -> Self {
        self.expertise_areas = owned(areas);
        self
    }

    /// Short identity line for prompts.
    pub fn identity_line(&self) -> String {
        if !self.summary.is_empty() {
            return self.summary.clone();
        }
        let mut line = format!("{}, {}", self.name, self.age);
        if !self.occupation.title.is_empty() {
            line.push_str(&format!(", {}", self.occupation.title));
        }
        if !self.location.is_empty() {
            line.push_str(&format!(" from {}", self.location));
        }
        line
    }

    // This static constructor is a FALLBACK for demos and smoke tests.
    // Hosts normally hand the engine fully populated profiles.
    pub fn archetype(id: u32, role: &str) -> Self {
        let names = match role {
            "Advocate" => vec!["Priya", "Maya", "Zara", "Shruti", "Isha"],
            "Skeptic" => vec!["Vikram", "Rajesh", "Sanjay", "Harsh", "Nitin"],
            "Pragmatist" => vec!["Neha", "Amit", "Kavya", "Rohan", "Deepika"],
            "Veteran" => vec!["Arjun", "Anjali", "Karan", "Pooja", "Ravi"],
            "Newcomer" => vec!["Dev", "Alex", "Aditya", "Sneha", "Akash"],
            _ => vec!["Participant"],
        };
        let name = names[(id as usize) % names.len()].to_string();

        let mut persona = PersonaProfile::new(format!("{}-{}", role.to_lowercase(), id), name);

        persona = match role {
            "Advocate" => persona
                .with_age(27)
                .with_location("Boston")
                .with_occupation("Social Worker", "Non-profit")
                .with_personality(Personality::new(5, 3, 4, 3, 3))
                .with_education("Masters in Social Work")
                .with_interests(&["community organizing", "podcasts", "storytelling"])
                .with_values(&["equality", "fairness", "community"])
                .with_fears(&["people falling through the cracks"]),
            "Skeptic" => persona
                .with_age(48)
                .with_location("Rural Montana")
                .with_occupation("Small Business Owner", "Retail")
                .with_experience_years(20)
                .with_personality(Personality::new(2, 4, 4, 2, 3))
                .with_education("High school")
                .with_interests(&["hunting", "local politics"])
                .with_values(&["freedom", "self-reliance", "tradition"])
                .with_fears(&["government overreach", "rising costs"]),
            "Pragmatist" => persona
                .with_age(39)
                .with_location("Denver")
                .with_occupation("Financial Analyst", "Finance")
                .with_experience_years(12)
                .with_personality(Personality::new(3, 5, 3, 3, 2))
                .with_education("MBA")
                .with_interests(&["data", "cycling"])
                .with_values(&["balance", "evidence"])
                .with_expertise(&["budgets", "cost analysis"]),
            "Veteran" => persona
                .with_age(63)
                .with_location("Atlanta")
                .with_occupation("Retired Nurse", "Healthcare")
                .with_experience_years(35)
                .with_personality(Personality::new(3, 4, 2, 4, 3))
                .with_life_stage("retired")
                .with_family_status("married with grandchildren")
                .with_interests(&["gardening", "church choir"])
                .with_values(&["compassion", "family"])
                .with_experiences(&["caring for patients without insurance"]),
            "Newcomer" => persona
                .with_age(21)
                .with_location("Chicago")
                .with_occupation("Barista", "Hospitality")
                .with_personality(Personality::new(4, 2, 3, 4, 4))
                .with_life_stage("college student")
                .with_education("Some college")
                .with_interests(&["gaming", "music", "technology"])
                .with_values(&["authenticity", "diversity"]),
            _ => persona,
        };

        persona.gender = if id % 2 == 0 { "female".into() } else { "male".into() };
        persona
    }
}

/// One committed utterance. Append-only: the tracker never edits a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub speaker: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub turn_number: u64,
}

impl Turn {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, turn_number: u64) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            timestamp: Utc::now(),
            turn_number,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_moderator(&self) -> bool {
        self.speaker == MODERATOR
    }
}

// --- Roster ---

/// Who is in the room, by every name a persona is likely to be called.
/// Full names, first names and last names resolve to the canonical name;
/// a first or last name two people share resolves to nobody.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    names: Vec<String>,
    aliases: HashMap<String, Option<String>>,
}

fn name_key(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl Roster {
    /// The moderator is always on the roster.
    pub fn new<I, S>(participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = std::iter::once(MODERATOR.to_string())
            .chain(participants.into_iter().map(|n| n.as_ref().trim().to_string()))
            .filter(|n| !n.is_empty())
            .collect();

        let mut aliases: HashMap<String, Option<String>> = HashMap::new();
        for name in &names {
            let parts: Vec<&str> = name.split_whitespace().collect();
            if parts.len() < 2 {
                continue;
            }
            for part in [parts[0], parts[parts.len() - 1]] {
                aliases
                    .entry(part.to_lowercase())
                    .and_modify(|slot| {
                        if slot.as_deref() != Some(name.as_str()) {
                            *slot = None;
                        }
                    })
                    .or_insert_with(|| Some(name.clone()));
            }
        }
        // Full names win over partial aliases
        for name in &names {
            aliases.insert(name_key(name), Some(name.clone()));
        }

        Self { names, aliases }
    }

    pub fn from_personas(personas: &[PersonaProfile]) -> Self {
        Self::new(personas.iter().map(|p| p.name.as_str()))
    }

    /// Canonical names, moderator first.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Canonical name for a name as written in text. Leading words that
    /// resolve to nothing are skipped, so "Yesterday Bob" finds Bob.
    /// `None` for strangers and ambiguous names.
    pub fn resolve(&self, written: &str) -> Option<&str> {
        let words: Vec<&str> = written.split_whitespace().collect();
        for skip in 0..words.len() {
            if let Some(found) = self.aliases.get(&words[skip..].join(" ").to_lowercase()) {
                return found.as_deref();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personality_clamps() {
        let p = Personality::new(0, 9, 5, 1, 3);
        assert_eq!(p.openness, 1);
        assert_eq!(p.conscientiousness, 5);
    }

    #[test]
    fn test_archetype_rotates_names() {
        let a = PersonaProfile::archetype(0, "Skeptic");
        let b = PersonaProfile::archetype(1, "Skeptic");
        assert_ne!(a.name, b.name);
        assert_eq!(a.id, "skeptic-0");
        assert_eq!(a.personality.agreeableness, 2);
    }

    #[test]
    fn test_unknown_archetype_falls_back() {
        let p = PersonaProfile::archetype(3, "Alien");
        assert_eq!(p.name, "Participant");
        assert_eq!(p.personality, Personality::default());
    }

    #[test]
    fn test_identity_line() {
        let p = PersonaProfile::new("p1", "Dana")
            .with_age(41)
            .with_occupation("Teacher", "Education")
            .with_location("Ohio");
        assert_eq!(p.identity_line(), "Dana, 41, Teacher from Ohio");
    }

    #[test]
    fn test_profile_deserializes_with_missing_fields() {
        let p: PersonaProfile =
            serde_json::from_str(r#"{"id":"x","name":"Sam","personality":{"extraversion":5}}"#).unwrap();
        assert_eq!(p.age, 35);
        assert_eq!(p.personality.extraversion, 5);
        assert_eq!(p.personality.openness, 3);
    }

    #[test]
    fn test_roster_resolves_partial_names() {
        let roster = Roster::new(["Alice Smith", "Bob Jones", "DeShawn"]);
        assert_eq!(roster.resolve("Bob"), Some("Bob Jones"));
        assert_eq!(roster.resolve("Jones"), Some("Bob Jones"));
        assert_eq!(roster.resolve("bob  jones"), Some("Bob Jones"));
        assert_eq!(roster.resolve("Yesterday Alice"), Some("Alice Smith"));
        assert_eq!(roster.resolve("DeShawn"), Some("DeShawn"));
        assert_eq!(roster.resolve(MODERATOR), Some(MODERATOR));
        assert_eq!(roster.resolve("Dave"), None);
        assert_eq!(roster.resolve("Bob Smith"), None);
    }

    #[test]
    fn test_shared_first_name_is_ambiguous() {
        let roster = Roster::new(["Bob Jones", "Bob Lee", "Bob"]);
        assert_eq!(roster.resolve("Bob"), Some("Bob"));
        assert_eq!(roster.resolve("Lee"), Some("Bob Lee"));

        let roster = Roster::new(["Bob Jones", "Bob Lee"]);
        assert_eq!(roster.resolve("Bob"), None);
    }
}
