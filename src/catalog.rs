// src/catalog.rs
// CONTROVERSY CATALOG: candidate stances per controversial topic + affinity signals

use serde::Serialize;

use crate::analysis::{contains_phrase, tokenize};
use crate::persona::PersonaProfile;

/// Which profile text an affinity keyword list is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfileField {
    Location,
    Occupation,
    Industry,
    Education,
    Values,
    Experiences,
}

impl ProfileField {
    fn text(self, persona: &PersonaProfile) -> String {
        match self {
            ProfileField::Location => persona.location.to_lowercase(),
            ProfileField::Occupation => persona.occupation.title.to_lowercase(),
            ProfileField::Industry => persona.occupation.industry.to_lowercase(),
            ProfileField::Education => persona.background.education.to_lowercase(),
            ProfileField::Values => persona.preferences.values.join(" ").to_lowercase(),
            ProfileField::Experiences => persona.background.experiences.join(" ").to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum Affinity {
    Keywords { field: ProfileField, keywords: &'static [&'static str], weight: i32 },
    AgeBelow { age: u32, weight: i32 },
    AgeAbove { age: u32, weight: i32 },
}

impl Affinity {
    pub fn score(&self, persona: &PersonaProfile) -> i32 {
        match *self {
            Affinity::Keywords { field, keywords, weight } => {
                let haystack = field.text(persona);
                if keywords.iter().any(|k| haystack.contains(k)) {
                    weight
                } else {
                    0
                }
            }
            Affinity::AgeBelow { age, weight } => {
                if persona.age < age {
                    weight
                } else {
                    0
                }
            }
            Affinity::AgeAbove { age, weight } => {
                if persona.age > age {
                    weight
                } else {
                    0
                }
            }
        }
    }
}

/// Personality leaning a stance picks up bonus points from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Leaning {
    /// +1 for openness >= 4
    Progressive,
    /// +1 for conscientiousness >= 4
    Moderate,
    Neutral,
}

#[derive(Debug, Serialize)]
pub struct StanceTemplate {
    pub key: &'static str,
    pub position: &'static str,
    pub arguments: &'static [&'static str],
    pub concerns: &'static [&'static str],
    pub personal_connections: &'static [&'static str],
    pub emotional_investment: f64,
    pub leaning: Leaning,
    pub affinity: &'static [Affinity],
}

impl StanceTemplate {
    /// Demographic + personality alignment of one persona with this stance.
    pub fn alignment(&self, persona: &PersonaProfile) -> i32 {
        let mut score: i32 = self.affinity.iter().map(|a| a.score(persona)).sum();
        match self.leaning {
            Leaning::Progressive if persona.personality.openness >= 4 => score += 1,
            Leaning::Moderate if persona.personality.conscientiousness >= 4 => score += 1,
            _ => {}
        }
        score
    }
}

#[derive(Debug, Serialize)]
pub struct TopicCategory {
    pub key: &'static str,
    pub aliases: &'static [&'static str],
    pub stances: &'static [StanceTemplate],
}

impl TopicCategory {
    pub fn stance(&self, key: &str) -> Option<&'static StanceTemplate> {
        self.stances.iter().find(|s| s.key == key)
    }
}

use Affinity::{AgeBelow, Keywords};
use ProfileField::*;

pub static CATALOG: &[TopicCategory] = &[
    TopicCategory {
        key: "gun_laws",
        aliases: &["gun", "guns", "firearm", "firearms", "second amendment", "weapon", "weapons"],
        stances: &[
            StanceTemplate {
                key: "pro_gun_rights",
                position: "Strong supporter of gun rights and Second Amendment",
                arguments: &["Constitutional right", "Self-defense necessity", "Government overreach concerns", "Rural protection needs"],
                concerns: &["Government tyranny", "Personal safety", "Constitutional erosion", "Criminal advantage"],
                personal_connections: &["Family hunting tradition", "Rural upbringing", "Military/law enforcement background"],
                emotional_investment: 0.8,
                leaning: Leaning::Neutral,
                affinity: &[
                    Keywords { field: Location, keywords: &["rural", "texas", "montana", "wyoming"], weight: 3 },
                    Keywords { field: Occupation, keywords: &["police", "military", "security"], weight: 2 },
                ],
            },
            StanceTemplate {
                key: "gun_control_advocate",
                position: "Strong advocate for comprehensive gun control",
                arguments: &["Public safety priority", "Mass shooting prevention", "Domestic violence reduction", "Suicide prevention"],
                concerns: &["School safety", "Urban violence", "Easy access to weapons", "International comparisons"],
                personal_connections: &["Urban environment", "Teaching profession", "Personal loss experience"],
                emotional_investment: 0.9,
                leaning: Leaning::Progressive,
                affinity: &[
                    Keywords { field: Location, keywords: &["york", "angeles", "chicago", "boston"], weight: 3 },
                    Keywords { field: Occupation, keywords: &["teacher", "professor", "social"], weight: 2 },
                    AgeBelow { age: 35, weight: 1 },
                ],
            },
            StanceTemplate {
                key: "moderate_regulation",
                position: "Supports reasonable regulations while respecting rights",
                arguments: &["Background checks", "Training requirements", "Safe storage laws", "Mental health focus"],
                concerns: &["Balance of rights and safety", "Practical enforcement", "Bipartisan solutions"],
                personal_connections: &["Suburban background", "Law enforcement family", "Professional experience"],
                emotional_investment: 0.6,
                leaning: Leaning::Moderate,
                affinity: &[],
            },
        ],
    },
    TopicCategory {
        key: "climate_change",
        aliases: &["climate", "global warming", "carbon", "emissions", "environment"],
        stances: &[
            StanceTemplate {
                key: "environmental_activist",
                position: "Urgent action needed to address climate crisis",
                arguments: &["Scientific consensus", "Future generations", "Economic transition benefits", "Moral imperative"],
                concerns: &["Irreversible damage", "Corporate resistance", "Political inaction", "Time running out"],
                personal_connections: &["Outdoor lifestyle", "Environmental education", "Climate impact witness"],
                emotional_investment: 0.9,
                leaning: Leaning::Progressive,
                affinity: &[
                    AgeBelow { age: 40, weight: 2 },
                    Keywords { field: Education, keywords: &["college", "university"], weight: 1 },
                ],
            },
            StanceTemplate {
                key: "economic_pragmatist",
                position: "Climate action must balance economic realities",
                arguments: &["Job protection", "Gradual transition", "Economic competitiveness", "Practical solutions"],
                concerns: &["Economic disruption", "Working class impact", "International competition", "Energy costs"],
                personal_connections: &["Manufacturing work", "Union membership", "Economic pressure experience"],
                emotional_investment: 0.7,
                leaning: Leaning::Neutral,
                affinity: &[Keywords { field: Industry, keywords: &["energy", "oil", "manufacturing"], weight: 2 }],
            },
            StanceTemplate {
                key: "climate_skeptic",
                position: "Questions climate change urgency and solutions",
                arguments: &["Natural cycles", "Economic costs", "Uncertainty in predictions", "Technology solutions"],
                concerns: &["Government overreach", "Economic damage", "Energy independence", "Scientific uncertainty"],
                personal_connections: &["Energy industry", "Rural lifestyle", "Traditional values"],
                emotional_investment: 0.6,
                leaning: Leaning::Neutral,
                affinity: &[Keywords { field: Industry, keywords: &["energy", "oil", "manufacturing"], weight: 1 }],
            },
        ],
    },
    TopicCategory {
        key: "healthcare",
        aliases: &["healthcare", "health care", "medicare", "medicaid", "insurance"],
        stances: &[
            StanceTemplate {
                key: "universal_healthcare",
                position: "Healthcare is a human right requiring universal coverage",
                arguments: &["Moral imperative", "Economic efficiency", "International examples", "Preventive care"],
                concerns: &["Access inequality", "Bankruptcy from medical bills", "Insurance industry profits"],
                personal_connections: &["Personal medical crisis", "Healthcare work", "Family illness"],
                emotional_investment: 0.8,
                leaning: Leaning::Progressive,
                affinity: &[
                    Keywords { field: Occupation, keywords: &["nurse", "doctor", "health", "social"], weight: 2 },
                    Keywords { field: Industry, keywords: &["healthcare", "non-profit"], weight: 2 },
                    Keywords { field: Values, keywords: &["equality", "compassion", "fairness"], weight: 1 },
                ],
            },
            StanceTemplate {
                key: "free_market",
                position: "Market-based solutions provide best healthcare outcomes",
                arguments: &["Innovation incentives", "Choice and competition", "Quality care", "Economic freedom"],
                concerns: &["Government inefficiency", "Reduced innovation", "Loss of choice", "Economic burden"],
                personal_connections: &["Business ownership", "Quality insurance experience", "Economic philosophy"],
                emotional_investment: 0.7,
                leaning: Leaning::Neutral,
                affinity: &[
                    Keywords { field: Occupation, keywords: &["owner", "entrepreneur", "founder", "business"], weight: 2 },
                    Keywords { field: Industry, keywords: &["finance", "insurance"], weight: 1 },
                    Keywords { field: Values, keywords: &["freedom", "independence", "self-reliance"], weight: 1 },
                ],
            },
            StanceTemplate {
                key: "mixed_system",
                position: "Hybrid public-private system offers best balance",
                arguments: &["Safety net with choice", "Cost controls with innovation", "Gradual reform", "Proven models"],
                concerns: &["System complexity", "Implementation challenges", "Political feasibility"],
                personal_connections: &["Healthcare administration", "Policy studies", "Comparative research"],
                emotional_investment: 0.5,
                leaning: Leaning::Moderate,
                affinity: &[Keywords { field: Occupation, keywords: &["administrator", "policy", "analyst"], weight: 2 }],
            },
        ],
    },
    TopicCategory {
        key: "immigration",
        aliases: &["immigration", "immigrant", "immigrants", "border", "refugee", "refugees", "asylum"],
        stances: &[
            StanceTemplate {
                key: "pro_immigration",
                position: "Immigration enriches society and economy",
                arguments: &["Economic benefits", "Cultural diversity", "Humanitarian obligation", "Historical tradition"],
                concerns: &["Anti-immigrant sentiment", "Policy restrictions", "Enforcement overreach"],
                personal_connections: &["Immigrant family", "Diverse community", "International travel"],
                emotional_investment: 0.8,
                leaning: Leaning::Progressive,
                affinity: &[
                    Keywords { field: Values, keywords: &["diversity", "community", "family"], weight: 2 },
                    Keywords { field: Location, keywords: &["york", "angeles", "city"], weight: 1 },
                    Keywords { field: Experiences, keywords: &["immigrant", "abroad"], weight: 2 },
                ],
            },
            StanceTemplate {
                key: "immigration_restriction",
                position: "Immigration needs stronger controls and enforcement",
                arguments: &["Rule of law", "Economic protection", "Security concerns", "Cultural cohesion"],
                concerns: &["Illegal immigration", "Job competition", "Security threats", "Resource strain"],
                personal_connections: &["Working class background", "Border community", "Security profession"],
                emotional_investment: 0.7,
                leaning: Leaning::Neutral,
                affinity: &[
                    Keywords { field: Occupation, keywords: &["security", "border", "police"], weight: 2 },
                    Keywords { field: Location, keywords: &["rural", "border"], weight: 2 },
                    Keywords { field: Values, keywords: &["tradition", "security"], weight: 1 },
                ],
            },
            StanceTemplate {
                key: "balanced_approach",
                position: "Immigration requires both compassion and control",
                arguments: &["Comprehensive reform", "Skilled worker programs", "Humanitarian protection", "Border security"],
                concerns: &["System dysfunction", "Polarized debate", "Practical solutions"],
                personal_connections: &["Legal immigration experience", "Policy studies", "Community service"],
                emotional_investment: 0.6,
                leaning: Leaning::Moderate,
                affinity: &[Keywords { field: Occupation, keywords: &["lawyer", "policy", "social"], weight: 1 }],
            },
        ],
    },
    TopicCategory {
        key: "taxation",
        aliases: &["tax", "taxes", "taxation", "irs"],
        stances: &[
            StanceTemplate {
                key: "low_tax_advocate",
                position: "Lower taxes let families and businesses thrive",
                arguments: &["People spend their own money better", "Small business growth", "Government waste", "Economic freedom"],
                concerns: &["Rising tax burden", "Wasteful spending", "Job losses"],
                personal_connections: &["Running a small business", "Watching paychecks shrink", "Family budget pressure"],
                emotional_investment: 0.7,
                leaning: Leaning::Neutral,
                affinity: &[
                    Keywords { field: Occupation, keywords: &["owner", "entrepreneur", "founder"], weight: 3 },
                    Keywords { field: Values, keywords: &["freedom", "self-reliance", "independence"], weight: 1 },
                ],
            },
            StanceTemplate {
                key: "progressive_taxation",
                position: "Those who earn more should contribute more",
                arguments: &["Fair share", "Funding public services", "Reducing inequality", "Investing in infrastructure"],
                concerns: &["Wealth inequality", "Underfunded schools", "Corporate loopholes"],
                personal_connections: &["Public service work", "Community needs", "Seeing underfunded schools"],
                emotional_investment: 0.8,
                leaning: Leaning::Progressive,
                affinity: &[
                    Keywords { field: Values, keywords: &["equality", "fairness", "community"], weight: 2 },
                    Keywords { field: Occupation, keywords: &["teacher", "social", "nurse"], weight: 2 },
                ],
            },
            StanceTemplate {
                key: "moderate_fiscal",
                position: "Simpler taxes with a balanced budget",
                arguments: &["Simplify the code", "Close loopholes", "Balanced budgets", "Predictable rates"],
                concerns: &["Deficits", "Complexity", "Partisan gridlock"],
                personal_connections: &["Accounting work", "Managing budgets", "Professional experience"],
                emotional_investment: 0.5,
                leaning: Leaning::Moderate,
                affinity: &[
                    Keywords { field: Occupation, keywords: &["accountant", "analyst", "manager"], weight: 2 },
                    Keywords { field: Industry, keywords: &["finance"], weight: 1 },
                ],
            },
        ],
    },
    TopicCategory {
        key: "education",
        aliases: &["education", "school", "schools", "schooling", "curriculum"],
        stances: &[
            StanceTemplate {
                key: "public_education_supporter",
                position: "Invest in public schools for every child",
                arguments: &["Equal opportunity", "Teacher pay", "Community anchor", "Proven public systems"],
                concerns: &["Underfunding", "Teacher shortages", "Privatization"],
                personal_connections: &["Teaching experience", "Public school graduate", "Kids in local schools"],
                emotional_investment: 0.8,
                leaning: Leaning::Progressive,
                affinity: &[
                    Keywords { field: Occupation, keywords: &["teacher", "professor", "principal"], weight: 3 },
                    Keywords { field: Values, keywords: &["equality", "community"], weight: 1 },
                ],
            },
            StanceTemplate {
                key: "school_choice_advocate",
                position: "Parents should choose where their kids learn",
                arguments: &["Parental rights", "Competition improves quality", "Escape failing schools", "Tailored learning"],
                concerns: &["Bureaucracy", "One-size-fits-all", "Failing districts"],
                personal_connections: &["Homeschooling family", "Private school tuition", "Moving for better schools"],
                emotional_investment: 0.7,
                leaning: Leaning::Neutral,
                affinity: &[
                    Keywords { field: Values, keywords: &["choice", "freedom", "faith", "tradition"], weight: 2 },
                    Keywords { field: Occupation, keywords: &["owner", "entrepreneur"], weight: 1 },
                ],
            },
            StanceTemplate {
                key: "mixed_approach",
                position: "Strengthen public schools while allowing some choice",
                arguments: &["Accountability for results", "Charter pilots", "Vocational pathways", "Local control"],
                concerns: &["Polarized debate", "Uneven outcomes", "Funding fairness"],
                personal_connections: &["School board meetings", "Parent volunteering", "Professional experience"],
                emotional_investment: 0.5,
                leaning: Leaning::Moderate,
                affinity: &[Keywords { field: Occupation, keywords: &["analyst", "administrator", "manager"], weight: 1 }],
            },
        ],
    },
];

pub fn category(key: &str) -> Option<&'static TopicCategory> {
    CATALOG.iter().find(|c| c.key == key)
}

/// Match the topic text against category keys first, then aliases.
pub fn detect_category(topic: &str) -> Option<&'static TopicCategory> {
    let lowered = topic.trim().to_lowercase();
    if let Some(exact) = category(&lowered) {
        return Some(exact);
    }
    let tokens = tokenize(&lowered);
    CATALOG.iter().find(|c| {
        contains_phrase(&tokens, &c.key.replace('_', " ")) || c.aliases.iter().any(|a| contains_phrase(&tokens, a))
    })
}
