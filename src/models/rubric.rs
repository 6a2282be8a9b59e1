use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Levels run 0..=6; a level-based criterion converts to marks as
/// level/6 of its configured weight.
pub const MAX_RUBRIC_LEVEL: i32 = 6;

/// Structured form of the wire identifier
/// `country_curriculum_subject_question`. Parsing validates the shape once
/// at construction, so resolution never indexes past a malformed split.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EssayTypeKey {
    pub country: String,
    pub curriculum: String,
    pub subject: String,
    pub question: String,
}

impl EssayTypeKey {
    pub fn new(country: &str, curriculum: &str, subject: &str, question: &str) -> Self {
        Self {
            country: country.to_string(),
            curriculum: curriculum.to_string(),
            subject: subject.to_string(),
            question: question.to_string(),
        }
    }
}

impl FromStr for EssayTypeKey {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split('_').collect();
        if segments.len() != 4 || segments.iter().any(|s| s.is_empty()) {
            return Err(Error::BadRequest(format!(
                "Malformed essay type '{}': expected country_curriculum_subject_question",
                raw
            )));
        }
        Ok(Self::new(segments[0], segments[1], segments[2], segments[3]))
    }
}

impl fmt::Display for EssayTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.country, self.curriculum, self.subject, self.question
        )
    }
}

impl Serialize for EssayTypeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EssayTypeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct RubricTemplate {
    pub name: String,
    pub key: EssayTypeKey,
    pub criteria: Vec<CriterionDefinition>,
    /// Free-text properties the oracle fills in alongside the criteria.
    pub properties: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CriterionDefinition {
    pub name: String,
    pub description: String,
    /// Present for level-based rubrics: ordered descriptors for levels 0..=6.
    pub levels: Option<Vec<LevelDescriptor>>,
}

#[derive(Debug, Clone)]
pub struct LevelDescriptor {
    pub level: i32,
    pub text: String,
}

impl RubricTemplate {
    pub fn criterion(&self, name: &str) -> Option<&CriterionDefinition> {
        self.criteria.iter().find(|c| c.name == name)
    }
}

/// Resolves an essay type to its rubric template, or NotFound.
pub fn resolve(key: &EssayTypeKey) -> Result<&'static RubricTemplate> {
    registry()
        .get(key)
        .ok_or_else(|| Error::NotFound(format!("No rubric template registered for '{}'", key)))
}

pub fn registry() -> &'static HashMap<EssayTypeKey, RubricTemplate> {
    static REGISTRY: OnceLock<HashMap<EssayTypeKey, RubricTemplate>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for template in builtin_templates() {
            map.insert(template.key.clone(), template);
        }
        map
    })
}

fn marks_criterion(name: &str, description: &str) -> CriterionDefinition {
    CriterionDefinition {
        name: name.to_string(),
        description: description.to_string(),
        levels: None,
    }
}

fn level_criterion(name: &str, description: &str, levels: &[&str]) -> CriterionDefinition {
    CriterionDefinition {
        name: name.to_string(),
        description: description.to_string(),
        levels: Some(
            levels
                .iter()
                .enumerate()
                .map(|(i, text)| LevelDescriptor {
                    level: i as i32,
                    text: text.to_string(),
                })
                .collect(),
        ),
    }
}

fn builtin_templates() -> Vec<RubricTemplate> {
    vec![
        RubricTemplate {
            name: "IGCSE First Language English — Narrative Composition".to_string(),
            key: EssayTypeKey::new("uk", "igcse", "english", "narrative"),
            criteria: vec![
                marks_criterion(
                    "Content",
                    "Ideas are well developed, engaging and sustained throughout the narrative.",
                ),
                marks_criterion(
                    "Structure",
                    "The narrative is shaped with a clear arc; paragraphing and sequencing support the plot.",
                ),
                marks_criterion(
                    "Language",
                    "Vocabulary and sentence structures are varied, precise and appropriate to the genre.",
                ),
                marks_criterion(
                    "Accuracy",
                    "Spelling, punctuation and grammar are consistently accurate.",
                ),
            ],
            properties: vec!["Overall Impression".to_string()],
        },
        RubricTemplate {
            name: "IGCSE First Language English — Descriptive Composition".to_string(),
            key: EssayTypeKey::new("uk", "igcse", "english", "descriptive"),
            criteria: vec![
                marks_criterion(
                    "Content",
                    "Description creates a convincing, well-focused picture with effective detail.",
                ),
                marks_criterion(
                    "Structure",
                    "Material is organised so the description builds rather than lists.",
                ),
                marks_criterion(
                    "Language",
                    "Imagery and word choice are deliberate and varied; tone is controlled.",
                ),
                marks_criterion(
                    "Accuracy",
                    "Spelling, punctuation and grammar are consistently accurate.",
                ),
            ],
            properties: vec!["Overall Impression".to_string()],
        },
        RubricTemplate {
            name: "GCE O-Level English — Situational Writing".to_string(),
            key: EssayTypeKey::new("sg", "gce-o", "english", "situational"),
            criteria: vec![
                level_criterion(
                    "Task Fulfilment",
                    "Addresses purpose, audience and context; covers all required points.",
                    &[
                        "No creditable response to the task.",
                        "Few required points addressed; purpose and audience largely ignored.",
                        "Some required points addressed; limited awareness of audience.",
                        "Most required points addressed; purpose generally clear.",
                        "All required points addressed; tone mostly appropriate.",
                        "All points developed with a consistently appropriate tone.",
                        "Fully developed response; purpose, audience and context handled with assurance.",
                    ],
                ),
                level_criterion(
                    "Language",
                    "Accuracy and appropriateness of grammar, vocabulary and register.",
                    &[
                        "Language too inaccurate to convey meaning.",
                        "Frequent errors obscure meaning.",
                        "Errors noticeable but meaning usually clear.",
                        "Mostly accurate; some variety of structure.",
                        "Accurate with varied structures; occasional slips.",
                        "Consistently accurate, varied and appropriate.",
                        "Precise, fluent and virtually error-free.",
                    ],
                ),
            ],
            properties: vec!["Overall Impression".to_string()],
        },
        RubricTemplate {
            name: "GCE O-Level English — Continuous Writing".to_string(),
            key: EssayTypeKey::new("sg", "gce-o", "english", "continuous"),
            criteria: vec![
                level_criterion(
                    "Content",
                    "Relevance and development of ideas for the chosen topic.",
                    &[
                        "No creditable content.",
                        "Ideas scarcely relevant or developed.",
                        "Some relevant ideas, thinly developed.",
                        "Relevant ideas with uneven development.",
                        "Relevant, developed ideas throughout most of the essay.",
                        "Fully relevant ideas, well developed and organised.",
                        "Compelling, fully developed ideas sustained throughout.",
                    ],
                ),
                level_criterion(
                    "Language and Organisation",
                    "Accuracy, ambition of language and coherence of structure.",
                    &[
                        "Language too weak to credit.",
                        "Persistent errors; little organisation.",
                        "Meaning clear despite frequent errors; basic organisation.",
                        "Mostly accurate; paragraphs generally coherent.",
                        "Accurate and varied; clear overall shape.",
                        "Consistently accurate and ambitious; cohesive throughout.",
                        "Precise, ambitious language in a tightly controlled structure.",
                    ],
                ),
            ],
            properties: vec!["Overall Impression".to_string()],
        },
    ]
}
