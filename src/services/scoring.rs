use crate::error::{Error, Result};
use crate::models::answer::{CriterionResult, PropertyResult};
use crate::models::question::{EssayQuestion, MultipleChoiceQuestion, OpenEndedQuestion};
use crate::models::rubric::{RubricTemplate, MAX_RUBRIC_LEVEL};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Substituted for a blank student answer so the oracle is never handed an
/// empty user message.
pub const NO_ANSWER_SENTINEL: &str = "No Answer";

const OVERALL_IMPRESSION: &str = "Overall Impression";

/// Multiple choice is exact and binary: full marks on a match with the
/// configured correct choice, zero otherwise (including when the author
/// never set a correct choice).
pub fn score_multiple_choice(question: &MultipleChoiceQuestion, selected: i32) -> Decimal {
    if question.answer > 0 && selected == question.answer {
        Decimal::from(question.marks)
    } else {
        Decimal::ZERO
    }
}

pub fn build_open_ended_prompt(
    label: &str,
    question: &OpenEndedQuestion,
    student_answer: &str,
) -> (String, String) {
    let scheme = question
        .marking_scheme
        .iter()
        .enumerate()
        .map(|(i, point)| format!("{}. {}", i + 1, point))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        "You are an experienced teacher marking question {} of a worksheet.\n\
         Question: {}\n\
         Maximum marks: {}\n\
         Marking scheme (each point is worth one mark):\n{}\n\n\
         Award a whole number of marks between 0 and {} based on how many \
         marking scheme points the answer covers.\n\
         Reply in exactly this format:\n\
         Mark: <integer>\n\
         Feedback: <one short paragraph addressed to the student>",
        label, question.text, question.marks, scheme, question.marks
    );

    let answer_text = if student_answer.trim().is_empty() {
        NO_ANSWER_SENTINEL
    } else {
        student_answer
    };

    (system, answer_text.to_string())
}

/// Parses the `Mark: <int>` / `Feedback: <text>` convention. Anything that
/// does not fit the shape, including an out-of-range mark, is an oracle
/// contract violation, never a silent zero.
pub fn parse_open_ended_reply(raw: &str, max_marks: i32) -> Result<(i32, String)> {
    let mark_pos = raw
        .find("Mark:")
        .ok_or_else(|| Error::Oracle(format!("Reply missing 'Mark:' marker: {:.80}", raw)))?;
    let after_mark = raw[mark_pos + "Mark:".len()..].trim_start();
    let digits: String = after_mark
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return Err(Error::Oracle(format!(
            "Reply has no integer after 'Mark:': {:.80}",
            raw
        )));
    }
    let mark: i32 = digits
        .parse()
        .map_err(|_| Error::Oracle(format!("Unparseable mark '{}'", digits)))?;
    if mark > max_marks {
        return Err(Error::Oracle(format!(
            "Mark {} exceeds question maximum {}",
            mark, max_marks
        )));
    }

    let feedback_pos = raw
        .find("Feedback:")
        .ok_or_else(|| Error::Oracle(format!("Reply missing 'Feedback:' marker: {:.80}", raw)))?;
    let feedback = raw[feedback_pos + "Feedback:".len()..].trim().to_string();

    Ok((mark, feedback))
}

/// Builds the multi-criterion essay prompt. Only criteria with a non-zero
/// configured weight appear; level-based criteria include their ordered
/// level descriptions. Fails if the question's criteria have drifted out of
/// name-alignment with the rubric template.
pub fn build_essay_prompt(
    label: &str,
    question: &EssayQuestion,
    template: &RubricTemplate,
    student_answer: &str,
) -> Result<(String, String)> {
    let mut criteria_lines = Vec::new();
    for criterion in question.criteria.iter().filter(|c| c.marks > 0) {
        let definition = template.criterion(&criterion.name).ok_or_else(|| {
            Error::Internal(format!(
                "Criterion '{}' is not part of rubric template '{}'",
                criterion.name, template.key
            ))
        })?;
        match &definition.levels {
            Some(levels) => {
                let level_lines = levels
                    .iter()
                    .map(|l| format!("    Level {}: {}", l.level, l.text))
                    .collect::<Vec<_>>()
                    .join("\n");
                criteria_lines.push(format!(
                    "- {} (award a level from 0 to {}): {}\n{}",
                    criterion.name, MAX_RUBRIC_LEVEL, definition.description, level_lines
                ));
            }
            None => criteria_lines.push(format!(
                "- {} (0 to {} marks): {}",
                criterion.name, criterion.marks, definition.description
            )),
        }
    }
    if criteria_lines.is_empty() {
        return Err(Error::Internal(format!(
            "Essay question {} has no enabled criteria",
            label
        )));
    }

    let properties_lines = template
        .properties
        .iter()
        .map(|p| format!("- {}", p))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        "You are an experienced examiner grading essay question {} using the rubric '{}'.\n\
         Essay prompt: {}\n\n\
         Criteria:\n{}\n\n\
         Also write each of these free-text properties:\n{}\n\n\
         Reply with a JSON object only:\n\
         {{\"criteria\": [{{\"name\": \"...\", \"marks\": <int> OR \"level\": <int>, \
         \"evaluation\": \"...\", \"suggestion\": \"...\"}}], \
         \"properties\": [{{\"name\": \"...\", \"text\": \"...\"}}]}}\n\
         Use \"level\" for criteria graded by level and \"marks\" otherwise.",
        label,
        template.name,
        question.text,
        criteria_lines.join("\n"),
        properties_lines
    );

    let answer_text = if student_answer.trim().is_empty() {
        NO_ANSWER_SENTINEL
    } else {
        student_answer
    };

    Ok((system, answer_text.to_string()))
}

#[derive(Debug)]
pub struct EssayEvaluation {
    pub criteria: Vec<CriterionResult>,
    pub properties: Vec<PropertyResult>,
    pub marks: Decimal,
    pub overall_impression: String,
}

#[derive(Debug, Deserialize)]
struct RawEssayReply {
    criteria: Vec<RawCriterionReply>,
    #[serde(default)]
    properties: Vec<RawPropertyReply>,
}

#[derive(Debug, Deserialize)]
struct RawCriterionReply {
    name: String,
    #[serde(default)]
    marks: Option<i64>,
    #[serde(default)]
    level: Option<i64>,
    evaluation: String,
    #[serde(default)]
    suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPropertyReply {
    name: String,
    text: String,
}

/// The rubric's scoring function: turns the oracle's structured reply into
/// per-criterion marks and the essay total. Disabled (weight 0) criteria
/// are excluded from the sum and persist with zero marks; level-based
/// criteria convert as level/6 of the weight, rounded half-up to the
/// nearest 0.5.
pub fn score_essay_reply(
    question: &EssayQuestion,
    template: &RubricTemplate,
    raw: &JsonValue,
) -> Result<EssayEvaluation> {
    let reply: RawEssayReply = serde_json::from_value(raw.clone())
        .map_err(|e| Error::Oracle(format!("Essay reply does not match expected shape: {}", e)))?;

    let mut criteria = Vec::with_capacity(question.criteria.len());
    let mut total = Decimal::ZERO;

    for criterion in &question.criteria {
        if criterion.marks == 0 {
            criteria.push(CriterionResult {
                name: criterion.name.clone(),
                marks: Decimal::ZERO,
                level: None,
                evaluation: String::new(),
                suggestion: None,
            });
            continue;
        }

        let definition = template.criterion(&criterion.name).ok_or_else(|| {
            Error::Internal(format!(
                "Criterion '{}' is not part of rubric template '{}'",
                criterion.name, template.key
            ))
        })?;
        let entry = reply
            .criteria
            .iter()
            .find(|c| c.name == criterion.name)
            .ok_or_else(|| {
                Error::Oracle(format!("Reply missing criterion '{}'", criterion.name))
            })?;

        let (marks, level) = if definition.levels.is_some() {
            let level = entry.level.ok_or_else(|| {
                Error::Oracle(format!(
                    "Level-based criterion '{}' returned no level",
                    criterion.name
                ))
            })?;
            if !(0..=MAX_RUBRIC_LEVEL as i64).contains(&level) {
                return Err(Error::Oracle(format!(
                    "Level {} for criterion '{}' outside 0..={}",
                    level, criterion.name, MAX_RUBRIC_LEVEL
                )));
            }
            let raw_marks = Decimal::from(level * criterion.marks as i64)
                / Decimal::from(MAX_RUBRIC_LEVEL);
            (round_to_nearest_half(raw_marks), Some(level as i32))
        } else {
            let marks = entry.marks.ok_or_else(|| {
                Error::Oracle(format!(
                    "Criterion '{}' returned no marks",
                    criterion.name
                ))
            })?;
            if !(0..=criterion.marks as i64).contains(&marks) {
                return Err(Error::Oracle(format!(
                    "Marks {} for criterion '{}' outside 0..={}",
                    marks, criterion.name, criterion.marks
                )));
            }
            (Decimal::from(marks), None)
        };

        total += marks;
        criteria.push(CriterionResult {
            name: criterion.name.clone(),
            marks,
            level,
            evaluation: entry.evaluation.clone(),
            suggestion: entry.suggestion.clone(),
        });
    }

    let mut properties = Vec::with_capacity(template.properties.len());
    for name in &template.properties {
        let entry = reply
            .properties
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| Error::Oracle(format!("Reply missing property '{}'", name)))?;
        properties.push(PropertyResult {
            name: name.clone(),
            text: entry.text.clone(),
        });
    }
    let overall_impression = properties
        .iter()
        .find(|p| p.name == OVERALL_IMPRESSION)
        .map(|p| p.text.clone())
        .unwrap_or_default();

    Ok(EssayEvaluation {
        criteria,
        properties,
        marks: total,
        overall_impression,
    })
}

/// Deterministic rounding for level-derived fractional marks: half-up to
/// the nearest 0.5.
fn round_to_nearest_half(value: Decimal) -> Decimal {
    (value * Decimal::TWO).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        / Decimal::TWO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{Choice, EssayCriterion};
    use crate::models::rubric::{resolve, EssayTypeKey};
    use serde_json::json;

    fn mcq() -> MultipleChoiceQuestion {
        MultipleChoiceQuestion {
            text: "2 + 2?".into(),
            choices: vec![
                Choice {
                    index: 1,
                    text: "3".into(),
                },
                Choice {
                    index: 2,
                    text: "4".into(),
                },
            ],
            answer: 2,
            marks: 5,
            explanation: None,
        }
    }

    fn osmosis_question() -> OpenEndedQuestion {
        OpenEndedQuestion {
            text: "How does the cell absorb glucose?".into(),
            marks: 3,
            marking_scheme: vec![
                "uses active transport".into(),
                "mentions concentration gradient".into(),
                "mentions energy".into(),
            ],
            sample_answer: None,
            explanation: None,
        }
    }

    #[test]
    fn multiple_choice_is_binary() {
        let q = mcq();
        assert_eq!(score_multiple_choice(&q, 2), Decimal::from(5));
        assert_eq!(score_multiple_choice(&q, 1), Decimal::ZERO);
        assert_eq!(score_multiple_choice(&q, 0), Decimal::ZERO);
    }

    #[test]
    fn unset_correct_answer_never_awards() {
        let mut q = mcq();
        q.answer = 0;
        assert_eq!(score_multiple_choice(&q, 0), Decimal::ZERO);
    }

    #[test]
    fn open_ended_prompt_lists_scheme_and_substitutes_sentinel() {
        let q = osmosis_question();
        let (system, user) = build_open_ended_prompt("1", &q, "   ");
        assert!(system.contains("uses active transport"));
        assert!(system.contains("Maximum marks: 3"));
        assert_eq!(user, NO_ANSWER_SENTINEL);

        let (_, user) = build_open_ended_prompt("1", &q, "it uses active transport");
        assert_eq!(user, "it uses active transport");
    }

    #[test]
    fn parses_mark_and_feedback() {
        let (mark, feedback) =
            parse_open_ended_reply("Mark: 2\nFeedback: Mentioned the gradient.", 3).unwrap();
        assert_eq!(mark, 2);
        assert_eq!(feedback, "Mentioned the gradient.");
    }

    #[test]
    fn reply_without_markers_fails_loudly() {
        assert!(matches!(
            parse_open_ended_reply("you get 2 out of 3", 3),
            Err(Error::Oracle(_))
        ));
        assert!(matches!(
            parse_open_ended_reply("Mark: two\nFeedback: ok", 3),
            Err(Error::Oracle(_))
        ));
        assert!(matches!(
            parse_open_ended_reply("Mark: 7\nFeedback: ok", 3),
            Err(Error::Oracle(_))
        ));
    }

    fn essay_question(weights: &[(&str, i32)]) -> EssayQuestion {
        EssayQuestion {
            text: "Write a story that begins with a knock at the door.".into(),
            essay_type: "uk_igcse_english_narrative".parse().unwrap(),
            criteria: weights
                .iter()
                .map(|(name, marks)| EssayCriterion {
                    name: name.to_string(),
                    description: String::new(),
                    marks: *marks,
                })
                .collect(),
        }
    }

    #[test]
    fn essay_prompt_excludes_disabled_criteria() {
        let q = essay_question(&[("Content", 5), ("Structure", 0), ("Language", 5)]);
        let template = resolve(&q.essay_type).unwrap();
        let (system, _) = build_essay_prompt("3", &q, template, "my essay").unwrap();
        assert!(system.contains("Content"));
        assert!(system.contains("Language"));
        assert!(!system.contains("- Structure"));
        assert!(system.contains("Overall Impression"));
    }

    #[test]
    fn essay_prompt_rejects_all_disabled() {
        let q = essay_question(&[("Content", 0)]);
        let template = resolve(&q.essay_type).unwrap();
        assert!(build_essay_prompt("3", &q, template, "x").is_err());
    }

    #[test]
    fn essay_reply_sums_enabled_criteria_only() {
        let q = essay_question(&[("Content", 5), ("Structure", 0), ("Language", 5)]);
        let template = resolve(&q.essay_type).unwrap();
        let reply = json!({
            "criteria": [
                {"name": "Content", "marks": 4, "evaluation": "Strong ideas", "suggestion": "Vary pacing"},
                {"name": "Language", "marks": 3, "evaluation": "Good range", "suggestion": "Watch tense"}
            ],
            "properties": [
                {"name": "Overall Impression", "text": "A confident narrative."}
            ]
        });
        let result = score_essay_reply(&q, template, &reply).unwrap();
        assert_eq!(result.marks, Decimal::from(7));
        assert_eq!(result.criteria.len(), 3);
        let structure = result
            .criteria
            .iter()
            .find(|c| c.name == "Structure")
            .unwrap();
        assert_eq!(structure.marks, Decimal::ZERO);
        assert_eq!(result.overall_impression, "A confident narrative.");
    }

    #[test]
    fn essay_reply_missing_criterion_is_oracle_error() {
        let q = essay_question(&[("Content", 5)]);
        let template = resolve(&q.essay_type).unwrap();
        let reply = json!({"criteria": [], "properties": []});
        assert!(matches!(
            score_essay_reply(&q, template, &reply),
            Err(Error::Oracle(_))
        ));
    }

    #[test]
    fn essay_reply_rejects_out_of_range_marks() {
        let q = essay_question(&[("Content", 5)]);
        let template = resolve(&q.essay_type).unwrap();
        let reply = json!({
            "criteria": [{"name": "Content", "marks": 9, "evaluation": "x"}],
            "properties": [{"name": "Overall Impression", "text": "y"}]
        });
        assert!(matches!(
            score_essay_reply(&q, template, &reply),
            Err(Error::Oracle(_))
        ));
    }

    fn level_essay(weights: &[(&str, i32)]) -> (EssayQuestion, &'static RubricTemplate) {
        let key: EssayTypeKey = "sg_gce-o_english_continuous".parse().unwrap();
        let q = EssayQuestion {
            text: "Write about a lesson you learned the hard way.".into(),
            essay_type: key.clone(),
            criteria: weights
                .iter()
                .map(|(name, marks)| EssayCriterion {
                    name: name.to_string(),
                    description: String::new(),
                    marks: *marks,
                })
                .collect(),
        };
        (q, resolve(&key).unwrap())
    }

    #[test]
    fn level_marks_convert_proportionally_with_half_rounding() {
        let (q, template) =
            level_essay(&[("Content", 10), ("Language and Organisation", 5)]);
        let reply = json!({
            "criteria": [
                {"name": "Content", "level": 5, "evaluation": "Developed"},
                {"name": "Language and Organisation", "level": 3, "evaluation": "Mostly accurate"}
            ],
            "properties": [{"name": "Overall Impression", "text": "Promising."}]
        });
        let result = score_essay_reply(&q, template, &reply).unwrap();
        // 5/6 * 10 = 8.33 -> 8.5; 3/6 * 5 = 2.5 exactly.
        let content = result.criteria.iter().find(|c| c.name == "Content").unwrap();
        assert_eq!(content.marks, Decimal::new(85, 1));
        assert_eq!(content.level, Some(5));
        let lang = result
            .criteria
            .iter()
            .find(|c| c.name == "Language and Organisation")
            .unwrap();
        assert_eq!(lang.marks, Decimal::new(25, 1));
        assert_eq!(result.marks, Decimal::new(110, 1));
    }

    #[test]
    fn level_outside_range_is_oracle_error() {
        let (q, template) = level_essay(&[("Content", 10)]);
        let reply = json!({
            "criteria": [{"name": "Content", "level": 7, "evaluation": "?"}],
            "properties": [{"name": "Overall Impression", "text": ""}]
        });
        assert!(matches!(
            score_essay_reply(&q, template, &reply),
            Err(Error::Oracle(_))
        ));
    }

    #[test]
    fn scoring_is_deterministic_for_same_reply() {
        let (q, template) = level_essay(&[("Content", 7)]);
        let reply = json!({
            "criteria": [{"name": "Content", "level": 4, "evaluation": "Fine"}],
            "properties": [{"name": "Overall Impression", "text": "Fine."}]
        });
        let a = score_essay_reply(&q, template, &reply).unwrap();
        let b = score_essay_reply(&q, template, &reply).unwrap();
        assert_eq!(a.marks, b.marks);
        // 4/6 * 7 = 4.67 -> rounds to 4.5.
        assert_eq!(a.marks, Decimal::new(45, 1));
    }
}
