use crate::models::question::{Question, QuestionKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One answer per question, mirroring the published worksheet tree. The
/// `question_id` back-reference is verified during grading so a structural
/// mismatch aborts instead of silently scoring the wrong question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub question_id: Uuid,
    /// Must equal the question's order among its siblings.
    pub order: i32,
    /// Set once this leaf has been scored; lets an interrupted grading pass
    /// resume without re-scoring finished leaves.
    pub graded_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: AnswerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "answer_type", rename_all = "snake_case")]
pub enum AnswerKind {
    MultipleChoice(MultipleChoiceAnswer),
    ShortAnswer(OpenEndedAnswer),
    OpenEnded(OpenEndedAnswer),
    Essay(EssayAnswer),
    Nested(NestedAnswer),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipleChoiceAnswer {
    /// 1-based chosen choice index, 0 when the student picked nothing.
    pub selected: i32,
    /// Binary: 0 or the question's full marks.
    pub marks: Decimal,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenEndedAnswer {
    pub text: String,
    pub marks: Decimal,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EssayAnswer {
    pub text: String,
    pub criteria: Vec<CriterionResult>,
    pub properties: Vec<PropertyResult>,
    /// Sum of the criterion marks.
    pub marks: Decimal,
    pub overall_impression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionResult {
    pub name: String,
    pub marks: Decimal,
    /// Awarded level (0..=6) for level-based rubrics.
    pub level: Option<i32>,
    pub evaluation: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyResult {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedAnswer {
    pub children: Vec<Answer>,
}

impl Answer {
    /// Builds a blank answer for `question` with every mark and feedback
    /// field zeroed, mirroring nesting and visiting children in the same
    /// depth-first, order-ascending traversal used everywhere else.
    pub fn blank_for(question: &Question) -> Self {
        let kind = match &question.kind {
            QuestionKind::MultipleChoice(_) => AnswerKind::MultipleChoice(MultipleChoiceAnswer {
                selected: 0,
                marks: Decimal::ZERO,
                feedback: None,
            }),
            QuestionKind::ShortAnswer(_) => AnswerKind::ShortAnswer(OpenEndedAnswer {
                text: String::new(),
                marks: Decimal::ZERO,
                feedback: String::new(),
            }),
            QuestionKind::OpenEnded(_) => AnswerKind::OpenEnded(OpenEndedAnswer {
                text: String::new(),
                marks: Decimal::ZERO,
                feedback: String::new(),
            }),
            QuestionKind::Essay(q) => AnswerKind::Essay(EssayAnswer {
                text: String::new(),
                criteria: q
                    .criteria
                    .iter()
                    .map(|c| CriterionResult {
                        name: c.name.clone(),
                        marks: Decimal::ZERO,
                        level: None,
                        evaluation: String::new(),
                        suggestion: None,
                    })
                    .collect(),
                properties: Vec::new(),
                marks: Decimal::ZERO,
                overall_impression: String::new(),
            }),
            QuestionKind::Nested(q) => AnswerKind::Nested(NestedAnswer {
                children: q.children.iter().map(Answer::blank_for).collect(),
            }),
        };
        Self {
            id: Uuid::new_v4(),
            question_id: question.id,
            order: question.order,
            graded_at: None,
            kind,
        }
    }

    pub fn marks(&self) -> Decimal {
        match &self.kind {
            AnswerKind::MultipleChoice(a) => a.marks,
            AnswerKind::ShortAnswer(a) | AnswerKind::OpenEnded(a) => a.marks,
            AnswerKind::Essay(a) => a.marks,
            AnswerKind::Nested(a) => total_awarded(&a.children),
        }
    }
}

pub fn blank_sheet_answers(questions: &[Question]) -> Vec<Answer> {
    questions.iter().map(Answer::blank_for).collect()
}

pub fn total_awarded(answers: &[Answer]) -> Decimal {
    answers.iter().map(Answer::marks).sum()
}

/// Depth-first flattening over directly scorable answers, in the same
/// traversal order as `question::flatten_leaves`.
pub fn flatten_leaves(answers: &[Answer]) -> Vec<&Answer> {
    let mut out = Vec::new();
    collect_leaves(answers, &mut out);
    out
}

fn collect_leaves<'a>(answers: &'a [Answer], out: &mut Vec<&'a Answer>) {
    for answer in answers {
        match &answer.kind {
            AnswerKind::Nested(nested) => collect_leaves(&nested.children, out),
            _ => out.push(answer),
        }
    }
}

pub fn flatten_leaves_mut(answers: &mut [Answer]) -> Vec<&mut Answer> {
    let mut out = Vec::new();
    collect_leaves_mut(answers, &mut out);
    out
}

fn collect_leaves_mut<'a>(answers: &'a mut [Answer], out: &mut Vec<&'a mut Answer>) {
    for answer in answers.iter_mut() {
        if matches!(answer.kind, AnswerKind::Nested(_)) {
            if let AnswerKind::Nested(nested) = &mut answer.kind {
                collect_leaves_mut(&mut nested.children, out);
            }
        } else {
            out.push(answer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{
        flatten_leaves, insert_at, Choice, EssayCriterion, EssayQuestion, MultipleChoiceQuestion,
        NestedQuestion, OpenEndedQuestion,
    };

    fn sample_tree() -> Vec<Question> {
        let mut roots = Vec::new();
        insert_at(
            &mut roots,
            1,
            Question::new(QuestionKind::MultipleChoice(MultipleChoiceQuestion {
                text: "mcq".into(),
                choices: vec![Choice {
                    index: 1,
                    text: "a".into(),
                }],
                answer: 1,
                marks: 5,
                explanation: None,
            })),
        )
        .unwrap();

        let mut child = Question::new(QuestionKind::OpenEnded(OpenEndedQuestion {
            text: "inner".into(),
            marks: 3,
            marking_scheme: vec!["point".into()],
            sample_answer: None,
            explanation: None,
        }));
        child.order = 1;
        let mut essay_child = Question::new(QuestionKind::Essay(EssayQuestion {
            text: "essay".into(),
            essay_type: "uk_igcse_english_narrative".parse().unwrap(),
            criteria: vec![EssayCriterion {
                name: "Content".into(),
                description: "".into(),
                marks: 10,
            }],
        }));
        essay_child.order = 2;
        insert_at(
            &mut roots,
            2,
            Question::new(QuestionKind::Nested(NestedQuestion {
                text: "parent".into(),
                children: vec![child, essay_child],
            })),
        )
        .unwrap();
        roots
    }

    #[test]
    fn blank_sheet_mirrors_question_tree() {
        let questions = sample_tree();
        let mut answers = blank_sheet_answers(&questions);

        let question_leaves = flatten_leaves(&questions);
        let answer_leaves = flatten_leaves_mut(&mut answers);
        assert_eq!(question_leaves.len(), answer_leaves.len());
        for (q, a) in question_leaves.iter().zip(answer_leaves.iter()) {
            assert_eq!(q.question.id, a.question_id);
            assert_eq!(q.question.order, a.order);
            assert!(a.graded_at.is_none());
            assert_eq!(a.marks(), Decimal::ZERO);
        }
    }

    #[test]
    fn blank_essay_answer_has_one_row_per_criterion() {
        let questions = sample_tree();
        let mut answers = blank_sheet_answers(&questions);
        let leaves = flatten_leaves_mut(&mut answers);
        let essay = leaves
            .into_iter()
            .find(|a| matches!(a.kind, AnswerKind::Essay(_)))
            .unwrap();
        if let AnswerKind::Essay(e) = &essay.kind {
            assert_eq!(e.criteria.len(), 1);
            assert_eq!(e.criteria[0].name, "Content");
            assert!(e.overall_impression.is_empty());
        }
    }

    #[test]
    fn total_awarded_descends_into_nested() {
        let questions = sample_tree();
        let mut answers = blank_sheet_answers(&questions);
        {
            let leaves = flatten_leaves_mut(&mut answers);
            for leaf in leaves {
                if let AnswerKind::MultipleChoice(a) = &mut leaf.kind {
                    a.marks = Decimal::from(5);
                }
                if let AnswerKind::OpenEnded(a) = &mut leaf.kind {
                    a.marks = Decimal::from(2);
                }
            }
        }
        assert_eq!(total_awarded(&answers), Decimal::from(7));
    }

    #[test]
    fn mutable_flattening_reaches_every_leaf_and_skips_nested_nodes() {
        let questions = sample_tree();
        let mut answers = blank_sheet_answers(&questions);

        let mut leaves = flatten_leaves_mut(&mut answers);
        assert_eq!(leaves.len(), 3);
        assert!(leaves
            .iter()
            .all(|a| !matches!(a.kind, AnswerKind::Nested(_))));
        for leaf in leaves.iter_mut() {
            leaf.graded_at = Some(Utc::now());
        }
        drop(leaves);

        // The writes land on the leaves inside the nested subtree too.
        let AnswerKind::Nested(nested) = &answers[1].kind else {
            panic!("expected nested at position 2");
        };
        assert!(nested.children.iter().all(|a| a.graded_at.is_some()));
        assert!(answers[0].graded_at.is_some());
    }

    #[test]
    fn answer_union_round_trips_through_json() {
        let questions = sample_tree();
        let answers = blank_sheet_answers(&questions);
        let json = serde_json::to_value(&answers).unwrap();
        let back: Vec<Answer> = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), answers.len());
        assert!(matches!(back[0].kind, AnswerKind::MultipleChoice(_)));
        assert!(matches!(back[1].kind, AnswerKind::Nested(_)));
    }
}
