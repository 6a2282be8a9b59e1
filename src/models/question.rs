use crate::error::{Error, Result};
use crate::models::rubric::EssayTypeKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nesting is capped at three levels: numeric, alphabetic, roman-numeral.
pub const MAX_NESTING_DEPTH: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    /// 1-based position among siblings. Sibling orders are always a
    /// contiguous permutation 1..=N; deletion renumbers to close gaps.
    pub order: i32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "question_type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice(MultipleChoiceQuestion),
    ShortAnswer(OpenEndedQuestion),
    OpenEnded(OpenEndedQuestion),
    Essay(EssayQuestion),
    Nested(NestedQuestion),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipleChoiceQuestion {
    pub text: String,
    pub choices: Vec<Choice>,
    /// 1-based index of the correct choice, 0 when the author has not set one.
    pub answer: i32,
    pub marks: i32,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: i32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenEndedQuestion {
    pub text: String,
    pub marks: i32,
    /// Discrete markable points, each conceptually worth one mark.
    pub marking_scheme: Vec<String>,
    pub sample_answer: Option<String>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EssayQuestion {
    pub text: String,
    pub essay_type: EssayTypeKey,
    pub criteria: Vec<EssayCriterion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EssayCriterion {
    pub name: String,
    pub description: String,
    /// Weight of this criterion; 0 disables it for this question instance.
    pub marks: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedQuestion {
    pub text: String,
    pub children: Vec<Question>,
}

impl Question {
    pub fn new(kind: QuestionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            order: 0,
            kind,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, QuestionKind::Nested(_))
    }

    /// Marks carried by this question: its own for a leaf, the recursive
    /// sum of its children for a nested question. Essay marks count only
    /// enabled (non-zero-weight) criteria.
    pub fn marks(&self) -> i32 {
        match &self.kind {
            QuestionKind::MultipleChoice(q) => q.marks,
            QuestionKind::ShortAnswer(q) | QuestionKind::OpenEnded(q) => q.marks,
            QuestionKind::Essay(q) => q.criteria.iter().map(|c| c.marks).sum(),
            QuestionKind::Nested(q) => total_marks(&q.children),
        }
    }

    /// Depth of this question's subtree (a leaf is 1).
    pub fn subtree_depth(&self) -> usize {
        match &self.kind {
            QuestionKind::Nested(q) => {
                1 + q
                    .children
                    .iter()
                    .map(Question::subtree_depth)
                    .max()
                    .unwrap_or(0)
            }
            _ => 1,
        }
    }
}

pub fn total_marks(questions: &[Question]) -> i32 {
    questions.iter().map(Question::marks).sum()
}

/// A leaf question together with its display label, e.g. "2(a)(iii)".
#[derive(Debug)]
pub struct LeafQuestion<'a> {
    pub label: String,
    pub question: &'a Question,
}

/// Flattens the tree depth-first in ascending sibling order, yielding only
/// directly scorable questions. This is the single traversal order the
/// whole grading pipeline depends on.
pub fn flatten_leaves(questions: &[Question]) -> Vec<LeafQuestion<'_>> {
    let mut out = Vec::new();
    collect_leaves(questions, 0, "", &mut out);
    out
}

fn collect_leaves<'a>(
    questions: &'a [Question],
    depth: usize,
    prefix: &str,
    out: &mut Vec<LeafQuestion<'a>>,
) {
    for q in questions {
        let label = format!("{}{}", prefix, order_label(depth, q.order));
        match &q.kind {
            QuestionKind::Nested(nested) => {
                collect_leaves(&nested.children, depth + 1, &label, out);
            }
            _ => out.push(LeafQuestion { label, question: q }),
        }
    }
}

/// Per-depth sibling label: numeric at the top level, alphabetic below,
/// roman numerals at the deepest level.
pub fn order_label(depth: usize, order: i32) -> String {
    match depth {
        0 => order.to_string(),
        1 => format!("({})", to_alpha(order)),
        _ => format!("({})", to_roman(order)),
    }
}

fn to_alpha(order: i32) -> String {
    let mut n = order.max(1) as u32;
    let mut out = String::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.insert(0, char::from(b'a' + rem as u8));
        n = (n - 1) / 26;
    }
    out
}

fn to_roman(order: i32) -> String {
    const TABLE: &[(i32, &str)] = &[
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut n = order.max(1);
    let mut out = String::new();
    for &(value, numeral) in TABLE {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

/// Inserts a question at `order` among `siblings`, shifting later siblings
/// up by one. `order` must lie in 1..=len+1; out-of-range is a caller error.
pub fn insert_at(siblings: &mut Vec<Question>, order: i32, mut question: Question) -> Result<()> {
    let len = siblings.len() as i32;
    if order < 1 || order > len + 1 {
        return Err(Error::BadRequest(format!(
            "Insert order {} out of range 1..={}",
            order,
            len + 1
        )));
    }
    for sibling in siblings.iter_mut() {
        if sibling.order >= order {
            sibling.order += 1;
        }
    }
    question.order = order;
    siblings.insert((order - 1) as usize, question);
    Ok(())
}

/// Removes the question at `order`, dropping its whole subtree, then
/// renumbers the remaining siblings back to a contiguous 1..=N permutation.
pub fn remove_at(siblings: &mut Vec<Question>, order: i32) -> Result<Question> {
    let len = siblings.len() as i32;
    if order < 1 || order > len {
        return Err(Error::BadRequest(format!(
            "Remove order {} out of range 1..={}",
            order, len
        )));
    }
    let removed = siblings.remove((order - 1) as usize);
    for (idx, sibling) in siblings.iter_mut().enumerate() {
        sibling.order = idx as i32 + 1;
    }
    Ok(removed)
}

/// Swaps the order values of two siblings pairwise.
pub fn swap_orders(siblings: &mut [Question], a: i32, b: i32) -> Result<()> {
    let len = siblings.len() as i32;
    if a < 1 || a > len || b < 1 || b > len {
        return Err(Error::BadRequest(format!(
            "Swap orders ({}, {}) out of range 1..={}",
            a, b, len
        )));
    }
    if a == b {
        return Ok(());
    }
    let ia = (a - 1) as usize;
    let ib = (b - 1) as usize;
    siblings[ia].order = b;
    siblings[ib].order = a;
    siblings.swap(ia, ib);
    Ok(())
}

/// Walks to the mutable sibling list addressed by `path` (a sequence of
/// sibling orders leading into nested questions). An empty path addresses
/// the root list.
pub fn siblings_at_path<'a>(
    roots: &'a mut Vec<Question>,
    path: &[i32],
) -> Result<&'a mut Vec<Question>> {
    let mut current = roots;
    for &order in path {
        let len = current.len() as i32;
        if order < 1 || order > len {
            return Err(Error::BadRequest(format!(
                "Question path order {} out of range 1..={}",
                order, len
            )));
        }
        let q = &mut current[(order - 1) as usize];
        match &mut q.kind {
            QuestionKind::Nested(nested) => current = &mut nested.children,
            _ => {
                return Err(Error::BadRequest(format!(
                    "Question at order {} is not nested and has no children",
                    order
                )))
            }
        }
    }
    Ok(current)
}

/// True when sibling orders at every level form exactly {1, ..., N}.
pub fn order_invariant_holds(questions: &[Question]) -> bool {
    let mut orders: Vec<i32> = questions.iter().map(|q| q.order).collect();
    orders.sort_unstable();
    if orders != (1..=questions.len() as i32).collect::<Vec<_>>() {
        return false;
    }
    questions.iter().all(|q| match &q.kind {
        QuestionKind::Nested(nested) => order_invariant_holds(&nested.children),
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcq(marks: i32) -> Question {
        Question::new(QuestionKind::MultipleChoice(MultipleChoiceQuestion {
            text: "pick one".into(),
            choices: vec![
                Choice {
                    index: 1,
                    text: "a".into(),
                },
                Choice {
                    index: 2,
                    text: "b".into(),
                },
            ],
            answer: 2,
            marks,
            explanation: None,
        }))
    }

    fn open_ended(marks: i32) -> Question {
        Question::new(QuestionKind::OpenEnded(OpenEndedQuestion {
            text: "explain".into(),
            marks,
            marking_scheme: vec!["point".into()],
            sample_answer: None,
            explanation: None,
        }))
    }

    fn nested(children: Vec<Question>) -> Question {
        Question::new(QuestionKind::Nested(NestedQuestion {
            text: "parts follow".into(),
            children,
        }))
    }

    fn seeded(n: usize) -> Vec<Question> {
        let mut siblings = Vec::new();
        for i in 0..n {
            insert_at(&mut siblings, i as i32 + 1, mcq(1)).unwrap();
        }
        siblings
    }

    #[test]
    fn insert_shifts_later_siblings() {
        let mut siblings = seeded(3);
        let ids: Vec<Uuid> = siblings.iter().map(|q| q.id).collect();
        insert_at(&mut siblings, 2, open_ended(3)).unwrap();
        assert_eq!(siblings.len(), 4);
        assert!(order_invariant_holds(&siblings));
        assert_eq!(siblings[0].id, ids[0]);
        assert_eq!(siblings[2].id, ids[1]);
        assert_eq!(siblings[3].id, ids[2]);
    }

    #[test]
    fn insert_rejects_out_of_range_order() {
        let mut siblings = seeded(2);
        assert!(insert_at(&mut siblings, 0, mcq(1)).is_err());
        assert!(insert_at(&mut siblings, 4, mcq(1)).is_err());
        assert_eq!(siblings.len(), 2);
    }

    #[test]
    fn remove_renumbers_contiguously() {
        // Deleting order 2 of 4: old 1 stays 1, old 3 -> 2, old 4 -> 3.
        let mut siblings = seeded(4);
        let ids: Vec<Uuid> = siblings.iter().map(|q| q.id).collect();
        let removed = remove_at(&mut siblings, 2).unwrap();
        assert_eq!(removed.id, ids[1]);
        assert_eq!(siblings.len(), 3);
        assert!(order_invariant_holds(&siblings));
        assert_eq!(
            siblings.iter().map(|q| q.id).collect::<Vec<_>>(),
            vec![ids[0], ids[2], ids[3]]
        );
        assert_eq!(
            siblings.iter().map(|q| q.order).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn remove_rejects_out_of_range_order() {
        let mut siblings = seeded(2);
        assert!(remove_at(&mut siblings, 3).is_err());
    }

    #[test]
    fn remove_drops_whole_subtree() {
        let mut child_a = open_ended(2);
        child_a.order = 1;
        let mut child_b = mcq(1);
        child_b.order = 2;
        let mut siblings = vec![nested(vec![child_a, child_b]), mcq(1)];
        siblings[0].order = 1;
        siblings[1].order = 2;

        remove_at(&mut siblings, 1).unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(flatten_leaves(&siblings).len(), 1);
    }

    #[test]
    fn swap_is_pairwise_and_keeps_permutation() {
        let mut siblings = seeded(3);
        let ids: Vec<Uuid> = siblings.iter().map(|q| q.id).collect();
        swap_orders(&mut siblings, 1, 3).unwrap();
        assert!(order_invariant_holds(&siblings));
        assert_eq!(siblings[0].id, ids[2]);
        assert_eq!(siblings[2].id, ids[0]);
        assert!(swap_orders(&mut siblings, 0, 2).is_err());
    }

    #[test]
    fn total_marks_descends_into_nested() {
        let mut inner = open_ended(3);
        inner.order = 1;
        let mut outer = nested(vec![inner]);
        outer.order = 1;
        let mut top = mcq(5);
        top.order = 2;
        assert_eq!(total_marks(&[outer, top]), 8);
    }

    #[test]
    fn essay_marks_skip_disabled_criteria() {
        let q = Question::new(QuestionKind::Essay(EssayQuestion {
            text: "write".into(),
            essay_type: "uk_igcse_english_narrative".parse().unwrap(),
            criteria: vec![
                EssayCriterion {
                    name: "Grammar".into(),
                    description: "".into(),
                    marks: 5,
                },
                EssayCriterion {
                    name: "Focus".into(),
                    description: "".into(),
                    marks: 0,
                },
                EssayCriterion {
                    name: "Content".into(),
                    description: "".into(),
                    marks: 5,
                },
            ],
        }));
        assert_eq!(q.marks(), 10);
    }

    #[test]
    fn flatten_labels_follow_depth_conventions() {
        let mut leaf = open_ended(1);
        leaf.order = 3;
        let mut mid = nested(vec![leaf]);
        mid.order = 1;
        let mut root = nested(vec![mid]);
        root.order = 2;
        let mut first = mcq(1);
        first.order = 1;

        let questions = [first, root];
        let leaves = flatten_leaves(&questions);
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].label, "1");
        assert_eq!(leaves[1].label, "2(a)(iii)");
    }

    #[test]
    fn roman_and_alpha_labels() {
        assert_eq!(order_label(0, 7), "7");
        assert_eq!(order_label(1, 27), "(aa)");
        assert_eq!(order_label(2, 14), "(xiv)");
    }

    #[test]
    fn siblings_at_path_rejects_leaf_path() {
        let mut roots = seeded(2);
        assert!(siblings_at_path(&mut roots, &[1]).is_err());
        assert!(siblings_at_path(&mut roots, &[9]).is_err());
        assert!(siblings_at_path(&mut roots, &[]).is_ok());
    }

    #[test]
    fn subtree_depth_counts_levels() {
        let mut leaf = mcq(1);
        leaf.order = 1;
        let mut mid = nested(vec![leaf]);
        mid.order = 1;
        let root = nested(vec![mid]);
        assert_eq!(root.subtree_depth(), 3);
        assert_eq!(mcq(1).subtree_depth(), 1);
    }
}
