//! Role-Repair: restores alternation and termination on a conversation
//! snapshot mutated by arbitrary appends.

use log::warn;
use std::fmt;
use std::str::FromStr;

use crate::models::chat::{ Role, Turn };

/// What to do when two turns of the same role meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPolicy {
    /// Keep the first of a run of same-role turns, drop the rest.
    Collapse,
    /// Separate consecutive user turns with an empty assistant turn; drop
    /// repeated assistant turns.
    InsertPlaceholder,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseRepairPolicyError {
    message: String,
}

impl fmt::Display for ParseRepairPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseRepairPolicyError {}

impl FromStr for RepairPolicy {
    type Err = ParseRepairPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "collapse" => Ok(RepairPolicy::Collapse),
            "insert-placeholder" | "placeholder" => Ok(RepairPolicy::InsertPlaceholder),
            _ =>
                Err(ParseRepairPolicyError {
                    message: format!("Invalid repair policy: '{}'", s),
                }),
        }
    }
}

/// Steps 1-2: keep the leading system turn and resolve same-role runs.
pub fn align_roles(turns: &[Turn], policy: RepairPolicy) -> Vec<Turn> {
    let mut aligned = Vec::with_capacity(turns.len() + 1);
    let mut rest = turns;

    if let Some((first, tail)) = turns.split_first() {
        if first.role == Role::System {
            aligned.push(first.clone());
            rest = tail;
        }
    }

    let mut last_role: Option<Role> = None;
    for turn in rest {
        if turn.role == Role::System {
            warn!("Dropping system turn found after the head of the conversation");
            continue;
        }
        if last_role == Some(turn.role) {
            match (policy, turn.role) {
                (RepairPolicy::InsertPlaceholder, Role::User) => {
                    aligned.push(Turn::placeholder());
                }
                _ => {
                    continue;
                }
            }
        }
        aligned.push(turn.clone());
        last_role = Some(turn.role);
    }

    aligned
}

/// Full repair: aligned turns ending in `[.., user, assistant("")]`.
///
/// A trailing empty assistant turn left behind by a failed generation is
/// treated as the pending placeholder, so repairing an already repaired
/// sequence yields the same sequence.
pub fn repair(turns: &[Turn], policy: RepairPolicy, continue_prompt: &str) -> Vec<Turn> {
    let mut repaired = align_roles(turns, policy);

    if repaired.last().is_some_and(|t| t.is_placeholder()) {
        repaired.pop();
    }

    let ends_with_user = repaired.last().is_some_and(|t| t.role == Role::User);
    if !ends_with_user {
        repaired.push(Turn::user(continue_prompt));
    }
    repaired.push(Turn::placeholder());
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(turns: &[Turn]) -> Vec<(Role, &str)> {
        turns
            .iter()
            .map(|t| (t.role, t.content.as_str()))
            .collect()
    }

    fn assert_alternates(turns: &[Turn]) {
        let body: Vec<Role> = turns
            .iter()
            .skip_while(|t| t.role == Role::System)
            .map(|t| t.role)
            .collect();
        for window in body.windows(2) {
            assert_ne!(window[0], window[1], "adjacent turns share a role: {:?}", body);
        }
        assert!(turns.iter().skip(1).all(|t| t.role != Role::System));
    }

    #[test]
    fn collapse_keeps_first_of_a_user_run() {
        let turns = vec![
            Turn::system("sys"),
            Turn::user("A"),
            Turn::user("B"),
            Turn::assistant("X"),
        ];
        let aligned = align_roles(&turns, RepairPolicy::Collapse);
        assert_eq!(
            pairs(&aligned),
            vec![(Role::System, "sys"), (Role::User, "A"), (Role::Assistant, "X")]
        );
    }

    #[test]
    fn placeholder_policy_separates_user_run() {
        let turns = vec![
            Turn::system("sys"),
            Turn::user("A"),
            Turn::user("B"),
            Turn::assistant("X"),
        ];
        let aligned = align_roles(&turns, RepairPolicy::InsertPlaceholder);
        assert_eq!(
            pairs(&aligned),
            vec![
                (Role::System, "sys"),
                (Role::User, "A"),
                (Role::Assistant, ""),
                (Role::User, "B"),
                (Role::Assistant, "X")
            ]
        );
    }

    #[test]
    fn placeholder_policy_drops_repeated_assistant() {
        let turns = vec![
            Turn::system("sys"),
            Turn::user("A"),
            Turn::assistant("X"),
            Turn::assistant("Y"),
        ];
        let aligned = align_roles(&turns, RepairPolicy::InsertPlaceholder);
        assert_eq!(
            pairs(&aligned),
            vec![(Role::System, "sys"), (Role::User, "A"), (Role::Assistant, "X")]
        );
    }

    #[test]
    fn trailing_user_gets_placeholder() {
        let turns = vec![Turn::system("sys"), Turn::user("A")];
        for policy in [RepairPolicy::Collapse, RepairPolicy::InsertPlaceholder] {
            let repaired = repair(&turns, policy, "Please continue.");
            assert_eq!(
                pairs(&repaired),
                vec![(Role::System, "sys"), (Role::User, "A"), (Role::Assistant, "")]
            );
        }
    }

    #[test]
    fn conversation_ending_on_assistant_gets_continue_prompt() {
        let turns = vec![Turn::system("sys"), Turn::user("A"), Turn::assistant("X")];
        let repaired = repair(&turns, RepairPolicy::Collapse, "Please continue.");
        assert_eq!(
            pairs(&repaired),
            vec![
                (Role::System, "sys"),
                (Role::User, "A"),
                (Role::Assistant, "X"),
                (Role::User, "Please continue."),
                (Role::Assistant, "")
            ]
        );
    }

    #[test]
    fn system_only_conversation_gets_continue_prompt() {
        let repaired = repair(&[Turn::system("sys")], RepairPolicy::InsertPlaceholder, "go on");
        assert_eq!(
            pairs(&repaired),
            vec![(Role::System, "sys"), (Role::User, "go on"), (Role::Assistant, "")]
        );
    }

    #[test]
    fn trailing_empty_assistant_counts_as_resolved() {
        let turns = vec![Turn::system("sys"), Turn::user("A"), Turn::placeholder()];
        let repaired = repair(&turns, RepairPolicy::InsertPlaceholder, "Please continue.");
        assert_eq!(
            pairs(&repaired),
            vec![(Role::System, "sys"), (Role::User, "A"), (Role::Assistant, "")]
        );
        let again = repair(&repaired, RepairPolicy::InsertPlaceholder, "Please continue.");
        assert_eq!(pairs(&again), pairs(&repaired));
    }

    #[test]
    fn stray_system_turns_are_dropped() {
        let turns = vec![
            Turn::system("sys"),
            Turn::user("A"),
            Turn::system("injected"),
            Turn::assistant("X"),
            Turn::user("B"),
        ];
        let repaired = repair(&turns, RepairPolicy::Collapse, "Please continue.");
        assert_eq!(
            pairs(&repaired),
            vec![
                (Role::System, "sys"),
                (Role::User, "A"),
                (Role::Assistant, "X"),
                (Role::User, "B"),
                (Role::Assistant, "")
            ]
        );
    }

    #[test]
    fn arbitrary_appends_always_alternate_after_repair() {
        let roles = [Role::User, Role::Assistant, Role::System];
        // Every role sequence of length 0..=7 after the system turn.
        for len in 0..=7u32 {
            for pattern in 0..(3usize).pow(len) {
                let mut turns = vec![Turn::system("sys")];
                let mut n = pattern;
                for i in 0..len {
                    let role = roles[n % 3];
                    n /= 3;
                    let content = if i % 4 == 3 { String::new() } else { format!("t{}", i) };
                    turns.push(Turn::new(role, content));
                }
                for policy in [RepairPolicy::Collapse, RepairPolicy::InsertPlaceholder] {
                    let repaired = repair(&turns, policy, "Please continue.");
                    assert_alternates(&repaired);
                    assert_eq!(repaired[0].role, Role::System);
                    let n = repaired.len();
                    assert_eq!(repaired[n - 2].role, Role::User);
                    assert!(repaired[n - 1].is_placeholder());
                }
            }
        }
    }

    #[test]
    fn policy_parses_from_cli_spelling() {
        assert_eq!("collapse".parse(), Ok(RepairPolicy::Collapse));
        assert_eq!("insert_placeholder".parse(), Ok(RepairPolicy::InsertPlaceholder));
        assert!("merge".parse::<RepairPolicy>().is_err());
    }
}
