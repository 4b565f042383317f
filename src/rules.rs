//! Blocking predicates: functions of a single field value producing an
//! optional token. Two records sharing a token under the same rule become a
//! candidate pair.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::error::DedupError;

lazy_static! {
    static ref DIGITS: Regex = Regex::new(r"\d+").unwrap();
    static ref LETTERS: Regex = Regex::new(r"[a-zA-Z]+").unwrap();
}

/// A pure, deterministic mapping from one field value to a blocking token.
///
/// Returning `Ok(None)` means the rule does not apply to the value. Errors are
/// fatal for the whole run.
pub trait PredicateRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, value: &str) -> Result<Option<String>, DedupError>;
}

impl fmt::Debug for dyn PredicateRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PredicateRule({})", self.name())
    }
}

/// Wraps a plain function as a named rule.
#[derive(Clone, Copy)]
pub struct FnRule {
    name: &'static str,
    func: fn(&str) -> Option<String>,
}

impl FnRule {
    pub const fn new(name: &'static str, func: fn(&str) -> Option<String>) -> Self {
        FnRule { name, func }
    }
}

impl PredicateRule for FnRule {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, value: &str) -> Result<Option<String>, DedupError> {
        Ok((self.func)(value))
    }
}

fn non_empty(x: &str) -> Option<&str> {
    if x.is_empty() {
        None
    } else {
        Some(x)
    }
}

fn prefix(x: &str, n: usize) -> String {
    x.chars().take(n).collect()
}

fn without_spaces(x: &str) -> String {
    x.replace(' ', "")
}

pub fn whole_field(x: &str) -> Option<String> {
    non_empty(x.trim()).map(String::from)
}

pub fn first_word(x: &str) -> Option<String> {
    x.split_whitespace().next().map(String::from)
}

pub fn first_two_words(x: &str) -> Option<String> {
    let words: Vec<&str> = x.split_whitespace().take(2).collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

pub fn first_three_letters(x: &str) -> Option<String> {
    non_empty(x.trim()).map(|t| prefix(t, 3))
}

pub fn first_four_letters(x: &str) -> Option<String> {
    non_empty(x.trim()).map(|t| prefix(t, 4))
}

pub fn first_five_letters(x: &str) -> Option<String> {
    non_empty(x.trim()).map(|t| prefix(t, 5))
}

pub fn first_three_letters_no_space(x: &str) -> Option<String> {
    non_empty(&without_spaces(x)).map(|t| prefix(t, 3))
}

pub fn first_four_letters_no_space(x: &str) -> Option<String> {
    non_empty(&without_spaces(x)).map(|t| prefix(t, 4))
}

pub fn first_five_letters_no_space(x: &str) -> Option<String> {
    non_empty(&without_spaces(x)).map(|t| prefix(t, 5))
}

// Digit runs too long for u128 still sort correctly by (length, text) once
// leading zeros are stripped.
fn numeric_key(run: &str) -> (usize, String) {
    let trimmed = run.trim_start_matches('0');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    (trimmed.len(), trimmed.to_string())
}

fn sorted_numbers(x: &str) -> Vec<String> {
    let mut numbers: Vec<(usize, String)> =
        DIGITS.find_iter(x).map(|m| numeric_key(m.as_str())).collect();
    numbers.sort();
    numbers.into_iter().map(|(_, n)| n).collect()
}

pub fn sorted_integers(x: &str) -> Option<String> {
    let numbers = sorted_numbers(x);
    if numbers.is_empty() {
        None
    } else {
        Some(numbers.join(" "))
    }
}

pub fn first_integer(x: &str) -> Option<String> {
    DIGITS.find(x).map(|m| m.as_str().to_string())
}

pub fn last_integer(x: &str) -> Option<String> {
    DIGITS.find_iter(x).last().map(|m| m.as_str().to_string())
}

pub fn largest_integer(x: &str) -> Option<String> {
    sorted_numbers(x).pop()
}

pub fn three_letter_abbreviation(x: &str) -> Option<String> {
    let words: Vec<&str> = LETTERS.find_iter(x).map(|m| m.as_str()).take(3).collect();
    if words.len() < 3 {
        return None;
    }
    Some(words.iter().filter_map(|w| w.chars().next()).collect())
}

const BUILTIN_RULES: [FnRule; 14] = [
    FnRule::new("whole_field", whole_field),
    FnRule::new("first_word", first_word),
    FnRule::new("first_two_words", first_two_words),
    FnRule::new("first_three_letters", first_three_letters),
    FnRule::new("first_four_letters", first_four_letters),
    FnRule::new("first_five_letters", first_five_letters),
    FnRule::new("first_three_letters_no_space", first_three_letters_no_space),
    FnRule::new("first_four_letters_no_space", first_four_letters_no_space),
    FnRule::new("first_five_letters_no_space", first_five_letters_no_space),
    FnRule::new("sorted_integers", sorted_integers),
    FnRule::new("first_integer", first_integer),
    FnRule::new("last_integer", last_integer),
    FnRule::new("largest_integer", largest_integer),
    FnRule::new("three_letter_abbreviation", three_letter_abbreviation),
];

/// Every built-in rule, in a fixed order.
pub fn all_rules() -> Vec<Arc<dyn PredicateRule>> {
    BUILTIN_RULES
        .iter()
        .map(|r| Arc::new(*r) as Arc<dyn PredicateRule>)
        .collect()
}

pub fn rule_by_name(name: &str) -> Result<Arc<dyn PredicateRule>, DedupError> {
    BUILTIN_RULES
        .iter()
        .find(|r| r.name == name)
        .map(|r| Arc::new(*r) as Arc<dyn PredicateRule>)
        .ok_or_else(|| DedupError::invalid_config(format!("unknown blocking rule '{name}'")))
}
