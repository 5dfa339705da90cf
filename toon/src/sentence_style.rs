//! The odd/even sentence convention of a storyboard.
//!
//! Odd scenes are spoken as open clauses that lead into the next scene
//! ("...했는데", "...해서"), even scenes close the thought ("...더라고요").
//! Nothing guarantees the model follows this, so the check here is a
//! heuristic on the ending of each script, not a grammar.
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Connective endings that leave a Korean sentence open.
pub const INCOMPLETE_SUFFIXES: &[&str] = &[
    "는데", "은데", "인데", "던데", "해서", "어서", "아서", "여서", "더니", "니까", "으니", "면서",
    "길래", "는지", "는데도", "지만",
];

/// Trailing characters ignored when looking at how a script ends.
const TRAILING: &[char] = &[
    '.', ',', '!', '?', '~', '…', '"', '\'', '”', '’', ')', ' ', '\t', '\n',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SentenceForm {
    #[strum(to_string = "an incomplete")]
    Open,
    #[strum(to_string = "a complete")]
    Closed,
}

impl SentenceForm {
    /// Classify a script by its ending.
    pub fn of(script: &str) -> Self {
        let trimmed = script.trim_end_matches(TRAILING);
        if INCOMPLETE_SUFFIXES
            .iter()
            .any(|suffix| trimmed.ends_with(suffix))
        {
            SentenceForm::Open
        } else {
            SentenceForm::Closed
        }
    }
}

/// How seriously to take the sentence convention.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Violations are logged and the scenes are accepted.
    #[default]
    Lenient,
    /// Any violation rejects the scenes.
    Strict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connective_endings_are_open() {
        for script in [
            "비문증 방치하면 실명될 수도 있다고 해서",
            "그냥 하루에 한 알씩 챙겨 먹기 시작했는데,",
            "약사 선생님한테 물어봤더니...",
            "효과 없으면 100% 환불에 34% 할인까지 한다니까",
        ] {
            assert_eq!(SentenceForm::of(script), SentenceForm::Open, "{script}");
        }
    }

    #[test]
    fn finished_sentences_are_closed() {
        for script in [
            "시야가 맑아지는게 느껴지더라고요",
            "이제야 알아서 허무하네요..",
            "2주만에 싹 말끔해질 줄 누가 알았겠어요?",
            "할인할 때 싸게 사세요!",
        ] {
            assert_eq!(SentenceForm::of(script), SentenceForm::Closed, "{script}");
        }
    }

    #[test]
    fn strictness_parses_from_lowercase() {
        assert_eq!("strict".parse::<Strictness>().unwrap(), Strictness::Strict);
        assert_eq!(Strictness::default(), Strictness::Lenient);
    }
}
