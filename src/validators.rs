//! Field validators shared by request payloads and the CSV importer.

use std::borrow::Cow;
use std::collections::BTreeSet;

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

/// Username reserved for the self-service profile route.
pub const RESERVED_USERNAME: &str = "me";

static USERNAME_FORBIDDEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w.@+-]").expect("static username regex"));
static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-a-zA-Z0-9]+$").expect("static slug regex"));

fn error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Rejects characters outside `[\w.@+-]` (reporting each offending character
/// once) and the reserved name `me`.
pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    let offending: BTreeSet<&str> = USERNAME_FORBIDDEN
        .find_iter(name)
        .map(|m| m.as_str())
        .collect();
    if !offending.is_empty() {
        let chars = offending.into_iter().collect::<Vec<_>>().join(" ");
        let mut err = error("username_chars", format!("Username contains forbidden characters: {chars}"));
        err.add_param(Cow::from("characters"), &chars);
        return Err(err);
    }
    if name == RESERVED_USERNAME {
        return Err(error("username_reserved", "Username 'me' is reserved"));
    }
    Ok(())
}

/// Year must be in our era and not in the future. The upper bound is the
/// current calendar year at call time.
pub fn validate_year(value: i32) -> Result<(), ValidationError> {
    let now = Utc::now().year();
    if value <= 0 || value > now {
        let mut err = error("year_range", format!("Year must be between 1 and {now}"));
        err.add_param(Cow::from("value"), &value);
        return Err(err);
    }
    Ok(())
}

pub fn validate_slug(value: &str) -> Result<(), ValidationError> {
    if SLUG.is_match(value) {
        Ok(())
    } else {
        Err(error("slug_format", "Slug may contain only latin letters, digits and hyphens"))
    }
}

pub fn validate_score(value: i32) -> Result<(), ValidationError> {
    if (1..=10).contains(&value) {
        Ok(())
    } else {
        Err(error("score_range", "Score must be between 1 and 10"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_accepts_word_chars_and_symbols() {
        for ok in ["alice", "bob.smith", "a@b", "x+y", "under_score", "dash-ed", "Ölaf"] {
            assert!(validate_username(ok).is_ok(), "{ok} should be valid");
        }
    }

    #[test]
    fn username_names_offending_characters() {
        let err = validate_username("ab#c$$").unwrap_err();
        let chars = err.params.get("characters").unwrap().as_str().unwrap().to_string();
        assert_eq!(chars, "# $");
        assert!(err.message.unwrap().contains('$'));
    }

    #[test]
    fn username_me_is_reserved() {
        let err = validate_username("me").unwrap_err();
        assert_eq!(err.code, "username_reserved");
        assert!(validate_username("meme").is_ok());
    }

    #[test]
    fn year_bounds_follow_the_clock() {
        let now = Utc::now().year();
        assert!(validate_year(0).is_err());
        assert!(validate_year(-5).is_err());
        assert!(validate_year(now + 1).is_err());
        assert!(validate_year(now).is_ok());
        assert!(validate_year(1).is_ok());
    }

    #[test]
    fn slug_pattern() {
        assert!(validate_slug("sci-fi-2").is_ok());
        assert!(validate_slug("with_underscore").is_err());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("пробел").is_err());
    }

    #[test]
    fn score_range() {
        assert!(validate_score(0).is_err());
        assert!(validate_score(1).is_ok());
        assert!(validate_score(10).is_ok());
        assert!(validate_score(11).is_err());
    }
}
